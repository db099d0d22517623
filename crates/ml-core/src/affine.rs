//! Homogeneous 3×3 transforms between image coordinate spaces.

use std::ops::Mul;

/// Row-major 3×3 matrix acting on column vectors `(x, y, 1)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineMap {
    m: [[f64; 3]; 3],
}

impl AffineMap {
    pub fn identity() -> Self {
        Self::from_rows([[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]])
    }

    pub fn from_rows(m: [[f64; 3]; 3]) -> Self {
        Self { m }
    }

    pub fn to_rows(&self) -> [[f64; 3]; 3] {
        self.m
    }

    pub fn translation(dx: f64, dy: f64) -> Self {
        Self::from_rows([[1.0, 0.0, dx], [0.0, 1.0, dy], [0.0, 0.0, 1.0]])
    }

    pub fn scale(sx: f64, sy: f64) -> Self {
        Self::from_rows([[sx, 0.0, 0.0], [0.0, sy, 0.0], [0.0, 0.0, 1.0]])
    }

    /// Maps normalized coordinates to pixels of a `width × height` image.
    pub fn denormalize(width: u32, height: u32) -> Self {
        Self::scale(width as f64, height as f64)
    }

    /// Maps pixels of a `width × height` image to normalized coordinates.
    pub fn normalize(width: u32, height: u32) -> Self {
        Self::scale(1.0 / width as f64, 1.0 / height as f64)
    }

    /// Matrix product `self · other`: `other` is applied first.
    pub fn compose(&self, other: &Self) -> Self {
        let a = &self.m;
        let b = &other.m;
        let mut out = [[0.0; 3]; 3];
        for (row, out_row) in out.iter_mut().enumerate() {
            for (col, cell) in out_row.iter_mut().enumerate() {
                *cell = a[row][0] * b[0][col] + a[row][1] * b[1][col] + a[row][2] * b[2][col];
            }
        }
        Self { m: out }
    }

    /// Homogeneous coordinates of `(x, y, 1)` after the transform.
    pub fn apply_homogeneous(&self, x: f64, y: f64) -> [f64; 3] {
        let m = &self.m;
        [
            m[0][0] * x + m[0][1] * y + m[0][2],
            m[1][0] * x + m[1][1] * y + m[1][2],
            m[2][0] * x + m[2][1] * y + m[2][2],
        ]
    }

    /// Transform a point and project it back onto the `w = 1` plane.
    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        let [px, py, pw] = self.apply_homogeneous(x, y);
        (px / pw, py / pw)
    }

    pub fn determinant(&self) -> f64 {
        let m = &self.m;
        m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
            - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
            + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
    }

    /// Inverse through the adjugate; `None` for singular matrices.
    pub fn inverse(&self) -> Option<Self> {
        let det = self.determinant();
        if det.abs() < 1e-12 {
            return None;
        }
        let m = &self.m;
        let inv_det = 1.0 / det;
        let cof = |r0: usize, r1: usize, c0: usize, c1: usize| {
            m[r0][c0] * m[r1][c1] - m[r0][c1] * m[r1][c0]
        };
        Some(Self::from_rows([
            [
                cof(1, 2, 1, 2) * inv_det,
                -cof(0, 2, 1, 2) * inv_det,
                cof(0, 1, 1, 2) * inv_det,
            ],
            [
                -cof(1, 2, 0, 2) * inv_det,
                cof(0, 2, 0, 2) * inv_det,
                -cof(0, 1, 0, 2) * inv_det,
            ],
            [
                cof(1, 2, 0, 1) * inv_det,
                -cof(0, 2, 0, 1) * inv_det,
                cof(0, 1, 0, 1) * inv_det,
            ],
        ]))
    }
}

impl Default for AffineMap {
    fn default() -> Self {
        Self::identity()
    }
}

impl Mul for AffineMap {
    type Output = AffineMap;

    fn mul(self, rhs: AffineMap) -> AffineMap {
        self.compose(&rhs)
    }
}
