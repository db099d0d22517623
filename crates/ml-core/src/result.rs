use std::cmp::Ordering;

/// Normalized bounding box, every coordinate in `[0, 1]` relative to the image.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BoundingBox {
    pub xmin: f64,
    pub ymin: f64,
    pub xmax: f64,
    pub ymax: f64,
}

impl BoundingBox {
    pub fn new(xmin: f64, ymin: f64, xmax: f64, ymax: f64) -> Self {
        Self {
            xmin,
            ymin,
            xmax,
            ymax,
        }
    }

    /// Box covering the whole image.
    pub fn full() -> Self {
        Self::new(0.0, 0.0, 1.0, 1.0)
    }

    /// Pixel corners `(xmin, ymin, xmax, ymax)` for an image of the given size,
    /// truncated toward zero.
    pub fn to_pixels(&self, width: u32, height: u32) -> (i32, i32, i32, i32) {
        let w = width as f64;
        let h = height as f64;
        (
            (self.xmin * w) as i32,
            (self.ymin * h) as i32,
            (self.xmax * w) as i32,
            (self.ymax * h) as i32,
        )
    }
}

/// One entry of an inference result.
#[derive(Debug, Clone, PartialEq)]
pub enum Prediction {
    /// Whole-image tag.
    Classification { label: String, score: f32 },
    /// Localised object.
    Detection {
        label: String,
        score: f32,
        bbox: BoundingBox,
    },
}

impl Prediction {
    pub fn label(&self) -> &str {
        match self {
            Prediction::Classification { label, .. } | Prediction::Detection { label, .. } => {
                label
            }
        }
    }

    pub fn score(&self) -> f32 {
        match self {
            Prediction::Classification { score, .. } | Prediction::Detection { score, .. } => {
                *score
            }
        }
    }

    pub fn is_classification(&self) -> bool {
        matches!(self, Prediction::Classification { .. })
    }

    pub fn bbox(&self) -> Option<&BoundingBox> {
        match self {
            Prediction::Detection { bbox, .. } => Some(bbox),
            Prediction::Classification { .. } => None,
        }
    }
}

/// Ordered predictions returned by one inference call.
///
/// Results are never mutated once built; the pipeline shares them behind an
/// `Arc` across every frame that reuses them.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct InferenceResult {
    predictions: Vec<Prediction>,
}

impl InferenceResult {
    pub fn new(predictions: Vec<Prediction>) -> Self {
        Self { predictions }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn predictions(&self) -> &[Prediction] {
        &self.predictions
    }

    pub fn is_empty(&self) -> bool {
        self.predictions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.predictions.len()
    }

    /// Classification tags ordered by descending score.
    pub fn classifications_by_score(&self) -> Vec<&Prediction> {
        let mut tags: Vec<&Prediction> = self
            .predictions
            .iter()
            .filter(|p| p.is_classification())
            .collect();
        tags.sort_by(|a, b| {
            b.score()
                .partial_cmp(&a.score())
                .unwrap_or(Ordering::Equal)
        });
        tags
    }

    /// Detections in the order the service returned them.
    pub fn detections(&self) -> impl Iterator<Item = &Prediction> {
        self.predictions.iter().filter(|p| !p.is_classification())
    }

    /// Rebuild the result with every detection box passed through `f`.
    pub fn map_boxes(&self, mut f: impl FnMut(&BoundingBox) -> BoundingBox) -> Self {
        let predictions = self
            .predictions
            .iter()
            .map(|prediction| match prediction {
                Prediction::Detection { label, score, bbox } => Prediction::Detection {
                    label: label.clone(),
                    score: *score,
                    bbox: f(bbox),
                },
                other => other.clone(),
            })
            .collect();
        Self { predictions }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag(label: &str, score: f32) -> Prediction {
        Prediction::Classification {
            label: label.into(),
            score,
        }
    }

    #[test]
    fn classifications_sort_by_descending_score() {
        let result = InferenceResult::new(vec![
            tag("glasses", 0.17),
            tag("sunglasses", 0.80),
            Prediction::Detection {
                label: "dog".into(),
                score: 0.9,
                bbox: BoundingBox::full(),
            },
            tag("hat", 0.42),
        ]);

        let labels: Vec<&str> = result
            .classifications_by_score()
            .into_iter()
            .map(Prediction::label)
            .collect();
        assert_eq!(labels, ["sunglasses", "hat", "glasses"]);
        assert_eq!(result.detections().count(), 1);
    }

    #[test]
    fn map_boxes_leaves_tags_untouched() {
        let result = InferenceResult::new(vec![
            tag("cat", 0.5),
            Prediction::Detection {
                label: "cat".into(),
                score: 0.5,
                bbox: BoundingBox::new(0.1, 0.2, 0.3, 0.4),
            },
        ]);
        let shifted = result.map_boxes(|b| BoundingBox::new(b.xmin + 0.1, b.ymin, b.xmax, b.ymax));

        assert_eq!(shifted.predictions()[0], result.predictions()[0]);
        let bbox = shifted.predictions()[1].bbox().copied().unwrap_or_default();
        assert!((bbox.xmin - 0.2).abs() < 1e-12);
    }

    #[test]
    fn pixel_corners_truncate() {
        let bbox = BoundingBox::new(0.3126, 0.3665, 0.6668, 0.5319);
        assert_eq!(bbox.to_pixels(640, 360), (200, 131, 426, 191));
    }
}
