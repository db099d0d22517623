//! Inference-side building blocks shared by the stream runtime: the result
//! model and its JSON wire shape, the blocking inference client, and the
//! crop/pad coordinate mapper.

pub mod affine;
pub mod client;
pub mod crop;
pub mod result;
pub mod wire;

pub use affine::AffineMap;
pub use client::{HttpInferenceClient, InferenceClient, InferenceError};
pub use crop::{CropMaps, Cropped, crop_to_aspect, normalize_roi};
pub use result::{BoundingBox, InferenceResult, Prediction};
