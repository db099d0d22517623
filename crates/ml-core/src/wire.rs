//! JSON shape exchanged with the inference service and published on the
//! message bus.
//!
//! ```json
//! {"outputs": [{"labels": {"predicted": [
//!     {"label_name": "dog", "score": 0.99, "roi": {"bbox": {"xmin": 0.1, ...}}}
//! ], "discarded": []}}]}
//! ```
//!
//! A prediction carrying a `roi` is a detection, anything else is a
//! whole-image tag. Only the first output is read.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::result::{BoundingBox, InferenceResult, Prediction};

#[derive(Debug, Error)]
pub enum WireError {
    #[error("malformed inference payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("inference payload contains no outputs")]
    NoOutputs,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WireResponse {
    #[serde(default)]
    pub outputs: Vec<WireOutput>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WireOutput {
    #[serde(default)]
    pub labels: WireLabels,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WireLabels {
    #[serde(default)]
    pub predicted: Vec<WirePrediction>,
    #[serde(default)]
    pub discarded: Vec<WirePrediction>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WirePrediction {
    pub label_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_id: Option<i64>,
    pub score: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roi: Option<WireRoi>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireRoi {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region_id: Option<i64>,
    pub bbox: WireBox,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WireBox {
    pub xmin: f64,
    pub ymin: f64,
    pub xmax: f64,
    pub ymax: f64,
}

impl From<WirePrediction> for Prediction {
    fn from(wire: WirePrediction) -> Self {
        match wire.roi {
            Some(roi) => Prediction::Detection {
                label: wire.label_name,
                score: wire.score,
                bbox: BoundingBox::new(roi.bbox.xmin, roi.bbox.ymin, roi.bbox.xmax, roi.bbox.ymax),
            },
            None => Prediction::Classification {
                label: wire.label_name,
                score: wire.score,
            },
        }
    }
}

impl From<&Prediction> for WirePrediction {
    fn from(prediction: &Prediction) -> Self {
        let roi = prediction.bbox().map(|bbox| WireRoi {
            region_id: None,
            bbox: WireBox {
                xmin: bbox.xmin,
                ymin: bbox.ymin,
                xmax: bbox.xmax,
                ymax: bbox.ymax,
            },
        });
        WirePrediction {
            label_name: prediction.label().to_string(),
            label_id: None,
            score: prediction.score(),
            threshold: None,
            roi,
        }
    }
}

impl TryFrom<WireResponse> for InferenceResult {
    type Error = WireError;

    fn try_from(response: WireResponse) -> Result<Self, Self::Error> {
        let output = response
            .outputs
            .into_iter()
            .next()
            .ok_or(WireError::NoOutputs)?;
        Ok(InferenceResult::new(
            output
                .labels
                .predicted
                .into_iter()
                .map(Prediction::from)
                .collect(),
        ))
    }
}

impl From<&InferenceResult> for WireResponse {
    fn from(result: &InferenceResult) -> Self {
        WireResponse {
            outputs: vec![WireOutput {
                labels: WireLabels {
                    predicted: result.predictions().iter().map(WirePrediction::from).collect(),
                    discarded: Vec::new(),
                },
            }],
        }
    }
}

/// Parse a service response body.
pub fn parse_result(body: &[u8]) -> Result<InferenceResult, WireError> {
    let response: WireResponse = serde_json::from_slice(body)?;
    InferenceResult::try_from(response)
}

/// Serialize a result in the service's own shape.
pub fn to_json(result: &InferenceResult) -> Result<Vec<u8>, WireError> {
    Ok(serde_json::to_vec(&WireResponse::from(result))?)
}
