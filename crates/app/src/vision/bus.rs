//! Request/response handling for message-bus deployments.
//!
//! Each message carries one encoded image. The answer is either the
//! annotated image or the JSON inference result, depending on `draw_demo`.

use std::sync::Arc;

use anyhow::{Context, Result};
use ml_core::{InferenceClient, InferenceResult, wire};
use tracing::{debug, info};

use crate::vision::{
    annotation::{AnnotationRenderer, OverlayStyle},
    config::BusConfig,
};

pub(crate) struct MessageHandler {
    config: BusConfig,
    client: Arc<dyn InferenceClient>,
    renderer: AnnotationRenderer,
    counter: u64,
    last: Arc<InferenceResult>,
}

impl MessageHandler {
    pub(crate) fn new(
        config: BusConfig,
        client: Arc<dyn InferenceClient>,
        style: Arc<OverlayStyle>,
    ) -> Self {
        let renderer = AnnotationRenderer::new(style, config.render.clone());
        Self {
            config,
            client,
            renderer,
            counter: 0,
            last: Arc::new(InferenceResult::empty()),
        }
    }

    /// Messages handled successfully so far.
    pub(crate) fn handled(&self) -> u64 {
        self.counter
    }

    /// Answer one message.
    ///
    /// Inference runs on every `process_each_n_frames`-th message; the others
    /// reuse the previous result. A failed message does not advance the count.
    pub(crate) fn handle(&mut self, payload: &[u8]) -> Result<Vec<u8>> {
        let _span = tracing::info_span!("bus.message", index = self.counter).entered();

        if self.counter % self.config.process_each_n_frames == 0 {
            info!("Sending inference request");
            let result = self
                .client
                .infer(payload)
                .context("Inference request failed")?;
            debug!(predictions = result.len(), "Got inference response");
            self.last = Arc::new(result);
        }

        let answer = if self.config.draw_demo {
            self.renderer
                .annotate_encoded(payload, &self.last, self.config.jpeg_quality)?
        } else {
            wire::to_json(&self.last).context("Failed to serialise inference result")?
        };

        self.counter += 1;
        Ok(answer)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io::Cursor,
        sync::atomic::{AtomicU64, Ordering},
    };

    use image::{ImageFormat, Rgb, RgbImage};
    use ml_core::{InferenceError, Prediction};

    use super::*;
    use crate::vision::annotation::RenderOptions;

    #[derive(Default)]
    struct TaggingClient {
        calls: AtomicU64,
    }

    impl InferenceClient for TaggingClient {
        fn infer(&self, _image: &[u8]) -> Result<InferenceResult, InferenceError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(InferenceResult::new(vec![Prediction::Classification {
                label: format!("tag-{call}"),
                score: 0.75,
            }]))
        }
    }

    fn png(width: u32, height: u32) -> Vec<u8> {
        let image = RgbImage::from_pixel(width, height, Rgb([10, 20, 30]));
        let mut bytes = Cursor::new(Vec::new());
        image.write_to(&mut bytes, ImageFormat::Png).unwrap();
        bytes.into_inner()
    }

    fn config(process_each_n_frames: u64, draw_demo: bool) -> BusConfig {
        BusConfig {
            process_each_n_frames,
            draw_demo,
            render: RenderOptions::preview(),
            jpeg_quality: 75,
        }
    }

    #[test]
    fn json_answers_reuse_results_between_inferences() {
        let client = Arc::new(TaggingClient::default());
        let mut handler = MessageHandler::new(
            config(3, false),
            client.clone(),
            Arc::new(OverlayStyle::default()),
        );

        let mut labels = Vec::new();
        for _ in 0..7 {
            let answer = handler.handle(b"raw-bytes").unwrap();
            let json: serde_json::Value = serde_json::from_slice(&answer).unwrap();
            labels.push(
                json["outputs"][0]["labels"]["predicted"][0]["label_name"]
                    .as_str()
                    .unwrap()
                    .to_string(),
            );
        }

        assert_eq!(client.calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            labels,
            ["tag-0", "tag-0", "tag-0", "tag-1", "tag-1", "tag-1", "tag-2"]
        );
        assert_eq!(handler.handled(), 7);
    }

    #[test]
    fn demo_answers_are_annotated_jpegs() {
        let mut handler = MessageHandler::new(
            config(1, true),
            Arc::new(TaggingClient::default()),
            Arc::new(OverlayStyle::default()),
        );
        let answer = handler.handle(&png(160, 120)).unwrap();

        assert!(answer.starts_with(&[0xff, 0xd8]));
        let decoded = image::load_from_memory(&answer).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (160, 120));
    }

    #[test]
    fn undecodable_demo_payload_is_an_error() {
        let mut handler = MessageHandler::new(
            config(1, true),
            Arc::new(TaggingClient::default()),
            Arc::new(OverlayStyle::default()),
        );
        assert!(handler.handle(b"not an image").is_err());
        assert_eq!(handler.handled(), 0);
    }
}
