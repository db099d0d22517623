//! Stream runtime that decodes a video source, periodically runs remote
//! inference, overlays the latest result and publishes the annotated stream.
//!
//! The module is split into focused submodules:
//! - `config`: CLI configuration parsing.
//! - `pipeline`: The reader → scheduler → writer frame pipeline.
//! - `controller`: Single-flight supervision of pipeline runs.
//! - `resolver`: Source address resolution and metadata.
//! - `egress`: FIFO sink feeding the transcoder.
//! - `server`: Actix Web control endpoints.
//! - `bus`: Message-bus style request handling.
//! - `telemetry`: Tracing and Prometheus setup.
//! - `data`: Shared structs passed between stages.
//! - `annotation`: Drawing of tags, boxes and labels.

pub(crate) mod annotation;
pub(crate) mod bus;
pub(crate) mod config;
pub(crate) mod controller;
pub(crate) mod data;
pub(crate) mod egress;
pub(crate) mod pipeline;
pub(crate) mod resolver;
pub(crate) mod server;
pub(crate) mod telemetry;
#[cfg(test)]
pub(crate) mod testing;
