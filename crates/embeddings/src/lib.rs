pub mod config;
pub mod cross_encoder;
pub mod engine;
mod onnx;

pub use config::{CrossEncoderConfig, EmbeddingConfig};
pub use cross_encoder::CrossEncoder;
pub use engine::EmbeddingEngine;
