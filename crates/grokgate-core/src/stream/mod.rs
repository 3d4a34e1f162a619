//! Upstream response decoding: newline-delimited JSON events in, OpenAI
//! deltas out.

pub mod consumer;
pub mod translator;

pub use consumer::{collect_completion, sse_stream, ImageRenderer};
pub use translator::{translate, ResponseContext, StepOutput, TranslatorOptions};
