//! Kernel module - job processing infrastructure and live event delivery.

pub mod jobs;
pub mod sse;
pub mod stream_hub;

pub use stream_hub::{JobEventHub, DEFAULT_EVENT_CAPACITY};
