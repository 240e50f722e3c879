//! Multimodal chat assistant backed by the reasoning provider.

pub mod handlers;
