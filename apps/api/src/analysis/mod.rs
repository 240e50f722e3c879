//! Job description breakdowns generated by the plain completion provider.

pub mod handlers;
pub mod jobs;
pub mod prompts;
