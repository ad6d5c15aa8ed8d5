//! Service layer

pub mod inference;
pub mod observer;
pub mod orchestrator;
pub mod output;
pub mod sync;
pub mod template_detector;
pub mod templates;
