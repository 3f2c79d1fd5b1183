/// Service layer
///
/// - `transform`: decode, per-mode transformation, encode
/// - `worker`: queue-driven processing pipeline
/// - `submission`: upload intake and task publishing
pub mod submission;
pub mod transform;
pub mod worker;

pub use submission::SubmissionService;
pub use transform::{TransformConfig, TransformEngine, TransformError};
pub use worker::{WorkerConfig, WorkerPipeline};
