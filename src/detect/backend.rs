use anyhow::Result;

use crate::detect::result::Prediction;

/// What the detection service made of one frame.
#[derive(Clone, Debug, PartialEq)]
pub enum ServiceReply {
    /// The service answered with a parsable object list.
    Predictions(Vec<Prediction>),
    /// Transport failure or non-success status. Not an error for the caller:
    /// the frame is treated as having no detections.
    Unavailable { reason: String },
}

/// Detection service seam.
///
/// Entities only see this trait; the HTTP client is the production
/// implementation and tests substitute their own.
pub trait DetectionService: Send {
    /// Service identifier used in log lines.
    fn name(&self) -> &str;

    /// Submit one encoded frame.
    ///
    /// Returns `Err` only when the service answered successfully with a body
    /// that cannot be parsed.
    fn detect(&self, image: &[u8]) -> Result<ServiceReply>;
}
