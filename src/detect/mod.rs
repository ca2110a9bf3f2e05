mod backend;
pub mod client;
mod result;

pub use backend::{DetectionService, ServiceReply};
pub use client::{detection_url, parse_detection_response, HttpDetectionClient};
pub use result::{filter_targets, format_confidence, BoundingBox, DetectionResult, Prediction};
