//! Object detection entities backed by tensorflow-lite-rest-server.
//!
//! Each entity watches one camera for one target label. The host pushes
//! encoded frames; every frame is posted to the detection service, the
//! returned objects are filtered to the target, and the entity exposes the
//! match count, per-match scores and the time of the last detection. With a
//! save folder configured, the latest frame containing the target is written
//! with boxes drawn around matches at or above the confidence threshold.
//!
//! # Module Structure
//!
//! - `detect`: predictions, target filter, detection service client
//! - `annotate`: bounding box rendering and snapshot files
//! - `entity`: per-camera state machine and host accessors
//! - `platform`: entity setup from configuration, per-entity processing slot
//! - `config`: configuration file, environment overrides, validation

use std::time::Duration;

pub mod annotate;
pub mod config;
pub mod detect;
pub mod entity;
pub mod platform;

pub use annotate::Annotator;
pub use config::{EntityConfig, PlatformConfig, SourceConfig};
pub use detect::{
    filter_targets, format_confidence, BoundingBox, DetectionResult, DetectionService,
    HttpDetectionClient, Prediction, ServiceReply,
};
pub use entity::{unit_label, EntitySnapshot, FrameOutcome, ObjectDetectEntity};
pub use platform::DetectionPlatform;

pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_TARGET: &str = "person";
/// Percent scale, same as the per-prediction confidence.
pub const DEFAULT_CONFIDENCE: f64 = 80.0;
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
/// Box and label color.
pub const HIGHLIGHT_COLOR: [u8; 3] = [255, 0, 0];
/// Entities never self-trigger; the host pushes frames.
pub const SCAN_INTERVAL: Duration = Duration::from_secs(60 * 60 * 24 * 365);
