//! Object detection entity.
//!
//! One entity watches one camera for one target label. The host pushes
//! frames with [`ObjectDetectEntity::process_image`] and reads state back
//! between frames. Each frame fully replaces the previous result; only the
//! last detection timestamp survives across frames.

use anyhow::Result;
use chrono::{DateTime, Local};
use image::DynamicImage;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::annotate::Annotator;
use crate::config::EntityConfig;
use crate::detect::{DetectionResult, DetectionService, Prediction, ServiceReply};
use crate::{DATETIME_FORMAT, SCAN_INTERVAL};

/// How a single frame was handled.
///
/// The entity state does not distinguish an unavailable service from an
/// empty scene (both read as a count of zero); this value does.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    /// The service answered; number of target matches.
    Counted(usize),
    /// Transport failure or non-success status.
    ServiceUnavailable,
    /// Undecodable frame or malformed service response.
    Rejected,
    /// Another frame for the same entity was still in flight; dropped.
    Busy,
}

/// Host-facing view of an entity.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct EntitySnapshot {
    pub name: String,
    pub state: Option<usize>,
    pub unit_of_measurement: String,
    pub attributes: BTreeMap<String, serde_json::Value>,
    pub camera_entity: String,
}

pub struct ObjectDetectEntity {
    config: EntityConfig,
    service: Box<dyn DetectionService>,
    annotator: Option<Annotator>,
    state: Option<usize>,
    targets: Vec<Prediction>,
    last_detection: Option<DateTime<Local>>,
}

impl ObjectDetectEntity {
    /// Fails when a save folder is configured but unusable.
    pub fn new(config: EntityConfig, service: Box<dyn DetectionService>) -> Result<Self> {
        let annotator = match &config.save_file_folder {
            Some(dir) => Some(Annotator::new(
                dir,
                config.confidence,
                config.label_font.as_deref(),
            )?),
            None => None,
        };
        Ok(Self {
            config,
            service,
            annotator,
            state: None,
            targets: Vec::new(),
            last_detection: None,
        })
    }

    /// Process one frame pushed by the host.
    pub fn process_image(&mut self, image: &[u8]) -> FrameOutcome {
        self.process_image_at(image, Local::now())
    }

    /// Same as [`process_image`](Self::process_image) with an explicit clock reading.
    pub fn process_image_at(&mut self, image: &[u8], now: DateTime<Local>) -> FrameOutcome {
        let decoded = match image::load_from_memory(image) {
            Ok(decoded) => decoded,
            Err(err) => {
                log::warn!("{}: cannot decode frame: {}", self.config.name, err);
                return FrameOutcome::Rejected;
            }
        };

        self.state = Some(0);
        self.targets.clear();

        let predictions = match self.service.detect(image) {
            Ok(ServiceReply::Predictions(predictions)) => predictions,
            Ok(ServiceReply::Unavailable { reason }) => {
                log::warn!(
                    "{}: detection service {} unavailable: {}",
                    self.config.name,
                    self.service.name(),
                    reason
                );
                return FrameOutcome::ServiceUnavailable;
            }
            Err(err) => {
                log::warn!("{}: frame rejected: {:#}", self.config.name, err);
                return FrameOutcome::Rejected;
            }
        };

        let result = DetectionResult::new(predictions, &self.config.target);
        let count = result.count();
        log::debug!(
            "{}: {} objects, {} {}",
            self.config.name,
            result.predictions.len(),
            count,
            unit_label(&self.config.target, Some(count))
        );

        self.state = Some(count);
        self.targets = result.targets;
        if count > 0 {
            self.last_detection = Some(now);
            self.save_snapshot(&decoded);
        }

        FrameOutcome::Counted(count)
    }

    fn save_snapshot(&self, decoded: &DynamicImage) {
        let Some(annotator) = &self.annotator else {
            return;
        };
        if let Err(err) =
            annotator.save_latest(decoded, &self.targets, &self.config.target, &self.config.name)
        {
            log::warn!("{}: snapshot not saved: {:#}", self.config.name, err);
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Count of target matches in the last frame; `None` before the first.
    pub fn state(&self) -> Option<usize> {
        self.state
    }

    pub fn camera_entity(&self) -> &str {
        &self.config.camera_entity
    }

    pub fn target(&self) -> &str {
        &self.config.target
    }

    pub fn confidence(&self) -> f64 {
        self.config.confidence
    }

    pub fn targets(&self) -> &[Prediction] {
        &self.targets
    }

    /// The entity never asks to be polled; frames arrive from the host.
    pub fn scan_interval(&self) -> Duration {
        SCAN_INTERVAL
    }

    pub fn unit_of_measurement(&self) -> String {
        unit_label(&self.config.target, self.state)
    }

    pub fn last_detection(&self) -> Option<String> {
        self.last_detection
            .map(|at| at.format(DATETIME_FORMAT).to_string())
    }

    /// `targets`: scores of the current matches (omitted when none).
    /// `last_<target>_detection`: time of the last frame with a match.
    pub fn attributes(&self) -> BTreeMap<String, serde_json::Value> {
        let mut attrs = BTreeMap::new();
        if !self.targets.is_empty() {
            let scores: Vec<f64> = self.targets.iter().map(|t| t.score).collect();
            attrs.insert("targets".to_string(), serde_json::json!(scores));
        }
        if let Some(at) = self.last_detection() {
            attrs.insert(
                format!("last_{}_detection", self.config.target),
                serde_json::Value::String(at),
            );
        }
        attrs
    }

    pub fn snapshot(&self) -> EntitySnapshot {
        EntitySnapshot {
            name: self.config.name.clone(),
            state: self.state,
            unit_of_measurement: self.unit_of_measurement(),
            attributes: self.attributes(),
            camera_entity: self.config.camera_entity.clone(),
        }
    }
}

/// Unit label for a count: the target, pluralized with a trailing `s` only
/// when more than one matched.
pub fn unit_label(target: &str, count: Option<usize>) -> String {
    match count {
        Some(n) if n > 1 => format!("{}s", target),
        _ => target.to_string(),
    }
}
