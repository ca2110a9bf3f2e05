use std::sync::{Arc, Mutex, TryLockError};

use anyhow::{anyhow, Result};

use crate::config::{EntityConfig, PlatformConfig};
use crate::detect::{DetectionService, HttpDetectionClient};
use crate::entity::{EntitySnapshot, FrameOutcome, ObjectDetectEntity};

/// All detection entities of one platform configuration, keyed by camera.
///
/// Each entity sits behind its own `Mutex`, which is the single processing
/// slot for that entity: a frame arriving while another is in flight is
/// dropped. Different entities never block each other.
pub struct DetectionPlatform {
    entities: Vec<(String, Arc<Mutex<ObjectDetectEntity>>)>,
}

impl DetectionPlatform {
    /// Create one HTTP-backed entity per configured source.
    pub fn setup(config: &PlatformConfig) -> Result<Self> {
        Self::setup_with(config, |entity| {
            let client = HttpDetectionClient::new(&entity.ip_address, entity.port, entity.timeout)?;
            Ok(Box::new(client) as Box<dyn DetectionService>)
        })
    }

    /// Create entities with a caller-supplied detection service.
    pub fn setup_with<F>(config: &PlatformConfig, mut make_service: F) -> Result<Self>
    where
        F: FnMut(&EntityConfig) -> Result<Box<dyn DetectionService>>,
    {
        let mut entities = Vec::new();
        for entity_cfg in config.entities() {
            let service = make_service(&entity_cfg)?;
            let camera = entity_cfg.camera_entity.clone();
            let entity = ObjectDetectEntity::new(entity_cfg, service)?;
            log::info!(
                "set up {} for {} watching for {}",
                entity.name(),
                camera,
                entity.target()
            );
            entities.push((camera, Arc::new(Mutex::new(entity))));
        }
        Ok(Self { entities })
    }

    /// Get entity by camera entity id.
    pub fn get(&self, camera: &str) -> Option<Arc<Mutex<ObjectDetectEntity>>> {
        self.entities
            .iter()
            .find(|(id, _)| id == camera)
            .map(|(_, entity)| entity.clone())
    }

    /// Camera entity ids in configuration order.
    pub fn cameras(&self) -> Vec<String> {
        self.entities.iter().map(|(id, _)| id.clone()).collect()
    }

    /// Push a frame to the entity bound to `camera`.
    pub fn process_camera(&self, camera: &str, image: &[u8]) -> Result<FrameOutcome> {
        let entity = self
            .get(camera)
            .ok_or_else(|| anyhow!("no detection entity for camera '{}'", camera))?;
        let outcome = match entity.try_lock() {
            Ok(mut guard) => guard.process_image(image),
            Err(TryLockError::WouldBlock) => {
                log::debug!("{}: frame dropped, previous frame still in flight", camera);
                FrameOutcome::Busy
            }
            Err(TryLockError::Poisoned(_)) => {
                return Err(anyhow!("entity lock for camera '{}' poisoned", camera))
            }
        };
        Ok(outcome)
    }

    /// Push the same frame to every entity.
    pub fn process_all(&self, image: &[u8]) -> Result<Vec<(String, FrameOutcome)>> {
        self.entities
            .iter()
            .map(|(camera, _)| Ok((camera.clone(), self.process_camera(camera, image)?)))
            .collect()
    }

    /// Current state of every entity, in configuration order.
    pub fn snapshots(&self) -> Result<Vec<EntitySnapshot>> {
        self.entities
            .iter()
            .map(|(camera, entity)| {
                let guard = entity
                    .lock()
                    .map_err(|_| anyhow!("entity lock for camera '{}' poisoned", camera))?;
                Ok(guard.snapshot())
            })
            .collect()
    }
}
