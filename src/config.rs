use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::annotate::ensure_writable_dir;
use crate::{DEFAULT_CONFIDENCE, DEFAULT_PORT, DEFAULT_TARGET};

const DEFAULT_NAME_PREFIX: &str = "tflite";

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PlatformConfigFile {
    ip_address: Option<String>,
    port: Option<u16>,
    target: Option<String>,
    confidence: Option<f64>,
    save_file_folder: Option<PathBuf>,
    timeout_secs: Option<u64>,
    label_font: Option<PathBuf>,
    source: Option<Vec<SourceConfigFile>>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SourceConfigFile {
    entity_id: String,
    name: Option<String>,
}

/// Platform configuration shared by every configured camera.
#[derive(Debug, Clone)]
pub struct PlatformConfig {
    pub ip_address: String,
    pub port: u16,
    pub target: String,
    /// Percent scale, 0..=100.
    pub confidence: f64,
    pub save_file_folder: Option<PathBuf>,
    /// `None` blocks until the service answers.
    pub timeout: Option<Duration>,
    pub label_font: Option<PathBuf>,
    pub sources: Vec<SourceConfig>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceConfig {
    pub entity_id: String,
    pub name: Option<String>,
}

/// Immutable configuration of one detection entity.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityConfig {
    pub ip_address: String,
    pub port: u16,
    pub timeout: Option<Duration>,
    pub target: String,
    pub confidence: f64,
    pub save_file_folder: Option<PathBuf>,
    pub label_font: Option<PathBuf>,
    pub camera_entity: String,
    pub name: String,
}

impl PlatformConfig {
    /// Load from the file named by `TFLITE_DETECT_CONFIG` (if set), then apply
    /// environment overrides and validate.
    pub fn load() -> Result<Self> {
        let file_cfg = match std::env::var("TFLITE_DETECT_CONFIG").ok().as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        Self::build(file_cfg.unwrap_or_default())
    }

    /// Load an explicit config file, then apply environment overrides and validate.
    pub fn from_path(path: &Path) -> Result<Self> {
        Self::build(read_config_file(path)?)
    }

    fn build(file: PlatformConfigFile) -> Result<Self> {
        let mut cfg = Self::from_file(file);
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: PlatformConfigFile) -> Self {
        Self {
            ip_address: file.ip_address.unwrap_or_default(),
            port: file.port.unwrap_or(DEFAULT_PORT),
            target: file.target.unwrap_or_else(|| DEFAULT_TARGET.to_string()),
            confidence: file.confidence.unwrap_or(DEFAULT_CONFIDENCE),
            save_file_folder: file.save_file_folder,
            timeout: file.timeout_secs.map(Duration::from_secs),
            label_font: file.label_font,
            sources: file
                .source
                .unwrap_or_default()
                .into_iter()
                .map(|source| SourceConfig {
                    entity_id: source.entity_id,
                    name: source.name,
                })
                .collect(),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(ip) = std::env::var("TFLITE_DETECT_IP_ADDRESS") {
            if !ip.trim().is_empty() {
                self.ip_address = ip.trim().to_string();
            }
        }
        if let Ok(port) = std::env::var("TFLITE_DETECT_PORT") {
            self.port = port
                .trim()
                .parse()
                .map_err(|_| anyhow!("TFLITE_DETECT_PORT must be a port number"))?;
        }
        if let Ok(target) = std::env::var("TFLITE_DETECT_TARGET") {
            if !target.trim().is_empty() {
                self.target = target.trim().to_string();
            }
        }
        if let Ok(confidence) = std::env::var("TFLITE_DETECT_CONFIDENCE") {
            self.confidence = confidence
                .trim()
                .parse()
                .map_err(|_| anyhow!("TFLITE_DETECT_CONFIDENCE must be a number"))?;
        }
        if let Ok(folder) = std::env::var("TFLITE_DETECT_SAVE_FILE_FOLDER") {
            if !folder.trim().is_empty() {
                self.save_file_folder = Some(PathBuf::from(folder.trim()));
            }
        }
        if let Ok(timeout) = std::env::var("TFLITE_DETECT_TIMEOUT_SECS") {
            let seconds: u64 = timeout.trim().parse().map_err(|_| {
                anyhow!("TFLITE_DETECT_TIMEOUT_SECS must be an integer number of seconds")
            })?;
            self.timeout = Some(Duration::from_secs(seconds));
        }
        if let Ok(sources) = std::env::var("TFLITE_DETECT_SOURCES") {
            let parsed = split_csv(&sources);
            if !parsed.is_empty() {
                self.sources = parsed
                    .into_iter()
                    .map(|entity_id| SourceConfig {
                        entity_id,
                        name: None,
                    })
                    .collect();
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.ip_address.trim().is_empty() {
            return Err(anyhow!("ip_address is required"));
        }
        if self.port == 0 {
            return Err(anyhow!("port must be greater than zero"));
        }
        if self.target.trim().is_empty() {
            return Err(anyhow!("target must not be empty"));
        }
        if !is_file_name_safe(&self.target) {
            return Err(anyhow!(
                "target '{}' cannot be used in a snapshot file name",
                self.target
            ));
        }
        if !self.confidence.is_finite() || !(0.0..=100.0).contains(&self.confidence) {
            return Err(anyhow!(
                "confidence must be between 0 and 100, got {}",
                self.confidence
            ));
        }
        if self.timeout == Some(Duration::ZERO) {
            return Err(anyhow!("timeout_secs must be greater than zero"));
        }
        if let Some(dir) = &self.save_file_folder {
            ensure_writable_dir(dir)?;
        }
        if let Some(font) = &self.label_font {
            if !font.is_file() {
                return Err(anyhow!("label_font {} is not a file", font.display()));
            }
        }
        if self.sources.is_empty() {
            return Err(anyhow!("at least one source camera is required"));
        }

        let mut cameras = HashSet::new();
        let mut names = HashSet::new();
        for source in &self.sources {
            let object_id = split_entity_id(&source.entity_id)?;
            if !cameras.insert(source.entity_id.as_str()) {
                return Err(anyhow!("duplicate source camera {}", source.entity_id));
            }
            let name = display_name(source.name.as_deref(), object_id);
            if !is_file_name_safe(&name) {
                return Err(anyhow!(
                    "entity name '{}' cannot be used in a snapshot file name",
                    name
                ));
            }
            if !names.insert(name.clone()) {
                return Err(anyhow!(
                    "duplicate entity name {}; snapshots would overwrite each other",
                    name
                ));
            }
        }
        Ok(())
    }

    /// One entity configuration per source camera, in configuration order.
    pub fn entities(&self) -> Vec<EntityConfig> {
        self.sources
            .iter()
            .map(|source| {
                let object_id = split_entity_id(&source.entity_id).unwrap_or(&source.entity_id);
                EntityConfig {
                    ip_address: self.ip_address.clone(),
                    port: self.port,
                    timeout: self.timeout,
                    target: self.target.clone(),
                    confidence: self.confidence,
                    save_file_folder: self.save_file_folder.clone(),
                    label_font: self.label_font.clone(),
                    camera_entity: source.entity_id.clone(),
                    name: display_name(source.name.as_deref(), object_id),
                }
            })
            .collect()
    }
}

/// Object id of a `domain.object_id` entity id.
pub fn split_entity_id(entity_id: &str) -> Result<&str> {
    match entity_id.split_once('.') {
        Some((domain, object_id)) if !domain.is_empty() && !object_id.is_empty() => Ok(object_id),
        _ => Err(anyhow!(
            "invalid entity id '{}'; expected domain.object_id",
            entity_id
        )),
    }
}

fn display_name(name: Option<&str>, object_id: &str) -> String {
    match name {
        Some(name) if !name.trim().is_empty() => name.to_string(),
        _ => format!("{}_{}", DEFAULT_NAME_PREFIX, object_id),
    }
}

/// Names end up in `{name}_latest_{target}.jpg` and must stay inside the
/// save folder.
fn is_file_name_safe(part: &str) -> bool {
    !matches!(part, "." | "..")
        && !part
            .chars()
            .any(|c| c == '/' || c == '\\' || c == std::path::MAIN_SEPARATOR || c == '\0')
}

fn read_config_file(path: &Path) -> Result<PlatformConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = toml::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}
