//! Destination and application configuration.
//!
//! The config is one JSON document:
//!
//! ```json
//! {
//!   "job_root_dir": "/srv/ferry/jobs",
//!   "picker": "round_robin",
//!   "applications": {
//!     "wc": { "command_template": "wc -l {input}" }
//!   },
//!   "destinations": {
//!     "local": {
//!       "scheduler": { "type": "memory", "slots": 2 },
//!       "filesystem": { "type": "local" }
//!     }
//!   }
//! }
//! ```
//!
//! Destinations keep the order they are written in; the pickers depend on it.

use crate::destination::{Destination, Destinations};
use crate::picker::PickerKind;
use camino::{Utf8Path, Utf8PathBuf};
use ferry_core::{FileSystem, Scheduler};
use ferry_fs::{LocalFileSystem, SftpConfig, SftpFileSystem};
use ferry_grid::{GridConfig, GridScheduler, GridStorage, GridStorageConfig};
use ferry_slurm::{SlurmConfig, SlurmScheduler};
use ferry_worker::{
    EagerConfig, EagerScheduler, MemoryConfig, MemoryScheduler, QueueConfig, QueueScheduler,
    RedisJobQueue,
};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {error}")]
    Io {
        path: Utf8PathBuf,
        error: std::io::Error,
    },
    #[error("Invalid config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Destination {destination}: {message}")]
    Destination {
        destination: String,
        message: String,
    },
}

/// Scheduler backend of a destination, selected by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SchedulerConfig {
    Memory(MemoryConfig),
    Slurm(SlurmConfig),
    Queue(QueueConfig),
    Eager(EagerConfig),
    Grid(GridConfig),
}

/// Filesystem backend of a destination, selected by `type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FileSystemConfig {
    /// Job directories are used where they are. `entry` defaults to the job root.
    Local {
        #[serde(default)]
        entry: Option<Utf8PathBuf>,
    },
    Sftp(SftpConfig),
    Grid(GridStorageConfig),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DestinationConfig {
    pub scheduler: SchedulerConfig,
    pub filesystem: FileSystemConfig,
}

/// Named destinations in the order they appear in the config file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DestinationsConfig(pub Vec<(String, DestinationConfig)>);

impl DestinationsConfig {
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(name, _)| name.as_str())
    }

    pub fn get(&self, name: &str) -> Option<&DestinationConfig> {
        self.0
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, config)| config)
    }
}

impl Serialize for DestinationsConfig {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, config) in &self.0 {
            map.serialize_entry(name, config)?;
        }
        map.end()
    }
}

struct DestinationsVisitor;

impl<'de> Visitor<'de> for DestinationsVisitor {
    type Value = DestinationsConfig;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a map of destination names to destination configs")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
        let mut entries: Vec<(String, DestinationConfig)> = Vec::new();
        while let Some((name, config)) = access.next_entry::<String, DestinationConfig>()? {
            if entries.iter().any(|(n, _)| *n == name) {
                return Err(serde::de::Error::custom(format!(
                    "duplicate destination {name:?}"
                )));
            }
            entries.push((name, config));
        }
        Ok(DestinationsConfig(entries))
    }
}

impl<'de> Deserialize<'de> for DestinationsConfig {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(DestinationsVisitor)
    }
}

/// How an application turns a request payload into a command line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// TinyTemplate source, e.g. `wc -l {input}`. Values are shell-quoted.
    pub command_template: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Local directory holding one directory per job
    pub job_root_dir: Utf8PathBuf,

    /// Where job records are kept. Defaults to `jobs.json` in the job root.
    #[serde(default)]
    pub state_file: Option<Utf8PathBuf>,

    #[serde(default)]
    pub picker: PickerKind,

    #[serde(default)]
    pub applications: BTreeMap<String, ApplicationConfig>,

    pub destinations: DestinationsConfig,
}

impl Config {
    /// Read and validate a config file.
    pub fn load(path: &Utf8Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|error| ConfigError::Io {
            path: path.to_path_buf(),
            error,
        })?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check settings the backends would otherwise only reject at submission.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, destination) in &self.destinations.0 {
            let result = match &destination.scheduler {
                SchedulerConfig::Memory(config) => config.validate(),
                SchedulerConfig::Slurm(config) => config.validate(),
                _ => Ok(()),
            };
            result.map_err(|message| ConfigError::Destination {
                destination: name.clone(),
                message,
            })?;
        }
        Ok(())
    }

    pub fn state_file(&self) -> Utf8PathBuf {
        self.state_file
            .clone()
            .unwrap_or_else(|| self.job_root_dir.join("jobs.json"))
    }
}

/// Build the scheduler backend of one destination.
///
/// Must be called inside a tokio runtime: the memory scheduler starts its
/// workers right away.
pub fn build_scheduler(
    name: &str,
    config: &SchedulerConfig,
) -> Result<Arc<dyn Scheduler>, ConfigError> {
    let scheduler: Arc<dyn Scheduler> = match config {
        SchedulerConfig::Memory(config) => Arc::new(MemoryScheduler::new(config)),
        SchedulerConfig::Slurm(config) => Arc::new(SlurmScheduler::new(config.clone())),
        SchedulerConfig::Queue(config) => {
            let queue = RedisJobQueue::new(config).map_err(|e| ConfigError::Destination {
                destination: name.to_string(),
                message: e.to_string(),
            })?;
            Arc::new(QueueScheduler::new(Arc::new(queue)))
        }
        SchedulerConfig::Eager(config) => Arc::new(EagerScheduler::new(config.clone())),
        SchedulerConfig::Grid(config) => Arc::new(GridScheduler::new(config.clone())),
    };
    Ok(scheduler)
}

/// Build the filesystem backend of one destination.
pub fn build_filesystem(config: &FileSystemConfig, job_root_dir: &Utf8Path) -> Arc<dyn FileSystem> {
    match config {
        FileSystemConfig::Local { entry } => Arc::new(LocalFileSystem::new(
            entry.clone().unwrap_or_else(|| job_root_dir.to_path_buf()),
        )),
        FileSystemConfig::Sftp(config) => Arc::new(SftpFileSystem::new(config.clone())),
        FileSystemConfig::Grid(config) => Arc::new(GridStorage::new(config.clone())),
    }
}

/// Build every destination, in config order.
pub fn build_destinations(config: &Config) -> Result<Destinations, ConfigError> {
    let mut destinations = Vec::with_capacity(config.destinations.0.len());
    for (name, destination) in &config.destinations.0 {
        let scheduler = build_scheduler(name, &destination.scheduler)?;
        let filesystem = build_filesystem(&destination.filesystem, &config.job_root_dir);
        tracing::debug!("Built destination {}", name);
        destinations.push(Destination::new(name.clone(), scheduler, filesystem));
    }
    Ok(Destinations::new(destinations))
}
