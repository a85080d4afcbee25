//! Everything a running ferry process needs, built once at startup.

use crate::config::{ApplicationConfig, Config, build_destinations};
use crate::destination::Destinations;
use crate::error::DispatchError;
use crate::picker::DestinationPicker;
use crate::staging::{DownloadHandler, StagingQueue};
use camino::{Utf8Path, Utf8PathBuf};
use ferry_store::JobStore;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Local directory of a job: one directory per job id under the job root.
pub fn job_dir(job_root_dir: &Utf8Path, job_id: u64) -> Utf8PathBuf {
    job_root_dir.join(job_id.to_string())
}

pub struct Context {
    job_root_dir: Utf8PathBuf,
    applications: BTreeMap<String, ApplicationConfig>,
    destinations: Arc<Destinations>,
    picker: Box<dyn DestinationPicker>,
    store: Arc<dyn JobStore>,
    staging: StagingQueue,
}

impl Context {
    /// Assemble a context and start its staging consumer.
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(
        job_root_dir: impl Into<Utf8PathBuf>,
        applications: BTreeMap<String, ApplicationConfig>,
        destinations: Destinations,
        picker: Box<dyn DestinationPicker>,
        store: Arc<dyn JobStore>,
    ) -> Self {
        let job_root_dir = job_root_dir.into();
        let destinations = Arc::new(destinations);
        let handler = DownloadHandler::new(store.clone(), destinations.clone(), job_root_dir.clone());
        Self {
            job_root_dir,
            applications,
            destinations,
            picker,
            store,
            staging: StagingQueue::start(Arc::new(handler)),
        }
    }

    /// Build every destination named in `config`.
    pub fn from_config(config: &Config, store: Arc<dyn JobStore>) -> Result<Self, DispatchError> {
        let destinations = build_destinations(config)?;
        tracing::info!(
            "Loaded {} destinations: {}",
            destinations.len(),
            destinations.names().join(", ")
        );
        Ok(Self::new(
            config.job_root_dir.clone(),
            config.applications.clone(),
            destinations,
            config.picker.build(),
            store,
        ))
    }

    pub fn job_root_dir(&self) -> &Utf8Path {
        &self.job_root_dir
    }

    /// Local directory of a job.
    pub fn job_dir(&self, job_id: u64) -> Utf8PathBuf {
        job_dir(&self.job_root_dir, job_id)
    }

    pub fn application(&self, name: &str) -> Option<&ApplicationConfig> {
        self.applications.get(name)
    }

    pub fn destinations(&self) -> &Destinations {
        &self.destinations
    }

    pub fn picker(&self) -> &dyn DestinationPicker {
        self.picker.as_ref()
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub fn staging(&self) -> &StagingQueue {
        &self.staging
    }

    /// Stop the staging consumer, then close destinations last to first.
    pub async fn shutdown(&self) {
        self.staging.shutdown().await;
        self.destinations.close_all().await;
        tracing::info!("Context shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_store::MemoryJobStore;

    #[test]
    fn test_job_dir() {
        assert_eq!(job_dir(Utf8Path::new("/srv/jobs"), 12), "/srv/jobs/12");
    }

    #[tokio::test]
    async fn test_from_config() {
        let config = Config::from_json(
            r#"{
                "job_root_dir": "/srv/jobs",
                "applications": { "wc": { "command_template": "wc -l {input}" } },
                "destinations": {
                    "local": { "scheduler": { "type": "memory" }, "filesystem": { "type": "local" } }
                }
            }"#,
        )
        .unwrap();
        let ctx = Context::from_config(&config, Arc::new(MemoryJobStore::new())).unwrap();
        assert_eq!(ctx.job_dir(3), "/srv/jobs/3");
        assert!(ctx.application("wc").is_some());
        assert!(ctx.application("cat").is_none());
        assert_eq!(ctx.destinations().names(), vec!["local"]);
        ctx.shutdown().await;
    }
}
