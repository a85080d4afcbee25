//! Named scheduler/filesystem pairs.

use ferry_core::{FileSystem, Scheduler};
use std::sync::Arc;

/// A scheduler backend paired with the filesystem its jobs run on.
#[derive(Clone)]
pub struct Destination {
    name: String,
    scheduler: Arc<dyn Scheduler>,
    filesystem: Arc<dyn FileSystem>,
}

impl Destination {
    pub fn new(
        name: impl Into<String>,
        scheduler: Arc<dyn Scheduler>,
        filesystem: Arc<dyn FileSystem>,
    ) -> Self {
        Self {
            name: name.into(),
            scheduler,
            filesystem,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn scheduler(&self) -> &Arc<dyn Scheduler> {
        &self.scheduler
    }

    pub fn filesystem(&self) -> &Arc<dyn FileSystem> {
        &self.filesystem
    }

    /// Close the scheduler, then the filesystem. Failures are logged.
    pub async fn close(&self) {
        if let Err(e) = self.scheduler.close().await {
            tracing::warn!("Closing scheduler of {}: {}", self.name, e);
        }
        if let Err(e) = self.filesystem.close().await {
            tracing::warn!("Closing filesystem of {}: {}", self.name, e);
        }
    }
}

/// Every destination, in config order.
#[derive(Clone, Default)]
pub struct Destinations {
    entries: Vec<Destination>,
}

impl Destinations {
    pub fn new(entries: Vec<Destination>) -> Self {
        Self { entries }
    }

    pub fn get(&self, name: &str) -> Option<&Destination> {
        self.entries.iter().find(|d| d.name == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|d| d.name.as_str()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Destination> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Close every destination, last one first.
    pub async fn close_all(&self) {
        for destination in self.entries.iter().rev() {
            destination.close().await;
            tracing::debug!("Closed destination {}", destination.name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeFileSystem, FakeScheduler};

    #[tokio::test]
    async fn test_close_order() {
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        let destinations = Destinations::new(
            ["d1", "d2"]
                .into_iter()
                .map(|name| {
                    Destination::new(
                        name,
                        Arc::new(FakeScheduler::logging(name, log.clone())),
                        Arc::new(FakeFileSystem::logging(name, log.clone())),
                    )
                })
                .collect(),
        );
        destinations.close_all().await;
        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "scheduler d2".to_string(),
                "filesystem d2".to_string(),
                "scheduler d1".to_string(),
                "filesystem d1".to_string(),
            ]
        );
    }

    #[test]
    fn test_lookup() {
        let destinations = Destinations::new(vec![Destination::new(
            "hpc",
            Arc::new(FakeScheduler::default()),
            Arc::new(FakeFileSystem::default()),
        )]);
        assert_eq!(destinations.len(), 1);
        assert_eq!(destinations.get("hpc").unwrap().name(), "hpc");
        assert!(destinations.get("cloud").is_none());
    }
}
