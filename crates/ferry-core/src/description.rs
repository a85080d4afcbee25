//! Job descriptions handed to scheduler backends.

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

/// What to run and where to run it.
///
/// `job_dir` is an absolute path on whichever filesystem executes the job.
/// Filesystems rewrite it with [`crate::FileSystem::localize_description`];
/// the command is never touched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDescription {
    /// Working directory of the job
    pub job_dir: Utf8PathBuf,

    /// Shell command line, run with `sh -c` or embedded in a batch script
    pub command: String,

    /// Identity of whoever submitted the job, used for accounting
    #[serde(default)]
    pub submitter: Option<String>,

    /// Application name, used for labeling
    #[serde(default)]
    pub application: Option<String>,
}

impl JobDescription {
    pub fn new(job_dir: impl Into<Utf8PathBuf>, command: impl Into<String>) -> Self {
        Self {
            job_dir: job_dir.into(),
            command: command.into(),
            submitter: None,
            application: None,
        }
    }

    pub fn with_submitter(mut self, submitter: impl Into<String>) -> Self {
        self.submitter = Some(submitter.into());
        self
    }

    pub fn with_application(mut self, application: impl Into<String>) -> Self {
        self.application = Some(application.into());
        self
    }

    /// Copy of this description with a different working directory.
    pub fn with_job_dir(&self, job_dir: impl Into<Utf8PathBuf>) -> Self {
        Self {
            job_dir: job_dir.into(),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_job_dir_keeps_command() {
        let description = JobDescription::new("/jobs/1", "wc -l input.txt")
            .with_submitter("alice")
            .with_application("wc");
        let moved = description.with_job_dir("/scratch/jobs/1");

        assert_eq!(moved.job_dir, "/scratch/jobs/1");
        assert_eq!(moved.command, "wc -l input.txt");
        assert_eq!(moved.submitter.as_deref(), Some("alice"));
        assert_eq!(moved.application.as_deref(), Some("wc"));
        assert_eq!(description.job_dir, "/jobs/1");
    }

    #[test]
    fn test_deserialize_without_optional_fields() {
        let description: JobDescription =
            serde_json::from_str(r#"{"job_dir": "/jobs/2", "command": "true"}"#).unwrap();
        assert_eq!(description, JobDescription::new("/jobs/2", "true"));
    }
}
