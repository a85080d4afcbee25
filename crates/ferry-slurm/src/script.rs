//! Batch script rendering for sbatch.

use ferry_core::{JobDescription, RETURNCODE_FILE, STDERR_FILE, STDOUT_FILE};
use ferry_runner::SshConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Settings for a Slurm destination.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlurmConfig {
    /// Run the Slurm commands on this host instead of locally
    #[serde(default)]
    pub ssh_config: Option<SshConfig>,

    /// Partition to submit to
    #[serde(default)]
    pub partition: Option<String>,

    /// Wall-clock limit, in any format sbatch accepts for `--time`
    #[serde(default)]
    pub time: Option<String>,

    /// Extra lines placed verbatim in the script header, e.g. `#SBATCH --mem=4G`
    #[serde(default)]
    pub extra_options: Vec<String>,

    /// Charge the job to an account named after the submitter
    #[serde(default)]
    pub submitter_as_account: bool,
}

impl SlurmConfig {
    /// Check settings that sbatch would only reject at submission time.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(time) = &self.time
            && parse_time_limit(time).is_none()
        {
            return Err(format!("invalid Slurm time limit: {time:?}"));
        }
        Ok(())
    }
}

/// Parse a SLURM time limit (D-HH:MM:SS, D-HH, HH:MM:SS, MM:SS or minutes).
pub fn parse_time_limit(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if s == "UNLIMITED" || s == "INFINITE" {
        return Some(Duration::MAX);
    }

    let (days, time_part) = match s.split_once('-') {
        Some((days, rest)) => (Some(days.parse::<u64>().ok()?), rest),
        None => (None, s),
    };

    let time_parts = time_part
        .split(':')
        .map(|p| p.parse::<u64>().ok())
        .collect::<Option<Vec<u64>>>()?;

    let seconds = match (days, time_parts.as_slice()) {
        (Some(_), [h]) => h * 3600,
        (Some(_), [h, m]) => h * 3600 + m * 60,
        (_, [h, m, s]) => h * 3600 + m * 60 + s,
        (None, [m, s]) => m * 60 + s,
        (None, [m]) => m * 60,
        _ => return None,
    };

    Some(Duration::from_secs(days.unwrap_or(0) * 86400 + seconds))
}

/// Render the batch script for a job.
///
/// Output goes to the fixed stdout/stderr files and the command's own exit
/// code is written to the returncode file without a trailing newline.
pub fn render_script(config: &SlurmConfig, description: &JobDescription) -> String {
    let mut lines = vec!["#!/bin/bash".to_string()];

    if let Some(partition) = &config.partition {
        lines.push(format!("#SBATCH --partition={partition}"));
    }
    if let Some(time) = &config.time {
        lines.push(format!("#SBATCH --time={time}"));
    }
    if config.submitter_as_account
        && let Some(submitter) = &description.submitter
    {
        lines.push(format!("#SBATCH --account={submitter}"));
    }
    if let Some(application) = &description.application {
        lines.push(format!("#SBATCH --job-name={application}"));
    }
    lines.extend(config.extra_options.iter().cloned());
    lines.push(format!("#SBATCH --output={STDOUT_FILE}"));
    lines.push(format!("#SBATCH --error={STDERR_FILE}"));
    lines.push(description.command.clone());
    lines.push(format!("echo -n $? > {RETURNCODE_FILE}"));

    let mut script = lines.join("\n");
    script.push('\n');
    script
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_script() {
        let description = JobDescription::new("/scratch/jobs/1", "echo -n hello");
        let script = render_script(&SlurmConfig::default(), &description);
        assert_eq!(
            script,
            "#!/bin/bash\n\
             #SBATCH --output=stdout.txt\n\
             #SBATCH --error=stderr.txt\n\
             echo -n hello\n\
             echo -n $? > returncode\n"
        );
    }

    #[test]
    fn test_full_script() {
        let config = SlurmConfig {
            partition: Some("short".to_string()),
            time: Some("01:00:00".to_string()),
            extra_options: vec!["#SBATCH --mem=4G".to_string()],
            submitter_as_account: true,
            ..Default::default()
        };
        let description = JobDescription::new("/scratch/jobs/1", "wc input.txt")
            .with_submitter("alice")
            .with_application("wc");

        let script = render_script(&config, &description);
        let lines: Vec<&str> = script.lines().collect();
        assert_eq!(
            lines,
            vec![
                "#!/bin/bash",
                "#SBATCH --partition=short",
                "#SBATCH --time=01:00:00",
                "#SBATCH --account=alice",
                "#SBATCH --job-name=wc",
                "#SBATCH --mem=4G",
                "#SBATCH --output=stdout.txt",
                "#SBATCH --error=stderr.txt",
                "wc input.txt",
                "echo -n $? > returncode",
            ]
        );
    }

    #[test]
    fn test_account_needs_flag() {
        let description = JobDescription::new("/scratch/jobs/1", "true").with_submitter("alice");
        let script = render_script(&SlurmConfig::default(), &description);
        assert!(!script.contains("--account"));
    }

    #[test]
    fn test_parse_time_limit() {
        assert_eq!(parse_time_limit("1:00:00"), Some(Duration::from_secs(3600)));
        assert_eq!(
            parse_time_limit("1-00:00:00"),
            Some(Duration::from_secs(86400))
        );
        assert_eq!(parse_time_limit("2-12"), Some(Duration::from_secs(216000)));
        assert_eq!(parse_time_limit("30:00"), Some(Duration::from_secs(1800)));
        assert_eq!(parse_time_limit("90"), Some(Duration::from_secs(5400)));
        assert!(parse_time_limit("soon").is_none());
        assert!(parse_time_limit("").is_none());
    }

    #[test]
    fn test_validate() {
        let mut config = SlurmConfig {
            time: Some("1:00:00".to_string()),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
        config.time = Some("an hour".to_string());
        assert!(config.validate().is_err());
    }
}
