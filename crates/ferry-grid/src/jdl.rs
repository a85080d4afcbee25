//! Job script and JDL rendering for grid submission.
//!
//! On the grid, `job_dir` is a directory in grid storage, not a path on the
//! worker node. The job script pulls the input archive from there, runs the
//! command in a scratch directory and pushes the output archive back.

use crate::storage::{INPUT_ARCHIVE, OUTPUT_ARCHIVE};
use ferry_core::{JobDescription, RETURNCODE_FILE, STDERR_FILE, STDOUT_FILE};
use ferry_runner::{SshConfig, shell_quote};
use serde::{Deserialize, Serialize};

/// File name of the job script in the input sandbox.
pub const JOB_SCRIPT: &str = "ferry_job.sh";

/// File name of the job description handed to the submit command.
pub const JDL_FILE: &str = "ferry_job.jdl";

fn default_cpu_time_secs() -> u64 {
    3600
}

/// Settings for a grid destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridConfig {
    /// Run the DIRAC client on this host instead of locally
    #[serde(default)]
    pub ssh_config: Option<SshConfig>,

    /// Storage element the output archive is uploaded to
    pub storage_element: String,

    /// Run the command inside this Apptainer image
    #[serde(default)]
    pub apptainer_image: Option<String>,

    /// CPU time requested from the grid, in seconds
    #[serde(default = "default_cpu_time_secs")]
    pub cpu_time_secs: u64,
}

/// Render the script the grid runs for a job.
pub fn render_job_script(config: &GridConfig, description: &JobDescription) -> String {
    let job_dir = description.job_dir.as_str().trim_end_matches('/');
    let input = format!("{job_dir}/{INPUT_ARCHIVE}");
    let output = format!("{job_dir}/{OUTPUT_ARCHIVE}");

    let command = match &config.apptainer_image {
        Some(image) => format!(
            "apptainer exec --bind \"$PWD\" --pwd \"$PWD\" {} sh -c {}",
            shell_quote(image),
            shell_quote(&description.command)
        ),
        None => description.command.clone(),
    };

    let lines = [
        "#!/bin/bash".to_string(),
        format!("dirac-dms-get-file {}", shell_quote(&input)),
        "mkdir -p work".to_string(),
        format!("tar -xzf {INPUT_ARCHIVE} -C work"),
        "cd work".to_string(),
        format!("( {command} ) > {STDOUT_FILE} 2> {STDERR_FILE}"),
        format!("echo -n $? > {RETURNCODE_FILE}"),
        format!("tar -czf ../{OUTPUT_ARCHIVE} ."),
        "cd ..".to_string(),
        format!(
            "dirac-dms-add-file {} {OUTPUT_ARCHIVE} {}",
            shell_quote(&output),
            shell_quote(&config.storage_element)
        ),
    ];

    let mut script = lines.join("\n");
    script.push('\n');
    script
}

fn jdl_string(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Render the JDL that submits [`JOB_SCRIPT`].
pub fn render_jdl(config: &GridConfig, description: &JobDescription) -> String {
    let name = description.application.as_deref().unwrap_or("ferry");
    let lines = [
        format!("JobName = {};", jdl_string(name)),
        format!("Executable = {};", jdl_string(JOB_SCRIPT)),
        format!("InputSandbox = {{{}}};", jdl_string(JOB_SCRIPT)),
        "StdOutput = \"job.out\";".to_string(),
        "StdError = \"job.err\";".to_string(),
        "OutputSandbox = {\"job.out\", \"job.err\"};".to_string(),
        format!("CPUTime = {};", config.cpu_time_secs),
    ];
    let mut jdl = lines.join("\n");
    jdl.push('\n');
    jdl
}
