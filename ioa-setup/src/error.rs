// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for ioa-setup

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for ioa-setup operations
pub type Result<T> = std::result::Result<T, SetupError>;

/// Errors that can occur while provisioning a host
#[derive(Error, Debug)]
pub enum SetupError {
    /// Every public-address lookup endpoint failed
    #[error("failed to detect public IP from any service (tried {attempts})")]
    Resolution { attempts: usize },

    /// Writing an artifact or creating its directory failed
    #[error("filesystem error at {}: {source}", path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The variables document could not be serialized
    #[error("failed to marshal group vars: {0}")]
    VariablesEncode(#[from] serde_yaml::Error),

    /// No playbook candidate exists
    #[error("ansible playbook not found (searched {})", display_paths(searched))]
    PlaybookNotFound { searched: Vec<PathBuf> },

    /// The provisioning tool failed
    #[error("ansible playbook failed: {0}")]
    ExternalTool(#[from] ToolFailure),

    /// A setup step failed
    #[error("{step}: {source}")]
    Step {
        step: &'static str,
        #[source]
        source: Box<SetupError>,
    },

    /// Invalid configuration
    #[error("invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// Settings file not found
    #[error("settings file not found: {}", path.display())]
    SettingsNotFound { path: PathBuf },

    /// TOML parsing error
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// IO error wrapper
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Ways the provisioning tool can fail
#[derive(Error, Debug)]
pub enum ToolFailure {
    /// The executable could not be started
    #[error("could not start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Non-zero exit status (`None` when killed by a signal)
    #[error("{}", describe_exit(*code))]
    Exit { code: Option<i32> },

    /// The tool ran past its deadline and was killed
    #[error("timed out after {secs} seconds")]
    TimedOut { secs: u64 },

    /// Zero exit, but the recap reported failed tasks
    #[error("tool reported task failures (failed={failed})")]
    TaskFailures { failed: u64 },
}

impl SetupError {
    /// Wrap an error with the name of the step that produced it
    pub fn in_step(self, step: &'static str) -> Self {
        SetupError::Step {
            step,
            source: Box::new(self),
        }
    }

    /// The innermost error, with any step context removed
    pub fn root(&self) -> &SetupError {
        match self {
            SetupError::Step { source, .. } => source.root(),
            other => other,
        }
    }
}

fn describe_exit(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("exit status {code}"),
        None => "terminated by signal".to_string(),
    }
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
