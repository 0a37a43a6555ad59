// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for ioa-setup
//!
//! Two layers live here: the per-run [`ProvisionConfig`] built from CLI/env
//! inputs, and the optional [`Settings`] file that tunes lookup services,
//! the provisioning tool and where playbooks are searched for.

use std::fmt;
use std::path::{Path, PathBuf};

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Result, SetupError};

/// Registry used when none is supplied
pub const DEFAULT_REGISTRY_URL: &str = "https://chat.nanda-registry.com:6900";

/// Public Smithery key used when the caller does not supply one
pub const DEFAULT_SMITHERY_KEY: &str = "b4e92d35-0034-43f0-beff-042466777ada";

/// Inclusive range of generated agent IDs
pub const AGENT_ID_RANGE: std::ops::RangeInclusive<u32> = 100_000..=999_999;

/// Immutable inputs for one provisioning run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionConfig {
    /// Fully qualified domain the agent will be served on
    pub domain: String,
    /// Six-digit agent ID
    pub agent_id: u32,
    /// Number of agents to run on the host
    pub num_agents: u32,
    /// Registry the agents announce themselves to
    pub registry_url: String,
}

impl ProvisionConfig {
    /// Build a run configuration
    ///
    /// An `agent_id` of 0 means "generate one"; the ID is then drawn from
    /// [`AGENT_ID_RANGE`] using `rng`. Any other value must already lie in
    /// that range and is kept as given.
    pub fn new<R: Rng>(
        domain: impl Into<String>,
        num_agents: u32,
        registry_url: impl Into<String>,
        agent_id: u32,
        rng: &mut R,
    ) -> Result<Self> {
        let domain = domain.into();
        if domain.trim().is_empty() {
            return Err(SetupError::InvalidConfig {
                message: "domain cannot be empty".to_string(),
            });
        }
        if num_agents == 0 {
            return Err(SetupError::InvalidConfig {
                message: "num_agents must be at least 1".to_string(),
            });
        }

        let agent_id = match agent_id {
            0 => generate_agent_id(rng),
            id if AGENT_ID_RANGE.contains(&id) => id,
            id => {
                return Err(SetupError::InvalidConfig {
                    message: format!("agent_id must be a six-digit number, got {id}"),
                })
            }
        };

        let config = Self {
            domain,
            agent_id,
            num_agents,
            registry_url: registry_url.into(),
        };

        info!(
            agent_id = config.agent_id,
            domain = %config.domain,
            num_agents = config.num_agents,
            registry_url = %config.registry_url,
            "Resolved provisioning configuration"
        );

        Ok(config)
    }
}

/// Draw a random six-digit agent ID
pub fn generate_agent_id<R: Rng>(rng: &mut R) -> u32 {
    rng.gen_range(AGENT_ID_RANGE)
}

/// Secrets passed through to the provisioned host
#[derive(Clone)]
pub struct ApiKeys {
    pub anthropic: String,
    pub smithery: String,
}

impl ApiKeys {
    pub fn new(anthropic: impl Into<String>, smithery: impl Into<String>) -> Self {
        Self {
            anthropic: anthropic.into(),
            smithery: smithery.into(),
        }
    }
}

impl fmt::Debug for ApiKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiKeys")
            .field("anthropic", &"<redacted>")
            .field("smithery", &"<redacted>")
            .finish()
    }
}

/// Tunables loaded from the settings file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Public-address lookup endpoints, tried in order
    #[serde(default = "default_ip_services")]
    pub ip_services: Vec<String>,

    /// Per-endpoint lookup timeout in seconds
    #[serde(default = "default_lookup_timeout")]
    pub lookup_timeout_secs: u64,

    /// Provisioning tool executable, resolved through PATH
    #[serde(default = "default_ansible_program")]
    pub ansible_program: String,

    /// Kill the provisioning tool after this many seconds
    #[serde(default)]
    pub ansible_timeout_secs: Option<u64>,

    /// Playbook locations, highest precedence first
    #[serde(default = "default_playbook_candidates")]
    pub playbook_candidates: Vec<PathBuf>,

    /// Where run artifacts are written; a fresh temporary directory when unset
    #[serde(default)]
    pub work_dir: Option<PathBuf>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format (text, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            ip_services: default_ip_services(),
            lookup_timeout_secs: default_lookup_timeout(),
            ansible_program: default_ansible_program(),
            ansible_timeout_secs: None,
            playbook_candidates: default_playbook_candidates(),
            work_dir: None,
            logging: LoggingConfig::default(),
        }
    }
}

impl Settings {
    /// Load settings from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(SetupError::SettingsNotFound {
                path: path.to_path_buf(),
            });
        }

        let contents = std::fs::read_to_string(path)?;
        let settings: Settings = toml::from_str(&contents)?;

        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from `path` if it exists, defaults otherwise
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        match Self::from_file(path) {
            Err(SetupError::SettingsNotFound { .. }) => Ok(Self::default()),
            other => other,
        }
    }

    /// Validate the settings
    pub fn validate(&self) -> Result<()> {
        if self.ip_services.is_empty() {
            return Err(SetupError::InvalidConfig {
                message: "at least one IP lookup service is required".to_string(),
            });
        }

        if self.lookup_timeout_secs == 0 {
            return Err(SetupError::InvalidConfig {
                message: "lookup_timeout_secs must be at least 1".to_string(),
            });
        }

        if self.playbook_candidates.is_empty() {
            return Err(SetupError::InvalidConfig {
                message: "at least one playbook candidate path is required".to_string(),
            });
        }

        if self.ansible_program.trim().is_empty() {
            return Err(SetupError::InvalidConfig {
                message: "ansible_program cannot be empty".to_string(),
            });
        }

        Ok(())
    }
}

// Default value functions

fn default_ip_services() -> Vec<String> {
    vec![
        "https://api.ipify.org".to_string(),
        "https://ifconfig.me/ip".to_string(),
        "https://icanhazip.com".to_string(),
    ]
}

fn default_lookup_timeout() -> u64 {
    10
}

fn default_ansible_program() -> String {
    "ansible-playbook".to_string()
}

fn default_playbook_candidates() -> Vec<PathBuf> {
    [
        "ansible/playbook.yml",
        "../ansible/playbook.yml",
        "/usr/local/share/go-nanda-sdk/ansible/playbook.yml",
        "/opt/go-nanda-sdk/ansible/playbook.yml",
        "./ansible/playbook.yml",
    ]
    .iter()
    .map(PathBuf::from)
    .collect()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}
