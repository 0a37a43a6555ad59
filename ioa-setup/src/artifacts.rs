// SPDX-License-Identifier: AGPL-3.0-or-later
//! Deployment artifact generation
//!
//! Renders the Ansible inventory and the `group_vars/all.yml` variables
//! document for a run. Both are written below a caller-chosen base
//! directory, side by side, so the provisioning tool picks up the group
//! variables for the inventory it is handed.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info};

use crate::config::{ApiKeys, ProvisionConfig};
use crate::error::{Result, SetupError};

/// Upstream repository the provisioned host clones the agent from
pub const GITHUB_REPO: &str = "https://github.com/aidecentralized/nanda-agent.git";

/// Inventory file name inside the base directory
pub const INVENTORY_FILE: &str = "ioa_inventory.ini";

/// Variables directory name inside the base directory
pub const GROUP_VARS_DIR: &str = "group_vars";

/// Variables file name inside [`GROUP_VARS_DIR`]
pub const GROUP_VARS_FILE: &str = "all.yml";

/// Variables handed to every host in the inventory
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VariablesArtifact {
    pub anthropic_api_key: String,
    pub smithery_api_key: String,
    pub domain_name: String,
    pub agent_id_prefix: u32,
    pub github_repo: String,
    pub num_agents: u32,
    pub registry_url: String,
}

impl VariablesArtifact {
    pub fn new(config: &ProvisionConfig, keys: &ApiKeys) -> Self {
        Self {
            anthropic_api_key: keys.anthropic.clone(),
            smithery_api_key: keys.smithery.clone(),
            domain_name: config.domain.clone(),
            agent_id_prefix: config.agent_id,
            github_repo: GITHUB_REPO.to_string(),
            num_agents: config.num_agents,
            registry_url: config.registry_url.clone(),
        }
    }

    /// Serialize to YAML
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

/// Render the single-host inventory
pub fn render_inventory(config: &ProvisionConfig, address: &str) -> String {
    format!(
        "[servers]
server ansible_host={address}

[all:vars]
ansible_user=root
ansible_connection=local
domain_name={domain}
agent_id_prefix={agent_id}
github_repo={repo}
registry_url={registry}
",
        domain = config.domain,
        agent_id = config.agent_id,
        repo = GITHUB_REPO,
        registry = config.registry_url,
    )
}

/// Writes run artifacts below one base directory
#[derive(Debug, Clone)]
pub struct ArtifactGenerator {
    base_dir: PathBuf,
}

impl ArtifactGenerator {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn inventory_path(&self) -> PathBuf {
        self.base_dir.join(INVENTORY_FILE)
    }

    pub fn variables_dir(&self) -> PathBuf {
        self.base_dir.join(GROUP_VARS_DIR)
    }

    /// Write the inventory and return its path
    pub fn generate_inventory(&self, config: &ProvisionConfig, address: &str) -> Result<PathBuf> {
        let path = self.inventory_path();
        let contents = render_inventory(config, address);

        write_file(&path, contents.as_bytes())?;
        info!(path = %path.display(), "Created inventory file");
        Ok(path)
    }

    /// Write `group_vars/all.yml` and return the directory holding it
    pub fn generate_variables(&self, config: &ProvisionConfig, keys: &ApiKeys) -> Result<PathBuf> {
        let dir = self.variables_dir();
        fs::create_dir_all(&dir).map_err(|source| SetupError::Filesystem {
            path: dir.clone(),
            source,
        })?;
        debug!(path = %dir.display(), "Created group_vars directory");

        let yaml = VariablesArtifact::new(config, keys).to_yaml()?;
        let path = dir.join(GROUP_VARS_FILE);
        write_file(&path, yaml.as_bytes())?;
        info!(path = %path.display(), "Created group vars file");

        Ok(dir)
    }
}

fn write_file(path: &Path, contents: &[u8]) -> Result<()> {
    fs::write(path, contents).map_err(|source| SetupError::Filesystem {
        path: path.to_path_buf(),
        source,
    })
}
