// SPDX-License-Identifier: AGPL-3.0-or-later
//! Provisioning run orchestration
//!
//! Steps run strictly in order: resolve address, write inventory, write
//! group variables, locate playbook, run the tool. Any failure aborts the
//! run. Artifacts are registered with an [`ArtifactGuard`] before they are
//! written and removed when the guard drops, so they are gone on success,
//! on error, and when the run future is cancelled mid-flight.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::artifacts::ArtifactGenerator;
use crate::config::{ApiKeys, ProvisionConfig, Settings};
use crate::error::{Result, SetupError};
use crate::playbook::{PlaybookLocator, ProvisionExecutor};
use crate::resolver::IpResolver;

/// Sequences one provisioning run
#[derive(Debug, Clone)]
pub struct Orchestrator {
    config: ProvisionConfig,
    resolver: IpResolver,
    generator: ArtifactGenerator,
    locator: PlaybookLocator,
    executor: ProvisionExecutor,
}

impl Orchestrator {
    pub fn new(
        config: ProvisionConfig,
        resolver: IpResolver,
        generator: ArtifactGenerator,
        locator: PlaybookLocator,
        executor: ProvisionExecutor,
    ) -> Self {
        Self {
            config,
            resolver,
            generator,
            locator,
            executor,
        }
    }

    /// Wire up every component from the settings file
    ///
    /// Artifacts go to `work_dir`; relative playbook candidates are searched
    /// from `search_root`.
    pub fn from_settings(
        config: ProvisionConfig,
        settings: &Settings,
        work_dir: &Path,
        search_root: &Path,
        dry_run: bool,
    ) -> Result<Self> {
        settings.validate()?;

        let resolver = IpResolver::new(
            settings.ip_services.clone(),
            Duration::from_secs(settings.lookup_timeout_secs),
        )?;
        let locator = PlaybookLocator::new(settings.playbook_candidates.clone(), search_root);
        let executor = ProvisionExecutor::new(settings.ansible_program.clone(), dry_run)
            .with_timeout(settings.ansible_timeout_secs.map(Duration::from_secs));

        Ok(Self::new(
            config,
            resolver,
            ArtifactGenerator::new(work_dir),
            locator,
            executor,
        ))
    }

    /// Provision the host; returns the tool's output on success
    pub async fn setup(&self, keys: &ApiKeys, verbose: bool) -> Result<String> {
        let mut guard = ArtifactGuard::default();

        let address = self
            .resolver
            .resolve_public_address()
            .await
            .map_err(|e| e.in_step("failed to get public IP"))?;

        guard.track_file(self.generator.inventory_path());
        let inventory = self
            .generator
            .generate_inventory(&self.config, &address)
            .map_err(|e| e.in_step("failed to create inventory"))?;

        guard.track_dir(self.generator.variables_dir());
        self.generator
            .generate_variables(&self.config, keys)
            .map_err(|e| e.in_step("failed to create group vars"))?;

        let playbook = self
            .locator
            .locate()
            .ok_or_else(|| {
                SetupError::PlaybookNotFound {
                    searched: self.locator.search_paths(),
                }
                .in_step("failed to locate playbook")
            })?;
        info!(path = %playbook.display(), "Using playbook");

        let result = self.executor.execute(&inventory, &playbook, verbose).await;
        let output = result
            .into_result()
            .map_err(|e| SetupError::from(e).in_step("failed to run playbook"))?;

        info!(domain = %self.config.domain, "Server setup completed successfully");
        Ok(output)
    }
}

/// Removes registered artifacts when dropped
#[derive(Debug, Default)]
pub struct ArtifactGuard {
    files: Vec<PathBuf>,
    dirs: Vec<PathBuf>,
}

impl ArtifactGuard {
    pub fn track_file(&mut self, path: PathBuf) {
        self.files.push(path);
    }

    pub fn track_dir(&mut self, path: PathBuf) {
        self.dirs.push(path);
    }
}

impl Drop for ArtifactGuard {
    fn drop(&mut self) {
        for file in &self.files {
            report_removal(file, std::fs::remove_file(file));
        }
        for dir in &self.dirs {
            report_removal(dir, std::fs::remove_dir_all(dir));
        }
    }
}

fn report_removal(path: &Path, outcome: std::io::Result<()>) {
    match outcome {
        Ok(()) => debug!(path = %path.display(), "Removed artifact"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove artifact"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_guard_removes_tracked_artifacts() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("ioa_inventory.ini");
        let vars = dir.path().join("group_vars");
        fs::write(&file, "x").unwrap();
        fs::create_dir(&vars).unwrap();
        fs::write(vars.join("all.yml"), "y").unwrap();

        {
            let mut guard = ArtifactGuard::default();
            guard.track_file(file.clone());
            guard.track_dir(vars.clone());
        }

        assert!(!file.exists());
        assert!(!vars.exists());
        assert!(dir.path().exists());
    }

    #[test]
    fn test_guard_ignores_missing_artifacts() {
        let dir = tempdir().unwrap();
        let mut guard = ArtifactGuard::default();
        guard.track_file(dir.path().join("never-written.ini"));
        guard.track_dir(dir.path().join("never-created"));
        drop(guard);
    }

    #[test]
    fn test_guard_leaves_untracked_files() {
        let dir = tempdir().unwrap();
        let keep = dir.path().join("keep.txt");
        fs::write(&keep, "keep").unwrap();

        drop(ArtifactGuard::default());
        assert!(keep.exists());
    }

    #[test]
    fn test_from_settings_rejects_invalid_settings() {
        let dir = tempdir().unwrap();
        let mut settings = Settings::default();
        settings.playbook_candidates.clear();
        let config = ProvisionConfig {
            domain: "a.example.com".to_string(),
            agent_id: 123456,
            num_agents: 1,
            registry_url: String::new(),
        };

        let err = Orchestrator::from_settings(config, &settings, dir.path(), dir.path(), false)
            .unwrap_err();
        assert!(matches!(err, SetupError::InvalidConfig { .. }));
    }
}
