// SPDX-License-Identifier: AGPL-3.0-or-later
//! ioa-setup: provision a host to run Internet of Agents servers
//!
//! One run discovers the host's public address, writes an Ansible inventory
//! and group variables for it, finds the provisioning playbook and hands
//! everything to `ansible-playbook`. Generated artifacts never outlive the
//! run, whichever way it ends.
//!
//! # Features
//!
//! * **Redundant address lookup:** several independent services, first answer wins
//! * **Isolated artifacts:** every run writes into its own working directory
//! * **Outcome classification:** exit status first, play recap as a fallback

pub mod artifacts;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod playbook;
pub mod resolver;

pub use artifacts::ArtifactGenerator;
pub use config::{ApiKeys, ProvisionConfig, Settings};
pub use error::{Result, SetupError, ToolFailure};
pub use orchestrator::Orchestrator;
pub use playbook::{PlaybookLocator, ProvisionExecutor, ProvisionResult};
pub use resolver::IpResolver;
