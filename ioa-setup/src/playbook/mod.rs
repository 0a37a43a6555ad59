// SPDX-License-Identifier: AGPL-3.0-or-later
//! Playbook discovery and execution
//!
//! The provisioning playbook ships separately from this binary. It is
//! found on disk by [`PlaybookLocator`] and run through the external
//! `ansible-playbook` tool by [`ProvisionExecutor`].

mod executor;
mod locator;

pub use executor::{
    classify, command_args, failed_task_count, ProvisionExecutor, ProvisionResult, VERBOSE_FLAG,
};
pub use locator::PlaybookLocator;
