// SPDX-License-Identifier: AGPL-3.0-or-later
//! Provisioning tool executor
//!
//! Runs `ansible-playbook` against a generated inventory and classifies
//! the outcome. The exit status decides first; a zero exit is still
//! treated as failure when the play recap reports failed tasks.

use std::ffi::OsString;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, error, info};

use crate::error::ToolFailure;

/// Flag that raises the tool's own verbosity
pub const VERBOSE_FLAG: &str = "-vvv";

/// Recap counter that marks failed tasks
const FAILED_MARKER: &str = "failed=";

/// Executor for the provisioning tool
#[derive(Debug, Clone)]
pub struct ProvisionExecutor {
    /// Executable name or path
    program: String,
    /// Kill the tool after this long
    timeout: Option<Duration>,
    /// Whether to run in dry-run mode (no actual execution)
    dry_run: bool,
}

/// Outcome of one provisioning tool invocation
#[derive(Debug)]
pub struct ProvisionResult {
    /// Whether the run succeeded
    pub success: bool,
    /// Combined stdout and stderr
    pub output: String,
    /// Why the run failed
    pub error: Option<ToolFailure>,
    /// Wall-clock duration of the run
    pub duration_ms: u64,
}

impl ProvisionResult {
    fn finished(output: String, error: Option<ToolFailure>, started: Instant) -> Self {
        Self {
            success: error.is_none(),
            output,
            error,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }

    /// Convert into a `Result`, keeping the output on success
    pub fn into_result(self) -> Result<String, ToolFailure> {
        match self.error {
            None => Ok(self.output),
            Some(failure) => Err(failure),
        }
    }
}

impl ProvisionExecutor {
    /// Create a new executor
    pub fn new(program: impl Into<String>, dry_run: bool) -> Self {
        Self {
            program: program.into(),
            timeout: None,
            dry_run,
        }
    }

    /// Bound how long the tool may run
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Execute the playbook against the inventory
    pub async fn execute(&self, inventory: &Path, playbook: &Path, verbose: bool) -> ProvisionResult {
        let started = Instant::now();
        let args = command_args(inventory, playbook, verbose);
        let command_line = render_command_line(&self.program, &args);

        info!(command = %command_line, "Running command");

        if self.dry_run {
            return ProvisionResult::finished(
                format!("[DRY RUN] Would execute: {}", command_line),
                None,
                started,
            );
        }

        let mut command = Command::new(&self.program);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = match command.spawn() {
            Ok(child) => child,
            Err(source) => {
                error!(program = %self.program, error = %source, "Failed to start ansible-playbook");
                let failure = ToolFailure::Spawn {
                    program: self.program.clone(),
                    source,
                };
                return ProvisionResult::finished(String::new(), Some(failure), started);
            }
        };

        let waited = match self.timeout {
            Some(limit) => match timeout(limit, child.wait_with_output()).await {
                Ok(waited) => waited,
                Err(_) => {
                    error!(timeout_secs = limit.as_secs(), "Ansible playbook timed out");
                    let failure = ToolFailure::TimedOut {
                        secs: limit.as_secs(),
                    };
                    return ProvisionResult::finished(String::new(), Some(failure), started);
                }
            },
            None => child.wait_with_output().await,
        };

        let output = match waited {
            Ok(output) => output,
            Err(source) => {
                let failure = ToolFailure::Spawn {
                    program: self.program.clone(),
                    source,
                };
                return ProvisionResult::finished(String::new(), Some(failure), started);
            }
        };

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        let failure = classify(output.status.code(), &combined);
        match &failure {
            None => info!(output = %combined, "Ansible playbook output"),
            Some(reason) => error!(reason = %reason, output = %combined, "Ansible playbook error"),
        }

        let result = ProvisionResult::finished(combined, failure, started);
        debug!(
            success = result.success,
            duration_ms = result.duration_ms,
            "Ansible playbook finished"
        );
        result
    }
}

/// Arguments passed to the tool, in order
pub fn command_args(inventory: &Path, playbook: &Path, verbose: bool) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "-i".into(),
        inventory.as_os_str().to_owned(),
        playbook.as_os_str().to_owned(),
    ];
    if verbose {
        args.push(VERBOSE_FLAG.into());
    }
    args
}

fn render_command_line(program: &str, args: &[OsString]) -> String {
    std::iter::once(program.to_string())
        .chain(args.iter().map(|a| a.to_string_lossy().into_owned()))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Decide whether a finished run failed
///
/// `code` is the exit code, `None` when the process was killed by a signal.
pub fn classify(code: Option<i32>, output: &str) -> Option<ToolFailure> {
    if code != Some(0) {
        return Some(ToolFailure::Exit { code });
    }

    match failed_task_count(output) {
        0 => None,
        failed => Some(ToolFailure::TaskFailures { failed }),
    }
}

/// Sum of the `failed=N` counters in the play recap
pub fn failed_task_count(output: &str) -> u64 {
    output
        .match_indices(FAILED_MARKER)
        .filter_map(|(at, marker)| {
            let rest = &output[at + marker.len()..];
            let digits = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
            rest[..digits].parse::<u64>().ok()
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLEAN_RECAP: &str = "PLAY RECAP *********\n\
        server : ok=12 changed=4 unreachable=0 failed=0 skipped=1 rescued=0 ignored=0\n";

    const FAILED_RECAP: &str = "PLAY RECAP *********\n\
        server : ok=3 changed=1 unreachable=0 failed=1 skipped=0 rescued=0 ignored=0\n";

    #[test]
    fn test_classify_success() {
        assert!(classify(Some(0), CLEAN_RECAP).is_none());
    }

    #[test]
    fn test_classify_zero_exit_with_failed_marker() {
        let failure = classify(Some(0), FAILED_RECAP).unwrap();
        assert!(matches!(failure, ToolFailure::TaskFailures { failed: 1 }));
    }

    #[test]
    fn test_classify_non_zero_exit() {
        assert!(matches!(
            classify(Some(2), CLEAN_RECAP),
            Some(ToolFailure::Exit { code: Some(2) })
        ));
        assert!(matches!(
            classify(None, ""),
            Some(ToolFailure::Exit { code: None })
        ));
    }

    #[test]
    fn test_failed_task_count() {
        assert_eq!(failed_task_count(CLEAN_RECAP), 0);
        assert_eq!(failed_task_count(FAILED_RECAP), 1);
        assert_eq!(failed_task_count("a : failed=2\nb : failed=3\n"), 5);
        assert_eq!(failed_task_count("task failed=ugh"), 0);
    }

    #[test]
    fn test_failed_task_count_coloured_recap() {
        let recap = "\x1b[0;33mserver\x1b[0m : \x1b[0;32mok=3\x1b[0m \
            changed=0 unreachable=0 \x1b[0;31mfailed=1   \x1b[0m skipped=0";
        assert_eq!(failed_task_count(recap), 1);
        assert!(matches!(
            classify(Some(0), recap),
            Some(ToolFailure::TaskFailures { failed: 1 })
        ));
    }

    #[test]
    fn test_failed_task_count_marker_glued_to_text() {
        assert_eq!(failed_task_count("host:failed=2,skipped=0"), 2);
        assert_eq!(failed_task_count("failed=1\x1b[0m"), 1);
    }

    #[test]
    fn test_command_args() {
        let args = command_args(Path::new("/w/ioa_inventory.ini"), Path::new("/p.yml"), false);
        assert_eq!(args, vec!["-i", "/w/ioa_inventory.ini", "/p.yml"]);

        let verbose = command_args(Path::new("inv"), Path::new("pb"), true);
        assert_eq!(verbose.last().unwrap(), VERBOSE_FLAG);
    }

    #[tokio::test]
    async fn test_execute_dry_run() {
        let executor = ProvisionExecutor::new("ansible-playbook", true);
        let result = executor
            .execute(Path::new("inv.ini"), Path::new("playbook.yml"), true)
            .await;
        assert!(result.success);
        assert!(result.output.contains("DRY RUN"));
        assert!(result.output.contains("ansible-playbook -i inv.ini playbook.yml -vvv"));
    }

    #[tokio::test]
    async fn test_execute_missing_program() {
        let executor = ProvisionExecutor::new("ioa-setup-no-such-tool", false);
        let result = executor
            .execute(Path::new("inv.ini"), Path::new("playbook.yml"), false)
            .await;
        assert!(!result.success);
        assert!(matches!(result.error, Some(ToolFailure::Spawn { .. })));
    }

    #[cfg(unix)]
    mod with_fake_tool {
        use super::*;
        use std::os::unix::fs::PermissionsExt;
        use tempfile::{tempdir, TempDir};

        fn fake_tool(script: &str) -> (TempDir, String) {
            let dir = tempdir().unwrap();
            let path = dir.path().join("ansible-playbook");
            std::fs::write(&path, format!("#!/bin/sh\n{script}\n")).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            let program = path.to_string_lossy().into_owned();
            (dir, program)
        }

        #[tokio::test]
        async fn test_execute_captures_both_streams() {
            let (_dir, program) = fake_tool("echo \"args: $*\"\necho 'warning' >&2\nexit 0");
            let result = ProvisionExecutor::new(program, false)
                .execute(Path::new("inv.ini"), Path::new("pb.yml"), true)
                .await;

            assert!(result.success);
            assert!(result.output.contains("args: -i inv.ini pb.yml -vvv"));
            assert!(result.output.contains("warning"));
        }

        #[tokio::test]
        async fn test_execute_exit_code_failure() {
            let (_dir, program) = fake_tool("echo boom\nexit 1");
            let result = ProvisionExecutor::new(program, false)
                .execute(Path::new("inv.ini"), Path::new("pb.yml"), false)
                .await;

            assert!(!result.success);
            assert!(result.output.contains("boom"));
            assert!(matches!(result.error, Some(ToolFailure::Exit { code: Some(1) })));
        }

        #[tokio::test]
        async fn test_execute_zero_exit_with_failed_tasks() {
            let (_dir, program) = fake_tool("echo 'server : ok=1 changed=0 unreachable=0 failed=1'\nexit 0");
            let result = ProvisionExecutor::new(program, false)
                .execute(Path::new("inv.ini"), Path::new("pb.yml"), false)
                .await;

            assert!(!result.success);
            assert!(matches!(
                result.into_result(),
                Err(ToolFailure::TaskFailures { failed: 1 })
            ));
        }

        #[tokio::test]
        async fn test_execute_timeout_kills_tool() {
            let (_dir, program) = fake_tool("sleep 5");
            let result = ProvisionExecutor::new(program, false)
                .with_timeout(Some(Duration::from_millis(200)))
                .execute(Path::new("inv.ini"), Path::new("pb.yml"), false)
                .await;

            assert!(!result.success);
            assert!(matches!(result.error, Some(ToolFailure::TimedOut { .. })));
        }
    }
}
