//
// Copyright (c) The Mwan Contributors
//
// SPDX-License-Identifier: MIT
//

use async_trait::async_trait;
use tokio::process::Command;

use crate::debug::Debug;
use crate::error::Error;

/// Completed external command: exit code plus captured output.
///
/// A non-zero exit code is a value to be inspected by the caller, never an
/// error. Processes killed by a signal report code -1.
#[derive(Clone, Debug)]
pub struct CommandOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Executor of external binaries (`ip`, `iptables`, `ping`, init scripts).
///
/// The supervisor owns no netlink plumbing; everything it does to the host
/// goes through this trait, which also gives the tests a seam to record and
/// script command traffic.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Spawns `argv` and waits for it to exit. With `capture` set, stdout
    /// and stderr are collected; otherwise they are inherited and come back
    /// empty.
    async fn run(
        &self,
        argv: &[&str],
        capture: bool,
    ) -> Result<CommandOutput, Error>;

    /// Reruns `argv` until it exits non-zero, at most `max_retries` times,
    /// and returns the final exit code.
    ///
    /// Teardown commands such as `ip rule del` succeed once per matching
    /// rule and fail when nothing is left to delete, so looping until
    /// failure drains an unknown number of duplicates without a query
    /// round-trip.
    async fn run_until_error(
        &self,
        argv: &[&str],
        max_retries: usize,
    ) -> Result<i32, Error> {
        let mut code = 0;
        for _ in 0..max_retries {
            code = self.run(argv, true).await?.code;
            if code != 0 {
                break;
            }
        }
        Ok(code)
    }
}

/// [`CommandRunner`] backed by real processes.
#[derive(Debug, Default)]
pub struct SystemRunner;

// ===== impl CommandOutput =====

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

// ===== impl SystemRunner =====

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(
        &self,
        argv: &[&str],
        capture: bool,
    ) -> Result<CommandOutput, Error> {
        Debug::CommandRun(argv).log();

        let (program, args) =
            argv.split_first().expect("empty command line");
        let mut command = Command::new(program);
        command.args(args);

        if capture {
            let output = command.output().await.map_err(|error| {
                Error::ProcessSpawnError(program.to_string(), error)
            })?;
            Ok(CommandOutput {
                code: output.status.code().unwrap_or(-1),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        } else {
            let status = command.status().await.map_err(|error| {
                Error::ProcessSpawnError(program.to_string(), error)
            })?;
            Ok(CommandOutput {
                code: status.code().unwrap_or(-1),
                stdout: String::new(),
                stderr: String::new(),
            })
        }
    }
}
