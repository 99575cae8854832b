//
// Copyright (c) The Mwan Contributors
//
// SPDX-License-Identifier: MIT
//

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use mwan_core::command::{CommandOutput, CommandRunner};
use mwan_core::error::Error;

type ResponseFn = dyn Fn(&[&str]) -> CommandOutput + Send + Sync;

/// Command runner that records every argv it is handed and answers from a
/// scripted response function. Nothing is ever spawned.
pub struct ScriptedRunner {
    respond: Box<ResponseFn>,
    log: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    pub fn new<F>(respond: F) -> Arc<ScriptedRunner>
    where
        F: Fn(&[&str]) -> CommandOutput + Send + Sync + 'static,
    {
        Arc::new(ScriptedRunner {
            respond: Box::new(respond),
            log: Mutex::new(Vec::new()),
        })
    }

    /// Every command seen so far, one space-joined line each, in order.
    pub fn commands(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    /// The `ip`/`iptables` traffic only, without pings and init scripts.
    pub fn routing_commands(&self) -> Vec<String> {
        self.commands()
            .into_iter()
            .filter(|line| {
                line.starts_with("ip ") || line.starts_with("iptables ")
            })
            .collect()
    }

    pub fn count_of(&self, wanted: &str) -> usize {
        self.commands()
            .iter()
            .filter(|line| line.as_str() == wanted)
            .count()
    }

    pub fn count_with_prefix(&self, prefix: &str) -> usize {
        self.commands()
            .iter()
            .filter(|line| line.starts_with(prefix))
            .count()
    }

    pub fn clear(&self) {
        self.log.lock().unwrap().clear();
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(
        &self,
        argv: &[&str],
        _capture: bool,
    ) -> Result<CommandOutput, Error> {
        self.log.lock().unwrap().push(argv.join(" "));
        Ok((self.respond)(argv))
    }
}

pub fn output(code: i32, stdout: &str, stderr: &str) -> CommandOutput {
    CommandOutput {
        code,
        stdout: stdout.to_owned(),
        stderr: stderr.to_owned(),
    }
}

pub fn ok() -> CommandOutput {
    output(0, "", "")
}

/// Baseline host behavior: deletions report "nothing left to delete" so
/// the drain loops terminate after one round, everything else succeeds.
pub fn quiet_host(argv: &[&str]) -> Option<CommandOutput> {
    let line = argv.join(" ");
    if line.starts_with("ip rule del") || line.starts_with("ip route del") {
        return Some(output(2, "", "RTNETLINK answers: No such file or directory\n"));
    }
    if line == "ip route show" {
        return Some(output(0, "127.0.0.0/8 dev lo scope host\n", ""));
    }
    if argv.first() == Some(&"ping") {
        return Some(output(
            0,
            "2 packets transmitted, 2 received, 0% packet loss, time 1001ms\n",
            "",
        ));
    }
    None
}
