//
// Copyright (c) The Mwan Contributors
//
// SPDX-License-Identifier: MIT
//

use std::sync::Arc;
use std::sync::LazyLock as Lazy;
use std::time::Duration;

use regex::Regex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::time;
use tokio::time::Instant;
use tracing::{Instrument, debug_span, info, warn};

use crate::command::{CommandOutput, CommandRunner};
use crate::consts::{
    PROBE_BACKOFF_NUMERATOR, RESTART_COOLDOWN, RESTART_HOLDOFF,
};
use crate::controller::ControlFlags;
use crate::debug::Debug;
use crate::interface::InterfaceCfg;
use crate::tasks::Task;

// Summary line printed by ping(8) with -q.
static PING_STATS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?P<sent>\d+)\s+packets\s+transmitted,\s+(?P<received>\d+)\s+received")
        .unwrap()
});

// Messages accepted by a prober task.
#[derive(Debug)]
pub enum ProbeMsg {
    // Start a probe cycle, or reset the budget of the one in flight.
    Trigger,
    // Restart the interface and then start a fresh cycle.
    Restart,
    // Link state observed by the controller, for the restart cooldowns.
    LinkUp,
    LinkDown,
}

/// Handle to a spawned prober task.
///
/// Dropping the handle's sender half ends the task at its next suspension
/// point; the task half can be awaited for a cooperative join.
#[derive(Debug)]
pub struct ProberHandle {
    tx: UnboundedSender<ProbeMsg>,
    pub(crate) task: Task<()>,
}

// Liveness prober for a single interface.
//
// One task per interface; triggers reset the in-flight budget instead of
// spawning, so at most one probe cycle per interface ever runs.
struct Prober {
    name: String,
    config: InterfaceCfg,
    runner: Arc<dyn CommandRunner>,
    flags: Arc<ControlFlags>,
    rx: UnboundedReceiver<ProbeMsg>,
    active_budget: u32,
    last_restart: Instant,
    last_disconnect: Option<Instant>,
}

// ===== impl ProberHandle =====

impl ProberHandle {
    pub fn send(&self, msg: ProbeMsg) {
        let _ = self.tx.send(msg);
    }

    /// Closes the message channel and waits for the task to wind down,
    /// letting any in-flight subprocess finish.
    pub async fn join(self) {
        let ProberHandle { tx, task } = self;
        drop(tx);
        let _ = task.await;
    }
}

// ===== impl Prober =====

impl Prober {
    fn spawn(
        name: &str,
        config: &InterfaceCfg,
        runner: Arc<dyn CommandRunner>,
        flags: Arc<ControlFlags>,
    ) -> ProberHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut config = config.clone();
        config.num_of_tests = config.num_of_tests.max(1);
        let prober = Prober {
            name: name.to_owned(),
            config,
            runner,
            flags,
            rx,
            active_budget: 0,
            last_restart: Instant::now(),
            last_disconnect: None,
        };
        let span = debug_span!("prober", name = %name);
        let task = Task::spawn(prober.run().instrument(span));
        ProberHandle { tx, task }
    }

    async fn run(mut self) {
        while self.flags.is_active() {
            // Idle until someone asks for a cycle.
            if self.active_budget == 0 {
                match self.rx.recv().await {
                    Some(msg) => self.handle_message(msg).await,
                    None => break,
                }
                continue;
            }

            // Back-off lengthens as confidence grows.
            let seconds = PROBE_BACKOFF_NUMERATOR / self.active_budget as u64;
            Debug::ProbeSleep(&self.name, seconds).log();
            let sleep = time::sleep(Duration::from_secs(seconds));
            tokio::pin!(sleep);
            loop {
                tokio::select! {
                    _ = &mut sleep => {
                        if !self.flags.is_active() {
                            return;
                        }
                        // Never race a reroute; whoever programmed the
                        // routes will hand out fresh triggers.
                        if self.flags.reroute_busy() {
                            self.active_budget = 0;
                        } else {
                            self.probe_once().await;
                        }
                        break;
                    }
                    msg = self.rx.recv() => match msg {
                        Some(msg) => self.handle_message(msg).await,
                        None => return,
                    },
                }
            }
        }
    }

    async fn handle_message(&mut self, msg: ProbeMsg) {
        match msg {
            ProbeMsg::Trigger => {
                self.active_budget = self.config.num_of_tests;
            }
            ProbeMsg::Restart => {
                self.restart().await;
            }
            ProbeMsg::LinkUp => {
                self.last_disconnect = None;
            }
            ProbeMsg::LinkDown => {
                self.last_disconnect = Some(Instant::now());
            }
        }
    }

    async fn probe_once(&mut self) {
        info!("probing interface");

        let argv: [&str; 8] = [
            "ping",
            "-qn",
            "-I",
            &self.name,
            "-c2",
            "-W5",
            "-w15",
            &self.config.test_ip,
        ];
        match self.runner.run(&argv, true).await {
            Ok(output) if ping_succeeded(&output) => {
                self.active_budget -= 1;
                info!("probe succeeded");
            }
            Ok(output) => {
                self.active_budget = 0;
                warn!(stdout = %output.stdout.trim(), "probe failed");
                if restart_eligible(
                    Instant::now(),
                    self.last_restart,
                    self.last_disconnect,
                ) {
                    self.restart().await;
                }
            }
            Err(error) => {
                self.active_budget = 0;
                error.log();
            }
        }
    }

    async fn restart(&mut self) {
        self.last_restart = Instant::now();
        self.last_disconnect = None;
        time::sleep(RESTART_HOLDOFF).await;

        info!("restarting interface");
        let script = format!("/etc/init.d/net.{}", self.name);
        if let Err(error) =
            self.runner.run(&[script.as_str(), "restart"], true).await
        {
            error.log();
        }
        self.last_restart = Instant::now();
        info!("restart completed");

        // The restart itself reports nothing; fresh probes and the syslog
        // stream tell the controller what actually happened.
        self.active_budget = self.config.num_of_tests;
    }
}

// ===== global functions =====

/// Spawns the prober task for one interface.
pub fn spawn_prober(
    name: &str,
    config: &InterfaceCfg,
    runner: Arc<dyn CommandRunner>,
    flags: Arc<ControlFlags>,
) -> ProberHandle {
    Prober::spawn(name, config, runner, flags)
}

/// A probe counts as reachable only when ping kept stderr quiet and its
/// summary line reports at least one packet sent and one received. Any
/// parse failure counts as unreachable.
pub fn ping_succeeded(output: &CommandOutput) -> bool {
    if !output.stderr.is_empty() {
        return false;
    }
    let Some(caps) = PING_STATS_RE.captures(&output.stdout) else {
        return false;
    };
    let sent = caps["sent"].parse::<u64>();
    let received = caps["received"].parse::<u64>();
    matches!((sent, received), (Ok(sent), Ok(received)) if sent >= 1 && received >= 1)
}

// An interface restart is allowed only outside both cooldown windows; an
// interface that never disconnected is treated as past the window.
pub(crate) fn restart_eligible(
    now: Instant,
    last_restart: Instant,
    last_disconnect: Option<Instant>,
) -> bool {
    if now.duration_since(last_restart) <= RESTART_COOLDOWN {
        return false;
    }
    match last_disconnect {
        Some(at) => now.duration_since(at) > RESTART_COOLDOWN,
        None => true,
    }
}

// ===== tests =====
