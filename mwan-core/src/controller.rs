//
// Copyright (c) The Mwan Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::{Receiver, UnboundedReceiver, UnboundedSender};
use tokio::time;
use tokio::time::Instant;
use tracing::{error, info, instrument};

use crate::command::CommandRunner;
use crate::debug::Debug;
use crate::error::Error;
use crate::events::{self, LinkEvent};
use crate::interface::{InterfaceCfg, MonitoredInterface};
use crate::probe::{self, ProbeMsg, ProberHandle};
use crate::route::{self, RouteCfg, TopologyHash};

// Messages accepted by the controller task.
#[derive(Debug)]
pub enum ControlMsg {
    // First syslog datagram arrived; the host is far enough into boot to
    // start monitoring.
    SyslogReady,
    Link(LinkEvent),
}

// Coordination flags shared between the controller and the probers.
//
// Probers observing a reroute in progress, or one pending, stand aside so
// their pings never race the routing-table rebuild.
#[derive(Debug)]
pub struct ControlFlags {
    active: AtomicBool,
    rerouting: AtomicBool,
    reroute_pending: AtomicBool,
}

// Controller configuration, assembled by the daemon from its config file.
#[derive(Clone, Debug)]
pub struct ControllerCfg {
    // Tick period in seconds.
    pub poll_interval: u64,
    pub route: RouteCfg,
    // Interface name -> settings; name order fixes table-id assignment.
    pub monitored_networks: BTreeMap<String, InterfaceCfg>,
}

// The reroute controller.
//
// Owns the monitored interfaces and the pending-event queue, applies link
// deltas on its tick, and converges the kernel's routing state on the
// debounced topology.
pub struct Controller {
    cfg: ControllerCfg,
    pub(crate) runner: Arc<dyn CommandRunner>,
    flags: Arc<ControlFlags>,
    pub(crate) interfaces: Vec<MonitoredInterface>,
    probers: BTreeMap<String, ProberHandle>,
    event_queue: VecDeque<LinkEvent>,
    pending_since: Option<Instant>,
    last_hash: Option<TopologyHash>,
    rx: UnboundedReceiver<ControlMsg>,
    registered: bool,
}

// ===== impl ControlFlags =====

impl ControlFlags {
    pub fn new() -> ControlFlags {
        ControlFlags {
            active: AtomicBool::new(true),
            rerouting: AtomicBool::new(false),
            reroute_pending: AtomicBool::new(false),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    pub fn shutdown(&self) {
        self.active.store(false, Ordering::Relaxed);
    }

    /// True while a reroute is executing or waiting out its debounce.
    pub fn reroute_busy(&self) -> bool {
        self.rerouting.load(Ordering::Relaxed)
            || self.reroute_pending.load(Ordering::Relaxed)
    }

    pub fn set_rerouting(&self, value: bool) {
        self.rerouting.store(value, Ordering::Relaxed);
    }

    pub fn set_reroute_pending(&self, value: bool) {
        self.reroute_pending.store(value, Ordering::Relaxed);
    }
}

// ===== impl ControllerCfg =====

impl Default for ControllerCfg {
    fn default() -> ControllerCfg {
        ControllerCfg {
            poll_interval: 5,
            route: Default::default(),
            monitored_networks: Default::default(),
        }
    }
}

// ===== impl Controller =====

impl Controller {
    pub fn new(
        cfg: ControllerCfg,
        runner: Arc<dyn CommandRunner>,
    ) -> (Controller, UnboundedSender<ControlMsg>, Arc<ControlFlags>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let flags = Arc::new(ControlFlags::new());
        let controller = Controller {
            cfg,
            runner,
            flags: flags.clone(),
            interfaces: Vec::new(),
            probers: Default::default(),
            event_queue: Default::default(),
            pending_since: None,
            last_hash: None,
            rx,
            registered: false,
        };
        (controller, tx, flags)
    }

    // Main event loop.
    #[instrument(skip_all, name = "controller")]
    pub async fn run(mut self, mut signal_rx: Receiver<()>) {
        let period = Duration::from_secs(self.cfg.poll_interval.max(1));
        let mut tick = time::interval_at(Instant::now() + period, period);

        loop {
            tokio::select! {
                msg = self.rx.recv() => match msg {
                    Some(ControlMsg::SyslogReady) => {
                        self.register();
                    }
                    Some(ControlMsg::Link(event)) => {
                        self.event_queue.push_back(event);
                    }
                    // Listener is gone; nothing left to react to.
                    None => break,
                },
                _ = tick.tick() => {
                    if !self.registered {
                        continue;
                    }
                    if let Err(error) = self.tick().await {
                        error.log();
                    }
                }
                _ = signal_rx.recv() => {
                    info!("shutting down");
                    break;
                }
            }
        }

        self.shutdown().await;
    }

    // Deferred interface registration, driven by the first datagram: until
    // syslog forwards something, restarting interfaces would be guesswork.
    fn register(&mut self) {
        if self.registered {
            return;
        }
        self.registered = true;

        for (name, config) in self.cfg.monitored_networks.clone() {
            if !config.active {
                continue;
            }
            self.interfaces
                .push(MonitoredInterface::new(&name, &config));
            let handle = probe::spawn_prober(
                &name,
                &config,
                self.runner.clone(),
                self.flags.clone(),
            );
            // The initial restart seeds the first probe cycle and makes
            // every interface announce itself over syslog.
            handle.send(ProbeMsg::Restart);
            self.probers.insert(name, handle);
        }

        info!(count = self.interfaces.len(), "monitoring interfaces");
    }

    async fn tick(&mut self) -> Result<(), Error> {
        while let Some(event) = self.event_queue.pop_front() {
            events::process_link_event(self, event).await;
        }

        let Some(pending_since) = self.pending_since else {
            return Ok(());
        };
        let elapsed = pending_since.elapsed().as_secs();
        if elapsed < self.cfg.route.delay {
            Debug::RerouteCountdown(self.cfg.route.delay - elapsed).log();
            return Ok(());
        }
        self.pending_since = None;
        self.flags.set_reroute_pending(false);

        let new_hash =
            route::topology_hash(&self.interfaces, self.runner.as_ref())
                .await?;
        if self.last_hash.as_ref() == Some(&new_hash) {
            info!("reroute cancelled, topology hash unchanged");
            return Ok(());
        }

        info!("defining routes");
        self.flags.set_rerouting(true);
        match route::program_routing(
            &self.cfg.route,
            &self.interfaces,
            self.runner.as_ref(),
        )
        .await
        {
            Ok(()) => {
                for handle in self.probers.values() {
                    handle.send(ProbeMsg::Trigger);
                }
                match route::topology_hash(
                    &self.interfaces,
                    self.runner.as_ref(),
                )
                .await
                {
                    Ok(hash) => {
                        self.last_hash = Some(hash);
                        info!("routes defined");
                    }
                    Err(error) => error.log(),
                }
            }
            // The stored hash stays stale, so the next link event leads to
            // another attempt.
            Err(error) => {
                error!(%error, "rerouting failed");
            }
        }
        self.flags.set_rerouting(false);

        Ok(())
    }

    pub(crate) fn notify_prober(&self, name: &str, msg: ProbeMsg) {
        if let Some(handle) = self.probers.get(name) {
            handle.send(msg);
        }
    }

    pub(crate) fn arm_reroute(&mut self) {
        self.pending_since = Some(Instant::now());
        self.flags.set_reroute_pending(true);
    }

    // Cooperative teardown: wake every prober and wait for it to finish
    // whatever subprocess it is reaping.
    async fn shutdown(&mut self) {
        self.flags.shutdown();
        for (_, handle) in std::mem::take(&mut self.probers) {
            handle.join().await;
        }
        info!("controller stopped");
    }
}
