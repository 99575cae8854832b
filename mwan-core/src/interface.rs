//
// Copyright (c) The Mwan Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;
use std::sync::LazyLock as Lazy;

use regex::Regex;
use serde::Deserialize;
use tracing::info;

use crate::command::CommandRunner;
use crate::error::Error;

// First line of `ip route list dev <name>` on a connected interface.
static DEFROUTE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^default\s+(?P<route>via \d+\.\d+\.\d+\.\d+)\s+src\s+(?P<local_ip>\d+\.\d+\.\d+\.\d+)",
    )
    .unwrap()
});

// Second line: the connected network prefix.
static NETWORK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?P<network>\d+\.\d+\.\d+\.\d+/\d+)").unwrap());

// Per-interface configuration.
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InterfaceCfg {
    pub active: bool,
    pub test_ip: String,
    pub weight: u32,
    pub num_of_tests: u32,
}

// Routing state captured from `ip route list dev <name>` while the
// interface holds a default route.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RouteInfo {
    // Default-route tail, e.g. "via 10.0.0.1".
    pub route: String,
    // Source address bound to the interface.
    pub local_ip: Ipv4Addr,
    // Connected network prefix, e.g. "10.0.0.0/24".
    pub network: String,
}

// An upstream link candidate.
//
// The route, local address and network prefix move together: either the
// interface is connected and all of them are set, or it is disconnected
// and none are. The two transition methods are the only mutators.
#[derive(Debug)]
pub struct MonitoredInterface {
    pub name: String,
    pub config: InterfaceCfg,
    state: Option<RouteInfo>,
}

// ===== impl InterfaceCfg =====

impl Default for InterfaceCfg {
    fn default() -> InterfaceCfg {
        InterfaceCfg {
            active: true,
            test_ip: "google.co.id".to_owned(),
            weight: 1,
            num_of_tests: 5,
        }
    }
}

// ===== impl MonitoredInterface =====

impl MonitoredInterface {
    pub fn new(name: &str, config: &InterfaceCfg) -> MonitoredInterface {
        let mut config = config.clone();
        config.weight = config.weight.max(1);
        config.num_of_tests = config.num_of_tests.max(1);
        MonitoredInterface {
            name: name.to_owned(),
            config,
            state: None,
        }
    }

    pub fn connected(&self) -> bool {
        self.state.is_some()
    }

    pub fn route_info(&self) -> Option<&RouteInfo> {
        self.state.as_ref()
    }

    pub fn mark_connected(&mut self, info: RouteInfo) {
        info!(name = %self.name, local_ip = %info.local_ip, "interface connected");
        self.state = Some(info);
    }

    pub fn mark_disconnected(&mut self) {
        info!(name = %self.name, "interface disconnected");
        self.state = None;
    }
}

// ===== global functions =====

// Parses `ip route list dev <name>` output into a route-info value.
//
// Returns None unless the first line carries a default route with a source
// address and the second line a network prefix; an address the kernel
// printed but Rust refuses to parse counts as a miss.
pub fn parse_route_info(output: &str) -> Option<RouteInfo> {
    let lines = output
        .lines()
        .map(|line| line.trim())
        .collect::<Vec<_>>();
    if lines.len() < 2 {
        return None;
    }

    let defroute = DEFROUTE_RE.captures(lines[0])?;
    let local_ip = defroute["local_ip"].parse::<Ipv4Addr>().ok()?;
    let network = NETWORK_RE.captures(lines[1])?;

    Some(RouteInfo {
        route: defroute["route"].to_owned(),
        local_ip,
        network: network["network"].to_owned(),
    })
}

// Reads the interface's current default route from the kernel.
//
// Ok(None) means the interface has no usable default route; the caller
// leaves its state alone.
pub(crate) async fn acquire_route_info(
    name: &str,
    runner: &dyn CommandRunner,
) -> Result<Option<RouteInfo>, Error> {
    let output = runner
        .run(&["ip", "route", "list", "dev", name], true)
        .await?;
    Ok(parse_route_info(&output.stdout))
}
