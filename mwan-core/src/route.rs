//
// Copyright (c) The Mwan Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeSet;

use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::command::CommandRunner;
use crate::consts::{
    DELETE_RETRY_LIMIT, RULE_PRIO_MAIN, RULE_PRIO_MULTIPATH, TABLE_PURGE_FLOOR,
};
use crate::debug::Debug;
use crate::error::Error;
use crate::interface::MonitoredInterface;

// Routing configuration.
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RouteCfg {
    // Debounce window in seconds after the latest link event.
    pub delay: u64,
    // First per-interface routing table id, minus one.
    pub base_table: u32,
    // Table holding the weighted multipath default.
    pub multipath_table: u32,
}

/// Order-insensitive digest of the observable routing state. Equal hashes
/// mean a reroute would be a no-op.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TopologyHash([u8; 32]);

// ===== impl RouteCfg =====

impl Default for RouteCfg {
    fn default() -> RouteCfg {
        RouteCfg {
            delay: 10,
            base_table: 200,
            multipath_table: 323,
        }
    }
}

// ===== global functions =====

/// Digests the per-interface link state together with the kernel's main
/// routing table, as a set.
pub async fn topology_hash(
    interfaces: &[MonitoredInterface],
    runner: &dyn CommandRunner,
) -> Result<TopologyHash, Error> {
    let mut records = BTreeSet::new();
    for iface in interfaces {
        let record = match iface.route_info() {
            Some(info) => format!(
                "{}|up|{}|{}|{}",
                iface.name, info.local_ip, info.network, info.route
            ),
            None => format!("{}|down|||", iface.name),
        };
        records.insert(record);
    }

    let output = runner.run(&["ip", "route", "show"], true).await?;
    for line in output.stdout.lines() {
        records.insert(line.to_owned());
    }

    let mut hasher = Sha256::new();
    for record in &records {
        hasher.update(record.as_bytes());
        hasher.update([0u8]);
    }
    Ok(TopologyHash(hasher.finalize().into()))
}

/// Reprograms policy rules, per-interface tables, the multipath default and
/// the NAT chain from the current interface states.
///
/// The whole procedure is idempotent: it first drains every table slot it
/// could ever have written, then rebuilds from scratch.
pub async fn program_routing(
    cfg: &RouteCfg,
    interfaces: &[MonitoredInterface],
    runner: &dyn CommandRunner,
) -> Result<(), Error> {
    Debug::TablePurge.log();

    // Sweeping a fixed floor of table slots covers interfaces that were
    // dropped from the configuration since the last run.
    let slots = interfaces.len().max(TABLE_PURGE_FLOOR);
    for idx in 0..slots {
        purge_table(runner, cfg.base_table + idx as u32 + 1).await?;
    }
    purge_table(runner, cfg.multipath_table).await?;

    runner.run(&["iptables", "-t", "nat", "-F"], false).await?;

    // The main table loses its default; rules installed below take over.
    runner
        .run_until_error(
            &["ip", "route", "del", "default"],
            DELETE_RETRY_LIMIT,
        )
        .await?;

    Debug::TableBuild.log();

    for (idx, iface) in interfaces.iter().enumerate() {
        let Some(info) = iface.route_info() else {
            continue;
        };
        let table = (cfg.base_table + idx as u32 + 1).to_string();
        let local_ip = info.local_ip.to_string();

        // Pin traffic sourced from this link's address to its own table,
        // preserving established sessions across reroutes.
        runner
            .run(
                &[
                    "ip", "rule", "add", "prio", &table, "from", &local_ip,
                    "lookup", &table,
                ],
                false,
            )
            .await?;

        let mut argv: Vec<&str> = vec![
            "ip", "route", "add", "default", "src", &local_ip, "proto",
            "static", "table", &table,
        ];
        argv.extend(info.route.split(' '));
        runner.run(&argv, false).await?;

        // Explicit prohibit beats silently falling through to another
        // link when this table degrades mid-flight.
        runner
            .run(
                &[
                    "ip", "route", "append", "prohibit", "default", "metric",
                    "1", "proto", "static", "table", &table,
                ],
                false,
            )
            .await?;

        runner
            .run(
                &[
                    "iptables",
                    "-t",
                    "nat",
                    "-A",
                    "POSTROUTING",
                    "-o",
                    &iface.name,
                    "-j",
                    "MASQUERADE",
                ],
                false,
            )
            .await?;
    }

    // Re-seat the policy rules: main first, multipath as the fallback for
    // flows no per-interface rule claims.
    let multipath_table = cfg.multipath_table.to_string();
    let prio_main = RULE_PRIO_MAIN.to_string();
    let prio_multipath = RULE_PRIO_MULTIPATH.to_string();
    runner
        .run(&["ip", "rule", "del", "prio", &prio_main], true)
        .await?;
    runner
        .run(
            &["ip", "rule", "add", "prio", &prio_main, "lookup", "main"],
            false,
        )
        .await?;
    runner
        .run(&["ip", "rule", "del", "prio", &prio_multipath], true)
        .await?;
    runner
        .run(
            &[
                "ip",
                "rule",
                "add",
                "prio",
                &prio_multipath,
                "lookup",
                &multipath_table,
            ],
            false,
        )
        .await?;

    // Weighted multipath default across the connected links, in
    // declaration order.
    let hops = interfaces
        .iter()
        .filter_map(|iface| iface.route_info().map(|info| (iface, info)))
        .collect::<Vec<_>>();
    let weights = hops
        .iter()
        .map(|(iface, _)| iface.config.weight.to_string())
        .collect::<Vec<_>>();

    if !hops.is_empty() {
        let mut argv: Vec<&str> = vec![
            "ip",
            "route",
            "add",
            "default",
            "table",
            &multipath_table,
            "proto",
            "static",
        ];
        if let [(_, info)] = hops.as_slice() {
            argv.extend(info.route.split(' '));
        } else {
            for ((_, info), weight) in hops.iter().zip(&weights) {
                argv.push("nexthop");
                argv.extend(info.route.split(' '));
                argv.push("weight");
                argv.push(weight);
            }
        }
        runner.run(&argv, false).await?;
    }

    runner.run(&["ip", "route", "flush", "cache"], false).await?;

    Ok(())
}

// Drains one routing table and its policy rule. Duplicated rules from
// earlier partial runs all go.
async fn purge_table(
    runner: &dyn CommandRunner,
    table_id: u32,
) -> Result<(), Error> {
    let table = table_id.to_string();
    runner
        .run_until_error(
            &["ip", "rule", "del", "prio", &table],
            DELETE_RETRY_LIMIT,
        )
        .await?;
    runner
        .run_until_error(
            &["ip", "route", "del", "all", "table", &table],
            DELETE_RETRY_LIMIT,
        )
        .await?;
    Ok(())
}
