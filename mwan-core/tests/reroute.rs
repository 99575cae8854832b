//
// Copyright (c) The Mwan Contributors
//
// SPDX-License-Identifier: MIT
//

mod support;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use mwan_core::command::{CommandOutput, CommandRunner};
use mwan_core::controller::{ControlMsg, Controller, ControllerCfg};
use mwan_core::interface::{InterfaceCfg, MonitoredInterface, RouteInfo};
use mwan_core::route::{RouteCfg, program_routing, topology_hash};
use mwan_core::syslog::parse_datagram;
use mwan_core::tasks::Task;
use support::{ScriptedRunner, ok, output, quiet_host};
use tokio::sync::mpsc;
use tokio::time;

fn iface_cfg(weight: u32) -> InterfaceCfg {
    InterfaceCfg {
        active: true,
        test_ip: "10.254.254.254".to_owned(),
        weight,
        num_of_tests: 5,
    }
}

// Host stub with a per-interface `ip route list dev` answer.
fn host(
    routes: Vec<(&'static str, &'static str)>,
) -> impl Fn(&[&str]) -> CommandOutput + Send + Sync + 'static {
    move |argv| {
        if let Some(out) = quiet_host(argv) {
            return out;
        }
        if argv.len() == 5 && argv[..4] == ["ip", "route", "list", "dev"] {
            for (name, stdout) in &routes {
                if argv[4] == *name {
                    return output(0, stdout, "");
                }
            }
            return output(0, "", "");
        }
        ok()
    }
}

struct Harness {
    ctl_tx: mpsc::UnboundedSender<ControlMsg>,
    signal_tx: mpsc::Sender<()>,
    task: Task<()>,
}

// Starts a controller over the scripted runner and announces the syslog
// stream, which registers the interfaces.
fn start(
    networks: Vec<(&str, InterfaceCfg)>,
    runner: Arc<ScriptedRunner>,
) -> Harness {
    let cfg = ControllerCfg {
        poll_interval: 5,
        route: Default::default(),
        monitored_networks: networks
            .into_iter()
            .map(|(name, config)| (name.to_owned(), config))
            .collect::<BTreeMap<_, _>>(),
    };
    let (controller, ctl_tx, _flags) = Controller::new(cfg, runner);
    let (signal_tx, signal_rx) = mpsc::channel(1);
    let task = Task::spawn(controller.run(signal_rx));
    ctl_tx
        .send(ControlMsg::SyslogReady)
        .expect("controller should be listening");
    Harness {
        ctl_tx,
        signal_tx,
        task,
    }
}

impl Harness {
    fn inject(&self, datagram: &str) {
        let event = parse_datagram(datagram).expect("datagram should parse");
        self.ctl_tx
            .send(ControlMsg::Link(event))
            .expect("controller should be listening");
    }

    async fn stop(self) {
        let _ = self.signal_tx.send(()).await;
        let _ = self.task.await;
    }
}

// ===== end-to-end reroute scenarios =====

#[tokio::test(start_paused = true)]
async fn single_link_reroute_sequence() {
    let runner = ScriptedRunner::new(host(vec![(
        "eth0",
        "default via 10.0.0.1 src 10.0.0.42\n10.0.0.0/24 dev eth0 proto kernel\n",
    )]));
    let h = start(vec![("eth0", iface_cfg(1))], runner.clone());
    h.inject(
        "<14>Jan  1 00:00:00 gw dhcpcd[100]: eth0: adding default route via 10.0.0.1",
    );
    time::sleep(Duration::from_secs(16)).await;

    // Event applied on the first tick, reroute after the debounce window.
    let mut expected = vec![
        "ip route list dev eth0".to_owned(),
        "ip route show".to_owned(),
    ];
    for table in 201..=300 {
        expected.push(format!("ip rule del prio {table}"));
        expected.push(format!("ip route del all table {table}"));
    }
    expected.push("ip rule del prio 323".to_owned());
    expected.push("ip route del all table 323".to_owned());
    expected.push("iptables -t nat -F".to_owned());
    expected.push("ip route del default".to_owned());
    expected.push("ip rule add prio 201 from 10.0.0.42 lookup 201".to_owned());
    expected.push(
        "ip route add default src 10.0.0.42 proto static table 201 via 10.0.0.1"
            .to_owned(),
    );
    expected.push(
        "ip route append prohibit default metric 1 proto static table 201"
            .to_owned(),
    );
    expected
        .push("iptables -t nat -A POSTROUTING -o eth0 -j MASQUERADE".to_owned());
    expected.push("ip rule del prio 32765".to_owned());
    expected.push("ip rule add prio 32765 lookup main".to_owned());
    expected.push("ip rule del prio 32766".to_owned());
    expected.push("ip rule add prio 32766 lookup 323".to_owned());
    expected
        .push("ip route add default table 323 proto static via 10.0.0.1".to_owned());
    expected.push("ip route flush cache".to_owned());
    expected.push("ip route show".to_owned());

    assert_eq!(runner.routing_commands(), expected);
    h.stop().await;
}

#[tokio::test(start_paused = true)]
async fn weighted_multipath_install() {
    let runner = ScriptedRunner::new(host(vec![
        (
            "wan_a",
            "default via 10.1.0.1 src 10.1.0.2\n10.1.0.0/24 dev wan_a\n",
        ),
        (
            "wan_b",
            "default via 10.2.0.1 src 10.2.0.2\n10.2.0.0/24 dev wan_b\n",
        ),
    ]));
    let h = start(
        vec![("wan_a", iface_cfg(1)), ("wan_b", iface_cfg(3))],
        runner.clone(),
    );
    h.inject(
        "<14>Jan  1 00:00:01 gw dhcpcd[100]: wan_a: adding default route via 10.1.0.1",
    );
    h.inject(
        "<14>Jan  1 00:00:01 gw dhcpcd[100]: wan_b: adding default route via 10.2.0.1",
    );
    time::sleep(Duration::from_secs(16)).await;

    // One weighted nexthop per connected link, in declaration order.
    let multipath = runner
        .commands()
        .into_iter()
        .filter(|line| line.starts_with("ip route add default table 323"))
        .collect::<Vec<_>>();
    assert_eq!(
        multipath,
        vec![
            "ip route add default table 323 proto static \
             nexthop via 10.1.0.1 weight 1 nexthop via 10.2.0.1 weight 3"
                .to_owned()
        ]
    );

    // Each link got its own table, in declaration order.
    assert_eq!(
        runner.count_of("ip rule add prio 201 from 10.1.0.2 lookup 201"),
        1
    );
    assert_eq!(
        runner.count_of("ip rule add prio 202 from 10.2.0.2 lookup 202"),
        1
    );
    h.stop().await;
}

#[tokio::test(start_paused = true)]
async fn debounce_coalesces_event_bursts() {
    let runner = ScriptedRunner::new(host(vec![(
        "eth0",
        "default via 10.0.0.1 src 10.0.0.42\n10.0.0.0/24 dev eth0\n",
    )]));
    let h = start(vec![("eth0", iface_cfg(1))], runner.clone());
    h.inject(
        "<14>Jan  1 00:00:00 gw dhcpcd[100]: eth0: adding default route via 10.0.0.1",
    );
    time::sleep(Duration::from_secs(16)).await;
    assert_eq!(runner.count_of("ip route flush cache"), 1);

    // A burst of flaps inside one debounce window ends disconnected and
    // must cost exactly one more reroute.
    h.inject("<14>Jan  1 00:00:20 gw dhcpcd[100]: eth0: removing interface");
    h.inject(
        "<14>Jan  1 00:00:21 gw dhcpcd[100]: eth0: adding default route via 10.0.0.1",
    );
    h.inject("<14>Jan  1 00:00:22 gw dhcpcd[100]: eth0: removing interface");
    time::sleep(Duration::from_secs(16)).await;

    assert_eq!(runner.count_of("ip route flush cache"), 2);
    // No link is up, so no multipath default was reinstalled.
    assert_eq!(
        runner.count_with_prefix("ip route add default table 323"),
        1
    );
    h.stop().await;
}

#[tokio::test(start_paused = true)]
async fn reroute_cancelled_when_hash_unchanged() {
    let runner = ScriptedRunner::new(host(vec![(
        "eth0",
        "default via 10.0.0.1 src 10.0.0.42\n10.0.0.0/24 dev eth0\n",
    )]));
    let h = start(vec![("eth0", iface_cfg(1))], runner.clone());
    h.inject(
        "<14>Jan  1 00:00:00 gw dhcpcd[100]: eth0: adding default route via 10.0.0.1",
    );
    time::sleep(Duration::from_secs(16)).await;
    assert_eq!(runner.count_of("ip route flush cache"), 1);

    // Same route announced again: the debounced check digests the same
    // topology and suppresses the reroute.
    h.inject(
        "<14>Jan  1 00:00:20 gw dhcpcd[100]: eth0: changing default route via 10.0.0.1",
    );
    time::sleep(Duration::from_secs(16)).await;

    assert_eq!(runner.count_of("ip route flush cache"), 1);
    assert_eq!(runner.count_of("iptables -t nat -F"), 1);
    h.stop().await;
}

// ===== direct programming-routine properties =====

fn connected(name: &str, gateway: &str, local_ip: &str, network: &str) -> MonitoredInterface {
    let mut iface = MonitoredInterface::new(name, &iface_cfg(1));
    iface.mark_connected(RouteInfo {
        route: format!("via {gateway}"),
        local_ip: local_ip.parse().unwrap(),
        network: network.to_owned(),
    });
    iface
}

#[tokio::test]
async fn zero_hops_installs_no_multipath() {
    let runner =
        ScriptedRunner::new(|argv| quiet_host(argv).unwrap_or_else(ok));
    let interfaces = vec![MonitoredInterface::new("eth0", &iface_cfg(1))];

    program_routing(&RouteCfg::default(), &interfaces, runner.as_ref())
        .await
        .expect("programming should succeed");

    assert_eq!(runner.count_with_prefix("ip route add default table 323"), 0);
    assert_eq!(runner.count_with_prefix("ip rule add prio 2"), 0);
    assert_eq!(runner.count_of("ip route flush cache"), 1);
}

#[tokio::test]
async fn programming_is_idempotent() {
    let runner =
        ScriptedRunner::new(|argv| quiet_host(argv).unwrap_or_else(ok));
    let interfaces =
        vec![connected("eth0", "10.0.0.1", "10.0.0.42", "10.0.0.0/24")];

    program_routing(&RouteCfg::default(), &interfaces, runner.as_ref())
        .await
        .expect("programming should succeed");
    let first = runner.routing_commands();
    runner.clear();
    program_routing(&RouteCfg::default(), &interfaces, runner.as_ref())
        .await
        .expect("programming should succeed");

    assert_eq!(first, runner.routing_commands());

    let before = topology_hash(&interfaces, runner.as_ref()).await.unwrap();
    let after = topology_hash(&interfaces, runner.as_ref()).await.unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn cleanup_sweeps_at_least_hundred_tables() {
    let runner =
        ScriptedRunner::new(|argv| quiet_host(argv).unwrap_or_else(ok));
    let interfaces =
        vec![connected("eth0", "10.0.0.1", "10.0.0.42", "10.0.0.0/24")];

    program_routing(&RouteCfg::default(), &interfaces, runner.as_ref())
        .await
        .expect("programming should succeed");

    // 100 per-interface slots plus the multipath table.
    assert_eq!(runner.count_with_prefix("ip route del all table "), 101);
    assert_eq!(runner.count_of("ip route del all table 300"), 1);
    assert_eq!(runner.count_of("ip route del all table 301"), 0);
    assert_eq!(runner.count_of("ip route del all table 323"), 1);
}

#[tokio::test]
async fn delete_retries_are_bounded() {
    // A host that keeps reporting success would loop forever without the
    // retry ceiling.
    let runner = ScriptedRunner::new(|_| ok());
    let code = runner
        .run_until_error(&["ip", "route", "del", "default"], 5)
        .await
        .expect("scripted runner never fails to spawn");
    assert_eq!(code, 0);
    assert_eq!(runner.count_of("ip route del default"), 5);
}

#[tokio::test]
async fn delete_stops_on_first_failure() {
    let runner = ScriptedRunner::new(|_| output(2, "", "No such process\n"));
    let code = runner
        .run_until_error(&["ip", "rule", "del", "prio", "201"], 5)
        .await
        .expect("scripted runner never fails to spawn");
    assert_eq!(code, 2);
    assert_eq!(runner.count_of("ip rule del prio 201"), 1);
}
