//
// Copyright (c) The Mwan Contributors
//
// SPDX-License-Identifier: MIT
//

use std::sync::Arc;
use std::sync::LazyLock as Lazy;

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use regex::Regex;
use tokio::net::UdpSocket;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{Instrument, debug_span};

use crate::controller::ControlMsg;
use crate::debug::Debug;
use crate::error::Error;
use crate::events::{LinkEvent, LinkEventKind};
use crate::tasks::Task;

// BSD-syslog envelope: <facility>Mmm DD HH:MM:SS host prog[pid]: body.
static ENVELOPE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^<(?P<facility>\d+)>(?P<month>\w{3})\s+(?P<day>\d+)\s+(?P<time>\d+:\d+:\d+)\s+(?P<host>\w+)\s+(?P<prog>[^\[:]+)(\[(?P<pid>\d+)\])?:\s+(?P<msg>.*)",
    )
    .unwrap()
});

// Body classifiers, tried in order; first match wins.
static DHCPCD_ADD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<intf>\w+): (?:adding|changing) default route (?P<route>.*)")
        .unwrap()
});
static INTF_REMOVE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?P<intf>\w+): removing interface").unwrap());
static WPA_REMOVE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^interface (?P<intf>\w+) DISCONNECTED").unwrap());
static WPA_ADD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^interface (?P<intf>\w+) CONNECTED").unwrap());
// An interface with a static address comes up without a dhcpcd route
// message; the route read happens when the event is applied.
static KERNEL_ADD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?P<intf>\w+): link becomes ready").unwrap());

// ===== global functions =====

/// Binds the syslog endpoint. Failure to bind aborts startup.
pub async fn bind(addr: &str) -> Result<UdpSocket, Error> {
    UdpSocket::bind(addr).await.map_err(Error::UdpBindError)
}

/// Spawns the datagram receive loop feeding the controller channel.
pub fn spawn_listener(
    socket: Arc<UdpSocket>,
    ctl_tx: UnboundedSender<ControlMsg>,
) -> Task<()> {
    Task::spawn_supervised(move || {
        let socket = socket.clone();
        let ctl_tx = ctl_tx.clone();
        read_loop(socket, ctl_tx).instrument(debug_span!("syslog"))
    })
}

async fn read_loop(
    socket: Arc<UdpSocket>,
    ctl_tx: UnboundedSender<ControlMsg>,
) {
    let mut ready = false;
    let mut buf = [0; 4096];
    loop {
        let len = match socket.recv_from(&mut buf).await {
            Ok((len, _)) => len,
            Err(error) => {
                Error::UdpRecvError(error).log();
                continue;
            }
        };

        // The first datagram proves the syslog forwarder is alive, which
        // is the controller's cue to register interfaces.
        if !ready {
            ready = true;
            if ctl_tx.send(ControlMsg::SyslogReady).is_err() {
                return;
            }
        }

        // Undecodable datagrams are ignored.
        let Ok(payload) = std::str::from_utf8(&buf[..len]) else {
            continue;
        };
        if let Some(event) = parse_datagram(payload) {
            Debug::EventQueued(&event.ifname).log();
            if ctl_tx.send(ControlMsg::Link(event)).is_err() {
                return;
            }
        }
    }
}

/// Parses one syslog datagram into a link event, if it is one.
pub fn parse_datagram(payload: &str) -> Option<LinkEvent> {
    let Some(envelope) = ENVELOPE_RE.captures(payload) else {
        Debug::SyslogDiscard(payload).log();
        return None;
    };

    let timestamp = parse_timestamp(
        &envelope["month"],
        &envelope["day"],
        &envelope["time"],
    )?;
    let (kind, ifname) = classify(&envelope["msg"])?;

    Some(LinkEvent {
        kind,
        ifname,
        timestamp,
    })
}

/// Classifies a syslog message body against the known interface lifecycle
/// messages from dhcpcd, wpa_supplicant and the kernel.
pub fn classify(body: &str) -> Option<(LinkEventKind, String)> {
    if let Some(caps) = DHCPCD_ADD_RE.captures(body) {
        return Some((LinkEventKind::Up, caps["intf"].to_owned()));
    }
    if let Some(caps) = INTF_REMOVE_RE.captures(body) {
        return Some((LinkEventKind::Down, caps["intf"].to_owned()));
    }
    if let Some(caps) = WPA_REMOVE_RE.captures(body) {
        return Some((LinkEventKind::Down, caps["intf"].to_owned()));
    }
    if let Some(caps) = WPA_ADD_RE.captures(body) {
        return Some((LinkEventKind::Up, caps["intf"].to_owned()));
    }
    if let Some(caps) = KERNEL_ADD_RE.captures(body) {
        return Some((LinkEventKind::Up, caps["intf"].to_owned()));
    }
    None
}

// Syslog timestamps carry no year; the receive-time year is adopted. The
// timestamp is informational, queue order defines causality.
fn parse_timestamp(month: &str, day: &str, time: &str) -> Option<NaiveDateTime> {
    let month = month.parse::<chrono::Month>().ok()?;
    let day = day.parse::<u32>().ok()?;
    let mut fields = time.split(':');
    let hour = fields.next()?.parse::<u32>().ok()?;
    let min = fields.next()?.parse::<u32>().ok()?;
    let sec = fields.next()?.parse::<u32>().ok()?;

    let year = chrono::Local::now().year();
    NaiveDate::from_ymd_opt(year, month.number_from_month(), day)?
        .and_hms_opt(hour, min, sec)
}
