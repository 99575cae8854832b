//
// Copyright (c) The Mwan Contributors
//
// SPDX-License-Identifier: MIT
//

use chrono::NaiveDateTime;

use crate::controller::Controller;
use crate::debug::Debug;
use crate::interface;
use crate::probe::ProbeMsg;

// A link lifecycle delta extracted from the syslog stream.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LinkEvent {
    pub kind: LinkEventKind,
    pub ifname: String,
    pub timestamp: NaiveDateTime,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LinkEventKind {
    Up,
    Down,
}

// ===== link event processing =====

pub(crate) async fn process_link_event(ctl: &mut Controller, event: LinkEvent) {
    let Some(idx) = ctl
        .interfaces
        .iter()
        .position(|iface| iface.name == event.ifname)
    else {
        Debug::UnknownInterface(&event.ifname).log();
        return;
    };

    match event.kind {
        LinkEventKind::Up => {
            ctl.notify_prober(&event.ifname, ProbeMsg::LinkUp);
            match interface::acquire_route_info(
                &event.ifname,
                ctl.runner.as_ref(),
            )
            .await
            {
                Ok(Some(info)) => ctl.interfaces[idx].mark_connected(info),
                // No usable default route yet; keep the previous state and
                // wait for the next event.
                Ok(None) => Debug::RouteInfoMismatch(&event.ifname).log(),
                Err(error) => error.log(),
            }
        }
        LinkEventKind::Down => {
            ctl.interfaces[idx].mark_disconnected();
            ctl.notify_prober(&event.ifname, ProbeMsg::LinkDown);
        }
    }

    // Any applied event re-arms the debounce window.
    ctl.arm_reroute();
}
