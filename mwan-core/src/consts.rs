//
// Copyright (c) The Mwan Contributors
//
// SPDX-License-Identifier: MIT
//

use std::time::Duration;

// Loopback endpoint the syslog daemon forwards to.
pub const SYSLOG_BIND_ADDR: &str = "127.0.0.1:1979";

// Policy rule priorities re-seated on every reroute.
pub const RULE_PRIO_MAIN: u32 = 32765;
pub const RULE_PRIO_MULTIPATH: u32 = 32766;

// Cleanup always sweeps at least this many per-interface table slots, so
// tables from a previous, larger configuration are drained too.
pub const TABLE_PURGE_FLOOR: usize = 100;

// Retry ceiling for delete-until-absent commands.
pub const DELETE_RETRY_LIMIT: usize = 5;

// Probe sleep is PROBE_BACKOFF_NUMERATOR / remaining budget, in seconds.
pub const PROBE_BACKOFF_NUMERATOR: u64 = 300;

// An interface is restarted at most once per cooldown window, and never
// within the window following a disconnect.
pub const RESTART_COOLDOWN: Duration = Duration::from_secs(60);

// Grace period before the restart script is invoked.
pub const RESTART_HOLDOFF: Duration = Duration::from_secs(5);
