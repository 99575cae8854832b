//
// Copyright (c) The Mwan Contributors
//
// SPDX-License-Identifier: MIT
//

use tracing::debug;

// Supervisor debug messages.
#[derive(Debug)]
pub enum Debug<'a> {
    CommandRun(&'a [&'a str]),
    SyslogDiscard(&'a str),
    EventQueued(&'a str),
    UnknownInterface(&'a str),
    RouteInfoMismatch(&'a str),
    RerouteCountdown(u64),
    TablePurge,
    TableBuild,
    ProbeSleep(&'a str, u64),
}

// ===== impl Debug =====

impl Debug<'_> {
    // Log debug message using the tracing API.
    pub(crate) fn log(&self) {
        match self {
            Debug::CommandRun(argv) => {
                debug!(command = %argv.join(" "), "{}", self);
            }
            Debug::SyslogDiscard(payload) => {
                debug!(%payload, "{}", self);
            }
            Debug::EventQueued(name) | Debug::UnknownInterface(name) => {
                debug!(%name, "{}", self);
            }
            Debug::RouteInfoMismatch(name) => {
                debug!(%name, "{}", self);
            }
            Debug::RerouteCountdown(seconds) => {
                debug!(%seconds, "{}", self);
            }
            Debug::TablePurge | Debug::TableBuild => {
                debug!("{}", self);
            }
            Debug::ProbeSleep(name, seconds) => {
                debug!(%name, %seconds, "{}", self);
            }
        }
    }
}

impl std::fmt::Display for Debug<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Debug::CommandRun(..) => {
                write!(f, "running external command")
            }
            Debug::SyslogDiscard(..) => {
                write!(f, "discarding unrecognized syslog message")
            }
            Debug::EventQueued(..) => {
                write!(f, "link event queued")
            }
            Debug::UnknownInterface(..) => {
                write!(f, "event for unmonitored interface")
            }
            Debug::RouteInfoMismatch(..) => {
                write!(f, "no usable default route on interface")
            }
            Debug::RerouteCountdown(..) => {
                write!(f, "seconds until reroute")
            }
            Debug::TablePurge => {
                write!(f, "cleaning routing tables")
            }
            Debug::TableBuild => {
                write!(f, "creating new routing tables")
            }
            Debug::ProbeSleep(..) => {
                write!(f, "probe back-off")
            }
        }
    }
}
