//
// Copyright (c) The Mwan Contributors
//
// SPDX-License-Identifier: MIT
//

use tracing::{error, warn};

// Supervisor errors.
//
// Non-zero exit codes from external commands are values, not errors; only
// failures to reach the outside world at all end up here.
#[derive(Debug)]
pub enum Error {
    UdpBindError(std::io::Error),
    UdpRecvError(std::io::Error),
    ProcessSpawnError(String, std::io::Error),
}

// ===== impl Error =====

impl Error {
    pub fn log(&self) {
        match self {
            Error::UdpBindError(error) => {
                error!(%error, "{}", self);
            }
            Error::UdpRecvError(error) => {
                warn!(%error, "{}", self);
            }
            Error::ProcessSpawnError(program, error) => {
                error!(%program, %error, "{}", self);
            }
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::UdpBindError(..) => {
                write!(f, "failed to bind syslog endpoint")
            }
            Error::UdpRecvError(..) => {
                write!(f, "failed to receive syslog datagram")
            }
            Error::ProcessSpawnError(program, ..) => {
                write!(f, "failed to spawn {}", program)
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::UdpBindError(error)
            | Error::UdpRecvError(error)
            | Error::ProcessSpawnError(_, error) => Some(error),
        }
    }
}
