//
// Copyright (c) The Mwan Contributors
//
// SPDX-License-Identifier: MIT
//

pub mod command;
pub mod consts;
pub mod controller;
pub mod debug;
pub mod error;
pub mod events;
pub mod interface;
pub mod probe;
pub mod route;
pub mod syslog;
pub mod tasks;
