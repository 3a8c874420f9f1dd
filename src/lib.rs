// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

pub mod config;
pub mod connection_limit;
pub mod connection_registry;
pub mod error;
pub mod handler;
pub mod handshake;
pub mod http;
pub mod mailbox;
pub mod metrics;
pub mod protocol;
pub mod rate_limit;
pub mod router;
pub mod verifier;
