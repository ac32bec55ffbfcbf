// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//! Per-call trace records.
//!
//! When a client runs with debug tracing enabled, every direct invoke carries a
//! [`CallTrace`]. The record holds a tarpc trace [context](crate::context::Context)
//! so that transports built on tarpc propagate the same trace id to the server.

use crate::cluster::ServerId;
use crate::context;
use crate::message::RpcMessage;
use faststr::FastStr;
use std::time::Instant;
use tracing::debug;

/// One call's trace record: who called which server with what.
#[derive(Debug, Clone)]
pub struct CallTrace {
    client_id: FastStr,
    server_id: ServerId,
    message: RpcMessage,
    context: context::Context,
    started: Instant,
}

impl CallTrace {
    /// Open a record under a fresh trace context.
    pub fn new(client_id: FastStr, server_id: ServerId, message: RpcMessage) -> Self {
        Self {
            client_id,
            server_id,
            message,
            context: context::current(),
            started: Instant::now(),
        }
    }

    /// Log that the call reached `stage`.
    pub fn annotate(&self, stage: &str) {
        debug!(
            client_id = %self.client_id,
            server_id = %self.server_id,
            route = %self.message.route_path(),
            args = self.message.args().len(),
            trace_id = ?self.context.trace_context.trace_id,
            elapsed_us = self.started.elapsed().as_micros() as u64,
            "[MESHRPC] {stage}"
        );
    }

    /// The calling client.
    pub fn client_id(&self) -> &FastStr {
        &self.client_id
    }

    /// The target server.
    pub fn server_id(&self) -> &ServerId {
        &self.server_id
    }

    /// The traced message.
    pub fn message(&self) -> &RpcMessage {
        &self.message
    }

    /// The tarpc context to send the call under.
    pub fn context(&self) -> context::Context {
        self.context
    }
}
