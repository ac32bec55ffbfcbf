// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//! Cluster wide reactions to transport errors.

use crate::cluster::ServerRegistry;
use crate::error::TransportError;
use tracing::warn;

/// [`FailureHandler`] receives every error the transport reports out-of-band.
///
/// It runs on the client's error listener task, never on a caller's call path,
/// so it must not block.
pub trait FailureHandler: Send + Sync + 'static {
    /// React to `error`. `servers` is the client's routing membership.
    fn on_failure(&self, error: &TransportError, servers: &ServerRegistry);
}

impl<F> FailureHandler for F
where
    F: Fn(&TransportError, &ServerRegistry) + Send + Sync + 'static,
{
    fn on_failure(&self, error: &TransportError, servers: &ServerRegistry) {
        self(error, servers)
    }
}

/// Logs the error and leaves the membership alone.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogFailure;

impl FailureHandler for LogFailure {
    fn on_failure(&self, error: &TransportError, _servers: &ServerRegistry) {
        warn!("[MESHRPC] transport error: {error}");
    }
}

/// Removes a server from routing once its connection is lost.
///
/// The transport keeps the server, so adding it again restores routing to it.
#[derive(Debug, Default, Clone, Copy)]
pub struct EvictFailedServer;

impl FailureHandler for EvictFailedServer {
    fn on_failure(&self, error: &TransportError, servers: &ServerRegistry) {
        let Some(server_id) = error.server_id.as_deref().filter(|_| error.is_connection_loss()) else {
            LogFailure.on_failure(error, servers);
            return;
        };
        match servers.remove_server(server_id) {
            Some(info) => warn!("[MESHRPC] evicted {} server {} after: {}", info.server_type, info.id, error.reason),
            None => warn!("[MESHRPC] transport error for unknown server: {error}"),
        }
    }
}
