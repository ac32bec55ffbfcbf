// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//!
//! Errors surfaced by the client, the routing strategies and the transport.

use crate::cluster::ServerId;
use faststr::FastStr;
use std::fmt;

/// Errors that resolve a single call, or a lifecycle operation.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum RpcError {
    /// The operation requires a started client.
    #[error("rpc client is not running now")]
    NotStarted,
    /// `start` was called on a client that already left the inited state.
    #[error("rpc client has started")]
    AlreadyStarted,
    /// A proxy method was called without a route key, or with the wrong arity.
    #[error("invalid invocation of {namespace}.{server_type}.{service}.{method}")]
    InvalidInvocation {
        /// Proxy namespace.
        namespace: FastStr,
        /// Target server type.
        server_type: FastStr,
        /// Remote service name.
        service: FastStr,
        /// Remote method name.
        method: FastStr,
    },
    /// The custom router produced a target the client cannot use.
    #[error("invalid router: {0}")]
    InvalidRouter(FastStr),
    /// In specified-target mode the route key was not a server id string.
    #[error("server id must be a string")]
    InvalidServerId,
    /// In specified-target mode the named server serves another server type.
    #[error("server {server_id} is of type {actual}, not {expected}")]
    ServerTypeMismatch {
        /// The named server.
        server_id: ServerId,
        /// Server type of the message.
        expected: FastStr,
        /// Server type the server is registered with.
        actual: FastStr,
    },
    /// Wildcard broadcast found no servers of the requested type.
    #[error("no server found for server type: {0}")]
    ServerTypeNotFound(FastStr),
    /// The routing strategy could not resolve a target.
    #[error("route failed: {0}")]
    Router(#[from] RouteError),
    /// The transport failed the call.
    #[error("transport failed: {0}")]
    Transport(#[from] TransportError),
}

/// Errors returned by routing strategies and custom routers.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RouteError {
    /// The candidate list for the server type is empty.
    #[error("no server available for server type: {0}")]
    NoServerAvailable(FastStr),
    /// A custom router refused to route the message.
    #[error("{0}")]
    Custom(FastStr),
}

/// What went wrong inside the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportErrorKind {
    /// Could not open a connection to the server.
    Connect,
    /// An established connection was lost.
    Disconnected,
    /// The call did not complete in time.
    Timeout,
    /// The remote side reported an error.
    Remote,
    /// A before-filter rejected the call.
    Rejected,
    /// The target id is not known to the transport.
    UnknownServer,
    /// The transport is not running.
    Closed,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Connect => "connect",
            Self::Disconnected => "disconnected",
            Self::Timeout => "timeout",
            Self::Remote => "remote",
            Self::Rejected => "rejected",
            Self::UnknownServer => "unknown server",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// An error raised by the transport, either as the result of one dispatch or
/// out-of-band on the transport's error channel.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind} error (server: {}): {reason}", .server_id.as_deref().unwrap_or("-"))]
pub struct TransportError {
    /// Error category.
    pub kind: TransportErrorKind,
    /// The server involved, if any.
    pub server_id: Option<ServerId>,
    /// Human readable detail.
    pub reason: FastStr,
}

impl TransportError {
    /// Creates a transport error.
    pub fn new(kind: TransportErrorKind, server_id: Option<ServerId>, reason: impl Into<FastStr>) -> Self {
        Self {
            kind,
            server_id,
            reason: reason.into(),
        }
    }

    /// Whether the error means the server can no longer be reached.
    pub fn is_connection_loss(&self) -> bool {
        matches!(self.kind, TransportErrorKind::Connect | TransportErrorKind::Disconnected)
    }
}
