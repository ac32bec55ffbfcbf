// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//! The transport interface consumed by the client, and building blocks for
//! implementing it.
//!
//! A transport owns the connections to remote servers, performs the actual send
//! and reports raw errors. The client only ever reaches the network through
//! [`Transport::dispatch`].

pub mod codec;
pub mod tcp;

use crate::cluster::{ServerId, ServerInfo};
use crate::error::TransportError;
use crate::message::{Reply, RpcMessage};
use crate::trace::CallTrace;
use async_broadcast::{InactiveReceiver, Receiver, Sender};
use faststr::FastStr;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tracing::trace;

/// Subscription to a transport's out-of-band errors.
pub type ErrorReceiver = Receiver<TransportError>;

/// A hook called for every failed dispatch.
pub type ErrorHook = Arc<dyn Fn(&TransportError, &ServerId, &RpcMessage) + Send + Sync>;

/// Per-client options handed to every dispatch.
#[derive(Debug, Clone, Default)]
pub struct DispatchOptions {
    /// The calling client's id.
    pub client_id: FastStr,
    /// How long the transport may wait for the reply. `None` leaves it to the transport.
    pub timeout: Option<Duration>,
}

/// Intercepts dispatches inside a transport.
pub trait Filter: Send + Sync + 'static {
    /// Filter name, for logs.
    fn name(&self) -> &str;

    /// Runs before the message is sent. An error rejects the call.
    fn before(&self, _server_id: &ServerId, _message: &RpcMessage) -> Result<(), TransportError> {
        Ok(())
    }

    /// Runs after the call resolved.
    fn after(&self, _server_id: &ServerId, _message: &RpcMessage, _result: &Result<Reply, TransportError>) {}
}

/// [`Transport`] is the connection-pooled delivery layer behind a client.
pub trait Transport: Send + Sync + 'static {
    /// Start the transport.
    fn start(&self) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Stop the transport. `force` abandons in-flight calls instead of draining them.
    fn stop(&self, force: bool) -> impl Future<Output = ()> + Send;

    /// Send `message` to `server_id` and resolve with its reply, exactly once.
    fn dispatch(
        &self,
        trace: Option<CallTrace>,
        server_id: ServerId,
        message: RpcMessage,
        options: DispatchOptions,
    ) -> impl Future<Output = Result<Reply, TransportError>> + Send;

    /// Add a server, or update it if the id is already known.
    fn add_server(&self, info: Arc<ServerInfo>);

    /// Add many servers.
    fn add_servers(&self, infos: Vec<Arc<ServerInfo>>) {
        for info in infos {
            self.add_server(info);
        }
    }

    /// Remove a server and close its connection.
    fn remove_server(&self, id: &str);

    /// Remove many servers.
    fn remove_servers(&self, ids: &[ServerId]) {
        for id in ids {
            self.remove_server(id);
        }
    }

    /// Replace the whole server set.
    fn replace_servers(&self, infos: Vec<Arc<ServerInfo>>);

    /// Subscribe to out-of-band transport errors.
    fn subscribe_errors(&self) -> ErrorReceiver;

    /// Register a filter that runs before each dispatch.
    fn before(&self, filter: Arc<dyn Filter>);

    /// Register a filter that runs after each dispatch.
    fn after(&self, filter: Arc<dyn Filter>);

    /// Register a filter on both sides of each dispatch.
    fn filter(&self, filter: Arc<dyn Filter>) {
        self.before(filter.clone());
        self.after(filter);
    }

    /// Set the hook called for every failed dispatch.
    fn set_error_handler(&self, handler: ErrorHook);
}

/// Before and after filter lists.
#[derive(Default)]
pub struct FilterChain {
    before: RwLock<Vec<Arc<dyn Filter>>>,
    after: RwLock<Vec<Arc<dyn Filter>>>,
}

impl FilterChain {
    /// Returns an empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a before filter.
    pub fn push_before(&self, filter: Arc<dyn Filter>) {
        self.before.write().unwrap_or_else(PoisonError::into_inner).push(filter);
    }

    /// Append an after filter.
    pub fn push_after(&self, filter: Arc<dyn Filter>) {
        self.after.write().unwrap_or_else(PoisonError::into_inner).push(filter);
    }

    /// Run the before filters in registration order, stopping at the first rejection.
    pub fn run_before(&self, server_id: &ServerId, message: &RpcMessage) -> Result<(), TransportError> {
        for filter in self.before.read().unwrap_or_else(PoisonError::into_inner).iter() {
            trace!("[MESHRPC] before filter {} for {}", filter.name(), server_id);
            filter.before(server_id, message)?;
        }
        Ok(())
    }

    /// Run every after filter in registration order.
    pub fn run_after(&self, server_id: &ServerId, message: &RpcMessage, result: &Result<Reply, TransportError>) {
        for filter in self.after.read().unwrap_or_else(PoisonError::into_inner).iter() {
            filter.after(server_id, message, result);
        }
    }
}

/// The transport's out-of-band error channel.
///
/// Overflowing subscribers lose the oldest events instead of blocking the transport.
pub struct ErrorEvents {
    sender: Sender<TransportError>,
    _keep_open: InactiveReceiver<TransportError>,
}

impl ErrorEvents {
    /// A channel buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (mut sender, receiver) = async_broadcast::broadcast(capacity.max(1));
        sender.set_overflow(true);
        sender.set_await_active(false);
        Self {
            sender,
            _keep_open: receiver.deactivate(),
        }
    }

    /// A new subscriber, seeing events emitted from now on.
    pub fn subscribe(&self) -> ErrorReceiver {
        self.sender.new_receiver()
    }

    /// Publish an event. Without subscribers it is dropped.
    pub fn emit(&self, error: TransportError) {
        if self.sender.try_broadcast(error).is_err() {
            trace!("[MESHRPC] transport error event dropped, no active subscriber");
        }
    }
}

impl Default for ErrorEvents {
    fn default() -> Self {
        Self::new(64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportErrorKind;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Deny(&'static str);

    impl Filter for Deny {
        fn name(&self) -> &str {
            "deny"
        }

        fn before(&self, server_id: &ServerId, _: &RpcMessage) -> Result<(), TransportError> {
            if server_id.as_str() == self.0 {
                return Err(TransportError::new(TransportErrorKind::Rejected, Some(server_id.clone()), "denied"));
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct Count(AtomicUsize);

    impl Filter for Count {
        fn name(&self) -> &str {
            "count"
        }

        fn after(&self, _: &ServerId, _: &RpcMessage, _: &Result<Reply, TransportError>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_filter_chain() {
        let chain = FilterChain::new();
        let count = Arc::new(Count::default());
        chain.push_before(Arc::new(Deny("chat-2")));
        chain.push_after(count.clone());

        let message = RpcMessage::new("sys".into(), "chat".into(), "msgRemote".into(), "forward".into(), vec![]);
        assert!(chain.run_before(&ServerId::from_static_str("chat-1"), &message).is_ok());
        let err = chain.run_before(&ServerId::from_static_str("chat-2"), &message).unwrap_err();
        assert_eq!(err.kind, TransportErrorKind::Rejected);

        chain.run_after(&ServerId::from_static_str("chat-1"), &message, &Ok(vec![]));
        assert_eq!(count.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_error_events_reach_subscribers() {
        let events = ErrorEvents::new(4);
        events.emit(TransportError::new(TransportErrorKind::Connect, None, "before anyone listens"));

        let mut rx = events.subscribe();
        events.emit(TransportError::new(TransportErrorKind::Disconnected, Some(ServerId::from_static_str("chat-1")), "eof"));
        let got = rx.recv().await.unwrap();
        assert_eq!(got.kind, TransportErrorKind::Disconnected);
    }
}
