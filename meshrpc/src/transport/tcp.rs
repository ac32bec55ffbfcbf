// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//! TCP transport built on tarpc channels.
//!
//! One tarpc [`Channel`] per remote server id, dialed lazily on the first
//! dispatch to that server and dropped again when the connection shuts down.

use super::codec::*;
use super::{DispatchOptions, ErrorEvents, ErrorHook, ErrorReceiver, Filter, FilterChain, Transport};
use crate::cluster::{ServerId, ServerInfo};
use crate::context;
use crate::error::{TransportError, TransportErrorKind};
use crate::message::{Reply, RpcMessage};
use crate::trace::CallTrace;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tarpc::client::{Channel, RpcError};
use tarpc::serde_transport::tcp;
use tracing::{debug, trace, warn};

/// Settings that control the behavior of the TCP transport.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct TcpConfig {
    /// transport codec type.
    pub codec: Codec,
    /// Settings that control the behavior of the underlying tarpc client.
    pub core_config: tarpc::client::Config,
    /// How long a graceful stop waits for in-flight calls.
    /// Default is 3s.
    pub drain_timeout: Duration,
    /// Buffered error events per subscriber.
    /// Default is 64.
    pub error_buffer: usize,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            codec: Codec::default(),
            core_config: tarpc::client::Config::default(),
            drain_timeout: Duration::from_secs(3),
            error_buffer: 64,
        }
    }
}

impl TcpConfig {
    /// Set transport serde codec
    pub fn with_codec(mut self, codec: Codec) -> Self {
        self.codec = codec;
        self
    }
    /// The number of requests that can be in flight at once.
    /// `max_in_flight_requests` controls the size of the map used by the client
    /// for storing pending requests.
    /// Default is 1000.
    pub fn with_max_in_flight_requests(mut self, max_in_flight_requests: usize) -> Self {
        self.core_config.max_in_flight_requests = max_in_flight_requests;
        self
    }
    /// The number of requests that can be buffered client-side before being sent.
    /// `pending_requests_buffer` controls the size of the channel clients use
    /// to communicate with the request dispatch task.
    /// Default is 100.
    pub fn with_pending_request_buffer(mut self, pending_request_buffer: usize) -> Self {
        self.core_config.pending_request_buffer = pending_request_buffer;
        self
    }
    /// Set how long a graceful stop waits for in-flight calls.
    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }
}

/// A [`Transport`] keeping one tarpc channel per remote server.
pub struct TcpTransport {
    config: TcpConfig,
    running: AtomicBool,
    pending: AtomicUsize,
    servers: DashMap<ServerId, Arc<ServerInfo>>,
    channels: DashMap<ServerId, Channel<RpcMessage, Reply>>,
    filters: FilterChain,
    events: ErrorEvents,
    error_hook: RwLock<Option<ErrorHook>>,
}

impl TcpTransport {
    /// Returns a stopped transport with no servers.
    pub fn new(config: TcpConfig) -> Self {
        let events = ErrorEvents::new(config.error_buffer);
        Self {
            config,
            running: AtomicBool::new(false),
            pending: AtomicUsize::new(0),
            servers: DashMap::new(),
            channels: DashMap::new(),
            filters: FilterChain::new(),
            events,
            error_hook: RwLock::new(None),
        }
    }

    /// Number of open channels.
    pub fn connected(&self) -> usize {
        self.channels.len()
    }

    async fn new_channel(codec: Codec, core_config: tarpc::client::Config, address: &str) -> Result<Channel<RpcMessage, Reply>, std::io::Error> {
        match codec {
            Codec::Bincode => {
                // Bincode codec using [bincode](https://docs.rs/bincode) crate.
                let mut conn = tcp::connect(address, Bincode::default);
                conn.config_mut().max_frame_length(usize::MAX);
                Ok(tarpc::client::new(core_config, conn.await?).spawn())
            },
            Codec::Json => {
                // JSON codec using [serde_json](https://docs.rs/serde_json) crate.
                let mut conn = tcp::connect(address, Json::default);
                conn.config_mut().max_frame_length(usize::MAX);
                Ok(tarpc::client::new(core_config, conn.await?).spawn())
            },
            #[cfg(feature = "serde-transport-messagepack")]
            Codec::MessagePack => {
                // MessagePack codec using [rmp-serde](https://docs.rs/rmp-serde) crate.
                let mut conn = tcp::connect(address, MessagePack::default);
                conn.config_mut().max_frame_length(usize::MAX);
                Ok(tarpc::client::new(core_config, conn.await?).spawn())
            },
            #[cfg(feature = "serde-transport-cbor")]
            Codec::Cbor => {
                // CBOR codec using [serde_cbor](https://docs.rs/serde_cbor) crate.
                let mut conn = tcp::connect(address, Cbor::default);
                conn.config_mut().max_frame_length(usize::MAX);
                Ok(tarpc::client::new(core_config, conn.await?).spawn())
            },
        }
    }

    async fn channel(&self, info: &ServerInfo) -> Result<Channel<RpcMessage, Reply>, TransportError> {
        if let Some(channel) = self.channels.get(&info.id) {
            return Ok(channel.clone());
        }
        let address = info.address();
        match Self::new_channel(self.config.codec, self.config.core_config.clone(), &address).await {
            Ok(channel) => {
                debug!("[MESHRPC] connected to {} at {}", info.id, address);
                // A concurrent dial may have won; keep whichever landed first.
                Ok(self.channels.entry(info.id.clone()).or_insert(channel).clone())
            },
            Err(e) => {
                warn!("[MESHRPC] TCP connection establishment failed: {:?}", e);
                let err = TransportError::new(TransportErrorKind::Connect, Some(info.id.clone()), e.to_string());
                self.events.emit(err.clone());
                Err(err)
            },
        }
    }

    async fn call(&self, trace: Option<&CallTrace>, info: &ServerInfo, message: RpcMessage, timeout: Option<Duration>) -> Result<Reply, TransportError> {
        let channel = self.channel(info).await?;
        let ctx = trace.map(CallTrace::context).unwrap_or_else(context::current);
        let call = channel.call(ctx, message);
        let result = match timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(result) => result,
                Err(_) => {
                    return Err(TransportError::new(
                        TransportErrorKind::Timeout,
                        Some(info.id.clone()),
                        format!("no reply within {limit:?}"),
                    ))
                },
            },
            None => call.await,
        };
        result.map_err(|e| self.call_failed(&info.id, e))
    }

    fn call_failed(&self, server_id: &ServerId, error: RpcError) -> TransportError {
        match error {
            RpcError::Shutdown => {
                self.channels.remove(server_id);
                let err = TransportError::new(TransportErrorKind::Disconnected, Some(server_id.clone()), "connection shut down");
                self.events.emit(err.clone());
                err
            },
            RpcError::DeadlineExceeded => TransportError::new(TransportErrorKind::Timeout, Some(server_id.clone()), "request deadline exceeded"),
            e => TransportError::new(TransportErrorKind::Remote, Some(server_id.clone()), e.to_string()),
        }
    }

    fn report(&self, error: &TransportError, server_id: &ServerId, message: &RpcMessage) {
        let hook = self.error_hook.read().unwrap_or_else(PoisonError::into_inner).clone();
        if let Some(hook) = hook {
            hook(error, server_id, message);
        }
    }
}

/// Counts one dispatch as in flight until dropped, including when the caller
/// abandons the dispatch future.
struct PendingGuard<'a>(&'a AtomicUsize);

impl<'a> PendingGuard<'a> {
    fn enter(pending: &'a AtomicUsize) -> Self {
        pending.fetch_add(1, Ordering::AcqRel);
        Self(pending)
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new(TcpConfig::default())
    }
}

impl Transport for TcpTransport {
    async fn start(&self) -> Result<(), TransportError> {
        self.running.store(true, Ordering::Release);
        debug!("[MESHRPC] tcp transport started with {} servers", self.servers.len());
        Ok(())
    }

    async fn stop(&self, force: bool) {
        self.running.store(false, Ordering::Release);
        if !force {
            let deadline = Instant::now() + self.config.drain_timeout;
            while self.pending.load(Ordering::Acquire) > 0 && Instant::now() < deadline {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }
        let abandoned = self.pending.load(Ordering::Acquire);
        if abandoned > 0 {
            warn!("[MESHRPC] tcp transport stopped with {abandoned} calls in flight");
        }
        self.channels.clear();
    }

    async fn dispatch(&self, trace: Option<CallTrace>, server_id: ServerId, message: RpcMessage, options: DispatchOptions) -> Result<Reply, TransportError> {
        if !self.running.load(Ordering::Acquire) {
            return Err(TransportError::new(TransportErrorKind::Closed, Some(server_id), "transport is not running"));
        }
        let Some(info) = self.servers.get(&server_id).map(|s| s.clone()) else {
            let err = TransportError::new(TransportErrorKind::UnknownServer, Some(server_id.clone()), "server is not registered");
            self.report(&err, &server_id, &message);
            return Err(err);
        };
        if let Err(err) = self.filters.run_before(&server_id, &message) {
            self.report(&err, &server_id, &message);
            return Err(err);
        }
        if let Some(trace) = &trace {
            trace.annotate("transport dispatch");
        }

        let result = {
            let _pending = PendingGuard::enter(&self.pending);
            self.call(trace.as_ref(), &info, message.clone(), options.timeout).await
        };

        if let Some(trace) = &trace {
            trace.annotate("transport done");
        }
        self.filters.run_after(&server_id, &message, &result);
        if let Err(err) = &result {
            trace!("[MESHRPC] dispatch of {} from {} to {} failed: {}", message.route_path(), options.client_id, server_id, err);
            self.report(err, &server_id, &message);
        }
        result
    }

    fn add_server(&self, info: Arc<ServerInfo>) {
        if let Some(old) = self.servers.insert(info.id.clone(), info.clone()) {
            if old.address() != info.address() {
                self.channels.remove(&info.id);
            }
        }
    }

    fn remove_server(&self, id: &str) {
        self.servers.remove(id);
        self.channels.remove(id);
    }

    fn replace_servers(&self, infos: Vec<Arc<ServerInfo>>) {
        let next: HashMap<ServerId, Arc<ServerInfo>> = infos.into_iter().map(|info| (info.id.clone(), info)).collect();
        self.channels
            .retain(|id, _| next.get(id).is_some_and(|info| self.servers.get(id).is_some_and(|old| old.address() == info.address())));
        self.servers.clear();
        for (id, info) in next {
            self.servers.insert(id, info);
        }
    }

    fn subscribe_errors(&self) -> ErrorReceiver {
        self.events.subscribe()
    }

    fn before(&self, filter: Arc<dyn Filter>) {
        self.filters.push_before(filter);
    }

    fn after(&self, filter: Arc<dyn Filter>) {
        self.filters.push_after(filter);
    }

    fn set_error_handler(&self, handler: ErrorHook) {
        *self.error_hook.write().unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }
}
