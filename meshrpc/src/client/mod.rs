// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//!
//! Provides a client that routes proxy calls onto remote servers.

pub mod config;
pub mod failure;

use crate::cluster::{ServerId, ServerInfo, ServerRegistry};
use crate::error::{RpcError, TransportError};
use crate::message::{Reply, RpcMessage, Value};
use crate::proxy::{MethodSpec, Outcome, ProxyRegistry, ServiceDescriptor, ServiceLoader, ServiceProxy};
use crate::route::{ActiveRequests, Balance, RouteContext, Router, RouterType};
use crate::trace::CallTrace;
use crate::transport::tcp::{TcpConfig, TcpTransport};
use crate::transport::{DispatchOptions, ErrorReceiver, Filter, Transport};
use async_broadcast::RecvError;
pub use config::{AppContext, ClientOptions};
use failure::FailureHandler;
use faststr::FastStr;
use futures::future::join_all;
use futures_util::{select, FutureExt};
use std::borrow::Cow;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, error, warn, Instrument, Span};

/// Route key of a specified-target call that addresses every server of the type.
pub const BROADCAST: &str = "*";

/// Lifecycle of a [`RpcClient`]. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum ClientState {
    /// built, not started yet
    Inited = 0,
    /// accepting calls
    Started = 1,
    /// stopped for good
    Closed = 2,
}

impl ClientState {
    fn from_u8(state: u8) -> Self {
        match state {
            0 => ClientState::Inited,
            1 => ClientState::Started,
            _ => ClientState::Closed,
        }
    }
}

enum Strategy {
    Balance { router_type: RouterType, balance: Box<dyn Balance> },
    Custom(Router),
}

struct ClientInner<T: Transport> {
    client_id: FastStr,
    context: AppContext,
    state: AtomicU8,
    lifecycle: Mutex<()>,
    shutdown: Arc<Notify>,
    transport: Arc<T>,
    servers: Arc<ServerRegistry>,
    route_context: Arc<dyn RouteContext>,
    proxies: ProxyRegistry,
    loader: Arc<dyn ServiceLoader>,
    strategy: Strategy,
    active: Arc<ActiveRequests>,
    hash_field_index: Option<usize>,
    debug: bool,
    dispatch_options: DispatchOptions,
    failure_handler: Arc<dyn FailureHandler>,
    span: Span,
}

/// Builds a client over a [`TcpTransport`] using the codec of `options`.
pub fn create_client(options: ClientOptions) -> RpcClient<TcpTransport> {
    RpcClient::with_factory(options, |options| TcpTransport::new(TcpConfig::default().with_codec(options.codec())))
}

/// The RPC client: state machine, proxy registry, routing state, and the
/// mediation between proxies, routing and the [`Transport`].
///
/// Cloning is cheap; clones share the same client.
pub struct RpcClient<T: Transport> {
    inner: Arc<ClientInner<T>>,
}

impl<T: Transport> Clone for RpcClient<T> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<T: Transport> RpcClient<T> {
    /// Build a client over an existing transport.
    pub fn new(transport: T, options: ClientOptions) -> Self {
        Self::build(Arc::new(transport), options)
    }

    /// Build a client whose transport is made by `factory`.
    pub fn with_factory<F>(options: ClientOptions, factory: F) -> Self
    where
        F: FnOnce(&ClientOptions) -> T,
    {
        let transport = factory(&options);
        Self::build(Arc::new(transport), options)
    }

    fn build(transport: Arc<T>, options: ClientOptions) -> Self {
        let ClientOptions {
            context,
            route_context,
            router,
            router_type,
            debug,
            client_id,
            servers: initial,
            failure_handler,
            loader,
            hash_field_index,
            timeout,
            codec: _,
            span,
        } = options;

        let client_id = client_id
            .filter(|id| !id.is_empty())
            .or_else(|| Some(context.server_id().clone()).filter(|id| !id.is_empty()))
            .unwrap_or_else(|| FastStr::new(format!("meshrpc-{}", std::process::id())));

        let servers = Arc::new(ServerRegistry::new());
        if !initial.is_empty() {
            servers.add_servers(&initial);
            transport.add_servers(initial);
        }
        let route_context = route_context.unwrap_or_else(|| servers.clone() as Arc<dyn RouteContext>);

        let active = Arc::new(ActiveRequests::new());
        let strategy = match (router_type, router) {
            (Some(router_type), _) => Strategy::Balance {
                router_type,
                balance: router_type.new_balance(active.clone()),
            },
            (None, Some(router)) => Strategy::Custom(router),
            (None, None) => Strategy::Balance {
                router_type: RouterType::Random,
                balance: RouterType::Random.new_balance(active.clone()),
            },
        };

        let span = span.unwrap_or_else(|| tracing::info_span!("meshrpc.client", client_id = %client_id));
        let dispatch_options = DispatchOptions {
            client_id: client_id.clone(),
            timeout,
        };

        Self {
            inner: Arc::new(ClientInner {
                client_id,
                context,
                state: AtomicU8::new(ClientState::Inited as u8),
                lifecycle: Mutex::new(()),
                shutdown: Arc::new(Notify::new()),
                transport,
                servers,
                route_context,
                proxies: ProxyRegistry::new(),
                loader,
                strategy,
                active,
                hash_field_index,
                debug,
                dispatch_options,
                failure_handler,
                span,
            }),
        }
    }

    /// Start the transport and begin forwarding its errors to the failure handler.
    pub async fn start(&self) -> Result<(), RpcError> {
        let inner = &self.inner;
        let _lifecycle = inner.lifecycle.lock().await;
        if self.state() != ClientState::Inited {
            warn!(parent: &inner.span, "[MESHRPC] rpc client has started");
            return Err(RpcError::AlreadyStarted);
        }
        let errors = inner.transport.subscribe_errors();
        if let Err(e) = inner.transport.start().instrument(inner.span.clone()).await {
            error!(parent: &inner.span, "[MESHRPC] rpc client start failed: {e}");
            return Err(e.into());
        }
        self.spawn_error_listener(errors);
        inner.state.store(ClientState::Started as u8, Ordering::Release);
        debug!(parent: &inner.span, "[MESHRPC] rpc client started");
        Ok(())
    }

    /// Stop the client, then the transport. `force` abandons in-flight calls.
    ///
    /// A client that is not started is left as it is.
    pub async fn stop(&self, force: bool) {
        let inner = &self.inner;
        if inner
            .state
            .compare_exchange(ClientState::Started as u8, ClientState::Closed as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!(parent: &inner.span, "[MESHRPC] rpc client is not running now");
            return;
        }
        inner.shutdown.notify_one();
        inner.transport.stop(force).instrument(inner.span.clone()).await;
        debug!(parent: &inner.span, "[MESHRPC] rpc client stopped");
    }

    fn spawn_error_listener(&self, mut errors: ErrorReceiver) {
        let shutdown = self.inner.shutdown.clone();
        let handler = self.inner.failure_handler.clone();
        let servers = self.inner.servers.clone();
        tokio::spawn(
            async move {
                loop {
                    select! {
                        _ = shutdown.notified().fuse() => {
                            return;
                        },
                        event = errors.recv().fuse() => match event {
                            Ok(err) => handler.on_failure(&err, &servers),
                            Err(RecvError::Overflowed(lost)) => warn!("[MESHRPC] {lost} transport error events lost"),
                            Err(RecvError::Closed) => return,
                        },
                    }
                }
            }
            .instrument(self.inner.span.clone()),
        );
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ClientState {
        ClientState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    /// The client id sent with every dispatch.
    pub fn client_id(&self) -> &FastStr {
        &self.inner.client_id
    }

    /// The client's routing membership.
    pub fn servers(&self) -> &ServerRegistry {
        &self.inner.servers
    }

    /// The underlying transport.
    pub fn transport(&self) -> &T {
        &self.inner.transport
    }

    /// Load the services of `descriptor` and register their methods.
    ///
    /// An empty descriptor, or a path where nothing is found, is skipped.
    pub fn add_proxy(&self, descriptor: &ServiceDescriptor) {
        let inner = &self.inner;
        if descriptor.is_empty() {
            debug!(parent: &inner.span, "[MESHRPC] skip empty proxy descriptor: {descriptor:?}");
            return;
        }
        let Some(services) = inner.loader.load(&descriptor.path, &inner.context).filter(|s| !s.is_empty()) else {
            warn!(parent: &inner.span, "[MESHRPC] no services found for {}.{} at {:?}", descriptor.namespace, descriptor.server_type, descriptor.path);
            return;
        };
        let added = inner.proxies.merge(&descriptor.namespace, &descriptor.server_type, services);
        debug!(parent: &inner.span, "[MESHRPC] {added} methods registered for {}.{}", descriptor.namespace, descriptor.server_type);
    }

    /// [`add_proxy`](Self::add_proxy) for each descriptor.
    pub fn add_proxies(&self, descriptors: &[ServiceDescriptor]) {
        for descriptor in descriptors {
            self.add_proxy(descriptor);
        }
    }

    /// A handle on `service` of `server_type`, or `None` if nothing is registered there.
    pub fn proxy(&self, namespace: &str, server_type: &str, service: &str) -> Option<ServiceProxy<T>> {
        self.inner.proxies.methods(namespace, server_type, service)?;
        Some(ServiceProxy::new(
            self.clone(),
            FastStr::new(namespace),
            FastStr::new(server_type),
            FastStr::new(service),
        ))
    }

    pub(crate) fn proxies(&self) -> &ProxyRegistry {
        &self.inner.proxies
    }

    /// Add a server, or update it if its id is known.
    pub fn add_server(&self, info: impl Into<Arc<ServerInfo>>) {
        let info = info.into();
        self.inner.servers.add_server(info.clone());
        self.inner.transport.add_server(info);
    }

    /// Add many servers.
    pub fn add_servers(&self, infos: Vec<Arc<ServerInfo>>) {
        self.inner.servers.add_servers(&infos);
        self.inner.transport.add_servers(infos);
    }

    /// Remove a server. Routing never selects it afterwards.
    pub fn remove_server(&self, id: &str) {
        self.inner.servers.remove_server(id);
        self.inner.transport.remove_server(id);
    }

    /// Remove many servers.
    pub fn remove_servers(&self, ids: &[ServerId]) {
        self.inner.servers.remove_servers(ids);
        self.inner.transport.remove_servers(ids);
    }

    /// Replace the whole server set.
    pub fn replace_servers(&self, infos: Vec<Arc<ServerInfo>>) {
        self.inner.servers.replace_servers(&infos);
        self.inner.transport.replace_servers(infos);
    }

    /// Register a transport filter that runs before each dispatch.
    pub fn before<F: Filter>(&self, filter: F) {
        self.inner.transport.before(Arc::new(filter));
    }

    /// Register a transport filter that runs after each dispatch.
    pub fn after<F: Filter>(&self, filter: F) {
        self.inner.transport.after(Arc::new(filter));
    }

    /// Register a transport filter on both sides of each dispatch.
    pub fn filter<F: Filter>(&self, filter: F) {
        self.inner.transport.filter(Arc::new(filter));
    }

    /// Set the hook the transport calls for every failed dispatch.
    pub fn set_error_handler<H>(&self, handler: H)
    where
        H: Fn(&TransportError, &ServerId, &RpcMessage) + Send + Sync + 'static,
    {
        self.inner.transport.set_error_handler(Arc::new(handler));
    }

    /// Send `message` to `server_id`. The only path from the client to the network.
    pub async fn rpc_invoke(&self, server_id: impl Into<ServerId>, message: RpcMessage) -> Result<Reply, RpcError> {
        let inner = &self.inner;
        let server_id = server_id.into();
        if self.state() != ClientState::Started {
            debug!(parent: &inner.span, "[MESHRPC] rpc client is not running now, drop call to {server_id}");
            return Err(RpcError::NotStarted);
        }
        let trace = inner.debug.then(|| CallTrace::new(inner.client_id.clone(), server_id.clone(), message.clone()));
        if let Some(trace) = &trace {
            trace.annotate("client invoke");
        }
        let _active = inner.active.enter(server_id.clone());
        inner
            .transport
            .dispatch(trace, server_id, message, inner.dispatch_options.clone())
            .instrument(inner.span.clone())
            .await
            .map_err(RpcError::from)
    }

    pub(crate) async fn proxy_call(
        &self,
        namespace: &FastStr,
        server_type: &FastStr,
        service: &FastStr,
        spec: &MethodSpec,
        to_server: bool,
        mut args: Vec<Value>,
    ) -> Result<Outcome, RpcError> {
        if self.state() != ClientState::Started {
            return Err(RpcError::NotStarted);
        }
        // The returned future takes the place of the completion handler.
        let effective = args.len() + 1;
        if effective < 2 || spec.arity.is_some_and(|arity| arity != args.len() - 1) {
            warn!(
                parent: &self.inner.span,
                "[MESHRPC] invalid invocation of {namespace}.{server_type}.{service}.{} with {effective} arguments",
                spec.name
            );
            return Err(RpcError::InvalidInvocation {
                namespace: namespace.clone(),
                server_type: server_type.clone(),
                service: service.clone(),
                method: spec.name.clone(),
            });
        }
        let route_key = args.remove(0);
        let message = RpcMessage::new(namespace.clone(), server_type.clone(), service.clone(), spec.name.clone(), args);
        if to_server {
            return self.dispatch_to_server(route_key, message).await;
        }
        let server_id = self.route(&route_key, &message)?;
        self.rpc_invoke(server_id, message).await.map(Outcome::Unicast)
    }

    async fn dispatch_to_server(&self, route_key: Value, message: RpcMessage) -> Result<Outcome, RpcError> {
        let server_id = match route_key {
            Value::Str(server_id) => server_id,
            other => {
                warn!(parent: &self.inner.span, "[MESHRPC] server id must be a string, got {other:?}");
                return Err(RpcError::InvalidServerId);
            },
        };
        if server_id.as_str() != BROADCAST {
            if let Some(actual) = self.foreign_type(&server_id, &message) {
                warn!(
                    parent: &self.inner.span,
                    "[MESHRPC] {} message cannot be sent to {actual} server {server_id}",
                    message.server_type()
                );
                return Err(RpcError::ServerTypeMismatch {
                    server_id,
                    expected: message.server_type().clone(),
                    actual,
                });
            }
            return self.rpc_invoke(server_id, message).await.map(Outcome::Unicast);
        }

        let servers = self
            .inner
            .route_context
            .servers_by_type(message.server_type())
            .filter(|servers| !servers.is_empty())
            .ok_or_else(|| RpcError::ServerTypeNotFound(message.server_type().clone()))?;
        let ids: Vec<ServerId> = servers.iter().map(|s| s.id.clone()).collect();
        let results = join_all(ids.iter().map(|id| self.rpc_invoke(id.clone(), message.clone()))).await;

        let mut replies = Vec::with_capacity(ids.len());
        for (id, result) in ids.into_iter().zip(results) {
            replies.push((id, result?));
        }
        Ok(Outcome::Broadcast(replies))
    }

    fn route(&self, route_key: &Value, message: &RpcMessage) -> Result<ServerId, RpcError> {
        let inner = &self.inner;
        let server_type = message.server_type();
        match &inner.strategy {
            Strategy::Balance { router_type, balance } => {
                let (candidates, key) = if router_type.uses_route_context() {
                    let candidates = inner.route_context.servers_by_type(server_type).unwrap_or_default();
                    (candidates, self.hash_key(route_key, message))
                } else {
                    (inner.servers.servers(server_type), Cow::Borrowed(""))
                };
                Ok(balance.pick(server_type, &candidates, &key)?)
            },
            Strategy::Custom(router) => {
                let server_id = router.resolve(route_key, message, inner.route_context.as_ref())?;
                self.check_routed(&server_id, message)?;
                Ok(server_id)
            },
        }
    }

    fn hash_key<'a>(&self, route_key: &'a Value, message: &'a RpcMessage) -> Cow<'a, str> {
        self.inner
            .hash_field_index
            .and_then(|index| message.args().get(index))
            .and_then(Value::route_key)
            .or_else(|| route_key.route_key())
            .unwrap_or_else(|| Cow::Owned(message.route_path()))
    }

    fn check_routed(&self, server_id: &ServerId, message: &RpcMessage) -> Result<(), RpcError> {
        if server_id.is_empty() {
            error!(parent: &self.inner.span, "[MESHRPC] router returned an empty server id for {}", message.route_path());
            return Err(RpcError::InvalidRouter(FastStr::from_static_str("empty server id")));
        }
        if let Some(actual) = self.foreign_type(server_id, message) {
            error!(
                parent: &self.inner.span,
                "[MESHRPC] router sent a {} message to {actual} server {server_id}",
                message.server_type()
            );
            return Err(RpcError::InvalidRouter(FastStr::new(format!(
                "server {server_id} is of type {actual}, not {}",
                message.server_type()
            ))));
        }
        Ok(())
    }

    /// The registered type of `server_id` when it differs from the message's.
    fn foreign_type(&self, server_id: &str, message: &RpcMessage) -> Option<FastStr> {
        self.inner
            .servers
            .get(server_id)
            .filter(|info| info.server_type != *message.server_type())
            .map(|info| info.server_type.clone())
    }
}
