// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//! An in-memory transport recording every dispatch.
#![allow(dead_code)]

use meshrpc::client::config::ClientOptions;
use meshrpc::proxy::{ServiceDescriptor, ServiceSpec, StaticLoader};
use meshrpc::transport::{DispatchOptions, ErrorEvents, ErrorHook, ErrorReceiver, Filter, FilterChain, Transport};
use meshrpc::{RpcClient, RpcMessage, ServerId, ServerInfo, TransportError, TransportErrorKind, Value};
use meshrpc::message::Reply;
use meshrpc::trace::CallTrace;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// Replies with `[server id, args...]` so tests can see who served a call.
#[derive(Default)]
pub struct MockTransport {
    starts: AtomicUsize,
    stops: AtomicUsize,
    refuse_start: AtomicBool,
    servers: Mutex<HashMap<ServerId, Arc<ServerInfo>>>,
    failing: Mutex<HashSet<ServerId>>,
    calls: Mutex<Vec<(ServerId, RpcMessage)>>,
    traced: AtomicUsize,
    held: Mutex<HashSet<ServerId>>,
    released: Notify,
    filters: FilterChain,
    events: ErrorEvents,
    hook: Mutex<Option<ErrorHook>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refusing_start() -> Self {
        let transport = Self::default();
        transport.refuse_start.store(true, Ordering::SeqCst);
        transport
    }

    /// Make every dispatch to `id` fail with a remote error.
    pub fn fail(&self, id: &'static str) {
        self.failing.lock().unwrap().insert(ServerId::from_static_str(id));
    }

    /// Keep every dispatch to `id` in flight until [`MockTransport::release`].
    pub fn hold(&self, id: &'static str) {
        self.held.lock().unwrap().insert(ServerId::from_static_str(id));
    }

    /// Let every held dispatch finish.
    pub fn release(&self) {
        self.held.lock().unwrap().clear();
        self.released.notify_waiters();
    }

    /// Push an out-of-band error event.
    pub fn emit(&self, error: TransportError) {
        self.events.emit(error);
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn traced(&self) -> usize {
        self.traced.load(Ordering::SeqCst)
    }

    pub fn dispatches(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Target ids in dispatch order.
    pub fn targets(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|(id, _)| id.to_string()).collect()
    }

    pub fn messages(&self) -> Vec<RpcMessage> {
        self.calls.lock().unwrap().iter().map(|(_, m)| m.clone()).collect()
    }

    pub fn knows(&self, id: &str) -> bool {
        self.servers.lock().unwrap().contains_key(id)
    }

    fn report(&self, error: &TransportError, server_id: &ServerId, message: &RpcMessage) {
        let hook = self.hook.lock().unwrap().clone();
        if let Some(hook) = hook {
            hook(error, server_id, message);
        }
    }

    fn serve(&self, server_id: &ServerId, message: &RpcMessage) -> Result<Reply, TransportError> {
        if !self.servers.lock().unwrap().contains_key(server_id) {
            return Err(TransportError::new(TransportErrorKind::UnknownServer, Some(server_id.clone()), "unknown"));
        }
        self.filters.run_before(server_id, message)?;
        if self.failing.lock().unwrap().contains(server_id) {
            return Err(TransportError::new(TransportErrorKind::Remote, Some(server_id.clone()), "handler failed"));
        }
        let mut reply = vec![Value::Str(server_id.clone())];
        reply.extend(message.args().iter().cloned());
        Ok(reply)
    }
}

impl Transport for MockTransport {
    async fn start(&self) -> Result<(), TransportError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if self.refuse_start.load(Ordering::SeqCst) {
            return Err(TransportError::new(TransportErrorKind::Connect, None, "refused"));
        }
        Ok(())
    }

    async fn stop(&self, _force: bool) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }

    async fn dispatch(&self, trace: Option<CallTrace>, server_id: ServerId, message: RpcMessage, _options: DispatchOptions) -> Result<Reply, TransportError> {
        if trace.is_some() {
            self.traced.fetch_add(1, Ordering::SeqCst);
        }
        self.calls.lock().unwrap().push((server_id.clone(), message.clone()));
        loop {
            let released = self.released.notified();
            let still_held = self.held.lock().unwrap().contains(&server_id);
            if !still_held {
                break;
            }
            released.await;
        }
        tokio::task::yield_now().await;
        let result = self.serve(&server_id, &message);
        self.filters.run_after(&server_id, &message, &result);
        if let Err(err) = &result {
            self.report(err, &server_id, &message);
        }
        result
    }

    fn add_server(&self, info: Arc<ServerInfo>) {
        self.servers.lock().unwrap().insert(info.id.clone(), info);
    }

    fn remove_server(&self, id: &str) {
        self.servers.lock().unwrap().remove(id);
    }

    fn replace_servers(&self, infos: Vec<Arc<ServerInfo>>) {
        let mut servers = self.servers.lock().unwrap();
        servers.clear();
        for info in infos {
            servers.insert(info.id.clone(), info);
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
        *self.hook.lock().unwrap() = Some(handler);
    }
}

pub fn server(id: &'static str, server_type: &'static str) -> Arc<ServerInfo> {
    Arc::new(ServerInfo::new(id, server_type, "127.0.0.1", 3150))
}

pub fn weighted(id: &'static str, server_type: &'static str, weight: u32) -> Arc<ServerInfo> {
    Arc::new(ServerInfo::new(id, server_type, "127.0.0.1", 3150).with_weight(weight))
}

pub const CHAT_REMOTE: &str = "app/servers/chat/remote";
pub const AREA_REMOTE: &str = "app/servers/area/remote";

/// A loader exporting `chatRemote.{send,kick}` and `areaRemote.{enter,leave}`.
pub fn loader() -> StaticLoader {
    StaticLoader::new()
        .with_services(CHAT_REMOTE, vec![ServiceSpec::new("chatRemote").with_methods(["send", "kick"])])
        .with_services(AREA_REMOTE, vec![ServiceSpec::new("areaRemote").with_methods(["enter", "leave"])])
}

pub fn chat_descriptor() -> ServiceDescriptor {
    ServiceDescriptor::new("user", "chat", CHAT_REMOTE)
}

/// Route client logs to the test output; `RUST_LOG=meshrpc=debug` shows them.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A client over a [`MockTransport`] with the chat proxies registered.
pub fn client(options: ClientOptions) -> RpcClient<MockTransport> {
    init_tracing();
    let client = RpcClient::new(MockTransport::new(), options.with_loader(loader()));
    client.add_proxy(&chat_descriptor());
    client
}

/// Started [`client`] with `servers` known.
pub async fn started(options: ClientOptions, servers: Vec<Arc<ServerInfo>>) -> RpcClient<MockTransport> {
    let client = client(options);
    client.add_servers(servers);
    client.start().await.unwrap();
    client
}

/// The server id a unicast reply came from.
pub fn served_by(reply: &[Value]) -> String {
    reply.first().and_then(Value::as_str).unwrap_or_default().to_string()
}
