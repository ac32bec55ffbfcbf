// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//! Shared pieces of the example binaries: tracing setup and an in-process cluster.

use meshrpc::message::Reply;
use meshrpc::trace::CallTrace;
use meshrpc::transport::{DispatchOptions, ErrorEvents, ErrorHook, ErrorReceiver, Filter, FilterChain, Transport};
use meshrpc::{RpcMessage, ServerId, ServerInfo, TransportError, TransportErrorKind, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Initializes an env-filtered fmt subscriber. `RUST_LOG` overrides the default level.
pub fn init_tracing(service_name: &'static str) -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info,meshrpc=debug".into()))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init()?;
    tracing::info!("{service_name} tracing initialized");
    Ok(())
}

/// Answers `[server id, service.method, args...]` from inside the process.
///
/// Stands in for a cluster of remote servers, so the example runs without any.
#[derive(Default)]
pub struct LocalCluster {
    running: AtomicBool,
    servers: RwLock<HashMap<ServerId, Arc<ServerInfo>>>,
    filters: FilterChain,
    events: ErrorEvents,
    error_hook: RwLock<Option<ErrorHook>>,
}

impl LocalCluster {
    /// Returns an empty cluster.
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `server_id` as lost on the error channel, as a real transport would
    /// after its connection drops.
    pub fn crash(&self, server_id: &str) {
        self.servers.write().unwrap_or_else(PoisonError::into_inner).remove(server_id);
        self.events.emit(TransportError::new(
            TransportErrorKind::Disconnected,
            Some(ServerId::new(server_id)),
            "server crashed",
        ));
    }

    fn serve(&self, server_id: &ServerId, message: &RpcMessage) -> Result<Reply, TransportError> {
        if !self.running.load(Ordering::Acquire) {
            return Err(TransportError::new(TransportErrorKind::Closed, Some(server_id.clone()), "cluster is stopped"));
        }
        if !self.servers.read().unwrap_or_else(PoisonError::into_inner).contains_key(server_id) {
            return Err(TransportError::new(TransportErrorKind::UnknownServer, Some(server_id.clone()), "no such server"));
        }
        self.filters.run_before(server_id, message)?;
        let mut reply = vec![
            Value::Str(server_id.clone()),
            Value::from(format!("{}.{}", message.service(), message.method())),
        ];
        reply.extend(message.args().iter().cloned());
        Ok(reply)
    }
}

impl Transport for LocalCluster {
    async fn start(&self) -> Result<(), TransportError> {
        self.running.store(true, Ordering::Release);
        Ok(())
    }

    async fn stop(&self, _force: bool) {
        self.running.store(false, Ordering::Release);
    }

    async fn dispatch(&self, trace: Option<CallTrace>, server_id: ServerId, message: RpcMessage, _options: DispatchOptions) -> Result<Reply, TransportError> {
        if let Some(trace) = &trace {
            trace.annotate("local dispatch");
        }
        let result = self.serve(&server_id, &message);
        self.filters.run_after(&server_id, &message, &result);
        if let Err(err) = &result {
            let hook = self.error_hook.read().unwrap_or_else(PoisonError::into_inner).clone();
            if let Some(hook) = hook {
                hook(err, &server_id, &message);
            }
        }
        result
    }

    fn add_server(&self, info: Arc<ServerInfo>) {
        self.servers.write().unwrap_or_else(PoisonError::into_inner).insert(info.id.clone(), info);
    }

    fn remove_server(&self, id: &str) {
        self.servers.write().unwrap_or_else(PoisonError::into_inner).remove(id);
    }

    fn replace_servers(&self, infos: Vec<Arc<ServerInfo>>) {
        *self.servers.write().unwrap_or_else(PoisonError::into_inner) = infos.into_iter().map(|info| (info.id.clone(), info)).collect();
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
