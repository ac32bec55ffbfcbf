// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//! Client construction options.

use super::failure::{FailureHandler, LogFailure};
use crate::cluster::ServerInfo;
use crate::proxy::{ServiceLoader, StaticLoader};
use crate::route::{RouteContext, Router, RouterType};
use crate::transport::codec::Codec;
use faststr::FastStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::Span;

/// The embedding application's execution context.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppContext {
    server_id: FastStr,
    server_type: FastStr,
    env: FastStr,
}

impl AppContext {
    /// Context of the process `server_id` of type `server_type`.
    pub fn new(server_id: impl Into<FastStr>, server_type: impl Into<FastStr>) -> Self {
        Self {
            server_id: server_id.into(),
            server_type: server_type.into(),
            env: FastStr::empty(),
        }
    }

    /// Set the deployment environment, e.g. `development`.
    pub fn with_env(mut self, env: impl Into<FastStr>) -> Self {
        self.env = env.into();
        self
    }

    /// Id of the local process; the default client id.
    pub fn server_id(&self) -> &FastStr {
        &self.server_id
    }

    /// Server type of the local process.
    pub fn server_type(&self) -> &FastStr {
        &self.server_type
    }

    /// Deployment environment.
    pub fn env(&self) -> &FastStr {
        &self.env
    }
}

/// Options of one [`RpcClient`](super::RpcClient).
#[non_exhaustive]
pub struct ClientOptions {
    pub(crate) context: AppContext,
    pub(crate) route_context: Option<Arc<dyn RouteContext>>,
    pub(crate) router: Option<Router>,
    pub(crate) router_type: Option<RouterType>,
    pub(crate) debug: bool,
    pub(crate) client_id: Option<FastStr>,
    pub(crate) servers: Vec<Arc<ServerInfo>>,
    pub(crate) failure_handler: Arc<dyn FailureHandler>,
    pub(crate) loader: Arc<dyn ServiceLoader>,
    pub(crate) hash_field_index: Option<usize>,
    pub(crate) timeout: Option<Duration>,
    pub(crate) codec: Codec,
    pub(crate) span: Option<Span>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            context: AppContext::default(),
            route_context: None,
            router: None,
            router_type: None,
            debug: false,
            client_id: None,
            servers: Vec::new(),
            failure_handler: Arc::new(LogFailure),
            loader: Arc::new(StaticLoader::new()),
            hash_field_index: None,
            timeout: None,
            codec: Codec::default(),
            span: None,
        }
    }
}

impl ClientOptions {
    /// Returns the default options.
    pub fn new() -> Self {
        Self::default()
    }
    /// Set the application context. Its server id is the default client id.
    pub fn with_context(mut self, context: AppContext) -> Self {
        self.context = context;
        self
    }
    /// Set the membership lookup used by consistent-hash routing, broadcasts and
    /// custom routers. Defaults to the client's own server registry.
    pub fn with_route_context(mut self, route_context: Arc<dyn RouteContext>) -> Self {
        self.route_context = Some(route_context);
        self
    }
    /// Set a custom router. Ignored when a router type is set.
    pub fn with_router(mut self, router: Router) -> Self {
        self.router = Some(router);
        self
    }
    /// Set the built-in routing strategy.
    pub fn with_router_type(mut self, router_type: RouterType) -> Self {
        self.router_type = Some(router_type);
        self
    }
    /// Trace every direct invoke.
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }
    /// Override the client id.
    pub fn with_client_id(mut self, client_id: impl Into<FastStr>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }
    /// Servers known before the client starts.
    pub fn with_servers(mut self, servers: Vec<Arc<ServerInfo>>) -> Self {
        self.servers = servers;
        self
    }
    /// Set the handler of out-of-band transport errors.
    /// Default is [`LogFailure`].
    pub fn with_failure_handler<H: FailureHandler>(mut self, handler: H) -> Self {
        self.failure_handler = Arc::new(handler);
        self
    }
    /// Set the loader resolving proxy descriptors.
    pub fn with_loader<L: ServiceLoader>(mut self, loader: L) -> Self {
        self.loader = Arc::new(loader);
        self
    }
    /// Seed consistent-hash keys from the message argument at `index`.
    pub fn with_hash_field_index(mut self, index: usize) -> Self {
        self.hash_field_index = Some(index);
        self
    }
    /// Ask the transport to give up on a reply after `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
    /// Set transport serde codec
    pub fn with_codec(mut self, codec: Codec) -> Self {
        self.codec = codec;
        self
    }
    /// Set the span the client logs under.
    /// Default is a `meshrpc.client` span carrying the client id.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }
    /// The application context.
    pub fn context(&self) -> &AppContext {
        &self.context
    }
    /// The configured transport codec.
    pub fn codec(&self) -> Codec {
        self.codec
    }
}
