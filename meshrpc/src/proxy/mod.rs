// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//!
//! Service proxies: descriptors, the loader that resolves them, the registry
//! that remembers them, and the handles callers invoke.
//!
//! A [`ServiceDescriptor`] names a namespace, a server type and a loader path.
//! The [`ServiceLoader`] turns the path into [`ServiceSpec`]s, whose methods are
//! merged into the [`ProxyRegistry`]. Callers then obtain a [`ServiceProxy`]
//! from the client and a [`MethodProxy`] from it:
//!
//! ```ignore
//! let forward = client.proxy("sys", "chat", "msgRemote").and_then(|p| p.method("forward"));
//! let outcome = forward.unwrap().call(vec!["uid-1".into(), "hello".into()]).await?;
//! ```

mod loader;

use crate::client::RpcClient;
use crate::cluster::ServerId;
use crate::error::RpcError;
use crate::message::{Reply, Value};
use crate::transport::Transport;
use faststr::FastStr;
pub use loader::{ServiceLoader, StaticLoader};
use std::collections::HashMap;
use std::fmt;
use std::sync::{PoisonError, RwLock};

/// One remote method.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodSpec {
    /// method name
    pub name: FastStr,
    /// Number of arguments after the route key, if the method declares it.
    pub arity: Option<usize>,
}

impl MethodSpec {
    /// A method accepting any number of arguments.
    pub fn new(name: impl Into<FastStr>) -> Self {
        Self { name: name.into(), arity: None }
    }

    /// Declare how many arguments follow the route key.
    pub fn with_arity(mut self, arity: usize) -> Self {
        self.arity = Some(arity);
        self
    }
}

/// One remote service and its methods.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSpec {
    /// service name, e.g. `chatRemote`
    pub name: FastStr,
    /// exported methods
    pub methods: Vec<MethodSpec>,
}

impl ServiceSpec {
    /// A service without methods.
    pub fn new(name: impl Into<FastStr>) -> Self {
        Self { name: name.into(), methods: Vec::new() }
    }

    /// Add a method.
    pub fn with_method(mut self, method: MethodSpec) -> Self {
        self.methods.push(method);
        self
    }

    /// Add methods accepting any number of arguments.
    pub fn with_methods<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<FastStr>,
    {
        self.methods.extend(names.into_iter().map(MethodSpec::new));
        self
    }
}

/// Where to load the proxies of one server type from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceDescriptor {
    /// proxy namespace, e.g. `sys` or `user`
    pub namespace: FastStr,
    /// target server type
    pub server_type: FastStr,
    /// loader path
    pub path: FastStr,
}

impl ServiceDescriptor {
    /// Creates a descriptor.
    pub fn new(namespace: impl Into<FastStr>, server_type: impl Into<FastStr>, path: impl Into<FastStr>) -> Self {
        Self {
            namespace: namespace.into(),
            server_type: server_type.into(),
            path: path.into(),
        }
    }

    /// Whether the descriptor names nothing usable.
    pub fn is_empty(&self) -> bool {
        self.namespace.is_empty() || self.server_type.is_empty()
    }
}

type Methods = HashMap<FastStr, MethodSpec>;

/// `namespace → server type → service → methods`.
///
/// Registering the same namespace and server type again merges the method sets.
#[derive(Default)]
pub struct ProxyRegistry {
    entries: RwLock<HashMap<FastStr, HashMap<FastStr, HashMap<FastStr, Methods>>>>,
}

impl ProxyRegistry {
    /// Returns an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge `services` under `namespace` and `server_type`, returning the number
    /// of methods that were not known before. A known method keeps its spec.
    pub fn merge(&self, namespace: &FastStr, server_type: &FastStr, services: Vec<ServiceSpec>) -> usize {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let by_service = entries.entry(namespace.clone()).or_default().entry(server_type.clone()).or_default();
        let mut added = 0;
        for service in services {
            let methods = by_service.entry(service.name).or_default();
            for method in service.methods {
                if !methods.contains_key(&method.name) {
                    methods.insert(method.name.clone(), method);
                    added += 1;
                }
            }
        }
        added
    }

    /// Look up one method.
    pub fn method(&self, namespace: &str, server_type: &str, service: &str, method: &str) -> Option<MethodSpec> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.get(namespace)?.get(server_type)?.get(service)?.get(method).cloned()
    }

    /// Methods of one service ordered by name, or `None` if the service is unknown.
    pub fn methods(&self, namespace: &str, server_type: &str, service: &str) -> Option<Vec<MethodSpec>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let mut methods: Vec<MethodSpec> = entries.get(namespace)?.get(server_type)?.get(service)?.values().cloned().collect();
        methods.sort_by(|a, b| a.name.as_str().cmp(b.name.as_str()));
        Some(methods)
    }

    /// Service names registered under `namespace` and `server_type`.
    pub fn services(&self, namespace: &str, server_type: &str) -> Vec<FastStr> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<FastStr> = entries
            .get(namespace)
            .and_then(|by_type| by_type.get(server_type))
            .map(|by_service| by_service.keys().cloned().collect())
            .unwrap_or_default();
        names.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        names
    }
}

/// The result of one successful proxy call.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// reply of a routed or single target call
    Unicast(Reply),
    /// replies of a `*` broadcast, in server-list order
    Broadcast(Vec<(ServerId, Reply)>),
}

impl Outcome {
    /// The reply of a single target call.
    pub fn into_unicast(self) -> Option<Reply> {
        match self {
            Outcome::Unicast(reply) => Some(reply),
            Outcome::Broadcast(_) => None,
        }
    }

    /// The replies of a broadcast.
    pub fn into_broadcast(self) -> Option<Vec<(ServerId, Reply)>> {
        match self {
            Outcome::Unicast(_) => None,
            Outcome::Broadcast(replies) => Some(replies),
        }
    }
}

/// A handle on one remote service of one server type.
pub struct ServiceProxy<T: Transport> {
    client: RpcClient<T>,
    namespace: FastStr,
    server_type: FastStr,
    service: FastStr,
}

impl<T: Transport> ServiceProxy<T> {
    pub(crate) fn new(client: RpcClient<T>, namespace: FastStr, server_type: FastStr, service: FastStr) -> Self {
        Self {
            client,
            namespace,
            server_type,
            service,
        }
    }

    /// The method routed by the client's strategy, or `None` if it is not registered.
    pub fn method(&self, name: &str) -> Option<MethodProxy<T>> {
        self.generate(name, false)
    }

    /// The method invoked on the server named by the route key, or on every
    /// server of the type for `*`.
    pub fn to_server(&self, name: &str) -> Option<MethodProxy<T>> {
        self.generate(name, true)
    }

    /// Registered methods, ordered by name.
    pub fn methods(&self) -> Vec<MethodSpec> {
        self.client
            .proxies()
            .methods(&self.namespace, &self.server_type, &self.service)
            .unwrap_or_default()
    }

    /// proxy namespace
    pub fn namespace(&self) -> &FastStr {
        &self.namespace
    }

    /// target server type
    pub fn server_type(&self) -> &FastStr {
        &self.server_type
    }

    /// remote service name
    pub fn service(&self) -> &FastStr {
        &self.service
    }

    fn generate(&self, name: &str, to_server: bool) -> Option<MethodProxy<T>> {
        let spec = self.client.proxies().method(&self.namespace, &self.server_type, &self.service, name)?;
        Some(MethodProxy {
            client: self.client.clone(),
            namespace: self.namespace.clone(),
            server_type: self.server_type.clone(),
            service: self.service.clone(),
            spec,
            to_server,
        })
    }
}

impl<T: Transport> Clone for ServiceProxy<T> {
    fn clone(&self) -> Self {
        Self::new(self.client.clone(), self.namespace.clone(), self.server_type.clone(), self.service.clone())
    }
}

impl<T: Transport> fmt::Debug for ServiceProxy<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceProxy")
            .field("namespace", &self.namespace)
            .field("server_type", &self.server_type)
            .field("service", &self.service)
            .finish()
    }
}

/// A callable remote method.
pub struct MethodProxy<T: Transport> {
    client: RpcClient<T>,
    namespace: FastStr,
    server_type: FastStr,
    service: FastStr,
    spec: MethodSpec,
    to_server: bool,
}

impl<T: Transport> MethodProxy<T> {
    /// Invoke the method.
    ///
    /// `args[0]` is the route key: the routing parameter in strategy mode, a
    /// server id or `*` in specified-target mode. The rest are the method
    /// arguments. The returned future stands in for the completion handler.
    pub async fn call(&self, args: Vec<Value>) -> Result<Outcome, RpcError> {
        self.client
            .proxy_call(&self.namespace, &self.server_type, &self.service, &self.spec, self.to_server, args)
            .await
    }

    /// The method spec.
    pub fn spec(&self) -> &MethodSpec {
        &self.spec
    }

    /// Whether this is the specified-target variant.
    pub fn is_to_server(&self) -> bool {
        self.to_server
    }
}

impl<T: Transport> Clone for MethodProxy<T> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            namespace: self.namespace.clone(),
            server_type: self.server_type.clone(),
            service: self.service.clone(),
            spec: self.spec.clone(),
            to_server: self.to_server,
        }
    }
}

impl<T: Transport> fmt::Debug for MethodProxy<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodProxy")
            .field("service", &self.service)
            .field("method", &self.spec.name)
            .field("to_server", &self.to_server)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(methods: Vec<MethodSpec>) -> Vec<String> {
        methods.into_iter().map(|m| m.name.to_string()).collect()
    }

    #[test]
    fn test_merge_is_union() {
        let registry = ProxyRegistry::new();
        let ns = FastStr::from_static_str("user");
        let st = FastStr::from_static_str("chat");
        assert_eq!(registry.merge(&ns, &st, vec![ServiceSpec::new("chatRemote").with_methods(["add", "leave"])]), 2);
        assert_eq!(registry.merge(&ns, &st, vec![ServiceSpec::new("chatRemote").with_methods(["kick", "add"])]), 1);

        assert_eq!(names(registry.methods("user", "chat", "chatRemote").unwrap()), vec!["add", "kick", "leave"]);
        assert!(registry.methods("user", "chat", "roomRemote").is_none());
    }

    #[test]
    fn test_merge_keeps_first_spec() {
        let registry = ProxyRegistry::new();
        let ns = FastStr::from_static_str("sys");
        let st = FastStr::from_static_str("area");
        registry.merge(&ns, &st, vec![ServiceSpec::new("areaRemote").with_method(MethodSpec::new("move").with_arity(2))]);
        registry.merge(&ns, &st, vec![ServiceSpec::new("areaRemote").with_methods(["move"])]);
        assert_eq!(registry.method("sys", "area", "areaRemote", "move").unwrap().arity, Some(2));
        assert_eq!(registry.services("sys", "area"), vec![FastStr::from_static_str("areaRemote")]);
    }

    #[test]
    fn test_descriptor_is_empty() {
        assert!(ServiceDescriptor::default().is_empty());
        assert!(ServiceDescriptor::new("user", "", "app/servers/chat/remote").is_empty());
        assert!(!ServiceDescriptor::new("user", "chat", "").is_empty());
    }
}
