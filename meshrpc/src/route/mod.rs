// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//!
//! Routing: built-in balance strategies and user supplied routers.

pub mod consistent_hash;
pub mod least_active;
pub mod random;
pub mod ring;
pub mod round_robin;
pub mod weighted;

use crate::cluster::{ServerId, ServerInfo};
use crate::error::RouteError;
use crate::message::{RpcMessage, Value};
pub use consistent_hash::ConsistentHashBalance;
use faststr::FastStr;
pub use least_active::{ActiveGuard, ActiveRequests, LeastActiveBalance};
pub use random::RandomBalance;
pub use round_robin::RoundRobinBalance;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
pub use weighted::WeightedBalance;

/// Read-only cluster lookup used by strategies that need the full membership
/// of a server type (consistent-hash, broadcast).
pub trait RouteContext: Send + Sync + 'static {
    /// Servers of `server_type` in a stable order, or `None` if none are known.
    fn servers_by_type(&self, server_type: &str) -> Option<Vec<Arc<ServerInfo>>>;
}

/// [`Balance`] promise the feature of a built-in routing strategy.
///
/// Implementations keep their state per server type, create it lazily on first
/// use, and must not lose updates under concurrent picks.
pub trait Balance: Send + Sync + 'static {
    /// Pick one server of `server_type` out of `servers`.
    ///
    /// `key` is the hash key of the call; only key based strategies look at it.
    fn pick(&self, server_type: &FastStr, servers: &[Arc<ServerInfo>], key: &str) -> Result<ServerId, RouteError>;
}

/// Built-in routing strategy names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RouterType {
    /// round-robin strategy
    RoundRobin,
    /// smooth weighted round-robin strategy
    WeightedRoundRobin,
    /// fewest in-flight requests
    LeastActive,
    /// consistent hashing strategy
    ConsistentHash,
    /// uniform random strategy
    #[default]
    Random,
}

impl RouterType {
    /// The configuration name of the strategy.
    pub fn as_str(&self) -> &'static str {
        match self {
            RouterType::RoundRobin => "round-robin",
            RouterType::WeightedRoundRobin => "weighted-round-robin",
            RouterType::LeastActive => "least-active",
            RouterType::ConsistentHash => "consistent-hash",
            RouterType::Random => "random",
        }
    }

    /// Whether the strategy reads membership from the [`RouteContext`] rather than
    /// the client's own server list.
    pub fn uses_route_context(&self) -> bool {
        matches!(self, RouterType::ConsistentHash)
    }

    /// Build the balancer for this strategy.
    pub fn new_balance(&self, active: Arc<ActiveRequests>) -> Box<dyn Balance> {
        match self {
            RouterType::RoundRobin => Box::new(RoundRobinBalance::new()),
            RouterType::WeightedRoundRobin => Box::new(WeightedBalance::new()),
            RouterType::LeastActive => Box::new(LeastActiveBalance::new(active)),
            RouterType::ConsistentHash => Box::new(ConsistentHashBalance::new()),
            RouterType::Random => Box::new(RandomBalance::new()),
        }
    }
}

impl fmt::Display for RouterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unknown names fall back to [`RouterType::Random`].
impl FromStr for RouterType {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "round-robin" | "rr" => RouterType::RoundRobin,
            "weighted-round-robin" | "wrr" => RouterType::WeightedRoundRobin,
            "least-active" | "la" => RouterType::LeastActive,
            "consistent-hash" | "ch" => RouterType::ConsistentHash,
            _ => RouterType::Random,
        })
    }
}

impl Serialize for RouterType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for RouterType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(name.parse().unwrap_or_default())
    }
}

/// A user supplied routing object.
pub trait Route: Send + Sync + 'static {
    /// Resolve the target server id of `message`.
    ///
    /// `param` is the route key the caller passed as the first proxy argument.
    fn route(&self, param: &Value, message: &RpcMessage, context: &dyn RouteContext) -> Result<ServerId, RouteError>;
}

/// A custom router: either a bare function or an object implementing [`Route`].
///
/// Both shapes resolve through [`Router::resolve`].
#[derive(Clone)]
pub enum Router {
    /// A plain routing function.
    Fn(Arc<dyn Fn(&Value, &RpcMessage, &dyn RouteContext) -> Result<ServerId, RouteError> + Send + Sync>),
    /// A routing object, called with itself as receiver.
    Object(Arc<dyn Route>),
}

impl Router {
    /// Wrap a routing function.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&Value, &RpcMessage, &dyn RouteContext) -> Result<ServerId, RouteError> + Send + Sync + 'static,
    {
        Router::Fn(Arc::new(f))
    }

    /// Wrap a routing object.
    pub fn from_route<R: Route>(route: R) -> Self {
        Router::Object(Arc::new(route))
    }

    /// Resolve the target server id of `message`.
    pub fn resolve(&self, param: &Value, message: &RpcMessage, context: &dyn RouteContext) -> Result<ServerId, RouteError> {
        match self {
            Router::Fn(f) => f(param, message, context),
            Router::Object(route) => route.route(param, message, context),
        }
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Router::Fn(_) => f.write_str("Router::Fn"),
            Router::Object(_) => f.write_str("Router::Object"),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::cluster::ServerRegistry;

    pub(crate) fn servers(spec: &[(&'static str, u32)]) -> Vec<Arc<ServerInfo>> {
        spec.iter()
            .map(|(id, weight)| Arc::new(ServerInfo::new(*id, "chat", "127.0.0.1", 3150).with_weight(*weight)))
            .collect()
    }

    #[test]
    fn test_router_type_from_str() {
        assert_eq!("round-robin".parse::<RouterType>().unwrap(), RouterType::RoundRobin);
        assert_eq!("weighted-round-robin".parse::<RouterType>().unwrap(), RouterType::WeightedRoundRobin);
        assert_eq!("least-active".parse::<RouterType>().unwrap(), RouterType::LeastActive);
        assert_eq!("consistent-hash".parse::<RouterType>().unwrap(), RouterType::ConsistentHash);
        assert_eq!("fastest".parse::<RouterType>().unwrap(), RouterType::Random);
    }

    struct FirstOfType;

    impl Route for FirstOfType {
        fn route(&self, _: &Value, message: &RpcMessage, context: &dyn RouteContext) -> Result<ServerId, RouteError> {
            context
                .servers_by_type(message.server_type())
                .and_then(|list| list.first().map(|s| s.id.clone()))
                .ok_or_else(|| RouteError::NoServerAvailable(message.server_type().clone()))
        }
    }

    #[test]
    fn test_router_shapes_resolve_alike() {
        let registry = ServerRegistry::new();
        registry.add_servers(&servers(&[("chat-1", 1), ("chat-2", 1)]));
        let message = RpcMessage::new("user".into(), "chat".into(), "chatRemote".into(), "add".into(), vec![]);

        let by_fn = Router::from_fn(|param, _, _| Ok(FastStr::new(format!("chat-{}", param.route_key().unwrap_or_default()))));
        let by_object = Router::from_route(FirstOfType);

        assert_eq!(by_fn.resolve(&Value::Int(2), &message, &registry).unwrap().as_str(), "chat-2");
        assert_eq!(by_object.resolve(&Value::Null, &message, &registry).unwrap().as_str(), "chat-1");
    }
}
