// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//!
//! Server information and the client's membership view.

use crate::route::RouteContext;
use faststr::FastStr;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Identifies one remote server process.
pub type ServerId = FastStr;

/// [`ServerInfo`] contains information of one remote server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    /// unique server id
    pub id: ServerId,
    /// server type, e.g. `connector` or `chat`
    pub server_type: FastStr,
    /// host to dial
    pub host: FastStr,
    /// port to dial
    pub port: u16,
    /// weight used by the weighted round-robin and consistent-hash strategies
    #[serde(default = "default_weight")]
    pub weight: u32,
    /// transport specific extension
    #[serde(default)]
    pub tags: HashMap<Cow<'static, str>, Cow<'static, str>>,
}

fn default_weight() -> u32 {
    1
}

impl ServerInfo {
    /// Creates a server info with weight 1 and no tags.
    pub fn new(id: impl Into<ServerId>, server_type: impl Into<FastStr>, host: impl Into<FastStr>, port: u16) -> Self {
        Self {
            id: id.into(),
            server_type: server_type.into(),
            host: host.into(),
            port,
            weight: default_weight(),
            tags: Default::default(),
        }
    }

    /// Set the weight.
    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    /// `host:port`
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Default)]
struct Members {
    by_type: HashMap<FastStr, Vec<Arc<ServerInfo>>>,
    types: HashMap<ServerId, FastStr>,
}

impl Members {
    fn insert(&mut self, info: Arc<ServerInfo>) {
        if let Some(old_type) = self.types.get(&info.id) {
            if old_type == &info.server_type {
                if let Some(list) = self.by_type.get_mut(old_type) {
                    if let Some(slot) = list.iter_mut().find(|s| s.id == info.id) {
                        *slot = info;
                        return;
                    }
                }
            } else {
                let old_type = old_type.clone();
                self.detach(&old_type, &info.id);
            }
        }
        self.types.insert(info.id.clone(), info.server_type.clone());
        self.by_type.entry(info.server_type.clone()).or_default().push(info);
    }

    fn remove(&mut self, id: &str) -> Option<Arc<ServerInfo>> {
        let server_type = self.types.remove(id)?;
        self.detach(&server_type, id)
    }

    fn detach(&mut self, server_type: &FastStr, id: &str) -> Option<Arc<ServerInfo>> {
        let list = self.by_type.get_mut(server_type)?;
        let pos = list.iter().position(|s| s.id.as_str() == id)?;
        let removed = list.remove(pos);
        if list.is_empty() {
            self.by_type.remove(server_type);
        }
        Some(removed)
    }
}

/// The client's view of cluster membership: server type to the ordered list of
/// servers of that type, in insertion order.
///
/// This is the live candidate list of the round-robin, weighted, least-active and
/// random strategies, and the default [`RouteContext`].
#[derive(Default)]
pub struct ServerRegistry {
    members: RwLock<Members>,
}

impl ServerRegistry {
    /// Returns an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a server, or update it in place if the id is already known.
    pub fn add_server(&self, info: Arc<ServerInfo>) {
        self.members.write().unwrap_or_else(PoisonError::into_inner).insert(info);
    }

    /// Add many servers.
    pub fn add_servers(&self, infos: &[Arc<ServerInfo>]) {
        let mut members = self.members.write().unwrap_or_else(PoisonError::into_inner);
        for info in infos {
            members.insert(info.clone());
        }
    }

    /// Remove a server by id, returning it if it was known.
    pub fn remove_server(&self, id: &str) -> Option<Arc<ServerInfo>> {
        self.members.write().unwrap_or_else(PoisonError::into_inner).remove(id)
    }

    /// Remove many servers by id.
    pub fn remove_servers(&self, ids: &[ServerId]) {
        let mut members = self.members.write().unwrap_or_else(PoisonError::into_inner);
        for id in ids {
            members.remove(id);
        }
    }

    /// Replace the whole membership.
    pub fn replace_servers(&self, infos: &[Arc<ServerInfo>]) {
        let mut members = Members::default();
        for info in infos {
            members.insert(info.clone());
        }
        *self.members.write().unwrap_or_else(PoisonError::into_inner) = members;
    }

    /// Look up a server by id.
    pub fn get(&self, id: &str) -> Option<Arc<ServerInfo>> {
        let members = self.members.read().unwrap_or_else(PoisonError::into_inner);
        let server_type = members.types.get(id)?;
        members.by_type.get(server_type)?.iter().find(|s| s.id.as_str() == id).cloned()
    }

    /// Servers of one type, in insertion order. Empty if the type is unknown.
    pub fn servers(&self, server_type: &str) -> Vec<Arc<ServerInfo>> {
        self.members
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .by_type
            .get(server_type)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of known servers.
    pub fn len(&self) -> usize {
        self.members.read().unwrap_or_else(PoisonError::into_inner).types.len()
    }

    /// Whether no server is known.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RouteContext for ServerRegistry {
    fn servers_by_type(&self, server_type: &str) -> Option<Vec<Arc<ServerInfo>>> {
        let servers = self.servers(server_type);
        if servers.is_empty() {
            None
        } else {
            Some(servers)
        }
    }
}
