// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//! Round-robin balance implemention

use super::Balance;
use crate::cluster::{ServerId, ServerInfo};
use crate::error::RouteError;
use dashmap::DashMap;
use faststr::FastStr;
use std::sync::Arc;

/// Cycles through the live server list of each server type in list order.
#[derive(Debug, Default)]
pub struct RoundRobinBalance {
    indexes: DashMap<FastStr, usize>,
}

impl RoundRobinBalance {
    /// Returns a [`RoundRobinBalance`] with no per-type state yet.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Balance for RoundRobinBalance {
    fn pick(&self, server_type: &FastStr, servers: &[Arc<ServerInfo>], _key: &str) -> Result<ServerId, RouteError> {
        if servers.is_empty() {
            return Err(RouteError::NoServerAvailable(server_type.clone()));
        }
        // The shard lock serializes read-modify-write of the index.
        let mut index = self.indexes.entry(server_type.clone()).or_default();
        let current = *index % servers.len();
        *index = (current + 1) % servers.len();
        Ok(servers[current].id.clone())
    }
}
