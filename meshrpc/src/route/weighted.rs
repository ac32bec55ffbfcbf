// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//! Smooth weighted round-robin balance implemention

use super::Balance;
use crate::cluster::{ServerId, ServerInfo};
use crate::error::RouteError;
use dashmap::DashMap;
use faststr::FastStr;
use std::collections::HashMap;
use std::sync::Arc;

/// Smooth weighted round-robin.
///
/// On every pick each candidate's running weight grows by its weight, the
/// largest running weight wins (ties go to the earlier server) and the winner
/// pays back the total weight. Over `sum(weights)` picks each server is chosen
/// exactly `weight` times, spread out instead of in bursts. Servers with weight
/// 0 are never chosen.
#[derive(Debug, Default)]
pub struct WeightedBalance {
    running: DashMap<FastStr, HashMap<ServerId, i64>>,
}

impl WeightedBalance {
    /// Returns a [`WeightedBalance`] with no per-type state yet.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Balance for WeightedBalance {
    fn pick(&self, server_type: &FastStr, servers: &[Arc<ServerInfo>], _key: &str) -> Result<ServerId, RouteError> {
        let mut running = self.running.entry(server_type.clone()).or_default();
        running.retain(|id, _| servers.iter().any(|s| &s.id == id && s.weight > 0));

        let mut total = 0i64;
        let mut best: Option<(&ServerId, i64)> = None;
        for server in servers.iter().filter(|s| s.weight > 0) {
            let weight = i64::from(server.weight);
            total += weight;
            let current = running.entry(server.id.clone()).or_insert(0);
            *current += weight;
            if best.map_or(true, |(_, b)| *current > b) {
                best = Some((&server.id, *current));
            }
        }

        let (id, _) = best.ok_or_else(|| RouteError::NoServerAvailable(server_type.clone()))?;
        if let Some(current) = running.get_mut(id) {
            *current -= total;
        }
        Ok(id.clone())
    }
}
