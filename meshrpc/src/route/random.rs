// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//! Random balance implemention

use super::Balance;
use crate::cluster::{ServerId, ServerInfo};
use crate::error::RouteError;
use faststr::FastStr;
use rand::Rng;
use std::sync::Arc;

/// Uniformly selects among the live server list.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomBalance;

impl RandomBalance {
    /// Returns a [`RandomBalance`].
    pub fn new() -> Self {
        Self
    }
}

impl Balance for RandomBalance {
    fn pick(&self, server_type: &FastStr, servers: &[Arc<ServerInfo>], _key: &str) -> Result<ServerId, RouteError> {
        if servers.is_empty() {
            return Err(RouteError::NoServerAvailable(server_type.clone()));
        }
        let index = rand::thread_rng().gen_range(0..servers.len());
        Ok(servers[index].id.clone())
    }
}
