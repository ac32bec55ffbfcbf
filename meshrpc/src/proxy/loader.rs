// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//! Resolves loader paths into service specs.

use super::ServiceSpec;
use crate::client::AppContext;
use faststr::FastStr;
use std::collections::HashMap;

/// [`ServiceLoader`] resolves the path of a [`super::ServiceDescriptor`] into the
/// services found there.
pub trait ServiceLoader: Send + Sync + 'static {
    /// Services at `path`, or `None` when nothing is found there.
    fn load(&self, path: &str, context: &AppContext) -> Option<Vec<ServiceSpec>>;
}

impl<F> ServiceLoader for F
where
    F: Fn(&str, &AppContext) -> Option<Vec<ServiceSpec>> + Send + Sync + 'static,
{
    fn load(&self, path: &str, context: &AppContext) -> Option<Vec<ServiceSpec>> {
        self(path, context)
    }
}

/// A loader backed by a fixed path table.
#[derive(Debug, Clone, Default)]
pub struct StaticLoader {
    services: HashMap<FastStr, Vec<ServiceSpec>>,
}

impl StaticLoader {
    /// Returns an empty loader.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register services under `path`, appending to what is already there.
    pub fn with_services(mut self, path: impl Into<FastStr>, services: Vec<ServiceSpec>) -> Self {
        self.services.entry(path.into()).or_default().extend(services);
        self
    }
}

impl ServiceLoader for StaticLoader {
    fn load(&self, path: &str, _context: &AppContext) -> Option<Vec<ServiceSpec>> {
        self.services.get(path).filter(|services| !services.is_empty()).cloned()
    }
}
