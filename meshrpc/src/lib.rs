// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//!
//! meshrpc is the client-side RPC core of a service mesh.
//!
//! An [`RpcClient`] turns a logical service call, issued through a generated
//! [`proxy::MethodProxy`], into a dispatch to one concrete remote server. The
//! target is chosen by a routing strategy ([`route::RouterType`]) or a custom
//! [`route::Router`], or named explicitly. Transport-level failures are delivered
//! to a [`client::failure::FailureHandler`] instead of failing unrelated calls.
#![deny(missing_docs)]
#![allow(clippy::type_complexity)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod client;
pub mod cluster;
pub mod error;
pub mod message;
pub mod proxy;
pub mod route;
pub mod trace;
pub mod transport;

pub use client::{create_client, AppContext, ClientOptions, ClientState, RpcClient};
pub use cluster::{ServerId, ServerInfo, ServerRegistry};
pub use error::{RouteError, RpcError, TransportError, TransportErrorKind};
pub use message::{Reply, RpcMessage, Value};
pub use proxy::{MethodSpec, Outcome, ServiceDescriptor, ServiceSpec};

/// re-public `tarpc` context.
pub use ::tarpc::context;
