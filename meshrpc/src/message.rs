// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//!
//! RPC message and opaque argument values.

use bytes::Bytes;
use faststr::FastStr;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

/// An opaque argument or result value carried by an [`RpcMessage`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum Value {
    /// No value.
    #[default]
    Null,
    /// A boolean.
    Bool(bool),
    /// A signed integer.
    Int(i64),
    /// A float.
    Float(f64),
    /// A string.
    Str(FastStr),
    /// Raw bytes, already encoded by the caller.
    Bytes(Bytes),
    /// A list of values.
    List(Vec<Value>),
}

impl Value {
    /// Returns the string if this is a [`Value::Str`].
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// The text used when this value seeds a hash key.
    ///
    /// `Null` has no key; lists and bytes are keyed by their debug form.
    pub fn route_key(&self) -> Option<Cow<'_, str>> {
        match self {
            Value::Null => None,
            Value::Bool(b) => Some(Cow::Owned(b.to_string())),
            Value::Int(i) => Some(Cow::Owned(i.to_string())),
            Value::Float(f) => Some(Cow::Owned(f.to_string())),
            Value::Str(s) => Some(Cow::Borrowed(s.as_str())),
            Value::Bytes(_) | Value::List(_) => Some(Cow::Owned(format!("{self:?}"))),
        }
    }
}

impl From<&'static str> for Value {
    fn from(s: &'static str) -> Self {
        Value::Str(FastStr::from_static_str(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(FastStr::from_string(s))
    }
}

impl From<FastStr> for Value {
    fn from(s: FastStr) -> Self {
        Value::Str(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<Bytes> for Value {
    fn from(b: Bytes) -> Self {
        Value::Bytes(b)
    }
}

impl From<Vec<Value>> for Value {
    fn from(list: Vec<Value>) -> Self {
        Value::List(list)
    }
}

/// The values a remote method returns.
pub type Reply = Vec<Value>;

/// A message identifying exactly one remote operation.
///
/// Built once by [`RpcMessage::new`] and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcMessage {
    namespace: FastStr,
    server_type: FastStr,
    service: FastStr,
    method: FastStr,
    args: Vec<Value>,
}

impl RpcMessage {
    /// Creates a message.
    pub fn new(namespace: FastStr, server_type: FastStr, service: FastStr, method: FastStr, args: Vec<Value>) -> Self {
        Self {
            namespace,
            server_type,
            service,
            method,
            args,
        }
    }

    /// Proxy namespace, e.g. `sys` or `user`.
    #[inline]
    pub fn namespace(&self) -> &FastStr {
        &self.namespace
    }

    /// Target server type.
    #[inline]
    pub fn server_type(&self) -> &FastStr {
        &self.server_type
    }

    /// Remote service name.
    #[inline]
    pub fn service(&self) -> &FastStr {
        &self.service
    }

    /// Remote method name.
    #[inline]
    pub fn method(&self) -> &FastStr {
        &self.method
    }

    /// Call arguments, without the route key.
    #[inline]
    pub fn args(&self) -> &[Value] {
        &self.args
    }

    /// `namespace.service.method`
    pub fn route_path(&self) -> String {
        format!("{}.{}.{}", self.namespace, self.service, self.method)
    }
}

/// Every message travels as one tarpc request kind; the method is in the payload.
impl tarpc::RequestName for RpcMessage {
    fn name(&self) -> &'static str {
        "meshrpc.invoke"
    }
}
