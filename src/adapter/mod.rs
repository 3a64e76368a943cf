//! Transport adapter contract.
//!
//! The router and client only depend on this shape; whether the transport
//! is process-local, HTTP or a message queue is the surrounding system's
//! business. The channel string is the only required wire convention.
//!
//! トランスポートアダプタ契約

pub mod local;

use std::{future::Future, pin::Pin, sync::Arc, time::Duration};

use ahash::AHashMap as Map;
use serde_json::Value;

use crate::error::ClientError;
use crate::utils::method::Method;

pub use local::LocalAdapter;

/// Callback registered on a subscription.
pub type SubscriberFn =
    Arc<dyn Fn(Value) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Returned by `subscribe`; dropping the registration is explicit.
pub type UnsubscribeFn = Box<dyn FnOnce() + Send>;

/// One outbound request handed to the transport.
///
/// `method: None` marks an emit-style fire-and-forget dispatch.
pub struct AdapterRequest {
    pub method: Option<Method>,
    pub channel: String,
    pub data: Value,
    pub metadata: Map<String, Value>,
    pub timeout: Duration,
}

/// Pluggable message transport.
///
/// 差し替え可能なメッセージトランスポート
#[async_trait::async_trait]
pub trait Adapter: Send + Sync {
    async fn initialize(&self) -> Result<(), ClientError>;

    async fn dispose(&self) -> Result<(), ClientError>;

    fn is_ready(&self) -> bool;

    /// Send a request and resolve its response envelope.
    async fn request(&self, req: AdapterRequest) -> Result<Value, ClientError>;

    /// Publish to every transport-level subscriber of the channel.
    async fn publish(&self, channel: &str, data: Value) -> Result<(), ClientError>;

    /// Register a transport-level subscriber.
    fn subscribe(&self, channel: &str, callback: SubscriberFn) -> UnsubscribeFn;
}
