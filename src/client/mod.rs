//! Client facade: verb methods, interceptor chains, timeout/abort racing,
//! pub/sub fan-out and plugins over a pluggable adapter.
//!
//! クライアントファサード

use std::{
    future::Future,
    pin::Pin,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use ahash::AHashMap as Map;
use futures::future::join_all;
use log::debug;
use parking_lot::Mutex;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::adapter::{Adapter, AdapterRequest, SubscriberFn, UnsubscribeFn};
use crate::error::{ClientError, ClientErrorKind, ErrorEnvelope};
use crate::utils::{method::Method, trace::new_trace_id};

/// Request config as seen (and transformed) by request interceptors.
pub struct RequestConfig {
    pub method: Option<Method>,
    pub channel: String,
    pub data: Value,
    pub metadata: Map<String, Value>,
    pub timeout: Duration,
}

/// Successful response envelope.
#[derive(Debug)]
pub struct ClientResponse {
    pub data: Value,
    pub channel: String,
    pub metadata: Map<String, Value>,
    pub duration: Duration,
    pub trace_id: String,
}

pub type RequestInterceptor = Arc<
    dyn Fn(RequestConfig) -> Pin<Box<dyn Future<Output = Result<RequestConfig, ClientError>> + Send>>
        + Send
        + Sync,
>;
pub type ResponseInterceptor = Arc<
    dyn Fn(
            ClientResponse,
        ) -> Pin<Box<dyn Future<Output = Result<ClientResponse, ClientError>> + Send>>
        + Send
        + Sync,
>;
pub type ErrorInterceptor =
    Arc<dyn Fn(ClientError) -> Pin<Box<dyn Future<Output = ClientError> + Send>> + Send + Sync>;

/// Ordered interceptor list; `use_fn` appends.
pub struct InterceptorChain<T> {
    chain: Vec<T>,
}

impl<T> InterceptorChain<T> {
    fn new() -> InterceptorChain<T> {
        InterceptorChain { chain: Vec::new() }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.chain.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }
}

impl InterceptorChain<RequestInterceptor> {
    /// Append a request transformer.
    pub fn use_fn<F, Fut>(&mut self, interceptor: F)
    where
        F: Fn(RequestConfig) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<RequestConfig, ClientError>> + Send + 'static,
    {
        self.chain.push(Arc::new(move |config| {
            Box::pin(interceptor(config))
                as Pin<Box<dyn Future<Output = Result<RequestConfig, ClientError>> + Send>>
        }));
    }
}

impl InterceptorChain<ResponseInterceptor> {
    /// Append a response transformer.
    pub fn use_fn<F, Fut>(&mut self, interceptor: F)
    where
        F: Fn(ClientResponse) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ClientResponse, ClientError>> + Send + 'static,
    {
        self.chain.push(Arc::new(move |response| {
            Box::pin(interceptor(response))
                as Pin<Box<dyn Future<Output = Result<ClientResponse, ClientError>> + Send>>
        }));
    }
}

impl InterceptorChain<ErrorInterceptor> {
    /// Append an error transformer. Transformation only: the request
    /// still rejects with whatever comes out of the chain.
    pub fn use_fn<F, Fut>(&mut self, interceptor: F)
    where
        F: Fn(ClientError) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ClientError> + Send + 'static,
    {
        self.chain.push(Arc::new(move |err| {
            Box::pin(interceptor(err)) as Pin<Box<dyn Future<Output = ClientError> + Send>>
        }));
    }
}

/// The three interceptor chains, in the order they apply.
pub struct Interceptors {
    pub request: InterceptorChain<RequestInterceptor>,
    pub response: InterceptorChain<ResponseInterceptor>,
    pub error: InterceptorChain<ErrorInterceptor>,
}

impl Interceptors {
    fn new() -> Interceptors {
        Interceptors {
            request: InterceptorChain::new(),
            response: InterceptorChain::new(),
            error: InterceptorChain::new(),
        }
    }
}

/// Client configuration.
pub struct ClientConfig {
    /// Prepended (with the delimiter) to every outbound channel.
    pub base_channel: Option<String>,
    /// Default wall-clock timeout per request.
    pub timeout: Duration,
    pub delimiter: char,
}

impl Default for ClientConfig {
    fn default() -> ClientConfig {
        ClientConfig {
            base_channel: None,
            timeout: Duration::from_secs(30),
            delimiter: ':',
        }
    }
}

/// Per-call options.
pub struct RequestOptions {
    pub metadata: Map<String, Value>,
    pub timeout: Option<Duration>,
    pub abort: Option<CancellationToken>,
}

impl RequestOptions {
    #[inline]
    pub fn new() -> RequestOptions {
        RequestOptions {
            metadata: Map::default(),
            timeout: None,
            abort: None,
        }
    }

    pub fn meta(mut self, key: &str, value: Value) -> RequestOptions {
        self.metadata.insert(key.to_string(), value);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> RequestOptions {
        self.timeout = Some(timeout);
        self
    }

    /// Race the request against this token; cancelling it aborts the
    /// client-side wait, never the serving side.
    pub fn abort(mut self, token: CancellationToken) -> RequestOptions {
        self.abort = Some(token);
        self
    }
}

impl Default for RequestOptions {
    fn default() -> RequestOptions {
        RequestOptions::new()
    }
}

struct SubscriberEntry {
    id: u64,
    callback: SubscriberFn,
    adapter_unsubscribe: Option<UnsubscribeFn>,
}

type SubscriberMap = Map<String, Vec<SubscriberEntry>>;

/// Handle returned by `subscribe`.
pub struct Subscription {
    pub channel: String,
    id: u64,
    subscribers: Arc<Mutex<SubscriberMap>>,
}

impl Subscription {
    /// Remove this callback; the channel's set is dropped when empty.
    pub fn unsubscribe(self) {
        let mut subscribers = self.subscribers.lock();
        if let Some(entries) = subscribers.get_mut(&self.channel) {
            if let Some(pos) = entries.iter().position(|entry| entry.id == self.id) {
                let entry = entries.remove(pos);
                if let Some(unsubscribe) = entry.adapter_unsubscribe {
                    unsubscribe();
                }
            }
            if entries.is_empty() {
                subscribers.remove(&self.channel);
            }
        }
    }
}

/// Plugin installed onto a client (extra interceptors, defaults, ...).
pub trait Plugin {
    fn install(&self, client: &mut KairoClient);
}

/// Channel client over a pluggable transport adapter.
///
/// チャネルクライアント（トランスポート差し替え可能）
pub struct KairoClient {
    adapter: Arc<dyn Adapter>,
    config: ClientConfig,
    pub interceptors: Interceptors,
    subscribers: Arc<Mutex<SubscriberMap>>,
    next_subscriber_id: AtomicU64,
}

impl KairoClient {
    pub fn new(adapter: Arc<dyn Adapter>) -> KairoClient {
        KairoClient::with_config(adapter, ClientConfig::default())
    }

    pub fn with_config(adapter: Arc<dyn Adapter>, config: ClientConfig) -> KairoClient {
        KairoClient {
            adapter,
            config,
            interceptors: Interceptors::new(),
            subscribers: Arc::new(Mutex::new(Map::default())),
            next_subscriber_id: AtomicU64::new(1),
        }
    }

    /// Install a plugin.
    pub fn use_plugin(&mut self, plugin: &dyn Plugin) {
        plugin.install(self);
    }

    #[inline]
    pub fn adapter(&self) -> &Arc<dyn Adapter> {
        &self.adapter
    }

    /// Fully-qualified channel, base prefix applied.
    #[inline]
    fn qualify(&self, channel: &str) -> String {
        match &self.config.base_channel {
            Some(base) => format!("{}{}{}", base, self.config.delimiter, channel),
            None => channel.to_string(),
        }
    }

    // -- request/response --------------------------------------------

    pub async fn get(&self, channel: &str, data: Value, opts: RequestOptions) -> Result<ClientResponse, ClientError> {
        self.request(Some(Method::GET), channel, data, opts).await
    }

    pub async fn post(&self, channel: &str, data: Value, opts: RequestOptions) -> Result<ClientResponse, ClientError> {
        self.request(Some(Method::POST), channel, data, opts).await
    }

    pub async fn put(&self, channel: &str, data: Value, opts: RequestOptions) -> Result<ClientResponse, ClientError> {
        self.request(Some(Method::PUT), channel, data, opts).await
    }

    pub async fn patch(&self, channel: &str, data: Value, opts: RequestOptions) -> Result<ClientResponse, ClientError> {
        self.request(Some(Method::PATCH), channel, data, opts).await
    }

    pub async fn delete(&self, channel: &str, data: Value, opts: RequestOptions) -> Result<ClientResponse, ClientError> {
        self.request(Some(Method::DELETE), channel, data, opts).await
    }

    /// Fire-and-forget dispatch; the response envelope is discarded.
    pub async fn emit(&self, channel: &str, data: Value, opts: RequestOptions) -> Result<(), ClientError> {
        self.request(None, channel, data, opts).await.map(|_| ())
    }

    /// Publish through the adapter to every transport-level subscriber.
    pub async fn broadcast(&self, channel: &str, data: Value) -> Result<(), ClientError> {
        let channel = self.qualify(channel);
        self.adapter.publish(&channel, data).await
    }

    /// Send one request: trace id, request interceptors, base-channel
    /// prefixing, then the adapter call raced against the timeout and an
    /// optional abort token. Whichever settles first wins.
    ///
    /// リクエスト送信（タイムアウト・中断レース付き）
    pub async fn request(
        &self,
        method: Option<Method>,
        channel: &str,
        data: Value,
        opts: RequestOptions,
    ) -> Result<ClientResponse, ClientError> {
        let mut metadata = opts.metadata;
        let trace_id = metadata
            .get("traceId")
            .and_then(|v| v.as_str())
            .map(String::from)
            .unwrap_or_else(new_trace_id);
        metadata.insert("traceId".to_string(), Value::String(trace_id.clone()));

        let mut config = RequestConfig {
            method,
            channel: channel.to_string(),
            data,
            metadata,
            timeout: opts.timeout.unwrap_or(self.config.timeout),
        };
        for interceptor in &self.interceptors.request.chain {
            config = interceptor(config)
                .await
                .map_err(|e| e.with_channel(channel).with_trace_id(&trace_id))?;
        }

        let full_channel = self.qualify(&config.channel);
        let timeout = config.timeout;
        let started = Instant::now();
        debug!("-> {:?} {} trace_id={}", config.method, full_channel, trace_id);

        let call = self.adapter.request(AdapterRequest {
            method: config.method,
            channel: full_channel.clone(),
            data: config.data,
            metadata: config.metadata.clone(),
            timeout,
        });
        let outcome = tokio::select! {
            result = call => result.and_then(|data| match decode_error_envelope(&data) {
                Some(err) => Err(err),
                None => Ok(data),
            }),
            _ = tokio::time::sleep(timeout) => {
                Err(ClientError::new(ClientErrorKind::Timeout))
            }
            _ = wait_abort(opts.abort.as_ref()) => {
                Err(ClientError::new(ClientErrorKind::Aborted))
            }
        };

        match outcome {
            Ok(data) => {
                let mut response = ClientResponse {
                    data,
                    channel: full_channel.clone(),
                    metadata: config.metadata,
                    duration: started.elapsed(),
                    trace_id: trace_id.clone(),
                };
                for interceptor in &self.interceptors.response.chain {
                    response = interceptor(response)
                        .await
                        .map_err(|e| e.with_channel(&full_channel).with_trace_id(&trace_id))?;
                }
                Ok(response)
            }
            Err(err) => {
                let mut err = err;
                if err.channel.is_none() {
                    err = err.with_channel(&full_channel);
                }
                if err.trace_id.is_none() {
                    err = err.with_trace_id(&trace_id);
                }
                for interceptor in &self.interceptors.error.chain {
                    err = interceptor(err).await;
                }
                debug!("<- {} failed: {:?}", full_channel, err);
                Err(err)
            }
        }
    }

    // -- pub/sub -----------------------------------------------------

    /// Register a callback for a fully-qualified channel. The callback is
    /// also registered with the adapter so transport-level broadcasts
    /// reach it.
    pub fn subscribe<F, Fut>(&self, channel: &str, callback: F) -> Subscription
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let channel = self.qualify(channel);
        let callback: SubscriberFn = Arc::new(move |data| {
            Box::pin(callback(data)) as Pin<Box<dyn Future<Output = ()> + Send>>
        });

        let id = self.next_subscriber_id.fetch_add(1, Ordering::SeqCst);
        let adapter_unsubscribe = self.adapter.subscribe(&channel, callback.clone());
        self.subscribers
            .lock()
            .entry(channel.clone())
            .or_default()
            .push(SubscriberEntry {
                id,
                callback,
                adapter_unsubscribe: Some(adapter_unsubscribe),
            });

        Subscription {
            channel,
            id,
            subscribers: self.subscribers.clone(),
        }
    }

    /// Invoke every local callback registered for the channel,
    /// concurrently; completion order between callbacks is unspecified.
    ///
    /// ローカル購読者への同報（完了順は不定）
    pub async fn publish(&self, channel: &str, data: Value) {
        let channel = self.qualify(channel);
        let callbacks: Vec<SubscriberFn> = self
            .subscribers
            .lock()
            .get(&channel)
            .map(|entries| entries.iter().map(|e| e.callback.clone()).collect())
            .unwrap_or_default();
        join_all(callbacks.into_iter().map(|cb| cb(data.clone()))).await;
    }

    /// Drop every subscription on the channel.
    pub fn unsubscribe_all(&self, channel: &str) {
        let channel = self.qualify(channel);
        if let Some(entries) = self.subscribers.lock().remove(&channel) {
            for entry in entries {
                if let Some(unsubscribe) = entry.adapter_unsubscribe {
                    unsubscribe();
                }
            }
        }
    }

    /// Number of live subscriptions on a channel.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        let channel = self.qualify(channel);
        self.subscribers
            .lock()
            .get(&channel)
            .map(|entries| entries.len())
            .unwrap_or(0)
    }
}

/// Adapter-reported failures ride in the response envelope's `$error`
/// field; decode them back into typed client errors.
fn decode_error_envelope(data: &Value) -> Option<ClientError> {
    let envelope = data.get("$error")?;
    let envelope: ErrorEnvelope = serde_json::from_value(envelope.clone()).ok()?;
    Some(envelope.into_client_error())
}

/// Pends forever when no abort token was supplied.
async fn wait_abort(token: Option<&CancellationToken>) {
    match token {
        Some(token) => token.cancelled().await,
        None => std::future::pending().await,
    }
}
