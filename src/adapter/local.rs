//! Reference transport: in-process dispatch into a shared router plus a
//! process-local pub/sub fan-out.
//!
//! 参照実装トランスポート（プロセス内ディスパッチ + ローカルpub/sub）

use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU64, Ordering},
};

use ahash::AHashMap as Map;
use futures::future::join_all;
use log::debug;
use parking_lot::Mutex;
use serde_json::Value;

use crate::adapter::{Adapter, AdapterRequest, SubscriberFn, UnsubscribeFn};
use crate::error::{ClientError, ClientErrorKind};
use crate::kairo::Kairo;

type TopicMap = Map<String, Vec<(u64, SubscriberFn)>>;

/// In-process adapter bridging a client to a `Kairo` router.
pub struct LocalAdapter {
    router: Arc<Kairo>,
    ready: AtomicBool,
    topics: Arc<Mutex<TopicMap>>,
    next_id: AtomicU64,
}

impl LocalAdapter {
    pub fn new(router: Arc<Kairo>) -> LocalAdapter {
        LocalAdapter {
            router,
            ready: AtomicBool::new(true),
            topics: Arc::new(Mutex::new(Map::default())),
            next_id: AtomicU64::new(1),
        }
    }
}

#[async_trait::async_trait]
impl Adapter for LocalAdapter {
    async fn initialize(&self) -> Result<(), ClientError> {
        self.ready.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn dispose(&self) -> Result<(), ClientError> {
        self.ready.store(false, Ordering::SeqCst);
        self.topics.lock().clear();
        Ok(())
    }

    #[inline]
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn request(&self, req: AdapterRequest) -> Result<Value, ClientError> {
        if !self.is_ready() {
            return Err(ClientError::new(ClientErrorKind::Adapter(
                "adapter disposed".to_string(),
            ))
            .with_channel(&req.channel));
        }
        match req.method {
            Some(method) => self
                .router
                .execute(method, &req.channel, req.data, req.metadata)
                .await
                .map_err(ClientError::from),
            None => self
                .router
                .emit(&req.channel, req.data, req.metadata)
                .await
                .map(|_| Value::Null)
                .map_err(ClientError::from),
        }
    }

    async fn publish(&self, channel: &str, data: Value) -> Result<(), ClientError> {
        if !self.is_ready() {
            return Err(ClientError::new(ClientErrorKind::Adapter(
                "adapter disposed".to_string(),
            ))
            .with_channel(channel));
        }
        let callbacks: Vec<SubscriberFn> = self
            .topics
            .lock()
            .get(channel)
            .map(|subs| subs.iter().map(|(_, cb)| cb.clone()).collect())
            .unwrap_or_default();
        debug!("publishing to {} subscriber(s) on {}", callbacks.len(), channel);
        join_all(callbacks.into_iter().map(|cb| cb(data.clone()))).await;
        Ok(())
    }

    fn subscribe(&self, channel: &str, callback: SubscriberFn) -> UnsubscribeFn {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.topics
            .lock()
            .entry(channel.to_string())
            .or_default()
            .push((id, callback));

        let topics = self.topics.clone();
        let channel = channel.to_string();
        Box::new(move || {
            let mut topics = topics.lock();
            if let Some(subs) = topics.get_mut(&channel) {
                subs.retain(|(sub_id, _)| *sub_id != id);
                if subs.is_empty() {
                    topics.remove(&channel);
                }
            }
        })
    }
}
