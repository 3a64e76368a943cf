use ahash::AHashMap as Map;
use serde_json::Value;

use crate::utils::trace::new_trace_id;

/// Per-dispatch request context.
///
/// Carries the channel, extracted params, the raw payload and
/// caller-supplied metadata. A trace id is generated when the caller did
/// not provide one under the `traceId` metadata key. One context belongs
/// to exactly one dispatch; pipeline stages share it read-only.
///
/// ディスパッチ単位のリクエストコンテキスト
pub struct RequestContext {
    pub channel: String,
    pub params: Map<String, Value>,
    pub payload: Value,
    pub metadata: Map<String, Value>,
    pub trace_id: String,
}

impl RequestContext {
    pub fn new(
        channel: &str,
        params: Map<String, Value>,
        payload: Value,
        metadata: Map<String, Value>,
    ) -> RequestContext {
        let trace_id = metadata
            .get("traceId")
            .and_then(|v| v.as_str())
            .map(String::from)
            .unwrap_or_else(new_trace_id);
        RequestContext {
            channel: channel.to_string(),
            params,
            payload,
            metadata,
            trace_id,
        }
    }

    /// 抽出済みパラメータを取得する
    #[inline]
    pub fn param(&self, name: &str) -> Option<&Value> {
        self.params.get(name)
    }

    #[inline]
    pub fn meta(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }
}
