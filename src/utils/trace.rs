/// Generate a fresh trace id.
///
/// トレースIDの生成
#[inline]
pub fn new_trace_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
