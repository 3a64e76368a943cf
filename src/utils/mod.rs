pub mod method;
pub mod trace;

/// Split a channel string into non-empty segments.
///
/// チャネル文字列をセグメントに分割する（空セグメントは捨てる）
#[inline]
pub fn split_channel(channel: &str, delimiter: char) -> Vec<&str> {
    channel
        .split(delimiter)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Split a route template into segments, keeping bracket groups intact.
///
/// A typed placeholder may itself contain the delimiter (`[id:number]`
/// under the default `:`), so the template side tracks bracket depth and
/// only splits at depth zero. Concrete channels carry no brackets and use
/// `split_channel`.
///
/// ルートテンプレートをセグメントに分割する（角括弧内は分割しない）
pub fn split_template(template: &str, delimiter: char) -> Vec<&str> {
    let mut out = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (i, ch) in template.char_indices() {
        match ch {
            '[' => depth += 1,
            ']' => depth = depth.saturating_sub(1),
            ch if ch == delimiter && depth == 0 => {
                if i > start {
                    out.push(&template[start..i]);
                }
                start = i + ch.len_utf8();
            }
            _ => {}
        }
    }
    if start < template.len() {
        out.push(&template[start..]);
    }
    out
}
