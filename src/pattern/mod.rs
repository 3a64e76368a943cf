//! Segment pattern compiler (escaped literals + typed capture groups)
//!
//! セグメントパターンコンパイラ（リテラルエスケープ + 型付きキャプチャ）

use std::sync::Arc;

use ahash::AHashMap as Map;
use log::warn;
use parking_lot::Mutex;
use regex::Regex;
use serde_json::Value;
use smallvec::SmallVec;

/// Declared type of a channel parameter.
///
/// Each type fixes the capture-group regex used during matching and the
/// coercion rule applied to the captured text afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    Str,
    Number,
    Boolean,
    DateTime,
    Uuid,
    Email,
    Slug,
    Ipv4,
    Alpha,
    Alphanumeric,
}

impl ParamType {
    /// 宣言文字列から型を得る（未知の型はstring扱い）
    #[inline]
    pub fn from_decl(decl: &str) -> ParamType {
        match decl {
            "string" => ParamType::Str,
            "number" => ParamType::Number,
            "boolean" => ParamType::Boolean,
            "datetime" => ParamType::DateTime,
            "uuid" => ParamType::Uuid,
            "email" => ParamType::Email,
            "slug" => ParamType::Slug,
            "ipv4" => ParamType::Ipv4,
            "alpha" => ParamType::Alpha,
            "alphanumeric" => ParamType::Alphanumeric,
            other => {
                warn!("unknown param type \"{}\", falling back to string", other);
                ParamType::Str
            }
        }
    }

    /// Capture-group regex fragment for this type.
    ///
    /// `Str` is delimiter-dependent (a segment never contains the channel
    /// delimiter) and is produced by the compiler instead.
    #[inline]
    fn capture(&self) -> &'static str {
        match self {
            ParamType::Str => unreachable!("Str capture is delimiter-dependent"),
            ParamType::Number => r"-?\d+(?:\.\d+)?",
            ParamType::Boolean => r"true|false",
            ParamType::DateTime => r"\d{4}-\d{2}-\d{2}(?:T\d{2}:\d{2}:\d{2}(?:\.\d+)?(?:Z|[+-]\d{2}:\d{2})?)?",
            ParamType::Uuid => r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}",
            ParamType::Email => r"[^\s@]+@[^\s@]+\.[^\s@]+",
            ParamType::Slug => r"[a-z0-9]+(?:-[a-z0-9]+)*",
            ParamType::Ipv4 => r"(?:\d{1,3}\.){3}\d{1,3}",
            ParamType::Alpha => r"[a-zA-Z]+",
            ParamType::Alphanumeric => r"[a-zA-Z0-9]+",
        }
    }

    /// Coerce a captured value per its declared type.
    ///
    /// Numbers and datetimes fall back to the raw string when unparseable;
    /// shape-only types keep the validated text unchanged.
    ///
    /// キャプチャ文字列を宣言型に変換する
    pub fn coerce(&self, raw: &str) -> Value {
        match self {
            ParamType::Number => {
                if let Ok(n) = raw.parse::<i64>() {
                    return Value::from(n);
                }
                if let Ok(n) = raw.parse::<f64>() {
                    if let Some(num) = serde_json::Number::from_f64(n) {
                        return Value::Number(num);
                    }
                }
                Value::String(raw.to_string())
            }
            ParamType::Boolean => Value::Bool(raw.eq_ignore_ascii_case("true")),
            ParamType::DateTime => {
                if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(raw) {
                    return Value::String(dt.to_rfc3339());
                }
                if chrono::NaiveDate::parse_from_str(raw, "%Y-%m-%d").is_ok() {
                    return Value::String(raw.to_string());
                }
                Value::String(raw.to_string())
            }
            _ => Value::String(raw.to_string()),
        }
    }
}

/// One named placeholder of a segment template.
#[derive(Debug, Clone)]
pub struct Param {
    pub name: Box<str>,
    pub ty: ParamType,
}

/// Compiled form of one parametric segment template.
///
/// `regex` is `None` only for the legacy colon-form (`:name`), which
/// unconditionally accepts the whole segment as a string.
pub struct SegmentPattern {
    /// The literal template this pattern was compiled from.
    pub template: Box<str>,
    /// Placeholders in left-to-right order, one capture group each.
    pub params: SmallVec<[Param; 2]>,
    pub regex: Option<Regex>,
}

impl SegmentPattern {
    /// Match a concrete segment, returning coerced `(name, value)` pairs.
    ///
    /// 具体セグメントを照合し、型変換済みパラメータを返す
    pub fn capture(&self, segment: &str) -> Option<SmallVec<[(Box<str>, Value); 2]>> {
        let regex = match &self.regex {
            Some(regex) => regex,
            // legacy colon-form: whole segment, always a string
            None => {
                let param = &self.params[0];
                let mut out = SmallVec::new();
                out.push((param.name.clone(), Value::String(segment.to_string())));
                return Some(out);
            }
        };
        let caps = regex.captures(segment)?;
        let mut out = SmallVec::new();
        for (i, param) in self.params.iter().enumerate() {
            let raw = caps.get(i + 1)?.as_str();
            out.push((param.name.clone(), param.ty.coerce(raw)));
        }
        Some(out)
    }
}

/// Compiles segment templates and caches the result per literal template.
///
/// The cache is owned by the compiler instance (one per router), not
/// process-global, so routers stay independently testable. The key is the
/// exact template string; equivalent-but-different spellings compile twice.
pub struct PatternCompiler {
    delimiter: char,
    cache: Mutex<Map<Box<str>, Arc<SegmentPattern>>>,
}

impl PatternCompiler {
    #[inline]
    pub fn new(delimiter: char) -> PatternCompiler {
        PatternCompiler {
            delimiter,
            cache: Mutex::new(Map::default()),
        }
    }

    /// Untyped capture for this compiler's delimiter.
    #[inline]
    fn str_capture(&self) -> String {
        format!("[^{}]+", regex::escape(&self.delimiter.to_string()))
    }

    /// Compile a segment template, or return `None` for a static segment.
    ///
    /// Literal text around and between placeholders is regex-escaped, the
    /// whole expression is anchored at both ends, and the compiled pattern
    /// is cached by the template string.
    ///
    /// セグメントテンプレートをコンパイルする（静的セグメントはNone）
    pub fn compile(&self, segment: &str) -> Option<Arc<SegmentPattern>> {
        // legacy colon-form: ":name" takes the whole segment as one param
        if let Some(name) = segment.strip_prefix(':') {
            if !name.is_empty() && !segment.contains('[') {
                return Some(self.cached(segment, |_| SegmentPattern {
                    template: segment.into(),
                    params: {
                        let mut params = SmallVec::new();
                        params.push(Param { name: name.into(), ty: ParamType::Str });
                        params
                    },
                    regex: None,
                }));
            }
        }

        if !segment.contains('[') || !segment.contains(']') {
            return None;
        }

        Some(self.cached(segment, |compiler| compiler.build(segment)))
    }

    #[inline]
    fn cached<F>(&self, template: &str, build: F) -> Arc<SegmentPattern>
    where
        F: FnOnce(&PatternCompiler) -> SegmentPattern,
    {
        let mut cache = self.cache.lock();
        if let Some(pattern) = cache.get(template) {
            return pattern.clone();
        }
        let pattern = Arc::new(build(self));
        cache.insert(template.into(), pattern.clone());
        pattern
    }

    fn build(&self, segment: &str) -> SegmentPattern {
        let mut params: SmallVec<[Param; 2]> = SmallVec::new();
        let mut source = String::with_capacity(segment.len() + 8);
        source.push('^');

        let mut rest = segment;
        while let Some(open) = rest.find('[') {
            let (literal, tail) = rest.split_at(open);
            source.push_str(&regex::escape(literal));
            let close = match tail.find(']') {
                Some(close) => close,
                None => {
                    // unbalanced bracket, keep the remainder literal
                    source.push_str(&regex::escape(tail));
                    rest = "";
                    break;
                }
            };
            let body = &tail[1..close];
            let (name, ty) = match body.split_once(':') {
                Some((name, decl)) => (name, ParamType::from_decl(decl)),
                None => (body, ParamType::Str),
            };
            source.push('(');
            match ty {
                ParamType::Str => source.push_str(&self.str_capture()),
                other => source.push_str(other.capture()),
            }
            source.push(')');
            params.push(Param { name: name.into(), ty });
            rest = &tail[close + 1..];
        }
        source.push_str(&regex::escape(rest));
        source.push('$');

        // escaped literals + fixed fragments: this can only fail on a
        // compiler bug, so surface it loudly at registration time
        let regex = Regex::new(&source)
            .unwrap_or_else(|e| panic!("invalid segment pattern {:?}: {}", segment, e));

        SegmentPattern {
            template: segment.into(),
            params,
            regex: Some(regex),
        }
    }
}
