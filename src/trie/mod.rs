//! Channel trie (static children by key, one param child, one wild child)
//!
//! チャネルトライ（静的子はキー引き、パラメータ子とワイルドカード子は各1つ）

pub mod cache;
pub mod matcher;

use std::sync::Arc;

use ahash::AHashMap as Map;
use log::warn;
use serde_json::Value;

use crate::{
    dispatch::{BoxedGuard, BoxedHandler, BoxedMiddleware, BoxedSchema, Controller},
    pattern::SegmentPattern,
    utils::method::Method,
};

pub use matcher::RouteMatch;

/// One segment of a route template after compilation.
pub enum CompiledSegment {
    Static(Box<str>),
    Pattern(Arc<SegmentPattern>),
    Wildcard,
}

/// One node of the channel trie.
///
/// Endpoint data (handler, controllers, middleware, guards, schema) is
/// only meaningful when `is_endpoint` is set.
pub struct TrieNode {
    pub(crate) fixed: Map<Box<str>, Box<TrieNode>>,
    pub(crate) param_child: Option<Box<TrieNode>>,
    pub(crate) wild_child: Option<Box<TrieNode>>,
    /// Set on a param child; carries the compiled template.
    pub(crate) pattern: Option<Arc<SegmentPattern>>,
    pub(crate) is_endpoint: bool,
    pub(crate) handler: Option<Arc<BoxedHandler>>,
    pub(crate) controllers: Map<Method, Arc<Controller>>,
    pub(crate) middleware: Vec<Arc<BoxedMiddleware>>,
    pub(crate) guards: Vec<Arc<BoxedGuard>>,
    pub(crate) schema: Option<Arc<BoxedSchema>>,
}

impl TrieNode {
    fn new() -> TrieNode {
        TrieNode {
            fixed: Map::default(),
            param_child: None,
            wild_child: None,
            pattern: None,
            is_endpoint: false,
            handler: None,
            controllers: Map::default(),
            middleware: Vec::new(),
            guards: Vec::new(),
            schema: None,
        }
    }
}

/// Endpoint data applied to the terminal node of an insertion.
pub struct Endpoint {
    pub handler: Option<Arc<BoxedHandler>>,
    pub controllers: Map<Method, Arc<Controller>>,
    pub middleware: Vec<Arc<BoxedMiddleware>>,
    pub guards: Vec<Arc<BoxedGuard>>,
    pub schema: Option<Arc<BoxedSchema>>,
}

/// Prefix tree of route templates.
pub struct Trie {
    root: TrieNode,
}

impl Trie {
    pub fn new() -> Trie {
        Trie { root: TrieNode::new() }
    }

    /// Register an endpoint at the node addressed by `segments`.
    ///
    /// Re-registering the same path unions the endpoint data: handler and
    /// schema overwrite when given, controller maps union, middleware and
    /// guard lists concatenate (same policy as `merge`). A parametric
    /// segment reuses the node's single parametric slot; when templates
    /// differ the first registration wins and the conflict is logged. A
    /// wildcard terminates the walk; trailing template segments are
    /// unreachable and logged.
    ///
    /// ルートを登録する（同一パスへの再登録は合成）
    pub fn insert(&mut self, segments: &[CompiledSegment], endpoint: Endpoint) {
        let node = walk_insert(&mut self.root, segments);
        node.is_endpoint = true;
        if endpoint.handler.is_some() {
            node.handler = endpoint.handler;
        }
        for (method, controller) in endpoint.controllers {
            node.controllers.insert(method, controller);
        }
        node.middleware.extend(endpoint.middleware);
        node.guards.extend(endpoint.guards);
        if endpoint.schema.is_some() {
            node.schema = endpoint.schema;
        }
    }

    /// Splice another trie's routes under `prefix`.
    ///
    /// Endpoint data is combined (handler and schema overwrite, controller
    /// maps union, middleware/guard lists concatenate) and children are
    /// recursively unioned. `inherited_middleware`/`inherited_guards` are
    /// the source router's global lists, folded into every spliced
    /// endpoint so merged routes keep their pipeline.
    ///
    /// 別トライのルートをプレフィックス配下に合成する
    pub fn merge(
        &mut self,
        other: Trie,
        prefix: &[CompiledSegment],
        inherited_middleware: &[Arc<BoxedMiddleware>],
        inherited_guards: &[Arc<BoxedGuard>],
    ) {
        let anchor = walk_insert(&mut self.root, prefix);
        merge_node(anchor, other.root, inherited_middleware, inherited_guards);
    }

    /// Depth-first enumeration of every registered template.
    ///
    /// 登録済みテンプレートの列挙（デバッグ・内省用）
    pub fn collect_routes(&self, delimiter: char) -> Vec<String> {
        let mut out = Vec::new();
        let mut path: Vec<String> = Vec::new();
        collect(&self.root, delimiter, &mut path, &mut out);
        out
    }

    /// Match a channel against the trie, extracting coerced params.
    #[inline]
    pub fn match_segments<'a>(
        &'a self,
        segments: &[&str],
    ) -> Option<(&'a TrieNode, Map<String, Value>)> {
        matcher::match_segments(&self.root, segments)
    }
}

fn walk_insert<'a>(mut node: &'a mut TrieNode, segments: &[CompiledSegment]) -> &'a mut TrieNode {
    for (i, segment) in segments.iter().enumerate() {
        match segment {
            CompiledSegment::Static(key) => {
                node = node
                    .fixed
                    .entry(key.clone())
                    .or_insert_with(|| Box::new(TrieNode::new()))
                    .as_mut();
            }
            CompiledSegment::Pattern(pattern) => {
                let child = node.param_child.get_or_insert_with(|| {
                    let mut child = TrieNode::new();
                    child.pattern = Some(pattern.clone());
                    Box::new(child)
                });
                // single parametric slot per depth: first registration wins
                if let Some(existing) = &child.pattern {
                    if existing.template != pattern.template {
                        warn!(
                            "parametric slot already holds {:?}, ignoring template {:?}",
                            existing.template, pattern.template
                        );
                    }
                }
                node = child.as_mut();
            }
            CompiledSegment::Wildcard => {
                if i + 1 < segments.len() {
                    warn!("template segments after a wildcard are unreachable");
                }
                node = node
                    .wild_child
                    .get_or_insert_with(|| Box::new(TrieNode::new()))
                    .as_mut();
                break;
            }
        }
    }
    node
}

fn merge_node(
    dst: &mut TrieNode,
    src: TrieNode,
    inherited_middleware: &[Arc<BoxedMiddleware>],
    inherited_guards: &[Arc<BoxedGuard>],
) {
    if src.is_endpoint {
        dst.is_endpoint = true;
        if src.handler.is_some() {
            dst.handler = src.handler;
        }
        for (method, controller) in src.controllers {
            dst.controllers.insert(method, controller);
        }
        dst.middleware.extend(inherited_middleware.iter().cloned());
        dst.middleware.extend(src.middleware);
        dst.guards.extend(inherited_guards.iter().cloned());
        dst.guards.extend(src.guards);
        if src.schema.is_some() {
            dst.schema = src.schema;
        }
    }

    for (key, child) in src.fixed {
        let entry = dst
            .fixed
            .entry(key)
            .or_insert_with(|| Box::new(TrieNode::new()))
            .as_mut();
        merge_node(entry, *child, inherited_middleware, inherited_guards);
    }

    if let Some(src_child) = src.param_child {
        match &mut dst.param_child {
            None => {
                let mut child = Box::new(TrieNode::new());
                child.pattern = src_child.pattern.clone();
                merge_node(child.as_mut(), *src_child, inherited_middleware, inherited_guards);
                dst.param_child = Some(child);
            }
            Some(dst_child) => {
                if let (Some(a), Some(b)) = (&dst_child.pattern, &src_child.pattern) {
                    if a.template != b.template {
                        warn!(
                            "parametric slot already holds {:?}, ignoring template {:?}",
                            a.template, b.template
                        );
                    }
                }
                merge_node(dst_child.as_mut(), *src_child, inherited_middleware, inherited_guards);
            }
        }
    }

    if let Some(src_child) = src.wild_child {
        let dst_child = dst
            .wild_child
            .get_or_insert_with(|| Box::new(TrieNode::new()))
            .as_mut();
        merge_node(dst_child, *src_child, inherited_middleware, inherited_guards);
    }
}

fn collect(node: &TrieNode, delimiter: char, path: &mut Vec<String>, out: &mut Vec<String>) {
    if node.is_endpoint {
        out.push(path.join(&delimiter.to_string()));
    }
    for (key, child) in &node.fixed {
        path.push(key.to_string());
        collect(child, delimiter, path, out);
        path.pop();
    }
    if let Some(child) = &node.param_child {
        let label = child
            .pattern
            .as_ref()
            .map(|p| p.template.to_string())
            .unwrap_or_default();
        path.push(label);
        collect(child, delimiter, path, out);
        path.pop();
    }
    if let Some(child) = &node.wild_child {
        path.push("*".to_string());
        collect(child, delimiter, path, out);
        path.pop();
    }
}
