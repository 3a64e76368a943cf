//! Iterative matcher (explicit frame stack + 2-phase backtracking)
//!
//! 反復マッチャ（明示スタック + バックトラック）

use std::sync::Arc;

use ahash::AHashMap as Map;
use serde_json::Value;
use smallvec::SmallVec;

use crate::{
    dispatch::{BoxedGuard, BoxedHandler, BoxedMiddleware, BoxedSchema, Controller},
    trie::TrieNode,
    utils::method::Method,
};

/// Resolved route: endpoint data plus coerced params and the effective
/// middleware/guard lists (router globals first, then node-local).
pub struct RouteMatch {
    pub handler: Option<Arc<BoxedHandler>>,
    pub controllers: Map<Method, Arc<Controller>>,
    pub params: Map<String, Value>,
    pub middleware: Vec<Arc<BoxedMiddleware>>,
    pub guards: Vec<Arc<BoxedGuard>>,
    pub schema: Option<Arc<BoxedSchema>>,
}

/// Child slots tried at each node, in strict priority order.
const PHASE_STATIC: u8 = 0;
const PHASE_PARAM: u8 = 1;
const PHASE_WILD: u8 = 2;

struct Frame<'a> {
    node: &'a TrieNode,
    /// Segments consumed on the way to this node.
    index: usize,
    /// Params accumulated along this path; copied per branch so a
    /// rejected branch never leaks captures into its siblings.
    params: Map<String, Value>,
    phase: u8,
}

enum Step<'a> {
    Found(&'a TrieNode, Map<String, Value>),
    Push(&'a TrieNode, usize, Map<String, Value>),
    Pop,
    Stay,
}

/// Walk the trie iteratively, depth-first with explicit backtracking.
///
/// Recursion depth would scale with channel segment count, so the search
/// keeps its own frame stack instead. At every node the static child is
/// tried before the parametric child, and the parametric child before the
/// wildcard; the first full match along that order wins.
///
/// トライを反復的に深さ優先探索する（静的 → パラメータ → ワイルドカード）
pub fn match_segments<'a>(
    root: &'a TrieNode,
    segments: &[&str],
) -> Option<(&'a TrieNode, Map<String, Value>)> {
    let mut stack: SmallVec<[Frame<'a>; 16]> = SmallVec::new();
    stack.push(Frame {
        node: root,
        index: 0,
        params: Map::default(),
        phase: PHASE_STATIC,
    });

    loop {
        let step = {
            let frame = stack.last_mut()?;
            let node = frame.node;

            if frame.index == segments.len() {
                if node.is_endpoint {
                    Step::Found(node, std::mem::take(&mut frame.params))
                } else {
                    Step::Pop
                }
            } else {
                let segment = segments[frame.index];
                match frame.phase {
                    PHASE_STATIC => {
                        frame.phase = PHASE_PARAM;
                        match node.fixed.get(segment).map(|child| &**child) {
                            Some(child) => {
                                Step::Push(child, frame.index + 1, frame.params.clone())
                            }
                            None => Step::Stay,
                        }
                    }
                    PHASE_PARAM => {
                        frame.phase = PHASE_WILD;
                        match node.param_child.as_deref() {
                            Some(child) => {
                                let captured = child
                                    .pattern
                                    .as_ref()
                                    .and_then(|pattern| pattern.capture(segment));
                                match captured {
                                    Some(captured) => {
                                        let mut params = frame.params.clone();
                                        for (name, value) in captured {
                                            params.insert(name.into_string(), value);
                                        }
                                        Step::Push(child, frame.index + 1, params)
                                    }
                                    None => Step::Stay,
                                }
                            }
                            None => Step::Stay,
                        }
                    }
                    PHASE_WILD => {
                        frame.phase = PHASE_WILD + 1;
                        // a wildcard is terminal: it matches exactly one
                        // remaining segment, never a deeper tail
                        match node.wild_child.as_deref() {
                            Some(child)
                                if child.is_endpoint && frame.index + 1 == segments.len() =>
                            {
                                let mut params = frame.params.clone();
                                params.insert("*".to_string(), Value::String(segment.to_string()));
                                Step::Found(child, params)
                            }
                            _ => Step::Stay,
                        }
                    }
                    _ => Step::Pop,
                }
            }
        };

        match step {
            Step::Found(node, params) => return Some((node, params)),
            Step::Push(node, index, params) => stack.push(Frame {
                node,
                index,
                params,
                phase: PHASE_STATIC,
            }),
            Step::Pop => {
                stack.pop();
            }
            Step::Stay => {}
        }
    }
}
