//! Dispatch pipeline (validation → guards → middleware → handler)
//!
//! ディスパッチパイプライン（検証 → ガード → ミドルウェア → ハンドラ）

use std::{future::Future, pin::Pin, sync::Arc};

use log::debug;
use serde_json::Value;

use crate::{context::RequestContext, error::RouterError, trie::RouteMatch};

/// Boxed future produced by handlers and middleware.
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Value, RouterError>> + Send>>;

/// Boxed async handler type for dispatching.
///
/// This type represents an async handler function that takes a shared
/// request context and resolves to a JSON value or a router error.
///
/// ディスパッチ用のBox化された非同期ハンドラ型。
pub type BoxedHandler = Box<dyn Fn(Arc<RequestContext>) -> HandlerFuture + Send + Sync>;

/// Continuation invoked by middleware to run the rest of the chain.
///
/// A middleware that never calls its continuation short-circuits the
/// chain; the terminal handler does not run.
pub type Next = Box<dyn FnOnce() -> HandlerFuture + Send>;

/// Boxed middleware stage wrapping the rest of the chain.
pub type BoxedMiddleware =
    Box<dyn Fn(Arc<RequestContext>, Next) -> HandlerFuture + Send + Sync>;

/// Boxed guard. `Ok(false)` rejects the dispatch with an access-denied
/// error; `Err` propagates as a hard failure.
pub type BoxedGuard = Box<
    dyn Fn(Arc<RequestContext>) -> Pin<Box<dyn Future<Output = Result<bool, RouterError>> + Send>>
        + Send
        + Sync,
>;

/// Boxed payload validator attached to a route.
pub type BoxedSchema = Box<dyn Fn(&Value) -> Result<(), String> + Send + Sync>;

/// A controller registered under a verb: either an async handler or a
/// plain value returned as-is without running the middleware chain.
pub enum Controller {
    Handler(BoxedHandler),
    Value(Value),
}

/// Run the front half of the pipeline: payload validation, then every
/// guard in order (global before route-local, registration order within
/// each). Aborts on the first schema failure or `false` guard.
///
/// パイプライン前半（検証とガード）を順に実行する
pub async fn check(route: &RouteMatch, ctx: &Arc<RequestContext>) -> Result<(), RouterError> {
    if let Some(schema) = &route.schema {
        if let Err(message) = schema(&ctx.payload) {
            debug!("validation rejected channel {}: {}", ctx.channel, message);
            return Err(RouterError::Validation(message));
        }
    }

    for guard in &route.guards {
        match guard(ctx.clone()).await {
            Ok(true) => {}
            Ok(false) => {
                debug!("guard rejected channel {}", ctx.channel);
                return Err(RouterError::GuardRejected(ctx.channel.clone()));
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Run the back half of the pipeline: the middleware chain wrapped around
/// the terminal handler.
///
/// The chain is built fresh per dispatch by folding the ordered middleware
/// list right-to-left around the handler, so each stage wraps the next via
/// its continuation exactly like a call stack assembled at dispatch time.
///
/// ミドルウェアチェーンをハンドラに巻き付けて実行する
pub async fn run(
    route: &RouteMatch,
    ctx: Arc<RequestContext>,
    terminal: Next,
) -> Result<Value, RouterError> {
    let mut next = terminal;
    for middleware in route.middleware.iter().rev() {
        let middleware = middleware.clone();
        let ctx = ctx.clone();
        let rest = next;
        next = Box::new(move || middleware(ctx, rest));
    }
    next().await
}
