use std::{future::Future, pin::Pin, sync::Arc};

use ahash::AHashMap as Map;
use log::debug;
use parking_lot::Mutex;
use serde_json::Value;

use crate::context::RequestContext;
use crate::dispatch::{
    self, BoxedGuard, BoxedHandler, BoxedMiddleware, BoxedSchema, Controller, HandlerFuture, Next,
};
use crate::error::RouterError;
use crate::pattern::PatternCompiler;
use crate::trie::{cache::MatchCache, CompiledSegment, Endpoint, RouteMatch, Trie};
use crate::utils::{method::Method, split_channel, split_template};

const DEFAULT_CACHE_CAPACITY: usize = 1024;

/// Per-route registration options: local middleware, guards and an
/// optional payload schema.
///
/// ルート単位の登録オプション
pub struct RouteOptions {
    middleware: Vec<Arc<BoxedMiddleware>>,
    guards: Vec<Arc<BoxedGuard>>,
    schema: Option<Arc<BoxedSchema>>,
}

impl RouteOptions {
    #[inline]
    pub fn new() -> RouteOptions {
        RouteOptions {
            middleware: Vec::new(),
            guards: Vec::new(),
            schema: None,
        }
    }

    /// Append a route-local middleware stage.
    pub fn middleware<F, Fut>(mut self, middleware: F) -> RouteOptions
    where
        F: Fn(Arc<RequestContext>, Next) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, RouterError>> + Send + 'static,
    {
        self.middleware.push(boxed_middleware(middleware));
        self
    }

    /// Append a route-local guard.
    pub fn guard<F, Fut>(mut self, guard: F) -> RouteOptions
    where
        F: Fn(Arc<RequestContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<bool, RouterError>> + Send + 'static,
    {
        self.guards.push(boxed_guard(guard));
        self
    }

    /// Attach a payload validator; runs before any guard.
    pub fn schema<F>(mut self, schema: F) -> RouteOptions
    where
        F: Fn(&Value) -> Result<(), String> + Send + Sync + 'static,
    {
        self.schema = Some(Arc::new(Box::new(schema) as BoxedSchema));
        self
    }
}

impl Default for RouteOptions {
    fn default() -> RouteOptions {
        RouteOptions::new()
    }
}

/// Channel router and dispatch engine.
///
/// Registration methods take `&mut self`; matching and dispatch take
/// `&self`. Register every route before sharing the router (`Arc<Kairo>`)
/// with concurrent callers; the borrow checker enforces this split.
///
/// チャネルルータ兼ディスパッチエンジン
pub struct Kairo {
    trie: Trie,
    compiler: PatternCompiler,
    cache: Mutex<MatchCache>,
    middleware: Vec<Arc<BoxedMiddleware>>,
    guards: Vec<Arc<BoxedGuard>>,
    delimiter: char,
}

impl Kairo {
    pub fn new() -> Kairo {
        Kairo::with_delimiter(':')
    }

    /// 区切り文字を指定して初期化する
    pub fn with_delimiter(delimiter: char) -> Kairo {
        Kairo {
            trie: Trie::new(),
            compiler: PatternCompiler::new(delimiter),
            cache: Mutex::new(MatchCache::new(DEFAULT_CACHE_CAPACITY)),
            middleware: Vec::new(),
            guards: Vec::new(),
            delimiter,
        }
    }

    /// Resize the match cache (builder style).
    pub fn cache_capacity(self, capacity: usize) -> Kairo {
        *self.cache.lock() = MatchCache::new(capacity);
        self
    }

    #[inline]
    pub fn delimiter(&self) -> char {
        self.delimiter
    }

    // -- registration ------------------------------------------------

    /// Register a plain handler on a channel template.
    pub fn on<F, Fut>(&mut self, channel: &str, handler: F)
    where
        F: Fn(Arc<RequestContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, RouterError>> + Send + 'static,
    {
        self.on_opts(channel, handler, RouteOptions::new());
    }

    /// Register a plain handler with route-local middleware/guards/schema.
    pub fn on_opts<F, Fut>(&mut self, channel: &str, handler: F, opts: RouteOptions)
    where
        F: Fn(Arc<RequestContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, RouterError>> + Send + 'static,
    {
        self.register(channel, Some(boxed_handler(handler)), None, opts);
    }

    /// Register a verb controller with options.
    pub fn route<F, Fut>(&mut self, method: Method, channel: &str, controller: F, opts: RouteOptions)
    where
        F: Fn(Arc<RequestContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, RouterError>> + Send + 'static,
    {
        let controller = Arc::new(Controller::Handler(unbox_handler(controller)));
        self.register(channel, None, Some((method, controller)), opts);
    }

    /// Register a constant value controller; it is returned as-is and the
    /// middleware chain never runs for it.
    pub fn route_value(&mut self, method: Method, channel: &str, value: Value) {
        let controller = Arc::new(Controller::Value(value));
        self.register(channel, None, Some((method, controller)), RouteOptions::new());
    }

    pub fn get<F, Fut>(&mut self, channel: &str, controller: F)
    where
        F: Fn(Arc<RequestContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, RouterError>> + Send + 'static,
    {
        self.route(Method::GET, channel, controller, RouteOptions::new());
    }

    pub fn post<F, Fut>(&mut self, channel: &str, controller: F)
    where
        F: Fn(Arc<RequestContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, RouterError>> + Send + 'static,
    {
        self.route(Method::POST, channel, controller, RouteOptions::new());
    }

    pub fn put<F, Fut>(&mut self, channel: &str, controller: F)
    where
        F: Fn(Arc<RequestContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, RouterError>> + Send + 'static,
    {
        self.route(Method::PUT, channel, controller, RouteOptions::new());
    }

    pub fn patch<F, Fut>(&mut self, channel: &str, controller: F)
    where
        F: Fn(Arc<RequestContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, RouterError>> + Send + 'static,
    {
        self.route(Method::PATCH, channel, controller, RouteOptions::new());
    }

    pub fn delete<F, Fut>(&mut self, channel: &str, controller: F)
    where
        F: Fn(Arc<RequestContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, RouterError>> + Send + 'static,
    {
        self.route(Method::DELETE, channel, controller, RouteOptions::new());
    }

    /// Register a global middleware stage (runs before every route-local
    /// stage, in registration order).
    pub fn use_middleware<F, Fut>(&mut self, middleware: F)
    where
        F: Fn(Arc<RequestContext>, Next) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, RouterError>> + Send + 'static,
    {
        self.middleware.push(boxed_middleware(middleware));
        self.cache.lock().clear();
    }

    /// Register a global guard.
    pub fn guard<F, Fut>(&mut self, guard: F)
    where
        F: Fn(Arc<RequestContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<bool, RouterError>> + Send + 'static,
    {
        self.guards.push(boxed_guard(guard));
        self.cache.lock().clear();
    }

    /// Splice another router's routes under an optional prefix.
    ///
    /// The other router's global middleware and guards are folded into
    /// each spliced endpoint so its routes keep their pipeline.
    ///
    /// 別ルータのルートをプレフィックス配下に合成する
    pub fn merge(&mut self, other: Kairo, prefix: Option<&str>) {
        let prefix_segments = match prefix {
            Some(prefix) => self.compile_segments(prefix),
            None => Vec::new(),
        };
        self.trie.merge(
            other.trie,
            &prefix_segments,
            &other.middleware,
            &other.guards,
        );
        self.cache.lock().clear();
        debug!("merged router under prefix {:?}", prefix);
    }

    fn register(
        &mut self,
        channel: &str,
        handler: Option<Arc<BoxedHandler>>,
        controller: Option<(Method, Arc<Controller>)>,
        opts: RouteOptions,
    ) {
        let segments = self.compile_segments(channel);
        let mut controllers = Map::default();
        if let Some((method, controller)) = controller {
            controllers.insert(method, controller);
        }
        self.trie.insert(
            &segments,
            Endpoint {
                handler,
                controllers,
                middleware: opts.middleware,
                guards: opts.guards,
                schema: opts.schema,
            },
        );
        self.cache.lock().clear();
        debug!("registered route {:?}", channel);
    }

    fn compile_segments(&self, channel: &str) -> Vec<CompiledSegment> {
        split_template(channel, self.delimiter)
            .into_iter()
            .map(|segment| {
                if segment == "*" {
                    CompiledSegment::Wildcard
                } else {
                    match self.compiler.compile(segment) {
                        Some(pattern) => CompiledSegment::Pattern(pattern),
                        None => CompiledSegment::Static(segment.into()),
                    }
                }
            })
            .collect()
    }

    // -- matching ----------------------------------------------------

    /// Resolve a channel to its route, consulting the match cache first.
    ///
    /// Negative outcomes are cached too; any registration or merge clears
    /// the whole cache.
    pub fn match_channel(&self, channel: &str) -> Option<Arc<RouteMatch>> {
        if let Some(cached) = self.cache.lock().get(channel) {
            return cached;
        }

        let segments = split_channel(channel, self.delimiter);
        let matched = self
            .trie
            .match_segments(&segments)
            .map(|(node, params)| {
                let mut middleware = self.middleware.clone();
                middleware.extend(node.middleware.iter().cloned());
                let mut guards = self.guards.clone();
                guards.extend(node.guards.iter().cloned());
                Arc::new(RouteMatch {
                    handler: node.handler.clone(),
                    controllers: node.controllers.clone(),
                    params,
                    middleware,
                    guards,
                    schema: node.schema.clone(),
                })
            });

        self.cache.lock().put(channel, matched.clone());
        matched
    }

    #[inline]
    pub fn has(&self, channel: &str) -> bool {
        self.match_channel(channel).is_some()
    }

    /// Every registered template, sorted for stable output.
    pub fn routes(&self) -> Vec<String> {
        let mut routes = self.trie.collect_routes(self.delimiter);
        routes.sort();
        routes
    }

    // -- dispatch ----------------------------------------------------

    /// Fire-and-forget dispatch through the plain handler.
    ///
    /// emit系ディスパッチ（プレーンハンドラ経由）
    pub async fn emit(
        &self,
        channel: &str,
        payload: Value,
        metadata: Map<String, Value>,
    ) -> Result<(), RouterError> {
        let route = self
            .match_channel(channel)
            .ok_or_else(|| RouterError::NoMatch(channel.to_string()))?;
        let handler = route
            .handler
            .clone()
            .ok_or_else(|| RouterError::NoMatch(channel.to_string()))?;

        let ctx = Arc::new(RequestContext::new(
            channel,
            route.params.clone(),
            payload,
            metadata,
        ));
        dispatch::check(&route, &ctx).await?;

        let terminal: Next = {
            let ctx = ctx.clone();
            Box::new(move || handler(ctx))
        };
        dispatch::run(&route, ctx, terminal).await.map(|_| ())
    }

    /// Request/response dispatch through the verb controller.
    ///
    /// execute系ディスパッチ（動詞コントローラ経由）
    pub async fn execute(
        &self,
        method: Method,
        channel: &str,
        payload: Value,
        metadata: Map<String, Value>,
    ) -> Result<Value, RouterError> {
        let route = self
            .match_channel(channel)
            .ok_or_else(|| RouterError::NoMatch(channel.to_string()))?;
        let controller = route
            .controllers
            .get(&method)
            .cloned()
            .ok_or_else(|| RouterError::NoController(method, channel.to_string()))?;

        let ctx = Arc::new(RequestContext::new(
            channel,
            route.params.clone(),
            payload,
            metadata,
        ));
        dispatch::check(&route, &ctx).await?;

        // constant controllers bypass the middleware chain entirely
        if let Controller::Value(value) = controller.as_ref() {
            return Ok(value.clone());
        }

        let terminal: Next = {
            let ctx = ctx.clone();
            Box::new(move || match controller.as_ref() {
                Controller::Handler(handler) => handler(ctx),
                Controller::Value(value) => {
                    let value = value.clone();
                    Box::pin(async move { Ok(value) })
                }
            })
        };
        dispatch::run(&route, ctx, terminal).await
    }
}

impl Default for Kairo {
    fn default() -> Kairo {
        Kairo::new()
    }
}

#[inline]
fn boxed_handler<F, Fut>(handler: F) -> Arc<BoxedHandler>
where
    F: Fn(Arc<RequestContext>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, RouterError>> + Send + 'static,
{
    Arc::new(unbox_handler(handler))
}

#[inline]
fn unbox_handler<F, Fut>(handler: F) -> BoxedHandler
where
    F: Fn(Arc<RequestContext>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, RouterError>> + Send + 'static,
{
    Box::new(move |ctx| Box::pin(handler(ctx)) as HandlerFuture)
}

#[inline]
fn boxed_middleware<F, Fut>(middleware: F) -> Arc<BoxedMiddleware>
where
    F: Fn(Arc<RequestContext>, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, RouterError>> + Send + 'static,
{
    Arc::new(Box::new(move |ctx, next| {
        Box::pin(middleware(ctx, next)) as HandlerFuture
    }))
}

#[inline]
fn boxed_guard<F, Fut>(guard: F) -> Arc<BoxedGuard>
where
    F: Fn(Arc<RequestContext>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<bool, RouterError>> + Send + 'static,
{
    Arc::new(Box::new(move |ctx| {
        Box::pin(guard(ctx)) as Pin<Box<dyn Future<Output = Result<bool, RouterError>> + Send>>
    }))
}
