//! The server shell: route registration, per-request dispatch and the hyper accept loop.
//!
//! ```no_run
//! use micro_rest::{handler_fn, Flow, IntoHandler, Request, Response, Server};
//!
//! async fn hello(req: &mut Request, res: &mut Response) -> Flow {
//!     let name = req.param("name").unwrap_or("world").to_owned();
//!     res.send(format!("hello {name}"));
//!     Flow::Next
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let server = Server::builder()
//!         .address("127.0.0.1:8080")
//!         .get("/hello/:name", [handler_fn(hello).into_handler()])
//!         .build()
//!         .unwrap();
//!     server.start().await.unwrap();
//! }
//! ```

use crate::chain::{ChainSource, Completion, Dispatcher, Outcome, RedirectTarget};
use crate::config::ServerConfig;
use crate::error::{MountError, RenderError, RestError};
use crate::events::{ErrorListener, Events, EventsBuilder};
use crate::handler::{BoxedHandler, HandlerChain};
use crate::request::{PathParams, Request};
use crate::response::{Response, allow_header};
use crate::router::{PathSpec, Route, RouteSpec, Router, RouterOptions, VersionCheck};
use arc_swap::ArcSwap;
use bytes::Bytes;
use http::header::{ALLOW, HeaderValue, SERVER};
use http::{Method, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use std::collections::HashMap;
use std::convert::Infallible;
use std::fmt;
use std::future::Future;
use std::io;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tracing::instrument::WithSubscriber;
use tracing::{Dispatch, Instrument, debug, error, info, info_span, warn};

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("invalid route: {source}")]
    InvalidRoute {
        #[from]
        source: MountError,
    },

    #[error("invalid address `{address}`: {source}")]
    InvalidAddress {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("bind server error: {source}")]
    Bind {
        #[source]
        source: io::Error,
    },

    #[error("invalid server config: {source}")]
    Config {
        #[from]
        source: serde_json::Error,
    },
}

pub struct ServerBuilder {
    config: ServerConfig,
    pre: Vec<BoxedHandler>,
    uses: Vec<BoxedHandler>,
    routes: Vec<(RouteSpec, HandlerChain)>,
    events: EventsBuilder,
    log_dispatch: Option<Dispatch>,
}

impl fmt::Debug for ServerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerBuilder")
            .field("config", &self.config)
            .field("pre", &self.pre.len())
            .field("uses", &self.uses.len())
            .field("routes", &self.routes.len())
            .finish_non_exhaustive()
    }
}

impl ServerBuilder {
    fn new() -> Self {
        Self {
            config: ServerConfig::default(),
            pre: Vec::new(),
            uses: Vec::new(),
            routes: Vec::new(),
            events: Events::builder(),
            log_dispatch: None,
        }
    }

    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.config.address = address.into();
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    /// Default versions for routes that declare none.
    pub fn versions<I, S>(mut self, versions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.versions = versions.into_iter().map(Into::into).collect();
        self
    }

    /// Adds handlers that run before routing, in registration order.
    pub fn pre(mut self, handlers: impl IntoIterator<Item = BoxedHandler>) -> Self {
        self.pre.extend(handlers);
        self
    }

    /// Adds handlers that run ahead of the handlers of every route registered afterwards.
    pub fn with(mut self, handlers: impl IntoIterator<Item = BoxedHandler>) -> Self {
        self.uses.extend(handlers);
        self
    }

    pub fn route(mut self, spec: RouteSpec, handlers: impl IntoIterator<Item = BoxedHandler>) -> Self {
        let handlers = handlers.into_iter().collect::<Vec<_>>();
        self.routes.push((spec, HandlerChain::concat(&self.uses, &handlers)));
        self
    }

    pub fn get(self, path: impl Into<PathSpec>, handlers: impl IntoIterator<Item = BoxedHandler>) -> Self {
        self.route(RouteSpec::new(Method::GET, path), handlers)
    }

    pub fn post(self, path: impl Into<PathSpec>, handlers: impl IntoIterator<Item = BoxedHandler>) -> Self {
        self.route(RouteSpec::new(Method::POST, path), handlers)
    }

    pub fn put(self, path: impl Into<PathSpec>, handlers: impl IntoIterator<Item = BoxedHandler>) -> Self {
        self.route(RouteSpec::new(Method::PUT, path), handlers)
    }

    pub fn patch(self, path: impl Into<PathSpec>, handlers: impl IntoIterator<Item = BoxedHandler>) -> Self {
        self.route(RouteSpec::new(Method::PATCH, path), handlers)
    }

    pub fn delete(self, path: impl Into<PathSpec>, handlers: impl IntoIterator<Item = BoxedHandler>) -> Self {
        self.route(RouteSpec::new(Method::DELETE, path), handlers)
    }

    pub fn head(self, path: impl Into<PathSpec>, handlers: impl IntoIterator<Item = BoxedHandler>) -> Self {
        self.route(RouteSpec::new(Method::HEAD, path), handlers)
    }

    pub fn options(self, path: impl Into<PathSpec>, handlers: impl IntoIterator<Item = BoxedHandler>) -> Self {
        self.route(RouteSpec::new(Method::OPTIONS, path), handlers)
    }

    pub fn on_after<F>(mut self, listener: F) -> Self
    where
        F: Fn(&Request, &Response, Option<&Route>, Option<&RestError>) + Send + Sync + 'static,
    {
        self.events = self.events.on_after(listener);
        self
    }

    pub fn on_error<L: ErrorListener + 'static>(mut self, category: impl Into<String>, listener: L) -> Self {
        self.events = self.events.on_error(category, listener);
        self
    }

    pub fn on_uncaught<F>(mut self, listener: F) -> Self
    where
        F: Fn(&Request, &mut Response, Option<&Route>, &RestError) + Send + Sync + 'static,
    {
        self.events = self.events.on_uncaught(listener);
        self
    }

    /// Routes the server's logs to `dispatch` instead of the default subscriber.
    pub fn log_dispatch(mut self, dispatch: impl Into<Dispatch>) -> Self {
        self.log_dispatch = Some(dispatch.into());
        self
    }

    pub fn build(self) -> Result<Server, ServerError> {
        let Self { config, pre, uses, routes, events, log_dispatch } = self;

        let table = with_logs(log_dispatch.as_ref(), || -> Result<RouteTable, ServerError> {
            let mut table = RouteTable {
                router: Router::with_options(RouterOptions { versions: config.versions.clone() }),
                chains: HashMap::new(),
            };
            for (spec, chain) in routes {
                if let Some(name) = table.router.mount(spec)? {
                    table.chains.insert(name, chain);
                }
            }
            info!(routes = table.router.len(), "server built");
            Ok(table)
        })?;

        Ok(Server {
            config,
            pre: HandlerChain::new(pre),
            uses,
            table: ArcSwap::from_pointee(table),
            writer: Mutex::new(()),
            events: events.build(),
            log_dispatch,
        })
    }
}

/// The mounted routes and their handler chains, swapped as a whole on every change.
#[derive(Debug, Clone, Default)]
struct RouteTable {
    router: Router,
    chains: HashMap<String, HandlerChain>,
}

impl ChainSource for RouteTable {
    fn redirect_target(&self, name: &str, req: &Request) -> Option<RedirectTarget> {
        let route = self.router.route(name)?;
        let chain = self.chains.get(name)?.clone();
        let params = match route.pattern().matches(req.path()) {
            Some(Ok(params)) => params,
            _ => PathParams::empty(),
        };
        let version = match route.versions.check(req.version()) {
            VersionCheck::Matched(version) => Some(version),
            VersionCheck::Any | VersionCheck::Unsatisfied => None,
        };
        Some(RedirectTarget { route: Arc::clone(route), params, version, chain })
    }
}

pub struct Server {
    config: ServerConfig,
    pre: HandlerChain,
    uses: Vec<BoxedHandler>,
    table: ArcSwap<RouteTable>,
    // serializes mount/unmount; readers never take it
    writer: Mutex<()>,
    events: Events,
    log_dispatch: Option<Dispatch>,
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("config", &self.config)
            .field("routes", &self.table.load().router.len())
            .field("events", &self.events)
            .finish_non_exhaustive()
    }
}

impl Server {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Mounts a route while the server is running; requests already in flight keep the
    /// table they started with.
    pub fn mount(
        &self,
        spec: RouteSpec,
        handlers: impl IntoIterator<Item = BoxedHandler>,
    ) -> Result<Option<String>, MountError> {
        let handlers = handlers.into_iter().collect::<Vec<_>>();
        with_logs(self.log_dispatch.as_ref(), || {
            let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
            let mut table = RouteTable::clone(&self.table.load());
            let Some(name) = table.router.mount(spec)? else {
                return Ok(None);
            };
            table.chains.insert(name.clone(), HandlerChain::concat(&self.uses, &handlers));
            self.table.store(Arc::new(table));
            Ok(Some(name))
        })
    }

    pub fn unmount(&self, name: &str) -> bool {
        with_logs(self.log_dispatch.as_ref(), || {
            let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
            let mut table = RouteTable::clone(&self.table.load());
            if !table.router.unmount(name) {
                return false;
            }
            table.chains.remove(name);
            self.table.store(Arc::new(table));
            true
        })
    }

    pub fn route(&self, name: &str) -> Option<Arc<Route>> {
        self.table.load().router.route(name).cloned()
    }

    /// Builds a concrete path for the named route.
    pub fn render(&self, name: &str, params: &PathParams) -> Result<String, RenderError> {
        self.table.load().router.render(name, params)
    }

    /// Runs one request through pre-routing handlers, the router and the matched route's
    /// chain, and returns the response to write.
    ///
    /// `after` listeners fire exactly once per request, also when this future is dropped
    /// before it completes.
    pub async fn dispatch(&self, req: Request) -> Response {
        let span = with_logs(self.log_dispatch.as_ref(), || {
            info_span!("request", method = %req.method(), path = req.path())
        });
        let handling = self.handle(req).instrument(span);
        match &self.log_dispatch {
            Some(dispatch) => handling.with_subscriber(dispatch.clone()).await,
            None => handling.await,
        }
    }

    async fn handle(&self, req: Request) -> Response {
        let table = self.table.load_full();
        let mut exchange = InFlight { events: &self.events, req, res: Response::new(), finished: false };
        let completion = self.process(&table, &mut exchange.req, &mut exchange.res).await;
        exchange.finish(&completion, &self.config.name)
    }

    async fn process(&self, table: &RouteTable, req: &mut Request, res: &mut Response) -> Completion {
        let dispatcher = Dispatcher::new(&self.events);

        let pre = dispatcher.run(self.pre.clone(), req, res, table).await;
        if !pre.is_exhausted() || req.is_redirected() {
            return pre;
        }

        match table.router.find(req.method(), req.path(), req.version()) {
            Ok(matched) => {
                let (route, params, version) = matched.into_parts();
                let chain = table.chains.get(route.name()).cloned().unwrap_or_default();
                debug!(route = route.name(), handlers = chain.len(), "route matched");
                req.bind_route(route, params, version);
                dispatcher.run(chain, req, res, table).await
            }
            Err(err) if self.is_preflight(req, &err) => {
                if let Some(allow) = err.allowed_methods().and_then(allow_header) {
                    res.header(ALLOW, allow);
                }
                res.send_status(StatusCode::OK);
                Completion::new(Outcome::Exhausted)
            }
            Err(err) => {
                debug!(code = err.code(), "route not resolved");
                dispatcher.fail(req, res, err).await
            }
        }
    }

    fn is_preflight(&self, req: &Request, err: &RestError) -> bool {
        req.method() == Method::OPTIONS
            && matches!(err, RestError::MethodNotAllowed { .. })
            && !self.events.has_error_listener(err.category())
    }

    /// Serves until ctrl-c or SIGTERM, then waits for open connections to finish.
    pub async fn start(self) -> Result<(), ServerError> {
        self.start_with_shutdown(shutdown_signal()).await
    }

    pub async fn start_with_shutdown<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()>,
    {
        match self.log_dispatch.clone() {
            Some(dispatch) => self.serve(shutdown).with_subscriber(dispatch).await,
            None => self.serve(shutdown).await,
        }
    }

    async fn serve<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()>,
    {
        let address = self.config.socket_addrs()?;
        let listener = match TcpListener::bind(address.as_slice()).await {
            Ok(listener) => listener,
            Err(e) => {
                error!(cause = %e, "bind server error");
                return Err(ServerError::Bind { source: e });
            }
        };
        info!(address = ?address, "start listening");

        let server = Arc::new(self);
        let mut tasks = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                biased;

                () = &mut shutdown => {
                    info!(in_flight = tasks.len(), "shutdown signal received, draining connections");
                    break;
                }

                accepted = listener.accept() => {
                    let (stream, remote_addr) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            warn!(cause = %e, "failed to accept");
                            continue;
                        }
                    };

                    let io = TokioIo::new(stream);
                    let server = Arc::clone(&server);
                    let logs = tracing::dispatcher::get_default(Dispatch::clone);
                    tasks.spawn(
                        async move {
                            let service = service_fn(move |req| {
                                let server = Arc::clone(&server);
                                async move { server.serve_request(req).await }
                            });
                            if let Err(e) = ConnBuilder::new(TokioExecutor::new()).serve_connection(io, service).await {
                                error!(peer = %remote_addr, cause = %e, "service has error, connection shutdown");
                            } else {
                                debug!(peer = %remote_addr, "finished process, connection shutdown");
                            }
                        }
                        .with_subscriber(logs),
                    );
                }

                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        while tasks.join_next().await.is_some() {}
        info!("server stopped");
        Ok(())
    }

    async fn serve_request(&self, req: hyper::Request<Incoming>) -> Result<http::Response<Full<Bytes>>, Infallible> {
        let (parts, body) = req.into_parts();
        let body = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                warn!(cause = %e, "read request body error");
                let mut res = Response::new();
                res.send_error(&RestError::bad_request("request body could not be read"));
                return Ok(res.into_inner());
            }
        };
        Ok(self.dispatch(Request::from_parts(parts, body)).await.into_inner())
    }
}

/// Owns the request/response pair while it is being processed and fires `after` with
/// [`RestError::RequestAborted`] if dropped before [`InFlight::finish`].
struct InFlight<'a> {
    events: &'a Events,
    req: Request,
    res: Response,
    finished: bool,
}

impl InFlight<'_> {
    fn finish(mut self, completion: &Completion, server_name: &str) -> Response {
        if !self.res.is_sent() {
            warn!(route = ?self.req.route().map(|route| route.name().to_owned()), "handler chain finished without a response");
            self.res.send(Bytes::new());
        }
        if !server_name.is_empty()
            && !self.res.headers().contains_key(SERVER)
            && let Ok(value) = HeaderValue::from_str(server_name)
        {
            self.res.header(SERVER, value);
        }

        info!(status = %self.res.status(), "request completed");
        self.events.emit_after(&self.req, &self.res, completion.error());
        self.finished = true;
        std::mem::take(&mut self.res)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        warn!(method = %self.req.method(), path = self.req.path(), "request aborted before the handler chain finished");
        self.events.emit_after(&self.req, &self.res, Some(&RestError::RequestAborted));
    }
}

fn with_logs<T>(dispatch: Option<&Dispatch>, f: impl FnOnce() -> T) -> T {
    match dispatch {
        Some(dispatch) => tracing::dispatcher::with_default(dispatch, f),
        None => f(),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(cause = %e, "install ctrl-c handler error");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(cause = %e, "install SIGTERM handler error");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
