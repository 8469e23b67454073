use crate::chain::state::{Chain, Outcome, Step};
use crate::error::RestError;
use crate::events::{Ack, Events};
use crate::handler::HandlerChain;
use crate::request::{PathParams, Request};
use crate::response::Response;
use crate::router::Route;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// The route a redirect continues with.
#[derive(Debug, Clone)]
pub struct RedirectTarget {
    pub route: Arc<Route>,
    pub params: PathParams,
    pub version: Option<semver::Version>,
    pub chain: HandlerChain,
}

/// Looks up redirect targets by route name.
#[cfg_attr(test, mockall::automock)]
pub trait ChainSource: Send + Sync {
    fn redirect_target(&self, name: &str, req: &Request) -> Option<RedirectTarget>;
}

/// The result of running one chain to its end.
#[derive(Debug, Clone)]
pub struct Completion {
    outcome: Outcome,
}

impl Completion {
    pub(crate) fn new(outcome: Outcome) -> Self {
        Self { outcome }
    }

    pub fn outcome(&self) -> &Outcome {
        &self.outcome
    }

    pub fn error(&self) -> Option<&RestError> {
        match &self.outcome {
            Outcome::Failed(err) | Outcome::Faulted(err) => Some(err),
            Outcome::Exhausted | Outcome::Stopped => None,
        }
    }

    #[inline]
    pub fn is_exhausted(&self) -> bool {
        matches!(self.outcome, Outcome::Exhausted)
    }
}

/// Drives handler chains for requests, delivering errors and faults through [`Events`].
#[derive(Debug, Clone, Copy)]
pub struct Dispatcher<'a> {
    events: &'a Events,
}

impl<'a> Dispatcher<'a> {
    pub fn new(events: &'a Events) -> Self {
        Self { events }
    }

    /// Runs `handlers` in order until one stops, fails, or the chain is exhausted.
    ///
    /// A failure is delivered before returning: to the error listener of its category when
    /// one is registered, then as the default error response if nothing was sent.
    pub async fn run(
        &self,
        handlers: HandlerChain,
        req: &mut Request,
        res: &mut Response,
        source: &dyn ChainSource,
    ) -> Completion {
        let mut chain = Chain::new(handlers);
        let mut step = chain.start();
        loop {
            step = match step {
                Step::Invoke(ticket, handler) => match AssertUnwindSafe(handler.call(req, res)).catch_unwind().await {
                    Ok(flow) => chain.resolve(ticket, flow),
                    Err(panic) => {
                        let err = RestError::UncaughtHandlerFault { message: panic_message(&*panic) };
                        error!(cause = %err, "handler panicked");
                        self.events.emit_uncaught(req, res, &err);
                        if !res.is_sent() {
                            res.send_error(&err);
                        }
                        chain.fault(err)
                    }
                },
                Step::Redirect(name) => self.redirect(&mut chain, &name, req, source),
                Step::Done(outcome) => return self.complete(outcome, req, res).await,
            }
            .unwrap_or_else(|| Step::Done(Outcome::Failed(RestError::internal("handler chain advanced out of order"))));
        }
    }

    /// Delivers `err` without running any handler.
    pub async fn fail(&self, req: &mut Request, res: &mut Response, err: RestError) -> Completion {
        self.complete(Outcome::Failed(err), req, res).await
    }

    fn redirect(&self, chain: &mut Chain, name: &str, req: &mut Request, source: &dyn ChainSource) -> Option<Step> {
        if req.is_redirected() {
            error!(route = name, "request already redirected once");
            return chain.abort(RestError::internal(format!(
                "redirect to `{name}` refused, the request was already redirected"
            )));
        }
        req.mark_redirected();

        match source.redirect_target(name, req) {
            Some(target) => {
                debug!(from = ?req.route().map(|r| r.name().to_owned()), to = name, "redirecting");
                req.bind_route(target.route, target.params, target.version);
                chain.splice(&target.chain)
            }
            None => {
                error!(route = name, "redirect target not found");
                chain.abort(RestError::internal(format!("no route named `{name}`")))
            }
        }
    }

    async fn complete(&self, outcome: Outcome, req: &mut Request, res: &mut Response) -> Completion {
        if let Outcome::Failed(err) = &outcome {
            self.deliver(req, res, err).await;
        }
        Completion::new(outcome)
    }

    async fn deliver(&self, req: &mut Request, res: &mut Response, err: &RestError) {
        if let Some(listener) = self.events.error_listener(err.category()) {
            let (ack, acked) = Ack::channel();
            listener.on_error(req, res, err, ack).await;
            if !acked.wait().await {
                warn!(category = err.category(), "error listener returned without acknowledging");
            }
        }

        if !res.is_sent() {
            debug!(code = err.code(), status = %err.status(), "sending error response");
            res.send_error(err);
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|message| (*message).to_owned())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_owned())
}

#[cfg(test)]
mod tests {
    use super::{ChainSource, Dispatcher, MockChainSource, RedirectTarget};
    use crate::chain::{Flow, Outcome};
    use crate::error::RestError;
    use crate::events::{Ack, ErrorListener, Events};
    use crate::handler::{BoxedHandler, Handler, HandlerChain, IntoHandler, handler_fn};
    use crate::request::{PathParams, Request};
    use crate::response::Response;
    use crate::router::{RouteSpec, Router};
    use async_trait::async_trait;
    use bytes::Bytes;
    use http::header::{HeaderName, HeaderValue};
    use http::{HeaderMap, Method, StatusCode, Uri};
    use mockall::predicate;
    use std::sync::{Arc, Mutex};

    struct Recorder {
        id: usize,
        log: Arc<Mutex<Vec<usize>>>,
        flow: Flow,
    }

    #[async_trait]
    impl Handler for Recorder {
        async fn call(&self, _req: &mut Request, _res: &mut Response) -> Flow {
            self.log.lock().unwrap().push(self.id);
            self.flow.clone()
        }
    }

    fn recorder(id: usize, log: &Arc<Mutex<Vec<usize>>>, flow: Flow) -> BoxedHandler {
        Recorder { id, log: Arc::clone(log), flow }.into_handler()
    }

    async fn respond(_req: &mut Request, res: &mut Response) -> Flow {
        res.send("done");
        Flow::Next
    }

    async fn boom(_req: &mut Request, _res: &mut Response) -> Flow {
        panic!("boom")
    }

    fn request() -> Request {
        Request::new(Method::GET, Uri::from_static("/a"), HeaderMap::new(), Bytes::new())
    }

    fn no_redirects() -> MockChainSource {
        let mut source = MockChainSource::new();
        source.expect_redirect_target().times(0);
        source
    }

    fn target(path: &str, chain: Vec<BoxedHandler>) -> RedirectTarget {
        let mut router = Router::new();
        let name = router.mount(RouteSpec::new(Method::GET, path)).unwrap().unwrap();
        RedirectTarget {
            route: router.route(&name).cloned().unwrap(),
            params: PathParams::empty(),
            version: None,
            chain: HandlerChain::new(chain),
        }
    }

    #[tokio::test]
    async fn test_runs_handlers_in_order() {
        let log = Arc::new(Mutex::new(vec![]));
        let chain = HandlerChain::new((1..=3).map(|id| recorder(id, &log, Flow::Next)).collect());
        let events = Events::default();
        let (mut req, mut res) = (request(), Response::new());

        let completion = Dispatcher::new(&events).run(chain, &mut req, &mut res, &no_redirects()).await;

        assert!(completion.is_exhausted());
        assert_eq!(*log.lock().unwrap(), vec![1, 2, 3]);
        assert!(!res.is_sent());
    }

    #[tokio::test]
    async fn test_error_short_circuits_and_responds() {
        let log = Arc::new(Mutex::new(vec![]));
        let chain = HandlerChain::new(vec![
            recorder(1, &log, Flow::Next),
            recorder(2, &log, Flow::fail(RestError::bad_request("missing field"))),
            recorder(3, &log, Flow::Next),
        ]);
        let events = Events::default();
        let (mut req, mut res) = (request(), Response::new());

        let completion = Dispatcher::new(&events).run(chain, &mut req, &mut res, &no_redirects()).await;

        assert!(matches!(completion.outcome(), Outcome::Failed(RestError::BadRequest { .. })));
        assert_eq!(*log.lock().unwrap(), vec![1, 2]);
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        let body: serde_json::Value = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(body["code"], "BadRequest");
        assert_eq!(body["message"], "missing field");
    }

    #[tokio::test]
    async fn test_stop_ends_chain_without_error() {
        let log = Arc::new(Mutex::new(vec![]));
        let chain = HandlerChain::new(vec![recorder(1, &log, Flow::Stop), recorder(2, &log, Flow::Next)]);
        let events = Events::default();
        let (mut req, mut res) = (request(), Response::new());

        let completion = Dispatcher::new(&events).run(chain, &mut req, &mut res, &no_redirects()).await;

        assert!(matches!(completion.outcome(), Outcome::Stopped));
        assert!(completion.error().is_none());
        assert_eq!(*log.lock().unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn test_redirect_continues_with_target_chain() {
        let log = Arc::new(Mutex::new(vec![]));
        let shared = recorder(0, &log, Flow::Next);
        let chain = HandlerChain::new(vec![Arc::clone(&shared), recorder(1, &log, Flow::redirect("get_b"))]);
        let redirect = target("/b", vec![Arc::clone(&shared), recorder(2, &log, Flow::Next), handler_fn(respond).into_handler()]);

        let mut source = MockChainSource::new();
        source
            .expect_redirect_target()
            .with(predicate::eq("get_b"), predicate::always())
            .times(1)
            .return_once(move |_, _| Some(redirect));

        let events = Events::default();
        let (mut req, mut res) = (request(), Response::new());
        let completion = Dispatcher::new(&events).run(chain, &mut req, &mut res, &source).await;

        assert!(completion.is_exhausted());
        assert_eq!(*log.lock().unwrap(), vec![0, 1, 2]);
        assert_eq!(req.route().unwrap().path(), "/b");
        assert_eq!(res.body().as_ref(), b"done");
    }

    #[tokio::test]
    async fn test_second_redirect_in_request_is_refused() {
        let log = Arc::new(Mutex::new(vec![]));
        let events = Events::default();
        let (mut req, mut res) = (request(), Response::new());
        let mut source = MockChainSource::new();
        source.expect_redirect_target().times(1).return_once(|_, _| Some(target("/b", vec![])));

        let first = HandlerChain::new(vec![recorder(1, &log, Flow::redirect("get_b"))]);
        let completion = Dispatcher::new(&events).run(first, &mut req, &mut res, &source).await;
        assert!(completion.is_exhausted());

        let second = HandlerChain::new(vec![recorder(2, &log, Flow::redirect("get_b"))]);
        let completion = Dispatcher::new(&events).run(second, &mut req, &mut res, &source).await;
        assert!(matches!(completion.outcome(), Outcome::Failed(RestError::InternalError { .. })));
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_redirect_to_unknown_route() {
        let log = Arc::new(Mutex::new(vec![]));
        let mut source = MockChainSource::new();
        source.expect_redirect_target().times(1).returning(|_, _| None);

        let events = Events::default();
        let (mut req, mut res) = (request(), Response::new());
        let chain = HandlerChain::new(vec![recorder(1, &log, Flow::redirect("nowhere"))]);
        let completion = Dispatcher::new(&events).run(chain, &mut req, &mut res, &source).await;

        assert_eq!(completion.error().map(RestError::code), Some("InternalError"));
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_panic_becomes_uncaught_fault() {
        let log = Arc::new(Mutex::new(vec![]));
        let chain = HandlerChain::new(vec![handler_fn(boom).into_handler(), recorder(1, &log, Flow::Next)]);
        let events = Events::default();
        let (mut req, mut res) = (request(), Response::new());

        let completion = Dispatcher::new(&events).run(chain, &mut req, &mut res, &no_redirects()).await;

        assert!(matches!(completion.outcome(), Outcome::Faulted(RestError::UncaughtHandlerFault { message }) if message == "boom"));
        assert!(log.lock().unwrap().is_empty());
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_uncaught_listener_responds() {
        let chain = HandlerChain::new(vec![handler_fn(boom).into_handler()]);
        let events = Events::builder()
            .on_uncaught(|_, res, _, _| {
                res.send_status(StatusCode::SERVICE_UNAVAILABLE);
            })
            .build();
        let (mut req, mut res) = (request(), Response::new());

        let completion = Dispatcher::new(&events).run(chain, &mut req, &mut res, &no_redirects()).await;

        assert!(completion.error().is_some());
        assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_uncaught_listener_without_response_still_sends_500() {
        let seen = Arc::new(Mutex::new(vec![]));
        let chain = HandlerChain::new(vec![handler_fn(boom).into_handler()]);
        let events = {
            let seen = Arc::clone(&seen);
            Events::builder()
                .on_uncaught(move |_, _, _, err| seen.lock().unwrap().push(err.code().to_owned()))
                .build()
        };
        let (mut req, mut res) = (request(), Response::new());

        let completion = Dispatcher::new(&events).run(chain, &mut req, &mut res, &no_redirects()).await;

        assert!(matches!(completion.outcome(), Outcome::Faulted(_)));
        assert_eq!(*seen.lock().unwrap(), vec!["UncaughtHandlerFault".to_owned()]);
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    struct Tagging;

    #[async_trait]
    impl ErrorListener for Tagging {
        async fn on_error(&self, _req: &mut Request, res: &mut Response, _err: &RestError, ack: Ack) {
            res.header(HeaderName::from_static("x-tagged"), HeaderValue::from_static("yes"));
            ack.ack();
        }
    }

    #[tokio::test]
    async fn test_error_listener_then_default_response() {
        let events = Events::builder().on_error("NotFound", Tagging).build();
        let (mut req, mut res) = (request(), Response::new());

        let completion = Dispatcher::new(&events).fail(&mut req, &mut res, RestError::not_found("/a")).await;

        assert_eq!(completion.error().map(RestError::category), Some("NotFound"));
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
        assert_eq!(res.headers()["x-tagged"], "yes");
    }

    #[test]
    fn test_source_is_object_safe() {
        let source: Box<dyn ChainSource> = Box::new(no_redirects());
        drop(source);
    }
}
