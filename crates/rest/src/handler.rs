//! Handlers and handler chains.
//!
//! A handler inspects or mutates the request/response pair and returns a [`Flow`] telling
//! the dispatch engine what to do next. Plain `async fn`s are adapted with [`handler_fn`]:
//!
//! ```
//! use micro_rest::{handler_fn, Flow, Request, Response};
//!
//! async fn hello(req: &mut Request, res: &mut Response) -> Flow {
//!     let name = req.param("name").unwrap_or("world").to_owned();
//!     res.send(format!("hello {name}"));
//!     Flow::Next
//! }
//!
//! let handler = handler_fn(hello);
//! ```

use crate::chain::Flow;
use crate::request::Request;
use crate::response::Response;
use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

#[async_trait]
pub trait Handler: Send + Sync {
    async fn call(&self, req: &mut Request, res: &mut Response) -> Flow;
}

/// A shared handler; the same `Arc` mounted on several routes is the same handler.
pub type BoxedHandler = Arc<dyn Handler>;

/// Ties the future returned by an async fn to the lifetime of its borrowed arguments.
pub trait HandlerFn<'a>: Send + Sync {
    type Fut: Future<Output = Flow> + Send + 'a;

    fn call_fn(&self, req: &'a mut Request, res: &'a mut Response) -> Self::Fut;
}

impl<'a, F, Fut> HandlerFn<'a> for F
where
    F: Fn(&'a mut Request, &'a mut Response) -> Fut + Send + Sync,
    Fut: Future<Output = Flow> + Send + 'a,
{
    type Fut = Fut;

    #[inline]
    fn call_fn(&self, req: &'a mut Request, res: &'a mut Response) -> Self::Fut {
        (self)(req, res)
    }
}

/// a `HandlerFn` holder which represents any async fn taking the request/response pair
pub struct FnHandler<F> {
    f: F,
}

pub fn handler_fn<F>(f: F) -> FnHandler<F>
where
    F: for<'a> HandlerFn<'a>,
{
    FnHandler { f }
}

// written out instead of `#[async_trait]` so the returned future is the fn's own future
impl<F> Handler for FnHandler<F>
where
    F: for<'a> HandlerFn<'a> + Send + Sync,
{
    fn call<'life0, 'life1, 'life2, 'async_trait>(
        &'life0 self,
        req: &'life1 mut Request,
        res: &'life2 mut Response,
    ) -> Pin<Box<dyn Future<Output = Flow> + Send + 'async_trait>>
    where
        'life0: 'async_trait,
        'life1: 'async_trait,
        'life2: 'async_trait,
        Self: 'async_trait,
    {
        Box::pin(self.f.call_fn(req, res))
    }
}

impl<F> fmt::Debug for FnHandler<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnHandler").finish_non_exhaustive()
    }
}

/// Converts handler-like values into a [`BoxedHandler`].
pub trait IntoHandler {
    fn into_handler(self) -> BoxedHandler;
}

impl IntoHandler for BoxedHandler {
    fn into_handler(self) -> BoxedHandler {
        self
    }
}

impl<H: Handler + 'static> IntoHandler for H {
    fn into_handler(self) -> BoxedHandler {
        Arc::new(self)
    }
}

/// An immutable, ordered sequence of handlers assembled at mount time.
#[derive(Clone, Default)]
pub struct HandlerChain {
    handlers: Arc<[BoxedHandler]>,
}

impl HandlerChain {
    pub fn new(handlers: Vec<BoxedHandler>) -> Self {
        Self { handlers: handlers.into() }
    }

    /// `first` followed by `rest`, without copying either.
    pub fn concat(first: &[BoxedHandler], rest: &[BoxedHandler]) -> Self {
        Self::new(first.iter().chain(rest).cloned().collect())
    }

    pub fn handlers(&self) -> &[BoxedHandler] {
        &self.handlers
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for HandlerChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerChain").field("len", &self.handlers.len()).finish()
    }
}

impl From<Vec<BoxedHandler>> for HandlerChain {
    fn from(handlers: Vec<BoxedHandler>) -> Self {
        Self::new(handlers)
    }
}

#[cfg(test)]
mod tests {
    use super::{BoxedHandler, Handler, HandlerChain, IntoHandler, handler_fn};
    use crate::chain::Flow;
    use crate::request::Request;
    use crate::response::Response;
    use bytes::Bytes;
    use http::{HeaderMap, Method, Uri};
    use std::sync::Arc;

    async fn hello(_req: &mut Request, res: &mut Response) -> Flow {
        res.send("hello");
        Flow::Next
    }

    fn assert_is_handler<T: Handler>(_handler: &T) {
        // no op
    }

    #[test]
    fn assert_fn_is_handler() {
        let handler = handler_fn(hello);
        assert_is_handler(&handler);
    }

    #[tokio::test]
    async fn test_fn_handler_call() {
        let handler = handler_fn(hello).into_handler();
        let mut req = Request::new(Method::GET, Uri::from_static("/"), HeaderMap::new(), Bytes::new());
        let mut res = Response::new();

        assert!(matches!(handler.call(&mut req, &mut res).await, Flow::Next));
        assert_eq!(res.body().as_ref(), b"hello");
    }

    #[test]
    fn test_concat_keeps_identity() {
        let shared: BoxedHandler = handler_fn(hello).into_handler();
        let own: BoxedHandler = handler_fn(hello).into_handler();
        let chain = HandlerChain::concat(&[Arc::clone(&shared)], &[Arc::clone(&own)]);

        assert_eq!(chain.len(), 2);
        assert!(Arc::ptr_eq(&chain.handlers()[0], &shared));
        assert!(!Arc::ptr_eq(&chain.handlers()[1], &shared));
    }
}
