//! Lifecycle notifications: `after` once per request, error listeners per error category
//! and uncaught-fault listeners.

use crate::error::RestError;
use crate::request::Request;
use crate::response::Response;
use crate::router::Route;
use async_trait::async_trait;
use futures::channel::oneshot;
use std::collections::HashMap;
use std::fmt;
use tracing::debug;

pub type AfterListener = dyn Fn(&Request, &Response, Option<&Route>, Option<&RestError>) + Send + Sync;

pub type UncaughtListener = dyn Fn(&Request, &mut Response, Option<&Route>, &RestError) + Send + Sync;

/// Claims the errors of one category, see [`RestError::category`].
///
/// The engine waits for `ack` after `on_error` returns, then sends the error itself if the
/// listener did not respond.
#[async_trait]
pub trait ErrorListener: Send + Sync {
    async fn on_error(&self, req: &mut Request, res: &mut Response, err: &RestError, ack: Ack);
}

/// Acknowledgement handed to an [`ErrorListener`].
#[derive(Debug)]
pub struct Ack {
    tx: oneshot::Sender<()>,
}

impl Ack {
    pub(crate) fn channel() -> (Self, Acked) {
        let (tx, rx) = oneshot::channel();
        (Self { tx }, Acked { rx })
    }

    pub fn ack(self) {
        if self.tx.send(()).is_err() {
            debug!("error dispatch no longer waits for the acknowledgement");
        }
    }
}

pub(crate) struct Acked {
    rx: oneshot::Receiver<()>,
}

impl Acked {
    /// `false` when the listener dropped its [`Ack`] without acknowledging.
    pub(crate) async fn wait(self) -> bool {
        self.rx.await.is_ok()
    }
}

#[derive(Default)]
pub struct Events {
    after: Vec<Box<AfterListener>>,
    errors: HashMap<String, Box<dyn ErrorListener>>,
    uncaught: Vec<Box<UncaughtListener>>,
}

impl Events {
    pub fn builder() -> EventsBuilder {
        EventsBuilder::new()
    }

    pub fn emit_after(&self, req: &Request, res: &Response, err: Option<&RestError>) {
        let route = req.route().map(|route| &**route);
        for listener in &self.after {
            listener(req, res, route, err);
        }
    }

    pub fn error_listener(&self, category: &str) -> Option<&dyn ErrorListener> {
        self.errors.get(category).map(|listener| &**listener)
    }

    pub fn has_error_listener(&self, category: &str) -> bool {
        self.errors.contains_key(category)
    }

    /// Notifies uncaught-fault listeners, returns `false` when there are none.
    pub fn emit_uncaught(&self, req: &Request, res: &mut Response, err: &RestError) -> bool {
        let route = req.route().map(|route| &**route);
        for listener in &self.uncaught {
            listener(req, res, route, err);
        }
        !self.uncaught.is_empty()
    }
}

impl fmt::Debug for Events {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Events")
            .field("after", &self.after.len())
            .field("errors", &self.errors.keys().collect::<Vec<_>>())
            .field("uncaught", &self.uncaught.len())
            .finish()
    }
}

#[derive(Debug, Default)]
pub struct EventsBuilder {
    inner: Events,
}

impl EventsBuilder {
    fn new() -> Self {
        Self::default()
    }

    pub fn on_after<F>(mut self, listener: F) -> Self
    where
        F: Fn(&Request, &Response, Option<&Route>, Option<&RestError>) + Send + Sync + 'static,
    {
        self.inner.after.push(Box::new(listener));
        self
    }

    /// Registers the listener for `category`, replacing any previous one.
    pub fn on_error<L: ErrorListener + 'static>(mut self, category: impl Into<String>, listener: L) -> Self {
        self.inner.errors.insert(category.into(), Box::new(listener));
        self
    }

    pub fn on_uncaught<F>(mut self, listener: F) -> Self
    where
        F: Fn(&Request, &mut Response, Option<&Route>, &RestError) + Send + Sync + 'static,
    {
        self.inner.uncaught.push(Box::new(listener));
        self
    }

    pub fn build(self) -> Events {
        self.inner
    }
}
