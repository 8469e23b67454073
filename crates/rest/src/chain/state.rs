use crate::chain::Flow;
use crate::error::RestError;
use crate::handler::{BoxedHandler, HandlerChain};
use std::fmt;
use std::sync::Arc;

/// Identifies one invocation of one handler.
///
/// A resolution carrying a ticket other than the current one is stale and ignored, which
/// keeps a handler from advancing the chain twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket {
    index: usize,
    generation: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainState {
    Idle,
    /// The handler at this index is running.
    Running(usize),
    /// A redirect was requested and the target chain has not been spliced in yet.
    Redirecting,
    Finished,
}

/// How a chain ended.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// Every handler returned [`Flow::Next`].
    Exhausted,
    /// A handler returned [`Flow::Stop`].
    Stopped,
    /// A handler or the engine reported an error that still has to be delivered.
    Failed(RestError),
    /// A handler panicked; the uncaught fault was already delivered.
    Faulted(RestError),
}

/// What the engine must do next.
pub enum Step {
    Invoke(Ticket, BoxedHandler),
    Redirect(String),
    Done(Outcome),
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Invoke(ticket, _) => f.debug_tuple("Invoke").field(ticket).finish_non_exhaustive(),
            Step::Redirect(name) => f.debug_tuple("Redirect").field(name).finish(),
            Step::Done(outcome) => f.debug_tuple("Done").field(outcome).finish(),
        }
    }
}

/// The cursor over a handler chain for a single request.
pub struct Chain {
    handlers: HandlerChain,
    // `None` until the first handler is invoked
    cursor: Option<usize>,
    generation: u32,
    state: ChainState,
    redirected: bool,
    executed: Vec<BoxedHandler>,
}

impl fmt::Debug for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chain")
            .field("len", &self.handlers.len())
            .field("cursor", &self.cursor)
            .field("state", &self.state)
            .field("redirected", &self.redirected)
            .finish_non_exhaustive()
    }
}

impl Chain {
    pub fn new(handlers: HandlerChain) -> Self {
        Self { handlers, cursor: None, generation: 0, state: ChainState::Idle, redirected: false, executed: Vec::new() }
    }

    pub fn state(&self) -> ChainState {
        self.state
    }

    #[inline]
    pub fn is_finished(&self) -> bool {
        self.state == ChainState::Finished
    }

    /// Handlers invoked so far, in order, across a redirect.
    pub fn executed(&self) -> &[BoxedHandler] {
        &self.executed
    }

    pub fn start(&mut self) -> Step {
        if self.state != ChainState::Idle {
            return Step::Done(Outcome::Failed(RestError::internal("handler chain already started")));
        }
        self.advance()
    }

    /// Applies the flow returned by the handler `ticket` was issued to.
    ///
    /// Returns `None` for a stale ticket or a finished chain.
    pub fn resolve(&mut self, ticket: Ticket, flow: Flow) -> Option<Step> {
        if self.current() != Some(ticket) {
            return None;
        }

        let step = match flow {
            Flow::Next => self.advance(),
            Flow::Stop => self.finish(Outcome::Stopped),
            Flow::Fail(err) => self.finish(Outcome::Failed(err)),
            Flow::Redirect(name) if self.redirected => self.finish(Outcome::Failed(RestError::internal(format!(
                "redirect to `{name}` refused, the request was already redirected"
            )))),
            Flow::Redirect(name) => {
                self.redirected = true;
                self.state = ChainState::Redirecting;
                Step::Redirect(name)
            }
        };
        Some(step)
    }

    /// Continues with `target`, skipping handlers that already ran for this request.
    ///
    /// Returns `None` unless a redirect is pending.
    pub fn splice(&mut self, target: &HandlerChain) -> Option<Step> {
        if self.state != ChainState::Redirecting {
            return None;
        }
        let remaining = target
            .handlers()
            .iter()
            .filter(|handler| !self.executed.iter().any(|done| Arc::ptr_eq(done, handler)))
            .cloned()
            .collect::<Vec<_>>();

        self.handlers = HandlerChain::new(remaining);
        self.cursor = None;
        self.generation = self.generation.wrapping_add(1);
        Some(self.advance())
    }

    /// Ends the chain with `err` unless it has already finished.
    pub fn abort(&mut self, err: RestError) -> Option<Step> {
        (!self.is_finished()).then(|| self.finish(Outcome::Failed(err)))
    }

    /// Ends the chain after a handler panic unless it has already finished.
    pub fn fault(&mut self, err: RestError) -> Option<Step> {
        (!self.is_finished()).then(|| self.finish(Outcome::Faulted(err)))
    }

    fn current(&self) -> Option<Ticket> {
        match self.state {
            ChainState::Running(index) => Some(Ticket { index, generation: self.generation }),
            _ => None,
        }
    }

    fn advance(&mut self) -> Step {
        let next = self.cursor.map_or(0, |index| index + 1);
        match self.handlers.handlers().get(next) {
            Some(handler) => {
                let handler = Arc::clone(handler);
                self.cursor = Some(next);
                self.state = ChainState::Running(next);
                self.executed.push(Arc::clone(&handler));
                Step::Invoke(Ticket { index: next, generation: self.generation }, handler)
            }
            None => self.finish(Outcome::Exhausted),
        }
    }

    fn finish(&mut self, outcome: Outcome) -> Step {
        self.state = ChainState::Finished;
        Step::Done(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::{Chain, ChainState, Outcome, Step, Ticket};
    use crate::chain::Flow;
    use crate::error::RestError;
    use crate::handler::{BoxedHandler, HandlerChain, IntoHandler, handler_fn};
    use crate::request::Request;
    use crate::response::Response;
    use std::sync::Arc;

    async fn noop(_req: &mut Request, _res: &mut Response) -> Flow {
        Flow::Next
    }

    fn handlers(n: usize) -> Vec<BoxedHandler> {
        (0..n).map(|_| handler_fn(noop).into_handler()).collect()
    }

    fn invoked(step: Step) -> (Ticket, BoxedHandler) {
        match step {
            Step::Invoke(ticket, handler) => (ticket, handler),
            other => panic!("expected an invocation, got {other:?}"),
        }
    }

    #[test]
    fn test_runs_in_order_then_exhausts() {
        let list = handlers(3);
        let mut chain = Chain::new(HandlerChain::new(list.clone()));
        assert_eq!(chain.state(), ChainState::Idle);

        let mut step = chain.start();
        for expected in &list {
            let (ticket, handler) = invoked(step);
            assert!(Arc::ptr_eq(&handler, expected));
            step = chain.resolve(ticket, Flow::Next).unwrap();
        }
        assert!(matches!(step, Step::Done(Outcome::Exhausted)));
        assert!(chain.is_finished());
        assert_eq!(chain.executed().len(), 3);
    }

    #[test]
    fn test_empty_chain_exhausts_immediately() {
        let mut chain = Chain::new(HandlerChain::default());
        assert!(matches!(chain.start(), Step::Done(Outcome::Exhausted)));
    }

    #[test]
    fn test_second_start_fails() {
        let mut chain = Chain::new(HandlerChain::new(handlers(1)));
        let _ = invoked(chain.start());
        assert!(matches!(chain.start(), Step::Done(Outcome::Failed(RestError::InternalError { .. }))));
        assert_eq!(chain.state(), ChainState::Running(0));
    }

    #[test]
    fn test_double_resolve_is_ignored() {
        let mut chain = Chain::new(HandlerChain::new(handlers(3)));
        let (ticket, _) = invoked(chain.start());

        let (second, _) = invoked(chain.resolve(ticket, Flow::Next).unwrap());
        assert!(chain.resolve(ticket, Flow::Next).is_none());
        assert_eq!(chain.state(), ChainState::Running(1));

        assert!(matches!(chain.resolve(second, Flow::Stop), Some(Step::Done(Outcome::Stopped))));
        assert!(chain.resolve(second, Flow::Next).is_none());
    }

    #[test]
    fn test_error_short_circuits() {
        let mut chain = Chain::new(HandlerChain::new(handlers(3)));
        let (ticket, _) = invoked(chain.start());
        let step = chain.resolve(ticket, Flow::Fail(RestError::bad_request("bad"))).unwrap();

        assert!(matches!(step, Step::Done(Outcome::Failed(RestError::BadRequest { .. }))));
        assert_eq!(chain.executed().len(), 1);
        assert!(chain.abort(RestError::internal("late")).is_none());
    }

    #[test]
    fn test_redirect_skips_executed_handlers() {
        let shared = handlers(1).remove(0);
        let own = handlers(1).remove(0);
        let mut chain = Chain::new(HandlerChain::new(vec![Arc::clone(&shared)]));
        let (ticket, _) = invoked(chain.start());

        let step = chain.resolve(ticket, Flow::redirect("target")).unwrap();
        assert!(matches!(step, Step::Redirect(ref name) if name == "target"));
        assert_eq!(chain.state(), ChainState::Redirecting);
        assert!(chain.resolve(ticket, Flow::Next).is_none());

        let target = HandlerChain::new(vec![Arc::clone(&shared), Arc::clone(&own)]);
        let (next, handler) = invoked(chain.splice(&target).unwrap());
        assert!(Arc::ptr_eq(&handler, &own));
        assert_ne!(next, ticket);

        let step = chain.resolve(next, Flow::redirect("again")).unwrap();
        assert!(matches!(step, Step::Done(Outcome::Failed(RestError::InternalError { .. }))));
    }

    #[test]
    fn test_splice_without_redirect_is_ignored() {
        let mut chain = Chain::new(HandlerChain::new(handlers(1)));
        let _ = invoked(chain.start());
        assert!(chain.splice(&HandlerChain::new(handlers(2))).is_none());
    }
}
