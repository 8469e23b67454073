//! The dispatch engine: walks a request through its handler chain, one handler at a time.

mod dispatcher;
mod flow;
mod state;

pub use dispatcher::ChainSource;
pub use dispatcher::Completion;
pub use dispatcher::Dispatcher;
pub use dispatcher::RedirectTarget;
pub use flow::Flow;
pub use state::Chain;
pub use state::ChainState;
pub use state::Outcome;
pub use state::Step;
pub use state::Ticket;
