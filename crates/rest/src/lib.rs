//! An async micro REST framework.
//!
//! Routes are matched on method, path and the semver range a client sends in
//! `accept-version`, then run through an interruptible handler chain. Every handler returns a
//! [`Flow`]: continue, stop, fail with a [`RestError`], or redirect once to another route by name.

mod config;
mod error;
mod events;
mod handler;
mod request;
mod response;
mod server;

pub mod chain;
pub mod router;

pub use chain::Flow;
pub use config::ServerConfig;
pub use error::MountError;
pub use error::RenderError;
pub use error::RestError;
pub use events::Ack;
pub use events::ErrorListener;
pub use events::Events;
pub use events::EventsBuilder;
pub use handler::BoxedHandler;
pub use handler::FnHandler;
pub use handler::Handler;
pub use handler::HandlerChain;
pub use handler::HandlerFn;
pub use handler::IntoHandler;
pub use handler::handler_fn;
pub use request::ACCEPT_VERSION;
pub use request::ANY_VERSION;
pub use request::PathParams;
pub use request::Request;
pub use request::X_API_VERSION;
pub use response::Response;
pub use router::Router;
pub use server::Server;
pub use server::ServerBuilder;
pub use server::ServerError;
