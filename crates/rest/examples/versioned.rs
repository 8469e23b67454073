use async_trait::async_trait;
use http::{Method, StatusCode};
use micro_rest::router::RouteSpec;
use micro_rest::{Ack, ErrorListener, Flow, IntoHandler, Request, Response, RestError, Server, handler_fn};
use serde::Serialize;
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

#[derive(Serialize)]
struct User<'a> {
    id: &'a str,
    version: String,
}

async fn load_user(req: &mut Request, _res: &mut Response) -> Flow {
    match req.param("id") {
        Some(id) if id.chars().all(|c| c.is_ascii_digit()) => Flow::Next,
        _ => Flow::fail(RestError::bad_request("id must be numeric")),
    }
}

async fn get_user(req: &mut Request, res: &mut Response) -> Flow {
    let version = req.matched_version().map(ToString::to_string).unwrap_or_else(|| "*".to_owned());
    let user = User { id: req.param("id").unwrap_or_default(), version };
    res.send_json(StatusCode::OK, &user);
    Flow::Next
}

// old clients are served by the latest handler
async fn legacy(_req: &mut Request, _res: &mut Response) -> Flow {
    Flow::redirect("get_user")
}

struct NotFound;

#[async_trait]
impl ErrorListener for NotFound {
    async fn on_error(&self, req: &mut Request, _res: &mut Response, _err: &RestError, ack: Ack) {
        info!(path = req.path(), "no such resource");
        ack.ack();
    }
}

// curl -v -H 'accept-version: ~2' http://127.0.0.1:3000/users/42
// curl -v -H 'accept-version: 1.0.0' http://127.0.0.1:3000/users/42
#[tokio::main]
async fn main() {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::DEBUG).finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let loader = handler_fn(load_user).into_handler();
    let server = Server::builder()
        .address("127.0.0.1:3000")
        .with([loader])
        .route(
            RouteSpec::new(Method::GET, "/users/:id").versions(["2.0.0", "2.1.0"]).name("get_user"),
            [handler_fn(get_user).into_handler()],
        )
        .route(RouteSpec::new(Method::GET, "/users/:id").version("1.0.0"), [handler_fn(legacy).into_handler()])
        .on_error("NotFound", NotFound)
        .on_after(|req, res, route, err| {
            info!(
                path = req.path(),
                status = %res.status(),
                route = route.map(|r| r.name()),
                error = err.map(RestError::code),
                "after"
            );
        })
        .build()
        .expect("routes are valid");

    server.start().await.expect("server failed");
}
