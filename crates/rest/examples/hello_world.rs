use micro_rest::{Flow, IntoHandler, Request, Response, Server, handler_fn};
use tracing::{Level, error};
use tracing_subscriber::FmtSubscriber;

async fn hello_world(_req: &mut Request, res: &mut Response) -> Flow {
    res.send("hello world");
    Flow::Next
}

async fn hello(req: &mut Request, res: &mut Response) -> Flow {
    let name = req.param("name").unwrap_or("world").to_owned();
    res.send(format!("hello {name}"));
    Flow::Next
}

// curl -v http://127.0.0.1:3000/hello/rust
#[tokio::main]
async fn main() {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let server = Server::builder()
        .address("127.0.0.1:3000")
        .get("/", [handler_fn(hello_world).into_handler()])
        .get("/hello/:name", [handler_fn(hello).into_handler()])
        .build();

    match server {
        Ok(server) => {
            if let Err(e) = server.start().await {
                error!(cause = %e, "server stopped with error");
            }
        }
        Err(e) => error!(cause = %e, "build server error"),
    }
}
