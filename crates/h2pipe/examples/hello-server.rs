//! Serves "Hello, World!" over TCP until Ctrl-C.
//!
//! ```text
//! cargo run -p h2pipe --example hello-server
//! cargo run -p h2pipe --features cli -- probe tcp:127.0.0.1:<port>
//! ```

use h2pipe::transport::TcpTransport;
use h2pipe::{handler_fn, Request, Response, Server, ServerOptions};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let transport = TcpTransport::bind("127.0.0.1:0").await?;
    let addr = transport.local_addr()?;

    let handler = handler_fn(|request: Request| async move {
        match request.path.as_str() {
            "/" => Response::text("Hello, World!"),
            _ => Response::new(404),
        }
    });
    let server = Server::start(transport, handler, ServerOptions::default())?;
    println!("listening on tcp:{addr}");

    tokio::signal::ctrl_c().await?;
    let outcome = server.shutdown().await;
    println!("stopped: {outcome}");
    Ok(())
}
