use bytes::Bytes;
use h2pipe_conn::{
    handler_fn, ConnectionOptions, ListenerOptions, Request, Response, Server, ServerOptions,
    ShutdownOutcome,
};
use h2pipe_transport::{Endpoint, Transport};
use tracing::{info, warn};

use crate::cmd::{parse_duration, parse_endpoint, ServeArgs};
use crate::exit::{io_error, transport_error, CliError, CliResult, SUCCESS, TIMEOUT, USAGE};
use crate::output::{print_listening, print_stopped, OutputFormat};

pub async fn run(args: ServeArgs, format: OutputFormat) -> CliResult<i32> {
    let endpoint = parse_endpoint(&args.endpoint)?;
    let options = server_options(&args)?;

    match endpoint {
        #[cfg(unix)]
        Endpoint::Unix(path) => {
            let transport = h2pipe_transport::UnixSocketTransport::bind(&path)
                .map_err(|err| transport_error("bind failed", err))?;
            serve_on(transport, args.body, options, format).await
        }
        Endpoint::Tcp(addr) => {
            let transport = h2pipe_transport::TcpTransport::bind(&addr)
                .await
                .map_err(|err| transport_error("bind failed", err))?;
            serve_on(transport, args.body, options, format).await
        }
        #[cfg(windows)]
        endpoint @ Endpoint::NamedPipe { .. } => {
            let transport = h2pipe_transport::NamedPipeTransport::bind(endpoint)
                .map_err(|err| transport_error("bind failed", err))?;
            serve_on(transport, args.body, options, format).await
        }
        Endpoint::Memory(_) => Err(CliError::new(
            USAGE,
            "memory endpoints are only reachable from inside the process",
        )),
        #[allow(unreachable_patterns)]
        other => Err(CliError::new(
            USAGE,
            format!("{} endpoints are not supported on this platform", other.kind()),
        )),
    }
}

fn server_options(args: &ServeArgs) -> CliResult<ServerOptions> {
    let defaults = ServerOptions::default();
    let accept_loops = match args.accept_loops {
        Some(0) => return Err(CliError::new(USAGE, "--accept-loops must be at least 1")),
        Some(loops) => loops,
        None => defaults.listener.accept_loops,
    };
    Ok(ServerOptions {
        listener: ListenerOptions { accept_loops },
        connection: ConnectionOptions {
            drain_timeout: parse_duration(&args.drain_timeout)?,
            keep_alive_timeout: parse_duration(&args.keep_alive_timeout)?,
            ..defaults.connection
        },
        shutdown_timeout: parse_duration(&args.shutdown_timeout)?,
    })
}

async fn serve_on<T: Transport>(
    transport: T,
    body: String,
    options: ServerOptions,
    format: OutputFormat,
) -> CliResult<i32> {
    let body = Bytes::from(body);
    let handler = handler_fn(move |request: Request| respond(request, body.clone()));
    let server = Server::start(transport, handler, options)
        .map_err(|err| transport_error("listen failed", err))?;
    let endpoint = server.endpoint().to_string();
    print_listening(&endpoint, options.listener.accept_loops, format);

    tokio::signal::ctrl_c()
        .await
        .map_err(|err| io_error("signal handler setup failed", err))?;
    info!("interrupt received, shutting down");

    let outcome = server.shutdown().await;
    print_stopped(&endpoint, outcome, format);
    match outcome {
        ShutdownOutcome::TimedOut => Err(CliError::new(
            TIMEOUT,
            "connections still open after the shutdown timeout",
        )),
        ShutdownOutcome::Graceful => Ok(SUCCESS),
        ShutdownOutcome::Rude | ShutdownOutcome::Immediate => {
            warn!(%outcome, "connections were cut off during shutdown");
            Ok(SUCCESS)
        }
    }
}

/// Echo request bodies; answer everything else with the configured text.
async fn respond(request: Request, text: Bytes) -> Response {
    info!(
        stream_id = request.stream_id,
        method = %request.method,
        path = %request.path,
        "request"
    );
    let content_type = request.header("content-type").map(Bytes::copy_from_slice);
    let received = request.body.collect().await;
    if received.is_empty() {
        return Response::text(text);
    }
    let response = match content_type {
        Some(content_type) => Response::ok().with_header("content-type", content_type),
        None => Response::ok(),
    };
    response.with_body(received)
}
