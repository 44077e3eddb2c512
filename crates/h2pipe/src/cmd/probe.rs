use std::time::Instant;

use h2pipe_conn::{ClientRequest, ClientResponse, ClientSession};
use h2pipe_transport::Endpoint;
use tracing::debug;

use crate::cmd::{parse_duration, parse_endpoint, parse_header, ProbeArgs};
use crate::exit::{
    connection_error, transport_error, CliError, CliResult, FAILURE, SUCCESS, TIMEOUT, USAGE,
};
use crate::output::{print_response, OutputFormat};

pub async fn run(args: ProbeArgs, format: OutputFormat) -> CliResult<i32> {
    let endpoint = parse_endpoint(&args.endpoint)?;
    if matches!(endpoint, Endpoint::Memory(_)) {
        return Err(CliError::new(
            USAGE,
            "memory endpoints are only reachable from inside the process",
        ));
    }
    let timeout = parse_duration(&args.timeout)?;
    let request = build_request(&args, &endpoint)?;

    let started = Instant::now();
    let response = tokio::time::timeout(timeout, exchange(&endpoint, request))
        .await
        .map_err(|_| {
            CliError::new(
                TIMEOUT,
                format!("no response from {endpoint} within {timeout:?}"),
            )
        })??;
    let elapsed_ms = started.elapsed().as_millis();

    print_response(&response, &endpoint.to_string(), elapsed_ms, format);
    if response.status >= 400 {
        return Ok(FAILURE);
    }
    Ok(SUCCESS)
}

fn build_request(args: &ProbeArgs, endpoint: &Endpoint) -> CliResult<ClientRequest> {
    let mut request = ClientRequest::new(args.method.to_ascii_uppercase(), args.path.clone());
    if let Endpoint::Tcp(addr) = endpoint {
        request = request.with_authority(addr.clone());
    }
    for header in &args.header {
        let (name, value) = parse_header(header)?;
        request = request.with_header(name, value);
    }
    if let Some(data) = &args.data {
        request = request.with_body(data.clone());
    }
    Ok(request)
}

async fn exchange(endpoint: &Endpoint, request: ClientRequest) -> CliResult<ClientResponse> {
    let stream = h2pipe_transport::connect(endpoint)
        .await
        .map_err(|err| transport_error("connect failed", err))?;
    let mut session = ClientSession::connect(stream)
        .await
        .map_err(|err| connection_error("handshake failed", err))?;
    debug!(settings = ?session.peer_settings(), "connected");

    let response = session
        .request(request)
        .await
        .map_err(|err| connection_error("request failed", err))?;
    if let Err(err) = session.close().await {
        debug!(error = %err, "close after response failed");
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> ProbeArgs {
        ProbeArgs {
            endpoint: "tcp:127.0.0.1:9".to_string(),
            method: "post".to_string(),
            path: "/submit".to_string(),
            header: vec!["X-Trace: abc".to_string()],
            data: Some("payload".to_string()),
            timeout: "1s".to_string(),
        }
    }

    #[test]
    fn request_from_flags() {
        let args = args();
        let endpoint = parse_endpoint(&args.endpoint).unwrap();
        let request = build_request(&args, &endpoint).expect("request should build");
        assert_eq!(request.method, "POST");
        assert_eq!(request.path, "/submit");
        assert_eq!(request.authority.as_deref(), Some("127.0.0.1:9"));
        assert_eq!(
            request.headers,
            vec![("x-trace".to_string(), "abc".to_string())]
        );
        assert_eq!(&request.body[..], b"payload");
    }
}
