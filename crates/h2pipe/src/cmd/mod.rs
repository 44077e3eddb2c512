use std::time::Duration;

use clap::{Args, Subcommand};
use h2pipe_transport::Endpoint;

use crate::exit::{transport_error, CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod probe;
pub mod serve;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve a fixed text response, echoing request bodies.
    Serve(ServeArgs),
    /// Send one request and print the response.
    Probe(ProbeArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub async fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args, format).await,
        Command::Probe(args) => probe::run(args, format).await,
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Endpoint to listen on (unix:PATH, tcp:HOST:PORT, pipe:NAME).
    pub endpoint: String,
    /// Independent accept loops. Default: available cores, at most 16.
    #[arg(long, env = "H2PIPE_ACCEPT_LOOPS")]
    pub accept_loops: Option<usize>,
    /// Total budget for the three shutdown phases (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s", env = "H2PIPE_SHUTDOWN_TIMEOUT")]
    pub shutdown_timeout: String,
    /// How long in-flight streams may run once a connection drains.
    #[arg(long, default_value = "5s", env = "H2PIPE_DRAIN_TIMEOUT")]
    pub drain_timeout: String,
    /// How long a connection may stay idle before it is closed gracefully.
    #[arg(long, default_value = "130s", env = "H2PIPE_KEEP_ALIVE_TIMEOUT")]
    pub keep_alive_timeout: String,
    /// Response body for requests without a body.
    #[arg(long, default_value = "Hello, World!")]
    pub body: String,
}

#[derive(Args, Debug)]
pub struct ProbeArgs {
    /// Endpoint to connect to (unix:PATH, tcp:HOST:PORT, pipe:NAME).
    pub endpoint: String,
    /// Request method.
    #[arg(long, default_value = "GET")]
    pub method: String,
    /// Request path.
    #[arg(long, default_value = "/")]
    pub path: String,
    /// Extra request header as NAME:VALUE. Repeatable.
    #[arg(long, value_name = "NAME:VALUE")]
    pub header: Vec<String>,
    /// Request body.
    #[arg(long)]
    pub data: Option<String>,
    /// Time allowed for connecting and the whole exchange (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub fn parse_endpoint(input: &str) -> CliResult<Endpoint> {
    input
        .parse()
        .map_err(|err| transport_error("invalid endpoint", err))
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}

/// Split `NAME:VALUE`, trimming whitespace around the value.
pub fn parse_header(input: &str) -> CliResult<(String, String)> {
    let (name, value) = input
        .split_once(':')
        .ok_or_else(|| CliError::new(USAGE, format!("header must be NAME:VALUE: {input}")))?;
    let name = name.trim();
    if name.is_empty() || name.starts_with(':') {
        return Err(CliError::new(USAGE, format!("invalid header name: {input}")));
    }
    Ok((name.to_ascii_lowercase(), value.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations() {
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("3s").unwrap(), Duration::from_secs(3));
        assert_eq!(parse_duration("7").unwrap(), Duration::from_secs(7));
        assert_eq!(parse_duration("0s").unwrap_err().code, USAGE);
        assert_eq!(parse_duration("soon").unwrap_err().code, USAGE);
    }

    #[test]
    fn headers() {
        assert_eq!(
            parse_header("X-Trace: abc").unwrap(),
            ("x-trace".to_string(), "abc".to_string())
        );
        assert_eq!(
            parse_header("accept:text/plain").unwrap(),
            ("accept".to_string(), "text/plain".to_string())
        );
        assert_eq!(parse_header("no-colon").unwrap_err().code, USAGE);
        assert_eq!(parse_header(":path:/x").unwrap_err().code, USAGE);
    }

    #[test]
    fn endpoints() {
        assert!(matches!(
            parse_endpoint("unix:/tmp/a.sock").unwrap(),
            Endpoint::Unix(_)
        ));
        assert_eq!(parse_endpoint("carrier-pigeon").unwrap_err().code, USAGE);
    }
}
