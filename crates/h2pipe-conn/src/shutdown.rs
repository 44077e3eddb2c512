//! Three-phase shutdown: graceful, rude, immediate.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio::time::{timeout, Instant};
use tracing::{error, info, warn};

/// Something that can be stopped with increasing force.
///
/// Each `stop_*` call only requests; [`wait_stopped`] reports completion and
/// must be safe to call again after being abandoned.
///
/// [`wait_stopped`]: Drainable::wait_stopped
pub trait Drainable: Send + Sync {
    /// Stop taking new work and let in-flight work finish.
    fn allow_stop(&self);

    /// Abort in-flight work at the protocol level.
    fn stop_rude(&self);

    /// Cancel everything that is still running.
    fn stop_immediate(&self);

    /// Resolves once everything has stopped.
    fn wait_stopped(&self) -> impl Future<Output = ()> + Send;
}

/// The phase in which the target stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    Graceful,
    Rude,
    Immediate,
    /// Still running after all three phases.
    TimedOut,
}

impl fmt::Display for ShutdownOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ShutdownOutcome::Graceful => "graceful",
            ShutdownOutcome::Rude => "rude",
            ShutdownOutcome::Immediate => "immediate",
            ShutdownOutcome::TimedOut => "timed out",
        };
        f.write_str(name)
    }
}

/// Escalates shutdown over a total timeout split into three equal phases.
#[derive(Debug, Clone, Copy)]
pub struct ShutdownCoordinator {
    timeout: Duration,
}

impl ShutdownCoordinator {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Stop `target`, returning no later than the total timeout.
    pub async fn stop<D: Drainable>(&self, target: &D) -> ShutdownOutcome {
        let phase = self.timeout / 3;
        let started = Instant::now();
        info!(timeout = ?self.timeout, "shutdown started");

        target.allow_stop();
        if timeout(phase, target.wait_stopped()).await.is_ok() {
            info!(elapsed = ?started.elapsed(), "shutdown complete");
            return ShutdownOutcome::Graceful;
        }

        warn!(elapsed = ?started.elapsed(), "graceful drain timed out, aborting connections");
        target.stop_rude();
        if timeout(phase, target.wait_stopped()).await.is_ok() {
            info!(elapsed = ?started.elapsed(), "shutdown complete after abort");
            return ShutdownOutcome::Rude;
        }

        warn!(elapsed = ?started.elapsed(), "connections still open, cancelling tasks");
        target.stop_immediate();
        if timeout(phase, target.wait_stopped()).await.is_ok() {
            info!(elapsed = ?started.elapsed(), "shutdown complete after cancellation");
            return ShutdownOutcome::Immediate;
        }

        error!(
            critical = true,
            elapsed = ?started.elapsed(),
            "shutdown did not complete, giving up"
        );
        ShutdownOutcome::TimedOut
    }
}
