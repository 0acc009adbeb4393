//! Concurrent process runner with graceful shutdown for the gateway.
//!
//! The runner owns the main task's lifecycle: it spawns the long-running
//! gateway processes (radio pipeline, broker transport), parks until a
//! termination signal or a process failure, then cancels everything and
//! runs the registered closers under a timeout.
//!
//! Signal handling is re-entrant safe: the first SIGINT/SIGTERM starts a
//! graceful shutdown, a second one forces an immediate exit.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// A long-running gateway process. Receives a cancellation token and
/// runs until cancelled or failed.
pub type AppProcess = Box<
    dyn FnOnce(CancellationToken) -> Pin<Box<dyn Future<Output = Result<(), anyhow::Error>> + Send>>
        + Send,
>;

/// A cleanup function executed after all processes have stopped.
pub type Closer =
    Box<dyn FnOnce() -> Pin<Box<dyn Future<Output = Result<(), anyhow::Error>> + Send>> + Send>;

pub struct Runner {
    processes: Vec<(String, AppProcess)>,
    closers: Vec<Closer>,
    closer_timeout: Duration,
    shutdown_timeout: Duration,
    cancellation_token: CancellationToken,
}

impl Default for Runner {
    fn default() -> Self {
        Self::new()
    }
}

impl Runner {
    pub fn new() -> Self {
        Self {
            processes: Vec::new(),
            closers: Vec::new(),
            closer_timeout: Duration::from_secs(10),
            shutdown_timeout: Duration::from_secs(10),
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Adds a named process. Processes run concurrently; if any returns
    /// an error, all others are cancelled and the runner exits non-zero.
    pub fn with_named_process<F, Fut>(mut self, name: impl Into<String>, process: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), anyhow::Error>> + Send + 'static,
    {
        self.processes
            .push((name.into(), Box::new(|token| Box::pin(process(token)))));
        self
    }

    /// Adds a boxed process, for components that build their own
    /// `AppProcess` (see `into_runner_process` on the transports).
    pub fn with_boxed_process(mut self, name: impl Into<String>, process: AppProcess) -> Self {
        self.processes.push((name.into(), process));
        self
    }

    /// Adds a cleanup function, run after every process has stopped
    /// regardless of how they stopped.
    pub fn with_closer<F, Fut>(mut self, closer: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), anyhow::Error>> + Send + 'static,
    {
        self.closers.push(Box::new(|| Box::pin(closer())));
        self
    }

    pub fn with_closer_timeout(mut self, timeout: Duration) -> Self {
        self.closer_timeout = timeout;
        self
    }

    /// Bounds how long shutdown waits for the remaining processes to
    /// finish their own teardown before aborting them.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Allows external control over cancellation, mainly for tests.
    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = token;
        self
    }

    /// Runs all processes until completion, failure or a termination
    /// signal, then executes closers and exits the process: code 0 on
    /// graceful shutdown, 1 when a process errored.
    pub async fn run(self) {
        let token = self.cancellation_token;
        let mut join_set = JoinSet::new();

        for (name, process) in self.processes {
            let process_token = token.clone();
            join_set.spawn(async move {
                let result = process(process_token).await;
                (name, result)
            });
        }

        spawn_signal_listener(token.clone());

        let first_error = join_processes(&mut join_set, &token, self.shutdown_timeout).await;

        if !self.closers.is_empty() {
            tracing::info!(timeout = ?self.closer_timeout, "running closers");
            match tokio::time::timeout(self.closer_timeout, run_closers(self.closers)).await {
                Ok(()) => tracing::info!("all closers completed"),
                Err(_) => tracing::error!(timeout = ?self.closer_timeout, "closers timed out"),
            }
        }

        if let Some(err) = first_error {
            tracing::error!(error = %format!("{err:#}"), "gateway exiting after process failure");
            std::process::exit(1);
        }
        tracing::info!("gateway exiting normally");
        std::process::exit(0);
    }
}

/// Joins every process to completion. The first failure cancels the
/// token; from then on the remaining processes are running their own
/// teardown, so they are still joined rather than aborted. The drain
/// is bounded by the shutdown timeout, after which anything still
/// running is aborted.
async fn join_processes(
    join_set: &mut JoinSet<(String, Result<(), anyhow::Error>)>,
    token: &CancellationToken,
    shutdown_timeout: Duration,
) -> Option<anyhow::Error> {
    let mut first_error = None;
    let mut deadline = None;

    loop {
        if deadline.is_none() && token.is_cancelled() {
            deadline = Some(tokio::time::Instant::now() + shutdown_timeout);
        }

        let joined = match deadline {
            Some(deadline) => {
                match tokio::time::timeout_at(deadline, join_set.join_next()).await {
                    Ok(joined) => joined,
                    Err(_) => {
                        tracing::warn!(
                            timeout = ?shutdown_timeout,
                            "processes did not stop within the shutdown timeout, aborting them"
                        );
                        join_set.shutdown().await;
                        break;
                    }
                }
            }
            None => join_set.join_next().await,
        };

        let Some(joined) = joined else { break };

        match joined {
            Ok((name, Ok(()))) => {
                tracing::debug!(process = %name, "process completed");
            }
            Ok((name, Err(err))) => {
                tracing::error!(process = %name, error = %format!("{err:#}"), "process failed");
                if first_error.is_none() {
                    first_error = Some(err);
                }
                token.cancel();
            }
            Err(err) => {
                tracing::error!(error = %err, "process panicked");
                if first_error.is_none() {
                    first_error = Some(anyhow::anyhow!("process panicked: {err}"));
                }
                token.cancel();
            }
        }
    }

    first_error
}

/// First signal cancels the token for a graceful shutdown; a second
/// signal during shutdown forces an immediate exit instead of risking
/// a hang in cleanup.
fn spawn_signal_listener(token: CancellationToken) {
    tokio::spawn(async move {
        wait_for_signal().await;
        tracing::info!("received shutdown signal");
        token.cancel();

        wait_for_signal().await;
        tracing::warn!("received second shutdown signal, exiting immediately");
        std::process::exit(130);
    });
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(err) => {
            tracing::error!(error = %err, "failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(err) = result {
                tracing::error!(error = %err, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        }
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}

async fn run_closers(closers: Vec<Closer>) {
    let mut closer_set = JoinSet::new();

    for closer in closers {
        closer_set.spawn(async move { closer().await });
    }

    while let Some(result) = closer_set.join_next().await {
        match result {
            Ok(Ok(())) => tracing::debug!("closer completed"),
            Ok(Err(err)) => tracing::error!(error = %format!("{err:#}"), "closer failed"),
            Err(err) => tracing::error!(error = %err, "closer panicked"),
        }
    }
}
