use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::Cli;
use crate::config::InitializerConfig;
use crate::domain::reconciler::Reconciler;
use crate::platform::k8s::KubeNodeRegistry;
use crate::platform::k8s::KubePodGateway;
use crate::platform::k8s::PodWatcher;
use crate::platform::kube_client;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Wires the Kubernetes client, reconciler and pod watcher together.
pub struct Application {
    cli: Cli,
    cancellation_token: CancellationToken,
}

impl Application {
    pub fn new(cli: Cli) -> Self {
        Self {
            cli,
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Run until SIGINT/SIGTERM or until the watcher task exits.
    pub async fn run(&self) -> Result<()> {
        let config = InitializerConfig::from(&self.cli);
        tracing::info!(
            initializer = %config.initializer_name,
            annotation = %config.annotation,
            require_annotation = config.require_annotation,
            baseline_arch = %config.baseline_architecture,
            patch_format = %config.patch_format,
            "Starting the Kubernetes initializer"
        );

        let client = kube_client::init_kube_client(self.cli.kubeconfig.as_deref())
            .await
            .map_err(|e| anyhow::anyhow!("Failed to initialize Kubernetes client: {e:?}"))?;

        let reconciler = Arc::new(Reconciler::new(
            config,
            Arc::new(KubeNodeRegistry::new(client.clone())),
            Arc::new(KubePodGateway::new(client.clone())),
        ));
        let watcher = PodWatcher::new(
            client,
            self.cli.namespace.clone(),
            reconciler,
            usize::from(self.cli.concurrency),
        );

        let token = self.cancellation_token.clone();
        let watcher_task: JoinHandle<()> = tokio::spawn(async move {
            tracing::info!("Starting pod watcher task");
            if let Err(e) = watcher.run(token).await {
                tracing::error!("Pod watcher stopped: {e:?}");
            }
            tracing::info!("Pod watcher task completed");
        });

        supervise(
            shutdown_signal(),
            &self.cancellation_token,
            watcher_task,
            SHUTDOWN_TIMEOUT,
        )
        .await?;

        Ok(())
    }
}

/// How [`supervise`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shutdown {
    /// Signal received and the watcher stopped within the timeout.
    Graceful,
    /// Signal received but the watcher had to be aborted.
    TimedOut,
    /// The watcher task returned on its own.
    WatcherExited,
}

/// Wait for `shutdown` or for the watcher task to finish, whichever comes first.
///
/// On shutdown the token is cancelled and the watcher gets `shutdown_timeout` to return
/// before it is aborted. The token is cancelled on every exit path.
async fn supervise<F>(
    shutdown: F,
    cancellation_token: &CancellationToken,
    mut watcher_task: JoinHandle<()>,
    shutdown_timeout: Duration,
) -> Result<Shutdown>
where
    F: Future<Output = Result<()>>,
{
    tokio::select! {
        signal = shutdown => {
            cancellation_token.cancel();
            signal?;
            tracing::info!("Shutdown signal received, exiting...");

            match tokio::time::timeout(shutdown_timeout, &mut watcher_task).await {
                Ok(Ok(())) => Ok(Shutdown::Graceful),
                Ok(Err(e)) => {
                    tracing::error!("Pod watcher task failed during shutdown: {e}");
                    Ok(Shutdown::Graceful)
                }
                Err(_) => {
                    tracing::warn!("Pod watcher did not stop within {shutdown_timeout:?}, aborting");
                    watcher_task.abort();
                    Ok(Shutdown::TimedOut)
                }
            }
        }
        result = &mut watcher_task => {
            cancellation_token.cancel();
            if let Err(e) = result {
                tracing::error!("Pod watcher task failed: {e}");
                return Err(e.into());
            }
            tracing::warn!("Pod watcher task exited unexpectedly");
            Ok(Shutdown::WatcherExited)
        }
    }
}

/// Resolves on the first SIGINT or SIGTERM.
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, initiating graceful shutdown");
            }
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT, initiating graceful shutdown");
            }
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        tracing::info!("Received Ctrl+C, initiating graceful shutdown");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::future::pending;

    use similar_asserts::assert_eq;
    use test_log::test;
    use tokio::sync::oneshot;

    use super::*;

    const SHORT_TIMEOUT: Duration = Duration::from_millis(50);

    #[test(tokio::test)]
    async fn signal_cancels_and_joins_watcher() {
        let token = CancellationToken::new();
        let watcher_token = token.clone();
        let watcher = tokio::spawn(async move { watcher_token.cancelled().await });

        let shutdown = supervise(async { Ok(()) }, &token, watcher, SHUTDOWN_TIMEOUT)
            .await
            .unwrap();

        assert_eq!(shutdown, Shutdown::Graceful);
        assert!(token.is_cancelled());
    }

    #[test(tokio::test)]
    async fn stuck_watcher_is_aborted_after_timeout() {
        let token = CancellationToken::new();
        let (alive, dropped) = oneshot::channel::<()>();
        let watcher = tokio::spawn(async move {
            let _alive = alive;
            pending::<()>().await
        });

        let shutdown = supervise(async { Ok(()) }, &token, watcher, SHORT_TIMEOUT)
            .await
            .unwrap();

        assert_eq!(shutdown, Shutdown::TimedOut);
        assert!(token.is_cancelled());
        // the aborted task drops its sender
        assert!(dropped.await.is_err());
    }

    #[test(tokio::test)]
    async fn watcher_exit_cancels_token() {
        let token = CancellationToken::new();
        let watcher = tokio::spawn(async {});

        let shutdown = supervise(pending(), &token, watcher, SHUTDOWN_TIMEOUT)
            .await
            .unwrap();

        assert_eq!(shutdown, Shutdown::WatcherExited);
        assert!(token.is_cancelled());
    }

    #[test(tokio::test)]
    async fn panicking_watcher_is_an_error() {
        let token = CancellationToken::new();
        let watcher = tokio::spawn(async { panic!("watcher crashed") });

        let result = supervise(pending(), &token, watcher, SHUTDOWN_TIMEOUT).await;

        assert!(result.is_err());
        assert!(token.is_cancelled());
    }

    #[test(tokio::test)]
    async fn failed_signal_handler_still_cancels() {
        let token = CancellationToken::new();
        let watcher = tokio::spawn(pending::<()>());

        let result = supervise(
            async { Err(anyhow::anyhow!("no signal handler")) },
            &token,
            watcher,
            SHUTDOWN_TIMEOUT,
        )
        .await;

        assert!(result.is_err());
        assert!(token.is_cancelled());
    }
}
