//! Application wiring: configuration, logging and the engine

use crate::logging::LogHandle;
use anyhow::{Context, Result};
use discovery_core::{EngineDeps, SyncEngine};
use discovery_docker::{DockerClient, DockerRuntime};
use discovery_etcd::{EtcdConnection, EtcdRegistry, EtcdSettings, Settings, SettingsTable};
use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Everything that lives for the whole process, built once in `main`.
pub struct App {
    etcd: EtcdConnection,
    docker: DockerClient,
    settings: Settings,
    background: Vec<JoinHandle<()>>,
    cancel: CancellationToken,
}

impl App {
    pub async fn bootstrap(log: LogHandle) -> Result<Self> {
        let cancel = CancellationToken::new();

        let etcd_settings = EtcdSettings::from_env()?;
        let etcd = EtcdConnection::connect(&etcd_settings).await?;

        let table = SettingsTable::from_env();
        let settings = table
            .load(&etcd)
            .await
            .context("Failed to load configuration")?;
        info!(
            etcd_timeout = ?*settings.etcd_timeout.borrow(),
            docker_timeout = ?*settings.docker_timeout.borrow(),
            log_level = %settings.log_level.borrow().0,
            "Configuration loaded"
        );

        let mut background = table.watch(etcd.clone_client(), cancel.clone());
        background.push(log.follow(settings.log_level.clone(), cancel.clone()));

        let docker = DockerClient::from_env().context("Invalid Docker host")?;

        Ok(Self {
            etcd,
            docker,
            settings,
            background,
            cancel,
        })
    }

    /// Run the engine until SIGINT or SIGTERM
    pub async fn run(self) -> Result<()> {
        let engine = SyncEngine::new(EngineDeps {
            runtime: DockerRuntime::new(self.docker, self.settings.docker_timeout.clone()),
            registry: EtcdRegistry::new(self.etcd.clone_client()),
            op_timeout: self.settings.etcd_timeout.clone(),
        });
        let handle = engine.start(self.cancel.clone());

        shutdown_signal().await?;
        info!("Shutdown signal received, exiting...");

        handle.stop();
        handle.join().await;
        join_background(self.background).await;

        Ok(())
    }
}

/// Wait for background tasks, logging any that panicked. Returns how many
/// failed.
async fn join_background(tasks: Vec<JoinHandle<()>>) -> usize {
    let mut failed = 0;
    for task in tasks {
        if let Err(e) = task.await {
            error!("Background task failed: {}", e);
            failed += 1;
        }
    }
    failed
}

async fn shutdown_signal() -> Result<()> {
    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result?,
        _ = terminate.recv() => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_join_background_counts_panicked_tasks() {
        let tasks = vec![
            tokio::spawn(async {}),
            tokio::spawn(async { panic!("watcher crashed"); }),
            tokio::spawn(async {}),
        ];
        assert_eq!(join_background(tasks).await, 1);
    }
}
