//! Bridge runner for lifecycle management.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use sensorbus_common::{connect, init_tracing};

use crate::BridgeArgs;
use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::publisher::Publisher;
use crate::status::StatusPublisher;

/// How long workers get to finish after shutdown is signalled.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Bridge runner that manages the lifecycle of a bridge.
///
/// Handles:
/// - Logging initialization
/// - Zenoh connection
/// - Task spawning
/// - Graceful shutdown on Ctrl+C through a watch channel
/// - Status publishing (optional)
///
/// Workers obtain a receiver from [`shutdown_signal`](Self::shutdown_signal)
/// and return once it flips to `true`. Workers still running after the grace
/// period are aborted.
pub struct BridgeRunner<C: BridgeConfig> {
    name: String,
    version: String,
    config: C,
    session: Arc<zenoh::Session>,
    publisher: Publisher,
    status_publisher: Option<StatusPublisher>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<(String, JoinHandle<()>)>,
}

impl<C: BridgeConfig> BridgeRunner<C> {
    /// Create a new bridge runner.
    ///
    /// This will:
    /// 1. Initialize logging from the config
    /// 2. Connect to Zenoh
    /// 3. Create the publisher with the configured serialization format
    pub async fn new(name: impl Into<String>, config: C) -> Result<Self> {
        Self::new_with_args(name, config, None).await
    }

    /// Create a new bridge runner with CLI args for log level override.
    pub async fn new_with_args(
        name: impl Into<String>,
        config: C,
        args: Option<&BridgeArgs>,
    ) -> Result<Self> {
        let name = name.into();
        let version = env!("CARGO_PKG_VERSION").to_string();

        let level = args.and_then(|a| a.log_level.as_deref());
        let log_config = config.logging().with_level_override(level);
        init_tracing(&log_config).map_err(|e| BridgeError::config(e.to_string()))?;

        tracing::info!(bridge = %name, version = %version, "Starting bridge");

        let session = Arc::new(
            connect(config.zenoh())
                .await
                .map_err(|e| BridgeError::ZenohConnection(e.to_string()))?,
        );

        let publisher = Publisher::new(
            session.clone(),
            config.key_prefix(),
            config.serialization(),
        );
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            name,
            version,
            config,
            session,
            publisher,
            status_publisher: None,
            shutdown_tx,
            tasks: Vec::new(),
        })
    }

    /// Enable status publishing.
    ///
    /// When enabled, the runner publishes status on startup and shutdown.
    pub fn with_status_publishing(mut self) -> Self {
        self.status_publisher = Some(StatusPublisher::new(
            self.publisher.clone(),
            &self.name,
            &self.version,
        ));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn config(&self) -> &C {
        &self.config
    }

    pub fn session(&self) -> &Arc<zenoh::Session> {
        &self.session
    }

    /// Get a clone of the publisher.
    pub fn publisher(&self) -> Publisher {
        self.publisher.clone()
    }

    /// A receiver that flips to `true` when the bridge is shutting down.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Spawn a worker task.
    pub fn spawn<F>(&mut self, name: impl Into<String>, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.push((name.into(), tokio::spawn(future)));
    }

    /// Spawn a worker task that returns a Result.
    ///
    /// Errors are logged automatically.
    pub fn spawn_with_error<F, E>(&mut self, name: impl Into<String>, future: F)
    where
        F: Future<Output = std::result::Result<(), E>> + Send + 'static,
        E: std::fmt::Display + Send + 'static,
    {
        let name = name.into();
        let worker = name.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = future.await {
                tracing::error!(worker = %worker, error = %e, "Worker failed");
            }
        });
        self.tasks.push((name, handle));
    }

    /// Run the bridge with custom status metadata until Ctrl+C.
    pub async fn run_with_metadata(self, metadata: Option<serde_json::Value>) -> Result<()> {
        self.run_until(metadata, async {
            if let Err(e) = signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            }
        })
        .await
    }

    /// Run the bridge until `stop` completes.
    ///
    /// This will:
    /// 1. Publish "running" status (if enabled)
    /// 2. Wait for `stop`
    /// 3. Signal shutdown and wait for workers, up to the grace period
    /// 4. Abort workers still running
    /// 5. Publish "offline" status (if enabled)
    /// 6. Close the Zenoh session
    pub async fn run_until<F>(mut self, metadata: Option<serde_json::Value>, stop: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        if let Some(status_pub) = self.status_publisher.as_mut() {
            if let Err(e) = status_pub.publish_running(metadata).await {
                tracing::warn!(error = %e, "Failed to publish running status");
            }
        }

        tracing::info!(
            bridge = %self.name,
            tasks = self.tasks.len(),
            "Bridge running. Press Ctrl+C to stop."
        );

        stop.await;

        tracing::info!(bridge = %self.name, "Received shutdown signal");
        self.shutdown_tx.send_replace(true);

        let deadline = tokio::time::Instant::now() + DEFAULT_SHUTDOWN_GRACE;
        for (name, mut handle) in self.tasks {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => tracing::debug!(worker = %name, "Worker stopped"),
                Ok(Err(e)) => tracing::warn!(worker = %name, error = %e, "Worker panicked"),
                Err(_) => {
                    tracing::warn!(worker = %name, "Worker did not stop in time, aborting");
                    handle.abort();
                }
            }
        }

        if let Some(ref status_pub) = self.status_publisher {
            if let Err(e) = status_pub.publish_offline().await {
                tracing::warn!(error = %e, "Failed to publish offline status");
            }
        }

        if let Err(e) = self.session.close().await {
            tracing::warn!(error = %e, "Error closing Zenoh session");
        }

        tracing::info!(bridge = %self.name, "Bridge stopped");

        Ok(())
    }
}

/// Run a bridge with minimal boilerplate.
///
/// Parses [`BridgeArgs`], loads the configuration, builds the runner and
/// hands it to `setup` before running until Ctrl+C.
pub async fn run_bridge<C, F>(
    name: &str,
    default_config: &'static str,
    setup: F,
) -> anyhow::Result<()>
where
    C: BridgeConfig,
    F: FnOnce(&mut BridgeRunner<C>) -> anyhow::Result<Option<serde_json::Value>>,
{
    let args = BridgeArgs::parse_with_default(default_config);
    let config = C::load(&args.config).map_err(|e| anyhow::anyhow!("{}", e))?;

    let mut runner = BridgeRunner::new_with_args(name, config, Some(&args))
        .await
        .map_err(|e| anyhow::anyhow!("{}", e))?
        .with_status_publishing();

    let metadata = setup(&mut runner)?;

    runner
        .run_with_metadata(metadata)
        .await
        .map_err(|e| anyhow::anyhow!("{}", e))
}
