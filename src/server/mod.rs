//! Network front ends sharing one controller: a line-based TCP trigger listener and
//! a JSON REST API.

pub mod rest;
pub mod trigger;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Context;
use image::DynamicImage;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::{InspectionConfig, OutputConfig, ServerConfig};
use crate::controller::Controller;
use crate::io::{CsvWriter, ImageArchiver};
use crate::models::InspectionResult;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// What both listeners call into: inspection plus optional persistence of results.
pub struct InspectionService {
    controller: Arc<Controller>,
    server: ServerConfig,
    csv: CsvWriter,
    csv_path: PathBuf,
    archiver: ImageArchiver,
    auto_save: AtomicBool,
}

impl InspectionService {
    pub fn new(controller: Arc<Controller>, server: ServerConfig, output: OutputConfig) -> Self {
        Self {
            controller,
            server,
            csv: CsvWriter::new(output.include_defect_details),
            csv_path: output.csv_path,
            archiver: ImageArchiver::new(output.image_dir, "server"),
            auto_save: AtomicBool::new(output.auto_save),
        }
    }

    pub fn from_config(config: &InspectionConfig) -> anyhow::Result<Self> {
        let controller = Controller::from_config(config).context("Failed to build controller")?;
        Ok(Self::new(Arc::new(controller), config.server.clone(), config.output.clone()))
    }

    pub fn controller(&self) -> &Arc<Controller> {
        &self.controller
    }

    pub fn server_config(&self) -> &ServerConfig {
        &self.server
    }

    pub fn auto_save(&self) -> bool {
        self.auto_save.load(Ordering::Relaxed)
    }

    pub fn set_auto_save(&self, enabled: bool) {
        self.auto_save.store(enabled, Ordering::Relaxed);
    }

    /// Load an image from disk and inspect it. Blocking.
    pub fn inspect_path(&self, path: &str) -> anyhow::Result<InspectionResult> {
        let image = image::open(path).with_context(|| format!("Failed to load image: {path}"))?;
        Ok(self.inspect_image(&image, path))
    }

    /// Inspect an in-memory image, persisting successful results when auto-save is on.
    /// Blocking.
    pub fn inspect_image(&self, image: &DynamicImage, source: &str) -> InspectionResult {
        let result = self.controller.inspect(image);
        if result.success && self.auto_save() {
            self.persist(&result, source);
        }
        result
    }

    fn persist(&self, result: &InspectionResult, source: &str) {
        if let Err(e) = self.csv.append_result(&self.csv_path, result, source) {
            warn!(error = %e, "failed to append result to CSV");
        }
        if let Err(e) = self.archiver.save(result) {
            warn!(error = %e, "failed to archive result images");
        }
    }
}

fn socket_addr(host: &str, port: u16) -> anyhow::Result<SocketAddr> {
    format!("{host}:{port}")
        .parse()
        .with_context(|| format!("Invalid listen address {host}:{port}"))
}

/// Run the enabled listeners until `shutdown` resolves.
pub async fn serve(
    service: Arc<InspectionService>,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let config = service.server_config().clone();
    let (stop_tx, stop_rx) = watch::channel(false);
    let mut tasks = tokio::task::JoinSet::new();

    if config.trigger_enabled {
        let addr = socket_addr(&config.host, config.trigger_port)?;
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind trigger listener on {addr}"))?;
        info!(%addr, "trigger listener started");
        let trigger = trigger::TriggerListener::new(service.clone());
        tasks.spawn(trigger.serve(listener, stop_rx.clone()));
    }

    if config.rest_enabled {
        let addr = socket_addr(&config.host, config.rest_port)?;
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind REST listener on {addr}"))?;
        info!(%addr, "REST listener started");
        tasks.spawn(rest::serve(service.clone(), listener, stop_rx.clone()));
    }

    if tasks.is_empty() {
        warn!("no listeners enabled");
        return Ok(());
    }

    shutdown.await;
    info!("shutting down listeners");
    // Receivers may already be gone if a listener exited early.
    let _ = stop_tx.send(true);
    while let Some(joined) = tasks.join_next().await {
        joined.context("listener task panicked")??;
    }
    info!("server stopped");
    Ok(())
}

/// Resolves once `stop` flips to true or its sender is dropped.
pub(crate) async fn stopped(mut stop: watch::Receiver<bool>) {
    while !*stop.borrow() {
        if stop.changed().await.is_err() {
            return;
        }
    }
}
