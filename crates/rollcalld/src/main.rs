use anyhow::{Context, Result};
use rollcall_core::OnnxExtractor;
use rollcall_store::{
    database, AttendanceLog, EnrollmentStore, ReferenceDirectory, SqliteEnrollmentStore,
};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;
mod service;

use config::{Bus, Config};
use dbus_interface::{AttendanceInterface, BUS_NAME, OBJECT_PATH};
use engine::EngineConfig;
use service::AttendanceService;

/// Pending requests allowed per worker before callers are turned away.
const QUEUE_DEPTH_PER_WORKER: usize = 4;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = Config::from_env();
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        model_dir = %config.model_dir.display(),
        db_path = %config.db_path.display(),
        workers = config.workers,
        "rollcalld starting"
    );

    let con = database::open(&config.db_path)
        .with_context(|| format!("opening database {}", config.db_path.display()))?;
    let store: Arc<dyn EnrollmentStore> = Arc::new(SqliteEnrollmentStore::new(con.clone()));
    let attendance = AttendanceLog::new(con);

    if let Some(dir) = config.reference_dir.clone() {
        let model_dir = config.model_dir.clone();
        let store = store.clone();
        let summary = tokio::task::spawn_blocking(move || -> Result<_> {
            let mut extractor = OnnxExtractor::load(&model_dir)?;
            Ok(ReferenceDirectory::new(dir).import_into(&mut extractor, store.as_ref())?)
        })
        .await??;
        tracing::info!(
            imported = summary.imported.len(),
            already_enrolled = summary.already_enrolled.len(),
            skipped = summary.skipped_files,
            "reference photos imported"
        );
    }

    let model_dir = config.model_dir.clone();
    let engine = engine::spawn_engine(
        EngineConfig {
            workers: config.workers,
            queue_depth: config.workers * QUEUE_DEPTH_PER_WORKER,
            timeout: config.extract_timeout,
            max_image_bytes: config.max_image_bytes,
        },
        move |_| OnnxExtractor::load(&model_dir),
    )
    .with_context(|| format!("loading models from {}", config.model_dir.display()))?;

    let service = AttendanceService::new(
        engine,
        store,
        attendance,
        config.tolerance,
        config.match_scope,
    );

    let builder = match config.bus {
        Bus::System => zbus::connection::Builder::system()?,
        Bus::Session => zbus::connection::Builder::session()?,
    };
    let _connection = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, AttendanceInterface::new(service))?
        .build()
        .await
        .context("registering on D-Bus")?;

    tracing::info!(bus = ?config.bus, name = BUS_NAME, path = OBJECT_PATH, "rollcalld ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("rollcalld shutting down");

    Ok(())
}
