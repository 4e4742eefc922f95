//! Command-line entry point: wires the in-memory catalog together, starts
//! the ingestion worker, and runs one file sync end to end.

use catalog_store::{MemoryCatalog, MemoryProjections, SecurityStore};
use core_types::progress::ProgressBus;
use core_types::types::ExecutionStatus;
use core_types::AppConfig;
use ingestion_service::IngestionService;
use log::{error, info};
use std::sync::Arc;

#[tokio::main]
async fn main() {
    env_logger::init();
    let config = AppConfig::load().unwrap_or_default();

    let Some(path) = std::env::args().nth(1) else {
        eprintln!("usage: catalog <export.xlsx>");
        std::process::exit(2);
    };

    let store = Arc::new(MemoryCatalog::new());
    let bus = Arc::new(ProgressBus::default());
    let service = IngestionService::new(
        config.ingest.clone(),
        store.clone(),
        store.clone(),
        Arc::new(MemoryProjections::new()),
        None,
        bus.clone(),
    );
    service.start();

    let mut events = bus.subscribe_all();
    let execution = match service.enqueue_file(&path, "cli").await {
        Ok(execution) => execution,
        Err(err) => {
            error!("could not enqueue {path}: {err}");
            std::process::exit(1);
        }
    };
    info!("execution {} queued for {path}", execution.id);

    loop {
        match events.recv().await {
            Ok(event) if event.execution_id == execution.id => {
                info!(
                    "execution {}: {:?} {}%",
                    event.execution_id, event.status, event.progress
                );
                if event.status.is_terminal() {
                    if let Some(stats) = event.stats {
                        info!(
                            "created={} updated={} skipped={} errors={}",
                            stats.created, stats.updated, stats.skipped, stats.errors
                        );
                    }
                    let total = SecurityStore::count(store.as_ref()).await.unwrap_or(0);
                    info!("securities in catalog: {total}");
                    let code = if event.status == ExecutionStatus::Failed { 1 } else { 0 };
                    std::process::exit(code);
                }
            }
            Ok(_) => {}
            Err(err) => {
                error!("event stream closed: {err}");
                std::process::exit(1);
            }
        }
    }
}
