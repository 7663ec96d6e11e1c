//! bridgewatch entrypoint.
//!
//! Boot order: `.env` → telemetry → configuration → stores → supervisor.
//! The process then parks on the signal handler; SIGTERM/SIGINT cancels
//! the supervisor's token and the fleet winds down within the configured
//! shutdown bound.
//!
//! Exit code is non-zero iff `start_all` yields zero running observers.

use dotenvy::dotenv;
use std::sync::Arc;

use bridgewatch::config::Config;
use bridgewatch::correlate::Correlator;
use bridgewatch::pipeline::Pipeline;
use bridgewatch::risk::RiskEngine;
use bridgewatch::sig_down::SigDown;
use bridgewatch::store::{GraphStore, RelationalStore};
use bridgewatch::supervisor::Supervisor;
use bridgewatch::telemetry::Telemetry;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    let _telemetry = Telemetry::init();

    let config = Config::load()?;
    let limits = config.limits().clone();
    let engine = config.engine().clone();

    let relational = RelationalStore::connect(
        config.relational().url.inner(),
        limits.relational_pool_size,
        limits.db_timeout(),
    )
    .await?;
    let graph = GraphStore::new(config.graph(), limits.graph_pool_size, limits.db_timeout())?;

    let pipeline = {
        let risk = RiskEngine::new(
            Arc::new(relational.clone()),
            Arc::new(relational.clone()),
            &engine,
        );
        let correlator = Correlator::new(
            Arc::new(relational.clone()),
            Arc::new(graph.clone()),
            engine.correlation_window_secs,
        );
        Arc::new(Pipeline::new(
            risk,
            correlator,
            Arc::new(relational.clone()),
            Arc::new(graph.clone()),
            limits.worker_concurrency,
        ))
    };

    let sig_down = SigDown::try_new()?;
    let supervisor = Supervisor::new(
        &config,
        Arc::clone(&pipeline),
        sig_down.cancellation_token().child_token(),
    );

    let report = supervisor.start_all().await;
    if report.running == 0 {
        tracing::error!(
            invalid = report.invalid.len(),
            "no observer could be started"
        );
        std::process::exit(1);
    }

    supervisor.spawn_maintenance(
        relational.clone(),
        RiskEngine::new(
            Arc::new(relational.clone()),
            Arc::new(relational.clone()),
            &engine,
        ),
        Correlator::new(
            Arc::new(relational.clone()),
            Arc::new(graph.clone()),
            engine.correlation_window_secs,
        ),
    );

    sig_down.recv().await;
    tracing::info!("shutdown signal received");
    supervisor.stop_all().await;
    relational.close().await;

    Ok(())
}
