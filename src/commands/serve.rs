use anyhow::{Context, Result};

use memberwatch::action::EndpointRegistry;
use memberwatch::config::Config;
use memberwatch::server::MemberwatchServer;

use super::{shutdown_signal, Pipeline};

/// Watch the member path and serve the reconciled endpoints over HTTP
pub async fn serve(config: Config) -> Result<()> {
    let (pipeline, events) = Pipeline::start(&config).await?;
    let actions = pipeline.actions(events, &config);

    let registry = EndpointRegistry::new();
    let follower = {
        let registry = registry.clone();
        tokio::spawn(async move { registry.follow(actions).await })
    };

    let server = MemberwatchServer::new(
        config.server.clone(),
        pipeline.manager.clone(),
        registry,
        pipeline.member_path.clone(),
    );

    println!("{}", server.info().display());
    println!();
    println!("API Endpoints:");
    println!("  GET  /health        - Health check");
    println!("  GET  /health/live   - Liveness probe");
    println!("  GET  /health/ready  - Readiness probe");
    println!("  GET  /members       - Current members");
    println!("  GET  /endpoints     - Monitored stream endpoints");
    println!("  GET  /stream        - ADD/REMOVE actions (server-sent events)");
    println!("  GET  /metrics       - Prometheus metrics endpoint");
    println!();
    println!("Press Ctrl+C to stop.\n");

    let served = server
        .start_with_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed");

    pipeline.manager.shutdown().await;
    match follower.await {
        Ok(applied) => tracing::info!(applied, "Action stream drained"),
        Err(e) => tracing::error!(error = %e, "Action follower failed"),
    }

    served?;
    println!("Memberwatch stopped.");
    Ok(())
}
