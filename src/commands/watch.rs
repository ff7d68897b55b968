use anyhow::Result;

use memberwatch::config::Config;
use memberwatch::discovery::InstanceEvents;

use super::{shutdown_signal, Pipeline};

/// Print membership changes to stdout until Ctrl+C or the stream ends
///
/// Prints `UP addr` / `DOWN addr` lines with `instances`, otherwise the mapped
/// `ADD uri` / `REMOVE uri` actions.
pub async fn watch(config: Config, instances: bool) -> Result<()> {
    let (pipeline, events) = Pipeline::start(&config).await?;

    let outcome = tokio::select! {
        result = print_stream(&pipeline, events, &config, instances) => result,
        _ = shutdown_signal() => Ok(()),
    };

    pipeline.manager.shutdown().await;
    outcome
}

async fn print_stream(
    pipeline: &Pipeline,
    mut events: InstanceEvents,
    config: &Config,
    instances: bool,
) -> Result<()> {
    if instances {
        while let Some(event) = events.next().await {
            println!("{}", event?);
        }
        return Ok(());
    }

    let mut actions = pipeline.actions(events, config);
    while let Some(action) = actions.next().await {
        println!("{}", action?);
    }
    Ok(())
}
