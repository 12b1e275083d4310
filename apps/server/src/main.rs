mod config;
mod main_lib;
mod telluric_client;

use config::Config;
use main_lib::{build_orchestrator, init_tracing};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    init_tracing(config.log_format);
    let orchestrator = build_orchestrator(&config).await?;

    wait_for_shutdown_signal().await?;
    tracing::info!(
        "Shutdown requested; waiting up to {:?} for in-flight work",
        config.shutdown_grace
    );
    orchestrator.shutdown(config.shutdown_grace).await?;
    Ok(())
}

async fn wait_for_shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result?,
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await?;
    Ok(())
}
