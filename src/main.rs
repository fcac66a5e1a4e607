use container_runtime_operator::{Operator, OperatorConfig, Result};
use kube::Client;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    if let Err(err) = run().await {
        error!(error = %err, "Operator failed");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let config = OperatorConfig::from_env()?;
    let client = Client::try_default().await?;

    let operator = Operator::new(client, &config);
    if let Err(err) = operator.start().await {
        operator.shutdown();
        return Err(err);
    }

    info!("Operator started");
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| container_runtime_operator::Error::Other(e.to_string()))?;

    info!("Shutting down");
    operator.shutdown();
    Ok(())
}
