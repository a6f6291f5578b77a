//! Health command handler

use anyhow::{Context, Result};

use documind_core::{ApiClient, Config};

use crate::output::Output;

/// Check the API health endpoint
pub async fn check(config: &Config, output: &Output) -> Result<()> {
    let api = ApiClient::new(config)?;
    let health = api
        .health()
        .await
        .with_context(|| format!("DocuMind API at {} is not reachable", config.api_base()))?;

    output.print_health(&health);
    Ok(())
}
