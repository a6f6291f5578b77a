//! Config command handlers

use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use documind_core::Config;

use crate::output::{Output, OutputFormat};

const VALID_KEYS: &str = "api_url, ws_url, chat_transport, keepalive_secs, \
                          connect_timeout_secs, request_timeout_secs, log_file";

/// Show current configuration
pub fn show(config_path: Option<&PathBuf>, output: &Output) -> Result<()> {
    let config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "api_url": config.api_url,
                    "ws_url": config.websocket_base(),
                    "chat_transport": config.chat_transport.to_string(),
                    "keepalive_secs": config.keepalive_secs,
                    "connect_timeout_secs": config.connect_timeout_secs,
                    "request_timeout_secs": config.request_timeout_secs,
                    "log_file": config.log_file
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", config.api_url);
        }
        OutputFormat::Human => {
            let effective_path = config_path
                .cloned()
                .unwrap_or_else(Config::config_file_path);
            println!("Configuration:");
            println!("  api_url:              {}", config.api_url);
            println!(
                "  ws_url:               {}{}",
                config.websocket_base(),
                if config.ws_url.is_none() { " (derived)" } else { "" }
            );
            println!("  chat_transport:       {}", config.chat_transport);
            println!("  keepalive_secs:       {}", config.keepalive_secs);
            println!("  connect_timeout_secs: {}", config.connect_timeout_secs);
            println!("  request_timeout_secs: {}", config.request_timeout_secs);
            println!(
                "  log_file:             {}",
                config
                    .log_file
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "(not set)".to_string())
            );
            println!();
            println!("Config file: {}", effective_path.display());
        }
    }

    Ok(())
}

/// Set a configuration value
pub fn set(
    key: String,
    value: String,
    config_path: Option<&PathBuf>,
    output: &Output,
) -> Result<()> {
    let mut config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;

    apply(&mut config, &key, &value)?;

    // Save to the CLI-specified path or default
    let save_path = config_path
        .cloned()
        .unwrap_or_else(Config::config_file_path);
    config
        .save_to_path(&save_path)
        .context("Failed to save configuration")?;

    output.success(&format!("Set {} = {}", key, value));

    Ok(())
}

fn apply(config: &mut Config, key: &str, value: &str) -> Result<()> {
    let unset = value.is_empty() || value == "none";

    match key {
        "api_url" => {
            if !(value.starts_with("http://") || value.starts_with("https://")) {
                bail!("api_url must start with http:// or https://");
            }
            config.api_url = value.to_string();
        }
        "ws_url" => {
            if !unset && !(value.starts_with("ws://") || value.starts_with("wss://")) {
                bail!("ws_url must start with ws:// or wss://");
            }
            config.ws_url = if unset { None } else { Some(value.to_string()) };
        }
        "chat_transport" => {
            config.chat_transport = value.parse()?;
        }
        "keepalive_secs" => {
            let secs: u64 = value
                .parse()
                .context("Invalid value for keepalive_secs. Use a number of seconds.")?;
            if secs == 0 {
                bail!("keepalive_secs must be greater than zero");
            }
            config.keepalive_secs = secs;
        }
        "connect_timeout_secs" => {
            config.connect_timeout_secs = value
                .parse()
                .context("Invalid value for connect_timeout_secs. Use a number of seconds.")?;
        }
        "request_timeout_secs" => {
            config.request_timeout_secs = value
                .parse()
                .context("Invalid value for request_timeout_secs. Use a number of seconds.")?;
        }
        "log_file" => {
            config.log_file = if unset { None } else { Some(value.into()) };
        }
        _ => {
            bail!(
                "Unknown configuration key: '{}'\nValid keys: {}",
                key,
                VALID_KEYS
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use documind_core::ChatTransport;
    use tempfile::TempDir;

    #[test]
    fn test_apply_values() {
        let mut config = Config::default();

        apply(&mut config, "chat_transport", "event-stream").unwrap();
        assert_eq!(config.chat_transport, ChatTransport::EventStream);

        apply(&mut config, "ws_url", "wss://ws.example.com").unwrap();
        assert_eq!(config.ws_url.as_deref(), Some("wss://ws.example.com"));
        apply(&mut config, "ws_url", "none").unwrap();
        assert!(config.ws_url.is_none());

        apply(&mut config, "keepalive_secs", "45").unwrap();
        assert_eq!(config.keepalive_secs, 45);
    }

    #[test]
    fn test_apply_rejects_bad_values() {
        let mut config = Config::default();

        assert!(apply(&mut config, "api_url", "localhost:8000").is_err());
        assert!(apply(&mut config, "keepalive_secs", "0").is_err());
        assert!(apply(&mut config, "keepalive_secs", "soon").is_err());
        assert!(apply(&mut config, "chat_transport", "pigeon").is_err());

        let err = apply(&mut config, "sync_url", "x").unwrap_err();
        assert!(err.to_string().contains("Valid keys"));
    }

    #[test]
    fn test_set_saves_to_cli_path() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        let output = Output::new(OutputFormat::Quiet);

        set(
            "request_timeout_secs".to_string(),
            "12".to_string(),
            Some(&path),
            &output,
        )
        .unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("request_timeout_secs = 12"));
    }
}
