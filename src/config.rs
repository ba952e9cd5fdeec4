use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::agent::AgentConfig;
use crate::audio::{CaptureConfig, PlaybackConfig};
use crate::session::SessionConfig;

/// Prefix for environment overrides, e.g. `INTERVIEW_VOICE__AGENT__API_KEY`
const ENV_PREFIX: &str = "INTERVIEW_VOICE";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub agent: AgentConfig,
    pub capture: CaptureConfig,
    pub playback: PlaybackConfig,
    pub session: SessionSettings,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub connect_timeout_ms: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 10_000,
        }
    }
}

impl Config {
    /// Load from an optional file, then apply environment overrides
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path));
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()
            .with_context(|| format!("Failed to load config from {:?}", path))?;

        settings
            .try_deserialize()
            .context("Invalid configuration")
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            agent: self.agent.clone(),
            capture: self.capture.clone(),
            playback: self.playback.clone(),
            connect_timeout: Duration::from_millis(self.session.connect_timeout_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_without_file() -> Result<()> {
        let config = Config::load(None)?;
        let session = config.session_config();

        assert_eq!(session.capture.sample_rate, 16000);
        assert_eq!(session.capture.frame_samples, 4096);
        assert_eq!(session.playback.sample_rate, 24000);
        assert_eq!(session.connect_timeout, Duration::from_secs(10));
        Ok(())
    }

    #[test]
    fn test_file_overrides_defaults() -> Result<()> {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile()?;
        writeln!(
            file,
            r#"
[agent]
model = "models/test-model"

[playback]
max_backlog_ms = 5000

[session]
connect_timeout_ms = 2500
"#
        )?;

        let path = file.path().to_string_lossy().to_string();
        let config = Config::load(Some(&path))?;

        assert_eq!(config.agent.model, "models/test-model");
        assert_eq!(config.playback.max_backlog_ms, 5000);
        // Unset keys keep their defaults
        assert_eq!(config.playback.sample_rate, 24000);
        assert_eq!(
            config.session_config().connect_timeout,
            Duration::from_millis(2500)
        );
        Ok(())
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(Config::load(Some("/nonexistent/interview-voice.toml")).is_err());
    }
}
