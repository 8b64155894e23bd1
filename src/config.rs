use crate::command::{CommandBuilder, DEFAULT_ENCODER};
use crate::log_sink::DEFAULT_LOG_LINES;
use crate::session::StopScope;
use anyhow::Result;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration structure that can be loaded from CLI or a config file
///
/// Example configuration file content
/// # RTMP Relay Configuration
///
/// listen_on_port = 32145
/// workspace = "./data"      # uploads land in <workspace>/uploads
/// media_dir = "./videos"    # existing .mp4/.flv files offered for streaming
///
/// # Encoder command line, optionally with a wrapper
/// encoder = "nice -n 10 ffmpeg"
/// encoder_name = "ffmpeg"   # process name killed by stop_scope = "all"
/// log_lines = 25
/// stop_scope = "session"    # Options: "session" or "all"
#[derive(Debug, Clone, Serialize, Deserialize, Parser)]
#[command(version, about, long_about = None)]
#[serde(default)]
pub struct Config {
    /// Port to listen on
    #[arg(short, long, default_value_t = 32145)]
    #[serde(default = "default_port")]
    pub listen_on_port: u16,

    /// Working directory for uploaded files
    #[arg(short = 'w', long, default_value = ".")]
    #[serde(default = "default_workspace")]
    pub workspace: String,

    /// Directory scanned for local media files
    #[arg(short, long, default_value = ".")]
    #[serde(default = "default_media_dir")]
    pub media_dir: String,

    /// Encoder command line (program plus optional leading arguments)
    #[arg(short, long, default_value = DEFAULT_ENCODER)]
    #[serde(default = "default_encoder")]
    pub encoder: String,

    /// Encoder process name for `--stop-scope all` when it cannot be read
    /// off the encoder command line
    #[arg(long)]
    pub encoder_name: Option<String>,

    /// Number of encoder log lines kept for display
    #[arg(long, default_value_t = DEFAULT_LOG_LINES)]
    #[serde(default = "default_log_lines")]
    pub log_lines: usize,

    /// What a stop request kills: the session's encoder or every instance
    #[arg(short, long, value_enum, default_value_t = StopScope::Session)]
    #[serde(default)]
    pub stop_scope: StopScope,

    /// Configuration file path (overrides all other arguments)
    #[arg(short, long)]
    #[serde(skip)]
    pub config: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_on_port: default_port(),
            workspace: default_workspace(),
            media_dir: default_media_dir(),
            encoder: default_encoder(),
            encoder_name: None,
            log_lines: default_log_lines(),
            stop_scope: StopScope::default(),
            config: None,
        }
    }
}

impl Config {
    /// Load configuration from CLI args, optionally merging with a config file
    pub fn load() -> Result<Self> {
        let mut config = Config::parse();

        if let Some(config_path) = &config.config {
            let file_config = Self::from_file(Path::new(config_path))?;
            config = config.merge_with_file(file_config);
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Merge with file config, CLI args take precedence
    fn merge_with_file(mut self, file_config: Config) -> Self {
        // If CLI value is default, use file value
        if self.listen_on_port == default_port() {
            self.listen_on_port = file_config.listen_on_port;
        }
        if self.workspace == default_workspace() {
            self.workspace = file_config.workspace;
        }
        if self.media_dir == default_media_dir() {
            self.media_dir = file_config.media_dir;
        }
        if self.encoder == default_encoder() {
            self.encoder = file_config.encoder;
        }
        if self.encoder_name.is_none() {
            self.encoder_name = file_config.encoder_name;
        }
        if self.log_lines == default_log_lines() {
            self.log_lines = file_config.log_lines;
        }
        if self.stop_scope == StopScope::default() {
            self.stop_scope = file_config.stop_scope;
        }

        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.listen_on_port == 0 {
            return Err(anyhow::anyhow!("Port must not be 0"));
        }

        if self.log_lines == 0 {
            return Err(anyhow::anyhow!("log_lines must be at least 1"));
        }

        if self.command_builder().is_none() {
            return Err(anyhow::anyhow!("Encoder command cannot be empty"));
        }

        Ok(())
    }

    /// Builder for the configured encoder command line
    pub fn command_builder(&self) -> Option<CommandBuilder> {
        let builder = CommandBuilder::from_command_line(&self.encoder)?;
        Some(match &self.encoder_name {
            Some(name) => builder.with_encoder_name(name),
            None => builder,
        })
    }
}

// Default value functions
fn default_port() -> u16 {
    32145
}

fn default_workspace() -> String {
    ".".to_string()
}

fn default_media_dir() -> String {
    ".".to_string()
}

fn default_encoder() -> String {
    DEFAULT_ENCODER.to_string()
}

fn default_log_lines() -> usize {
    DEFAULT_LOG_LINES
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.listen_on_port, 32145);
        assert_eq!(config.log_lines, 25);
        assert_eq!(config.stop_scope, StopScope::Session);
        assert_eq!(config.command_builder().unwrap().program(), "ffmpeg");
    }

    #[test]
    fn test_cli_parsing() {
        let config = Config::parse_from([
            "rtmp-relay",
            "--listen-on-port",
            "9000",
            "--encoder",
            "nice -n 10 ffmpeg",
            "--stop-scope",
            "all",
        ]);
        assert_eq!(config.listen_on_port, 9000);
        assert_eq!(config.stop_scope, StopScope::AllInstances);
        let builder = config.command_builder().unwrap();
        assert_eq!(builder.program(), "nice");
        assert_eq!(builder.encoder_name(), "ffmpeg");
    }

    #[test]
    fn test_toml_and_merge() {
        let file_config: Config = toml::from_str(
            r#"
            listen_on_port = 8000
            workspace = "/srv/relay"
            log_lines = 50
            stop_scope = "all"
            encoder = "nice -n 10 ffmpeg -loglevel warning"
            encoder_name = "ffmpeg"
            "#,
        )
        .unwrap();
        assert_eq!(file_config.media_dir, ".");

        let cli = Config {
            listen_on_port: 9000,
            ..Default::default()
        };
        let merged = cli.merge_with_file(file_config);
        assert_eq!(merged.listen_on_port, 9000);
        assert_eq!(merged.workspace, "/srv/relay");
        assert_eq!(merged.log_lines, 50);
        assert_eq!(merged.stop_scope, StopScope::AllInstances);

        let builder = merged.command_builder().unwrap();
        assert_eq!(builder.program(), "nice");
        assert_eq!(builder.encoder_name(), "ffmpeg");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = Config {
            encoder: "   ".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            log_lines: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
