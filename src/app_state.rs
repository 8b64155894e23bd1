use crate::config::Config;
use crate::control::ControlInterface;
use anyhow::Context;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

const UPLOADS_DIR: &str = "uploads";

async fn init_workspace(workspace: &Path) -> std::io::Result<()> {
    tokio::fs::create_dir_all(workspace.join(UPLOADS_DIR)).await?;
    Ok(())
}

#[derive(Clone)]
pub struct AppState {
    pub control: Arc<ControlInterface>,

    pub uploads_dir: PathBuf,
    pub media_dir: PathBuf,
}

impl AppState {
    pub async fn new(config: &Config) -> anyhow::Result<Self> {
        let workspace = PathBuf::from(&config.workspace);
        init_workspace(&workspace)
            .await
            .with_context(|| format!("Failed to initialize workspace {}", workspace.display()))?;

        let builder = config
            .command_builder()
            .context("Encoder command cannot be empty")?;
        info!(
            program = builder.program(),
            encoder = builder.encoder_name(),
            log_lines = config.log_lines,
            stop_scope = ?config.stop_scope,
            "Initialize stream control"
        );
        let control = ControlInterface::new(builder, config.log_lines, config.stop_scope);

        Ok(Self {
            control: Arc::new(control),
            uploads_dir: workspace.join(UPLOADS_DIR),
            media_dir: PathBuf::from(&config.media_dir),
        })
    }

    pub fn uploads_dir(&self) -> &Path {
        self.uploads_dir.as_path()
    }

    pub fn media_dir(&self) -> &Path {
        self.media_dir.as_path()
    }
}
