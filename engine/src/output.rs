use std::path::PathBuf;

use color_eyre::{Result, eyre::Context};
use log::debug;

use crate::{DATA_FILE_NAME, run_dir::RunContext};

pub fn data_file(ctx: &RunContext) -> PathBuf {
    ctx.output_dir.join(DATA_FILE_NAME)
}

/// Replaces `data.json` in the run directory with `text`. The run directory
/// has to exist already.
pub async fn write_output(ctx: &RunContext, text: &str) -> Result<PathBuf> {
    let path = data_file(ctx);
    tokio::fs::write(&path, text)
        .await
        .with_context(|| format!("writing {}", path.display()))?;
    debug!("Wrote {} bytes to {}", text.len(), path.display());
    Ok(path)
}

pub async fn read_output(ctx: &RunContext) -> Result<String> {
    let path = data_file(ctx);
    tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("reading {}", path.display()))
}
