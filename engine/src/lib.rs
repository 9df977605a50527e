use std::{future::Future, sync::Arc, time::Duration};

use color_eyre::{Result, eyre::eyre};

use crate::{download::Downloader, image_model::ImageModel, llm::LLM};

pub mod config;
pub mod download;
pub mod generator;
pub mod image_model;
pub mod imaging;
pub mod llm;
pub mod openai_error;
pub mod orchestrator;
pub mod output;
pub mod run_dir;

pub type LLMBox = Box<dyn LLM + Send>;
pub type ImgModArc = Arc<dyn ImageModel + Send + Sync>;
pub type DownloaderArc = Arc<dyn Downloader + Send + Sync>;

/// Property used for the image filename when the directive doesn't name one
pub const DEFAULT_IMAGE_PROPERTY: &str = "image";
pub const DATA_FILE_NAME: &str = "data.json";
pub const IMAGES_DIR_NAME: &str = "images";

/// Awaits `fut`, turning an expired deadline into an error
pub async fn with_deadline<T>(
    deadline: Option<Duration>,
    what: &str,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    match deadline {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| eyre!("{what} timed out after {limit:?}"))?,
        None => fut.await,
    }
}
