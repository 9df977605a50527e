use std::{future::Future, pin::Pin, sync::Arc};

use color_eyre::Result;
use serde::{Deserialize, Serialize};
use strum::Display;

pub mod open_ai_images;
pub use open_ai_images::OpenAIImages;

use crate::ImgModArc;

#[derive(
    Debug,
    Clone,
    Copy,
    Display,
    clap::ValueEnum,
    Serialize,
    Deserialize,
    Hash,
    PartialEq,
    Eq,
    Default,
)]
pub enum Model {
    #[strum(to_string = "dall-e-2")]
    #[serde(rename = "dall-e-2")]
    #[value(name = "dall-e-2")]
    DallE2,
    #[default]
    #[strum(to_string = "dall-e-3")]
    #[serde(rename = "dall-e-3")]
    #[value(name = "dall-e-3")]
    DallE3,
}

impl Model {
    pub fn make(&self, key: String, url: impl Into<String>, size: impl Into<String>) -> ImgModArc {
        Arc::new(OpenAIImages::new(*self, key, url, size))
    }
}

/// Where the provider put the generated image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedImage {
    pub url: String,
    pub revised_prompt: Option<String>,
}

pub trait ImageModel {
    /// Requests exactly one image for `prompt`
    fn get_image_url<'a>(
        &'a self,
        prompt: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<GeneratedImage>> + Send + 'a>>;

    fn model(&self) -> Model;
}
