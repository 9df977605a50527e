use std::{future::Future, pin::Pin};

use color_eyre::{
    Result,
    eyre::{Context, eyre},
};
use log::debug;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{GeneratedImage, ImageModel, Model};
use crate::openai_error::error_from_response;

pub const DEFAULT_IMAGES_URL: &str = "https://api.openai.com/v1/images/generations";
pub const DEFAULT_IMAGE_SIZE: &str = "1024x1024";

#[derive(Debug, Clone)]
pub struct OpenAIImages {
    model: Model,
    client: Client,
    api_key: String,
    url: String,
    size: String,
}

impl OpenAIImages {
    pub fn new(model: Model, api_key: String, url: impl Into<String>, size: impl Into<String>) -> Self {
        Self {
            model,
            client: Client::new(),
            api_key,
            url: url.into(),
            size: size.into(),
        }
    }

    fn request_body<'a>(&'a self, prompt: &'a str) -> ImagesRequest<'a> {
        ImagesRequest {
            model: self.model,
            prompt,
            n: 1,
            size: &self.size,
            response_format: "url",
        }
    }
}

impl ImageModel for OpenAIImages {
    fn get_image_url<'a>(
        &'a self,
        prompt: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<GeneratedImage>> + Send + 'a>> {
        Box::pin(async move {
            let res = self
                .client
                .post(&self.url)
                .bearer_auth(&self.api_key)
                .json(&self.request_body(prompt))
                .send()
                .await
                .context("image generation request")?;

            if !res.status().is_success() {
                return Err(eyre!(error_from_response(res).await));
            }

            let response: ImagesResponse = res.json().await.context("parsing image response")?;
            debug!("Image response:\n{response:#?}");

            let first = response
                .data
                .into_iter()
                .next()
                .ok_or_else(|| eyre!("No image data returned"))?;

            Ok(GeneratedImage {
                url: first
                    .url
                    .ok_or_else(|| eyre!("Image response is missing the url field"))?,
                revised_prompt: first.revised_prompt,
            })
        })
    }

    fn model(&self) -> Model {
        self.model
    }
}

#[derive(Serialize, Debug)]
struct ImagesRequest<'a> {
    model: Model,
    prompt: &'a str,
    n: u8,
    size: &'a str,
    response_format: &'a str,
}

#[derive(Deserialize, Debug)]
struct ImagesResponse {
    data: Vec<ImageData>,
}

#[derive(Deserialize, Debug)]
struct ImageData {
    url: Option<String>,
    revised_prompt: Option<String>,
}

#[cfg(test)]
mod tests {
    use expect_test::expect;

    use super::*;

    #[test]
    fn request_serialization() {
        let images = OpenAIImages::new(Model::DallE3, "key".into(), DEFAULT_IMAGES_URL, DEFAULT_IMAGE_SIZE);
        let expect = expect![[r#"{"model":"dall-e-3","prompt":"a cat","n":1,"size":"1024x1024","response_format":"url"}"#]];
        expect.assert_eq(&serde_json::to_string(&images.request_body("a cat")).unwrap());
    }

    #[test]
    fn model_names() {
        assert_eq!(Model::DallE2.to_string(), "dall-e-2");
        assert_eq!(Model::default().to_string(), "dall-e-3");
    }
}
