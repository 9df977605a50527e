#![allow(dead_code)]

use std::{
    future::Future,
    num::NonZeroUsize,
    path::Path,
    pin::Pin,
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use bytes::Bytes;
use color_eyre::{Result, eyre::eyre};
use engine::{
    config::{ApiSettings, Config, GenerationConfig, ImageDirective, RunSettings, Schema},
    download::{ByteStream, Downloader},
    image_model::{GeneratedImage, ImageModel, Model},
    llm::{LLM, LLMStream, OutputMessage, Request, ResponseFragment},
};
use serde_json::Value;

pub const RECORDS: &str = r#"[{"first_name":"Ada","last_name":"Lovelace","skills":["math"]},{"first_name":"Alan","last_name":"Turing","skills":["crypto","logic"]},{"first_name":"Grace","last_name":"Hopper","skills":["compilers"]}]"#;

/// Splits `text` into fragments of `size` chars
pub fn fragments(text: &str, size: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars.chunks(size).map(|c| c.iter().collect()).collect()
}

#[derive(Clone)]
pub struct ScriptedLLM {
    pub fragments: Vec<String>,
}

impl LLM for ScriptedLLM {
    fn send_request_stream(&mut self, _req: Request) -> LLMStream<'_> {
        let mut items: Vec<Result<ResponseFragment>> = self
            .fragments
            .iter()
            .map(|f| Ok(ResponseFragment::TextDelta(f.clone())))
            .collect();
        items.push(Ok(ResponseFragment::MessageComplete(OutputMessage {
            input_tokens: 100,
            output_tokens: self.fragments.len(),
            text: self.fragments.concat(),
        })));
        Box::pin(tokio_stream::iter(items))
    }

    fn clone(&self) -> Box<dyn LLM + Send + 'static> {
        Box::new(Clone::clone(self))
    }
}

/// Pulls `first_name` out of the record embedded in an image prompt
pub fn name_in_prompt(prompt: &str) -> Result<String> {
    let record = prompt
        .split("###")
        .nth(1)
        .ok_or(eyre!("no record in prompt"))?;
    let record: Value = serde_json::from_str(record)?;
    Ok(record["first_name"]
        .as_str()
        .ok_or(eyre!("record without first_name"))?
        .to_string())
}

/// Hands out `https://img.example/generated/<first_name>.png?sig=abc`
#[derive(Default)]
pub struct FakeImages {
    pub fail_for: Vec<&'static str>,
    pub blank_url_for: Vec<&'static str>,
    pub panic_for: Vec<&'static str>,
    pub calls: AtomicUsize,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl ImageModel for FakeImages {
    fn get_image_url<'a>(
        &'a self,
        prompt: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<GeneratedImage>> + Send + 'a>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let name = name_in_prompt(prompt)?;
            if self.panic_for.iter().any(|n| *n == name) {
                panic!("image backend crashed on {name}");
            }
            if self.fail_for.iter().any(|n| *n == name) {
                return Err(eyre!("content policy violation for {name}"));
            }
            let url = if self.blank_url_for.iter().any(|n| *n == name) {
                "https://img.example/generated/".to_string()
            } else {
                format!("https://img.example/generated/{name}.png?sig=abc")
            };
            Ok(GeneratedImage {
                url,
                revised_prompt: None,
            })
        })
    }

    fn model(&self) -> Model {
        Model::default()
    }
}

/// Serves `png:<url>` in two chunks, or breaks off after the first one for urls
/// containing a name from `fail_for`
#[derive(Default)]
pub struct FakeDownloader {
    pub fail_for: Vec<&'static str>,
}

impl Downloader for FakeDownloader {
    fn fetch<'a>(&'a self, url: &'a str) -> ByteStream<'a> {
        let body = format!("png:{url}");
        let (head, tail) = body.split_at(4);
        let mut items: Vec<Result<Bytes>> = vec![Ok(Bytes::from(head.to_string()))];
        if self.fail_for.iter().any(|name| url.contains(name)) {
            items.push(Err(eyre!("connection reset while downloading {url}")));
        } else {
            items.push(Ok(Bytes::from(tail.to_string())));
        }
        Box::pin(tokio_stream::iter(items))
    }
}

pub fn directive() -> ImageDirective {
    ImageDirective {
        property_name: "profile_image".into(),
        prompt: "A professional headshot on a white background.".into(),
    }
}

pub fn config(output_dir: &Path, images: Option<ImageDirective>) -> Config {
    Config {
        generation: GenerationConfig {
            count: NonZeroUsize::new(3).unwrap(),
            context: "Profiles for a networking site for engineers.".into(),
            schema: [
                ("first_name", "random first name"),
                ("last_name", "random last name"),
                ("skills", "array of 1 to 3 skills"),
            ]
            .into_iter()
            .collect::<Schema>(),
            images,
        },
        api: ApiSettings::default(),
        run: RunSettings {
            output_dir: output_dir.to_path_buf(),
            ..RunSettings::default()
        },
    }
}

/// Every file below `dir`, sorted, as names
pub fn file_names(dir: &Path) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return vec![];
    };
    let mut names: Vec<String> = entries
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}
