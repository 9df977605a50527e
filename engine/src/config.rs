//! Run configuration, read from a RON file.
//!
//! Only `generation` is required. `api` and `run` fall back to defaults that
//! target the public OpenAI endpoints and write runs below `./output`.

use std::{
    fmt,
    fs,
    num::NonZeroUsize,
    path::{Path, PathBuf},
    time::Duration,
};

use color_eyre::{
    Result,
    eyre::{Context, eyre},
};
use serde::{
    Deserialize, Deserializer, Serialize, Serializer,
    de::{MapAccess, Visitor},
    ser::SerializeMap,
};

use crate::{
    DEFAULT_IMAGE_PROPERTY,
    image_model::{self, open_ai_images},
    imaging::FailurePolicy,
    llm::OpenAIChat,
    run_dir::RunNaming,
};

pub const CONFIG_FILE_NAME: &str = "mockgen.ron";
pub const EXAMPLE_CONFIG: &str = include_str!("../config/example.ron");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub generation: GenerationConfig,
    #[serde(default)]
    pub api: ApiSettings,
    #[serde(default)]
    pub run: RunSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub count: NonZeroUsize,
    pub context: String,
    pub schema: Schema,
    #[serde(default)]
    pub images: Option<ImageDirective>,
}

impl GenerationConfig {
    /// The directive, if it actually asks for images
    pub fn image_directive(&self) -> Option<&ImageDirective> {
        self.images
            .as_ref()
            .filter(|directive| !directive.prompt.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageDirective {
    #[serde(default = "default_property_name")]
    pub property_name: String,
    pub prompt: String,
}

fn default_property_name() -> String {
    DEFAULT_IMAGE_PROPERTY.into()
}

/// Field name -> instruction for the model. Keeps the order it was written in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema(Vec<(String, String)>);

impl Schema {
    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Compact JSON object, fields in insertion order
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Schema {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Schema(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl Serialize for Schema {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (key, description) in &self.0 {
            map.serialize_entry(key, description)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Schema {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct SchemaVisitor;

        impl<'de> Visitor<'de> for SchemaVisitor {
            type Value = Schema;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of field names to descriptions")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<Schema, A::Error> {
                let mut fields = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((key, description)) = map.next_entry::<String, String>()? {
                    fields.push((key, description));
                }
                Ok(Schema(fields))
            }
        }

        deserializer.deserialize_map(SchemaVisitor)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSettings {
    pub chat_url: String,
    pub text_model: String,
    pub temperature: f32,
    pub images_url: String,
    pub image_model: image_model::Model,
    pub image_size: String,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            chat_url: crate::llm::DEFAULT_CHAT_URL.into(),
            text_model: "gpt-4-turbo-preview".into(),
            temperature: 1.0,
            images_url: open_ai_images::DEFAULT_IMAGES_URL.into(),
            image_model: image_model::Model::default(),
            image_size: open_ai_images::DEFAULT_IMAGE_SIZE.into(),
        }
    }
}

impl ApiSettings {
    pub fn make_llm(&self, api_key: String) -> OpenAIChat {
        OpenAIChat::new(api_key, &self.chat_url, &self.text_model)
    }

    pub fn make_image_model(&self, api_key: String) -> crate::ImgModArc {
        self.image_model
            .make(api_key, &self.images_url, &self.image_size)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSettings {
    pub output_dir: PathBuf,
    pub naming: RunNaming,
    /// `None` dispatches every record at once
    pub max_concurrent_images: Option<NonZeroUsize>,
    pub on_image_failure: FailurePolicy,
    pub request_timeout_secs: Option<u64>,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("output"),
            naming: RunNaming::default(),
            max_concurrent_images: None,
            on_image_failure: FailurePolicy::default(),
            request_timeout_secs: None,
        }
    }
}

impl RunSettings {
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    File(PathBuf),
    BuiltIn,
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigSource::File(path) => write!(f, "{}", path.display()),
            ConfigSource::BuiltIn => f.write_str("built-in example configuration"),
        }
    }
}

pub fn parse_config(src: &str) -> Result<Config> {
    Ok(ron::from_str(src)?)
}

pub fn load_config_file(path: &Path) -> Result<Config> {
    let src = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    parse_config(&src).with_context(|| format!("parsing {}", path.display()))
}

pub fn user_config_path() -> Result<PathBuf> {
    Ok(dirs::config_local_dir()
        .ok_or(eyre!("Couldn't get config dir"))?
        .join(CONFIG_FILE_NAME))
}

/// An explicit path wins, then the user's config file, then the bundled example
pub fn resolve_config(explicit: Option<&Path>) -> Result<(Config, ConfigSource)> {
    if let Some(path) = explicit {
        return Ok((load_config_file(path)?, ConfigSource::File(path.into())));
    }

    match user_config_path() {
        Ok(path) if path.exists() => {
            let config = load_config_file(&path)?;
            Ok((config, ConfigSource::File(path)))
        }
        _ => Ok((
            parse_config(EXAMPLE_CONFIG).context("parsing built-in configuration")?,
            ConfigSource::BuiltIn,
        )),
    }
}
