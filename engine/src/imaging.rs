use std::{
    collections::{HashMap, HashSet},
    num::NonZeroUsize,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Duration,
};

use color_eyre::{
    Report, Result,
    eyre::{Context, eyre},
};
use indoc::formatdoc;
use log::{debug, info, warn};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::{sync::Semaphore, task::JoinSet};

use crate::{
    DownloaderArc, ImgModArc,
    config::{ImageDirective, RunSettings},
    download::save_to_file,
    generator::tidy,
    with_deadline,
};

/// What happens to the batch when some records don't get their image
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailurePolicy {
    /// One failure fails the whole batch and nothing is merged
    #[default]
    Abort,
    /// Merge what succeeded and report the rest
    KeepSucceeded,
}

#[derive(Debug, Error)]
pub enum ImagingError {
    #[error("Generated data is not a JSON array")]
    NotAnArray,

    #[error("Record {index} is not a JSON object")]
    NotAnObject { index: usize },

    #[error("Couldn't derive a file name from image url {url}")]
    EmptyFileName { url: String },
}

#[derive(Debug, Clone, Default)]
pub struct FanoutOptions {
    pub max_concurrency: Option<NonZeroUsize>,
    pub policy: FailurePolicy,
    pub deadline: Option<Duration>,
}

impl From<&RunSettings> for FanoutOptions {
    fn from(settings: &RunSettings) -> Self {
        Self {
            max_concurrency: settings.max_concurrent_images,
            policy: settings.on_image_failure,
            deadline: settings.request_timeout(),
        }
    }
}

#[derive(Debug, Default)]
pub struct FanoutReport {
    pub merged: usize,
    /// Sorted by record index. Only non-empty under `FailurePolicy::KeepSucceeded`.
    pub failures: Vec<RecordFailure>,
}

#[derive(Debug)]
pub struct RecordFailure {
    pub index: usize,
    pub error: Report,
}

/// The prompt for one record: the record itself, then the directive's instructions
pub fn build_image_prompt(record: &Value, instructions: &str) -> Result<String> {
    let record = serde_json::to_string(record)?;
    let instructions = tidy(instructions);
    Ok(formatdoc! {"
        Below is the JSON data that contains the information for the image generation:

        ###{record}###

        {instructions}
    "})
}

/// Last path segment of `url`, query and fragment ignored
pub fn derive_file_name(url: &str) -> Result<String> {
    let parsed = Url::parse(url).with_context(|| format!("parsing image url {url}"))?;
    let name = parsed
        .path_segments()
        .and_then(|segments| segments.last())
        .unwrap_or_default();

    if name.is_empty() {
        return Err(ImagingError::EmptyFileName { url: url.into() }.into());
    }
    Ok(name.to_string())
}

/// File names already handed out within one fan-out
#[derive(Debug, Default)]
struct ClaimedNames(Mutex<HashSet<String>>);

impl ClaimedNames {
    /// Returns `name`, or `<stem>-<n>.<ext>` with the smallest free `n` when
    /// another record already claimed it
    fn claim(&self, name: &str) -> String {
        let mut taken = self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if taken.insert(name.to_string()) {
            return name.to_string();
        }

        let path = Path::new(name);
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let ext = path.extension().map(|e| e.to_string_lossy().into_owned());
        (1..)
            .map(|n| match &ext {
                Some(ext) => format!("{stem}-{n}.{ext}"),
                None => format!("{stem}-{n}"),
            })
            .find(|candidate| taken.insert(candidate.clone()))
            .unwrap_or_else(|| name.to_string())
    }
}

/// Generates and downloads one image per record concurrently, then sets
/// `directive.property_name` on each record to the saved file's name.
/// Record order and all other fields are left as they are.
pub async fn generate_images(
    records: &mut Value,
    images_dir: &Path,
    directive: &ImageDirective,
    model: ImgModArc,
    downloader: DownloaderArc,
    opts: &FanoutOptions,
) -> Result<FanoutReport> {
    let records = records.as_array_mut().ok_or(ImagingError::NotAnArray)?;
    if let Some(index) = records.iter().position(|r| !r.is_object()) {
        return Err(ImagingError::NotAnObject { index }.into());
    }

    tokio::fs::create_dir_all(images_dir)
        .await
        .with_context(|| format!("creating {}", images_dir.display()))?;

    info!(
        "Generating {} images with {}, at most {} at a time",
        records.len(),
        model.model(),
        opts.max_concurrency
            .map_or_else(|| "all".to_string(), |n| n.to_string())
    );
    let limit = opts.max_concurrency.map(|n| Arc::new(Semaphore::new(n.get())));
    let claimed = Arc::new(ClaimedNames::default());
    let mut tasks = JoinSet::new();
    let mut task_records = HashMap::new();

    for (index, record) in records.iter().enumerate() {
        let prompt = build_image_prompt(record, &directive.prompt)?;
        let images_dir = images_dir.to_path_buf();
        let model = model.clone();
        let downloader = downloader.clone();
        let limit = limit.clone();
        let claimed = claimed.clone();
        let deadline = opts.deadline;

        let handle = tasks.spawn(async move {
            let _permit = match limit {
                Some(semaphore) => semaphore.acquire_owned().await.ok(),
                None => None,
            };
            let result = fetch_image(prompt, images_dir, model, downloader, &claimed, deadline)
                .await
                .wrap_err_with(|| format!("record {index}"));
            (index, result)
        });
        task_records.insert(handle.id(), index);
    }

    let total = records.len();
    let mut saved = Vec::with_capacity(total);
    let mut failures = vec![];
    // drain every task, even after a panic, so each download can clean up
    while let Some(joined) = tasks.join_next_with_id().await {
        let (index, result) = match joined {
            Ok((_, outcome)) => outcome,
            Err(join_err) => {
                let index = task_records.get(&join_err.id()).copied().unwrap_or_default();
                (index, Err(eyre!("record {index}: image task failed: {join_err}")))
            }
        };
        match result {
            Ok(file_name) => {
                debug!("Record {index} got image {file_name}");
                saved.push((index, file_name));
            }
            Err(error) => {
                warn!("Image for record {index} failed: {error:#}");
                failures.push(RecordFailure { index, error });
            }
        }
    }
    failures.sort_by_key(|f| f.index);

    if opts.policy == FailurePolicy::Abort && !failures.is_empty() {
        let failed = failures.len();
        let first = failures.remove(0);
        return Err(first
            .error
            .wrap_err(format!("{failed} of {total} images failed")));
    }

    for (index, file_name) in &saved {
        if let Some(record) = records[*index].as_object_mut() {
            record.insert(directive.property_name.clone(), Value::String(file_name.clone()));
        }
    }

    info!("Saved {} of {total} images to {}", saved.len(), images_dir.display());
    Ok(FanoutReport {
        merged: saved.len(),
        failures,
    })
}

async fn fetch_image(
    prompt: String,
    images_dir: PathBuf,
    model: ImgModArc,
    downloader: DownloaderArc,
    claimed: &ClaimedNames,
    deadline: Option<Duration>,
) -> Result<String> {
    let image = with_deadline(deadline, "image generation", model.get_image_url(&prompt)).await?;
    if let Some(revised) = &image.revised_prompt {
        debug!("Revised prompt: {revised}");
    }

    let derived = derive_file_name(&image.url)?;
    let file_name = claimed.claim(&derived);
    if file_name != derived {
        debug!("{derived} is already used by another record, saving as {file_name}");
    }
    save_to_file(downloader.fetch(&image.url), &images_dir.join(&file_name), deadline).await?;
    Ok(file_name)
}

#[cfg(test)]
mod tests {
    use expect_test::expect;
    use serde_json::json;

    use super::*;

    #[test]
    fn file_name_ignores_query() -> Result<()> {
        assert_eq!(
            derive_file_name("https://host/path/abc123.png?x=1")?,
            "abc123.png"
        );
        assert_eq!(
            derive_file_name("https://host/a/b/img-7.webp?se=2024&sig=%2Fx#frag")?,
            "img-7.webp"
        );
        Ok(())
    }

    #[test]
    fn empty_file_name_is_an_error() {
        for url in ["https://host/", "https://host/images/", "https://host"] {
            let err = derive_file_name(url).unwrap_err();
            assert!(
                matches!(
                    err.downcast_ref::<ImagingError>(),
                    Some(ImagingError::EmptyFileName { .. })
                ),
                "{url}"
            );
        }
    }

    #[test]
    fn unparsable_url_is_an_error() {
        assert!(derive_file_name("not a url").is_err());
    }

    #[test]
    fn repeated_names_get_a_counter() {
        let claimed = ClaimedNames::default();
        assert_eq!(claimed.claim("abc.png"), "abc.png");
        assert_eq!(claimed.claim("abc.png"), "abc-1.png");
        assert_eq!(claimed.claim("abc.png"), "abc-2.png");
        assert_eq!(claimed.claim("abc-1.png"), "abc-1-1.png");
        assert_eq!(claimed.claim("noext"), "noext");
        assert_eq!(claimed.claim("noext"), "noext-1");
    }

    #[test]
    fn prompt_embeds_record() -> Result<()> {
        let record = json!({"first_name": "Ada", "last_name": "Lovelace"});
        let prompt = build_image_prompt(
            &record,
            "
                A photorealistic portrait.
                White background.
            ",
        )?;

        let expect = expect![[r#"
            Below is the JSON data that contains the information for the image generation:

            ###{"first_name":"Ada","last_name":"Lovelace"}###

            A photorealistic portrait.
            White background.
        "#]];
        expect.assert_eq(&prompt);
        Ok(())
    }

    #[test]
    fn options_follow_run_settings() {
        let settings = RunSettings {
            max_concurrent_images: NonZeroUsize::new(4),
            on_image_failure: FailurePolicy::KeepSucceeded,
            request_timeout_secs: Some(30),
            ..RunSettings::default()
        };
        let opts = FanoutOptions::from(&settings);
        assert_eq!(opts.max_concurrency.map(NonZeroUsize::get), Some(4));
        assert_eq!(opts.policy, FailurePolicy::KeepSucceeded);
        assert_eq!(opts.deadline, Some(Duration::from_secs(30)));
    }
}
