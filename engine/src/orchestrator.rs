use std::io::Write;

use color_eyre::{Result, eyre::Context};
use log::{info, warn};
use serde_json::Value;
use strum::Display;

use crate::{
    DownloaderArc, ImgModArc, LLMBox,
    config::Config,
    generator::{construct_request, generate_mock_data},
    imaging::{FanoutOptions, FanoutReport, generate_images},
    output::write_output,
    run_dir::{RunContext, allocate_run},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum RunPhase {
    Idle,
    Preparing,
    Generating,
    WritingText,
    Imaging,
    WritingMerged,
    Done,
}

/// Which version of `data.json` was written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    TextOnly,
    Merged,
}

/// The collaborators a run talks to
pub struct Services {
    pub llm: LLMBox,
    pub image_model: ImgModArc,
    pub downloader: DownloaderArc,
}

#[derive(Debug)]
pub struct RunReport {
    pub run: RunContext,
    pub stages_written: Vec<Stage>,
    pub fanout: Option<FanoutReport>,
}

impl RunReport {
    pub fn summary(&self) -> String {
        let images = if self.fanout.is_some() { " and images" } else { "" };
        let mut summary = format!(
            "Done! Generated mock data{images} in {}",
            self.run.output_dir.display()
        );
        if let Some(report) = self.fanout.as_ref().filter(|r| !r.failures.is_empty()) {
            let failed: Vec<String> = report.failures.iter().map(|f| f.index.to_string()).collect();
            summary.push_str(&format!(
                "\n{} record(s) have no image: {}",
                failed.len(),
                failed.join(", ")
            ));
        }
        summary
    }
}

struct PhaseTracker {
    phase: RunPhase,
}

impl PhaseTracker {
    fn enter(&mut self, next: RunPhase) {
        info!("{} -> {next}", self.phase);
        self.phase = next;
    }
}

/// One complete run: allocate a directory, generate and store the records,
/// then fetch and merge images if the config asks for them.
///
/// Generated text is mirrored to `console` while it streams in.
pub async fn run(
    config: &Config,
    services: &mut Services,
    console: &mut (dyn Write + Send),
) -> Result<RunReport> {
    let mut tracker = PhaseTracker {
        phase: RunPhase::Idle,
    };
    let deadline = config.run.request_timeout();

    tracker.enter(RunPhase::Preparing);
    let run = allocate_run(&config.run.output_dir, &config.run.naming)?;

    tracker.enter(RunPhase::Generating);
    let req = construct_request(&config.generation, config.api.temperature)?;
    let text = generate_mock_data(services.llm.as_mut(), req, console, deadline).await?;

    tracker.enter(RunPhase::WritingText);
    write_output(&run, &text).await?;
    let mut stages_written = vec![Stage::TextOnly];

    let mut fanout = None;
    if let Some(directive) = config.generation.image_directive() {
        tracker.enter(RunPhase::Imaging);
        writeln!(console, "\n\nGenerating images...")?;

        let mut records: Value =
            serde_json::from_str(&text).context("parsing generated data as JSON")?;
        let report = generate_images(
            &mut records,
            &run.images_dir,
            directive,
            services.image_model.clone(),
            services.downloader.clone(),
            &FanoutOptions::from(&config.run),
        )
        .await?;
        if !report.failures.is_empty() {
            warn!(
                "{} record(s) were written without an image",
                report.failures.len()
            );
        }

        tracker.enter(RunPhase::WritingMerged);
        write_output(&run, &serde_json::to_string_pretty(&records)?).await?;
        stages_written.push(Stage::Merged);
        fanout = Some(report);
    }

    tracker.enter(RunPhase::Done);
    Ok(RunReport {
        run,
        stages_written,
        fanout,
    })
}
