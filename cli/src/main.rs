use std::{io::stdout, sync::Arc};

use clap::Parser;
use color_eyre::Result;
use engine::{
    config::{Config, resolve_config},
    download::{Downloader, HttpDownloader, save_to_file},
    generator::construct_request,
    orchestrator::{self, Services},
};
use log::{info, warn};

mod cli;
use cli::{Cli, Command, ImageArgs};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    color_eyre::install()?;
    pretty_env_logger::init();

    let cli = Cli::parse();
    let (mut config, source) = resolve_config(cli.config.as_deref())?;
    info!("Using config from {source}");
    if let Some(dir) = cli.output_dir {
        config.run.output_dir = dir;
    }

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(&config, api_key(cli.api_key)).await,
        Command::Prompt => print_prompt(&config),
        Command::Image(args) => generate_single_image(&config, api_key(cli.api_key), args).await,
    }
}

fn api_key(key: Option<String>) -> String {
    key.unwrap_or_else(|| {
        warn!("OPEN_AI_API_KEY is not set, API requests will be rejected");
        String::new()
    })
}

async fn run(config: &Config, api_key: String) -> Result<()> {
    let mut services = Services {
        llm: Box::new(config.api.make_llm(api_key.clone())),
        image_model: config.api.make_image_model(api_key),
        downloader: Arc::new(HttpDownloader::new()),
    };

    let report = orchestrator::run(config, &mut services, &mut stdout()).await?;
    println!("\n{}", report.summary());
    Ok(())
}

fn print_prompt(config: &Config) -> Result<()> {
    let request = construct_request(&config.generation, config.api.temperature)?;

    if let Some(system) = request.system {
        println!("# System Message\n{system}");
    }
    println!("# Messages");
    for m in request.messages {
        println!("{}", m.content);
    }
    Ok(())
}

async fn generate_single_image(config: &Config, api_key: String, args: ImageArgs) -> Result<()> {
    let ImageArgs {
        description,
        model,
        out,
    } = args;
    let model = model.unwrap_or(config.api.image_model);
    let images = model.make(api_key, &config.api.images_url, &config.api.image_size);

    let image = images.get_image_url(&description).await?;
    if let Some(revised) = &image.revised_prompt {
        println!("Revised prompt: {revised}");
    }

    let downloader = HttpDownloader::new();
    let len = save_to_file(
        downloader.fetch(&image.url),
        &out,
        config.run.request_timeout(),
    )
    .await?;
    println!("Saved image to {}, {len} bytes", out.display());
    Ok(())
}
