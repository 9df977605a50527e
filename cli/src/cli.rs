use std::path::PathBuf;

use engine::image_model::Model;

/// Generate mock JSON records, and optionally a picture per record, with OpenAI
#[derive(Debug, clap::Parser)]
#[command(version)]
pub struct Cli {
    /// RON config file. Falls back to mockgen.ron in the user config dir, then to the bundled example
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Where run directories are created, overrides the config
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    #[arg(long, env = "OPEN_AI_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, clap::Subcommand)]
pub enum Command {
    /// Generate the records and, if configured, their images. The default.
    Run,
    /// Print the messages that would be sent to the text model
    Prompt,
    /// Generate a single image from a description
    Image(ImageArgs),
}

#[derive(Debug, clap::Args)]
pub struct ImageArgs {
    pub description: String,

    /// Overrides the configured image model
    #[arg(short, long)]
    pub model: Option<Model>,

    #[arg(long, default_value = "output.png")]
    pub out: PathBuf,
}
