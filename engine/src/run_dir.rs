use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::atomic::{AtomicU32, Ordering},
    time::{SystemTime, UNIX_EPOCH},
};

use color_eyre::{Result, eyre::Context};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::IMAGES_DIR_NAME;

/// How a new run directory is named
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunNaming {
    /// `<prefix><n>` where n is one more than the number of existing run
    /// directories, bumped further if that name is already taken
    Sequential { prefix: String },
    /// `<prefix><unix millis>-<pid>-<seq>`
    Timestamped { prefix: String },
}

impl Default for RunNaming {
    fn default() -> Self {
        RunNaming::Sequential {
            prefix: "run-".into(),
        }
    }
}

/// Everything a run needs to know about where it writes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunContext {
    pub run_id: String,
    pub output_dir: PathBuf,
    pub images_dir: PathBuf,
}

impl RunContext {
    fn new(base: &Path, run_id: String) -> Self {
        let output_dir = base.join(&run_id);
        Self {
            images_dir: output_dir.join(IMAGES_DIR_NAME),
            output_dir,
            run_id,
        }
    }
}

/// Creates `base` if needed, then a fresh run directory below it
pub fn allocate_run(base: &Path, naming: &RunNaming) -> Result<RunContext> {
    fs::create_dir_all(base).with_context(|| format!("creating {}", base.display()))?;

    let ctx = match naming {
        RunNaming::Sequential { prefix } => {
            let mut n = count_run_dirs(base)? + 1;
            loop {
                if let Some(ctx) = try_create(base, format!("{prefix}{n}"))? {
                    break ctx;
                }
                n += 1;
            }
        }
        RunNaming::Timestamped { prefix } => loop {
            if let Some(ctx) = try_create(base, timestamped_id(prefix))? {
                break ctx;
            }
        },
    };

    info!("Allocated run directory {}", ctx.output_dir.display());
    Ok(ctx)
}

/// Number of directories directly below `base`. Symlinks and files don't count.
pub fn count_run_dirs(base: &Path) -> Result<usize> {
    let mut count = 0;
    for entry in fs::read_dir(base).with_context(|| format!("listing {}", base.display()))? {
        if entry?.file_type()?.is_dir() {
            count += 1;
        }
    }
    Ok(count)
}

fn try_create(base: &Path, run_id: String) -> Result<Option<RunContext>> {
    let ctx = RunContext::new(base, run_id);
    match fs::create_dir(&ctx.output_dir) {
        Ok(()) => Ok(Some(ctx)),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            debug!("{} already exists, trying the next name", ctx.output_dir.display());
            Ok(None)
        }
        Err(e) => {
            Err(e).with_context(|| format!("creating {}", ctx.output_dir.display()))
        }
    }
}

fn timestamped_id(prefix: &str) -> String {
    static SEQ: AtomicU32 = AtomicU32::new(0);
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    let seq = SEQ.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}{millis}-{:x}-{seq:x}", std::process::id())
}
