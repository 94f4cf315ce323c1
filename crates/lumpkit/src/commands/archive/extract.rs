use std::fs::File;
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use clap::Args;
use miette::{miette, Context, IntoDiagnostic, Result};
use tracing::info;

#[derive(Args)]
pub struct ExtractArgs {
    /// An input archive
    #[arg(short, long, value_name = "FILE")]
    pub(crate) file: PathBuf,

    /// A target directory
    #[arg(short, long, value_name = "DIR")]
    pub(crate) directory: PathBuf,

    /// Format id to use instead of probing the file
    #[arg(long, value_name = "ID")]
    pub(crate) format: Option<String>,

    /// Allow overwriting the target
    #[arg(long, default_value_t = false)]
    pub(crate) overwrite: bool,
}

impl ExtractArgs {
    pub fn handle(&self) -> Result<()> {
        let mut archive = super::open(&self.file, self.format.as_deref())?;
        let paths = archive
            .entries()
            .into_iter()
            .map(|(path, _)| path)
            .collect::<Vec<_>>();

        for path in paths {
            let relative = Path::new(&path);
            if !relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)))
            {
                return Err(miette!("refusing to extract {path} outside of the target"));
            }

            let p = self.directory.join(relative);
            info!("writing {}", p.display());

            if let Some(parent) = p.parent() {
                std::fs::create_dir_all(parent)
                    .into_diagnostic()
                    .context(format!("creating {}", parent.display()))?;
            }
            let mut out = if !self.overwrite {
                File::create_new(&p)
                    .into_diagnostic()
                    .context(format!("creating {}", &p.display()))?
            } else {
                File::create(&p)
                    .into_diagnostic()
                    .context(format!("creating {}", &p.display()))?
            };

            let data = archive
                .entry_data(&path)
                .context(format!("reading {path}"))?;
            out.write_all(data).into_diagnostic()?;
            archive.unload_entry(&path)?;
        }
        Ok(())
    }
}
