use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

use clap::Args;
use lumpkit_archive::Registry;
use miette::{miette, Context, IntoDiagnostic, Result};
use tracing::{info, warn};

#[derive(Args)]
pub struct ConvertArgs {
    /// An input archive
    #[arg(short, long, value_name = "FILE")]
    input: PathBuf,

    /// A target archive
    #[arg(short, long, value_name = "FILE")]
    output: PathBuf,

    /// Format id of the target archive
    #[arg(long, value_name = "ID")]
    format: String,

    /// Allow overwriting the target
    #[arg(long, default_value_t = false)]
    overwrite: bool,
}

impl ConvertArgs {
    pub fn handle(&self) -> Result<()> {
        let codec = Registry::builtin().by_id(&self.format).ok_or(miette!(
            "unknown format {}, expected one of: {}",
            self.format,
            Registry::builtin()
                .codecs()
                .map(|c| c.id())
                .collect::<Vec<_>>()
                .join(", ")
        ))?;

        let mut archive = super::open(&self.input, None)?;
        info!(
            "converting {} from {} to {}",
            self.input.display(),
            archive.format().name,
            codec.descriptor().name
        );

        let encoded = archive
            .export(codec.as_ref())
            .context(format!("encoding {}", self.output.display()))?;
        for warning in &encoded.warnings {
            warn!("{warning}");
        }

        let mut out = if !self.overwrite {
            File::create_new(&self.output)
                .into_diagnostic()
                .context(format!("creating {}", &self.output.display()))?
        } else {
            File::create(&self.output)
                .into_diagnostic()
                .context(format!("creating {}", &self.output.display()))?
        };
        out.write_all(&encoded.data).into_diagnostic()?;

        Ok(())
    }
}
