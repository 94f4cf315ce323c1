use std::path::PathBuf;

use clap::Args;
use lumpkit_archive::EntryInfo;
use miette::{IntoDiagnostic, Result};
use owo_colors::OwoColorize;

#[derive(Args)]
pub struct ListArgs {
    /// An input archive
    #[arg(short, long, value_name = "FILE")]
    file: PathBuf,

    /// Format id to use instead of probing the file
    #[arg(long, value_name = "ID")]
    format: Option<String>,

    /// Print the listing as JSON
    #[arg(long, default_value_t = false)]
    json: bool,
}

impl ListArgs {
    pub fn handle(&self) -> Result<()> {
        let archive = super::open(&self.file, self.format.as_deref())?;
        let infos = archive
            .entries()
            .into_iter()
            .map(|(path, entry)| entry.info(path))
            .collect::<Vec<EntryInfo>>();

        if self.json {
            println!("{}", serde_json::to_string_pretty(&infos).into_diagnostic()?);
            return Ok(());
        }

        println!(
            "{} ({}, {} entries)",
            self.file.display().bold(),
            archive.format().name,
            infos.len()
        );
        for (index, info) in infos.iter().enumerate() {
            let kind = info.kind.as_ref().map_or("?", |k| k.as_str());
            println!(
                "{:>5}  {:<16} {:>10}  {}",
                index,
                info.path,
                info.size,
                kind.dimmed()
            );
        }
        Ok(())
    }
}
