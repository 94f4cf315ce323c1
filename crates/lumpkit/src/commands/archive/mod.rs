use std::path::Path;

use lumpkit_archive::{Archive, OpenOptions};
use miette::{Context, Result};

pub mod convert;
pub mod diff;
pub mod extract;
pub mod list;
pub mod pack;

#[derive(clap::Subcommand)]
pub enum ArchiveCommands {
    /// List the entries of an archive
    List(list::ListArgs),
    /// Extract an archive into a directory
    Extract(extract::ExtractArgs),
    /// Pack a directory into an archive
    Pack(pack::PackArgs),
    /// Compare two archives
    Diff(diff::DiffArgs),
    /// Write an archive in another format
    Convert(convert::ConvertArgs),
}

impl ArchiveCommands {
    pub fn handle(&self) -> Result<()> {
        match self {
            ArchiveCommands::List(list) => list.handle(),
            ArchiveCommands::Extract(extract) => extract.handle(),
            ArchiveCommands::Pack(pack) => pack.handle(),
            ArchiveCommands::Diff(diff) => diff.handle(),
            ArchiveCommands::Convert(convert) => convert.handle(),
        }
    }
}

/// Open an archive, probing its format unless one is forced
pub(crate) fn open(path: &Path, format: Option<&str>) -> Result<Archive> {
    let options = match format {
        Some(id) => OpenOptions::builder().format(id).build(),
        None => OpenOptions::default(),
    };
    Archive::open(path, &options).context(format!("path: {}", path.display()))
}
