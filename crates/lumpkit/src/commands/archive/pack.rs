use std::path::{Path, PathBuf};

use clap::Args;
use itertools::Itertools;
use lumpkit_archive::{Archive, Entry, Registry};
use miette::{miette, Context, IntoDiagnostic, Result};
use tracing::{info, warn};
use walkdir::WalkDir;

#[derive(Args)]
pub struct PackArgs {
    /// An input directory
    #[arg(short, long, value_name = "DIR")]
    pub(crate) directory: PathBuf,

    /// A target archive
    #[arg(short, long, value_name = "FILE")]
    pub(crate) file: PathBuf,

    /// Format id of the new archive, guessed from the file extension if omitted
    #[arg(long, value_name = "ID")]
    pub(crate) format: Option<String>,

    /// Allow overwriting the target
    #[arg(long, default_value_t = false)]
    pub(crate) overwrite: bool,
}

/// Pick a built-in format by the extension of `path`
fn format_for(path: &Path) -> Result<&'static str> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .ok_or(miette!("{} has no extension, pass --format", path.display()))?;

    Registry::builtin()
        .codecs()
        .map(|codec| codec.descriptor())
        .find(|d| d.extension.eq_ignore_ascii_case(extension))
        .map(|d| d.id)
        .ok_or(miette!("no format uses the .{extension} extension, pass --format"))
}

impl PackArgs {
    pub fn handle(&self) -> Result<()> {
        info!("creating {}", &self.file.display());

        if !self.overwrite && self.file.exists() {
            return Err(miette!("{} already exists", self.file.display()));
        }

        let files = WalkDir::new(&self.directory)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| !e.file_type().is_dir())
            .collect::<Vec<_>>();

        if files.is_empty() {
            return Err(miette!("directory is empty"));
        }

        let format = match &self.format {
            Some(id) => id.as_str(),
            None => format_for(&self.file)?,
        };
        let mut archive = Archive::create_format(format)?;

        let descriptor = archive.format();
        if !descriptor.capabilities.supports_dirs {
            let nested = files.iter().find(|file| {
                file.path()
                    .strip_prefix(&self.directory)
                    .is_ok_and(|name| name.components().count() > 1)
            });
            if let Some(nested) = nested {
                return Err(miette!(
                    "{} is in a subdirectory, but {} archives cannot hold directories",
                    nested.path().display(),
                    descriptor.name
                ));
            }
        }

        for file in files {
            let name = file
                .path()
                .strip_prefix(&self.directory)
                .into_diagnostic()?;
            let name = name
                .components()
                .map(|c| c.as_os_str().to_str())
                .collect::<Option<Vec<_>>>()
                .ok_or(miette!("unable to convert {} to a string", name.display()))?;
            let Some((leaf, dirs)) = name.split_last() else {
                continue;
            };
            info!("packing {}", name.iter().join("/"));

            let data = std::fs::read(file.path())
                .into_diagnostic()
                .context(format!("opening {}", file.path().display()))?;

            let dir = dirs.iter().join("/");
            if !dir.is_empty() {
                archive.create_dir(&dir)?;
            }
            archive
                .add_entry(&dir, Entry::new(*leaf, data))
                .context(format!("adding {}", file.path().display()))?;
        }

        for warning in archive.save_as(&self.file).context("finalizing archive")? {
            warn!("{warning}");
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use std::fs;

    use lumpkit_archive::{Archive, OpenOptions};
    use miette::IntoDiagnostic;

    use super::{format_for, PackArgs};
    use crate::commands::archive::extract::ExtractArgs;

    #[test]
    fn pack_then_extract() -> miette::Result<()> {
        let root = tempfile::tempdir().into_diagnostic()?;
        let source = root.path().join("source");
        fs::create_dir(&source).into_diagnostic()?;
        fs::write(source.join("B.TXT"), b"second").into_diagnostic()?;
        fs::write(source.join("A.TXT"), b"first").into_diagnostic()?;

        let file = root.path().join("OUT.BIN");
        PackArgs {
            directory: source,
            file: file.clone(),
            format: None,
            overwrite: false,
        }
        .handle()?;

        let archive = Archive::open(&file, &OpenOptions::default())?;
        let names = archive
            .entries()
            .into_iter()
            .map(|(path, _)| path)
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["A.TXT", "B.TXT"]);

        let target = root.path().join("target");
        ExtractArgs {
            file,
            directory: target.clone(),
            format: None,
            overwrite: false,
        }
        .handle()?;
        assert_eq!(fs::read(target.join("B.TXT")).ok(), Some(b"second".to_vec()));
        Ok(())
    }

    #[test]
    fn nested_files_need_a_format_with_directories() -> miette::Result<()> {
        let root = tempfile::tempdir().into_diagnostic()?;
        let source = root.path().join("source");
        fs::create_dir_all(source.join("SOUNDS")).into_diagnostic()?;
        fs::write(source.join("A.TXT"), b"first").into_diagnostic()?;
        fs::write(source.join("SOUNDS").join("GUN.WAV"), b"bang").into_diagnostic()?;

        let file = root.path().join("OUT.BIN");
        let result = PackArgs {
            directory: source,
            file: file.clone(),
            format: None,
            overwrite: false,
        }
        .handle();

        let error = result.err().map(|e| e.to_string()).unwrap_or_default();
        assert!(error.contains("GUN.WAV"), "{error}");
        assert!(error.contains("cannot hold directories"), "{error}");
        assert!(!file.exists());
        Ok(())
    }

    #[test]
    fn formats_follow_extensions() {
        assert_eq!(format_for("DOOM2.WAD".as_ref()).ok(), Some("wad"));
        assert_eq!(format_for("csounds.bin".as_ref()).ok(), Some("chasm_bin"));
        assert!(format_for("notes.txt".as_ref()).is_err());
        assert!(format_for("README".as_ref()).is_err());
    }
}
