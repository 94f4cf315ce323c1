use std::collections::HashSet;
use std::fmt::Display;
use std::path::PathBuf;

use clap::{Args, ValueEnum};
use itertools::Itertools;
use lumpkit_archive::{Archive, Entry, TypeId};
use miette::{Context, Result};
use owo_colors::OwoColorize;
use similar::{ChangeTag, TextDiff};

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
enum Mode {
    /// Only name the entries that changed
    #[default]
    Summary,
    /// Also show line changes of text entries
    Full,
}

#[derive(Debug, Eq, PartialEq, PartialOrd, Ord)]
enum Change {
    Added(String),
    Removed(String),
    Modified {
        path: String,
        sizes: (u64, u64),
        lines: Vec<String>,
    },
}

impl Display for Change {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Change::Added(path) => writeln!(f, "✅ {}", path.green()),
            Change::Removed(path) => writeln!(f, "❌ {}", path.red()),
            Change::Modified {
                path,
                sizes: (old, new),
                lines,
            } => {
                if old == new {
                    writeln!(f, "🔃 {}", path.blue())?;
                } else {
                    writeln!(f, "🔃 {} ({} vs {})", path.blue(), old.red(), new.green())?;
                }
                if !lines.is_empty() {
                    writeln!(f, "{}", lines.iter().map(|l| format!("  {l}")).join("\n"))?;
                }
                Ok(())
            }
        }
    }
}

#[derive(Args)]
pub struct DiffArgs {
    /// The original archive
    #[arg(value_name = "OLD")]
    old: PathBuf,

    /// The changed archive
    #[arg(value_name = "NEW")]
    new: PathBuf,

    /// Comparison mode
    #[arg(short, long, value_enum, default_value_t = Mode::Summary)]
    mode: Mode,
}

fn is_text(entry: &Entry) -> bool {
    entry.kind() == Some(&TypeId::TEXT)
}

impl DiffArgs {
    fn line_changes(&self, old: &[u8], new: &[u8]) -> Vec<String> {
        let old = String::from_utf8_lossy(old);
        let new = String::from_utf8_lossy(new);
        let diff = TextDiff::from_lines(old.as_ref(), new.as_ref());

        let mut lines = Vec::new();
        for op in diff.ops() {
            for change in diff.iter_inline_changes(op) {
                let marker = match change.tag() {
                    ChangeTag::Delete => "-",
                    ChangeTag::Insert => "+",
                    ChangeTag::Equal => " ",
                };
                let mut line = String::from(marker);
                for (emphasized, value) in change.iter_strings_lossy() {
                    let value = value.trim_end_matches('\n');
                    match (change.tag(), emphasized) {
                        (ChangeTag::Insert, true) => {
                            line.push_str(&format!("{}", value.green().underline()))
                        }
                        (ChangeTag::Delete, true) => {
                            line.push_str(&format!("{}", value.red().underline()))
                        }
                        _ => line.push_str(&format!("{}", value.dimmed())),
                    }
                }
                lines.push(line);
            }
        }
        lines
    }

    fn compare_entry(
        &self,
        path: &str,
        old: &mut Archive,
        new: &mut Archive,
    ) -> Result<Option<Change>> {
        old.load_entry(path).context(format!("reading {path}"))?;
        new.load_entry(path).context(format!("reading {path}"))?;

        let (Some(left), Some(right)) = (old.entry(path), new.entry(path)) else {
            return Ok(None);
        };
        if left.size() == right.size() && left.crc32() == right.crc32() {
            return Ok(None);
        }

        let lines = match (self.mode, left.data(), right.data()) {
            (Mode::Full, Some(a), Some(b)) if is_text(left) && is_text(right) => {
                self.line_changes(a, b)
            }
            _ => Vec::new(),
        };
        Ok(Some(Change::Modified {
            path: path.to_owned(),
            sizes: (left.size(), right.size()),
            lines,
        }))
    }

    fn compare(&self, old: &mut Archive, new: &mut Archive) -> Result<Vec<Change>> {
        let paths = |archive: &Archive| {
            archive
                .entries()
                .into_iter()
                .map(|(path, _)| path)
                .collect::<HashSet<_>>()
        };
        let old_paths = paths(&*old);
        let new_paths = paths(&*new);

        let mut changes = new_paths
            .difference(&old_paths)
            .map(|p| Change::Added(p.clone()))
            .chain(old_paths.difference(&new_paths).map(|p| Change::Removed(p.clone())))
            .collect::<Vec<_>>();

        for path in old_paths.intersection(&new_paths).sorted() {
            if let Some(change) = self.compare_entry(path, old, new)? {
                changes.push(change);
            }
            old.unload_unmodified();
            new.unload_unmodified();
        }

        changes.sort();
        Ok(changes)
    }

    pub fn handle(&self) -> Result<()> {
        let mut old = super::open(&self.old, None)?;
        let mut new = super::open(&self.new, None)?;

        for change in self.compare(&mut old, &mut new)? {
            print!("{change}");
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use lumpkit_archive::{Archive, Entry};
    use pretty_assertions::assert_eq;

    use super::{Change, DiffArgs, Mode};

    fn archive(entries: &[(&str, &[u8])]) -> miette::Result<Archive> {
        let mut archive = Archive::create_format("chasm_bin")?;
        for (name, data) in entries {
            archive.add_entry("", Entry::new(*name, data.to_vec()))?;
        }
        Ok(archive)
    }

    #[test]
    fn entries_are_classified() -> miette::Result<()> {
        let args = DiffArgs {
            old: "OLD.BIN".into(),
            new: "NEW.BIN".into(),
            mode: Mode::Summary,
        };
        let mut old = archive(&[("KEEP", b"same"), ("GONE", b"x"), ("EDIT", b"abc")])?;
        let mut new = archive(&[("KEEP", b"same"), ("EDIT", b"abd"), ("FRESH", b"y")])?;

        let changes = args.compare(&mut old, &mut new)?;
        assert_eq!(
            changes,
            vec![
                Change::Added("FRESH".into()),
                Change::Removed("GONE".into()),
                Change::Modified {
                    path: "EDIT".into(),
                    sizes: (3, 3),
                    lines: vec![],
                },
            ]
        );
        Ok(())
    }

    #[test]
    fn text_entries_get_line_changes() -> miette::Result<()> {
        let args = DiffArgs {
            old: "OLD.BIN".into(),
            new: "NEW.BIN".into(),
            mode: Mode::Full,
        };
        let mut old = archive(&[("SCRIPT.TXT", b"one\ntwo\n")])?;
        let mut new = archive(&[("SCRIPT.TXT", b"one\nthree\n")])?;

        let changes = args.compare(&mut old, &mut new)?;
        let [Change::Modified { lines, .. }] = changes.as_slice() else {
            panic!("expected a single modification, got {changes:?}");
        };
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with(' '));
        assert!(lines[1].starts_with('-'));
        assert!(lines[2].starts_with('+'));
        Ok(())
    }
}
