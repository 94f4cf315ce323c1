//! Content sniffing for entry payloads.
//!
//! A [`Detector`] is an ordered list of rules. Each rule looks at a payload (and a little context about
//! the entry it came from) and either names a type or passes. Rules run from the highest priority down and
//! the first match wins. When nothing matches the entry is typed [`TypeId::UNKNOWN`], so detection never
//! fails.

use std::borrow::Cow;
use std::fmt::{self, Debug};

use derive_more::derive::{Deref, Display};
use tracing::trace;
use winnow::binary::{be_u32, le_u32};
use winnow::token::{literal, take};
use winnow::{PResult, Parser};

#[cfg(feature = "serde")]
use serde::Serialize;

use crate::entry::Entry;

/// Semantic type assigned to an entry's payload
#[derive(Debug, Clone, PartialEq, Eq, Hash, Display, Deref)]
#[cfg_attr(feature = "serde", derive(Serialize), serde(transparent))]
pub struct TypeId(Cow<'static, str>);

impl TypeId {
    pub const UNKNOWN: TypeId = TypeId::from_static("unknown");
    pub const MARKER: TypeId = TypeId::from_static("marker");
    pub const TEXT: TypeId = TypeId::from_static("text");
    pub const WAV: TypeId = TypeId::from_static("snd_wav");
    pub const MIDI: TypeId = TypeId::from_static("midi");
    pub const PNG: TypeId = TypeId::from_static("img_png");
    pub const IFF: TypeId = TypeId::from_static("iff_form");
    pub const PALETTE: TypeId = TypeId::from_static("palette");

    pub const fn from_static(id: &'static str) -> Self {
        TypeId(Cow::Borrowed(id))
    }

    pub fn new(id: impl Into<String>) -> Self {
        TypeId(Cow::Owned(id.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// What a rule may know about the entry besides its bytes
#[derive(Debug, Clone, Copy)]
pub struct DetectContext<'a> {
    /// Name of the entry, for extension hints
    pub name: &'a str,
    /// Size recorded for the entry
    pub size: u64,
}

impl DetectContext<'_> {
    /// The part of the name after the last `.`, if any
    pub fn extension(&self) -> Option<&str> {
        self.name.rsplit_once('.').map(|(_, ext)| ext)
    }
}

type Matcher = dyn Fn(&[u8], &DetectContext<'_>) -> Option<TypeId> + Send + Sync;

struct Rule {
    name: &'static str,
    priority: i32,
    matcher: Box<Matcher>,
}

/// Prioritised pipeline of detection rules
pub struct Detector {
    rules: Vec<Rule>,
}

impl Debug for Detector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.rules.iter().map(|r| (r.name, r.priority)))
            .finish()
    }
}

impl Default for Detector {
    /// The built-in rule set
    fn default() -> Self {
        Detector::empty()
            .with_rule("marker", 1000, |data, _| data.is_empty().then_some(TypeId::MARKER))
            .with_rule("png", 500, |data, _| is_png(data).then_some(TypeId::PNG))
            .with_rule("wav", 500, |data, _| is_wave(data).then_some(TypeId::WAV))
            .with_rule("midi", 500, |data, _| is_midi(data).then_some(TypeId::MIDI))
            .with_rule("iff", 400, |data, _| is_iff_form(data).then_some(TypeId::IFF))
            .with_rule("palette", 100, |data, ctx| {
                is_palette(data, ctx).then_some(TypeId::PALETTE)
            })
            .with_rule("text", -100, |data, _| is_text(data).then_some(TypeId::TEXT))
    }
}

impl Detector {
    /// A detector without rules, every payload is [`TypeId::UNKNOWN`]
    pub fn empty() -> Self {
        Detector { rules: Vec::new() }
    }

    /// Add a rule, keeping the list ordered by descending priority.
    ///
    /// Rules with equal priority run in the order they were added.
    pub fn add_rule<F>(&mut self, name: &'static str, priority: i32, matcher: F)
    where
        F: Fn(&[u8], &DetectContext<'_>) -> Option<TypeId> + Send + Sync + 'static,
    {
        let index = self.rules.partition_point(|r| r.priority >= priority);
        self.rules.insert(
            index,
            Rule {
                name,
                priority,
                matcher: Box::new(matcher),
            },
        );
    }

    pub fn with_rule<F>(mut self, name: &'static str, priority: i32, matcher: F) -> Self
    where
        F: Fn(&[u8], &DetectContext<'_>) -> Option<TypeId> + Send + Sync + 'static,
    {
        self.add_rule(name, priority, matcher);
        self
    }

    /// Names of the rules in the order they run
    pub fn rule_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.rules.iter().map(|r| r.name)
    }

    /// Run the pipeline over a payload
    pub fn detect(&self, data: &[u8], context: &DetectContext<'_>) -> TypeId {
        self.rules
            .iter()
            .find_map(|rule| {
                let found = (rule.matcher)(data, context);
                if let Some(kind) = &found {
                    trace!(rule = rule.name, name = context.name, %kind, "detected");
                }
                found
            })
            .unwrap_or(TypeId::UNKNOWN)
    }

    /// Detect and store the type of a loaded entry.
    ///
    /// Returns `None` and leaves the entry untouched when its payload is not loaded.
    pub fn detect_entry(&self, entry: &mut Entry) -> Option<TypeId> {
        let context = DetectContext {
            name: entry.name(),
            size: entry.size(),
        };
        let kind = self.detect(entry.data()?, &context);
        entry.set_kind(kind.clone());
        Some(kind)
    }
}

const PNG_SIGNATURE: &[u8; 8] = b"\x89PNG\r\n\x1a\n";

fn png_header(input: &mut &[u8]) -> PResult<u32> {
    let (_, length, _) = (literal(PNG_SIGNATURE), be_u32, literal(b"IHDR")).parse_next(input)?;
    Ok(length)
}

fn is_png(data: &[u8]) -> bool {
    matches!(png_header.parse_next(&mut &data[..]), Ok(13))
}

/// Parses the RIFF/WAVE header and returns the size of the leading `fmt ` chunk
fn wave_format_chunk(input: &mut &[u8]) -> PResult<u32> {
    let (_, _riff_size, _) = (literal(b"RIFF"), le_u32, literal(b"WAVE")).parse_next(input)?;
    let (_, fmt_size) = (literal(b"fmt "), le_u32).parse_next(input)?;
    take(fmt_size as usize).void().parse_next(input)?;
    Ok(fmt_size)
}

fn is_wave(data: &[u8]) -> bool {
    matches!(wave_format_chunk.parse_next(&mut &data[..]), Ok(size) if size >= 16)
}

fn midi_header(input: &mut &[u8]) -> PResult<u32> {
    let (_, length) = (literal(b"MThd"), be_u32).parse_next(input)?;
    Ok(length)
}

fn is_midi(data: &[u8]) -> bool {
    matches!(midi_header.parse_next(&mut &data[..]), Ok(6))
}

/// Parses an EA IFF 85 `FORM` group and returns its form type
fn iff_form<'s>(input: &mut &'s [u8]) -> PResult<&'s [u8]> {
    let (_, size) = (literal(b"FORM"), be_u32).parse_next(input)?;
    let mut body = take(size as usize).parse_next(input)?;
    take(4usize).parse_next(&mut body)
}

fn is_iff_form(data: &[u8]) -> bool {
    match iff_form.parse_next(&mut &data[..]) {
        Ok(id) => id
            .iter()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || *c == b' '),
        Err(_) => false,
    }
}

/// 256 RGB triplets, optionally repeated, with a name that says so
fn is_palette(data: &[u8], context: &DetectContext<'_>) -> bool {
    let name = context.name.to_ascii_uppercase();
    let named = name.contains("PAL")
        || context
            .extension()
            .is_some_and(|e| e.eq_ignore_ascii_case("pal"));
    named && !data.is_empty() && data.len() % 768 == 0
}

const TEXT_PROBE_LEN: usize = 1024;

fn is_text(data: &[u8]) -> bool {
    let prefix = &data[..data.len().min(TEXT_PROBE_LEN)];
    if prefix.is_empty() {
        return false;
    }

    let valid = match std::str::from_utf8(prefix) {
        Ok(text) => text,
        // The probe may cut a multi-byte sequence at its end
        Err(e) if e.error_len().is_none() => {
            std::str::from_utf8(&prefix[..e.valid_up_to()]).unwrap_or_default()
        }
        Err(_) => return false,
    };

    valid
        .chars()
        .all(|c| !c.is_control() || matches!(c, '\t' | '\n' | '\r' | '\x0c' | '\x1a'))
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use crate::detect::{DetectContext, Detector, TypeId};
    use crate::entry::Entry;

    fn context<'a>(name: &'a str, data: &[u8]) -> DetectContext<'a> {
        DetectContext {
            name,
            size: data.len() as u64,
        }
    }

    pub(crate) fn wave(format_size: u32) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(b"RIFF");
        data.extend_from_slice(&36u32.to_le_bytes());
        data.extend_from_slice(b"WAVE");
        data.extend_from_slice(b"fmt ");
        data.extend_from_slice(&format_size.to_le_bytes());
        data.extend_from_slice(&[0x01, 0x00, 0x01, 0x00]);
        data.extend_from_slice(&11025u32.to_le_bytes());
        data.extend_from_slice(&11025u32.to_le_bytes());
        data.extend_from_slice(&[0x01, 0x00, 0x08, 0x00]);
        data.resize(20 + format_size as usize, 0);
        data.extend_from_slice(b"data");
        data.extend_from_slice(&4u32.to_le_bytes());
        data.extend_from_slice(&[0x80, 0x80, 0x80, 0x80]);
        data
    }

    #[test]
    fn detect_builtin_types() {
        let detector = Detector::default();

        let png = b"\x89PNG\r\n\x1a\n\x00\x00\x00\x0dIHDR\x00\x00\x00\x01";
        let midi = b"MThd\x00\x00\x00\x06\x00\x01\x00\x02\x00\x60";
        let iff = b"FORM\x00\x00\x00\x08DTIIABCD";

        assert_eq!(detector.detect(b"", &context("EMPTY", b"")), TypeId::MARKER);
        assert_eq!(detector.detect(png, &context("A.PNG", png)), TypeId::PNG);
        assert_eq!(detector.detect(midi, &context("SONG", midi)), TypeId::MIDI);
        assert_eq!(detector.detect(iff, &context("TABLE", iff)), TypeId::IFF);

        let wav = wave(16);
        assert_eq!(detector.detect(&wav, &context("A.WAV", &wav)), TypeId::WAV);
        let broken = wave(0x12);
        assert_eq!(detector.detect(&broken, &context("B.WAV", &broken)), TypeId::WAV);

        let text = b"Chasm: The Rift\r\nlevel 1\r\n";
        assert_eq!(detector.detect(text, &context("README", text)), TypeId::TEXT);
    }

    #[test]
    fn detection_is_total() {
        let detector = Detector::default();
        let garbage = [0x00, 0xFF, 0x13, 0x37, 0x00];
        assert_eq!(
            detector.detect(&garbage, &context("JUNK", &garbage)),
            TypeId::UNKNOWN
        );
        assert_eq!(
            Detector::empty().detect(b"text", &context("A", b"text")),
            TypeId::UNKNOWN
        );
    }

    #[test]
    fn truncated_structures_are_rejected() {
        let detector = Detector::default();

        // FORM claims more bytes than are present
        let iff = b"FORM\x00\x00\x01\x00DTII";
        assert_ne!(detector.detect(iff, &context("A", iff)), TypeId::IFF);

        // fmt chunk runs past the end
        let mut wav = wave(16);
        wav.truncate(30);
        assert_ne!(detector.detect(&wav, &context("A.WAV", &wav)), TypeId::WAV);
    }

    #[test]
    fn palette_needs_size_and_name() {
        let detector = Detector::default();
        let data = vec![0x00; 768];

        assert_eq!(
            detector.detect(&data, &context("CHASM.PAL", &data)),
            TypeId::PALETTE
        );
        assert_eq!(
            detector.detect(&data, &context("FLOOR.CEL", &data)),
            TypeId::UNKNOWN
        );
    }

    #[test]
    fn priority_order_is_respected() {
        let detector = Detector::default()
            .with_rule("late", -500, |_, _| Some(TypeId::new("late")))
            .with_rule("early", 2000, |data, _| {
                data.starts_with(b"CSid").then(|| TypeId::new("archive_chasm_bin"))
            });

        let names = detector.rule_names().collect::<Vec<_>>();
        assert_eq!(names.first(), Some(&"early"));
        assert_eq!(names.last(), Some(&"late"));

        assert_eq!(
            detector.detect(b"CSid\x00\x00", &context("NESTED.BIN", b"")).as_str(),
            "archive_chasm_bin"
        );
        assert_eq!(
            detector.detect(&[0xFF], &context("X", &[0xFF])).as_str(),
            "late"
        );
    }

    #[test]
    fn detect_entry_requires_data() {
        let detector = Detector::default();

        let mut unloaded = Entry::unloaded("A.TXT", 5);
        assert_eq!(detector.detect_entry(&mut unloaded), None);
        assert_eq!(unloaded.kind(), None);

        let mut loaded = Entry::new("A.TXT", b"hello".to_vec());
        assert_eq!(detector.detect_entry(&mut loaded), Some(TypeId::TEXT));
        assert_eq!(loaded.kind(), Some(&TypeId::TEXT));
    }
}
