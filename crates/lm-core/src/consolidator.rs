//! Normalization of user-edited flat-file phrase dictionaries.
//!
//! Records are `phrase key [weight] [#comment]`, whitespace separated. A pass
//! collapses whitespace, drops blank and malformed lines, merges duplicate
//! `(phrase, key)` pairs into their last occurrence (tagged as an override)
//! and ends the file with a pragma line. The pragma lets a later load skip the
//! pass when the file has not been edited since.
//!
//! `consolidate_text` and `consolidate_file` share one implementation, so the
//! in-memory editor buffer and the on-disk file normalize identically.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;

use tracing::{debug, warn};

use crate::error::ErrorKind;
use crate::fsutil::{atomic_write, WriteLock};

/// Trailing marker of a consolidated file.
pub const PRAGMA: &str = "# 𝙵𝙾𝚁𝙼𝙰𝚃 lm.userLanguageModelData.formatted";

/// Comment attached to the surviving record of a merged duplicate.
///
/// Mathematical monospace letters keep reading converters in external
/// editors from touching it.
pub const OVERRIDE_TAG: &str = "#𝙾𝚟𝚎𝚛𝚛𝚒𝚍𝚎";

#[derive(Debug, thiserror::Error)]
pub enum ConsolidateError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("cannot lock {path} for writing: {source}")]
    Locked { path: String, source: io::Error },

    #[error("{path} is not valid UTF-8")]
    Corrupt { path: String },
}

impl ConsolidateError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConsolidateError::Io(e) => ErrorKind::of_io(e),
            ConsolidateError::Locked { source, .. } => ErrorKind::of_io(source),
            ConsolidateError::Corrupt { .. } => ErrorKind::ResourceCorrupt,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Pragma present and the shortcut was allowed.
    Skipped,
    /// Already normalized; nothing written.
    Unchanged,
    Rewritten,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PhraseRecord<'a> {
    pub phrase: &'a str,
    pub key: &'a str,
    /// Weight token as written, so rewriting never reformats numbers.
    pub weight: Option<&'a str>,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParsedLine<'a> {
    Blank,
    Comment(String),
    Record(PhraseRecord<'a>),
    Malformed,
}

pub fn parse_line(line: &str) -> ParsedLine<'_> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    let Some(first) = fields.first() else {
        return ParsedLine::Blank;
    };
    if first.starts_with('#') {
        return ParsedLine::Comment(fields.join(" "));
    }
    if fields.len() < 2 || fields[1].starts_with('#') {
        return ParsedLine::Malformed;
    }

    let mut rest = fields[2..].iter().copied().peekable();
    let weight = match rest.peek() {
        Some(w) if !w.starts_with('#') => {
            match w.parse::<f64>() {
                Ok(v) if v.is_finite() => {}
                _ => return ParsedLine::Malformed,
            }
            rest.next()
        }
        _ => None,
    };
    let tail: Vec<&str> = rest.collect();
    let comment = match tail.first() {
        None => None,
        Some(c) if c.starts_with('#') => Some(tail.join(" ")),
        Some(_) => return ParsedLine::Malformed,
    };

    ParsedLine::Record(PhraseRecord {
        phrase: fields[0],
        key: fields[1],
        weight,
        comment,
    })
}

fn render(rec: &PhraseRecord<'_>, comment: Option<&str>) -> String {
    let mut out = format!("{} {}", rec.phrase, rec.key);
    if let Some(w) = rec.weight {
        out.push(' ');
        out.push_str(w);
    }
    if let Some(c) = comment {
        out.push(' ');
        out.push_str(c);
    }
    out
}

/// Whether the last non-blank line is the pragma.
pub fn has_pragma(content: &str) -> bool {
    content
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .is_some_and(|l| l.split_whitespace().collect::<Vec<_>>().join(" ") == PRAGMA)
}

/// Normalize a dictionary buffer. Idempotent.
///
/// A leading byte-order mark is dropped so it never sticks to the first
/// phrase.
pub fn consolidate_text(input: &str) -> String {
    let input = input.strip_prefix('\u{FEFF}').unwrap_or(input);
    let parsed: Vec<ParsedLine<'_>> = input.lines().map(parse_line).collect();

    // (phrase, key) -> (index of last occurrence, occurrences)
    let mut last: HashMap<(&str, &str), (usize, usize)> = HashMap::new();
    for (i, line) in parsed.iter().enumerate() {
        if let ParsedLine::Record(rec) = line {
            let slot = last.entry((rec.phrase, rec.key)).or_insert((i, 0));
            slot.0 = i;
            slot.1 += 1;
        }
    }

    let mut out: Vec<String> = Vec::with_capacity(parsed.len() + 1);
    for (i, line) in parsed.iter().enumerate() {
        match line {
            ParsedLine::Blank | ParsedLine::Malformed => {}
            ParsedLine::Comment(c) if c == PRAGMA => {}
            ParsedLine::Comment(c) => out.push(c.clone()),
            ParsedLine::Record(rec) => {
                let (last_index, occurrences) = last[&(rec.phrase, rec.key)];
                if last_index != i {
                    continue;
                }
                if occurrences > 1 {
                    out.push(render(rec, Some(OVERRIDE_TAG)));
                } else {
                    out.push(render(rec, rec.comment.as_deref()));
                }
            }
        }
    }
    out.push(PRAGMA.to_string());

    let mut text = out.join("\n");
    text.push('\n');
    text
}

/// Consolidate a file in place.
///
/// Fails without touching the file when it cannot be opened for exclusive
/// writing or is not UTF-8. The rewrite goes through a temp file and rename.
pub fn consolidate_file(
    path: &Path,
    allow_pragma_shortcut: bool,
) -> Result<Outcome, ConsolidateError> {
    let _lock = WriteLock::try_acquire(path).map_err(|source| ConsolidateError::Locked {
        path: path.display().to_string(),
        source,
    })?;

    let bytes = fs::read(path)?;
    let content = std::str::from_utf8(&bytes).map_err(|_| ConsolidateError::Corrupt {
        path: path.display().to_string(),
    })?;
    if allow_pragma_shortcut && has_pragma(content) {
        debug!(path = %path.display(), "pragma present, skipping consolidation");
        return Ok(Outcome::Skipped);
    }

    let normalized = consolidate_text(content);
    if normalized.as_bytes() == bytes.as_slice() {
        return Ok(Outcome::Unchanged);
    }
    atomic_write(path, normalized.as_bytes())?;
    debug!(path = %path.display(), "consolidated");
    Ok(Outcome::Rewritten)
}

/// Boolean wrapper for callers that only report success.
pub fn consolidate(path: &Path, allow_pragma_shortcut: bool) -> bool {
    match consolidate_file(path, allow_pragma_shortcut) {
        Ok(_) => true,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "consolidation failed");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parse_full_record() {
        let ParsedLine::Record(rec) = parse_line("你好\tni3hao3  -2.5 #note here") else {
            panic!("expected record");
        };
        assert_eq!(rec.phrase, "你好");
        assert_eq!(rec.key, "ni3hao3");
        assert_eq!(rec.weight, Some("-2.5"));
        assert_eq!(rec.comment.as_deref(), Some("#note here"));
    }

    #[test]
    fn parse_rejects_malformed() {
        assert_eq!(parse_line("lonely"), ParsedLine::Malformed);
        assert_eq!(parse_line("你好 #ni3"), ParsedLine::Malformed);
        assert_eq!(parse_line("你好 ni3hao3 heavy"), ParsedLine::Malformed);
        assert_eq!(parse_line("你好 ni3hao3 1.0 extra"), ParsedLine::Malformed);
        assert_eq!(parse_line("你好 ni3hao3 NaN"), ParsedLine::Malformed);
        assert_eq!(parse_line("   "), ParsedLine::Blank);
    }

    #[test]
    fn duplicate_pair_merged_into_last_with_tag() {
        let input = "你好 ni3hao3 -1\n早 zao3\n你好 ni3hao3 -3\n";
        let out = consolidate_text(input);
        let tagged: Vec<&str> = out.lines().filter(|l| l.contains(OVERRIDE_TAG)).collect();
        assert_eq!(tagged, vec![format!("你好 ni3hao3 -3 {OVERRIDE_TAG}").as_str()]);
        assert_eq!(out.matches("ni3hao3").count(), 1);
        assert_eq!(
            out,
            format!("早 zao3\n你好 ni3hao3 -3 {OVERRIDE_TAG}\n{PRAGMA}\n")
        );
    }

    #[test]
    fn malformed_and_blank_lines_dropped() {
        let out = consolidate_text("\n\nbad\n好 hao3 x\n# keep me\n好 hao3\n");
        assert_eq!(out, format!("# keep me\n好 hao3\n{PRAGMA}\n"));
    }

    #[test]
    fn second_pass_is_noop() {
        let once = consolidate_text("a b\r\nc d 1.0\na b #x\n");
        assert_eq!(consolidate_text(&once), once);
        assert!(has_pragma(&once));
    }

    #[test]
    fn stale_pragma_is_moved_to_end() {
        let input = format!("a b\n{PRAGMA}\nc d\n");
        assert!(!has_pragma(&input));
        assert_eq!(consolidate_text(&input), format!("a b\nc d\n{PRAGMA}\n"));
    }

    #[test]
    fn file_and_buffer_agree() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("userdata-cht.txt");
        let input = "你好  ni3hao3\n你好 ni3hao3\t\n";
        fs::write(&path, input).unwrap();

        assert_eq!(consolidate_file(&path, false).unwrap(), Outcome::Rewritten);
        assert_eq!(fs::read_to_string(&path).unwrap(), consolidate_text(input));
        assert_eq!(consolidate_file(&path, false).unwrap(), Outcome::Unchanged);
        assert_eq!(consolidate_file(&path, true).unwrap(), Outcome::Skipped);
    }

    #[test]
    fn pragma_shortcut_skips_unnormalized_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("u.txt");
        let input = format!("a   b\n{PRAGMA}\n");
        fs::write(&path, &input).unwrap();

        assert!(consolidate(&path, true));
        assert_eq!(fs::read_to_string(&path).unwrap(), input);
        assert!(consolidate(&path, false));
        assert_eq!(fs::read_to_string(&path).unwrap(), format!("a b\n{PRAGMA}\n"));
    }

    #[test]
    fn leading_bom_does_not_split_duplicates() {
        let out = consolidate_text("\u{FEFF}你好 ni3hao3\n你好 ni3hao3\n");
        assert_eq!(out, format!("你好 ni3hao3 {OVERRIDE_TAG}\n{PRAGMA}\n"));
        assert_eq!(consolidate_text(&out), out);
    }

    #[test]
    fn non_utf8_file_is_left_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("userdata-cht.txt");
        let mut big5 = vec![0xA7, 0x41, 0xA6, 0x6E];
        big5.extend_from_slice(" ni3\n好 hao3\n".as_bytes());
        fs::write(&path, &big5).unwrap();

        let err = consolidate_file(&path, true).unwrap_err();
        assert!(matches!(err, ConsolidateError::Corrupt { .. }));
        assert_eq!(err.kind(), ErrorKind::ResourceCorrupt);
        assert!(!consolidate(&path, false));
        assert_eq!(fs::read(&path).unwrap(), big5);
    }

    #[test]
    fn missing_file_fails() {
        assert!(!consolidate(Path::new("/nonexistent/userdata.txt"), false));
    }

    #[cfg(unix)]
    #[test]
    fn locked_file_is_left_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("u.txt");
        fs::write(&path, "a  b\n").unwrap();

        let _held = WriteLock::try_acquire(&path).unwrap();
        let err = consolidate_file(&path, false).unwrap_err();
        assert!(matches!(err, ConsolidateError::Locked { .. }));
        assert_eq!(err.kind(), ErrorKind::ConcurrencyViolation);
        assert_eq!(fs::read_to_string(&path).unwrap(), "a  b\n");
    }

    fn arb_line() -> impl Strategy<Value = String> {
        let token = prop::sample::select(vec!["你好", "ni3hao3", "好", "hao3", "#c", "-1.5", "2", "x"]);
        let sep = prop::sample::select(vec![" ", "  ", "\t"]);
        prop::collection::vec((token, sep), 0..5).prop_map(|parts| {
            parts
                .into_iter()
                .map(|(t, s)| format!("{t}{s}"))
                .collect::<String>()
        })
    }

    proptest! {
        #[test]
        fn consolidation_is_idempotent(lines in prop::collection::vec(arb_line(), 0..12)) {
            let input = lines.join("\n");
            let once = consolidate_text(&input);
            prop_assert_eq!(consolidate_text(&once), once.clone());
            prop_assert!(has_pragma(&once));
        }
    }
}
