use std::collections::HashMap;
use std::fs::{self, File};
use std::path::Path;

use memmap2::Mmap;

use super::{DictEntry, DictError, Dictionary};
use crate::consolidator::{parse_line, ParsedLine};

/// How a user-edited text file maps onto table entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextFormat {
    /// `phrase key [weight] [#comment]`, keyed by reading.
    Phrases,
    /// `original replacement`, keyed by the original value.
    Replacements,
    /// `key value value ...`, values kept in file order.
    Associates,
}

#[derive(Debug, Clone, Default)]
pub struct PhraseTable {
    entries: HashMap<String, Vec<DictEntry>>,
}

impl PhraseTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: impl IntoIterator<Item = (String, Vec<DictEntry>)>) -> Self {
        let mut map: HashMap<String, Vec<DictEntry>> = HashMap::new();
        for (key, list) in entries {
            map.entry(key).or_default().extend(list);
        }
        for list in map.values_mut() {
            sort_best_first(list);
        }
        Self { entries: map }
    }

    /// Parse a factory resource: `{"reading": [["value", weight], ...], ...}`.
    pub fn from_json_slice(bytes: &[u8], origin: &Path) -> Result<Self, DictError> {
        let raw: HashMap<String, Vec<(String, f64)>> =
            serde_json::from_slice(bytes).map_err(|e| DictError::Corrupt {
                path: origin.to_path_buf(),
                reason: e.to_string(),
            })?;
        Ok(Self::from_entries(raw.into_iter().map(|(key, list)| {
            let entries = list
                .into_iter()
                .map(|(value, weight)| DictEntry { value, weight })
                .collect();
            (key, entries)
        })))
    }

    /// Open a factory JSON resource, using mmap to avoid doubling peak memory.
    pub fn open_json(path: &Path) -> Result<Self, DictError> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(DictError::Missing(path.to_path_buf()))
            }
            Err(e) => return Err(e.into()),
        };
        if file.metadata()?.len() == 0 {
            return Err(DictError::Corrupt {
                path: path.to_path_buf(),
                reason: "empty file".to_string(),
            });
        }
        // SAFETY: The file is opened read-only and the mapping is immutable.
        // The Mmap is dropped after parsing completes below.
        let mmap = unsafe { Mmap::map(&file)? };
        Self::from_json_slice(&mmap, path)
    }

    /// Parse a user-edited text table. Malformed lines are skipped.
    pub fn parse_text(content: &str, format: TextFormat) -> Self {
        let mut table = Self::new();
        let content = content.strip_prefix('\u{FEFF}').unwrap_or(content);
        for line in content.lines() {
            match format {
                TextFormat::Phrases => {
                    if let ParsedLine::Record(rec) = parse_line(line) {
                        let weight = rec.weight.and_then(|w| w.parse().ok()).unwrap_or(0.0);
                        table.push(rec.key, DictEntry::new(rec.phrase, weight));
                    }
                }
                TextFormat::Replacements => {
                    if let ParsedLine::Record(rec) = parse_line(line) {
                        table.push(rec.phrase, DictEntry::new(rec.key, 0.0));
                    }
                }
                TextFormat::Associates => {
                    let mut fields = line
                        .split_whitespace()
                        .take_while(|f| !f.starts_with('#'));
                    let Some(key) = fields.next() else { continue };
                    for (rank, value) in fields.enumerate() {
                        table.push(key, DictEntry::new(value, -(rank as f64)));
                    }
                }
            }
        }
        table
    }

    pub fn open_text(path: &Path, format: TextFormat) -> Result<Self, DictError> {
        match fs::read_to_string(path) {
            Ok(content) => Ok(Self::parse_text(&content, format)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(DictError::Missing(path.to_path_buf()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::InvalidData => Err(DictError::Corrupt {
                path: path.to_path_buf(),
                reason: "not valid UTF-8".to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Append an entry, keeping the first occurrence of a duplicate value.
    fn push(&mut self, key: &str, entry: DictEntry) {
        let list = self.entries.entry(key.to_string()).or_default();
        if !list.iter().any(|e| e.value == entry.value) {
            list.push(entry);
        }
    }

    pub fn get(&self, key: &str) -> &[DictEntry] {
        self.entries.get(key).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Returns (key_count, entry_count).
    pub fn stats(&self) -> (usize, usize) {
        let keys = self.entries.len();
        let entries = self.entries.values().map(|v| v.len()).sum();
        (keys, entries)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Dictionary for PhraseTable {
    fn lookup(&self, key: &str) -> Vec<DictEntry> {
        self.get(key).to_vec()
    }

    fn has_pair(&self, key: &str, value: &str) -> bool {
        self.get(key).iter().any(|e| e.value == value)
    }

    fn count(&self, key: &str) -> usize {
        self.get(key).len()
    }
}

/// Higher weight first; stable for equal weights.
fn sort_best_first(list: &mut [DictEntry]) {
    list.sort_by(|a, b| {
        b.weight
            .partial_cmp(&a.weight)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}
