use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;

use log::warn;
use regex::Regex;

/// Reserved photo id marking a known-unrecoverable file. Dedup treats it
/// exactly like a genuinely uploaded photo so the file is never retried.
pub const FAILED_SENTINEL_ID: &str = "-2";

/// Machine-tag formats that have carried the modification time over the
/// backup tool's history. Tried in order; first match wins. The raw form is
/// what uploads write today; the second is the service's normalized rendering
/// of the same tag (punctuation stripped), seen on items uploaded before the
/// raw form was preserved verbatim.
static TIMESTAMP_TAG_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    ["vision:lwt=([0-9]+)", r"\bvisionlwt([0-9]+)\b"]
        .iter()
        .map(|pattern| Regex::new(pattern).expect("timestamp tag pattern"))
        .collect()
});

pub fn parse_timestamp_tag(tags: &str) -> Option<i64> {
    TIMESTAMP_TAG_PATTERNS.iter().find_map(|regex| {
        regex
            .captures(tags)
            .and_then(|captures| captures.get(1))
            .and_then(|digits| digits.as_str().parse().ok())
    })
}

/// Tag string attached to every upload so a future run can dedup the file.
pub fn upload_tags(timestamp: i64) -> String {
    format!("flickrbackr vision:lwt={timestamp}")
}

/// Logical name of a local file: the file stem. Subdirectories are flattened,
/// so the same name may occur several times per collection.
pub fn photo_name(path: &Path) -> String {
    path.file_stem()
        .or_else(|| path.file_name())
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[derive(Debug, Clone)]
pub struct RemoteEntry {
    pub id: String,
    pub timestamp: Option<i64>,
}

/// Per-collection view of what already exists remotely, keyed by logical
/// name. Entries are only ever added within a run.
#[derive(Debug, Default)]
pub struct RemoteIndex {
    entries: HashMap<String, Vec<RemoteEntry>>,
}

impl RemoteIndex {
    /// Index one photo fetched from the remote listing, extracting the
    /// backup timestamp from its tags. A photo without a recognizable tag is
    /// indexed with no usable timestamp; a warning is the only effect.
    pub fn index_photo(&mut self, title: &str, id: &str, tags: &str) {
        let timestamp = parse_timestamp_tag(tags);
        if timestamp.is_none() {
            warn!("no backup timestamp found in tags {tags:?} for {title}");
        }
        self.entries.entry(title.to_string()).or_default().push(RemoteEntry {
            id: id.to_string(),
            timestamp,
        });
    }

    /// Record a freshly uploaded photo.
    pub fn record(&mut self, name: &str, id: &str, timestamp: i64) {
        self.entries.entry(name.to_string()).or_default().push(RemoteEntry {
            id: id.to_string(),
            timestamp: Some(timestamp),
        });
    }

    /// Insert a sentinel entry for a permanently failed file so `exists`
    /// reports it as present.
    pub fn merge_failure(&mut self, name: &str, timestamp: i64) {
        self.entries.entry(name.to_string()).or_default().push(RemoteEntry {
            id: FAILED_SENTINEL_ID.to_string(),
            timestamp: Some(timestamp),
        });
    }

    /// True iff some entry for `name` carries exactly this timestamp.
    pub fn exists(&self, name: &str, timestamp: i64) -> bool {
        self.entries
            .get(name)
            .is_some_and(|entries| entries.iter().any(|entry| entry.timestamp == Some(timestamp)))
    }

    /// Every known timestamp for `name`, used for dry-run miss logging.
    pub fn timestamps_for(&self, name: &str) -> Vec<i64> {
        self.entries
            .get(name)
            .map(|entries| entries.iter().filter_map(|entry| entry.timestamp).collect())
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
