use std::fmt;
use std::ops::Deref;
use std::path::Path;
use std::sync::Arc;

/// Canonical, order-independent set of subjects hit by one query.
///
/// Identifiers are sorted and deduplicated, so two hit lists holding the same elements in
/// different orders compare and hash identically. Cloning is cheap.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct SubjectSet(Arc<[String]>);

impl SubjectSet {
    pub fn new<I, S>(subjects: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut subjects: Vec<String> = subjects.into_iter().map(Into::into).collect();
        subjects.sort_unstable();
        subjects.dedup();
        SubjectSet(subjects.into())
    }

    /// True when the query hit nothing.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Deref for SubjectSet {
    type Target = [String];

    fn deref(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for SubjectSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join(","))
    }
}

/// Strips the text after the last `delim` of an identifier, e.g. `G001_12` → `G001`.
pub fn strip_suffix(id: &str, delim: char) -> &str {
    match id.rfind(delim) {
        Some(pos) => &id[..pos],
        None => id,
    }
}

/// Turns one query's raw hit list into its canonical [`SubjectSet`].
///
/// # Arguments
///
/// * `raw` - Subject identifiers as parsed, possibly repeated and unordered.
/// * `trim` - Optional delimiter at whose last occurrence each identifier is cut.
pub fn canonicalize<S: AsRef<str>>(raw: &[S], trim: Option<char>) -> SubjectSet {
    match trim {
        Some(delim) => SubjectSet::new(raw.iter().map(|s| strip_suffix(s.as_ref(), delim))),
        None => SubjectSet::new(raw.iter().map(|s| AsRef::<str>::as_ref(s))),
    }
}

const COMPRESSION_SUFFIXES: [&str; 4] = ["gz", "bz2", "xz", "zst"];

/// File stem used as a sample identifier: the file name without a compression suffix and
/// one further extension, e.g. `S01.sam.gz` → `S01`.
pub fn path_to_stem(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut stem = name.as_str();
    if let Some((head, ext)) = stem.rsplit_once('.') {
        if COMPRESSION_SUFFIXES.contains(&ext) {
            stem = head;
        }
    }
    if let Some((head, _)) = stem.rsplit_once('.') {
        if !head.is_empty() {
            stem = head;
        }
    }
    stem.to_string()
}
