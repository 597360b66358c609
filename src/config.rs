use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

use crate::errors::{ClassifyError, Result};
use crate::seqreader::AlignFormat;

/// Pool size never exceeds this, whatever the machine offers.
pub const MAX_WORKERS: usize = 12;

pub const DEFAULT_CHUNK: usize = 1000;
pub const DEFAULT_CACHE: usize = 1024;

/// How queries are resolved at one entry of the rank list.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RankPolicy {
    /// Report subjects directly
    None,
    /// Lowest common ancestor regardless of rank
    Free,
    /// First ancestor at the named rank
    Fixed(String),
}

impl RankPolicy {
    pub fn parse(label: &str) -> Self {
        match label {
            "none" => RankPolicy::None,
            "free" => RankPolicy::Free,
            rank => RankPolicy::Fixed(rank.to_string()),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            RankPolicy::None => "none",
            RankPolicy::Free => "free",
            RankPolicy::Fixed(rank) => rank,
        }
    }
}

impl fmt::Display for RankPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Compression of per-rank read-assignment maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputCompression {
    #[default]
    None,
    Gzip,
}

impl OutputCompression {
    pub fn parse(choice: Option<&str>) -> Result<Self> {
        match choice {
            None | Some("none") => Ok(OutputCompression::None),
            Some("gz") | Some("gzip") => Ok(OutputCompression::Gzip),
            Some(other) => Err(ClassifyError::invalid(
                "outzip",
                format!("unsupported compression '{other}' (expected none or gz)"),
            )),
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            OutputCompression::None => "txt",
            OutputCompression::Gzip => "txt.gz",
        }
    }
}

/// Policy parameters of one run, shared read-only by every worker.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Assignment must be unique
    pub uniq: bool,
    /// Majority-rule threshold in percent (51-99)
    pub major: Option<u8>,
    /// Allow assignment above the requested rank
    pub above: bool,
    /// Free-rank: allow assigning to the subject itself
    pub subok: bool,
    /// Count unassigned queries under [`UNASSIGNED`](crate::readcounts::UNASSIGNED)
    pub unassigned: bool,
    /// Lookup failures abort the run instead of dropping the query
    pub strict: bool,
    pub ranks: Vec<String>,
    /// Alignment lines per chunk
    pub chunk: usize,
    /// Per-rank LRU capacity; 0 disables caching
    pub cache: usize,
    pub demux: bool,
    pub demux_delimiter: char,
    /// Trim subject identifiers at the last occurrence of this delimiter
    pub trim_subject: Option<char>,
    pub samples: Option<Vec<String>>,
    pub format: Option<AlignFormat>,
    pub rank_dirs: BTreeMap<String, PathBuf>,
    pub outzip: Option<String>,
    pub stratmap: BTreeMap<String, PathBuf>,
    pub sizes: HashMap<String, f64>,
    pub threads: Option<usize>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            uniq: false,
            major: None,
            above: false,
            subok: false,
            unassigned: false,
            strict: true,
            ranks: vec!["free".to_string()],
            chunk: DEFAULT_CHUNK,
            cache: DEFAULT_CACHE,
            demux: false,
            demux_delimiter: '_',
            trim_subject: None,
            samples: None,
            format: None,
            rank_dirs: BTreeMap::new(),
            outzip: None,
            stratmap: BTreeMap::new(),
            sizes: HashMap::new(),
            threads: None,
        }
    }
}

impl RunConfig {
    /// Loads a configuration from a JSON document; absent fields take their defaults.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("error opening config {}", path.display()))?;
        let config: RunConfig = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("error parsing config {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("invalid config {}", path.display()))?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.ranks.is_empty() {
            return Err(ClassifyError::invalid("ranks", "at least one rank is required"));
        }
        if let Some(major) = self.major {
            if !(51..=99).contains(&major) {
                return Err(ClassifyError::invalid(
                    "major",
                    format!("{major} is outside [51, 99]"),
                ));
            }
        }
        if self.chunk == 0 {
            return Err(ClassifyError::invalid("chunk", "must be greater than 0"));
        }
        if self.threads == Some(0) {
            return Err(ClassifyError::invalid("threads", "must be greater than 0"));
        }
        OutputCompression::parse(self.outzip.as_deref())?;
        Ok(())
    }

    pub fn policies(&self) -> Vec<RankPolicy> {
        self.ranks.iter().map(|r| RankPolicy::parse(r)).collect()
    }

    pub fn major_fraction(&self) -> Option<f64> {
        self.major.map(|m| f64::from(m) / 100.0)
    }

    pub fn compression(&self) -> Result<OutputCompression> {
        OutputCompression::parse(self.outzip.as_deref())
    }

    /// `min(available parallelism, 12)`, lowered further by an explicit thread count.
    pub fn worker_count(&self) -> usize {
        let cap = num_cpus::get().clamp(1, MAX_WORKERS);
        match self.threads {
            Some(n) => n.clamp(1, cap),
            None => cap,
        }
    }
}
