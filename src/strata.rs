use std::collections::{BTreeMap, HashMap};
use std::io::BufRead;
use std::path::{Path, PathBuf};

use log::debug;

use crate::errors::{ClassifyError, Result};
use crate::gz_stream::open_input;

/// Reads a `sequence <tab> stratum` map; only the first stratum of a sequence is kept.
pub fn read_strata(path: &Path, sample: &str) -> Result<HashMap<String, String>> {
    let fail = |reason: String| ClassifyError::StratumSource {
        sample: sample.to_string(),
        path: path.display().to_string(),
        reason,
    };

    let reader = open_input(path).map_err(|e| fail(e.to_string()))?;
    let mut strata = HashMap::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| fail(e.to_string()))?;
        let line = line.trim_end();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (id, stratum) = line
            .split_once('\t')
            .ok_or_else(|| fail(format!("line {} has no tab-separated stratum", i + 1)))?;
        let stratum = stratum.split('\t').next().unwrap_or(stratum);
        strata
            .entry(id.to_string())
            .or_insert_with(|| stratum.to_string());
    }
    Ok(strata)
}

/// Holds the stratum map of the sample currently being processed by one worker.
///
/// At most one map is loaded at a time; switching samples drops the old map before the new
/// one is read.
pub struct Stratifier<'a> {
    sources: &'a BTreeMap<String, PathBuf>,
    current: Option<(String, HashMap<String, String>)>,
    loads: usize,
}

impl<'a> Stratifier<'a> {
    pub fn new(sources: &'a BTreeMap<String, PathBuf>) -> Self {
        Self {
            sources,
            current: None,
            loads: 0,
        }
    }

    /// Makes `sample` the active sample, reloading only if it differs from the current one.
    pub fn activate(&mut self, sample: &str) -> Result<()> {
        if self.sample() == Some(sample) {
            return Ok(());
        }
        self.current = None;

        let path = self
            .sources
            .get(sample)
            .ok_or_else(|| ClassifyError::StratumSource {
                sample: sample.to_string(),
                path: String::new(),
                reason: "no stratification file given for this sample".to_string(),
            })?;
        let strata = read_strata(path, sample)?;
        self.loads += 1;
        debug!(
            "loaded {} strata of sample {} from {} (load #{})",
            strata.len(),
            sample,
            path.display(),
            self.loads
        );
        self.current = Some((sample.to_string(), strata));
        Ok(())
    }

    pub fn sample(&self) -> Option<&str> {
        self.current.as_ref().map(|(s, _)| s.as_str())
    }

    pub fn stratum(&self, id: &str) -> Option<&str> {
        self.current
            .as_ref()
            .and_then(|(_, strata)| strata.get(id))
            .map(String::as_str)
    }

    /// Number of times a stratum map was read from disk.
    #[cfg(test)]
    pub(crate) fn loads(&self) -> usize {
        self.loads
    }
}
