use std::collections::{BTreeMap, BTreeSet};
use std::ffi::OsString;
use std::fmt::Write as _;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use log::{debug, warn};

use crate::config::OutputCompression;
use crate::errors::Result;
use crate::gz_stream::open_output;
use crate::resolve::Assignment;
use crate::taxonomy::Hierarchy;

/// Writes per-(rank, sample) read-assignment maps: `query <tab> unit[,unit...]`.
///
/// Shared by all workers. Appends are serialized through one lock. During a run each map is
/// written to `<path>.partial`, truncated the first time it is touched; [`commit`](Self::commit)
/// moves the partial files into place and [`discard`](Self::discard) removes them.
pub struct ReadMapWriter<'a> {
    dirs: &'a BTreeMap<String, PathBuf>,
    compression: OutputCompression,
    tree: &'a Hierarchy,
    touched: Mutex<BTreeSet<PathBuf>>,
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".partial");
    PathBuf::from(name)
}

impl<'a> ReadMapWriter<'a> {
    pub fn new(
        dirs: &'a BTreeMap<String, PathBuf>,
        compression: OutputCompression,
        tree: &'a Hierarchy,
    ) -> Result<Self> {
        for dir in dirs.values() {
            fs::create_dir_all(dir)?;
        }
        Ok(Self {
            dirs,
            compression,
            tree,
            touched: Mutex::new(BTreeSet::new()),
        })
    }

    pub fn wants(&self, rank: &str) -> bool {
        self.dirs.contains_key(rank)
    }

    /// Final location of the map of one (rank, sample).
    pub fn path(&self, rank: &str, sample: &str) -> Option<PathBuf> {
        self.dirs
            .get(rank)
            .map(|dir| dir.join(format!("{}.{}", sample, self.compression.extension())))
    }

    /// Appends the assigned queries of one chunk; unassigned queries are left out.
    ///
    /// The first call for a (rank, sample) creates its map even when nothing is assigned.
    pub fn write_chunk(
        &self,
        rank: &str,
        sample: &str,
        records: &[(&str, Assignment)],
    ) -> Result<()> {
        let Some(path) = self.path(rank, sample) else {
            return Ok(());
        };

        let mut body = String::new();
        for (query, assignment) in records {
            let units = match assignment {
                Assignment::Unassigned => continue,
                Assignment::Unit(unit) => vec![unit.as_str()],
                Assignment::Split(units) => units.iter().map(String::as_str).collect(),
            };
            let labels: Vec<&str> = units
                .into_iter()
                .map(|u| self.tree.name(u).unwrap_or(u))
                .collect();
            let _ = writeln!(body, "{}\t{}", query, labels.join(","));
        }

        let mut touched = self
            .touched
            .lock()
            .map_err(|_| io::Error::other("read map writer lock poisoned"))?;
        let first = touched.insert(path.clone());
        if body.is_empty() && !first {
            return Ok(());
        }
        let mut out = open_output(partial_path(&path), self.compression, !first)?;
        out.write_all(body.as_bytes())?;
        out.finish()?;
        Ok(())
    }

    /// Moves every map written in this run to its final location.
    pub fn commit(self) -> Result<()> {
        let touched = self
            .touched
            .into_inner()
            .map_err(|_| io::Error::other("read map writer lock poisoned"))?;
        for path in touched {
            fs::rename(partial_path(&path), &path)?;
            debug!("wrote read map {}", path.display());
        }
        Ok(())
    }

    /// Removes the partial maps of a failed run, leaving earlier maps untouched.
    pub fn discard(self) {
        let touched = match self.touched.into_inner() {
            Ok(touched) => touched,
            Err(poisoned) => poisoned.into_inner(),
        };
        for path in touched {
            let partial = partial_path(&path);
            if let Err(e) = fs::remove_file(&partial) {
                warn!("could not remove {}: {}", partial.display(), e);
            }
        }
    }
}
