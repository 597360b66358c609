use std::collections::{BTreeMap, HashSet};
use std::io;
use std::path::PathBuf;
use std::time::Instant;

use log::{debug, info};
use rayon::prelude::*;

use crate::classify::{process_file, sample_allowed, InputFile, PipelineContext, WorkerState};
use crate::config::{RunConfig, MAX_WORKERS};
use crate::errors::{ClassifyError, Result};
use crate::readcounts::{NestedProfile, Profile};
use crate::reports::ReadMapWriter;
use crate::resolve::{HierarchyResolver, Resolve};
use crate::seqreader::{Mapper, PlainMapper};
use crate::taxonomy::Hierarchy;

/// Alignment files of a run.
#[derive(Debug, Clone)]
pub enum Inputs {
    /// File → sample it belongs to
    Mapped(BTreeMap<PathBuf, String>),
    /// Files whose sample is their stem (or demultiplexed from query ids)
    Flat(Vec<PathBuf>),
}

impl Inputs {
    /// Files to process, sorted by path.
    ///
    /// Without demultiplexing, files of samples off the allow-list are left out here and
    /// never opened. With it, every file is read and samples are filtered per query.
    pub fn into_files(self, config: &RunConfig) -> Vec<InputFile> {
        let mut files: Vec<InputFile> = match self {
            Inputs::Mapped(map) => map
                .into_iter()
                .map(|(path, sample)| InputFile {
                    path,
                    sample: Some(sample),
                })
                .collect(),
            Inputs::Flat(paths) => paths
                .into_iter()
                .map(|path| InputFile { path, sample: None })
                .collect(),
        };
        files.sort();
        files.dedup();

        if config.demux {
            for file in &mut files {
                file.sample = None;
            }
            return files;
        }

        let keep: Option<HashSet<String>> = config
            .samples
            .as_ref()
            .map(|s| s.iter().cloned().collect());
        files
            .into_iter()
            .filter(|f| sample_allowed(keep.as_ref(), &f.sample_or_stem()))
            .collect()
    }
}

impl From<Vec<PathBuf>> for Inputs {
    fn from(paths: Vec<PathBuf>) -> Self {
        Inputs::Flat(paths)
    }
}

impl From<BTreeMap<PathBuf, String>> for Inputs {
    fn from(map: BTreeMap<PathBuf, String>) -> Self {
        Inputs::Mapped(map)
    }
}

/// Runs the classification workflow over a set of files with a bounded worker pool.
///
/// Files are distributed dynamically; each worker owns its rank caches and stratum map and
/// produces one profile per file. Profiles are merged in file order once all workers are
/// done, so the result does not depend on the number of workers or on scheduling.
pub struct Classifier<'a> {
    tree: &'a Hierarchy,
    config: &'a RunConfig,
    resolver: Box<dyn Resolve + 'a>,
    mapper: Box<dyn Mapper + 'a>,
    workers: usize,
}

impl<'a> Classifier<'a> {
    pub fn new(tree: &'a Hierarchy, config: &'a RunConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            tree,
            config,
            resolver: Box::new(HierarchyResolver::new(tree)),
            mapper: Box::new(PlainMapper),
            workers: config.worker_count(),
        })
    }

    pub fn with_resolver<R: Resolve + 'a>(mut self, resolver: R) -> Self {
        self.resolver = Box::new(resolver);
        self
    }

    pub fn with_mapper<M: Mapper + 'a>(mut self, mapper: M) -> Self {
        self.mapper = Box::new(mapper);
        self
    }

    /// Overrides the pool size, still capped at [`MAX_WORKERS`].
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.clamp(1, MAX_WORKERS);
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Classifies every input file and returns the merged flat profile.
    ///
    /// The first failure in any worker aborts the run: remaining workers stop at their next
    /// chunk, no partial profile is returned and no read map of this run is kept.
    pub fn run_profile(&self, inputs: Inputs) -> Result<Profile> {
        let files = inputs.into_files(self.config);
        if files.is_empty() {
            info!("No alignment files to classify.");
            return Ok(Profile::new());
        }

        let readmaps = if self.config.rank_dirs.is_empty() {
            None
        } else {
            Some(ReadMapWriter::new(
                &self.config.rank_dirs,
                self.config.compression()?,
                self.tree,
            )?)
        };
        let mut ctx = PipelineContext::new(
            self.config,
            self.resolver.as_ref(),
            self.mapper.as_ref(),
            readmaps,
        );

        let workers = self.workers.min(files.len());
        info!(
            "Classifying {} file(s) with {} worker(s)...",
            files.len(),
            workers
        );
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .build()
            .map_err(io::Error::other)?;

        let result = pool.install(|| {
            files
                .par_iter()
                .map_init(
                    || WorkerState::new(&ctx),
                    |state, input| {
                        process_file(&ctx, state, input).map_err(|e| {
                            ctx.abort();
                            ClassifyError::Worker {
                                file: input.path.clone(),
                                source: Box::new(e),
                            }
                        })
                    },
                )
                .collect::<Result<Vec<Profile>>>()
        });

        if let Some(writer) = ctx.readmaps.take() {
            match &result {
                Ok(_) => writer.commit()?,
                Err(_) => writer.discard(),
            }
        }
        let profiles = result?;

        let mut total = Profile::new();
        for (input, profile) in files.iter().zip(&profiles) {
            debug!("merging profile of {}", input.path.display());
            total += profile;
        }
        Ok(total)
    }

    /// Classifies every input file into a rank → sample → unit → weight profile.
    pub fn run(&self, inputs: Inputs) -> Result<NestedProfile> {
        let start = Instant::now();
        let profile = self.run_profile(inputs)?;
        info!(
            "Classification completed in {:.2}s.",
            start.elapsed().as_secs_f64()
        );
        Ok(profile.into_nested(&self.config.ranks))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RankPolicy;
    use crate::resolve::Assignment;
    use crate::taxonomy::tests::sample_hierarchy;
    use crate::utilities::SubjectSet;
    use std::path::Path;

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_into_files_sorted_and_filtered() {
        let config = RunConfig {
            samples: Some(vec!["S1".to_string(), "S3".to_string()]),
            ..Default::default()
        };
        let inputs = Inputs::Flat(vec![
            PathBuf::from("/data/S3.b6o"),
            PathBuf::from("/data/S2.b6o"),
            PathBuf::from("/data/S1.b6o.gz"),
        ]);
        let files = inputs.into_files(&config);
        let stems: Vec<String> = files.iter().map(InputFile::sample_or_stem).collect();
        assert_eq!(stems, vec!["S1", "S3"]);

        let mapped: BTreeMap<PathBuf, String> = [
            (PathBuf::from("/data/b.map"), "S1".to_string()),
            (PathBuf::from("/data/a.map"), "S2".to_string()),
        ]
        .into_iter()
        .collect();
        let files = Inputs::Mapped(mapped).into_files(&config);
        assert_eq!(files, vec![InputFile::new("/data/b.map", Some("S1"))]);
    }

    #[test]
    fn test_into_files_keeps_all_when_demultiplexing() {
        let config = RunConfig {
            demux: true,
            samples: Some(vec!["S1".to_string()]),
            ..Default::default()
        };
        let files = Inputs::Flat(vec![PathBuf::from("pool_b.map"), PathBuf::from("pool_a.map")])
            .into_files(&config);
        assert_eq!(files.len(), 2);
        assert!(files.iter().all(|f| f.sample.is_none()));
        assert_eq!(files[0].path, PathBuf::from("pool_a.map"));
    }

    #[test]
    fn test_workers_clamped() {
        let tree = sample_hierarchy();
        let config = RunConfig::default();
        let classifier = Classifier::new(&tree, &config).unwrap();
        assert_eq!(classifier.with_workers(0).workers(), 1);
        let classifier = Classifier::new(&tree, &config).unwrap();
        assert_eq!(classifier.with_workers(64).workers(), MAX_WORKERS);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let tree = sample_hierarchy();
        let config = RunConfig {
            ranks: Vec::new(),
            ..Default::default()
        };
        assert!(matches!(
            Classifier::new(&tree, &config),
            Err(ClassifyError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_run_merges_files() {
        let dir = tempfile::tempdir().unwrap();
        let a = write(dir.path(), "S1.map", "r1\tSpecies_A\nr2\tSpecies_C\n");
        let b = write(dir.path(), "S2.map", "r1\tSpecies_D\n");
        let c = write(dir.path(), "S1_more.map", "r9\tSpecies_B\n");
        let tree = sample_hierarchy();
        let config = RunConfig {
            ranks: vec!["genus".to_string(), "phylum".to_string()],
            ..Default::default()
        };
        let mapped: BTreeMap<PathBuf, String> = [
            (a, "S1".to_string()),
            (b, "S2".to_string()),
            (c, "S1".to_string()),
        ]
        .into_iter()
        .collect();

        let nested = Classifier::new(&tree, &config)
            .unwrap()
            .with_workers(3)
            .run(Inputs::Mapped(mapped))
            .unwrap();
        assert_eq!(nested["genus"]["S1"]["Genus_1"], 2.0);
        assert_eq!(nested["genus"]["S1"]["Genus_2"], 1.0);
        assert_eq!(nested["genus"]["S2"]["Genus_3"], 1.0);
        assert_eq!(nested["phylum"]["S1"]["Phylum_1"], 3.0);
    }

    #[test]
    fn test_empty_inputs() {
        let tree = sample_hierarchy();
        let config = RunConfig::default();
        let nested = Classifier::new(&tree, &config)
            .unwrap()
            .run(Inputs::Flat(Vec::new()))
            .unwrap();
        assert!(nested["free"].is_empty());
    }

    /// Resolves everything to one fixed unit.
    struct ConstResolver(&'static str);

    impl Resolve for ConstResolver {
        fn resolve(
            &self,
            _subjects: &SubjectSet,
            _policy: &RankPolicy,
            _config: &RunConfig,
        ) -> Result<Assignment> {
            Ok(Assignment::Unit(self.0.to_string()))
        }
    }

    #[test]
    fn test_custom_resolver() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "S1.map", "r1\tanything\nr2\telse\n");
        let tree = sample_hierarchy();
        let config = RunConfig::default();
        let profile = Classifier::new(&tree, &config)
            .unwrap()
            .with_resolver(ConstResolver("K00001"))
            .run_profile(Inputs::Flat(vec![path]))
            .unwrap();
        assert_eq!(profile.get("free", "S1", "K00001"), 2.0);
    }

    #[test]
    fn test_failure_in_one_file_aborts_run() {
        let dir = tempfile::tempdir().unwrap();
        let mut paths = Vec::new();
        for i in 0..6 {
            paths.push(write(
                dir.path(),
                &format!("S{i}.map"),
                "r1\tSpecies_A\nr2\tSpecies_B\n",
            ));
        }
        paths.push(write(dir.path(), "S9.map", "r1\tMissing_1\n"));
        let tree = sample_hierarchy();
        let config = RunConfig::default();

        let err = Classifier::new(&tree, &config)
            .unwrap()
            .with_workers(4)
            .run(Inputs::Flat(paths))
            .unwrap_err();
        assert!(err.is_lookup());
        match err {
            ClassifyError::Worker { file, source } => {
                assert!(file.ends_with("S9.map"));
                assert!(format!("{source}").contains("Missing_1"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
