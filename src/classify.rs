use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use log::{info, warn};

use crate::config::{RankPolicy, RunConfig};
use crate::demux::{demultiplex, SampleBatch};
use crate::errors::{ClassifyError, Result};
use crate::gz_stream::open_input;
use crate::readcounts::{stratified_key, Profile, UNASSIGNED};
use crate::reports::ReadMapWriter;
use crate::resolve::{Assignment, CachedResolver, Resolve};
use crate::seqreader::{Batch, Mapper};
use crate::strata::Stratifier;
use crate::utilities::{canonicalize, path_to_stem, SubjectSet};

/// One input alignment file and, unless demultiplexed, the sample it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct InputFile {
    pub path: PathBuf,
    pub sample: Option<String>,
}

impl InputFile {
    pub fn new<P: Into<PathBuf>>(path: P, sample: Option<&str>) -> Self {
        Self {
            path: path.into(),
            sample: sample.map(str::to_string),
        }
    }

    /// Sample of a non-multiplexed file; the file stem when none was given.
    pub fn sample_or_stem(&self) -> String {
        self.sample
            .clone()
            .unwrap_or_else(|| path_to_stem(&self.path))
    }
}

/// Read-only state shared by every worker of a run.
pub struct PipelineContext<'a> {
    pub config: &'a RunConfig,
    pub policies: Vec<RankPolicy>,
    pub resolver: &'a dyn Resolve,
    pub mapper: &'a dyn Mapper,
    pub samples: Option<HashSet<String>>,
    pub readmaps: Option<ReadMapWriter<'a>>,
    abort: AtomicBool,
}

impl<'a> PipelineContext<'a> {
    pub fn new(
        config: &'a RunConfig,
        resolver: &'a dyn Resolve,
        mapper: &'a dyn Mapper,
        readmaps: Option<ReadMapWriter<'a>>,
    ) -> Self {
        Self {
            config,
            policies: config.policies(),
            resolver,
            mapper,
            samples: config
                .samples
                .as_ref()
                .map(|s| s.iter().cloned().collect()),
            readmaps,
            abort: AtomicBool::new(false),
        }
    }

    /// Asks every worker to stop at its next chunk boundary.
    pub fn abort(&self) {
        self.abort.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.load(Ordering::SeqCst)
    }
}

/// Mutable state private to one worker: rank caches and the loaded stratum map.
pub struct WorkerState<'a> {
    pub resolver: CachedResolver<'a>,
    pub stratifier: Stratifier<'a>,
}

impl<'a> WorkerState<'a> {
    pub fn new(ctx: &PipelineContext<'a>) -> Self {
        Self {
            resolver: CachedResolver::new(ctx.resolver, ctx.config),
            stratifier: Stratifier::new(&ctx.config.stratmap),
        }
    }
}

/// Classifies one alignment file end to end into a fresh profile.
///
/// Chunks are handled strictly in stream order. If the run is aborted by another worker,
/// the partial profile is returned early; the caller discards it with the failed run.
pub fn process_file(
    ctx: &PipelineContext,
    state: &mut WorkerState,
    input: &InputFile,
) -> Result<Profile> {
    let config = ctx.config;
    let file = input.path.display().to_string();
    let name = display_name(&input.path);
    info!("Parsing alignment file {}", name);

    if let (false, Some(writer)) = (config.demux, ctx.readmaps.as_ref()) {
        let sample = input.sample_or_stem();
        for policy in &ctx.policies {
            writer.write_chunk(policy.label(), &sample, &[])?;
        }
    }

    let reader = open_input(&input.path)?;
    let batches = ctx
        .mapper
        .batches(reader, config.format, config.chunk)
        .map_err(|e| in_file(e, &file))?;

    let mut profile = Profile::new();
    let mut nqry = 0usize;
    for batch in batches {
        if ctx.is_aborted() {
            warn!("Stopping {} early, the run was aborted", name);
            return Ok(profile);
        }
        let Batch { queries, subjects } = batch.map_err(|e| in_file(e, &file))?;
        nqry += queries.len();

        let subjects: Vec<SubjectSet> = subjects
            .iter()
            .map(|s| canonicalize(s, config.trim_subject))
            .collect();

        let rmaps: BTreeMap<String, SampleBatch> = if config.demux {
            demultiplex(
                queries,
                subjects,
                ctx.samples.as_ref(),
                config.demux_delimiter,
            )
        } else {
            let batch = SampleBatch { queries, subjects };
            BTreeMap::from([(input.sample_or_stem(), batch)])
        };

        for (sample, rmap) in &rmaps {
            if !config.stratmap.is_empty() {
                state.stratifier.activate(sample)?;
            }
            for policy in &ctx.policies {
                assign_readmap(ctx, state, &mut profile, rmap, policy, sample, &file)?;
            }
        }
    }

    info!("  Number of sequences classified in {}: {}.", name, nqry);
    state.resolver.log_stats();
    Ok(profile)
}

fn in_file(err: ClassifyError, file: &str) -> ClassifyError {
    match err {
        ClassifyError::FormatDetection { reason, .. } => ClassifyError::FormatDetection {
            file: file.to_string(),
            reason,
        },
        other => other,
    }
}

/// Resolves one sample batch at one rank and adds the result to the profile.
fn assign_readmap(
    ctx: &PipelineContext,
    state: &mut WorkerState,
    profile: &mut Profile,
    rmap: &SampleBatch,
    policy: &RankPolicy,
    sample: &str,
    file: &str,
) -> Result<()> {
    let config = ctx.config;
    let rank = policy.label();
    let stratified = !config.stratmap.is_empty();
    let mut records: Vec<(&str, Assignment)> = Vec::with_capacity(rmap.len());
    let mut dropped = 0usize;

    for (query, subjects) in rmap.queries.iter().zip(&rmap.subjects) {
        let query = query.as_str();
        let assignment = match state.resolver.resolve(subjects, policy) {
            Ok(assignment) => assignment,
            Err(e) if e.is_lookup() && !config.strict => {
                dropped += 1;
                continue;
            }
            Err(e) => return Err(e.located(rank, sample, file)),
        };

        let stratum = if stratified {
            match state.stratifier.stratum(query) {
                Some(stratum) => Some(stratum),
                None => {
                    records.push((query, assignment));
                    continue;
                }
            }
        } else {
            None
        };

        let weights = match &assignment {
            Assignment::Unassigned if config.unassigned => vec![(UNASSIGNED, 1.0)],
            other => other.weighted_units(),
        };
        for (unit, weight) in weights {
            match stratum {
                Some(stratum) => {
                    profile.add_weight(rank, sample, &stratified_key(stratum, unit), weight)
                }
                None => profile.add_weight(rank, sample, unit, weight),
            }
        }
        records.push((query, assignment));
    }

    if dropped > 0 {
        warn!(
            "{} queries of sample {} in {} dropped at rank {}: subject not in hierarchy",
            dropped, sample, file, rank
        );
    }

    if let Some(writer) = ctx.readmaps.as_ref().filter(|w| w.wants(rank)) {
        writer.write_chunk(rank, sample, &records)?;
    }
    Ok(())
}

/// Whether a sample passes the allow-list; everything passes when there is none.
pub fn sample_allowed(samples: Option<&HashSet<String>>, sample: &str) -> bool {
    samples.map_or(true, |keep| keep.contains(sample))
}

pub fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
