//! Parallel classification of read alignments against a hierarchy, producing per-rank,
//! per-sample profiles of accumulated weights.

pub mod classify;
pub mod config;
pub mod demux;
pub mod errors;
pub mod gz_stream;
pub mod kv_store;
pub mod readcounts;
pub mod reports;
pub mod resolve;
pub mod seqreader;
pub mod strata;
pub mod taxonomy;
pub mod threadpool;
pub mod utilities;

pub use config::{RankPolicy, RunConfig};
pub use errors::{ClassifyError, Result};
pub use readcounts::{NestedProfile, Profile, UNASSIGNED};
pub use resolve::{Assignment, Resolve};
pub use seqreader::{AlignFormat, Mapper};
pub use taxonomy::Hierarchy;
pub use threadpool::{Classifier, Inputs};
pub use utilities::SubjectSet;
