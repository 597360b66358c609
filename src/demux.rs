use std::collections::{BTreeMap, HashSet};

use log::warn;

use crate::utilities::SubjectSet;

/// Queries and canonical subject sets of one sample, in input order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleBatch {
    pub queries: Vec<String>,
    pub subjects: Vec<SubjectSet>,
}

impl SampleBatch {
    pub fn push(&mut self, query: String, subjects: SubjectSet) {
        self.queries.push(query);
        self.subjects.push(subjects);
    }

    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }
}

/// Splits a batch into per-sample batches by the sample token prefixed to each query.
///
/// `S01_read42` belongs to sample `S01` and is kept as `read42`. Queries without the
/// delimiter, or whose sample is not allow-listed, are dropped. Every kept query lands in
/// exactly one sample batch.
pub fn demultiplex(
    queries: Vec<String>,
    subjects: Vec<SubjectSet>,
    samples: Option<&HashSet<String>>,
    delimiter: char,
) -> BTreeMap<String, SampleBatch> {
    let mut out: BTreeMap<String, SampleBatch> = BTreeMap::new();
    let mut untagged = 0usize;

    for (query, subs) in queries.into_iter().zip(subjects) {
        let Some((sample, read)) = query.split_once(delimiter) else {
            untagged += 1;
            continue;
        };
        if samples.is_some_and(|keep| !keep.contains(sample)) {
            continue;
        }
        out.entry(sample.to_string())
            .or_default()
            .push(read.to_string(), subs);
    }

    if untagged > 0 {
        warn!(
            "{} queries lack a sample token before '{}' and were dropped",
            untagged, delimiter
        );
    }
    out
}
