use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for classification operations
pub type Result<T> = std::result::Result<T, ClassifyError>;

/// Error type for the classification workflow.
///
/// None of these are recovered locally; they surface to the caller with enough context to
/// find the offending file, rank, sample or identifier.
#[derive(Error, Debug)]
pub enum ClassifyError {
    /// A subject or candidate unit is absent from the hierarchy
    #[error("identifier '{id}' not found in hierarchy (rank: {rank}, sample: {sample}, file: {file})")]
    Lookup {
        id: String,
        rank: String,
        sample: String,
        file: String,
    },

    /// A sample's stratification source is missing or unreadable
    #[error("cannot load strata of sample '{sample}' from '{path}': {reason}")]
    StratumSource {
        sample: String,
        path: String,
        reason: String,
    },

    /// Input content matches no known alignment format
    #[error("cannot determine alignment format of '{file}': {reason}")]
    FormatDetection { file: String, reason: String },

    /// Failure raised while a worker processed one file
    #[error("worker failed on '{}': {source}", file.display())]
    Worker {
        file: PathBuf,
        #[source]
        source: Box<ClassifyError>,
    },

    /// Invalid run parameter
    #[error("invalid parameter '{parameter}': {reason}")]
    InvalidConfig { parameter: String, reason: String },

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ClassifyError {
    /// Builds a lookup failure that is later enriched with rank/sample/file context.
    pub fn missing(id: &str) -> Self {
        ClassifyError::Lookup {
            id: id.to_string(),
            rank: String::new(),
            sample: String::new(),
            file: String::new(),
        }
    }

    /// Fills in the location of a lookup failure; other variants pass through untouched.
    pub fn located(self, rank: &str, sample: &str, file: &str) -> Self {
        match self {
            ClassifyError::Lookup { id, .. } => ClassifyError::Lookup {
                id,
                rank: rank.to_string(),
                sample: sample.to_string(),
                file: file.to_string(),
            },
            other => other,
        }
    }

    pub fn invalid(parameter: &str, reason: impl Into<String>) -> Self {
        ClassifyError::InvalidConfig {
            parameter: parameter.to_string(),
            reason: reason.into(),
        }
    }

    pub fn is_lookup(&self) -> bool {
        match self {
            ClassifyError::Lookup { .. } => true,
            ClassifyError::Worker { source, .. } => source.is_lookup(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_located() {
        let err = ClassifyError::missing("G000001").located("genus", "S01", "S01.b6o");
        let msg = format!("{err}");
        assert!(msg.contains("'G000001'"));
        assert!(msg.contains("rank: genus"));
        assert!(msg.contains("sample: S01"));
        assert!(msg.contains("file: S01.b6o"));
    }

    #[test]
    fn test_worker_wraps_lookup() {
        let err = ClassifyError::Worker {
            file: PathBuf::from("a.sam"),
            source: Box::new(ClassifyError::missing("x")),
        };
        assert!(err.is_lookup());
        assert!(format!("{err}").starts_with("worker failed on 'a.sam'"));
    }

    #[test]
    fn test_located_keeps_other_variants() {
        let err = ClassifyError::invalid("chunk", "must be > 0").located("genus", "S", "f");
        assert!(matches!(err, ClassifyError::InvalidConfig { .. }));
    }
}
