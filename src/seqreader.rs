use std::fmt;
use std::io::{BufRead, Cursor, Read};

use log::warn;
use serde::Deserialize;

use crate::errors::{ClassifyError, Result};

/// Supported alignment formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlignFormat {
    /// BLAST tabular (outfmt 6)
    B6o,
    Sam,
    /// Plain `query <tab> subject`
    Map,
}

impl fmt::Display for AlignFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AlignFormat::B6o => "b6o",
            AlignFormat::Sam => "sam",
            AlignFormat::Map => "map",
        })
    }
}

/// Guesses the alignment format from the first line of a file.
pub fn infer_format(line: &str) -> Option<AlignFormat> {
    if line.starts_with('@') {
        return Some(AlignFormat::Sam);
    }
    let row: Vec<&str> = line.trim_end_matches(['\r', '\n']).split('\t').collect();
    let is_int = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());

    if row.len() == 2 {
        return Some(AlignFormat::Map);
    }
    if row.len() >= 12 && row[3..10].iter().all(|s| is_int(s)) {
        return Some(AlignFormat::B6o);
    }
    if row.len() >= 11 && [1, 3, 4].iter().all(|&i| is_int(row[i])) {
        return Some(AlignFormat::Sam);
    }
    None
}

/// Ordered query identifiers with the raw subject list of each, from one chunk.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    pub queries: Vec<String>,
    pub subjects: Vec<Vec<String>>,
}

impl Batch {
    pub fn push(&mut self, query: String, subjects: Vec<String>) {
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

pub type BatchIter<'a> = Box<dyn Iterator<Item = Result<Batch>> + Send + 'a>;

/// Turns an open alignment stream into a lazy sequence of batches.
pub trait Mapper: Send + Sync {
    /// # Arguments
    ///
    /// * `reader` - Decompressed alignment stream.
    /// * `format` - Format hint; inferred from the content when `None`.
    /// * `chunk` - Approximate number of alignment lines per batch.
    fn batches<'a>(
        &self,
        reader: Box<dyn BufRead + Send + 'a>,
        format: Option<AlignFormat>,
        chunk: usize,
    ) -> Result<BatchIter<'a>>;
}

/// Maps each query to the subjects it was aligned to, for b6o, SAM and map input.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainMapper;

impl Mapper for PlainMapper {
    fn batches<'a>(
        &self,
        mut reader: Box<dyn BufRead + Send + 'a>,
        format: Option<AlignFormat>,
        chunk: usize,
    ) -> Result<BatchIter<'a>> {
        let format = match format {
            Some(format) => format,
            None => {
                let mut first = String::new();
                if reader.read_line(&mut first)? == 0 {
                    return Ok(Box::new(std::iter::empty()));
                }
                let format = infer_format(&first).ok_or_else(|| ClassifyError::FormatDetection {
                    file: String::new(),
                    reason: "first line matches no known alignment format".to_string(),
                })?;
                reader = Box::new(Cursor::new(first).chain(reader));
                format
            }
        };
        Ok(Box::new(AlignReader::new(reader, format, chunk)))
    }
}

enum Record {
    Hit(String, String),
    Skip,
    Malformed(&'static str),
}

fn parse_record(format: AlignFormat, line: &str) -> Record {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.is_empty() {
        return Record::Skip;
    }
    match format {
        AlignFormat::Sam => parse_sam(line),
        AlignFormat::B6o | AlignFormat::Map => {
            if line.starts_with('#') {
                return Record::Skip;
            }
            let mut fields = line.split('\t');
            match (fields.next(), fields.next()) {
                (Some(query), Some(subject)) if !query.is_empty() && !subject.is_empty() => {
                    Record::Hit(query.to_string(), subject.to_string())
                }
                _ => Record::Malformed("expected query and subject columns"),
            }
        }
    }
}

fn parse_sam(line: &str) -> Record {
    if line.starts_with('@') {
        return Record::Skip;
    }
    let mut fields = line.split('\t');
    let (qname, flag, rname) = match (fields.next(), fields.next(), fields.next()) {
        (Some(q), Some(f), Some(r)) => (q, f, r),
        _ => return Record::Malformed("fewer than 3 SAM columns"),
    };
    let flag: u16 = match flag.parse() {
        Ok(flag) => flag,
        Err(_) => return Record::Malformed("non-numeric SAM FLAG"),
    };
    if rname == "*" || flag & 0x4 != 0 {
        return Record::Skip;
    }
    let qname = if flag & 0x1 != 0 {
        format!("{}/{}", qname, (flag >> 6) & 3)
    } else {
        qname.to_string()
    };
    Record::Hit(qname, rname.to_string())
}

/// Groups consecutive records of the same query and yields them chunk by chunk.
///
/// A chunk closes at the first query boundary after `chunk` lines, so one query's hits
/// never straddle two batches.
pub struct AlignReader<R: BufRead> {
    reader: R,
    format: AlignFormat,
    chunk: usize,
    line: String,
    pending: Option<(String, Vec<String>)>,
    line_no: u64,
    done: bool,
}

impl<R: BufRead> AlignReader<R> {
    pub fn new(reader: R, format: AlignFormat, chunk: usize) -> Self {
        Self {
            reader,
            format,
            chunk: chunk.max(1),
            line: String::with_capacity(256),
            pending: None,
            line_no: 0,
            done: false,
        }
    }
}

impl<R: BufRead> Iterator for AlignReader<R> {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut batch = Batch::default();
        let mut lines = 0;

        loop {
            self.line.clear();
            match self.reader.read_line(&mut self.line) {
                Ok(0) => {
                    self.done = true;
                    if let Some((query, subjects)) = self.pending.take() {
                        batch.push(query, subjects);
                    }
                    break;
                }
                Ok(_) => self.line_no += 1,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e.into()));
                }
            }

            let (query, subject) = match parse_record(self.format, &self.line) {
                Record::Hit(query, subject) => (query, subject),
                Record::Skip => continue,
                Record::Malformed(reason) => {
                    warn!("skipping line {} ({}): {}", self.line_no, self.format, reason);
                    continue;
                }
            };
            lines += 1;

            match &mut self.pending {
                Some((current, subjects)) if *current == query => subjects.push(subject),
                pending => {
                    if let Some((done_query, subjects)) = pending.replace((query, vec![subject])) {
                        batch.push(done_query, subjects);
                    }
                    if lines > self.chunk {
                        break;
                    }
                }
            }
        }

        if batch.is_empty() {
            None
        } else {
            Some(Ok(batch))
        }
    }
}
