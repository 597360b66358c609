use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::config::OutputCompression;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Opens a file for buffered reading, decompressing gzip content transparently.
///
/// Compression is detected from the leading magic bytes, not the file name. Concatenated
/// gzip members are read as one stream.
pub fn open_input<P: AsRef<Path>>(path: P) -> io::Result<Box<dyn BufRead + Send>> {
    let mut reader = BufReader::new(File::open(path)?);
    let is_gzip = reader.fill_buf()?.starts_with(&GZIP_MAGIC);
    if is_gzip {
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(reader))))
    } else {
        Ok(Box::new(reader))
    }
}

/// Reads a whole (possibly gzipped) text file into memory.
pub fn read_to_string<P: AsRef<Path>>(path: P) -> io::Result<String> {
    let mut content = String::new();
    open_input(path)?.read_to_string(&mut content)?;
    Ok(content)
}

/// Output file, plain or gzip-compressed.
pub enum OutputWriter {
    Plain(BufWriter<File>),
    Gzip(GzEncoder<BufWriter<File>>),
}

impl OutputWriter {
    /// Flushes everything and, for gzip, writes the member trailer.
    pub fn finish(self) -> io::Result<()> {
        match self {
            OutputWriter::Plain(mut w) => w.flush(),
            OutputWriter::Gzip(w) => w.finish()?.flush(),
        }
    }
}

impl Write for OutputWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            OutputWriter::Plain(w) => w.write(buf),
            OutputWriter::Gzip(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            OutputWriter::Plain(w) => w.flush(),
            OutputWriter::Gzip(w) => w.flush(),
        }
    }
}

/// Opens an output file, truncating or appending, with the requested compression.
///
/// Each finished gzip writer is one complete member, so appended chunks form a valid
/// multi-member gzip file.
pub fn open_output<P: AsRef<Path>>(
    path: P,
    compression: OutputCompression,
    append: bool,
) -> io::Result<OutputWriter> {
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .append(append)
        .truncate(!append)
        .open(path)?;
    let writer = BufWriter::new(file);
    Ok(match compression {
        OutputCompression::None => OutputWriter::Plain(writer),
        OutputCompression::Gzip => OutputWriter::Gzip(GzEncoder::new(writer, Compression::default())),
    })
}
