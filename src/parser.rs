use crate::config::{AUTHOR_TAG, EDITION_TAG, READ_BUFFER_BYTES};
use anyhow::{Context, Result};
use bzip2::read::MultiBzDecoder;
use memchr::memchr;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use tracing::info;

/// Line-at-a-time reader over a dump, plain or bzip2-compressed.
///
/// Lines are handed out as byte slices borrowed from an internal buffer so the
/// hot loop never allocates per line. `offset` counts bytes consumed from the
/// (decompressed) stream.
pub struct DumpReader {
    reader: Box<dyn BufRead>,
    buf: Vec<u8>,
    offset: u64,
    total: Option<u64>,
}

impl DumpReader {
    /// Opens a local path, or an http(s) URL when built with the `remote` feature.
    pub fn open(source: &str) -> Result<Self> {
        if source.starts_with("http://") || source.starts_with("https://") {
            return open_remote(source);
        }

        let file = File::open(source).with_context(|| format!("Failed to open dump: {source}"))?;
        if is_bz2(source) {
            // Compressed size says nothing about how many decompressed bytes remain.
            let decoder = MultiBzDecoder::new(file);
            Ok(Self::from_reader(
                BufReader::with_capacity(READ_BUFFER_BYTES, decoder),
                None,
            ))
        } else {
            let size = fs::metadata(source)
                .with_context(|| format!("Failed to get metadata for: {source}"))?
                .len();
            Ok(Self::from_reader(
                BufReader::with_capacity(READ_BUFFER_BYTES, file),
                Some(size),
            ))
        }
    }

    pub fn from_reader(reader: impl BufRead + 'static, total: Option<u64>) -> Self {
        Self {
            reader: Box::new(reader),
            buf: Vec::with_capacity(4096),
            offset: 0,
            total,
        }
    }

    /// Size of the input in bytes, when it can be known up front.
    pub fn total_bytes(&self) -> Option<u64> {
        self.total
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Next line without its trailing newline, or `None` at end of input.
    pub fn next_line(&mut self) -> io::Result<Option<&[u8]>> {
        self.buf.clear();
        let read = self.reader.read_until(b'\n', &mut self.buf)?;
        if read == 0 {
            return Ok(None);
        }
        self.offset += read as u64;

        let mut end = self.buf.len();
        while end > 0 && matches!(self.buf[end - 1], b'\n' | b'\r') {
            end -= 1;
        }
        Ok(Some(&self.buf[..end]))
    }
}

fn is_bz2(source: &str) -> bool {
    source.ends_with(".bz2")
}

#[cfg(feature = "remote")]
fn open_remote(url: &str) -> Result<DumpReader> {
    let response = reqwest::blocking::get(url)
        .with_context(|| format!("Failed to fetch dump: {url}"))?
        .error_for_status()
        .with_context(|| format!("Dump request rejected: {url}"))?;

    if is_bz2(url) {
        let decoder = MultiBzDecoder::new(response);
        Ok(DumpReader::from_reader(
            BufReader::with_capacity(READ_BUFFER_BYTES, decoder),
            None,
        ))
    } else {
        let total = response.content_length();
        Ok(DumpReader::from_reader(
            BufReader::with_capacity(READ_BUFFER_BYTES, response),
            total,
        ))
    }
}

#[cfg(not(feature = "remote"))]
fn open_remote(url: &str) -> Result<DumpReader> {
    anyhow::bail!("Cannot read {url}: rebuild with `--features remote` to stream dumps over http")
}

/// True when the line's leading tab field is a record type we ingest.
pub fn is_wanted_line(line: &[u8]) -> bool {
    let tag_end = memchr(b'\t', line).unwrap_or(line.len());
    let tag = &line[..tag_end];
    tag == AUTHOR_TAG.as_bytes() || tag == EDITION_TAG.as_bytes()
}

/// Copies only author and edition lines from `input` into `output`.
///
/// Returns `(kept, total)` line counts. Full dumps are dominated by record
/// types the pipeline ignores, so pre-filtering once makes repeated runs much
/// cheaper.
pub fn filter_dump(input: &str, output: &str) -> Result<(u64, u64)> {
    let mut reader = DumpReader::open(input)?;
    let file =
        File::create(output).with_context(|| format!("Failed to create output: {output}"))?;
    let mut writer = BufWriter::with_capacity(READ_BUFFER_BYTES, file);

    let mut kept = 0u64;
    let mut total = 0u64;
    while let Some(line) = reader.next_line().context("Failed to read dump")? {
        total += 1;
        if is_wanted_line(line) {
            writer.write_all(line)?;
            writer.write_all(b"\n")?;
            kept += 1;
        }
    }
    writer.flush()?;

    info!(kept, total, output, "Filtered dump");
    Ok((kept, total))
}
