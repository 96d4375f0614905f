use crate::stats::IngestStats;
use crate::store::{Row, Store, Value};
use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use rustc_hash::FxHashMap;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, warn};

static TARGET_TABLE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bINTO\s+([A-Za-z0-9_]+)").unwrap());

/// Queues parameter rows per statement shape and writes them in batches.
///
/// A batch is flushed once its shape reaches `threshold` rows, or on `drain`.
/// Each flush is one `execute_many` plus a commit. A failing flush is rolled
/// back, logged and the batch discarded; the loader keeps going.
pub struct WriteBatcher<S: Store> {
    store: S,
    threshold: usize,
    batches: Vec<(String, Vec<Row>)>,
    index: FxHashMap<String, usize>,
    dead_letter: Option<DeadLetter>,
    stats: Arc<IngestStats>,
}

impl<S: Store> WriteBatcher<S> {
    pub fn new(store: S, threshold: usize, stats: Arc<IngestStats>) -> Self {
        Self {
            store,
            threshold: threshold.max(1),
            batches: Vec::new(),
            index: FxHashMap::default(),
            dead_letter: None,
            stats,
        }
    }

    /// Keep a CSV copy of every batch that fails to flush.
    pub fn with_dead_letter(mut self, dead_letter: DeadLetter) -> Self {
        self.dead_letter = Some(dead_letter);
        self
    }

    pub fn enqueue(&mut self, shape: &str, row: Row) {
        let i = match self.index.get(shape) {
            Some(&i) => i,
            None => {
                self.batches.push((shape.to_string(), Vec::new()));
                let i = self.batches.len() - 1;
                self.index.insert(shape.to_string(), i);
                i
            }
        };

        self.batches[i].1.push(row);
        if self.batches[i].1.len() >= self.threshold {
            self.flush_at(i);
        }
    }

    /// Flushes every outstanding batch regardless of size. Returns how many
    /// batches failed.
    pub fn drain(&mut self) -> usize {
        let mut failed = 0;
        for i in 0..self.batches.len() {
            if !self.batches[i].1.is_empty() && !self.flush_at(i) {
                failed += 1;
            }
        }
        failed
    }

    /// Rows queued but not yet written.
    pub fn pending_rows(&self) -> usize {
        self.batches.iter().map(|(_, rows)| rows.len()).sum()
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn stats(&self) -> &Arc<IngestStats> {
        &self.stats
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Drains, then hands back the store.
    pub fn into_store(mut self) -> S {
        self.drain();
        self.store
    }

    fn flush_at(&mut self, i: usize) -> bool {
        let rows = std::mem::take(&mut self.batches[i].1);
        let shape = &self.batches[i].0;

        let result = self
            .store
            .execute_many(shape, &rows)
            .and_then(|_| self.store.commit());

        match result {
            Ok(()) => {
                self.stats.inc_batches_flushed();
                debug!(rows = rows.len(), shape = %shape, "Flushed batch");
                true
            }
            Err(e) => {
                if let Err(rb) = self.store.rollback() {
                    warn!(error = %rb, "Rollback after failed flush also failed");
                }
                self.stats.inc_batches_failed(rows.len() as u64);
                error!(shape = %shape, rows = rows.len(), error = %e, "Batch flush failed, dropping batch");

                if let Some(ref dead_letter) = self.dead_letter {
                    if let Err(e) = dead_letter.write(shape, &rows) {
                        warn!(error = %e, "Failed to write dead-letter batch");
                    }
                }
                false
            }
        }
    }
}

/// CSV sink for batches the store refused.
pub struct DeadLetter {
    dir: PathBuf,
}

impl DeadLetter {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create dead-letter directory: {:?}", dir))?;
        Ok(Self { dir })
    }

    pub fn path_for(&self, shape: &str) -> PathBuf {
        let table = TARGET_TABLE_REGEX
            .captures(shape)
            .map(|c| c[1].to_string())
            .unwrap_or_else(|| "batch".to_string());
        self.dir.join(format!("{table}.failed.csv"))
    }

    /// Appends `rows` to the shape's file, one record per row with the shape first.
    pub fn write(&self, shape: &str, rows: &[Row]) -> Result<()> {
        let path = self.path_for(shape);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open dead-letter file: {:?}", path))?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_writer(file);

        for row in rows {
            let mut record = Vec::with_capacity(row.len() + 1);
            record.push(shape.to_string());
            record.extend(row.iter().map(|v| match v {
                Value::Null => String::new(),
                Value::Integer(i) => i.to_string(),
                Value::Text(s) => s.clone(),
            }));
            writer.write_record(&record)?;
        }
        writer.flush()?;
        Ok(())
    }
}
