use std::sync::atomic::{AtomicU64, Ordering};

/// Counters collected during ingestion, linking and batch flushing.
///
/// Atomic so the interrupt handler can read them from its own thread while the
/// ingestion thread keeps writing.
#[derive(Default, Debug)]
pub struct IngestStats {
    pub lines_read: AtomicU64,
    pub bytes_read: AtomicU64,
    pub authors_accepted: AtomicU64,
    pub editions_accepted: AtomicU64,
    pub genres_created: AtomicU64,
    pub publishers_created: AtomicU64,
    pub malformed: AtomicU64,
    pub rejected: AtomicU64,
    pub ignored: AtomicU64,
    pub duplicates: AtomicU64,
    pub refs_staged: AtomicU64,
    pub refs_resolved: AtomicU64,
    pub refs_dropped: AtomicU64,
    pub editors_linked: AtomicU64,
    pub batches_flushed: AtomicU64,
    pub batches_failed: AtomicU64,
    pub rows_lost: AtomicU64,
}

impl IngestStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_lines(&self, bytes: u64) {
        self.lines_read.fetch_add(1, Ordering::Relaxed);
        self.bytes_read.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn inc_authors(&self) {
        self.authors_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_editions(&self) {
        self.editions_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_genres(&self) {
        self.genres_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_publishers(&self) {
        self.publishers_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_malformed(&self) {
        self.malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_ignored(&self) {
        self.ignored.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_duplicates(&self) {
        self.duplicates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_refs_staged(&self, count: u64) {
        self.refs_staged.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_refs_resolved(&self, count: u64) {
        self.refs_resolved.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_refs_dropped(&self, count: u64) {
        self.refs_dropped.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_editors(&self, count: u64) {
        self.editors_linked.fetch_add(count, Ordering::Relaxed);
    }

    pub fn inc_batches_flushed(&self) {
        self.batches_flushed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_batches_failed(&self, rows: u64) {
        self.batches_failed.fetch_add(1, Ordering::Relaxed);
        self.rows_lost.fetch_add(rows, Ordering::Relaxed);
    }

    pub fn lines(&self) -> u64 {
        self.lines_read.load(Ordering::Relaxed)
    }

    pub fn bytes(&self) -> u64 {
        self.bytes_read.load(Ordering::Relaxed)
    }

    pub fn authors(&self) -> u64 {
        self.authors_accepted.load(Ordering::Relaxed)
    }

    pub fn editions(&self) -> u64 {
        self.editions_accepted.load(Ordering::Relaxed)
    }

    /// Authors plus editions; what the record limit counts.
    pub fn accepted(&self) -> u64 {
        self.authors() + self.editions()
    }

    pub fn genres(&self) -> u64 {
        self.genres_created.load(Ordering::Relaxed)
    }

    pub fn publishers(&self) -> u64 {
        self.publishers_created.load(Ordering::Relaxed)
    }

    pub fn malformed(&self) -> u64 {
        self.malformed.load(Ordering::Relaxed)
    }

    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    pub fn ignored(&self) -> u64 {
        self.ignored.load(Ordering::Relaxed)
    }

    pub fn duplicates(&self) -> u64 {
        self.duplicates.load(Ordering::Relaxed)
    }

    pub fn refs_staged(&self) -> u64 {
        self.refs_staged.load(Ordering::Relaxed)
    }

    pub fn refs_resolved(&self) -> u64 {
        self.refs_resolved.load(Ordering::Relaxed)
    }

    pub fn refs_dropped(&self) -> u64 {
        self.refs_dropped.load(Ordering::Relaxed)
    }

    pub fn editors(&self) -> u64 {
        self.editors_linked.load(Ordering::Relaxed)
    }

    pub fn batches_flushed(&self) -> u64 {
        self.batches_flushed.load(Ordering::Relaxed)
    }

    pub fn batches_failed(&self) -> u64 {
        self.batches_failed.load(Ordering::Relaxed)
    }

    pub fn rows_lost(&self) -> u64 {
        self.rows_lost.load(Ordering::Relaxed)
    }
}
