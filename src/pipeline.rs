//! Single streaming pass over a dump.
//!
//! Every line is classified independently. Accepted authors and editions get
//! surrogate ids and queued rows; rejected lines are logged and counted, never
//! fatal. Book → author references are staged for [`crate::link`] unless
//! staged resolution is switched off.

use crate::config::PROGRESS_TICK;
use crate::context::LoadContext;
use crate::link::{ReferenceLinker, Resolution};
use crate::models::{Author, EntityClass, Edition, RecordBody};
use crate::parser::DumpReader;
use crate::record::{classify, Reject};
use crate::staging::Staging;
use crate::stats::IngestStats;
use crate::store::{Store, Value};
use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Instant;
use tracing::{debug, error, info, trace, warn};

#[derive(Debug, Clone)]
pub struct IngestOptions {
    /// Stop once this many authors + editions were accepted.
    pub limit: Option<u64>,
    /// Defer author references to a linking pass. When off, each reference is
    /// resolved against authors seen so far and unknown ones are dropped.
    pub staged_resolution: bool,
    pub show_progress: bool,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            limit: None,
            staged_resolution: true,
            show_progress: false,
        }
    }
}

/// What happened to one line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Author(i64),
    Edition(i64),
    /// External id already mapped; the earlier record wins.
    Duplicate,
}

/// Per-run ingestion state on top of the shared [`LoadContext`].
pub struct Ingestor<'a, S: Store> {
    ctx: &'a mut LoadContext<S>,
    staging: Staging,
    staged_resolution: bool,
}

impl<'a, S: Store> Ingestor<'a, S> {
    pub fn new(ctx: &'a mut LoadContext<S>, staged_resolution: bool) -> Self {
        Self {
            ctx,
            staging: Staging::new(),
            staged_resolution,
        }
    }

    pub fn process_line(&mut self, line: &[u8]) -> Result<Outcome, Reject> {
        let record = classify(line)?;
        let outcome = match record.body {
            RecordBody::Author(author) => self.store_author(&record.key, author),
            RecordBody::Edition(edition) => self.store_edition(&record.key, edition),
        };
        if outcome == Outcome::Duplicate {
            self.ctx.stats().inc_duplicates();
            debug!(key = %record.key, "Duplicate record skipped");
        }
        Ok(outcome)
    }

    fn store_author(&mut self, key: &str, author: Author) -> Outcome {
        if self.staging.map.contains(EntityClass::Contributor, key) {
            return Outcome::Duplicate;
        }
        let id = self.ctx.ids.next(EntityClass::Contributor);
        self.ctx.batcher.enqueue(
            &self.ctx.statements.contributor,
            vec![id.into(), author.first_name.into(), author.last_name.into()],
        );
        self.staging.map.record(EntityClass::Contributor, key, id);
        self.ctx.stats().inc_authors();
        Outcome::Author(id)
    }

    fn store_edition(&mut self, key: &str, edition: Edition) -> Outcome {
        if self.staging.map.contains(EntityClass::Edition, key) {
            return Outcome::Duplicate;
        }
        let book_id = self.ctx.ids.next(EntityClass::Edition);
        self.ctx.batcher.enqueue(
            &self.ctx.statements.book,
            vec![
                book_id.into(),
                edition.title.into(),
                edition.pages.into(),
                edition.edition_name.into(),
                edition.release_ts.into(),
                edition.isbn.into(),
            ],
        );
        self.staging.map.record(EntityClass::Edition, key, book_id);

        for name in edition.genres {
            let genre_id = self.genre_id(name);
            self.ctx.batcher.enqueue(
                &self.ctx.statements.book_genre,
                vec![book_id.into(), genre_id.into()],
            );
        }
        for name in edition.publishers {
            let publisher_id = self.publisher_id(name);
            self.ctx.batcher.enqueue(
                &self.ctx.statements.book_publisher,
                vec![book_id.into(), publisher_id.into()],
            );
        }
        for author_key in &edition.author_keys {
            self.reference_author(book_id, author_key);
        }

        self.ctx.stats().inc_editions();
        Outcome::Edition(book_id)
    }

    fn genre_id(&mut self, name: String) -> i64 {
        if let Some(&id) = self.ctx.genres.get(&name) {
            return id;
        }
        let id = self.ctx.ids.next(EntityClass::Genre);
        self.ctx.batcher.enqueue(
            &self.ctx.statements.genre,
            vec![id.into(), Value::Text(name.clone())],
        );
        self.ctx.genres.insert(name, id);
        self.ctx.stats().inc_genres();
        id
    }

    /// Publishers are contributors with only a company name.
    fn publisher_id(&mut self, name: String) -> i64 {
        if let Some(&id) = self.ctx.publishers.get(&name) {
            return id;
        }
        let id = self.ctx.ids.next(EntityClass::Contributor);
        self.ctx.batcher.enqueue(
            &self.ctx.statements.contributor,
            vec![id.into(), Value::Null, Value::Text(name.clone())],
        );
        self.ctx.publishers.insert(name, id);
        self.ctx.stats().inc_publishers();
        id
    }

    fn reference_author(&mut self, book_id: i64, author_key: &str) {
        if self.staged_resolution {
            self.staging.defer(book_id, author_key);
            self.ctx.stats().add_refs_staged(1);
            return;
        }
        match self.staging.map.lookup(EntityClass::Contributor, author_key) {
            Some(contributor_id) => {
                self.ctx.batcher.enqueue(
                    &self.ctx.statements.book_author,
                    vec![book_id.into(), contributor_id.into()],
                );
                self.ctx.stats().add_refs_resolved(1);
            }
            None => {
                trace!(book_id, author_key, "Author not seen yet, reference dropped");
                self.ctx.stats().add_refs_dropped(1);
            }
        }
    }

    pub fn staging(&self) -> &Staging {
        &self.staging
    }

    pub fn finish(self) -> Staging {
        self.staging
    }
}

/// Streams `reader` to exhaustion (or the record limit) and returns the staging
/// data for the linking pass. Rows may still be queued in the batcher.
pub fn ingest<S: Store>(
    reader: &mut DumpReader,
    ctx: &mut LoadContext<S>,
    opts: &IngestOptions,
) -> Staging {
    let stats = ctx.stats().clone();
    let pb = make_progress(reader.total_bytes(), opts);
    let start = Instant::now();
    let mut last_tick = start;
    let mut last_offset = reader.offset();
    let mut ingestor = Ingestor::new(ctx, opts.staged_resolution);

    loop {
        let line = match reader.next_line() {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                error!(error = %e, offset = last_offset, "Input stream failed, stopping early");
                break;
            }
        };

        if let Err(reject) = ingestor.process_line(line) {
            note_reject(&stats, line, &reject);
        }

        let offset = reader.offset();
        stats.inc_lines(offset - last_offset);
        last_offset = offset;

        if last_tick.elapsed() >= PROGRESS_TICK {
            pb.set_position(match opts.limit {
                Some(_) => stats.accepted(),
                None => offset,
            });
            last_tick = Instant::now();
        }

        if let Some(limit) = opts.limit {
            if stats.accepted() >= limit {
                info!(limit, "Record limit reached");
                break;
            }
        }
    }

    pb.finish_and_clear();
    let staging = ingestor.finish();

    info!(
        lines = stats.lines(),
        authors = stats.authors(),
        editions = stats.editions(),
        genres = stats.genres(),
        publishers = stats.publishers(),
        malformed = stats.malformed(),
        rejected = stats.rejected(),
        bytes = stats.bytes(),
        pending = staging.pending.len(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Ingestion pass complete"
    );
    staging
}

/// Logs a rejected line at the level its kind deserves and counts it.
fn note_reject(stats: &IngestStats, line: &[u8], reject: &Reject) {
    if reject.is_malformed() {
        warn!(
            line = %String::from_utf8_lossy(line),
            reason = %reject,
            "Skipping malformed line"
        );
        stats.inc_malformed();
        return;
    }
    match reject {
        Reject::UnknownType(tag) => {
            trace!(tag = %tag, "Ignoring record type");
            stats.inc_ignored();
        }
        Reject::BadPublishDate(_) => {
            warn!(reason = %reject, "Failed to parse publish date");
            stats.inc_rejected();
        }
        _ => {
            debug!(reason = %reject, "Record rejected");
            stats.inc_rejected();
        }
    }
}

/// Summary of a full ingest → link → drain run.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub resolution: Option<Resolution>,
    pub failed_batches: usize,
}

/// Runs the whole load against an already-open reader: ingest, link staged
/// references, then flush every pending row.
pub fn load<S: Store>(
    reader: &mut DumpReader,
    ctx: &mut LoadContext<S>,
    opts: &IngestOptions,
    linker: &ReferenceLinker,
) -> Result<(Staging, LoadReport)> {
    let mut staging = ingest(reader, ctx, opts);

    let resolution = if opts.staged_resolution {
        let pending = std::mem::take(&mut staging.pending);
        Some(linker.link(&staging.map, pending, &ctx.statements, &mut ctx.batcher))
    } else {
        None
    };

    let failed_batches = ctx.drain();
    Ok((
        staging,
        LoadReport {
            resolution,
            failed_batches,
        },
    ))
}

fn make_progress(total_bytes: Option<u64>, opts: &IngestOptions) -> ProgressBar {
    if !opts.show_progress {
        return ProgressBar::hidden();
    }
    let (len, template) = match (opts.limit, total_bytes) {
        (Some(limit), _) => (
            Some(limit),
            "{spinner:.cyan} ingest [{bar:30.cyan/blue}] {pos}/{len} records ({eta})",
        ),
        (None, Some(total)) => (
            Some(total),
            "{spinner:.cyan} ingest [{bar:30.cyan/blue}] {bytes}/{total_bytes} ({eta})",
        ),
        (None, None) => (None, "{spinner:.cyan} ingest {bytes} read"),
    };
    let pb = match len {
        Some(len) => ProgressBar::new(len),
        None => ProgressBar::new_spinner(),
    };
    pb.set_style(
        ProgressStyle::default_bar()
            .template(template)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );
    pb
}
