use crate::batch::{DeadLetter, WriteBatcher};
use crate::ids::IdAllocator;
use crate::schema::{Schema, Statements};
use crate::stats::IngestStats;
use crate::store::Store;
use anyhow::{Context, Result};
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Mutable state shared by every loading step, owned by the loading thread.
pub struct LoadContext<S: Store> {
    pub statements: Statements,
    pub ids: IdAllocator,
    pub batcher: WriteBatcher<S>,
    /// Normalised genre name → genre id
    pub genres: FxHashMap<String, i64>,
    /// Normalised publisher name → contributor id
    pub publishers: FxHashMap<String, i64>,
}

impl<S: Store> LoadContext<S> {
    /// Seeds id sequences and the genre/publisher maps from what the store
    /// already holds, so appending runs reuse existing rows.
    pub fn new(
        mut store: S,
        schema: &Schema,
        batch_size: usize,
        stats: Arc<IngestStats>,
    ) -> Result<Self> {
        let ids = IdAllocator::from_store(&mut store, schema)?;
        let genres = known_names(
            &mut store,
            &format!("SELECT id, name FROM {}", schema.table("genres")?),
        )?;
        let publishers = known_names(
            &mut store,
            &format!(
                "SELECT id, name_last_company FROM {} WHERE name_first IS NULL",
                schema.table("contributors")?
            ),
        )?;
        debug!(
            genres = genres.len(),
            publishers = publishers.len(),
            "Seeded name maps"
        );
        Ok(Self {
            statements: Statements::new(schema)?,
            ids,
            batcher: WriteBatcher::new(store, batch_size, stats),
            genres,
            publishers,
        })
    }

    pub fn with_dead_letter(mut self, dead_letter: DeadLetter) -> Self {
        self.batcher = self.batcher.with_dead_letter(dead_letter);
        self
    }

    pub fn stats(&self) -> &Arc<IngestStats> {
        self.batcher.stats()
    }

    /// Flushes everything still queued; returns the number of failed batches.
    pub fn drain(&mut self) -> usize {
        let failed = self.batcher.drain();
        if failed > 0 {
            warn!(failed, "Some batches could not be written");
        }
        failed
    }

    pub fn into_store(self) -> S {
        self.batcher.into_store()
    }
}

fn known_names<S: Store>(store: &mut S, sql: &str) -> Result<FxHashMap<String, i64>> {
    let pairs = store
        .id_names(sql)
        .with_context(|| format!("Failed to read existing names: {sql}"))?;
    // Lowest id wins if the store already holds duplicates.
    let mut names = FxHashMap::default();
    for (id, name) in pairs {
        names
            .entry(name)
            .and_modify(|existing: &mut i64| *existing = (*existing).min(id))
            .or_insert(id);
    }
    Ok(names)
}
