use crate::models::EntityClass;
use crate::schema::Schema;
use crate::store::Store;
use anyhow::{Context, Result};
use rustc_hash::FxHashMap;
use tracing::debug;

/// Dense, monotonically increasing surrogate ids, one sequence per entity class.
///
/// Single writer per class: the allocator is owned by the ingestion thread and
/// handed around by `&mut`.
#[derive(Debug, Default)]
pub struct IdAllocator {
    next: FxHashMap<EntityClass, i64>,
    base: FxHashMap<EntityClass, i64>,
}

impl IdAllocator {
    /// Every sequence starts at 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts `class` at `base`. Must be called before the first `next` for it.
    pub fn with_base(mut self, class: EntityClass, base: i64) -> Self {
        self.next.insert(class, base);
        self.base.insert(class, base);
        self
    }

    /// Seeds each sequence from the destination store: `max(id) + 1`, or 0 for
    /// an empty table.
    pub fn from_store<S: Store>(store: &mut S, schema: &Schema) -> Result<Self> {
        let mut ids = Self::new();
        for class in EntityClass::ALL {
            let table = schema.table(class.table_ref())?;
            let max = store
                .max_id(table)
                .with_context(|| format!("Failed to read max id from {table}"))?;
            let base = max.map_or(0, |m| m + 1);
            debug!(%class, table, base, "Seeded id sequence");
            ids = ids.with_base(class, base);
        }
        Ok(ids)
    }

    pub fn next(&mut self, class: EntityClass) -> i64 {
        let slot = self.next.entry(class).or_insert(0);
        let id = *slot;
        *slot += 1;
        id
    }

    /// One past the highest id issued or pre-existing for `class`.
    pub fn upper(&self, class: EntityClass) -> i64 {
        self.next.get(&class).copied().unwrap_or(0)
    }

    /// Number of ids minted for `class` during this run.
    pub fn issued(&self, class: EntityClass) -> i64 {
        self.upper(class) - self.base.get(&class).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequences_start_at_zero() {
        let mut ids = IdAllocator::new();
        assert_eq!(ids.next(EntityClass::Genre), 0);
        assert_eq!(ids.next(EntityClass::Genre), 1);
        assert_eq!(ids.next(EntityClass::Genre), 2);
    }

    #[test]
    fn interleaved_classes_stay_consecutive() {
        let mut ids = IdAllocator::new()
            .with_base(EntityClass::Contributor, 100)
            .with_base(EntityClass::Edition, 7);

        let mut contributors = Vec::new();
        let mut editions = Vec::new();
        for i in 0..10 {
            contributors.push(ids.next(EntityClass::Contributor));
            if i % 3 == 0 {
                editions.push(ids.next(EntityClass::Edition));
            }
            ids.next(EntityClass::Genre);
        }

        assert_eq!(contributors, (100..110).collect::<Vec<_>>());
        assert_eq!(editions, vec![7, 8, 9, 10]);
        assert_eq!(ids.upper(EntityClass::Genre), 10);
    }

    #[test]
    fn issued_counts_only_this_run() {
        let mut ids = IdAllocator::new().with_base(EntityClass::User, 50);
        assert_eq!(ids.issued(EntityClass::User), 0);
        ids.next(EntityClass::User);
        ids.next(EntityClass::User);
        assert_eq!(ids.issued(EntityClass::User), 2);
        assert_eq!(ids.upper(EntityClass::User), 52);
        assert_eq!(ids.upper(EntityClass::Collection), 0);
    }
}
