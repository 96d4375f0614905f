//! Second pass: turns staged book → author-key references into relationship rows.
//!
//! Runs after ingestion has seen every author, so a key that is still unknown
//! was never defined in the dump. Such references are dropped and counted.
//!
//! Editor links are a placeholder: every `editor_stride`-th resolved author link
//! is also written to the editors table. The dump carries no editorial roles.

use crate::batch::WriteBatcher;
use crate::models::EntityClass;
use crate::schema::Statements;
use crate::staging::{StagingMap, UnresolvedReference};
use crate::store::Store;
use tracing::info;

/// Rows produced by joining staged references against the staging map.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Resolution {
    /// (book_id, contributor_id)
    pub authors: Vec<(i64, i64)>,
    /// (book_id, contributor_id)
    pub editors: Vec<(i64, i64)>,
    pub dropped: u64,
}

pub struct ReferenceLinker {
    editor_stride: usize,
}

impl ReferenceLinker {
    /// `editor_stride` of 0 disables editor links.
    pub fn new(editor_stride: usize) -> Self {
        Self { editor_stride }
    }

    pub fn resolve(&self, map: &StagingMap, pending: &[UnresolvedReference]) -> Resolution {
        let mut out = Resolution::default();
        for reference in pending {
            match map.lookup(EntityClass::Contributor, &reference.author_key) {
                Some(contributor_id) => {
                    out.authors.push((reference.book_id, contributor_id));
                    if self.editor_stride > 0 && out.authors.len() % self.editor_stride == 0 {
                        out.editors.push((reference.book_id, contributor_id));
                    }
                }
                None => out.dropped += 1,
            }
        }
        out
    }

    /// Resolves and queues the rows; consumes the pending references.
    pub fn link<S: Store>(
        &self,
        map: &StagingMap,
        pending: Vec<UnresolvedReference>,
        statements: &Statements,
        batcher: &mut WriteBatcher<S>,
    ) -> Resolution {
        let resolution = self.resolve(map, &pending);

        for &(book_id, contributor_id) in &resolution.authors {
            batcher.enqueue(
                &statements.book_author,
                vec![book_id.into(), contributor_id.into()],
            );
        }
        for &(book_id, contributor_id) in &resolution.editors {
            batcher.enqueue(
                &statements.book_editor,
                vec![book_id.into(), contributor_id.into()],
            );
        }

        let stats = batcher.stats();
        stats.add_refs_resolved(resolution.authors.len() as u64);
        stats.add_refs_dropped(resolution.dropped);
        stats.add_editors(resolution.editors.len() as u64);

        info!(
            resolved = resolution.authors.len(),
            editors = resolution.editors.len(),
            dropped = resolution.dropped,
            "Author references linked"
        );
        resolution
    }
}
