//! Shelfseed: Open Library dump ingestion and demo catalog generator
//!
//! This crate loads a line-delimited Open Library dump into a relational store
//! and layers synthetic user activity on top of the resulting catalog:
//!
//! 1. **Tables** -- Create (optionally drop first) every table named in the table spec
//! 2. **Ingestion Pass** -- Stream the dump line by line, classify and validate each
//!    record, assign dense surrogate ids and queue rows into per-statement batches
//! 3. **Linking Pass** -- Join staged book → author references against the
//!    external-id map built during ingestion, after every author has been seen
//! 4. **Synthetic Data** -- Markov-generated users, follows, ratings, collections
//!    and reading sessions over the loaded books
//!
//! # Architecture
//!
//! - **Streaming input** -- The dump is never held in memory; lines are borrowed from
//!   a reusable buffer, with transparent BZ2 decompression
//! - **Per-line isolation** -- A bad line is logged and counted, never fatal
//! - **Batched writes** -- Rows are grouped by statement and flushed in one
//!   transaction per batch; a failed batch is rolled back and dropped on its own
//! - **Deferred resolution** -- Forward references are staged and resolved in a
//!   second pass; the staging data can be snapshotted between runs
//! - **Atomic operations** -- Lock-free counters readable from the interrupt handler
//!
//! # Key Modules
//!
//! - [`parser`] -- Line reader over plain/BZ2/remote dumps, dump pre-filter
//! - [`record`] -- Line classification and record validation
//! - [`pipeline`] -- Ingestion driver
//! - [`link`] -- Staged reference resolution
//! - [`staging`] -- External-id map, pending references, snapshot persistence
//! - [`batch`] -- Statement-keyed write batching and dead-letter output
//! - [`ids`] -- Per-class surrogate id sequences
//! - [`store`] -- Destination store trait and SQLite backend
//! - [`schema`] -- Table spec, physical name resolution and provisioning
//! - [`markov`] -- Character-level Markov word generator
//! - [`synth`] -- Synthetic users and activity
//! - [`context`] -- State shared by every loading step
//! - [`models`] -- Core data types (EntityClass, Author, Edition)
//! - [`stats`] -- Thread-safe atomic counters
//! - [`config`] -- Constants and defaults
//!
//! # Example Usage
//!
//! ```bash
//! # Everything at once
//! shelfseed run --db books.db -i ol_dump_latest.txt.bz2 \
//!     --names-dict names.txt --words-dict words.txt
//!
//! # Step by step, with a record limit
//! shelfseed tables --db books.db
//! shelfseed ingest --db books.db -i ol_dump_latest.txt.bz2 --limit 100000
//! shelfseed link --db books.db
//! ```

pub mod batch;
pub mod config;
pub mod context;
pub mod ids;
pub mod link;
pub mod markov;
pub mod models;
pub mod parser;
pub mod pipeline;
pub mod record;
pub mod schema;
pub mod staging;
pub mod stats;
pub mod store;
pub mod synth;
