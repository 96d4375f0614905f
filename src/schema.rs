use crate::store::Store;
use anyhow::{anyhow, bail, Context, Result};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fs;
use tracing::info;

const BUILTIN_TABLES: &str = include_str!("../schema/tables.json");

/// One table in the table spec file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSpec {
    /// Physical table name
    pub name: String,
    /// Logical reference used by the loader, e.g. `books.authors`
    pub refer: String,
    /// Column definitions, passed through to DDL verbatim
    pub columns: Vec<String>,
    #[serde(default)]
    pub primary: Vec<String>,
}

impl TableSpec {
    pub fn create_sql(&self) -> String {
        let mut defs = self.columns.join(", ");
        if !self.primary.is_empty() {
            defs.push_str(&format!(", PRIMARY KEY ({})", self.primary.join(", ")));
        }
        format!("CREATE TABLE IF NOT EXISTS {} ({defs})", self.name)
    }
}

/// Resolves logical table references to physical names.
#[derive(Debug, Clone)]
pub struct Schema {
    tables: Vec<TableSpec>,
    by_ref: FxHashMap<String, usize>,
}

impl Schema {
    pub fn from_specs(tables: Vec<TableSpec>) -> Result<Self> {
        let mut by_ref = FxHashMap::default();
        for (i, table) in tables.iter().enumerate() {
            if by_ref.insert(table.refer.clone(), i).is_some() {
                bail!("Duplicate table reference in table spec: {}", table.refer);
            }
        }
        Ok(Self { tables, by_ref })
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let tables: Vec<TableSpec> =
            serde_json::from_str(json).context("Failed to parse table spec")?;
        Self::from_specs(tables)
    }

    pub fn load(path: &str) -> Result<Self> {
        let json = fs::read_to_string(path)
            .with_context(|| format!("Failed to read table spec: {path}"))?;
        Self::from_json(&json).with_context(|| format!("Invalid table spec: {path}"))
    }

    /// The table layout shipped with the crate.
    pub fn builtin() -> Result<Self> {
        Self::from_json(BUILTIN_TABLES)
    }

    pub fn table(&self, refer: &str) -> Result<&str> {
        self.by_ref
            .get(refer)
            .map(|&i| self.tables[i].name.as_str())
            .ok_or_else(|| anyhow!("No table registered for reference `{refer}`"))
    }

    pub fn tables(&self) -> &[TableSpec] {
        &self.tables
    }
}

/// Parameterized insert statements, one per table the loader writes.
///
/// The text doubles as the batch key in `WriteBatcher`, so each shape must be
/// built once and reused rather than re-formatted per row.
#[derive(Debug, Clone)]
pub struct Statements {
    pub contributor: String,
    pub book: String,
    pub genre: String,
    pub audience: String,
    pub user: String,
    pub collection: String,
    pub book_author: String,
    pub book_editor: String,
    pub book_publisher: String,
    pub book_genre: String,
    pub book_audience: String,
    pub book_collection: String,
    pub following: String,
    pub rating: String,
    pub user_collection: String,
    pub session: String,
}

impl Statements {
    pub fn new(schema: &Schema) -> Result<Self> {
        let insert = |refer: &str, columns: &[&str]| -> Result<String> {
            let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
            Ok(format!(
                "INSERT OR IGNORE INTO {} ({}) VALUES ({})",
                schema.table(refer)?,
                columns.join(", "),
                placeholders.join(", ")
            ))
        };

        Ok(Self {
            contributor: insert("contributors", &["id", "name_first", "name_last_company"])?,
            book: insert(
                "books",
                &["id", "title", "length", "edition", "release_dt", "isbn"],
            )?,
            genre: insert("genres", &["id", "name"])?,
            audience: insert("audiences", &["id", "name"])?,
            user: insert(
                "users",
                &["id", "creation_dt", "access_dt", "name_first", "name_last", "email", "password"],
            )?,
            collection: insert("collections", &["id", "name"])?,
            book_author: insert("books.authors", &["book_id", "contributor_id"])?,
            book_editor: insert("books.editors", &["book_id", "contributor_id"])?,
            book_publisher: insert("books.publishers", &["book_id", "contributor_id"])?,
            book_genre: insert("books.genres", &["book_id", "genre_id"])?,
            book_audience: insert("books.audiences", &["book_id", "audience_id"])?,
            book_collection: insert("books.collections", &["book_id", "collection_id"])?,
            following: insert("users.following", &["user_id", "following_id"])?,
            rating: insert("users.ratings", &["book_id", "user_id", "rating"])?,
            user_collection: insert("users.collections", &["user_id", "collection_id"])?,
            session: insert("users.sessions", &["user_id", "book_id", "start_dt", "end_dt"])?,
        })
    }
}

/// Creates every table in the schema, dropping existing ones first when `clear`.
/// Without `clear`, existing tables and their rows are left alone.
pub fn provision<S: Store>(store: &mut S, schema: &Schema, clear: bool) -> Result<()> {
    for table in schema.tables() {
        if clear {
            store
                .execute(&format!("DROP TABLE IF EXISTS {}", table.name), &[])
                .with_context(|| format!("Failed to drop table {}", table.name))?;
        }
        let sql = table.create_sql();
        store
            .execute(&sql, &[])
            .with_context(|| format!("Failed to create table {}", table.name))?;
    }
    store.commit().context("Failed to commit table creation")?;
    info!(tables = schema.tables().len(), clear, "Tables provisioned");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EntityClass;
    use crate::store::SqliteStore;

    #[test]
    fn builtin_covers_every_entity_class() {
        let schema = Schema::builtin().unwrap();
        for class in EntityClass::ALL {
            assert!(schema.table(class.table_ref()).is_ok(), "{class}");
        }
        assert_eq!(schema.table("books.authors").unwrap(), "book_authors");
    }

    #[test]
    fn unknown_reference_is_an_error() {
        let schema = Schema::builtin().unwrap();
        let err = schema.table("books.reviews").unwrap_err();
        assert!(err.to_string().contains("books.reviews"));
    }

    #[test]
    fn duplicate_reference_rejected() {
        let json = r#"[
            {"name": "a", "refer": "x", "columns": ["id INTEGER"]},
            {"name": "b", "refer": "x", "columns": ["id INTEGER"]}
        ]"#;
        assert!(Schema::from_json(json).is_err());
    }

    #[test]
    fn create_sql_includes_primary_key() {
        let spec = TableSpec {
            name: "book_genres".to_string(),
            refer: "books.genres".to_string(),
            columns: vec!["book_id INTEGER".to_string(), "genre_id INTEGER".to_string()],
            primary: vec!["book_id".to_string(), "genre_id".to_string()],
        };
        assert_eq!(
            spec.create_sql(),
            "CREATE TABLE IF NOT EXISTS book_genres (book_id INTEGER, genre_id INTEGER, PRIMARY KEY (book_id, genre_id))"
        );
    }

    #[test]
    fn statements_use_physical_names() {
        let stmts = Statements::new(&Schema::builtin().unwrap()).unwrap();
        assert_eq!(
            stmts.book_author,
            "INSERT OR IGNORE INTO book_authors (book_id, contributor_id) VALUES (?1, ?2)"
        );
        assert!(stmts.book.contains("VALUES (?1, ?2, ?3, ?4, ?5, ?6)"));
    }

    #[test]
    fn statements_fail_on_incomplete_schema() {
        let json = r#"[{"name": "c", "refer": "contributors", "columns": ["id INTEGER"]}]"#;
        assert!(Statements::new(&Schema::from_json(json).unwrap()).is_err());
    }

    #[test]
    fn provision_is_repeatable_with_clear() {
        let mut store = SqliteStore::in_memory().unwrap();
        let schema = Schema::builtin().unwrap();
        provision(&mut store, &schema, true).unwrap();
        provision(&mut store, &schema, true).unwrap();
        assert_eq!(store.max_id("books").unwrap(), None);
    }

    #[test]
    fn provision_without_clear_keeps_existing_rows() {
        let mut store = SqliteStore::in_memory().unwrap();
        let schema = Schema::builtin().unwrap();
        provision(&mut store, &schema, false).unwrap();
        store
            .execute("INSERT INTO books (id, title) VALUES (?1, ?2)", &[41.into(), "Kept".into()])
            .unwrap();
        store.commit().unwrap();

        provision(&mut store, &schema, false).unwrap();
        assert_eq!(store.max_id("books").unwrap(), Some(41));

        provision(&mut store, &schema, true).unwrap();
        assert_eq!(store.max_id("books").unwrap(), None);
    }
}
