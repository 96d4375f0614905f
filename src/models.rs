use serde::{Deserialize, Serialize};
use std::fmt;

/// Entity classes that draw ids from independent sequences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityClass {
    Contributor,
    Edition,
    Genre,
    Audience,
    User,
    Collection,
}

impl EntityClass {
    pub const ALL: [EntityClass; 6] = [
        EntityClass::Contributor,
        EntityClass::Edition,
        EntityClass::Genre,
        EntityClass::Audience,
        EntityClass::User,
        EntityClass::Collection,
    ];

    /// Logical table reference holding this class's rows.
    pub fn table_ref(self) -> &'static str {
        match self {
            EntityClass::Contributor => "contributors",
            EntityClass::Edition => "books",
            EntityClass::Genre => "genres",
            EntityClass::Audience => "audiences",
            EntityClass::User => "users",
            EntityClass::Collection => "collections",
        }
    }
}

impl fmt::Display for EntityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityClass::Contributor => "contributor",
            EntityClass::Edition => "edition",
            EntityClass::Genre => "genre",
            EntityClass::Audience => "audience",
            EntityClass::User => "user",
            EntityClass::Collection => "collection",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Author {
    pub first_name: String,
    pub last_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edition {
    pub title: String,
    pub pages: i64,
    pub edition_name: Option<String>,
    /// Unix seconds, UTC
    pub release_ts: i64,
    pub isbn: i64,
    pub publishers: Vec<String>,
    pub genres: Vec<String>,
    /// Raw author keys as they appear in the dump
    pub author_keys: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordBody {
    Author(Author),
    Edition(Edition),
}

/// A dump line that passed classification and validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub key: String,
    pub body: RecordBody,
}
