//! Classification and validation of single dump lines.
//!
//! A line is `type \t key \t revision \t modified \t {json}`. [`classify`]
//! either returns a normalized [`Record`] or a [`Reject`] saying why the line
//! was skipped; it never panics on bad input.

use crate::config::{AUTHOR_TAG, EDITION_TAG, FIELD_KEY, FIELD_PAYLOAD, FIELD_TYPE};
use crate::models::{Author, Edition, Record, RecordBody};
use chrono::NaiveDate;
use memchr::memchr_iter;
use serde_json::{Map, Value};

type Payload = Map<String, Value>;

/// Why a line was not turned into a record.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Reject {
    #[error("malformed line: {0}")]
    Malformed(String),

    #[error("unrecognised record type `{0}`")]
    UnknownType(String),

    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("field `{field}` is invalid: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("edition lists no authors")]
    NoAuthors,

    #[error("edition has no ISBN-13")]
    EmptyIsbn,

    #[error("ISBN-13 `{0}` is not numeric")]
    NonNumericIsbn(String),

    #[error("unparseable publish date `{0}`")]
    BadPublishDate(String),

    #[error("author name `{0}` has fewer than two tokens")]
    ShortName(String),
}

impl Reject {
    /// Structural failures, as opposed to well-formed records failing domain checks.
    pub fn is_malformed(&self) -> bool {
        matches!(self, Reject::Malformed(_))
    }
}

pub fn classify(line: &[u8]) -> Result<Record, Reject> {
    let fields = split_fields(line)?;

    let tag = field_str(fields[FIELD_TYPE], "type")?;
    let key = field_str(fields[FIELD_KEY], "key")?;
    if tag != AUTHOR_TAG && tag != EDITION_TAG {
        return Err(Reject::UnknownType(tag.to_string()));
    }
    if key.is_empty() {
        return Err(Reject::Malformed("empty record key".to_string()));
    }

    let payload: Payload = serde_json::from_slice(fields[FIELD_PAYLOAD])
        .map_err(|e| Reject::Malformed(format!("payload is not a JSON object: {e}")))?;

    let body = if tag == AUTHOR_TAG {
        RecordBody::Author(validate_author(&payload)?)
    } else {
        RecordBody::Edition(validate_edition(&payload)?)
    };

    Ok(Record {
        key: key.to_string(),
        body,
    })
}

/// Splits off the leading fields up to and including the payload.
fn split_fields(line: &[u8]) -> Result<[&[u8]; FIELD_PAYLOAD + 1], Reject> {
    let mut fields: [&[u8]; FIELD_PAYLOAD + 1] = [&[]; FIELD_PAYLOAD + 1];
    let mut start = 0;
    let mut n = 0;

    for tab in memchr_iter(b'\t', line) {
        if n == FIELD_PAYLOAD {
            break;
        }
        fields[n] = &line[start..tab];
        n += 1;
        start = tab + 1;
    }

    if n < FIELD_PAYLOAD {
        return Err(Reject::Malformed(format!(
            "expected {} tab-separated fields, found {}",
            FIELD_PAYLOAD + 1,
            n + 1
        )));
    }

    // The payload runs to the next tab, if any trailing columns exist.
    let rest = &line[start..];
    let end = memchr::memchr(b'\t', rest).unwrap_or(rest.len());
    fields[FIELD_PAYLOAD] = &rest[..end];
    Ok(fields)
}

fn field_str<'a>(bytes: &'a [u8], what: &str) -> Result<&'a str, Reject> {
    std::str::from_utf8(bytes)
        .map(str::trim)
        .map_err(|_| Reject::Malformed(format!("{what} field is not valid UTF-8")))
}

fn validate_author(payload: &Payload) -> Result<Author, Reject> {
    let name = required_str(payload, "name")?;
    let (first, last) = split_name(name).ok_or_else(|| Reject::ShortName(name.to_string()))?;
    Ok(Author {
        first_name: first,
        last_name: last,
    })
}

/// First whitespace token vs. the remainder; `None` for fewer than two tokens.
pub fn split_name(name: &str) -> Option<(String, String)> {
    let mut tokens = name.split_whitespace();
    let first = tokens.next()?;
    let rest: Vec<&str> = tokens.collect();
    if rest.is_empty() {
        return None;
    }
    Some((first.to_string(), rest.join(" ")))
}

fn validate_edition(payload: &Payload) -> Result<Edition, Reject> {
    let title = required_str(payload, "title")?;
    let pages = required(payload, "number_of_pages")?;
    let publish_date = required_str(payload, "publish_date")?;
    let authors = required_array(payload, "authors")?;
    let isbns = required_array(payload, "isbn_13")?;

    if title.trim().is_empty() {
        return Err(Reject::InvalidField {
            field: "title",
            reason: "empty".to_string(),
        });
    }
    let pages = page_count(pages)?;

    let mut author_keys: Vec<String> = Vec::new();
    for author in authors {
        if let Some(key) = author.get("key").and_then(Value::as_str) {
            let key = key.trim();
            if !key.is_empty() && !author_keys.iter().any(|k| k == key) {
                author_keys.push(key.to_string());
            }
        }
    }
    if author_keys.is_empty() {
        return Err(Reject::NoAuthors);
    }

    let isbn = parse_isbn(isbns)?;
    let release_ts = parse_publish_date(publish_date)
        .ok_or_else(|| Reject::BadPublishDate(publish_date.to_string()))?;

    let edition_name = optional_str(payload, "edition_name")?
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    Ok(Edition {
        title: title.trim().to_string(),
        pages,
        edition_name,
        release_ts,
        isbn,
        publishers: normalized_list(payload, "publishers", normalize_publisher)?,
        genres: normalized_list(payload, "genres", normalize_genre)?,
        author_keys,
    })
}

fn required<'a>(payload: &'a Payload, field: &'static str) -> Result<&'a Value, Reject> {
    match payload.get(field) {
        None | Some(Value::Null) => Err(Reject::MissingField(field)),
        Some(v) => Ok(v),
    }
}

fn required_str<'a>(payload: &'a Payload, field: &'static str) -> Result<&'a str, Reject> {
    required(payload, field)?
        .as_str()
        .ok_or_else(|| Reject::InvalidField {
            field,
            reason: "expected a string".to_string(),
        })
}

fn required_array<'a>(payload: &'a Payload, field: &'static str) -> Result<&'a [Value], Reject> {
    required(payload, field)?
        .as_array()
        .map(Vec::as_slice)
        .ok_or_else(|| Reject::InvalidField {
            field,
            reason: "expected an array".to_string(),
        })
}

fn optional_str<'a>(payload: &'a Payload, field: &'static str) -> Result<Option<&'a str>, Reject> {
    match payload.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(_) => Err(Reject::InvalidField {
            field,
            reason: "expected a string".to_string(),
        }),
    }
}

/// Optional list of strings, normalized and de-duplicated in first-seen order.
/// Non-string entries and entries that normalize to nothing are skipped.
fn normalized_list(
    payload: &Payload,
    field: &'static str,
    normalize: fn(&str) -> Option<String>,
) -> Result<Vec<String>, Reject> {
    let items = match payload.get(field) {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(items)) => items,
        Some(_) => {
            return Err(Reject::InvalidField {
                field,
                reason: "expected an array".to_string(),
            })
        }
    };

    let mut out: Vec<String> = Vec::new();
    for normal in items.iter().filter_map(Value::as_str).filter_map(normalize) {
        if !out.contains(&normal) {
            out.push(normal);
        }
    }
    Ok(out)
}

fn page_count(value: &Value) -> Result<i64, Reject> {
    let pages = match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    match pages {
        Some(p) if p >= 0 => Ok(p),
        _ => Err(Reject::InvalidField {
            field: "number_of_pages",
            reason: format!("expected a non-negative integer, got {value}"),
        }),
    }
}

fn parse_isbn(isbns: &[Value]) -> Result<i64, Reject> {
    let first = isbns.first().ok_or(Reject::EmptyIsbn)?;
    let raw = match first.as_str() {
        Some(s) => s.trim(),
        None => return Err(Reject::NonNumericIsbn(first.to_string())),
    };
    if raw.is_empty() {
        return Err(Reject::EmptyIsbn);
    }
    if !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Reject::NonNumericIsbn(raw.to_string()));
    }
    raw.parse::<i64>().map_err(|_| Reject::InvalidField {
        field: "isbn_13",
        reason: format!("`{raw}` is out of range"),
    })
}

/// Lowercase, ASCII punctuation removed, whitespace collapsed.
pub fn normalize_genre(raw: &str) -> Option<String> {
    let stripped: String = raw
        .chars()
        .filter(|c| !c.is_ascii_punctuation())
        .flat_map(char::to_lowercase)
        .collect();
    let normal = stripped.split_whitespace().collect::<Vec<_>>().join(" ");
    (!normal.is_empty()).then_some(normal)
}

pub fn normalize_publisher(raw: &str) -> Option<String> {
    let normal = raw.trim().to_lowercase();
    (!normal.is_empty()).then_some(normal)
}

const FULL_DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%B %d, %Y",
    "%b %d, %Y",
    "%B %d %Y",
    "%d %B %Y",
    "%d %b %Y",
    "%m/%d/%Y",
];

/// Formats without a day; parsed by prefixing day 1.
const MONTH_FORMATS: &[&str] = &["%B %Y", "%b %Y", "%B, %Y", "%Y-%m"];

/// Parses the free-form publish dates found in the dump into a UTC unix
/// timestamp. `?` placeholders are stripped; a missing month or day is taken
/// as the first.
pub fn parse_publish_date(raw: &str) -> Option<i64> {
    let cleaned = raw.replace('?', "");
    let s = cleaned.trim().trim_end_matches('.');
    if s.is_empty() {
        return None;
    }

    let date = FULL_DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
        .or_else(|| {
            let with_day = format!("1 {s}");
            MONTH_FORMATS
                .iter()
                .find_map(|fmt| NaiveDate::parse_from_str(&with_day, &format!("%d {fmt}")).ok())
        })
        .or_else(|| {
            if s.len() == 4 && s.bytes().all(|b| b.is_ascii_digit()) {
                s.parse::<i32>()
                    .ok()
                    .filter(|&y| y > 0)
                    .and_then(|y| NaiveDate::from_ymd_opt(y, 1, 1))
            } else {
                None
            }
        })?;

    Some(date.and_hms_opt(0, 0, 0)?.and_utc().timestamp())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(tag: &str, key: &str, json: &str) -> Vec<u8> {
        format!("{tag}\t{key}\t3\t2010-01-01T00:00:00\t{json}").into_bytes()
    }

    fn edition_json(overrides: &[(&str, &str)]) -> String {
        let mut fields = vec![
            ("title", r#""Sample""#.to_string()),
            ("number_of_pages", "100".to_string()),
            ("publish_date", r#""2020-01-01""#.to_string()),
            ("authors", r#"[{"key":"/a/1"}]"#.to_string()),
            ("isbn_13", r#"["1234567890123"]"#.to_string()),
        ];
        for (k, v) in overrides {
            fields.retain(|(name, _)| name != k);
            if !v.is_empty() {
                fields.push((*k, v.to_string()));
            }
        }
        let body: Vec<String> = fields.iter().map(|(k, v)| format!("\"{k}\":{v}")).collect();
        format!("{{{}}}", body.join(","))
    }

    fn classify_edition(overrides: &[(&str, &str)]) -> Result<Record, Reject> {
        classify(&line("/type/edition", "/e/1", &edition_json(overrides)))
    }

    #[test]
    fn author_splits_first_token_from_remainder() {
        let rec = classify(&line("/type/author", "/a/1", r#"{"name":"Ursula K. Le Guin"}"#)).unwrap();
        assert_eq!(rec.key, "/a/1");
        assert_eq!(
            rec.body,
            RecordBody::Author(Author {
                first_name: "Ursula".to_string(),
                last_name: "K. Le Guin".to_string(),
            })
        );
    }

    #[test]
    fn author_with_single_token_rejected() {
        let err = classify(&line("/type/author", "/a/1", r#"{"name":"Plato"}"#)).unwrap_err();
        assert_eq!(err, Reject::ShortName("Plato".to_string()));
    }

    #[test]
    fn author_without_name_rejected() {
        let err = classify(&line("/type/author", "/a/1", r#"{"birth_date":"1900"}"#)).unwrap_err();
        assert_eq!(err, Reject::MissingField("name"));
    }

    #[test]
    fn valid_edition() {
        let rec = classify_edition(&[
            ("genres", r#"["Fiction", "Science-Fiction.", "fiction"]"#),
            ("publishers", r#"["  Tor Books "]"#),
            ("edition_name", r#""1st ed.""#),
        ])
        .unwrap();
        let RecordBody::Edition(ed) = rec.body else {
            panic!("expected edition");
        };
        assert_eq!(ed.title, "Sample");
        assert_eq!(ed.pages, 100);
        assert_eq!(ed.isbn, 1234567890123);
        assert_eq!(ed.release_ts, 1577836800);
        assert_eq!(ed.edition_name.as_deref(), Some("1st ed."));
        assert_eq!(ed.genres, vec!["fiction", "sciencefiction"]);
        assert_eq!(ed.publishers, vec!["tor books"]);
        assert_eq!(ed.author_keys, vec!["/a/1"]);
    }

    #[test]
    fn edition_name_is_optional() {
        let RecordBody::Edition(ed) = classify_edition(&[]).unwrap().body else {
            panic!("expected edition");
        };
        assert_eq!(ed.edition_name, None);
        assert!(ed.genres.is_empty());
    }

    #[test]
    fn non_digit_isbn_rejected() {
        let err = classify_edition(&[("isbn_13", r#"["978-0-12"]"#)]).unwrap_err();
        assert_eq!(err, Reject::NonNumericIsbn("978-0-12".to_string()));
    }

    #[test]
    fn empty_isbn_list_rejected() {
        assert_eq!(classify_edition(&[("isbn_13", "[]")]).unwrap_err(), Reject::EmptyIsbn);
        assert_eq!(classify_edition(&[("isbn_13", r#"[""]"#)]).unwrap_err(), Reject::EmptyIsbn);
    }

    #[test]
    fn zero_authors_rejected() {
        assert_eq!(classify_edition(&[("authors", "[]")]).unwrap_err(), Reject::NoAuthors);
        assert_eq!(
            classify_edition(&[("authors", r#"[{"name":"x"}]"#)]).unwrap_err(),
            Reject::NoAuthors
        );
    }

    #[test]
    fn missing_required_field_rejected() {
        assert_eq!(
            classify_edition(&[("number_of_pages", "")]).unwrap_err(),
            Reject::MissingField("number_of_pages")
        );
    }

    #[test]
    fn bad_publish_date_rejected() {
        assert_eq!(
            classify_edition(&[("publish_date", r#""sometime""#)]).unwrap_err(),
            Reject::BadPublishDate("sometime".to_string())
        );
    }

    #[test]
    fn pages_may_be_numeric_string() {
        let RecordBody::Edition(ed) = classify_edition(&[("number_of_pages", r#""320""#)]).unwrap().body
        else {
            panic!("expected edition");
        };
        assert_eq!(ed.pages, 320);
        assert!(matches!(
            classify_edition(&[("number_of_pages", r#""many""#)]).unwrap_err(),
            Reject::InvalidField { field: "number_of_pages", .. }
        ));
    }

    #[test]
    fn unknown_type_rejected() {
        let err = classify(&line("/type/work", "/w/1", "{}")).unwrap_err();
        assert_eq!(err, Reject::UnknownType("/type/work".to_string()));
        assert!(!err.is_malformed());
    }

    #[test]
    fn too_few_fields_is_malformed() {
        let err = classify(b"/type/author\t/a/1\t{}").unwrap_err();
        assert!(err.is_malformed());
        assert!(classify(b"").unwrap_err().is_malformed());
    }

    #[test]
    fn bad_json_is_malformed() {
        let err = classify(&line("/type/author", "/a/1", "{not json")).unwrap_err();
        assert!(err.is_malformed());
    }

    #[test]
    fn trailing_columns_are_ignored() {
        let mut raw = line("/type/author", "/a/1", r#"{"name":"Jane Doe"}"#);
        raw.extend_from_slice(b"\textra");
        assert!(classify(&raw).is_ok());
    }

    #[test]
    fn publish_date_formats() {
        assert_eq!(parse_publish_date("2020-01-01"), Some(1577836800));
        assert_eq!(parse_publish_date("January 1, 2020"), Some(1577836800));
        assert_eq!(parse_publish_date("Jan 1, 2020"), Some(1577836800));
        assert_eq!(parse_publish_date("1 January 2020"), Some(1577836800));
        assert_eq!(parse_publish_date("January 2020"), Some(1577836800));
        assert_eq!(parse_publish_date("2020"), Some(1577836800));
        assert_eq!(parse_publish_date("2020?"), Some(1577836800));
        assert_eq!(parse_publish_date("19??"), None);
        assert_eq!(parse_publish_date("?"), None);
        assert_eq!(parse_publish_date("n.d."), None);
    }

    #[test]
    fn genre_normalization() {
        assert_eq!(normalize_genre("Science-Fiction"), Some("sciencefiction".to_string()));
        assert_eq!(normalize_genre("  Young   Adult. "), Some("young adult".to_string()));
        assert_eq!(normalize_genre("..."), None);
    }

    #[test]
    fn name_split() {
        assert_eq!(
            split_name("Jane Doe"),
            Some(("Jane".to_string(), "Doe".to_string()))
        );
        assert_eq!(split_name("  "), None);
        assert_eq!(split_name("Cher"), None);
    }
}
