//! Synthetic users and activity generated over the loaded catalog.
//!
//! Books and users are sampled from `0..upper` of their id sequences, so these
//! steps see whatever an earlier run already wrote to the store.

use crate::config::{
    DEFAULT_AUDIENCES, DEFAULT_MAX_COLLECTIONS, DEFAULT_MAX_COLLECTION_NAME,
    DEFAULT_MAX_COLLECTION_SIZE, DEFAULT_MAX_EMAIL, DEFAULT_MAX_FOLLOWING, DEFAULT_MAX_NAME,
    DEFAULT_MAX_PASSWORD, DEFAULT_MAX_RATINGS, DEFAULT_MAX_SESSIONS, DEFAULT_MAX_SESSION_HOURS,
    DEFAULT_USER_COUNT, EMAIL_DOMAIN, USER_CREATION_MARGIN_SECS,
};
use crate::context::LoadContext;
use crate::markov::{title_case, WordSource};
use crate::models::EntityClass;
use crate::store::{Store, Value};
use chrono::{DateTime, SecondsFormat, Utc};
use rand::seq::{index, SliceRandom};
use rand::Rng;
use std::ops::Range;
use tracing::info;

#[derive(Debug, Clone)]
pub struct SynthOptions {
    pub user_count: u32,
    pub max_name: usize,
    pub max_email: usize,
    pub max_password: usize,
    pub max_ratings: u32,
    pub max_collections: u32,
    pub max_collection_size: u32,
    pub max_collection_name: usize,
    pub max_sessions: u32,
    pub max_session_hours: u32,
    pub max_following: u32,
    pub audiences: Vec<String>,
}

impl Default for SynthOptions {
    fn default() -> Self {
        Self {
            user_count: DEFAULT_USER_COUNT,
            max_name: DEFAULT_MAX_NAME,
            max_email: DEFAULT_MAX_EMAIL,
            max_password: DEFAULT_MAX_PASSWORD,
            max_ratings: DEFAULT_MAX_RATINGS,
            max_collections: DEFAULT_MAX_COLLECTIONS,
            max_collection_size: DEFAULT_MAX_COLLECTION_SIZE,
            max_collection_name: DEFAULT_MAX_COLLECTION_NAME,
            max_sessions: DEFAULT_MAX_SESSIONS,
            max_session_hours: DEFAULT_MAX_SESSION_HOURS,
            max_following: DEFAULT_MAX_FOLLOWING,
            audiences: DEFAULT_AUDIENCES.iter().map(|a| a.to_string()).collect(),
        }
    }
}

/// Row counts written by the supplemental step.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SupplementalReport {
    pub collections: u64,
    pub collection_books: u64,
    pub follows: u64,
    pub ratings: u64,
    pub sessions: u64,
}

fn all_ids<S: Store>(ctx: &LoadContext<S>, class: EntityClass) -> Range<i64> {
    0..ctx.ids.upper(class)
}

/// Up to `amount` distinct ids from `range`.
fn pick_distinct<R: Rng + ?Sized>(rng: &mut R, range: &Range<i64>, amount: usize) -> Vec<i64> {
    let len = (range.end - range.start).max(0) as usize;
    index::sample(rng, len, amount.min(len))
        .into_iter()
        .map(|i| range.start + i as i64)
        .collect()
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

fn iso_timestamp(secs: i64) -> String {
    DateTime::<Utc>::from_timestamp(secs, 0)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_default()
}

/// Words joined by `-`, lowercased, with every `s` that does not start a word
/// replaced by `$`.
pub fn password_from(words: &[String]) -> String {
    let joined = words.join("-").to_lowercase();
    let mut out = String::with_capacity(joined.len());
    let mut prev_alpha = false;
    for c in joined.chars() {
        out.push(if c == 's' && prev_alpha { '$' } else { c });
        prev_alpha = c.is_alphabetic();
    }
    out
}

/// Inserts the audience list and returns the ids given to each entry.
pub fn store_audiences<S: Store>(ctx: &mut LoadContext<S>, audiences: &[String]) -> Vec<i64> {
    let mut ids = Vec::with_capacity(audiences.len());
    for name in audiences {
        let id = ctx.ids.next(EntityClass::Audience);
        ctx.batcher.enqueue(
            &ctx.statements.audience,
            vec![id.into(), Value::Text(name.clone())],
        );
        ids.push(id);
    }
    info!(audiences = ids.len(), "Audiences stored");
    ids
}

/// Tags every book with one random audience.
pub fn assign_audiences<S: Store, R: Rng + ?Sized>(
    ctx: &mut LoadContext<S>,
    rng: &mut R,
    audience_ids: &[i64],
) -> u64 {
    if audience_ids.is_empty() {
        return 0;
    }
    let mut linked = 0;
    for book_id in all_ids(ctx, EntityClass::Edition) {
        if let Some(&audience_id) = audience_ids.choose(rng) {
            ctx.batcher.enqueue(
                &ctx.statements.book_audience,
                vec![book_id.into(), audience_id.into()],
            );
            linked += 1;
        }
    }
    info!(books = linked, "Audiences assigned");
    linked
}

/// Creates `user_count` users; returns the ids issued.
pub fn make_users<S: Store, R: Rng + ?Sized>(
    ctx: &mut LoadContext<S>,
    rng: &mut R,
    names: &mut dyn WordSource,
    words: &mut dyn WordSource,
    opts: &SynthOptions,
) -> Range<i64> {
    let now = Utc::now().timestamp();
    let first_id = ctx.ids.upper(EntityClass::User);
    let local_len = opts.max_email.saturating_sub(EMAIL_DOMAIN.len() + 1);

    for _ in 0..opts.user_count {
        let first = truncate(&title_case(&names.generate_word()), opts.max_name);
        let last = truncate(&title_case(&names.generate_word()), opts.max_name);
        let email = format!(
            "{}@{EMAIL_DOMAIN}",
            truncate(&format!("{first}_{last}").to_lowercase(), local_len)
        );
        let password = truncate(
            &password_from(&[words.generate_word(), words.generate_word(), words.generate_word()]),
            opts.max_password,
        );
        let created = rng.gen_range(0..=(now - USER_CREATION_MARGIN_SECS).max(0));
        let accessed = rng.gen_range(created..=now.max(created));

        let id = ctx.ids.next(EntityClass::User);
        ctx.batcher.enqueue(
            &ctx.statements.user,
            vec![
                id.into(),
                iso_timestamp(created).into(),
                iso_timestamp(accessed).into(),
                first.into(),
                last.into(),
                email.into(),
                password.into(),
            ],
        );
    }

    let issued = first_id..ctx.ids.upper(EntityClass::User);
    info!(users = issued.end - issued.start, "Users created");
    issued
}

/// Each user follows a random set of other users.
pub fn make_friends<S: Store, R: Rng + ?Sized>(
    ctx: &mut LoadContext<S>,
    rng: &mut R,
    max_following: u32,
) -> u64 {
    if max_following == 0 {
        return 0;
    }
    let users = all_ids(ctx, EntityClass::User);
    let mut follows = 0;
    for follower in users.clone() {
        let wanted = rng.gen_range(1..=max_following) as usize;
        for followee in pick_distinct(rng, &users, wanted) {
            if followee == follower {
                continue;
            }
            ctx.batcher.enqueue(
                &ctx.statements.following,
                vec![follower.into(), followee.into()],
            );
            follows += 1;
        }
    }
    info!(follows, "Follow graph created");
    follows
}

/// Each book is rated 0-5 by a random set of distinct users.
pub fn rate_books<S: Store, R: Rng + ?Sized>(
    ctx: &mut LoadContext<S>,
    rng: &mut R,
    max_ratings: u32,
) -> u64 {
    let users = all_ids(ctx, EntityClass::User);
    let mut ratings = 0;
    for book_id in all_ids(ctx, EntityClass::Edition) {
        let wanted = rng.gen_range(0..=max_ratings) as usize;
        for user_id in pick_distinct(rng, &users, wanted) {
            let rating: i64 = rng.gen_range(0..=5);
            ctx.batcher.enqueue(
                &ctx.statements.rating,
                vec![book_id.into(), user_id.into(), rating.into()],
            );
            ratings += 1;
        }
    }
    info!(ratings, "Books rated");
    ratings
}

/// Named collections of distinct books, owned by users.
/// Returns (collections, collection → book links).
pub fn build_collections<S: Store, R: Rng + ?Sized>(
    ctx: &mut LoadContext<S>,
    rng: &mut R,
    words: &mut dyn WordSource,
    opts: &SynthOptions,
) -> (u64, u64) {
    let books = all_ids(ctx, EntityClass::Edition);
    let mut collections = 0;
    let mut links = 0;

    for user_id in all_ids(ctx, EntityClass::User) {
        for _ in 0..rng.gen_range(0..=opts.max_collections) {
            let name = truncate(
                &title_case(&format!("{} {}", words.generate_word(), words.generate_word())),
                opts.max_collection_name,
            );
            let collection_id = ctx.ids.next(EntityClass::Collection);
            ctx.batcher.enqueue(
                &ctx.statements.collection,
                vec![collection_id.into(), name.into()],
            );
            ctx.batcher.enqueue(
                &ctx.statements.user_collection,
                vec![user_id.into(), collection_id.into()],
            );
            collections += 1;

            let size = rng.gen_range(1..=opts.max_collection_size.max(1)) as usize;
            for book_id in pick_distinct(rng, &books, size) {
                ctx.batcher.enqueue(
                    &ctx.statements.book_collection,
                    vec![book_id.into(), collection_id.into()],
                );
                links += 1;
            }
        }
    }
    info!(collections, books = links, "Collections built");
    (collections, links)
}

/// Reading sessions on random books, each up to `max_session_hours` long.
pub fn make_sessions<S: Store, R: Rng + ?Sized>(
    ctx: &mut LoadContext<S>,
    rng: &mut R,
    opts: &SynthOptions,
) -> u64 {
    let books = all_ids(ctx, EntityClass::Edition);
    if books.is_empty() {
        return 0;
    }
    let now = Utc::now().timestamp();
    let max_secs = (i64::from(opts.max_session_hours) * 3600).max(1);
    let mut sessions = 0;

    for user_id in all_ids(ctx, EntityClass::User) {
        for _ in 0..rng.gen_range(0..=opts.max_sessions) {
            let book_id = rng.gen_range(books.clone());
            let start = rng.gen_range(0..=(now - max_secs).max(0));
            let end = start + rng.gen_range(1..=max_secs);
            ctx.batcher.enqueue(
                &ctx.statements.session,
                vec![
                    user_id.into(),
                    book_id.into(),
                    iso_timestamp(start).into(),
                    iso_timestamp(end).into(),
                ],
            );
            sessions += 1;
        }
    }
    info!(sessions, "Reading sessions created");
    sessions
}

/// Collections, follows, ratings and sessions in one go.
pub fn supplemental<S: Store, R: Rng + ?Sized>(
    ctx: &mut LoadContext<S>,
    rng: &mut R,
    words: &mut dyn WordSource,
    opts: &SynthOptions,
) -> SupplementalReport {
    let (collections, collection_books) = build_collections(ctx, rng, words, opts);
    let follows = make_friends(ctx, rng, opts.max_following);
    let ratings = rate_books(ctx, rng, opts.max_ratings);
    let sessions = make_sessions(ctx, rng, opts);
    SupplementalReport {
        collections,
        collection_books,
        follows,
        ratings,
        sessions,
    }
}
