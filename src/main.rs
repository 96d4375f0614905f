use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use shelfseed::batch::DeadLetter;
use shelfseed::config::{
    DEFAULT_AUDIENCES, DEFAULT_BATCH_SIZE, DEFAULT_EDITOR_STRIDE, DEFAULT_MAX_COLLECTIONS,
    DEFAULT_MAX_COLLECTION_NAME, DEFAULT_MAX_COLLECTION_SIZE, DEFAULT_MAX_EMAIL,
    DEFAULT_MAX_FOLLOWING, DEFAULT_MAX_NAME, DEFAULT_MAX_PASSWORD, DEFAULT_MAX_RATINGS,
    DEFAULT_MAX_SESSIONS, DEFAULT_MAX_SESSION_HOURS, DEFAULT_USER_COUNT, MAX_GENERATED_WORD,
    NAME_CHAIN_ORDER, WORD_CHAIN_ORDER,
};
use shelfseed::context::LoadContext;
use shelfseed::link::ReferenceLinker;
use shelfseed::markov::{make_rng, MarkovWords};
use shelfseed::parser::{filter_dump, DumpReader};
use shelfseed::pipeline::{self, IngestOptions};
use shelfseed::schema::{provision, Schema};
use shelfseed::staging::{self, Staging};
use shelfseed::stats::IngestStats;
use shelfseed::store::SqliteStore;
use shelfseed::synth::{self, SynthOptions};
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "shelfseed")]
#[command(about = "Load Open Library dumps into a relational store and generate demo activity")]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the destination tables
    Tables(TablesArgs),
    /// Stream a dump into the store and stage author references
    Ingest(IngestArgs),
    /// Resolve staged author references and assign audiences
    Link(LinkArgs),
    /// Generate synthetic users
    Users(SynthStepArgs),
    /// Generate collections, follows, ratings and reading sessions
    Supplemental(SynthStepArgs),
    /// tables, ingest, link, users and supplemental in one process
    Run(RunArgs),
    /// Keep only author and edition lines of a dump
    Filter(FilterArgs),
}

#[derive(Args)]
struct StoreArgs {
    /// SQLite database file
    #[arg(long, env = "DB_FILE")]
    db: String,

    /// Table spec JSON (built-in layout when omitted)
    #[arg(long, env = "DB_TABLES")]
    tables: Option<String>,

    /// Rows per statement before a batch is flushed
    #[arg(long, env = "BATCH_SIZE", default_value_t = DEFAULT_BATCH_SIZE)]
    batch_size: usize,

    /// Append rows of failed batches as CSV under this directory
    #[arg(long, env = "DEAD_LETTER_DIR")]
    dead_letter: Option<String>,
}

#[derive(Args)]
struct TablesArgs {
    #[command(flatten)]
    store: StoreArgs,

    /// Drop existing tables first
    #[arg(long, env = "DB_CLEAR", default_value_t = true, action = clap::ArgAction::Set)]
    clear: bool,
}

#[derive(Args)]
struct SourceArgs {
    /// Dump file (.txt or .bz2), or an http(s) URL with the `remote` feature
    #[arg(short, long, env = "DATA_PATH")]
    input: String,

    /// Stop after this many accepted authors + editions
    #[arg(long, env = "DATA_LIMIT")]
    limit: Option<u64>,

    /// Resolve author references immediately instead of in a linking pass
    #[arg(long)]
    no_staging: bool,

    /// Hide the progress bar
    #[arg(long)]
    no_progress: bool,
}

#[derive(Args)]
struct LinkOpts {
    /// Every Nth resolved author link is also recorded as an editor (0 disables)
    #[arg(long, env = "EDITOR_STRIDE", default_value_t = DEFAULT_EDITOR_STRIDE)]
    editor_stride: usize,

    /// Keep the staging snapshot after linking
    #[arg(long)]
    keep_staging: bool,
}

#[derive(Args)]
struct SynthArgs {
    /// Name dictionary, one word per line
    #[arg(long, env = "NAMES_DICT")]
    names_dict: Option<String>,

    /// Word dictionary, one word per line
    #[arg(long, env = "WORDS_DICT")]
    words_dict: Option<String>,

    /// RNG seed for reproducible output
    #[arg(long, env = "SEED")]
    seed: Option<u64>,

    /// Audience names, comma separated
    #[arg(long, env = "AUDIENCES", value_delimiter = ',', default_values_t = DEFAULT_AUDIENCES.iter().map(|a| a.to_string()))]
    audiences: Vec<String>,

    #[arg(long, env = "USER_COUNT", default_value_t = DEFAULT_USER_COUNT)]
    user_count: u32,

    #[arg(long, env = "MAX_NAME", default_value_t = DEFAULT_MAX_NAME)]
    max_name: usize,

    #[arg(long, env = "MAX_EMAIL", default_value_t = DEFAULT_MAX_EMAIL)]
    max_email: usize,

    #[arg(long, env = "MAX_PASSWORD", default_value_t = DEFAULT_MAX_PASSWORD)]
    max_password: usize,

    #[arg(long, env = "MAX_RATINGS", default_value_t = DEFAULT_MAX_RATINGS)]
    max_ratings: u32,

    #[arg(long, env = "MAX_COLLECTIONS", default_value_t = DEFAULT_MAX_COLLECTIONS)]
    max_collections: u32,

    #[arg(long, env = "MAX_COLLECTION_SIZE", default_value_t = DEFAULT_MAX_COLLECTION_SIZE)]
    max_collection_size: u32,

    #[arg(long, env = "MAX_COLLECTION_NAME", default_value_t = DEFAULT_MAX_COLLECTION_NAME)]
    max_collection_name: usize,

    #[arg(long, env = "MAX_SESSIONS", default_value_t = DEFAULT_MAX_SESSIONS)]
    max_sessions: u32,

    /// Longest reading session, in hours
    #[arg(long, env = "MAX_SESSION_TIME", default_value_t = DEFAULT_MAX_SESSION_HOURS)]
    max_session_time: u32,

    #[arg(long, env = "MAX_FOLLOWING", default_value_t = DEFAULT_MAX_FOLLOWING)]
    max_following: u32,
}

impl SynthArgs {
    fn options(&self) -> SynthOptions {
        SynthOptions {
            user_count: self.user_count,
            max_name: self.max_name,
            max_email: self.max_email,
            max_password: self.max_password,
            max_ratings: self.max_ratings,
            max_collections: self.max_collections,
            max_collection_size: self.max_collection_size,
            max_collection_name: self.max_collection_name,
            max_sessions: self.max_sessions,
            max_session_hours: self.max_session_time,
            max_following: self.max_following,
            audiences: self.audiences.clone(),
        }
    }

    fn names(&self, seed_offset: u64) -> Result<MarkovWords> {
        let path = self
            .names_dict
            .as_deref()
            .context("A name dictionary is required (--names-dict or NAMES_DICT)")?;
        MarkovWords::from_dictionary(path, NAME_CHAIN_ORDER, MAX_GENERATED_WORD, self.rng(seed_offset))
    }

    fn words(&self, order: usize, seed_offset: u64) -> Result<MarkovWords> {
        let path = self
            .words_dict
            .as_deref()
            .context("A word dictionary is required (--words-dict or WORDS_DICT)")?;
        MarkovWords::from_dictionary(path, order, MAX_GENERATED_WORD, self.rng(seed_offset))
    }

    fn rng(&self, offset: u64) -> rand::rngs::StdRng {
        make_rng(self.seed.map(|s| s.wrapping_add(offset)))
    }
}

#[derive(Args)]
struct IngestArgs {
    #[command(flatten)]
    store: StoreArgs,

    #[command(flatten)]
    source: SourceArgs,
}

#[derive(Args)]
struct LinkArgs {
    #[command(flatten)]
    store: StoreArgs,

    #[command(flatten)]
    link: LinkOpts,

    #[command(flatten)]
    synth: SynthArgs,
}

#[derive(Args)]
struct SynthStepArgs {
    #[command(flatten)]
    store: StoreArgs,

    #[command(flatten)]
    synth: SynthArgs,
}

#[derive(Args)]
struct RunArgs {
    #[command(flatten)]
    store: StoreArgs,

    #[command(flatten)]
    source: SourceArgs,

    #[command(flatten)]
    link: LinkOpts,

    #[command(flatten)]
    synth: SynthArgs,

    /// Keep existing tables and append to them
    #[arg(long)]
    no_clear: bool,
}

#[derive(Args)]
struct FilterArgs {
    /// Full dump (.txt or .bz2)
    #[arg(short, long)]
    input: String,

    /// Filtered plain-text dump
    #[arg(short, long)]
    output: String,
}

fn load_schema(args: &StoreArgs) -> Result<Schema> {
    match &args.tables {
        Some(path) => Schema::load(path),
        None => Schema::builtin(),
    }
}

fn open_context(
    args: &StoreArgs,
    schema: &Schema,
    stats: &Arc<IngestStats>,
) -> Result<LoadContext<SqliteStore>> {
    let store = SqliteStore::open(&args.db)
        .with_context(|| format!("Failed to open database: {}", args.db))?;
    let ctx = LoadContext::new(store, schema, args.batch_size, Arc::clone(stats))?;
    match &args.dead_letter {
        Some(dir) => Ok(ctx.with_dead_letter(DeadLetter::new(dir)?)),
        None => Ok(ctx),
    }
}

fn run_tables(args: &StoreArgs, clear: bool) -> Result<()> {
    let schema = load_schema(args)?;
    let mut store = SqliteStore::open(&args.db)
        .with_context(|| format!("Failed to open database: {}", args.db))?;
    provision(&mut store, &schema, clear)?;
    println!("Provisioned {} tables in {}", schema.tables().len(), args.db);
    Ok(())
}

fn ingest_options(source: &SourceArgs) -> IngestOptions {
    IngestOptions {
        limit: source.limit,
        staged_resolution: !source.no_staging,
        show_progress: !source.no_progress,
    }
}

fn run_ingest(args: IngestArgs, stats: &Arc<IngestStats>) -> Result<()> {
    let schema = load_schema(&args.store)?;
    let mut ctx = open_context(&args.store, &schema, stats)?;
    let mut reader = DumpReader::open(&args.source.input)?;

    let start = Instant::now();
    let opts = ingest_options(&args.source);
    let staging = pipeline::ingest(&mut reader, &mut ctx, &opts);
    ctx.drain();

    if opts.staged_resolution {
        let path = staging::snapshot_path(&args.store.db);
        staging::save_snapshot(&path, &args.source.input, &staging)?;
        println!("Staging snapshot: {}", path.display());
    }
    print_summary(stats, start.elapsed().as_secs_f64());
    Ok(())
}

/// Links staged references, then stores and assigns audiences.
fn link_step(
    ctx: &mut LoadContext<SqliteStore>,
    staging: Staging,
    link: &LinkOpts,
    synth: &SynthArgs,
) {
    let linker = ReferenceLinker::new(link.editor_stride);
    linker.link(&staging.map, staging.pending, &ctx.statements, &mut ctx.batcher);

    let audience_ids = synth::store_audiences(ctx, &synth.audiences);
    let mut rng = synth.rng(0);
    synth::assign_audiences(ctx, &mut rng, &audience_ids);
}

fn run_link(args: LinkArgs, stats: &Arc<IngestStats>) -> Result<()> {
    let path = staging::snapshot_path(&args.store.db);
    let (input, staging) = staging::load_snapshot(&path)?.with_context(|| {
        format!(
            "No usable staging snapshot at {}; run `ingest` first",
            path.display()
        )
    })?;
    info!(input = %input, "Linking references staged by an earlier ingest");

    let schema = load_schema(&args.store)?;
    let mut ctx = open_context(&args.store, &schema, stats)?;
    let start = Instant::now();
    link_step(&mut ctx, staging, &args.link, &args.synth);
    ctx.drain();

    if !args.link.keep_staging {
        staging::discard_snapshot(&path)?;
    }
    print_summary(stats, start.elapsed().as_secs_f64());
    Ok(())
}

fn users_step(ctx: &mut LoadContext<SqliteStore>, synth: &SynthArgs) -> Result<()> {
    let mut names = synth.names(1)?;
    let mut words = synth.words(WORD_CHAIN_ORDER, 2)?;
    let mut rng = synth.rng(3);
    let users = synth::make_users(ctx, &mut rng, &mut names, &mut words, &synth.options());
    println!("Users created:      {}", users.end - users.start);
    Ok(())
}

fn supplemental_step(ctx: &mut LoadContext<SqliteStore>, synth: &SynthArgs) -> Result<()> {
    let mut words = synth.words(NAME_CHAIN_ORDER, 4)?;
    let mut rng = synth.rng(5);
    let report = synth::supplemental(ctx, &mut rng, &mut words, &synth.options());
    println!("Collections:        {}", report.collections);
    println!("Collection books:   {}", report.collection_books);
    println!("Follows:            {}", report.follows);
    println!("Ratings:            {}", report.ratings);
    println!("Sessions:           {}", report.sessions);
    Ok(())
}

fn run_synth_step(
    args: SynthStepArgs,
    stats: &Arc<IngestStats>,
    step: fn(&mut LoadContext<SqliteStore>, &SynthArgs) -> Result<()>,
) -> Result<()> {
    let schema = load_schema(&args.store)?;
    let mut ctx = open_context(&args.store, &schema, stats)?;
    step(&mut ctx, &args.synth)?;
    ctx.drain();
    Ok(())
}

fn run_all(args: RunArgs, stats: &Arc<IngestStats>) -> Result<()> {
    let start = Instant::now();
    run_tables(&args.store, !args.no_clear)?;

    let schema = load_schema(&args.store)?;
    let mut ctx = open_context(&args.store, &schema, stats)?;
    let mut reader = DumpReader::open(&args.source.input)?;
    let opts = ingest_options(&args.source);

    let staging = pipeline::ingest(&mut reader, &mut ctx, &opts);
    if args.link.keep_staging && opts.staged_resolution {
        let path = staging::snapshot_path(&args.store.db);
        if let Err(e) = staging::save_snapshot(&path, &args.source.input, &staging) {
            warn!(error = %e, "Failed to save staging snapshot");
        }
    }
    link_step(&mut ctx, staging, &args.link, &args.synth);
    ctx.drain();

    users_step(&mut ctx, &args.synth)?;
    ctx.drain();
    supplemental_step(&mut ctx, &args.synth)?;
    ctx.drain();

    print_summary(stats, start.elapsed().as_secs_f64());
    Ok(())
}

fn run_filter(args: FilterArgs) -> Result<()> {
    if Path::new(&args.output) == Path::new(&args.input) {
        anyhow::bail!("Refusing to overwrite the input dump: {}", args.input);
    }
    let (kept, total) = filter_dump(&args.input, &args.output)?;
    println!("Kept {kept} of {total} lines");
    Ok(())
}

fn print_summary(stats: &IngestStats, elapsed_secs: f64) {
    println!();
    println!("=== Summary ===");
    println!("Total time:         {:.2}s", elapsed_secs);
    println!();
    println!("Lines read:         {}", stats.lines());
    println!("Bytes read:         {}", stats.bytes());
    println!("Authors:            {}", stats.authors());
    println!("Editions:           {}", stats.editions());
    println!("Genres:             {}", stats.genres());
    println!("Publishers:         {}", stats.publishers());
    println!("Malformed lines:    {}", stats.malformed());
    println!("Rejected records:   {}", stats.rejected());
    println!("Ignored records:    {}", stats.ignored());
    println!("Duplicate records:  {}", stats.duplicates());
    println!("References staged:  {}", stats.refs_staged());
    println!("References linked:  {}", stats.refs_resolved());
    println!("References dropped: {}", stats.refs_dropped());
    println!("Editor links:       {}", stats.editors());
    println!("Batches written:    {}", stats.batches_flushed());
    println!("Batches failed:     {}", stats.batches_failed());
    println!("Rows lost:          {}", stats.rows_lost());
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {e}");
        return ExitCode::FAILURE;
    }

    let stats = Arc::new(IngestStats::new());
    let handler_stats = Arc::clone(&stats);
    if let Err(e) = ctrlc::set_handler(move || {
        error!(
            accepted = handler_stats.accepted(),
            lines = handler_stats.lines(),
            "Interrupted; exiting without flushing pending batches"
        );
        eprintln!(
            "\nInterrupted after {} accepted records",
            handler_stats.accepted()
        );
        std::process::exit(130);
    }) {
        warn!(error = %e, "Failed to install interrupt handler");
    }

    let result = match cli.command {
        Commands::Tables(args) => run_tables(&args.store, args.clear),
        Commands::Ingest(args) => run_ingest(args, &stats),
        Commands::Link(args) => run_link(args, &stats),
        Commands::Users(args) => run_synth_step(args, &stats, users_step),
        Commands::Supplemental(args) => run_synth_step(args, &stats, supplemental_step),
        Commands::Run(args) => run_all(args, &stats),
        Commands::Filter(args) => run_filter(args),
    };

    match result {
        Ok(()) => {
            info!("Completed successfully");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Error: {:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
