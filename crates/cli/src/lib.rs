use annvault_vector_store::{find_data_path_from, AnnStore, Metric, StoreConfig};
use anyhow::{bail, Context, Result};
use clap::{ArgGroup, Args, Parser, Subcommand};
use records::{DocumentOutput, HitOutput};
use serde_json::json;
use std::env;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};

mod records;

const DEFAULT_DATA_DIR: &str = "annvault-data";

fn print_stdout(text: &str) -> Result<()> {
    use std::io::Write;

    let mut stdout = io::stdout().lock();
    if let Err(err) = stdout
        .write_all(text.as_bytes())
        .and_then(|_| stdout.write_all(b"\n"))
        .and_then(|_| stdout.flush())
    {
        if err.kind() == io::ErrorKind::BrokenPipe {
            return Ok(());
        }
        return Err(err.into());
    }
    Ok(())
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    print_stdout(&serde_json::to_string_pretty(value)?)
}

#[derive(Parser)]
#[command(name = "annvault")]
#[command(about = "Embeddable approximate nearest-neighbour vector store", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Store directory (defaults to the nearest directory holding a store)
    #[arg(long, global = true)]
    data_path: Option<PathBuf>,

    /// TOML configuration file; flags override its values
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Raw embedding dimension
    #[arg(long, global = true)]
    dimension: Option<usize>,

    /// Distance metric: euclidean|inner_product|cosine
    #[arg(long, global = true)]
    metric: Option<Metric>,

    /// Project vectors down to this many components before indexing
    #[arg(long, global = true)]
    n_components: Option<usize>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode: log only warnings/errors
    #[arg(long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Index documents from a JSON Lines file
    Index(IndexArgs),

    /// Find the nearest stored documents
    Search(SearchArgs),

    /// Fetch stored documents by id
    Get(IdsArgs),

    /// Delete documents by id
    Delete(IdsArgs),

    /// Show store statistics
    Stats,

    /// Write an index snapshot so the next open skips the rebuild
    Dump,

    /// Rebuild the index from stored documents, dropping deleted entries
    Rebuild,

    /// Delete every document and the snapshot
    Clear,
}

#[derive(Args)]
struct IndexArgs {
    /// JSON Lines file of {"id", "vector", "payload"?} records ("-" for stdin)
    #[arg(long, short = 'i')]
    input: PathBuf,

    /// Replace existing documents instead of adding new ones
    #[arg(long)]
    update: bool,

    /// Documents per store call
    #[arg(long, default_value_t = 1_024)]
    batch_size: usize,

    /// Write a snapshot when done
    #[arg(long)]
    dump: bool,
}

#[derive(Args)]
#[command(group(ArgGroup::new("query").required(true).args(["vector", "id"])))]
struct SearchArgs {
    /// Query vector as comma separated floats
    #[arg(long, allow_hyphen_values = true)]
    vector: Option<String>,

    /// Use the vector of a stored document as the query
    #[arg(long)]
    id: Option<String>,

    /// Maximum number of results
    #[arg(long, short = 'n', default_value_t = 10)]
    limit: usize,
}

#[derive(Args)]
struct IdsArgs {
    /// Document ids
    #[arg(required = true)]
    ids: Vec<String>,
}

pub async fn main_entry() -> Result<()> {
    let cli = Cli::parse();

    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if cli.quiet {
        builder.filter_level(log::LevelFilter::Warn);
    } else if cli.verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.target(env_logger::Target::Stderr).init();

    let config = resolve_config(&cli)?;
    log::debug!("Using store at {:?}", config.data_path);

    match cli.command {
        Commands::Index(args) => run_index(config, args).await,
        Commands::Search(args) => run_search(config, args).await,
        Commands::Get(args) => run_get(config, args).await,
        Commands::Delete(args) => run_delete(config, args).await,
        Commands::Stats => run_stats(config).await,
        Commands::Dump => run_dump(config).await,
        Commands::Rebuild => run_rebuild(config).await,
        Commands::Clear => run_clear(config).await,
    }
}

fn resolve_config(cli: &Cli) -> Result<StoreConfig> {
    let mut config = match &cli.config {
        Some(path) => StoreConfig::from_toml_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => StoreConfig {
            data_path: default_data_path()?,
            ..StoreConfig::default()
        },
    };

    if let Some(path) = &cli.data_path {
        config.data_path = path.clone();
    }
    if let Some(dimension) = cli.dimension {
        config.dimension = dimension;
    }
    if let Some(metric) = cli.metric {
        config.metric = metric;
    }
    if cli.n_components.is_some() {
        config.n_components = cli.n_components;
    }

    if config.dimension == 0 {
        bail!("A vector dimension is required: pass --dimension or set `dimension` in --config");
    }
    Ok(config)
}

fn default_data_path() -> Result<PathBuf> {
    let cwd = env::current_dir().context("Failed to resolve current directory")?;
    Ok(find_data_path_from(&cwd).unwrap_or_else(|| cwd.join(DEFAULT_DATA_DIR)))
}

/// Open the store, run `f`, close it. Store calls block, so they run off the runtime.
async fn with_store<T, F>(config: StoreConfig, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&mut AnnStore) -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let mut store = AnnStore::open(config).context("Failed to open store")?;
        let out = f(&mut store)?;
        store.close().context("Failed to close store")?;
        Ok(out)
    })
    .await
    .context("Store task failed")?
}

async fn run_index(config: StoreConfig, args: IndexArgs) -> Result<()> {
    let docs = read_input(&args.input)?;
    let total = docs.len();
    let batch_size = args.batch_size.max(1);
    let update = args.update;
    let dump = args.dump;

    let live = with_store(config, move |store| {
        for chunk in docs.chunks(batch_size) {
            if update {
                store.update(chunk).context("Update failed")?;
            } else {
                store.index(chunk).context("Indexing failed")?;
            }
        }
        if dump {
            store.dump().context("Snapshot failed")?;
        }
        Ok(store.len())
    })
    .await?;

    if update {
        print_json(&json!({ "updated": total, "live": live }))
    } else {
        print_json(&json!({ "indexed": total, "live": live }))
    }
}

fn read_input(path: &Path) -> Result<Vec<annvault_vector_store::Document>> {
    if path == Path::new("-") {
        return records::read_documents(io::stdin().lock());
    }
    let file =
        File::open(path).with_context(|| format!("Failed to open input {}", path.display()))?;
    records::read_documents(BufReader::new(file))
}

async fn run_search(config: StoreConfig, args: SearchArgs) -> Result<()> {
    let vector = args.vector.as_deref().map(records::parse_vector).transpose()?;
    let id = args.id;
    let limit = args.limit;

    let hits = with_store(config, move |store| {
        let query = match (vector, id) {
            (Some(vector), _) => vector,
            (None, Some(id)) => match store.get(&[id.as_str()])?.pop() {
                Some(doc) => doc.vector,
                None => bail!("Document not found: {id}"),
            },
            (None, None) => bail!("Either --vector or --id is required"),
        };
        let hits = store.search(&[query], limit)?.into_iter().next().unwrap_or_default();
        Ok(hits.into_iter().map(HitOutput::from).collect::<Vec<_>>())
    })
    .await?;

    print_json(&json!({ "hits": hits }))
}

async fn run_get(config: StoreConfig, args: IdsArgs) -> Result<()> {
    let docs = with_store(config, move |store| {
        let docs = store.get(&args.ids)?;
        Ok(docs.into_iter().map(DocumentOutput::from).collect::<Vec<_>>())
    })
    .await?;
    print_json(&json!({ "documents": docs }))
}

async fn run_delete(config: StoreConfig, args: IdsArgs) -> Result<()> {
    let requested = args.ids.len();
    let (deleted, live) = with_store(config, move |store| {
        let deleted = store.delete(&args.ids)?;
        Ok((deleted, store.len()))
    })
    .await?;
    print_json(&json!({ "requested": requested, "deleted": deleted, "live": live }))
}

async fn run_stats(config: StoreConfig) -> Result<()> {
    let data_path = config.data_path.clone();
    let stats = with_store(config, |store| Ok(store.stats())).await?;
    print_json(&json!({ "data_path": data_path, "stats": stats }))
}

async fn run_dump(config: StoreConfig) -> Result<()> {
    let live = with_store(config, |store| {
        store.dump()?;
        Ok(store.len())
    })
    .await?;
    print_json(&json!({ "dumped": true, "live": live }))
}

async fn run_rebuild(config: StoreConfig) -> Result<()> {
    let documents = with_store(config, |store| Ok(store.rebuild()?)).await?;
    print_json(&json!({ "rebuilt": documents }))
}

async fn run_clear(config: StoreConfig) -> Result<()> {
    with_store(config, |store| Ok(store.clear()?)).await?;
    print_json(&json!({ "cleared": true }))
}
