use clap::{ArgGroup, Parser, Subcommand};
use color_eyre::eyre::bail;
use color_eyre::Result;
use s3cat::{ConcatenateJobBuilder, ListFilter, ObjectLocation};
use tracing::{debug, warn};
use url::Url;

mod progress;

const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("VERGEN_CARGO_TARGET_TRIPLE"),
    ")"
);

/// Concatenate S3 objects and local files into a single S3 object
#[derive(Parser, Debug)]
#[clap(author, version, long_version = LONG_VERSION, about, long_about = None)]
struct Args {
    /// Operation to perform
    #[clap(subcommand)]
    command: Command,

    #[clap(flatten)]
    globals: Globals,
}

/// Arguments that apply regardless of command
#[derive(Parser, Debug)]
struct Globals {
    /// Enable verbose log output
    #[clap(short = 'v', long, conflicts_with = "quiet", global = true)]
    verbose: bool,

    /// Be quiet, suppress almost all output (except errors)
    #[clap(short = 'q', long, conflicts_with = "verbose", global = true)]
    quiet: bool,

    #[clap(flatten)]
    config: s3cat::Config,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Concatenate sources, in order, into a single S3 object
    #[clap(group(ArgGroup::new("input").required(true).multiple(true)))]
    Concat {
        /// The S3 object to write, as a URL like s3://bucket/key
        #[clap(short = 'o', long, value_name = "URL")]
        output: Url,

        /// Append every object under this prefix, in key order, after any SOURCES.
        ///
        /// The filter options narrow down which objects are included.
        #[clap(long, value_name = "URL", group = "input")]
        prefix: Option<Url>,

        #[clap(flatten)]
        filter: ListFilter,

        /// The sources to concatenate, in order.
        ///
        /// Each source is either an S3 URL like s3://bucket/key, or the path to a local file.
        #[clap(value_name = "SOURCES", group = "input")]
        sources: Vec<String>,
    },

    /// List the objects under a prefix, as `concat --prefix` would see them
    Ls {
        /// The bucket and optional prefix to list, as a URL like s3://bucket/prefix/
        #[clap(value_name = "URL")]
        url: Url,

        #[clap(flatten)]
        filter: ListFilter,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();

    init_logging(&args.globals)?;

    match args.command {
        Command::Concat {
            output,
            prefix,
            filter,
            sources,
        } => concat(&args.globals, output, prefix, filter, sources).await,
        Command::Ls { url, filter } => ls(&args.globals, url, filter).await,
    }
}

/// Log to stderr, at a level controlled by `-v`/`-q` unless `RUST_LOG` says otherwise
fn init_logging(globals: &Globals) -> Result<()> {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::{fmt, EnvFilter};

    let default_filter = if globals.verbose {
        "s3cat=debug,s3cat_cli=debug,aws=info,info"
    } else if globals.quiet {
        "error"
    } else {
        "warn"
    };

    let filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(default_filter))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    Ok(())
}

async fn concat(
    globals: &Globals,
    output: Url,
    prefix: Option<Url>,
    filter: ListFilter,
    sources: Vec<String>,
) -> Result<()> {
    if prefix.is_none() && filter != ListFilter::default() {
        bail!("The filter options only apply to objects matched by --prefix");
    }

    let config = globals.config.clone();
    let store = s3cat::s3_store(&config).await;
    let target = ObjectLocation::from_url(&output)?;

    let mut builder = ConcatenateJobBuilder::new(config, store, target);

    progress::with_spinner(globals, "Resolving sources...", async {
        for source in &sources {
            builder.add_source(source).await?;
        }

        if let Some(prefix) = &prefix {
            let added = builder.add_prefix(prefix, &filter).await?;
            if added == 0 {
                warn!(%prefix, "No objects under the prefix matched");
            }
        }

        Ok::<_, s3cat::S3CatError>(())
    })
    .await?;

    let job = builder.build();

    debug!(
        target = %job.target(),
        sources = job.total_sources(),
        total_bytes = job.total_bytes(),
        "Starting concatenation"
    );

    let summary = progress::run_concat_job(globals, job).await?;

    if summary.degraded {
        warn!("Some sources were not the size they were expected to be; the output contains what was actually read");
    }

    if !globals.quiet {
        println!(
            "Wrote {} bytes to {} ({} parts, {} merges)",
            summary.total_bytes,
            output,
            summary.parts.len(),
            summary.merges
        );
    }

    Ok(())
}

async fn ls(globals: &Globals, url: Url, filter: ListFilter) -> Result<()> {
    let store = s3cat::s3_store(&globals.config).await;
    let prefix = ObjectLocation::prefix_from_url(&url)?;

    let objects = progress::with_spinner(
        globals,
        "Listing objects...",
        s3cat::list_matching(store.as_ref(), &prefix.bucket, &prefix.key, &filter),
    )
    .await?;

    for object in objects {
        let last_modified = object
            .last_modified
            .map(|timestamp| timestamp.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default();
        let size = byte_unit::Byte::from_bytes(object.size as u128)
            .get_appropriate_unit(true)
            .to_string();

        println!(
            "{last_modified:<19}  {size:>12}  s3://{}/{}",
            object.bucket, object.key
        );
    }

    Ok(())
}
