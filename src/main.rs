use std::io::{BufRead, Write};
use std::path::PathBuf;

use airtable_enrich::airtable::{AirtableClient, DEFAULT_API_URL};
use airtable_enrich::fill::{apply_updates, plan_updates, FillOptions};
use airtable_enrich::geocoder::CensusGeocoder;
use airtable_enrich::lookup::TractLookup;
use airtable_enrich::table::Table;
use anyhow::{bail, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

// Census Bureau cartographic boundary file for California tracts
const DEFAULT_TRACT_FILE: &str = "data/cb_2019_06_tract_500k.zip";

#[derive(Parser)]
#[command(name = "airtable-enrich", about = "Run airtable-enrich", version)]
struct Cli {
    /// Log more detail (overridden by RUST_LOG)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the head of the table
    Head {
        #[command(flatten)]
        table: TableArgs,
        #[arg(long, default_value_t = 5)]
        limit: usize,
    },
    /// Print the fields of the table
    Fields {
        #[command(flatten)]
        table: TableArgs,
    },
    /// Fill a census tract column from each row's lat-lng
    FillCensus(FillCensusArgs),
    /// Get the library version
    Version,
}

#[derive(Args)]
struct TableArgs {
    /// Airtable base id
    #[arg(long)]
    base: String,
    #[arg(long)]
    table: String,
    #[arg(long, env = "AIRTABLE_APIKEY", hide_env_values = true)]
    apikey: String,
    #[arg(long, env = "AIRTABLE_API_URL", default_value = DEFAULT_API_URL)]
    api_url: String,
    /// Retries for rate-limited or failed requests
    #[arg(long, default_value_t = 3)]
    max_retries: u32,
}

impl TableArgs {
    fn client(&self) -> Result<AirtableClient> {
        Ok(
            AirtableClient::new(&self.api_url, &self.base, &self.table, &self.apikey)?
                .with_max_retries(self.max_retries),
        )
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum Engine {
    /// Point-in-polygon against a local tract boundary file
    Shapefile,
    /// US Census Bureau geocoder web service
    Geocoder,
}

#[derive(Args)]
struct FillCensusArgs {
    #[command(flatten)]
    table: TableArgs,
    /// Latitude column
    #[arg(long = "lat")]
    lat_field: String,
    /// Longitude column
    #[arg(long = "lng")]
    lng_field: String,
    /// Column to write the tract GEOID into
    #[arg(long = "tract")]
    tract_field: String,
    /// Only process the first N rows
    #[arg(long)]
    limit: Option<usize>,
    /// Apply updates without asking
    #[arg(long)]
    no_confirm: bool,
    /// Replace existing tract values that differ
    #[arg(long = "override")]
    override_existing: bool,
    #[arg(long, value_enum, default_value_t = Engine::Shapefile)]
    engine: Engine,
    /// Tract boundaries (.shp, zipped shapefile or GeoJSON)
    #[arg(long, default_value = DEFAULT_TRACT_FILE)]
    shapefile: PathBuf,
    /// Attribute holding the tract code
    #[arg(long, default_value = census::DEFAULT_GEOID_FIELD)]
    geoid_field: String,
    /// Write GEOIDs as-is instead of stripping leading zeros
    #[arg(long)]
    keep_leading_zeros: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // AIRTABLE_APIKEY usually lives in a .env file; real environment variables win
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Command::Head { table, limit } => {
            for record in table.client()?.records(Some(limit)).await? {
                println!("{}", serde_json::to_string(&record)?);
            }
        }
        Command::Fields { table } => {
            let records = table.client()?.records(Some(1)).await?;
            let fields: Vec<&String> = records
                .first()
                .map(|record| record.fields.keys().collect())
                .unwrap_or_default();
            println!("{}", serde_json::to_string(&fields)?);
        }
        Command::FillCensus(args) => fill_census(args).await?,
        Command::Version => println!("{}", env!("CARGO_PKG_VERSION")),
    }
    Ok(())
}

async fn fill_census(args: FillCensusArgs) -> Result<()> {
    // Load geography first so a bad boundary file fails before any API traffic
    let lookup: Box<dyn TractLookup> = match args.engine {
        Engine::Shapefile => Box::new(
            census::load_tracts(&args.shapefile, &args.geoid_field)
                .context("loading tract boundaries")?,
        ),
        Engine::Geocoder => Box::new(CensusGeocoder::new()?),
    };
    let table = args.table.client()?;
    let options = FillOptions {
        lat_field: args.lat_field,
        lng_field: args.lng_field,
        tract_field: args.tract_field,
        override_existing: args.override_existing,
        strip_leading_zeros: !args.keep_leading_zeros,
    };

    let plan = plan_updates(&table, lookup.as_ref(), &options, args.limit).await?;
    let mut summary = plan.summary;
    let Some(example) = plan.updates.first() else {
        println!("No rows needed to be updated.");
        info!(?summary, "done");
        return Ok(());
    };

    let example_value = example
        .fields
        .get(&options.tract_field)
        .and_then(|v| v.as_str())
        .unwrap_or("<empty>");
    let prompt = format!(
        "Apply {} updates e.g. {}={}?",
        plan.updates.len(),
        options.tract_field,
        example_value
    );
    if args.no_confirm {
        println!("{prompt}");
    } else if !confirm(&prompt)? {
        bail!("Aborted!");
    }

    apply_updates(&table, &plan.updates, &mut summary).await;
    info!(
        fetched = summary.fetched,
        updated = summary.updated,
        unchanged = summary.unchanged,
        skipped = summary.skipped,
        failed = summary.failed,
        "done"
    );
    if summary.failed > 0 {
        bail!("{} of {} row updates failed", summary.failed, plan.updates.len());
    }
    Ok(())
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{prompt} [y/N]: ");
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}

fn init_tracing(verbose: u8) {
    let default = if verbose > 0 { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
