use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use gridreach_core::{
    load_grid, GridStore, Mode, PairSelection, PopulationStore, ReachabilitySummary, SourceCrs,
    DEFAULT_POPULATION_COLUMN,
};
use gridreach_extract::{build_extract, sweep, ExtractConfig};
use gridreach_geocode::{resolve_address, Geocoder, NominatimClient};
use gridreach_store_sqlite::TravelTimeStore;
use serde_json::Value;

const CLI_CONTRACT_VERSION: &str = "cli.v1";
const MIN_THRESHOLD_MINUTES: i64 = 5;
const MAX_THRESHOLD_MINUTES: i64 = 120;
const DEFAULT_USER_AGENT: &str = concat!("gridreach/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Parser)]
#[command(name = "gridreach")]
#[command(about = "Travel-time matrix reachability explorer")]
struct Cli {
    /// Travel-time matrix database.
    #[arg(long, default_value = "./gridreach.sqlite3")]
    db: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Reachable set for one origin, mode, and threshold.
    Query(QueryArgs),
    /// One reachability summary per mode, same origin and threshold.
    Compare(CompareArgs),
    /// Travel times between one origin/destination pair.
    Pair(PairArgs),
    /// Containing grid cell for a point or an address.
    Locate(LocateArgs),
    /// Write the reachable-set extract file for one query.
    Extract(ExtractArgs),
    /// Delete expired extract files.
    Sweep(SweepArgs),
    Db {
        #[command(subcommand)]
        command: DbCommand,
    },
    /// List the supported travel modes.
    Modes,
}

#[derive(Debug, Args)]
struct QueryArgs {
    #[arg(long)]
    origin: i64,
    #[arg(long, default_value = "walk_avg")]
    mode: String,
    #[arg(long, default_value_t = 30)]
    threshold: i64,
    #[command(flatten)]
    population: PopulationArgs,
}

#[derive(Debug, Args)]
struct CompareArgs {
    #[arg(long)]
    origin: i64,
    #[arg(long = "mode", required = true)]
    modes: Vec<String>,
    #[arg(long, default_value_t = 30)]
    threshold: i64,
    #[command(flatten)]
    population: PopulationArgs,
}

#[derive(Debug, Args)]
struct PairArgs {
    #[arg(long)]
    from: Option<i64>,
    #[arg(long)]
    to: Option<i64>,
    /// Cell ids in click order; every second click completes a pair.
    #[arg(long = "click")]
    clicks: Vec<i64>,
}

#[derive(Debug, Args)]
struct LocateArgs {
    #[command(flatten)]
    grid: GridArgs,
    #[arg(long)]
    lon: Option<f64>,
    #[arg(long)]
    lat: Option<f64>,
    /// Free-text address, resolved via the geocoding service.
    #[arg(long)]
    address: Option<String>,
    #[arg(long, default_value = DEFAULT_USER_AGENT)]
    user_agent: String,
    /// Geocoding service URL, for self-hosted instances.
    #[arg(long, default_value = gridreach_geocode::DEFAULT_NOMINATIM_ENDPOINT)]
    geocoder_endpoint: String,
}

#[derive(Debug, Args)]
struct ExtractArgs {
    #[arg(long)]
    origin: i64,
    #[arg(long, default_value = "walk_avg")]
    mode: String,
    #[arg(long, default_value_t = 30)]
    threshold: i64,
    #[command(flatten)]
    grid: GridArgs,
    /// Directory holding the per-origin matrix exports.
    #[arg(long)]
    matrix_dir: PathBuf,
    #[arg(long)]
    out_dir: PathBuf,
    #[arg(long, default_value_t = 7)]
    max_age_days: u64,
    /// Extract file names the sweep must keep.
    #[arg(long = "protect")]
    protected: Vec<String>,
}

#[derive(Debug, Args)]
struct SweepArgs {
    #[arg(long)]
    dir: PathBuf,
    #[arg(long, default_value_t = 7)]
    max_age_days: u64,
    #[arg(long = "protect")]
    protected: Vec<String>,
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    /// Create the matrix table and indexes.
    Init,
    /// Load per-origin CSV exports into the matrix table.
    Import(DbImportArgs),
}

#[derive(Debug, Args)]
struct DbImportArgs {
    #[arg(long)]
    dir: PathBuf,
}

#[derive(Debug, Args)]
struct GridArgs {
    /// Grid cell GeoJSON file.
    #[arg(long)]
    grid: PathBuf,
    /// Coordinate system of the grid file: `tm35fin` or `wgs84`.
    #[arg(long, default_value = "tm35fin")]
    grid_crs: String,
}

#[derive(Debug, Args)]
struct PopulationArgs {
    /// Population CSV; summaries report zero residents without it.
    #[arg(long)]
    population: Option<PathBuf>,
    #[arg(long, default_value = DEFAULT_POPULATION_COLUMN)]
    population_column: String,
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Query(args) => run_query(&args, &cli.db),
        Command::Compare(args) => run_compare(&args, &cli.db),
        Command::Pair(args) => run_pair(&args, &cli.db),
        Command::Locate(args) => run_locate(&args),
        Command::Extract(args) => run_extract(&args, &cli.db),
        Command::Sweep(args) => run_sweep(&args),
        Command::Db { command } => run_db(&command, &cli.db),
        Command::Modes => run_modes(),
    }
}

fn parse_mode(raw: &str) -> Result<Mode> {
    Mode::parse(raw).ok_or_else(|| {
        let valid = Mode::ALL
            .iter()
            .map(|mode| mode.column())
            .collect::<Vec<_>>()
            .join(", ");
        anyhow!("unknown mode `{raw}`; valid modes are: {valid}")
    })
}

fn check_threshold(minutes: i64) -> Result<()> {
    if !(MIN_THRESHOLD_MINUTES..=MAX_THRESHOLD_MINUTES).contains(&minutes) {
        bail!(
            "threshold must be between {MIN_THRESHOLD_MINUTES} and {MAX_THRESHOLD_MINUTES} \
             minutes, got {minutes}"
        );
    }
    Ok(())
}

fn open_store(db: &Path) -> Result<TravelTimeStore> {
    TravelTimeStore::open(db)
        .with_context(|| format!("failed to open travel-time database {}", db.display()))
}

fn load_grid_store(args: &GridArgs) -> Result<GridStore> {
    let crs = SourceCrs::parse(&args.grid_crs)
        .ok_or_else(|| anyhow!("unknown grid CRS `{}`; use `tm35fin` or `wgs84`", args.grid_crs))?;
    load_grid(&args.grid, crs)
        .with_context(|| format!("failed to load grid file {}", args.grid.display()))
}

fn load_population(args: &PopulationArgs) -> Result<PopulationStore> {
    match args.population.as_ref() {
        Some(path) => PopulationStore::load(path, &args.population_column)
            .with_context(|| format!("failed to load population file {}", path.display())),
        None => Ok(PopulationStore::default()),
    }
}

fn run_query(args: &QueryArgs, db: &Path) -> Result<()> {
    check_threshold(args.threshold)?;
    let mode = parse_mode(&args.mode)?;
    let store = open_store(db)?;
    let population = load_population(&args.population)?;

    let origin = gridreach_core::CellId(args.origin);
    #[allow(clippy::cast_precision_loss)]
    let destinations = store.reachable(mode, args.threshold as f64, origin)?;
    tracing::debug!(
        origin = %origin,
        mode = %mode,
        cells = destinations.len(),
        "reachability query done"
    );
    let summary =
        ReachabilitySummary::new(origin, mode, args.threshold, &destinations, &population);

    emit_json(serde_json::json!({
        "summary": summary,
        "destinations": destinations,
    }))
}

fn run_compare(args: &CompareArgs, db: &Path) -> Result<()> {
    check_threshold(args.threshold)?;
    let modes = args
        .modes
        .iter()
        .map(|raw| parse_mode(raw))
        .collect::<Result<Vec<Mode>>>()?;

    let store = open_store(db)?;
    let population = load_population(&args.population)?;
    let origin = gridreach_core::CellId(args.origin);

    let mut results = Vec::with_capacity(modes.len());
    for mode in modes {
        #[allow(clippy::cast_precision_loss)]
        let destinations = store.reachable(mode, args.threshold as f64, origin)?;
        results.push(ReachabilitySummary::new(
            origin,
            mode,
            args.threshold,
            &destinations,
            &population,
        ));
    }

    emit_json(serde_json::json!({
        "origin": origin,
        "threshold_minutes": args.threshold,
        "results": results,
    }))
}

fn run_pair(args: &PairArgs, db: &Path) -> Result<()> {
    let store = open_store(db)?;

    if !args.clicks.is_empty() {
        if args.from.is_some() || args.to.is_some() {
            bail!("use either --click or --from/--to, not both");
        }
        return run_pair_clicks(&args.clicks, &store);
    }

    let (Some(from), Some(to)) = (args.from, args.to) else {
        bail!("pair needs --from and --to, or a sequence of --click ids");
    };
    let from = gridreach_core::CellId(from);
    let to = gridreach_core::CellId(to);

    emit_json(pair_value(&store, from, to)?)
}

/// Fold a click sequence through the selection state machine: every
/// second click completes a pair, a trailing odd click stays pending.
fn run_pair_clicks(clicks: &[i64], store: &TravelTimeStore) -> Result<()> {
    let mut selection = PairSelection::new();
    let mut pairs = Vec::new();
    for click in clicks {
        let (next, emitted) = selection.click(gridreach_core::CellId(*click));
        selection = next;
        if let Some(pair) = emitted {
            pairs.push(pair_value(store, pair.from, pair.to)?);
        }
    }

    emit_json(serde_json::json!({
        "pairs": pairs,
        "pending": selection.pending(),
    }))
}

fn pair_value(
    store: &TravelTimeStore,
    from: gridreach_core::CellId,
    to: gridreach_core::CellId,
) -> Result<Value> {
    let value = match store.pair(from, to)? {
        Some(times) => serde_json::json!({
            "found": true,
            "times": times,
        }),
        None => serde_json::json!({
            "found": false,
            "from": from,
            "to": to,
        }),
    };
    Ok(value)
}

fn run_locate(args: &LocateArgs) -> Result<()> {
    let grid = load_grid_store(&args.grid)?;

    let cell = match (&args.address, args.lon, args.lat) {
        (Some(address), None, None) => {
            let geocoder = NominatimClient::new(args.user_agent.clone())
                .with_endpoint(args.geocoder_endpoint.clone());
            locate_address(&geocoder, &grid, address)?
        }
        (None, Some(lon), Some(lat)) => grid.locate(geo::Point::new(lon, lat)),
        _ => bail!("locate needs either --lon and --lat, or --address"),
    };

    let map_center = grid.map_center().map(|center| {
        serde_json::json!({
            "lon": center.x(),
            "lat": center.y(),
        })
    });

    emit_json(serde_json::json!({
        "cell": cell,
        "found": cell.is_some(),
        "map_center": map_center,
    }))
}

fn locate_address(
    geocoder: &dyn Geocoder,
    grid: &GridStore,
    address: &str,
) -> Result<Option<gridreach_core::CellId>> {
    use gridreach_geocode::GeocodeError;
    match resolve_address(geocoder, grid, address) {
        Ok(cell) => Ok(Some(cell)),
        Err(GeocodeError::AddressNotFound(_) | GeocodeError::OutsideCoverage(_)) => Ok(None),
        Err(err @ GeocodeError::Service(_)) => Err(err.into()),
    }
}

fn run_extract(args: &ExtractArgs, db: &Path) -> Result<()> {
    check_threshold(args.threshold)?;
    let mode = parse_mode(&args.mode)?;

    let store = open_store(db)?;
    let grid = load_grid_store(&args.grid)?;
    let origin = gridreach_core::CellId(args.origin);
    #[allow(clippy::cast_precision_loss)]
    let destinations = store.reachable(mode, args.threshold as f64, origin)?;

    std::fs::create_dir_all(&args.out_dir)
        .with_context(|| format!("failed to create output directory {}", args.out_dir.display()))?;

    let config = ExtractConfig {
        max_age_days: args.max_age_days,
        protected: args.protected.iter().cloned().collect::<BTreeSet<_>>(),
        ..ExtractConfig::default()
    };

    // Expired extracts are swept on every build so the directory stays
    // bounded without a separate scheduler.
    let sweep_report = sweep(&args.out_dir, &config)?;
    let outcome = build_extract(
        &grid,
        &destinations,
        origin,
        &args.matrix_dir,
        &args.out_dir,
        &config,
    )?;

    // The raw per-origin export doubles as a downloadable artifact.
    let per_origin_csv = args
        .matrix_dir
        .join(format!("{}{}.csv", config.file_prefix, origin));

    emit_json(serde_json::json!({
        "origin": origin,
        "mode": mode,
        "threshold_minutes": args.threshold,
        "reachable_cells": destinations.len(),
        "extract": outcome,
        "per_origin_csv": per_origin_csv.is_file().then_some(per_origin_csv),
        "sweep": sweep_report,
    }))
}

fn run_sweep(args: &SweepArgs) -> Result<()> {
    let config = ExtractConfig {
        max_age_days: args.max_age_days,
        protected: args.protected.iter().cloned().collect::<BTreeSet<_>>(),
        ..ExtractConfig::default()
    };
    let report = sweep(&args.dir, &config)?;
    emit_json(serde_json::json!({
        "dir": args.dir,
        "max_age_days": args.max_age_days,
        "report": report,
    }))
}

fn run_db(command: &DbCommand, db: &Path) -> Result<()> {
    match command {
        DbCommand::Init => {
            let store = open_store(db)?;
            store.init_schema()?;
            emit_json(serde_json::json!({
                "db": db,
                "status": "initialized",
            }))
        }
        DbCommand::Import(args) => {
            let mut store = open_store(db)?;
            store.init_schema()?;
            let summary = store
                .import_matrix_csv(&args.dir)
                .with_context(|| format!("failed to import matrix from {}", args.dir.display()))?;
            emit_json(serde_json::json!({
                "db": db,
                "dir": args.dir,
                "summary": summary,
            }))
        }
    }
}

fn run_modes() -> Result<()> {
    let modes: Vec<Value> = Mode::ALL
        .iter()
        .map(|mode| {
            serde_json::json!({
                "key": mode.column(),
                "label": mode.label(),
            })
        })
        .collect();
    emit_json(serde_json::json!({ "modes": modes }))
}
