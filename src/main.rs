//! `visit-clusters` - find significant places in a location-history export.
//!
//! Subcommands:
//! - `parse`   - flatten the export into visits/activities CSV
//! - `cluster` - DBSCAN the visits and write significant clusters
//! - `label`   - cluster, look up each centroid, classify, write places
//! - `map`     - render HTML and SVG maps from a places CSV
//! - `run`     - everything above
//! - `review`  - print the most-visited places for manual checking

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use log::{info, warn};

use visit_clusters::pipeline::lookups_by_cluster;
use visit_clusters::places::ProgressCallback;
use visit_clusters::report::{self, PlaceRecord};
use visit_clusters::{label_places, load_export, render, Analysis, Config, Export, LabeledPlace, PlacesClient};

/// Find the places that matter in a Google Takeout location history
#[derive(Parser, Debug)]
#[command(name = "visit-clusters", version, about)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug, Clone, Default)]
struct InputArgs {
    /// Takeout JSON export
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Keep entries on or after this date (YYYY-MM-DD or RFC 3339)
    #[arg(long)]
    start: Option<String>,

    /// Keep entries before this date (YYYY-MM-DD or RFC 3339)
    #[arg(long)]
    end: Option<String>,

    /// Output directory
    #[arg(short, long)]
    out: Option<PathBuf>,
}

#[derive(Args, Debug, Clone, Default)]
struct ClusterArgs {
    #[command(flatten)]
    input: InputArgs,

    /// DBSCAN radius in meters
    #[arg(long)]
    eps: Option<f64>,

    /// DBSCAN minimum neighbourhood size
    #[arg(long)]
    min_samples: Option<usize>,

    /// Minimum visits for a cluster to count as a place
    #[arg(long)]
    min_visits: Option<u32>,

    /// Also cluster activity start and end points
    #[arg(long)]
    include_activities: bool,
}

#[derive(Args, Debug, Clone)]
struct LabelArgs {
    #[command(flatten)]
    cluster: ClusterArgs,

    /// Skip the places API and classify from local signals only
    #[arg(long)]
    offline: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write visits.csv, activities.csv and daily_visits.csv
    Parse(InputArgs),
    /// Write clusters.csv with every significant cluster
    Cluster(ClusterArgs),
    /// Write places.csv and places.geojson
    Label(LabelArgs),
    /// Render map.html and map.svg from a places CSV
    Map {
        /// Places CSV (defaults to <out>/places.csv)
        #[arg(long)]
        places: Option<PathBuf>,

        /// Output directory
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Parse, cluster, label and map in one go
    Run(LabelArgs),
    /// Print the most-visited places from a places CSV
    Review {
        /// Places CSV (defaults to <out>/places.csv)
        #[arg(long)]
        places: Option<PathBuf>,

        /// Output directory holding places.csv
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Number of places to show
        #[arg(short = 'n', long, default_value = "10")]
        count: usize,
    },
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default))
        .format_timestamp_secs()
        .init();
}

fn apply_input(config: &mut Config, args: &InputArgs) {
    if let Some(ref input) = args.input {
        config.input.path = Some(input.clone());
    }
    if args.start.is_some() {
        config.input.start = args.start.clone();
    }
    if args.end.is_some() {
        config.input.end = args.end.clone();
    }
    if let Some(ref out) = args.out {
        config.output.dir = out.clone();
    }
}

fn apply_cluster(config: &mut Config, args: &ClusterArgs) {
    apply_input(config, &args.input);
    if let Some(eps) = args.eps {
        config.clustering.eps_meters = eps;
    }
    if let Some(n) = args.min_samples {
        config.clustering.min_samples = n;
    }
    if let Some(n) = args.min_visits {
        config.clustering.min_visits = n;
    }
    if args.include_activities {
        config.clustering.include_activities = true;
    }
}

fn read_export(config: &Config) -> Result<Export> {
    let Some(ref path) = config.input.path else {
        bail!("no input export given (use --input or [input] path)");
    };
    let export = load_export(path).with_context(|| format!("loading {}", path.display()))?;
    info!(
        "Loaded {} visits and {} activities from {} ({} entries skipped)",
        export.visits.len(),
        export.activities.len(),
        path.display(),
        export.skipped
    );
    Ok(export)
}

fn output_dir(config: &Config) -> Result<PathBuf> {
    let dir = config.output.dir.clone();
    fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
    Ok(dir)
}

fn cmd_parse(config: &Config, export: &Export) -> Result<()> {
    let range = config.input.date_range()?;
    let export = export.filtered(&range);
    let dir = output_dir(config)?;

    report::write_visits_csv(&dir.join("visits.csv"), &export)?;
    report::write_activities_csv(&dir.join("activities.csv"), &export)?;
    let samples = export.samples(&range, false);
    report::write_daily_counts_csv(&dir.join("daily_visits.csv"), &samples)?;
    Ok(())
}

fn cmd_cluster(config: &Config, export: &Export) -> Result<Analysis> {
    let analysis = Analysis::run(export, config)?;
    let dir = output_dir(config)?;
    report::write_clusters_csv(&dir.join("clusters.csv"), &analysis.significant)?;
    Ok(analysis)
}

async fn cmd_label(config: &Config, export: &Export, offline: bool) -> Result<Vec<LabeledPlace>> {
    let analysis = cmd_cluster(config, export)?;

    let lookups = if offline || analysis.significant.is_empty() {
        HashMap::new()
    } else {
        let client = PlacesClient::from_config(config.places.clone())
            .context("places lookup needs an API key (or pass --offline)")?;
        let progress: ProgressCallback = Arc::new(|done, total| {
            if done == total || done % 10 == 0 {
                info!("Looked up {}/{} places", done, total);
            }
        });
        let results = client.lookup_all(analysis.place_requests(), Some(progress)).await;
        for failed in results.iter().filter(|r| !r.success) {
            warn!(
                "Lookup failed for cluster {}: {}",
                failed.cluster_id,
                failed.error.as_deref().unwrap_or("unknown error")
            );
        }
        lookups_by_cluster(results)
    };

    let places = label_places(&analysis.significant, &lookups, analysis.home_cluster, &config.classify);

    let dir = output_dir(config)?;
    report::write_places_csv(&dir.join("places.csv"), &places)?;
    let records: Vec<PlaceRecord> = places.iter().map(PlaceRecord::from).collect();
    report::write_geojson(&dir.join("places.geojson"), &records)?;
    Ok(places)
}

fn cmd_map(records: &[PlaceRecord], dir: &Path) -> Result<()> {
    if records.is_empty() {
        warn!("No places to map");
        return Ok(());
    }
    render::write_html_map(&dir.join("map.html"), records)?;
    render::write_svg_map(&dir.join("map.svg"), records)?;
    Ok(())
}

fn places_path(config: &Config, places: Option<PathBuf>) -> PathBuf {
    places.unwrap_or_else(|| config.output.dir.join("places.csv"))
}

fn read_places(path: &Path) -> Result<Vec<PlaceRecord>> {
    report::read_places_csv(path).with_context(|| format!("reading {}", path.display()))
}

fn print_review(records: &[PlaceRecord], n: usize) {
    println!("{:>7}  {:>6}  {:<9}  {:<40}  {}", "cluster", "visits", "category", "name", "location");
    for r in report::review_sample(records, n) {
        println!(
            "{:>7}  {:>6}  {:<9}  {:<40}  {:.5},{:.5}",
            r.cluster,
            r.visits,
            r.category,
            r.label(),
            r.latitude,
            r.longitude
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = Config::load(cli.config.as_deref())
        .with_context(|| format!("loading config {:?}", cli.config))?;

    match cli.command {
        Command::Parse(args) => {
            apply_input(&mut config, &args);
            config.validate()?;
            cmd_parse(&config, &read_export(&config)?)?;
        }
        Command::Cluster(args) => {
            apply_cluster(&mut config, &args);
            config.validate()?;
            cmd_cluster(&config, &read_export(&config)?)?;
        }
        Command::Label(args) => {
            apply_cluster(&mut config, &args.cluster);
            config.validate()?;
            cmd_label(&config, &read_export(&config)?, args.offline).await?;
        }
        Command::Map { places, out } => {
            if let Some(out) = out {
                config.output.dir = out;
            }
            let records = read_places(&places_path(&config, places))?;
            cmd_map(&records, &output_dir(&config)?)?;
        }
        Command::Run(args) => {
            apply_cluster(&mut config, &args.cluster);
            config.validate()?;
            let export = read_export(&config)?;
            cmd_parse(&config, &export)?;
            let places = cmd_label(&config, &export, args.offline).await?;
            let records: Vec<PlaceRecord> = places.iter().map(PlaceRecord::from).collect();
            cmd_map(&records, &output_dir(&config)?)?;
            print_review(&records, 10);
        }
        Command::Review { places, out, count } => {
            if let Some(out) = out {
                config.output.dir = out;
            }
            let records = read_places(&places_path(&config, places))?;
            print_review(&records, count);
        }
    }

    Ok(())
}
