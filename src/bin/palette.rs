use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use progressive_palette_wasm::extract_palette_bytes;
use progressive_palette_wasm::worker::GraphNode;
use progressive_palette_wasm::{ClusterEngine, DistanceMethod, Outbox, PaletteOptions, Profile, WorkerMessage};

/// Extract dominant color palettes from images with progressive k-means.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// One or more input image paths
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Maximum number of palette colors
    #[arg(short = 'k', long, default_value_t = 10)]
    palette_size: usize,

    /// Clustering iterations per resolution level
    #[arg(short, long, default_value_t = 10)]
    iterations: usize,

    /// Minimum separation between palette colors, in hue degrees
    #[arg(short, long, default_value_t = 30.0)]
    tolerance: f64,

    /// Keep near-duplicate colors
    #[arg(long)]
    no_tolerance: bool,

    /// hsv-max, hsv-avg, hsl-max, hsl-avg or max-hsv-hsl
    #[arg(short, long, default_value = "hsv-max")]
    distance: DistanceMethod,

    /// Use the low-power profile (fewer levels, frequent pauses)
    #[arg(long)]
    constrained: bool,

    /// Honour the profile's pauses instead of running flat out
    #[arg(long)]
    throttle: bool,

    /// Run the scheduled clustering engine at every level
    #[arg(long)]
    scheduled: bool,

    /// Print the palette of every input as JSON
    #[arg(long)]
    json: bool,
}

impl Args {
    fn options(&self) -> PaletteOptions {
        PaletteOptions {
            iterations: self.iterations,
            palette_size: self.palette_size,
            hsv_tolerance: self.tolerance,
            tolerance_enabled: !self.no_tolerance,
            distance_method: self.distance,
            profile: if self.constrained { Profile::Constrained } else { Profile::Standard },
            engine: if self.scheduled { ClusterEngine::Scheduled } else { ClusterEngine::Advanced },
        }
    }
}

fn log_message(message: WorkerMessage) {
    match message {
        WorkerMessage::Progress(progress) => {
            let preview = progress.processing_palette.map_or(0, |p| p.len());
            info!(percent = progress.progress_update, preview, "{}", progress.status);
        }
        other => debug!(terminal = ?other, "worker message"),
    }
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr).without_time())
        .init();

    let args = Args::parse();
    let options = args.options();

    let mut report = serde_json::Map::new();
    for input in &args.inputs {
        let bytes = fs::read(input).with_context(|| format!("reading {}", input.display()))?;
        let mut outbox = Outbox::new(log_message).blocking_pauses(args.throttle);
        let palette = extract_palette_bytes(&bytes, &options, &mut outbox)
            .with_context(|| format!("palette extraction failed for {}", input.display()))?;

        if args.json {
            let nodes: Vec<GraphNode> = palette.iter().map(GraphNode::from).collect();
            report.insert(input.display().to_string(), serde_json::to_value(nodes)?);
        } else {
            println!("{}", input.display());
            for entry in &palette {
                println!("  {}  {}  at ({}, {})", entry.hex, entry.color, entry.x, entry.y);
            }
        }
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    Ok(())
}
