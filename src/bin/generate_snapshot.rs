//! Synthetic Snapshot Generator
//!
//! Writes a data directory for `cauldron-ops`:
//! - `entities.json`: cauldron metadata
//! - `samples.json`: one noisy level reading per minute per cauldron
//! - `tickets.json`: transport tickets, most honest, some mis-declared
//! - `edges.json`: star-plus-ring travel graph around the market
//!
//! Some courier drains are deliberately left without a ticket so the
//! reconciler has unlogged activity to find.
//!
//! # Usage
//! ```bash
//! ./generate-snapshot --out data --entities 8 --hours 48 --seed 7
//! ```

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Duration, DurationRound, NaiveDate, Utc};
use clap::Parser;
use rand::prelude::*;
use rand_distr::{Distribution, Normal};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tracing::info;

// ============================================================================
// Generation Constants
// ============================================================================

/// Potion names cycled over the generated cauldrons
const NAMES: [&str; 8] = [
    "Crimson Brew", "Azure Elixir", "Emerald Draught", "Golden Tonic",
    "Violet Philter", "Amber Essence", "Silver Serum", "Obsidian Ooze",
];
/// Fill level that triggers a courier visit (fraction of capacity)
const VISIT_TRIGGER: f64 = 0.75;
/// Courier pickup bounds (units)
const PICKUP_RANGE: (f64, f64) = (60.0, 100.0);
/// Courier drain speed bounds (units/min)
const DRAIN_SPEED_RANGE: (f64, f64) = (20.0, 35.0);
/// Share of drains with an honest ticket; the rest split between
/// inflated tickets and no ticket at all
const HONEST_SHARE: f64 = 0.8;
const INFLATED_SHARE: f64 = 0.1;
/// Inflation factor of mis-declared tickets
const INFLATION: f64 = 2.5;
/// Depot node id
const DEPOT: &str = "market";

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "generate-snapshot")]
#[command(about = "Synthetic cauldron snapshot generator for cauldron-ops testing")]
#[command(version)]
struct Args {
    /// Output directory (created if missing)
    #[arg(long, default_value = "data")]
    out: PathBuf,

    /// Number of cauldrons
    #[arg(long, default_value = "8", value_parser = clap::value_parser!(u32).range(1..=500))]
    entities: u32,

    /// Hours of history, ending now
    #[arg(long, default_value = "24", value_parser = clap::value_parser!(u32).range(1..=720))]
    hours: u32,

    /// Random seed for reproducibility
    #[arg(long)]
    seed: Option<u64>,
}

// ============================================================================
// Simulation State
// ============================================================================

struct CauldronSim {
    id: String,
    capacity: f64,
    fill_rate: f64,
    level: f64,
    /// Remaining units and speed of an in-progress courier drain
    drain: Option<(f64, f64)>,
    /// Start time and total pickup of the current drain
    visit: Option<(DateTime<Utc>, f64)>,
}

struct Generator {
    rng: StdRng,
    noise: Normal<f64>,
    tickets: Vec<Value>,
    unlogged: usize,
    inflated: usize,
}

impl Generator {
    fn new(seed: Option<u64>) -> Result<Self> {
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        Ok(Self {
            rng,
            noise: Normal::new(0.0, 0.15).map_err(|e| anyhow!("noise distribution: {e}"))?,
            tickets: Vec::new(),
            unlogged: 0,
            inflated: 0,
        })
    }

    fn cauldrons(&mut self, count: u32) -> Vec<CauldronSim> {
        (1..=count)
            .map(|i| {
                let capacity = self.rng.gen_range(600.0..1200.0_f64).round();
                CauldronSim {
                    id: format!("cauldron_{i:03}"),
                    capacity,
                    fill_rate: self.rng.gen_range(0.3..1.5),
                    level: capacity * self.rng.gen_range(0.2..0.4),
                    drain: None,
                    visit: None,
                }
            })
            .collect()
    }

    /// Advance one cauldron by one minute and return its reading.
    fn step(&mut self, c: &mut CauldronSim, ts: DateTime<Utc>) -> f64 {
        c.level += c.fill_rate;

        if c.drain.is_none() && c.level >= c.capacity * VISIT_TRIGGER {
            let pickup = self.rng.gen_range(PICKUP_RANGE.0..PICKUP_RANGE.1);
            let speed = self.rng.gen_range(DRAIN_SPEED_RANGE.0..DRAIN_SPEED_RANGE.1);
            c.drain = Some((pickup, speed));
            c.visit = Some((ts, pickup));
        }

        if let Some((remaining, speed)) = c.drain {
            let take = remaining.min(speed);
            c.level -= take;
            c.drain = (remaining - take > 0.0).then_some((remaining - take, speed));
            if c.drain.is_none() {
                if let Some((start, pickup)) = c.visit.take() {
                    self.log_ticket(&c.id, start.date_naive(), pickup);
                }
            }
        }

        c.level = c.level.clamp(0.0, c.capacity);
        (c.level + self.noise.sample(&mut self.rng)).max(0.0)
    }

    fn log_ticket(&mut self, cauldron_id: &str, day: NaiveDate, collected: f64) {
        let roll: f64 = self.rng.gen();
        let declared = if roll < HONEST_SHARE {
            collected * (1.0 + self.rng.gen_range(-0.03..0.03))
        } else if roll < HONEST_SHARE + INFLATED_SHARE {
            self.inflated += 1;
            collected * INFLATION
        } else {
            self.unlogged += 1;
            return;
        };

        let n = self.tickets.len() + 1;
        self.tickets.push(json!({
            "ticket_id": format!("T-{}-{n:04}", day.format("%Y%m%d")),
            "cauldron_id": cauldron_id,
            "date": day.format("%Y-%m-%d").to_string(),
            "amount_collected": (declared * 100.0).round() / 100.0,
            "status": "pending",
        }));
    }

    fn edges(&mut self, cauldrons: &[CauldronSim]) -> Vec<Value> {
        let mut edges: Vec<Value> = cauldrons
            .iter()
            .map(|c| {
                json!({
                    "from": DEPOT,
                    "to": c.id,
                    "travel_time": self.rng.gen_range(5.0..30.0_f64).round(),
                })
            })
            .collect();

        if cauldrons.len() > 2 {
            for (i, c) in cauldrons.iter().enumerate() {
                let next = &cauldrons[(i + 1) % cauldrons.len()];
                edges.push(json!({
                    "from": c.id,
                    "to": next.id,
                    "travel_time": self.rng.gen_range(3.0..15.0_f64).round(),
                }));
            }
        }
        edges
    }
}

// ============================================================================
// Main
// ============================================================================

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = Args::parse();
    let mut generator = Generator::new(args.seed)?;
    let mut cauldrons = generator.cauldrons(args.entities);

    let end = Utc::now()
        .duration_trunc(Duration::minutes(1))
        .context("truncating start time")?;
    let minutes = i64::from(args.hours) * 60;
    let start = end - Duration::minutes(minutes);

    let mut samples = Vec::with_capacity(cauldrons.len() * minutes as usize);
    for m in 0..=minutes {
        let ts = start + Duration::minutes(m);
        for c in cauldrons.iter_mut() {
            let level = generator.step(c, ts);
            samples.push(json!({
                "cauldron_id": c.id,
                "timestamp": ts.to_rfc3339(),
                "level": (level * 100.0).round() / 100.0,
            }));
        }
    }

    let entities: Vec<Value> = cauldrons
        .iter()
        .enumerate()
        .map(|(i, c)| {
            json!({
                "id": c.id,
                "name": NAMES[i % NAMES.len()],
                "max_volume": c.capacity,
            })
        })
        .collect();
    let edges = generator.edges(&cauldrons);

    std::fs::create_dir_all(&args.out)
        .with_context(|| format!("creating {}", args.out.display()))?;
    write_json(&args.out, "entities.json", &json!({ "cauldrons": entities }))?;
    write_json(&args.out, "samples.json", &json!({ "data": samples }))?;
    write_json(&args.out, "tickets.json", &json!({ "tickets": generator.tickets }))?;
    write_json(&args.out, "edges.json", &json!({ "edges": edges }))?;

    info!(
        out = %args.out.display(),
        entities = args.entities,
        samples = samples.len(),
        tickets = generator.tickets.len(),
        inflated = generator.inflated,
        unlogged = generator.unlogged,
        "Snapshot written"
    );
    if let Some(seed) = args.seed {
        info!(seed, "Random seed");
    }
    Ok(())
}

fn write_json(dir: &Path, file: &str, value: &Value) -> Result<()> {
    let path = dir.join(file);
    let contents = serde_json::to_string_pretty(value).context("serializing snapshot")?;
    std::fs::write(&path, contents).with_context(|| format!("writing {}", path.display()))
}
