#![deny(warnings)]

//! Headless CLI: runs a fulfillment scenario tick by tick (or paced in real
//! time) and prints KPIs.

use anyhow::{Context, Result};
use persistence::{
    default_snapshot_path, load_snapshot, save_snapshot, spawn_event_writer, JsonlEventLog,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use sim_core::*;
use sim_runtime::{channel_sink, Driver, Simulation};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn, Level};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Default)]
struct Args {
    scenario: Option<PathBuf>,
    ticks: Option<u64>,
    seed: Option<u64>,
    events: Option<PathBuf>,
    snapshot: Option<PathBuf>,
    resume: bool,
    realtime: bool,
    version: bool,
}

fn parse_args() -> Args {
    let mut args = Args::default();
    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--scenario" => args.scenario = it.next().map(PathBuf::from),
            "--ticks" => args.ticks = it.next().and_then(|s| s.parse().ok()),
            "--seed" => args.seed = it.next().and_then(|s| s.parse().ok()),
            "--events" => args.events = it.next().map(PathBuf::from),
            "--snapshot" => args.snapshot = it.next().map(PathBuf::from),
            "--resume" => args.resume = true,
            "--realtime" => args.realtime = true,
            "--version" => args.version = true,
            other => warn!(arg = other, "ignoring unknown argument"),
        }
    }
    args
}

/// A scripted customer arriving right before `tick` runs.
#[derive(Clone, Debug, Deserialize)]
struct Arrival {
    tick: u64,
    #[serde(default)]
    queue: Option<u32>,
    customer: CustomerSpec,
}

#[derive(Clone, Debug, Deserialize)]
struct Restock {
    tick: u64,
    material: MaterialId,
    qty: u32,
}

#[derive(Clone, Debug, Deserialize)]
struct Scenario {
    business: Business,
    materials: Vec<Material>,
    products: Vec<Product>,
    #[serde(default)]
    config: Option<SimConfig>,
    #[serde(default)]
    arrivals: Vec<Arrival>,
    #[serde(default)]
    restocks: Vec<Restock>,
    /// Add a random customer every N ticks.
    #[serde(default)]
    random_every: Option<u64>,
}

/// Where snapshots are read and written: `--snapshot`, or the default save
/// location when only `--resume` is given.
fn snapshot_target(args: &Args) -> Option<PathBuf> {
    args.snapshot
        .clone()
        .or_else(|| args.resume.then(default_snapshot_path))
}

fn load_scenario(path: &Path) -> Result<Scenario> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading scenario {}", path.display()))?;
    serde_yaml::from_str(&text).with_context(|| format!("parsing scenario {}", path.display()))
}

fn minimal_scenario() -> Scenario {
    let iron = MaterialId("iron".to_string());
    let oak = MaterialId("oak".to_string());
    let leather = MaterialId("leather".to_string());
    Scenario {
        business: Business {
            id: BusinessId("corner-workshop".to_string()),
            name: "Corner Workshop".to_string(),
            production_slots_count: 2,
            delivery_time_seconds: 3,
            queue_count: 2,
        },
        materials: vec![
            Material {
                id: iron.clone(),
                name: "Iron".to_string(),
                time_required: 2,
                stock: 40,
            },
            Material {
                id: oak.clone(),
                name: "Oak".to_string(),
                time_required: 3,
                stock: 40,
            },
            Material {
                id: leather.clone(),
                name: "Leather".to_string(),
                time_required: 1,
                stock: 30,
            },
        ],
        products: vec![
            Product {
                id: ProductId("axe".to_string()),
                name: "Axe".to_string(),
                price: Decimal::new(1800, 2),
                materials: vec![iron.clone(), oak.clone()],
            },
            Product {
                id: ProductId("belt".to_string()),
                name: "Belt".to_string(),
                price: Decimal::new(950, 2),
                materials: vec![leather.clone()],
            },
            Product {
                id: ProductId("shield".to_string()),
                name: "Shield".to_string(),
                price: Decimal::new(3500, 2),
                materials: vec![oak, iron, leather],
            },
        ],
        config: None,
        arrivals: vec![Arrival {
            tick: 1,
            queue: None,
            customer: CustomerSpec::order(vec![ProductId("shield".to_string())])
                .with_money(Decimal::new(100, 0))
                .with_priority(Priority::Vip),
        }],
        restocks: vec![],
        random_every: Some(2),
    }
}

/// Apply scripted arrivals and restocks due before `next_tick` runs.
fn feed(sim: &mut Simulation<InMemoryCatalog>, scenario: &Scenario, next_tick: u64) {
    for r in scenario.restocks.iter().filter(|r| r.tick == next_tick) {
        if !sim.catalog_mut().restock(&r.material, r.qty) {
            warn!(material = %r.material, "restock of unknown material ignored");
        }
    }
    for a in scenario.arrivals.iter().filter(|a| a.tick == next_tick) {
        match sim.enqueue(a.customer.clone(), a.queue.map(QueueId)) {
            Ok(Some(c)) => debug!(customer = %c.id, tick = next_tick, "scripted arrival"),
            Ok(None) => {}
            Err(e) => warn!(tick = next_tick, error = %e, "scripted arrival rejected"),
        }
    }
    if let Some(every) = scenario.random_every.filter(|n| *n > 0) {
        if next_tick % every == 0 {
            sim.add_random_customer();
        }
    }
}

fn run_headless(sim: &mut Simulation<InMemoryCatalog>, scenario: &Scenario, ticks: u64) {
    for _ in 0..ticks {
        let next = sim.current_tick() + 1;
        feed(sim, scenario, next);
        let report = sim.tick();
        debug!(tick = report.tick, events = report.events.len(), "tick");
    }
}

async fn run_realtime(
    driver: &mut Driver<InMemoryCatalog>,
    scenario: &Scenario,
    ticks: u64,
) -> Result<()> {
    let (start, interval_ms) = driver.with(|s| (s.current_tick(), s.config().tick_interval_ms));
    let mut fed = start + 1;
    driver.with(|s| feed(s, scenario, fed));
    driver.start(interval_ms)?;

    let mut poll = tokio::time::interval(Duration::from_millis((interval_ms / 4).max(1)));
    loop {
        poll.tick().await;
        let now = driver.with(|s| s.current_tick());
        if now >= start + ticks {
            break;
        }
        if now + 1 > fed {
            fed = now + 1;
            driver.with(|s| feed(s, scenario, fed));
        }
    }
    driver.stop();
    Ok(())
}

fn finish(sim: &Simulation<InMemoryCatalog>, snapshot: Option<&Path>) -> Result<()> {
    if let Some(path) = snapshot {
        save_snapshot(path, &sim.snapshot())?;
    }
    let st = sim.stats();
    println!(
        "Business OK | {} | queues: {} | slots: {} | products: {}",
        sim.catalog().business().name,
        sim.queues().queues().len(),
        sim.catalog().business().production_slots_count,
        sim.catalog().product_ids().len()
    );
    println!(
        "KPI | ticks: {} | customers: {} | accepted: {} | failed: {} | delivered: {} | lost in transit: {} | cancels: {} | reorders: {} | revenue: ${}",
        st.ticks,
        st.customers_admitted,
        st.orders_accepted,
        st.orders_failed,
        st.deliveries_completed,
        st.deliveries_failed,
        st.cancellations,
        st.reorders,
        sim.catalog().revenue()
    );
    println!(
        "NOW | waiting: {} | active: {} | overflow: {} | in transit: {}",
        sim.queues().waiting(),
        sim.production().active().len(),
        sim.production().overflow().len(),
        sim.delivery().in_transit().len()
    );
    let stock: Vec<String> = sim
        .catalog()
        .materials()
        .map(|m| format!("{}: {}", m.name, m.stock))
        .collect();
    println!("STOCK | {}", stock.join(" | "));
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logging setup
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_max_level(Level::INFO)
        .init();

    let args = parse_args();
    if args.version {
        println!(
            "fulfillment-cli {} ({}, {})",
            env!("CARGO_PKG_VERSION"),
            env!("GIT_SHA"),
            env!("BUILD_DATE")
        );
        return Ok(());
    }
    info!(scenario = ?args.scenario, ticks = ?args.ticks, realtime = args.realtime, "starting CLI");

    let scenario = match &args.scenario {
        Some(path) => load_scenario(path)?,
        None => minimal_scenario(),
    };
    let mut config = scenario.config.clone().unwrap_or_default();
    if let Some(seed) = args.seed {
        config.rng_seed = seed;
    }
    validate_config(&config)?;
    let catalog = InMemoryCatalog::new(
        scenario.business.clone(),
        scenario.materials.clone(),
        scenario.products.clone(),
    )?;

    let snapshot_path = snapshot_target(&args);
    let saved = match (&snapshot_path, args.resume) {
        (Some(path), true) => load_snapshot(path)?,
        _ => None,
    };
    let mut sim = match saved {
        Some(snap) => {
            let rng = Box::new(SeededRandom::new(config.rng_seed ^ snap.tick));
            Simulation::restore(snap, catalog, config, rng)?
        }
        None => Simulation::new(catalog, config)?,
    };
    let ticks = args.ticks.unwrap_or(60);

    if args.realtime {
        let mut writer = None;
        if let Some(path) = &args.events {
            let (sink, rx) = channel_sink(1024);
            sim.add_sink(Box::new(sink));
            writer = Some(spawn_event_writer(rx, JsonlEventLog::create(path)?));
        }
        let mut driver = Driver::new(sim);
        run_realtime(&mut driver, &scenario, ticks).await?;
        driver.with(|s| finish(s, snapshot_path.as_deref()))?;
        // Dropping the driver closes the channel and lets the writer finish.
        drop(driver);
        if let Some(writer) = writer {
            let written = writer.await?;
            info!(written, "event log closed");
        }
    } else {
        if let Some(path) = &args.events {
            sim.add_sink(Box::new(JsonlEventLog::create(path)?));
        }
        run_headless(&mut sim, &scenario, ticks);
        finish(&sim, snapshot_path.as_deref())?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_scenario_is_valid() {
        let s = minimal_scenario();
        validate_catalog(&s.materials, &s.products).unwrap();
        for a in &s.arrivals {
            validate_customer_spec(&a.customer).unwrap();
        }
    }

    #[test]
    fn bundled_scenario_parses() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("scenarios/workshop.yaml");
        let s = load_scenario(&path).unwrap();
        assert!(!s.arrivals.is_empty());
        validate_catalog(&s.materials, &s.products).unwrap();
        validate_config(&s.config.clone().unwrap_or_default()).unwrap();
    }

    #[test]
    fn resume_without_path_uses_default_save() {
        let args = Args {
            resume: true,
            ..Args::default()
        };
        assert_eq!(snapshot_target(&args), Some(default_snapshot_path()));
        let args = Args {
            snapshot: Some(PathBuf::from("run.json")),
            ..Args::default()
        };
        assert_eq!(snapshot_target(&args), Some(PathBuf::from("run.json")));
        assert_eq!(snapshot_target(&Args::default()), None);
    }

    #[test]
    fn headless_run_feeds_arrivals() {
        let s = minimal_scenario();
        let catalog = InMemoryCatalog::new(s.business.clone(), s.materials.clone(), s.products.clone()).unwrap();
        let mut sim = Simulation::new(catalog, SimConfig::default()).unwrap();
        run_headless(&mut sim, &s, 20);
        assert_eq!(sim.stats().ticks, 20);
        // One scripted arrival plus one random customer every other tick.
        assert_eq!(sim.stats().customers_admitted, 11);
    }
}
