use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;

use cycler::config::Config;
use cycler::storage::{CooldownStore, JsonFileBackend, SystemClock};

fn open_store(config: &Config) -> CooldownStore {
    CooldownStore::open(
        Box::new(JsonFileBackend::new(&config.paths.cooldowns)),
        Arc::new(SystemClock),
    )
}

pub fn reset(config: &Config, key: &str) -> Result<()> {
    let mut store = open_store(config);

    let removed = store
        .clear(key)
        .with_context(|| format!("Failed to clear cooldown for {key}"))?;

    if removed {
        println!("Cooldown cleared for {key}; it runs on the next tick");
    } else {
        println!("No cooldown recorded for {key}");
    }
    Ok(())
}

pub fn prune(config: &Config, max_age_hours: u64) -> Result<()> {
    let mut store = open_store(config);
    let max_age = Duration::from_secs(max_age_hours.saturating_mul(3600));

    let removed = store
        .prune_stale(max_age)
        .context("Failed to prune cooldown windows")?;

    println!(
        "Removed {removed} cooldown window(s) older than {max_age_hours}h; {} remaining",
        store.len()
    );
    Ok(())
}
