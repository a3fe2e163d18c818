use anyhow::{Context, Result};
use std::sync::Arc;

use cycler::config::Config;
use cycler::identity::{IdentitySource, YamlIdentitySource};
use cycler::scheduler::check_preconditions;
use cycler::storage::{format_remaining, CooldownStore, JsonFileBackend, ProxyPoolStore, SystemClock};

pub fn status(config: &Config) -> Result<()> {
    let identities = YamlIdentitySource::new(&config.paths.accounts)
        .load()
        .with_context(|| format!("Failed to load {}", config.paths.accounts.display()))?;
    let cooldowns = CooldownStore::open(
        Box::new(JsonFileBackend::new(&config.paths.cooldowns)),
        Arc::new(SystemClock),
    );
    let pool = ProxyPoolStore::from_files(&config.paths.proxies, &config.paths.backup_proxies)
        .context("Failed to load proxy lists")?;

    println!("Cycler Status");
    println!("=============");
    println!();
    println!("{:<4} {:<36} {:<12} {}", "#", "IDENTITY", "STATE", "PROXY");
    println!("{:-<80}", "");

    for identity in &identities {
        let state = if identity.suspended {
            "suspended".to_string()
        } else {
            let remaining = cooldowns.peek_remaining(&identity.key);
            if remaining.is_zero() {
                "due".to_string()
            } else {
                format!("in {}", format_remaining(remaining))
            }
        };

        let proxy = pool
            .get(identity.ordinal)
            .map(ToString::to_string)
            .unwrap_or_else(|| "direct".to_string());

        println!(
            "{:<4} {:<36} {:<12} {}",
            identity.ordinal, identity.key, state, proxy
        );
    }

    println!();
    println!("Proxy slots: {}", pool.len());
    match pool.reserve_len() {
        Ok(count) => println!("Backup reserve: {count}"),
        Err(e) => println!("Backup reserve: unreadable ({e})"),
    }
    println!("Cooldown windows: {}", cooldowns.len());

    if let Err(e) = check_preconditions(identities.len(), pool.len(), config.proxy.allow_direct) {
        println!();
        println!("Warning: scheduler would refuse to start: {e}");
    }

    Ok(())
}
