use tracing::{debug, warn};

use crate::config::Config;

const COLLECTOR_URL: &str = "COLLECTOR_URL";

const COLLECTOR_TOKEN: &str = "COLLECTOR_TOKEN";

const SCHEDULER_WORKERS: &str = "SCHEDULER_WORKERS";

/// Apply environment overrides on top of a loaded configuration
pub fn apply_env_overrides(config: &mut Config) {
    apply_overrides(config, |key| std::env::var(key).ok());
}

/// Apply overrides looked up through `lookup`
pub fn apply_overrides(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(url) = lookup(COLLECTOR_URL) {
        debug!("collector url overridden from {COLLECTOR_URL}");
        config.collector.url = url;
    }

    if let Some(token) = lookup(COLLECTOR_TOKEN) {
        debug!("collector token overridden from {COLLECTOR_TOKEN}");
        config.collector.token = Some(token);
    }

    if let Some(workers) = lookup(SCHEDULER_WORKERS) {
        match workers.parse() {
            Ok(workers) => config.scheduler.workers = workers,
            Err(_) => warn!("ignoring invalid {SCHEDULER_WORKERS}: {workers}"),
        }
    }
}
