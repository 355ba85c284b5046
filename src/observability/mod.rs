pub mod alerts;
pub mod metrics;
pub mod startup;

use alerts::AlertManager;
use lazy_static::lazy_static;
use metrics::Metrics;
use tracing_subscriber::{fmt, EnvFilter};

lazy_static! {
    pub static ref METRICS: Metrics = Metrics::new();
    pub static ref ALERTS: AlertManager = AlertManager::new();
}

/// `LOG_FORMAT=json` switches to structured output; `RUST_LOG` controls filtering.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let result = if json {
        fmt().with_env_filter(filter).json().try_init()
    } else {
        fmt().with_env_filter(filter).try_init()
    };

    if let Err(e) = result {
        eprintln!("tracing subscriber already initialised: {}", e);
    }
}
