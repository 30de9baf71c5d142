pub mod config;
pub mod controller;
pub mod crd;
pub mod external;
pub mod jobs;
pub mod manifests;
pub mod runtime;
pub mod store;
pub mod web;

use tracing_subscriber::{
    EnvFilter, layer::SubscriberExt, util::SubscriberInitExt,
};

/// `RUST_LOG` wins; `default_env` applies when it is unset or invalid.
pub fn init_tracing(default_env: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_env));

    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(filter)
        .try_init();
}
