// Process-wide tracing setup. Every binary calls this exactly once,
// before anything else starts logging; `RUST_LOG` drives the filter
// the usual `tracing-subscriber` way.

pub fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
