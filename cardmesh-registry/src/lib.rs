mod config;
mod logging;
mod registry;

pub use config::{Config, PeerAddr, StockConfig, Timeouts};
pub use logging::init_logging;
pub use registry::PeerRegistry;
