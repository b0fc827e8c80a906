pub mod config;
pub mod credentials;
pub mod endpoint;
pub mod path_utils;

use tracing::info;

pub fn init() {
    info!("🧹 Retainer Core Initialized");
}
