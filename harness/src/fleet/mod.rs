//! Fleet control plane: API client and enrollment settings

pub mod client;
pub mod config;

pub use client::FleetClient;
pub use config::FleetConfig;
