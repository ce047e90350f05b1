//! Fleet control-plane models shared by the e2e harness

pub mod models;

pub use models::*;
