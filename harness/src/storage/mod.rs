//! Persistent harness state and on-disk layout

pub mod layout;
pub mod run_state;
pub mod settings;
