//! End-to-end test harness for the Elastic Agent
//!
//! Deploys a stack and agent hosts through pluggable backends, installs the
//! agent from any package format, and waits on what Fleet and the hosts report.

pub mod app;
pub mod backoff;
pub mod deploy;
pub mod downloads;
pub mod errors;
pub mod filesys;
pub mod fleet;
pub mod git;
pub mod installer;
pub mod lifecycle;
pub mod logs;
pub mod shell;
pub mod storage;
pub mod utils;
