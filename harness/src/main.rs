//! e2e-harness - Entry Point
//!
//! Brings the end-to-end test environment up or down. Scenarios themselves
//! drive the library.

use std::collections::HashMap;
use std::env;
use std::process::ExitCode;

use e2e_harness::app::options::HarnessOptions;
use e2e_harness::app::run::{bootstrap, destroy};
use e2e_harness::logs::init_logging;
use e2e_harness::storage::layout::StorageLayout;
use e2e_harness::storage::settings::Settings;
use e2e_harness::utils::version_info;

use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    let version = version_info();
    if cli_args.contains_key("version") {
        match serde_json::to_string_pretty(&version) {
            Ok(json) => println!("{}", json),
            Err(_) => println!("{}", version.version),
        }
        return ExitCode::SUCCESS;
    }

    // Settings file first, environment on top
    let settings_file = StorageLayout::default().settings_file();
    let settings = if settings_file.exists().await {
        match settings_file.read_json::<Settings>().await {
            Ok(settings) => settings,
            Err(e) => {
                eprintln!("Unable to read settings file: {e}");
                return ExitCode::FAILURE;
            }
        }
    } else {
        Settings::default()
    };

    let mut options = match HarnessOptions::from_settings(&settings, |key| env::var(key).ok()) {
        Ok(options) => options,
        Err(e) => {
            eprintln!("Invalid configuration: {e}");
            return ExitCode::FAILURE;
        }
    };
    if let Some(profile) = cli_args.get("profile") {
        options.profile = profile.clone();
    }

    let _log_guard = match init_logging(options.log.clone()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            None
        }
    };
    info!("e2e-harness {} ({})", version.version, version.git_hash);

    let result = if cli_args.contains_key("destroy") {
        destroy(&options).await
    } else if cli_args.contains_key("bootstrap") {
        bootstrap(&options).await
    } else {
        eprintln!("Usage: e2e-harness --bootstrap | --destroy [--profile=<name>] | --version");
        return ExitCode::from(2);
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
