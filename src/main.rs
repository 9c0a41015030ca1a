use clap::Parser;
use log::{error, info};
use std::process::ExitCode;

use ndvi2yolo::{run, Args};

fn main() -> ExitCode {
    // Initialize the logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    info!("Starting the dataset generation process...");

    match run(&args) {
        Ok(()) => {
            info!("Dataset generation completed successfully.");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Failed to build dataset: {}", e);
            ExitCode::FAILURE
        }
    }
}
