mod cli;
mod config;
mod core;
mod models;
mod sources;

use clap::Parser;
use env_logger::Env;

fn main() {
    let cli = cli::Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(default_level))
        .format_timestamp_secs()
        .init();

    if let Err(e) = cli::run(cli) {
        eprintln!("오류가 발생했습니다: {:#}", e);
        std::process::exit(1);
    }
}
