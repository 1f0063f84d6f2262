use clap::Parser;
use log::LevelFilter;
use trackpulse::cli::Cli;
use trackpulse::config::Config;
use trackpulse::router::route_command;

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();

    // Parse CLI arguments
    let cli_args = Cli::parse();

    let mut config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {:?}", e);
            std::process::exit(1);
        }
    };

    let mut logger = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if cli_args.verbose || config.general.verbose {
        logger.filter_module("trackpulse", LevelFilter::Debug);
    }
    logger.init();

    match route_command(cli_args, &mut config).await {
        Ok(0) => {}
        Ok(code) => {
            eprintln!("Command exited with status {}", code);
            std::process::exit(code);
        }
        Err(e) => {
            eprintln!("Error: {:?}", e);
            std::process::exit(1);
        }
    }
}
