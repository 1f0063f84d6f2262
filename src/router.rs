use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::warn;
use serde::Serialize;

use crate::cli::{AnalyzeArgs, AuthAction, Cli, Commands, VelocityArgs};
use crate::config::Config;
use crate::deploy::DeployLauncher;
use crate::epic_analysis::{AnalysisSettings, EpicAnalyzer};
use crate::error::TrackerError;
use crate::http_gateway::HttpGateway;
use crate::jira_client::JiraClient;
use crate::pagination::QueryEngine;
use crate::token_manager::{load_credential, TokenManager};
use crate::utils::{parse_timestamp, window_start};

/// Runs one CLI command and returns the process exit code.
pub async fn route_command(cli: Cli, config: &mut Config) -> Result<i32> {
    match cli.command {
        Commands::Velocity(args) => handle_velocity(args, config).await,
        Commands::AnalyzeEpic(args) => handle_analyze_epic(args, config).await,
        Commands::AnalyzeProject(args) => handle_analyze_project(args, config).await,
        Commands::Search { jql, limit, expand } => handle_search(&jql, limit, &expand, config).await,
        Commands::Auth(auth_args) => handle_auth(auth_args.action, config).await,
        Commands::Deploy { stage } => DeployLauncher::new(&config.deploy).deploy(&stage).await,
        Commands::Config { init, show, set, keys } => handle_config(init, show, set, keys, config),
    }
}

fn build_client(config: &Config) -> Result<JiraClient> {
    config.validate()?;
    let gateway = HttpGateway::new(&config.gateway_config()).context("Failed to build HTTP client")?;
    let tokens = TokenManager::new(
        gateway.clone(),
        config.atlassian.token_url.clone(),
        config.load_client_credentials()?,
        config.atlassian.token_store_file.clone(),
        config.atlassian.refresh_token.clone(),
    )?;
    Ok(JiraClient::new(
        gateway,
        tokens,
        &config.atlassian.api_base_url,
        &config.atlassian.workspace_id,
    )?)
}

fn build_analyzer(config: &Config) -> Result<EpicAnalyzer> {
    let engine = QueryEngine::new(build_client(config)?, config.analysis.search_page_size);
    Ok(EpicAnalyzer::new(engine, AnalysisSettings::from(&config.analysis)))
}

fn last_checked(since: Option<&str>, config: &Config) -> Result<DateTime<Utc>> {
    match since {
        Some(value) => parse_timestamp(value)
            .with_context(|| format!("Invalid --since timestamp: {}", value)),
        None => Ok(window_start(Utc::now(), config.analysis.velocity_window_days)),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn handle_velocity(args: VelocityArgs, config: &Config) -> Result<i32> {
    let base_jql = args
        .base_jql()
        .context("Provide a JQL filter, --epic or --project")?;
    let analyzer = build_analyzer(config)?;
    let velocity = analyzer.calculate_velocity(&base_jql, Utc::now()).await?;
    print_json(&serde_json::json!({
        "jql": base_jql,
        "window_days": config.analysis.velocity_window_days,
        "velocity": velocity,
    }))?;
    Ok(0)
}

async fn handle_analyze_epic(args: AnalyzeArgs, config: &Config) -> Result<i32> {
    let since = last_checked(args.since.as_deref(), config)?;
    let analyzer = build_analyzer(config)?;
    let report = analyzer
        .analyze(&args.key, since)
        .await
        .with_context(|| format!("Failed to analyse epic {}", args.key))?;
    if report.partial {
        warn!("Report for {} is incomplete; some pages could not be fetched", args.key);
    }
    print_json(&report)?;
    Ok(0)
}

async fn handle_analyze_project(args: AnalyzeArgs, config: &Config) -> Result<i32> {
    let since = last_checked(args.since.as_deref(), config)?;
    let analyzer = build_analyzer(config)?;
    let report = analyzer
        .analyze_project(&args.key, since)
        .await
        .with_context(|| format!("Failed to analyse project {}", args.key))?;
    if report.partial {
        warn!("Report for project {} is incomplete", args.key);
    }
    print_json(&report)?;
    Ok(0)
}

async fn handle_search(jql: &str, limit: Option<usize>, expand: &str, config: &Config) -> Result<i32> {
    let engine = QueryEngine::new(build_client(config)?, config.analysis.search_page_size);
    let cap = limit.unwrap_or(config.analysis.search_item_cap);
    let result = engine.search_with(jql, expand, None, cap).await;
    match result.error {
        Some(e @ TrackerError::Auth { .. }) => return Err(e.into()),
        Some(e) => warn!("Search stopped early: {}", e),
        None => {}
    }
    print_json(&result.items)?;
    Ok(0)
}

async fn handle_auth(action: AuthAction, config: &Config) -> Result<i32> {
    match action {
        AuthAction::Refresh => {
            let client = build_client(config)?;
            client.tokens().refresh().await.context("Token refresh failed")?;
            println!(
                "Credential refreshed and stored in {}",
                config.atlassian.token_store_file.display()
            );
        }
        AuthAction::Status => {
            let path = &config.atlassian.token_store_file;
            match load_credential(path)? {
                Some(_) => println!("Credential stored in {}", path.display()),
                None if config.atlassian.refresh_token.is_some() => {
                    println!("No stored credential; a seed refresh token is configured")
                }
                None => println!("No credential found. Set TRACKPULSE_REFRESH_TOKEN to bootstrap one"),
            }
        }
    }
    Ok(0)
}

fn handle_config(init: bool, show: bool, set: Option<String>, keys: bool, config: &mut Config) -> Result<i32> {
    if init {
        Config::create_sample_config()?;
    } else if show {
        println!("{}", toml::to_string_pretty(config)?);
    } else if let Some(assignment) = set {
        let (key, value) = assignment
            .split_once('=')
            .context("Expected key=value")?;
        config.set_value(key.trim(), value.trim())?;
        config.save()?;
        println!("Set {} = {}", key.trim(), value.trim());
    } else if keys {
        for key in Config::get_available_keys() {
            println!("{}", key);
        }
    } else {
        println!("Configuration file: {}", Config::get_config_path().display());
        println!("Use --init, --show, --set key=value or --keys");
    }
    Ok(0)
}
