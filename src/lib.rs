pub mod cli;
pub mod config;
pub mod deploy;
pub mod epic_analysis;
pub mod error;
pub mod http_gateway;
pub mod jira_client;
pub mod models;
pub mod pagination;
pub mod router;
pub mod token_manager;
pub mod utils;
