use anyhow::{Context, Result};
use log::{error, info};
use std::path::PathBuf;
use tokio::process::Command;

use crate::config::DeployConfig;

/// Hands a stage deployment off to the external orchestrator.
///
/// The orchestrator's exit code is returned untouched so the CLI can exit
/// with it.
#[derive(Debug, Clone)]
pub struct DeployLauncher {
    command: String,
    working_dir: PathBuf,
}

impl DeployLauncher {
    pub fn new(config: &DeployConfig) -> Self {
        Self {
            command: config.command.clone(),
            working_dir: config.working_dir.clone(),
        }
    }

    fn build_command(&self, stage: &str) -> Result<Command> {
        let mut parts = self.command.split_whitespace();
        let program = parts.next().context("Deploy command is empty")?;

        let mut cmd = Command::new(program);
        cmd.args(parts)
            .arg("--stage")
            .arg(stage)
            .current_dir(&self.working_dir)
            .env("NO_MINIFY_JS", "true");
        Ok(cmd)
    }

    pub async fn deploy(&self, stage: &str) -> Result<i32> {
        info!("Deploying stage {} with `{}`", stage, self.command);
        let status = self
            .build_command(stage)?
            .status()
            .await
            .with_context(|| format!("Failed to start `{}`", self.command))?;

        // A signal-terminated child has no code.
        let code = status.code().unwrap_or(1);
        if code != 0 {
            error!("Deployment failed with exit code {}", code);
        }
        Ok(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn launcher(command: &str) -> DeployLauncher {
        DeployLauncher::new(&DeployConfig {
            command: command.to_string(),
            working_dir: std::env::temp_dir(),
        })
    }

    #[test]
    fn test_build_command_appends_stage() {
        let cmd = launcher("npx serverless deploy").build_command("dev").unwrap();
        let std_cmd = cmd.as_std();
        assert_eq!(std_cmd.get_program(), "npx");
        let args: Vec<_> = std_cmd.get_args().collect();
        assert_eq!(args, vec!["serverless", "deploy", "--stage", "dev"]);
    }

    #[test]
    fn test_empty_command_is_rejected() {
        assert!(launcher("   ").build_command("dev").is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exit_code_is_propagated() {
        let ok = launcher("true").deploy("dev").await.unwrap();
        assert_eq!(ok, 0);

        let failed = launcher("false").deploy("dev").await.unwrap();
        assert_eq!(failed, 1);
    }

    #[tokio::test]
    async fn test_missing_program_is_an_error() {
        let result = launcher("definitely-not-a-real-binary-4821").deploy("dev").await;
        assert!(result.is_err());
    }
}
