use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
#[clap(propagate_version = true)]
pub struct Cli {
    /// Enable debug logging
    #[clap(short, long, global = true)]
    pub verbose: bool,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Story points completed in the trailing velocity window
    Velocity(VelocityArgs),
    /// Analyse a single epic and its child issues
    AnalyzeEpic(AnalyzeArgs),
    /// Analyse every active or recently closed epic in a project
    AnalyzeProject(AnalyzeArgs),
    /// Run a JQL search and print the matching issues
    Search {
        jql: String,
        /// Maximum number of issues to fetch
        #[clap(short, long)]
        limit: Option<usize>,
        /// Comma-separated expand list
        #[clap(short, long, default_value = "names")]
        expand: String,
    },
    /// Manage the OAuth credential
    Auth(AuthArgs),
    /// Deploy a stage through the external orchestrator
    Deploy {
        #[clap(short, long, default_value = "dev")]
        stage: String,
    },
    /// Manage configuration
    Config {
        /// Initialize configuration file
        #[clap(long)]
        init: bool,
        /// Show current configuration
        #[clap(long)]
        show: bool,
        /// Set a configuration value (key=value)
        #[clap(long)]
        set: Option<String>,
        /// List available configuration keys
        #[clap(long)]
        keys: bool,
    },
}

#[derive(Args, Debug, Clone)]
pub struct VelocityArgs {
    /// Base JQL restricting which issues count, e.g. `parent = PROJ-1`
    #[clap(conflicts_with_all = ["epic", "project"], required_unless_present_any = ["epic", "project"])]
    pub jql: Option<String>,
    #[clap(long, conflicts_with = "project")]
    pub epic: Option<String>,
    #[clap(long)]
    pub project: Option<String>,
}

impl VelocityArgs {
    pub fn base_jql(&self) -> Option<String> {
        match (&self.jql, &self.epic, &self.project) {
            (Some(jql), _, _) => Some(jql.clone()),
            (None, Some(epic), _) => Some(format!("parent = {}", epic)),
            (None, None, Some(project)) => Some(format!("project = {}", project)),
            (None, None, None) => None,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct AnalyzeArgs {
    /// Epic or project key
    pub key: String,
    /// Last-checked instant (RFC 3339). Defaults to the start of the velocity window.
    #[clap(long)]
    pub since: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct AuthArgs {
    #[clap(subcommand)]
    pub action: AuthAction,
}

#[derive(Subcommand, Debug, Clone)]
pub enum AuthAction {
    /// Exchange the stored refresh token for a new credential
    Refresh,
    /// Show whether a credential is stored
    Status,
}
