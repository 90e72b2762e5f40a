//! Warden CLI - audit the security posture of GitHub organizations.

mod commands;
mod config;
mod engine;
mod output;
mod progress;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use console::Term;
use tracing_subscriber::EnvFilter;

use crate::commands::analyze::AnalyzeArgs;
use crate::commands::collect::CollectCommandArgs;
use crate::commands::shared::GitHubArgs;
use crate::output::OutputFormat;

#[derive(Parser)]
#[command(name = "warden")]
#[command(version)]
#[command(about = "Audit GitHub organizations against security policies")]
#[command(
    long_about = "Warden collects organizations, repositories, members, actions settings, runner \
groups and enterprises from GitHub, then evaluates every entity against an external policy \
engine. Policies the token cannot evaluate are skipped and reported instead of failing."
)]
#[command(after_long_help = r#"EXAMPLES
    Analyze every organization the token can see:
        $ warden analyze --engine ./eval-policies

    Analyze two repositories, failures only:
        $ warden analyze --repo acme/api,acme/web --failed-only

    Dump collected entities as JSON lines:
        $ warden collect --org acme -n organization,member > acme.jsonl

    Check which scopes a token carries:
        $ warden scopes

CONFIGURATION
    Warden reads configuration from:
      1. ~/.config/warden/config.toml (or $XDG_CONFIG_HOME/warden/config.toml)
      2. ./warden.toml
      3. Environment variables (WARDEN_* prefix, e.g., WARDEN_GITHUB_TOKEN)
      4. .env file in current directory

ENVIRONMENT VARIABLES
    WARDEN_GITHUB_TOKEN       GitHub classic personal access token (or GITHUB_TOKEN)
    WARDEN_GITHUB_ENDPOINT    GitHub Enterprise Server URL (or GITHUB_ENDPOINT)
    WARDEN_COLLECT_ORGS       Comma-separated organizations
    WARDEN_COLLECT_NAMESPACES Comma-separated namespaces
    WARDEN_ENGINE_COMMAND     Policy engine command
    RUST_LOG                  Log filter (default: warden=info,warden_cli=info)
"#)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Collect entities and evaluate them against the policy engine
    Analyze(AnalyzeArgs),
    /// Collect entities and print them as JSON lines
    Collect(CollectCommandArgs),
    /// Show the scopes of the configured token
    Scopes {
        #[command(flatten)]
        github: GitHubArgs,
        /// Output format (default from config or table)
        #[arg(short, long, value_enum)]
        output: Option<OutputFormat>,
    },
    /// List organizations and whether a full analysis is possible
    ListOrgs {
        #[command(flatten)]
        github: GitHubArgs,
        /// Output format (default from config or table)
        #[arg(short, long, value_enum)]
        output: Option<OutputFormat>,
    },
    /// List repositories visible to the token and the viewer's permission
    ListRepos {
        #[command(flatten)]
        github: GitHubArgs,
        /// Output format (default from config or table)
        #[arg(short, long, value_enum)]
        output: Option<OutputFormat>,
    },
    /// Generate shell completion scripts
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
    /// Generate man page(s)
    Man {
        /// Output directory for man pages (prints to stdout if not specified)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    // Bars own the terminal; keep log lines quiet there unless RUST_LOG asks.
    let default_filter = if Term::stderr().is_term() {
        "warden=warn,warden_cli=warn"
    } else {
        "warden=info,warden_cli=info"
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = config::Config::load();

    match cli.command {
        Commands::Analyze(args) => commands::analyze::handle_analyze(args, &config).await?,
        Commands::Collect(args) => commands::collect::handle_collect(args, &config).await?,
        Commands::Scopes { github, output } => {
            commands::scopes::handle_scopes(github, output, &config).await?
        }
        Commands::ListOrgs { github, output } => {
            commands::list::handle_list_orgs(github, output, &config).await?
        }
        Commands::ListRepos { github, output } => {
            commands::list::handle_list_repos(github, output, &config).await?
        }
        Commands::Completions { shell } => commands::meta::handle_completions(shell)?,
        Commands::Man { output } => commands::meta::handle_man(output)?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn org_and_repo_flags_conflict() {
        let parsed = Cli::try_parse_from(["warden", "collect", "--org", "acme", "--repo", "acme/api"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn list_flags_are_comma_separated() {
        let cli = Cli::try_parse_from(["warden", "collect", "--org", "acme,globex", "-n", "member"])
            .expect("parse");
        let Commands::Collect(args) = cli.command else {
            panic!("expected collect");
        };
        assert_eq!(args.collect.orgs, ["acme", "globex"]);
        assert_eq!(args.collect.namespaces, ["member"]);
    }
}
