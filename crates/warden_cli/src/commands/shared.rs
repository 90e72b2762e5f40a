//! Argument groups and run plumbing shared by the collecting commands.

use std::error::Error;
use std::io::BufWriter;
use std::path::Path;
use std::sync::Arc;

use tokio::sync::mpsc;
use warden::collect::scorecard::ScorecardRunner;
use warden::{
    CollectedData, CollectorManager, CollectorOptions, GitHubApi, GitHubClient, IssueReport,
    Namespace, PermissionLog, ProgressWaiter, RepositoryRef, SkipLog, validate_namespaces,
};

use crate::config::{CollectConfig, Config};
use crate::progress::ProgressReporter;

/// How to reach GitHub.
#[derive(Debug, Clone, clap::Args)]
pub(crate) struct GitHubArgs {
    /// Classic personal access token (default from config, WARDEN_GITHUB_TOKEN or GITHUB_TOKEN)
    #[arg(short, long)]
    pub token: Option<String>,

    /// GitHub Enterprise Server root URL (default from config or GITHUB_ENDPOINT)
    #[arg(long)]
    pub endpoint: Option<String>,

    /// Disable proactive rate limiting (secondary limits are still honored)
    #[arg(short = 'R', long)]
    pub no_rate_limit: bool,
}

/// What to collect.
#[derive(Debug, Clone, clap::Args)]
pub(crate) struct CollectArgs {
    #[command(flatten)]
    pub github: GitHubArgs,

    /// Organizations to collect (default: every organization of the token)
    #[arg(long = "org", value_delimiter = ',')]
    pub orgs: Vec<String>,

    /// Specific repositories to collect, as owner/name
    #[arg(long = "repo", value_delimiter = ',', conflicts_with = "orgs")]
    pub repositories: Vec<String>,

    /// Namespaces to collect (default: all)
    #[arg(short, long = "namespace", value_delimiter = ',')]
    pub namespaces: Vec<String>,

    /// Enterprise slugs for the enterprise namespace
    #[arg(long = "enterprise", value_delimiter = ',')]
    pub enterprises: Vec<String>,

    /// Run OpenSSF Scorecard on every repository (needs the scorecard binary)
    #[arg(long)]
    pub scorecard: bool,
}

/// CLI values win over config values; an empty list means "not given".
fn pick(cli: &[String], config: &[String]) -> Vec<String> {
    if cli.is_empty() {
        config.to_vec()
    } else {
        cli.to_vec()
    }
}

/// Collection settings after merging flags over config.
#[derive(Debug, PartialEq)]
pub(crate) struct CollectionPlan {
    pub namespaces: Vec<Namespace>,
    pub orgs: Vec<String>,
    pub repositories: Vec<RepositoryRef>,
    pub enterprises: Vec<String>,
    pub scorecard: bool,
    pub requests_per_second: Option<u32>,
}

impl CollectionPlan {
    pub(crate) fn resolve(args: &CollectArgs, config: &CollectConfig) -> Result<Self, Box<dyn Error>> {
        let orgs = pick(&args.orgs, &config.orgs);
        let repositories = pick(&args.repositories, &config.repositories)
            .iter()
            .map(|r| r.parse::<RepositoryRef>())
            .collect::<Result<Vec<_>, _>>()?;
        if !orgs.is_empty() && !repositories.is_empty() {
            return Err("cannot collect specific organizations and specific repositories together".into());
        }

        let namespaces = if repositories.is_empty() {
            validate_namespaces(&pick(&args.namespaces, &config.namespaces))?
        } else {
            vec![Namespace::Repository]
        };

        Ok(Self {
            namespaces,
            orgs,
            repositories,
            enterprises: pick(&args.enterprises, &config.enterprises),
            scorecard: args.scorecard || config.scorecard,
            requests_per_second: if args.github.no_rate_limit {
                None
            } else {
                config.requests_per_second()
            },
        })
    }
}

/// Build a connected client from flags and config.
pub(crate) async fn connect(
    args: &GitHubArgs,
    config: &Config,
    orgs: Vec<String>,
    requests_per_second: Option<u32>,
) -> Result<GitHubClient, Box<dyn Error>> {
    let token = args
        .token
        .clone()
        .or_else(|| config.github.token.clone())
        .ok_or("no GitHub token configured (use --token, WARDEN_GITHUB_TOKEN or GITHUB_TOKEN)")?;
    let endpoint = args.endpoint.clone().or_else(|| config.github.endpoint.clone());

    let client = GitHubClient::connect(warden::GitHubConfig {
        token,
        endpoint,
        orgs,
        requests_per_second,
    })
    .await?;
    Ok(client)
}

/// A connected client plus the manager running the selected collectors.
pub(crate) struct Session {
    pub client: Arc<GitHubClient>,
    pub manager: CollectorManager,
    pub plan: CollectionPlan,
}

impl Session {
    pub(crate) async fn start(args: &CollectArgs, config: &Config) -> Result<Self, Box<dyn Error>> {
        let plan = CollectionPlan::resolve(args, &config.collect)?;
        let client = Arc::new(
            connect(&args.github, config, plan.orgs.clone(), plan.requests_per_second).await?,
        );
        tracing::debug!(
            namespaces = ?plan.namespaces,
            orgs = plan.orgs.len(),
            repositories = plan.repositories.len(),
            "Starting collection"
        );

        let scorecard = plan.scorecard.then(|| {
            let token = args
                .github
                .token
                .clone()
                .or_else(|| config.github.token.clone())
                .unwrap_or_default();
            ScorecardRunner::new(token)
        });
        let options = CollectorOptions {
            repositories: plan.repositories.clone(),
            enterprises: plan.enterprises.clone(),
            scorecard,
        };
        let api: Arc<dyn GitHubApi> = client.clone();
        let manager = CollectorManager::new(&plan.namespaces, api, &options);

        Ok(Self {
            client,
            manager,
            plan,
        })
    }
}

/// Size the progress renderers, start every collector, and route progress.
///
/// Every collector ends with a `finished` metric, so each selected namespace
/// gets exactly one renderer; the waiter expects that many.
pub(crate) async fn start_collection(
    manager: &CollectorManager,
    reporter: &Arc<ProgressReporter>,
) -> (mpsc::Receiver<CollectedData>, Arc<ProgressWaiter>) {
    let totals = manager.collect_metadata().await;
    let waiter = Arc::new(ProgressWaiter::new());
    waiter.set_min_count(manager.namespaces().len());

    let channels = manager.collect();
    reporter.track(Arc::clone(&waiter), totals, channels.progress);
    (channels.collected, waiter)
}

/// Log missing permissions and optionally dump both issue logs as JSON.
pub(crate) fn report_issues(
    permissions: &PermissionLog,
    skips: &SkipLog,
    path: Option<&Path>,
) -> Result<(), Box<dyn Error>> {
    if !permissions.is_empty() {
        tracing::warn!(
            "Some data could not be collected due to missing permissions:\n{}",
            permissions.report()
        );
    }

    let Some(path) = path else {
        return Ok(());
    };
    let report = IssueReport::new(permissions, skips);
    if report.is_empty() {
        return Ok(());
    }
    let file = std::fs::File::create(path)?;
    if report.flush(BufWriter::new(file))? {
        tracing::info!(path = %path.display(), "Wrote issue report");
    }
    Ok(())
}
