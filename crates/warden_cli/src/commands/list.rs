//! Discovery commands: what the token can see before running an analysis.

use std::error::Error;

use warden::GitHubApi;

use super::shared::{GitHubArgs, connect};
use crate::config::Config;
use crate::output::{OutputFormat, render_orgs, render_repositories};

/// Organizations the token belongs to, with how deep an analysis can go.
pub(crate) async fn handle_list_orgs(
    github: GitHubArgs,
    output: Option<OutputFormat>,
    config: &Config,
) -> Result<(), Box<dyn Error>> {
    let requests_per_second = if github.no_rate_limit {
        None
    } else {
        config.collect.requests_per_second()
    };
    let client = connect(&github, config, Vec::new(), requests_per_second).await?;
    let orgs = client.organizations().await?;
    let format = output.unwrap_or(config.output.format);
    println!("{}", render_orgs(&orgs, format)?);
    Ok(())
}

/// Repositories the viewer owns, belongs to through an organization, or collaborates on.
pub(crate) async fn handle_list_repos(
    github: GitHubArgs,
    output: Option<OutputFormat>,
    config: &Config,
) -> Result<(), Box<dyn Error>> {
    let requests_per_second = if github.no_rate_limit {
        None
    } else {
        config.collect.requests_per_second()
    };
    let client = connect(&github, config, Vec::new(), requests_per_second).await?;
    let repositories = client.viewer_repositories().await?;
    let format = output.unwrap_or(config.output.format);
    println!("{}", render_repositories(&repositories, format)?);
    Ok(())
}
