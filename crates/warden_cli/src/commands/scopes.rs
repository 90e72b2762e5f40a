use std::error::Error;

use warden::GitHubApi;

use super::shared::{GitHubArgs, connect};
use crate::config::Config;
use crate::output::{OutputFormat, render_scopes};

pub(crate) async fn handle_scopes(
    github: GitHubArgs,
    output: Option<OutputFormat>,
    config: &Config,
) -> Result<(), Box<dyn Error>> {
    let client = connect(&github, config, Vec::new(), None).await?;
    let format = output.unwrap_or(config.output.format);
    println!("{}", render_scopes(client.scopes(), format)?);
    Ok(())
}
