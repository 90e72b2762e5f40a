use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use warden::{Analyzer, GitHubApi, SkipLog, Skipper, SkipperSettings};

use super::shared::{CollectArgs, Session, report_issues, start_collection};
use crate::config::Config;
use crate::engine::CommandEngine;
use crate::output::{OutputFormat, render_analysis};
use crate::progress::ProgressReporter;

#[derive(Debug, Clone, clap::Args)]
pub(crate) struct AnalyzeArgs {
    #[command(flatten)]
    pub collect: CollectArgs,

    /// Policy engine command (default from [engine] command)
    #[arg(short, long)]
    pub engine: Option<String>,

    /// Policies to leave out of the results
    #[arg(long = "ignore-policy", value_delimiter = ',')]
    pub ignored_policies: Vec<String>,

    /// Output format (default from config or table)
    #[arg(short, long, value_enum)]
    pub output: Option<OutputFormat>,

    /// Only show failed policies
    #[arg(short, long)]
    pub failed_only: bool,

    /// Write missing permissions and skipped policies to this JSON file
    #[arg(long)]
    pub permissions_file: Option<PathBuf>,
}

pub(crate) async fn handle_analyze(args: AnalyzeArgs, config: &Config) -> Result<(), Box<dyn Error>> {
    // Engine args from config only apply to the configured command.
    let (program, engine_args) = match args.engine.clone() {
        Some(program) => (program, Vec::new()),
        None => (
            config
                .engine
                .command
                .clone()
                .ok_or("no policy engine configured (use --engine or [engine] command)")?,
            config.engine.args.clone(),
        ),
    };

    let session = Session::start(&args.collect, config).await?;

    let mut ignored_policies = config.collect.ignored_policies.clone();
    ignored_policies.extend(args.ignored_policies.iter().cloned());
    let skip_log = Arc::new(SkipLog::new());
    let skipper = Skipper::new(
        SkipperSettings {
            ignored_policies,
            scorecard_enabled: session.plan.scorecard,
            is_cloud: session.client.is_cloud(),
            enterprise_slug: session.plan.enterprises.first().cloned(),
        },
        session.client.scopes().clone(),
        Arc::clone(&skip_log),
    );
    let engine = CommandEngine::new(program, engine_args, config.engine.max_concurrency);
    let analyzer = Analyzer::new(Arc::new(engine), Arc::new(skipper));

    let reporter = Arc::new(ProgressReporter::new());
    let (collected, waiter) = start_collection(&session.manager, &reporter).await;
    let mut analyzed = analyzer.analyze(collected);
    let gather = tokio::spawn(async move {
        let mut results = Vec::new();
        while let Some(data) = analyzed.recv().await {
            results.push(data);
        }
        results
    });

    waiter.wait(config.collect.progress_timeout()).await?;
    let results = gather.await?;
    tracing::info!(results = results.len(), "Analysis complete");

    let permissions_file = args
        .permissions_file
        .as_deref()
        .or(config.output.permissions_file.as_deref());
    report_issues(&session.manager.permission_log(), &skip_log, permissions_file)?;

    let format = args.output.unwrap_or(config.output.format);
    let failed_only = args.failed_only || config.output.failed_only;
    println!("{}", render_analysis(results, format, failed_only)?);
    Ok(())
}
