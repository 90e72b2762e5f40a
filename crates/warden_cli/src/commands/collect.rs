use std::error::Error;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;

use warden::SkipLog;

use super::shared::{CollectArgs, Session, report_issues, start_collection};
use crate::config::Config;
use crate::progress::ProgressReporter;

#[derive(Debug, Clone, clap::Args)]
pub(crate) struct CollectCommandArgs {
    #[command(flatten)]
    pub collect: CollectArgs,

    /// Write missing permissions to this JSON file
    #[arg(long)]
    pub permissions_file: Option<PathBuf>,
}

/// Stream every collected entity to stdout as one JSON object per line.
pub(crate) async fn handle_collect(args: CollectCommandArgs, config: &Config) -> Result<(), Box<dyn Error>> {
    let session = Session::start(&args.collect, config).await?;
    let reporter = Arc::new(ProgressReporter::new());
    let (mut collected, waiter) = start_collection(&session.manager, &reporter).await;

    let mut count = 0usize;
    {
        let mut out = BufWriter::new(std::io::stdout().lock());
        while let Some(data) = collected.recv().await {
            serde_json::to_writer(&mut out, &data)?;
            out.write_all(b"\n")?;
            count += 1;
        }
        out.flush()?;
    }

    waiter.wait(config.collect.progress_timeout()).await?;
    tracing::info!(entities = count, "Collection complete");

    let permissions_file = args
        .permissions_file
        .as_deref()
        .or(config.output.permissions_file.as_deref());
    report_issues(&session.manager.permission_log(), &SkipLog::new(), permissions_file)?;
    Ok(())
}
