use std::path::Path;

use stockroom_core::sync::SyncOutcome;

use crate::commands::common::{format_outcome, format_pending_lines, Session};
use crate::error::CliError;

pub async fn run_sync(db_path: &Path) -> Result<(), CliError> {
    let session = Session::open(db_path).await?;
    let Some(remote_url) = session.remote_url().map(ToString::to_string) else {
        return Err(CliError::SyncNotConfigured);
    };
    if !session.connect().await {
        return Err(CliError::Unreachable(remote_url));
    }

    let run = session.sync().await;
    println!("{}", format_outcome(&run));

    if matches!(run.outcome, SyncOutcome::Completed(report) if report.failed > 0) {
        for line in format_pending_lines(&session.engine.pending(), chrono::Utc::now()) {
            println!("  {line}");
        }
    }
    Ok(())
}
