//! Upload command implementation.

use anyhow::{Context, Result};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use log::debug;
use robolink::{RobotType, SessionConfig, UploadRequest};
use std::path::Path;

use crate::{Cli, use_fancy_output};

/// Wrap a library error so the user sees the short explanation first.
pub(crate) fn describe(err: robolink::Error) -> anyhow::Error {
    let message = err.user_message();
    anyhow::Error::new(err).context(message)
}

/// Suggestion printed after a failure that may go away on its own.
pub(crate) fn retry_hint(err: &robolink::Error) -> Option<&'static str> {
    err.is_retryable()
        .then_some("Check that the robot is switched on and idle, then run the command again.")
}

/// Upload command implementation.
pub(crate) fn cmd_upload(
    cli: &Cli,
    robot: RobotType,
    port: &str,
    file: &Path,
    session: SessionConfig,
) -> Result<()> {
    let request = UploadRequest::from_file(file, robot)
        .with_context(|| format!("Failed to read program file: {}", file.display()))?;
    debug!("Session settings: {session:?}");

    if !cli.quiet {
        eprintln!(
            "{} Uploading {} ({} bytes) to {} on {}",
            style("📦").cyan(),
            style(request.file_name()).yellow(),
            request
                .bytes()
                .len(),
            style(robot).bold(),
            style(port).cyan()
        );
    }

    let mut communicator = robot
        .create_communicator(port, session)
        .map_err(describe)?;

    let pb = if cli.quiet || !use_fancy_output() {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new(0);
        #[allow(clippy::unwrap_used)] // Static template string
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap()
                .progress_chars("#>-"),
        );
        pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
        pb
    };

    let result = communicator.upload(&request, &mut |sent, total| {
        pb.set_length(total as u64);
        pb.set_position(sent as u64);
    });

    match result {
        Ok(()) => {
            pb.finish_with_message("done");
            communicator.close();
            if !cli.quiet {
                eprintln!(
                    "{} Program uploaded to {}",
                    style("✓").green(),
                    style(robot).bold()
                );
            }
            Ok(())
        },
        Err(err) => {
            pb.abandon_with_message("failed");
            if let Some(hint) = retry_hint(&err) {
                if !cli.quiet {
                    eprintln!("{} {hint}", style("ℹ").blue());
                }
            }
            Err(describe(err))
        },
    }
}
