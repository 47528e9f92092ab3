//! Execute command implementation.

use anyhow::Result;
use console::style;
use robolink::{
    NativePortOpener, RobotCommunicator as _, SessionConfig, SpikeHubCommunicator, SystemClock,
};

use super::upload::describe;
use crate::Cli;

/// Start the program stored in `slot` on a SPIKE Hub.
pub(crate) fn cmd_execute(cli: &Cli, port: &str, slot: u8, session: SessionConfig) -> Result<()> {
    session
        .validate()
        .map_err(describe)?;

    let mut hub = SpikeHubCommunicator::new(NativePortOpener, SystemClock, port, session);
    let result = hub.execute_program(slot);
    hub.close();
    result.map_err(describe)?;

    if !cli.quiet {
        eprintln!(
            "{} Started program in slot {}",
            style("▶").green(),
            style(slot).cyan()
        );
    }
    Ok(())
}
