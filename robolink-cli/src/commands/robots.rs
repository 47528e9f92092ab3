//! Robots command implementation.

use anyhow::{Context, Result};
use console::style;
use robolink::{RobotType, Transport};

/// List supported robots. JSON goes to stdout, the human listing to stderr.
pub(crate) fn cmd_robots(json: bool) -> Result<()> {
    let profiles: Vec<_> = RobotType::ALL
        .iter()
        .map(|robot| robot.profile())
        .collect();

    if json {
        let text = serde_json::to_string_pretty(&profiles).context("Failed to encode robot list")?;
        println!("{text}");
        return Ok(());
    }

    eprintln!(
        "{}",
        style("Supported robots:")
            .bold()
            .underlined()
    );
    for profile in &profiles {
        let transport = match profile.transport {
            Transport::Binary => "binary frames",
            Transport::Json => "JSON commands",
        };
        eprintln!(
            "  {} {} [{}] {} baud, {}{}",
            style("•").green(),
            style(profile.robot).cyan(),
            style(profile.robot.id()).yellow(),
            profile.baud_rate,
            transport,
            profile
                .target_path
                .map(|path| format!(" -> {}", style(path).dim()))
                .unwrap_or_default()
        );
    }
    Ok(())
}
