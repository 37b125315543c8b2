//! `rig commands` - show which artifact backs each command

use anyhow::Result;
use tabled::{
    settings::{object::Rows, Alignment, Modify, Style},
    Table, Tabled,
};

use rigging_core::{CommandTable, Settings};

#[derive(Tabled)]
struct CommandTableRow {
    #[tabled(rename = "Command")]
    command: String,
    #[tabled(rename = "Artifact")]
    artifact: String,
}

/// Built-in commands plus the ones registered in config.yaml
fn command_table(settings: &Settings) -> CommandTable {
    let mut table = CommandTable::builtin();
    table.extend(&settings.commands);
    table
}

pub fn execute(settings: &Settings, json: bool) -> Result<()> {
    let table = command_table(settings);

    if json {
        let listing: serde_json::Map<String, serde_json::Value> = table
            .iter()
            .map(|(command, artifact)| (command.to_string(), artifact.into()))
            .collect();
        println!("{}", serde_json::to_string_pretty(&listing)?);
        return Ok(());
    }

    let rows: Vec<CommandTableRow> = table
        .iter()
        .map(|(command, artifact)| CommandTableRow {
            command: command.to_string(),
            artifact: artifact.to_string(),
        })
        .collect();

    let output = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Rows::first()).with(Alignment::center()))
        .to_string();

    println!("{output}");
    Ok(())
}
