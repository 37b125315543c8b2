//! `rig cache` - inspect the shared artifact store

use anyhow::Result;
use clap::Subcommand;
use tabled::{
    settings::{object::Rows, Alignment, Modify, Style},
    Table, Tabled,
};

use rigging_core::cache::list_entries;
use rigging_core::Settings;

#[derive(Subcommand, Debug)]
pub enum CacheCommand {
    /// List cached artifacts
    List {
        /// Output results as JSON
        #[clap(long)]
        json: bool,
    },
    /// Print the store directory
    Dir,
}

#[derive(Tabled)]
struct CacheTableRow {
    #[tabled(rename = "Artifact")]
    name: String,
    #[tabled(rename = "Version")]
    version: String,
    #[tabled(rename = "Path")]
    path: String,
}

pub fn execute(command: CacheCommand, settings: &Settings) -> Result<()> {
    match command {
        CacheCommand::List { json } => list(settings, json),
        CacheCommand::Dir => {
            println!("{}", settings.store_dir().display());
            Ok(())
        }
    }
}

fn list(settings: &Settings, json: bool) -> Result<()> {
    let entries = list_entries(&settings.store_dir())?;

    if json {
        let values: Vec<serde_json::Value> = entries
            .iter()
            .map(|e| {
                serde_json::json!({
                    "name": e.name,
                    "version": e.version,
                    "path": e.path.display().to_string(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&values)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("No cached artifacts in {}", settings.store_dir().display());
        return Ok(());
    }

    let rows: Vec<CacheTableRow> = entries
        .into_iter()
        .map(|e| CacheTableRow {
            name: e.name,
            version: e.version,
            path: e.path.display().to_string(),
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Rows::first()).with(Alignment::center()))
        .to_string();

    println!("{table}");
    Ok(())
}
