//! Module listing command

use acfs_core::types::Module;
use anyhow::Result;
use serde::Serialize;
use tabled::{
    settings::{object::Columns, Modify, Style, Width},
    Table, Tabled,
};

use super::Workspace;
use crate::cli::{Cli, ModulesArgs};
use crate::output;

#[derive(Tabled, Serialize)]
struct ModuleRow {
    id: String,
    phase: u8,
    #[tabled(rename = "run as")]
    run_as: String,
    dependencies: String,
    tags: String,
    flags: String,
    description: String,
}

impl From<&Module> for ModuleRow {
    fn from(module: &Module) -> Self {
        let mut flags = Vec::new();
        if module.optional {
            flags.push("optional");
        }
        if !module.enabled_by_default {
            flags.push("opt-in");
        }
        if module.installer_refs().next().is_some() {
            flags.push("verified");
        }

        Self {
            id: module.id.clone(),
            phase: module.phase,
            run_as: module.run_as.to_string(),
            dependencies: or_dash(module.dependencies.join(", ")),
            tags: or_dash(
                module
                    .tags
                    .iter()
                    .map(String::as_str)
                    .collect::<Vec<_>>()
                    .join(", "),
            ),
            flags: or_dash(flags.join(", ")),
            description: module.description.clone(),
        }
    }
}

fn or_dash(value: String) -> String {
    if value.is_empty() {
        "-".to_string()
    } else {
        value
    }
}

pub async fn run(args: &ModulesArgs, cli: &Cli) -> Result<()> {
    let workspace = Workspace::load(cli)?;
    let manifest = workspace.manifest()?;

    let modules: Vec<&Module> = manifest
        .modules()
        .iter()
        .filter(|m| args.category.as_deref().is_none_or(|c| m.category() == c))
        .filter(|m| args.tag.as_deref().is_none_or(|t| m.has_tag(t)))
        .filter(|m| args.phase.is_none_or(|p| m.phase == p))
        .collect();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&modules)?);
        return Ok(());
    }

    if modules.is_empty() {
        output::info("No modules match");
        return Ok(());
    }

    output::info(&format!(
        "{} of {} modules in {} (manifest v{})",
        modules.len(),
        manifest.len(),
        manifest.name(),
        manifest.version()
    ));

    let rows: Vec<ModuleRow> = modules.into_iter().map(ModuleRow::from).collect();
    let mut table = Table::new(rows);
    table
        .with(Style::sharp())
        .with(Modify::new(Columns::last()).with(Width::wrap(50)));
    println!("{}", table);
    Ok(())
}
