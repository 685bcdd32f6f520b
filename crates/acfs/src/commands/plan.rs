//! Plan preview command

use acfs_installer::selection::{resolve, ExecutionPlan};
use anyhow::{Context, Result};
use console::style;
use tabled::{settings::Style, Table, Tabled};

use super::Workspace;
use crate::cli::{Cli, PlanArgs};
use crate::output;

#[derive(Tabled)]
struct ExcludedRow {
    module: String,
    reason: String,
}

pub async fn run(args: &PlanArgs, cli: &Cli) -> Result<()> {
    let workspace = Workspace::load(cli)?;
    let manifest = workspace.manifest()?;
    let plan = resolve(&manifest, &args.selection.to_input())
        .context("Failed to resolve module selection")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(());
    }

    print_plan(&plan);

    if args.explain && !plan.excluded.is_empty() {
        output::header("Excluded");
        let rows: Vec<ExcludedRow> = plan
            .excluded
            .iter()
            .map(|e| ExcludedRow {
                module: e.id.clone(),
                reason: e.reason.to_string(),
            })
            .collect();
        let mut table = Table::new(rows);
        table.with(Style::sharp());
        println!("{}", table);
    }

    Ok(())
}

/// Phase-grouped listing shared with `install`
pub fn print_plan(plan: &ExecutionPlan) {
    output::header(&format!(
        "Execution plan: {} modules in {} phases",
        plan.len(),
        plan.phases().len()
    ));

    for (phase, entries) in plan.by_phase() {
        println!("\n  {}", style(format!("Phase {}", phase)).bold());
        for entry in entries {
            println!(
                "    {} {}",
                entry.id,
                style(format!("({})", entry.reason)).dim()
            );
        }
    }
    println!();

    for warning in &plan.warnings {
        output::warning(warning);
    }
    if plan.is_empty() {
        output::info("Nothing selected");
    }
}
