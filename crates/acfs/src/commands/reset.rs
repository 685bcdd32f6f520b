//! Reset command

use anyhow::{Context, Result};
use dialoguer::Confirm;

use super::Workspace;
use crate::cli::{Cli, ResetArgs};
use crate::output;

pub async fn run(args: &ResetArgs, cli: &Cli) -> Result<()> {
    let workspace = Workspace::load(cli)?;
    let store = workspace.state_store();

    if !store.path().exists() {
        output::info(&format!("No installation state at {}", store.path()));
        return Ok(());
    }

    if !args.yes {
        let confirmed = Confirm::new()
            .with_prompt("Discard installation progress? The next install starts from phase 1")
            .default(false)
            .interact()?;
        if !confirmed {
            output::info("Reset cancelled");
            return Ok(());
        }
    }

    if store
        .reset()
        .with_context(|| format!("Failed to discard {}", store.path()))?
    {
        output::success(&format!("Removed {}", store.path()));
    }
    Ok(())
}
