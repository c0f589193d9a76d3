//! Compose CLI commands.

use super::spinner;
use anyhow::{Context, Result};
use colored::Colorize;
use opsbox_core::{network, ComposeOrchestrator, ComposeRequest, HostInfo, ProviderFactory};
use std::sync::Arc;
use tabled::{settings::Style, Table, Tabled};

fn orchestrator(host: HostInfo) -> ComposeOrchestrator {
    ComposeOrchestrator::new(Arc::new(ProviderFactory), network::create_interconnect(), host)
}

#[derive(Tabled)]
struct MemberRow {
    #[tabled(rename = "INSTANCE")]
    name: String,
    #[tabled(rename = "STATE")]
    state: String,
}

fn print_members(rows: Vec<MemberRow>) {
    if rows.is_empty() {
        return;
    }
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{}", table);
}

/// Boot every service of a compose file.
pub async fn up(request: ComposeRequest, host: HostInfo) -> Result<()> {
    let orchestrator = orchestrator(host);

    let spinner = spinner("Starting compose set...", "green")?;
    let result = orchestrator.up(&request).await;
    spinner.finish_and_clear();
    let report = result.context("Failed to bring compose set up")?;

    println!(
        "{} Compose set {} is up ({} instance(s))",
        "✓".green().bold(),
        report.fingerprint.short().bold(),
        report.instances.len()
    );
    if let Some(bridge) = &report.bridge {
        println!("  {} bridge {}", "•".dimmed(), bridge.bold());
    }
    println!();

    print_members(
        report
            .instances
            .into_iter()
            .map(|name| MemberRow { name, state: "created".green().to_string() })
            .collect(),
    );

    Ok(())
}

/// Tear down the instances and bridge of a compose file.
pub async fn down(request: ComposeRequest, host: HostInfo) -> Result<()> {
    let orchestrator = orchestrator(host);

    let spinner = spinner("Stopping compose set...", "yellow")?;
    let result = orchestrator.down(&request).await;
    spinner.finish_and_clear();
    let report = result.context("Failed to bring compose set down")?;

    println!(
        "{} Compose set {} is down ({} deleted)",
        "✓".green().bold(),
        report.fingerprint.short().bold(),
        report.deleted.len()
    );
    match &report.bridge_removed {
        Some(bridge) => println!("  {} removed bridge {}", "•".dimmed(), bridge.bold()),
        None => println!("  {}", "no bridge removed".dimmed()),
    }
    println!();

    let rows = report
        .deleted
        .into_iter()
        .map(|name| MemberRow { name, state: "deleted".red().to_string() })
        .chain(
            report
                .skipped_not_found
                .into_iter()
                .map(|name| MemberRow { name, state: "already gone".yellow().to_string() }),
        )
        .collect();
    print_members(rows);

    Ok(())
}
