//! `opsbox instance` commands

use anyhow::{Context as _, Result};
use colored::Colorize;
use opsbox_core::compose::COMPOSE_LABEL;
use opsbox_core::provider::{InstanceService, InstanceStatus};
use opsbox_core::{Context, Provider};
use std::time::{Duration, SystemTime};
use tabled::{settings::Style, Table, Tabled};

#[derive(Tabled)]
struct InstanceRow {
    #[tabled(rename = "NAME")]
    name: String,
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "IMAGE")]
    image: String,
    #[tabled(rename = "STATUS")]
    status: String,
    #[tabled(rename = "IP")]
    ip: String,
    #[tabled(rename = "COMPOSE")]
    compose: String,
    #[tabled(rename = "CREATED")]
    created: String,
}

/// List instances on the active provider.
pub async fn ls(provider: &dyn Provider, ctx: &Context) -> Result<()> {
    let instances = provider.list_instances(ctx).await.context("Failed to list instances")?;

    if instances.is_empty() {
        println!("No instances on {}", provider.name());
        return Ok(());
    }

    let now = SystemTime::now();
    let rows: Vec<InstanceRow> = instances
        .into_iter()
        .map(|instance| InstanceRow {
            compose: instance.label(COMPOSE_LABEL).unwrap_or("-").to_string(),
            created: instance
                .created_at
                .and_then(|t| now.duration_since(t).ok())
                .map(|age| format!("{} ago", format_duration(age)))
                .unwrap_or_else(|| "-".to_string()),
            status: colorize_status(instance.status),
            ip: instance.ip.unwrap_or_else(|| "-".to_string()),
            name: instance.name,
            id: instance.id,
            image: instance.image,
        })
        .collect();

    let mut table = Table::new(rows);
    table.with(Style::modern());
    println!("{}", table);

    Ok(())
}

/// Delete an instance.
pub async fn rm(provider: &dyn Provider, ctx: &Context, name: &str) -> Result<()> {
    provider
        .delete_instance(ctx, name)
        .await
        .with_context(|| format!("Failed to delete instance {}", name))?;
    println!("{} Instance deleted: {}", "✓".green().bold(), name.bold());
    Ok(())
}

fn colorize_status(status: InstanceStatus) -> String {
    let text = status.to_string();
    match status {
        InstanceStatus::Running => text.green().to_string(),
        InstanceStatus::Stopped => text.red().to_string(),
        InstanceStatus::Pending => text.yellow().to_string(),
        InstanceStatus::Unknown => text,
    }
}

/// Format duration as human-readable string
fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();

    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else if secs < 86400 {
        format!("{}h", secs / 3600)
    } else {
        format!("{}d", secs / 86400)
    }
}
