//! Volume management commands.
//!
//! Every command dispatches through the active provider. Providers without
//! volume support accept the calls and do nothing, so a notice is printed
//! instead of a result.

use anyhow::{Context as _, Result};
use colored::Colorize;
use opsbox_core::provider::VolumeService;
use opsbox_core::{Context, Provider, VolumeSpec, VolumeSupport};
use tabled::{Table, Tabled};

/// Print a notice and return true when the provider ignores volume calls.
fn unsupported(provider: &dyn Provider) -> bool {
    if provider.capabilities().volumes == VolumeSupport::Unsupported {
        println!(
            "{} {} does not support volumes; nothing was changed",
            "⚠".yellow().bold(),
            provider.name().bold()
        );
        return true;
    }
    false
}

/// Create a volume, optionally seeded from a file.
pub async fn create(
    provider: &dyn Provider,
    ctx: &Context,
    name: String,
    size_mb: u64,
    data: Option<String>,
    label: Option<String>,
) -> Result<()> {
    let spec = VolumeSpec { name, size_mb, label };
    let volume = provider
        .create_volume(ctx, &spec, data.as_deref().unwrap_or(""), provider.name())
        .await
        .with_context(|| format!("Failed to create volume {}", spec.name))?;

    if unsupported(provider) {
        return Ok(());
    }

    println!("{} Volume created: {}", "✓".green().bold(), volume.name.bold());
    if let Some(path) = &volume.path {
        println!("  {} {}", "Path:".dimmed(), path.display());
    }
    println!("  {} {}", "Size:".dimmed(), format_size(volume.size_mb));
    Ok(())
}

/// List volumes.
pub async fn ls(provider: &dyn Provider, ctx: &Context) -> Result<()> {
    let volumes = provider.list_volumes(ctx).await.context("Failed to list volumes")?;

    if unsupported(provider) {
        return Ok(());
    }

    if volumes.is_empty() {
        println!("No volumes found");
        return Ok(());
    }

    #[derive(Tabled)]
    struct VolumeRow {
        #[tabled(rename = "NAME")]
        name: String,
        #[tabled(rename = "SIZE")]
        size: String,
        #[tabled(rename = "LABEL")]
        label: String,
        #[tabled(rename = "ATTACHED TO")]
        attached: String,
        #[tabled(rename = "PATH")]
        path: String,
    }

    let rows: Vec<VolumeRow> = volumes
        .into_iter()
        .map(|v| VolumeRow {
            size: format_size(v.size_mb),
            label: v.label.unwrap_or_else(|| "-".to_string()),
            attached: match (v.attached_to, v.attach_slot) {
                (Some(instance), Some(slot)) => format!("{} (slot {})", instance, slot),
                (Some(instance), None) => instance,
                _ => "-".to_string(),
            },
            path: v.path.map(|p| p.display().to_string()).unwrap_or_else(|| "-".to_string()),
            name: v.name,
        })
        .collect();

    let table = Table::new(rows).to_string();
    println!("{}", table);

    Ok(())
}

/// Delete a volume.
pub async fn rm(provider: &dyn Provider, ctx: &Context, name: &str) -> Result<()> {
    provider
        .delete_volume(ctx, name)
        .await
        .with_context(|| format!("Failed to delete volume {}", name))?;

    if !unsupported(provider) {
        println!("{} Volume deleted: {}", "✓".green().bold(), name.bold());
    }
    Ok(())
}

/// Attach a volume to an instance.
pub async fn attach(
    provider: &dyn Provider,
    ctx: &Context,
    instance: &str,
    volume: &str,
    slot: u32,
) -> Result<()> {
    provider
        .attach_volume(ctx, instance, volume, slot)
        .await
        .with_context(|| format!("Failed to attach {} to {}", volume, instance))?;

    if !unsupported(provider) {
        println!(
            "{} Attached {} to {} (slot {})",
            "✓".green().bold(),
            volume.bold(),
            instance.bold(),
            slot
        );
    }
    Ok(())
}

/// Detach a volume from an instance.
pub async fn detach(
    provider: &dyn Provider,
    ctx: &Context,
    instance: &str,
    volume: &str,
) -> Result<()> {
    provider
        .detach_volume(ctx, instance, volume)
        .await
        .with_context(|| format!("Failed to detach {} from {}", volume, instance))?;

    if !unsupported(provider) {
        println!("{} Detached {} from {}", "✓".green().bold(), volume.bold(), instance.bold());
    }
    Ok(())
}

fn format_size(mb: u64) -> String {
    const GB: u64 = 1024;
    const TB: u64 = 1024 * GB;

    if mb >= TB {
        format!("{:.2}TB", mb as f64 / TB as f64)
    } else if mb >= GB {
        format!("{:.1}GB", mb as f64 / GB as f64)
    } else {
        format!("{}MB", mb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0MB");
        assert_eq!(format_size(512), "512MB");
        assert_eq!(format_size(1536), "1.5GB");
        assert_eq!(format_size(2 * 1024 * 1024), "2.00TB");
    }
}
