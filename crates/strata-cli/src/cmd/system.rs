//! System commands: status, sync, migrate, config.

use crate::cmd::run_with_kernel;
use crate::ui;
use serde_json::json;
use std::path::{Path, PathBuf};
use strata_kernel::config::{config_summary, default_config_path};
use strata_types::config::KernelConfig;
use strata_types::sync::LayerHealth;

fn health_line(label: &str, health: LayerHealth, detail: Option<&String>) {
    match health {
        LayerHealth::Ok => ui::kv_ok(label, "ok"),
        LayerHealth::Disabled => ui::kv(label, "disabled"),
        LayerHealth::Error => ui::kv_warn(
            label,
            &format!("error ({})", detail.map(String::as_str).unwrap_or("unknown")),
        ),
    }
}

fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

pub fn cmd_status(config: KernelConfig, json: bool) {
    run_with_kernel(config, move |kernel| async move {
        let health = kernel.health().await;
        let stats = match kernel.stats().await {
            Ok(stats) => stats,
            Err(e) => {
                ui::error(&format!("Failed to read store statistics: {e}"));
                return false;
            }
        };

        if json {
            ui::json(&json!({ "health": health, "stats": stats }));
            return true;
        }

        ui::section(&format!("Strata (tier: {})", health.tier));
        health_line("SQLite", health.sqlite, health.details.get("sqlite"));
        health_line("Qdrant", health.qdrant, health.details.get("qdrant"));
        health_line("AGE", health.age, health.details.get("age"));
        ui::blank();
        ui::kv("Memories", &stats.memory_count.to_string());
        ui::kv("Database", &human_bytes(stats.database_bytes));
        ui::kv("Sync queue", &stats.pending_sync_items.to_string());
        if let Some(points) = stats.vector_points {
            ui::kv("Vectors", &points.to_string());
        }
        if let Some(graph) = stats.graph {
            ui::kv(
                "Graph",
                &format!(
                    "{} entities, {} relationships",
                    graph.entity_count, graph.relationship_count
                ),
            );
        }
        if stats.pending_sync_items > 0 {
            ui::hint("Run `strata sync` to retry queued layer writes");
        }
        true
    });
}

pub fn cmd_sync(config: KernelConfig, json: bool) {
    run_with_kernel(config, move |kernel| async move {
        match kernel.retry_sync_queue().await {
            Ok(stats) => {
                if json {
                    ui::json(&stats);
                } else {
                    ui::success(&format!(
                        "Processed {} item(s): {} succeeded, {} failed",
                        stats.processed, stats.succeeded, stats.failed
                    ));
                }
                true
            }
            Err(e) => {
                ui::error(&format!("Sync failed: {e}"));
                false
            }
        }
    });
}

pub fn cmd_migrate(
    config: KernelConfig,
    json: bool,
    paths: Vec<PathBuf>,
    agent: String,
    dry_run: bool,
) {
    run_with_kernel(config, move |kernel| async move {
        let report = match kernel.migrate_markdown(&paths, &agent, dry_run).await {
            Ok(report) => report,
            Err(e) => {
                ui::error(&format!("Migration failed: {e}"));
                return false;
            }
        };

        if json {
            ui::json(&report);
            return report.errors.is_empty();
        }

        let verb = if dry_run { "Would migrate" } else { "Migrated" };
        ui::success(&format!(
            "{verb} {} section(s), skipped {}",
            report.migrated, report.skipped
        ));
        for section in &report.memories {
            println!("    {}  {}", section.id, ui::preview(&section.content_preview, 60));
        }
        for error in &report.errors {
            ui::error(error);
        }
        report.errors.is_empty()
    });
}

pub fn cmd_config(config: &KernelConfig, path: Option<&Path>, json: bool) {
    let path = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);
    let summary = config_summary(config);

    if json {
        let lines: Vec<&str> = summary.lines().collect();
        ui::json(&json!({ "path": path, "summary": lines }));
        return;
    }

    ui::section("Effective configuration");
    ui::kv("File", &path.display().to_string());
    if !path.exists() {
        ui::hint("File not found; defaults and environment overrides apply");
    }
    ui::blank();
    for line in summary.lines() {
        println!("  {line}");
    }
}
