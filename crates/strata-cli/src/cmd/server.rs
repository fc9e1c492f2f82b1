//! `strata start`: serve the HTTP API.

use crate::cmd::boot_kernel;
use crate::ui;
use std::sync::Arc;
use strata_types::config::KernelConfig;
use tracing::info;

fn on_off(enabled: bool) -> &'static str {
    if enabled {
        "enabled"
    } else {
        "disabled"
    }
}

pub fn cmd_start(config: KernelConfig) {
    super::runtime().block_on(async {
        let kernel = Arc::new(boot_kernel(config).await);
        let plan = kernel.layer_plan();
        let listen = kernel.config().listen_addr();

        ui::success(&format!("Kernel booted (tier: {})", plan.tier));
        ui::blank();
        ui::kv("API", &format!("http://{listen}"));
        ui::kv("Vector", on_off(plan.vector));
        ui::kv("Graph", on_off(plan.graph));
        ui::kv("Embeddings", on_off(plan.embedding));
        ui::kv("Extraction", on_off(plan.extraction));
        ui::kv("Summaries", on_off(plan.summarizer));
        ui::blank();
        ui::hint("Press Ctrl+C to stop");
        ui::blank();

        let shutdown = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %e, "Failed to listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
            info!("Shutdown requested");
        };

        let served = strata_api::serve(Arc::clone(&kernel), shutdown).await;
        kernel.shutdown().await;

        match served {
            Ok(()) => ui::success("Stopped"),
            Err(e) => {
                ui::error_with_fix(
                    &format!("Server error on {listen}: {e}"),
                    "Choose a free port with `port` in config or STRATA_PORT",
                );
                std::process::exit(1);
            }
        }
    });
}
