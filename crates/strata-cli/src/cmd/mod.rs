//! Subcommand implementations.

pub mod memory;
pub mod server;
pub mod system;

use crate::ui;
use std::future::Future;
use std::sync::Arc;
use strata_kernel::error::KernelError;
use strata_kernel::MemoryKernel;
use strata_types::config::KernelConfig;
use strata_types::error::StrataError;

/// Build a multi-threaded runtime or exit.
pub(crate) fn runtime() -> tokio::runtime::Runtime {
    match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            ui::error(&format!("Failed to start async runtime: {e}"));
            std::process::exit(1);
        }
    }
}

/// Show a context-aware message for kernel boot failures.
pub(crate) fn boot_kernel_error(e: &KernelError) {
    match e {
        KernelError::Strata(StrataError::Config(msg)) => ui::error_with_fix(
            &format!("Invalid configuration: {msg}"),
            "Inspect the effective settings with `strata config`",
        ),
        KernelError::Strata(StrataError::Storage(msg)) => ui::error_with_fix(
            &format!("Database error: {msg}"),
            "Check the sqlite path and that no other process holds the file",
        ),
        other => ui::error_with_fix(
            &format!("Failed to boot kernel: {other}"),
            "Run with RUST_LOG=debug for details",
        ),
    }
}

pub(crate) async fn boot_kernel(config: KernelConfig) -> MemoryKernel {
    match MemoryKernel::boot(config).await {
        Ok(kernel) => kernel,
        Err(e) => {
            boot_kernel_error(&e);
            std::process::exit(1);
        }
    }
}

/// Boot a kernel, run `f`, shut the kernel down, and exit non-zero when `f`
/// reports failure.
pub(crate) fn run_with_kernel<F, Fut>(config: KernelConfig, f: F)
where
    F: FnOnce(Arc<MemoryKernel>) -> Fut,
    Fut: Future<Output = bool>,
{
    let ok = runtime().block_on(async move {
        let kernel = Arc::new(boot_kernel(config).await);
        let ok = f(Arc::clone(&kernel)).await;
        kernel.shutdown().await;
        ok
    });
    if !ok {
        std::process::exit(1);
    }
}
