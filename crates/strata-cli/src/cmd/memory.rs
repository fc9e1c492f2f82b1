//! Memory commands: store, search, get, delete.

use crate::cmd::run_with_kernel;
use crate::ui;
use serde_json::json;
use strata_types::config::KernelConfig;
use strata_types::memory::{CreateMemoryRequest, MemoryId, MemoryScope};
use strata_types::search::{SearchRequest, SearchStrategy, SourceLayer};
use strata_types::sync::LayerSyncStatus;

pub struct StoreArgs {
    pub content: String,
    pub agent: String,
    pub scope: MemoryScope,
    pub subject: Option<String>,
    pub tags: Vec<String>,
    pub no_extract: bool,
}

pub struct SearchArgs {
    pub query: String,
    pub agent: Option<String>,
    pub limit: usize,
    pub strategy: Option<SearchStrategy>,
    pub scopes: Vec<MemoryScope>,
    pub cross_agent: bool,
}

fn sync_label(status: LayerSyncStatus) -> &'static str {
    match status {
        LayerSyncStatus::Ok => "ok",
        LayerSyncStatus::Queued => "queued",
        LayerSyncStatus::Disabled => "disabled",
    }
}

fn layer_label(layer: SourceLayer) -> &'static str {
    match layer {
        SourceLayer::Sqlite => "sqlite",
        SourceLayer::Qdrant => "qdrant",
        SourceLayer::Age => "age",
    }
}

fn parse_id(raw: &str) -> Option<MemoryId> {
    match raw.parse() {
        Ok(id) => Some(id),
        Err(_) => {
            ui::error(&format!("Not a memory id: {raw}"));
            None
        }
    }
}

pub fn cmd_store(config: KernelConfig, json: bool, args: StoreArgs) {
    let mut request = CreateMemoryRequest::new(args.agent, args.scope, args.content);
    request.subject_id = args.subject;
    request.tags = args.tags;
    request.created_by = Some("cli".to_string());
    if args.no_extract {
        request.extract_entities = Some(false);
    }

    run_with_kernel(config, move |kernel| async move {
        match kernel.create_memory(request).await {
            Ok(result) => {
                if json {
                    ui::json(&result);
                } else {
                    ui::success(&format!("Stored memory {}", result.memory.id));
                    ui::kv("Qdrant", sync_label(result.sync_status.qdrant));
                    ui::kv("AGE", sync_label(result.sync_status.age));
                    if !result.memory.entities.is_empty() {
                        let names: Vec<&str> =
                            result.memory.entities.iter().map(|e| e.name.as_str()).collect();
                        ui::kv("Entities", &names.join(", "));
                    }
                }
                true
            }
            Err(e) => {
                ui::error(&format!("Store failed: {e}"));
                false
            }
        }
    });
}

pub fn cmd_search(config: KernelConfig, json: bool, args: SearchArgs) {
    let request = SearchRequest {
        agent_id: args.agent,
        query: args.query,
        scopes: (!args.scopes.is_empty()).then_some(args.scopes),
        subject_id: None,
        limit: Some(args.limit),
        include_graph: None,
        cross_agent: Some(args.cross_agent),
        strategy: args.strategy,
    };

    run_with_kernel(config, move |kernel| async move {
        let response = match kernel.search(&request).await {
            Ok(response) => response,
            Err(e) => {
                ui::error(&format!("Search failed: {e}"));
                return false;
            }
        };

        if json {
            ui::json(&response);
            return true;
        }

        ui::section(&format!(
            "{} result(s) for \"{}\" (strategy: {})",
            response.results.len(),
            request.query,
            response.strategy_used
        ));
        for hit in &response.results {
            println!(
                "  {:.3}  [{:<6}]  {}  {}",
                hit.score,
                layer_label(hit.source_layer),
                hit.memory.id,
                ui::preview(&hit.memory.content, 70)
            );
        }
        let stats = &response.layer_stats;
        for (name, stat) in [("sqlite", stats.sqlite), ("qdrant", stats.qdrant), ("age", stats.age)] {
            if let Some(stat) = stat {
                ui::hint(&format!("{name}: {} hit(s) in {}ms", stat.count, stat.ms));
            }
        }
        true
    });
}

pub fn cmd_get(config: KernelConfig, json: bool, id: &str) {
    let Some(id) = parse_id(id) else {
        std::process::exit(1);
    };

    run_with_kernel(config, move |kernel| async move {
        match kernel.get_memory(&id) {
            Ok(Some(memory)) => {
                if json {
                    ui::json(&memory);
                } else {
                    ui::section(&format!("Memory {}", memory.id));
                    ui::kv("Agent", &memory.agent_id);
                    ui::kv("Scope", memory.scope.as_str());
                    ui::kv("Source", memory.source.as_str());
                    if let Some(ref subject) = memory.subject_id {
                        ui::kv("Subject", subject);
                    }
                    if !memory.tags.is_empty() {
                        ui::kv("Tags", &memory.tags.join(", "));
                    }
                    ui::kv("Created", &memory.created_at.to_rfc3339());
                    ui::kv("Updated", &memory.updated_at.to_rfc3339());
                    ui::kv(
                        "Embedded",
                        if memory.embedding_hash.is_some() { "yes" } else { "no" },
                    );
                    ui::blank();
                    println!("{}", memory.content);
                }
                true
            }
            Ok(None) => {
                ui::error(&format!("Memory not found: {id}"));
                false
            }
            Err(e) => {
                ui::error(&format!("Lookup failed: {e}"));
                false
            }
        }
    });
}

pub fn cmd_delete(config: KernelConfig, json: bool, id: &str) {
    let Some(id) = parse_id(id) else {
        std::process::exit(1);
    };

    run_with_kernel(config, move |kernel| async move {
        match kernel.delete_memory(&id).await {
            Ok(deleted) => {
                if json {
                    ui::json(&json!({ "id": id, "deleted": deleted }));
                } else if deleted {
                    ui::success(&format!("Deleted memory {id}"));
                } else {
                    ui::error(&format!("Memory not found: {id}"));
                }
                deleted
            }
            Err(e) => {
                ui::error(&format!("Delete failed: {e}"));
                false
            }
        }
    });
}
