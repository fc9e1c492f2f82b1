//! Score normalization and cross-layer fusion.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use strata_types::config::RankingConfig;
use strata_types::memory::MemoryId;
use strata_types::search::{GraphContext, ScoredMemory, SourceLayer};

/// Full-text rank divisor: a rank of -20 or better maps to 1.0.
const FTS_RANK_SCALE: f64 = 20.0;

/// Map a raw FTS5 rank (negative, lower is better) into `[0, 1]`.
pub fn normalize_fts_score(rank: f64) -> f64 {
    (-rank / FTS_RANK_SCALE).clamp(0.0, 1.0)
}

/// `max(floor, decay ^ days_old)`. Future timestamps count as zero days.
pub fn recency_multiplier(
    created_at: DateTime<Utc>,
    now: DateTime<Utc>,
    ranking: &RankingConfig,
) -> f64 {
    let days = (now - created_at).num_milliseconds().max(0) as f64 / 86_400_000.0;
    ranking.recency_decay.powf(days).max(ranking.recency_floor)
}

/// Bonus for a memory found by `layers` distinct layers.
pub fn multi_layer_bonus(layers: usize, ranking: &RankingConfig) -> f64 {
    layers.saturating_sub(1) as f64 * ranking.layer_bonus
}

/// Preference when picking which layer's copy of the record to return.
/// The graph layer holds truncated content and no tags, so it ranks last.
fn fidelity(layer: SourceLayer) -> u8 {
    match layer {
        SourceLayer::Sqlite => 2,
        SourceLayer::Qdrant => 1,
        SourceLayer::Age => 0,
    }
}

struct Group {
    best: ScoredMemory,
    body: ScoredMemory,
    layers: Vec<SourceLayer>,
    context: Option<GraphContext>,
}

/// Fuse per-layer hits into one ranked list.
///
/// Hits are grouped by memory id. Each group keeps its best raw score and
/// the layer that produced it, the union of every graph annotation, and the
/// record body from the most complete layer that returned it. The score is
/// then scaled by recency, raised by the multi-layer bonus, and clamped to
/// `[0, 1]`. Output is sorted by score; equal scores keep first-seen order.
pub fn merge_results(
    hits: Vec<ScoredMemory>,
    limit: usize,
    ranking: &RankingConfig,
    now: DateTime<Utc>,
) -> Vec<ScoredMemory> {
    let mut order: Vec<MemoryId> = Vec::new();
    let mut groups: HashMap<MemoryId, Group> = HashMap::new();

    for hit in hits {
        let id = hit.memory.id;
        match groups.get_mut(&id) {
            Some(group) => {
                if !group.layers.contains(&hit.source_layer) {
                    group.layers.push(hit.source_layer);
                }
                if let Some(ref ctx) = hit.graph_context {
                    group.context.get_or_insert_with(GraphContext::default).merge(ctx);
                }
                if fidelity(hit.source_layer) > fidelity(group.body.source_layer) {
                    group.body = hit.clone();
                }
                if hit.score > group.best.score {
                    group.best = hit;
                }
            }
            None => {
                order.push(id);
                groups.insert(
                    id,
                    Group {
                        layers: vec![hit.source_layer],
                        context: hit.graph_context.clone(),
                        body: hit.clone(),
                        best: hit,
                    },
                );
            }
        }
    }

    let mut merged: Vec<ScoredMemory> = order
        .into_iter()
        .filter_map(|id| groups.remove(&id))
        .map(|group| {
            let base = group.best.score;
            let score = (base * recency_multiplier(group.body.memory.created_at, now, ranking)
                + multi_layer_bonus(group.layers.len(), ranking))
            .clamp(0.0, 1.0);
            ScoredMemory {
                memory: group.body.memory,
                score,
                source_layer: group.best.source_layer,
                graph_context: group.context.filter(|c| !c.related_entities.is_empty()),
            }
        })
        .collect();

    merged.sort_by(|a, b| b.score.total_cmp(&a.score));
    merged.truncate(limit);
    merged
}
