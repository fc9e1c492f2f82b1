//! Import of existing markdown notes as memories.
//!
//! Each file is split on `#`, `##` and `###` headings. Every section becomes
//! one memory whose scope, source and tags are inferred from the heading and
//! the file name.

use crate::cypher::slugify;
use crate::orchestrator::StorageOrchestrator;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use strata_types::memory::{CreateMemoryRequest, MemoryScope, MemorySource};
use tracing::{info, warn};

/// Sections shorter than this (trimmed, in chars) are skipped.
pub const MIN_SECTION_CHARS: usize = 10;

/// Chars of content shown per migrated section.
const PREVIEW_CHARS: usize = 100;

/// Heading used for text before the first heading.
const ROOT_HEADING: &str = "root";

/// Request body for a markdown import.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrateMarkdownRequest {
    pub markdown_paths: Vec<PathBuf>,
    pub agent_id: String,
    #[serde(default)]
    pub dry_run: bool,
}

/// One migrated (or would-be migrated) section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigratedSection {
    /// Memory id, or `(dry-run)`.
    pub id: String,
    pub content_preview: String,
}

/// Outcome of an import.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MigrationReport {
    pub migrated: usize,
    pub skipped: usize,
    pub errors: Vec<String>,
    pub memories: Vec<MigratedSection>,
}

/// A heading and the text under it.
#[derive(Debug, Clone, PartialEq)]
pub struct MarkdownSection {
    pub heading: String,
    pub level: usize,
    pub content: String,
}

/// Split markdown into sections at level 1-3 headings.
pub fn parse_sections(markdown: &str) -> Vec<MarkdownSection> {
    let mut sections = Vec::new();
    let mut heading = ROOT_HEADING.to_string();
    let mut level = 0;
    let mut lines: Vec<&str> = Vec::new();

    for line in markdown.lines() {
        if let Some((hashes, title)) = parse_heading(line) {
            if !lines.is_empty() {
                sections.push(MarkdownSection {
                    heading: heading.clone(),
                    level,
                    content: lines.join("\n").trim().to_string(),
                });
            }
            heading = title.to_string();
            level = hashes;
            lines.clear();
        } else {
            lines.push(line);
        }
    }

    if !lines.is_empty() {
        sections.push(MarkdownSection {
            heading,
            level,
            content: lines.join("\n").trim().to_string(),
        });
    }
    sections
}

/// `# Title` through `### Title`, with at least one space after the hashes.
fn parse_heading(line: &str) -> Option<(usize, &str)> {
    let hashes = line.chars().take_while(|c| *c == '#').count();
    if !(1..=3).contains(&hashes) {
        return None;
    }
    let rest = &line[hashes..];
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let title = rest.trim();
    if title.is_empty() {
        None
    } else {
        Some((hashes, title))
    }
}

/// File names like `2026-03-14.md` or `2026-03-14-standup.md`.
fn is_dated(file_stem: &str) -> bool {
    let bytes = file_stem.as_bytes();
    bytes.len() >= 10
        && bytes[..4].iter().all(u8::is_ascii_digit)
        && bytes[4] == b'-'
        && bytes[5..7].iter().all(u8::is_ascii_digit)
        && bytes[7] == b'-'
        && bytes[8..10].iter().all(u8::is_ascii_digit)
}

pub fn infer_scope(heading: &str, file_stem: &str) -> MemoryScope {
    let h = heading.to_lowercase();
    if h.contains("about") || h.contains("personal") {
        MemoryScope::User
    } else if h.contains("project") {
        MemoryScope::Project
    } else if h.contains("agent") {
        MemoryScope::Agent
    } else if h.contains("session") || is_dated(file_stem) {
        MemoryScope::Session
    } else {
        MemoryScope::Global
    }
}

pub fn infer_source(file_stem: &str) -> MemorySource {
    if is_dated(file_stem) {
        MemorySource::DailyDigest
    } else {
        MemorySource::Migration
    }
}

pub fn infer_tags(heading: &str, file_stem: &str) -> Vec<String> {
    let mut tags = vec!["migration".to_string()];
    if is_dated(file_stem) {
        tags.push("daily".to_string());
        tags.push(file_stem.to_string());
    }
    if heading != ROOT_HEADING {
        let slug = slugify(heading);
        if !slug.is_empty() {
            tags.push(slug);
        }
    }
    tags
}

fn preview(content: &str) -> String {
    content.chars().take(PREVIEW_CHARS).collect()
}

/// Import markdown files through the orchestrator.
///
/// Missing or unreadable files and failed sections are reported in
/// `errors`; they never abort the rest of the import.
pub async fn migrate_markdown(
    orchestrator: &StorageOrchestrator,
    paths: &[PathBuf],
    agent_id: &str,
    dry_run: bool,
) -> MigrationReport {
    let mut report = MigrationReport::default();

    for path in paths {
        let text = match tokio::fs::read_to_string(path).await {
            Ok(text) => text,
            Err(e) => {
                report.errors.push(format!("Failed to read {}: {e}", path.display()));
                report.skipped += 1;
                continue;
            }
        };
        let stem = file_stem(path);

        for section in parse_sections(&text) {
            if section.content.chars().count() < MIN_SECTION_CHARS {
                report.skipped += 1;
                continue;
            }

            if dry_run {
                report.memories.push(MigratedSection {
                    id: "(dry-run)".to_string(),
                    content_preview: preview(&section.content),
                });
                report.migrated += 1;
                continue;
            }

            let mut request = CreateMemoryRequest::new(
                agent_id,
                infer_scope(&section.heading, &stem),
                section.content.clone(),
            );
            request.tags = infer_tags(&section.heading, &stem);
            request.source = Some(infer_source(&stem));
            request.created_by = Some("migration".to_string());
            request.extract_entities = Some(true);

            match orchestrator.create_memory(request).await {
                Ok(result) => {
                    report.memories.push(MigratedSection {
                        id: result.memory.id.to_string(),
                        content_preview: preview(&section.content),
                    });
                    report.migrated += 1;
                }
                Err(e) => {
                    warn!(path = %path.display(), heading = %section.heading, error = %e, "Section migration failed");
                    report.errors.push(format!(
                        "Failed to migrate section \"{}\": {e}",
                        section.heading
                    ));
                }
            }
        }
    }

    info!(
        migrated = report.migrated,
        skipped = report.skipped,
        errors = report.errors.len(),
        dry_run,
        "Markdown import finished"
    );
    report
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}
