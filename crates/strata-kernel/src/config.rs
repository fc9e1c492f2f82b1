//! Configuration loading from `~/.strata/config.toml`, environment overrides
//! and layer resolution.
//!
//! The file may name other TOML files in an `include` list; they are
//! deep-merged first and the including file overrides them. `STRATA_*`
//! environment variables are applied on top of the merged file.

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use strata_types::config::{strata_home, KernelConfig, Tier};
use strata_types::error::{StrataError, StrataResult};
use tracing::{info, warn};

/// Maximum include nesting depth.
const MAX_INCLUDE_DEPTH: u32 = 10;

/// Generic key used for both LLM collaborators when no dedicated key is set.
const FALLBACK_API_KEY_VAR: &str = "OPENAI_API_KEY";

/// Load the config file (or defaults), then apply environment overrides.
///
/// A missing, unreadable or malformed file falls back to defaults with a
/// warning; it never fails the load.
pub fn load_config(path: Option<&Path>) -> KernelConfig {
    let mut config = load_config_file(path);
    apply_env_overrides(&mut config);
    config
}

/// Load only the file layer, without environment overrides.
pub fn load_config_file(path: Option<&Path>) -> KernelConfig {
    let config_path = path
        .map(Path::to_path_buf)
        .unwrap_or_else(default_config_path);

    if !config_path.exists() {
        info!(path = %config_path.display(), "Config file not found, using defaults");
        return KernelConfig::default();
    }

    match read_merged(&config_path).and_then(|value| {
        value
            .try_into::<KernelConfig>()
            .map_err(|e| format!("invalid config: {e}"))
    }) {
        Ok(config) => {
            info!(path = %config_path.display(), "Loaded configuration");
            config
        }
        Err(e) => {
            warn!(error = %e, path = %config_path.display(), "Failed to load config, using defaults");
            KernelConfig::default()
        }
    }
}

/// Read a config file and resolve its includes into one TOML value.
fn read_merged(config_path: &Path) -> Result<toml::Value, String> {
    let contents = std::fs::read_to_string(config_path)
        .map_err(|e| format!("failed to read {}: {e}", config_path.display()))?;
    let mut root: toml::Value = toml::from_str(&contents)
        .map_err(|e| format!("failed to parse {}: {e}", config_path.display()))?;

    let config_dir = config_path.parent().unwrap_or_else(|| Path::new("."));
    let mut visited = HashSet::new();
    visited.insert(std::fs::canonicalize(config_path).unwrap_or_else(|_| config_path.to_path_buf()));

    if let Err(e) = resolve_includes(&mut root, config_dir, &mut visited, 0) {
        warn!(error = %e, "Config include resolution failed, using root config only");
    }
    strip_include(&mut root);
    Ok(root)
}

fn strip_include(value: &mut toml::Value) {
    if let toml::Value::Table(tbl) = value {
        tbl.remove("include");
    }
}

/// Replace `root` with its includes deep-merged underneath it.
///
/// Include paths must be relative, must not contain `..`, must stay inside
/// the including file's directory and must not form a cycle.
fn resolve_includes(
    root: &mut toml::Value,
    config_dir: &Path,
    visited: &mut HashSet<PathBuf>,
    depth: u32,
) -> Result<(), String> {
    if depth > MAX_INCLUDE_DEPTH {
        return Err(format!("include depth exceeds {MAX_INCLUDE_DEPTH}"));
    }

    let includes: Vec<String> = match root.get("include").and_then(|v| v.as_array()) {
        Some(arr) => arr.iter().filter_map(|v| v.as_str().map(String::from)).collect(),
        None => return Ok(()),
    };
    if includes.is_empty() {
        return Ok(());
    }

    let canonical_dir = std::fs::canonicalize(config_dir)
        .map_err(|e| format!("config dir cannot be canonicalized: {e}"))?;
    let mut merged = toml::Value::Table(toml::map::Map::new());

    for include in &includes {
        let include_path = Path::new(include);
        if include_path.is_absolute() {
            return Err(format!("absolute include path rejected: {include}"));
        }
        if include_path.components().any(|c| matches!(c, Component::ParentDir)) {
            return Err(format!("include path traversal rejected: {include}"));
        }

        let canonical = std::fs::canonicalize(config_dir.join(include_path))
            .map_err(|e| format!("include '{include}' cannot be resolved: {e}"))?;
        if !canonical.starts_with(&canonical_dir) {
            return Err(format!("include '{include}' escapes the config directory"));
        }
        if !visited.insert(canonical.clone()) {
            return Err(format!("circular include: {include}"));
        }

        info!(include = %include, "Loading config include");
        let contents = std::fs::read_to_string(&canonical)
            .map_err(|e| format!("failed to read include '{include}': {e}"))?;
        let mut value: toml::Value = toml::from_str(&contents)
            .map_err(|e| format!("failed to parse include '{include}': {e}"))?;

        let include_dir = canonical.parent().unwrap_or(config_dir).to_path_buf();
        resolve_includes(&mut value, &include_dir, visited, depth + 1)?;
        strip_include(&mut value);
        deep_merge_toml(&mut merged, &value);
    }

    let mut own = root.clone();
    strip_include(&mut own);
    deep_merge_toml(&mut merged, &own);
    *root = merged;
    Ok(())
}

/// Deep-merge two TOML values. Tables merge key by key; anything else in
/// `overlay` replaces `base`.
pub fn deep_merge_toml(base: &mut toml::Value, overlay: &toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base_tbl), toml::Value::Table(overlay_tbl)) => {
            for (key, overlay_val) in overlay_tbl {
                match base_tbl.get_mut(key) {
                    Some(base_val) => deep_merge_toml(base_val, overlay_val),
                    None => {
                        base_tbl.insert(key.clone(), overlay_val.clone());
                    }
                }
            }
        }
        (base, overlay) => *base = overlay.clone(),
    }
}

/// Apply `STRATA_*` overrides from the process environment.
pub fn apply_env_overrides(config: &mut KernelConfig) {
    apply_overrides(config, |key| std::env::var(key).ok());
}

/// Apply overrides from an arbitrary variable source.
///
/// Empty values are ignored. Values that fail to parse are logged and
/// ignored.
pub fn apply_overrides<F>(config: &mut KernelConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    fn parsed<T: std::str::FromStr>(key: &str, raw: Option<String>) -> Option<T> {
        let raw = raw?;
        match raw.trim().parse() {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(var = key, value = %raw, "Ignoring unparseable environment override");
                None
            }
        }
    }

    if let Some(tier) = get("STRATA_TIER") {
        match tier.parse::<Tier>() {
            Ok(t) => config.tier = Some(t),
            Err(e) => warn!(error = %e, "Ignoring STRATA_TIER"),
        }
    }
    if let Some(port) = parsed("STRATA_PORT", get("STRATA_PORT")) {
        config.port = port;
    }
    if let Some(host) = get("STRATA_HOST") {
        config.host = host;
    }
    if let Some(level) = get("STRATA_LOG_LEVEL") {
        config.log_level = level;
    }
    if let Some(token) = get("STRATA_AUTH_TOKEN") {
        config.auth_token = Some(token);
    }
    if let Some(path) = get("STRATA_SQLITE_PATH") {
        config.sqlite.path = PathBuf::from(path);
    }

    if let Some(url) = get("STRATA_QDRANT_URL") {
        config.qdrant.url = Some(url);
    }
    if let Some(collection) = get("STRATA_QDRANT_COLLECTION") {
        config.qdrant.collection = collection;
    }
    if let Some(key) = get("STRATA_QDRANT_API_KEY") {
        config.qdrant.api_key = Some(key);
    }

    if let Some(host) = get("STRATA_AGE_HOST") {
        config.age.host = Some(host);
    }
    if let Some(port) = parsed("STRATA_AGE_PORT", get("STRATA_AGE_PORT")) {
        config.age.port = port;
    }
    if let Some(user) = get("STRATA_AGE_USER") {
        config.age.user = Some(user);
    }
    if let Some(password) = get("STRATA_AGE_PASSWORD") {
        config.age.password = Some(password);
    }
    if let Some(database) = get("STRATA_AGE_DATABASE") {
        config.age.database = Some(database);
    }
    if let Some(graph) = get("STRATA_AGE_GRAPH") {
        config.age.graph = graph;
    }

    let fallback_key = get(FALLBACK_API_KEY_VAR);

    if let Some(key) = get("STRATA_EMBEDDING_API_KEY") {
        config.embedding.api_key = Some(key);
    } else if config.embedding.api_key.is_none() {
        config.embedding.api_key = fallback_key.clone();
    }
    if let Some(url) = get("STRATA_EMBEDDING_BASE_URL") {
        config.embedding.base_url = url;
    }
    if let Some(model) = get("STRATA_EMBEDDING_MODEL") {
        config.embedding.model = model;
    }
    if let Some(dims) = parsed("STRATA_EMBEDDING_DIMENSIONS", get("STRATA_EMBEDDING_DIMENSIONS")) {
        config.embedding.dimensions = dims;
    }

    if let Some(key) = get("STRATA_EXTRACTION_API_KEY") {
        config.extraction.api_key = Some(key);
    } else if config.extraction.api_key.is_none() {
        config.extraction.api_key = fallback_key;
    }
    if let Some(url) = get("STRATA_EXTRACTION_BASE_URL") {
        config.extraction.base_url = url;
    }
    if let Some(model) = get("STRATA_EXTRACTION_MODEL") {
        config.extraction.model = model;
    }
    if let Some(enabled) = get("STRATA_EXTRACTION_ENABLED") {
        config.extraction.enabled = enabled.trim() != "false";
    }
}

/// Which optional layers and collaborators a config activates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerPlan {
    pub tier: Tier,
    pub vector: bool,
    pub graph: bool,
    pub embedding: bool,
    pub extraction: bool,
    pub summarizer: bool,
}

/// Resolve the tier and the layers it activates.
///
/// A full tier with an AGE host but no user, password or database is a
/// configuration error.
pub fn plan_layers(config: &KernelConfig) -> StrataResult<LayerPlan> {
    let tier = config.resolved_tier();
    let age = &config.age;

    let graph = tier.allows_graph() && age.host.is_some();
    if graph && (age.user.is_none() || age.password.is_none() || age.database.is_none()) {
        return Err(StrataError::Config(
            "full tier requires age.user, age.password and age.database".to_string(),
        ));
    }

    let llm_key = config.extraction.api_key.is_some();
    Ok(LayerPlan {
        tier,
        vector: tier.allows_vector() && config.qdrant.url.is_some(),
        graph,
        embedding: tier.allows_llm() && config.embedding.api_key.is_some(),
        extraction: tier.allows_llm() && llm_key && config.extraction.enabled,
        summarizer: tier.allows_llm() && llm_key,
    })
}

/// Expand a leading `~/` to the home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => dirs::home_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join(rest),
        Err(_) => path.to_path_buf(),
    }
}

/// Human-readable settings with every secret left out.
pub fn config_summary(config: &KernelConfig) -> String {
    let mut lines = vec![format!("Tier: {}", config.resolved_tier())];
    lines.push(format!("Listen: {}", config.listen_addr()));
    lines.push(format!("SQLite: {}", expand_home(&config.sqlite.path).display()));
    lines.push(format!(
        "Auth: {}",
        if config.auth_token.is_some() { "enabled" } else { "disabled" }
    ));

    match &config.qdrant.url {
        Some(url) => lines.push(format!("Qdrant: {url} (collection: {})", config.qdrant.collection)),
        None => lines.push("Qdrant: not configured".to_string()),
    }
    match &config.age.host {
        Some(host) => lines.push(format!(
            "AGE: {host}:{}/{} (graph: {})",
            config.age.port,
            config.age.database.as_deref().unwrap_or("?"),
            config.age.graph
        )),
        None => lines.push("AGE: not configured".to_string()),
    }
    lines.push(format!(
        "Embeddings: {} ({} dims, key {})",
        config.embedding.model,
        config.embedding.dimensions,
        if config.embedding.api_key.is_some() { "set" } else { "missing" }
    ));
    lines.push(format!(
        "Extraction: {} ({}, key {})",
        config.extraction.model,
        if config.extraction.enabled { "enabled" } else { "disabled" },
        if config.extraction.api_key.is_some() { "set" } else { "missing" }
    ));
    lines.push(format!("Sync interval: {}s", config.sync.interval_secs));
    lines.join("\n")
}

/// Get the default config file path.
pub fn default_config_path() -> PathBuf {
    strata_home().join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn write(path: &Path, lines: &[&str]) {
        let mut f = std::fs::File::create(path).unwrap();
        for line in lines {
            writeln!(f, "{line}").unwrap();
        }
    }

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = load_config_file(Some(Path::new("/nonexistent/strata.toml")));
        assert_eq!(config.port, 7777);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_malformed_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("config.toml");
        write(&root, &["port = \"not a number\""]);
        assert_eq!(load_config_file(Some(&root)).port, 7777);
    }

    #[test]
    fn test_deep_merge_nested_tables() {
        let mut base: toml::Value = toml::from_str(
            r#"
            [ranking]
            recency_decay = 0.9
            layer_bonus = 0.1
        "#,
        )
        .unwrap();
        let overlay: toml::Value = toml::from_str(
            r#"
            port = 9000
            [ranking]
            layer_bonus = 0.3
        "#,
        )
        .unwrap();
        deep_merge_toml(&mut base, &overlay);
        let ranking = base["ranking"].as_table().unwrap();
        assert_eq!(ranking["recency_decay"].as_float(), Some(0.9));
        assert_eq!(ranking["layer_bonus"].as_float(), Some(0.3));
        assert_eq!(base["port"].as_integer(), Some(9000));
    }

    #[test]
    fn test_include_is_overridden_by_root() {
        let dir = tempfile::tempdir().unwrap();
        write(
            &dir.path().join("layers.toml"),
            &["port = 9999", "[qdrant]", "url = \"http://qdrant:6333\""],
        );
        let root = dir.path().join("config.toml");
        write(&root, &["include = [\"layers.toml\"]", "port = 8080"]);

        let config = load_config_file(Some(&root));
        assert_eq!(config.port, 8080);
        assert_eq!(config.qdrant.url.as_deref(), Some("http://qdrant:6333"));
    }

    #[test]
    fn test_bad_includes_fall_back_to_root() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.toml");
        let b = dir.path().join("b.toml");
        write(&a, &["include = [\"b.toml\"]", "port = 1111"]);
        write(&b, &["include = [\"a.toml\"]"]);
        assert_eq!(load_config_file(Some(&a)).port, 1111);

        let root = dir.path().join("config.toml");
        write(&root, &["include = [\"../etc/passwd\"]", "port = 2222"]);
        assert_eq!(load_config_file(Some(&root)).port, 2222);

        write(&root, &["include = [\"/etc/shadow\"]", "port = 3333"]);
        assert_eq!(load_config_file(Some(&root)).port, 3333);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = KernelConfig::default();
        apply_overrides(
            &mut config,
            env(&[
                ("STRATA_TIER", "standard"),
                ("STRATA_PORT", "8088"),
                ("STRATA_QDRANT_URL", "http://localhost:6333"),
                ("STRATA_AGE_PORT", "not-a-port"),
                ("STRATA_EMBEDDING_DIMENSIONS", "768"),
                ("STRATA_EXTRACTION_ENABLED", "false"),
                ("STRATA_HOST", "  "),
            ]),
        );
        assert_eq!(config.tier, Some(Tier::Standard));
        assert_eq!(config.port, 8088);
        assert_eq!(config.qdrant.url.as_deref(), Some("http://localhost:6333"));
        assert_eq!(config.age.port, 5432);
        assert_eq!(config.embedding.dimensions, 768);
        assert!(!config.extraction.enabled);
        assert_eq!(config.host, "127.0.0.1");
    }

    #[test]
    fn test_openai_key_fallback() {
        let mut config = KernelConfig::default();
        config.extraction.api_key = Some("from-file".into());
        apply_overrides(
            &mut config,
            env(&[
                ("OPENAI_API_KEY", "sk-generic"),
                ("STRATA_EMBEDDING_API_KEY", "sk-embed"),
            ]),
        );
        assert_eq!(config.embedding.api_key.as_deref(), Some("sk-embed"));
        assert_eq!(config.extraction.api_key.as_deref(), Some("from-file"));

        let mut config = KernelConfig::default();
        apply_overrides(&mut config, env(&[("OPENAI_API_KEY", "sk-generic")]));
        assert_eq!(config.embedding.api_key.as_deref(), Some("sk-generic"));
        assert_eq!(config.extraction.api_key.as_deref(), Some("sk-generic"));
    }

    #[test]
    fn test_plan_layers_by_tier() {
        let mut config = KernelConfig::default();
        config.qdrant.url = Some("http://localhost:6333".into());
        config.embedding.api_key = Some("k".into());
        config.extraction.api_key = Some("k".into());

        config.tier = Some(Tier::Lite);
        let plan = plan_layers(&config).unwrap();
        assert!(!plan.vector && !plan.embedding && !plan.extraction && !plan.summarizer);

        config.tier = None;
        let plan = plan_layers(&config).unwrap();
        assert_eq!(plan.tier, Tier::Standard);
        assert!(plan.vector && plan.embedding && plan.extraction && !plan.graph);

        config.extraction.enabled = false;
        let plan = plan_layers(&config).unwrap();
        assert!(!plan.extraction);
        assert!(plan.summarizer);
    }

    #[test]
    fn test_full_tier_requires_age_credentials() {
        let mut config = KernelConfig::default();
        config.qdrant.url = Some("http://localhost:6333".into());
        config.age.host = Some("localhost".into());
        config.age.user = Some("postgres".into());
        let err = plan_layers(&config).unwrap_err();
        assert!(matches!(err, StrataError::Config(_)));

        config.age.password = Some("secret".into());
        config.age.database = Some("memory".into());
        let plan = plan_layers(&config).unwrap();
        assert_eq!(plan.tier, Tier::Full);
        assert!(plan.graph);
    }

    #[test]
    fn test_summary_is_redacted() {
        let mut config = KernelConfig::default();
        config.auth_token = Some("top-secret-token".into());
        config.embedding.api_key = Some("sk-very-secret".into());
        config.age.host = Some("db".into());
        config.age.password = Some("hunter2".into());
        let summary = config_summary(&config);
        assert!(summary.contains("Auth: enabled"));
        assert!(summary.contains("key set"));
        assert!(!summary.contains("top-secret-token"));
        assert!(!summary.contains("sk-very-secret"));
        assert!(!summary.contains("hunter2"));
    }

    #[test]
    fn test_expand_home() {
        let expanded = expand_home(Path::new("~/data/memory.sqlite"));
        assert!(expanded.ends_with("data/memory.sqlite"));
        assert!(!expanded.starts_with("~"));
        assert_eq!(expand_home(Path::new("/tmp/x")), PathBuf::from("/tmp/x"));
    }
}
