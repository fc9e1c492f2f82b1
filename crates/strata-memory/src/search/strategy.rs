//! Query classification and entity guessing.

use regex_lite::Regex;
use std::sync::OnceLock;
use strata_types::search::SearchStrategy;

/// Possessive attribute lookups ("what is Alice's email").
const KEY_LOOKUP_PATTERNS: [&str; 5] = [
    r"what is .+'s",
    r"what are .+'s",
    r".+'s (email|phone|address|preference|setting)",
    r"^(get|find|show|tell me) .+'s",
    r"^what (does|did) .+ (like|prefer|use|want)",
];

/// Relationship and role questions ("who works on Strata").
const RELATIONSHIP_PATTERNS: [&str; 7] = [
    r"who (works on|knows|created|manages|uses)",
    r"what.+(connected|related|linked|associated) (to|with)",
    r"how (is|are) .+ (related|connected)",
    r"relationship between",
    r"(works on|belongs to|depends on|uses)",
    r"what projects does",
    r"who is involved (in|with)",
];

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(p).expect("strategy pattern is valid"))
        .collect()
}

fn key_lookup_patterns() -> &'static [Regex] {
    static CELL: OnceLock<Vec<Regex>> = OnceLock::new();
    CELL.get_or_init(|| compile(&KEY_LOOKUP_PATTERNS))
}

fn relationship_patterns() -> &'static [Regex] {
    static CELL: OnceLock<Vec<Regex>> = OnceLock::new();
    CELL.get_or_init(|| compile(&RELATIONSHIP_PATTERNS))
}

/// Resolve the strategy for a query. An explicit non-auto strategy wins.
pub fn select_strategy(query: &str, requested: Option<SearchStrategy>) -> SearchStrategy {
    match requested {
        Some(strategy) if strategy != SearchStrategy::Auto => strategy,
        _ => classify(query),
    }
}

/// Pick a composite strategy from the query text alone.
pub fn classify(query: &str) -> SearchStrategy {
    let query = query.to_lowercase();
    if key_lookup_patterns().iter().any(|re| re.is_match(&query)) {
        SearchStrategy::FulltextGraph
    } else if relationship_patterns().iter().any(|re| re.is_match(&query)) {
        SearchStrategy::GraphSemantic
    } else {
        SearchStrategy::SemanticGraph
    }
}

struct EntityPatterns {
    quoted: Regex,
    preposition: Regex,
    capitalized: Regex,
    who: Regex,
}

fn entity_patterns() -> &'static EntityPatterns {
    static CELL: OnceLock<EntityPatterns> = OnceLock::new();
    CELL.get_or_init(|| EntityPatterns {
        quoted: Regex::new(r#"["']([^"']+)["']"#).expect("quoted pattern is valid"),
        preposition: Regex::new(
            r"\b(?i:about|on|for|regarding|related to|connected to)\s+([A-Z][a-zA-Z]*(?:\s+[A-Z][a-zA-Z]*)*)",
        )
        .expect("preposition pattern is valid"),
        capitalized: Regex::new(r"\b[A-Z][a-zA-Z]+(?:\s+[A-Z][a-zA-Z]+)*")
            .expect("capitalized pattern is valid"),
        who: Regex::new(r"(?i)who\s+(?:works on|knows|created|uses|manages)\s+(.+)")
            .expect("who pattern is valid"),
    })
}

/// Guess the entity a query is about, for the graph search path.
///
/// In order of preference: a quoted substring, a capitalized phrase after a
/// preposition, the longest run of capitalized words (first wins on ties),
/// the object of a "who works on / knows / ..." question, and finally the
/// whole query if it is at most three words.
pub fn extract_entity_from_query(query: &str) -> Option<String> {
    let patterns = entity_patterns();

    if let Some(caps) = patterns.quoted.captures(query) {
        return caps.get(1).map(|m| m.as_str().to_string());
    }

    if let Some(caps) = patterns.preposition.captures(query) {
        return caps.get(1).map(|m| m.as_str().to_string());
    }

    let mut longest: Option<&str> = None;
    for m in patterns.capitalized.find_iter(query) {
        if longest.map_or(true, |l| m.as_str().len() > l.len()) {
            longest = Some(m.as_str());
        }
    }
    if let Some(run) = longest {
        return Some(run.to_string());
    }

    if let Some(caps) = patterns.who.captures(query) {
        if let Some(object) = caps.get(1) {
            return Some(object.as_str().trim().to_string());
        }
    }

    let trimmed = query.trim();
    if !trimmed.is_empty() && trimmed.split_whitespace().count() <= 3 {
        return Some(trimmed.to_string());
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_possessive_lookup() {
        assert_eq!(classify("What is Alice's email address?"), SearchStrategy::FulltextGraph);
        assert_eq!(classify("tell me Bob's phone"), SearchStrategy::FulltextGraph);
        assert_eq!(classify("what does Carol prefer"), SearchStrategy::FulltextGraph);
    }

    #[test]
    fn test_relationship_queries() {
        assert_eq!(classify("Who works on Strata?"), SearchStrategy::GraphSemantic);
        assert_eq!(
            classify("relationship between Alice and Bob"),
            SearchStrategy::GraphSemantic
        );
        assert_eq!(classify("what is connected to the billing service"), SearchStrategy::GraphSemantic);
    }

    #[test]
    fn test_default_strategy() {
        assert_eq!(classify("deployment notes from last week"), SearchStrategy::SemanticGraph);
        assert_eq!(classify(""), SearchStrategy::SemanticGraph);
    }

    #[test]
    fn test_explicit_strategy_wins() {
        assert_eq!(
            select_strategy("who works on Strata", Some(SearchStrategy::Fulltext)),
            SearchStrategy::Fulltext
        );
        assert_eq!(
            select_strategy("who works on Strata", Some(SearchStrategy::Auto)),
            SearchStrategy::GraphSemantic
        );
        assert_eq!(
            select_strategy("anything", Some(SearchStrategy::FulltextGraph)),
            SearchStrategy::FulltextGraph
        );
        assert_eq!(select_strategy("anything at all here", None), SearchStrategy::SemanticGraph);
    }

    #[test]
    fn test_entity_quoted() {
        assert_eq!(
            extract_entity_from_query("notes on \"project phoenix\" launch").as_deref(),
            Some("project phoenix")
        );
    }

    #[test]
    fn test_entity_after_preposition() {
        assert_eq!(
            extract_entity_from_query("tell me everything about Acme Corp please").as_deref(),
            Some("Acme Corp")
        );
        // lowercase words after a preposition are not a phrase
        assert_eq!(
            extract_entity_from_query("what did we decide on the Atlas rollout").as_deref(),
            Some("Atlas")
        );
    }

    #[test]
    fn test_entity_longest_capitalized_run() {
        assert_eq!(
            extract_entity_from_query("did Bob meet Alice Smith yesterday").as_deref(),
            Some("Alice Smith")
        );
        // ties go to the first run
        assert_eq!(
            extract_entity_from_query("did Bob meet Amy yesterday").as_deref(),
            Some("Bob")
        );
    }

    #[test]
    fn test_entity_who_pattern() {
        assert_eq!(
            extract_entity_from_query("who works on the billing service").as_deref(),
            Some("the billing service")
        );
    }

    #[test]
    fn test_entity_short_query_fallback() {
        assert_eq!(extract_entity_from_query("  rust  ").as_deref(), Some("rust"));
        assert_eq!(extract_entity_from_query("the deploy checklist for staging servers"), None);
        assert_eq!(extract_entity_from_query("   "), None);
    }
}
