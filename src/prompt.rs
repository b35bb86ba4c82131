//! Prompt Building
//!
//! Deterministic text transforms: the keyword extractor that drives the
//! external catalog search, and the system/user prompt pairs for the two
//! model tasks (query analysis and candidate narrowing). Everything here is
//! pure; identical input yields identical output.

use std::sync::OnceLock;

use regex::Regex;

use crate::types::CatalogEntry;

/// Maximum number of keywords handed to the search function.
pub const MAX_KEYWORDS: usize = 10;

/// Tokens that carry no search signal.
const STOP_WORDS: &[&str] = &[
    "the", "and", "for", "with", "that", "this", "from", "have", "has", "was", "are", "can",
    "you", "your", "please", "help", "find", "show", "get", "give", "need", "want", "looking",
    "look", "some", "something", "like", "use", "using", "any", "all", "but", "not", "its",
    "it's", "about", "into", "out", "our", "their", "them", "they", "will", "would", "could",
    "should", "what", "which", "who", "how", "when", "where", "does", "don't", "dont", "just",
    "really", "very", "also", "than", "then", "there", "here",
];

fn negation_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            // "don't want X", "do not need X"
            r"(?:don'?t|do\s+not|doesn'?t|does\s+not)\s+(?:want|need|like|use)\s+\w+",
            // "not X", "no X", "without X", "avoid X", "except X"
            r"\bnot\s+\w+",
            r"\bno\s+\w+",
            r"\bwithout\s+\w+",
            r"\bavoid\s+\w+",
            r"\bexcept\s+\w+",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("negation pattern compiles"))
        .collect()
    })
}

/// Reduce a raw query to at most [`MAX_KEYWORDS`] search tokens.
///
/// Lowercases, strips negation phrases (so an excluded product name never
/// becomes a search term), strips stop words and punctuation, drops tokens
/// of length <= 2, and deduplicates preserving first occurrence.
pub fn extract_search_keywords(query: &str) -> Vec<String> {
    let mut text = query.to_lowercase();
    for pattern in negation_patterns() {
        text = pattern.replace_all(&text, " ").into_owned();
    }

    let mut keywords = Vec::new();
    for token in text.split(|c: char| !c.is_alphanumeric() && c != '\'' && c != '-') {
        let token = token.trim_matches(|c: char| !c.is_alphanumeric());
        if token.len() <= 2 {
            continue;
        }
        if STOP_WORDS.contains(&token) {
            continue;
        }
        if keywords.iter().any(|k| k == token) {
            continue;
        }
        keywords.push(token.to_string());
        if keywords.len() >= MAX_KEYWORDS {
            break;
        }
    }
    keywords
}

/// System/user prompt pair for the analysis task (no candidates yet):
/// extract what the query is asking for.
pub fn build_analysis_prompt(query: &str) -> (String, String) {
    let system = "You analyze a user's request for software catalog entries. \
        Respond with only a JSON object: \
        {\"capabilities\": [string], \"similar_to\": string or null, \
        \"constraints\": [string], \"confidence\": number between 0 and 1}. \
        capabilities are short lowercase tags. similar_to names a product the \
        user wants an equivalent of, if any. constraints are free-form \
        requirements such as pricing or hosting."
        .to_string();
    let user = format!("User request: {query}");
    (system, user)
}

/// System/user prompt pair for the narrowing task: pick the best-matching
/// slugs out of the pre-filtered candidate list.
pub fn build_selection_prompt(query: &str, candidates: &[CatalogEntry]) -> (String, String) {
    let system = "You select catalog entries matching a user's request. \
        From the numbered candidates, pick the 5-10 most relevant slugs. \
        Honor exclusions: if the user says they do not want something, never \
        select it. If the user asks for an alternative to a product, prefer \
        competitors over that product itself. Respond with only a JSON \
        object: {\"selected_slugs\": [string], \"reasoning\": string, \
        \"confidence\": number between 0 and 1}."
        .to_string();

    let mut listing = String::new();
    for (i, candidate) in candidates.iter().enumerate() {
        listing.push_str(&format!(
            "{}. slug: {} | name: {} | {} | capabilities: {}\n",
            i + 1,
            candidate.slug,
            candidate.name,
            candidate.description,
            candidate.capabilities.join(", ")
        ));
    }

    let user = format!("User request: {query}\n\nCandidates:\n{listing}");
    (system, user)
}
