//! Error types and utilities for the butterfly-osm query engine
//!
//! Provides the application-boundary error type and fuzzy matching for
//! service names submitted to the dispatcher.

use strsim::{jaro_winkler, normalized_levenshtein};
use thiserror::Error;

/// Minimum similarity (0.0 to 1.0) for a candidate to be suggested.
///
/// Same threshold the region matcher used: 0.65 keeps garbage input from
/// matching anything while still catching single transpositions ("tabel").
const MIN_SIMILARITY: f64 = 0.65;

/// Find the best fuzzy match among `candidates`
///
/// Scoring is Jaro-Winkler 70% + Normalized Levenshtein 30%, plus a prefix
/// bonus (+20% max) when the first characters are nearly identical.
fn find_best_fuzzy_match(input: &str, candidates: &[&str]) -> Option<String> {
    let input_lower = input.to_lowercase();
    let mut best_match = None;
    let mut best_score = 0.0f64;

    for candidate in candidates {
        let candidate_lower = candidate.to_lowercase();

        // Jaro-Winkler favours transpositions and shared prefixes, Levenshtein
        // catches dropped or doubled letters.
        let jw_score = jaro_winkler(&input_lower, &candidate_lower);
        let lev_score = normalized_levenshtein(&input_lower, &candidate_lower);
        let mut score = (jw_score * 0.7) + (lev_score * 0.3);

        let prefix_len = input_lower.chars().count().min(5);
        if prefix_len >= 3 {
            let input_prefix = input_lower.chars().take(prefix_len).collect::<String>();
            let candidate_prefix = candidate_lower.chars().take(prefix_len).collect::<String>();
            let prefix_similarity = normalized_levenshtein(&input_prefix, &candidate_prefix);
            if prefix_similarity > 0.7 {
                score += 0.2 * prefix_similarity;
            }
        }

        if score >= MIN_SIMILARITY && score > best_score {
            best_score = score;
            best_match = Some((*candidate).to_string());
        }
    }

    best_match
}

/// Suggest a registered service name for a misspelled one
///
/// Returns `None` when the input already names a service (ignoring case) or
/// when nothing is close enough.
pub fn suggest_service(name: &str, services: &[&str]) -> Option<String> {
    if services.iter().any(|s| s.eq_ignore_ascii_case(name)) {
        return None;
    }
    if name.is_empty() {
        return None;
    }
    find_best_fuzzy_match(name, services)
}

fn did_you_mean(suggestion: &Option<String>) -> String {
    match suggestion {
        Some(s) => format!(", did you mean '{s}'?"),
        None => String::new(),
    }
}

/// Main error type at the application boundary (config, files, requests)
#[derive(Debug, Error)]
pub enum Error {
    /// Requested service is not registered with the dispatcher
    #[error("Unknown service '{name}'{}", did_you_mean(.suggestion))]
    UnknownService {
        name: String,
        suggestion: Option<String>,
    },

    /// File I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid request or parameters
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration file could not be parsed or is inconsistent
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed JSON input (graph, phantom or request files)
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}

/// Convenience result type for butterfly-osm operations
pub type Result<T> = std::result::Result<T, Error>;
