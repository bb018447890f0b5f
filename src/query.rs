//! GEO query construction: generic-term filtering and AND/OR selection.
//!
//! Free-text queries arrive full of words that match everything in GEO
//! ("dataset", "analysis", ...). Those are stripped, and the remaining
//! terms are combined with AND when the user signalled a conjunction or
//! left only a few specific terms, otherwise OR.

/// Words that carry no discriminating power in a GEO search.
const GENERIC_TERMS: &[&str] = &[
    "dataset", "datasets", "data", "study", "studies", "analysis", "analyses", "experiment",
    "experiments", "samples", "series", "geo", "expression", "profile", "profiles",
];

/// Words that signal the user wants an intersection.
const CONJUNCTION_MARKERS: &[&str] = &["and", "&", "joint", "combined", "multi", "integrated"];

/// How the final term combines its parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CombineMode {
    And,
    Or,
}

/// A provider-ready GEO search term.
#[derive(Debug, Clone)]
pub struct GeoQuery {
    pub term: String,
    pub mode: CombineMode,
    /// The specific phrases that survived filtering, in input order.
    pub phrases: Vec<String>,
}

fn is_generic(word: &str) -> bool {
    GENERIC_TERMS.contains(&word.to_lowercase().as_str())
}

fn is_marker(word: &str) -> bool {
    CONJUNCTION_MARKERS.contains(&word.to_lowercase().as_str())
}

/// Drop generic words from a phrase, preserving order and case.
fn filter_phrase(phrase: &str) -> String {
    phrase
        .split_whitespace()
        .filter(|word| !is_generic(word))
        .collect::<Vec<_>>()
        .join(" ")
}

fn quoted(phrase: &str) -> String {
    if phrase.contains(' ') {
        format!("\"{phrase}\"")
    } else {
        phrase.to_string()
    }
}

/// Build the GEO search term for a free-text query.
#[must_use]
pub fn build_geo_query(raw: &str) -> GeoQuery {
    let has_marker = raw.split_whitespace().any(is_marker);

    // Split into phrase groups on explicit "and"/"&" separators.
    let mut groups: Vec<Vec<&str>> = vec![Vec::new()];
    for word in raw.split_whitespace() {
        let lower = word.to_lowercase();
        if lower == "and" || lower == "&" {
            if !groups.last().is_some_and(Vec::is_empty) {
                groups.push(Vec::new());
            }
        } else {
            groups.last_mut().expect("groups is never empty").push(word);
        }
    }

    let phrases: Vec<String> = groups
        .iter()
        .map(|group| filter_phrase(&group.join(" ")))
        .filter(|phrase| !phrase.is_empty())
        .collect();

    // Conjunction of phrase groups.
    if phrases.len() > 1 {
        let term = phrases
            .iter()
            .map(|phrase| quoted(phrase))
            .collect::<Vec<_>>()
            .join(" AND ");
        return GeoQuery {
            term,
            mode: CombineMode::And,
            phrases,
        };
    }

    // Single group: decide AND vs OR over individual terms.
    let words: Vec<String> = phrases
        .first()
        .map(|phrase| phrase.split_whitespace().map(ToOwned::to_owned).collect())
        .unwrap_or_default();

    if words.is_empty() {
        return GeoQuery {
            term: raw.trim().to_string(),
            mode: CombineMode::Or,
            phrases: Vec::new(),
        };
    }

    let mode = if has_marker || (2..=3).contains(&words.len()) {
        CombineMode::And
    } else {
        CombineMode::Or
    };
    let joiner = match mode {
        CombineMode::And => " AND ",
        CombineMode::Or => " OR ",
    };

    GeoQuery {
        term: words.join(joiner),
        mode,
        phrases: words,
    }
}
