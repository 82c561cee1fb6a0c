// 🔤 Similarity - normalization + fuzzy scoring
//
// "Smith Tax Service, LLC" and "SMITH TAX SERVICE" → same office name
// "100 Main Street, Suite 4" and "100 Main St Ste 4" → same address
//
// Every score is in [0.0, 1.0]. Callers compare against a threshold.

use std::collections::BTreeSet;

// ============================================================================
// NORMALIZATION
// ============================================================================

const BUSINESS_SUFFIXES: &[&str] = &[
    "inc",
    "incorporated",
    "llc",
    "llp",
    "corp",
    "corporation",
    "co",
    "ltd",
    "company",
];

const ADDRESS_ABBREVIATIONS: &[(&str, &str)] = &[
    ("street", "st"),
    ("avenue", "ave"),
    ("road", "rd"),
    ("drive", "dr"),
    ("boulevard", "blvd"),
    ("lane", "ln"),
    ("court", "ct"),
    ("place", "pl"),
    ("parkway", "pkwy"),
    ("highway", "hwy"),
    ("suite", "ste"),
    ("apartment", "apt"),
    ("building", "bldg"),
    ("north", "n"),
    ("south", "s"),
    ("east", "e"),
    ("west", "w"),
];

/// Lowercase, punctuation → space, whitespace collapsed
///
/// "  O'Brien-Smith,  Jr. " → "o brien smith jr"
pub fn normalize_text(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_alphanumeric() {
                c.to_lowercase().next().unwrap_or(c)
            } else {
                ' '
            }
        })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Office/business name: normalized text minus trailing business suffixes
pub fn normalize_business_name(s: &str) -> String {
    let mut words: Vec<&str> = Vec::new();
    let normalized = normalize_text(s);
    words.extend(normalized.split(' ').filter(|w| !w.is_empty()));

    // Keep at least one word: "The Company" should not vanish
    while words.len() > 1 {
        match words.last() {
            Some(last) if BUSINESS_SUFFIXES.contains(last) => {
                words.pop();
            }
            _ => break,
        }
    }

    words.join(" ")
}

/// Street address: normalized text with common words folded to USPS abbreviations
pub fn normalize_address(s: &str) -> String {
    normalize_text(s)
        .split(' ')
        .filter(|w| !w.is_empty())
        .map(|word| {
            ADDRESS_ABBREVIATIONS
                .iter()
                .find(|(long, _)| *long == word)
                .map(|(_, short)| *short)
                .unwrap_or(word)
        })
        .collect::<Vec<_>>()
        .join(" ")
}

// ============================================================================
// SCORING
// ============================================================================

/// Levenshtein distance over chars
///
/// Minimum number of single-character edits (insertions, deletions,
/// substitutions) to change one string into another.
pub fn levenshtein_distance(s1: &str, s2: &str) -> usize {
    let a: Vec<char> = s1.chars().collect();
    let b: Vec<char> = s2.chars().collect();

    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    // Two rolling rows instead of the full matrix
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for i in 1..=a.len() {
        curr[0] = i;
        for j in 1..=b.len() {
            let cost = if a[i - 1] == b[j - 1] { 0 } else { 1 };
            curr[j] = std::cmp::min(
                std::cmp::min(
                    prev[j] + 1,     // deletion
                    curr[j - 1] + 1, // insertion
                ),
                prev[j - 1] + cost, // substitution
            );
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

/// 1 - distance / longer length
pub fn levenshtein_ratio(s1: &str, s2: &str) -> f64 {
    let longest = s1.chars().count().max(s2.chars().count());
    if longest == 0 {
        return 1.0;
    }
    1.0 - levenshtein_distance(s1, s2) as f64 / longest as f64
}

/// Jaccard index of the two word sets. Word order does not matter.
pub fn token_set_similarity(s1: &str, s2: &str) -> f64 {
    let a: BTreeSet<&str> = s1.split_whitespace().collect();
    let b: BTreeSet<&str> = s2.split_whitespace().collect();

    if a.is_empty() && b.is_empty() {
        return 1.0;
    }

    let shared = a.intersection(&b).count();
    let total = a.union(&b).count();
    shared as f64 / total as f64
}

/// Score two already-normalized strings
///
/// Both empty → 1.0 (nothing contradicts), one empty → 0.0.
pub fn normalized_similarity(a: &str, b: &str) -> f64 {
    match (a.is_empty(), b.is_empty()) {
        (true, true) => 1.0,
        (true, false) | (false, true) => 0.0,
        _ => token_set_similarity(a, b).max(levenshtein_ratio(a, b)),
    }
}

/// Generic text similarity (plain normalization)
pub fn text_similarity(a: &str, b: &str) -> f64 {
    normalized_similarity(&normalize_text(a), &normalize_text(b))
}

pub fn business_name_similarity(a: &str, b: &str) -> f64 {
    normalized_similarity(&normalize_business_name(a), &normalize_business_name(b))
}

pub fn address_similarity(a: &str, b: &str) -> f64 {
    normalized_similarity(&normalize_address(a), &normalize_address(b))
}

// ============================================================================
// TESTS
// ============================================================================
