//! Name resolution for assignee lookups.
//!
//! Work items may be assigned by mail address or by display name, so a lookup
//! tries an ordered list of candidate identities and unions the result sets.

use std::collections::HashSet;
use std::hash::Hash;

/// Ordered candidate identities for an email: the address itself, then the
/// display name derived from its local part when that differs.
pub fn candidate_identities(email: &str) -> Vec<String> {
    let email = email.trim();
    let mut candidates = vec![email.to_string()];
    if let Some(name) = derive_display_name(email) {
        if name != email {
            candidates.push(name);
        }
    }
    candidates
}

/// Derive a display name from the local part of an email address.
///
/// `jane.doe@x` becomes `Jane Doe`; `janeDoe@x` becomes `Jane Doe`.
pub fn derive_display_name(email: &str) -> Option<String> {
    let local = email.split('@').next().unwrap_or_default().trim();
    if local.is_empty() {
        return None;
    }

    let words: Vec<String> = if local.contains('.') {
        local
            .split('.')
            .filter(|w| !w.is_empty())
            .map(str::to_string)
            .collect()
    } else {
        split_camel_case(local)
    };

    let name = words
        .iter()
        .map(|w| capitalize(w))
        .collect::<Vec<_>>()
        .join(" ");

    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

fn split_camel_case(s: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut prev_lower = false;

    for c in s.chars() {
        if c.is_uppercase() && prev_lower && !current.is_empty() {
            words.push(std::mem::take(&mut current));
        }
        prev_lower = c.is_lowercase() || c.is_ascii_digit();
        current.push(c);
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

/// Union result sets in order, keeping the first occurrence of each key.
pub fn merge_by_key<T, K, F>(result_sets: Vec<Vec<T>>, key: F) -> Vec<T>
where
    K: Eq + Hash,
    F: Fn(&T) -> K,
{
    let mut seen = HashSet::new();
    result_sets
        .into_iter()
        .flatten()
        .filter(|item| seen.insert(key(item)))
        .collect()
}
