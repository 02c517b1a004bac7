//! Deduplication and ordering of chapter lists.

use crate::model::Chapter;
use std::collections::HashSet;

/// Sorts chapters by number ascending. Stable, so equal numbers keep input order.
pub fn sort_by_number(chapters: &mut [Chapter]) {
    chapters.sort_by(|a, b| a.number.cmp(&b.number));
}

/// Merges the local and secondary lists into one catalogue.
///
/// Keeps the first chapter seen for each `(language, number)` pair, local
/// chapters first, then orders by number. Language is not a sort key.
pub fn merge_chapters(local: Vec<Chapter>, secondary: Vec<Chapter>) -> Vec<Chapter> {
    let mut seen = HashSet::with_capacity(local.len() + secondary.len());
    let mut merged: Vec<Chapter> = local
        .into_iter()
        .chain(secondary)
        .filter(|chapter| seen.insert(chapter.dedup_key()))
        .collect();
    sort_by_number(&mut merged);
    merged
}
