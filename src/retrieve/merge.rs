//! Cross-variant result merging.
use std::collections::HashSet;

use crate::index::SearchHit;

/// Interleave per-variant result lists round-robin, deduplicating by
/// chunk id, until `top_k` results are collected or every list runs dry.
///
/// Position 0 of each list is taken before position 1 of any list, so
/// each variant's best hit gets a seat before anyone's second-best. The
/// first occurrence of a chunk wins; later duplicates are skipped.
pub fn round_robin_merge(lists: Vec<Vec<SearchHit>>, top_k: usize) -> Vec<SearchHit> {
    let mut merged = Vec::with_capacity(top_k);
    let mut seen: HashSet<String> = HashSet::new();

    let longest = lists.iter().map(Vec::len).max().unwrap_or(0);
    let mut lists: Vec<std::vec::IntoIter<SearchHit>> =
        lists.into_iter().map(Vec::into_iter).collect();

    'outer: for _ in 0..longest {
        for list in &mut lists {
            let Some(hit) = list.next() else { continue };
            if !seen.insert(hit.chunk_id.clone()) {
                continue;
            }
            merged.push(hit);
            if merged.len() >= top_k {
                break 'outer;
            }
        }
    }

    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::Origin;

    fn hit(chunk_id: &str) -> SearchHit {
        SearchHit {
            chunk_id: chunk_id.to_string(),
            doc_id: "doc.md".to_string(),
            title: "Doc".to_string(),
            section_path: String::new(),
            text: String::new(),
            score: 1.0,
            origin: Origin::Fused,
        }
    }

    fn ids(hits: &[SearchHit]) -> Vec<&str> {
        hits.iter().map(|h| h.chunk_id.as_str()).collect()
    }

    #[test]
    fn test_interleaves_and_dedups() {
        let lists = vec![
            vec![hit("A"), hit("B"), hit("C")],
            vec![hit("B"), hit("D"), hit("A")],
        ];
        let merged = round_robin_merge(lists, 3);
        assert_eq!(ids(&merged), vec!["A", "B", "D"]);
    }

    #[test]
    fn test_first_positions_before_second_positions() {
        let lists = vec![
            vec![hit("A"), hit("C")],
            vec![hit("B"), hit("D")],
        ];
        let merged = round_robin_merge(lists, 4);
        assert_eq!(ids(&merged), vec!["A", "B", "C", "D"]);
    }

    #[test]
    fn test_stops_at_top_k() {
        let lists = vec![vec![hit("A"), hit("B"), hit("C"), hit("D")]];
        let merged = round_robin_merge(lists, 2);
        assert_eq!(ids(&merged), vec!["A", "B"]);
    }

    #[test]
    fn test_uneven_lists_drain_completely() {
        let lists = vec![
            vec![hit("A")],
            vec![hit("B"), hit("C"), hit("D")],
        ];
        let merged = round_robin_merge(lists, 10);
        assert_eq!(ids(&merged), vec!["A", "B", "C", "D"]);
    }

    #[test]
    fn test_empty_input() {
        assert!(round_robin_merge(vec![], 5).is_empty());
        assert!(round_robin_merge(vec![vec![], vec![]], 5).is_empty());
    }
}
