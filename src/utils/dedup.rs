//! Paper deduplication.

use std::collections::HashSet;

use crate::models::PaperMetadata;

/// Remove duplicate papers by id. The first occurrence wins and the
/// original order is preserved, so `dedup_papers` is idempotent.
pub fn dedup_papers(papers: Vec<PaperMetadata>) -> Vec<PaperMetadata> {
    let mut seen = HashSet::new();
    let mut unique = Vec::with_capacity(papers.len());
    let total = papers.len();

    for paper in papers {
        if seen.insert(paper.paper_id.clone()) {
            unique.push(paper);
        }
    }

    let removed = total - unique.len();
    if removed > 0 {
        tracing::info!("Removed {} duplicate papers", removed);
    }
    unique
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paper(id: &str, title: &str) -> PaperMetadata {
        PaperMetadata::new(id, title)
    }

    #[test]
    fn test_first_occurrence_wins() {
        let papers = vec![
            paper("A", "first A"),
            paper("B", "first B"),
            paper("A", "second A"),
        ];

        let unique = dedup_papers(papers);
        assert_eq!(unique.len(), 2);
        assert_eq!(unique[0].title, "first A");
        assert_eq!(unique[1].title, "first B");
    }

    #[test]
    fn test_order_preserved_across_overlapping_lists() {
        let mut papers = vec![paper("A", "a"), paper("B", "b"), paper("C", "c")];
        papers.extend(vec![paper("C", "c2"), paper("B", "b2"), paper("D", "d")]);

        let unique = dedup_papers(papers);
        let ids: Vec<&str> = unique.iter().map(|p| p.paper_id.as_str()).collect();
        assert_eq!(ids, vec!["A", "B", "C", "D"]);
    }

    #[test]
    fn test_idempotent_on_self_concatenation() {
        let papers = vec![paper("A", "a"), paper("B", "b")];
        let mut doubled = papers.clone();
        doubled.extend(papers.clone());

        let once = dedup_papers(papers);
        let twice = dedup_papers(doubled);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_empty_input() {
        assert!(dedup_papers(vec![]).is_empty());
    }
}
