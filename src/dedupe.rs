//! Reference deduplication.
//!
//! References are grouped by their [`MatchKey`]; within each group the first
//! occurrence in input order is kept and the others are reported as duplicates.
//! References without a usable creator name have no key and are never considered
//! duplicates of anything.
//!
//! ## Usage
//!
//! ```rust
//! use bibmerge::dedupe::Deduplicator;
//! use bibmerge::model::BibliographicItem;
//!
//! let references = BibliographicItem::list_from_json_str(r#"[
//!     {"author": [{"family": "Smith"}], "issued": "2000", "title": "A Study"},
//!     {"author": [{"family": "Jones"}], "issued": "1999", "title": "Other Work"},
//!     {"author": [{"family": "SMITH"}], "issued": "2000", "title": "A study."}
//! ]"#).unwrap();
//!
//! let (unique, removed) = Deduplicator::new().dedupe(references);
//! assert_eq!(removed, 1);
//! assert_eq!(unique.len(), 2);
//! ```
//!
//! ## Matching Criteria
//!
//! With the default [`DedupeKey::CreatorYearTitle`], two references are duplicates if
//! the lowercased family name of their first creator, their year and their normalized
//! title (lowercase, alphanumeric only) are equal. [`DedupeKey::CreatorYear`] drops the
//! title and matches the way reference lists are aligned during merging.

use crate::model::{BibliographicItem, MatchKey};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Which parts of a reference make up its comparison key.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupeKey {
    CreatorYear,
    #[default]
    CreatorYearTitle,
}

/// Configuration options for the deduplication process.
#[derive(Debug, Default, Clone)]
pub struct DeduplicatorConfig {
    pub key: DedupeKey,
}

/// One reference and the later references sharing its key, as indices into the input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateGroup {
    pub unique: usize,
    pub duplicates: Vec<usize>,
}

/// Finds and removes references with a repeated [`MatchKey`].
#[derive(Debug, Default, Clone)]
pub struct Deduplicator {
    config: DeduplicatorConfig,
}

impl Deduplicator {
    /// Creates a new Deduplicator comparing creator, year and title.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_config(mut self, config: DeduplicatorConfig) -> Self {
        self.config = config;
        self
    }

    fn key(&self, item: &BibliographicItem) -> Option<MatchKey> {
        match self.config.key {
            DedupeKey::CreatorYear => MatchKey::creator_year(item),
            DedupeKey::CreatorYearTitle => MatchKey::with_title(item),
        }
    }

    /// Groups references by key.
    ///
    /// Returns one group per distinct key, ordered by the position of its first
    /// occurrence. Groups without duplicates are included.
    pub fn find_duplicates(&self, items: &[BibliographicItem]) -> Vec<DuplicateGroup> {
        items
            .iter()
            .enumerate()
            .filter_map(|(idx, item)| self.key(item).map(|key| (key, idx)))
            .into_group_map()
            .into_values()
            .map(|indices| DuplicateGroup {
                unique: indices[0],
                duplicates: indices[1..].to_vec(),
            })
            .sorted_by_key(|group| group.unique)
            .collect()
    }

    /// Removes every reference that repeats the key of an earlier one.
    ///
    /// Returns the surviving references in input order and the number removed.
    pub fn dedupe(&self, items: Vec<BibliographicItem>) -> (Vec<BibliographicItem>, usize) {
        let duplicates: HashSet<usize> = self
            .find_duplicates(&items)
            .into_iter()
            .flat_map(|group| group.duplicates)
            .collect();

        if duplicates.is_empty() {
            return (items, 0);
        }

        let unique = items
            .into_iter()
            .enumerate()
            .filter(|(idx, _)| !duplicates.contains(idx))
            .map(|(_, item)| item)
            .collect();
        (unique, duplicates.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Creator, DateValue};
    use pretty_assertions::assert_eq;
    use rstest::*;

    fn reference(family: &str, year: Option<i32>, title: &str, doi: Option<&str>) -> BibliographicItem {
        BibliographicItem {
            title: (!title.is_empty()).then(|| title.to_string()),
            author: if family.is_empty() {
                Vec::new()
            } else {
                vec![Creator::new(family, "")]
            },
            issued: year.map(|y| DateValue::Parts(vec![y])),
            doi: doi.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn test_find_duplicates_groups_in_first_occurrence_order() {
        let items = vec![
            reference("Smith", Some(2000), "A Study", None),
            reference("Jones", Some(1999), "Other", None),
            reference("smith", Some(2000), "A study!", Some("10.9/y")),
            reference("Jones", Some(1999), "Other", None),
            reference("Jones", Some(1999), "Other", None),
        ];

        let groups = Deduplicator::new().find_duplicates(&items);
        assert_eq!(
            groups,
            vec![
                DuplicateGroup {
                    unique: 0,
                    duplicates: vec![2]
                },
                DuplicateGroup {
                    unique: 1,
                    duplicates: vec![3, 4]
                },
            ]
        );
    }

    #[test]
    fn test_dedupe_keeps_first_occurrence() {
        let items = vec![
            reference("Smith", Some(2000), "A Study", None),
            reference("Smith", Some(2000), "A Study", Some("10.9/y")),
            reference("Miller", Some(2010), "Something", None),
        ];

        let (unique, removed) = Deduplicator::new().dedupe(items);
        assert_eq!(removed, 1);
        assert_eq!(unique.len(), 2);
        assert_eq!(unique[0].doi, None);
        assert_eq!(unique[1].primary_creator().as_deref(), Some("Miller"));
    }

    #[test]
    fn test_references_without_creator_are_kept() {
        let items = vec![
            reference("", Some(2000), "A Study", None),
            reference("", Some(2000), "A Study", None),
        ];
        let (unique, removed) = Deduplicator::new().dedupe(items);
        assert_eq!(removed, 0);
        assert_eq!(unique.len(), 2);
    }

    #[rstest]
    #[case(DedupeKey::CreatorYearTitle, 0)]
    #[case(DedupeKey::CreatorYear, 1)]
    fn test_dedupe_key(#[case] key: DedupeKey, #[case] expected_removed: usize) {
        let items = vec![
            reference("Smith", Some(2000), "A Study", None),
            reference("Smith", Some(2000), "Another Study", None),
        ];
        let deduplicator = Deduplicator::new().with_config(DeduplicatorConfig { key });
        let (_, removed) = deduplicator.dedupe(items);
        assert_eq!(removed, expected_removed);
    }

    #[test]
    fn test_missing_year_is_part_of_key() {
        let items = vec![
            reference("Smith", None, "A Study", None),
            reference("Smith", Some(2000), "A Study", None),
            reference("Smith", None, "A Study", None),
        ];
        let (unique, removed) = Deduplicator::new().dedupe(items);
        assert_eq!(removed, 1);
        assert_eq!(unique[1].year(), Some(2000));
    }
}
