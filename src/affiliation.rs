//! Cross-source merging of author affiliations.
//!
//! Creators of two records describing the same work are paired by family name.
//! The affiliation a vendor record has for a creator is copied onto the matching
//! creator of the target record. An affiliation with more populated fields than the
//! current primary one becomes the new primary affiliation; otherwise it is kept
//! as an additional one.

use crate::config::Pattern;
use crate::model::{Affiliation, BibliographicItem, Creator};
use tracing::debug;

/// Copies affiliation data between creators.
#[derive(Debug, Clone, Default)]
pub struct AffiliationMerger {
    ignore_list: Vec<Pattern>,
}

impl AffiliationMerger {
    /// Creates a merger skipping affiliations that match any of `ignore_list`.
    pub fn new(ignore_list: Vec<Pattern>) -> Self {
        Self { ignore_list }
    }

    fn is_ignored(&self, creator: &Creator) -> bool {
        creator
            .raw_affiliation
            .iter()
            .map(String::as_str)
            .chain(creator.affiliations.iter().flat_map(Affiliation::texts))
            .any(|text| Pattern::any_matches(&self.ignore_list, text))
    }

    /// Merges the affiliations of `source` into `target` if both have the same family name.
    ///
    /// Returns `true` if an affiliation was added.
    pub fn merge_creator(&self, target: &mut Creator, source: &Creator, provider_id: &str) -> bool {
        let same_family = match (target.family_name(), source.family_name()) {
            (Some(a), Some(b)) => a.to_lowercase() == b.to_lowercase(),
            _ => false,
        };
        if !same_family || !source.has_affiliation_data() || self.is_ignored(source) {
            return false;
        }

        if target.raw_affiliation.is_none() {
            target.raw_affiliation = source.raw_affiliation.clone();
        }

        let Some(mut affiliation) = source
            .affiliations
            .first()
            .cloned()
            .or_else(|| source.raw_affiliation.as_deref().map(Affiliation::from_literal))
        else {
            return false;
        };
        affiliation
            .source
            .get_or_insert_with(|| provider_id.to_string());

        if target
            .affiliations
            .iter()
            .any(|existing| existing.describes_same(&affiliation))
        {
            return false;
        }

        let is_better = target
            .affiliations
            .first()
            .is_none_or(|primary| affiliation.populated_field_count() > primary.populated_field_count());
        if is_better {
            target.affiliations.insert(0, affiliation);
        } else {
            target.affiliations.push(affiliation);
        }
        true
    }

    /// Merges affiliations of every creator pair of `target` and `source` with equal family names.
    ///
    /// Returns the number of affiliations added.
    pub fn merge_item(
        &self,
        target: &mut BibliographicItem,
        source: &BibliographicItem,
        provider_id: &str,
    ) -> usize {
        let mut added = 0;
        for creator in target.creators_mut() {
            for vendor_creator in source.creators() {
                if self.merge_creator(creator, vendor_creator, provider_id) {
                    added += 1;
                }
            }
        }
        if added > 0 {
            debug!(provider = provider_id, added, "added affiliation data");
        }
        added
    }
}
