//! Resolution of references without a persistent identifier.
//!
//! A reference lacking a DOI or ISBN is looked up at every eligible metadata
//! provider in priority order. A candidate qualifies if its year is equal, its
//! first creator's family name is equal or within the author distance threshold,
//! and, unless the names are equal, its title is within the title distance
//! threshold. Distances are Levenshtein edit distances on lowercased text.
//!
//! A qualifying candidate with more populated fields replaces the reference and
//! ends the search. A sparser one only lends its identifiers and the search goes
//! on, so a later provider's identifiers overwrite earlier ones.

use crate::config::MergeConfig;
use crate::model::BibliographicItem;
use crate::provider::{Provider, ProviderRegistry};
use crate::utils::{guess_language, simplify_text};
use std::sync::Arc;
use strsim::levenshtein;
use tracing::{debug, warn};

/// What reconciling a reference did to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Creator, title or year missing; no provider was asked.
    Skipped,
    /// No provider returned a qualifying candidate.
    Unmatched,
    /// Identifiers were copied from the candidate of the named provider.
    Backfilled { provider: String },
    /// The reference was replaced by the candidate of the named provider.
    Replaced { provider: String },
}

impl ReconcileOutcome {
    pub fn is_match(&self) -> bool {
        matches!(
            self,
            ReconcileOutcome::Backfilled { .. } | ReconcileOutcome::Replaced { .. }
        )
    }
}

/// Looks up references at metadata providers.
pub struct Reconciler {
    providers: Vec<Arc<dyn Provider>>,
    author_threshold: usize,
    title_threshold: usize,
}

impl Reconciler {
    /// Creates a reconciler consulting `providers` in the given order.
    pub fn new(providers: Vec<Arc<dyn Provider>>, author_threshold: usize, title_threshold: usize) -> Self {
        Self {
            providers,
            author_threshold,
            title_threshold,
        }
    }

    /// Creates a reconciler for the metadata providers and thresholds of `config`.
    pub fn from_config(registry: &ProviderRegistry, config: &MergeConfig) -> Self {
        Self::new(
            registry.metadata_providers(&config.metadata_sources),
            config.author_distance_threshold,
            config.title_distance_threshold,
        )
    }

    fn is_eligible(&self, provider: &dyn Provider, reference: &BibliographicItem) -> bool {
        let language = reference
            .language
            .as_deref()
            .or_else(|| reference.usable_title().and_then(guess_language));
        provider.supports_type(&reference.effective_type()) && provider.supports_language(language)
    }

    fn qualifies(&self, reference: &BibliographicItem, candidate: &BibliographicItem) -> bool {
        let (Some(year), Some(candidate_year)) = (reference.year(), candidate.year()) else {
            return false;
        };
        if year.to_string() != candidate_year.to_string() {
            return false;
        }

        let (Some(author), Some(candidate_author)) =
            (reference.primary_creator(), candidate.primary_creator())
        else {
            return false;
        };
        let (author, candidate_author) = (author.to_lowercase(), candidate_author.to_lowercase());
        if author == candidate_author {
            return true;
        }
        if levenshtein(&author, &candidate_author) > self.author_threshold {
            return false;
        }

        match (reference.usable_title(), candidate.usable_title()) {
            (Some(title), Some(candidate_title)) => {
                levenshtein(&simplify_text(title), &simplify_text(candidate_title))
                    <= self.title_threshold
            }
            _ => false,
        }
    }

    /// Tries to find a canonical record for `reference` and updates it in place.
    pub fn reconcile(&self, reference: &mut BibliographicItem) -> ReconcileOutcome {
        let (creator, year, title) = reference.creator_year_title();
        if creator.is_none() || year.is_none() || title.is_none() {
            return ReconcileOutcome::Skipped;
        }

        let mut outcome = ReconcileOutcome::Unmatched;
        for provider in &self.providers {
            let provider_id = provider.id();
            if !self.is_eligible(provider.as_ref(), reference) {
                debug!(provider = provider_id, "not eligible for reference");
                continue;
            }

            let candidate = match provider.lookup(reference) {
                Ok(Some(candidate)) => candidate,
                Ok(None) => continue,
                Err(e) => {
                    warn!(provider = provider_id, error = %e, "lookup failed");
                    continue;
                }
            };
            if !self.qualifies(reference, &candidate) {
                continue;
            }

            if candidate.populated_field_count() < reference.populated_field_count() {
                if candidate.doi.is_some() {
                    reference.doi = candidate.doi.clone();
                }
                if candidate.isbn.is_some() {
                    reference.isbn = candidate.isbn.clone();
                }
                reference.validate_by(provider_id);
                debug!(provider = provider_id, doi = ?reference.doi, "backfilled identifiers");
                outcome = ReconcileOutcome::Backfilled {
                    provider: provider_id.to_string(),
                };
                continue;
            }

            let mut replacement = candidate;
            for source in reference.custom.validated_by.keys() {
                replacement.validate_by(source);
            }
            replacement.validate_by(provider_id);
            if replacement.id.is_empty() {
                replacement.id = reference.id.clone();
            }
            let original = std::mem::replace(reference, replacement);
            reference.custom.original_data = Some(Box::new(original));
            debug!(provider = provider_id, doi = ?reference.doi, "replaced reference");
            return ReconcileOutcome::Replaced {
                provider: provider_id.to_string(),
            };
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Creator, DateValue, ItemType};
    use crate::provider::{ProviderError, StaticProvider};
    use pretty_assertions::assert_eq;
    use rstest::*;

    fn reference(family: &str, year: i32, title: &str) -> BibliographicItem {
        BibliographicItem {
            title: Some(title.to_string()),
            author: vec![Creator::new(family, "")],
            issued: Some(DateValue::Parts(vec![year])),
            ..Default::default()
        }
    }

    fn candidate(family: &str, year: i32, title: &str, doi: &str) -> BibliographicItem {
        BibliographicItem {
            doi: Some(doi.to_string()),
            item_type: Some(ItemType::ArticleJournal),
            container_title: Some("Journal of Things".to_string()),
            ..reference(family, year, title)
        }
    }

    fn reconciler(providers: Vec<Arc<StaticProvider>>) -> Reconciler {
        Reconciler::new(
            providers.into_iter().map(|p| p as Arc<dyn Provider>).collect(),
            3,
            5,
        )
    }

    #[rstest]
    #[case("Smith", true)]
    #[case("SMITH", true)]
    #[case("Smithxyz", true)]
    #[case("Smithwxyz", false)]
    fn test_author_distance_threshold(#[case] family: &str, #[case] accepted: bool) {
        let provider = Arc::new(
            StaticProvider::new("openalex").with_items(vec![candidate(family, 2000, "A Study", "10.9/y")]),
        );
        let mut item = reference("Smith", 2000, "A Study");
        let outcome = reconciler(vec![provider]).reconcile(&mut item);

        assert_eq!(outcome.is_match(), accepted);
        assert_eq!(item.doi.is_some(), accepted);
    }

    #[rstest]
    #[case("A Study of Things", true)]
    #[case("A Study of Thing", true)]
    #[case("A Study of Kings!!", true)]
    #[case("Notes on Kingdoms", false)]
    fn test_title_distance_threshold(#[case] title: &str, #[case] accepted: bool) {
        let provider = Arc::new(
            StaticProvider::new("openalex").with_items(vec![candidate("Smyth", 2000, title, "10.9/y")]),
        );
        let mut item = reference("Smith", 2000, "A Study of Things");
        assert_eq!(reconciler(vec![provider]).reconcile(&mut item).is_match(), accepted);
    }

    #[test]
    fn test_title_is_not_checked_for_equal_authors() {
        let provider = Arc::new(
            StaticProvider::new("openalex")
                .with_items(vec![candidate("Smith", 2000, "Entirely Different Words", "10.9/y")]),
        );
        let mut item = reference("Smith", 2000, "A Study");
        assert!(reconciler(vec![provider]).reconcile(&mut item).is_match());
    }

    #[test]
    fn test_year_mismatch_is_rejected() {
        let provider = Arc::new(
            StaticProvider::new("openalex").with_items(vec![candidate("Smith", 2001, "A Study", "10.9/y")]),
        );
        let mut item = reference("Smith", 2000, "A Study");
        let before = item.clone();

        assert_eq!(
            reconciler(vec![provider]).reconcile(&mut item),
            ReconcileOutcome::Unmatched
        );
        assert_eq!(item, before);
    }

    #[test]
    fn test_insufficient_data_makes_no_calls() {
        let provider = Arc::new(
            StaticProvider::new("openalex").with_items(vec![candidate("Smith", 2000, "A Study", "10.9/y")]),
        );
        let mut item = BibliographicItem {
            title: Some("no_title".to_string()),
            author: vec![Creator::from_literal("no_author")],
            issued: Some(DateValue::Parts(vec![2000])),
            ..Default::default()
        };
        let before = item.clone();

        let outcome = reconciler(vec![Arc::clone(&provider)]).reconcile(&mut item);
        assert_eq!(outcome, ReconcileOutcome::Skipped);
        assert_eq!(item, before);
        assert_eq!(provider.call_count(), 0);
    }

    #[test]
    fn test_replacement_keeps_provenance() {
        let provider = Arc::new(
            StaticProvider::new("openalex").with_items(vec![candidate("Smith", 2000, "A Study", "10.9/y")]),
        );
        let mut item = reference("Smith", 2000, "A Study");
        item.validate_by("crossref");
        let before = item.clone();

        let outcome = reconciler(vec![provider]).reconcile(&mut item);
        assert_eq!(
            outcome,
            ReconcileOutcome::Replaced {
                provider: "openalex".to_string()
            }
        );
        assert_eq!(item.doi.as_deref(), Some("10.9/y"));
        assert_eq!(
            item.custom.validated_by.keys().collect::<Vec<_>>(),
            vec!["crossref", "openalex"]
        );
        assert_eq!(item.custom.original_data.as_deref(), Some(&before));
    }

    #[test]
    fn test_first_replacement_wins() {
        let first = Arc::new(
            StaticProvider::new("crossref").with_items(vec![candidate("Smith", 2000, "A Study", "10.1/first")]),
        );
        let second = Arc::new(
            StaticProvider::new("openalex").with_items(vec![candidate("Smith", 2000, "A Study", "10.1/second")]),
        );
        let mut item = reference("Smith", 2000, "A Study");

        reconciler(vec![first, Arc::clone(&second)]).reconcile(&mut item);
        assert_eq!(item.doi.as_deref(), Some("10.1/first"));
        assert_eq!(second.lookup_calls(), 0);
    }

    #[test]
    fn test_sparser_candidates_backfill_last_writer_wins() {
        let sparse = |doi: &str| BibliographicItem {
            doi: Some(doi.to_string()),
            ..reference("Smith", 2000, "A Study")
        };
        let first = Arc::new(StaticProvider::new("crossref").with_items(vec![sparse("10.1/first")]));
        let second = Arc::new(StaticProvider::new("openalex").with_items(vec![sparse("10.1/second")]));

        let mut item = BibliographicItem {
            container_title: Some("Journal of Things".to_string()),
            volume: Some("12".to_string()),
            page: Some("1-10".to_string()),
            ..reference("Smith", 2000, "A Study")
        };

        let outcome = reconciler(vec![Arc::clone(&first), Arc::clone(&second)]).reconcile(&mut item);
        assert_eq!(
            outcome,
            ReconcileOutcome::Backfilled {
                provider: "openalex".to_string()
            }
        );
        assert_eq!(item.doi.as_deref(), Some("10.1/second"));
        assert_eq!(item.volume.as_deref(), Some("12"));
        assert_eq!(item.custom.original_data, None);
        assert_eq!(first.lookup_calls(), 1);
        assert_eq!(second.lookup_calls(), 1);
    }

    #[test]
    fn test_no_eligible_provider_is_noop() {
        let books_only = Arc::new(
            StaticProvider::new("k10plus")
                .with_types([ItemType::Book])
                .with_items(vec![candidate("Smith", 2000, "A Study", "10.9/y")]),
        );
        let german_only = Arc::new(
            StaticProvider::new("dnb")
                .with_languages(["de"])
                .with_items(vec![candidate("Smith", 2000, "A Study", "10.9/y")]),
        );
        let mut item = BibliographicItem {
            container_title: Some("Journal".to_string()),
            ..reference("Smith", 2000, "The Study of the Law")
        };
        let before = item.clone();

        let outcome =
            reconciler(vec![Arc::clone(&books_only), Arc::clone(&german_only)]).reconcile(&mut item);
        assert_eq!(outcome, ReconcileOutcome::Unmatched);
        assert_eq!(item, before);
        assert_eq!(books_only.call_count() + german_only.call_count(), 0);
    }

    #[test]
    fn test_failing_provider_is_skipped() {
        let failing = Arc::new(
            StaticProvider::new("crossref").with_failure(ProviderError::Transport("503".to_string())),
        );
        let working = Arc::new(
            StaticProvider::new("openalex").with_items(vec![candidate("Smith", 2000, "A Study", "10.9/y")]),
        );
        let mut item = reference("Smith", 2000, "A Study");

        let outcome = reconciler(vec![failing, working]).reconcile(&mut item);
        assert!(outcome.is_match());
        assert_eq!(item.doi.as_deref(), Some("10.9/y"));
    }
}
