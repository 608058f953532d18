//! Per-work merging of reference lists.
//!
//! [`MergeCoordinator::merge`] builds one reference list for a citing work:
//!
//! 1. The configured citation-data providers are asked for the work in priority
//!    order. The first one returning a record supplies the anchor, whose references
//!    form the base list.
//! 2. References of every later provider are aligned with the anchor's references
//!    on their creator/year [`MatchKey`]. Matching anchor references are marked as
//!    validated by that provider and completed from the vendor reference. Vendor
//!    references without a counterpart are added depending on the policies.
//! 3. Unvalidated anchor references are added. References no provider corroborated
//!    and that lack a DOI or ISBN are reconciled against metadata providers.
//!    Duplicates are removed and references outside the configured year range are
//!    dropped.
//!
//! Provider failures never fail a merge. Only a work no provider has data for does.

use crate::affiliation::AffiliationMerger;
use crate::cache::Cache;
use crate::config::{MergeConfig, MergePolicy, Pattern};
use crate::dedupe::{Deduplicator, DeduplicatorConfig};
use crate::model::{BibliographicItem, MatchKey};
use crate::provider::{ImportOptions, Provider, ProviderRegistry};
use crate::reconcile::Reconciler;
use crate::utils::{format_doi, work_id_to_doi};
use crate::{MergeError, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Counters describing what a merge did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeStats {
    /// Provider that supplied the anchor record
    pub anchor_provider: Option<String>,
    /// Matches between a vendor reference and an anchor reference
    pub validated: usize,
    /// Anchor references added to the result after their first validation
    pub added: usize,
    /// Vendor references added to the result
    pub vendor_added: usize,
    /// Anchor references added without validation
    pub unvalidated_added: usize,
    /// References removed as duplicates
    pub deduplicated: usize,
    /// References that received an identifier from a metadata lookup
    pub reconciled: usize,
    /// References dropped by the year filter
    pub out_of_range: usize,
    /// Providers whose calls failed
    pub skipped_providers: Vec<String>,
    /// Whether the result was read from the cache
    pub from_cache: bool,
}

impl MergeStats {
    /// Adds the counters of `other` to these.
    pub fn accumulate(&mut self, other: &MergeStats) {
        self.validated += other.validated;
        self.added += other.added;
        self.vendor_added += other.vendor_added;
        self.unvalidated_added += other.unvalidated_added;
        self.deduplicated += other.deduplicated;
        self.reconciled += other.reconciled;
        self.out_of_range += other.out_of_range;
        for provider in &other.skipped_providers {
            if !self.skipped_providers.contains(provider) {
                self.skipped_providers.push(provider.clone());
            }
        }
    }
}

/// A position in the merged reference list.
enum Slot {
    /// An anchor reference, resolved after all providers have been merged so that
    /// later validations are included
    Anchor(usize),
    Vendor(BibliographicItem),
}

/// Merges the records providers have for a citing work.
///
/// The coordinator holds no state between merges and can be shared across threads.
pub struct MergeCoordinator {
    registry: Arc<ProviderRegistry>,
    config: MergeConfig,
    cache: Option<Arc<dyn Cache>>,
    affiliations: AffiliationMerger,
    reconciler: Reconciler,
    deduplicator: Deduplicator,
}

impl MergeCoordinator {
    /// Creates a coordinator after checking `config` against `registry`.
    ///
    /// # Errors
    ///
    /// Returns the configuration error found by [`MergeConfig::validate`].
    pub fn new(registry: Arc<ProviderRegistry>, config: MergeConfig) -> Result<Self> {
        config.validate(&registry)?;
        Ok(Self {
            affiliations: AffiliationMerger::new(config.affiliation_ignore_list.clone()),
            reconciler: Reconciler::from_config(&registry, &config),
            deduplicator: Deduplicator::new().with_config(DeduplicatorConfig {
                key: config.dedupe_key,
            }),
            registry,
            config,
            cache: None,
        })
    }

    /// Memoizes merged items in `cache` when `use_cache` is set.
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<dyn Cache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn config(&self) -> &MergeConfig {
        &self.config
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Converts a work id to the normalized DOI used to query providers.
    ///
    /// Accepts DOIs, DOI URLs and the file name form `10.1234_abc`.
    pub fn normalize_work_id(id: &str) -> Result<String> {
        let id = id.trim();
        if !id.contains("10.") {
            return Err(MergeError::InvalidWorkId(id.to_string()));
        }
        format_doi(&work_id_to_doi(id)).ok_or_else(|| MergeError::InvalidWorkId(id.to_string()))
    }

    fn cache(&self) -> Option<&Arc<dyn Cache>> {
        self.cache.as_ref().filter(|_| self.config.use_cache)
    }

    fn load_cached(&self, doi: &str) -> Option<BibliographicItem> {
        let cache = self.cache()?;
        let request = format!("merged:{doi}");
        match cache.load(&request).map(|v| v.map(serde_json::from_value)) {
            Ok(Some(Ok(item))) => Some(item),
            Ok(Some(Err(e))) => {
                warn!(id = doi, error = %e, "ignoring unreadable cached item");
                None
            }
            Ok(None) => None,
            Err(e) => {
                warn!(id = doi, error = %e, "cache read failed");
                None
            }
        }
    }

    fn save_cached(&self, doi: &str, item: &BibliographicItem) {
        let Some(cache) = self.cache() else {
            return;
        };
        let result = serde_json::to_value(item)
            .map_err(MergeError::from)
            .and_then(|value| cache.save(&format!("merged:{doi}"), &value));
        if let Err(e) = result {
            warn!(id = doi, error = %e, "cache write failed");
        }
    }

    /// Fetches the record of `doi` from `provider`. Failures are logged and yield `None`.
    fn fetch(
        &self,
        provider: &dyn Provider,
        doi: &str,
        stats: &mut MergeStats,
    ) -> Option<BibliographicItem> {
        let provider_id = provider.id();
        match provider.import_items(&[doi.to_string()], ImportOptions::default()) {
            Ok(items) => {
                let item = items.into_iter().next().flatten();
                if item.is_none() {
                    debug!(provider = provider_id, id = doi, "no data available");
                }
                item
            }
            Err(e) => {
                warn!(provider = provider_id, id = doi, error = %e, "skipping provider");
                stats.skipped_providers.push(provider_id.to_string());
                None
            }
        }
    }

    fn adds_missing(&self, provider_id: &str) -> bool {
        self.config.has_policy(MergePolicy::AddMissingAll)
            || (self.config.has_policy(MergePolicy::AddMissingFree)
                && provider_id != self.config.restricted_source)
    }

    fn is_ignored_author(&self, reference: &BibliographicItem) -> bool {
        reference.primary_creator().is_none_or(|author| {
            Pattern::any_matches(&self.config.authors_ignore_list, &author.to_lowercase())
        })
    }

    /// Merges all provider data for the work `id`.
    ///
    /// # Errors
    ///
    /// Returns [`MergeError::InvalidWorkId`] for ids that are not DOIs and
    /// [`MergeError::NoData`] if no provider has a record for the work.
    pub fn merge(&self, id: &str) -> Result<(BibliographicItem, MergeStats)> {
        let doi = Self::normalize_work_id(id)?;

        if let Some(item) = self.load_cached(&doi) {
            debug!(id = %doi, "using cached item");
            let stats = MergeStats {
                anchor_provider: item.custom.metadata_source.clone(),
                from_cache: true,
                ..Default::default()
            };
            return Ok((item, stats));
        }

        let mut stats = MergeStats::default();
        let providers = self.registry.citation_data_providers(&self.config.datasources);

        let mut anchor = None;
        let mut vendors = providers.iter();
        for provider in vendors.by_ref() {
            if let Some(item) = self.fetch(provider.as_ref(), &doi, &mut stats) {
                stats.anchor_provider = Some(provider.id().to_string());
                anchor = Some(item);
                break;
            }
        }
        let Some(mut anchor) = anchor else {
            warn!(id = %doi, "no provider has data");
            return Err(MergeError::NoData { id: doi });
        };
        if anchor.id.is_empty() {
            anchor.id = doi.clone();
        }

        let mut references = std::mem::take(&mut anchor.x_references);
        let keys: Vec<Option<MatchKey>> = references.iter().map(MatchKey::creator_year).collect();
        let mut emitted = vec![false; references.len()];
        let mut output: Vec<Slot> = Vec::new();

        let dump_all = self.config.has_policy(MergePolicy::DumpAll);
        if dump_all {
            output.extend((0..references.len()).map(Slot::Anchor));
            emitted.fill(true);
            stats.added += references.len();
        }

        for provider in vendors {
            let vendor_id = provider.id();
            let Some(vendor_item) = self.fetch(provider.as_ref(), &doi, &mut stats) else {
                continue;
            };

            if dump_all {
                stats.vendor_added += vendor_item.x_references.len();
                output.extend(vendor_item.x_references.iter().cloned().map(Slot::Vendor));
            } else {
                for vendor_ref in &vendor_item.x_references {
                    let Some(vendor_key) = vendor_ref.match_key() else {
                        continue;
                    };

                    let mut matched = false;
                    for (idx, reference) in references.iter_mut().enumerate() {
                        if keys[idx].as_ref() != Some(&vendor_key) {
                            continue;
                        }
                        complete_reference(reference, vendor_ref);
                        if reference.doi.is_none() {
                            reference.doi = vendor_ref.doi.clone();
                        }
                        reference.validate_by(vendor_id);
                        self.affiliations.merge_item(reference, vendor_ref, vendor_id);
                        if !emitted[idx] {
                            emitted[idx] = true;
                            output.push(Slot::Anchor(idx));
                            stats.added += 1;
                        }
                        stats.validated += 1;
                        matched = true;
                    }

                    if !matched && self.adds_missing(vendor_id) {
                        let mut added = vendor_ref.clone();
                        if added.item_type.is_none() {
                            added.item_type = Some(added.guess_type());
                        }
                        added
                            .custom
                            .metadata_source
                            .get_or_insert_with(|| vendor_id.to_string());
                        output.push(Slot::Vendor(added));
                        stats.vendor_added += 1;
                    }
                }
            }

            if let Some(vendor_cited) = vendor_item.custom.times_cited {
                let cited = anchor.custom.times_cited.unwrap_or(0).max(vendor_cited);
                anchor.custom.times_cited = Some(cited);
            }
            if self.config.has_policy(MergePolicy::AddAffiliations) {
                self.affiliations.merge_item(&mut anchor, &vendor_item, vendor_id);
            }
            if anchor.abstract_text.is_none() {
                anchor.abstract_text = vendor_item.abstract_text.clone();
            }
            if anchor.keywords.is_empty() {
                anchor.keywords = vendor_item.keywords.clone();
            }
        }

        if self.config.has_policy(MergePolicy::AddUnvalidated) {
            for (idx, reference) in references.iter().enumerate() {
                if emitted[idx] || reference.is_validated() {
                    continue;
                }
                if self.is_ignored_author(reference) {
                    debug!(reference = %reference.derived_id(), "ignoring unvalidated reference");
                    continue;
                }
                emitted[idx] = true;
                output.push(Slot::Anchor(idx));
                stats.unvalidated_added += 1;
            }
        }

        let mut merged: Vec<BibliographicItem> = output
            .into_iter()
            .map(|slot| match slot {
                Slot::Anchor(idx) => references[idx].clone(),
                Slot::Vendor(reference) => reference,
            })
            .collect();

        if self.config.reconcile_references {
            let unresolved = merged
                .iter_mut()
                .filter(|r| !r.has_identifier() && !r.is_validated());
            for reference in unresolved {
                if self.reconciler.reconcile(reference).is_match() {
                    stats.reconciled += 1;
                }
            }
        }

        if self.config.has_policy(MergePolicy::RemoveDuplicates) {
            let (unique, removed) = self.deduplicator.dedupe(merged);
            merged = unique;
            stats.deduplicated = removed;
        }

        let before = merged.len();
        merged.retain(|reference| self.config.year_in_range(reference.year()));
        stats.out_of_range = before - merged.len();

        anchor.x_references = merged;
        self.save_cached(&doi, &anchor);

        info!(
            id = %doi,
            anchor = stats.anchor_provider.as_deref().unwrap_or_default(),
            references = anchor.x_references.len(),
            validated = stats.validated,
            added = stats.added + stats.vendor_added + stats.unvalidated_added,
            deduplicated = stats.deduplicated,
            reconciled = stats.reconciled,
            "merged item"
        );
        Ok((anchor, stats))
    }
}

/// Copies the type and the container abbreviation from a matching vendor reference.
fn complete_reference(reference: &mut BibliographicItem, vendor_ref: &BibliographicItem) {
    if reference.item_type.is_none() {
        reference.item_type = vendor_ref.item_type.clone();
    }
    if reference.container_title_short.is_none() {
        reference.container_title_short = vendor_ref.container_title_short.clone();
    }
}
