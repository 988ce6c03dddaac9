use std::collections::HashMap;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::catalog::{Catalog, CatalogEntry, Variation};
use crate::plan::{ExerciseBlock, VariationPolicy};
use crate::sequence::ExecutionItem;

/// A block with its content fixed for the current run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedBlock {
    pub block: ExerciseBlock,
    #[serde(default)]
    pub variation_key: Option<String>,
    #[serde(default)]
    pub variation_label: Option<String>,
}

impl ResolvedBlock {
    /// Wrap a snapshot that has not been through the resolver.
    pub fn unresolved(block: ExerciseBlock) -> Self {
        Self {
            block,
            variation_key: None,
            variation_label: None,
        }
    }
}

/// Resolve the content of one block.
///
/// The catalog entry refreshes text fields that it carries; the selected
/// variation then overrides name, media and duration. Neither the snapshot
/// nor the catalog is modified.
pub fn resolve_variation<R: Rng + ?Sized>(
    block: &ExerciseBlock,
    entry: Option<&CatalogEntry>,
    student_level: u32,
    rng: &mut R,
) -> ResolvedBlock {
    let mut resolved = block.clone();
    let Some(entry) = entry else {
        return ResolvedBlock::unresolved(resolved);
    };

    if entry.instructions.is_some() {
        resolved.instructions = entry.instructions.clone();
    }
    if entry.achievement_indicator.is_some() {
        resolved.achievement_indicator = entry.achievement_indicator.clone();
    }
    if !entry.tempo_targets.is_empty() {
        resolved.tempo_targets = entry.tempo_targets.clone();
    }
    if !entry.media_links.is_empty() {
        resolved.media_links = entry.media_links.clone();
    }
    if resolved.backpack_key.is_none() {
        resolved.backpack_key = entry.backpack_key.clone();
    }

    let Some(variation) = pick(&block.variation, &entry.variations, student_level, rng) else {
        return ResolvedBlock::unresolved(resolved);
    };

    resolved.name = format!("{} / {}", block.name, variation.label);
    if !variation.media_links.is_empty() {
        resolved.media_links = variation.media_links.clone();
    }
    if let Some(secs) = variation.duration_secs {
        resolved.target_duration_secs = secs;
    }

    ResolvedBlock {
        block: resolved,
        variation_key: Some(variation.key().to_string()),
        variation_label: Some(variation.label.clone()),
    }
}

fn pick<'a, R: Rng + ?Sized>(
    policy: &VariationPolicy,
    variations: &'a [Variation],
    student_level: u32,
    rng: &mut R,
) -> Option<&'a Variation> {
    match policy {
        VariationPolicy::Fixed { key: Some(key) } => variations.iter().find(|v| v.matches(key)),
        VariationPolicy::Fixed { key: None } => None,
        VariationPolicy::Random => {
            let eligible: Vec<&Variation> = variations
                .iter()
                .filter(|v| v.required_level() <= student_level)
                .collect();
            eligible.choose(rng).copied()
        }
    }
}

/// Resolve every item of a flattened sequence.
///
/// Each distinct source code is resolved once, so repetitions of a round
/// member share one variation for the whole run.
pub fn resolve_sequence<R: Rng + ?Sized>(
    items: Vec<ExecutionItem>,
    catalog: &dyn Catalog,
    student_level: u32,
    rng: &mut R,
) -> Vec<ExecutionItem> {
    let mut cache: HashMap<String, ResolvedBlock> = HashMap::new();
    items
        .into_iter()
        .map(|mut item| {
            let resolved = cache
                .entry(item.source_code.clone())
                .or_insert_with(|| {
                    let entry = catalog.lookup(&item.source_code);
                    if entry.is_none() {
                        tracing::debug!(code = %item.source_code, "no catalog entry, keeping snapshot");
                    }
                    resolve_variation(&item.block.block, entry, student_level, rng)
                })
                .clone();
            item.block = resolved;
            item
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{ExerciseKind, Focus, SessionDefinition, TempoTarget};
    use crate::sequence::flatten;
    use crate::variation::InMemoryCatalog;
    use rand::SeedableRng;
    use rand_pcg::Mcg128Xsl64;

    fn variation(id: &str, label: &str, min_level: u32) -> Variation {
        Variation {
            id: Some(id.into()),
            label: label.into(),
            min_level,
            duration_secs: None,
            media_links: vec![],
            tags: vec![],
        }
    }

    fn entry() -> CatalogEntry {
        CatalogEntry {
            code: "TC1".into(),
            name: "Scales".into(),
            instructions: Some("Two octaves".into()),
            achievement_indicator: None,
            media_links: vec!["https://media/scales.mp4".into()],
            target_duration_secs: None,
            tempo_targets: vec![TempoTarget { level: 1, bpm: 80 }],
            variations: vec![
                Variation {
                    duration_secs: Some(420),
                    media_links: vec!["https://media/slurred.mp4".into()],
                    ..variation("v1", "Slurred", 1)
                },
                variation("v2", "Tongued", 3),
                variation("v3", "Double tongued", 8),
            ],
            backpack_key: Some("scales".into()),
        }
    }

    fn block(policy: VariationPolicy) -> ExerciseBlock {
        let mut block = ExerciseBlock::new("TC1", ExerciseKind::CoreTechnique, "Scales", 300);
        block.variation = policy;
        block
    }

    #[test]
    fn fixed_key_matches_by_id_and_overrides_fields() {
        let mut rng = Mcg128Xsl64::seed_from_u64(0);
        let b = block(VariationPolicy::Fixed { key: Some("v1".into()) });
        let r = resolve_variation(&b, Some(&entry()), 1, &mut rng);
        assert_eq!(r.block.name, "Scales / Slurred");
        assert_eq!(r.block.target_duration_secs, 420);
        assert_eq!(r.block.media_links, vec!["https://media/slurred.mp4"]);
        assert_eq!(r.variation_key.as_deref(), Some("v1"));
        // Snapshot untouched.
        assert_eq!(b.name, "Scales");
    }

    #[test]
    fn fixed_key_matches_by_label() {
        let mut rng = Mcg128Xsl64::seed_from_u64(0);
        let b = block(VariationPolicy::Fixed { key: Some("Tongued".into()) });
        let r = resolve_variation(&b, Some(&entry()), 0, &mut rng);
        assert_eq!(r.variation_key.as_deref(), Some("v2"));
    }

    #[test]
    fn unknown_fixed_key_keeps_defaults_but_refreshes_text() {
        let mut rng = Mcg128Xsl64::seed_from_u64(0);
        let b = block(VariationPolicy::Fixed { key: Some("nope".into()) });
        let r = resolve_variation(&b, Some(&entry()), 5, &mut rng);
        assert_eq!(r.block.name, "Scales");
        assert_eq!(r.block.target_duration_secs, 300);
        assert_eq!(r.block.instructions.as_deref(), Some("Two octaves"));
        assert_eq!(r.block.backpack_key(), "scales");
        assert!(r.variation_key.is_none());
    }

    #[test]
    fn random_respects_student_level() {
        let b = block(VariationPolicy::Random);
        let e = entry();
        let mut rng = Mcg128Xsl64::seed_from_u64(11);
        for _ in 0..50 {
            let r = resolve_variation(&b, Some(&e), 3, &mut rng);
            let key = r.variation_key.unwrap();
            assert!(key == "v1" || key == "v2", "level 3 drew {key}");
        }
    }

    #[test]
    fn random_with_no_eligible_variation_keeps_block() {
        let b = block(VariationPolicy::Random);
        let mut e = entry();
        e.variations.retain(|v| v.min_level > 5);
        let mut rng = Mcg128Xsl64::seed_from_u64(11);
        let r = resolve_variation(&b, Some(&e), 2, &mut rng);
        assert!(r.variation_key.is_none());
        assert_eq!(r.block.name, "Scales");
    }

    #[test]
    fn missing_entry_leaves_snapshot_unchanged() {
        let b = block(VariationPolicy::Random);
        let mut rng = Mcg128Xsl64::seed_from_u64(0);
        let r = resolve_variation(&b, None, 10, &mut rng);
        assert_eq!(r, ResolvedBlock::unresolved(b));
    }

    #[test]
    fn repeated_round_member_keeps_one_variation() {
        let mut session = SessionDefinition::new(
            "Day",
            Focus::Flexibility,
            vec![block(VariationPolicy::Random)],
        );
        session.add_round(["TC1"], 6, false);
        let catalog: InMemoryCatalog = [entry()].into_iter().collect();
        let mut rng = Mcg128Xsl64::seed_from_u64(5);

        let items = flatten(&session, &mut rng).items;
        let items = resolve_sequence(items, &catalog, 10, &mut rng);
        assert_eq!(items.len(), 6);
        let first = items[0].block.variation_key.clone();
        assert!(first.is_some());
        assert!(items.iter().all(|i| i.block.variation_key == first));
    }
}
