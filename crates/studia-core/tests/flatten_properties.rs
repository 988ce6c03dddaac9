//! Property tests for the sequence flattener.

use proptest::prelude::*;
use rand::SeedableRng;
use rand_pcg::Mcg128Xsl64;
use studia_core::plan::{ExerciseBlock, ExerciseKind, Focus, SessionDefinition};
use studia_core::sequence::{estimated_duration_secs, flatten, planned_duration_secs};

fn blocks(n: usize) -> Vec<ExerciseBlock> {
    (0..n)
        .map(|i| ExerciseBlock::new(format!("B{i}"), ExerciseKind::CoreTechnique, format!("Block {i}"), 60))
        .collect()
}

proptest! {
    #[test]
    fn no_rounds_keeps_authored_order(n in 1usize..12, seed in any::<u64>()) {
        let session = SessionDefinition::new("S", Focus::General, blocks(n));
        let mut rng = Mcg128Xsl64::seed_from_u64(seed);
        let flat = flatten(&session, &mut rng);
        let codes: Vec<_> = flat.items.iter().map(|i| i.source_code.clone()).collect();
        let expected: Vec<_> = (0..n).map(|i| format!("B{i}")).collect();
        prop_assert_eq!(codes, expected);
        prop_assert!(flat.warnings.is_empty());
    }

    #[test]
    fn round_expands_at_first_member(
        n in 2usize..10,
        picks in proptest::collection::btree_set(0usize..10, 1..5),
        reps in 1u32..4,
        shuffle in any::<bool>(),
        seed in any::<u64>(),
    ) {
        let members: Vec<usize> = picks.into_iter().filter(|i| *i < n).collect();
        prop_assume!(!members.is_empty());
        let k = members.len();
        let first = members[0];

        let mut session = SessionDefinition::new("S", Focus::General, blocks(n));
        session.add_round(members.iter().map(|i| format!("B{i}")), reps, shuffle);

        let mut rng = Mcg128Xsl64::seed_from_u64(seed);
        let flat = flatten(&session, &mut rng);

        prop_assert_eq!(flat.items.len(), n - k + reps as usize * k);
        let round_items: Vec<_> = flat.items.iter().enumerate().filter(|(_, i)| i.is_round_member()).collect();
        prop_assert_eq!(round_items.len(), reps as usize * k);
        // Round items are contiguous, starting where the first member was authored.
        prop_assert_eq!(round_items[0].0, first);
        prop_assert_eq!(round_items.last().map(|(p, _)| *p), Some(first + reps as usize * k - 1));
        prop_assert_eq!(planned_duration_secs(&flat.items), estimated_duration_secs(&session));
    }
}
