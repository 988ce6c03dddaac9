//! Sequence flattener.
//!
//! Turns a [`SessionDefinition`] into the ordered list of execution items a
//! run walks through. Rounds are expanded in place of the first block they
//! reference; their other members are pulled out of their authored
//! positions.
//!
//! ```text
//! blocks: [CA, TC, FM, VC]   round {TC, FM} x2
//! items:  [CA, TC, FM, TC, FM, VC]
//! ```

use std::collections::HashMap;

use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_pcg::Mcg128Xsl64;
use serde::{Deserialize, Serialize};

use crate::plan::{ExerciseBlock, Round, RoundId, SessionDefinition};
use crate::variation::ResolvedBlock;

/// Round membership of an execution item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundSlot {
    pub round_id: RoundId,
    /// 1-based repetition number.
    pub repetition: u32,
    pub total_repetitions: u32,
}

/// One positionally addressed step of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionItem {
    pub source_code: String,
    pub block: ResolvedBlock,
    #[serde(default)]
    pub round: Option<RoundSlot>,
}

impl ExecutionItem {
    pub fn is_round_member(&self) -> bool {
        self.round.is_some()
    }

    pub fn is_timed(&self) -> bool {
        self.block.block.is_timed()
    }
}

/// Data-integrity problems found while flattening. Never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FlattenWarning {
    /// A round references a code that no block in the session has.
    DanglingReference { round_id: RoundId, code: String },
    /// A block is already claimed by an earlier round.
    DuplicateMembership {
        round_id: RoundId,
        code: String,
        owner: RoundId,
    },
}

/// Output of [`flatten`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Flattened {
    pub items: Vec<ExecutionItem>,
    pub warnings: Vec<FlattenWarning>,
}

enum Slot<'a> {
    Standalone(&'a ExerciseBlock),
    Round {
        round: &'a Round,
        members: Vec<&'a ExerciseBlock>,
    },
}

/// Work out where every standalone block and round goes, without shuffling.
fn layout(session: &SessionDefinition) -> (Vec<Slot<'_>>, Vec<FlattenWarning>) {
    let mut warnings = Vec::new();
    let mut owner: HashMap<&str, usize> = HashMap::new();
    let mut members: Vec<Vec<&ExerciseBlock>> = vec![Vec::new(); session.rounds.len()];

    for (ri, round) in session.rounds.iter().enumerate() {
        for code in &round.block_codes {
            let Some(block) = session.block(code) else {
                warnings.push(FlattenWarning::DanglingReference {
                    round_id: round.id,
                    code: code.clone(),
                });
                continue;
            };
            match owner.get(code.as_str()) {
                Some(&other) => {
                    warnings.push(FlattenWarning::DuplicateMembership {
                        round_id: round.id,
                        code: code.clone(),
                        owner: session.rounds[other].id,
                    });
                }
                _ => {
                    owner.insert(code.as_str(), ri);
                    members[ri].push(block);
                }
            }
        }
    }

    let mut expanded = vec![false; session.rounds.len()];
    let mut slots = Vec::with_capacity(session.blocks.len());
    for block in &session.blocks {
        match owner.get(block.code.as_str()) {
            None => slots.push(Slot::Standalone(block)),
            Some(&ri) if !expanded[ri] => {
                expanded[ri] = true;
                slots.push(Slot::Round {
                    round: &session.rounds[ri],
                    members: std::mem::take(&mut members[ri]),
                });
            }
            Some(_) => {}
        }
    }

    (slots, warnings)
}

/// Flatten a session into its execution sequence.
///
/// Shuffled rounds draw from `rng` once per repetition, so callers that
/// need a stable sequence must flatten once per run and keep the result.
pub fn flatten<R: Rng + ?Sized>(session: &SessionDefinition, rng: &mut R) -> Flattened {
    let (slots, warnings) = layout(session);
    for warning in &warnings {
        tracing::warn!(session = %session.name, ?warning, "round reference skipped");
    }

    let mut items = Vec::new();
    for slot in slots {
        match slot {
            Slot::Standalone(block) => items.push(ExecutionItem {
                source_code: block.code.clone(),
                block: ResolvedBlock::unresolved(block.clone()),
                round: None,
            }),
            Slot::Round { round, members } => {
                let total = round.effective_repetitions();
                for repetition in 1..=total {
                    let mut order = members.clone();
                    if round.shuffle {
                        order.shuffle(rng);
                    }
                    items.extend(order.into_iter().map(|block| ExecutionItem {
                        source_code: block.code.clone(),
                        block: ResolvedBlock::unresolved(block.clone()),
                        round: Some(RoundSlot {
                            round_id: round.id,
                            repetition,
                            total_repetitions: total,
                        }),
                    }));
                }
            }
        }
    }

    Flattened { items, warnings }
}

/// Generator for shuffles and random variations. A fixed seed makes a
/// run reproducible.
pub fn seeded_rng(seed: Option<u64>) -> Mcg128Xsl64 {
    match seed {
        Some(seed) => Mcg128Xsl64::seed_from_u64(seed),
        None => Mcg128Xsl64::from_entropy(),
    }
}

/// Planned practice time of a session in seconds.
///
/// Advisory blocks are excluded; round members count once per repetition.
pub fn estimated_duration_secs(session: &SessionDefinition) -> u64 {
    let (slots, _) = layout(session);
    slots
        .iter()
        .map(|slot| match slot {
            Slot::Standalone(block) => timed_secs(block),
            Slot::Round { round, members } => {
                let per_rep: u64 = members.iter().map(|b| timed_secs(b)).sum();
                per_rep * round.effective_repetitions() as u64
            }
        })
        .sum()
}

/// Planned practice time of an already resolved sequence in seconds.
pub fn planned_duration_secs(items: &[ExecutionItem]) -> u64 {
    items.iter().map(|item| timed_secs(&item.block.block)).sum()
}

fn timed_secs(block: &ExerciseBlock) -> u64 {
    if block.is_timed() {
        block.target_duration_secs
    } else {
        0
    }
}
