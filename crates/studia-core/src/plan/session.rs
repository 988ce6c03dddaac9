use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::block::ExerciseBlock;
use crate::error::StructuralError;

/// Pedagogical focus of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Focus {
    #[default]
    #[serde(rename = "GEN")]
    General,
    #[serde(rename = "SON")]
    Sound,
    #[serde(rename = "FLX")]
    Flexibility,
    #[serde(rename = "ART")]
    Articulation,
    #[serde(rename = "MOT")]
    Motor,
    #[serde(rename = "COG")]
    Cognitive,
}

/// Stable round identifier, assigned once when the round is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoundId(pub u32);

impl fmt::Display for RoundId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r_{}", self.0)
    }
}

/// A group of blocks executed as a repeated unit.
///
/// Members are referenced by block code, not by position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Round {
    pub id: RoundId,
    #[serde(default)]
    pub name: Option<String>,
    pub block_codes: Vec<String>,
    #[serde(default = "default_repetitions")]
    pub repetitions: u32,
    #[serde(default)]
    pub shuffle: bool,
}

fn default_repetitions() -> u32 {
    1
}

impl Round {
    /// Repetitions, never less than one.
    pub fn effective_repetitions(&self) -> u32 {
        self.repetitions.max(1)
    }
}

/// A practice session: ordered blocks plus rounds over those blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionDefinition {
    pub name: String,
    #[serde(default)]
    pub focus: Focus,
    pub blocks: Vec<ExerciseBlock>,
    #[serde(default)]
    pub rounds: Vec<Round>,
    /// Next id handed out by [`SessionDefinition::add_round`].
    #[serde(default)]
    next_round_id: u32,
}

impl SessionDefinition {
    pub fn new(name: impl Into<String>, focus: Focus, blocks: Vec<ExerciseBlock>) -> Self {
        Self {
            name: name.into(),
            focus,
            blocks,
            rounds: Vec::new(),
            next_round_id: 0,
        }
    }

    /// Create a round over `codes` and return its freshly assigned id.
    pub fn add_round<I, S>(&mut self, codes: I, repetitions: u32, shuffle: bool) -> RoundId
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        // Files written by hand may carry ids beyond the stored counter.
        let floor = self.rounds.iter().map(|r| r.id.0 + 1).max().unwrap_or(0);
        let id = RoundId(self.next_round_id.max(floor));
        self.next_round_id = id.0 + 1;
        self.rounds.push(Round {
            id,
            name: None,
            block_codes: codes.into_iter().map(Into::into).collect(),
            repetitions: repetitions.max(1),
            shuffle,
        });
        id
    }

    pub fn block(&self, code: &str) -> Option<&ExerciseBlock> {
        self.blocks.iter().find(|b| b.code == code)
    }

    pub fn round(&self, id: RoundId) -> Option<&Round> {
        self.rounds.iter().find(|r| r.id == id)
    }

    /// Check the structural invariants needed to start a run.
    ///
    /// Dangling round references are not structural errors; the flattener
    /// reports them as warnings.
    pub fn validate(&self) -> Result<(), StructuralError> {
        if self.blocks.is_empty() {
            return Err(StructuralError::EmptySession {
                session: self.name.clone(),
            });
        }
        self.check_unique_codes()
    }

    /// Block codes must be unique within a session.
    pub fn check_unique_codes(&self) -> Result<(), StructuralError> {
        let mut seen = HashSet::new();
        for block in &self.blocks {
            if !seen.insert(block.code.as_str()) {
                return Err(StructuralError::DuplicateBlockCode {
                    session: self.name.clone(),
                    code: block.code.clone(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::ExerciseKind;

    fn session() -> SessionDefinition {
        SessionDefinition::new(
            "Monday",
            Focus::General,
            vec![
                ExerciseBlock::new("CA", ExerciseKind::WarmUpA, "Long tones", 120),
                ExerciseBlock::new("TC", ExerciseKind::CoreTechnique, "Scales", 300),
            ],
        )
    }

    #[test]
    fn add_round_assigns_sequential_ids() {
        let mut s = session();
        let a = s.add_round(["CA"], 2, false);
        let b = s.add_round(["TC"], 0, true);
        assert_eq!(a, RoundId(0));
        assert_eq!(b, RoundId(1));
        assert_eq!(s.round(b).unwrap().repetitions, 1);
        assert_eq!(a.to_string(), "r_0");
    }

    #[test]
    fn add_round_skips_ids_already_in_use() {
        let json = r#"{
            "name": "Loaded",
            "blocks": [{"code": "CA", "kind": "CA", "name": "Long tones"}],
            "rounds": [{"id": 4, "block_codes": ["CA"]}]
        }"#;
        let mut s: SessionDefinition = serde_json::from_str(json).unwrap();
        assert_eq!(s.add_round(["CA"], 1, false), RoundId(5));
    }

    #[test]
    fn validate_rejects_empty_and_duplicate_codes() {
        let empty = SessionDefinition::new("Empty", Focus::Sound, vec![]);
        assert!(matches!(
            empty.validate(),
            Err(StructuralError::EmptySession { .. })
        ));

        let mut dup = session();
        dup.blocks
            .push(ExerciseBlock::new("CA", ExerciseKind::CoolDown, "Again", 60));
        assert!(matches!(
            dup.validate(),
            Err(StructuralError::DuplicateBlockCode { code, .. }) if code == "CA"
        ));

        assert!(session().validate().is_ok());
    }
}
