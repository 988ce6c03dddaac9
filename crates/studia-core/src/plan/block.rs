use serde::{Deserialize, Serialize};

/// Exercise kinds a session block can have.
///
/// `Advisory` blocks (`AD`) are informational pauses: they are never timed
/// and never count towards planned or elapsed practice time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExerciseKind {
    #[serde(rename = "CA")]
    WarmUpA,
    #[serde(rename = "CB")]
    WarmUpB,
    #[serde(rename = "TC")]
    CoreTechnique,
    #[serde(rename = "TM")]
    MaintenanceTechnique,
    #[serde(rename = "FM")]
    PieceFragment,
    #[serde(rename = "VC")]
    CoolDown,
    #[serde(rename = "AD")]
    Advisory,
}

impl ExerciseKind {
    /// Two-letter code used in plans and persisted outcomes.
    pub fn code(&self) -> &'static str {
        match self {
            ExerciseKind::WarmUpA => "CA",
            ExerciseKind::WarmUpB => "CB",
            ExerciseKind::CoreTechnique => "TC",
            ExerciseKind::MaintenanceTechnique => "TM",
            ExerciseKind::PieceFragment => "FM",
            ExerciseKind::CoolDown => "VC",
            ExerciseKind::Advisory => "AD",
        }
    }

    pub fn is_timed(&self) -> bool {
        !matches!(self, ExerciseKind::Advisory)
    }
}

/// Target tempo for students at or above `level`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TempoTarget {
    pub level: u32,
    pub bpm: u32,
}

/// How the concrete content of a block is chosen at run start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "lowercase")]
pub enum VariationPolicy {
    /// Use the variation named by `key` (matched by id or label), or the
    /// block's own content when the key is absent or unknown.
    Fixed {
        #[serde(default)]
        key: Option<String>,
    },
    /// Pick uniformly among the variations valid for the student's level.
    Random,
}

impl Default for VariationPolicy {
    fn default() -> Self {
        VariationPolicy::Fixed { key: None }
    }
}

/// Immutable exercise snapshot embedded in a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExerciseBlock {
    /// Catalog key, unique within a session.
    pub code: String,
    pub kind: ExerciseKind,
    pub name: String,
    #[serde(default)]
    pub target_duration_secs: u64,
    #[serde(default)]
    pub instructions: Option<String>,
    #[serde(default)]
    pub achievement_indicator: Option<String>,
    #[serde(default)]
    pub media_links: Vec<String>,
    #[serde(default)]
    pub tempo_targets: Vec<TempoTarget>,
    #[serde(default)]
    pub variation: VariationPolicy,
    /// Progress-tracking key. Falls back to `code` when absent.
    #[serde(default)]
    pub backpack_key: Option<String>,
}

impl ExerciseBlock {
    /// Minimal block with the given code, kind, name and duration.
    pub fn new(
        code: impl Into<String>,
        kind: ExerciseKind,
        name: impl Into<String>,
        target_duration_secs: u64,
    ) -> Self {
        Self {
            code: code.into(),
            kind,
            name: name.into(),
            target_duration_secs,
            instructions: None,
            achievement_indicator: None,
            media_links: Vec::new(),
            tempo_targets: Vec::new(),
            variation: VariationPolicy::default(),
            backpack_key: None,
        }
    }

    pub fn is_timed(&self) -> bool {
        self.kind.is_timed()
    }

    pub fn backpack_key(&self) -> &str {
        self.backpack_key.as_deref().unwrap_or(&self.code)
    }

    /// Target tempo for a student level.
    ///
    /// Picks the target with the highest level not above `student_level`,
    /// falling back to the lowest-level target.
    pub fn target_bpm(&self, student_level: u32) -> Option<u32> {
        self.tempo_targets
            .iter()
            .filter(|t| t.level <= student_level)
            .max_by_key(|t| t.level)
            .or_else(|| self.tempo_targets.iter().min_by_key(|t| t.level))
            .map(|t| t.bpm)
    }
}
