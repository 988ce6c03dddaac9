use std::collections::BTreeMap;
use std::sync::Mutex;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackpackStatus {
    New,
    InProgress,
    Mastered,
}

impl BackpackStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackpackStatus::New => "new",
            BackpackStatus::InProgress => "in_progress",
            BackpackStatus::Mastered => "mastered",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "new" => Some(BackpackStatus::New),
            "in_progress" => Some(BackpackStatus::InProgress),
            "mastered" => Some(BackpackStatus::Mastered),
            _ => None,
        }
    }
}

/// Progress of one student on one backpack key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackpackItem {
    pub student_id: String,
    pub backpack_key: String,
    pub status: BackpackStatus,
    pub mastery_score: u32,
    pub last_practised_at: Option<DateTime<Utc>>,
    /// Monday of every week in which mastery was shown, ascending.
    pub mastered_weeks: Vec<NaiveDate>,
    pub last_mastered_week_start: Option<NaiveDate>,
    pub updated_at: DateTime<Utc>,
}

impl BackpackItem {
    pub fn new(student_id: impl Into<String>, backpack_key: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            student_id: student_id.into(),
            backpack_key: backpack_key.into(),
            status: BackpackStatus::New,
            mastery_score: 0,
            last_practised_at: None,
            mastered_weeks: Vec::new(),
            last_mastered_week_start: None,
            updated_at: now,
        }
    }
}

/// Storage for backpack entries.
pub trait BackpackRepository: Send + Sync {
    fn get(&self, student_id: &str, backpack_key: &str) -> Result<Option<BackpackItem>, StoreError>;

    fn save(&self, item: &BackpackItem) -> Result<(), StoreError>;

    /// All entries of a student, ordered by key.
    fn list(&self, student_id: &str) -> Result<Vec<BackpackItem>, StoreError>;
}

#[derive(Debug, Default)]
pub struct MemoryBackpackRepository {
    items: Mutex<BTreeMap<(String, String), BackpackItem>>,
}

impl MemoryBackpackRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: T) -> StoreError {
    StoreError::Unavailable("backpack lock poisoned".into())
}

impl BackpackRepository for MemoryBackpackRepository {
    fn get(&self, student_id: &str, backpack_key: &str) -> Result<Option<BackpackItem>, StoreError> {
        let items = self.items.lock().map_err(poisoned)?;
        Ok(items
            .get(&(student_id.to_string(), backpack_key.to_string()))
            .cloned())
    }

    fn save(&self, item: &BackpackItem) -> Result<(), StoreError> {
        self.items.lock().map_err(poisoned)?.insert(
            (item.student_id.clone(), item.backpack_key.clone()),
            item.clone(),
        );
        Ok(())
    }

    fn list(&self, student_id: &str) -> Result<Vec<BackpackItem>, StoreError> {
        let items = self.items.lock().map_err(poisoned)?;
        Ok(items
            .values()
            .filter(|i| i.student_id == student_id)
            .cloned()
            .collect())
    }
}
