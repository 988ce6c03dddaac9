use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use super::backpack::{BackpackItem, BackpackRepository, BackpackStatus};
use crate::error::StoreError;
use crate::outcome::BlockOutcome;
use crate::persist::{ProgressTracker, ProgressUpdate};
use crate::plan::{monday_of, ExerciseKind};

/// Mastered weeks older than this are forgotten.
pub const MASTERY_WINDOW_DAYS: i64 = 28;

const COMPLETION_POINTS: u32 = 10;
const TEMPO_REACHED_POINTS: u32 = 5;
const TEMPO_CLOSE_POINTS: u32 = 2;
const MASTERED_WEEKS_REQUIRED: usize = 2;

/// Scores completed blocks into the student's backpack.
pub struct BackpackTracker<R> {
    repo: Arc<R>,
}

impl<R: BackpackRepository> BackpackTracker<R> {
    pub fn new(repo: Arc<R>) -> Self {
        Self { repo }
    }

    pub fn repository(&self) -> &R {
        &self.repo
    }

    /// Apply a run's outcomes, returning the entries that changed.
    pub fn update_at(
        &self,
        update: &ProgressUpdate,
        now: DateTime<Utc>,
    ) -> Result<Vec<BackpackItem>, StoreError> {
        let mut groups: BTreeMap<&str, Vec<&BlockOutcome>> = BTreeMap::new();
        for outcome in &update.outcomes {
            if outcome.is_completed() && outcome.kind != ExerciseKind::Advisory {
                groups.entry(outcome.backpack_key.as_str()).or_default().push(outcome);
            }
        }

        let mut changed = Vec::with_capacity(groups.len());
        for (key, outcomes) in groups {
            let mut item = self
                .repo
                .get(&update.student_id, key)?
                .unwrap_or_else(|| BackpackItem::new(&update.student_id, key, now));
            let practised_at = outcomes
                .iter()
                .map(|o| o.started_at)
                .max()
                .unwrap_or(update.practised_at);
            apply(&mut item, &outcomes, practised_at, now);
            self.repo.save(&item)?;
            tracing::debug!(
                student = %item.student_id,
                key = %item.backpack_key,
                score = item.mastery_score,
                status = item.status.as_str(),
                "backpack updated"
            );
            changed.push(item);
        }
        Ok(changed)
    }
}

/// Points earned by one block and whether it showed mastery.
fn score(outcome: &BlockOutcome) -> (u32, bool) {
    let mut points = COMPLETION_POINTS;
    let candidate = match (outcome.target_bpm, outcome.measured_bpm) {
        (Some(target), Some(measured)) if target > 0 => {
            if measured >= target {
                points += TEMPO_REACHED_POINTS;
                true
            } else {
                if u64::from(measured) * 10 >= u64::from(target) * 9 {
                    points += TEMPO_CLOSE_POINTS;
                }
                false
            }
        }
        (Some(_), _) => false,
        (None, _) => outcome.target_secs > 0 && outcome.elapsed_secs * 10 >= outcome.target_secs * 8,
    };
    (points, candidate)
}

fn apply(item: &mut BackpackItem, outcomes: &[&BlockOutcome], practised_at: DateTime<Utc>, now: DateTime<Utc>) {
    let mut candidate = false;
    for outcome in outcomes {
        let (points, shown) = score(outcome);
        item.mastery_score = item.mastery_score.saturating_add(points);
        candidate |= shown;
    }

    let day = practised_at.date_naive();
    if candidate {
        if let Some(previous) = item.last_practised_at.map(|p| p.date_naive()) {
            let week = monday_of(day);
            if monday_of(previous) == week && day > previous {
                if !item.mastered_weeks.contains(&week) {
                    item.mastered_weeks.push(week);
                }
                item.last_mastered_week_start = Some(week);
            }
        }
    }

    let cutoff = now.date_naive() - Duration::days(MASTERY_WINDOW_DAYS);
    item.mastered_weeks.retain(|w| *w >= cutoff);
    item.mastered_weeks.sort();
    item.mastered_weeks.dedup();

    item.status = if item.mastered_weeks.len() >= MASTERED_WEEKS_REQUIRED {
        BackpackStatus::Mastered
    } else {
        BackpackStatus::InProgress
    };
    item.last_practised_at = Some(match item.last_practised_at {
        Some(previous) if previous > practised_at => previous,
        _ => practised_at,
    });
    item.updated_at = now;
}

#[async_trait]
impl<R: BackpackRepository> ProgressTracker for BackpackTracker<R> {
    async fn update_progress(&self, update: &ProgressUpdate) -> Result<(), StoreError> {
        self.update_at(update, Utc::now()).map(|_| ())
    }
}
