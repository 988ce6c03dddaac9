//! Assignments: a plan of weeks handed to one student.
//!
//! The run engine only needs to find the session to practise; everything
//! else about assignments lives with the authoring tools.

use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use super::session::SessionDefinition;
use crate::error::StructuralError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    Draft,
    Published,
    InProgress,
    Archived,
}

impl AssignmentStatus {
    /// Whether students may practise this assignment.
    pub fn is_active(&self) -> bool {
        matches!(self, AssignmentStatus::Published | AssignmentStatus::InProgress)
    }

    fn as_str(&self) -> &'static str {
        match self {
            AssignmentStatus::Draft => "draft",
            AssignmentStatus::Published => "published",
            AssignmentStatus::InProgress => "in_progress",
            AssignmentStatus::Archived => "archived",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Week {
    pub name: String,
    #[serde(default)]
    pub sessions: Vec<SessionDefinition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub name: String,
    #[serde(default)]
    pub weeks: Vec<Week>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub id: String,
    pub student_id: String,
    #[serde(default)]
    pub teacher_id: Option<String>,
    #[serde(default)]
    pub piece_name: String,
    pub plan: Plan,
    /// Monday of the plan's first week.
    pub week_start: NaiveDate,
    pub status: AssignmentStatus,
}

/// A session located inside an assignment.
#[derive(Debug, Clone, Copy)]
pub struct SessionRef<'a> {
    pub week_index: usize,
    pub session_index: usize,
    pub week: &'a Week,
    pub session: &'a SessionDefinition,
}

impl Assignment {
    /// Check that the assignment can host runs at all.
    pub fn validate(&self) -> Result<(), StructuralError> {
        if self.plan.weeks.is_empty() {
            return Err(StructuralError::EmptyPlan {
                assignment_id: self.id.clone(),
            });
        }
        if self.week_start.weekday().num_days_from_monday() != 0 {
            return Err(StructuralError::WeekStartNotMonday(self.week_start));
        }
        if !self.status.is_active() {
            return Err(StructuralError::AssignmentNotActive {
                assignment_id: self.id.clone(),
                status: self.status.as_str().to_string(),
            });
        }
        for week in &self.plan.weeks {
            for session in &week.sessions {
                session.check_unique_codes()?;
            }
        }
        Ok(())
    }

    /// Whole weeks between the plan start and the week containing `today`.
    pub fn week_offset(&self, today: NaiveDate) -> i64 {
        let days = (monday_of(today) - monday_of(self.week_start)).num_days();
        days.div_euclid(7)
    }

    /// Find the session to practise on `today`.
    pub fn locate_session(
        &self,
        today: NaiveDate,
        session_index: usize,
    ) -> Result<SessionRef<'_>, StructuralError> {
        self.validate()?;
        let offset = self.week_offset(today);
        if offset < 0 || offset as usize >= self.plan.weeks.len() {
            return Err(StructuralError::WeekOutOfRange {
                offset,
                weeks: self.plan.weeks.len(),
            });
        }
        self.session_at(offset as usize, session_index)
    }

    /// Address a session directly by week and session index.
    pub fn session_at(
        &self,
        week_index: usize,
        session_index: usize,
    ) -> Result<SessionRef<'_>, StructuralError> {
        self.validate()?;
        let week = self
            .plan
            .weeks
            .get(week_index)
            .ok_or(StructuralError::WeekOutOfRange {
                offset: week_index as i64,
                weeks: self.plan.weeks.len(),
            })?;
        let session = week
            .sessions
            .get(session_index)
            .ok_or_else(|| StructuralError::SessionNotFound {
                week: week.name.clone(),
                index: session_index,
                len: week.sessions.len(),
            })?;
        session.validate()?;
        Ok(SessionRef {
            week_index,
            session_index,
            week,
            session,
        })
    }
}

/// Monday of the ISO week containing `date`.
pub fn monday_of(date: NaiveDate) -> NaiveDate {
    date - Duration::days(date.weekday().num_days_from_monday() as i64)
}
