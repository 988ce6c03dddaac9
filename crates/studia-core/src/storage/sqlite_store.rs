//! `OutcomeStore` and `BackpackRepository` over the SQLite database.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use uuid::Uuid;

use super::Database;
use crate::error::{DatabaseError, StoreError};
use crate::outcome::{BlockOutcome, OutcomeId, SessionOutcome};
use crate::persist::OutcomeStore;
use crate::progress::{BackpackItem, BackpackRepository};

/// SQLite-backed store. The connection is shared behind a mutex, so
/// concurrent block writes are serialized.
pub struct SqliteStore {
    db: Mutex<Database>,
}

impl SqliteStore {
    pub fn new(db: Database) -> Self {
        Self { db: Mutex::new(db) }
    }

    /// Open `<data_dir>/studia.db`.
    pub fn open() -> crate::error::Result<Self> {
        Ok(Self::new(Database::open()?))
    }

    pub fn open_at(path: &Path) -> Result<Self, DatabaseError> {
        Ok(Self::new(Database::open_at(path)?))
    }

    pub fn open_memory() -> Result<Self, DatabaseError> {
        Ok(Self::new(Database::open_memory()?))
    }

    /// Direct access for queries the store traits don't cover.
    pub fn database(&self) -> Result<MutexGuard<'_, Database>, StoreError> {
        self.db
            .lock()
            .map_err(|_| StoreError::Unavailable("database lock poisoned".into()))
    }
}

#[async_trait]
impl OutcomeStore for SqliteStore {
    async fn create_session_outcome(
        &self,
        outcome: &SessionOutcome,
    ) -> Result<OutcomeId, StoreError> {
        let id = OutcomeId(Uuid::new_v4().to_string());
        self.database()?.insert_session_outcome(&id, outcome)?;
        Ok(id)
    }

    async fn create_block_outcome(
        &self,
        session_id: &OutcomeId,
        outcome: &BlockOutcome,
    ) -> Result<(), StoreError> {
        let db = self.database()?;
        if !db.session_outcome_exists(session_id)? {
            return Err(StoreError::UnknownSession(session_id.to_string()));
        }
        db.upsert_block_outcome(session_id, outcome)?;
        Ok(())
    }
}

impl BackpackRepository for SqliteStore {
    fn get(&self, student_id: &str, backpack_key: &str) -> Result<Option<BackpackItem>, StoreError> {
        Ok(self.database()?.backpack_item(student_id, backpack_key)?)
    }

    fn save(&self, item: &BackpackItem) -> Result<(), StoreError> {
        Ok(self.database()?.upsert_backpack_item(item)?)
    }

    fn list(&self, student_id: &str) -> Result<Vec<BackpackItem>, StoreError> {
        Ok(self.database()?.backpack_for(student_id)?)
    }
}
