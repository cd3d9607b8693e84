use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use liaison_store::Database;

/// A [`Database`] shared between the registry, the message index and the
/// relay bot.
///
/// The guard returned by [`lock`](Self::lock) must never be held across an
/// `.await`.
#[derive(Clone)]
pub struct SharedDatabase(Arc<Mutex<Database>>);

impl SharedDatabase {
    pub fn new(db: Database) -> Self {
        Self(Arc::new(Mutex::new(db)))
    }

    pub fn lock(&self) -> MutexGuard<'_, Database> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
