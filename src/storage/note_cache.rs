use crate::error::ProviderError;
use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use tracing::debug;

/// Memoizes note lookups per citizen id. A stored note never changes, so the
/// first non-null answer is kept for the life of the cache.
#[derive(Debug, Default)]
pub struct NoteCache {
    notes: RefCell<HashMap<i64, String>>,
}

impl NoteCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cached(&self, id: i64) -> Option<String> {
        self.notes.borrow().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.notes.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.borrow().is_empty()
    }

    /// Returns the cached note or runs `fetch`. `None` and errors pass through
    /// uncached so a later call retries.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        id: i64,
        fetch: F,
    ) -> Result<Option<String>, ProviderError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<String>, ProviderError>>,
    {
        if let Some(note) = self.cached(id) {
            debug!("note_cache_hit id={id}");
            return Ok(Some(note));
        }
        let fetched = fetch().await?;
        if let Some(note) = fetched.as_ref() {
            self.notes.borrow_mut().insert(id, note.clone());
        }
        Ok(fetched)
    }
}
