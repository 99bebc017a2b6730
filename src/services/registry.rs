//! Process-wide registries shared by all sessions.
//!
//! Both registries are plain values behind a mutex and are injected through
//! [`Services`](super::Services); nothing here is a global.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;

/// Conversation sessions with an in-flight TTS rendition.
#[derive(Debug, Default)]
pub struct TtsRegistry {
    active: Mutex<HashMap<String, String>>,
}

impl TtsRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `session_id` as speaking for `user_id`.
    pub fn register(&self, session_id: &str, user_id: &str) {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(session_id.to_owned(), user_id.to_owned());
        debug!(session_id, user_id, "tts session registered");
    }

    /// Whether `session_id` has an in-flight rendition.
    #[must_use]
    pub fn is_active(&self, session_id: &str) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(session_id)
    }

    /// Remove `session_id`; returns the owning user if it was active.
    pub fn remove(&self, session_id: &str) -> Option<String> {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(session_id)
    }

    /// Number of active renditions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no rendition is active.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Kind of marker-triggered background job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    /// Chart rendering.
    Chart,
    /// Deep research.
    Research,
}

type JobCounts = HashMap<(String, JobKind), usize>;

/// Per-user cap on concurrent background jobs of each kind.
#[derive(Debug)]
pub struct JobLimiter {
    max_per_user: usize,
    running: Arc<Mutex<JobCounts>>,
}

impl JobLimiter {
    /// Create a limiter allowing `max_per_user` jobs of each kind per user.
    #[must_use]
    pub fn new(max_per_user: usize) -> Self {
        Self {
            max_per_user,
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Reserve a slot; `None` when the user is already at the cap.
    ///
    /// The slot is released when the returned permit is dropped.
    #[must_use]
    pub fn try_acquire(&self, user_id: &str, kind: JobKind) -> Option<JobPermit> {
        let key = (user_id.to_owned(), kind);
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        let count = running.entry(key.clone()).or_insert(0);
        if *count >= self.max_per_user {
            return None;
        }
        *count += 1;
        Some(JobPermit {
            key,
            running: Arc::clone(&self.running),
        })
    }

    /// Jobs of `kind` currently running for `user_id`.
    #[must_use]
    pub fn running(&self, user_id: &str, kind: JobKind) -> usize {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(user_id.to_owned(), kind))
            .copied()
            .unwrap_or(0)
    }
}

/// RAII reservation returned by [`JobLimiter::try_acquire`].
#[derive(Debug)]
pub struct JobPermit {
    key: (String, JobKind),
    running: Arc<Mutex<JobCounts>>,
}

impl Drop for JobPermit {
    fn drop(&mut self) {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(count) = running.get_mut(&self.key) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                running.remove(&self.key);
            }
        }
    }
}
