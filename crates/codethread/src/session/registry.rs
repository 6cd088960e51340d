//! In-memory session registry.
//!
//! Single source of truth for "does a session exist for this thread" and
//! "is it active". Records live inside one reader/writer-locked map; reads
//! of mutable in-memory fields take at least the read lock, mutations the
//! write lock. Disk writes always happen after the lock is released — the
//! lock is not reentrant and `save` is called from inside mutation flows.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use log::{debug, error, info};
use tokio::sync::RwLock;

use crate::agent::AgentClient;

use super::models::{ModelRef, SessionRecord};
use super::store::SessionStore;

/// Registry of session records keyed by thread id.
pub struct SessionRegistry {
    store: SessionStore,
    agent: Arc<AgentClient>,
    sessions: RwLock<HashMap<String, SessionRecord>>,
}

impl SessionRegistry {
    pub fn new(store: SessionStore, agent: Arc<AgentClient>) -> Self {
        Self {
            store,
            agent,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Return the session for `thread_id`, creating one if none exists.
    ///
    /// Idempotent: a cached or persisted record is marked active and
    /// returned unchanged — a second remote session is never created for a
    /// thread. A brand-new record is persisted before returning; persistence
    /// failure is logged and non-fatal (the session works, it just would not
    /// survive a crash).
    pub async fn get_or_create(
        &self,
        thread_id: &str,
        worktree_path: &Path,
        repository_path: &str,
        repository_name: &str,
        model: ModelRef,
        user_id: &str,
    ) -> Result<SessionRecord> {
        if let Some(existing) = self.lazy_load(thread_id).await {
            info!("using existing session, thread_id={thread_id}");
            self.set_active(thread_id, true).await;
            let mut existing = existing;
            existing.active = true;
            return Ok(existing);
        }

        let worktree_path = std::path::absolute(worktree_path)
            .with_context(|| format!("resolving worktree path for thread {thread_id}"))?;

        let session = self
            .agent
            .create_session(&worktree_path)
            .await
            .with_context(|| format!("creating agent session for thread {thread_id}"))?;

        let mut record = SessionRecord::new(
            thread_id,
            &session.id,
            model,
            worktree_path.to_string_lossy().into_owned(),
            repository_path,
            repository_name,
            user_id,
        );
        record.active = true;

        {
            let mut sessions = self.sessions.write().await;
            sessions.insert(thread_id.to_string(), record.clone());
        }

        if let Err(err) = self.store.save(&record) {
            error!("failed to save session data, thread_id={thread_id}, error={err}");
        }

        info!(
            "created new session, thread_id={thread_id}, session_id={}",
            session.id
        );
        Ok(record)
    }

    /// Return the cached record, or load it from disk on first touch.
    ///
    /// A loaded record synthesizes its live handle purely from the stored
    /// session id — the agent server is not asked whether the id still
    /// exists. Missing file and unparsable file are both treated as absence.
    pub async fn lazy_load(&self, thread_id: &str) -> Option<SessionRecord> {
        {
            let sessions = self.sessions.read().await;
            if let Some(record) = sessions.get(thread_id) {
                return Some(record.clone());
            }
        }

        let mut sessions = self.sessions.write().await;
        // another task may have loaded it while we waited for the write lock
        if let Some(record) = sessions.get(thread_id) {
            return Some(record.clone());
        }

        let record = match self.store.load(thread_id) {
            Ok(Some(record)) => record,
            Ok(None) => return None,
            Err(err) => {
                error!("failed to read session file, thread_id={thread_id}, error={err}");
                return None;
            }
        };

        info!(
            "lazy loaded session, thread_id={thread_id}, session_id={}",
            record.session_id
        );
        sessions.insert(thread_id.to_string(), record.clone());
        Some(record)
    }

    /// Flip the liveness flag of a cached record. Returns false when no
    /// record is cached for the thread.
    pub async fn set_active(&self, thread_id: &str, active: bool) -> bool {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(thread_id) {
            Some(record) => {
                record.active = active;
                true
            }
            None => false,
        }
    }

    /// Flip liveness by remote session id. Linear scan; the number of
    /// concurrently cached sessions is small.
    pub async fn set_active_by_session(&self, session_id: &str, active: bool) -> Option<String> {
        let mut sessions = self.sessions.write().await;
        for record in sessions.values_mut() {
            if record.session_id == session_id {
                record.active = active;
                return Some(record.thread_id.clone());
            }
        }
        None
    }

    pub async fn is_active(&self, thread_id: &str) -> bool {
        let sessions = self.sessions.read().await;
        sessions.get(thread_id).is_some_and(|record| record.active)
    }

    /// Read from a cached record under the read lock.
    pub async fn read<R>(
        &self,
        thread_id: &str,
        f: impl FnOnce(&SessionRecord) -> R,
    ) -> Option<R> {
        let sessions = self.sessions.read().await;
        sessions.get(thread_id).map(f)
    }

    /// Mutate a cached record under the write lock. The closure must not
    /// call back into the registry.
    pub async fn update<R>(
        &self,
        thread_id: &str,
        f: impl FnOnce(&mut SessionRecord) -> R,
    ) -> Option<R> {
        let mut sessions = self.sessions.write().await;
        sessions.get_mut(thread_id).map(f)
    }

    /// Persist a record. Snapshots under the read lock, writes after
    /// releasing it. Errors propagate; the caller decides fatality.
    pub async fn save(&self, thread_id: &str) -> Result<()> {
        let snapshot = {
            let sessions = self.sessions.read().await;
            sessions.get(thread_id).cloned()
        };
        let record =
            snapshot.with_context(|| format!("no cached session for thread {thread_id}"))?;
        self.store
            .save(&record)
            .with_context(|| format!("persisting session for thread {thread_id}"))?;
        Ok(())
    }

    /// Evict the cache entry and delete the persisted file. The caller is
    /// responsible for stopping the thread's listener first.
    pub async fn cleanup(&self, thread_id: &str) -> Result<()> {
        {
            let mut sessions = self.sessions.write().await;
            if sessions.remove(thread_id).is_none() {
                debug!("cleanup for uncached thread, thread_id={thread_id}");
            }
        }
        self.store
            .delete(thread_id)
            .with_context(|| format!("deleting session file for thread {thread_id}"))?;
        info!("cleaned up session, thread_id={thread_id}");
        Ok(())
    }

    /// Thread ids currently cached. Used by the shutdown path and tests.
    pub async fn thread_ids(&self) -> Vec<String> {
        let sessions = self.sessions.read().await;
        sessions.keys().cloned().collect()
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}
