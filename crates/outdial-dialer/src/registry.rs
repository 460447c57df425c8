//! Dialing registry: every in-flight dial attempt, indexed two ways.
//!
//! ```text
//! by_id:    session id ──► Arc<DialingSession>
//! by_entry: entry id   ──► session id
//! ```
//!
//! ## Rules
//! - Session ids are unique; a second insert with the same id is rejected.
//! - At most one session per dial-list entry. Select-and-mark guarantees this
//!   upstream; the registry refuses to paper over a violation.
//! - Callers only ever see `Arc<DialingSession>` (read-only). Live-state
//!   updates are copy-on-write, so a snapshot taken earlier keeps the values it
//!   captured.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use outdial_core::error::{OutdialError, Result};

use crate::session::{DialingSession, LiveCallState, SessionSummary};

#[derive(Default)]
struct Indices {
    by_id: HashMap<String, Arc<DialingSession>>,
    by_entry: HashMap<String, String>,
}

/// Concurrent collection of active dialing sessions.
#[derive(Default)]
pub struct DialingRegistry {
    inner: RwLock<Indices>,
}

impl DialingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // Writers never leave the indices half-updated, so a poisoned lock still
    // guards consistent data.
    fn read(&self) -> RwLockReadGuard<'_, Indices> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Indices> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new session. The registry is unchanged on failure.
    pub fn insert(&self, session: DialingSession) -> Result<()> {
        let mut idx = self.write();
        if idx.by_id.contains_key(session.id()) {
            tracing::warn!("⚠️ Dialing session already registered: {}", session.id());
            return Err(OutdialError::Duplicate(format!("dialing session {}", session.id())));
        }
        if let Some(existing) = idx.by_entry.get(session.entry_id()) {
            tracing::warn!(
                "⚠️ Entry {} already served by session {existing}; refusing {}",
                session.entry_id(),
                session.id()
            );
            return Err(OutdialError::Duplicate(format!(
                "dial-list entry {} already has session {existing}",
                session.entry_id()
            )));
        }

        tracing::debug!(
            "📞 Registered dialing: {} (campaign {}, entry {})",
            session.id(),
            session.campaign_id(),
            session.entry_id()
        );
        idx.by_entry
            .insert(session.entry_id().to_string(), session.id().to_string());
        idx.by_id.insert(session.id().to_string(), Arc::new(session));
        Ok(())
    }

    /// Unregister a session and return it.
    pub fn remove(&self, session_id: &str) -> Result<Arc<DialingSession>> {
        let mut idx = self.write();
        let session = idx
            .by_id
            .remove(session_id)
            .ok_or_else(|| OutdialError::NotFound(format!("dialing session {session_id}")))?;
        idx.by_entry.remove(session.entry_id());
        tracing::debug!("📴 Removed dialing: {session_id}");
        Ok(session)
    }

    pub fn find_by_id(&self, session_id: &str) -> Option<Arc<DialingSession>> {
        self.read().by_id.get(session_id).cloned()
    }

    pub fn find_by_entry_id(&self, entry_id: &str) -> Option<Arc<DialingSession>> {
        let idx = self.read();
        idx.by_entry
            .get(entry_id)
            .and_then(|sid| idx.by_id.get(sid))
            .cloned()
    }

    /// Apply `f` to the live-call state of a session.
    pub fn update_live<F>(&self, session_id: &str, f: F) -> Result<()>
    where
        F: FnOnce(&mut LiveCallState),
    {
        let mut idx = self.write();
        let session = idx
            .by_id
            .get_mut(session_id)
            .ok_or_else(|| OutdialError::NotFound(format!("dialing session {session_id}")))?;
        f(Arc::make_mut(session).live_mut());
        Ok(())
    }

    /// Sessions registered at call time.
    ///
    /// The lock is held only while capturing handles; sessions inserted
    /// afterwards are not seen.
    pub fn snapshot(&self) -> Sessions {
        let captured: Vec<_> = self.read().by_id.values().cloned().collect();
        Sessions {
            inner: captured.into_iter(),
        }
    }

    /// Does any live session belong to `campaign_id`?
    pub fn references_campaign(&self, campaign_id: &str) -> bool {
        self.snapshot().any(|s| s.campaign_id() == campaign_id)
    }

    pub fn for_campaign(&self, campaign_id: &str) -> Vec<Arc<DialingSession>> {
        self.snapshot().filter(|s| s.campaign_id() == campaign_id).collect()
    }

    /// Reporting rows, sorted by session id.
    pub fn summaries(&self) -> Vec<SessionSummary> {
        let mut rows: Vec<_> = self.snapshot().map(|s| s.summary()).collect();
        rows.sort_by(|a, b| a.uuid.cmp(&b.uuid));
        rows
    }

    pub fn len(&self) -> usize {
        self.read().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().by_id.is_empty()
    }

    /// Drop every session (shutdown). Returns what was registered.
    pub fn drain(&self) -> Vec<Arc<DialingSession>> {
        let mut idx = self.write();
        idx.by_entry.clear();
        let drained: Vec<_> = idx.by_id.drain().map(|(_, s)| s).collect();
        if !drained.is_empty() {
            tracing::info!("🧹 Drained {} dialing sessions", drained.len());
        }
        drained
    }
}

/// Finite, single-pass iterator over a registry snapshot.
pub struct Sessions {
    inner: std::vec::IntoIter<Arc<DialingSession>>,
}

impl Iterator for Sessions {
    type Item = Arc<DialingSession>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for Sessions {}
