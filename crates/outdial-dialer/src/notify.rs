//! Event sinks: where campaign and dial-list change events go.
//! Lightweight: no broker. Log them, or keep the most recent few in memory.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;

use outdial_core::error::{OutdialError, Result};
use outdial_core::record::Record;
use outdial_core::traits::{EventKind, EventSink};

/// A published event.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub kind: EventKind,
    pub record: Record,
    pub timestamp: DateTime<Utc>,
}

/// Writes each event to the tracing log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn notify(&self, kind: EventKind, record: &Record) -> Result<()> {
        let id = record.get("uuid").and_then(|v| v.as_str()).unwrap_or("-");
        tracing::info!("📣 [{kind}] {id}");
        Ok(())
    }
}

/// In-memory ring buffer of the last `capacity` events.
pub struct EventHistory {
    capacity: usize,
    events: Mutex<VecDeque<Event>>,
}

impl EventHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            events: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Oldest first.
    pub fn events(&self) -> Vec<Event> {
        match self.events.lock() {
            Ok(events) => events.iter().cloned().collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        self.events().into_iter().map(|e| e.kind).collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EventSink for EventHistory {
    fn notify(&self, kind: EventKind, record: &Record) -> Result<()> {
        if self.capacity == 0 {
            return Ok(());
        }
        let mut events = self
            .events
            .lock()
            .map_err(|e| OutdialError::Persistence(format!("Lock: {e}")))?;
        events.push_back(Event {
            kind,
            record: record.clone(),
            timestamp: Utc::now(),
        });
        while events.len() > self.capacity {
            events.pop_front();
        }
        Ok(())
    }
}

/// Fan an event out to several sinks; the first failure is returned after
/// every sink has been tried.
pub struct MultiSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl MultiSink {
    pub fn new(sinks: Vec<Arc<dyn EventSink>>) -> Self {
        Self { sinks }
    }
}

impl EventSink for MultiSink {
    fn notify(&self, kind: EventKind, record: &Record) -> Result<()> {
        let mut first_err = None;
        for sink in &self.sinks {
            if let Err(e) = sink.notify(kind, record) {
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
