//! File-backed message store — the source of truth for scheduled work.
//! The full record set is rewritten to one JSON snapshot on every mutation,
//! trading write throughput for crash-safety at scheduling-rate volume.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use courier_core::error::{CourierError, Result};
use courier_core::types::{MessageStatus, ScheduledMessage};

/// Durable keyed store of scheduled messages.
///
/// Mutations apply in memory first, then flush the snapshot; a failed flush
/// restores the previous in-memory state so memory and disk never diverge.
pub struct MessageStore {
    path: PathBuf,
    records: Mutex<HashMap<String, ScheduledMessage>>,
}

impl MessageStore {
    /// Open the store, loading any existing snapshot.
    /// A corrupt or unreadable snapshot is logged and treated as empty —
    /// never a fatal startup error.
    pub fn open(path: &Path) -> Self {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let records = Self::load(path);
        if !records.is_empty() {
            tracing::info!(
                "💾 Loaded {} scheduled message(s) from {}",
                records.len(),
                path.display()
            );
        }
        Self {
            path: path.to_path_buf(),
            records: Mutex::new(records),
        }
    }

    fn load(path: &Path) -> HashMap<String, ScheduledMessage> {
        if !path.exists() {
            return HashMap::new();
        }
        match std::fs::read_to_string(path) {
            Ok(json) => match serde_json::from_str::<Vec<ScheduledMessage>>(&json) {
                Ok(messages) => messages.into_iter().map(|m| (m.id.clone(), m)).collect(),
                Err(e) => {
                    tracing::warn!(
                        "⚠️ Failed to parse {}: {e} — starting with an empty store",
                        path.display()
                    );
                    HashMap::new()
                }
            },
            Err(e) => {
                tracing::warn!(
                    "⚠️ Failed to read {}: {e} — starting with an empty store",
                    path.display()
                );
                HashMap::new()
            }
        }
    }

    /// Rewrite the full snapshot. Called with the record lock held.
    fn flush(&self, records: &HashMap<String, ScheduledMessage>) -> Result<()> {
        let mut messages: Vec<&ScheduledMessage> = records.values().collect();
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        let json = serde_json::to_string_pretty(&messages)?;
        std::fs::write(&self.path, json)
            .map_err(|e| CourierError::Storage(format!("write {}: {e}", self.path.display())))
    }

    /// Persist a new (or replaced) record.
    pub fn save(&self, message: ScheduledMessage) -> Result<()> {
        let mut records = self.records.lock().unwrap();
        let previous = records.insert(message.id.clone(), message.clone());
        if let Err(e) = self.flush(&records) {
            match previous {
                Some(p) => records.insert(message.id.clone(), p),
                None => records.remove(&message.id),
            };
            return Err(e);
        }
        Ok(())
    }

    pub fn find(&self, id: &str) -> Option<ScheduledMessage> {
        self.records.lock().unwrap().get(id).cloned()
    }

    /// All records, oldest first.
    pub fn all(&self) -> Vec<ScheduledMessage> {
        let records = self.records.lock().unwrap();
        let mut messages: Vec<ScheduledMessage> = records.values().cloned().collect();
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        messages
    }

    /// Records still awaiting delivery.
    pub fn pending(&self) -> Vec<ScheduledMessage> {
        let records = self.records.lock().unwrap();
        records
            .values()
            .filter(|m| m.status == MessageStatus::Pending)
            .cloned()
            .collect()
    }

    /// Apply `apply` to the record and persist. `updated_at` is bumped.
    /// Returns false if the id is unknown.
    pub fn update<F>(&self, id: &str, apply: F) -> Result<bool>
    where
        F: FnOnce(&mut ScheduledMessage),
    {
        let mut records = self.records.lock().unwrap();
        let Some(existing) = records.get(id).cloned() else {
            return Ok(false);
        };
        let mut updated = existing.clone();
        apply(&mut updated);
        updated.updated_at = Utc::now();
        records.insert(id.to_string(), updated);
        if let Err(e) = self.flush(&records) {
            records.insert(id.to_string(), existing);
            return Err(e);
        }
        Ok(true)
    }

    /// Atomic `pending → status` transition; the per-id critical section.
    ///
    /// Returns true only for the single caller that wins the transition.
    /// Unknown ids and records already in a terminal state return false.
    pub fn mark_if_pending(
        &self,
        id: &str,
        status: MessageStatus,
        last_error: Option<String>,
    ) -> Result<bool> {
        let mut records = self.records.lock().unwrap();
        let Some(existing) = records.get(id).cloned() else {
            return Ok(false);
        };
        if existing.status != MessageStatus::Pending {
            return Ok(false);
        }
        let mut updated = existing.clone();
        updated.status = status;
        updated.last_error = last_error;
        updated.updated_at = Utc::now();
        records.insert(id.to_string(), updated);
        if let Err(e) = self.flush(&records) {
            records.insert(id.to_string(), existing);
            return Err(e);
        }
        Ok(true)
    }

    /// Remove a record. Returns false if the id is unknown.
    pub fn delete(&self, id: &str) -> Result<bool> {
        let mut records = self.records.lock().unwrap();
        let Some(removed) = records.remove(id) else {
            return Ok(false);
        };
        if let Err(e) = self.flush(&records) {
            records.insert(id.to_string(), removed);
            return Err(e);
        }
        Ok(true)
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().unwrap().is_empty()
    }
}
