//! Ownership root for terminal emulator instances.
//!
//! Surfaces come and go independently of the terminals they show. Every
//! consumer calls `acquire` once and `release` once; the instance is disposed
//! in the same call that drops the last reference, so a later `acquire` can
//! never observe a disposed instance.

use crate::models::TerminalId;
use crate::terminal::{Surface, TerminalEmulator};
use std::collections::hash_map::Entry;
use std::collections::HashMap;

/// Scroll position saved on detach, consumed by the next attach.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScrollSnapshot {
    pub distance_from_bottom: usize,
}

struct InstanceRecord<E> {
    instance: E,
    ref_count: usize,
    attached: bool,
    surface: Option<Surface>,
    last_sequence: Option<u64>,
    scroll_snapshot: Option<ScrollSnapshot>,
}

pub struct Acquired<'a, E> {
    pub instance: &'a mut E,
    pub is_new: bool,
}

pub struct InstanceRegistry<E> {
    records: HashMap<TerminalId, InstanceRecord<E>>,
}

impl<E: TerminalEmulator> InstanceRegistry<E> {
    pub fn new() -> Self {
        Self {
            records: HashMap::new(),
        }
    }

    /// Reuse the instance for `id` or create it with `factory`.
    ///
    /// `factory` runs only when no record exists.
    pub fn acquire<F>(&mut self, id: &TerminalId, factory: F) -> Acquired<'_, E>
    where
        F: FnOnce() -> E,
    {
        match self.records.entry(id.clone()) {
            Entry::Occupied(entry) => {
                let record = entry.into_mut();
                record.ref_count += 1;
                record.attached = true;
                tracing::debug!(terminal = %id, refs = record.ref_count, "Reused terminal instance");
                Acquired {
                    instance: &mut record.instance,
                    is_new: false,
                }
            }
            Entry::Vacant(entry) => {
                tracing::debug!(terminal = %id, "Created terminal instance");
                let record = entry.insert(InstanceRecord {
                    instance: factory(),
                    ref_count: 1,
                    attached: false,
                    surface: None,
                    last_sequence: None,
                    scroll_snapshot: None,
                });
                Acquired {
                    instance: &mut record.instance,
                    is_new: true,
                }
            }
        }
    }

    /// Drop one reference; disposes and removes the record at zero.
    ///
    /// Returns true when the instance was disposed.
    pub fn release(&mut self, id: &TerminalId) -> bool {
        let Some(record) = self.records.get_mut(id) else {
            tracing::warn!(terminal = %id, "Release of unknown terminal ignored");
            return false;
        };

        record.ref_count = record.ref_count.saturating_sub(1);
        if record.ref_count > 0 {
            tracing::debug!(terminal = %id, refs = record.ref_count, "Released terminal reference");
            return false;
        }

        if let Some(mut record) = self.records.remove(id) {
            Self::dispose_record(id, &mut record);
        }
        true
    }

    /// Mount the instance on `surface`, restoring a saved scroll position once.
    pub fn attach(&mut self, id: &TerminalId, surface: Surface) -> bool {
        let Some(record) = self.records.get_mut(id) else {
            tracing::debug!(terminal = %id, "Attach of unknown terminal ignored");
            return false;
        };

        record.instance.attach(&surface);
        record.surface = Some(surface);
        record.attached = true;

        if let Some(snapshot) = record.scroll_snapshot.take() {
            let base_y = record.instance.buffer().base_y;
            let line = base_y.saturating_sub(snapshot.distance_from_bottom);
            record.instance.scroll_to_line(line);
            tracing::debug!(terminal = %id, line, "Restored scroll position");
        }
        true
    }

    /// Unmount the instance, saving its scroll position unless it is in
    /// full-screen mode.
    pub fn detach(&mut self, id: &TerminalId) -> bool {
        let Some(record) = self.records.get_mut(id) else {
            tracing::debug!(terminal = %id, "Detach of unknown terminal ignored");
            return false;
        };
        if !record.attached {
            return false;
        }

        let buffer = record.instance.buffer();
        record.scroll_snapshot = if buffer.alternate_screen {
            None
        } else {
            Some(ScrollSnapshot {
                distance_from_bottom: buffer.distance_from_bottom(),
            })
        };
        record.instance.detach();
        record.surface = None;
        record.attached = false;
        true
    }

    pub fn has(&self, id: &TerminalId) -> bool {
        self.records.contains_key(id)
    }

    pub fn get(&self, id: &TerminalId) -> Option<&E> {
        self.records.get(id).map(|record| &record.instance)
    }

    pub fn get_mut(&mut self, id: &TerminalId) -> Option<&mut E> {
        self.records.get_mut(id).map(|record| &mut record.instance)
    }

    pub fn ref_count(&self, id: &TerminalId) -> usize {
        self.records.get(id).map(|record| record.ref_count).unwrap_or(0)
    }

    pub fn is_attached(&self, id: &TerminalId) -> bool {
        self.records.get(id).map(|record| record.attached).unwrap_or(false)
    }

    pub fn surface(&self, id: &TerminalId) -> Option<Surface> {
        self.records.get(id).and_then(|record| record.surface)
    }

    pub fn scroll_snapshot(&self, id: &TerminalId) -> Option<ScrollSnapshot> {
        self.records.get(id).and_then(|record| record.scroll_snapshot)
    }

    pub fn last_sequence(&self, id: &TerminalId) -> Option<u64> {
        self.records.get(id).and_then(|record| record.last_sequence)
    }

    /// Feed backend output into the instance for `id`.
    ///
    /// Chunks whose sequence number is not newer than the last one written are
    /// replays and get dropped. Returns true when the data was written.
    pub fn write_output(&mut self, id: &TerminalId, sequence: Option<u64>, data: &[u8]) -> bool {
        let Some(record) = self.records.get_mut(id) else {
            return false;
        };

        if let (Some(seq), Some(last)) = (sequence, record.last_sequence) {
            if seq <= last {
                tracing::debug!(terminal = %id, seq, last, "Dropped replayed output");
                return false;
            }
        }
        if sequence.is_some() {
            record.last_sequence = sequence;
        }
        record.instance.write(data);
        true
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Dispose every instance regardless of reference counts.
    pub fn reset(&mut self) {
        for (id, mut record) in self.records.drain() {
            Self::dispose_record(&id, &mut record);
        }
    }

    fn dispose_record(id: &TerminalId, record: &mut InstanceRecord<E>) {
        if record.attached {
            record.instance.detach();
        }
        match record.instance.dispose() {
            Ok(()) => tracing::debug!(terminal = %id, "Disposed terminal instance"),
            Err(e) => tracing::warn!(terminal = %id, "Failed to dispose terminal instance: {:#}", e),
        }
    }
}

impl<E: TerminalEmulator> Default for InstanceRegistry<E> {
    fn default() -> Self {
        Self::new()
    }
}
