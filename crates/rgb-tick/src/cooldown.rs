//! Cooldown list for interval units.
//!
//! Entries are sorted by wake time and store their cooldown relative to the
//! previous entry, so advancing time only touches the head.

use std::collections::VecDeque;

use crate::registry::UnitId;

#[derive(Clone, Copy, Debug, PartialEq)]
struct CooldownEntry {
    unit: UnitId,
    /// Seconds after the previous entry wakes.
    relative: f32,
}

/// Units waiting for their interval to elapse.
#[derive(Debug, Default)]
pub(crate) struct CooldownList {
    entries: VecDeque<CooldownEntry>,
}

impl CooldownList {
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn contains(&self, unit: UnitId) -> bool {
        self.entries.iter().any(|entry| entry.unit == unit)
    }

    /// Entries in wake order with their absolute remaining cooldown.
    pub(crate) fn iter(&self) -> impl Iterator<Item = (UnitId, f32)> + '_ {
        self.entries.iter().scan(0.0_f32, |cumulative, entry| {
            *cumulative += entry.relative;
            Some((entry.unit, *cumulative))
        })
    }

    /// Pop every entry due within `delta` seconds.
    ///
    /// Returns each due unit with the offset into the frame at which it woke.
    /// The first remaining entry absorbs the elapsed time.
    pub(crate) fn promote(&mut self, delta: f32) -> Vec<(UnitId, f32)> {
        let mut due = Vec::new();
        let mut cumulative = 0.0_f32;
        while let Some(head) = self.entries.front() {
            if cumulative + head.relative > delta {
                break;
            }
            cumulative += head.relative;
            due.push((head.unit, cumulative));
            self.entries.pop_front();
        }
        if let Some(head) = self.entries.front_mut() {
            head.relative -= delta - cumulative;
        }
        due
    }

    /// Take `unit` out of the list. Its relative cooldown folds into the
    /// following entry so every later wake time stays put.
    pub(crate) fn remove(&mut self, unit: UnitId) -> bool {
        let Some(position) = self.entries.iter().position(|entry| entry.unit == unit) else {
            return false;
        };
        if let Some(removed) = self.entries.remove(position) {
            if let Some(next) = self.entries.get_mut(position) {
                next.relative += removed.relative;
            }
        }
        true
    }

    /// Drop every entry rejected by `keep`, preserving later wake times.
    /// Returns the removed units.
    pub(crate) fn retain(&mut self, mut keep: impl FnMut(UnitId) -> bool) -> Vec<UnitId> {
        let mut removed = Vec::new();
        let mut carry = 0.0_f32;
        self.entries.retain_mut(|entry| {
            if keep(entry.unit) {
                entry.relative += carry;
                carry = 0.0;
                true
            } else {
                carry += entry.relative;
                removed.push(entry.unit);
                false
            }
        });
        removed
    }

    /// Insert staged `(unit, cooldown)` pairs, cooldown measured from now.
    ///
    /// Sorts the staged entries once and merges them in a single pass. Equal
    /// wake times keep existing entries first.
    pub(crate) fn schedule(&mut self, mut staged: Vec<(UnitId, f32)>) {
        if staged.is_empty() {
            return;
        }
        staged.sort_by(|a, b| a.1.total_cmp(&b.1));

        let existing = std::mem::take(&mut self.entries);
        let mut merged = VecDeque::with_capacity(existing.len() + staged.len());
        let mut existing = existing.into_iter().peekable();
        let mut staged = staged.into_iter().peekable();
        // Absolute wake time of the next existing entry and of the last pushed one.
        let mut existing_at = existing.peek().map_or(0.0, |entry| entry.relative);
        let mut last_at = 0.0_f32;

        loop {
            let take_staged = match (existing.peek(), staged.peek()) {
                (Some(_), Some(&(_, wake))) => wake < existing_at,
                (None, Some(_)) => true,
                (Some(_), None) => false,
                (None, None) => break,
            };
            if take_staged {
                if let Some((unit, wake)) = staged.next() {
                    merged.push_back(CooldownEntry {
                        unit,
                        relative: wake - last_at,
                    });
                    last_at = wake;
                }
            } else if let Some(entry) = existing.next() {
                merged.push_back(CooldownEntry {
                    unit: entry.unit,
                    relative: existing_at - last_at,
                });
                last_at = existing_at;
                if let Some(next) = existing.peek() {
                    existing_at += next.relative;
                }
            }
        }

        self.entries = merged;
    }

    /// Pause-frame pass: pull out every entry accepted by `select`.
    ///
    /// Returns each selected unit with its absolute remaining cooldown. Time
    /// does not advance for the entries left behind.
    pub(crate) fn extract(&mut self, mut select: impl FnMut(UnitId) -> bool) -> Vec<(UnitId, f32)> {
        let mut extracted = Vec::new();
        let mut cumulative = 0.0_f32;
        let mut carry = 0.0_f32;
        self.entries.retain_mut(|entry| {
            cumulative += entry.relative;
            if select(entry.unit) {
                extracted.push((entry.unit, cumulative));
                carry += entry.relative;
                false
            } else {
                entry.relative += carry;
                carry = 0.0;
                true
            }
        });
        extracted
    }
}
