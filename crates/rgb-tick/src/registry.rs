//! Unit identifiers with generational indices.
//!
//! Prerequisite edges hold a [`UnitId`], never the unit itself. Removing a unit
//! bumps its slot's generation, so every edge still pointing at it fails the
//! liveness check instead of dangling.

use std::fmt;

use crate::unit::TickUnit;

/// Generation counter to detect stale unit references.
/// Incremented each time a unit slot is recycled.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Generation(u32);

impl Generation {
    /// Create a new generation (starts at 0).
    #[must_use]
    pub const fn new() -> Self {
        Self(0)
    }

    /// Increment the generation counter.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }

    /// Get the raw generation value.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gen{}", self.0)
    }
}

/// Handle to a tickable unit owned by a [`TickManager`](crate::TickManager).
///
/// Copyable and cheap; a handle outlives its unit safely and simply stops
/// resolving once the unit is removed.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnitId {
    index: u32,
    generation: Generation,
}

impl UnitId {
    /// Create a handle from raw parts.
    #[must_use]
    pub const fn new(index: u32, generation: Generation) -> Self {
        Self { index, generation }
    }

    /// Slot index.
    #[must_use]
    pub const fn index(self) -> u32 {
        self.index
    }

    /// Slot generation.
    #[must_use]
    pub const fn generation(self) -> Generation {
        self.generation
    }

    /// Pack into a single u64.
    #[must_use]
    pub const fn to_bits(self) -> u64 {
        ((self.generation.0 as u64) << 32) | (self.index as u64)
    }

    /// Unpack from a u64.
    #[must_use]
    pub const fn from_bits(bits: u64) -> Self {
        Self {
            index: bits as u32,
            generation: Generation((bits >> 32) as u32),
        }
    }
}

impl fmt::Debug for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Unit({}v{})", self.index, self.generation.0)
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation.0)
    }
}

struct Slot {
    generation: Generation,
    unit: Option<TickUnit>,
}

/// Slot storage for every unit known to a manager, registered or not.
///
/// Maintains a free list of recycled slots and bumps the generation of a slot
/// when its unit is removed.
pub(crate) struct UnitSlots {
    slots: Vec<Slot>,
    free_list: Vec<u32>,
    alive_count: usize,
}

impl Default for UnitSlots {
    fn default() -> Self {
        Self::new()
    }
}

impl UnitSlots {
    pub(crate) const fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_list: Vec::new(),
            alive_count: 0,
        }
    }

    /// Store a unit and hand out its id.
    pub(crate) fn insert(&mut self, unit: TickUnit) -> UnitId {
        self.alive_count += 1;

        if let Some(index) = self.free_list.pop() {
            let slot = &mut self.slots[index as usize];
            slot.unit = Some(unit);
            UnitId::new(index, slot.generation)
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                generation: Generation::new(),
                unit: Some(unit),
            });
            UnitId::new(index, Generation::new())
        }
    }

    /// Remove a unit, invalidating every outstanding id for it.
    pub(crate) fn remove(&mut self, id: UnitId) -> Option<TickUnit> {
        let slot = self.slots.get_mut(id.index() as usize)?;
        if slot.generation != id.generation() {
            return None;
        }
        let unit = slot.unit.take()?;
        slot.generation = slot.generation.next();
        self.free_list.push(id.index());
        self.alive_count -= 1;
        Some(unit)
    }

    /// True if `id` still names a stored unit.
    pub(crate) fn contains(&self, id: UnitId) -> bool {
        self.get(id).is_some()
    }

    pub(crate) fn get(&self, id: UnitId) -> Option<&TickUnit> {
        let slot = self.slots.get(id.index() as usize)?;
        if slot.generation == id.generation() {
            slot.unit.as_ref()
        } else {
            None
        }
    }

    pub(crate) fn get_mut(&mut self, id: UnitId) -> Option<&mut TickUnit> {
        let slot = self.slots.get_mut(id.index() as usize)?;
        if slot.generation == id.generation() {
            slot.unit.as_mut()
        } else {
            None
        }
    }

    /// A unit is alive if it is stored and its owner, if any, still exists.
    pub(crate) fn is_alive(&self, id: UnitId) -> bool {
        self.get(id).is_some_and(TickUnit::owner_alive)
    }

    pub(crate) const fn len(&self) -> usize {
        self.alive_count
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::unit::TickUnitDesc;

    fn unit(name: &str) -> TickUnit {
        TickUnit::from_desc(TickUnitDesc::new(name, |_: &crate::TickContext<'_>| {}))
    }

    #[test]
    fn test_slot_allocation() {
        let mut slots = UnitSlots::new();

        let a = slots.insert(unit("a"));
        let b = slots.insert(unit("b"));

        assert_eq!(a.index(), 0);
        assert_eq!(b.index(), 1);
        assert!(slots.contains(a));
        assert!(slots.contains(b));
        assert_eq!(slots.len(), 2);
    }

    #[test]
    fn test_removed_id_goes_stale() {
        let mut slots = UnitSlots::new();

        let a = slots.insert(unit("a"));
        assert!(slots.remove(a).is_some());
        assert!(!slots.contains(a));
        assert!(slots.remove(a).is_none());

        // Slot is reused with a bumped generation
        let b = slots.insert(unit("b"));
        assert_eq!(b.index(), a.index());
        assert_ne!(b.generation(), a.generation());
        assert!(slots.get(a).is_none());
        assert_eq!(slots.get(b).map(TickUnit::name), Some("b"));
    }

    #[test]
    fn test_dropped_owner_is_not_alive() {
        let mut slots = UnitSlots::new();
        let owner = Arc::new(7_u32);

        let id = slots.insert(TickUnit::from_desc(
            TickUnitDesc::new("owned", |_: &crate::TickContext<'_>| {}).owner(&owner),
        ));
        assert!(slots.is_alive(id));

        drop(owner);
        assert!(slots.contains(id));
        assert!(!slots.is_alive(id));
    }

    #[test]
    fn test_bits_roundtrip() {
        let id = UnitId::new(12345, Generation(678));
        assert_eq!(UnitId::from_bits(id.to_bits()), id);
    }
}
