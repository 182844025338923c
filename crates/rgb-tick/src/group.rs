//! Tick groups - the ordered phases of a frame.

use std::fmt;

/// A phase of the frame. All work in one group logically precedes work in the
/// next.
///
/// `NewlySpawned` is the catch-up group: units cannot declare it, they only
/// land there when they are spawned after the regular groups were released.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum TickGroup {
    /// Before physics simulation starts.
    #[default]
    PrePhysics,
    /// Kicks off the physics simulation.
    StartPhysics,
    /// Runs in parallel with the physics simulation.
    DuringPhysics,
    /// Waits for the physics simulation to finish.
    EndPhysics,
    /// After rigid bodies and cloth have been simulated.
    PostPhysics,
    /// After everything else, for work that reads final state.
    PostUpdateWork,
    /// Target for units demoted past every other group.
    LastDemotable,
    /// Catch-up group for units spawned mid-frame.
    NewlySpawned,
}

impl TickGroup {
    /// Number of groups, including the catch-up group.
    pub const COUNT: usize = 8;

    /// Every group in frame order.
    pub const ALL: [Self; Self::COUNT] = [
        Self::PrePhysics,
        Self::StartPhysics,
        Self::DuringPhysics,
        Self::EndPhysics,
        Self::PostPhysics,
        Self::PostUpdateWork,
        Self::LastDemotable,
        Self::NewlySpawned,
    ];

    /// Groups a frame driver runs explicitly; the catch-up group is driven by
    /// the manager itself.
    pub const REGULAR: [Self; Self::COUNT - 1] = [
        Self::PrePhysics,
        Self::StartPhysics,
        Self::DuringPhysics,
        Self::EndPhysics,
        Self::PostPhysics,
        Self::PostUpdateWork,
        Self::LastDemotable,
    ];

    /// Position of this group in frame order.
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Group at `index`, if any.
    #[must_use]
    pub const fn from_index(index: usize) -> Option<Self> {
        if index < Self::COUNT {
            Some(Self::ALL[index])
        } else {
            None
        }
    }

    /// The following group, saturating at `NewlySpawned`.
    #[must_use]
    pub const fn next(self) -> Self {
        match Self::from_index(self.index() + 1) {
            Some(group) => group,
            None => Self::NewlySpawned,
        }
    }

    /// True for the reserved catch-up group.
    #[must_use]
    pub const fn is_catch_up(self) -> bool {
        matches!(self, Self::NewlySpawned)
    }

    /// Groups from `self` through `last`, inclusive.
    pub fn through(self, last: Self) -> impl Iterator<Item = Self> {
        Self::ALL[self.index()..=last.index().max(self.index())]
            .iter()
            .copied()
            .filter(move |group| *group <= last)
    }

    /// Stable name used in logs and dumps.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::PrePhysics => "PrePhysics",
            Self::StartPhysics => "StartPhysics",
            Self::DuringPhysics => "DuringPhysics",
            Self::EndPhysics => "EndPhysics",
            Self::PostPhysics => "PostPhysics",
            Self::PostUpdateWork => "PostUpdateWork",
            Self::LastDemotable => "LastDemotable",
            Self::NewlySpawned => "NewlySpawned",
        }
    }
}

impl fmt::Display for TickGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-group storage indexed by [`TickGroup`].
#[derive(Debug)]
pub(crate) struct PerGroup<T>([T; TickGroup::COUNT]);

impl<T: Default> Default for PerGroup<T> {
    fn default() -> Self {
        Self(std::array::from_fn(|_| T::default()))
    }
}

impl<T> PerGroup<T> {
    pub(crate) fn iter(&self) -> impl Iterator<Item = (TickGroup, &T)> {
        TickGroup::ALL.iter().copied().zip(self.0.iter())
    }
}

impl<T> std::ops::Index<TickGroup> for PerGroup<T> {
    type Output = T;

    fn index(&self, group: TickGroup) -> &T {
        &self.0[group.index()]
    }
}

impl<T> std::ops::IndexMut<TickGroup> for PerGroup<T> {
    fn index_mut(&mut self, group: TickGroup) -> &mut T {
        &mut self.0[group.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_order() {
        for window in TickGroup::ALL.windows(2) {
            assert!(window[0] < window[1]);
            assert_eq!(window[0].next(), window[1]);
        }
        assert_eq!(TickGroup::NewlySpawned.next(), TickGroup::NewlySpawned);
    }

    #[test]
    fn test_index_roundtrip() {
        for group in TickGroup::ALL {
            assert_eq!(TickGroup::from_index(group.index()), Some(group));
        }
        assert_eq!(TickGroup::from_index(TickGroup::COUNT), None);
    }

    #[test]
    fn test_through() {
        let span: Vec<_> = TickGroup::StartPhysics
            .through(TickGroup::EndPhysics)
            .collect();
        assert_eq!(
            span,
            vec![
                TickGroup::StartPhysics,
                TickGroup::DuringPhysics,
                TickGroup::EndPhysics
            ]
        );
        assert_eq!(TickGroup::PostPhysics.through(TickGroup::PrePhysics).count(), 0);
    }

    #[test]
    fn test_regular_excludes_catch_up() {
        assert!(TickGroup::REGULAR.iter().all(|group| !group.is_catch_up()));
    }
}
