//! Read-only diagnostic dump of registered units.

use std::fmt;

use crate::{
    group::TickGroup,
    level::{LevelId, TickLevel},
    registry::{UnitId, UnitSlots},
    unit::TickState,
};

/// Which units a dump lists. Totals always cover both.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DumpFilter {
    /// List enabled and cooling down units.
    pub enabled: bool,
    /// List disabled units.
    pub disabled: bool,
}

impl DumpFilter {
    pub const ALL: Self = Self {
        enabled: true,
        disabled: true,
    };
    pub const ENABLED: Self = Self {
        enabled: true,
        disabled: false,
    };
    pub const DISABLED: Self = Self {
        enabled: false,
        disabled: true,
    };

    const fn label(self) -> &'static str {
        match (self.enabled, self.disabled) {
            (true, true) => "All",
            (true, false) => "Enabled",
            (false, true) => "Disabled",
            (false, false) => "None",
        }
    }
}

impl Default for DumpFilter {
    fn default() -> Self {
        Self::ALL
    }
}

/// A prerequisite edge as seen by the dump.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DumpPrerequisite {
    /// Edge to a live unit.
    Valid { unit: UnitId, name: String },
    /// Edge to a removed unit or one whose owner was dropped.
    Invalid(UnitId),
}

/// One listed unit.
#[derive(Clone, Debug, PartialEq)]
pub struct DumpEntry {
    pub unit: UnitId,
    pub name: String,
    pub state: TickState,
    pub tick_group: TickGroup,
    pub actual_group: TickGroup,
    pub high_priority: bool,
    pub interval: f32,
    /// Remaining cooldown in seconds while cooling down.
    pub cooldown: Option<f32>,
    pub prerequisites: Vec<DumpPrerequisite>,
}

/// Listing of one visible level.
#[derive(Clone, Debug, PartialEq)]
pub struct LevelDump {
    pub level: LevelId,
    pub entries: Vec<DumpEntry>,
}

/// Snapshot produced by [`TickManager::dump`](crate::TickManager::dump).
#[derive(Clone, Debug, PartialEq)]
pub struct TickDump {
    pub filter: DumpFilter,
    pub frame: u64,
    pub levels: Vec<LevelDump>,
    /// Enabled plus cooling down units across visible levels.
    pub enabled: usize,
    pub disabled: usize,
}

impl TickDump {
    /// Total registered units across visible levels.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.enabled + self.disabled
    }

    /// Find a listed unit.
    #[must_use]
    pub fn entry(&self, unit: UnitId) -> Option<&DumpEntry> {
        self.levels
            .iter()
            .flat_map(|level| level.entries.iter())
            .find(|entry| entry.unit == unit)
    }
}

fn entry(units: &UnitSlots, id: UnitId, cooldown: Option<f32>) -> Option<DumpEntry> {
    let unit = units.get(id)?;
    let prerequisites = unit
        .prerequisites
        .iter()
        .map(|&prerequisite| match units.get(prerequisite) {
            Some(other) if other.owner_alive() => DumpPrerequisite::Valid {
                unit: prerequisite,
                name: other.name().to_owned(),
            },
            _ => DumpPrerequisite::Invalid(prerequisite),
        })
        .collect();

    Some(DumpEntry {
        unit: id,
        name: unit.name().to_owned(),
        state: unit.state,
        tick_group: unit.tick_group,
        actual_group: unit.actual_group,
        high_priority: unit.high_priority,
        interval: unit.interval,
        cooldown,
        prerequisites,
    })
}

/// Build a dump of `levels`. Entries are sorted by id so output is stable.
pub(crate) fn collect<'a>(
    frame: u64,
    units: &UnitSlots,
    levels: impl Iterator<Item = &'a TickLevel>,
    filter: DumpFilter,
) -> TickDump {
    let mut dump = TickDump {
        filter,
        frame,
        levels: Vec::new(),
        enabled: 0,
        disabled: 0,
    };

    for level in levels {
        let mut entries = Vec::new();

        let mut enabled: Vec<UnitId> = level.enabled().collect();
        enabled.sort_unstable();
        let cooling: Vec<(UnitId, f32)> = level.cooling_down().collect();
        let mut disabled: Vec<UnitId> = level.disabled().collect();
        disabled.sort_unstable();

        dump.enabled += enabled.len() + cooling.len();
        dump.disabled += disabled.len();

        if filter.enabled {
            entries.extend(enabled.iter().filter_map(|&id| entry(units, id, None)));
            entries.extend(
                cooling
                    .iter()
                    .filter_map(|&(id, remaining)| entry(units, id, Some(remaining))),
            );
        }
        if filter.disabled {
            entries.extend(disabled.iter().filter_map(|&id| entry(units, id, None)));
        }

        dump.levels.push(LevelDump {
            level: level.id(),
            entries,
        });
    }
    dump
}

impl fmt::Display for DumpEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}], ", self.name, self.unit)?;
        match (self.state, self.cooldown) {
            (TickState::Disabled, _) => f.write_str("Disabled")?,
            (_, Some(remaining)) if remaining > 0.0 => {
                write!(f, "Cooling Down for {remaining:.4} seconds")?;
            }
            _ => f.write_str("Enabled")?,
        }
        write!(
            f,
            ", ActualTickGroup: {}, Prerequisites: {}",
            self.actual_group,
            self.prerequisites.len()
        )?;
        for prerequisite in &self.prerequisites {
            match prerequisite {
                DumpPrerequisite::Valid { unit, name } => write!(f, "\n    {name} [{unit}]")?,
                DumpPrerequisite::Invalid(_) => f.write_str("\n    Invalid prerequisite")?,
            }
        }
        Ok(())
    }
}

impl fmt::Display for TickDump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "============================ Tick Units ({}) ============================",
            self.filter.label()
        )?;
        for level in &self.levels {
            writeln!(f, "Level {} (frame {})", level.level.index(), self.frame)?;
            for entry in &level.entries {
                writeln!(f, "  {}", entry.to_string().replace('\n', "\n  "))?;
            }
        }
        writeln!(f)?;
        writeln!(
            f,
            "Total registered tick units: {}, enabled: {}, disabled: {}.",
            self.total(),
            self.enabled,
            self.disabled
        )
    }
}
