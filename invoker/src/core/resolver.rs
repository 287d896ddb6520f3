//! Partitioning a case's modifiers into execution plans.
//!
//! Participating modifiers form an undirected compatibility graph: two are
//! compatible unless either declares exclusivity with the other. Starting
//! from each modifier in declaration order, a group greedily absorbs every
//! later-or-earlier modifier compatible with all current members. Groups
//! equal as sets are kept once, in the order they were first built.
//!
//! Conflicts are checked first and short-circuit grouping entirely.

use std::collections::BTreeSet;

use crate::core::modifier::Modifier;

/// Why a case's modifiers can never be satisfied.
#[derive(Debug, Clone, PartialEq)]
pub struct ModifierConflict {
    pub primary: Modifier,
    pub secondary: Option<Modifier>,
    pub reason: String,
}

impl std::fmt::Display for ModifierConflict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.secondary {
            Some(secondary) => write!(
                f,
                "{} conflicts with {}: {}",
                self.primary, secondary, self.reason
            ),
            None => write!(f, "{}: {}", self.primary, self.reason),
        }
    }
}

/// One internally consistent subset of a case's modifiers. One plan is run
/// by exactly one Handle.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionPlan {
    modifiers: Vec<Modifier>,
    continuing: bool,
}

impl ExecutionPlan {
    pub fn modifiers(&self) -> &[Modifier] {
        &self.modifiers
    }

    /// True for every plan except the last of a case.
    pub fn is_continuing(&self) -> bool {
        self.continuing
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Conflict(ModifierConflict),
    /// At least one plan.
    Plans(Vec<ExecutionPlan>),
}

/// Check conflicts, then group participating modifiers into plans.
pub fn resolve(modifiers: &[Modifier]) -> Resolution {
    if let Some(conflict) = find_conflict(modifiers) {
        return Resolution::Conflict(conflict);
    }

    let participating: Vec<&Modifier> = modifiers
        .iter()
        .filter(|modifier| modifier.is_participating())
        .collect();

    let groups = if participating.is_empty() {
        vec![Vec::new()]
    } else {
        group_compatible(&participating)
    };

    let last = groups.len() - 1;
    let plans = groups
        .into_iter()
        .enumerate()
        .map(|(index, group)| ExecutionPlan {
            modifiers: group.into_iter().map(|i| participating[i].clone()).collect(),
            continuing: index != last,
        })
        .collect();
    Resolution::Plans(plans)
}

fn find_conflict(modifiers: &[Modifier]) -> Option<ModifierConflict> {
    for modifier in modifiers {
        if let Some(reason) = modifier.self_conflict() {
            return Some(ModifierConflict {
                primary: modifier.clone(),
                secondary: None,
                reason,
            });
        }
    }
    for (index, primary) in modifiers.iter().enumerate() {
        for secondary in &modifiers[index + 1..] {
            let reason = primary
                .conflicts_with(secondary)
                .or_else(|| secondary.conflicts_with(primary));
            if let Some(reason) = reason {
                return Some(ModifierConflict {
                    primary: primary.clone(),
                    secondary: Some(secondary.clone()),
                    reason,
                });
            }
        }
    }
    None
}

fn compatible(a: &Modifier, b: &Modifier) -> bool {
    !a.is_exclusive_with(b) && !b.is_exclusive_with(a)
}

/// Maximal groups grown greedily from each seed, as sorted index lists.
fn group_compatible(modifiers: &[&Modifier]) -> Vec<Vec<usize>> {
    let mut seen: BTreeSet<Vec<usize>> = BTreeSet::new();
    let mut groups = Vec::new();
    for seed in 0..modifiers.len() {
        let mut group = vec![seed];
        for candidate in 0..modifiers.len() {
            if candidate == seed {
                continue;
            }
            if group
                .iter()
                .all(|&member| compatible(modifiers[member], modifiers[candidate]))
            {
                group.push(candidate);
            }
        }
        group.sort_unstable();
        if seen.insert(group.clone()) {
            groups.push(group);
        }
    }
    groups
}
