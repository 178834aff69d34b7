//! Desired and current agent state tables.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};

use ensim_core::{AgentState, AgentType, StateMap};

/// One `AgentState` slot per agent type, readable and writable without locks.
#[derive(Debug)]
pub struct AgentStateTable {
    slots: [AtomicU8; AgentType::COUNT],
}

impl Default for AgentStateTable {
    fn default() -> Self {
        Self::new(AgentState::Unknown)
    }
}

impl AgentStateTable {
    pub fn new(initial: AgentState) -> Self {
        Self {
            slots: std::array::from_fn(|_| AtomicU8::new(initial.as_u8())),
        }
    }

    pub fn get(&self, agent: AgentType) -> AgentState {
        AgentState::from_u8(self.slots[agent.index()].load(Ordering::SeqCst))
    }

    /// Store `state`, returning the previous value.
    pub fn set(&self, agent: AgentType, state: AgentState) -> AgentState {
        AgentState::from_u8(self.slots[agent.index()].swap(state.as_u8(), Ordering::SeqCst))
    }

    /// Initialized entries only.
    pub fn snapshot(&self) -> HashMap<AgentType, AgentState> {
        AgentType::ALL
            .iter()
            .map(|t| (*t, self.get(*t)))
            .filter(|(_, s)| *s != AgentState::Unknown)
            .collect()
    }
}

#[derive(Debug)]
pub struct AgentStates {
    pub current: AgentStateTable,
    pub desired: AgentStateTable,
}

impl AgentStates {
    /// Both tables with every agent `On`.
    pub fn all_on() -> Self {
        Self {
            current: AgentStateTable::new(AgentState::On),
            desired: AgentStateTable::new(AgentState::On),
        }
    }

    pub fn snapshot(&self) -> StateMap {
        StateMap {
            current: self.current.snapshot(),
            desired: self.desired.snapshot(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_table_is_uninitialized() {
        let table = AgentStateTable::default();
        assert!(table.snapshot().is_empty());
        assert_eq!(table.get(AgentType::Hd), AgentState::Unknown);
    }

    #[test]
    fn set_returns_previous() {
        let table = AgentStateTable::new(AgentState::On);
        assert_eq!(table.set(AgentType::Update, AgentState::Off), AgentState::On);
        assert_eq!(table.get(AgentType::Update), AgentState::Off);
        assert_eq!(table.get(AgentType::Node), AgentState::On);
    }

    #[test]
    fn snapshot_covers_all_agents() {
        let states = AgentStates::all_on();
        let map = states.snapshot();
        assert_eq!(map.current.len(), 4);
        assert_eq!(map.desired.len(), 4);
        assert!(map.current.values().all(|s| *s == AgentState::On));
    }
}
