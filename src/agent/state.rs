// Layer 1: Standard library imports
use std::any::Any;
use std::fmt::{self, Display};
use std::sync::Arc;
use std::time::Duration;

// Layer 2: Third-party crate imports
use thiserror::Error;

// Layer 3: Internal module imports
use super::traits::Agent;
use crate::util::AgentId;

/// Handle to one node of an agent's state tree.
///
/// States are arena indices owned by a single agent; the owner id is
/// embedded so that passing a state of one agent to another is detected
/// instead of silently matching the wrong node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct State {
    owner: AgentId,
    idx: u32,
}

impl State {
    pub(crate) fn new(owner: AgentId, idx: u32) -> Self {
        Self { owner, idx }
    }

    pub(crate) fn owner(&self) -> AgentId {
        self.owner
    }

    pub(crate) fn idx(&self) -> u32 {
        self.idx
    }
}

impl Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "state:{}/{}", self.owner.raw(), self.idx)
    }
}

/// Enter/exit hook: runs on the agent's worker thread with exclusive
/// access to the agent.
pub(crate) type StateHook = Arc<dyn Fn(&mut dyn Agent) + Send + Sync>;

/// Errors of state-tree construction and state transitions.
#[derive(Debug, Error)]
pub enum StateError {
    /// A state handle of another agent was used.
    #[error("state {state} does not belong to agent {agent}")]
    ForeignState {
        /// The misused state.
        state: State,
        /// The agent the operation ran on.
        agent: AgentId,
    },

    /// The state tree may not change once the agent is registered.
    #[error("state tree of agent {agent} is frozen")]
    TreeFrozen {
        /// The owning agent.
        agent: AgentId,
    },

    /// A composite state without an initial substate was used as a
    /// transition destination.
    #[error("composite state `{name}` has no initial substate")]
    CompositeWithoutInitialSubstate {
        /// Name of the offending state.
        name: String,
    },

    /// `initial_substate` was called with a state that is not a direct
    /// child of the composite.
    #[error("state `{child}` is not a direct substate of `{composite}`")]
    InitialSubstateNotChild {
        /// Name of the would-be initial substate.
        child: String,
        /// Name of the composite.
        composite: String,
    },
}

/// Runtime-internal message armed by a state time limit; delivered to
/// the agent's direct mbox and intercepted before normal dispatch.
#[derive(Debug)]
pub(crate) struct TimeLimitElapsed {
    pub(crate) state: State,
}

struct StateNode {
    name: String,
    parent: Option<u32>,
    initial_substate: Option<u32>,
    has_children: bool,
    on_enter: Option<StateHook>,
    on_exit: Option<StateHook>,
    time_limit: Option<(Duration, u32)>,
}

/// Per-agent tree of states with enter/exit hooks, initial substates
/// and optional time limits. Immutable once the agent enters operation.
pub(crate) struct StateTree {
    owner: AgentId,
    nodes: Vec<StateNode>,
    frozen: bool,
}

/// Name of the implicitly created default state.
pub(crate) const DEFAULT_STATE_NAME: &str = "<DEFAULT>";

impl StateTree {
    pub(crate) fn new(owner: AgentId) -> Self {
        Self {
            owner,
            nodes: vec![StateNode {
                name: DEFAULT_STATE_NAME.to_string(),
                parent: None,
                initial_substate: None,
                has_children: false,
                on_enter: None,
                on_exit: None,
                time_limit: None,
            }],
            frozen: false,
        }
    }

    pub(crate) fn default_state(&self) -> State {
        State::new(self.owner, 0)
    }

    pub(crate) fn freeze(&mut self) {
        self.frozen = true;
    }

    fn check_owned(&self, state: State) -> Result<u32, StateError> {
        if state.owner() != self.owner || (state.idx() as usize) >= self.nodes.len() {
            return Err(StateError::ForeignState {
                state,
                agent: self.owner,
            });
        }
        Ok(state.idx())
    }

    fn check_mutable(&self) -> Result<(), StateError> {
        if self.frozen {
            return Err(StateError::TreeFrozen { agent: self.owner });
        }
        Ok(())
    }

    pub(crate) fn add_state(
        &mut self,
        name: impl Into<String>,
        parent: Option<State>,
    ) -> Result<State, StateError> {
        self.check_mutable()?;
        let parent_idx = match parent {
            Some(p) => Some(self.check_owned(p)?),
            None => None,
        };
        let idx = self.nodes.len() as u32;
        self.nodes.push(StateNode {
            name: name.into(),
            parent: parent_idx,
            initial_substate: None,
            has_children: false,
            on_enter: None,
            on_exit: None,
            time_limit: None,
        });
        if let Some(p) = parent_idx {
            self.nodes[p as usize].has_children = true;
        }
        Ok(State::new(self.owner, idx))
    }

    pub(crate) fn set_initial_substate(
        &mut self,
        composite: State,
        child: State,
    ) -> Result<(), StateError> {
        self.check_mutable()?;
        let c = self.check_owned(composite)?;
        let s = self.check_owned(child)?;
        if self.nodes[s as usize].parent != Some(c) {
            return Err(StateError::InitialSubstateNotChild {
                child: self.nodes[s as usize].name.clone(),
                composite: self.nodes[c as usize].name.clone(),
            });
        }
        self.nodes[c as usize].initial_substate = Some(s);
        Ok(())
    }

    pub(crate) fn set_on_enter(&mut self, state: State, hook: StateHook) -> Result<(), StateError> {
        self.check_mutable()?;
        let idx = self.check_owned(state)?;
        self.nodes[idx as usize].on_enter = Some(hook);
        Ok(())
    }

    pub(crate) fn set_on_exit(&mut self, state: State, hook: StateHook) -> Result<(), StateError> {
        self.check_mutable()?;
        let idx = self.check_owned(state)?;
        self.nodes[idx as usize].on_exit = Some(hook);
        Ok(())
    }

    pub(crate) fn set_time_limit(
        &mut self,
        state: State,
        limit: Duration,
        target: State,
    ) -> Result<(), StateError> {
        self.check_mutable()?;
        let idx = self.check_owned(state)?;
        let target_idx = self.check_owned(target)?;
        self.nodes[idx as usize].time_limit = Some((limit, target_idx));
        Ok(())
    }

    pub(crate) fn name_of(&self, state: State) -> &str {
        self.check_owned(state)
            .map(|idx| self.nodes[idx as usize].name.as_str())
            .unwrap_or("<foreign>")
    }

    pub(crate) fn parent_of(&self, state: State) -> Option<State> {
        let idx = self.check_owned(state).ok()?;
        self.nodes[idx as usize]
            .parent
            .map(|p| State::new(self.owner, p))
    }

    pub(crate) fn on_enter_hook(&self, state: State) -> Option<StateHook> {
        let idx = self.check_owned(state).ok()?;
        self.nodes[idx as usize].on_enter.clone()
    }

    pub(crate) fn on_exit_hook(&self, state: State) -> Option<StateHook> {
        let idx = self.check_owned(state).ok()?;
        self.nodes[idx as usize].on_exit.clone()
    }

    pub(crate) fn time_limit_of(&self, state: State) -> Option<(Duration, State)> {
        let idx = self.check_owned(state).ok()?;
        self.nodes[idx as usize]
            .time_limit
            .map(|(d, t)| (d, State::new(self.owner, t)))
    }

    /// Resolve a transition target to a leaf by descending initial
    /// substates. A composite without an initial substate is an error.
    pub(crate) fn resolve_leaf(&self, state: State) -> Result<State, StateError> {
        let mut idx = self.check_owned(state)?;
        loop {
            let node = &self.nodes[idx as usize];
            if !node.has_children {
                return Ok(State::new(self.owner, idx));
            }
            match node.initial_substate {
                Some(next) => idx = next,
                None => {
                    return Err(StateError::CompositeWithoutInitialSubstate {
                        name: node.name.clone(),
                    })
                }
            }
        }
    }

    /// Path from `state` up to the root, inclusive on both ends.
    pub(crate) fn path_to_root(&self, state: State) -> Vec<State> {
        let mut path = Vec::new();
        let mut current = self.check_owned(state).ok();
        while let Some(idx) = current {
            path.push(State::new(self.owner, idx));
            current = self.nodes[idx as usize].parent;
        }
        path
    }

    /// Lowest common ancestor of two states, if any.
    pub(crate) fn lca(&self, a: State, b: State) -> Option<State> {
        let path_a = self.path_to_root(a);
        let path_b = self.path_to_root(b);
        path_a.into_iter().find(|s| path_b.contains(s))
    }

    /// Is `ancestor` on the composite path of `leaf` (including the
    /// leaf itself)?
    pub(crate) fn is_on_path(&self, ancestor: State, leaf: State) -> bool {
        self.path_to_root(leaf).contains(&ancestor)
    }
}

/// Wrap a typed enter/exit hook into the stored erased form.
pub(crate) fn erase_state_hook<A: Agent>(hook: impl Fn(&mut A) + Send + Sync + 'static) -> StateHook {
    Arc::new(move |agent: &mut dyn Agent| {
        let any: &mut dyn Any = agent;
        if let Some(typed) = any.downcast_mut::<A>() {
            hook(typed);
        }
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn tree() -> StateTree {
        StateTree::new(AgentId::from_raw(1))
    }

    #[test]
    fn test_default_state_is_a_leaf() {
        let t = tree();
        let def = t.default_state();
        assert_eq!(t.resolve_leaf(def).unwrap(), def);
        assert_eq!(t.name_of(def), DEFAULT_STATE_NAME);
    }

    #[test]
    fn test_top_level_states_have_no_parent() {
        let mut t = tree();
        let s = t.add_state("working", None).unwrap();
        assert!(t.parent_of(s).is_none());
        assert_eq!(t.path_to_root(s), vec![s]);
    }

    #[test]
    fn test_substate_paths() {
        let mut t = tree();
        let root = t.add_state("root", None).unwrap();
        let child = t.add_state("child", Some(root)).unwrap();
        let grand = t.add_state("grand", Some(child)).unwrap();

        assert_eq!(t.path_to_root(grand), vec![grand, child, root]);
        assert!(t.is_on_path(root, grand));
        assert!(!t.is_on_path(grand, root));
    }

    #[test]
    fn test_lca() {
        let mut t = tree();
        let root = t.add_state("root", None).unwrap();
        let a = t.add_state("a", Some(root)).unwrap();
        let b = t.add_state("b", Some(root)).unwrap();
        let a1 = t.add_state("a1", Some(a)).unwrap();

        assert_eq!(t.lca(a1, b), Some(root));
        assert_eq!(t.lca(a1, a), Some(a));
        assert_eq!(t.lca(a1, a1), Some(a1));

        let other = t.add_state("other", None).unwrap();
        assert_eq!(t.lca(a1, other), None);
    }

    #[test]
    fn test_resolve_leaf_descends_initial_substates() {
        let mut t = tree();
        let root = t.add_state("root", None).unwrap();
        let mid = t.add_state("mid", Some(root)).unwrap();
        let leaf = t.add_state("leaf", Some(mid)).unwrap();
        t.set_initial_substate(root, mid).unwrap();
        t.set_initial_substate(mid, leaf).unwrap();

        assert_eq!(t.resolve_leaf(root).unwrap(), leaf);
    }

    #[test]
    fn test_resolve_leaf_fails_without_initial_substate() {
        let mut t = tree();
        let root = t.add_state("root", None).unwrap();
        let _child = t.add_state("child", Some(root)).unwrap();

        assert!(matches!(
            t.resolve_leaf(root),
            Err(StateError::CompositeWithoutInitialSubstate { .. })
        ));
    }

    #[test]
    fn test_initial_substate_must_be_direct_child() {
        let mut t = tree();
        let root = t.add_state("root", None).unwrap();
        let child = t.add_state("child", Some(root)).unwrap();
        let grand = t.add_state("grand", Some(child)).unwrap();

        assert!(matches!(
            t.set_initial_substate(root, grand),
            Err(StateError::InitialSubstateNotChild { .. })
        ));
    }

    #[test]
    fn test_frozen_tree_rejects_changes() {
        let mut t = tree();
        t.freeze();
        assert!(matches!(
            t.add_state("late", None),
            Err(StateError::TreeFrozen { .. })
        ));
    }

    #[test]
    fn test_foreign_state_is_rejected() {
        let mut own = tree();
        let mut other = StateTree::new(AgentId::from_raw(2));
        let foreign = other.add_state("foreign", None).unwrap();

        assert!(matches!(
            own.add_state("x", Some(foreign)),
            Err(StateError::ForeignState { .. })
        ));
    }
}
