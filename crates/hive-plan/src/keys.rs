//! The temporal index substrate: composite value-type keys for every
//! per-(cell, agent, tick, sub-tick) quantity, and the sub-stepping that
//! lets fast agents traverse several cells within one coarse tick.
//!
//! Ticks and sub-ticks are 1-based. An agent with step distance `d` gets
//! sub-ticks `1..=d` in every coarse tick except the last, which has a
//! single sub-tick (nothing moves after the horizon ends). Keys hash and
//! compare structurally so each variable family is a plain map.

use hive_grid::{Direction, Position, Rotation};

/// A coarse tick plus the sub-tick within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubTick {
    pub tick: u32,
    pub sub: u32,
}

impl SubTick {
    pub const FIRST: SubTick = SubTick { tick: 1, sub: 1 };

    pub fn new(tick: u32, sub: u32) -> Self {
        Self { tick, sub }
    }

    pub fn is_first(self) -> bool {
        self.tick == 1 && self.sub == 1
    }

    /// The following sub-tick for an agent of the given step distance,
    /// wrapping into the next coarse tick once the movement budget is spent.
    pub fn next(self, step_dist: u32) -> SubTick {
        if self.sub == step_dist {
            SubTick::new(self.tick + 1, 1)
        } else {
            SubTick::new(self.tick, self.sub + 1)
        }
    }

    /// Total sub-ticks elapsed since the start of the horizon; also the
    /// elapsed movement budget, which bounds reachability.
    pub fn full_index(self, step_dist: u32) -> u32 {
        (self.tick - 1) * step_dist + self.sub
    }
}

/// The planning horizon in coarse ticks. Must span at least two ticks:
/// the first tick carries the known initial state, and only ticks before
/// the last admit actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Horizon {
    pub ticks: u32,
}

impl Horizon {
    pub fn new(ticks: u32) -> Self {
        Self { ticks }
    }

    /// Coarse ticks, optionally trimming the known first state or the
    /// actionless last tick.
    pub fn tick_range(self, exclude_first: bool, exclude_last: bool) -> impl Iterator<Item = u32> {
        (1 + exclude_first as u32)..=(self.ticks - exclude_last as u32)
    }

    /// Sub-ticks within one coarse tick: the last tick has a single one.
    pub fn subs_at(self, step_dist: u32, tick: u32) -> std::ops::RangeInclusive<u32> {
        if tick == self.ticks {
            1..=1
        } else {
            1..=step_dist
        }
    }

    /// All sub-ticks of the horizon for an agent of the given step distance.
    pub fn sub_ticks(
        self,
        step_dist: u32,
        exclude_first: bool,
        exclude_last: bool,
    ) -> impl Iterator<Item = SubTick> {
        self.tick_range(false, exclude_last)
            .flat_map(move |t| self.subs_at(step_dist, t).map(move |s| SubTick::new(t, s)))
            .skip(exclude_first as usize)
    }

    /// The full index of the horizon's final sub-tick for this step distance.
    pub fn full_span(self, step_dist: u32) -> u32 {
        (self.ticks - 1) * step_dist + 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellTick {
    pub pos: Position,
    pub tick: u32,
}

impl CellTick {
    pub fn new(pos: Position, tick: u32) -> Self {
        Self { pos, tick }
    }

    pub fn suffix(&self) -> String {
        format!("{}_{}_{}", self.pos.x, self.pos.y, self.tick)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AgentTick {
    pub agent: usize,
    pub tick: u32,
}

impl AgentTick {
    pub fn new(agent: usize, tick: u32) -> Self {
        Self { agent, tick }
    }

    pub fn at(self, pos: Position) -> CellAgentTick {
        CellAgentTick::new(pos, self.agent, self.tick)
    }

    pub fn dir(self, dir: Direction) -> AgentDirTick {
        AgentDirTick::new(self.agent, dir, self.tick)
    }

    pub fn suffix(&self) -> String {
        format!("{}_{}", self.agent, self.tick)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AgentSubTick {
    pub agent: usize,
    pub at: SubTick,
}

impl AgentSubTick {
    pub fn new(agent: usize, at: SubTick) -> Self {
        Self { agent, at }
    }

    pub fn pos(self, pos: Position) -> CellAgentSubTick {
        CellAgentSubTick {
            pos,
            agent: self.agent,
            at: self.at,
        }
    }

    pub fn suffix(&self) -> String {
        format!("{}_{}_{}", self.agent, self.at.tick, self.at.sub)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellAgentTick {
    pub pos: Position,
    pub agent: usize,
    pub tick: u32,
}

impl CellAgentTick {
    pub fn new(pos: Position, agent: usize, tick: u32) -> Self {
        Self { pos, agent, tick }
    }

    pub fn suffix(&self) -> String {
        format!("{}_{}_{}_{}", self.pos.x, self.pos.y, self.agent, self.tick)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellAgentSubTick {
    pub pos: Position,
    pub agent: usize,
    pub at: SubTick,
}

impl CellAgentSubTick {
    pub fn new(pos: Position, agent: usize, at: SubTick) -> Self {
        Self { pos, agent, at }
    }

    pub fn with_pos(self, pos: Position) -> Self {
        Self { pos, ..self }
    }

    pub fn next(self, step_dist: u32) -> Self {
        Self {
            at: self.at.next(step_dist),
            ..self
        }
    }

    pub fn agent_sub(self) -> AgentSubTick {
        AgentSubTick::new(self.agent, self.at)
    }

    pub fn suffix(&self) -> String {
        format!(
            "{}_{}_{}_{}_{}",
            self.pos.x, self.pos.y, self.agent, self.at.tick, self.at.sub
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AgentDirTick {
    pub agent: usize,
    pub dir: Direction,
    pub tick: u32,
}

impl AgentDirTick {
    pub fn new(agent: usize, dir: Direction, tick: u32) -> Self {
        Self { agent, dir, tick }
    }

    pub fn next(self) -> Self {
        Self {
            tick: self.tick + 1,
            ..self
        }
    }

    pub fn prev(self) -> Self {
        Self {
            tick: self.tick - 1,
            ..self
        }
    }

    pub fn suffix(&self) -> String {
        format!("{}_{:?}_{}", self.agent, self.dir, self.tick)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AgentRotTick {
    pub agent: usize,
    pub rot: Rotation,
    pub tick: u32,
}

impl AgentRotTick {
    pub fn new(agent: usize, rot: Rotation, tick: u32) -> Self {
        Self { agent, rot, tick }
    }

    pub fn suffix(&self) -> String {
        format!("{}_{:?}_{}", self.agent, self.rot, self.tick)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConstructorTick {
    pub constructor: usize,
    pub tick: u32,
}

impl ConstructorTick {
    pub fn new(constructor: usize, tick: u32) -> Self {
        Self { constructor, tick }
    }

    pub fn at(self, pos: Position) -> CellConstructorTick {
        CellConstructorTick::new(pos, self.constructor, self.tick)
    }

    pub fn suffix(&self) -> String {
        format!("{}_{}", self.constructor, self.tick)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellConstructorTick {
    pub pos: Position,
    pub constructor: usize,
    pub tick: u32,
}

impl CellConstructorTick {
    pub fn new(pos: Position, constructor: usize, tick: u32) -> Self {
        Self {
            pos,
            constructor,
            tick,
        }
    }

    pub fn next(self) -> Self {
        Self {
            tick: self.tick + 1,
            ..self
        }
    }

    pub fn cell_tick(self) -> CellTick {
        CellTick::new(self.pos, self.tick)
    }

    pub fn constructor_tick(self) -> ConstructorTick {
        ConstructorTick::new(self.constructor, self.tick)
    }

    pub fn with_constructor(self, constructor: usize) -> Self {
        Self {
            constructor,
            ..self
        }
    }

    pub fn suffix(&self) -> String {
        format!(
            "{}_{}_{}_{}",
            self.pos.x, self.pos.y, self.constructor, self.tick
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sub_tick_wraps_at_step_distance() {
        let st = SubTick::new(1, 1);
        assert_eq!(st.next(2), SubTick::new(1, 2));
        assert_eq!(st.next(2).next(2), SubTick::new(2, 1));
        assert_eq!(st.next(1), SubTick::new(2, 1));
    }

    #[test]
    fn full_index_counts_elapsed_movement_budget() {
        assert_eq!(SubTick::new(1, 1).full_index(3), 1);
        assert_eq!(SubTick::new(2, 1).full_index(3), 4);
        assert_eq!(SubTick::new(2, 3).full_index(3), 6);
    }

    #[test]
    fn last_tick_has_a_single_sub_tick() {
        let horizon = Horizon::new(3);
        let subs: Vec<SubTick> = horizon.sub_ticks(2, false, false).collect();
        assert_eq!(
            subs,
            vec![
                SubTick::new(1, 1),
                SubTick::new(1, 2),
                SubTick::new(2, 1),
                SubTick::new(2, 2),
                SubTick::new(3, 1),
            ]
        );
    }

    #[test]
    fn exclusions_trim_both_ends() {
        let horizon = Horizon::new(3);
        let subs: Vec<SubTick> = horizon.sub_ticks(1, true, true).collect();
        assert_eq!(subs, vec![SubTick::new(2, 1)]);
    }
}
