use std::time::Duration;

use z3::ast::{Ast, Bool, Int};
use z3::{Config, Context, Optimize};

use crate::objective::Objective;
use crate::solve::Solution;

/// One tick's solver environment: the Z3 context plus the wall-clock budget.
///
/// The budget is baked into the context configuration because Z3 reads its
/// timeout there; once a solve is invoked it always returns a status before
/// the caller proceeds, so no external cancellation exists.
pub struct CpEnv {
    ctx: Context,
}

impl CpEnv {
    pub fn new() -> Self {
        Self::with_budget(None)
    }

    pub fn with_budget(budget: Option<Duration>) -> Self {
        let mut cfg = Config::new();
        if let Some(budget) = budget {
            cfg.set_timeout_msec(budget.as_millis() as u64);
        }
        Self {
            ctx: Context::new(&cfg),
        }
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }
}

impl Default for CpEnv {
    fn default() -> Self {
        Self::new()
    }
}

/// Accumulates variables and constraints for one planning model.
///
/// The combinators mirror the shapes the planners need: equivalences and
/// implications between a target literal and disjunctions (of literals, of
/// conjunction pairs, of conjunction-with-disjunction chains), plus
/// cardinalities. Z3 accepts arbitrary boolean structure, so each combinator
/// asserts the intended formula directly.
pub struct ModelBuilder<'ctx> {
    ctx: &'ctx Context,
    opt: Optimize<'ctx>,
}

impl<'ctx> ModelBuilder<'ctx> {
    pub fn new(env: &'ctx CpEnv) -> Self {
        let ctx = env.context();
        Self {
            ctx,
            opt: Optimize::new(ctx),
        }
    }

    pub fn context(&self) -> &'ctx Context {
        self.ctx
    }

    /// A fresh boolean decision variable.
    pub fn fresh_bool(&self, name: &str) -> Bool<'ctx> {
        Bool::new_const(self.ctx, name)
    }

    /// A fresh integer decision variable constrained to `[lb, ub]`.
    pub fn fresh_int(&self, name: &str, lb: i64, ub: i64) -> Int<'ctx> {
        let var = Int::new_const(self.ctx, name);
        self.opt.assert(&var.ge(&self.int(lb)));
        self.opt.assert(&var.le(&self.int(ub)));
        var
    }

    pub fn constant(&self, value: bool) -> Bool<'ctx> {
        Bool::from_bool(self.ctx, value)
    }

    pub fn int(&self, value: i64) -> Int<'ctx> {
        Int::from_i64(self.ctx, value)
    }

    pub fn assert(&self, formula: &Bool<'ctx>) {
        self.opt.assert(formula);
    }

    pub fn assert_implies(&self, lhs: &Bool<'ctx>, rhs: &Bool<'ctx>) {
        self.opt.assert(&lhs.implies(rhs));
    }

    /// Disjunction of `lits`; false when empty.
    pub fn any(&self, lits: &[Bool<'ctx>]) -> Bool<'ctx> {
        let refs: Vec<&Bool<'ctx>> = lits.iter().collect();
        Bool::or(self.ctx, &refs)
    }

    /// Conjunction of `lits`; true when empty.
    pub fn all(&self, lits: &[Bool<'ctx>]) -> Bool<'ctx> {
        let refs: Vec<&Bool<'ctx>> = lits.iter().collect();
        Bool::and(self.ctx, &refs)
    }

    /// `target <-> OR(lits)`.
    pub fn iff_any(&self, target: &Bool<'ctx>, lits: &[Bool<'ctx>]) {
        self.opt.assert(&target.iff(&self.any(lits)));
    }

    /// `enforce -> (target <-> OR(lits))`; unconditional when `enforce` is
    /// `None`.
    pub fn iff_any_under(
        &self,
        target: &Bool<'ctx>,
        lits: &[Bool<'ctx>],
        enforce: Option<&Bool<'ctx>>,
    ) {
        let body = target.iff(&self.any(lits));
        match enforce {
            Some(cond) => self.opt.assert(&cond.implies(&body)),
            None => self.opt.assert(&body),
        }
    }

    /// `enforce -> (target <-> AND(lits))`; unconditional when `enforce` is
    /// `None`.
    pub fn iff_all_under(
        &self,
        target: &Bool<'ctx>,
        lits: &[Bool<'ctx>],
        enforce: Option<&Bool<'ctx>>,
    ) {
        let body = target.iff(&self.all(lits));
        match enforce {
            Some(cond) => self.opt.assert(&cond.implies(&body)),
            None => self.opt.assert(&body),
        }
    }

    /// `target -> OR(lits)`.
    pub fn implies_any(&self, target: &Bool<'ctx>, lits: &[Bool<'ctx>]) {
        self.opt.assert(&target.implies(&self.any(lits)));
    }

    fn any_pair(&self, pairs: &[(Bool<'ctx>, Bool<'ctx>)]) -> Bool<'ctx> {
        let conjs: Vec<Bool<'ctx>> = pairs
            .iter()
            .map(|(a, b)| Bool::and(self.ctx, &[a, b]))
            .collect();
        self.any(&conjs)
    }

    /// `target <-> OR(a AND b)` over the pairs.
    pub fn iff_any_pair(&self, target: &Bool<'ctx>, pairs: &[(Bool<'ctx>, Bool<'ctx>)]) {
        self.opt.assert(&target.iff(&self.any_pair(pairs)));
    }

    /// `enforce -> (target <-> OR(a AND b))`; unconditional when `enforce`
    /// is `None`.
    pub fn iff_any_pair_under(
        &self,
        target: &Bool<'ctx>,
        pairs: &[(Bool<'ctx>, Bool<'ctx>)],
        enforce: Option<&Bool<'ctx>>,
    ) {
        let body = target.iff(&self.any_pair(pairs));
        match enforce {
            Some(cond) => self.opt.assert(&cond.implies(&body)),
            None => self.opt.assert(&body),
        }
    }

    /// `target -> OR(a AND b)` over the pairs.
    pub fn implies_any_pair(&self, target: &Bool<'ctx>, pairs: &[(Bool<'ctx>, Bool<'ctx>)]) {
        self.opt.assert(&target.implies(&self.any_pair(pairs)));
    }

    /// `target -> OR(plain) OR OR(a AND chain)` where each chained entry
    /// pairs a literal with an already-formed disjunction.
    pub fn implies_any_or_chain(
        &self,
        target: &Bool<'ctx>,
        plain: &[Bool<'ctx>],
        chained: &[(Bool<'ctx>, Bool<'ctx>)],
    ) {
        let mut arms: Vec<Bool<'ctx>> = plain.to_vec();
        arms.extend(
            chained
                .iter()
                .map(|(lit, rest)| Bool::and(self.ctx, &[lit, rest])),
        );
        self.opt.assert(&target.implies(&self.any(&arms)));
    }

    /// At most one of `lits` is true. A no-op below two literals.
    pub fn at_most_one(&self, lits: &[Bool<'ctx>]) {
        if lits.len() < 2 {
            return;
        }
        let weighted: Vec<(&Bool<'ctx>, i32)> = lits.iter().map(|l| (l, 1)).collect();
        self.opt.assert(&Bool::pb_le(self.ctx, &weighted, 1));
    }

    /// Exactly one of `lits` is true. Empty input makes the model infeasible.
    pub fn exactly_one(&self, lits: &[Bool<'ctx>]) {
        if lits.is_empty() {
            self.opt.assert(&self.constant(false));
            return;
        }
        let weighted: Vec<(&Bool<'ctx>, i32)> = lits.iter().map(|l| (l, 1)).collect();
        self.opt.assert(&Bool::pb_eq(self.ctx, &weighted, 1));
    }

    /// `weight` when `lit` holds, zero otherwise.
    pub fn weighted(&self, lit: &Bool<'ctx>, weight: i64) -> Int<'ctx> {
        lit.ite(&self.int(weight), &self.int(0))
    }

    pub fn sum(&self, terms: &[Int<'ctx>]) -> Int<'ctx> {
        if terms.is_empty() {
            return self.int(0);
        }
        let refs: Vec<&Int<'ctx>> = terms.iter().collect();
        Int::add(self.ctx, &refs)
    }

    pub fn assert_eq_int(&self, lhs: &Int<'ctx>, rhs: &Int<'ctx>) {
        self.opt.assert(&lhs._eq(rhs));
    }

    pub fn assert_le(&self, lhs: &Int<'ctx>, rhs: &Int<'ctx>) {
        self.opt.assert(&lhs.le(rhs));
    }

    pub fn assert_lt(&self, lhs: &Int<'ctx>, rhs: &Int<'ctx>) {
        self.opt.assert(&lhs.lt(rhs));
    }

    /// Conditional lower bound: `cond -> lhs >= rhs`.
    pub fn assert_ge_under(&self, cond: &Bool<'ctx>, lhs: &Int<'ctx>, rhs: &Int<'ctx>) {
        self.opt.assert(&cond.implies(&lhs.ge(rhs)));
    }

    /// Install the objective and run the solver once.
    pub fn solve(&self, objective: Objective<'ctx>) -> Solution<'ctx> {
        self.opt.maximize(&objective.into_sum(self));
        Solution::check(&self.opt)
    }

    /// Run the solver once without an objective (pure feasibility).
    pub fn solve_satisfy(&self) -> Solution<'ctx> {
        Solution::check(&self.opt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solve::SolveStatus;

    #[test]
    fn exactly_one_picks_a_single_literal() {
        let env = CpEnv::new();
        let m = ModelBuilder::new(&env);

        let lits: Vec<_> = (0..4).map(|i| m.fresh_bool(&format!("x_{i}"))).collect();
        m.exactly_one(&lits);

        let solution = m.solve_satisfy();
        assert_eq!(solution.status, SolveStatus::Optimal);
        let set = lits
            .iter()
            .filter(|l| solution.bool_value(l).unwrap())
            .count();
        assert_eq!(set, 1);
    }

    #[test]
    fn empty_exactly_one_is_infeasible() {
        let env = CpEnv::new();
        let m = ModelBuilder::new(&env);
        m.exactly_one(&[]);
        assert_eq!(m.solve_satisfy().status, SolveStatus::Infeasible);
    }

    #[test]
    fn iff_any_pair_binds_the_target() {
        let env = CpEnv::new();
        let m = ModelBuilder::new(&env);

        let target = m.fresh_bool("target");
        let a = m.fresh_bool("a");
        let b = m.fresh_bool("b");
        m.iff_any_pair(&target, &[(a.clone(), b.clone())]);
        m.assert(&a);
        m.assert(&b);

        let solution = m.solve_satisfy();
        assert_eq!(solution.status, SolveStatus::Optimal);
        assert_eq!(solution.bool_value(&target), Some(true));
    }

    #[test]
    fn objective_prefers_the_heavier_literal() {
        let env = CpEnv::new();
        let m = ModelBuilder::new(&env);

        let a = m.fresh_bool("a");
        let b = m.fresh_bool("b");
        m.at_most_one(&[a.clone(), b.clone()]);

        let mut objective = Objective::new();
        objective.term(&m, &a, 1);
        objective.term(&m, &b, 10);

        let solution = m.solve(objective);
        assert_eq!(solution.status, SolveStatus::Optimal);
        assert_eq!(solution.bool_value(&a), Some(false));
        assert_eq!(solution.bool_value(&b), Some(true));
    }

    #[test]
    fn bounded_int_respects_its_range() {
        let env = CpEnv::new();
        let m = ModelBuilder::new(&env);

        let v = m.fresh_int("v", 0, 19);
        let mut objective = Objective::new();
        objective.expr(v.clone());

        let solution = m.solve(objective);
        assert_eq!(solution.status, SolveStatus::Optimal);
        assert_eq!(solution.int_value(&v), Some(19));
    }
}
