use z3::ast::{Bool, Int};

use crate::builder::ModelBuilder;

/// An ordered list of weighted objective terms.
///
/// Planners approximate lexicographic multi-objective optimization with a
/// single weighted sum: terms are appended tier by tier, and each tier's
/// multiplier must be at least the maximum possible total contribution of
/// every tier appended before it. Keeping the terms as an explicit list (and
/// computing tier bounds up front) is what makes that magnitude relationship
/// checkable at the call sites.
#[derive(Default)]
pub struct Objective<'ctx> {
    terms: Vec<Int<'ctx>>,
}

impl<'ctx> Objective<'ctx> {
    pub fn new() -> Self {
        Self { terms: Vec::new() }
    }

    /// Add `weight` when `lit` holds. Negative weights penalize.
    pub fn term(&mut self, m: &ModelBuilder<'ctx>, lit: &Bool<'ctx>, weight: i64) {
        if weight == 0 {
            return;
        }
        self.terms.push(m.weighted(lit, weight));
    }

    /// Add `weight` when `lit` does NOT hold.
    pub fn term_not(&mut self, m: &ModelBuilder<'ctx>, lit: &Bool<'ctx>, weight: i64) {
        if weight == 0 {
            return;
        }
        self.terms.push(m.weighted(&lit.not(), weight));
    }

    /// Add an already-formed integer expression.
    pub fn expr(&mut self, expr: Int<'ctx>) {
        self.terms.push(expr);
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub(crate) fn into_sum(self, m: &ModelBuilder<'ctx>) -> Int<'ctx> {
        m.sum(&self.terms)
    }
}
