//! Arena-backed expression DAG with explicit reference counting.
//!
//! Nodes are shared-owned: common-subexpression elimination makes distinct
//! parents point at the same child, so every child edge carries a use count.
//! A node is freed exactly when its count drops from 1 to 0; the release
//! cascades into children iteratively, so arbitrarily deep chains cannot
//! overflow the call stack.

use std::collections::HashMap;

use nlforge_interval::Interval;
use smallvec::SmallVec;

use crate::types::{Curvature, ExprId, HdlrId, VarId, VarType};

/// Operator payload of a node, owned by the node's handler.
#[derive(Debug, Clone)]
pub enum ExprPayload {
    /// Leaf referencing a decision variable.
    Var {
        var: VarId,
        vtype: VarType,
        name: String,
    },
    /// Constant leaf.
    Value(f64),
    /// `constant + sum coefs[i] * child_i`
    Sum {
        constant: f64,
        coefs: SmallVec<[f64; 2]>,
    },
    /// `coef * prod child_i`
    Product { coef: f64 },
    /// `child ^ exponent`
    Pow { exponent: f64 },
    /// Operators without parameters (exp, log, abs).
    None,
}

pub(crate) type ChildVec = SmallVec<[ExprId; 2]>;

#[derive(Debug)]
pub(crate) struct ExprNode {
    pub hdlr: HdlrId,
    pub payload: ExprPayload,
    pub children: ChildVec,
    pub uses: u32,

    // point-evaluation cache
    pub evalvalue: Option<f64>,
    pub evaltag: u64,

    // reverse-mode differentiation accumulator
    pub derivative: f64,
    pub difftag: u64,

    // interval cache
    pub interval: Interval,
    pub intevaltag: u64,
    pub hastightened: bool,

    // relaxation linkage
    pub auxvar: Option<VarId>,

    // locks propagated by monotonicity
    pub nlockspos: i32,
    pub nlocksneg: i32,

    pub curvature: Curvature,
    pub integral: bool,

    // branching-score accumulator
    pub brscore: f64,
    pub brscoretag: u64,

    // separation round marker
    pub sepatag: u64,

    // reverse-propagation queue membership
    pub inqueue: bool,
}

impl ExprNode {
    fn new(hdlr: HdlrId, payload: ExprPayload, children: ChildVec) -> Self {
        ExprNode {
            hdlr,
            payload,
            children,
            uses: 1,
            evalvalue: None,
            evaltag: 0,
            derivative: 0.0,
            difftag: 0,
            interval: Interval::ENTIRE,
            intevaltag: 0,
            hastightened: false,
            auxvar: None,
            nlockspos: 0,
            nlocksneg: 0,
            curvature: Curvature::Unknown,
            integral: false,
            brscore: 0.0,
            brscoretag: 0,
            sepatag: 0,
            inqueue: false,
        }
    }
}

enum Slot {
    Occupied(ExprNode),
    Free { next: Option<u32> },
}

/// The expression arena together with the var→expression map and the
/// monotonic cache tags.
pub struct ExprStore {
    slots: Vec<Slot>,
    free_head: Option<u32>,
    live: usize,
    var_exprs: HashMap<VarId, ExprId>,

    /// Bumped per point evaluation; cached `evalvalue` is fresh iff the
    /// node's `evaltag` matches. Tag 0 is always stale.
    pub soltag: u64,
    /// Bumped per box change (interval evaluation round).
    pub boxtag: u64,
    /// Bumped per branching-score round.
    pub brscoretag: u64,
    /// Bumped per separation round.
    pub sepatag: u64,
    /// Bumped per differentiation.
    pub difftag: u64,
}

impl Default for ExprStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ExprStore {
    pub fn new() -> Self {
        ExprStore {
            slots: Vec::new(),
            free_head: None,
            live: 0,
            var_exprs: HashMap::new(),
            soltag: 0,
            boxtag: 0,
            brscoretag: 0,
            sepatag: 0,
            difftag: 0,
        }
    }

    pub(crate) fn node(&self, e: ExprId) -> &ExprNode {
        match &self.slots[e.index()] {
            Slot::Occupied(n) => n,
            Slot::Free { .. } => panic!("stale expression handle {:?}", e),
        }
    }

    pub(crate) fn node_mut(&mut self, e: ExprId) -> &mut ExprNode {
        match &mut self.slots[e.index()] {
            Slot::Occupied(n) => n,
            Slot::Free { .. } => panic!("stale expression handle {:?}", e),
        }
    }

    /// Number of live nodes; used by tests to assert leak-freedom.
    pub fn live_count(&self) -> usize {
        self.live
    }

    /// Creates a node owning one use of each child (children are captured).
    pub fn create(&mut self, hdlr: HdlrId, payload: ExprPayload, children: &[ExprId]) -> ExprId {
        for &c in children {
            self.capture(c);
        }
        let node = ExprNode::new(hdlr, payload, ChildVec::from_slice(children));
        self.insert(node)
    }

    /// Returns the unique variable-expression for `var`, creating it on
    /// first request. The extra use is handed to the caller either way.
    pub fn create_var(
        &mut self,
        hdlr: HdlrId,
        var: VarId,
        vtype: VarType,
        name: &str,
    ) -> ExprId {
        if let Some(&e) = self.var_exprs.get(&var) {
            self.capture(e);
            return e;
        }
        let node = ExprNode::new(
            hdlr,
            ExprPayload::Var {
                var,
                vtype,
                name: name.to_string(),
            },
            ChildVec::new(),
        );
        let e = self.insert(node);
        self.var_exprs.insert(var, e);
        e
    }

    /// The variable-expression for `var`, if one is live.
    pub fn var_expr(&self, var: VarId) -> Option<ExprId> {
        self.var_exprs.get(&var).copied()
    }

    /// All live variable-expressions.
    pub fn var_exprs(&self) -> impl Iterator<Item = (VarId, ExprId)> + '_ {
        self.var_exprs.iter().map(|(&v, &e)| (v, e))
    }

    fn insert(&mut self, node: ExprNode) -> ExprId {
        self.live += 1;
        match self.free_head {
            Some(idx) => {
                let next = match self.slots[idx as usize] {
                    Slot::Free { next } => next,
                    Slot::Occupied(_) => unreachable!("free list points at occupied slot"),
                };
                self.free_head = next;
                self.slots[idx as usize] = Slot::Occupied(node);
                ExprId(idx)
            }
            None => {
                self.slots.push(Slot::Occupied(node));
                ExprId((self.slots.len() - 1) as u32)
            }
        }
    }

    pub fn capture(&mut self, e: ExprId) {
        let n = self.node_mut(e);
        n.uses += 1;
    }

    /// Drops one use; on the last use frees the node and cascades into the
    /// children without recursion.
    pub fn release(&mut self, e: ExprId) {
        let mut stack = vec![e];
        while let Some(top) = stack.pop() {
            let n = self.node_mut(top);
            debug_assert!(n.uses >= 1, "releasing dead node");
            n.uses -= 1;
            if n.uses > 0 {
                continue;
            }
            if let ExprPayload::Var { var, .. } = n.payload {
                self.var_exprs.remove(&var);
            }
            let n = self.node_mut(top);
            stack.extend(n.children.drain(..));
            self.slots[top.index()] = Slot::Free {
                next: self.free_head,
            };
            self.free_head = Some(top.index() as u32);
            self.live -= 1;
        }
    }

    pub fn hdlr(&self, e: ExprId) -> HdlrId {
        self.node(e).hdlr
    }

    pub fn payload(&self, e: ExprId) -> &ExprPayload {
        &self.node(e).payload
    }

    pub fn payload_mut(&mut self, e: ExprId) -> &mut ExprPayload {
        &mut self.node_mut(e).payload
    }

    pub fn children(&self, e: ExprId) -> &[ExprId] {
        &self.node(e).children
    }

    pub fn nchildren(&self, e: ExprId) -> usize {
        self.node(e).children.len()
    }

    pub fn child(&self, e: ExprId, i: usize) -> ExprId {
        self.node(e).children[i]
    }

    pub fn uses(&self, e: ExprId) -> u32 {
        self.node(e).uses
    }

    /// Appends a child (captured). Forbidden while locks are nonzero, since
    /// the node's monotonicity data would go stale.
    pub fn append_child(&mut self, e: ExprId, child: ExprId) {
        let n = self.node(e);
        assert!(
            n.nlockspos == 0 && n.nlocksneg == 0,
            "cannot modify children of a locked expression"
        );
        self.capture(child);
        self.node_mut(e).children.push(child);
    }

    /// Replaces child `i` (new child captured, old child released).
    pub fn replace_child(&mut self, e: ExprId, i: usize, new_child: ExprId) {
        let n = self.node(e);
        assert!(
            n.nlockspos == 0 && n.nlocksneg == 0,
            "cannot modify children of a locked expression"
        );
        let old = n.children[i];
        if old == new_child {
            return;
        }
        self.capture(new_child);
        self.node_mut(e).children[i] = new_child;
        self.release(old);
    }

    // ---- cache accessors -------------------------------------------------

    pub fn eval_value(&self, e: ExprId) -> Option<f64> {
        let n = self.node(e);
        if n.evaltag != 0 && n.evaltag == self.soltag {
            n.evalvalue
        } else {
            None
        }
    }

    pub fn set_eval_value(&mut self, e: ExprId, value: Option<f64>) {
        let tag = self.soltag;
        let n = self.node_mut(e);
        n.evalvalue = value;
        n.evaltag = tag;
    }

    pub fn eval_fresh(&self, e: ExprId) -> bool {
        let n = self.node(e);
        n.evaltag != 0 && n.evaltag == self.soltag
    }

    pub fn derivative(&self, e: ExprId, tag: u64) -> Option<f64> {
        let n = self.node(e);
        if n.difftag == tag {
            Some(n.derivative)
        } else {
            None
        }
    }

    pub fn set_derivative(&mut self, e: ExprId, d: f64, tag: u64) {
        let n = self.node_mut(e);
        n.derivative = d;
        n.difftag = tag;
    }

    pub fn interval(&self, e: ExprId) -> Interval {
        self.node(e).interval
    }

    pub fn set_interval(&mut self, e: ExprId, iv: Interval) {
        let tag = self.boxtag;
        let n = self.node_mut(e);
        n.interval = iv;
        n.intevaltag = tag;
    }

    pub fn interval_fresh(&self, e: ExprId) -> bool {
        let n = self.node(e);
        n.intevaltag != 0 && n.intevaltag == self.boxtag
    }

    pub fn auxvar(&self, e: ExprId) -> Option<VarId> {
        self.node(e).auxvar
    }

    pub fn set_auxvar(&mut self, e: ExprId, v: VarId) {
        self.node_mut(e).auxvar = Some(v);
    }

    pub fn curvature(&self, e: ExprId) -> Curvature {
        self.node(e).curvature
    }

    pub fn set_curvature(&mut self, e: ExprId, c: Curvature) {
        self.node_mut(e).curvature = c;
    }

    pub fn is_integral(&self, e: ExprId) -> bool {
        self.node(e).integral
    }

    pub fn set_integral(&mut self, e: ExprId, yes: bool) {
        self.node_mut(e).integral = yes;
    }

    pub fn locks(&self, e: ExprId) -> (i32, i32) {
        let n = self.node(e);
        (n.nlockspos, n.nlocksneg)
    }

    pub(crate) fn add_locks_raw(&mut self, e: ExprId, pos: i32, neg: i32) {
        let n = self.node_mut(e);
        n.nlockspos += pos;
        n.nlocksneg += neg;
        debug_assert!(n.nlockspos >= 0 && n.nlocksneg >= 0);
    }

    pub fn has_tightened(&self, e: ExprId) -> bool {
        self.node(e).hastightened
    }

    pub fn set_has_tightened(&mut self, e: ExprId, yes: bool) {
        self.node_mut(e).hastightened = yes;
    }

    pub fn in_queue(&self, e: ExprId) -> bool {
        self.node(e).inqueue
    }

    pub fn set_in_queue(&mut self, e: ExprId, yes: bool) {
        self.node_mut(e).inqueue = yes;
    }

    /// Branching score accumulated in the round identified by `tag`.
    pub fn brscore(&self, e: ExprId, tag: u64) -> f64 {
        let n = self.node(e);
        if n.brscoretag == tag {
            n.brscore
        } else {
            0.0
        }
    }

    pub fn add_brscore(&mut self, e: ExprId, score: f64, tag: u64) {
        let n = self.node_mut(e);
        if n.brscoretag != tag {
            n.brscore = 0.0;
            n.brscoretag = tag;
        }
        n.brscore += score;
    }

    pub fn clear_brscore(&mut self, e: ExprId) {
        let n = self.node_mut(e);
        n.brscore = 0.0;
        n.brscoretag = 0;
    }

    pub fn sepa_mark(&self, e: ExprId) -> u64 {
        self.node(e).sepatag
    }

    pub fn set_sepa_mark(&mut self, e: ExprId, tag: u64) {
        self.node_mut(e).sepatag = tag;
    }

    pub fn var_of(&self, e: ExprId) -> Option<VarId> {
        match self.node(e).payload {
            ExprPayload::Var { var, .. } => Some(var),
            _ => None,
        }
    }

    pub fn var_type_of(&self, e: ExprId) -> Option<VarType> {
        match self.node(e).payload {
            ExprPayload::Var { vtype, .. } => Some(vtype),
            _ => None,
        }
    }

    pub fn value_of(&self, e: ExprId) -> Option<f64> {
        match self.node(e).payload {
            ExprPayload::Value(v) => Some(v),
            _ => None,
        }
    }
}
