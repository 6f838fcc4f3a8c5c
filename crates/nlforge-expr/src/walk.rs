//! Depth-first expression walker with four hook stages.
//!
//! The walk is driven by an explicit stack, so expression depth is bounded
//! by heap, not by the call stack, and walks may nest freely (a hook may
//! start another walk on the same store).

use crate::store::ExprStore;
use crate::types::ExprId;

/// Stage at which a hook fires during the walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkStage {
    /// The node is entered, before any child.
    Enter,
    /// About to descend into child `i`.
    VisitingChild(usize),
    /// Returned from child `i`.
    VisitedChild(usize),
    /// All children done; the node is left.
    Leave,
}

/// Hook verdict.
///
/// `Skip` is stage-dependent: from [`WalkStage::Enter`] it skips all
/// children (`Leave` still fires), from `VisitingChild(i)` it skips child
/// `i`, from `VisitedChild(i)` it skips the remaining children. `Abort`
/// terminates the walk immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkCmd {
    Continue,
    Skip,
    Abort,
}

struct Frame {
    expr: ExprId,
    next_child: usize,
}

/// Walks the DAG rooted at `root` depth-first, firing `hook` at the four
/// stages. Returns `false` when the walk was aborted.
pub fn walk<F>(store: &mut ExprStore, root: ExprId, mut hook: F) -> bool
where
    F: FnMut(&mut ExprStore, ExprId, WalkStage) -> WalkCmd,
{
    let mut stack: Vec<Frame> = Vec::new();

    match hook(store, root, WalkStage::Enter) {
        WalkCmd::Abort => return false,
        WalkCmd::Skip => {
            return hook(store, root, WalkStage::Leave) != WalkCmd::Abort;
        }
        WalkCmd::Continue => {}
    }
    stack.push(Frame {
        expr: root,
        next_child: 0,
    });

    while let Some(frame) = stack.last_mut() {
        let expr = frame.expr;
        let i = frame.next_child;

        if i >= store.nchildren(expr) {
            stack.pop();
            if hook(store, expr, WalkStage::Leave) == WalkCmd::Abort {
                return false;
            }
            // report back to the parent frame, if any
            if let Some(parent) = stack.last_mut() {
                let pi = parent.next_child - 1;
                let pexpr = parent.expr;
                match hook(store, pexpr, WalkStage::VisitedChild(pi)) {
                    WalkCmd::Abort => return false,
                    WalkCmd::Skip => {
                        stack.last_mut().unwrap().next_child = usize::MAX;
                    }
                    WalkCmd::Continue => {}
                }
            }
            continue;
        }
        frame.next_child = i + 1;

        match hook(store, expr, WalkStage::VisitingChild(i)) {
            WalkCmd::Abort => return false,
            WalkCmd::Skip => continue,
            WalkCmd::Continue => {}
        }

        let child = store.child(expr, i);
        let descend = match hook(store, child, WalkStage::Enter) {
            WalkCmd::Abort => return false,
            WalkCmd::Skip => false,
            WalkCmd::Continue => true,
        };
        if descend && store.nchildren(child) > 0 {
            stack.push(Frame {
                expr: child,
                next_child: 0,
            });
            continue;
        }
        if hook(store, child, WalkStage::Leave) == WalkCmd::Abort {
            return false;
        }
        match hook(store, expr, WalkStage::VisitedChild(i)) {
            WalkCmd::Abort => return false,
            WalkCmd::Skip => {
                // skip the remaining children of `expr`
                let frame = stack.last_mut().unwrap();
                frame.next_child = usize::MAX;
            }
            WalkCmd::Continue => {}
        }
    }
    true
}

/// Unique nodes of the DAG in post-order (children before parents, each
/// node once). The backbone of evaluation, simplification, and hashing.
pub fn post_order(store: &ExprStore, root: ExprId) -> Vec<ExprId> {
    let mut order = Vec::new();
    let mut seen = std::collections::HashSet::new();
    let mut stack: Vec<(ExprId, usize)> = vec![(root, 0)];
    seen.insert(root);
    while let Some(&mut (expr, ref mut next)) = stack.last_mut() {
        let children = store.children(expr);
        if *next < children.len() {
            let child = children[*next];
            *next += 1;
            if seen.insert(child) {
                stack.push((child, 0));
            }
        } else {
            order.push(expr);
            stack.pop();
        }
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ExprPayload;
    use crate::types::HdlrId;

    fn leaf(store: &mut ExprStore, v: f64) -> ExprId {
        store.create(HdlrId(0), ExprPayload::Value(v), &[])
    }

    fn build_tree(store: &mut ExprStore) -> (ExprId, ExprId, ExprId, ExprId) {
        let a = leaf(store, 1.0);
        let b = leaf(store, 2.0);
        let inner = store.create(HdlrId(1), ExprPayload::None, &[a, b]);
        let root = store.create(HdlrId(1), ExprPayload::None, &[inner, a]);
        (root, inner, a, b)
    }

    #[test]
    fn full_walk_fires_all_stages() {
        let mut store = ExprStore::new();
        let (root, inner, a, b) = build_tree(&mut store);
        let mut log = Vec::new();
        walk(&mut store, root, |_, e, stage| {
            log.push((e, stage));
            WalkCmd::Continue
        });
        // shared node `a` is entered twice, through both parents
        let enters = log
            .iter()
            .filter(|(_, s)| *s == WalkStage::Enter)
            .map(|(e, _)| *e)
            .collect::<Vec<_>>();
        assert_eq!(enters, vec![root, inner, a, b, a]);
        let leaves = log
            .iter()
            .filter(|(_, s)| *s == WalkStage::Leave)
            .count();
        assert_eq!(leaves, 5);
        for e in [root, inner, a, b] {
            let _ = e;
        }
        store.release(root);
        store.release(inner);
        store.release(a);
        store.release(b);
        assert_eq!(store.live_count(), 0);
    }

    #[test]
    fn skip_on_enter_skips_children_but_leaves() {
        let mut store = ExprStore::new();
        let (root, inner, a, b) = build_tree(&mut store);
        let mut entered = Vec::new();
        let mut left = Vec::new();
        walk(&mut store, root, |_, e, stage| match stage {
            WalkStage::Enter => {
                entered.push(e);
                if e == inner {
                    WalkCmd::Skip
                } else {
                    WalkCmd::Continue
                }
            }
            WalkStage::Leave => {
                left.push(e);
                WalkCmd::Continue
            }
            _ => WalkCmd::Continue,
        });
        assert!(!entered.contains(&b));
        assert!(left.contains(&inner));
        store.release(root);
        store.release(inner);
        store.release(a);
        store.release(b);
    }

    #[test]
    fn abort_stops_immediately() {
        let mut store = ExprStore::new();
        let (root, inner, a, b) = build_tree(&mut store);
        let mut count = 0;
        let finished = walk(&mut store, root, |_, _, stage| {
            if stage == WalkStage::Enter {
                count += 1;
                if count == 2 {
                    return WalkCmd::Abort;
                }
            }
            WalkCmd::Continue
        });
        assert!(!finished);
        assert_eq!(count, 2);
        store.release(root);
        store.release(inner);
        store.release(a);
        store.release(b);
    }

    #[test]
    fn post_order_lists_each_node_once() {
        let mut store = ExprStore::new();
        let (root, inner, a, b) = build_tree(&mut store);
        let order = post_order(&store, root);
        assert_eq!(order.len(), 4);
        assert_eq!(*order.last().unwrap(), root);
        let pos = |e| order.iter().position(|&x| x == e).unwrap();
        assert!(pos(a) < pos(inner));
        assert!(pos(b) < pos(inner));
        assert!(pos(inner) < pos(root));
        store.release(root);
        store.release(inner);
        store.release(a);
        store.release(b);
    }
}
