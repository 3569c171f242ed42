//! Natural-loop analysis over a function's control flow graph.
//!
//! The instrumentation pass needs two facts per function: the loop forest
//! (outermost loops and their nesting) and the innermost loop containing each
//! block. Both are computed from back edges over the dominator tree:
//! an edge `latch -> header` is a back edge iff `header` dominates `latch`,
//! and the natural loop of that edge is every block that reaches the latch
//! without passing through the header.
//!
//! All orderings are derived from block layout order; nothing here hashes.

use indexmap::{IndexMap, IndexSet};

use crate::ir::{BlockRef, Function};

/// Index of a loop within its function's [`LoopForest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LoopRef(pub u32);

/// One natural loop: its header, its blocks, and its place in the forest.
#[derive(Debug, Clone)]
pub struct NaturalLoop {
    pub header: BlockRef,
    /// Every block of the loop, header included.
    pub blocks: IndexSet<BlockRef>,
    pub parent: Option<LoopRef>,
    pub children: Vec<LoopRef>,
}

/// The loop forest of one function.
#[derive(Debug, Clone, Default)]
pub struct LoopForest {
    loops: Vec<NaturalLoop>,
    top_level: Vec<LoopRef>,
    innermost: IndexMap<BlockRef, LoopRef>,
}

impl LoopForest {
    /// Compute the forest for a defined function.
    pub fn compute(func: &Function) -> Self {
        let block_count = func.blocks.len();
        if block_count == 0 {
            return Self::default();
        }

        let successors: Vec<Vec<usize>> = func
            .blocks
            .iter()
            .map(|b| b.successors().iter().map(|s| s.0 as usize).collect())
            .collect();

        let mut predecessors: Vec<Vec<usize>> = vec![Vec::new(); block_count];
        for (from, succs) in successors.iter().enumerate() {
            for &to in succs {
                predecessors[to].push(from);
            }
        }

        let (postorder, rpo_index) = postorder_from_entry(&successors);
        let idom = compute_idoms(&postorder, &rpo_index, &predecessors);

        // Collect back edges, merging loops that share a header.
        let mut headers: IndexMap<usize, IndexSet<usize>> = IndexMap::new();
        for (from, succs) in successors.iter().enumerate() {
            if rpo_index[from].is_none() {
                continue;
            }
            for &to in succs {
                if dominates(to, from, &idom) {
                    let body = headers.entry(to).or_default();
                    collect_natural_loop(to, from, &predecessors, body);
                }
            }
        }

        // One loop per header, ordered by header layout position.
        let mut header_order: Vec<usize> = headers.keys().copied().collect();
        header_order.sort_unstable();
        let mut loops: Vec<NaturalLoop> = header_order
            .iter()
            .map(|&h| {
                let mut blocks: Vec<usize> = headers[&h].iter().copied().collect();
                blocks.sort_unstable();
                NaturalLoop {
                    header: BlockRef(h as u32),
                    blocks: blocks.into_iter().map(|b| BlockRef(b as u32)).collect(),
                    parent: None,
                    children: Vec::new(),
                }
            })
            .collect();

        // Parent of L: the smallest other loop containing L's header.
        for i in 0..loops.len() {
            let mut parent: Option<usize> = None;
            for (j, candidate) in loops.iter().enumerate() {
                if i == j || !candidate.blocks.contains(&loops[i].header) {
                    continue;
                }
                if candidate.header == loops[i].header {
                    continue;
                }
                match parent {
                    Some(p) if loops[p].blocks.len() <= candidate.blocks.len() => {}
                    _ => parent = Some(j),
                }
            }
            loops[i].parent = parent.map(|p| LoopRef(p as u32));
        }

        let mut top_level = Vec::new();
        for i in 0..loops.len() {
            let parent = loops[i].parent;
            match parent {
                Some(p) => loops[p.0 as usize].children.push(LoopRef(i as u32)),
                None => top_level.push(LoopRef(i as u32)),
            }
        }

        // Innermost loop per block: smallest containing loop wins.
        let mut innermost: IndexMap<BlockRef, LoopRef> = IndexMap::new();
        let mut by_size: Vec<usize> = (0..loops.len()).collect();
        by_size.sort_by_key(|&i| loops[i].blocks.len());
        for &i in &by_size {
            for &block in &loops[i].blocks {
                innermost.entry(block).or_insert(LoopRef(i as u32));
            }
        }

        Self {
            loops,
            top_level,
            innermost,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.loops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.loops.len()
    }

    /// Outermost loops, ordered by header layout position.
    pub fn top_level(&self) -> &[LoopRef] {
        &self.top_level
    }

    pub fn children(&self, l: LoopRef) -> &[LoopRef] {
        &self.loops[l.0 as usize].children
    }

    pub fn header(&self, l: LoopRef) -> BlockRef {
        self.loops[l.0 as usize].header
    }

    pub fn blocks(&self, l: LoopRef) -> &IndexSet<BlockRef> {
        &self.loops[l.0 as usize].blocks
    }

    /// The innermost loop containing `block`, if any.
    pub fn innermost(&self, block: BlockRef) -> Option<LoopRef> {
        self.innermost.get(&block).copied()
    }

    /// The loop headed by `block`, if `block` is a loop header.
    pub fn loop_with_header(&self, block: BlockRef) -> Option<LoopRef> {
        self.loops
            .iter()
            .position(|l| l.header == block)
            .map(|i| LoopRef(i as u32))
    }
}

/// DFS postorder over blocks reachable from the entry, plus each block's
/// reverse-postorder number (`None` for unreachable blocks).
fn postorder_from_entry(successors: &[Vec<usize>]) -> (Vec<usize>, Vec<Option<usize>>) {
    let mut postorder = Vec::with_capacity(successors.len());
    let mut visited = vec![false; successors.len()];
    // Explicit stack: (block, next successor index).
    let mut stack = vec![(0usize, 0usize)];
    visited[0] = true;
    while let Some(frame) = stack.last_mut() {
        let (block, next) = *frame;
        if next < successors[block].len() {
            frame.1 += 1;
            let succ = successors[block][next];
            if !visited[succ] {
                visited[succ] = true;
                stack.push((succ, 0));
            }
        } else {
            stack.pop();
            postorder.push(block);
        }
    }

    let mut rpo_index = vec![None; successors.len()];
    for (i, &block) in postorder.iter().rev().enumerate() {
        rpo_index[block] = Some(i);
    }
    (postorder, rpo_index)
}

/// Iterative immediate-dominator computation (Cooper-Harvey-Kennedy).
fn compute_idoms(
    postorder: &[usize],
    rpo_index: &[Option<usize>],
    predecessors: &[Vec<usize>],
) -> Vec<Option<usize>> {
    let entry = 0usize;
    let mut idom: Vec<Option<usize>> = vec![None; predecessors.len()];
    idom[entry] = Some(entry);

    let mut changed = true;
    while changed {
        changed = false;
        for &block in postorder.iter().rev() {
            if block == entry {
                continue;
            }
            let mut new_idom: Option<usize> = None;
            for &pred in &predecessors[block] {
                if idom[pred].is_none() {
                    continue;
                }
                new_idom = Some(match new_idom {
                    None => pred,
                    Some(current) => intersect(pred, current, &idom, rpo_index),
                });
            }
            if new_idom.is_some() && idom[block] != new_idom {
                idom[block] = new_idom;
                changed = true;
            }
        }
    }
    idom
}

fn intersect(
    mut a: usize,
    mut b: usize,
    idom: &[Option<usize>],
    rpo_index: &[Option<usize>],
) -> usize {
    let rpo = |n: usize| rpo_index[n].unwrap_or(usize::MAX);
    while a != b {
        while rpo(a) > rpo(b) {
            a = idom[a].expect("processed block has an idom");
        }
        while rpo(b) > rpo(a) {
            b = idom[b].expect("processed block has an idom");
        }
    }
    a
}

/// Whether `a` dominates `b`. Unreachable blocks dominate nothing.
fn dominates(a: usize, b: usize, idom: &[Option<usize>]) -> bool {
    if idom[b].is_none() {
        return false;
    }
    let mut current = b;
    loop {
        if current == a {
            return true;
        }
        let next = match idom[current] {
            Some(n) => n,
            None => return false,
        };
        if next == current {
            return a == current;
        }
        current = next;
    }
}

/// Add to `body` every block of the natural loop of back edge `latch -> header`.
fn collect_natural_loop(
    header: usize,
    latch: usize,
    predecessors: &[Vec<usize>],
    body: &mut IndexSet<usize>,
) {
    body.insert(header);
    let mut worklist = Vec::new();
    if body.insert(latch) {
        worklist.push(latch);
    }
    while let Some(block) = worklist.pop() {
        for &pred in &predecessors[block] {
            if body.insert(pred) {
                worklist.push(pred);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{FunctionBuilder, IcmpPred, Operand, Signature, Ty};

    /// entry -> header; header -> body | exit; body -> header
    fn single_loop_function() -> Function {
        let mut b = FunctionBuilder::new("f", Signature::new(vec![Ty::Int(32)], Ty::Void));
        let header = b.add_block("header");
        let body = b.add_block("body");
        let exit = b.add_block("exit");
        b.br(header);
        b.switch_to(header);
        let cond = b.icmp(IcmpPred::Sgt, b.param(0), Operand::const_i32(0));
        b.cond_br(cond, body, exit);
        b.switch_to(body);
        b.br(header);
        b.switch_to(exit);
        b.ret(None);
        b.finish()
    }

    #[test]
    fn test_single_loop() {
        let func = single_loop_function();
        let forest = LoopForest::compute(&func);

        assert_eq!(forest.len(), 1);
        let l = forest.top_level()[0];
        assert_eq!(forest.header(l), BlockRef(1));
        assert!(forest.blocks(l).contains(&BlockRef(1)));
        assert!(forest.blocks(l).contains(&BlockRef(2)));
        assert!(!forest.blocks(l).contains(&BlockRef(0)));
        assert!(!forest.blocks(l).contains(&BlockRef(3)));

        assert_eq!(forest.innermost(BlockRef(2)), Some(l));
        assert_eq!(forest.innermost(BlockRef(0)), None);
        assert_eq!(forest.loop_with_header(BlockRef(1)), Some(l));
        assert_eq!(forest.loop_with_header(BlockRef(2)), None);
    }

    #[test]
    fn test_nested_loops() {
        // entry -> outer; outer -> inner | exit; inner -> inner | outer
        let mut b = FunctionBuilder::new("g", Signature::new(vec![Ty::Int(1)], Ty::Void));
        let outer = b.add_block("outer");
        let inner = b.add_block("inner");
        let exit = b.add_block("exit");
        b.br(outer);
        b.switch_to(outer);
        b.cond_br(b.param(0), inner, exit);
        b.switch_to(inner);
        b.cond_br(b.param(0), inner, outer);
        b.switch_to(exit);
        b.ret(None);
        let func = b.finish();

        let forest = LoopForest::compute(&func);
        assert_eq!(forest.len(), 2);
        assert_eq!(forest.top_level().len(), 1);

        let outer_loop = forest.top_level()[0];
        assert_eq!(forest.header(outer_loop), BlockRef(1));
        assert_eq!(forest.children(outer_loop).len(), 1);

        let inner_loop = forest.children(outer_loop)[0];
        assert_eq!(forest.header(inner_loop), BlockRef(2));

        // The inner block belongs to both loops; the inner one wins.
        assert_eq!(forest.innermost(BlockRef(2)), Some(inner_loop));
        assert_eq!(forest.innermost(BlockRef(1)), Some(outer_loop));
    }

    #[test]
    fn test_straight_line_has_no_loops() {
        let mut b = FunctionBuilder::new("h", Signature::new(vec![], Ty::Void));
        b.ret(None);
        let forest = LoopForest::compute(&b.finish());
        assert!(forest.is_empty());
        assert_eq!(forest.top_level().len(), 0);
    }

    #[test]
    fn test_sibling_loops_ordered_by_header() {
        // entry -> a; a -> a | b; b -> b | exit
        let mut b = FunctionBuilder::new("s", Signature::new(vec![Ty::Int(1)], Ty::Void));
        let a = b.add_block("a");
        let bb = b.add_block("b");
        let exit = b.add_block("exit");
        b.br(a);
        b.switch_to(a);
        b.cond_br(b.param(0), a, bb);
        b.switch_to(bb);
        b.cond_br(b.param(0), bb, exit);
        b.switch_to(exit);
        b.ret(None);
        let func = b.finish();

        let forest = LoopForest::compute(&func);
        assert_eq!(forest.len(), 2);
        assert_eq!(forest.top_level().len(), 2);
        assert_eq!(forest.header(forest.top_level()[0]), BlockRef(1));
        assert_eq!(forest.header(forest.top_level()[1]), BlockRef(2));
    }
}
