//! Elastic binary trees over byte-string keys of a uniform length.
//!
//! The shape is the scalar variant's, with three twists dictated by
//! variable-width keys:
//!
//! * Child references are tagged with the role they reach a record in, leaf
//!   or branch. Parent references carry the side they are attached on, so
//!   climbing needs no comparisons.
//! * A branch stores the number of leading bits its two subtrees share
//!   (rather than a position counted from the low end), so the shared count
//!   strictly grows from the root down. Descent at a branch sharing `n` bits
//!   routes on bit `n` of the query, MSB-first, which yields lexicographic
//!   order over unsigned bytes.
//! * Equal keys cannot be threaded on a cheap list (each record carries its
//!   own key bytes), so duplicates form a degenerate subtree below an anchor
//!   branch whose bit count is negative. Spine positions count down from −1;
//!   insertion reuses a gap left by a deletion before growing the spine, and
//!   a fresh copy always lands right of the existing ones, preserving
//!   insertion order.
//!
//! A tree may be created unique, in which case inserting a key already
//! present returns the resident record and changes nothing.

use alloc::vec::Vec;
use core::cmp::Ordering;

use crate::bits::{bit_at, cmp_bit, equal_bits};
use crate::{NodeId, LEFT, RIGHT, ROOT};

/// A child reference, tagged with the role it reaches the record in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ref {
    Leaf(NodeId),
    Branch(NodeId),
}

/// An upward reference: the node whose branch slot holds us, and the side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Parent {
    node: NodeId,
    side: usize,
}

#[derive(Clone)]
struct Node {
    /// Position holding this record as a leaf. `None` while unlinked.
    leaf_p: Option<Parent>,
    /// Position holding this record as a branch. `None` while the branch
    /// role is unused.
    node_p: Option<Parent>,
    /// Children of the branch role.
    branch: [Option<Ref>; 2],
    /// Count of leading bits shared by the two subtrees; negative within a
    /// duplicate subtree. Meaningless while the branch role is unused.
    bit: i32,
}

/// An ordered container keyed by byte strings of one fixed length.
///
/// The key length is set at construction and every inserted key must match
/// it. Iteration yields keys in lexicographic order by unsigned byte,
/// duplicates of a key in insertion order.
#[derive(Clone)]
pub struct BytesTree {
    nodes: Vec<Node>,
    /// Every slot's key bytes, flat, `key_len` apiece.
    keys: Vec<u8>,
    key_len: usize,
    unique: bool,
    free: Vec<NodeId>,
}

impl BytesTree {
    /// Create an empty tree for keys of `key_len` bytes.
    pub fn new(key_len: usize) -> Self {
        Self::with_uniqueness(key_len, false)
    }

    /// Create an empty tree for keys of `key_len` bytes which rejects
    /// duplicate keys: inserting a key already present returns the resident
    /// record.
    pub fn new_unique(key_len: usize) -> Self {
        Self::with_uniqueness(key_len, true)
    }

    fn with_uniqueness(key_len: usize, unique: bool) -> Self {
        let root = Node {
            leaf_p: None,
            node_p: None,
            branch: [None, None],
            bit: 0,
        };
        let mut keys = Vec::new();
        keys.resize(key_len, 0);
        BytesTree {
            nodes: alloc::vec![root],
            keys,
            key_len,
            unique,
            free: Vec::new(),
        }
    }

    /// The key length this tree was created with, in bytes.
    pub fn key_len(&self) -> usize {
        self.key_len
    }

    /// Whether the tree rejects duplicate keys.
    pub fn is_unique(&self) -> bool {
        self.unique
    }

    /// Whether the tree holds no records.
    pub fn is_empty(&self) -> bool {
        self.node(ROOT).branch[LEFT].is_none()
    }

    /// The key stored in a record.
    pub fn key(&self, id: NodeId) -> &[u8] {
        let start = id.index() * self.key_len;
        &self.keys[start..start + self.key_len]
    }

    /// The leftmost record, or `None` on an empty tree.
    pub fn first(&self) -> Option<NodeId> {
        self.walk_down(self.node(ROOT).branch[LEFT], LEFT)
    }

    /// The rightmost record, or `None` on an empty tree.
    pub fn last(&self) -> Option<NodeId> {
        self.walk_down(self.node(ROOT).branch[LEFT], RIGHT)
    }

    /// The in-order successor of a record currently in the tree.
    pub fn next(&self, id: NodeId) -> Option<NodeId> {
        let mut pos = self.node(id).leaf_p?;
        while pos.side == RIGHT {
            pos = self
                .node(pos.node)
                .node_p
                .expect("right subtrees never hang off the root");
        }
        if pos.node == ROOT {
            return None;
        }
        self.walk_down(self.node(pos.node).branch[RIGHT], LEFT)
    }

    /// The in-order predecessor of a record currently in the tree.
    pub fn prev(&self, id: NodeId) -> Option<NodeId> {
        let mut pos = self.node(id).leaf_p?;
        while pos.side == LEFT {
            if pos.node == ROOT {
                return None;
            }
            pos = self
                .node(pos.node)
                .node_p
                .expect("linked branches have a parent");
        }
        self.walk_down(self.node(pos.node).branch[LEFT], RIGHT)
    }

    /// The first record with a key strictly greater than this record's key.
    ///
    /// Climbs past duplicate branches, whose right side repeats the key.
    pub fn next_unique(&self, id: NodeId) -> Option<NodeId> {
        let mut pos = self.node(id).leaf_p?;
        loop {
            if pos.side == RIGHT {
                pos = self
                    .node(pos.node)
                    .node_p
                    .expect("right subtrees never hang off the root");
            } else if pos.node == ROOT {
                return None;
            } else if self.node(pos.node).bit >= 0 {
                return self.walk_down(self.node(pos.node).branch[RIGHT], LEFT);
            } else {
                pos = self
                    .node(pos.node)
                    .node_p
                    .expect("linked branches have a parent");
            }
        }
    }

    /// The last record with a key strictly smaller than this record's key.
    pub fn prev_unique(&self, id: NodeId) -> Option<NodeId> {
        let mut pos = self.node(id).leaf_p?;
        loop {
            if pos.side == LEFT {
                if pos.node == ROOT {
                    return None;
                }
                pos = self
                    .node(pos.node)
                    .node_p
                    .expect("linked branches have a parent");
            } else if self.node(pos.node).bit >= 0 {
                return self.walk_down(self.node(pos.node).branch[LEFT], RIGHT);
            } else {
                pos = self
                    .node(pos.node)
                    .node_p
                    .expect("linked branches have a parent");
            }
        }
    }

    /// Find the first record holding `key`, or `None`.
    pub fn lookup(&self, key: &[u8]) -> Option<NodeId> {
        assert_eq!(key.len(), self.key_len, "key length differs from the tree's");
        let mut cur = self.node(ROOT).branch[LEFT]?;
        let mut known = 0usize;
        loop {
            match cur {
                Ref::Leaf(id) => {
                    return if self.key(id) == key { Some(id) } else { None };
                }
                Ref::Branch(id) => {
                    let bit = self.node(id).bit;
                    if bit < 0 {
                        // Duplicate subtree: every leaf below carries this
                        // node's key, the first copy being the leftmost.
                        if self.key(id) != key {
                            return None;
                        }
                        return self.walk_down(self.node(id).branch[LEFT], LEFT);
                    }
                    let bit = bit as usize;
                    known = equal_bits(key, self.key(id), known, bit);
                    if known < bit {
                        return None;
                    }
                    let side = bit_at(key, bit) as usize;
                    cur = self.node(id).branch[side].expect("linked branches carry two children");
                }
            }
        }
    }

    /// Insert a record holding `key` and return its id.
    ///
    /// On a unique tree, a key already present is not inserted again; the
    /// resident record's id is returned instead.
    pub fn insert(&mut self, key: &[u8]) -> NodeId {
        assert_eq!(key.len(), self.key_len, "key length differs from the tree's");
        let len = self.key_len * 8;

        let Some(mut cur) = self.node(ROOT).branch[LEFT] else {
            let new = self.alloc(key);
            self.node_mut(new).leaf_p = Some(Parent {
                node: ROOT,
                side: LEFT,
            });
            self.node_mut(ROOT).branch[LEFT] = Some(Ref::Leaf(new));
            return new;
        };

        // `pos` is the branch slot `cur` was read from; the record spliced
        // in takes that slot, with the displaced subtree below it.
        let mut pos = Parent {
            node: ROOT,
            side: LEFT,
        };
        let mut known = 0usize;

        loop {
            match cur {
                Ref::Leaf(old) => {
                    known = equal_bits(key, self.key(old), known, len);
                    let ord = cmp_bit(key, self.key(old), known);
                    if ord == Ordering::Equal && self.unique {
                        return old;
                    }
                    let new = self.alloc(key);
                    let displaced = self.node(old).leaf_p;
                    self.node_mut(new).node_p = displaced;
                    if ord == Ordering::Less {
                        self.node_mut(new).leaf_p = Some(Parent {
                            node: new,
                            side: LEFT,
                        });
                        self.node_mut(old).leaf_p = Some(Parent {
                            node: new,
                            side: RIGHT,
                        });
                        self.node_mut(new).branch =
                            [Some(Ref::Leaf(new)), Some(Ref::Leaf(old))];
                    } else {
                        // equal keys also land right, becoming the second
                        // copy below a fresh duplicate anchor
                        self.node_mut(old).leaf_p = Some(Parent {
                            node: new,
                            side: LEFT,
                        });
                        self.node_mut(new).leaf_p = Some(Parent {
                            node: new,
                            side: RIGHT,
                        });
                        self.node_mut(new).branch =
                            [Some(Ref::Leaf(old)), Some(Ref::Leaf(new))];
                    }
                    self.node_mut(new).bit = if ord == Ordering::Equal {
                        -1
                    } else {
                        known as i32
                    };
                    self.node_mut(pos.node).branch[pos.side] = Some(Ref::Branch(new));
                    return new;
                }
                Ref::Branch(old) => {
                    let old_bit = self.node(old).bit;
                    let splice_here = if old_bit < 0 {
                        // a duplicate subtree must be compared to the end;
                        // whatever the outcome, we insert at or above it
                        known = equal_bits(key, self.key(old), known, len);
                        true
                    } else {
                        // comparing past this branch's count is fine: as
                        // long as the bits match we descend the right side
                        if known < old_bit as usize {
                            known = equal_bits(key, self.key(old), known, old_bit as usize);
                        }
                        known < old_bit as usize
                    };

                    if !splice_here {
                        pos = Parent {
                            node: old,
                            side: bit_at(key, old_bit as usize) as usize,
                        };
                        cur = self.node(old).branch[pos.side]
                            .expect("linked branches carry two children");
                        continue;
                    }

                    match cmp_bit(key, self.key(old), known) {
                        Ordering::Equal => {
                            // the key matches a whole duplicate subtree
                            let new = self.alloc(key);
                            return self.insert_dup(old, new);
                        }
                        ord => {
                            let new = self.alloc(key);
                            let displaced = self.node(old).node_p;
                            self.node_mut(new).node_p = displaced;
                            if ord == Ordering::Less {
                                self.node_mut(new).leaf_p = Some(Parent {
                                    node: new,
                                    side: LEFT,
                                });
                                self.node_mut(old).node_p = Some(Parent {
                                    node: new,
                                    side: RIGHT,
                                });
                                self.node_mut(new).branch =
                                    [Some(Ref::Leaf(new)), Some(Ref::Branch(old))];
                            } else {
                                self.node_mut(old).node_p = Some(Parent {
                                    node: new,
                                    side: LEFT,
                                });
                                self.node_mut(new).leaf_p = Some(Parent {
                                    node: new,
                                    side: RIGHT,
                                });
                                self.node_mut(new).branch =
                                    [Some(Ref::Branch(old)), Some(Ref::Leaf(new))];
                            }
                            self.node_mut(new).bit = known as i32;
                            self.node_mut(pos.node).branch[pos.side] = Some(Ref::Branch(new));
                            return new;
                        }
                    }
                }
            }
        }
    }

    /// Remove a record currently in the tree and release its slot.
    ///
    /// Returns whether the tree still holds records afterwards.
    pub fn delete(&mut self, id: NodeId) -> bool {
        let Some(at) = self.node(id).leaf_p else {
            return !self.is_empty();
        };
        let parent = at.node;

        if parent == ROOT {
            // the whole tree is this one leaf
            self.node_mut(ROOT).branch[LEFT] = None;
        } else {
            // Free the parent branch by reparenting our sibling one level
            // up. Clearing the parent's upward reference may mark the
            // deleted record's own branch unused at the same time, which
            // the donation check below relies on.
            let up = self
                .node(parent)
                .node_p
                .expect("non-root branches have a parent");
            let sibling = self.node(parent).branch[at.side ^ 1]
                .expect("linked branches carry two children");
            self.node_mut(up.node).branch[up.side] = Some(sibling);
            match sibling {
                Ref::Leaf(s) => self.node_mut(s).leaf_p = Some(up),
                Ref::Branch(s) => self.node_mut(s).node_p = Some(up),
            }
            self.node_mut(parent).node_p = None;

            if let Some(lent) = self.node(id).node_p {
                // The deleted record lent its branch elsewhere; the freed
                // parent takes the role over. It sits below the lent
                // branch, so its key serves future bit tests unchanged.
                let (branch, bit) = {
                    let node = self.node(id);
                    (node.branch, node.bit)
                };
                {
                    let node = self.node_mut(parent);
                    node.node_p = Some(lent);
                    node.branch = branch;
                    node.bit = bit;
                }
                self.node_mut(lent.node).branch[lent.side] = Some(Ref::Branch(parent));
                for side in [LEFT, RIGHT] {
                    match self.node(parent).branch[side]
                        .expect("linked branches carry two children")
                    {
                        Ref::Leaf(c) => {
                            self.node_mut(c).leaf_p = Some(Parent { node: parent, side })
                        }
                        Ref::Branch(c) => {
                            self.node_mut(c).node_p = Some(Parent { node: parent, side })
                        }
                    }
                }
            }
        }

        self.node_mut(id).leaf_p = None;
        let nonempty = self.node(ROOT).branch[LEFT].is_some();
        self.release(id);
        nonempty
    }

    /// Walk the tree in order, yielding record ids.
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            tree: self,
            next: self.first(),
        }
    }

    /// Add a record to a duplicate subtree reached at its topmost branch.
    ///
    /// The right spine is scanned for a gap in the count sequence (left by
    /// a deletion); the insertion reuses the gap closest to the bottom, or
    /// grows the subtree upward when there is none. Either way the fresh
    /// leaf lands right of every existing copy.
    fn insert_dup(&mut self, top: NodeId, new: NodeId) -> NodeId {
        let mut sub = top;
        let mut head = top;

        let bottom = loop {
            match self.node(head).branch[RIGHT].expect("linked branches carry two children") {
                Ref::Leaf(leaf) => break leaf,
                Ref::Branch(next) => {
                    let last_bit = self.node(head).bit;
                    head = next;
                    if self.node(head).bit > last_bit + 1 {
                        sub = head;
                    }
                }
            }
        };

        if self.node(head).bit < -1 {
            // a gap sits right above the bottom leaf; fill it
            let displaced = self.node(bottom).leaf_p;
            self.node_mut(new).bit = -1;
            self.node_mut(new).node_p = displaced;
            self.node_mut(new).leaf_p = Some(Parent {
                node: new,
                side: RIGHT,
            });
            self.node_mut(bottom).leaf_p = Some(Parent {
                node: new,
                side: LEFT,
            });
            self.node_mut(new).branch = [Some(Ref::Leaf(bottom)), Some(Ref::Leaf(new))];
            self.node_mut(head).branch[RIGHT] = Some(Ref::Branch(new));
        } else {
            // No gap before the bottom: insert above `sub`, which is only
            // guaranteed to hang right of its parent when it is not the
            // subtree's top.
            let up = self
                .node(sub)
                .node_p
                .expect("duplicate branches have a parent");
            let below = self.node(sub).bit;
            self.node_mut(new).bit = below - 1;
            self.node_mut(new).node_p = Some(up);
            self.node_mut(new).leaf_p = Some(Parent {
                node: new,
                side: RIGHT,
            });
            self.node_mut(sub).node_p = Some(Parent {
                node: new,
                side: LEFT,
            });
            self.node_mut(new).branch = [Some(Ref::Branch(sub)), Some(Ref::Leaf(new))];
            self.node_mut(up.node).branch[up.side] = Some(Ref::Branch(new));
        }
        new
    }

    fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.index()]
    }

    /// Follow `side` from `start` until the reference resolves as a leaf.
    fn walk_down(&self, start: Option<Ref>, side: usize) -> Option<NodeId> {
        let mut cur = start?;
        loop {
            match cur {
                Ref::Leaf(id) => return Some(id),
                Ref::Branch(id) => {
                    cur = self.node(id).branch[side].expect("linked branches carry two children")
                }
            }
        }
    }

    fn alloc(&mut self, key: &[u8]) -> NodeId {
        let unused = Node {
            leaf_p: None,
            node_p: None,
            branch: [None, None],
            bit: 0,
        };
        let id = match self.free.pop() {
            Some(id) => id,
            None => {
                let id = NodeId::from_index(self.nodes.len());
                self.nodes.push(unused);
                self.keys.extend_from_slice(key);
                return id;
            }
        };
        *self.node_mut(id) = unused;
        let start = id.index() * self.key_len;
        self.keys[start..start + self.key_len].copy_from_slice(key);
        id
    }

    fn release(&mut self, id: NodeId) {
        self.free.push(id);
    }
}

/// In-order iterator over the records of a [`BytesTree`].
pub struct Iter<'a> {
    tree: &'a BytesTree,
    next: Option<NodeId>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let cur = self.next?;
        self.next = self.tree.next(cur);
        Some(cur)
    }
}

#[cfg(test)]
impl BytesTree {
    /// Walk the whole structure and assert every structural invariant.
    fn check_invariants(&self) {
        assert!(
            self.node(ROOT).branch[RIGHT].is_none(),
            "the root's right slot carries nothing"
        );
        if let Some(entry) = self.node(ROOT).branch[LEFT] {
            self.check_child(
                Parent {
                    node: ROOT,
                    side: LEFT,
                },
                entry,
            );
        }
    }

    fn check_child(&self, from: Parent, child: Ref) {
        let id = match child {
            Ref::Leaf(id) => {
                assert_eq!(self.node(id).leaf_p, Some(from), "leaf parent mismatch");
                return;
            }
            Ref::Branch(id) => id,
        };

        let node = self.node(id);
        assert_eq!(node.node_p, Some(from), "branch parent mismatch");
        let left = node.branch[LEFT].expect("linked branches carry two children");
        let right = node.branch[RIGHT].expect("linked branches carry two children");
        assert_ne!(left, right, "the two children of a branch are distinct");

        if node.bit >= 0 {
            let bit = node.bit as usize;
            if from.node != ROOT {
                let above = self.node(from.node).bit;
                assert!(above >= 0, "a real branch below a duplicate branch");
                assert!(node.bit > above, "shared counts must grow downward");
            }
            for (side, sub) in [(LEFT, left), (RIGHT, right)] {
                for leaf in self.subtree_leaves(sub) {
                    let key = self.key(leaf);
                    assert_eq!(
                        equal_bits(key, self.key(id), 0, bit),
                        bit,
                        "subtree key disagrees with the shared prefix"
                    );
                    assert_eq!(bit_at(key, bit) as usize, side, "child on the wrong side");
                }
            }
        } else {
            if from.node != ROOT && self.node(from.node).bit < 0 {
                assert!(
                    node.bit > self.node(from.node).bit,
                    "duplicate counts must grow toward the bottom"
                );
            }
            for sub in [left, right] {
                for leaf in self.subtree_leaves(sub) {
                    assert_eq!(
                        self.key(leaf),
                        self.key(id),
                        "a duplicate subtree holds one key only"
                    );
                }
                if let Ref::Branch(b) = sub {
                    assert!(self.node(b).bit < 0, "a real branch inside duplicates");
                }
            }
        }

        self.check_child(Parent { node: id, side: LEFT }, left);
        self.check_child(
            Parent {
                node: id,
                side: RIGHT,
            },
            right,
        );
    }

    fn subtree_leaves(&self, child: Ref) -> Vec<NodeId> {
        match child {
            Ref::Leaf(id) => alloc::vec![id],
            Ref::Branch(id) => {
                let mut leaves =
                    self.subtree_leaves(self.node(id).branch[LEFT].unwrap());
                leaves.extend(self.subtree_leaves(self.node(id).branch[RIGHT].unwrap()));
                leaves
            }
        }
    }
}
