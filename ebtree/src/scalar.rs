//! Elastic binary trees over fixed-width unsigned integer keys.
//!
//! Every record is one node slot in the tree's arena, playing up to two
//! roles at once. Its leaf role terminates a descent and carries the key. Its
//! branch role, when linked, discriminates one bit somewhere above its own
//! leaf: descent at a branch with position `p` follows the child on the side
//! of bit `p − 1` of the query. Positions strictly decrease from the root
//! sentinel (position = key width) down to the leaves, which bounds every
//! descent by the key width.
//!
//! A child reference does not say which role it reaches; that is recovered
//! structurally: the child is reached as a leaf exactly when the child's
//! leaf-parent is the node holding the reference. Records sharing one key
//! form a circular duplicate list threaded through the one copy linked in the
//! tree (the head); the other members are reached only through the list and
//! have neither parent linked.
//!
//! The root sentinel is an ordinary slot whose branch discriminates the top
//! bit of the key, so its two children partition the key space in halves;
//! either slot may be empty.

use alloc::vec::Vec;

use crate::{NodeId, LEFT, RIGHT, ROOT};

/// A key usable in a [`ScalarTree`]: a fixed-width unsigned integer.
pub trait Key: Copy + Ord + Default + core::fmt::Debug {
    /// Width of the key in bits; also the root sentinel's branch position.
    const BITS: u32;

    /// Value of bit `pos` (0 = least significant), as a branch side.
    fn bit(self, pos: u32) -> usize;

    /// Whether `self` and `other` differ at bit `pos` or above.
    fn diverges(self, other: Self, pos: u32) -> bool;

    /// One-based position of the highest bit at which two keys differ.
    /// Never called on equal keys.
    fn split_bit(self, other: Self) -> u32;
}

macro_rules! impl_key {
    ($($ty:ty),*) => {$(
        impl Key for $ty {
            const BITS: u32 = <$ty>::BITS;

            fn bit(self, pos: u32) -> usize {
                ((self >> pos) & 1) as usize
            }

            fn diverges(self, other: Self, pos: u32) -> bool {
                (self ^ other) >> pos != 0
            }

            fn split_bit(self, other: Self) -> u32 {
                Self::BITS - (self ^ other).leading_zeros()
            }
        }
    )*};
}

impl_key!(u32, u64);

#[derive(Clone)]
struct Node<K> {
    key: K,
    /// Parent holding this record as a leaf. `None` for non-head duplicates
    /// and the root sentinel.
    leaf_p: Option<NodeId>,
    /// Parent holding this record as a branch. `None` while the branch role
    /// is unused.
    link_p: Option<NodeId>,
    /// Children of the branch role.
    branch: [Option<NodeId>; 2],
    /// Circular duplicate list; self-referential when the key is alone.
    dup_next: NodeId,
    dup_prev: NodeId,
    /// Branch position, one-based. Zero while the branch role is unused.
    bit: u32,
}

/// An ordered multi-map keyed by a fixed-width unsigned integer.
///
/// Records are created by [`insert`](ScalarTree::insert) and addressed by
/// [`NodeId`] until [`delete`](ScalarTree::delete) releases them. In-order
/// traversal yields keys in ascending order, duplicates of a key in
/// insertion order.
#[derive(Clone)]
pub struct ScalarTree<K: Key> {
    nodes: Vec<Node<K>>,
    free: Vec<NodeId>,
}

impl<K: Key> ScalarTree<K> {
    /// Create an empty tree.
    pub fn new() -> Self {
        let root = Node {
            key: K::default(),
            leaf_p: None,
            link_p: None,
            branch: [None, None],
            dup_next: ROOT,
            dup_prev: ROOT,
            bit: K::BITS,
        };
        ScalarTree {
            nodes: alloc::vec![root],
            free: Vec::new(),
        }
    }

    /// Whether the tree holds no records.
    pub fn is_empty(&self) -> bool {
        let root = self.node(ROOT);
        root.branch[LEFT].is_none() && root.branch[RIGHT].is_none()
    }

    /// The key stored in a record.
    pub fn key(&self, id: NodeId) -> K {
        self.node(id).key
    }

    /// The leftmost record, or `None` on an empty tree.
    pub fn first(&self) -> Option<NodeId> {
        [LEFT, RIGHT]
            .into_iter()
            .find_map(|side| self.walk_down(ROOT, LEFT, self.node(ROOT).branch[side]))
    }

    /// The rightmost record, or `None` on an empty tree.
    pub fn last(&self) -> Option<NodeId> {
        [RIGHT, LEFT]
            .into_iter()
            .find_map(|side| self.walk_down(ROOT, RIGHT, self.node(ROOT).branch[side]))
    }

    /// The in-order successor of a record currently in the tree.
    ///
    /// Duplicates of the key are returned in insertion order before the walk
    /// moves past the key.
    pub fn next(&self, id: NodeId) -> Option<NodeId> {
        let mut node = id;
        if self.node(node).dup_next != node {
            node = self.node(node).dup_next;
            if self.node(node).leaf_p.is_none() {
                return Some(node);
            }
            // wrapped around to the list head; leave the key
        }
        let parent = self.node(node).leaf_p?;
        let above = self.walk_up(node, RIGHT, parent)?;
        self.walk_down(above, LEFT, self.node(above).branch[RIGHT])
    }

    /// The in-order predecessor of a record currently in the tree.
    pub fn prev(&self, id: NodeId) -> Option<NodeId> {
        let mut node = id;
        if self.node(node).dup_prev != node {
            node = self.node(node).dup_prev;
            if self.node(node).leaf_p.is_none() {
                return Some(node);
            }
        }
        let parent = self.node(node).leaf_p?;
        let above = self.walk_up(node, LEFT, parent)?;
        self.walk_down(above, RIGHT, self.node(above).branch[LEFT])
    }

    /// The first record with a key strictly greater than this record's key.
    pub fn next_unique(&self, id: NodeId) -> Option<NodeId> {
        let (head, parent) = self.dup_head(id);
        let above = self.walk_up(head, RIGHT, parent)?;
        self.walk_down(above, LEFT, self.node(above).branch[RIGHT])
    }

    /// The first record with a key strictly smaller than this record's key
    /// (the duplicate-list head of the preceding key).
    pub fn prev_unique(&self, id: NodeId) -> Option<NodeId> {
        let (head, parent) = self.dup_head(id);
        let above = self.walk_up(head, LEFT, parent)?;
        self.walk_down(above, RIGHT, self.node(above).branch[LEFT])
    }

    /// Find the first record holding `key`, or `None`.
    pub fn lookup(&self, key: K) -> Option<NodeId> {
        let mut parent = ROOT;
        loop {
            let side = key.bit(self.node(parent).bit - 1);
            let child = self.node(parent).branch[side]?;
            let (child_key, child_bit) = {
                let node = self.node(child);
                if node.leaf_p == Some(parent) {
                    return if node.key == key { Some(child) } else { None };
                }
                (node.key, node.bit)
            };
            if child_key == key {
                // A leaf with this exact key hangs somewhere below this
                // branch, and this record is it.
                return Some(child);
            }
            if key.diverges(child_key, child_bit) {
                return None;
            }
            parent = child;
        }
    }

    /// Insert a record holding `key` and return its id.
    ///
    /// A key already present gains one more duplicate, enumerated after the
    /// existing ones.
    pub fn insert(&mut self, key: K) -> NodeId {
        let new = self.alloc(key);
        let entry = key.bit(K::BITS - 1);
        let Some(mut next) = self.node(ROOT).branch[entry] else {
            self.node_mut(ROOT).branch[entry] = Some(new);
            self.node_mut(new).leaf_p = Some(ROOT);
            return new;
        };

        let mut parent = ROOT;
        loop {
            let (next_key, next_bit, next_leaf_p) = {
                let node = self.node(next);
                (node.key, node.bit, node.leaf_p)
            };
            if next_leaf_p == Some(parent) {
                if next_key == key {
                    // Same key: join the tail of the duplicate list. The new
                    // record takes part in neither role of the tree proper.
                    self.dup_link_tail(next, new);
                    return new;
                }
                break;
            }
            if key.diverges(next_key, next_bit) {
                break;
            }
            parent = next;
            let side = key.bit(next_bit - 1);
            next = self.node(next).branch[side].expect("linked branches carry two children");
        }

        // Splice the new record's branch between `parent` and `next`, with
        // its own leaf on one side and the displaced subtree on the other.
        // The split position cannot reach `parent`'s: both keys agree on
        // every bit `parent` routed on.
        let next_key = self.node(next).key;
        let greater = (key > next_key) as usize;
        {
            let node = self.node_mut(new);
            node.link_p = Some(parent);
            node.leaf_p = Some(new);
            node.bit = key.split_bit(next_key);
            node.branch[greater] = Some(new);
            node.branch[greater ^ 1] = Some(next);
        }
        let side = (self.node(parent).branch[RIGHT] == Some(next)) as usize;
        self.node_mut(parent).branch[side] = Some(new);
        if self.node(next).leaf_p == Some(parent) {
            self.node_mut(next).leaf_p = Some(new);
        } else {
            self.node_mut(next).link_p = Some(new);
        }
        new
    }

    /// Remove a record currently in the tree and release its slot.
    ///
    /// Returns whether the tree still holds records afterwards.
    pub fn delete(&mut self, id: NodeId) -> bool {
        debug_assert!(id != ROOT, "the root sentinel is not a record");

        let Some(parent) = self.node(id).leaf_p else {
            // A duplicate that is not the list head is linked to nothing
            // else; unlinking it cannot empty the tree.
            self.dup_unlink(id);
            self.release(id);
            return true;
        };

        let donor;
        if self.node(id).dup_next != id {
            // List head: promote the next duplicate into the tree. Its
            // unused branch role doubles as the donor below.
            let promoted = self.node(id).dup_next;
            self.dup_unlink(id);
            self.node_mut(promoted).leaf_p = Some(parent);
            let side = (self.node(parent).branch[RIGHT] == Some(id)) as usize;
            self.node_mut(parent).branch[side] = Some(promoted);
            donor = promoted;
        } else {
            let Some(gparent) = self.node(parent).link_p else {
                // Leaf directly under the root: clear the slot. No branch
                // was lent this close to the root.
                let side = (self.node(parent).branch[RIGHT] == Some(id)) as usize;
                self.node_mut(parent).branch[side] = None;
                let nonempty = self.node(parent).branch[side ^ 1].is_some();
                self.release(id);
                return nonempty;
            };
            // Reparent the sibling to the grandparent, freeing the parent
            // branch. Zeroing its position may mark our own branch role
            // unused at the same time, which the donation check relies on.
            let side = (self.node(parent).branch[RIGHT] == Some(id)) as usize;
            let sibling =
                self.node(parent).branch[side ^ 1].expect("linked branches carry two children");
            if self.node(sibling).leaf_p == Some(parent) {
                self.node_mut(sibling).leaf_p = Some(gparent);
            } else {
                self.node_mut(sibling).link_p = Some(gparent);
            }
            let gside = (self.node(gparent).branch[RIGHT] == Some(parent)) as usize;
            self.node_mut(gparent).branch[gside] = Some(sibling);
            self.node_mut(parent).bit = 0;
            donor = parent;
        }

        if self.node(id).bit != 0 {
            // The deleted record lent its branch elsewhere; the freed donor
            // takes the role over. The donor sits below the lent branch, so
            // keeping the donor's key for future bit tests is sound.
            let (link_p, branch, bit) = {
                let node = self.node(id);
                (node.link_p, node.branch, node.bit)
            };
            {
                let node = self.node_mut(donor);
                node.link_p = link_p;
                node.branch = branch;
                node.bit = bit;
            }
            let above = link_p.expect("a lent branch hangs below some parent");
            if self.node(above).branch[LEFT] == Some(id) {
                self.node_mut(above).branch[LEFT] = Some(donor);
            } else {
                self.node_mut(above).branch[RIGHT] = Some(donor);
            }
            for side in [LEFT, RIGHT] {
                let child =
                    self.node(donor).branch[side].expect("linked branches carry two children");
                if self.node(child).leaf_p == Some(id) {
                    self.node_mut(child).leaf_p = Some(donor);
                } else {
                    self.node_mut(child).link_p = Some(donor);
                }
            }
        }

        self.release(id);
        true
    }

    /// Walk the tree in order, yielding record ids.
    pub fn iter(&self) -> Iter<'_, K> {
        Iter {
            tree: self,
            next: self.first(),
        }
    }

    fn node(&self, id: NodeId) -> &Node<K> {
        &self.nodes[id.index()]
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node<K> {
        &mut self.nodes[id.index()]
    }

    /// Follow `side` from `start` (a child of `parent`) until a reference
    /// resolves as a leaf.
    fn walk_down(&self, mut parent: NodeId, side: usize, start: Option<NodeId>) -> Option<NodeId> {
        let mut cur = start?;
        while self.node(cur).leaf_p != Some(parent) {
            parent = cur;
            cur = self.node(cur).branch[side]?;
        }
        Some(cur)
    }

    /// Ascend from `node` (whose valid parent is `parent`) while the walk
    /// stays on `side`; stops at the first ancestor seeing it on the other
    /// side, or `None` past the root.
    fn walk_up(&self, mut node: NodeId, side: usize, mut parent: NodeId) -> Option<NodeId> {
        while self.node(parent).branch[side] == Some(node) {
            node = parent;
            parent = self.node(node).link_p?;
        }
        Some(parent)
    }

    /// Resolve a record to its duplicate-list head (the copy linked in the
    /// tree) and that head's leaf parent.
    fn dup_head(&self, id: NodeId) -> (NodeId, NodeId) {
        let mut node = id;
        loop {
            match self.node(node).leaf_p {
                Some(parent) => return (node, parent),
                None => node = self.node(node).dup_next,
            }
        }
    }

    fn dup_link_tail(&mut self, head: NodeId, new: NodeId) {
        let tail = self.node(head).dup_prev;
        self.node_mut(new).dup_prev = tail;
        self.node_mut(new).dup_next = head;
        self.node_mut(tail).dup_next = new;
        self.node_mut(head).dup_prev = new;
    }

    fn dup_unlink(&mut self, id: NodeId) {
        let (next, prev) = (self.node(id).dup_next, self.node(id).dup_prev);
        self.node_mut(next).dup_prev = prev;
        self.node_mut(prev).dup_next = next;
        let node = self.node_mut(id);
        node.dup_next = id;
        node.dup_prev = id;
    }

    fn alloc(&mut self, key: K) -> NodeId {
        let id = match self.free.pop() {
            Some(id) => id,
            None => {
                let id = NodeId::from_index(self.nodes.len());
                self.nodes.push(Node {
                    key,
                    leaf_p: None,
                    link_p: None,
                    branch: [None, None],
                    dup_next: id,
                    dup_prev: id,
                    bit: 0,
                });
                return id;
            }
        };
        *self.node_mut(id) = Node {
            key,
            leaf_p: None,
            link_p: None,
            branch: [None, None],
            dup_next: id,
            dup_prev: id,
            bit: 0,
        };
        id
    }

    fn release(&mut self, id: NodeId) {
        self.free.push(id);
    }
}

impl<K: Key> Default for ScalarTree<K> {
    fn default() -> Self {
        Self::new()
    }
}

/// In-order iterator over the records of a [`ScalarTree`].
pub struct Iter<'a, K: Key> {
    tree: &'a ScalarTree<K>,
    next: Option<NodeId>,
}

impl<'a, K: Key> Iterator for Iter<'a, K> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let cur = self.next?;
        self.next = self.tree.next(cur);
        Some(cur)
    }
}

#[cfg(test)]
impl<K: Key> ScalarTree<K> {
    /// Walk the whole structure and assert every structural invariant.
    fn check_invariants(&self) {
        for side in [LEFT, RIGHT] {
            if let Some(child) = self.node(ROOT).branch[side] {
                self.check_child(ROOT, child);
            }
        }
    }

    fn check_child(&self, parent: NodeId, child: NodeId) {
        if self.node(child).leaf_p == Some(parent) {
            self.check_dup_ring(child);
            return;
        }

        let node = self.node(child);
        assert_eq!(node.link_p, Some(parent), "branch parent mismatch");
        assert_ne!(child, parent, "a branch must not route through itself");
        assert!(node.bit >= 1, "a linked branch has a non-zero position");
        assert!(
            node.bit < self.node(parent).bit,
            "positions must strictly decrease downward"
        );

        let left = node.branch[LEFT].expect("linked branches carry two children");
        let right = node.branch[RIGHT].expect("linked branches carry two children");
        assert_ne!(left, right, "the two children of a branch are distinct");

        for (side, sub) in [(LEFT, left), (RIGHT, right)] {
            for key in self.subtree_keys(child, sub) {
                assert_eq!(key.bit(node.bit - 1), side, "child on the wrong side");
                assert!(
                    !key.diverges(node.key, node.bit),
                    "subtree key disagrees with the branch prefix"
                );
            }
            self.check_child(child, sub);
        }
    }

    fn check_dup_ring(&self, head: NodeId) {
        let key = self.node(head).key;
        let mut cur = self.node(head).dup_next;
        let mut hops = 0usize;
        while cur != head {
            let node = self.node(cur);
            assert_eq!(node.key, key, "duplicate with a different key");
            assert!(node.leaf_p.is_none(), "only the head is linked as a leaf");
            assert_eq!(node.bit, 0, "duplicates lend no branch");
            assert_eq!(
                self.node(node.dup_next).dup_prev,
                cur,
                "duplicate ring is inconsistent"
            );
            cur = node.dup_next;
            hops += 1;
            assert!(hops <= self.nodes.len(), "duplicate ring does not close");
        }
    }

    fn subtree_keys(&self, parent: NodeId, child: NodeId) -> Vec<K> {
        if self.node(child).leaf_p == Some(parent) {
            return alloc::vec![self.node(child).key];
        }
        let mut keys = self.subtree_keys(child, self.node(child).branch[LEFT].unwrap());
        keys.extend(self.subtree_keys(child, self.node(child).branch[RIGHT].unwrap()));
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;
    use rand::{Rng, SeedableRng};

    fn keys_in_order<K: Key>(tree: &ScalarTree<K>) -> Vec<K> {
        tree.iter().map(|id| tree.key(id)).collect()
    }

    fn keys_in_reverse<K: Key>(tree: &ScalarTree<K>) -> Vec<K> {
        let mut out = Vec::new();
        let mut cur = tree.last();
        while let Some(id) = cur {
            out.push(tree.key(id));
            cur = tree.prev(id);
        }
        out
    }

    #[test]
    fn empty_tree_has_no_extremes() {
        let tree = ScalarTree::<u32>::new();
        assert!(tree.is_empty());
        assert_eq!(tree.first(), None);
        assert_eq!(tree.last(), None);
        assert_eq!(tree.lookup(7), None);
    }

    #[test]
    fn insert_walk_delete() {
        let mut tree = ScalarTree::<u32>::new();
        let mut ids = Vec::new();
        for key in [8, 10, 12, 13, 14] {
            ids.push(tree.insert(key));
            tree.check_invariants();
        }

        assert_eq!(keys_in_order(&tree), [8, 10, 12, 13, 14]);
        assert_eq!(keys_in_reverse(&tree), [14, 13, 12, 10, 8]);

        let twelve = tree.lookup(12).unwrap();
        assert_eq!(tree.key(twelve), 12);
        assert_eq!(tree.lookup(11), None);

        for (&id, &key) in ids.iter().zip([8, 10, 12, 13, 14].iter()).rev() {
            let nonempty = tree.delete(id);
            tree.check_invariants();
            assert_eq!(nonempty, key != 8);
            assert_eq!(tree.lookup(key), None);
        }
        assert!(tree.is_empty());
    }

    #[test]
    fn duplicates_enumerate_in_insertion_order() {
        let mut tree = ScalarTree::<u32>::new();
        let a = tree.insert(5);
        let b = tree.insert(5);
        let c = tree.insert(5);
        tree.check_invariants();

        assert_eq!(tree.first(), Some(a));
        assert_eq!(tree.next(a), Some(b));
        assert_eq!(tree.next(b), Some(c));
        assert_eq!(tree.next(c), None);
        assert_eq!(tree.lookup(5), Some(a));

        // Deleting the head promotes the next duplicate into the tree.
        assert!(tree.delete(a));
        tree.check_invariants();
        assert_eq!(tree.lookup(5), Some(b));
        assert_eq!(tree.next(b), Some(c));
        assert_eq!(tree.next(c), None);

        assert!(tree.delete(c));
        tree.check_invariants();
        assert_eq!(tree.lookup(5), Some(b));
        assert!(!tree.delete(b));
        assert!(tree.is_empty());
    }

    #[test]
    fn next_unique_skips_duplicates() {
        let mut tree = ScalarTree::<u32>::new();
        let a = tree.insert(5);
        let b = tree.insert(5);
        let seven = tree.insert(7);
        let three = tree.insert(3);

        assert_eq!(tree.next_unique(a), Some(seven));
        assert_eq!(tree.next_unique(b), Some(seven));
        assert_eq!(tree.prev_unique(b), Some(three));
        assert_eq!(tree.next_unique(seven), None);
        assert_eq!(tree.prev_unique(three), None);
    }

    #[test]
    fn delete_last_record_empties_the_tree() {
        let mut tree = ScalarTree::<u32>::new();
        let id = tree.insert(42);
        assert!(!tree.delete(id));
        assert!(tree.is_empty());

        let id = tree.insert(42);
        assert_eq!(tree.lookup(42), Some(id));
    }

    #[test]
    fn deleting_a_lent_branch_donates_it() {
        let mut tree = ScalarTree::<u32>::new();
        for key in [0, 1, 3, 7] {
            tree.insert(key);
        }
        let one = tree.lookup(1).unwrap();
        assert!(tree.delete(one));
        tree.check_invariants();
        assert_eq!(keys_in_order(&tree), [0, 3, 7]);

        // The record for 6 lends its branch above 4 and 5; deleting it
        // forces a donation from a different slot.
        let mut tree = ScalarTree::<u32>::new();
        for key in [4, 5, 6, 7] {
            tree.insert(key);
        }
        let six = tree.lookup(6).unwrap();
        assert!(tree.delete(six));
        tree.check_invariants();
        assert_eq!(keys_in_order(&tree), [4, 5, 7]);
    }

    #[test]
    fn both_root_slots_are_reachable() {
        let mut tree = ScalarTree::<u32>::new();
        tree.insert(0x8000_0001);
        tree.insert(0xffff_0000);
        tree.check_invariants();
        assert_eq!(keys_in_order(&tree), [0x8000_0001, 0xffff_0000]);
        assert_eq!(keys_in_reverse(&tree), [0xffff_0000, 0x8000_0001]);

        tree.insert(3);
        tree.check_invariants();
        assert_eq!(keys_in_order(&tree), [3, 0x8000_0001, 0xffff_0000]);
        assert_eq!(tree.key(tree.last().unwrap()), 0xffff_0000);
    }

    #[test]
    fn sixty_four_bit_keys_widen_the_descent() {
        let mut tree = ScalarTree::<u64>::new();
        for key in [u64::MAX, 1 << 40, 0, (1 << 40) | 5] {
            tree.insert(key);
            tree.check_invariants();
        }
        assert_eq!(keys_in_order(&tree), [0, 1 << 40, (1 << 40) | 5, u64::MAX]);
        assert_eq!(tree.key(tree.lookup((1 << 40) | 5).unwrap()), (1 << 40) | 5);
    }

    #[test]
    fn randomized_mutations_hold_the_invariants() {
        let mut rng = rand_pcg::Lcg64Xsh32::seed_from_u64(0x5eed);
        let mut tree = ScalarTree::<u32>::new();
        let mut live: Vec<(NodeId, u32)> = Vec::new();

        for round in 0..400 {
            if live.is_empty() || rng.gen_range(0..3) != 0 {
                // Small key range so duplicates actually occur.
                let key = rng.gen_range(0..64u32);
                live.push((tree.insert(key), key));
            } else {
                let (id, _) = live.swap_remove(rng.gen_range(0..live.len()));
                tree.delete(id);
            }
            tree.check_invariants();

            let mut expected: Vec<u32> = live.iter().map(|&(_, k)| k).collect();
            expected.sort_unstable();
            assert_eq!(keys_in_order(&tree), expected, "round {round}");
        }

        while let Some((id, _)) = live.pop() {
            let nonempty = tree.delete(id);
            tree.check_invariants();
            assert_eq!(nonempty, !live.is_empty());
        }
        assert!(tree.is_empty());
    }
}
