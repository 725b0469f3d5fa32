//! Winner tree: dual of the loser tree. Each internal node stores the winner
//! (not the loser) of its subtree; used as the minima scheduler across the
//! external priority queue's heterogeneous sources (SPEC_FULL.md section
//! 4.6.2, 4.7), grounded on `common/winner_tree.h`.

const NONE: usize = usize::MAX;

/// `Less` decides whether player `a` should win over player `b` (i.e. `a`
/// compares strictly less, or better, than `b`). Inactive players (those
/// removed via [`WinnerTree::deactivate_player`]) never win.
pub struct WinnerTree<Less> {
    tree: Vec<usize>,
    num_slots: usize,
    less: Less,
}

impl<Less: Fn(usize, usize) -> bool> WinnerTree<Less> {
    /// Build a tree with `num_players` leaves, all initially active.
    pub fn new(num_players: usize, less: Less) -> Self {
        let mut t = Self {
            tree: Vec::new(),
            num_slots: 0,
            less,
        };
        t.resize_and_rebuild(num_players);
        t
    }

    pub fn size(&self) -> usize {
        self.num_slots
    }

    /// Index of the overall winner, or `None` if every player is inactive.
    pub fn winner(&self) -> Option<usize> {
        let w = self.tree[0];
        if w == NONE {
            None
        } else {
            Some(w)
        }
    }

    pub fn activate_player(&mut self, player: usize) {
        self.replay_on_change(player);
    }

    pub fn deactivate_player(&mut self, player: usize) {
        // Re-run the comparator with the player treated as absent by having
        // `less` report false for it; callers are expected to make their
        // `less` closure return "player is worse than anything" once they've
        // marked it inactive in their own state before calling this.
        self.replay_on_change(player);
    }

    /// Call after player's key changed externally (e.g. it became inactive,
    /// or its value changed); walks from the player's leaf to the root,
    /// recomputing each ancestor.
    pub fn replay_on_change(&mut self, player: usize) {
        let num_leaves = self.num_slots;
        let mut node = player + num_leaves;
        let mut current = player;
        while node > 1 {
            let sibling = node ^ 1;
            let parent = node / 2;
            let new_winner = self.pick(current, self.tree[sibling]);
            self.tree[parent] = new_winner;
            current = new_winner;
            node = parent;
        }
    }

    pub fn double_num_slots(&mut self) {
        self.resize_and_rebuild(self.num_slots * 2);
    }

    /// Resize to `new_num_players` and fully rebuild bottom-up. Any player
    /// index `>= new_num_players` is dropped.
    pub fn resize_and_rebuild(&mut self, new_num_players: usize) {
        let num_slots = new_num_players.max(1).next_power_of_two();
        self.num_slots = num_slots;
        self.tree = vec![NONE; 2 * num_slots];
        for i in 0..num_slots.min(new_num_players) {
            self.tree[num_slots + i] = i;
        }
        self.rebuild();
    }

    /// Full bottom-up rebuild from the current leaf assignment.
    pub fn rebuild(&mut self) {
        let num_slots = self.num_slots;
        for i in (1..num_slots).rev() {
            let left = self.tree[2 * i];
            let right = self.tree[2 * i + 1];
            self.tree[i] = self.pick(left, right);
        }
    }

    fn pick(&self, a: usize, b: usize) -> usize {
        match (a == NONE, b == NONE) {
            (true, true) => NONE,
            (true, false) => b,
            (false, true) => a,
            (false, false) => {
                if (self.less)(a, b) {
                    a
                } else {
                    b
                }
            }
        }
    }
}
