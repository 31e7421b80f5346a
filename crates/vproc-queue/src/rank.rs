//! Queue-position lookups for the in-memory store.

/// Waiting jobs of one priority band, keyed by their band sequence number.
///
/// Sequence numbers are handed out by `push_next`, so the Fenwick tree only
/// ever grows at the end. Slots of removed jobs stay at zero until the band
/// empties or becomes sparse enough to rebuild.
#[derive(Debug, Default, Clone)]
pub(crate) struct BandRank {
    /// Next sequence number to hand out
    next: u64,
    /// Sequence number stored in tree slot 1
    base: u64,
    /// 1-based Fenwick tree; slot 0 is unused
    tree: Vec<u64>,
    live: u64,
}

impl BandRank {
    /// Slots kept before sparseness is considered.
    const MIN_REBUILD: usize = 1024;

    pub(crate) fn len(&self) -> u64 {
        self.live
    }

    /// Add a job at the back of the band and return its sequence number.
    pub(crate) fn push_next(&mut self) -> u64 {
        let seq = self.next;
        self.next += 1;
        if self.tree.is_empty() {
            self.base = seq;
            self.tree.push(0);
        }
        self.append(1);
        self.live += 1;
        seq
    }

    /// Remove a job. Unknown sequence numbers are ignored.
    pub(crate) fn remove(&mut self, seq: u64) {
        let Some(slot) = self.slot(seq) else {
            return;
        };
        if self.prefix(slot) == self.prefix(slot - 1) {
            return;
        }

        let mut i = slot;
        while i < self.tree.len() {
            self.tree[i] -= 1;
            i += lowbit(i);
        }
        self.live -= 1;

        if self.live == 0 {
            self.tree.clear();
        }
    }

    /// Number of live jobs ahead of `seq` in this band.
    pub(crate) fn rank(&self, seq: u64) -> u64 {
        match self.slot(seq) {
            Some(slot) => self.prefix(slot - 1),
            None if seq < self.base => 0,
            None => self.live,
        }
    }

    /// Whether most slots belong to removed jobs.
    pub(crate) fn is_sparse(&self) -> bool {
        self.tree.len() > Self::MIN_REBUILD && (self.live as usize) * 4 < self.tree.len()
    }

    /// Compact the tree down to the given live sequence numbers, renumbering
    /// them from the current counter. Returns the new numbers in order.
    pub(crate) fn rebuild(&mut self, live: usize) -> std::ops::Range<u64> {
        self.tree.clear();
        self.live = 0;
        let start = self.next;
        for _ in 0..live {
            self.push_next();
        }
        start..self.next
    }

    fn slot(&self, seq: u64) -> Option<usize> {
        if self.tree.is_empty() || seq < self.base {
            return None;
        }
        let slot = usize::try_from(seq - self.base).ok()? + 1;
        (slot < self.tree.len()).then_some(slot)
    }

    /// Append one slot holding `value`.
    fn append(&mut self, value: u64) {
        let i = self.tree.len();
        let covered = self.prefix(i - 1) - self.prefix(i - lowbit(i));
        self.tree.push(value + covered);
    }

    fn prefix(&self, mut i: usize) -> u64 {
        let mut sum = 0;
        while i > 0 {
            sum += self.tree[i];
            i &= i - 1;
        }
        sum
    }
}

fn lowbit(i: usize) -> usize {
    i & i.wrapping_neg()
}
