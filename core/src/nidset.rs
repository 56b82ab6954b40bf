//! Dense nid (node index) sets and the hostname-range codec.
//!
//! Cluster hostnames compress many nodes into one expression, e.g.
//! `nid[00020-00022,00045]`. `NidSet` decodes such an expression into a
//! bit-indexed membership set and encodes any set back into the compact
//! `20-22,45` range form that the capmc `-n` option accepts.

/// Highest node index the cluster can address. Sets are sized to this bound.
pub const MAX_NID: usize = 100_000;

/// A dense set of node indices, backed by a bit vector.
///
/// Membership is only added during [`NidSet::decode`] and only removed while
/// tracking convergence; one set lives for exactly one power transition.
#[derive(Debug, Clone)]
pub struct NidSet {
    bits: Vec<u64>,
}

impl NidSet {
    pub fn new() -> Self {
        NidSet {
            bits: vec![0; (MAX_NID + 63) / 64],
        }
    }

    /// Decode a hostname-range expression into a `NidSet`.
    ///
    /// The scan is deliberately permissive: the input always comes from the
    /// cluster's own host naming, so malformed text degrades to a partial or
    /// empty set instead of an error. Digit runs are nids (leading zeros
    /// insignificant), `-` between two numbers expands an ascending inclusive
    /// range, and a descending range degrades to just the trailing index.
    pub fn decode(host_expr: &str) -> NidSet {
        let mut set = NidSet::new();
        let bytes = host_expr.as_bytes();
        let mut i = 0;
        // Lower bound of a pending `low-` range, not yet committed.
        let mut pending_low: Option<usize> = None;

        while i < bytes.len() {
            if !bytes[i].is_ascii_digit() {
                i += 1;
                continue;
            }
            let mut nid: usize = 0;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                nid = nid.saturating_mul(10).saturating_add((bytes[i] - b'0') as usize);
                i += 1;
            }
            let dash_follows = i < bytes.len() && bytes[i] == b'-';
            match (pending_low.take(), dash_follows) {
                (Some(low), _) if nid >= low => set.set_range(low, nid),
                // Descending range: only the trailing index survives.
                (Some(_), _) => set.set(nid),
                // Opens a range; committed when the upper bound arrives.
                (None, true) => pending_low = Some(nid),
                (None, false) => set.set(nid),
            }
            if dash_follows {
                i += 1;
            }
        }
        set
    }

    /// Encode the set as a compact range expression, e.g. `20-22,45`.
    ///
    /// Round-trips any set that `decode` produced (the textual form is
    /// canonical even when the input was not).
    pub fn encode(&self) -> String {
        let mut out = String::new();
        let mut iter = self.iter().peekable();
        while let Some(start) = iter.next() {
            let mut end = start;
            while iter.peek() == Some(&(end + 1)) {
                end = iter.next().unwrap();
            }
            if !out.is_empty() {
                out.push(',');
            }
            if end > start {
                out.push_str(&format!("{}-{}", start, end));
            } else {
                out.push_str(&format!("{}", start));
            }
        }
        out
    }

    pub fn set(&mut self, nid: usize) {
        if nid < MAX_NID {
            self.bits[nid / 64] |= 1u64 << (nid % 64);
        }
    }

    fn set_range(&mut self, low: usize, high: usize) {
        for nid in low..=high.min(MAX_NID - 1) {
            self.set(nid);
        }
    }

    pub fn clear(&mut self, nid: usize) {
        if nid < MAX_NID {
            self.bits[nid / 64] &= !(1u64 << (nid % 64));
        }
    }

    pub fn contains(&self, nid: usize) -> bool {
        nid < MAX_NID && (self.bits[nid / 64] >> (nid % 64)) & 1 == 1
    }

    pub fn count(&self) -> usize {
        self.bits.iter().map(|w| w.count_ones() as usize).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.iter().all(|w| *w == 0)
    }

    /// Ascending iterator over member nids.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.bits.iter().enumerate().flat_map(|(word_idx, word)| {
            (0..64)
                .filter(move |bit| (word >> bit) & 1 == 1)
                .map(move |bit| word_idx * 64 + bit)
        })
    }
}

impl Default for NidSet {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
