//! Query-side minimizer → seed expansion, with occurrence-tiered rescue
//! (§4.4).

use tracing::trace;

use crate::index::MinimizerIndex;
use crate::opts::MapOptions;
use crate::sketch::{unpack, Sketcher};

/// Offset added to `u`/`v` so both stay non-negative for any ref/query
/// position pair representable in a `u32` (§3).
pub const OFS: i64 = 1i64 << 32;
/// Sentinel `chain_link` value meaning "not yet assigned to a chain"
/// (§3).
pub const UNCHAINED: u32 = u32::MAX;

/// A candidate alignment anchor in rotated `(u, v)` coordinates (§3,
/// Glossary).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Seed {
    pub u: i64,
    pub v: i64,
    pub ref_id: u32,
    pub ref_pos: u32,
    pub query_id: u32,
    pub query_pos: u32,
    /// 0 = forward, 1 = reverse-complement mapping of the query onto the
    /// reference.
    pub strand: u8,
    /// `UNCHAINED` until the chainer assigns a leaf index (§3).
    pub chain_link: u32,
}

impl Seed {
    fn new(ref_id: u32, ref_pos: u32, query_id: u32, query_pos: u32, strand: u8) -> Self {
        let r = ref_pos as i64;
        let q = query_pos as i64;
        let u = 2 * r - q + OFS;
        let v = 2 * q - r + OFS;
        Self { u, v, ref_id, ref_pos, query_id, query_pos, strand, chain_link: UNCHAINED }
    }
}

/// Sorts seeds ascending by `(ref_id, v, u)`, placing collinear
/// anti-diagonal neighbors adjacent (§3) — the chainer's precondition.
pub fn sort_for_chaining(seeds: &mut [Seed]) {
    seeds.sort_unstable_by(|a, b| (a.ref_id, a.v, a.u).cmp(&(b.ref_id, b.v, b.u)));
}

struct RescueEntry {
    hash: u64,
    query_pos: u32,
    strand: u8,
    count: u32,
}

/// Expands a query's minimizers into a `(u,v)`-sortable seed array,
/// deferring over-represented minimizers into occurrence tiers (§4.4).
pub struct SeedCollector<'a> {
    index: &'a MinimizerIndex,
    opts: &'a MapOptions,
}

impl<'a> SeedCollector<'a> {
    pub fn new(index: &'a MinimizerIndex, opts: &'a MapOptions) -> Self {
        Self { index, opts }
    }

    /// Collects seeds for one query sequence.
    pub fn collect(&self, query_id: u32, query_bases: &[u8]) -> Vec<Seed> {
        let sketcher = Sketcher::new(self.index.w(), self.index.k());
        let (mins, _cap) = sketcher.sketch(query_bases, None);
        let occ = &self.index.stats.occurrence_thresholds;
        let query_len = query_bases.len() as u32;

        let mut seeds = Vec::new();
        let mut rescue = Vec::new();

        let first_tier = occ.first().copied().unwrap_or(u32::MAX);
        for &(m, query_pos) in &mins {
            let (hash, _window_pos, q_strand) = unpack(m);

            let hits = self.index.lookup(hash);
            if hits.is_empty() {
                // Either genuinely absent, or dropped as too repetitive
                // at build time (§4.2 step 3) — both are a skip here.
                continue;
            }
            let count = hits.len() as u32;
            if count > first_tier {
                rescue.push(RescueEntry { hash, query_pos, strand: q_strand, count });
                continue;
            }
            self.expand(query_id, query_pos, q_strand, query_len, &hits, &mut seeds);
        }

        // Rescue passes: admit progressively rarer tiers, radix-sorted by
        // count so cheap (low-count) rescues run first (§4.4: "the
        // rescue array is radix-sorted by count").
        rescue.sort_unstable_by_key(|e| e.count);
        let mut tier = 1usize;
        let mut idx = 0usize;
        while idx < rescue.len() && tier < occ.len() {
            let ceiling = occ[tier];
            while idx < rescue.len() && rescue[idx].count <= ceiling {
                let e = &rescue[idx];
                let hits = self.index.lookup(e.hash);
                self.expand(query_id, e.query_pos, e.strand, query_len, &hits, &mut seeds);
                idx += 1;
            }
            tier += 1;
        }
        trace!(query_id, n_seeds = seeds.len(), n_rescued = rescue.len(), "collected seeds");

        sort_for_chaining(&mut seeds);
        seeds
    }

    fn expand(
        &self,
        query_id: u32,
        query_pos: u32,
        q_strand: u8,
        query_len: u32,
        hits: &[crate::index::IndexHit],
        out: &mut Vec<Seed>,
    ) {
        for hit in hits {
            if self.opts.all_vs_all && hit.ref_id < query_id {
                // Lower-triangle elimination: each unordered pair is
                // reported once, from the lower-id side (§4.4, §9).
                continue;
            }
            let strand = hit.strand ^ q_strand;
            let qpos_fw = if strand == 0 {
                query_pos
            } else {
                query_len.saturating_sub(query_pos + self.index.k() as u32)
            };
            out.push(Seed::new(hit.ref_id, hit.ref_pos, query_id, qpos_fw, strand));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::MinimizerIndex;
    use crate::opts::IndexOptions;
    use crate::seq::RefSequence;

    #[test]
    fn u_v_are_monotone_for_a_collinear_run() {
        let a = Seed::new(0, 10, 0, 10, 0);
        let b = Seed::new(0, 20, 0, 20, 0);
        let c = Seed::new(0, 30, 0, 30, 0);
        assert!(a.u <= b.u && b.u <= c.u);
        assert!(a.v <= b.v && b.v <= c.v);
    }

    #[test]
    fn collector_finds_seeds_for_a_matching_query() {
        let iopts = IndexOptions { k: 5, w: 3, bucket_bits: 8, occurrence_fractions: vec![0.5, 0.2, 0.05] };
        let refs = vec![RefSequence::from_bytes(
            0,
            "r0",
            b"ACGTACGTACGTACGTACGTACGTACGTACGT",
            false,
        )];
        let idx = MinimizerIndex::build(iopts, refs).unwrap();
        let mopts = MapOptions::default();
        let collector = SeedCollector::new(&idx, &mopts);
        let seeds = collector.collect(1, b"ACGTACGTACGTACGTACGT");
        assert!(!seeds.is_empty());
        for w in seeds.windows(2) {
            if w[0].ref_id == w[1].ref_id {
                assert!(w[0].v <= w[1].v);
            }
        }
    }

    #[test]
    fn all_vs_all_drops_lower_triangle() {
        let iopts = IndexOptions { k: 5, w: 1, bucket_bits: 8, occurrence_fractions: vec![0.9] };
        let refs = vec![RefSequence::from_bytes(5, "r5", b"ACGTACGTACGTACGT", false)];
        let idx = MinimizerIndex::build(iopts, refs).unwrap();
        let mopts = MapOptions::default().all_vs_all(true);
        let collector = SeedCollector::new(&idx, &mopts);
        // query_id (10) > ref_id (5): pair kept.
        let seeds_kept = collector.collect(10, b"ACGTACGTACGTACGT");
        assert!(!seeds_kept.is_empty());
        // query_id (2) < ref_id (5): pair dropped.
        let seeds_dropped = collector.collect(2, b"ACGTACGTACGTACGT");
        assert!(seeds_dropped.is_empty());
    }
}
