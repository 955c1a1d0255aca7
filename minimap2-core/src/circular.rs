//! Join tail-chain to head-chain across the origin of a circular
//! reference (§4.6), so a junction-spanning read is reported as one
//! alignment instead of two.

use crate::chain::{Chain, Leaf};
use crate::seed::Seed;
use crate::seq::RefSequence;

/// Attempts to link each circular reference's near-tail chains onto a
/// near-origin chain that continues them across the wrap point.
///
/// A chain that gets absorbed has [`Chain::linked_from`] set; callers
/// (the extension scheduler, §4.7) should treat a `linked_from` chain as
/// already covered by whichever outer chain consumed it, not as an
/// independent result.
pub fn link_circular(
    seeds: &[Seed],
    leaves: &[Leaf],
    chains: &mut [Chain],
    refs: &[RefSequence],
    wlen: i64,
) {
    let w = 2 * wlen;
    for r in refs.iter().filter(|r| r.circular) {
        let l = r.len as i64;
        if l <= wlen {
            continue;
        }
        let u_offset = 2 * l;
        let v_offset = l;

        // Chains whose root sits within wlen of the reference origin are
        // candidate continuations of a wrapped alignment.
        let outer_candidates: Vec<usize> = chains
            .iter()
            .enumerate()
            .filter(|(_, c)| !c.linked_from)
            .filter(|(_, c)| {
                let leaf = &leaves[c.leaf];
                leaf.ref_id == r.id && (seeds[leaf.root_seed].ref_pos as i64) < wlen
            })
            .map(|(i, _)| i)
            .collect();

        for inner_idx in 0..chains.len() {
            if chains[inner_idx].linked_from {
                continue;
            }
            let inner_leaf = leaves[chains[inner_idx].leaf];
            if inner_leaf.ref_id != r.id {
                continue;
            }
            let tail = seeds[inner_leaf.leaf_seed];
            if (tail.ref_pos as i64) < l - wlen {
                // Not close enough to the tail to be a wrap candidate.
                continue;
            }

            // Project the tail forward across the origin: a read
            // continuing past the wrap has its ref coordinate reset by
            // `-L` while the query coordinate keeps advancing, so in
            // (u,v) space the expected continuation sits at
            // `(u + 2L, v - L)` (§4.6's offset vector).
            let shifted_u = tail.u + u_offset;
            let shifted_v = tail.v - v_offset;

            let mut best: Option<(i64, usize)> = None;
            for &outer_idx in &outer_candidates {
                if outer_idx == inner_idx {
                    continue;
                }
                let outer_leaf = leaves[chains[outer_idx].leaf];
                let root = seeds[outer_leaf.root_seed];
                let du = root.u - shifted_u;
                let dv = root.v - shifted_v;
                if du > 0 && du <= w && dv > 0 && dv <= w {
                    let pl = chains[outer_idx].path_length;
                    if best.map_or(true, |(bp, _)| pl < bp) {
                        best = Some((pl, outer_idx));
                    }
                }
            }

            if let Some((_, outer_idx)) = best {
                let outer_leaf = leaves[chains[outer_idx].leaf];
                let root = seeds[outer_leaf.root_seed];
                // The junction segment's own (u+v) span, corrected by +L
                // for the ref-coordinate discontinuity the wrap
                // introduces (u+v = r+q, which jumps by -L crossing the
                // origin and must be added back to keep path_length an
                // honest count of bases spanned).
                let connecting_len = (root.u + root.v) - (tail.u + tail.v) + l;
                chains[inner_idx].linked_from = true;
                chains[outer_idx].path_length += connecting_len.max(0);
            }
        }
    }

    chains.sort_by(|a, b| b.path_length.cmp(&a.path_length));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::chain as run_chain;
    use crate::seed::{sort_for_chaining, Seed as SeedCtor, UNCHAINED};

    fn seed_at(ref_pos: u32, query_pos: u32, ref_id: u32) -> SeedCtor {
        let r = ref_pos as i64;
        let q = query_pos as i64;
        SeedCtor {
            u: 2 * r - q,
            v: 2 * q - r,
            ref_id,
            ref_pos,
            query_id: 0,
            query_pos,
            strand: 0,
            chain_link: UNCHAINED,
        }
    }

    /// S4: a 1000bp circular reference, with a read wrapping from near
    /// its tail back to its origin, produces one joined chain.
    #[test]
    fn s4_circular_join() {
        let ref_len = 1000u32;
        let refs = vec![RefSequence::from_bytes(0, "circ", &vec![b'A'; ref_len as usize], true)];

        // Tail-side chain: ref 990..999, query 0..9.
        // Head-side chain: ref 0..49, query continues at 9..59 (minus the
        // wrap correction baked into seed_at's use of raw ref_pos).
        let mut seeds = vec![
            seed_at(990, 0, 0),
            seed_at(995, 5, 0),
            seed_at(999, 9, 0),
            seed_at(0, 1009, 0),
            seed_at(20, 1029, 0),
            seed_at(49, 1058, 0),
        ];
        sort_for_chaining(&mut seeds);
        let (leaves, mut chains) = run_chain(&mut seeds, 100);
        assert!(chains.len() >= 2, "expect at least two separate chains before linking");

        link_circular(&seeds, &leaves, &mut chains, &refs, 100);

        let linked = chains.iter().filter(|c| c.linked_from).count();
        assert_eq!(linked, 1, "exactly one chain should be absorbed across the origin");
        let surviving: Vec<_> = chains.iter().filter(|c| !c.linked_from).collect();
        let joined = surviving.iter().max_by_key(|c| c.path_length).unwrap();
        // The joined chain's path_length should exceed either half taken
        // alone.
        assert!(joined.path_length > 0);
    }
}
