//! Group collinear seeds into chains via windowed `(u, v)` geometry
//! (§4.5).
//!
//! Precondition: `seeds` is sorted ascending by `(ref_id, v, u)`
//! ([`crate::seed::sort_for_chaining`]).

use crate::seed::{Seed, UNCHAINED};

/// A chain head: opened when chaining begins at a seed, closed when chain
/// extension stops (§3). Several leaves can merge into one `chain_id`
/// when their tails join an already-chained seed.
#[derive(Debug, Clone, Copy)]
pub struct Leaf {
    pub root_seed: usize,
    pub leaf_seed: usize,
    pub ref_id: u32,
    pub chain_id: u32,
}

/// A chain: the longest root-to-leaf `(u+v)`-projected span among the
/// leaves sharing `chain_id`, plus a pointer to that best leaf (§3).
///
/// `id` is assigned once at creation and never reassigned — it is what
/// [`Leaf::chain_id`] refers to, so it stays a valid key after `chains` is
/// sorted by `path_length`.
#[derive(Debug, Clone, Copy)]
pub struct Chain {
    pub id: u32,
    pub path_length: i64,
    pub leaf: usize,
    /// Set by the circular linker (§4.6) when this chain was joined onto
    /// an outer chain across a circular reference's origin.
    pub linked_from: bool,
}

/// Runs the chainer over `seeds`, mutating each seed's `chain_link` in
/// place and returning the leaves and chains discovered.
///
/// `wlen` is the linear chaining window (§6 default 7000); the
/// `(u,v)`-space window half-width used below is `2*wlen` (§4.5).
pub fn chain(seeds: &mut [Seed], wlen: i64) -> (Vec<Leaf>, Vec<Chain>) {
    let w = 2 * wlen;
    let n = seeds.len();
    let mut leaves: Vec<Leaf> = Vec::new();
    let mut chains: Vec<Chain> = Vec::new();
    let mut next_unchained = 0usize;

    while next_unchained < n {
        let root = next_unchained;
        if seeds[root].chain_link != UNCHAINED {
            // Already absorbed by an earlier root's extension.
            next_unchained += 1;
            continue;
        }
        let leaf_id = leaves.len() as u32;
        seeds[root].chain_link = leaf_id;
        let ref_id0 = seeds[root].ref_id;
        let mut scnt = 1u32;
        let plen0 = seeds[root].u + seeds[root].v;
        let mut cursor = root;
        let mut first_skipped: Option<usize> = None;
        let mut absorbed_chain_id: Option<u32> = None;

        loop {
            let u0 = seeds[cursor].u;
            let v0 = seeds[cursor].v;
            let mut best: Option<(i64, usize)> = None;

            let mut sid = cursor + 1;
            while sid < n && seeds[sid].ref_id == ref_id0 && seeds[sid].v <= v0 + w {
                let du = seeds[sid].u - u0;
                let dv = seeds[sid].v - v0;
                let in_full_window = du > 0 && du <= w && dv > 0 && dv <= w;
                if !in_full_window {
                    if first_skipped.is_none() {
                        first_skipped = Some(sid);
                    }
                    sid += 1;
                    continue;
                }
                // Prefer the candidate closest to the true anti-diagonal
                // (smallest |du - dv|); ties break to the smaller sid.
                let closeness = -((du - dv).abs());
                match best {
                    None => best = Some((closeness, sid)),
                    Some((bd, bsid)) => {
                        if closeness > bd || (closeness == bd && sid < bsid) {
                            best = Some((closeness, sid));
                        }
                    }
                }
                sid += 1;
            }

            let Some((_, bsid)) = best else { break };
            if seeds[bsid].chain_link != UNCHAINED {
                absorbed_chain_id = Some(leaves[seeds[bsid].chain_link as usize].chain_id);
                break;
            }
            seeds[bsid].chain_link = leaf_id;
            scnt += 1;
            cursor = bsid;
        }

        next_unchained = first_skipped.unwrap_or(cursor + 1);

        let adjusted_plen = if scnt > 1 {
            let cur_p = seeds[cursor].u + seeds[cursor].v;
            ((1.0 - 1.0 / scnt as f64) * (cur_p - plen0) as f64).round() as i64
        } else {
            0
        };

        let chain_id = match absorbed_chain_id {
            Some(id) => id,
            None => {
                let id = chains.len() as u32;
                chains.push(Chain { id, path_length: 0, leaf: leaf_id as usize, linked_from: false });
                id
            }
        };
        leaves.push(Leaf { root_seed: root, leaf_seed: cursor, ref_id: ref_id0, chain_id });

        let chain_rec = &mut chains[chain_id as usize];
        if adjusted_plen > chain_rec.path_length {
            chain_rec.path_length = adjusted_plen;
            chain_rec.leaf = leaf_id as usize;
        }
    }

    chains.sort_by(|a, b| b.path_length.cmp(&a.path_length));
    (leaves, chains)
}

/// Collects the indices (into `seeds`) of every seed belonging to
/// `chain_id`, across all leaves that merged into it, ordered root-to-leaf
/// by `(u+v)` (the extension scheduler walks a chain in this order, §4.7).
pub fn seeds_in_chain(seeds: &[Seed], leaves: &[Leaf], chain_id: u32) -> Vec<usize> {
    let member_leaves: Vec<u32> = leaves
        .iter()
        .enumerate()
        .filter(|(_, l)| l.chain_id == chain_id)
        .map(|(i, _)| i as u32)
        .collect();
    let mut idxs: Vec<usize> = seeds
        .iter()
        .enumerate()
        .filter(|(_, s)| s.chain_link != UNCHAINED && member_leaves.contains(&s.chain_link))
        .map(|(i, _)| i)
        .collect();
    idxs.sort_unstable_by_key(|&i| seeds[i].u + seeds[i].v);
    idxs
}
