//! Drive the external gapped-DP kernel over chains, with dedup,
//! supplementary/secondary classification, and mapq (§4.7).

use crate::chain::{seeds_in_chain, Chain, Leaf};
use crate::dp::{AlignmentRecord, DpDirection, DpKernel, FillCell};
use crate::opts::MapOptions;
use crate::robinhood::{RobinhoodTable, NOT_FOUND};
use crate::seed::Seed;
use crate::seq::RefSequence;

/// Seeds inside this many bases of the current extension position are
/// skipped when picking the next up-chain seed (§4.7 step 4).
const EXCLUSION_ZONE: i64 = 128;
/// Cap on consecutive dedup hits before abandoning a chain attempt
/// (§4.7 step 3b).
const MAX_NARROW_BAND: u32 = 2;

/// Per-chain accumulator of accepted alignments (§3).
#[derive(Debug, Clone)]
pub struct ResultBin {
    pub chain_id: u32,
    pub n_aln: u32,
    pub query_lb: u32,
    pub query_ub: u32,
    pub aggregate_path_length: i64,
    pub alignments: Vec<AlignmentRecord>,
}

impl ResultBin {
    fn new(chain_id: u32) -> Self {
        Self {
            chain_id,
            n_aln: 0,
            query_lb: u32::MAX,
            query_ub: 0,
            aggregate_path_length: 0,
            alignments: Vec::new(),
        }
    }

    fn best_score(&self) -> i32 {
        self.alignments.iter().map(|a| a.score).max().unwrap_or(i32::MIN)
    }

    fn best_alignment(&self) -> Option<&AlignmentRecord> {
        self.alignments.iter().max_by_key(|a| a.score)
    }
}

/// Classification assigned to a [`ResultBin`] during post-processing
/// (§4.7 post-processing step 2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultClass {
    Primary,
    Supplementary,
    Secondary,
}

/// A finished, classified, mapq-scored result bin (§4.7 post-processing).
#[derive(Debug, Clone)]
pub struct MappedResult {
    pub bin: ResultBin,
    pub class: ResultClass,
    pub mapq: u8,
}

/// Folds a `(ref_id, query_id, ref_pos, query_pos)` tuple into a 64-bit
/// dedup key. Collisions only risk an occasional spurious dedup hit, not
/// correctness of the alignment set itself (§3's dedup hash is itself a
/// heuristic device, not an exact index).
fn dedup_key(ref_id: u32, query_id: u32, ref_pos: i64, query_pos: i64) -> u64 {
    let a = ((ref_id as u64) << 32) | (ref_pos as u32 as u64);
    let b = ((query_id as u64) << 32) | (query_pos as u32 as u64);
    a ^ b.wrapping_mul(0x9E37_79B9_7F4A_7C15).rotate_left(17)
}

/// Maps `(bin_idx, aln_idx)` into/out of a single dedup-hash value.
fn pack_bin_aln(bin_idx: usize, aln_idx: usize) -> u64 {
    ((bin_idx as u64) << 32) | (aln_idx as u64)
}

fn unpack_bin_aln(v: u64) -> (usize, usize) {
    ((v >> 32) as usize, (v & 0xFFFF_FFFF) as usize)
}

/// Per-query dedup hash: records `(ref_id, query_id, ref_pos, query_pos)`
/// positions already covered by an accepted alignment, so a farther seed
/// whose DP traceback lands on the same cell doesn't produce a second
/// alignment record (§3, §8 invariant 4).
struct DedupHash {
    table: RobinhoodTable,
}

impl DedupHash {
    fn new() -> Self {
        Self { table: RobinhoodTable::new() }
    }

    fn lookup(&self, ref_id: u32, query_id: u32, ref_pos: i64, query_pos: i64) -> Option<(usize, usize)> {
        let v = self.table.get(dedup_key(ref_id, query_id, ref_pos, query_pos));
        if v == NOT_FOUND {
            None
        } else {
            Some(unpack_bin_aln(v))
        }
    }

    fn insert(&mut self, ref_id: u32, query_id: u32, ref_pos: i64, query_pos: i64, bin_idx: usize, aln_idx: usize) {
        self.table.put(dedup_key(ref_id, query_id, ref_pos, query_pos), pack_bin_aln(bin_idx, aln_idx));
    }
}

/// Current extension position and per-chain-attempt budget state (§4.7
/// "State per chain attempt").
struct ChainAttempt {
    ref_pos: i64,
    query_pos: i64,
    seed_budget_remaining: u32,
    narrow_band_counter: u32,
    min_score_local: i32,
}

/// Drives the extension scheduler across every chain for one query,
/// returning the final classified, mapq-scored result set (§4.7).
///
/// `chains` must already be sorted by `path_length` descending
/// ([`crate::chain::chain`] / [`crate::circular::link_circular`] both
/// leave it that way); chains with `linked_from` set are skipped — they
/// were absorbed into an outer chain across a circular reference's
/// origin and no longer stand on their own.
#[allow(clippy::too_many_arguments)]
pub fn extend_chains<K: DpKernel>(
    kernel: &K,
    dp: &mut K::ThreadLocal,
    refs: &[RefSequence],
    query_id: u32,
    query_bases: &[u8],
    seeds: &[Seed],
    leaves: &[Leaf],
    chains: &[Chain],
    opts: &MapOptions,
) -> Vec<MappedResult> {
    let (mcoef, xcoef) = opts.scoring_matrix.mcoef_xcoef();
    let mut dedup = DedupHash::new();
    let mut bins: Vec<ResultBin> = Vec::new();
    let mut chain_budget = opts.max_chain_trials;

    for chain in chains.iter().filter(|c| !c.linked_from) {
        if chain_budget == 0 {
            break;
        }
        // Step 1: drop chains that can't possibly clear min_score.
        if (chain.path_length as f64) * mcoef < 2.0 * opts.min_score as f64 {
            continue;
        }
        let leaf = leaves[chain.leaf];
        let ref_seq = &refs[leaf.ref_id as usize];
        let member_seeds = seeds_in_chain(seeds, leaves, chain.id);
        let Some(&tail_idx) = member_seeds.last() else { continue };
        let tail = seeds[tail_idx];

        let bin_idx = bins.len();
        bins.push(ResultBin::new(chain.id));
        let mut attempt = ChainAttempt {
            ref_pos: tail.ref_pos as i64,
            query_pos: tail.query_pos as i64,
            seed_budget_remaining: opts.max_seed_trials,
            narrow_band_counter: 0,
            min_score_local: opts.min_score,
        };

        loop {
            let downward = kernel.dp_fill_root(
                dp,
                &ref_seq.packed,
                attempt.ref_pos,
                query_bases,
                attempt.query_pos,
                DpDirection::Downward,
            );
            let downward = drive_past_section_boundary(kernel, dp, ref_seq, query_bases, downward, DpDirection::Downward);
            let (max_ref, max_query, _plen) = kernel.dp_search_max(dp, &downward);

            if let Some((dup_bin, dup_aln)) = dedup.lookup(leaf.ref_id, query_id, max_ref, max_query) {
                let dup_plen = bins[dup_bin].alignments[dup_aln].plen as i64;
                if dup_plen >= chain.path_length {
                    attempt.narrow_band_counter += 1;
                    if attempt.narrow_band_counter > MAX_NARROW_BAND {
                        break;
                    }
                    if !advance_seed(&member_seeds, seeds, &mut attempt, opts.tglen) {
                        break;
                    }
                    continue;
                }
            }
            attempt.narrow_band_counter = 0;

            let upward = kernel.dp_fill_root(
                dp,
                &ref_seq.packed,
                max_ref,
                query_bases,
                max_query,
                DpDirection::Upward,
            );
            let upward = drive_past_section_boundary(kernel, dp, ref_seq, query_bases, upward, DpDirection::Upward);

            match kernel.dp_trace(dp, &upward) {
                Some(record) if record.score >= attempt.min_score_local => {
                    let head_query = record.segments.first().map(|s| s.query_start as i64).unwrap_or(attempt.query_pos);
                    let query_end = record
                        .segments
                        .iter()
                        .map(|s| s.query_start + s.query_len)
                        .max()
                        .unwrap_or(head_query as u32);
                    let bin = &mut bins[bin_idx];
                    // Keyed on the same downward max cell the lookup above
                    // uses, so a farther seed whose traceback reaches the
                    // same max actually hits this record (§8 invariant 4).
                    dedup.insert(leaf.ref_id, query_id, max_ref, max_query, bin_idx, bin.alignments.len());
                    bin.query_lb = bin.query_lb.min(head_query as u32);
                    bin.query_ub = bin.query_ub.max(query_end);
                    bin.aggregate_path_length += record.plen as i64;
                    attempt.min_score_local = attempt.min_score_local.max((record.score as f64 * opts.min_ratio) as i32);
                    bin.n_aln += 1;
                    bin.alignments.push(record);
                }
                _ => {}
            }

            if !advance_seed(&member_seeds, seeds, &mut attempt, opts.tglen) {
                break;
            }
            if attempt.seed_budget_remaining == 0 {
                break;
            }
        }

        if bins[bin_idx].n_aln == 0 {
            bins.pop();
            chain_budget = chain_budget.saturating_sub(1);
        } else {
            chain_budget = opts.max_chain_trials;
        }
    }

    classify_and_score(bins, opts, mcoef, xcoef)
}

/// Continues a fill across a circular reference's origin when the kernel
/// reports it ran off the end of the section it was given (§4.7 step 3a:
/// "The DP sees the reference twice — forward and reverse — via tail
/// sections so it can detect section boundaries and stop"). Non-circular
/// references, and fills that reached a genuine terminal condition, return
/// the cell unchanged. Bounded to one hop: a single wrap is all a chain
/// spanning the origin once can need.
fn drive_past_section_boundary<K: DpKernel>(
    kernel: &K,
    dp: &mut K::ThreadLocal,
    ref_seq: &RefSequence,
    query_bases: &[u8],
    cell: K::Cell,
    direction: DpDirection,
) -> K::Cell {
    let status = cell.status();
    if ref_seq.circular && status.crossed_section_boundary && !status.terminal {
        kernel.dp_fill(dp, &cell, &ref_seq.packed, query_bases, direction)
    } else {
        cell
    }
}

/// Pops the closest up-chain seed within `tglen` of the current position,
/// skipping a 128-base exclusion zone around it (§4.7 step 4). Returns
/// `false` (stop the chain) when no such seed remains.
fn advance_seed(member_seeds: &[usize], seeds: &[Seed], attempt: &mut ChainAttempt, tglen: i64) -> bool {
    if attempt.seed_budget_remaining == 0 {
        return false;
    }
    let mut best: Option<(i64, usize)> = None;
    for &idx in member_seeds {
        let s = seeds[idx];
        let dref = attempt.ref_pos - s.ref_pos as i64;
        let dquery = attempt.query_pos - s.query_pos as i64;
        if dref <= 0 || dquery <= 0 {
            continue;
        }
        if dref > tglen || dquery > tglen {
            continue;
        }
        if dref < EXCLUSION_ZONE && dquery < EXCLUSION_ZONE {
            continue;
        }
        let pdist = dref + dquery;
        if best.map_or(true, |(bd, _)| pdist < bd) {
            best = Some((pdist, idx));
        }
    }
    match best {
        Some((_, idx)) => {
            attempt.ref_pos = seeds[idx].ref_pos as i64;
            attempt.query_pos = seeds[idx].query_pos as i64;
            attempt.seed_budget_remaining -= 1;
            true
        }
        None => false,
    }
}

/// Post-processing (§4.7): sort by score, drop weak results, classify
/// primary/supplementary/secondary, and estimate mapq.
fn classify_and_score(mut bins: Vec<ResultBin>, opts: &MapOptions, mcoef: f64, xcoef: f64) -> Vec<MappedResult> {
    bins.sort_by(|a, b| b.best_score().cmp(&a.best_score()));
    let best_score = bins.first().map(|b| b.best_score()).unwrap_or(0);
    bins.retain(|b| (b.best_score() as f64) >= opts.min_ratio * best_score as f64);

    let mut covered: Vec<(u32, u32)> = Vec::new();
    let mut results = Vec::with_capacity(bins.len());
    let mut second_best = i32::MIN;

    for bin in bins {
        let span = (bin.query_lb, bin.query_ub);
        let overlap_len: u32 = covered
            .iter()
            .map(|&(lb, ub)| {
                let lo = lb.max(span.0);
                let hi = ub.min(span.1);
                hi.saturating_sub(lo)
            })
            .sum();
        let span_len = span.1.saturating_sub(span.0).max(1);
        let class = if (overlap_len as f64) >= opts.secondary_overlap_ratio * span_len as f64 {
            ResultClass::Secondary
        } else if results.iter().any(|r: &MappedResult| r.class == ResultClass::Primary) {
            ResultClass::Supplementary
        } else {
            ResultClass::Primary
        };
        if class != ResultClass::Secondary {
            covered.push(span);
        }

        let score = bin.best_score();
        let mapq = if class == ResultClass::Secondary {
            ((score as f64 / best_score.max(1) as f64) * 60.0).clamp(0.0, 60.0) as u8
        } else {
            let identity = bin.best_alignment().map(|a| a.identity).unwrap_or(1.0);
            let mapq_val = estimate_mapq(score, second_best, identity, mcoef, xcoef);
            second_best = second_best.max(score);
            mapq_val
        };

        results.push(MappedResult { bin, class, mapq });
    }

    results
}

/// Estimates mapping quality from score margin over the second-best chain
/// (§4.7 post-processing step 3, §8 S6):
/// `ulen = (2 / (identity·(mcoef+xcoef) − xcoef)) · max(0, score − second_best_score)`,
/// `pe = 1 / (ulen² + 1)`, `mapq = clip(0, −10·log₁₀(pe), 60)`.
fn estimate_mapq(score: i32, second_best_score: i32, identity: f64, mcoef: f64, xcoef: f64) -> u8 {
    let denom = identity * (mcoef + xcoef) - xcoef;
    if denom <= 0.0 {
        return 0;
    }
    let score_margin = (score - second_best_score.max(0)).max(0) as f64;
    let ulen = (2.0 / denom) * score_margin;
    let pe = 1.0 / (ulen * ulen + 1.0);
    let mapq = -10.0 * pe.max(1e-12).log10();
    mapq.clamp(0.0, 60.0) as u8
}
