//! Streaming (w,k)-minimizer extraction (§4.1).
//!
//! Maintains two rolling k-mers (forward and reverse-complement) and a
//! monotonic deque over the trailing `w` k-mer hashes so each window's
//! minimum is available in O(1) amortized time. Restartable from a
//! [`SketchCap`] so a circular reference's wrapped tail can be sketched as
//! a continuation of its head (§4.6).

use std::collections::VecDeque;

use crate::seq::{ENC_FORWARD, ENC_REVERSE};

/// Opaque resume point for [`Sketcher::sketch`]. Two segments sketched
/// back-to-back with the cap threaded between them emit the same
/// minimizers as sketching the concatenation directly, which is what lets
/// the circular linker sketch a reference's wrap-around tail without
/// re-scanning the whole sequence (§4.1, §4.6).
#[derive(Debug, Clone, Copy, Default)]
pub struct SketchCap {
    /// Index (0-based) of the next k-mer to be formed.
    pub kmer_index: u64,
    /// Hash of the last minimizer emitted, used only for diagnostics —
    /// the deque state below is what actually drives continuation.
    pub last_emitted_hash: u64,
    forward_kmer: u64,
    reverse_kmer: u64,
    valid_run: u32,
}

/// A single emitted minimizer, packed as `hash<<8 | window_pos<<1 | strand`
/// per §3/§4.1.
pub type PackedMinimizer = u64;

/// Unpacks a [`PackedMinimizer`] into `(hash, window_pos, strand)`.
pub fn unpack(m: PackedMinimizer) -> (u64, u8, u8) {
    (m >> 8, ((m >> 1) & 0x7f) as u8, (m & 1) as u8)
}

fn pack(hash: u64, window_pos: u32, strand: u8) -> PackedMinimizer {
    (hash << 8) | ((window_pos as u64) << 1) | (strand as u64 & 1)
}

/// A sketcher bound to one `(w, k)` parameter pair.
#[derive(Debug, Clone, Copy)]
pub struct Sketcher {
    pub w: usize,
    pub k: usize,
    mask: u64,
}

impl Sketcher {
    pub fn new(w: usize, k: usize) -> Self {
        assert!(k > 0 && k <= 32, "k must be in 1..=32");
        assert!(w > 0, "w must be positive");
        let mask = if 2 * k >= 64 { u64::MAX } else { (1u64 << (2 * k)) - 1 };
        Self { w, k, mask }
    }

    /// Folds a canonical k-mer into a hash, masked to `2*k` bits (§4.1:
    /// "Hash = crc32(km) ^ km masked to 2k bits").
    fn hash_kmer(&self, km: u64) -> u64 {
        let crc = crc32fast::hash(&km.to_le_bytes()) as u64;
        (crc ^ km) & self.mask
    }

    /// Sketches `seq` (raw ASCII bases), resuming from `cap` if given.
    /// Returns the emitted minimizers in sketch order, each paired with its
    /// absolute k-mer start position (0-based, continuing across resumed
    /// calls via `cap.kmer_index`), and the cap needed to continue
    /// sketching a subsequent segment.
    ///
    /// The position is carried alongside the packed value rather than
    /// reconstructed from its window-relative `window_pos` field: a
    /// minimizer is only emitted when the window minimum changes, so a
    /// per-emission counter undercounts the true window start.
    pub fn sketch(&self, seq: &[u8], cap: Option<SketchCap>) -> (Vec<(PackedMinimizer, u32)>, SketchCap) {
        let mut state = cap.unwrap_or_default();
        let mut out = Vec::new();
        // Deque of (hash, kmer_index), increasing in hash from front to
        // back, ties broken to earlier kmer_index (§4.1: "ties: first
        // occurrence").
        let mut deque: VecDeque<(u64, u64)> = VecDeque::new();
        let mut last_front: Option<(u64, u64)> = None;

        for &base in seq {
            let c = if base < 128 { ENC_FORWARD[base as usize] } else { 4 };
            if c == 4 {
                state.valid_run = 0;
                state.forward_kmer = 0;
                state.reverse_kmer = 0;
                continue;
            }
            state.forward_kmer = ((state.forward_kmer << 2) | c as u64) & self.mask;
            let rc = ENC_REVERSE[base as usize] as u64;
            state.reverse_kmer = (state.reverse_kmer >> 2)
                | (rc << (2 * (self.k.saturating_sub(1))));
            state.reverse_kmer &= self.mask;
            state.valid_run += 1;
            if (state.valid_run as usize) < self.k {
                continue;
            }
            let ks = state.kmer_index;
            state.kmer_index += 1;

            let (km, strand) = if state.forward_kmer <= state.reverse_kmer {
                (state.forward_kmer, 0u8)
            } else {
                (state.reverse_kmer, 1u8)
            };
            let hash = self.hash_kmer(km);

            while let Some(&(back_hash, _)) = deque.back() {
                if back_hash > hash {
                    deque.pop_back();
                } else {
                    break;
                }
            }
            deque.push_back((hash, ks | ((strand as u64) << 63)));

            let window_start = ks.saturating_sub(self.w as u64 - 1);
            while let Some(&(_, front_tag)) = deque.front() {
                let front_ks = front_tag & !(1u64 << 63);
                if front_ks < window_start {
                    deque.pop_front();
                } else {
                    break;
                }
            }

            if ks + 1 >= self.w as u64 {
                let &(front_hash, front_tag) = deque.front().expect("window non-empty");
                let front_ks = front_tag & !(1u64 << 63);
                let front_strand = (front_tag >> 63) as u8;
                let cur = (front_hash, front_ks);
                if last_front != Some(cur) {
                    let window_pos = (front_ks - window_start) as u32;
                    out.push((pack(front_hash, window_pos, front_strand), front_ks as u32));
                    state.last_emitted_hash = front_hash;
                    last_front = Some(cur);
                }
            }
        }
        (out, state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn canonical_kmer_hash(sk: &Sketcher, kmer: &[u8]) -> u64 {
        let mut fw = 0u64;
        let mut rv = 0u64;
        for &b in kmer {
            let c = ENC_FORWARD[b as usize] as u64;
            let rc = ENC_REVERSE[b as usize] as u64;
            fw = ((fw << 2) | c) & sk.mask;
            rv = (rv >> 2) | (rc << (2 * (sk.k - 1)));
            rv &= sk.mask;
        }
        let km = fw.min(rv);
        sk.hash_kmer(km)
    }

    /// S1: w=5, k=3 over a periodic sequence — the window minimum repeats
    /// with the same period as the input.
    #[test]
    fn s1_periodic_sequence_sketch() {
        let sk = Sketcher::new(5, 3);
        let seq = b"ACGTACGTACGT";
        let (mins, _) = sk.sketch(seq, None);
        assert!(!mins.is_empty());
        let hashes: Vec<u64> = mins.iter().map(|&(m, _)| unpack(m).0).collect();
        // every emitted hash must equal the true minimum of its window of
        // canonical 3-mers
        let n_kmers = seq.len() - 3 + 1;
        let mut kmer_hashes = Vec::new();
        for i in 0..n_kmers {
            kmer_hashes.push(canonical_kmer_hash(&sk, &seq[i..i + 3]));
        }
        for w in 0..=(n_kmers - 5) {
            let window_min = kmer_hashes[w..w + 5].iter().copied().min().unwrap();
            assert!(hashes.contains(&window_min));
        }
    }

    #[test]
    fn reverse_complement_yields_same_canonical_hashes() {
        let sk = Sketcher::new(4, 5);
        let seq = b"ACGTAGGCATCGATCG";
        let mut rc = Vec::new();
        crate::seq::revcomp_2bit(
            &seq.iter().map(|&b| ENC_FORWARD[b as usize]).collect::<Vec<_>>(),
            &mut rc,
        );
        let rc_ascii: Vec<u8> = rc.iter().map(|&c| crate::seq::DEC_FORWARD[c as usize]).collect();

        let (fwd_mins, _) = sk.sketch(seq, None);
        let (rev_mins, _) = sk.sketch(&rc_ascii, None);

        let mut fwd_hashes: Vec<u64> = fwd_mins.iter().map(|&(m, _)| unpack(m).0).collect();
        let mut rev_hashes: Vec<u64> = rev_mins.iter().map(|&(m, _)| unpack(m).0).collect();
        fwd_hashes.sort_unstable();
        rev_hashes.sort_unstable();
        assert_eq!(fwd_hashes, rev_hashes);
    }

    #[test]
    fn resuming_from_cap_matches_single_pass() {
        let sk = Sketcher::new(4, 5);
        let seq = b"ACGTAGGCATCGATCGACGTAGGCATCGATCGAA";
        let (whole, _) = sk.sketch(seq, None);

        let (first, cap) = sk.sketch(&seq[..20], None);
        let (rest, _) = sk.sketch(&seq[20..], Some(cap));
        let mut resumed = first;
        resumed.extend(rest);

        let whole_hashes: Vec<u64> = whole.iter().map(|&(m, _)| unpack(m).0).collect();
        let resumed_hashes: Vec<u64> = resumed.iter().map(|&(m, _)| unpack(m).0).collect();
        assert_eq!(whole_hashes, resumed_hashes);

        // absolute positions must also agree across the split, since
        // `kmer_index` threads through the cap rather than resetting.
        let whole_pos: Vec<u32> = whole.iter().map(|&(_, p)| p).collect();
        let resumed_pos: Vec<u32> = resumed.iter().map(|&(_, p)| p).collect();
        assert_eq!(whole_pos, resumed_pos);
    }
}
