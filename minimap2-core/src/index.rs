//! Double-hash minimizer index over one or more reference sequences
//! (§4.2).
//!
//! The low `bucket_bits` bits of a k-mer hash select a first-level
//! bucket; within a bucket a [`RobinhoodTable`] keyed by the remaining
//! high bits either inlines a single `(ref_id, pos)` hit or points into a
//! per-bucket packed value array. Keys whose occurrence count exceeds the
//! rarest retained tier are dropped entirely (§4.2 step 3).

use std::io::{Read, Write};

use anyhow::{bail, Context, Result};
use tracing::debug;

use crate::error::MmError;
use crate::opts::IndexOptions;
use crate::robinhood::{RobinhoodTable, NOT_FOUND};
use crate::seq::RefSequence;
use crate::sketch::{unpack, Sketcher};

/// 4-byte magic at the head of a serialized index (§6): `0x0849414D`,
/// little-endian.
pub const INDEX_MAGIC: u32 = 0x0849_414D;

const INDIRECT_BIT: u64 = 1 << 63;

/// A decoded index hit: the reference it came from, its position, and the
/// strand the minimizer was observed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexHit {
    pub ref_id: u32,
    pub ref_pos: u32,
    pub strand: u8,
}

#[derive(Debug, Clone)]
struct Bucket {
    table: RobinhoodTable,
    values: Vec<(u32, u32)>, // (ref_id<<1|strand, ref_pos)
}

impl Bucket {
    fn empty() -> Self {
        Self { table: RobinhoodTable::with_capacity(4), values: Vec::new() }
    }
}

/// Build-time statistics, exposed so callers can tune `bucket_bits` and
/// `occurrence_fractions` (SPEC_FULL "Index build statistics").
#[derive(Debug, Clone)]
pub struct IndexStats {
    pub n_buckets: usize,
    pub n_distinct_keys: u64,
    pub n_dropped_keys: u64,
    pub occurrence_thresholds: Vec<u32>,
}

/// The double-hash minimizer index (§4.2).
#[derive(Debug, Clone)]
pub struct MinimizerIndex {
    opts: IndexOptions,
    buckets: Vec<Bucket>,
    pub seqs: Vec<RefSequence>,
    pub stats: IndexStats,
}

impl MinimizerIndex {
    /// Builds an index from a stream of reference sequences.
    pub fn build(opts: IndexOptions, refs: Vec<RefSequence>) -> Result<Self> {
        let bucket_bits = opts.bucket_bits;
        if bucket_bits as usize > 2 * opts.k {
            bail!("bucket_bits ({bucket_bits}) must be <= 2*k ({})", 2 * opts.k);
        }
        let n_buckets = 1usize << bucket_bits;
        let bucket_mask = (n_buckets as u64) - 1;

        let sketcher = Sketcher::new(opts.w, opts.k);

        // Step 1: sketch every reference, routing each minimizer into its
        // bucket's raw-entry list keyed by the high bits of its hash.
        let mut raw: Vec<Vec<(u64, u32, u32)>> = (0..n_buckets).map(|_| Vec::new()).collect();
        for r in &refs {
            let bases: Vec<u8> = (0..r.len)
                .map(|p| crate::seq::DEC_FORWARD[r.base_at(p) as usize])
                .collect();
            let (mins, _cap) = sketcher.sketch(&bases, None);
            for (m, ref_pos) in mins {
                let (hash, _window_pos, strand) = unpack(m);
                let bucket_idx = (hash & bucket_mask) as usize;
                let key_hi = hash >> bucket_bits;
                let ref_id_strand = (r.id << 1) | strand as u32;
                raw[bucket_idx].push((key_hi, ref_id_strand, ref_pos));
            }
        }

        // Step 2/3/4: per bucket, radix-sort by key_hi, derive occurrence
        // tiers globally, then build the second-level table.
        let mut run_counts: Vec<u32> = Vec::new();
        for entries in &mut raw {
            radix_sort_by_key_hi(entries);
            let mut i = 0;
            while i < entries.len() {
                let mut j = i + 1;
                while j < entries.len() && entries[j].0 == entries[i].0 {
                    j += 1;
                }
                run_counts.push((j - i) as u32);
                i = j;
            }
        }
        let thresholds = compute_occurrence_thresholds(&run_counts, &opts.occurrence_fractions);
        let drop_above = *thresholds.last().unwrap_or(&u32::MAX);

        let mut buckets = Vec::with_capacity(n_buckets);
        let mut n_distinct = 0u64;
        let mut n_dropped = 0u64;
        for entries in raw {
            let mut bucket = Bucket::empty();
            let mut i = 0;
            while i < entries.len() {
                let mut j = i + 1;
                while j < entries.len() && entries[j].0 == entries[i].0 {
                    j += 1;
                }
                let key_hi = entries[i].0;
                let count = (j - i) as u32;
                n_distinct += 1;
                if count > drop_above {
                    n_dropped += 1;
                    i = j;
                    continue;
                }
                if count == 1 {
                    let (_, rid_strand, pos) = entries[i];
                    let value = ((rid_strand as u64) << 32) | pos as u64;
                    bucket.table.put(key_hi, value);
                } else {
                    let base = bucket.values.len() as u32;
                    for &(_, rid_strand, pos) in &entries[i..j] {
                        bucket.values.push((rid_strand, pos));
                    }
                    let value = INDIRECT_BIT | ((base as u64) << 32) | count as u64;
                    bucket.table.put(key_hi, value);
                }
                i = j;
            }
            buckets.push(bucket);
        }

        debug!(
            n_buckets,
            n_distinct_keys = n_distinct,
            n_dropped_keys = n_dropped,
            ?thresholds,
            "built minimizer index"
        );

        Ok(Self {
            opts,
            buckets,
            seqs: refs,
            stats: IndexStats {
                n_buckets,
                n_distinct_keys: n_distinct,
                n_dropped_keys: n_dropped,
                occurrence_thresholds: thresholds,
            },
        })
    }

    pub fn k(&self) -> usize {
        self.opts.k
    }

    pub fn w(&self) -> usize {
        self.opts.w
    }

    pub fn bucket_bits(&self) -> u32 {
        self.opts.bucket_bits
    }

    /// The occurrence count above which a key was dropped entirely during
    /// build (§4.2 step 3).
    pub fn drop_threshold(&self) -> u32 {
        *self.stats.occurrence_thresholds.last().unwrap_or(&u32::MAX)
    }

    /// Looks up all `(ref_id, ref_pos, strand)` hits for a raw minimizer
    /// hash. Returns an empty slice both when the key was never seen and
    /// when it was dropped as too repetitive (§4.2 lookup contract).
    pub fn lookup(&self, hash: u64) -> Vec<IndexHit> {
        let n_buckets = self.buckets.len() as u64;
        let bucket_idx = (hash & (n_buckets - 1)) as usize;
        let key_hi = hash >> self.opts.bucket_bits;
        let bucket = &self.buckets[bucket_idx];
        let value = bucket.table.get(key_hi);
        if value == NOT_FOUND {
            return Vec::new();
        }
        if value & INDIRECT_BIT != 0 {
            let base = ((value >> 32) & 0x7fff_ffff) as usize;
            let count = (value & 0xffff_ffff) as usize;
            bucket.values[base..base + count]
                .iter()
                .map(|&(rid_strand, pos)| IndexHit {
                    ref_id: rid_strand >> 1,
                    strand: (rid_strand & 1) as u8,
                    ref_pos: pos,
                })
                .collect()
        } else {
            let rid_strand = (value >> 32) as u32;
            let pos = (value & 0xffff_ffff) as u32;
            vec![IndexHit { ref_id: rid_strand >> 1, strand: (rid_strand & 1) as u8, ref_pos: pos }]
        }
    }

    /// The occurrence count of `hash` as retained in the built table (0
    /// both when the key was never seen and when it was dropped as too
    /// repetitive at build time, §4.2 step 3) — a convenience wrapper
    /// around [`Self::lookup`] for callers that only need the count.
    pub fn occurrence_count(&self, hash: u64) -> usize {
        self.lookup(hash).len()
    }

    /// Serializes the index to `w` in the flat format described by §4.2
    /// and §6: magic, size, header, bucket array, sequence records,
    /// per-bucket tables and packed value arrays.
    pub fn serialize(&self, w: &mut dyn Write) -> Result<()> {
        let mut body = Vec::new();
        body.extend_from_slice(&(self.opts.k as u32).to_le_bytes());
        body.extend_from_slice(&(self.opts.w as u32).to_le_bytes());
        body.extend_from_slice(&self.opts.bucket_bits.to_le_bytes());
        body.extend_from_slice(&(self.opts.occurrence_fractions.len() as u32).to_le_bytes());
        for &f in &self.opts.occurrence_fractions {
            body.extend_from_slice(&f.to_le_bytes());
        }

        body.extend_from_slice(&(self.seqs.len() as u32).to_le_bytes());
        for s in &self.seqs {
            body.extend_from_slice(&s.id.to_le_bytes());
            body.extend_from_slice(&(s.name.len() as u32).to_le_bytes());
            body.extend_from_slice(s.name.as_bytes());
            body.extend_from_slice(&s.len.to_le_bytes());
            body.push(s.circular as u8);
            body.extend_from_slice(&(s.packed.len() as u32).to_le_bytes());
            body.extend_from_slice(&s.packed);
        }

        body.extend_from_slice(&(self.buckets.len() as u32).to_le_bytes());
        for bucket in &self.buckets {
            let pairs = bucket.table.serialize();
            body.extend_from_slice(&(pairs.len() as u32).to_le_bytes());
            for (k, v) in pairs {
                body.extend_from_slice(&k.to_le_bytes());
                body.extend_from_slice(&v.to_le_bytes());
            }
            body.extend_from_slice(&(bucket.values.len() as u32).to_le_bytes());
            for &(a, b) in &bucket.values {
                body.extend_from_slice(&a.to_le_bytes());
                body.extend_from_slice(&b.to_le_bytes());
            }
        }

        w.write_all(&INDEX_MAGIC.to_le_bytes())
            .context("writing index magic")?;
        w.write_all(&(body.len() as u64).to_le_bytes())
            .context("writing index size")?;
        w.write_all(&body).context("writing index body")?;
        Ok(())
    }

    /// Deserializes an index previously written by [`Self::serialize`].
    /// A single contiguous read; the in-memory layout may be mmap-backed
    /// by the caller's `Read` implementation.
    pub fn deserialize(r: &mut dyn Read) -> Result<Self> {
        let mut magic_buf = [0u8; 4];
        r.read_exact(&mut magic_buf).context("reading index magic")?;
        let magic = u32::from_le_bytes(magic_buf);
        if magic != INDEX_MAGIC {
            return Err(MmError::IndexMagicMismatch { found: magic }.into());
        }
        let mut size_buf = [0u8; 8];
        r.read_exact(&mut size_buf).context("reading index size")?;
        let size = u64::from_le_bytes(size_buf) as usize;
        let mut body = vec![0u8; size];
        r.read_exact(&mut body)
            .map_err(|_| MmError::TruncatedBlock { at_offset: 12 })?;

        let mut cur = Cursor::new(&body);
        let k = cur.read_u32()? as usize;
        let w = cur.read_u32()? as usize;
        let bucket_bits = cur.read_u32()?;
        let n_frac = cur.read_u32()? as usize;
        let mut occurrence_fractions = Vec::with_capacity(n_frac);
        for _ in 0..n_frac {
            occurrence_fractions.push(cur.read_f64()?);
        }
        let opts = IndexOptions { k, w, bucket_bits, occurrence_fractions };

        let n_seq = cur.read_u32()? as usize;
        let mut seqs = Vec::with_capacity(n_seq);
        for _ in 0..n_seq {
            let id = cur.read_u32()?;
            let name_len = cur.read_u32()? as usize;
            let name = String::from_utf8_lossy(cur.read_bytes(name_len)?).into_owned();
            let len = cur.read_u32()?;
            let circular = cur.read_u8()? != 0;
            let packed_len = cur.read_u32()? as usize;
            let packed = cur.read_bytes(packed_len)?.to_vec();
            seqs.push(RefSequence { id, name, len, packed, circular });
        }

        let n_buckets = cur.read_u32()? as usize;
        let mut buckets = Vec::with_capacity(n_buckets);
        let mut n_distinct = 0u64;
        for _ in 0..n_buckets {
            let n_pairs = cur.read_u32()? as usize;
            let mut pairs = Vec::with_capacity(n_pairs);
            for _ in 0..n_pairs {
                let key = cur.read_u64()?;
                let value = cur.read_u64()?;
                pairs.push((key, value));
            }
            n_distinct += n_pairs as u64;
            let table = RobinhoodTable::deserialize(&pairs);
            let n_values = cur.read_u32()? as usize;
            let mut values = Vec::with_capacity(n_values);
            for _ in 0..n_values {
                let a = cur.read_u32()?;
                let b = cur.read_u32()?;
                values.push((a, b));
            }
            buckets.push(Bucket { table, values });
        }

        Ok(Self {
            opts,
            buckets,
            seqs,
            stats: IndexStats {
                n_buckets,
                n_distinct_keys: n_distinct,
                n_dropped_keys: 0,
                occurrence_thresholds: Vec::new(),
            },
        })
    }
}

/// LSD radix sort over `(key_hi, _, _)` triples, 11 bits per pass (§4.2
/// step 2, §9 Design Notes: "sort via a radix sort keyed on a named
/// field").
fn radix_sort_by_key_hi(entries: &mut Vec<(u64, u32, u32)>) {
    if entries.len() < 2 {
        return;
    }
    const BITS: u32 = 11;
    const BUCKETS: usize = 1 << BITS;
    let max_key = entries.iter().map(|e| e.0).max().unwrap_or(0);
    let mut src = std::mem::take(entries);
    let mut dst = vec![(0u64, 0u32, 0u32); src.len()];
    let mut shift = 0u32;
    loop {
        let mut counts = [0usize; BUCKETS + 1];
        for e in &src {
            let b = ((e.0 >> shift) as usize) & (BUCKETS - 1);
            counts[b + 1] += 1;
        }
        for i in 0..BUCKETS {
            counts[i + 1] += counts[i];
        }
        for e in &src {
            let b = ((e.0 >> shift) as usize) & (BUCKETS - 1);
            dst[counts[b]] = *e;
            counts[b] += 1;
        }
        std::mem::swap(&mut src, &mut dst);
        shift += BITS;
        if shift >= 64 || (max_key >> shift) == 0 {
            break;
        }
    }
    *entries = src;
}

/// Derives up to `fractions.len()` occurrence thresholds by percentile
/// selection among per-key counts (§4.2 step 3).
fn compute_occurrence_thresholds(run_counts: &[u32], fractions: &[f64]) -> Vec<u32> {
    if run_counts.is_empty() {
        return fractions.iter().map(|_| u32::MAX).collect();
    }
    let mut sorted = run_counts.to_vec();
    sorted.sort_unstable_by(|a, b| b.cmp(a));
    fractions
        .iter()
        .map(|&f| {
            let idx = ((f * sorted.len() as f64) as usize).min(sorted.len() - 1);
            sorted[idx]
        })
        .collect()
}

/// Minimal cursor over an in-memory byte buffer for the hand-rolled index
/// binary format (no serde: the format's layout is part of the contract
/// in §4.2, not something a generic serializer should own).
struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.buf.len() {
            return Err(MmError::TruncatedBlock { at_offset: self.pos as u64 }.into());
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.read_bytes(4)?.try_into().unwrap()))
    }

    fn read_u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.read_bytes(8)?.try_into().unwrap()))
    }

    fn read_f64(&mut self) -> Result<f64> {
        Ok(f64::from_le_bytes(self.read_bytes(8)?.try_into().unwrap()))
    }
}
