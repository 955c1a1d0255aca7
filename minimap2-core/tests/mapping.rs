//! Integration tests driving the full query-side dataflow (sketch → seed
//! → chain → circular link → extend, and the batch pipeline around it)
//! against a minimal stand-in `DpKernel` — a greedy ungapped extender with
//! a fixed x-drop, good enough to exercise chaining and dedup without
//! needing the real banded Smith-Waterman-Gotoh kernel this crate treats
//! as an external collaborator (§1).

use std::sync::{Arc, Mutex};

use minimap2_core::batch::{AlignmentSet, AlignmentSink, BatchSource, SeqBatch, SeqRecord};
use minimap2_core::dp::{AlignmentRecord, DpDirection, DpKernel, FillCell, FillStatus, Segment};
use minimap2_core::index::MinimizerIndex;
use minimap2_core::map::{map_one_query, run_mapping_pipeline};
use minimap2_core::opts::{IndexOptions, MapOptions};
use minimap2_core::seq::{RefSequence, ENC_FORWARD, SEQ_MARGIN};

/// Greedy ungapped extender: walks one base at a time in `direction`,
/// scoring +1 per match and -1 per mismatch, tracking the best-scoring
/// position reached, and stopping once the running score falls more than
/// `XDROP` below that best (a minimal stand-in for the real x-drop banded
/// DP kernel this crate drives through the [`DpKernel`] trait).
struct FakeKernel;

const XDROP: i32 = 5;

#[derive(Debug, Clone, Copy)]
struct Cell {
    start_r: i64,
    start_q: i64,
    max_r: i64,
    max_q: i64,
    score: i32,
}

impl FillCell for Cell {
    fn max_score(&self) -> i32 {
        self.score
    }
    fn status(&self) -> FillStatus {
        FillStatus::default()
    }
}

fn extend(ref_bases: &[u8], ref_pos: i64, query_bases: &[u8], query_pos: i64, direction: DpDirection) -> Cell {
    let step: i64 = match direction {
        DpDirection::Downward => 1,
        DpDirection::Upward => -1,
    };
    let mut r = ref_pos;
    let mut q = query_pos;
    let mut score = 0i32;
    let mut best_score = 0i32;
    let mut best_r = ref_pos;
    let mut best_q = query_pos;
    loop {
        let ridx = SEQ_MARGIN as i64 + r;
        if ridx < 0 || ridx as usize >= ref_bases.len() || q < 0 || q as usize >= query_bases.len() {
            break;
        }
        let rb = ref_bases[ridx as usize];
        let qb = query_bases[q as usize];
        score += if rb == qb && rb < 4 { 1 } else { -1 };
        if score > best_score {
            best_score = score;
            best_r = r;
            best_q = q;
        } else if score <= best_score - XDROP {
            break;
        }
        r += step;
        q += step;
    }
    Cell { start_r: ref_pos, start_q: query_pos, max_r: best_r, max_q: best_q, score: best_score }
}

impl DpKernel for FakeKernel {
    type Cell = Cell;
    type ThreadLocal = ();

    fn init(_opts: &MapOptions) -> Self {
        FakeKernel
    }
    fn dp_init(&self) -> Self::ThreadLocal {}
    fn dp_flush(&self, _dp: &mut Self::ThreadLocal) {}

    fn dp_fill_root(
        &self,
        _dp: &mut Self::ThreadLocal,
        ref_bases: &[u8],
        ref_pos: i64,
        query_bases: &[u8],
        query_pos: i64,
        direction: DpDirection,
    ) -> Self::Cell {
        extend(ref_bases, ref_pos, query_bases, query_pos, direction)
    }

    fn dp_fill(
        &self,
        _dp: &mut Self::ThreadLocal,
        prev: &Self::Cell,
        _next_ref_bases: &[u8],
        _next_query_bases: &[u8],
        _direction: DpDirection,
    ) -> Self::Cell {
        *prev
    }

    fn dp_search_max(&self, _dp: &Self::ThreadLocal, cell: &Self::Cell) -> (i64, i64, u32) {
        let plen = (cell.max_r - cell.start_r).unsigned_abs() as u32 + 1;
        (cell.max_r, cell.max_q, plen)
    }

    fn dp_trace(&self, _dp: &Self::ThreadLocal, cell: &Self::Cell) -> Option<AlignmentRecord> {
        if cell.score <= 0 {
            return None;
        }
        // `cell` here is the *upward* re-fill: its `start` is the
        // alignment end (the downward max) and its `max` is the
        // alignment start.
        let (ref_start, ref_end) = (cell.max_r.min(cell.start_r), cell.max_r.max(cell.start_r));
        let (query_start, query_end) = (cell.max_q.min(cell.start_q), cell.max_q.max(cell.start_q));
        let ref_len = (ref_end - ref_start) as u32 + 1;
        let query_len = (query_end - query_start) as u32 + 1;
        Some(AlignmentRecord {
            segments: vec![Segment {
                ref_id: 0,
                ref_start: ref_start as u32,
                ref_len,
                query_id: 0,
                query_start: query_start as u32,
                query_len,
                path_offset: 0,
            }],
            path_bits: Vec::new(),
            score: cell.score,
            identity: 1.0,
            dcnt: ref_len,
            agcnt: 0,
            bgcnt: 0,
            plen: ref_len.max(query_len),
            bid: 1,
        })
    }
}

/// Surfaces the crate's `trace!`/`debug!` build and mapping logs when a
/// test fails, via `cargo test -- --nocapture`.
fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().with_env_filter("debug").try_init();
}

fn build_index(seq: &[u8]) -> MinimizerIndex {
    init_tracing();
    let opts = IndexOptions { k: 11, w: 5, bucket_bits: 10, occurrence_fractions: vec![0.5, 0.2, 0.05] };
    let refs = vec![RefSequence::from_bytes(0, "chr1", seq, false)];
    MinimizerIndex::build(opts, refs).unwrap()
}

/// A repeating but non-trivial sequence long enough to produce a solid
/// chain of seeds for an exact-matching query.
fn reference_seq() -> Vec<u8> {
    let unit = b"ACGTTGCAGGTCAACGTGATCCAGTTAGGCTAACCGGTTAACCGGTTAGC";
    unit.iter().cycle().take(2000).copied().collect()
}

#[test]
fn maps_an_exact_matching_query_with_high_mapq() {
    let idx = build_index(&reference_seq());
    let mopts = MapOptions::default();
    let kernel = FakeKernel;
    let mut dp = kernel.dp_init();

    let refseq = &reference_seq()[500..700];

    let set = map_one_query(&idx, &kernel, &mut dp, &mopts, 1, refseq);
    assert!(set.n_all >= 1, "expected at least one alignment for an exact-matching 200bp query");
    let primary = &set.results[0];
    assert!(primary.bin.alignments[0].score > 100, "exact match over 200bp should score highly");
}

#[test]
fn unrelated_query_is_unmapped_or_weak() {
    let idx = build_index(&reference_seq());
    let mopts = MapOptions::default();
    let kernel = FakeKernel;
    let mut dp = kernel.dp_init();

    // A query with no relation to the reference's repeating unit.
    let noise: &[u8] = b"TTTTTTTTTTTTTTTTTTTTAAAAAAAAAAAAAAAAAAAACCCCCCCCCCCCCCCCCCCC";
    let set = map_one_query(&idx, &kernel, &mut dp, &mopts, 2, noise);
    assert_eq!(set.n_all, 0, "a query sharing no minimizers with the reference should be unmapped");
}

/// S5 (§8): two seeds on the same anti-diagonal, close together, whose
/// downward DP tracebacks land on the same max cell should be recorded
/// once, not twice.
#[test]
fn s5_overlapping_extensions_deduplicate_to_one_alignment() {
    let idx = build_index(&reference_seq());
    let mopts = MapOptions::default();
    let kernel = FakeKernel;
    let mut dp = kernel.dp_init();

    let refseq = &reference_seq()[800..1000];
    let set = map_one_query(&idx, &kernel, &mut dp, &mopts, 3, refseq);

    // A single 200bp exact match should not fragment into multiple
    // primary/supplementary alignments from the many seeds it produces.
    let primaries = set
        .results
        .iter()
        .filter(|r| r.class != minimap2_core::ResultClass::Secondary)
        .count();
    assert_eq!(primaries, 1, "one contiguous exact match should yield exactly one primary/supplementary alignment");
}

struct VecSource {
    batches: Vec<SeqBatch>,
}

impl BatchSource for VecSource {
    fn next_batch(&mut self) -> anyhow::Result<Option<SeqBatch>> {
        if self.batches.is_empty() {
            Ok(None)
        } else {
            Ok(Some(self.batches.remove(0)))
        }
    }
}

#[derive(Default)]
struct RecordingSink {
    seen: Arc<Mutex<Vec<(String, bool)>>>,
}

impl AlignmentSink for RecordingSink {
    fn emit(
        &mut self,
        _refs: &[RefSequence],
        record: &SeqRecord,
        set: Option<&AlignmentSet>,
    ) -> anyhow::Result<()> {
        self.seen.lock().unwrap().push((record.name.clone(), set.is_some()));
        Ok(())
    }
}

fn make_record(name: &str, bases: &[u8]) -> SeqRecord {
    SeqRecord {
        name: name.to_string(),
        seq_2bit: bases.iter().map(|&b| ENC_FORWARD[b as usize]).collect(),
        qual: None,
        tag_blob: Vec::new(),
        l_seq: bases.len() as u32,
        reserved: 0,
    }
}

/// S7 (§8): pipeline emission order equals source order, exercised across
/// several batches and worker counts through the full mapping pipeline
/// (not just the bare [`minimap2_core::Pipeline`] primitive).
#[test]
fn s7_mapping_pipeline_preserves_source_order() {
    let refseq = reference_seq();
    let idx = Arc::new(build_index(&refseq));
    let kernel = Arc::new(FakeKernel);
    let opts = Arc::new(MapOptions::default());

    for n_workers in [0usize, 1, 3] {
        let batches = vec![
            SeqBatch {
                records: vec![
                    make_record("q0", &refseq[0..150]),
                    make_record("q1", &refseq[300..450]),
                ],
            },
            SeqBatch { records: vec![make_record("q2", b"NNNNNNNNNNNNNNNNNNNNNNNNNNNNNNNN")] },
            SeqBatch { records: vec![make_record("q3", &refseq[900..1050])] },
        ];
        let source = VecSource { batches };
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = RecordingSink { seen: Arc::clone(&seen) };

        run_mapping_pipeline(Arc::clone(&idx), Arc::clone(&kernel), Arc::clone(&opts), source, sink, n_workers)
            .unwrap();

        let observed = seen.lock().unwrap();
        let names: Vec<&str> = observed.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["q0", "q1", "q2", "q3"], "n_workers={n_workers}");
        assert!(observed[0].1 && observed[1].1 && observed[3].1, "matching queries should map");
        assert!(!observed[2].1, "all-N query should be unmapped");
    }
}
