//! Glue: the per-query dataflow (sketch → seed → chain → circular link →
//! extend) and a batch-level pipeline driving it over many queries (§2,
//! §4.8).

use std::sync::{Arc, Mutex};

use tracing::trace;

use crate::batch::{AlignmentSet, AlignmentSink, BatchSource, SeqBatch};
use crate::chain::chain;
use crate::circular::link_circular;
use crate::dp::DpKernel;
use crate::extend::{extend_chains, ResultClass};
use crate::index::MinimizerIndex;
use crate::opts::MapOptions;
use crate::pipeline::Pipeline;
use crate::seed::SeedCollector;
use crate::seq::DEC_FORWARD;

/// Maps one query against `index`: collects seeds, chains them, links
/// circular-reference junctions, and drives the extension scheduler (§2's
/// dataflow: "query bytes → sketcher → seed collector → chainer →
/// circular linker → extension scheduler → alignment set").
pub fn map_one_query<K: DpKernel>(
    index: &MinimizerIndex,
    kernel: &K,
    dp: &mut K::ThreadLocal,
    opts: &MapOptions,
    query_id: u32,
    query_bases: &[u8],
) -> AlignmentSet {
    kernel.dp_flush(dp);

    let collector = SeedCollector::new(index, opts);
    let mut seeds = collector.collect(query_id, query_bases);
    if seeds.is_empty() {
        return AlignmentSet::default();
    }

    let (leaves, mut chains) = chain(&mut seeds, opts.wlen);
    link_circular(&seeds, &leaves, &mut chains, &index.seqs, opts.wlen);

    let results = extend_chains(
        kernel,
        dp,
        &index.seqs,
        query_id,
        query_bases,
        &seeds,
        &leaves,
        &chains,
        opts,
    );
    let n_uniq = results.iter().filter(|r| r.class != ResultClass::Secondary).count() as u32;
    trace!(query_id, n_all = results.len(), n_uniq, "mapped query");
    AlignmentSet { n_all: results.len() as u32, n_uniq, results }
}

struct MappedBatch {
    batch: SeqBatch,
    sets: Vec<AlignmentSet>,
}

/// Drives batches from `source` through the mapping pipeline and into
/// `sink`, in source order, using `n_workers` pool threads (§4.8).
///
/// Each worker thread allocates its own [`DpKernel::ThreadLocal`] arena
/// per batch (§5: "Each worker owns an independent buffer set ... DP
/// context") rather than keeping one alive across batches on a given
/// thread — simpler than the source's persistent-arena-per-thread scheme
/// and behaviorally equivalent, since `dp_flush` only ever has to reset a
/// freshly-`dp_init`'d arena anyway.
pub fn run_mapping_pipeline<K, S, D>(
    index: Arc<MinimizerIndex>,
    kernel: Arc<K>,
    opts: Arc<MapOptions>,
    mut source: S,
    mut sink: D,
    n_workers: usize,
) -> anyhow::Result<()>
where
    K: DpKernel + Send + Sync + 'static,
    S: BatchSource,
    D: AlignmentSink,
{
    let pipeline = Pipeline::new(n_workers);
    let source_error: Arc<Mutex<Option<anyhow::Error>>> = Arc::new(Mutex::new(None));

    let worker = {
        let index = Arc::clone(&index);
        let kernel = Arc::clone(&kernel);
        let opts = Arc::clone(&opts);
        move |_tid: usize, batch: SeqBatch| -> MappedBatch {
            let mut dp = kernel.dp_init();
            let sets = batch
                .records
                .iter()
                .enumerate()
                .map(|(i, rec)| {
                    // `seq_2bit` arrives pre-encoded (§6); the sketcher always
                    // takes raw bases, the same way `index::build` decodes a
                    // 2-bit-packed `RefSequence` back before sketching it.
                    let ascii: Vec<u8> = rec.seq_2bit.iter().map(|&c| DEC_FORWARD[c as usize]).collect();
                    map_one_query(index.as_ref(), kernel.as_ref(), &mut dp, opts.as_ref(), i as u32, &ascii)
                })
                .collect();
            MappedBatch { batch, sets }
        }
    };

    let mut exhausted = false;
    let source_fn = || -> Option<SeqBatch> {
        if exhausted {
            return None;
        }
        match source.next_batch() {
            Ok(Some(b)) => Some(b),
            Ok(None) => {
                exhausted = true;
                None
            }
            Err(e) => {
                *source_error.lock().unwrap() = Some(e);
                exhausted = true;
                None
            }
        }
    };

    let mut sink_error: Option<anyhow::Error> = None;
    let drain_fn = |mapped: MappedBatch| {
        if sink_error.is_some() {
            return;
        }
        for (rec, set) in mapped.batch.records.iter().zip(mapped.sets.iter()) {
            let set_opt = if set.n_all > 0 { Some(set) } else { None };
            if let Err(e) = sink.emit(&index.seqs, rec, set_opt) {
                sink_error = Some(e);
            }
        }
    };

    pipeline.run(worker, source_fn, drain_fn);

    if let Some(e) = sink_error {
        return Err(e);
    }
    if let Some(e) = source_error.lock().unwrap().take() {
        return Err(e);
    }
    Ok(())
}
