//! Seed-chain-extend mapping engine and minimizer index for long-read
//! alignment (§1).
//!
//! This crate is the core of a long-read aligner: the double-hash
//! minimizer index over a reference, the minimizer sketcher, seed
//! filtering/chaining/circular-linking, the gapped-extension scheduler,
//! and the multithreaded pipeline that drives all of it over many query
//! batches with in-order output. FASTA/FASTQ/BAM parsing, output
//! formatting, the gapped-DP kernel itself, compressed index file I/O,
//! CLI parsing and logging configuration are external collaborators
//! consumed through the interfaces in [`batch`] and [`dp`] (§1).
//!
//! The dataflow (§2): reference bytes → [`sketch`] → [`index`] build;
//! query bytes → [`sketch`] → [`seed`] → [`chain`] → [`circular`] →
//! [`extend`] → an [`batch::AlignmentSet`]. [`map`] wires the query-side
//! stages together and drives them over a [`batch::BatchSource`] with
//! [`pipeline`]'s worker pool.

pub mod batch;
pub mod chain;
pub mod circular;
pub mod dp;
pub mod error;
pub mod extend;
pub mod index;
pub mod map;
pub mod opts;
pub mod pack;
pub mod pipeline;
pub mod robinhood;
pub mod seed;
pub mod seq;
pub mod sketch;

pub use batch::{AlignmentSet, AlignmentSink, BatchSource, SeqBatch, SeqRecord};
pub use error::MmError;
pub use extend::{MappedResult, ResultClass};
pub use index::{IndexHit, IndexStats, MinimizerIndex, INDEX_MAGIC};
pub use map::{map_one_query, run_mapping_pipeline};
pub use opts::{IndexOptions, MapOptions, Preset, ScoringMatrix};
pub use pipeline::Pipeline;
pub use seq::RefSequence;
