//! Sequence-input and alignment-output boundary types (§6).
//!
//! FASTA/FASTQ/BAM parsing and SAM/MAF/PAF/BLAST-6 formatting are external
//! collaborators (§1): this module only defines the narrow "next batch of
//! query records" / "emit record with its alignment set" interfaces the
//! core consumes them through, plus the alignment-set shape the core
//! produces for them to format.

use crate::extend::MappedResult;
use crate::seq::RefSequence;

/// One query record as handed to the core by an external parser (§6).
///
/// Mirrors the source's `bseq1_t` field set; `seq_2bit` holds one byte per
/// base already mapped through [`crate::seq::ENC_FORWARD`], the same
/// pre-encoded form [`crate::seq::RefSequence`] stores a reference in. The
/// mapping driver decodes it back through [`crate::seq::DEC_FORWARD`] before
/// sketching, exactly as `index::build` does for a packed reference — the
/// sketcher only ever takes raw bases.
#[derive(Debug, Clone, Default)]
pub struct SeqRecord {
    pub name: String,
    pub seq_2bit: Vec<u8>,
    pub qual: Option<Vec<u8>>,
    pub tag_blob: Vec<u8>,
    pub l_seq: u32,
    /// Opaque caller payload threaded through untouched to the alignment
    /// sink (§6: "used downstream to attach the alignment set").
    pub reserved: u64,
}

/// A batch of query records sharing one backing allocation, as produced by
/// an external "next batch" source (§6: `bseq_batch`).
#[derive(Debug, Clone, Default)]
pub struct SeqBatch {
    pub records: Vec<SeqRecord>,
}

/// A source yielding batches of query records, one call at a time. An
/// external FASTA/FASTQ/BAM parser implements this; the core only ever
/// calls `next_batch` (§1 item 2, §6).
pub trait BatchSource {
    /// Returns the next batch, `Ok(None)` at end of input, or `Err` for a
    /// malformed record (§7: "bad FASTQ state machine transition" — the
    /// source marks the file and the driver surfaces this to the user; no
    /// partial alignments are emitted for the affected file).
    fn next_batch(&mut self) -> anyhow::Result<Option<SeqBatch>>;
}

/// The full alignment set computed for one query (§6): total and
/// non-secondary alignment counts plus the classified, mapq-scored
/// results themselves.
#[derive(Debug, Clone, Default)]
pub struct AlignmentSet {
    pub n_all: u32,
    pub n_uniq: u32,
    pub results: Vec<MappedResult>,
}

/// A sink accepting one query's alignment set (or `None` for an unmapped
/// query) and emitting SAM/MAF/PAF/BLAST-6. Implemented externally (§1
/// item 3, §6).
pub trait AlignmentSink {
    fn emit(
        &mut self,
        refs: &[RefSequence],
        record: &SeqRecord,
        set: Option<&AlignmentSet>,
    ) -> anyhow::Result<()>;
}
