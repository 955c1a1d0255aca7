//! Error kinds for the mapping engine.
//!
//! Fatal kinds (§7) are meant to reach a single top-level handler that logs
//! and exits with a distinct process code; non-fatal outcomes (budget
//! exhaustion, unmappable queries, short reads) are never represented as
//! errors at all — they surface as an empty alignment set.

use std::fmt;

/// Errors that can escape the core engine.
///
/// Every variant here is fatal in the sense of §7: once one of these is
/// returned, the caller should stop using the affected index/stream/query
/// batch rather than attempt to continue.
#[derive(Debug)]
pub enum MmError {
    /// Allocation failed while building or growing an index, DP context,
    /// or pipeline buffer.
    OutOfMemory { requested_bytes: usize, context: &'static str },
    /// The 4-byte magic at the head of a serialized index did not match
    /// `INDEX_MAGIC`.
    IndexMagicMismatch { found: u32 },
    /// A compressed block stream ended without its terminator, or a block
    /// header claimed a length that ran past the available bytes.
    TruncatedBlock { at_offset: u64 },
    /// The FASTA/FASTQ source reported an invalid state transition
    /// (§7: "bad FASTQ state machine transition").
    MalformedSequence { state: u32 },
    /// The external gapped-DP kernel failed to allocate its working
    /// arena. Treated as OOM per §7.
    DpAllocationFailure,
}

impl fmt::Display for MmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MmError::OutOfMemory { requested_bytes, context } => write!(
                f,
                "out of memory: failed to allocate {requested_bytes} bytes ({context})"
            ),
            MmError::IndexMagicMismatch { found } => {
                write!(f, "index magic mismatch: found {found:#010x}")
            }
            MmError::TruncatedBlock { at_offset } => {
                write!(f, "compressed block stream truncated at offset {at_offset}")
            }
            MmError::MalformedSequence { state } => {
                write!(f, "malformed sequence record (parser state {state})")
            }
            MmError::DpAllocationFailure => write!(f, "DP kernel failed to allocate its arena"),
        }
    }
}

impl std::error::Error for MmError {}

impl MmError {
    /// Exit code used by the single top-level fatal handler (§7: "fatal
    /// errors terminate the process with distinct exit codes").
    pub fn exit_code(&self) -> i32 {
        match self {
            MmError::OutOfMemory { .. } | MmError::DpAllocationFailure => 128,
            MmError::IndexMagicMismatch { .. } | MmError::TruncatedBlock { .. } => 65,
            MmError::MalformedSequence { .. } => 66,
        }
    }
}

/// Logs a fatal error and terminates the process.
///
/// This is the single top-level handler referenced throughout §7; nothing
/// else in this crate calls `std::process::exit` directly.
pub fn abort_fatal(err: &MmError) -> ! {
    tracing::error!(error = %err, exit_code = err.exit_code(), "fatal error, aborting");
    std::process::exit(err.exit_code());
}
