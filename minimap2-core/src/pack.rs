//! Framed, parallel deflate/inflate block stream used to store a prebuilt
//! index compactly (§4.9).
//!
//! Format: repeated `(MAGIC[4] "PG00" | block_len[u32_le] | compressed
//! bytes[block_len])`, ending with a `(MAGIC, block_len = 0xFFFFFFFF)`
//! terminator record carrying no payload. Raw payload is chunked to 1 MiB
//! blocks before compression. Parallelism reuses [`crate::pipeline`]:
//! blocks compress/decompress out of order across the pool but are
//! reordered on the drain side via its completion heap, so the stream
//! produced is byte-for-byte identical regardless of `n_workers` (§8
//! invariant 8).

use std::io::{Read, Write};

use anyhow::{Context, Result};
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;

use crate::error::MmError;
use crate::pipeline::Pipeline;

/// 4-byte magic prefixing every block record (§4.9, §6).
pub const BLOCK_MAGIC: [u8; 4] = *b"PG00";
/// Raw payload chunk size before compression (§4.9).
pub const BLOCK_SIZE: usize = 1 << 20;
/// `block_len` value signaling the stream terminator record.
pub const TERMINATOR_LEN: u32 = 0xFFFF_FFFF;

fn deflate_block(raw: &[u8]) -> Vec<u8> {
    let mut enc = DeflateEncoder::new(Vec::with_capacity(raw.len() / 2), Compression::default());
    enc.write_all(raw).expect("writing to an in-memory encoder cannot fail");
    enc.finish().expect("finishing an in-memory encoder cannot fail")
}

fn inflate_block(compressed: &[u8]) -> Result<Vec<u8>> {
    let mut dec = DeflateDecoder::new(compressed);
    let mut out = Vec::new();
    dec.read_to_end(&mut out).context("inflating compressed block")?;
    Ok(out)
}

/// Compresses `data` into the framed block format, writing it to `w`.
/// Blocks are deflated across `n_workers` pipeline workers (`0` runs
/// cooperatively on the calling thread, per [`Pipeline`]).
pub fn compress_stream<W: Write>(data: &[u8], n_workers: usize, w: &mut W) -> Result<()> {
    let chunks: Vec<Vec<u8>> = data.chunks(BLOCK_SIZE).map(|c| c.to_vec()).collect();
    let pipeline = Pipeline::new(n_workers);
    let mut src = chunks.into_iter();
    let mut blocks: Vec<Vec<u8>> = Vec::new();

    pipeline.run(
        |_tid, chunk: Vec<u8>| deflate_block(&chunk),
        || src.next(),
        |compressed| blocks.push(compressed),
    );

    for block in &blocks {
        w.write_all(&BLOCK_MAGIC).context("writing block magic")?;
        w.write_all(&(block.len() as u32).to_le_bytes())
            .context("writing block length")?;
        w.write_all(block).context("writing block payload")?;
    }
    w.write_all(&BLOCK_MAGIC).context("writing terminator magic")?;
    w.write_all(&TERMINATOR_LEN.to_le_bytes())
        .context("writing terminator length")?;
    Ok(())
}

/// Reads every framed block record from `r`, stopping at the terminator.
/// Returns the raw (still-compressed) block payloads in stream order.
fn read_framed_blocks<R: Read>(r: &mut R) -> Result<Vec<Vec<u8>>> {
    let mut blocks = Vec::new();
    let mut offset = 0u64;
    loop {
        let mut magic = [0u8; 4];
        r.read_exact(&mut magic)
            .map_err(|_| MmError::TruncatedBlock { at_offset: offset })?;
        if magic != BLOCK_MAGIC {
            return Err(MmError::TruncatedBlock { at_offset: offset }.into());
        }
        offset += 4;
        let mut len_buf = [0u8; 4];
        r.read_exact(&mut len_buf)
            .map_err(|_| MmError::TruncatedBlock { at_offset: offset })?;
        offset += 4;
        let len = u32::from_le_bytes(len_buf);
        if len == TERMINATOR_LEN {
            break;
        }
        let mut payload = vec![0u8; len as usize];
        r.read_exact(&mut payload)
            .map_err(|_| MmError::TruncatedBlock { at_offset: offset })?;
        offset += len as u64;
        blocks.push(payload);
    }
    Ok(blocks)
}

/// Decompresses a stream previously written by [`compress_stream`] into
/// `w`, inflating blocks across `n_workers` pipeline workers.
pub fn decompress_stream<R: Read, W: Write>(r: &mut R, n_workers: usize, w: &mut W) -> Result<()> {
    let blocks = read_framed_blocks(r)?;
    let pipeline = Pipeline::new(n_workers);
    let mut src = blocks.into_iter();
    let mut decode_err: Option<anyhow::Error> = None;
    let mut out: Vec<Vec<u8>> = Vec::new();

    pipeline.run(
        |_tid, block: Vec<u8>| inflate_block(&block),
        || src.next(),
        |result| match result {
            Ok(decompressed) => out.push(decompressed),
            Err(e) => decode_err.get_or_insert(e),
        },
    );
    if let Some(e) = decode_err {
        return Err(e);
    }
    for chunk in &out {
        w.write_all(chunk).context("writing decompressed output")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// S8: decompress(compress(X)) == X for arbitrary X, for any N>=1
    /// workers.
    #[test]
    fn s8_round_trip_for_various_worker_counts() {
        let mut data = Vec::new();
        for i in 0..3_500_000u32 {
            data.push((i.wrapping_mul(2654435761) >> 24) as u8);
        }
        for n_workers in [0usize, 1, 2, 5] {
            let mut compressed = Vec::new();
            compress_stream(&data, n_workers, &mut compressed).unwrap();

            let mut restored = Vec::new();
            decompress_stream(&mut compressed.as_slice(), n_workers, &mut restored).unwrap();
            assert_eq!(restored, data, "n_workers={n_workers}");
        }
    }

    #[test]
    fn round_trip_empty_input() {
        let mut compressed = Vec::new();
        compress_stream(&[], 2, &mut compressed).unwrap();
        let mut restored = Vec::new();
        decompress_stream(&mut compressed.as_slice(), 2, &mut restored).unwrap();
        assert!(restored.is_empty());
    }

    #[test]
    fn rejects_truncated_stream() {
        let mut data = vec![0u8; 10_000];
        for (i, b) in data.iter_mut().enumerate() {
            *b = i as u8;
        }
        let mut compressed = Vec::new();
        compress_stream(&data, 1, &mut compressed).unwrap();
        compressed.truncate(compressed.len() - 4); // drop the terminator

        let mut restored = Vec::new();
        let err = decompress_stream(&mut compressed.as_slice(), 1, &mut restored).unwrap_err();
        assert!(err.to_string().contains("truncated"));
    }
}
