//! Chunked streaming encryption for large payloads.
//!
//! Memory use is bounded by one chunk regardless of payload size. Every chunk
//! is sealed independently with a fresh nonce under one key derived once per
//! stream.
//!
//! # Layout
//! ```text
//! header:  [ magic (4) ][ version (1) = 0x01 ][ reserved (1) = 0x00 ]
//!          [ chunk size in KiB (2, BE) ][ salt (16) ]
//! record:  [ len (4, BE) ][ nonce (12) ][ tag (16) ][ ciphertext (len) ]
//! end:     [ len (4) = 0 ]   (nothing may follow)
//! ```
//!
//! Each chunk's associated data is the 24-byte header, the chunk index as a
//! big-endian `u64` and a final-chunk flag byte. A header edit, a reordered
//! or duplicated chunk, or a stream cut at a chunk boundary fails
//! authentication. A stream with no chunks at all carries nothing to
//! authenticate, so empty payloads belong in the single-shot format when a
//! wrong password must be detected.
//!
//! A reader that does not find the magic falls back to the single-shot
//! format of `crypto` for the whole input.

use std::io::{self, Read, Write};

use crate::crypto::{self, NONCE_LEN, TAG_LEN};
use crate::error::{Result, VaultError};
use crate::keys::{self, DerivedKey, SALT_LEN};

/// Leading bytes that identify the streaming format.
pub const MAGIC: [u8; 4] = *b"SVST";

/// The only streaming format version this build reads and writes.
pub const FORMAT_VERSION: u8 = 0x01;

/// Total header length: magic, version, reserved, chunk-size hint, salt.
pub const HEADER_LEN: usize = 4 + 1 + 1 + 2 + SALT_LEN;

/// Default plaintext bytes per chunk (4 MiB).
pub const DEFAULT_CHUNK_SIZE: usize = 4 * 1024 * 1024;

/// Smallest chunk size a writer will use (256 KiB).
pub const MIN_CHUNK_SIZE: usize = 256 * 1024;

/// Largest chunk size the 2-byte KiB hint can express.
pub const MAX_CHUNK_SIZE: usize = u16::MAX as usize * 1024;

const RECORD_PREFIX_LEN: usize = 4 + NONCE_LEN + TAG_LEN;

/// Counters reported by a completed streaming operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    /// Number of non-terminator chunk records.
    pub chunks: u64,
    /// Plaintext bytes consumed or produced.
    pub plaintext_bytes: u64,
}

/// Clamp a requested chunk size to the writable range, on a KiB boundary.
pub fn normalize_chunk_size(requested: usize) -> usize {
    requested.clamp(MIN_CHUNK_SIZE, MAX_CHUNK_SIZE) / 1024 * 1024
}

/// True if `prefix` starts with the streaming magic.
pub fn is_stream_format(prefix: &[u8]) -> bool {
    prefix.len() >= MAGIC.len() && prefix[..MAGIC.len()] == MAGIC
}

fn chunk_aad(header: &[u8; HEADER_LEN], index: u64, last: bool) -> [u8; HEADER_LEN + 9] {
    let mut aad = [0u8; HEADER_LEN + 9];
    aad[..HEADER_LEN].copy_from_slice(header);
    aad[HEADER_LEN..HEADER_LEN + 8].copy_from_slice(&index.to_be_bytes());
    aad[HEADER_LEN + 8] = u8::from(last);
    aad
}

/// Read until `buf` is full or the reader is exhausted.
fn read_full<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Like `read_exact`, but a short read is a framing error.
fn read_framed<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> Result<()> {
    if read_full(reader, buf)? < buf.len() {
        return Err(VaultError::InvalidData);
    }
    Ok(())
}

/// Recover a `VaultError` that travelled through an `io::Write` boundary.
pub(crate) fn unwrap_io(err: io::Error) -> VaultError {
    let wraps_vault = err.get_ref().is_some_and(|inner| inner.is::<VaultError>());
    if wraps_vault {
        if let Some(inner) = err.into_inner() {
            if let Ok(vault_err) = inner.downcast::<VaultError>() {
                return *vault_err;
            }
        }
        return VaultError::EncryptionFailed;
    }
    VaultError::Io(err)
}

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

/// An `io::Write` adapter that emits the streaming format into `inner`.
///
/// The header is written on construction. A full chunk is held back until
/// more input arrives, because only then is it known not to be the last
/// one; `finish` seals whatever is buffered as the final chunk and writes
/// the terminator. Dropping a sealer without calling `finish` leaves a stream
/// that every reader rejects as truncated.
pub struct StreamSealer<W: Write> {
    inner: W,
    key: DerivedKey,
    header: [u8; HEADER_LEN],
    chunk_size: usize,
    buf: Vec<u8>,
    stats: StreamStats,
}

impl<W: Write> StreamSealer<W> {
    /// Start a stream under `password`. `chunk_size` is normalised with
    /// `normalize_chunk_size`.
    pub fn new(mut inner: W, password: &str, chunk_size: usize) -> Result<Self> {
        if password.is_empty() {
            return Err(VaultError::InvalidPassword);
        }
        let chunk_size = normalize_chunk_size(chunk_size);
        let salt = keys::generate_salt()?;
        let key = keys::derive_key(password, &salt)?;

        let mut header = [0u8; HEADER_LEN];
        header[..4].copy_from_slice(&MAGIC);
        header[4] = FORMAT_VERSION;
        header[5] = 0x00;
        // Range is guaranteed by normalize_chunk_size.
        header[6..8].copy_from_slice(&((chunk_size / 1024) as u16).to_be_bytes());
        header[8..].copy_from_slice(&salt);
        inner.write_all(&header)?;

        Ok(Self {
            inner,
            key,
            header,
            chunk_size,
            buf: Vec::with_capacity(chunk_size),
            stats: StreamStats::default(),
        })
    }

    /// The effective chunk size after normalisation.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    fn is_full(&self) -> bool {
        self.buf.len() == self.chunk_size
    }

    fn seal_buffered(&mut self, last: bool) -> Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let nonce = crypto::generate_nonce()?;
        let aad = chunk_aad(&self.header, self.stats.chunks, last);
        let tag = crypto::seal_detached(&self.key, nonce, &aad, &mut self.buf)?;

        let len = u32::try_from(self.buf.len()).map_err(|_| VaultError::EncryptionFailed)?;
        self.inner.write_all(&len.to_be_bytes())?;
        self.inner.write_all(&nonce)?;
        self.inner.write_all(&tag)?;
        self.inner.write_all(&self.buf)?;

        self.stats.chunks += 1;
        self.stats.plaintext_bytes += self.buf.len() as u64;
        self.buf.clear();
        Ok(())
    }

    /// Pull `reader` to exhaustion, reading directly into the chunk buffer.
    pub fn absorb<R: Read + ?Sized>(&mut self, reader: &mut R) -> Result<u64> {
        let mut total = 0u64;
        loop {
            if self.is_full() {
                let mut probe = [0u8; 1];
                if read_full(reader, &mut probe)? == 0 {
                    return Ok(total);
                }
                self.seal_buffered(false)?;
                self.buf.push(probe[0]);
                total += 1;
            }

            let start = self.buf.len();
            let want = self.chunk_size - start;
            self.buf.resize(self.chunk_size, 0);
            let n = match read_full(reader, &mut self.buf[start..]) {
                Ok(n) => n,
                Err(e) => {
                    self.buf.truncate(start);
                    return Err(e.into());
                }
            };
            self.buf.truncate(start + n);
            total += n as u64;

            if n < want {
                return Ok(total);
            }
        }
    }

    /// Seal any buffered bytes as the final chunk, write the terminator and
    /// return the writer.
    pub fn finish(mut self) -> Result<(W, StreamStats)> {
        self.seal_buffered(true)?;
        self.inner.write_all(&0u32.to_be_bytes())?;
        self.inner.flush()?;
        Ok((self.inner, self.stats))
    }
}

impl<W: Write> Write for StreamSealer<W> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if data.is_empty() {
            return Ok(0);
        }
        if self.is_full() {
            self.seal_buffered(false).map_err(io::Error::other)?;
        }
        let take = (self.chunk_size - self.buf.len()).min(data.len());
        self.buf.extend_from_slice(&data[..take]);
        Ok(take)
    }

    /// Flushes the underlying writer only. A partial chunk stays buffered
    /// until it fills or `finish` is called.
    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Encrypt everything `input` yields into `output` in the streaming format.
///
/// Empty input yields a header and terminator with no chunks, and nothing
/// in such a stream is authenticated: it decrypts to nothing under any
/// password. Use `crypto::encrypt` for payloads that may be empty when a
/// wrong password must be detected.
pub fn encrypt_stream<R: Read, W: Write>(
    input: &mut R,
    output: W,
    password: &str,
    chunk_size: usize,
) -> Result<StreamStats> {
    let mut sealer = StreamSealer::new(output, password, chunk_size)?;
    sealer.absorb(input)?;
    let (_, stats) = sealer.finish()?;
    Ok(stats)
}

/// Decrypt a streaming blob from `input` into `output`.
///
/// Chunks are authenticated one at a time and written as soon as they
/// verify; on failure nothing past the last verified chunk is emitted.
/// Input without the streaming magic is decrypted as a single-shot blob.
pub fn decrypt_stream<R: Read, W: Write>(
    input: &mut R,
    output: &mut W,
    password: &str,
) -> Result<StreamStats> {
    if password.is_empty() {
        return Err(VaultError::InvalidPassword);
    }

    let mut header = [0u8; HEADER_LEN];
    let magic_len = read_full(input, &mut header[..MAGIC.len()])?;
    if !is_stream_format(&header[..magic_len]) {
        return decrypt_legacy(&header[..magic_len], input, output, password);
    }

    read_framed(input, &mut header[MAGIC.len()..])?;
    // An unknown version is indistinguishable from a damaged header.
    if header[4] != FORMAT_VERSION || header[5] != 0x00 {
        return Err(VaultError::InvalidData);
    }
    let hint_kib = u16::from_be_bytes([header[6], header[7]]) as usize;
    if hint_kib == 0 {
        return Err(VaultError::InvalidData);
    }
    let max_chunk = hint_kib * 1024;
    let key = keys::derive_key(password, &header[8..HEADER_LEN])?;

    let mut stats = StreamStats::default();
    let mut prefix = [0u8; RECORD_PREFIX_LEN];
    let mut buf: Vec<u8> = Vec::new();
    let mut next_len = read_record_len(input)?;

    loop {
        if next_len == 0 {
            let mut trailing = [0u8; 1];
            if read_full(input, &mut trailing)? != 0 {
                return Err(VaultError::InvalidData);
            }
            break;
        }
        let len = next_len;
        if len > max_chunk {
            return Err(VaultError::InvalidData);
        }

        read_framed(input, &mut prefix[4..])?;
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&prefix[4..4 + NONCE_LEN]);

        buf.resize(len + TAG_LEN, 0);
        read_framed(input, &mut buf[..len])?;
        buf[len..].copy_from_slice(&prefix[4 + NONCE_LEN..]);

        // Whether this chunk is the last one is only known from the next
        // record's length, and it is part of what the tag authenticates.
        next_len = read_record_len(input)?;
        let aad = chunk_aad(&header, stats.chunks, next_len == 0);
        let plaintext = crypto::open_detached(&key, nonce, &aad, &mut buf)?;
        output.write_all(plaintext).map_err(unwrap_io)?;

        stats.chunks += 1;
        stats.plaintext_bytes += len as u64;
    }

    output.flush().map_err(unwrap_io)?;
    Ok(stats)
}

fn read_record_len<R: Read + ?Sized>(input: &mut R) -> Result<usize> {
    let mut len = [0u8; 4];
    read_framed(input, &mut len)?;
    Ok(u32::from_be_bytes(len) as usize)
}

fn decrypt_legacy<R: Read, W: Write>(
    prefix: &[u8],
    input: &mut R,
    output: &mut W,
    password: &str,
) -> Result<StreamStats> {
    let mut blob = prefix.to_vec();
    input.read_to_end(&mut blob)?;
    let plaintext = crypto::decrypt(&blob, password)?;
    output.write_all(&plaintext).map_err(unwrap_io)?;
    output.flush().map_err(unwrap_io)?;
    Ok(StreamStats {
        chunks: 1,
        plaintext_bytes: plaintext.len() as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn seal(data: &[u8], chunk: usize) -> (Vec<u8>, StreamStats) {
        let mut out = Vec::new();
        let stats = encrypt_stream(&mut Cursor::new(data), &mut out, "pw", chunk).unwrap();
        (out, stats)
    }

    fn open(blob: &[u8], password: &str) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        decrypt_stream(&mut Cursor::new(blob), &mut out, password)?;
        Ok(out)
    }

    /// Byte offsets of every non-terminator record in a sealed stream.
    fn record_offsets(blob: &[u8]) -> Vec<(usize, usize)> {
        let mut offsets = Vec::new();
        let mut pos = HEADER_LEN;
        loop {
            let len = u32::from_be_bytes(blob[pos..pos + 4].try_into().unwrap()) as usize;
            if len == 0 {
                return offsets;
            }
            let end = pos + RECORD_PREFIX_LEN + len;
            offsets.push((pos, end));
            pos = end;
        }
    }

    #[test]
    fn test_header_layout() {
        let (blob, stats) = seal(b"", DEFAULT_CHUNK_SIZE);
        assert_eq!(&blob[..4], &MAGIC);
        assert_eq!(blob[4], FORMAT_VERSION);
        assert_eq!(blob[5], 0);
        assert_eq!(u16::from_be_bytes([blob[6], blob[7]]), 4096);
        assert_eq!(blob.len(), HEADER_LEN + 4);
        assert_eq!(stats.chunks, 0);
        assert!(open(&blob, "pw").unwrap().is_empty());
    }

    #[test]
    fn test_chunk_size_floor_and_ceiling() {
        assert_eq!(normalize_chunk_size(1), MIN_CHUNK_SIZE);
        assert_eq!(normalize_chunk_size(usize::MAX), MAX_CHUNK_SIZE);
        assert_eq!(normalize_chunk_size(MIN_CHUNK_SIZE + 1000), MIN_CHUNK_SIZE);

        let (blob, _) = seal(b"abc", 16);
        assert_eq!(u16::from_be_bytes([blob[6], blob[7]]), 256);
    }

    #[test]
    fn test_multi_chunk_counts() {
        let data = vec![0x5au8; MIN_CHUNK_SIZE * 2 + 17];
        let (blob, stats) = seal(&data, MIN_CHUNK_SIZE);
        assert_eq!(stats.chunks, 3);
        assert_eq!(stats.plaintext_bytes, data.len() as u64);
        assert_eq!(record_offsets(&blob).len(), 3);
        assert_eq!(open(&blob, "pw").unwrap(), data);
    }

    #[test]
    fn test_writer_adapter_matches_absorb() {
        let data = vec![7u8; MIN_CHUNK_SIZE + 5];
        let mut sealer = StreamSealer::new(Vec::new(), "pw", MIN_CHUNK_SIZE).unwrap();
        for piece in data.chunks(1000) {
            sealer.write_all(piece).unwrap();
        }
        let (blob, stats) = sealer.finish().unwrap();
        assert_eq!(stats.chunks, 2);
        assert_eq!(open(&blob, "pw").unwrap(), data);
    }

    #[test]
    fn test_falls_back_to_single_shot() {
        let blob = crypto::encrypt(b"legacy payload", "pw").unwrap();
        assert_eq!(open(&blob, "pw").unwrap(), b"legacy payload");
        assert!(open(&blob, "nope").is_err());
    }

    #[test]
    fn test_reordered_chunks_rejected() {
        let data: Vec<u8> = (0..MIN_CHUNK_SIZE * 2).map(|i| (i % 251) as u8).collect();
        let (blob, _) = seal(&data, MIN_CHUNK_SIZE);
        let recs = record_offsets(&blob);
        assert_eq!(recs.len(), 2);

        let mut swapped = blob[..HEADER_LEN].to_vec();
        swapped.extend_from_slice(&blob[recs[1].0..recs[1].1]);
        swapped.extend_from_slice(&blob[recs[0].0..recs[0].1]);
        swapped.extend_from_slice(&0u32.to_be_bytes());

        assert!(matches!(open(&swapped, "pw"), Err(VaultError::DataCorrupted)));
    }

    #[test]
    fn test_cut_at_chunk_boundary_rejected() {
        let data = vec![1u8; MIN_CHUNK_SIZE * 2];
        let (blob, _) = seal(&data, MIN_CHUNK_SIZE);
        let recs = record_offsets(&blob);
        assert_eq!(recs.len(), 2);

        let mut cut = blob[..recs[0].1].to_vec();
        cut.extend_from_slice(&0u32.to_be_bytes());
        assert!(matches!(open(&cut, "pw"), Err(VaultError::DataCorrupted)));
    }

    #[test]
    fn test_exact_multiple_does_not_emit_empty_tail() {
        let data = vec![9u8; MIN_CHUNK_SIZE];
        let (blob, stats) = seal(&data, MIN_CHUNK_SIZE);
        assert_eq!(stats.chunks, 1);
        assert_eq!(blob.len(), HEADER_LEN + RECORD_PREFIX_LEN + MIN_CHUNK_SIZE + 4);
        assert_eq!(open(&blob, "pw").unwrap(), data);
    }

    #[test]
    fn test_truncated_and_trailing_rejected() {
        let (blob, _) = seal(b"some bytes", MIN_CHUNK_SIZE);

        let truncated = &blob[..blob.len() - 4];
        assert!(matches!(open(truncated, "pw"), Err(VaultError::InvalidData)));

        let mut trailing = blob.clone();
        trailing.push(0);
        assert!(matches!(open(&trailing, "pw"), Err(VaultError::InvalidData)));
    }

    #[test]
    fn test_unknown_version_rejected() {
        let (mut blob, _) = seal(b"x", MIN_CHUNK_SIZE);
        blob[4] = 0x02;
        let err = open(&blob, "pw").unwrap_err();
        assert!(matches!(err, VaultError::InvalidData));
        assert!(err.is_authentication_failure());
    }

    #[test]
    fn test_oversized_record_rejected_before_allocation() {
        let (mut blob, _) = seal(b"x", MIN_CHUNK_SIZE);
        blob[HEADER_LEN..HEADER_LEN + 4].copy_from_slice(&u32::MAX.to_be_bytes());
        assert!(matches!(open(&blob, "pw"), Err(VaultError::InvalidData)));
    }

    #[test]
    fn test_unwrap_io_recovers_vault_error() {
        let err = io::Error::other(VaultError::DataCorrupted);
        assert!(matches!(unwrap_io(err), VaultError::DataCorrupted));
        let err = io::Error::from(io::ErrorKind::BrokenPipe);
        assert!(matches!(unwrap_io(err), VaultError::Io(_)));
    }
}
