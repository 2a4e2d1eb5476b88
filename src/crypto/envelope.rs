//! Streaming AES-256-GCM envelope
//!
//! An artifact is laid out as:
//!
//! ```text
//! MAGIC ("SNPVLT") | header length (u32, big-endian) | header (JSON) | sealed chunks...
//! ```
//!
//! The plaintext is cut into fixed-size chunks, each sealed with the
//! STREAM construction (AES-256-GCM, 32-bit big-endian counter plus a
//! last-chunk flag). The whole header is authenticated as associated data
//! of every chunk, so tampering with the parameters, reordering chunks or
//! truncating the stream all fail authentication.

use std::io::{self, Read, Write};

use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::aead::stream::{DecryptorBE32, EncryptorBE32};
use aes_gcm::aead::{KeyInit, OsRng, Payload};
use aes_gcm::Aes256Gcm;
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};

use crate::error::{SnapvaultError, SnapvaultResult};

use super::{derive_key, DerivedKey, KdfCosts, KeyDerivationParams, Passphrase};

/// File signature of every artifact
pub const MAGIC: &[u8; 6] = b"SNPVLT";

/// Envelope format version
pub const FORMAT_VERSION: u8 = 1;

/// Cipher suite identifier written into headers
pub const CIPHER_ID: &str = "aes-256-gcm-stream-be32";

/// Default plaintext chunk size (64 KiB)
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Largest chunk size accepted from a header (16 MiB)
pub const MAX_CHUNK_SIZE: usize = 16 * 1024 * 1024;

/// AES-GCM nonce (12 bytes) minus the STREAM counter and flag (5 bytes)
const NONCE_PREFIX_LEN: usize = 7;

/// AES-GCM authentication tag size
const TAG_LEN: usize = 16;

const MAX_HEADER_LEN: usize = 4096;

/// Self-describing envelope header
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeHeader {
    /// Envelope format version
    pub version: u8,
    /// Cipher suite identifier
    pub cipher: String,
    /// Key derivation parameters (salt and costs)
    pub kdf: KeyDerivationParams,
    /// STREAM nonce prefix (base64 encoded)
    pub nonce_prefix: String,
    /// Plaintext bytes per sealed chunk
    pub chunk_size: u32,
}

impl EnvelopeHeader {
    fn new(kdf: KeyDerivationParams, chunk_size: u32) -> Self {
        let mut prefix = [0u8; NONCE_PREFIX_LEN];
        OsRng.fill_bytes(&mut prefix);
        Self {
            version: FORMAT_VERSION,
            cipher: CIPHER_ID.to_string(),
            kdf,
            nonce_prefix: STANDARD.encode(prefix),
            chunk_size,
        }
    }

    /// Serialize the header together with magic and length prefix
    fn encode(&self) -> SnapvaultResult<Vec<u8>> {
        let json = serde_json::to_vec(self)
            .map_err(|e| SnapvaultError::Archive(format!("Failed to serialize envelope header: {}", e)))?;
        let mut out = Vec::with_capacity(MAGIC.len() + 4 + json.len());
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&(json.len() as u32).to_be_bytes());
        out.extend_from_slice(&json);
        Ok(out)
    }

    /// Read a header from the start of an artifact
    ///
    /// Returns the parsed header and its exact on-disk bytes. Does not need
    /// the passphrase.
    pub fn read_from<R: Read>(reader: &mut R) -> SnapvaultResult<(Self, Vec<u8>)> {
        let mut prefix = [0u8; MAGIC.len() + 4];
        read_exact_or_corrupt(reader, &mut prefix)?;
        if &prefix[..MAGIC.len()] != MAGIC {
            return Err(SnapvaultError::WrongPassphraseOrCorrupt);
        }

        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(&prefix[MAGIC.len()..]);
        let len = u32::from_be_bytes(len_bytes) as usize;
        if len == 0 || len > MAX_HEADER_LEN {
            return Err(SnapvaultError::WrongPassphraseOrCorrupt);
        }

        let mut json = vec![0u8; len];
        read_exact_or_corrupt(reader, &mut json)?;
        let header: EnvelopeHeader =
            serde_json::from_slice(&json).map_err(|_| SnapvaultError::WrongPassphraseOrCorrupt)?;
        header.validate()?;

        let mut raw = prefix.to_vec();
        raw.extend_from_slice(&json);
        Ok((header, raw))
    }

    fn validate(&self) -> SnapvaultResult<()> {
        let chunk_size = self.chunk_size as usize;
        if self.version != FORMAT_VERSION
            || self.cipher != CIPHER_ID
            || chunk_size == 0
            || chunk_size > MAX_CHUNK_SIZE
            || self.kdf.validate().is_err()
            || self.nonce_prefix_bytes().is_err()
        {
            return Err(SnapvaultError::WrongPassphraseOrCorrupt);
        }
        Ok(())
    }

    fn nonce_prefix_bytes(&self) -> SnapvaultResult<[u8; NONCE_PREFIX_LEN]> {
        let bytes = STANDARD
            .decode(&self.nonce_prefix)
            .map_err(|_| SnapvaultError::WrongPassphraseOrCorrupt)?;
        bytes
            .try_into()
            .map_err(|_| SnapvaultError::WrongPassphraseOrCorrupt)
    }
}

fn read_exact_or_corrupt<R: Read>(reader: &mut R, buf: &mut [u8]) -> SnapvaultResult<()> {
    reader.read_exact(buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => SnapvaultError::WrongPassphraseOrCorrupt,
        _ => SnapvaultError::Archive(format!("Failed to read artifact header: {}", e)),
    })
}

fn cipher_for(key: &DerivedKey) -> SnapvaultResult<Aes256Gcm> {
    Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| SnapvaultError::Config(format!("Failed to create cipher: {}", e)))
}

fn authentication_error() -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, "artifact authentication failed")
}

/// Encrypting writer
///
/// Buffers up to one chunk of plaintext and writes sealed chunks to the
/// inner writer. [`EnvelopeWriter::finish`] must be called to seal the final
/// chunk; dropping the writer without it leaves an artifact that will fail
/// authentication.
pub struct EnvelopeWriter<W: Write> {
    inner: W,
    encryptor: EncryptorBE32<Aes256Gcm>,
    header: EnvelopeHeader,
    aad: Vec<u8>,
    buffer: Vec<u8>,
    chunk_size: usize,
}

impl<W: Write> EnvelopeWriter<W> {
    /// Derive a fresh key for this stream and write the header
    pub fn new(
        mut inner: W,
        passphrase: &Passphrase,
        costs: KdfCosts,
        chunk_size: usize,
    ) -> SnapvaultResult<Self> {
        if chunk_size == 0 || chunk_size > MAX_CHUNK_SIZE {
            return Err(SnapvaultError::Config(format!(
                "Chunk size must be between 1 and {} bytes, got {}",
                MAX_CHUNK_SIZE, chunk_size
            )));
        }

        let kdf = KeyDerivationParams::generate(costs);
        let key = derive_key(passphrase, &kdf)?;
        let header = EnvelopeHeader::new(kdf, chunk_size as u32);
        let aad = header.encode()?;
        let prefix = header.nonce_prefix_bytes()?;

        inner
            .write_all(&aad)
            .map_err(|e| SnapvaultError::Archive(format!("Failed to write artifact header: {}", e)))?;

        let encryptor = EncryptorBE32::from_aead(cipher_for(&key)?, GenericArray::from_slice(&prefix));

        Ok(Self {
            inner,
            encryptor,
            header,
            aad,
            buffer: Vec::with_capacity(chunk_size * 2),
            chunk_size,
        })
    }

    /// The header written at the start of the stream
    pub fn header(&self) -> &EnvelopeHeader {
        &self.header
    }

    /// Seal every complete chunk, always keeping at least one byte back
    /// so the final chunk can be flagged as last
    fn seal_full_chunks(&mut self) -> io::Result<()> {
        while self.buffer.len() > self.chunk_size {
            let sealed = self
                .encryptor
                .encrypt_next(Payload {
                    msg: &self.buffer[..self.chunk_size],
                    aad: &self.aad,
                })
                .map_err(|_| io::Error::new(io::ErrorKind::Other, "chunk encryption failed"))?;
            self.inner.write_all(&sealed)?;
            self.buffer.drain(..self.chunk_size);
        }
        Ok(())
    }

    /// Seal the final chunk, flush, and hand back the inner writer
    pub fn finish(mut self) -> io::Result<W> {
        self.seal_full_chunks()?;
        let Self {
            mut inner,
            encryptor,
            aad,
            buffer,
            ..
        } = self;

        let sealed = encryptor
            .encrypt_last(Payload {
                msg: &buffer,
                aad: &aad,
            })
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "final chunk encryption failed"))?;
        inner.write_all(&sealed)?;
        inner.flush()?;
        Ok(inner)
    }
}

impl<W: Write> Write for EnvelopeWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        self.seal_full_chunks()?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Decrypting reader
///
/// Yields plaintext only after the chunk it belongs to has authenticated.
/// End of stream is reported only once the final chunk has verified, so a
/// truncated artifact always ends in an error.
pub struct EnvelopeReader<R: Read> {
    inner: R,
    decryptor: Option<DecryptorBE32<Aes256Gcm>>,
    header: EnvelopeHeader,
    aad: Vec<u8>,
    sealed_chunk: usize,
    pending: Vec<u8>,
    plain: Vec<u8>,
    pos: usize,
    authentication_failed: bool,
}

impl<R: Read> EnvelopeReader<R> {
    /// Read the header, derive the key and authenticate the first chunk
    ///
    /// A wrong passphrase is therefore reported here, before the caller has
    /// consumed any plaintext.
    pub fn open(mut inner: R, passphrase: &Passphrase) -> SnapvaultResult<Self> {
        let (header, aad) = EnvelopeHeader::read_from(&mut inner)?;
        let key = derive_key(passphrase, &header.kdf).map_err(|_| SnapvaultError::WrongPassphraseOrCorrupt)?;
        let prefix = header.nonce_prefix_bytes()?;
        let decryptor = DecryptorBE32::from_aead(cipher_for(&key)?, GenericArray::from_slice(&prefix));
        let sealed_chunk = header.chunk_size as usize + TAG_LEN;

        let mut reader = Self {
            inner,
            decryptor: Some(decryptor),
            header,
            aad,
            sealed_chunk,
            pending: Vec::with_capacity(sealed_chunk + 1),
            plain: Vec::new(),
            pos: 0,
            authentication_failed: false,
        };
        if let Err(err) = reader.refill() {
            return Err(reader.classify_error(err));
        }
        Ok(reader)
    }

    /// The header this stream was sealed with
    pub fn header(&self) -> &EnvelopeHeader {
        &self.header
    }

    /// Whether a chunk has failed authentication
    pub fn authentication_failed(&self) -> bool {
        self.authentication_failed
    }

    /// Map an I/O error observed downstream of this reader to a typed error
    pub fn classify_error(&self, err: io::Error) -> SnapvaultError {
        if self.authentication_failed {
            SnapvaultError::WrongPassphraseOrCorrupt
        } else {
            SnapvaultError::Archive(format!("Failed to read artifact: {}", err))
        }
    }

    /// Fill `pending` with one sealed chunk plus a byte of look-ahead
    fn read_ahead(&mut self) -> io::Result<()> {
        let want = self.sealed_chunk + 1;
        while self.pending.len() < want {
            let start = self.pending.len();
            self.pending.resize(want, 0);
            match self.inner.read(&mut self.pending[start..]) {
                Ok(0) => {
                    self.pending.truncate(start);
                    break;
                }
                Ok(n) => self.pending.truncate(start + n),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => self.pending.truncate(start),
                Err(e) => {
                    self.pending.truncate(start);
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    fn refill(&mut self) -> io::Result<()> {
        self.plain.clear();
        self.pos = 0;
        if self.decryptor.is_none() {
            return Ok(());
        }

        self.read_ahead()?;

        let opened = if self.pending.len() > self.sealed_chunk {
            let result = match self.decryptor.as_mut() {
                Some(decryptor) => decryptor.decrypt_next(Payload {
                    msg: &self.pending[..self.sealed_chunk],
                    aad: &self.aad,
                }),
                None => return Ok(()),
            };
            self.pending.drain(..self.sealed_chunk);
            result
        } else {
            let result = match self.decryptor.take() {
                Some(decryptor) => decryptor.decrypt_last(Payload {
                    msg: &self.pending,
                    aad: &self.aad,
                }),
                None => return Ok(()),
            };
            self.pending.clear();
            result
        };

        match opened {
            Ok(plain) => {
                self.plain = plain;
                Ok(())
            }
            Err(_) => {
                self.authentication_failed = true;
                self.decryptor = None;
                Err(authentication_error())
            }
        }
    }
}

impl<R: Read> Read for EnvelopeReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.pos >= self.plain.len() {
            if self.authentication_failed {
                return Err(authentication_error());
            }
            if self.decryptor.is_none() {
                return Ok(0);
            }
            self.refill()?;
        }
        let n = buf.len().min(self.plain.len() - self.pos);
        buf[..n].copy_from_slice(&self.plain[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

/// Encrypt everything from `input` into `output`, returning the writer
pub fn encrypt_stream<R: Read, W: Write>(
    mut input: R,
    output: W,
    passphrase: &Passphrase,
    costs: KdfCosts,
    chunk_size: usize,
) -> SnapvaultResult<W> {
    let mut writer = EnvelopeWriter::new(output, passphrase, costs, chunk_size)?;
    io::copy(&mut input, &mut writer)?;
    Ok(writer.finish()?)
}

/// Decrypt and authenticate a whole artifact into `output`
///
/// Returns the number of plaintext bytes written.
pub fn decrypt_stream<R: Read, W: Write>(
    input: R,
    mut output: W,
    passphrase: &Passphrase,
) -> SnapvaultResult<u64> {
    let mut reader = EnvelopeReader::open(input, passphrase)?;
    let copied = io::copy(&mut reader, &mut output);
    copied.map_err(|e| reader.classify_error(e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cheap() -> KdfCosts {
        KdfCosts::new(1024, 1, 1)
    }

    fn seal(plaintext: &[u8], chunk_size: usize) -> Vec<u8> {
        encrypt_stream(plaintext, Vec::new(), &"correct horse".into(), cheap(), chunk_size).unwrap()
    }

    fn open(artifact: &[u8], passphrase: &str) -> SnapvaultResult<Vec<u8>> {
        let mut out = Vec::new();
        decrypt_stream(artifact, &mut out, &passphrase.into())?;
        Ok(out)
    }

    #[test]
    fn test_round_trip_multi_chunk() {
        let plaintext: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let artifact = seal(&plaintext, 1024);
        assert_eq!(open(&artifact, "correct horse").unwrap(), plaintext);
    }

    #[test]
    fn test_round_trip_exact_chunk_boundary() {
        let plaintext = vec![7u8; 4096];
        let artifact = seal(&plaintext, 1024);
        assert_eq!(open(&artifact, "correct horse").unwrap(), plaintext);
    }

    #[test]
    fn test_empty_plaintext() {
        let artifact = seal(b"", 1024);
        assert!(open(&artifact, "correct horse").unwrap().is_empty());
    }

    #[test]
    fn test_wrong_passphrase_fails() {
        let artifact = seal(b"graph payload", 1024);
        let err = open(&artifact, "battery staple").unwrap_err();
        assert!(matches!(err, SnapvaultError::WrongPassphraseOrCorrupt));
    }

    #[test]
    fn test_wrong_passphrase_reported_on_open() {
        let artifact = seal(&vec![1u8; 5000], 1024);
        let result = EnvelopeReader::open(artifact.as_slice(), &"nope".into());
        assert!(matches!(result, Err(SnapvaultError::WrongPassphraseOrCorrupt)));
    }

    #[test]
    fn test_tampered_chunk_fails() {
        let plaintext = vec![3u8; 5000];
        let mut artifact = seal(&plaintext, 1024);
        let last = artifact.len() - 1;
        artifact[last - 2000] ^= 0x01;
        let err = open(&artifact, "correct horse").unwrap_err();
        assert!(matches!(err, SnapvaultError::WrongPassphraseOrCorrupt));
    }

    #[test]
    fn test_truncated_at_chunk_boundary_fails() {
        let plaintext = vec![9u8; 3000];
        let artifact = seal(&plaintext, 1024);
        // Drop the final sealed chunk (3000 = 2 full chunks + 952 bytes)
        let truncated = &artifact[..artifact.len() - (952 + TAG_LEN)];
        let err = open(truncated, "correct horse").unwrap_err();
        assert!(matches!(err, SnapvaultError::WrongPassphraseOrCorrupt));
    }

    #[test]
    fn test_tampered_header_fails() {
        let artifact = seal(b"payload", 1024);
        let (header, raw) = EnvelopeHeader::read_from(&mut artifact.as_slice()).unwrap();
        let mut forged = header.clone();
        forged.chunk_size = 2048;
        let mut json = serde_json::to_vec(&forged).unwrap();
        json.resize(raw.len() - MAGIC.len() - 4, b' ');
        let mut tampered = raw[..MAGIC.len() + 4].to_vec();
        tampered.extend_from_slice(&json);
        tampered.extend_from_slice(&artifact[raw.len()..]);
        let err = open(&tampered, "correct horse").unwrap_err();
        assert!(matches!(err, SnapvaultError::WrongPassphraseOrCorrupt));
    }

    #[test]
    fn test_oversized_memory_cost_rejected_before_derivation() {
        let artifact = seal(b"payload", 1024);
        let (header, raw) = EnvelopeHeader::read_from(&mut artifact.as_slice()).unwrap();
        let mut forged = header.clone();
        forged.kdf.costs.memory_cost = 2 * 1024 * 1024;
        let mut crafted = forged.encode().unwrap();
        crafted.extend_from_slice(&artifact[raw.len()..]);

        let err = EnvelopeHeader::read_from(&mut crafted.as_slice()).unwrap_err();
        assert!(matches!(err, SnapvaultError::WrongPassphraseOrCorrupt));
        let result = EnvelopeReader::open(crafted.as_slice(), &"correct horse".into());
        assert!(matches!(result, Err(SnapvaultError::WrongPassphraseOrCorrupt)));
    }

    #[test]
    fn test_not_an_artifact() {
        let err = open(b"PK\x03\x04 definitely a zip file", "x").unwrap_err();
        assert!(matches!(err, SnapvaultError::WrongPassphraseOrCorrupt));
    }

    #[test]
    fn test_header_is_self_describing() {
        let artifact = seal(b"payload", 2048);
        let (header, _) = EnvelopeHeader::read_from(&mut artifact.as_slice()).unwrap();
        assert_eq!(header.version, FORMAT_VERSION);
        assert_eq!(header.cipher, CIPHER_ID);
        assert_eq!(header.chunk_size, 2048);
        assert_eq!(header.kdf.costs, cheap());
    }

    #[test]
    fn test_each_stream_gets_fresh_salt_and_nonce() {
        let a = seal(b"same input", 1024);
        let b = seal(b"same input", 1024);
        let (ha, _) = EnvelopeHeader::read_from(&mut a.as_slice()).unwrap();
        let (hb, _) = EnvelopeHeader::read_from(&mut b.as_slice()).unwrap();
        assert_ne!(ha.kdf.salt, hb.kdf.salt);
        assert_ne!(ha.nonce_prefix, hb.nonce_prefix);
        assert_ne!(a, b);
    }

    #[test]
    fn test_rejects_zero_chunk_size() {
        let result = EnvelopeWriter::new(Vec::new(), &"p".into(), cheap(), 0);
        assert!(matches!(result, Err(SnapvaultError::Config(_))));
    }
}
