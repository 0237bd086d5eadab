//! Authenticated encryption of archive bytes with an age passphrase.
//!
//! `CipherBox` is the only place key material is read. The passphrase is
//! held in a zeroizing wrapper for the process lifetime and is never
//! written to the state document, so artifacts from a prior run stay
//! decryptable across restarts.

use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use age::secrecy::SecretString;
use age::stream::{StreamReader, StreamWriter};
use std::fmt::{Debug, Formatter};
use std::io::{Cursor, Read, Seek, SeekFrom, Write};
use std::str::FromStr;
use tempfile::NamedTempFile;
use tracing::debug;
use validator::Validate;
use zeroize::Zeroize;

/// Placeholder text shown instead of the actual passphrase in debug output
static REDACTED_PASSPHRASE: &str = "###REDACTED_PASSPHRASE###";

/// A passphrase wrapper that never appears in logs or debug output and
/// zeroes its memory on drop.
#[derive(Validate, Clone, Zeroize, PartialEq, Eq)]
pub struct RedactedString {
    /// Minimum 8 characters for basic security
    #[validate(length(min = 8))]
    inner: String,
}

impl RedactedString {
    pub fn new<S: Into<String>>(inner: S) -> Self {
        Self { inner: inner.into() }
    }
}

impl From<String> for RedactedString {
    fn from(inner: String) -> Self {
        Self { inner }
    }
}

impl From<&str> for RedactedString {
    fn from(inner: &str) -> Self {
        Self { inner: inner.into() }
    }
}

impl FromStr for RedactedString {
    type Err = std::convert::Infallible;

    /// Lets clap parse a passphrase argument straight into the redacted
    /// wrapper, so no plain string copy sits in the argument struct.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self { inner: s.into() })
    }
}

impl Debug for RedactedString {
    /// Always shows the redacted placeholder instead of the actual value
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", REDACTED_PASSPHRASE)
    }
}

impl Drop for RedactedString {
    fn drop(&mut self) {
        self.zeroize();
    }
}

/// Symmetric encrypt/decrypt for archive bytes.
///
/// Uses age's passphrase-based STREAM construction, so decryption fails
/// with a distinct error when the ciphertext was produced with a different
/// passphrase or has been tampered with or truncated; it never returns
/// garbage plaintext.
#[derive(Debug)]
pub struct CipherBox {
    passphrase: RedactedString,
}

impl CipherBox {
    pub fn new(passphrase: RedactedString) -> Result<CipherBox> {
        passphrase.validate()?;
        Ok(Self { passphrase })
    }

    fn secret(&self) -> SecretString {
        self.passphrase.inner.as_str().into()
    }

    /// Wraps `writer` so everything written to it is encrypted. The
    /// returned writer must be `finish`ed to flush the final STREAM chunk.
    pub fn wrap_writer<W: Write>(&self, writer: W) -> Result<StreamWriter<W>> {
        debug!("Initializing age encryption with passphrase");
        Ok(age::Encryptor::with_user_passphrase(self.secret()).wrap_output(writer)?)
    }

    /// Opens an encrypted stream for reading. Fails up front on a foreign
    /// or damaged header; payload tampering surfaces while reading.
    pub fn open_reader<R: Read>(&self, reader: R) -> Result<StreamReader<R>> {
        let decryptor = age::Decryptor::new(reader)?;
        let identity = age::scrypt::Identity::new(self.secret());
        Ok(decryptor.decrypt(std::iter::once(&identity as &dyn age::Identity))?)
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut writer = self.wrap_writer(Vec::new())?;
        writer.write_all(plaintext)?;
        Ok(writer.finish()?)
    }

    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let mut reader = self.open_reader(Cursor::new(ciphertext))?;
        let mut plaintext = Vec::new();
        reader
            .read_to_end(&mut plaintext)
            .map_err(|e| Error::CipherFailure {
                reason: e.to_string(),
            })?;
        Ok(plaintext)
    }

    /// Decrypts an entire stream into a seekable temporary file.
    ///
    /// The copy runs to completion before the caller sees the file, so
    /// authentication of every chunk has already succeeded by the time
    /// anything downstream (like an unpack) touches the plaintext.
    pub fn decrypt_to_temp<R: Read>(&self, reader: R) -> Result<NamedTempFile> {
        let mut reader = self.open_reader(reader)?;
        let mut tmp = NamedTempFile::new()?;
        std::io::copy(&mut reader, &mut tmp).map_err(|e| Error::CipherFailure {
            reason: e.to_string(),
        })?;
        tmp.seek(SeekFrom::Start(0))?;
        Ok(tmp)
    }
}
