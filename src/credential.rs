use rand::rngs::StdRng;
use rand::RngCore;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use zeroize::Zeroizing;

use crate::crypto::{self, KdfParams};
use crate::error::ErrorKind;
use crate::store;

/// Hidden marker whose successful decryption proves a password.
pub const MARKER_FILE: &str = ".enotes-password.enc";

const FILLER_LEN: usize = 32;

/// Verifies or establishes the single shared password.
///
/// The filler generator is handed in at construction so callers (and tests)
/// decide how it is seeded.
pub struct CredentialGate {
    marker: PathBuf,
    kdf: KdfParams,
    rng: Mutex<StdRng>,
}

impl CredentialGate {
    pub fn new(dir: &Path, kdf: KdfParams, rng: StdRng) -> Self {
        Self {
            marker: dir.join(MARKER_FILE),
            kdf,
            rng: Mutex::new(rng),
        }
    }

    pub fn marker_path(&self) -> &Path {
        &self.marker
    }

    pub fn exists(&self) -> Result<bool, ErrorKind> {
        match fs::symlink_metadata(&self.marker) {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(ErrorKind::from_io(&self.marker, e)),
        }
    }

    /// Encrypts fresh random filler under `password` as the new marker.
    /// Never replaces a marker that is already there.
    pub fn establish(&self, password: &str) -> Result<(), ErrorKind> {
        let mut filler = Zeroizing::new([0u8; FILLER_LEN]);
        {
            let mut rng = self.rng.lock().unwrap_or_else(|p| p.into_inner());
            rng.fill_bytes(filler.as_mut_slice());
        }
        let blob = crypto::encrypt(filler.as_slice(), password, &self.kdf)?;
        store::write_new(&self.marker, blob.as_bytes()).map_err(|e| match e {
            // A vanished directory is not a recoverable "note missing" here.
            ErrorKind::NotFound(msg) => ErrorKind::Io(msg),
            other => other,
        })
    }

    pub fn verify(&self, password: &str) -> Result<(), ErrorKind> {
        let blob = fs::read_to_string(&self.marker).map_err(|e| match e.kind() {
            std::io::ErrorKind::InvalidData => {
                ErrorKind::Format(format!("{}: not a text blob", self.marker.display()))
            }
            _ => ErrorKind::Io(format!("{}: {}", self.marker.display(), e)),
        })?;
        crypto::decrypt(&blob, password)?;
        Ok(())
    }
}
