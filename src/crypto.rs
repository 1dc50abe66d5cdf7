use argon2::{
    password_hash::rand_core::{OsRng, RngCore},
    Argon2, Params,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chacha20poly1305::{
    aead::{Aead, AeadCore, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::error::ErrorKind;

// Default Argon2id cost: 64 MiB, 3 passes, 4 lanes.
const DEFAULT_M_COST: u32 = 64 * 1024;
const DEFAULT_T_COST: u32 = 3;
const DEFAULT_P_COST: u32 = 4;

// Costs read back from a blob header are untrusted; anything past these
// bounds is treated as corruption rather than run.
const MAX_M_COST: u32 = 1024 * 1024;
const MAX_T_COST: u32 = 16;
const MAX_P_COST: u32 = 16;

const MAGIC: &str = "enotes-v1";
const VERSION: u8 = 1;
const KEY_LEN: usize = 32;
const CHECK_LEN: usize = 32;
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

// version | m_cost | t_cost | p_cost | salt | nonce | key check
const SALT_AT: usize = 13;
const NONCE_AT: usize = SALT_AT + SALT_LEN;
const CHECK_AT: usize = NONCE_AT + NONCE_LEN;
const HEADER_LEN: usize = CHECK_AT + CHECK_LEN;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CryptoError {
    #[error("incorrect password")]
    IncorrectPassword,
    #[error("malformed ciphertext: {0}")]
    Format(String),
    #[error("invalid key derivation parameters: {0}")]
    Params(String),
}

impl From<CryptoError> for ErrorKind {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::IncorrectPassword => ErrorKind::IncorrectPassword,
            CryptoError::Format(msg) => ErrorKind::Format(msg),
            CryptoError::Params(msg) => ErrorKind::Io(format!("key derivation: {}", msg)),
        }
    }
}

/// Argon2id cost parameters. Written into every blob so that decryption
/// never depends on the current configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    pub m_cost: u32,
    pub t_cost: u32,
    pub p_cost: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            m_cost: DEFAULT_M_COST,
            t_cost: DEFAULT_T_COST,
            p_cost: DEFAULT_P_COST,
        }
    }
}

impl KdfParams {
    /// Rejects costs this program would refuse to read back.
    pub fn check(&self) -> Result<(), String> {
        if !(1..=MAX_P_COST).contains(&self.p_cost) {
            return Err(format!("p_cost {} outside 1..={}", self.p_cost, MAX_P_COST));
        }
        if !(1..=MAX_T_COST).contains(&self.t_cost) {
            return Err(format!("t_cost {} outside 1..={}", self.t_cost, MAX_T_COST));
        }
        if self.m_cost < 8 * self.p_cost || self.m_cost > MAX_M_COST {
            return Err(format!(
                "m_cost {} outside {}..={}",
                self.m_cost,
                8 * self.p_cost,
                MAX_M_COST
            ));
        }
        Ok(())
    }

    fn to_argon2(self) -> Result<Params, CryptoError> {
        self.check().map_err(CryptoError::Params)?;
        Params::new(
            self.m_cost,
            self.t_cost,
            self.p_cost,
            Some(KEY_LEN + CHECK_LEN),
        )
        .map_err(|e| CryptoError::Params(e.to_string()))
    }
}

/// Output of one key derivation: the cipher key and a value stored in the
/// header that tells a wrong password apart from a damaged body.
pub struct DerivedKeys {
    pub cipher: Zeroizing<[u8; KEY_LEN]>,
    pub check: [u8; CHECK_LEN],
}

/// Derives the cipher key and key check from the password and salt.
/// Deliberately slow: callers must keep this off the input-handling path.
pub fn derive_keys(
    password: &str,
    salt: &[u8],
    params: &KdfParams,
) -> Result<DerivedKeys, CryptoError> {
    let argon2 = Argon2::new(
        argon2::Algorithm::Argon2id,
        argon2::Version::V0x13,
        params.to_argon2()?,
    );

    let mut output = Zeroizing::new([0u8; KEY_LEN + CHECK_LEN]);
    argon2
        .hash_password_into(password.as_bytes(), salt, &mut *output)
        .map_err(|e| CryptoError::Params(e.to_string()))?;

    let mut cipher = Zeroizing::new([0u8; KEY_LEN]);
    cipher.copy_from_slice(&output[..KEY_LEN]);
    let mut check = [0u8; CHECK_LEN];
    check.copy_from_slice(&output[KEY_LEN..]);
    Ok(DerivedKeys { cipher, check })
}

/// Seals `plaintext` under `password` with a fresh salt and nonce.
pub fn encrypt(plaintext: &[u8], password: &str, params: &KdfParams) -> Result<String, CryptoError> {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    let keys = derive_keys(password, &salt, params)?;

    let cipher = ChaCha20Poly1305::new((&*keys.cipher).into());
    let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|e| CryptoError::Format(format!("encryption failed: {}", e)))?;

    let mut payload = Vec::with_capacity(HEADER_LEN + ciphertext.len());
    payload.push(VERSION);
    payload.extend_from_slice(&params.m_cost.to_le_bytes());
    payload.extend_from_slice(&params.t_cost.to_le_bytes());
    payload.extend_from_slice(&params.p_cost.to_le_bytes());
    payload.extend_from_slice(&salt);
    payload.extend_from_slice(&nonce);
    payload.extend_from_slice(&keys.check);
    payload.extend_from_slice(&ciphertext);

    Ok(format!("{}\n{}\n", MAGIC, BASE64.encode(payload)))
}

/// Opens a blob produced by [`encrypt`].
///
/// A key check mismatch is `IncorrectPassword`. A body that fails
/// authentication under the right key, or anything wrong with the framing,
/// is `Format`.
pub fn decrypt(blob: &str, password: &str) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    let mut lines = blob.lines();
    if lines.next().map(str::trim) != Some(MAGIC) {
        return Err(CryptoError::Format("missing enotes header".to_string()));
    }
    let body: String = lines.map(str::trim).collect();
    let payload = BASE64
        .decode(body)
        .map_err(|e| CryptoError::Format(format!("bad base64 body: {}", e)))?;

    if payload.len() < HEADER_LEN + TAG_LEN {
        return Err(CryptoError::Format("payload too short".to_string()));
    }
    if payload[0] != VERSION {
        return Err(CryptoError::Format(format!(
            "unsupported format version {}",
            payload[0]
        )));
    }

    let params = KdfParams {
        m_cost: read_u32(&payload, 1),
        t_cost: read_u32(&payload, 5),
        p_cost: read_u32(&payload, 9),
    };
    params.check().map_err(CryptoError::Format)?;

    let salt = &payload[SALT_AT..NONCE_AT];
    let nonce = Nonce::from_slice(&payload[NONCE_AT..CHECK_AT]);
    let stored_check = &payload[CHECK_AT..HEADER_LEN];
    let ciphertext = &payload[HEADER_LEN..];

    let keys = derive_keys(password, salt, &params).map_err(|e| match e {
        CryptoError::Params(msg) => CryptoError::Format(msg),
        other => other,
    })?;
    if !bool::from(keys.check.as_slice().ct_eq(stored_check)) {
        return Err(CryptoError::IncorrectPassword);
    }

    let cipher = ChaCha20Poly1305::new((&*keys.cipher).into());
    let plaintext = cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| CryptoError::Format("ciphertext failed authentication".to_string()))?;

    Ok(Zeroizing::new(plaintext))
}

fn read_u32(payload: &[u8], at: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&payload[at..at + 4]);
    u32::from_le_bytes(bytes)
}

#[cfg(test)]
pub(crate) fn test_params() -> KdfParams {
    KdfParams {
        m_cost: 8,
        t_cost: 1,
        p_cost: 1,
    }
}

/// Flips the final ciphertext byte of a blob, leaving the header intact.
#[cfg(test)]
pub(crate) fn damage_body(blob: &str) -> String {
    let mut payload = BASE64.decode(blob.lines().nth(1).unwrap()).unwrap();
    *payload.last_mut().unwrap() ^= 0x01;
    format!("{}\n{}\n", MAGIC, BASE64.encode(payload))
}
