//! Standard security handler (RC4, revisions 2 and 3).
//!
//! Derives the document key from a password, checks it against `/U` (or
//! `/O` for owner passwords), and decrypts strings and streams per object.
//! The reverse direction (`create`) builds `/O`, `/U`, `/P` for writers.

use crate::codec::arcfour::{Arcfour, rc4};
use crate::error::{PdfError, Result};
use crate::model::objects::{PdfDict, PdfValue};
use bitflags::bitflags;

/// Padding appended to passwords shorter than 32 bytes.
pub const PASSWORD_PADDING: [u8; 32] = [
    0x28, 0xBF, 0x4E, 0x5E, 0x4E, 0x75, 0x8A, 0x41, 0x64, 0x00, 0x4E, 0x56, 0xFF, 0xFA, 0x01, 0x08,
    0x2E, 0x2E, 0x00, 0xB6, 0xD0, 0x68, 0x3E, 0x80, 0x2F, 0x0C, 0xA9, 0xFE, 0x64, 0x53, 0x69, 0x7A,
];

/// Trait for PDF security handlers.
pub trait SecurityHandler: Send + Sync {
    /// Decrypt a string belonging to object `obj_num`/`gen_num`.
    fn decrypt_string(&self, obj_num: u32, gen_num: u16, data: &[u8]) -> Vec<u8>;

    /// Decrypt a stream body (same as strings for RC4).
    fn decrypt_stream(&self, obj_num: u32, gen_num: u16, data: &[u8]) -> Vec<u8> {
        self.decrypt_string(obj_num, gen_num, data)
    }
}

bitflags! {
    /// User access permissions (`/P` bits).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Permissions: u32 {
        const PRINT = 1 << 2;
        const MODIFY = 1 << 3;
        const COPY = 1 << 4;
        const ANNOTATE = 1 << 5;
        const FILL_IN = 1 << 8;
        const ACCESSIBILITY = 1 << 9;
        const ASSEMBLE = 1 << 10;
        const PRINT_HIGH_RES = 1 << 11;
    }
}

impl Permissions {
    /// Encode as a `/P` value for a key of `key_bits`.
    ///
    /// 40-bit keys cannot express the finer bits on their own, so each one
    /// also turns on the legacy bit it refines.
    pub fn to_p_value(self, key_bits: u32) -> i32 {
        let mut flags = self;
        if key_bits == 40 {
            for (fine, legacy) in [
                (Self::FILL_IN, Self::ANNOTATE),
                (Self::ACCESSIBILITY, Self::COPY),
                (Self::ASSEMBLE, Self::MODIFY),
                (Self::PRINT_HIGH_RES, Self::PRINT),
            ] {
                if flags.contains(fine) {
                    flags |= legacy;
                }
            }
        }
        let reserved: u32 = if key_bits == 40 { 0xFFFF_FFC0 } else { 0xFFFF_F0C0 };
        ((flags.bits() | reserved) & !3) as i32
    }

    /// Decode a `/P` value, ignoring reserved bits.
    pub fn from_p_value(p: i32) -> Self {
        Self::from_bits_truncate(p as u32)
    }
}

/// Key material of an authenticated document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionState {
    pub file_key: Vec<u8>,
    pub key_bits: u32,
    pub permissions: i32,
}

/// PDF Standard Security Handler for R2 and R3 (RC4 encryption).
///
/// Supports:
/// - V=1, R=2: 40-bit RC4
/// - V=2, R=3: Variable-length RC4 (up to 128-bit)
#[derive(Debug, Clone)]
pub struct StandardSecurityHandler {
    /// The computed encryption key, empty until authenticated.
    key: Vec<u8>,
    /// Algorithm version (1 or 2).
    v: i64,
    /// Revision number (2 or 3).
    r: i64,
    /// Key length in bits.
    key_bits: u32,
    /// Owner password hash (O value).
    o: Vec<u8>,
    /// User password hash (U value).
    u: Vec<u8>,
    /// Permission flags (P value).
    p: i32,
    /// Document ID (first element).
    docid: Vec<u8>,
}

impl StandardSecurityHandler {
    /// Supported revision values.
    pub const SUPPORTED_REVISIONS: [i64; 2] = [2, 3];

    /// Read handler parameters from an `/Encrypt` dictionary.
    ///
    /// The handler is not usable for decryption until [`Self::authenticate`]
    /// succeeds.
    pub fn from_dict(encrypt: &PdfDict, doc_id: &[u8]) -> Result<Self> {
        match encrypt.get("Filter") {
            None => {}
            Some(PdfValue::Name(name)) if name == "Standard" => {}
            Some(other) => {
                return Err(PdfError::UnsupportedFeature(format!(
                    "security handler {}",
                    other.as_name().unwrap_or("(not a name)")
                )));
            }
        }

        let v = get_int_default(encrypt, "V", 0);
        if v >= 4 {
            return Err(PdfError::UnsupportedFeature(format!(
                "encryption version V={} (crypt filters)",
                v
            )));
        }
        if v == 3 {
            return Err(PdfError::UnsupportedFeature(
                "encryption version V=3".into(),
            ));
        }

        let r = get_int(encrypt, "R")?;
        if !Self::SUPPORTED_REVISIONS.contains(&r) {
            return Err(PdfError::UnsupportedFeature(format!(
                "security handler revision R={}",
                r
            )));
        }

        let key_bits = if r == 2 {
            40
        } else {
            let length = get_int_default(encrypt, "Length", 40);
            if !(40..=128).contains(&length) || length % 8 != 0 {
                return Err(PdfError::Encryption(format!(
                    "invalid key length {}",
                    length
                )));
            }
            length as u32
        };

        let o = get_bytes(encrypt, "O")?;
        let u = get_bytes(encrypt, "U")?;
        if o.len() < 32 || u.len() < 32 {
            return Err(PdfError::Encryption("/O and /U must be 32 bytes".into()));
        }
        let p = get_int(encrypt, "P")? as u32 as i32;

        Ok(Self {
            key: Vec::new(),
            v,
            r,
            key_bits,
            o: o[..32].to_vec(),
            u: u[..32].to_vec(),
            p,
            docid: doc_id.to_vec(),
        })
    }

    /// Read parameters and authenticate in one step.
    pub fn new(encrypt: &PdfDict, doc_id: &[u8], password: &str) -> Result<Self> {
        let mut handler = Self::from_dict(encrypt, doc_id)?;
        if handler.authenticate(password.as_bytes()) {
            Ok(handler)
        } else {
            Err(PdfError::Encryption("Incorrect password".into()))
        }
    }

    /// Set up encryption for a new document.
    ///
    /// An empty owner password falls back to the user password.
    pub fn create(
        user: &str,
        owner: &str,
        permissions: Permissions,
        key_bits: u32,
        doc_id: &[u8],
    ) -> Result<Self> {
        if !(40..=128).contains(&key_bits) || key_bits % 8 != 0 {
            return Err(PdfError::Encryption(format!(
                "invalid key length {}",
                key_bits
            )));
        }
        let (v, r) = if key_bits == 40 { (1, 2) } else { (2, 3) };
        let owner = if owner.is_empty() { user } else { owner };

        let mut handler = Self {
            key: Vec::new(),
            v,
            r,
            key_bits,
            o: Vec::new(),
            u: Vec::new(),
            p: permissions.to_p_value(key_bits),
            docid: doc_id.to_vec(),
        };

        handler.o = handler.compute_o_value(owner.as_bytes(), user.as_bytes());
        let key = handler.compute_encryption_key(user.as_bytes());
        handler.u = handler.compute_u_value(&key);
        handler.key = key;
        Ok(handler)
    }

    /// Try a password as user password, then as owner password.
    ///
    /// On success the document key is kept for decryption.
    pub fn authenticate(&mut self, password: &[u8]) -> bool {
        let key = self
            .authenticate_user_password(password)
            .or_else(|| self.authenticate_owner_password(password));
        match key {
            Some(key) => {
                self.key = key;
                true
            }
            None => false,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        !self.key.is_empty()
    }

    pub const fn revision(&self) -> i64 {
        self.r
    }

    pub const fn key_bits(&self) -> u32 {
        self.key_bits
    }

    /// Raw `/P` value.
    pub const fn permissions(&self) -> i32 {
        self.p
    }

    pub fn o_value(&self) -> &[u8] {
        &self.o
    }

    pub fn u_value(&self) -> &[u8] {
        &self.u
    }

    pub fn state(&self) -> EncryptionState {
        EncryptionState {
            file_key: self.key.clone(),
            key_bits: self.key_bits,
            permissions: self.p,
        }
    }

    /// The `/Encrypt` dictionary describing this handler.
    pub fn encrypt_dict(&self) -> PdfDict {
        let mut dict = PdfDict::new();
        dict.insert("Filter".into(), PdfValue::Name("Standard".into()));
        dict.insert("V".into(), PdfValue::Integer(self.v));
        dict.insert("R".into(), PdfValue::Integer(self.r));
        if self.v == 2 {
            dict.insert("Length".into(), PdfValue::Integer(i64::from(self.key_bits)));
        }
        dict.insert("O".into(), PdfValue::String(self.o.clone()));
        dict.insert("U".into(), PdfValue::String(self.u.clone()));
        dict.insert("P".into(), PdfValue::Integer(i64::from(self.p)));
        dict
    }

    /// Encrypt bytes belonging to an object.
    pub fn encrypt_bytes(&self, obj_num: u32, gen_num: u16, data: &[u8]) -> Vec<u8> {
        self.decrypt_rc4(obj_num, gen_num, data)
    }

    /// Key length in bytes used by the key derivation.
    const fn key_len(&self) -> usize {
        if self.r >= 3 {
            (self.key_bits / 8) as usize
        } else {
            5 // 40-bit for R2
        }
    }

    /// Compute the encryption key from a password (Algorithm 3.2).
    fn compute_encryption_key(&self, password: &[u8]) -> Vec<u8> {
        let mut context = md5::Context::new();
        context.consume(pad_password(password));
        context.consume(&self.o);
        context.consume(self.p.to_le_bytes());
        context.consume(&self.docid);

        let n = self.key_len();
        let mut result = context.finalize().0.to_vec();

        // For R >= 3, hash 50 more times
        if self.r >= 3 {
            for _ in 0..50 {
                result = md5::compute(&result[..n]).0.to_vec();
            }
        }

        result.truncate(n);
        result
    }

    /// RC4 key derived from the owner password (first steps of Algorithm 3.3).
    fn owner_key(&self, owner: &[u8]) -> Vec<u8> {
        let mut hash = md5::compute(pad_password(owner)).0.to_vec();
        if self.r >= 3 {
            for _ in 0..50 {
                hash = md5::compute(&hash).0.to_vec();
            }
        }
        hash.truncate(self.key_len());
        hash
    }

    /// Compute the O value (Algorithm 3.3).
    fn compute_o_value(&self, owner: &[u8], user: &[u8]) -> Vec<u8> {
        let key = self.owner_key(owner);
        let mut result = rc4(&key, &pad_password(user));
        if self.r >= 3 {
            for i in 1..20u8 {
                result = rc4(&xor_key(&key, i), &result);
            }
        }
        result
    }

    /// Compute the U value from the key (Algorithm 3.4/3.5).
    fn compute_u_value(&self, key: &[u8]) -> Vec<u8> {
        if self.r == 2 {
            return rc4(key, &PASSWORD_PADDING);
        }

        let mut context = md5::Context::new();
        context.consume(PASSWORD_PADDING);
        context.consume(&self.docid);
        let hash = context.finalize();

        let mut result = rc4(key, &hash.0);
        for i in 1..20u8 {
            result = rc4(&xor_key(key, i), &result);
        }

        // Only 16 bytes are significant; pad to 32 by repetition.
        let mut padded = result.clone();
        padded.extend_from_slice(&result);
        padded.truncate(32);
        padded
    }

    /// Verify an encryption key against the stored U value (Algorithm 3.6).
    fn verify_encryption_key(&self, key: &[u8]) -> bool {
        let computed_u = self.compute_u_value(key);
        if self.r == 2 {
            computed_u == self.u
        } else {
            computed_u[..16] == self.u[..16]
        }
    }

    fn authenticate_user_password(&self, password: &[u8]) -> Option<Vec<u8>> {
        let key = self.compute_encryption_key(password);
        self.verify_encryption_key(&key).then_some(key)
    }

    /// Authenticate with owner password (Algorithm 3.7).
    fn authenticate_owner_password(&self, password: &[u8]) -> Option<Vec<u8>> {
        let key = self.owner_key(password);

        // Recover the padded user password from O
        let user_password = if self.r == 2 {
            rc4(&key, &self.o)
        } else {
            let mut result = self.o.clone();
            for i in (0..20u8).rev() {
                Arcfour::new(&xor_key(&key, i)).process_in_place(&mut result);
            }
            result
        };

        self.authenticate_user_password(&user_password)
    }

    /// Per-object RC4 key (Algorithm 3.1), recomputed on every call.
    pub fn object_key(&self, obj_num: u32, gen_num: u16) -> Vec<u8> {
        let mut key_data = self.key.clone();
        key_data.extend_from_slice(&obj_num.to_le_bytes()[..3]);
        key_data.extend_from_slice(&gen_num.to_le_bytes());

        let hash = md5::compute(&key_data);
        let key_len = (self.key.len() + 5).min(16);
        hash.0[..key_len].to_vec()
    }

    fn decrypt_rc4(&self, obj_num: u32, gen_num: u16, data: &[u8]) -> Vec<u8> {
        rc4(&self.object_key(obj_num, gen_num), data)
    }
}

impl SecurityHandler for StandardSecurityHandler {
    fn decrypt_string(&self, obj_num: u32, gen_num: u16, data: &[u8]) -> Vec<u8> {
        self.decrypt_rc4(obj_num, gen_num, data)
    }
}

/// Pad or truncate a password to 32 bytes.
pub fn pad_password(password: &[u8]) -> [u8; 32] {
    let mut padded = [0u8; 32];
    let len = password.len().min(32);
    padded[..len].copy_from_slice(&password[..len]);
    padded[len..].copy_from_slice(&PASSWORD_PADDING[..32 - len]);
    padded
}

fn xor_key(key: &[u8], i: u8) -> Vec<u8> {
    key.iter().map(|b| b ^ i).collect()
}

fn get_int(encrypt: &PdfDict, key: &str) -> Result<i64> {
    encrypt
        .get(key)
        .and_then(|v| v.as_int().ok())
        .ok_or_else(|| PdfError::Encryption(format!("missing /{} in encrypt dict", key)))
}

fn get_int_default(encrypt: &PdfDict, key: &str, default: i64) -> i64 {
    encrypt
        .get(key)
        .and_then(|v| v.as_int().ok())
        .unwrap_or(default)
}

fn get_bytes(encrypt: &PdfDict, key: &str) -> Result<Vec<u8>> {
    encrypt
        .get(key)
        .and_then(|v| v.as_string().ok())
        .map(<[u8]>::to_vec)
        .ok_or_else(|| PdfError::Encryption(format!("missing /{} in encrypt dict", key)))
}
