//! Key types and signature verification.
//!
//! This module intentionally stays thin: the actual signature math is `ring`'s, not ours (per
//! the non-goal of "replacing TUF's core signature math"). What lives here is just enough
//! structure to thread key identity through [`crate::metadata`] and [`crate::verify`].

use std::fmt;

use data_encoding::{BASE64URL, HEXLOWER};
use ring::digest;
use ring::signature::{self, UnparsedPublicKey, VerificationAlgorithm};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::Error;

/// The signature schemes a key may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyType {
    /// Ed25519, the scheme most TAF-style authentication repositories use for role keys.
    Ed25519,
    /// RSA with PKCS#1 v1.5 padding and SHA-256.
    RsaPkcs1Sha256,
    /// ECDSA over the P-256 curve with SHA-256.
    EcdsaP256Sha256,
}

impl KeyType {
    fn algorithm(self) -> &'static dyn VerificationAlgorithm {
        match self {
            KeyType::Ed25519 => &signature::ED25519,
            KeyType::RsaPkcs1Sha256 => &signature::RSA_PKCS1_2048_8192_SHA256,
            KeyType::EcdsaP256Sha256 => &signature::ECDSA_P256_SHA256_ASN1,
        }
    }
}

/// The hex-lowercase-sha256 identifier of a public key, used to reference keys from role
/// definitions without embedding the key material itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyId(String);

impl KeyId {
    /// Derive a `KeyId` from the raw public key bytes.
    pub fn from_public_key_bytes(key_type: KeyType, bytes: &[u8]) -> Self {
        let mut input = Vec::with_capacity(bytes.len() + 1);
        input.push(key_type as u8);
        input.extend_from_slice(bytes);
        let digest = digest::digest(&digest::SHA256, &input);
        KeyId(HEXLOWER.encode(digest.as_ref()))
    }

    /// Parse a `KeyId` from its string form, as it appears in `root.json`'s `roles.*.keyids`.
    pub fn from_string(s: &str) -> Result<Self, Error> {
        if s.is_empty() {
            return Err(Error::IllegalArgument("empty key id".into()));
        }
        Ok(KeyId(s.to_string()))
    }

    /// The string form of this key id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for KeyId {
    fn serialize<S: Serializer>(&self, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for KeyId {
    fn deserialize<D: Deserializer<'de>>(de: D) -> Result<Self, D::Error> {
        let s = String::deserialize(de)?;
        KeyId::from_string(&s).map_err(serde::de::Error::custom)
    }
}

/// A public key, as declared in a role's `root.json` key store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKey {
    key_id: KeyId,
    #[serde(rename = "keytype")]
    key_type: KeyType,
    #[serde(rename = "keyval", with = "hex_value")]
    value: Vec<u8>,
}

impl PublicKey {
    /// Construct a new `PublicKey`, deriving its id from the key type and raw bytes.
    pub fn new(key_type: KeyType, value: Vec<u8>) -> Self {
        let key_id = KeyId::from_public_key_bytes(key_type, &value);
        PublicKey {
            key_id,
            key_type,
            value,
        }
    }

    /// This key's id.
    pub fn key_id(&self) -> &KeyId {
        &self.key_id
    }

    /// This key's type.
    pub fn key_type(&self) -> KeyType {
        self.key_type
    }

    /// Verify a signature over `msg` made with this key.
    pub fn verify(&self, msg: &[u8], signature: &Signature) -> Result<(), Error> {
        if &self.key_id != signature.key_id() {
            return Err(Error::Programming(
                "verify called with a signature from a different key".into(),
            ));
        }

        let alg = self.key_type.algorithm();
        UnparsedPublicKey::new(alg, &self.value)
            .verify(msg, signature.value())
            .map_err(|_| Error::Encoding("signature verification failed".into()))
    }
}

/// A signature over a role's signed metadata body, produced by one key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    #[serde(rename = "keyid")]
    key_id: KeyId,
    #[serde(rename = "sig", with = "hex_value")]
    value: Vec<u8>,
}

impl Signature {
    /// Construct a new `Signature`.
    pub fn new(key_id: KeyId, value: Vec<u8>) -> Self {
        Signature { key_id, value }
    }

    /// The id of the key that produced this signature.
    pub fn key_id(&self) -> &KeyId {
        &self.key_id
    }

    /// The raw signature bytes.
    pub fn value(&self) -> &[u8] {
        &self.value
    }
}

mod hex_value {
    use data_encoding::HEXLOWER;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&HEXLOWER.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(de)?;
        HEXLOWER
            .decode(s.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

/// Base64url-encode arbitrary bytes. Used by [`crate::git`] to render commit-content hashes in
/// error messages and logs without pulling hex formatting into every caller.
pub fn base64url(bytes: &[u8]) -> String {
    BASE64URL.encode(bytes)
}
