//! Base58check-encoded chain primitives.
//!
//! Each type validates prefix, checksum and payload length on parse and
//! serializes back to its canonical string form.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::tezos::codec::CodecError;

const TZ1: &[u8] = &[6, 161, 159];
const TZ2: &[u8] = &[6, 161, 161];
const TZ3: &[u8] = &[6, 161, 164];
const KT1: &[u8] = &[2, 90, 121];
const BLOCK_HASH: &[u8] = &[1, 52];
const OPERATION_HASH: &[u8] = &[5, 116];
const ED25519_PUBLIC_KEY: &[u8] = &[13, 15, 37, 217];
const SECP256K1_PUBLIC_KEY: &[u8] = &[3, 254, 226, 86];
const P256_PUBLIC_KEY: &[u8] = &[3, 178, 139, 127];
const GENERIC_SIGNATURE: &[u8] = &[4, 130, 43];
const ED25519_SIGNATURE: &[u8] = &[9, 245, 205, 134, 18];
const SECP256K1_SIGNATURE: &[u8] = &[13, 115, 101, 19, 63];
const P256_SIGNATURE: &[u8] = &[54, 240, 44, 52];

fn decode_prefixed(
    kind: &'static str,
    value: &str,
    prefix: &[u8],
    len: usize,
) -> Result<Vec<u8>, CodecError> {
    let raw = bs58::decode(value)
        .with_check(None)
        .into_vec()
        .map_err(|e| CodecError::Base58(format!("{} '{}': {}", kind, value, e)))?;
    let payload = raw
        .strip_prefix(prefix)
        .ok_or_else(|| CodecError::UnknownPrefix {
            kind,
            value: value.to_string(),
        })?;
    if payload.len() != len {
        return Err(CodecError::InvalidLength {
            kind,
            len: payload.len(),
        });
    }
    Ok(payload.to_vec())
}

fn encode_prefixed(prefix: &[u8], payload: &[u8]) -> String {
    let mut raw = Vec::with_capacity(prefix.len() + payload.len());
    raw.extend_from_slice(prefix);
    raw.extend_from_slice(payload);
    bs58::encode(raw).with_check().into_string()
}

fn to_array<const N: usize>(bytes: Vec<u8>, kind: &'static str) -> Result<[u8; N], CodecError> {
    let len = bytes.len();
    bytes
        .try_into()
        .map_err(|_| CodecError::InvalidLength { kind, len })
}

/// Which family an address belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressKind {
    /// tz1
    Ed25519,
    /// tz2
    Secp256k1,
    /// tz3
    P256,
    /// KT1 originated contract
    Contract,
}

/// A Tezos account or contract address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address {
    kind: AddressKind,
    hash: [u8; 20],
}

impl Address {
    pub fn new(kind: AddressKind, hash: [u8; 20]) -> Self {
        Self { kind, hash }
    }

    pub fn kind(&self) -> AddressKind {
        self.kind
    }

    pub fn hash(&self) -> &[u8; 20] {
        &self.hash
    }

    /// Implicit accounts (tz1/tz2/tz3) can sign and pay fees.
    pub fn is_implicit(&self) -> bool {
        self.kind != AddressKind::Contract
    }

    fn prefix(kind: AddressKind) -> &'static [u8] {
        match kind {
            AddressKind::Ed25519 => TZ1,
            AddressKind::Secp256k1 => TZ2,
            AddressKind::P256 => TZ3,
            AddressKind::Contract => KT1,
        }
    }
}

impl FromStr for Address {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let kind = match s.get(..3) {
            Some("tz1") => AddressKind::Ed25519,
            Some("tz2") => AddressKind::Secp256k1,
            Some("tz3") => AddressKind::P256,
            Some("KT1") => AddressKind::Contract,
            _ => {
                return Err(CodecError::UnknownPrefix {
                    kind: "address",
                    value: s.to_string(),
                })
            }
        };
        let hash = decode_prefixed("address", s, Address::prefix(kind), 20)?;
        Ok(Self {
            kind,
            hash: to_array(hash, "address")?,
        })
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&encode_prefixed(Address::prefix(self.kind), &self.hash))
    }
}

impl TryFrom<String> for Address {
    type Error = CodecError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Address> for String {
    fn from(value: Address) -> Self {
        value.to_string()
    }
}

macro_rules! hash_type {
    ($(#[$meta:meta])* $name:ident, $prefix:expr, $kind:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name([u8; 32]);

        impl $name {
            pub fn from_bytes(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }

            pub fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }
        }

        impl FromStr for $name {
            type Err = CodecError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let bytes = decode_prefixed($kind, s, $prefix, 32)?;
                Ok(Self(to_array(bytes, $kind)?))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&encode_prefixed($prefix, &self.0))
            }
        }

        impl TryFrom<String> for $name {
            type Error = CodecError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.parse()
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.to_string()
            }
        }
    };
}

hash_type!(
    /// Block hash (`B...`).
    BlockHash,
    BLOCK_HASH,
    "block hash"
);

hash_type!(
    /// Operation hash (`o...`).
    OpHash,
    OPERATION_HASH,
    "operation hash"
);

/// Signature curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Curve {
    Ed25519,
    Secp256k1,
    P256,
}

impl Curve {
    /// Binary tag used in forged public keys and implicit addresses.
    pub fn tag(self) -> u8 {
        match self {
            Curve::Ed25519 => 0,
            Curve::Secp256k1 => 1,
            Curve::P256 => 2,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Curve::Ed25519),
            1 => Some(Curve::Secp256k1),
            2 => Some(Curve::P256),
            _ => None,
        }
    }

    fn public_key_prefix(self) -> &'static [u8] {
        match self {
            Curve::Ed25519 => ED25519_PUBLIC_KEY,
            Curve::Secp256k1 => SECP256K1_PUBLIC_KEY,
            Curve::P256 => P256_PUBLIC_KEY,
        }
    }

    pub fn public_key_len(self) -> usize {
        match self {
            Curve::Ed25519 => 32,
            Curve::Secp256k1 | Curve::P256 => 33,
        }
    }
}

/// A manager public key (`edpk`, `sppk`, `p2pk`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PublicKey {
    curve: Curve,
    bytes: Vec<u8>,
}

impl PublicKey {
    pub fn new(curve: Curve, bytes: Vec<u8>) -> Result<Self, CodecError> {
        if bytes.len() != curve.public_key_len() {
            return Err(CodecError::InvalidLength {
                kind: "public key",
                len: bytes.len(),
            });
        }
        Ok(Self { curve, bytes })
    }

    pub fn curve(&self) -> Curve {
        self.curve
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl FromStr for PublicKey {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let curve = match s.get(..4) {
            Some("edpk") => Curve::Ed25519,
            Some("sppk") => Curve::Secp256k1,
            Some("p2pk") => Curve::P256,
            _ => {
                return Err(CodecError::UnknownPrefix {
                    kind: "public key",
                    value: s.to_string(),
                })
            }
        };
        let bytes = decode_prefixed(
            "public key",
            s,
            curve.public_key_prefix(),
            curve.public_key_len(),
        )?;
        Ok(Self { curve, bytes })
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&encode_prefixed(self.curve.public_key_prefix(), &self.bytes))
    }
}

impl TryFrom<String> for PublicKey {
    type Error = CodecError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PublicKey> for String {
    fn from(value: PublicKey) -> Self {
        value.to_string()
    }
}

/// A 64-byte operation signature in any of the chain's encodings.
#[derive(Clone, PartialEq, Eq)]
pub struct Signature {
    prefix: &'static [u8],
    bytes: [u8; 64],
}

impl Signature {
    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.bytes
    }
}

impl FromStr for Signature {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let prefix = if s.starts_with("edsig") {
            ED25519_SIGNATURE
        } else if s.starts_with("spsig1") {
            SECP256K1_SIGNATURE
        } else if s.starts_with("p2sig") {
            P256_SIGNATURE
        } else if s.starts_with("sig") {
            GENERIC_SIGNATURE
        } else {
            return Err(CodecError::UnknownPrefix {
                kind: "signature",
                value: s.to_string(),
            });
        };
        let bytes = decode_prefixed("signature", s, prefix, 64)?;
        Ok(Self {
            prefix,
            bytes: to_array(bytes, "signature")?,
        })
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&encode_prefixed(self.prefix, &self.bytes))
    }
}

// Signatures are never logged in full.
impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signature")
            .field("len", &self.bytes.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FROM: &str = "tz1Y6GnVhC4EpcDDSmD3ibcC4WX6DJ4Q1QLN";
    const TO: &str = "KT1D254HTPKq5GZNVcF73XBinG9BLybHqu8s";

    #[test]
    fn test_parse_implicit_address() {
        let addr: Address = FROM.parse().unwrap();
        assert_eq!(addr.kind(), AddressKind::Ed25519);
        assert!(addr.is_implicit());
        assert_eq!(hex::encode(addr.hash()), "889816a17ae688c971be1ad34bfe1990f8fa5e0f");
        assert_eq!(addr.to_string(), FROM);
    }

    #[test]
    fn test_parse_contract_address() {
        let addr: Address = TO.parse().unwrap();
        assert_eq!(addr.kind(), AddressKind::Contract);
        assert!(!addr.is_implicit());
        assert_eq!(hex::encode(addr.hash()), "30a980e6e41028da2cacfca4ddefea252d18bed9");
    }

    #[test]
    fn test_invalid_addresses() {
        assert!(matches!(
            "wrong".parse::<Address>(),
            Err(CodecError::UnknownPrefix { .. })
        ));
        assert!("".parse::<Address>().is_err());
        // Last character altered: checksum no longer matches.
        assert!(matches!(
            "tz1Y6GnVhC4EpcDDSmD3ibcC4WX6DJ4Q1QLM".parse::<Address>(),
            Err(CodecError::Base58(_))
        ));
    }

    #[test]
    fn test_hashes() {
        let block: BlockHash = "BMBeYrMJpLWrqCs7UTcFaUQCeWBqsjCLejX5D8zE8m9syHqHnZg"
            .parse()
            .unwrap();
        assert_eq!(
            hex::encode(block.as_bytes()),
            "c1d55a7f9cc73a148d99d3a8cf2ff6ae93294959245e82ff7f35d3cfbd5f732e"
        );

        let op: OpHash = "oovD5cUigLGLT6kGDqsLMyF2sc3MLyfYhJWRymCPxUKEx3vtQ5v"
            .parse()
            .unwrap();
        assert_eq!(op.to_string(), "oovD5cUigLGLT6kGDqsLMyF2sc3MLyfYhJWRymCPxUKEx3vtQ5v");

        // An operation hash is not a block hash.
        assert!("oovD5cUigLGLT6kGDqsLMyF2sc3MLyfYhJWRymCPxUKEx3vtQ5v"
            .parse::<BlockHash>()
            .is_err());
    }

    #[test]
    fn test_hash_from_bytes_roundtrips_through_string() {
        let hash = BlockHash::from_bytes([7u8; 32]);
        assert!(hash.to_string().starts_with('B'));
        assert_eq!(hash.to_string().parse::<BlockHash>().unwrap(), hash);
    }

    #[test]
    fn test_public_key() {
        let key: PublicKey = "edpkv89Jj4aVWetK69CWm5ss1LayvK8dQoiFz7p995y1k3E8CZwqJ6"
            .parse()
            .unwrap();
        assert_eq!(key.curve(), Curve::Ed25519);
        assert_eq!(key.as_bytes().len(), 32);
    }

    #[test]
    fn test_signature() {
        let sig: Signature = "sigWetzF5zVM2qdYt8QToj7e5cNBm9neiPRc3rpePBDrr8N1brFbErv2YfXMSoSgemJ8AwZcLfmkBDg78bmUEzF1sf1YotnS"
            .parse()
            .unwrap();
        assert_eq!(&sig.as_bytes()[..4], &[0x42, 0x3c, 0x6b, 0x34]);
        assert!(!format!("{:?}", sig).contains("sigWetz"));

        assert!("notasignature".parse::<Signature>().is_err());
    }

    #[test]
    fn test_serde_as_strings() {
        let addr: Address = FROM.parse().unwrap();
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, format!("\"{}\"", FROM));

        let back: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(back, addr);

        assert!(serde_json::from_str::<Address>("\"wrong\"").is_err());
    }
}
