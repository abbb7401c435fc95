//! Binary operation codec.
//!
//! Decodes the forged manager operations the host submits and re-forges
//! them after the pipeline has set branch, source and counters.
//!
//! ```text
//! operation   := branch(32) content+
//! content     := tag(1) manager_fields body
//! manager     := source(21) fee(z) counter(z) gas_limit(z) storage_limit(z)
//! ```
//!
//! Micheline parameter values are carried as opaque bytes.

use thiserror::Error;

use crate::tezos::types::{Address, AddressKind, BlockHash, Curve, PublicKey, Signature};

const TAG_REVEAL: u8 = 107;
const TAG_TRANSACTION: u8 = 108;
const TAG_DELEGATION: u8 = 110;

/// Watermark prepended to generic operations before signing.
pub const GENERIC_OPERATION_WATERMARK: u8 = 0x03;

const NAMED_ENTRYPOINT: u8 = 0xff;
const WELL_KNOWN_ENTRYPOINTS: [&str; 10] = [
    "default",
    "root",
    "do",
    "set_delegate",
    "remove_delegate",
    "deposit",
    "stake",
    "unstake",
    "finalize_unstake",
    "set_delegate_parameters",
];

/// Errors raised while decoding chain data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("empty operation payload")]
    Empty,

    #[error("invalid hex: {0}")]
    Hex(String),

    #[error("invalid base58: {0}")]
    Base58(String),

    #[error("unknown {kind} prefix: {value}")]
    UnknownPrefix { kind: &'static str, value: String },

    #[error("invalid {kind} length: {len}")]
    InvalidLength { kind: &'static str, len: usize },

    #[error("truncated input at offset {0}")]
    Truncated(usize),

    #[error("unsupported operation tag {0}")]
    UnsupportedTag(u8),

    #[error("invalid {kind} tag {tag}")]
    InvalidTag { kind: &'static str, tag: u8 },

    #[error("integer overflow")]
    Overflow,

    #[error("{0} trailing bytes")]
    TrailingBytes(usize),

    #[error("operation has no contents")]
    NoContents,

    #[error("{0} is not an implicit account")]
    NotImplicit(String),
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if self.remaining() < n {
            return Err(CodecError::Truncated(self.pos));
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u32_be(&mut self) -> Result<u32, CodecError> {
        Ok(u32::from_be_bytes(self.array::<4>()?))
    }

    fn zarith(&mut self) -> Result<u64, CodecError> {
        let mut value = 0u64;
        let mut shift = 0u32;
        loop {
            let byte = self.u8()?;
            let bits = u64::from(byte & 0x7f);
            if shift > 63 || (shift == 63 && bits > 1) {
                return Err(CodecError::Overflow);
            }
            value |= bits << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
        }
    }

    fn bool(&mut self, kind: &'static str) -> Result<bool, CodecError> {
        match self.u8()? {
            0x00 => Ok(false),
            0xff => Ok(true),
            tag => Err(CodecError::InvalidTag { kind, tag }),
        }
    }

    fn implicit(&mut self) -> Result<Address, CodecError> {
        let tag = self.u8()?;
        let kind = match Curve::from_tag(tag) {
            Some(Curve::Ed25519) => AddressKind::Ed25519,
            Some(Curve::Secp256k1) => AddressKind::Secp256k1,
            Some(Curve::P256) => AddressKind::P256,
            None => {
                return Err(CodecError::InvalidTag {
                    kind: "implicit address",
                    tag,
                })
            }
        };
        Ok(Address::new(kind, self.array()?))
    }

    fn contract(&mut self) -> Result<Address, CodecError> {
        match self.u8()? {
            0x00 => self.implicit(),
            0x01 => {
                let hash = self.array()?;
                let padding = self.u8()?;
                if padding != 0 {
                    return Err(CodecError::InvalidTag {
                        kind: "contract padding",
                        tag: padding,
                    });
                }
                Ok(Address::new(AddressKind::Contract, hash))
            }
            tag => Err(CodecError::InvalidTag {
                kind: "contract",
                tag,
            }),
        }
    }

    fn public_key(&mut self) -> Result<PublicKey, CodecError> {
        let tag = self.u8()?;
        let curve = Curve::from_tag(tag).ok_or(CodecError::InvalidTag {
            kind: "public key",
            tag,
        })?;
        let bytes = self.take(curve.public_key_len())?.to_vec();
        PublicKey::new(curve, bytes)
    }

    fn entrypoint(&mut self) -> Result<String, CodecError> {
        match self.u8()? {
            NAMED_ENTRYPOINT => {
                let len = usize::from(self.u8()?);
                let name = self.take(len)?;
                String::from_utf8(name.to_vec()).map_err(|_| CodecError::InvalidTag {
                    kind: "entrypoint name",
                    tag: NAMED_ENTRYPOINT,
                })
            }
            tag => WELL_KNOWN_ENTRYPOINTS
                .get(usize::from(tag))
                .map(|name| name.to_string())
                .ok_or(CodecError::InvalidTag {
                    kind: "entrypoint",
                    tag,
                }),
        }
    }
}

/// Append `value` as a zarith natural.
pub fn write_zarith(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

fn implicit_tag(address: &Address) -> u8 {
    debug_assert!(address.is_implicit());
    match address.kind() {
        AddressKind::Secp256k1 => Curve::Secp256k1.tag(),
        AddressKind::P256 => Curve::P256.tag(),
        AddressKind::Ed25519 | AddressKind::Contract => Curve::Ed25519.tag(),
    }
}

fn write_implicit(out: &mut Vec<u8>, address: &Address) {
    out.push(implicit_tag(address));
    out.extend_from_slice(address.hash());
}

fn write_contract(out: &mut Vec<u8>, address: &Address) {
    if address.is_implicit() {
        out.push(0x00);
        write_implicit(out, address);
    } else {
        out.push(0x01);
        out.extend_from_slice(address.hash());
        out.push(0x00);
    }
}

/// Fields shared by every manager operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerFields {
    pub source: Address,
    pub fee: u64,
    pub counter: u64,
    pub gas_limit: u64,
    pub storage_limit: u64,
}

impl ManagerFields {
    fn decode(reader: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            source: reader.implicit()?,
            fee: reader.zarith()?,
            counter: reader.zarith()?,
            gas_limit: reader.zarith()?,
            storage_limit: reader.zarith()?,
        })
    }

    fn forge(&self, out: &mut Vec<u8>) {
        write_implicit(out, &self.source);
        write_zarith(out, self.fee);
        write_zarith(out, self.counter);
        write_zarith(out, self.gas_limit);
        write_zarith(out, self.storage_limit);
    }
}

/// Smart-contract call parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameters {
    pub entrypoint: String,
    /// Packed Micheline expression.
    pub value: Vec<u8>,
}

impl Parameters {
    fn forge(&self, out: &mut Vec<u8>) {
        match WELL_KNOWN_ENTRYPOINTS
            .iter()
            .position(|name| *name == self.entrypoint)
        {
            Some(tag) => out.push(tag as u8),
            None => {
                out.push(NAMED_ENTRYPOINT);
                out.push(self.entrypoint.len() as u8);
                out.extend_from_slice(self.entrypoint.as_bytes());
            }
        }
        out.extend_from_slice(&(self.value.len() as u32).to_be_bytes());
        out.extend_from_slice(&self.value);
    }
}

/// One operation content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Content {
    Reveal {
        manager: ManagerFields,
        public_key: PublicKey,
    },
    Transaction {
        manager: ManagerFields,
        amount: u64,
        destination: Address,
        parameters: Option<Parameters>,
    },
    Delegation {
        manager: ManagerFields,
        delegate: Option<Address>,
    },
}

impl Content {
    pub fn kind(&self) -> &'static str {
        match self {
            Content::Reveal { .. } => "reveal",
            Content::Transaction { .. } => "transaction",
            Content::Delegation { .. } => "delegation",
        }
    }

    pub fn manager(&self) -> &ManagerFields {
        match self {
            Content::Reveal { manager, .. }
            | Content::Transaction { manager, .. }
            | Content::Delegation { manager, .. } => manager,
        }
    }

    pub fn manager_mut(&mut self) -> &mut ManagerFields {
        match self {
            Content::Reveal { manager, .. }
            | Content::Transaction { manager, .. }
            | Content::Delegation { manager, .. } => manager,
        }
    }

    fn decode(reader: &mut Reader<'_>) -> Result<Self, CodecError> {
        match reader.u8()? {
            TAG_REVEAL => Ok(Content::Reveal {
                manager: ManagerFields::decode(reader)?,
                public_key: reader.public_key()?,
            }),
            TAG_TRANSACTION => {
                let manager = ManagerFields::decode(reader)?;
                let amount = reader.zarith()?;
                let destination = reader.contract()?;
                let parameters = if reader.bool("parameters")? {
                    let entrypoint = reader.entrypoint()?;
                    let len = reader.u32_be()? as usize;
                    Some(Parameters {
                        entrypoint,
                        value: reader.take(len)?.to_vec(),
                    })
                } else {
                    None
                };
                Ok(Content::Transaction {
                    manager,
                    amount,
                    destination,
                    parameters,
                })
            }
            TAG_DELEGATION => {
                let manager = ManagerFields::decode(reader)?;
                let delegate = if reader.bool("delegate")? {
                    Some(reader.implicit()?)
                } else {
                    None
                };
                Ok(Content::Delegation { manager, delegate })
            }
            tag => Err(CodecError::UnsupportedTag(tag)),
        }
    }

    fn forge(&self, out: &mut Vec<u8>) {
        match self {
            Content::Reveal {
                manager,
                public_key,
            } => {
                out.push(TAG_REVEAL);
                manager.forge(out);
                out.push(public_key.curve().tag());
                out.extend_from_slice(public_key.as_bytes());
            }
            Content::Transaction {
                manager,
                amount,
                destination,
                parameters,
            } => {
                out.push(TAG_TRANSACTION);
                manager.forge(out);
                write_zarith(out, *amount);
                write_contract(out, destination);
                match parameters {
                    Some(parameters) => {
                        out.push(0xff);
                        parameters.forge(out);
                    }
                    None => out.push(0x00),
                }
            }
            Content::Delegation { manager, delegate } => {
                out.push(TAG_DELEGATION);
                manager.forge(out);
                match delegate {
                    Some(delegate) => {
                        out.push(0xff);
                        write_implicit(out, delegate);
                    }
                    None => out.push(0x00),
                }
            }
        }
    }
}

/// An unsigned operation group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    pub branch: [u8; 32],
    pub contents: Vec<Content>,
}

impl Operation {
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.is_empty() {
            return Err(CodecError::Empty);
        }
        let mut reader = Reader::new(bytes);
        let branch = reader.array()?;
        let mut contents = Vec::new();
        while reader.remaining() > 0 {
            contents.push(Content::decode(&mut reader)?);
        }
        if contents.is_empty() {
            return Err(CodecError::NoContents);
        }
        Ok(Self { branch, contents })
    }

    pub fn decode_hex(data: &str) -> Result<Self, CodecError> {
        let data = data.trim().trim_start_matches("0x");
        if data.is_empty() {
            return Err(CodecError::Empty);
        }
        let bytes = hex::decode(data).map_err(|e| CodecError::Hex(e.to_string()))?;
        Self::decode(&bytes)
    }

    pub fn forge(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(32 + self.contents.len() * 64);
        out.extend_from_slice(&self.branch);
        for content in &self.contents {
            content.forge(&mut out);
        }
        out
    }

    /// Bytes handed to the signer.
    pub fn watermarked(&self) -> Vec<u8> {
        let mut out = vec![GENERIC_OPERATION_WATERMARK];
        out.extend(self.forge());
        out
    }

    pub fn with_branch(mut self, branch: &BlockHash) -> Self {
        self.branch = *branch.as_bytes();
        self
    }

    /// Set the source of every content. Only implicit accounts may sign.
    pub fn with_source(mut self, source: Address) -> Result<Self, CodecError> {
        if !source.is_implicit() {
            return Err(CodecError::NotImplicit(source.to_string()));
        }
        for content in &mut self.contents {
            content.manager_mut().source = source;
        }
        Ok(self)
    }

    pub fn source(&self) -> Option<&Address> {
        self.contents.first().map(|c| &c.manager().source)
    }

    pub fn has_reveal(&self) -> bool {
        self.contents
            .iter()
            .any(|c| matches!(c, Content::Reveal { .. }))
    }

    /// Insert a reveal ahead of the existing contents.
    pub fn prepend_reveal(&mut self, manager: ManagerFields, public_key: PublicKey) {
        self.contents.insert(
            0,
            Content::Reveal {
                manager,
                public_key,
            },
        );
    }

    /// Number contents sequentially starting at `first`.
    pub fn assign_counters(&mut self, first: u64) -> Result<(), CodecError> {
        for (i, content) in self.contents.iter_mut().enumerate() {
            content.manager_mut().counter =
                first.checked_add(i as u64).ok_or(CodecError::Overflow)?;
        }
        Ok(())
    }

    pub fn sign(&self, signature: &Signature) -> SignedOperation {
        let mut bytes = self.forge();
        bytes.extend_from_slice(signature.as_bytes());
        SignedOperation { bytes }
    }
}

/// A forged operation with its signature appended, ready for injection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedOperation {
    bytes: Vec<u8>,
}

impl SignedOperation {
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.bytes)
    }
}
