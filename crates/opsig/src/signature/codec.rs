//! Binary persistence of [`TypeSignatureTable`].
//!
//! Framing (all integers little-endian):
//!
//! ```text
//! [u8; 4]  identifier "ktsr"
//! u16      format version
//! u16      header flags (reserved)
//! u32      section count
//! sections { u16 id, u16 flags, u32 len, [u8; len] payload }
//! u64      FNV-1a checksum of every preceding byte
//! ```
//!
//! The table section payload is the bincode encoding (fixed-width integers, little-endian) of a
//! list of entries sorted by canonical key, each holding its groups sorted by type-parameter name.
//!
//! Readers skip sections they do not know unless the section is flagged required, so writers
//! can attach optional data without breaking older readers. Loading always runs the identifier
//! check, the framing checks and a full invariant walk over the decoded payload before anything
//! is materialized.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use anyhow::Context;
use bincode::Options;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::hashing::fnv1a_hash;
use crate::op_id::{OpIdParseError, OpIdentifier};

use super::table::{
    ArgPosition, ArgType, PositionAlreadyBound, TypeConstraintGroups, TypeSignatureTable,
};

/// Identifier stamped on standalone type-signature buffers.
pub const FILE_IDENTIFIER: &[u8; 4] = b"ktsr";
pub const FORMAT_VERSION: u16 = 1;

pub const SECTION_TABLE: u16 = 1;
/// Readers that do not understand a section carrying this flag must reject the buffer.
pub const SECTION_FLAG_REQUIRED: u16 = 0x0001;

const HEADER_LEN: usize = 12;
const SECTION_HEADER_LEN: usize = 8;
const CHECKSUM_LEN: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerificationError {
    #[error("buffer does not carry the 'ktsr' type-signature identifier")]
    IdentifierMismatch,
    #[error("buffer of {len} bytes is shorter than the minimum of {minimum}")]
    TooShort { len: usize, minimum: usize },
    #[error("unsupported type-signature format version {0}")]
    UnsupportedVersion(u16),
    #[error("checksum mismatch: stored {stored:#018x}, computed {computed:#018x}")]
    ChecksumMismatch { stored: u64, computed: u64 },
    #[error("truncated data at offset {offset}: need {needed} bytes, {available} available")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },
    #[error("section {id} is flagged required but is not understood by this reader")]
    UnknownRequiredSection { id: u16 },
    #[error("expected exactly one table section, found {0}")]
    TableSectionCount(usize),
    #[error("malformed table section: {0}")]
    MalformedTable(String),
    #[error("invalid operator id: {0}")]
    InvalidOpId(#[from] OpIdParseError),
    #[error("operator id {0} appears more than once")]
    DuplicateOpId(String),
    #[error("type parameter '{type_str}' appears more than once on {op_id}")]
    DuplicateTypeStr { op_id: String, type_str: String },
    #[error("{op_id}: {source}")]
    DuplicateArgPosition {
        op_id: String,
        source: PositionAlreadyBound,
    },
    #[error("invalid argument type tag {tag} on {op_id}")]
    InvalidArgType { op_id: String, tag: u8 },
    #[error("{remaining} unexpected trailing bytes at offset {offset}")]
    TrailingBytes { offset: usize, remaining: usize },
}

pub type VerificationResult<T> = Result<T, VerificationError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    #[error("{what} of {len} exceeds the u32 range of the signature format")]
    TooLarge { what: &'static str, len: usize },
    #[error("failed to encode table section: {0}")]
    TableSection(String),
}

/// Opaque section appended by writers; readers skip unknown optional sections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawSection {
    pub id: u16,
    pub flags: u16,
    pub payload: Vec<u8>,
}

#[derive(Debug, Serialize, Deserialize)]
struct TableWire {
    entries: Vec<EntryWire>,
}

#[derive(Debug, Serialize, Deserialize)]
struct EntryWire {
    op_id: String,
    groups: Vec<GroupWire>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GroupWire {
    type_str: String,
    args: Vec<ArgWire>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ArgWire {
    arg_type: u8,
    variadic: bool,
    index: u32,
}

fn table_section_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_little_endian()
        .reject_trailing_bytes()
}

/// Cheap pre-check: whether `bytes` starts with [`FILE_IDENTIFIER`].
pub fn has_file_identifier(bytes: &[u8]) -> bool {
    bytes.len() >= FILE_IDENTIFIER.len() && &bytes[..FILE_IDENTIFIER.len()] == FILE_IDENTIFIER
}

/// Serializes `table` into a standalone buffer.
pub fn save_to_buffer(table: &TypeSignatureTable) -> Result<Vec<u8>, EncodeError> {
    encode_with_sections(table, &[])
}

/// Serializes `table` followed by additional raw sections.
pub fn encode_with_sections(
    table: &TypeSignatureTable,
    extra_sections: &[RawSection],
) -> Result<Vec<u8>, EncodeError> {
    let mut sections = Vec::with_capacity(1 + extra_sections.len());
    sections.push(RawSection {
        id: SECTION_TABLE,
        flags: SECTION_FLAG_REQUIRED,
        payload: encode_table_section(table)?,
    });
    sections.extend_from_slice(extra_sections);
    encode_sections(&sections)
}

/// Frames `sections` with the identifier, version header and checksum.
///
/// No table section is added; callers that write one must include it in `sections`.
pub fn encode_sections(sections: &[RawSection]) -> Result<Vec<u8>, EncodeError> {
    let payload_len: usize = sections.iter().map(|s| SECTION_HEADER_LEN + s.payload.len()).sum();
    let mut out = Vec::with_capacity(HEADER_LEN + payload_len + CHECKSUM_LEN);
    out.extend_from_slice(FILE_IDENTIFIER);
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    write_len(&mut out, "section count", sections.len())?;

    for section in sections {
        out.extend_from_slice(&section.id.to_le_bytes());
        out.extend_from_slice(&section.flags.to_le_bytes());
        write_len(&mut out, "section length", section.payload.len())?;
        out.extend_from_slice(&section.payload);
    }

    let checksum = fnv1a_hash(&out);
    out.extend_from_slice(&checksum.to_le_bytes());
    Ok(out)
}

fn encode_table_section(table: &TypeSignatureTable) -> Result<Vec<u8>, EncodeError> {
    let entries = table
        .sorted_entries()
        .into_iter()
        .map(|(op_id, _, groups)| EntryWire {
            op_id,
            groups: groups
                .iter()
                .map(|(type_str, positions)| GroupWire {
                    type_str: type_str.to_string(),
                    args: positions
                        .iter()
                        .map(|position| ArgWire {
                            arg_type: position.arg_type.tag(),
                            variadic: position.variadic,
                            index: position.index,
                        })
                        .collect(),
                })
                .collect(),
        })
        .collect();
    table_section_options()
        .serialize(&TableWire { entries })
        .map_err(|err| EncodeError::TableSection(err.to_string()))
}

fn write_len(out: &mut Vec<u8>, what: &'static str, len: usize) -> Result<(), EncodeError> {
    let len32 = u32::try_from(len).map_err(|_| EncodeError::TooLarge { what, len })?;
    out.extend_from_slice(&len32.to_le_bytes());
    Ok(())
}

/// Buffer that passed identifier, framing and invariant verification.
///
/// Only [`verify_buffer`] constructs it, so materialization never sees unchecked data.
#[derive(Debug, Clone)]
pub struct VerifiedBuffer {
    entries: Vec<(OpIdentifier, TypeConstraintGroups)>,
}

impl VerifiedBuffer {
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }
}

/// Runs the identifier check, the framing checks and the invariant walk over `bytes`.
pub fn verify_buffer(bytes: &[u8]) -> VerificationResult<VerifiedBuffer> {
    if !has_file_identifier(bytes) {
        return Err(VerificationError::IdentifierMismatch);
    }

    let minimum = HEADER_LEN + CHECKSUM_LEN;
    if bytes.len() < minimum {
        return Err(VerificationError::TooShort {
            len: bytes.len(),
            minimum,
        });
    }

    let (body, stored) = bytes.split_at(bytes.len() - CHECKSUM_LEN);
    let mut header = FrameReader::new(body);
    header.take(FILE_IDENTIFIER.len())?;
    let version = header.u16()?;
    if version != FORMAT_VERSION {
        return Err(VerificationError::UnsupportedVersion(version));
    }
    let _flags = header.u16()?;
    let section_count = header.u32()? as usize;

    let stored = u64::from_le_bytes(stored.try_into().map_err(|_| VerificationError::TooShort {
        len: bytes.len(),
        minimum,
    })?);
    let computed = fnv1a_hash(body);
    if stored != computed {
        return Err(VerificationError::ChecksumMismatch { stored, computed });
    }

    let needed = section_count.saturating_mul(SECTION_HEADER_LEN);
    if needed > header.remaining() {
        return Err(VerificationError::Truncated {
            offset: header.pos,
            needed,
            available: header.remaining(),
        });
    }

    let mut table = None;
    let mut table_sections = 0usize;
    for _ in 0..section_count {
        let id = header.u16()?;
        let flags = header.u16()?;
        let len = header.u32()? as usize;
        let payload = header.take(len)?;
        match id {
            SECTION_TABLE => {
                table_sections += 1;
                table = Some(payload);
            }
            _ if flags & SECTION_FLAG_REQUIRED != 0 => {
                return Err(VerificationError::UnknownRequiredSection { id });
            }
            _ => {
                tracing::trace!(section = id, len, "skipping unknown optional section");
            }
        }
    }
    header.finish()?;

    let payload = match (table, table_sections) {
        (Some(payload), 1) => payload,
        _ => return Err(VerificationError::TableSectionCount(table_sections)),
    };

    let wire: TableWire = table_section_options()
        .with_limit(payload.len() as u64)
        .deserialize(payload)
        .map_err(|err| VerificationError::MalformedTable(err.to_string()))?;
    let entries = check_entries(wire)?;
    Ok(VerifiedBuffer { entries })
}

/// Checks every table invariant on the decoded entries, keyed by canonical identifier.
fn check_entries(wire: TableWire) -> VerificationResult<Vec<(OpIdentifier, TypeConstraintGroups)>> {
    let mut seen = HashSet::with_capacity(wire.entries.len());
    let mut entries = Vec::with_capacity(wire.entries.len());
    for entry in wire.entries {
        let id = entry.op_id.parse::<OpIdentifier>()?;
        if !seen.insert(id.clone()) {
            return Err(VerificationError::DuplicateOpId(id.to_string()));
        }

        let mut type_strs = HashSet::with_capacity(entry.groups.len());
        let mut groups = TypeConstraintGroups::new();
        for group in &entry.groups {
            if !type_strs.insert(group.type_str.as_str()) {
                return Err(VerificationError::DuplicateTypeStr {
                    op_id: id.to_string(),
                    type_str: group.type_str.clone(),
                });
            }
            for arg in &group.args {
                let arg_type =
                    ArgType::from_tag(arg.arg_type).ok_or_else(|| VerificationError::InvalidArgType {
                        op_id: id.to_string(),
                        tag: arg.arg_type,
                    })?;
                let position = ArgPosition {
                    arg_type,
                    index: arg.index,
                    variadic: arg.variadic,
                };
                groups
                    .add_position(&group.type_str, position)
                    .map_err(|source| VerificationError::DuplicateArgPosition {
                        op_id: id.to_string(),
                        source,
                    })?;
            }
        }
        entries.push((id, groups));
    }
    Ok(entries)
}

/// Verifies `bytes` and only then materializes the table it holds.
pub fn load_from_buffer(bytes: &[u8]) -> VerificationResult<TypeSignatureTable> {
    let verified = verify_buffer(bytes)?;
    Ok(materialize(verified))
}

/// Builds the in-memory table from an already verified buffer.
pub fn materialize(verified: VerifiedBuffer) -> TypeSignatureTable {
    let mut table = TypeSignatureTable::new();
    for (id, groups) in verified.entries {
        table.insert(id, groups);
    }
    table
}

impl TypeSignatureTable {
    pub fn save_to_buffer(&self) -> Result<Vec<u8>, EncodeError> {
        save_to_buffer(self)
    }

    pub fn load_from_buffer(bytes: &[u8]) -> VerificationResult<Self> {
        load_from_buffer(bytes)
    }

    pub fn save_to_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let path = path.as_ref();
        let bytes = self.save_to_buffer()?;
        fs::write(path, bytes)
            .with_context(|| format!("failed to write type signatures to {}", path.display()))
    }

    pub fn load_from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path)
            .with_context(|| format!("failed to read type signatures from {}", path.display()))?;
        load_from_buffer(&bytes)
            .with_context(|| format!("invalid type-signature buffer {}", path.display()))
    }
}

/// Bounds-checked little-endian reader over the framing bytes.
struct FrameReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> FrameReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, len: usize) -> VerificationResult<&'a [u8]> {
        if len > self.remaining() {
            return Err(VerificationError::Truncated {
                offset: self.pos,
                needed: len,
                available: self.remaining(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn u16(&mut self) -> VerificationResult<u16> {
        let bytes = self.take(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    fn u32(&mut self) -> VerificationResult<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn finish(&self) -> VerificationResult<()> {
        match self.remaining() {
            0 => Ok(()),
            remaining => Err(VerificationError::TrailingBytes {
                offset: self.pos,
                remaining,
            }),
        }
    }
}
