use anyhow::Result;
use bincode::Options;
use opsig::hashing::fnv1a_hash;
use opsig::op_id::{OpIdentifier, MS_DOMAIN};
use opsig::signature::codec::{
    encode_sections, encode_with_sections, verify_buffer, RawSection, SECTION_FLAG_REQUIRED,
    SECTION_TABLE,
};
use opsig::signature::{
    load_from_buffer, save_to_buffer, ArgPosition, TypeConstraintGroups, TypeSignatureTable,
    VerificationError, FILE_IDENTIFIER,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

fn sample_table() -> Result<TypeSignatureTable> {
    let mut table = TypeSignatureTable::new();
    table.insert(
        OpIdentifier::onnx("Gather", 13),
        TypeConstraintGroups::new()
            .with_group("T", [ArgPosition::input(0), ArgPosition::output(0)])?
            .with_group("Tind", [ArgPosition::input(1)])?,
    );
    table.insert(
        OpIdentifier::new(MS_DOMAIN, "QuantizeLinear", 1),
        TypeConstraintGroups::new()
            .with_group("T1", [ArgPosition::input(0), ArgPosition::input(1)])?
            .with_group("T2", [ArgPosition::input(2), ArgPosition::output(0)])?,
    );
    table.insert(
        OpIdentifier::onnx("Concat", 13),
        TypeConstraintGroups::new()
            .with_group("T", [ArgPosition::variadic_input(0), ArgPosition::output(0)])?,
    );
    Ok(table)
}

/// Replaces the trailing checksum so that structural checks, not the checksum, reject `bytes`.
fn reseal(bytes: &mut [u8]) {
    let body_len = bytes.len() - 8;
    let checksum = fnv1a_hash(&bytes[..body_len]);
    bytes[body_len..].copy_from_slice(&checksum.to_le_bytes());
}

/// Offset of the table section payload in a buffer written without extra sections.
const TABLE_PAYLOAD: usize = 12 + 8;

#[test]
fn round_trip_preserves_table() -> Result<()> {
    let table = sample_table()?;
    let bytes = save_to_buffer(&table)?;
    assert_eq!(&bytes[..4], FILE_IDENTIFIER);

    let decoded = load_from_buffer(&bytes)?;
    assert_eq!(decoded, table);
    Ok(())
}

#[test]
fn empty_table_round_trips() -> Result<()> {
    let bytes = save_to_buffer(&TypeSignatureTable::new())?;
    assert!(load_from_buffer(&bytes)?.is_empty());
    Ok(())
}

#[test]
fn encoding_is_deterministic() -> Result<()> {
    let table = sample_table()?;
    let first = save_to_buffer(&table)?;

    // Insertion order must not leak into the output.
    let mut reordered = TypeSignatureTable::new();
    let mut entries: Vec<_> = table.iter().map(|(id, g)| (id.clone(), g.clone())).collect();
    entries.reverse();
    for (id, groups) in entries {
        reordered.insert(id, groups);
    }
    assert_eq!(save_to_buffer(&reordered)?, first);
    Ok(())
}

#[test]
fn wrong_identifier_is_rejected_before_parsing() -> Result<()> {
    let mut bytes = save_to_buffer(&sample_table()?)?;
    bytes[..4].copy_from_slice(b"ortm");
    assert_eq!(
        load_from_buffer(&bytes).unwrap_err(),
        VerificationError::IdentifierMismatch
    );

    assert_eq!(
        load_from_buffer(b"kts").unwrap_err(),
        VerificationError::IdentifierMismatch
    );
    assert!(matches!(
        load_from_buffer(b"ktsr\x01\x00").unwrap_err(),
        VerificationError::TooShort { .. }
    ));
    Ok(())
}

#[test]
fn newer_format_version_is_rejected() -> Result<()> {
    let mut bytes = save_to_buffer(&sample_table()?)?;
    bytes[4] = 2;
    reseal(&mut bytes);
    assert_eq!(
        load_from_buffer(&bytes).unwrap_err(),
        VerificationError::UnsupportedVersion(2)
    );
    Ok(())
}

#[test]
fn every_single_byte_flip_is_rejected() -> Result<()> {
    let bytes = save_to_buffer(&sample_table()?)?;
    let mut rng = StdRng::seed_from_u64(0x6b74_7372);
    for offset in 0..bytes.len() {
        let mut corrupted = bytes.clone();
        let mask: u8 = rng.gen_range(1..=255);
        corrupted[offset] ^= mask;
        assert!(
            load_from_buffer(&corrupted).is_err(),
            "flip of {mask:#04x} at offset {offset} was accepted"
        );
    }
    Ok(())
}

#[test]
fn random_multi_byte_corruption_is_rejected() -> Result<()> {
    let bytes = save_to_buffer(&sample_table()?)?;
    let mut rng = StdRng::seed_from_u64(42);
    for _ in 0..256 {
        let mut corrupted = bytes.clone();
        let flips = rng.gen_range(2..8);
        for _ in 0..flips {
            let offset = rng.gen_range(4..corrupted.len());
            corrupted[offset] ^= rng.gen_range(1..=255u8);
        }
        if corrupted == bytes {
            continue;
        }
        assert!(load_from_buffer(&corrupted).is_err());
    }
    Ok(())
}

#[test]
fn truncation_is_rejected() -> Result<()> {
    let bytes = save_to_buffer(&sample_table()?)?;
    for len in 0..bytes.len() {
        assert!(
            load_from_buffer(&bytes[..len]).is_err(),
            "truncation to {len} bytes was accepted"
        );
    }
    Ok(())
}

#[test]
fn unknown_optional_section_is_skipped() -> Result<()> {
    let table = sample_table()?;
    let bytes = encode_with_sections(
        &table,
        &[RawSection {
            id: 42,
            flags: 0,
            payload: b"kernel hashes".to_vec(),
        }],
    )?;
    assert_eq!(load_from_buffer(&bytes)?, table);
    Ok(())
}

#[test]
fn unknown_required_section_is_rejected() -> Result<()> {
    let bytes = encode_with_sections(
        &sample_table()?,
        &[RawSection {
            id: 42,
            flags: SECTION_FLAG_REQUIRED,
            payload: vec![0; 4],
        }],
    )?;
    assert_eq!(
        load_from_buffer(&bytes).unwrap_err(),
        VerificationError::UnknownRequiredSection { id: 42 }
    );
    Ok(())
}

#[test]
fn duplicate_table_section_is_rejected() -> Result<()> {
    let table = sample_table()?;
    let single = save_to_buffer(&table)?;
    let payload_len = u32::from_le_bytes(single[16..20].try_into()?) as usize;
    let payload = single[TABLE_PAYLOAD..TABLE_PAYLOAD + payload_len].to_vec();

    let bytes = encode_with_sections(
        &table,
        &[RawSection {
            id: 1,
            flags: SECTION_FLAG_REQUIRED,
            payload,
        }],
    )?;
    assert_eq!(
        load_from_buffer(&bytes).unwrap_err(),
        VerificationError::TableSectionCount(2)
    );
    Ok(())
}

#[derive(Serialize)]
struct PayloadTable {
    entries: Vec<PayloadEntry>,
}

/// Mirrors the table section layout with raw fields, so tests can write values the encoder
/// never produces.
#[derive(Serialize)]
struct PayloadEntry {
    op_id: Vec<u8>,
    groups: Vec<(Vec<u8>, Vec<(u8, u8, u32)>)>,
}

fn entry(op_id: &str, groups: &[(&str, &[(u8, u8, u32)])]) -> PayloadEntry {
    PayloadEntry {
        op_id: op_id.as_bytes().to_vec(),
        groups: groups
            .iter()
            .map(|(type_str, args)| (type_str.as_bytes().to_vec(), args.to_vec()))
            .collect(),
    }
}

fn table_payload(entries: Vec<PayloadEntry>) -> Result<Vec<u8>> {
    Ok(bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_little_endian()
        .serialize(&PayloadTable { entries })?)
}

fn framed(payload: Vec<u8>) -> Result<Vec<u8>> {
    Ok(encode_sections(&[RawSection {
        id: SECTION_TABLE,
        flags: SECTION_FLAG_REQUIRED,
        payload,
    }])?)
}

const IDENTITY_ARGS: &[(u8, u8, u32)] = &[(0, 0, 0), (1, 0, 0)];

#[test]
fn table_section_matches_encoder_layout() -> Result<()> {
    let mut table = TypeSignatureTable::new();
    table.insert(
        OpIdentifier::onnx("Identity", 1),
        TypeConstraintGroups::new().with_group("T", [ArgPosition::input(0), ArgPosition::output(0)])?,
    );
    let bytes = framed(table_payload(vec![entry(":Identity:1", &[("T", IDENTITY_ARGS)])])?)?;
    assert_eq!(bytes, save_to_buffer(&table)?);
    Ok(())
}

#[test]
fn structural_errors_are_reported_after_valid_checksum() -> Result<()> {
    let load = |entries: Vec<PayloadEntry>| -> Result<VerificationError> {
        let bytes = framed(table_payload(entries)?)?;
        Ok(load_from_buffer(&bytes).unwrap_err())
    };

    assert!(matches!(
        load(vec![entry(":Identity:x", &[("T", IDENTITY_ARGS)])])?,
        VerificationError::InvalidOpId(_)
    ));
    assert!(matches!(
        load(vec![entry(":Identity:1", &[("T", &[(0, 0, 0), (7, 0, 0)])])])?,
        VerificationError::InvalidArgType { tag: 7, .. }
    ));
    assert!(matches!(
        load(vec![entry(":Identity:1", &[("T", &[(0, 2, 0), (1, 0, 0)])])])?,
        VerificationError::MalformedTable(_)
    ));
    assert!(matches!(
        load(vec![entry(":Identity:1", &[("T", IDENTITY_ARGS), ("T", &[])])])?,
        VerificationError::DuplicateTypeStr { .. }
    ));
    assert!(matches!(
        load(vec![entry(":Identity:1", &[("T", &[(0, 0, 0), (0, 1, 0)])])])?,
        VerificationError::DuplicateArgPosition { .. }
    ));

    let mut invalid_utf8 = entry(":Identity:1", &[("T", IDENTITY_ARGS)]);
    invalid_utf8.op_id[2] = 0xff;
    assert!(matches!(
        load(vec![invalid_utf8])?,
        VerificationError::MalformedTable(_)
    ));
    Ok(())
}

#[test]
fn variadic_position_overlapping_another_group_is_rejected() -> Result<()> {
    let bytes = framed(table_payload(vec![entry(
        ":Concat:13",
        &[("T", &[(0, 1, 0)]), ("U", &[(0, 0, 2)])],
    )])?)?;
    let err = verify_buffer(&bytes).unwrap_err();
    assert!(
        matches!(err, VerificationError::DuplicateArgPosition { .. }),
        "{err}"
    );
    Ok(())
}

#[test]
fn keys_are_deduplicated_on_canonical_identifiers() -> Result<()> {
    for alias in ["ai.onnx:Identity:1", ":Identity:01"] {
        let bytes = framed(table_payload(vec![
            entry(":Identity:1", &[("T", IDENTITY_ARGS)]),
            entry(alias, &[("T", IDENTITY_ARGS)]),
        ])?)?;
        assert_eq!(
            verify_buffer(&bytes).unwrap_err(),
            VerificationError::DuplicateOpId(":Identity:1".to_string()),
            "{alias}"
        );
    }
    Ok(())
}

#[test]
fn oversized_counts_are_rejected_without_allocation() -> Result<()> {
    let mut bytes = save_to_buffer(&sample_table()?)?;
    bytes[TABLE_PAYLOAD..TABLE_PAYLOAD + 8].copy_from_slice(&u64::MAX.to_le_bytes());
    reseal(&mut bytes);
    assert!(matches!(
        load_from_buffer(&bytes).unwrap_err(),
        VerificationError::MalformedTable(_)
    ));
    Ok(())
}

#[test]
fn trailing_bytes_in_table_section_are_rejected() -> Result<()> {
    let mut payload = table_payload(vec![entry(":Identity:1", &[("T", IDENTITY_ARGS)])])?;
    payload.extend_from_slice(&[0, 0, 0, 0]);
    assert!(matches!(
        load_from_buffer(&framed(payload)?).unwrap_err(),
        VerificationError::MalformedTable(_)
    ));
    Ok(())
}

#[test]
fn verified_buffer_reports_entry_count() -> Result<()> {
    let bytes = save_to_buffer(&sample_table()?)?;
    assert_eq!(verify_buffer(&bytes)?.entry_count(), 3);
    Ok(())
}

#[test]
fn file_round_trip() -> Result<()> {
    let table = sample_table()?;
    let path = std::env::temp_dir().join(format!("opsig-codec-{}.ktsr", std::process::id()));
    table.save_to_file(&path)?;
    let loaded = TypeSignatureTable::load_from_file(&path);
    std::fs::remove_file(&path)?;
    assert_eq!(loaded?, table);
    Ok(())
}
