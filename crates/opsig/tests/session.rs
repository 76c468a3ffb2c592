use std::sync::Arc;
use std::thread;

use anyhow::Result;
use opsig::op_id::OpIdentifier;
use opsig::session::{initialize_signature_table, SessionError, SessionOptions};
use opsig::signature::{
    required_operators_for_layout_rewrite, save_to_buffer, ArgPosition, BootstrapError,
    MergePolicy, TypeConstraintGroups, TypeSignatureTable,
};

fn model_table() -> Result<TypeSignatureTable> {
    let mut table = TypeSignatureTable::new();
    table.insert(
        OpIdentifier::onnx("Conv", 11),
        TypeConstraintGroups::new().with_group(
            "T",
            [
                ArgPosition::input(0),
                ArgPosition::input(1),
                ArgPosition::input(2),
                ArgPosition::output(0),
            ],
        )?,
    );
    Ok(table)
}

#[test]
fn options_default_and_json() -> Result<()> {
    let defaults = SessionOptions::default();
    assert!(defaults.run_layout_rewrite);
    assert_eq!(defaults.merge_policy, MergePolicy::Reject);

    let parsed = SessionOptions::from_json_str(r#"{"merge_policy": "keep_existing"}"#)?;
    assert!(parsed.run_layout_rewrite);
    assert_eq!(parsed.merge_policy, MergePolicy::KeepExisting);

    assert!(matches!(
        SessionOptions::from_json_str(r#"{"merge_policy": "coin_flip"}"#),
        Err(SessionError::Options(_))
    ));
    Ok(())
}

#[test]
fn model_metadata_without_layout_rewrite() -> Result<()> {
    let bytes = save_to_buffer(&model_table()?)?;
    let options = SessionOptions {
        run_layout_rewrite: false,
        ..SessionOptions::default()
    };
    let table = initialize_signature_table(Some(bytes.as_slice()), &options)?;
    assert_eq!(table.as_ref(), &model_table()?);
    Ok(())
}

#[test]
fn layout_rewrite_extends_model_table() -> Result<()> {
    let bytes = save_to_buffer(&model_table()?)?;
    let table = initialize_signature_table(Some(bytes.as_slice()), &SessionOptions::default())?;
    assert_eq!(table.len(), 1 + required_operators_for_layout_rewrite().len());
    assert!(table.contains(&OpIdentifier::onnx("Transpose", 21)));
    assert!(table.contains(&OpIdentifier::onnx("Conv", 11)));
    Ok(())
}

#[test]
fn empty_start_without_metadata() -> Result<()> {
    let table = initialize_signature_table(None, &SessionOptions::default())?;
    assert_eq!(table.len(), required_operators_for_layout_rewrite().len());
    Ok(())
}

#[test]
fn corrupt_metadata_aborts_initialization() -> Result<()> {
    let mut bytes = save_to_buffer(&model_table()?)?;
    let last = bytes.len() - 1;
    bytes[last] ^= 0x5a;
    assert!(matches!(
        initialize_signature_table(Some(bytes.as_slice()), &SessionOptions::default()),
        Err(SessionError::ModelMetadata(_))
    ));
    Ok(())
}

#[test]
fn conflicting_metadata_is_rejected_under_default_policy() -> Result<()> {
    let mut conflicting = TypeSignatureTable::new();
    conflicting.insert(
        OpIdentifier::onnx("Squeeze", 13),
        TypeConstraintGroups::new().with_group("T", [ArgPosition::input(0)])?,
    );
    let bytes = save_to_buffer(&conflicting)?;

    let err = initialize_signature_table(Some(bytes.as_slice()), &SessionOptions::default())
        .unwrap_err();
    assert!(matches!(err, SessionError::Bootstrap(BootstrapError::Merge(_))));

    let overwrite = SessionOptions {
        merge_policy: MergePolicy::Overwrite,
        ..SessionOptions::default()
    };
    let table = initialize_signature_table(Some(bytes.as_slice()), &overwrite)?;
    assert_eq!(
        table.resolve_type_str(&OpIdentifier::onnx("Squeeze", 13), "axes")?,
        &[ArgPosition::input(1)]
    );
    Ok(())
}

#[test]
fn frozen_table_is_shared_across_threads() -> Result<()> {
    let table = initialize_signature_table(None, &SessionOptions::default())?;
    let handles: Vec<_> = required_operators_for_layout_rewrite()
        .iter()
        .map(|id| {
            let table = Arc::clone(&table);
            let id = id.to_owned_id();
            thread::spawn(move || table.resolve(&id).is_ok())
        })
        .collect();
    for handle in handles {
        assert!(handle.join().map_err(|_| anyhow::anyhow!("reader panicked"))?);
    }
    Ok(())
}
