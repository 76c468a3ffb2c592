use opsig::op_id::{OpIdentifier, MS_DOMAIN};
use opsig::signature::{
    ArgPosition, ArgType, FormalParameter, MergePolicy, OpSchema, ResolveError,
    TypeConstraintGroups, TypeSignatureTable,
};

fn transpose_groups() -> TypeConstraintGroups {
    TypeConstraintGroups::new()
        .with_group("T", [ArgPosition::input(0), ArgPosition::output(0)])
        .unwrap()
}

fn table_with(entries: &[(OpIdentifier, TypeConstraintGroups)]) -> TypeSignatureTable {
    let mut table = TypeSignatureTable::new();
    for (id, groups) in entries {
        table.insert(id.clone(), groups.clone());
    }
    table
}

#[test]
fn resolve_returns_groups_or_not_found() {
    let id = OpIdentifier::onnx("Transpose", 13);
    let table = table_with(&[(id.clone(), transpose_groups())]);

    let groups = table.resolve(&id).unwrap();
    assert_eq!(
        groups.get("T"),
        Some(&[ArgPosition::input(0), ArgPosition::output(0)][..])
    );

    let missing = OpIdentifier::onnx("Transpose", 21);
    assert_eq!(
        table.resolve(&missing).unwrap_err(),
        ResolveError::OpNotFound(missing.clone())
    );
    assert!(matches!(
        table.resolve_type_str(&id, "T1"),
        Err(ResolveError::TypeStrNotFound { .. })
    ));
}

#[test]
fn position_belongs_to_one_group() {
    let err = TypeConstraintGroups::new()
        .with_group("T", [ArgPosition::input(0)])
        .and_then(|groups| groups.with_group("T1", [ArgPosition::input(0)]))
        .unwrap_err();
    assert_eq!(err.existing, "T");
    assert_eq!(err.position, ArgPosition::input(0));

    // Input 0 and output 0 are distinct slots.
    assert!(TypeConstraintGroups::new()
        .with_group("T", [ArgPosition::input(0)])
        .and_then(|groups| groups.with_group("T1", [ArgPosition::output(0)]))
        .is_ok());
}

#[test]
fn variadic_position_claims_every_later_argument() {
    let mut groups = TypeConstraintGroups::new();
    groups.add_position("T", ArgPosition::variadic_input(0)).unwrap();
    let err = groups.add_position("U", ArgPosition::input(2)).unwrap_err();
    assert_eq!(err.existing, "T");
    assert_eq!(groups.group_of(ArgPosition::input(5)), Some("T"));

    // Overlap is checked in both directions.
    let mut groups = TypeConstraintGroups::new();
    groups.add_position("U", ArgPosition::input(2)).unwrap();
    assert!(groups.add_position("T", ArgPosition::variadic_input(1)).is_err());
    assert!(groups.add_position("T", ArgPosition::variadic_input(3)).is_ok());
    assert!(groups.add_position("V", ArgPosition::variadic_output(0)).is_ok());
    assert_eq!(groups.group_of(ArgPosition::input(1)), None);
}

#[test]
fn merge_with_empty_is_identity() {
    let original = table_with(&[
        (OpIdentifier::onnx("Transpose", 13), transpose_groups()),
        (OpIdentifier::new(MS_DOMAIN, "NhwcMaxPool", 1), transpose_groups()),
    ]);

    let mut merged = original.clone();
    assert_eq!(merged.merge(TypeSignatureTable::new()).unwrap(), 0);
    assert_eq!(merged, original);

    let mut from_empty = TypeSignatureTable::new();
    assert_eq!(from_empty.merge(original.clone()).unwrap(), 2);
    assert_eq!(from_empty, original);
}

#[test]
fn disjoint_merge_is_commutative() {
    let a = table_with(&[(OpIdentifier::onnx("Transpose", 13), transpose_groups())]);
    let b = table_with(&[(OpIdentifier::onnx("Identity", 14), transpose_groups())]);

    let mut ab = a.clone();
    ab.merge(b.clone()).unwrap();
    let mut ba = b;
    ba.merge(a).unwrap();
    assert_eq!(ab, ba);
    assert_eq!(ab.len(), 2);
}

#[test]
fn conflicting_merge_is_rejected_and_leaves_target_unchanged() {
    let id = OpIdentifier::onnx("Squeeze", 13);
    let existing = table_with(&[(id.clone(), transpose_groups())]);
    let other_groups = TypeConstraintGroups::new()
        .with_group("T", [ArgPosition::input(0), ArgPosition::output(0)])
        .and_then(|groups| groups.with_group("axes", [ArgPosition::input(1)]))
        .unwrap();
    let incoming = table_with(&[
        (id.clone(), other_groups.clone()),
        (OpIdentifier::onnx("Identity", 1), transpose_groups()),
    ]);

    let mut target = existing.clone();
    let conflict = target.merge(incoming.clone()).unwrap_err();
    assert_eq!(conflict.conflicting, vec![id.clone()]);
    assert_eq!(target, existing);
    assert!(conflict.to_string().contains(":Squeeze:13"));

    let mut keep = existing.clone();
    assert_eq!(
        keep.merge_with_policy(incoming.clone(), MergePolicy::KeepExisting)
            .unwrap(),
        1
    );
    assert_eq!(keep.get(&id), Some(&transpose_groups()));

    let mut overwrite = existing;
    assert_eq!(
        overwrite
            .merge_with_policy(incoming, MergePolicy::Overwrite)
            .unwrap(),
        2
    );
    assert_eq!(overwrite.get(&id), Some(&other_groups));
}

#[test]
fn identical_duplicates_are_not_conflicts() {
    let id = OpIdentifier::onnx("Transpose", 21);
    let mut table = table_with(&[(id.clone(), transpose_groups())]);
    let same = table_with(&[(id, transpose_groups())]);
    assert_eq!(table.merge(same).unwrap(), 0);
    assert_eq!(table.len(), 1);
}

#[test]
fn register_schema_groups_by_constraint_or_parameter_name() {
    let schema = OpSchema::new(OpIdentifier::onnx("QuantizeLinear", 13))
        .type_constraint("T1")
        .type_constraint("T2")
        .input(FormalParameter::single("x", "T1"))
        .input(FormalParameter::single("y_scale", "tensor(float)"))
        .input(FormalParameter::optional("y_zero_point", "T2"))
        .output(FormalParameter::single("y", "T2"));

    let mut table = TypeSignatureTable::new();
    assert!(table.register_op_schema(&schema).unwrap());
    let id = schema.id.clone();
    assert_eq!(
        table.resolve_type_str(&id, "T1").unwrap(),
        &[ArgPosition::input(0)]
    );
    assert_eq!(
        table.resolve_type_str(&id, "T2").unwrap(),
        &[ArgPosition::input(2), ArgPosition::output(0)]
    );
    assert_eq!(
        table.resolve_type_str(&id, "y_scale").unwrap(),
        &[ArgPosition::input(1)]
    );

    // First registration wins.
    let other = OpSchema::new(id.clone())
        .type_constraint("T")
        .input(FormalParameter::single("x", "T"));
    assert!(!table.register_op_schema(&other).unwrap());
    assert!(table.resolve_type_str(&id, "T").is_err());
}

#[test]
fn variadic_parameter_is_recorded_with_sentinel() {
    let schema = OpSchema::new(OpIdentifier::onnx("Concat", 13))
        .type_constraint("T")
        .input(FormalParameter::variadic("inputs", "T"))
        .output(FormalParameter::single("concat_result", "T"));
    let mut table = TypeSignatureTable::new();
    table.register_op_schema(&schema).unwrap();

    let positions = table.resolve_type_str(&schema.id, "T").unwrap();
    assert_eq!(
        positions,
        &[ArgPosition::variadic_input(0), ArgPosition::output(0)]
    );
    assert!(positions[0].covers(ArgType::Input, 5));
    assert_eq!(positions[0].to_string(), "input[0..]");
}

#[test]
fn debug_json_is_keyed_by_canonical_id() {
    let table = table_with(&[
        (OpIdentifier::onnx("Transpose", 13), transpose_groups()),
        (OpIdentifier::new("ai.onnx", "Identity", 1), transpose_groups()),
    ]);
    let json = table.to_debug_json();
    assert_eq!(json[":Transpose:13"]["T"][1], "output[0]");
    assert!(json.get(":Identity:1").is_some());
}
