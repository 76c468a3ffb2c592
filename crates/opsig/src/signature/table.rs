use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use smallvec::SmallVec;
use thiserror::Error;

use crate::op_id::OpIdentifier;

use super::schema::{FormalParameterOption, OpSchema};

/// Which argument list of a node a position refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ArgType {
    Input,
    Output,
}

impl ArgType {
    pub fn tag(self) -> u8 {
        match self {
            ArgType::Input => 0,
            ArgType::Output => 1,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(ArgType::Input),
            1 => Some(ArgType::Output),
            _ => None,
        }
    }
}

/// Argument slot bound to a type parameter.
///
/// A variadic position stands for `index` and every argument after it in the same list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArgPosition {
    pub arg_type: ArgType,
    pub index: u32,
    pub variadic: bool,
}

impl ArgPosition {
    pub const fn input(index: u32) -> Self {
        Self {
            arg_type: ArgType::Input,
            index,
            variadic: false,
        }
    }

    pub const fn output(index: u32) -> Self {
        Self {
            arg_type: ArgType::Output,
            index,
            variadic: false,
        }
    }

    pub const fn variadic_input(index: u32) -> Self {
        Self {
            arg_type: ArgType::Input,
            index,
            variadic: true,
        }
    }

    pub const fn variadic_output(index: u32) -> Self {
        Self {
            arg_type: ArgType::Output,
            index,
            variadic: true,
        }
    }

    /// Whether this position binds the actual argument `index` of `arg_type`.
    pub fn covers(&self, arg_type: ArgType, index: usize) -> bool {
        if self.arg_type != arg_type {
            return false;
        }
        let own = self.index as usize;
        if self.variadic {
            index >= own
        } else {
            index == own
        }
    }

    /// Whether both positions bind at least one common argument.
    pub fn overlaps(&self, other: &ArgPosition) -> bool {
        self.covers(other.arg_type, other.index as usize)
            || other.covers(self.arg_type, self.index as usize)
    }
}

impl fmt::Display for ArgPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let list = match self.arg_type {
            ArgType::Input => "input",
            ArgType::Output => "output",
        };
        if self.variadic {
            write!(f, "{list}[{}..]", self.index)
        } else {
            write!(f, "{list}[{}]", self.index)
        }
    }
}

pub type ArgPositions = SmallVec<[ArgPosition; 4]>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("argument {position} is already bound to type parameter '{existing}'")]
pub struct PositionAlreadyBound {
    pub existing: String,
    pub position: ArgPosition,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("operator {op_id}: {source}")]
    DuplicateArgPosition {
        op_id: String,
        source: PositionAlreadyBound,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("no type signature registered for operator {0}")]
    OpNotFound(OpIdentifier),
    #[error("operator {op_id} has no type parameter '{type_str}'")]
    TypeStrNotFound {
        op_id: OpIdentifier,
        type_str: String,
    },
}

pub type ResolveResult<T> = Result<T, ResolveError>;

/// Two tables disagree on the signature of at least one operator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("type-signature merge conflict on {}", format_ids(.conflicting))]
pub struct MergeConflict {
    pub conflicting: Vec<OpIdentifier>,
}

fn format_ids(ids: &[OpIdentifier]) -> String {
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// How [`TypeSignatureTable::merge_with_policy`] treats a key present in both tables with
/// different content. Identical duplicates are never a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    /// Fail the merge and leave the receiving table untouched.
    #[default]
    Reject,
    KeepExisting,
    Overwrite,
}

/// Type-parameter name to the argument positions that must share that type.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TypeConstraintGroups {
    groups: BTreeMap<String, ArgPositions>,
}

impl TypeConstraintGroups {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `position` to `type_str`, enforcing that every slot belongs to a single group.
    pub fn add_position(
        &mut self,
        type_str: &str,
        position: ArgPosition,
    ) -> Result<(), PositionAlreadyBound> {
        if let Some(existing) = self.group_of(position) {
            return Err(PositionAlreadyBound {
                existing: existing.to_string(),
                position,
            });
        }
        self.groups
            .entry(type_str.to_string())
            .or_default()
            .push(position);
        Ok(())
    }

    /// Builder-style variant of [`add_position`](Self::add_position) for literal tables.
    pub fn with_group(
        mut self,
        type_str: &str,
        positions: impl IntoIterator<Item = ArgPosition>,
    ) -> Result<Self, PositionAlreadyBound> {
        for position in positions {
            self.add_position(type_str, position)?;
        }
        Ok(self)
    }

    /// Name of the group already binding an argument that `position` would bind, if any.
    ///
    /// A variadic position overlaps every later position of the same list.
    pub fn group_of(&self, position: ArgPosition) -> Option<&str> {
        self.groups.iter().find_map(|(name, positions)| {
            positions
                .iter()
                .any(|p| p.overlaps(&position))
                .then_some(name.as_str())
        })
    }

    pub fn get(&self, type_str: &str) -> Option<&[ArgPosition]> {
        self.groups.get(type_str).map(|positions| positions.as_slice())
    }

    /// Groups ordered by type-parameter name.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[ArgPosition])> {
        self.groups
            .iter()
            .map(|(name, positions)| (name.as_str(), positions.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

/// Mapping from operator identifier to the type-constraint groups its kernels expose.
///
/// Populated during session initialization (decoded from model metadata, registered from
/// schemas, merged with the bootstrap snapshot) and read-only afterwards; share it behind an
/// `Arc` once populated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypeSignatureTable {
    entries: HashMap<OpIdentifier, TypeConstraintGroups>,
}

impl TypeSignatureTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: &OpIdentifier) -> bool {
        self.entries.contains_key(id)
    }

    pub fn get(&self, id: &OpIdentifier) -> Option<&TypeConstraintGroups> {
        self.entries.get(id)
    }

    pub fn resolve(&self, id: &OpIdentifier) -> ResolveResult<&TypeConstraintGroups> {
        self.entries
            .get(id)
            .ok_or_else(|| ResolveError::OpNotFound(id.clone()))
    }

    /// Argument positions bound to `type_str` on operator `id`.
    pub fn resolve_type_str(
        &self,
        id: &OpIdentifier,
        type_str: &str,
    ) -> ResolveResult<&[ArgPosition]> {
        self.resolve(id)?
            .get(type_str)
            .ok_or_else(|| ResolveError::TypeStrNotFound {
                op_id: id.clone(),
                type_str: type_str.to_string(),
            })
    }

    /// Inserts or replaces the groups of one operator, returning the previous value.
    pub fn insert(
        &mut self,
        id: OpIdentifier,
        groups: TypeConstraintGroups,
    ) -> Option<TypeConstraintGroups> {
        self.entries.insert(id, groups)
    }

    /// Derives and records the groups of `schema`. Returns `false` when the identifier was
    /// already present, in which case the table is left as is.
    pub fn register_op_schema(&mut self, schema: &OpSchema) -> Result<bool, SignatureError> {
        if self.entries.contains_key(&schema.id) {
            return Ok(false);
        }

        let mut groups = TypeConstraintGroups::new();
        let lists = [
            (ArgType::Input, &schema.inputs),
            (ArgType::Output, &schema.outputs),
        ];
        for (arg_type, params) in lists {
            for (index, param) in params.iter().enumerate() {
                let position = ArgPosition {
                    arg_type,
                    index: index as u32,
                    variadic: param.option == FormalParameterOption::Variadic,
                };
                groups
                    .add_position(schema.group_key(param), position)
                    .map_err(|source| SignatureError::DuplicateArgPosition {
                        op_id: schema.id.to_string(),
                        source,
                    })?;
            }
        }

        tracing::trace!(op_id = %schema.id, groups = groups.len(), "registered operator schema");
        self.entries.insert(schema.id.clone(), groups);
        Ok(true)
    }

    /// Merges `other` into this table, rejecting conflicting duplicates.
    pub fn merge(&mut self, other: TypeSignatureTable) -> Result<usize, MergeConflict> {
        self.merge_with_policy(other, MergePolicy::Reject)
    }

    /// Merges `other` into this table and returns the number of identifiers added or replaced.
    pub fn merge_with_policy(
        &mut self,
        other: TypeSignatureTable,
        policy: MergePolicy,
    ) -> Result<usize, MergeConflict> {
        let mut conflicting: Vec<OpIdentifier> = other
            .entries
            .iter()
            .filter(|(id, groups)| self.entries.get(*id).is_some_and(|existing| existing != *groups))
            .map(|(id, _)| id.clone())
            .collect();

        if policy == MergePolicy::Reject && !conflicting.is_empty() {
            conflicting.sort_by_key(|id| id.to_string());
            return Err(MergeConflict { conflicting });
        }
        if !conflicting.is_empty() {
            tracing::warn!(
                conflicts = conflicting.len(),
                ?policy,
                "resolving type-signature merge conflicts by policy"
            );
        }

        let mut changed = 0usize;
        for (id, groups) in other.entries {
            match self.entries.get(&id) {
                None => {
                    self.entries.insert(id, groups);
                    changed += 1;
                }
                Some(existing) if *existing == groups => {}
                Some(_) => {
                    if policy == MergePolicy::Overwrite {
                        self.entries.insert(id, groups);
                        changed += 1;
                    }
                }
            }
        }
        Ok(changed)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&OpIdentifier, &TypeConstraintGroups)> {
        self.entries.iter()
    }

    pub fn identifiers(&self) -> impl Iterator<Item = &OpIdentifier> {
        self.entries.keys()
    }

    /// Entries ordered by canonical key string, the order used for serialization.
    pub fn sorted_entries(&self) -> Vec<(String, &OpIdentifier, &TypeConstraintGroups)> {
        let mut entries: Vec<_> = self
            .entries
            .iter()
            .map(|(id, groups)| (id.to_string(), id, groups))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    /// JSON rendering keyed by canonical identifier, for logs and inspection.
    pub fn to_debug_json(&self) -> Value {
        let mut root = serde_json::Map::new();
        for (key, _, groups) in self.sorted_entries() {
            let mut group_map = serde_json::Map::new();
            for (type_str, positions) in groups.iter() {
                let positions: Vec<Value> = positions
                    .iter()
                    .map(|p| Value::String(p.to_string()))
                    .collect();
                group_map.insert(type_str.to_string(), Value::Array(positions));
            }
            root.insert(key, Value::Object(group_map));
        }
        json!(root)
    }
}
