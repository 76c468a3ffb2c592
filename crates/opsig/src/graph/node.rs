use std::collections::BTreeMap;
use std::sync::Arc;

use crate::op_id::OpIdentifier;

use super::ElementType;

/// Single tensor extent; dynamic extents carry their symbolic name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Dimension {
    Static(u64),
    Dynamic(String),
}

/// Logical tensor shape as an ordered list of dimensions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Shape {
    dims: Vec<Dimension>,
}

impl Shape {
    pub fn new(dims: impl Into<Vec<Dimension>>) -> Self {
        Self { dims: dims.into() }
    }

    pub fn from_static(dims: &[u64]) -> Self {
        Self::new(dims.iter().map(|&d| Dimension::Static(d)).collect::<Vec<_>>())
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn dims(&self) -> &[Dimension] {
        &self.dims
    }

    /// Returns static dimensions when all dims are static.
    pub fn static_dims(&self) -> Option<Vec<u64>> {
        let mut dims = Vec::with_capacity(self.dims.len());
        for dim in &self.dims {
            match dim {
                Dimension::Static(value) => dims.push(*value),
                Dimension::Dynamic(_) => return None,
            }
        }
        Some(dims)
    }

    pub fn has_dynamic_dims(&self) -> bool {
        self.dims
            .iter()
            .any(|dim| matches!(dim, Dimension::Dynamic(_)))
    }
}

/// Value flowing along a graph edge. An empty name marks an omitted optional argument.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NodeArg {
    pub name: String,
    pub element_type: Option<ElementType>,
    pub shape: Option<Shape>,
}

impl NodeArg {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            element_type: None,
            shape: None,
        }
    }

    /// Placeholder for an optional argument that was left out.
    pub fn missing() -> Self {
        Self::default()
    }

    pub fn with_type(mut self, element_type: ElementType) -> Self {
        self.element_type = Some(element_type);
        self
    }

    pub fn with_shape(mut self, shape: Shape) -> Self {
        self.shape = Some(shape);
        self
    }

    /// Convenience for a fully static, typed tensor.
    pub fn tensor(name: impl Into<String>, element_type: ElementType, dims: &[u64]) -> Self {
        Self::new(name)
            .with_type(element_type)
            .with_shape(Shape::from_static(dims))
    }

    pub fn exists(&self) -> bool {
        !self.name.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Int(i64),
    Float(f32),
    String(String),
    Ints(Vec<i64>),
    Floats(Vec<f32>),
}

/// Where an initializer's bytes live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataLocation {
    /// Stored inside the model itself.
    #[default]
    Default,
    /// Stored in a side file next to the model.
    External,
}

/// Constant tensor (weight) known at graph construction time.
#[derive(Debug, Clone, PartialEq)]
pub struct Initializer {
    pub name: String,
    pub element_type: ElementType,
    pub dims: Vec<u64>,
    pub data_location: DataLocation,
    raw: Arc<[u8]>,
}

impl Initializer {
    pub fn from_raw(
        name: impl Into<String>,
        element_type: ElementType,
        dims: Vec<u64>,
        raw: impl Into<Arc<[u8]>>,
    ) -> Self {
        Self {
            name: name.into(),
            element_type,
            dims,
            data_location: DataLocation::Default,
            raw: raw.into(),
        }
    }

    pub fn from_f32(name: impl Into<String>, dims: Vec<u64>, values: &[f32]) -> Self {
        let raw: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        Self::from_raw(name, ElementType::Float, dims, raw)
    }

    pub fn from_i64(name: impl Into<String>, dims: Vec<u64>, values: &[i64]) -> Self {
        let raw: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        Self::from_raw(name, ElementType::Int64, dims, raw)
    }

    /// Weight whose bytes are stored outside the model.
    pub fn external(name: impl Into<String>, element_type: ElementType, dims: Vec<u64>) -> Self {
        Self {
            name: name.into(),
            element_type,
            dims,
            data_location: DataLocation::External,
            raw: Arc::from(Vec::new()),
        }
    }

    pub fn is_external(&self) -> bool {
        self.data_location == DataLocation::External
    }

    pub fn raw_data(&self) -> &[u8] {
        &self.raw
    }

    /// Product of the dimensions, or `None` when it does not fit in a `u64`.
    pub fn element_count(&self) -> Option<u64> {
        self.dims.iter().try_fold(1u64, |count, &dim| count.checked_mul(dim))
    }

    /// Decodes the payload as little-endian `i64` values.
    pub fn int64_data(&self) -> Option<Vec<i64>> {
        if self.element_type != ElementType::Int64 || self.is_external() {
            return None;
        }
        if self.raw.len() % 8 != 0 {
            return None;
        }
        Some(
            self.raw
                .chunks_exact(8)
                .map(|chunk| {
                    let mut bytes = [0u8; 8];
                    bytes.copy_from_slice(chunk);
                    i64::from_le_bytes(bytes)
                })
                .collect(),
        )
    }

    /// Decodes the payload as little-endian `f32` values.
    pub fn float_data(&self) -> Option<Vec<f32>> {
        if self.element_type != ElementType::Float || self.is_external() {
            return None;
        }
        if self.raw.len() % 4 != 0 {
            return None;
        }
        Some(
            self.raw
                .chunks_exact(4)
                .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
                .collect(),
        )
    }
}

/// Position of a node within its graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeIndex(pub usize);

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub name: String,
    pub op_type: String,
    pub domain: String,
    /// Schema revision the node resolved to under the model's opset imports.
    pub since_version: u32,
    pub inputs: Vec<NodeArg>,
    pub outputs: Vec<NodeArg>,
    pub attributes: BTreeMap<String, AttributeValue>,
}

impl Node {
    pub fn new(name: impl Into<String>, op_type: impl Into<String>, since_version: u32) -> Self {
        Self {
            name: name.into(),
            op_type: op_type.into(),
            domain: String::new(),
            since_version,
            inputs: Vec::new(),
            outputs: Vec::new(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = domain.into();
        self
    }

    pub fn with_input(mut self, input: NodeArg) -> Self {
        self.inputs.push(input);
        self
    }

    pub fn with_output(mut self, output: NodeArg) -> Self {
        self.outputs.push(output);
        self
    }

    pub fn with_attr(mut self, name: impl Into<String>, value: AttributeValue) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }

    pub fn op_id(&self) -> OpIdentifier {
        OpIdentifier::new(self.domain.clone(), self.op_type.clone(), self.since_version)
    }

    /// Input at `index` when it is present (not omitted).
    pub fn input(&self, index: usize) -> Option<&NodeArg> {
        self.inputs.get(index).filter(|arg| arg.exists())
    }

    pub fn output(&self, index: usize) -> Option<&NodeArg> {
        self.outputs.get(index).filter(|arg| arg.exists())
    }

    pub fn attr_int(&self, name: &str) -> Option<i64> {
        match self.attributes.get(name) {
            Some(AttributeValue::Int(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn attr_float(&self, name: &str) -> Option<f32> {
        match self.attributes.get(name) {
            Some(AttributeValue::Float(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn attr_string(&self, name: &str) -> Option<&str> {
        match self.attributes.get(name) {
            Some(AttributeValue::String(value)) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn attr_ints(&self, name: &str) -> Option<&[i64]> {
        match self.attributes.get(name) {
            Some(AttributeValue::Ints(values)) => Some(values.as_slice()),
            _ => None,
        }
    }

    pub fn attr_int_or(&self, name: &str, default: i64) -> i64 {
        self.attr_int(name).unwrap_or(default)
    }

    /// Human-readable label used in diagnostics.
    pub fn describe(&self) -> String {
        format!("Node [{}] type [{}]", self.name, self.op_type)
    }
}
