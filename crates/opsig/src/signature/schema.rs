use crate::op_id::OpIdentifier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FormalParameterOption {
    #[default]
    Single,
    Optional,
    /// Matches this position and every argument after it.
    Variadic,
}

/// One declared input or output of an operator schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormalParameter {
    pub name: String,
    /// Either the name of a type constraint declared on the schema or a concrete type such as
    /// `tensor(float)`.
    pub type_str: String,
    pub option: FormalParameterOption,
}

impl FormalParameter {
    pub fn single(name: impl Into<String>, type_str: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_str: type_str.into(),
            option: FormalParameterOption::Single,
        }
    }

    pub fn optional(name: impl Into<String>, type_str: impl Into<String>) -> Self {
        Self {
            option: FormalParameterOption::Optional,
            ..Self::single(name, type_str)
        }
    }

    pub fn variadic(name: impl Into<String>, type_str: impl Into<String>) -> Self {
        Self {
            option: FormalParameterOption::Variadic,
            ..Self::single(name, type_str)
        }
    }
}

/// The subset of an operator schema needed to derive its type-constraint groups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpSchema {
    pub id: OpIdentifier,
    /// Names of the generic type parameters declared by the schema (`T`, `T1`, `Tind`, ...).
    pub type_constraints: Vec<String>,
    pub inputs: Vec<FormalParameter>,
    pub outputs: Vec<FormalParameter>,
}

impl OpSchema {
    pub fn new(id: OpIdentifier) -> Self {
        Self {
            id,
            type_constraints: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub fn type_constraint(mut self, name: impl Into<String>) -> Self {
        self.type_constraints.push(name.into());
        self
    }

    pub fn input(mut self, param: FormalParameter) -> Self {
        self.inputs.push(param);
        self
    }

    pub fn output(mut self, param: FormalParameter) -> Self {
        self.outputs.push(param);
        self
    }

    /// Key under which a formal parameter's position is grouped: the constraint name when the
    /// parameter is generic, otherwise the parameter's own name.
    pub fn group_key<'a>(&self, param: &'a FormalParameter) -> &'a str {
        if self
            .type_constraints
            .iter()
            .any(|constraint| constraint == &param.type_str)
        {
            &param.type_str
        } else {
            &param.name
        }
    }
}
