//! Versioned operator identifiers.
//!
//! An [`OpIdentifier`] names one schema revision of an operator: the domain it lives in, the
//! operator type, and the opset version in which that revision was introduced. The canonical
//! string form `"<domain>:<op_type>:<since_version>"` doubles as the serialized key of the
//! type-signature table and as the form printed in diagnostics.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Default operator namespace. Rendered as an empty string in canonical keys.
pub const ONNX_DOMAIN: &str = "";
/// Alternative spelling of the default namespace accepted on input.
pub const ONNX_DOMAIN_ALIAS: &str = "ai.onnx";
/// Contributed operators shipped with the runtime.
pub const MS_DOMAIN: &str = "com.microsoft";
/// Internal domain the layout rewrite moves channels-last operators into.
pub const MS_INTERNAL_NHWC_DOMAIN: &str = "com.ms.internal.nhwc";

/// Maps the alias of the default domain onto its canonical empty spelling.
pub fn normalize_domain(domain: &str) -> &str {
    if domain == ONNX_DOMAIN_ALIAS {
        ONNX_DOMAIN
    } else {
        domain
    }
}

/// Identifier of a versioned operator schema.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OpIdentifier {
    domain: String,
    op_type: String,
    since_version: u32,
}

impl OpIdentifier {
    pub fn new(domain: impl Into<String>, op_type: impl Into<String>, since_version: u32) -> Self {
        let domain = domain.into();
        let domain = if domain == ONNX_DOMAIN_ALIAS {
            String::new()
        } else {
            domain
        };
        Self {
            domain,
            op_type: op_type.into(),
            since_version,
        }
    }

    /// Shorthand for an operator in the default domain.
    pub fn onnx(op_type: impl Into<String>, since_version: u32) -> Self {
        Self::new(ONNX_DOMAIN, op_type, since_version)
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn op_type(&self) -> &str {
        &self.op_type
    }

    pub fn since_version(&self) -> u32 {
        self.since_version
    }

    /// Returns the canonical `"<domain>:<op_type>:<since_version>"` key.
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for OpIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.domain, self.op_type, self.since_version)
    }
}

/// Borrowed identifier literal, used for compile-time operator lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OpIdentifierRef {
    pub domain: &'static str,
    pub op_type: &'static str,
    pub since_version: u32,
}

impl OpIdentifierRef {
    pub const fn new(domain: &'static str, op_type: &'static str, since_version: u32) -> Self {
        Self {
            domain,
            op_type,
            since_version,
        }
    }

    pub fn to_owned_id(self) -> OpIdentifier {
        OpIdentifier::new(self.domain, self.op_type, self.since_version)
    }
}

impl From<OpIdentifierRef> for OpIdentifier {
    fn from(id: OpIdentifierRef) -> Self {
        id.to_owned_id()
    }
}

impl fmt::Display for OpIdentifierRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.domain, self.op_type, self.since_version)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OpIdParseError {
    #[error("operator id '{0}' must have the form '<domain>:<op_type>:<since_version>'")]
    Malformed(String),
    #[error("operator id '{0}' has an empty operator type")]
    EmptyOpType(String),
    #[error("operator id '{input}' has an invalid since-version '{version}'")]
    InvalidVersion { input: String, version: String },
}

impl FromStr for OpIdentifier {
    type Err = OpIdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Domains may contain dots but never colons, so split from the right.
        let mut parts = s.rsplitn(3, ':');
        let (Some(version), Some(op_type), Some(domain)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(OpIdParseError::Malformed(s.to_string()));
        };
        if domain.contains(':') {
            return Err(OpIdParseError::Malformed(s.to_string()));
        }
        if op_type.is_empty() {
            return Err(OpIdParseError::EmptyOpType(s.to_string()));
        }
        if version.is_empty() || !version.bytes().all(|b| b.is_ascii_digit()) {
            return Err(OpIdParseError::InvalidVersion {
                input: s.to_string(),
                version: version.to_string(),
            });
        }
        let since_version = version
            .parse::<u32>()
            .map_err(|_| OpIdParseError::InvalidVersion {
                input: s.to_string(),
                version: version.to_string(),
            })?;
        Ok(OpIdentifier::new(domain, op_type, since_version))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_form_omits_default_domain() {
        assert_eq!(OpIdentifier::onnx("Squeeze", 13).to_string(), ":Squeeze:13");
        assert_eq!(
            OpIdentifier::new(MS_DOMAIN, "QLinearConv", 1).to_string(),
            "com.microsoft:QLinearConv:1"
        );
    }

    #[test]
    fn alias_domain_is_normalized() {
        let id = OpIdentifier::new("ai.onnx", "Transpose", 21);
        assert_eq!(id, OpIdentifier::onnx("Transpose", 21));
    }

    #[test]
    fn parses_canonical_form() {
        let id: OpIdentifier = "com.ms.internal.nhwc:Conv:11".parse().unwrap();
        assert_eq!(id.domain(), MS_INTERNAL_NHWC_DOMAIN);
        assert_eq!(id.op_type(), "Conv");
        assert_eq!(id.since_version(), 11);

        let id: OpIdentifier = ":Gather:13".parse().unwrap();
        assert_eq!(id, OpIdentifier::onnx("Gather", 13));
    }

    #[test]
    fn rejects_malformed_ids() {
        assert!(matches!(
            "Gather".parse::<OpIdentifier>(),
            Err(OpIdParseError::Malformed(_))
        ));
        assert!(matches!(
            "a:b:c:1".parse::<OpIdentifier>(),
            Err(OpIdParseError::Malformed(_))
        ));
        assert!(matches!(
            "::1".parse::<OpIdentifier>(),
            Err(OpIdParseError::EmptyOpType(_))
        ));
        assert!(matches!(
            ":Gather:-1".parse::<OpIdentifier>(),
            Err(OpIdParseError::InvalidVersion { .. })
        ));
    }
}
