use std::env;
use std::sync::OnceLock;

static OPSIG_DISABLE_LAYOUT_REWRITE: OnceLock<bool> = OnceLock::new();

fn parse_bool(value: &str) -> bool {
    let normalized = value.trim().to_ascii_lowercase();
    matches!(normalized.as_str(), "1" | "true" | "yes" | "on")
}

/// `OPSIG_DISABLE_LAYOUT_REWRITE`, read once per process.
pub(crate) fn layout_rewrite_disabled() -> bool {
    *OPSIG_DISABLE_LAYOUT_REWRITE.get_or_init(|| match env::var("OPSIG_DISABLE_LAYOUT_REWRITE") {
        Ok(value) if !value.trim().is_empty() => parse_bool(&value),
        _ => false,
    })
}

#[cfg(test)]
mod tests {
    use super::parse_bool;

    #[test]
    fn parses_truthy_values() {
        for value in ["1", "true", "YES", " on "] {
            assert!(parse_bool(value), "{value}");
        }
        for value in ["0", "false", "off", "maybe"] {
            assert!(!parse_bool(value), "{value}");
        }
    }
}
