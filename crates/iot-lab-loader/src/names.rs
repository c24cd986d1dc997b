use anyhow::Result;

use crate::BuiltinAdapter;

/// Map a user-visible builtin name to the enum used by the loader.
pub fn builtin_by_name(name: &str) -> Result<BuiltinAdapter> {
    match name.trim().to_ascii_lowercase().as_str() {
        "loopback" | "echo" => Ok(BuiltinAdapter::Loopback),
        "flaky" => Ok(BuiltinAdapter::Flaky),
        other => anyhow::bail!("Unknown builtin adapter '{other}'. Try 'loopback' or 'flaky'."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_known_names() {
        assert_eq!(builtin_by_name("loopback").unwrap(), BuiltinAdapter::Loopback);
        assert_eq!(builtin_by_name(" Flaky ").unwrap(), BuiltinAdapter::Flaky);
        let err = builtin_by_name("mqtt").unwrap_err();
        assert!(err.to_string().contains("mqtt"));
    }
}
