use std::io::Read;
use std::path::Path;
use tracing::debug;

use super::{validate, Configuration};
use crate::error::ConfigError;
use crate::execs::ExecRegistry;

/// Read, parse and validate a configuration document.
pub fn load_configuration<R: Read>(
    mut reader: R,
    registry: &ExecRegistry,
) -> Result<Configuration, ConfigError> {
    let mut data = Vec::new();
    reader.read_to_end(&mut data)?;
    let mut config = parse_configuration(&data)?;
    validate(&mut config, registry)?;
    debug!(
        "Configuration loaded: {} plans ({})",
        config.plans.len(),
        config.ordered_plan_names().join(", ")
    );
    Ok(config)
}

/// Parse a configuration document without validating it.
pub fn parse_configuration(data: &[u8]) -> Result<Configuration, ConfigError> {
    if data.iter().all(u8::is_ascii_whitespace) {
        return Err(ConfigError::Empty);
    }
    Ok(serde_json::from_slice(data)?)
}

pub fn load_configuration_from_path(
    path: &Path,
    registry: &ExecRegistry,
) -> Result<Configuration, ConfigError> {
    debug!("Loading configuration from {}", path.display());
    let file = std::fs::File::open(path)?;
    load_configuration(std::io::BufReader::new(file), registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_input() {
        let registry = ExecRegistry::with_builtins();
        let err = load_configuration("".as_bytes(), &registry).unwrap_err();
        assert!(matches!(err, ConfigError::Empty));
        let err = load_configuration(" \n\t".as_bytes(), &registry).unwrap_err();
        assert!(matches!(err, ConfigError::Empty));
    }

    #[test]
    fn test_malformed_json() {
        let registry = ExecRegistry::with_builtins();
        let err = load_configuration("{plans".as_bytes(), &registry).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_overflowing_timeout_is_a_parse_error() {
        let doc = r#"{"plans": {"p": {"critical_actions": ["a"], "actions": {"a": {
            "exec_name": "sample_pass",
            "exec_timeout": {"seconds": 18446744073709551615, "nanos": 1000000000}}}}}}"#;
        let err = parse_configuration(doc.as_bytes()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_minimal_document() {
        let registry = ExecRegistry::with_builtins();
        let config = load_configuration(
            r#"{"plans": {"p": {"critical_actions": ["sample_pass"]}}}"#.as_bytes(),
            &registry,
        )
        .unwrap();
        let plan = config.plan("p").unwrap();
        assert_eq!(plan.action("sample_pass").unwrap().exec_name, "sample_pass");
    }

    #[test]
    fn test_missing_file() {
        let registry = ExecRegistry::with_builtins();
        let err =
            load_configuration_from_path(Path::new("/nonexistent/plans.json"), &registry)
                .unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
