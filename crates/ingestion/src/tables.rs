//! Catalog table loading from YAML declarations.
//!
//! Two kinds of documents make up a catalog:
//!
//! - `parameters.yaml` lists the canonical parameters with their units and
//!   physical limits
//! - one document per provider maps provider identifiers at given levels to
//!   canonical parameter names
//!
//! The built-in tables are embedded at compile time. A directory with the
//! same layout can be loaded instead via [`load_tables_from_dir`].

use std::fs;
use std::path::Path;

use nwp_common::VariableKey;
use tracing::{debug, error};

use crate::config::{level_types, DEFAULT_LIMIT_THRESHOLD};
use crate::error::IngestionError;

pub(crate) const BUILTIN_PARAMETERS: &str = include_str!("../catalog/parameters.yaml");

pub(crate) const BUILTIN_PROVIDERS: &[&str] = &[
    include_str!("../catalog/providers/noaa-gfs.yaml"),
    include_str!("../catalog/providers/ecmwf-ifs.yaml"),
    include_str!("../catalog/providers/ceda-ukv.yaml"),
    include_str!("../catalog/providers/metoffice-datahub.yaml"),
];

/// A canonical parameter as declared in `parameters.yaml`.
#[derive(Debug, Clone)]
pub(crate) struct ParameterDecl {
    pub key: VariableKey,
    pub description: String,
    pub units: String,
    pub lower: f32,
    pub upper: f32,
    pub threshold: f64,
}

/// One provider rule: identifiers at a level resolving to a parameter.
#[derive(Debug, Clone)]
pub(crate) struct RuleDecl {
    pub key: VariableKey,
    pub ids: Vec<String>,
    pub level_type: u8,
    /// Accepted level values; `None` accepts any value of the level type.
    pub level_values: Option<Vec<f64>>,
    /// Native units delivered by the provider, if they differ from canonical.
    pub units: Option<String>,
}

/// All rules of one provider document.
#[derive(Debug, Clone)]
pub(crate) struct ProviderDecl {
    pub provider: String,
    pub description: String,
    pub rules: Vec<RuleDecl>,
}

fn invalid(source: &str, msg: impl std::fmt::Display) -> IngestionError {
    IngestionError::InvalidConfig(format!("{}: {}", source, msg))
}

fn parse_key(source: &str, name: &str) -> Result<VariableKey, IngestionError> {
    VariableKey::new(name).map_err(|e| invalid(source, e))
}

/// Parse the canonical parameter declarations.
pub(crate) fn parse_parameters(
    contents: &str,
    source: &str,
) -> Result<Vec<ParameterDecl>, IngestionError> {
    let yaml: serde_yaml::Value =
        serde_yaml::from_str(contents).map_err(|e| invalid(source, format!("invalid YAML: {}", e)))?;

    let parameters = yaml
        .get("parameters")
        .and_then(|p| p.as_sequence())
        .ok_or_else(|| invalid(source, "missing 'parameters' section"))?;

    let mut decls = Vec::with_capacity(parameters.len());
    for param in parameters {
        let name = param
            .get("name")
            .and_then(|n| n.as_str())
            .ok_or_else(|| invalid(source, "parameter without a name"))?;
        let key = parse_key(source, name)?;

        let units = param
            .get("units")
            .and_then(|u| u.as_str())
            .ok_or_else(|| invalid(source, format!("parameter {} has no units", name)))?
            .to_string();

        let range = param
            .get("valid_range")
            .and_then(|v| v.as_sequence())
            .filter(|v| v.len() == 2)
            .ok_or_else(|| {
                invalid(
                    source,
                    format!("parameter {} needs valid_range: [lower, upper]", name),
                )
            })?;
        let (lower, upper) = match (range[0].as_f64(), range[1].as_f64()) {
            (Some(lower), Some(upper)) if lower <= upper => (lower as f32, upper as f32),
            _ => {
                return Err(invalid(
                    source,
                    format!("parameter {} has an invalid valid_range", name),
                ))
            }
        };

        let threshold = param
            .get("threshold")
            .and_then(|t| t.as_f64())
            .unwrap_or(DEFAULT_LIMIT_THRESHOLD);

        decls.push(ParameterDecl {
            key,
            description: param
                .get("description")
                .and_then(|d| d.as_str())
                .unwrap_or_default()
                .to_string(),
            units,
            lower,
            upper,
            threshold,
        });
    }

    if decls.is_empty() {
        return Err(invalid(source, "no parameters declared"));
    }

    Ok(decls)
}

/// Parse one provider document.
pub(crate) fn parse_provider(contents: &str, source: &str) -> Result<ProviderDecl, IngestionError> {
    let yaml: serde_yaml::Value =
        serde_yaml::from_str(contents).map_err(|e| invalid(source, format!("invalid YAML: {}", e)))?;

    let provider = yaml
        .get("provider")
        .and_then(|p| p.as_str())
        .ok_or_else(|| invalid(source, "missing 'provider' name"))?
        .to_string();

    let parameters = yaml
        .get("parameters")
        .and_then(|p| p.as_sequence())
        .ok_or_else(|| invalid(source, "missing 'parameters' section"))?;

    let mut rules = Vec::new();
    for param in parameters {
        let name = param
            .get("name")
            .and_then(|n| n.as_str())
            .ok_or_else(|| invalid(source, "parameter without a name"))?;
        let key = parse_key(source, name)?;

        let ids: Vec<String> = match param.get("ids").and_then(|i| i.as_sequence()) {
            Some(ids) => ids
                .iter()
                .filter_map(|id| id.as_str().map(str::to_string))
                .collect(),
            None => Vec::new(),
        };
        if ids.is_empty() {
            return Err(invalid(source, format!("parameter {} has no ids", name)));
        }

        let units = param
            .get("units")
            .and_then(|u| u.as_str())
            .map(str::to_string);

        let levels = param
            .get("levels")
            .and_then(|l| l.as_sequence())
            .filter(|l| !l.is_empty())
            .ok_or_else(|| invalid(source, format!("parameter {} has no levels", name)))?;

        for level in levels {
            let level_type = match (
                level.get("level_code").and_then(|v| v.as_u64()),
                level.get("level").and_then(|v| v.as_str()),
            ) {
                (Some(code), _) if code <= u64::from(u8::MAX) => code as u8,
                (None, Some(level_name)) => level_types::from_name(level_name).ok_or_else(|| {
                    invalid(source, format!("unknown level '{}' for {}", level_name, name))
                })?,
                _ => {
                    return Err(invalid(
                        source,
                        format!("level of {} needs a level_code", name),
                    ))
                }
            };

            // Single value, list of values, or nothing (= any value)
            let level_values = if let Some(value) = level.get("value").and_then(|v| v.as_f64()) {
                Some(vec![value])
            } else if let Some(values) = level.get("values").and_then(|v| v.as_sequence()) {
                let values: Vec<f64> = values.iter().filter_map(|v| v.as_f64()).collect();
                if values.is_empty() {
                    None
                } else {
                    Some(values)
                }
            } else {
                None
            };

            rules.push(RuleDecl {
                key: key.clone(),
                ids: ids.clone(),
                level_type,
                level_values,
                units: units.clone(),
            });
        }
    }

    debug!(provider = %provider, rules = rules.len(), "Parsed provider catalog");

    Ok(ProviderDecl {
        provider,
        description: yaml
            .get("description")
            .and_then(|d| d.as_str())
            .unwrap_or_default()
            .to_string(),
        rules,
    })
}

/// Read `parameters.yaml` and `providers/*.yaml` from a catalog directory.
///
/// Returns the parameter document and the provider documents, each paired
/// with its path for error reporting.
pub(crate) fn load_tables_from_dir(
    dir: &Path,
) -> Result<((String, String), Vec<(String, String)>), IngestionError> {
    let parameters_path = dir.join("parameters.yaml");
    let parameters = fs::read_to_string(&parameters_path).map_err(|e| {
        error!(
            path = ?parameters_path,
            error = %e,
            "CRITICAL: Cannot read parameter catalog"
        );
        IngestionError::InvalidConfig(format!("Cannot read {:?}: {}", parameters_path, e))
    })?;

    let providers_dir = dir.join("providers");
    let entries = fs::read_dir(&providers_dir).map_err(|e| {
        IngestionError::InvalidConfig(format!("Cannot read {:?}: {}", providers_dir, e))
    })?;

    let mut providers = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) == Some("yaml") {
            let contents = fs::read_to_string(&path)?;
            providers.push((path.display().to_string(), contents));
        }
    }
    providers.sort();

    Ok((
        (parameters_path.display().to_string(), parameters),
        providers,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_builtin_tables_parse() {
        let params = parse_parameters(BUILTIN_PARAMETERS, "parameters.yaml").unwrap();
        assert_eq!(params.len(), 19);

        for doc in BUILTIN_PROVIDERS {
            let provider = parse_provider(doc, "builtin").unwrap();
            assert!(!provider.rules.is_empty());
        }
    }

    #[test]
    fn test_parse_parameters_defaults_threshold() {
        let yaml = r#"
parameters:
  - name: temperature_sl
    units: K
    valid_range: [180, 340]
"#;
        let params = parse_parameters(yaml, "test").unwrap();
        assert_eq!(params[0].threshold, DEFAULT_LIMIT_THRESHOLD);
        assert_eq!(params[0].lower, 180.0);
    }

    #[test]
    fn test_parse_parameters_requires_valid_range() {
        let yaml = r#"
parameters:
  - name: temperature_sl
    units: K
"#;
        let err = parse_parameters(yaml, "test").unwrap_err();
        assert!(err.to_string().contains("valid_range"));
    }

    #[test]
    fn test_parse_provider_levels() {
        let yaml = r#"
provider: test
parameters:
  - name: wind_u_component_10m
    ids: ["0.2.2", "UGRD"]
    levels:
      - level_code: 103
        value: 10
  - name: visibility_sl
    ids: ["VIS"]
    levels:
      - level: surface
  - name: temperature_sl
    ids: ["TMP"]
    units: C
    levels:
      - level_code: 103
        values: [1.5, 2]
"#;
        let provider = parse_provider(yaml, "test").unwrap();
        assert_eq!(provider.provider, "test");
        assert_eq!(provider.rules.len(), 3);
        assert_eq!(provider.rules[0].level_values, Some(vec![10.0]));
        assert_eq!(provider.rules[1].level_type, level_types::SURFACE);
        assert_eq!(provider.rules[1].level_values, None);
        assert_eq!(provider.rules[2].level_values, Some(vec![1.5, 2.0]));
        assert_eq!(provider.rules[2].units.as_deref(), Some("C"));
    }

    #[test]
    fn test_parse_provider_rejects_missing_level_code() {
        let yaml = r#"
provider: test
parameters:
  - name: temperature_sl
    ids: ["TMP"]
    levels:
      - display: "2 m above ground"
"#;
        assert!(parse_provider(yaml, "test").is_err());
    }

    #[test]
    fn test_load_tables_from_dir() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("providers")).unwrap();
        fs::write(dir.path().join("parameters.yaml"), BUILTIN_PARAMETERS).unwrap();
        fs::write(
            dir.path().join("providers/noaa-gfs.yaml"),
            BUILTIN_PROVIDERS[0],
        )
        .unwrap();
        fs::write(dir.path().join("providers/README.txt"), "ignored").unwrap();

        let (_, providers) = load_tables_from_dir(dir.path()).unwrap();
        assert_eq!(providers.len(), 1);
    }

    #[test]
    fn test_load_tables_missing_dir() {
        let dir = tempdir().unwrap();
        let result = load_tables_from_dir(&dir.path().join("absent"));
        assert!(matches!(result, Err(IngestionError::InvalidConfig(_))));
    }
}
