//! Parameter catalog: provider identifiers to canonical variables.
//!
//! Resolution is a pure lookup over declared rules. Anything not declared
//! fails with [`ResolutionError`] instead of being guessed, and declarations
//! that would make a lookup ambiguous are rejected when the catalog loads.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use nwp_common::{is_missing, quantize, VariableKey};
use tracing::{debug, warn};

use crate::error::{IngestionError, ResolutionError, Result};
use crate::tables::{
    load_tables_from_dir, parse_parameters, parse_provider, ProviderDecl, BUILTIN_PARAMETERS,
    BUILTIN_PROVIDERS,
};

/// Metadata and physical limits of a canonical parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterInfo {
    pub key: VariableKey,
    pub description: String,
    /// Canonical units
    pub units: String,
    /// Lower physical limit (inclusive)
    pub lower: f32,
    /// Upper physical limit (inclusive)
    pub upper: f32,
    /// Tolerated fraction of values outside the limits
    pub threshold: f64,
}

/// Summary of a limit scan over a variable's values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParameterScan {
    /// Mean of the non-missing values (NaN if all are missing)
    pub mean: f64,
    /// Fraction of non-missing values outside the limits
    pub out_of_limits_ratio: f64,
    /// Whether any value is missing
    pub has_nulls: bool,
    /// Whether the out-of-limits fraction is within the threshold
    pub is_valid: bool,
}

impl ParameterInfo {
    /// Check values against the physical limits. Never alters the data.
    pub fn scan(&self, values: &[f32]) -> ParameterScan {
        let mut count = 0usize;
        let mut sum = 0.0f64;
        let mut outside = 0usize;
        let mut has_nulls = false;

        for &v in values {
            if is_missing(v) {
                has_nulls = true;
                continue;
            }
            count += 1;
            sum += f64::from(v);
            if v < self.lower || v > self.upper {
                outside += 1;
            }
        }

        let (mean, ratio) = if count == 0 {
            (f64::NAN, 0.0)
        } else {
            (sum / count as f64, outside as f64 / count as f64)
        };

        ParameterScan {
            mean,
            out_of_limits_ratio: ratio,
            has_nulls,
            is_valid: count > 0 && ratio <= self.threshold,
        }
    }
}

/// A failed limit scan, reported alongside a built dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct LimitWarning {
    pub variable: VariableKey,
    pub scan: ParameterScan,
}

#[derive(Debug, Clone)]
struct Rule {
    key: VariableKey,
    level_type: u8,
    /// Quantized accepted level values; `None` accepts any value.
    level_values: Option<Vec<i64>>,
    units: String,
}

impl Rule {
    fn matches(&self, level_type: u8, level_value: f64) -> bool {
        self.level_type == level_type
            && match &self.level_values {
                Some(values) => values.contains(&quantize(level_value)),
                None => true,
            }
    }

    fn overlaps(&self, other: &Rule) -> bool {
        if self.level_type != other.level_type {
            return false;
        }
        match (&self.level_values, &other.level_values) {
            (Some(a), Some(b)) => a.iter().any(|v| b.contains(v)),
            _ => true,
        }
    }
}

#[derive(Debug, Clone)]
struct ProviderRules {
    description: String,
    by_identifier: HashMap<String, Vec<Rule>>,
}

/// The outcome of a successful resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution<'a> {
    pub key: &'a VariableKey,
    /// Units the provider delivers this parameter in
    pub native_units: &'a str,
}

/// Static mapping of provider parameter identities to canonical variables.
#[derive(Debug, Clone)]
pub struct ParameterCatalog {
    parameters: BTreeMap<VariableKey, ParameterInfo>,
    providers: BTreeMap<String, ProviderRules>,
}

impl ParameterCatalog {
    /// The catalog compiled into this crate.
    pub fn builtin() -> Result<Self> {
        Self::from_yaml(BUILTIN_PARAMETERS, BUILTIN_PROVIDERS)
    }

    /// Load a catalog directory (`parameters.yaml` plus `providers/*.yaml`).
    pub fn from_dir(dir: &Path) -> Result<Self> {
        let ((params_source, params), providers) = load_tables_from_dir(dir)?;
        let parameters = parse_parameters(&params, &params_source)?;
        let providers = providers
            .iter()
            .map(|(source, contents)| parse_provider(contents, source))
            .collect::<Result<Vec<_>>>()?;
        Self::assemble(parameters, providers)
    }

    /// Build a catalog from YAML documents.
    pub fn from_yaml(parameters: &str, providers: &[&str]) -> Result<Self> {
        let parameters = parse_parameters(parameters, "parameters")?;
        let providers = providers
            .iter()
            .enumerate()
            .map(|(i, doc)| parse_provider(doc, &format!("provider document {}", i)))
            .collect::<Result<Vec<_>>>()?;
        Self::assemble(parameters, providers)
    }

    fn assemble(
        parameters: Vec<crate::tables::ParameterDecl>,
        providers: Vec<ProviderDecl>,
    ) -> Result<Self> {
        let mut params = BTreeMap::new();
        for decl in parameters {
            let info = ParameterInfo {
                key: decl.key.clone(),
                description: decl.description,
                units: decl.units,
                lower: decl.lower,
                upper: decl.upper,
                threshold: decl.threshold,
            };
            if params.insert(decl.key.clone(), info).is_some() {
                return Err(IngestionError::InvalidConfig(format!(
                    "parameter {} declared twice",
                    decl.key
                )));
            }
        }

        let mut tables = BTreeMap::new();
        for decl in providers {
            if tables.contains_key(&decl.provider) {
                return Err(IngestionError::InvalidConfig(format!(
                    "provider {} declared twice",
                    decl.provider
                )));
            }

            let mut by_identifier: HashMap<String, Vec<Rule>> = HashMap::new();
            for rule in decl.rules {
                let info = params.get(&rule.key).ok_or_else(|| {
                    IngestionError::InvalidConfig(format!(
                        "provider {} maps to unknown parameter {}",
                        decl.provider, rule.key
                    ))
                })?;
                let units = rule.units.clone().unwrap_or_else(|| info.units.clone());

                for id in &rule.ids {
                    let candidate = Rule {
                        key: rule.key.clone(),
                        level_type: rule.level_type,
                        level_values: rule
                            .level_values
                            .as_ref()
                            .map(|values| values.iter().map(|v| quantize(*v)).collect()),
                        units: units.clone(),
                    };
                    let existing = by_identifier.entry(id.clone()).or_default();
                    if let Some(clash) = existing.iter().find(|r| r.overlaps(&candidate)) {
                        return Err(IngestionError::InvalidConfig(format!(
                            "provider {}: identifier '{}' at level type {} maps to both {} and {}",
                            decl.provider, id, candidate.level_type, clash.key, candidate.key
                        )));
                    }
                    existing.push(candidate);
                }
            }

            tables.insert(
                decl.provider,
                ProviderRules {
                    description: decl.description,
                    by_identifier,
                },
            );
        }

        debug!(
            parameters = params.len(),
            providers = tables.len(),
            "Built parameter catalog"
        );

        Ok(Self {
            parameters: params,
            providers: tables,
        })
    }

    /// Resolve a provider parameter identity to its canonical variable.
    pub fn resolve(
        &self,
        provider: &str,
        raw_identifier: &str,
        level_type: u8,
        level_value: f64,
    ) -> std::result::Result<VariableKey, ResolutionError> {
        self.resolve_entry(provider, raw_identifier, level_type, level_value)
            .map(|r| r.key.clone())
    }

    /// Like [`resolve`](Self::resolve), also returning the provider's native units.
    pub fn resolve_entry(
        &self,
        provider: &str,
        raw_identifier: &str,
        level_type: u8,
        level_value: f64,
    ) -> std::result::Result<Resolution<'_>, ResolutionError> {
        self.providers
            .get(provider)
            .and_then(|p| p.by_identifier.get(raw_identifier))
            .and_then(|rules| rules.iter().find(|r| r.matches(level_type, level_value)))
            .map(|rule| Resolution {
                key: &rule.key,
                native_units: &rule.units,
            })
            .ok_or_else(|| ResolutionError {
                provider: provider.to_string(),
                raw_identifier: raw_identifier.to_string(),
                level_type,
                level_value,
            })
    }

    /// Whether a field is one the provider's rules consolidate.
    ///
    /// Declared identifiers must match a rule exactly. Placeholder
    /// identifiers (`unknown`, `unknown:<n>`) only need a rule at the same
    /// level type, so an undeclared level value still reaches
    /// [`resolve`](Self::resolve) and fails there.
    pub fn declares(
        &self,
        provider: &str,
        raw_identifier: &str,
        level_type: u8,
        level_value: f64,
    ) -> bool {
        let placeholder = raw_identifier.starts_with("unknown");
        self.providers
            .get(provider)
            .and_then(|p| p.by_identifier.get(raw_identifier))
            .map(|rules| {
                rules.iter().any(|r| {
                    if placeholder {
                        r.level_type == level_type
                    } else {
                        r.matches(level_type, level_value)
                    }
                })
            })
            .unwrap_or(false)
    }

    pub fn parameter(&self, key: &str) -> Option<&ParameterInfo> {
        self.parameters.get(key)
    }

    pub fn parameters(&self) -> impl Iterator<Item = &ParameterInfo> {
        self.parameters.values()
    }

    /// Canonical units of a parameter.
    pub fn expected_units(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).map(|p| p.units.as_str())
    }

    /// Compare delivered units against the canonical ones.
    ///
    /// A mismatch is logged and reported as `false`; values are never converted.
    pub fn check_units(&self, key: &VariableKey, units: &str) -> bool {
        match self.expected_units(key.as_str()) {
            Some(expected) if expected == units => true,
            Some(expected) => {
                warn!(
                    variable = %key,
                    expected = %expected,
                    found = %units,
                    "Units differ from the canonical units; values are stored unconverted"
                );
                false
            }
            None => false,
        }
    }

    pub fn providers(&self) -> impl Iterator<Item = &str> {
        self.providers.keys().map(String::as_str)
    }

    pub fn has_provider(&self, provider: &str) -> bool {
        self.providers.contains_key(provider)
    }

    pub fn provider_description(&self, provider: &str) -> Option<&str> {
        self.providers.get(provider).map(|p| p.description.as_str())
    }

    /// Canonical variables a provider can deliver, sorted.
    pub fn parameters_for(&self, provider: &str) -> Vec<VariableKey> {
        let mut keys: Vec<VariableKey> = self
            .providers
            .get(provider)
            .map(|p| {
                p.by_identifier
                    .values()
                    .flatten()
                    .map(|r| r.key.clone())
                    .collect()
            })
            .unwrap_or_default();
        keys.sort();
        keys.dedup();
        keys
    }

    /// Run the limit scan for a variable, if it is a known parameter.
    pub fn scan(&self, key: &str, values: &[f32]) -> Option<ParameterScan> {
        self.parameters.get(key).map(|p| p.scan(values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::level_types::*;

    const PARAMS: &str = r#"
parameters:
  - name: temperature_sl
    units: K
    valid_range: [183.15, 333.15]
  - name: wind_u_component_10m
    units: m/s
    valid_range: [-100, 100]
  - name: wind_u_component_100m
    units: m/s
    valid_range: [-100, 100]
  - name: cloud_cover_high
    units: UI
    valid_range: [0, 1]
    threshold: 0.1
"#;

    const PROVIDER: &str = r#"
provider: test
parameters:
  - name: temperature_sl
    ids: ["0.0.0", "TMP"]
    levels:
      - level_code: 103
        value: 2
  - name: wind_u_component_10m
    ids: ["0.2.2", "unknown"]
    levels:
      - level_code: 103
        value: 10
  - name: wind_u_component_100m
    ids: ["0.2.2", "unknown"]
    levels:
      - level_code: 103
        value: 100
  - name: cloud_cover_high
    ids: ["HCDC"]
    units: "%"
    levels:
      - level_code: 234
"#;

    fn catalog() -> ParameterCatalog {
        ParameterCatalog::from_yaml(PARAMS, &[PROVIDER]).unwrap()
    }

    #[test]
    fn test_resolve_declared_identity() {
        let cat = catalog();
        let key = cat.resolve("test", "TMP", HEIGHT_ABOVE_GROUND, 2.0).unwrap();
        assert_eq!(key.as_str(), "temperature_sl");
        assert_eq!(
            cat.resolve("test", "0.0.0", HEIGHT_ABOVE_GROUND, 2.0).unwrap(),
            key
        );
    }

    #[test]
    fn test_unknown_disambiguated_by_level() {
        let cat = catalog();
        assert_eq!(
            cat.resolve("test", "unknown", HEIGHT_ABOVE_GROUND, 10.0)
                .unwrap()
                .as_str(),
            "wind_u_component_10m"
        );
        assert_eq!(
            cat.resolve("test", "unknown", HEIGHT_ABOVE_GROUND, 100.0)
                .unwrap()
                .as_str(),
            "wind_u_component_100m"
        );
    }

    #[test]
    fn test_undeclared_combinations_fail() {
        let cat = catalog();
        let err = cat
            .resolve("test", "unknown", HEIGHT_ABOVE_GROUND, 50.0)
            .unwrap_err();
        assert_eq!(err.raw_identifier, "unknown");
        assert_eq!(err.level_value, 50.0);

        assert!(cat.resolve("test", "TMP", SURFACE, 0.0).is_err());
        assert!(cat.resolve("other", "TMP", HEIGHT_ABOVE_GROUND, 2.0).is_err());
        assert!(cat.resolve("test", "tmp", HEIGHT_ABOVE_GROUND, 2.0).is_err());
    }

    #[test]
    fn test_resolve_is_deterministic() {
        let cat = catalog();
        let first = cat.resolve("test", "0.2.2", HEIGHT_ABOVE_GROUND, 10.0);
        for _ in 0..10 {
            assert_eq!(cat.resolve("test", "0.2.2", HEIGHT_ABOVE_GROUND, 10.0), first);
        }
    }

    #[test]
    fn test_level_value_compared_at_coordinate_precision() {
        let cat = catalog();
        assert!(cat
            .resolve("test", "TMP", HEIGHT_ABOVE_GROUND, 2.000_01)
            .is_ok());
    }

    #[test]
    fn test_any_level_value_rule() {
        let cat = catalog();
        assert!(cat.resolve("test", "HCDC", HIGH_CLOUD_LAYER, 0.0).is_ok());
        assert!(cat.resolve("test", "HCDC", HIGH_CLOUD_LAYER, 12.0).is_ok());
    }

    #[test]
    fn test_native_units() {
        let cat = catalog();
        let entry = cat
            .resolve_entry("test", "HCDC", HIGH_CLOUD_LAYER, 0.0)
            .unwrap();
        assert_eq!(entry.native_units, "%");
        assert!(!cat.check_units(entry.key, entry.native_units));

        let entry = cat
            .resolve_entry("test", "TMP", HEIGHT_ABOVE_GROUND, 2.0)
            .unwrap();
        assert_eq!(entry.native_units, "K");
        assert!(cat.check_units(entry.key, entry.native_units));
    }

    #[test]
    fn test_ambiguous_rules_rejected() {
        let provider = r#"
provider: test
parameters:
  - name: wind_u_component_10m
    ids: ["unknown"]
    levels:
      - level_code: 103
  - name: wind_u_component_100m
    ids: ["unknown"]
    levels:
      - level_code: 103
        value: 100
"#;
        let err = ParameterCatalog::from_yaml(PARAMS, &[provider]).unwrap_err();
        assert!(err.to_string().contains("unknown"));
    }

    #[test]
    fn test_rule_for_unknown_parameter_rejected() {
        let provider = r#"
provider: test
parameters:
  - name: soil_moisture
    ids: ["SOILW"]
    levels:
      - level_code: 1
"#;
        assert!(ParameterCatalog::from_yaml(PARAMS, &[provider]).is_err());
    }

    #[test]
    fn test_duplicate_provider_rejected() {
        assert!(ParameterCatalog::from_yaml(PARAMS, &[PROVIDER, PROVIDER]).is_err());
    }

    #[test]
    fn test_declares() {
        let cat = catalog();
        assert!(cat.declares("test", "TMP", HEIGHT_ABOVE_GROUND, 2.0));
        assert!(!cat.declares("test", "TMP", HEIGHT_ABOVE_GROUND, 80.0));
        // Placeholders pass on level type alone
        assert!(cat.declares("test", "unknown", HEIGHT_ABOVE_GROUND, 50.0));
        assert!(!cat.declares("test", "unknown", SURFACE, 0.0));
        assert!(!cat.declares("absent", "TMP", HEIGHT_ABOVE_GROUND, 2.0));
    }

    #[test]
    fn test_parameters_for() {
        let cat = catalog();
        let keys = cat.parameters_for("test");
        assert_eq!(keys.len(), 4);
        assert!(keys.windows(2).all(|w| w[0] < w[1]));
        assert!(cat.parameters_for("absent").is_empty());
    }

    #[test]
    fn test_scan_limits() {
        let cat = catalog();
        let scan = cat
            .scan("cloud_cover_high", &[0.0, 0.5, 1.0, f32::NAN])
            .unwrap();
        assert!(scan.is_valid);
        assert!(scan.has_nulls);
        assert!((scan.mean - 0.5).abs() < 1e-9);

        // 2 of 4 values outside [0, 1], above the 0.1 threshold
        let scan = cat.scan("cloud_cover_high", &[0.2, 50.0, 80.0, 0.4]).unwrap();
        assert!(!scan.is_valid);
        assert!((scan.out_of_limits_ratio - 0.5).abs() < 1e-9);

        let scan = cat.scan("cloud_cover_high", &[f32::NAN; 3]).unwrap();
        assert!(!scan.is_valid);
        assert!(cat.scan("visibility_sl", &[1.0]).is_none());
    }

    #[test]
    fn test_builtin_catalog() {
        let cat = ParameterCatalog::builtin().unwrap();
        let providers: Vec<&str> = cat.providers().collect();
        assert_eq!(
            providers,
            vec!["ceda-ukv", "ecmwf-ifs", "metoffice-datahub", "noaa-gfs"]
        );
        assert_eq!(cat.parameters().count(), 19);

        assert_eq!(
            cat.resolve("noaa-gfs", "0.0.0", HEIGHT_ABOVE_GROUND, 2.0)
                .unwrap()
                .as_str(),
            "temperature_sl"
        );
        assert_eq!(
            cat.resolve("noaa-gfs", "0.6.1", HIGH_CLOUD_LAYER, 0.0)
                .unwrap()
                .as_str(),
            "cloud_cover_high"
        );
        assert_eq!(
            cat.resolve("metoffice-datahub", "unknown:193", HEIGHT_ABOVE_GROUND, 100.0)
                .unwrap()
                .as_str(),
            "wind_v_component_100m"
        );
        assert_eq!(
            cat.resolve("ceda-ukv", "unknown", LOW_CLOUD_LAYER, 0.0)
                .unwrap()
                .as_str(),
            "cloud_cover_low"
        );
    }
}
