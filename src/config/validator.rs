//! Config validation: field declarations, relation targets and lookups.

use crate::config::{DomainConfig, FieldConfig, ResourceConfig};
use crate::error::ConfigError;
use regex::Regex;
use std::collections::HashSet;

pub const FIELD_TYPES: &[&str] = &["string", "integer", "datetime", "objectid", "boolean"];

pub fn validate(config: &DomainConfig) -> Result<(), ConfigError> {
    if config.resources.is_empty() {
        return Err(ConfigError::Validation("at least one resource required".into()));
    }
    let names: HashSet<&str> = config.resources.iter().map(|(n, _)| n.as_str()).collect();

    for (name, resource) in &config.resources {
        if name.is_empty() || name.starts_with('_') {
            return Err(ConfigError::Validation(format!("invalid resource name '{}'", name)));
        }
        for (field_name, field) in &resource.fields {
            validate_field(name, field_name, field, &names)?;
        }
        if let Some(lookup) = &resource.secondary_lookup {
            validate_lookup(name, resource, &lookup.field, &lookup.pattern)?;
        }
    }
    Ok(())
}

fn validate_field(
    resource: &str,
    name: &str,
    field: &FieldConfig,
    resources: &HashSet<&str>,
) -> Result<(), ConfigError> {
    let at = || format!("{}.{}", resource, name);
    if name.is_empty() || name.starts_with('_') {
        return Err(ConfigError::Validation(format!("invalid field name '{}'", at())));
    }
    let ty = field.type_.as_str();
    if !FIELD_TYPES.contains(&ty) {
        return Err(ConfigError::Validation(format!("{}: unknown type '{}'", at(), ty)));
    }
    if ty != "string" && (field.minlength.is_some() || field.maxlength.is_some()) {
        return Err(ConfigError::Validation(format!(
            "{}: minlength/maxlength only apply to string fields",
            at()
        )));
    }
    if let (Some(min), Some(max)) = (field.minlength, field.maxlength) {
        if min > max {
            return Err(ConfigError::Validation(format!(
                "{}: minlength {} exceeds maxlength {}",
                at(),
                min,
                max
            )));
        }
    }
    if let Some(allowed) = &field.allowed {
        let ok = match ty {
            "string" => allowed.iter().all(|v| v.is_string()),
            "integer" => allowed.iter().all(|v| v.is_i64()),
            _ => false,
        };
        if !ok {
            return Err(ConfigError::Validation(format!(
                "{}: allowed values do not fit type '{}'",
                at(),
                ty
            )));
        }
    }
    if let Some(rel) = &field.relation {
        if ty != "objectid" {
            return Err(ConfigError::Validation(format!(
                "{}: relation requires an objectid field",
                at()
            )));
        }
        if !resources.contains(rel.resource.as_str()) {
            return Err(ConfigError::MissingReference {
                kind: "resource",
                id: rel.resource.clone(),
            });
        }
    }
    Ok(())
}

fn validate_lookup(
    resource: &str,
    config: &ResourceConfig,
    field: &str,
    pattern: &str,
) -> Result<(), ConfigError> {
    let declared = config
        .fields
        .iter()
        .find(|(n, _)| n == field)
        .map(|(_, f)| f)
        .ok_or_else(|| {
            ConfigError::Validation(format!(
                "{}: secondary lookup field '{}' is not declared",
                resource, field
            ))
        })?;
    if declared.type_ != "string" {
        return Err(ConfigError::Validation(format!(
            "{}: secondary lookup field '{}' must be a string",
            resource, field
        )));
    }
    if !declared.unique {
        tracing::warn!(resource, field, "secondary lookup field is not unique; first match wins");
    }
    Regex::new(pattern).map_err(|e| {
        ConfigError::Validation(format!("{}: invalid lookup pattern: {}", resource, e))
    })?;
    Ok(())
}
