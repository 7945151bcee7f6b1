//! Load the domain declaration file and resolve it into a SchemaRegistry.

use crate::config::registry::{
    CachePolicy, FieldKind, FieldSpec, Relation, ResourceSchema, SchemaRegistry, SecondaryLookup,
};
use crate::config::types::*;
use crate::config::validate;
use crate::error::ConfigError;
use regex::Regex;
use std::path::Path;

/// Build the registry from a parsed config (validates first).
pub fn resolve(config: &DomainConfig) -> Result<SchemaRegistry, ConfigError> {
    validate(config)?;
    let defaults = &config.defaults;
    let mut registry = SchemaRegistry::new();

    for (name, resource) in &config.resources {
        let fields = resource
            .fields
            .iter()
            .map(|(field_name, f)| resolve_field(field_name, f))
            .collect::<Result<Vec<_>, _>>()?;
        let secondary_lookup = match &resource.secondary_lookup {
            Some(l) => Some(SecondaryLookup {
                field: l.field.clone(),
                matcher: anchored(&l.pattern)?,
            }),
            None => None,
        };
        let schema = ResourceSchema {
            name: name.clone(),
            item_title: resource.item_title.clone().unwrap_or_else(|| name.clone()),
            fields,
            secondary_lookup,
            collection_methods: resource
                .methods_collection
                .clone()
                .unwrap_or_else(|| defaults.methods_collection.clone()),
            item_methods: resource
                .methods_item
                .clone()
                .unwrap_or_else(|| defaults.methods_item.clone()),
            cache: CachePolicy {
                max_age: resource.cache.unwrap_or(defaults.cache).max_age,
            },
        };
        registry.register(name, schema)?;
        tracing::debug!(resource = %name, "registered resource schema");
    }
    Ok(registry)
}

fn resolve_field(name: &str, f: &FieldConfig) -> Result<FieldSpec, ConfigError> {
    let kind = match f.type_.as_str() {
        "string" => FieldKind::String {
            min_length: f.minlength,
            max_length: f.maxlength,
            allowed: f.allowed.as_ref().map(|values| {
                dedup(values.iter().filter_map(|v| v.as_str().map(String::from)))
            }),
        },
        "integer" => FieldKind::Integer {
            allowed: f
                .allowed
                .as_ref()
                .map(|values| dedup(values.iter().filter_map(|v| v.as_i64()))),
        },
        "datetime" => FieldKind::Datetime,
        "objectid" => FieldKind::ObjectId {
            relation: f.relation.as_ref().map(|r| Relation {
                resource: r.resource.clone(),
                embeddable: r.embeddable,
            }),
        },
        "boolean" => FieldKind::Boolean,
        other => {
            return Err(ConfigError::Validation(format!(
                "field '{}': unknown type '{}'",
                name, other
            )))
        }
    };
    Ok(FieldSpec {
        name: name.to_string(),
        required: f.required,
        unique: f.unique,
        kind,
    })
}

/// Repeated enumeration entries collapse into one.
fn dedup<T: PartialEq>(values: impl Iterator<Item = T>) -> Vec<T> {
    let mut out: Vec<T> = Vec::new();
    for v in values {
        if !out.contains(&v) {
            out.push(v);
        }
    }
    out
}

fn anchored(pattern: &str) -> Result<Regex, ConfigError> {
    Regex::new(&format!("^(?:{})$", pattern))
        .map_err(|e| ConfigError::Validation(format!("invalid lookup pattern: {}", e)))
}

pub fn parse_domain(json: &str) -> Result<DomainConfig, ConfigError> {
    serde_json::from_str(json).map_err(|e| ConfigError::Load(e.to_string()))
}

/// Read, parse and resolve a declaration file.
pub async fn load_from_path(path: impl AsRef<Path>) -> Result<SchemaRegistry, ConfigError> {
    let path = path.as_ref();
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))?;
    let config = parse_domain(&raw)?;
    let registry = resolve(&config)?;
    tracing::info!(path = %path.display(), resources = registry.len(), "loaded domain config");
    Ok(registry)
}
