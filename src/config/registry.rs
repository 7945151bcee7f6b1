//! Schema registry: resolved, immutable per-resource schemas for runtime use.

use crate::config::{CollectionMethod, ItemMethod};
use crate::error::{AppError, ConfigError};
use regex::Regex;
use std::collections::HashMap;

/// Relation from an objectid field to a document in another resource.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Relation {
    pub resource: String,
    pub embeddable: bool,
}

/// Field type with the constraints that apply to it.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldKind {
    String {
        min_length: Option<usize>,
        max_length: Option<usize>,
        /// Deduplicated, declaration order.
        allowed: Option<Vec<String>>,
    },
    Integer {
        allowed: Option<Vec<i64>>,
    },
    Datetime,
    ObjectId {
        relation: Option<Relation>,
    },
    Boolean,
}

impl FieldKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            FieldKind::String { .. } => "string",
            FieldKind::Integer { .. } => "integer",
            FieldKind::Datetime => "datetime",
            FieldKind::ObjectId { .. } => "objectid",
            FieldKind::Boolean => "boolean",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct FieldSpec {
    pub name: String,
    pub required: bool,
    pub unique: bool,
    pub kind: FieldKind,
}

impl FieldSpec {
    pub fn relation(&self) -> Option<&Relation> {
        match &self.kind {
            FieldKind::ObjectId { relation } => relation.as_ref(),
            _ => None,
        }
    }
}

/// Alternate addressing of items by a declared field; `matcher` is anchored.
#[derive(Clone, Debug)]
pub struct SecondaryLookup {
    pub field: String,
    pub matcher: Regex,
}

impl SecondaryLookup {
    pub fn matches(&self, value: &str) -> bool {
        self.matcher.is_match(value)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CachePolicy {
    pub max_age: u32,
}

#[derive(Clone, Debug)]
pub struct ResourceSchema {
    pub name: String,
    /// Singular label used in messages.
    pub item_title: String,
    pub fields: Vec<FieldSpec>,
    pub secondary_lookup: Option<SecondaryLookup>,
    pub collection_methods: Vec<CollectionMethod>,
    pub item_methods: Vec<ItemMethod>,
    pub cache: CachePolicy,
}

impl ResourceSchema {
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn unique_fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.iter().filter(|f| f.unique)
    }

    pub fn relation_fields(&self) -> impl Iterator<Item = (&FieldSpec, &Relation)> {
        self.fields.iter().filter_map(|f| f.relation().map(|r| (f, r)))
    }

    pub fn allows_collection(&self, method: CollectionMethod) -> bool {
        self.collection_methods.contains(&method)
    }

    pub fn allows_item(&self, method: ItemMethod) -> bool {
        self.item_methods.contains(&method)
    }
}

/// Per-resource schemas. Built once at startup, shared read-only afterwards.
#[derive(Clone, Debug, Default)]
pub struct SchemaRegistry {
    by_name: HashMap<String, ResourceSchema>,
    order: Vec<String>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        SchemaRegistry::default()
    }

    /// Registers a schema under its own name. Identical shapes under different names are kept apart.
    pub fn register(&mut self, name: &str, mut schema: ResourceSchema) -> Result<(), ConfigError> {
        if self.by_name.contains_key(name) {
            return Err(ConfigError::DuplicateResource(name.to_string()));
        }
        schema.name = name.to_string();
        self.order.push(name.to_string());
        self.by_name.insert(name.to_string(), schema);
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Result<&ResourceSchema, AppError> {
        self.by_name
            .get(name)
            .ok_or_else(|| AppError::NotFound(format!("resource '{}'", name)))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Schemas in registration order.
    pub fn schemas(&self) -> impl Iterator<Item = &ResourceSchema> {
        self.order.iter().filter_map(|n| self.by_name.get(n))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
