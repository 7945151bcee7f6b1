//! Raw config types matching the domain declaration file.

use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::marker::PhantomData;

/// Collection-level operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CollectionMethod {
    #[serde(alias = "GET")]
    List,
    #[serde(alias = "POST")]
    Create,
    Delete,
}

/// Item-level operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ItemMethod {
    Get,
    #[serde(alias = "PATCH")]
    Update,
    Delete,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    pub max_age: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig { max_age: 20 }
    }
}

/// Global fallbacks for resources that do not declare their own methods or cache policy.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResourceDefaults {
    #[serde(default = "default_collection_methods")]
    pub methods_collection: Vec<CollectionMethod>,
    #[serde(default = "default_item_methods")]
    pub methods_item: Vec<ItemMethod>,
    #[serde(default)]
    pub cache: CacheConfig,
}

impl Default for ResourceDefaults {
    fn default() -> Self {
        ResourceDefaults {
            methods_collection: default_collection_methods(),
            methods_item: default_item_methods(),
            cache: CacheConfig::default(),
        }
    }
}

fn default_collection_methods() -> Vec<CollectionMethod> {
    vec![CollectionMethod::List]
}

fn default_item_methods() -> Vec<ItemMethod> {
    vec![ItemMethod::Get]
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LookupConfig {
    pub field: String,
    pub pattern: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RelationConfig {
    pub resource: String,
    #[serde(default)]
    pub embeddable: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FieldConfig {
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub minlength: Option<usize>,
    #[serde(default)]
    pub maxlength: Option<usize>,
    #[serde(default)]
    pub allowed: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    pub relation: Option<RelationConfig>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ResourceConfig {
    #[serde(default)]
    pub item_title: Option<String>,
    #[serde(default)]
    pub methods_collection: Option<Vec<CollectionMethod>>,
    #[serde(default)]
    pub methods_item: Option<Vec<ItemMethod>>,
    #[serde(default)]
    pub secondary_lookup: Option<LookupConfig>,
    #[serde(default)]
    pub cache: Option<CacheConfig>,
    #[serde(deserialize_with = "ordered_entries")]
    pub fields: Vec<(String, FieldConfig)>,
}

/// The whole declaration file.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct DomainConfig {
    #[serde(default)]
    pub defaults: ResourceDefaults,
    #[serde(deserialize_with = "ordered_entries")]
    pub resources: Vec<(String, ResourceConfig)>,
}

impl DomainConfig {
    pub fn resource(&self, name: &str) -> Option<&ResourceConfig> {
        self.resources.iter().find(|(n, _)| n == name).map(|(_, r)| r)
    }
}

/// Deserialize a JSON object into (key, value) pairs, keeping declaration order.
fn ordered_entries<'de, D, T>(deserializer: D) -> Result<Vec<(String, T)>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    struct EntriesVisitor<T>(PhantomData<T>);

    impl<'de, T: Deserialize<'de>> Visitor<'de> for EntriesVisitor<T> {
        type Value = Vec<(String, T)>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("an object keyed by name")
        }

        fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut out: Vec<(String, T)> = Vec::with_capacity(map.size_hint().unwrap_or(0));
            while let Some((key, value)) = map.next_entry::<String, T>()? {
                if out.iter().any(|(k, _)| *k == key) {
                    return Err(serde::de::Error::custom(format!("duplicate key '{}'", key)));
                }
                out.push((key, value));
            }
            Ok(out)
        }
    }

    deserializer.deserialize_map(EntriesVisitor(PhantomData))
}
