// ABOUTME: Wire models for HubSpot CRM v3 list and property endpoints
// ABOUTME: Records keep their property bag schemaless as a JSON object

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// A CRM record as returned by the list endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceRecord {
    #[serde(default, deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

/// Record ids are strings on the wire, but older objects sometimes carry numbers.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Null => Ok(String::new()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {}",
            other
        ))),
    }
}

/// One page of the list endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ListPage {
    #[serde(default)]
    pub results: Vec<SourceRecord>,
    #[serde(default)]
    pub paging: Option<Paging>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Paging {
    #[serde(default)]
    pub next: Option<NextPage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NextPage {
    #[serde(default)]
    pub after: Option<String>,
    #[serde(default)]
    pub link: Option<String>,
}

impl ListPage {
    /// Continuation token for the following page, if there is one.
    ///
    /// An empty token is treated the same as a missing one.
    pub fn next_after(&self) -> Option<&str> {
        self.paging
            .as_ref()?
            .next
            .as_ref()?
            .after
            .as_deref()
            .filter(|after| !after.is_empty())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PropertiesResponse {
    #[serde(default)]
    pub results: Vec<PropertyDefinition>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PropertyDefinition {
    pub name: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default, rename = "type")]
    pub property_type: Option<String>,
}
