//! Azure DevOps API request and response types.
//!
//! These types represent the raw JSON exchanged with the REST API (7.0).
//! Responses are deserialized here and then mapped to unified types.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// =============================================================================
// Work items
// =============================================================================

/// Work item as returned by `_apis/wit/workitems`.
#[derive(Debug, Clone, Deserialize)]
pub struct AdoWorkItem {
    pub id: u64,
    /// Field reference name (`System.Title`, ...) to value
    #[serde(default)]
    pub fields: Map<String, Value>,
    /// REST url of the item
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default, rename = "_links")]
    pub links: Option<AdoLinks>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdoLinks {
    #[serde(default)]
    pub html: Option<AdoLink>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdoLink {
    pub href: String,
}

/// `{count, value}` envelope used by list endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct AdoList<T> {
    #[serde(default = "Vec::new")]
    pub value: Vec<T>,
}

/// One JSON Patch operation for work item create/update.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatchOperation {
    pub op: &'static str,
    pub path: String,
    pub value: Value,
}

impl PatchOperation {
    /// `add` on a work item field.
    pub fn add_field(field: &str, value: impl Into<Value>) -> Self {
        Self {
            op: "add",
            path: format!("/fields/{}", field),
            value: value.into(),
        }
    }

    /// `add` appending a relation.
    pub fn add_relation(relation: AdoRelation) -> Self {
        Self {
            op: "add",
            path: "/relations/-".to_string(),
            value: serde_json::json!(relation),
        }
    }
}

/// Work item relation (links and attachments).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdoRelation {
    pub rel: String,
    pub url: String,
    pub attributes: RelationAttributes,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelationAttributes {
    pub comment: String,
}

// =============================================================================
// WIQL
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct WiqlQuery {
    pub query: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WiqlResult {
    #[serde(default)]
    pub work_items: Vec<WorkItemReference>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkItemReference {
    pub id: u64,
}

// =============================================================================
// Classification nodes, teams, iterations
// =============================================================================

/// Area or iteration classification node.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdoClassificationNode {
    #[serde(default)]
    pub id: Option<u64>,
    pub name: String,
    #[serde(default)]
    pub attributes: Option<AdoScheduleAttributes>,
    #[serde(default)]
    pub children: Vec<AdoClassificationNode>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdoScheduleAttributes {
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub finish_date: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdoTeam {
    pub id: String,
    pub name: String,
}

/// Team settings iteration.
#[derive(Debug, Clone, Deserialize)]
pub struct AdoIteration {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub attributes: Option<AdoScheduleAttributes>,
}

// =============================================================================
// Attachments, users, projects
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct AdoAttachment {
    pub id: String,
    pub url: String,
}

/// Graph user.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdoGraphUser {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub mail_address: Option<String>,
    #[serde(default)]
    pub principal_name: Option<String>,
    #[serde(default)]
    pub origin_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdoProject {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdoWorkItemType {
    pub name: String,
}
