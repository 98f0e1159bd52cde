//! Domain types shared by the work-tracker adapter, the worker and the facade.
//!
//! The adapter never owns work items: these are snapshots decoded from a
//! single remote response.

use serde::{Deserialize, Serialize};

/// A work item as read back from the remote tracker.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkItem {
    pub id: u64,
    pub title: String,
    pub state: String,
    pub work_item_type: Option<String>,
    pub team_project: Option<String>,
    /// Display name of the assignee, if any
    pub assigned_to: Option<String>,
    pub created_by: Option<String>,
    pub created_date: Option<String>,
    pub changed_date: Option<String>,
    pub priority: Option<u8>,
    pub due_date: Option<String>,
    pub area_path: Option<String>,
    pub iteration_path: Option<String>,
    pub tags: Option<String>,
    pub description: Option<String>,
    pub url: String,
}

/// Fields for a new work item.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkItemDraft {
    pub title: String,
    pub description: String,
    pub priority: u8,
    pub assigned_to: Option<String>,
    pub due_date: Option<String>,
}

/// Partial update of an existing work item. `None` fields are left alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkItemUpdate {
    pub state: Option<String>,
    pub assigned_to: Option<String>,
    /// Appended to the item's discussion history
    pub history: Option<String>,
}

/// Node of an area or iteration classification tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassificationNode {
    #[serde(default)]
    pub id: Option<u64>,
    pub name: String,
    #[serde(default)]
    pub attributes: Option<NodeAttributes>,
    #[serde(default)]
    pub children: Vec<ClassificationNode>,
}

/// Scheduling attributes carried by iteration nodes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeAttributes {
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub finish_date: Option<String>,
}

impl ClassificationNode {
    /// Visit every node depth-first with its backslash-joined path.
    pub fn walk<F: FnMut(&ClassificationNode, &str)>(&self, visit: &mut F) {
        self.walk_from("", visit);
    }

    fn walk_from<F: FnMut(&ClassificationNode, &str)>(&self, parent: &str, visit: &mut F) {
        let path = if parent.is_empty() {
            self.name.clone()
        } else {
            format!("{}\\{}", parent, self.name)
        };
        visit(self, &path);
        for child in &self.children {
            child.walk_from(&path, visit);
        }
    }
}

/// A team inside the configured project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Team {
    pub id: String,
    pub name: String,
}

/// A team iteration (sprint).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Iteration {
    pub id: String,
    pub name: String,
    pub path: String,
    pub start_date: Option<String>,
    pub finish_date: Option<String>,
}

/// An uploaded attachment, not yet linked to anything.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachmentRef {
    pub id: String,
    pub url: String,
}

/// A user identity known to the tracker's directory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub display_name: Option<String>,
    pub mail_address: Option<String>,
    pub principal_name: Option<String>,
    pub origin_id: Option<String>,
}

impl Identity {
    /// Exact match on mail address or principal name.
    pub fn matches_exactly(&self, email: &str) -> bool {
        self.mail_address.as_deref() == Some(email)
            || self.principal_name.as_deref() == Some(email)
    }

    /// Case-insensitive substring match on mail address or display name.
    pub fn resembles(&self, needle: &str) -> bool {
        let needle = needle.to_lowercase();
        [self.mail_address.as_deref(), self.display_name.as_deref()]
            .into_iter()
            .flatten()
            .any(|field| field.to_lowercase().contains(&needle))
    }
}

/// A project visible to the credential.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectSummary {
    pub id: String,
    pub name: String,
    pub url: Option<String>,
    pub description: Option<String>,
}
