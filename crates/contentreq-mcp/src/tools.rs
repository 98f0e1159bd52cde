//! Tool catalog: names, input schemas and argument validation.
//!
//! Every tool has a JSON schema advertised through `tools/list` and a typed
//! argument struct with an explicit `validate` predicate. Both describe the
//! same constraints; the remote tracker does not check request shape itself.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, NaiveDate};
use contentreq_core::Urgency;
use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer};
use serde_json::{json, Value};

use crate::error::DispatchError;
use crate::protocol::ToolDefinition;

/// States queried by `get_user_work_items` when none are given.
pub const DEFAULT_INCLUDE_STATES: [&str; 3] = ["New", "Active", "Resolved"];

/// Classification depth used by `get_area_paths` when none is given.
pub const DEFAULT_AREA_DEPTH: u32 = 5;

/// Registered tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tool {
    CreateContentRequest,
    UpdateRequestStatus,
    AssignContentDeveloper,
    GetRequestDetails,
    GetTeamDashboard,
    GetUserWorkItems,
    GetAreaPaths,
    GetIterations,
    UploadAttachment,
    ValidateUser,
}

impl Tool {
    pub const ALL: [Tool; 10] = [
        Tool::CreateContentRequest,
        Tool::UpdateRequestStatus,
        Tool::AssignContentDeveloper,
        Tool::GetRequestDetails,
        Tool::GetTeamDashboard,
        Tool::GetUserWorkItems,
        Tool::GetAreaPaths,
        Tool::GetIterations,
        Tool::UploadAttachment,
        Tool::ValidateUser,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Tool::CreateContentRequest => "create_content_request",
            Tool::UpdateRequestStatus => "update_request_status",
            Tool::AssignContentDeveloper => "assign_content_developer",
            Tool::GetRequestDetails => "get_request_details",
            Tool::GetTeamDashboard => "get_team_dashboard",
            Tool::GetUserWorkItems => "get_user_work_items",
            Tool::GetAreaPaths => "get_area_paths",
            Tool::GetIterations => "get_iterations",
            Tool::UploadAttachment => "upload_attachment",
            Tool::ValidateUser => "validate_user",
        }
    }

    pub fn from_name(name: &str) -> Option<Tool> {
        Tool::ALL.into_iter().find(|t| t.name() == name)
    }

    /// Whether the tool changes remote state.
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            Tool::CreateContentRequest
                | Tool::UpdateRequestStatus
                | Tool::AssignContentDeveloper
                | Tool::UploadAttachment
        )
    }

    pub fn description(&self) -> &'static str {
        match self {
            Tool::CreateContentRequest => {
                "Create a new content development request as an Azure DevOps work item"
            }
            Tool::UpdateRequestStatus => "Update the status of a content request",
            Tool::AssignContentDeveloper => {
                "Assign a content developer to a work item and mark it Active"
            }
            Tool::GetRequestDetails => "Get details of a content request",
            Tool::GetTeamDashboard => {
                "Check connectivity and list project and work item type information"
            }
            Tool::GetUserWorkItems => "Get work items assigned to a specific user",
            Tool::GetAreaPaths => "Get area paths available for content requests",
            Tool::GetIterations => "Get available iterations for a team",
            Tool::UploadAttachment => "Upload a file attachment to a work item",
            Tool::ValidateUser => "Validate that a user exists and can be assigned work",
        }
    }

    pub fn input_schema(&self) -> Value {
        let work_item_id = json!({
            "type": "number",
            "description": "Azure DevOps work item ID"
        });

        match self {
            Tool::CreateContentRequest => json!({
                "type": "object",
                "properties": {
                    "productArea": {"type": "string", "description": "Product area for the content request"},
                    "documentType": {"type": "string", "description": "Type of documentation (user guide, API doc, release note, etc.)"},
                    "title": {"type": "string", "description": "Title of the content request"},
                    "description": {"type": "string", "description": "Detailed description of the content needed"},
                    "businessJustification": {"type": "string", "description": "Business justification for the request"},
                    "urgency": {
                        "type": "string",
                        "enum": Urgency::ALL.iter().map(|u| u.as_str()).collect::<Vec<_>>(),
                        "description": "Urgency level of the request"
                    },
                    "requestorEmail": {"type": "string", "description": "Email of the person making the request"},
                    "reviewers": {"type": "array", "items": {"type": "string"}, "description": "Reviewer email addresses"},
                    "deadline": {"type": "string", "description": "Deadline for completion (ISO date)"},
                    "contentDeveloper": {"type": "string", "description": "Preferred content developer"},
                    "existingContentLinks": {"type": "array", "items": {"type": "string"}, "description": "Links to existing related content"}
                },
                "required": ["productArea", "documentType", "title", "description", "businessJustification", "urgency", "requestorEmail", "reviewers"]
            }),
            Tool::UpdateRequestStatus => json!({
                "type": "object",
                "properties": {
                    "workItemId": work_item_id,
                    "status": {"type": "string", "description": "New status (New, Active, Resolved, Closed, ...)"},
                    "comment": {"type": "string", "description": "Comment recorded with the status change"}
                },
                "required": ["workItemId", "status"]
            }),
            Tool::AssignContentDeveloper => json!({
                "type": "object",
                "properties": {
                    "workItemId": work_item_id,
                    "assignee": {"type": "string", "description": "Email address of the assignee"}
                },
                "required": ["workItemId", "assignee"]
            }),
            Tool::GetRequestDetails => json!({
                "type": "object",
                "properties": {"workItemId": work_item_id},
                "required": ["workItemId"]
            }),
            Tool::GetTeamDashboard => json!({
                "type": "object",
                "properties": {
                    "assignee": {"type": "string", "description": "Filter by assignee email"},
                    "status": {"type": "string", "description": "Filter by status"},
                    "productArea": {"type": "string", "description": "Filter by product area"}
                },
                "required": []
            }),
            Tool::GetUserWorkItems => json!({
                "type": "object",
                "properties": {
                    "userEmail": {"type": "string", "description": "Email address of the user"},
                    "includeStates": {
                        "type": "array",
                        "items": {"type": "string"},
                        "description": "Work item states to include (default: New, Active, Resolved)"
                    }
                },
                "required": ["userEmail"]
            }),
            Tool::GetAreaPaths => json!({
                "type": "object",
                "properties": {
                    "depth": {"type": "number", "description": "Depth of classification nodes to retrieve (default: 5)"}
                },
                "required": []
            }),
            Tool::GetIterations => json!({
                "type": "object",
                "properties": {
                    "teamName": {"type": "string", "description": "Team name (default team if omitted)"},
                    "includeCurrentAndFuture": {"type": "boolean", "description": "Only current and future iterations (default: true)"}
                },
                "required": []
            }),
            Tool::UploadAttachment => json!({
                "type": "object",
                "properties": {
                    "workItemId": work_item_id,
                    "fileName": {"type": "string", "description": "Name of the file being uploaded"},
                    "fileContent": {"type": "string", "description": "Base64 encoded file content"},
                    "comment": {"type": "string", "description": "Comment about the attachment"}
                },
                "required": ["workItemId", "fileName", "fileContent"]
            }),
            Tool::ValidateUser => json!({
                "type": "object",
                "properties": {
                    "userEmail": {"type": "string", "description": "Email address of the user to validate"}
                },
                "required": ["userEmail"]
            }),
        }
    }

    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
        }
    }
}

/// Definitions of every registered tool.
pub fn catalog() -> Vec<ToolDefinition> {
    Tool::ALL.iter().map(Tool::definition).collect()
}

// =============================================================================
// Arguments
// =============================================================================

/// Typed tool arguments with the checks their handler relies on.
pub trait ToolArgs: DeserializeOwned {
    fn validate(&self) -> Result<(), String>;
}

/// Decode and validate arguments for `tool`. Missing arguments decode as `{}`.
pub fn parse_args<T: ToolArgs>(tool: Tool, arguments: Option<Value>) -> Result<T, DispatchError> {
    let invalid = |reason: String| DispatchError::InvalidArguments {
        tool: tool.name().to_string(),
        reason,
    };

    let arguments = match arguments {
        None | Some(Value::Null) => json!({}),
        Some(value) => value,
    };
    let args: T = serde_json::from_value(arguments).map_err(|e| invalid(e.to_string()))?;
    args.validate().map_err(invalid)?;
    Ok(args)
}

fn require_text(field: &str, value: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{} must not be empty", field));
    }
    Ok(())
}

fn require_email(field: &str, value: &str) -> Result<(), String> {
    require_text(field, value)?;
    if !value.contains('@') {
        return Err(format!("{} must be an email address", field));
    }
    Ok(())
}

fn require_work_item_id(id: u64) -> Result<(), String> {
    if id == 0 {
        return Err("workItemId must be a positive number".to_string());
    }
    Ok(())
}

/// Parse `YYYY-MM-DD` or an RFC 3339 timestamp.
pub fn parse_iso_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(value).ok().map(|d| d.date_naive()))
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateContentRequestArgs {
    pub product_area: String,
    pub document_type: String,
    pub title: String,
    pub description: String,
    pub business_justification: String,
    pub urgency: String,
    pub requestor_email: String,
    pub reviewers: Vec<String>,
    #[serde(default)]
    pub deadline: Option<String>,
    #[serde(default)]
    pub content_developer: Option<String>,
    #[serde(default)]
    pub existing_content_links: Vec<String>,
}

impl ToolArgs for CreateContentRequestArgs {
    fn validate(&self) -> Result<(), String> {
        require_text("productArea", &self.product_area)?;
        require_text("documentType", &self.document_type)?;
        require_text("title", &self.title)?;
        require_text("description", &self.description)?;
        require_text("businessJustification", &self.business_justification)?;
        self.urgency.parse::<Urgency>()?;
        require_email("requestorEmail", &self.requestor_email)?;
        if let Some(deadline) = &self.deadline {
            if parse_iso_date(deadline).is_none() {
                return Err(format!("deadline must be an ISO date; got '{}'", deadline));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRequestStatusArgs {
    pub work_item_id: u64,
    pub status: String,
    #[serde(default)]
    pub comment: Option<String>,
}

impl ToolArgs for UpdateRequestStatusArgs {
    fn validate(&self) -> Result<(), String> {
        require_work_item_id(self.work_item_id)?;
        require_text("status", &self.status)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignContentDeveloperArgs {
    pub work_item_id: u64,
    pub assignee: String,
}

impl ToolArgs for AssignContentDeveloperArgs {
    fn validate(&self) -> Result<(), String> {
        require_work_item_id(self.work_item_id)?;
        require_text("assignee", &self.assignee)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetRequestDetailsArgs {
    pub work_item_id: u64,
}

impl ToolArgs for GetRequestDetailsArgs {
    fn validate(&self) -> Result<(), String> {
        require_work_item_id(self.work_item_id)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetTeamDashboardArgs {
    #[serde(default)]
    pub assignee: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub product_area: Option<String>,
}

impl ToolArgs for GetTeamDashboardArgs {
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetUserWorkItemsArgs {
    pub user_email: String,
    #[serde(default)]
    pub include_states: Option<Vec<String>>,
}

impl GetUserWorkItemsArgs {
    /// Requested states, or the defaults when none were given.
    pub fn states(&self) -> Vec<String> {
        match &self.include_states {
            Some(states) if !states.is_empty() => states.clone(),
            _ => DEFAULT_INCLUDE_STATES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl ToolArgs for GetUserWorkItemsArgs {
    fn validate(&self) -> Result<(), String> {
        require_text("userEmail", &self.user_email)?;
        if let Some(states) = &self.include_states {
            if states.iter().any(|s| s.trim().is_empty()) {
                return Err("includeStates must not contain empty states".to_string());
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetAreaPathsArgs {
    #[serde(default)]
    pub depth: Option<u32>,
}

impl GetAreaPathsArgs {
    pub fn depth(&self) -> u32 {
        self.depth.unwrap_or(DEFAULT_AREA_DEPTH)
    }
}

impl ToolArgs for GetAreaPathsArgs {
    fn validate(&self) -> Result<(), String> {
        match self.depth {
            Some(0) => Err("depth must be at least 1".to_string()),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetIterationsArgs {
    #[serde(default)]
    pub team_name: Option<String>,
    #[serde(default)]
    pub include_current_and_future: Option<bool>,
}

impl GetIterationsArgs {
    pub fn include_current_and_future(&self) -> bool {
        self.include_current_and_future.unwrap_or(true)
    }
}

impl ToolArgs for GetIterationsArgs {
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadAttachmentArgs {
    pub work_item_id: u64,
    pub file_name: String,
    /// Decoded from base64 while parsing.
    #[serde(deserialize_with = "base64_bytes")]
    pub file_content: Vec<u8>,
    #[serde(default)]
    pub comment: Option<String>,
}

fn base64_bytes<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
    let encoded = String::deserialize(deserializer)?;
    STANDARD
        .decode(encoded.trim())
        .map_err(|e| D::Error::custom(format!("fileContent must be base64: {}", e)))
}

impl ToolArgs for UploadAttachmentArgs {
    fn validate(&self) -> Result<(), String> {
        require_work_item_id(self.work_item_id)?;
        require_text("fileName", &self.file_name)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateUserArgs {
    pub user_email: String,
}

impl ToolArgs for ValidateUserArgs {
    fn validate(&self) -> Result<(), String> {
        require_text("userEmail", &self.user_email)
    }
}
