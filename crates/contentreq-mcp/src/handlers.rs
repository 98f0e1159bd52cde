//! Tool handlers for the worker.
//!
//! Each handler turns validated arguments into one or more remote calls and
//! shapes the answer into the tool's JSON payload. Remote failures are
//! answered with a marked fallback payload; only local failures surface as
//! `isError` results.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use contentreq_core::config::AzureDevOpsConfig;
use contentreq_core::identity::merge_by_key;
use contentreq_core::mapping::priority_from_urgency;
use contentreq_core::provider::WORK_ITEM_PAGE_LIMIT;
use contentreq_core::{
    ClassificationNode, Error, Iteration, Result, Team, WorkItem, WorkItemDraft, WorkItemUpdate,
    WorkTracker,
};
use serde_json::{json, Value};

use crate::error::DispatchError;
use crate::fallback;
use crate::protocol::{ToolCallResult, ToolDefinition};
use crate::tools::{
    catalog, parse_args, parse_iso_date, AssignContentDeveloperArgs, CreateContentRequestArgs,
    GetAreaPathsArgs, GetIterationsArgs, GetRequestDetailsArgs, GetTeamDashboardArgs,
    GetUserWorkItemsArgs, Tool, UpdateRequestStatusArgs, UploadAttachmentArgs, ValidateUserArgs,
};

const DESCRIPTION_PREVIEW_CHARS: usize = 200;
const SECURITY_AREA_MARKER: &str = "MSec Docs\\Security";
const PROJECT_ITERATION_DEPTH: u32 = 2;
const MAX_SIMILAR_USERS: usize = 5;

/// Settings the handlers need besides the tracker itself.
#[derive(Debug, Clone)]
pub struct HandlerSettings {
    pub organization_url: String,
    pub project: String,
    pub default_team: String,
}

impl From<&AzureDevOpsConfig> for HandlerSettings {
    fn from(config: &AzureDevOpsConfig) -> Self {
        Self {
            organization_url: config.organization_url.trim_end_matches('/').to_string(),
            project: config.project.clone(),
            default_team: config.default_team.clone(),
        }
    }
}

/// Dispatches tool calls to their handlers.
pub struct ToolHandler {
    tracker: Arc<dyn WorkTracker>,
    settings: HandlerSettings,
}

impl ToolHandler {
    pub fn new(tracker: Arc<dyn WorkTracker>, settings: HandlerSettings) -> Self {
        Self { tracker, settings }
    }

    /// Definitions of every registered tool.
    pub fn list_tools(&self) -> Vec<ToolDefinition> {
        catalog()
    }

    /// Validate arguments and run a tool.
    ///
    /// Unknown names and bad arguments fail before any remote call is made.
    /// Everything after that resolves to a `ToolCallResult`.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Option<Value>,
    ) -> std::result::Result<ToolCallResult, DispatchError> {
        let tool = Tool::from_name(name).ok_or_else(|| DispatchError::UnknownTool(name.to_string()))?;

        tracing::info!(tool = name, "Calling tool");

        let outcome = match tool {
            Tool::CreateContentRequest => {
                self.create_content_request(parse_args(tool, arguments)?).await
            }
            Tool::UpdateRequestStatus => self.update_request_status(parse_args(tool, arguments)?).await,
            Tool::AssignContentDeveloper => {
                self.assign_content_developer(parse_args(tool, arguments)?).await
            }
            Tool::GetRequestDetails => self.get_request_details(parse_args(tool, arguments)?).await,
            Tool::GetTeamDashboard => self.get_team_dashboard(parse_args(tool, arguments)?).await,
            Tool::GetUserWorkItems => self.get_user_work_items(parse_args(tool, arguments)?).await,
            Tool::GetAreaPaths => self.get_area_paths(parse_args(tool, arguments)?).await,
            Tool::GetIterations => self.get_iterations(parse_args(tool, arguments)?).await,
            Tool::UploadAttachment => self.upload_attachment(parse_args(tool, arguments)?).await,
            Tool::ValidateUser => self.validate_user(parse_args(tool, arguments)?).await,
        };

        Ok(match outcome {
            Ok(payload) => ToolCallResult::json(&payload),
            Err(e) => {
                tracing::error!(tool = name, error = %e, "Tool failed");
                ToolCallResult::error(format!("{} failed: {}", name, e))
            }
        })
    }

    /// Answer a remote failure with `fallback`, or pass a local error through.
    ///
    /// Fallbacks for mutating tools are flagged `simulated`: nothing changed
    /// remotely and their identifiers are not durable.
    fn recover<F>(&self, tool: Tool, err: Error, fallback: F) -> Result<Value>
    where
        F: FnOnce(&str) -> Value,
    {
        if !err.is_remote_failure() {
            return Err(err);
        }
        let mut payload = fallback(&err.to_string());
        match payload.as_object_mut() {
            Some(object) if tool.is_mutating() => {
                tracing::warn!(
                    tool = tool.name(),
                    error = %err,
                    "Remote call failed, simulating success"
                );
                object.insert(fallback::SIMULATED_KEY.to_string(), Value::Bool(true));
            }
            _ => tracing::warn!(
                tool = tool.name(),
                error = %err,
                "Remote call failed, answering with sample data"
            ),
        }
        Ok(payload)
    }

    // =========================================================================
    // Mutating tools
    // =========================================================================

    async fn create_content_request(&self, args: CreateContentRequestArgs) -> Result<Value> {
        let draft = build_draft(&args);

        match self.tracker.create_work_item(&draft).await {
            Ok(item) => {
                tracing::info!(id = item.id, title = %item.title, "Work item created");
                Ok(json!({
                    "workItemId": item.id,
                    "title": item.title,
                    "state": item.state,
                    "url": item.url,
                    "message": "Content request created and ready for triage",
                }))
            }
            Err(e) => self.recover(Tool::CreateContentRequest, e, |reason| {
                fallback::created(
                    &self.settings.organization_url,
                    &self.settings.project,
                    &draft.title,
                    reason,
                )
            }),
        }
    }

    async fn update_request_status(&self, args: UpdateRequestStatusArgs) -> Result<Value> {
        let update = WorkItemUpdate {
            state: Some(args.status.clone()),
            history: args.comment.clone(),
            ..Default::default()
        };

        match self.tracker.update_work_item(args.work_item_id, &update).await {
            Ok(item) => {
                let mut payload = json!({
                    "workItemId": item.id,
                    "status": item.state,
                    "message": format!("Work item {} status updated to {}", item.id, item.state),
                });
                if let Some(comment) = &args.comment {
                    payload["comment"] = json!(comment);
                }
                Ok(payload)
            }
            Err(e) => self.recover(Tool::UpdateRequestStatus, e, |reason| {
                fallback::status_updated(
                    args.work_item_id,
                    &args.status,
                    args.comment.as_deref(),
                    reason,
                )
            }),
        }
    }

    async fn assign_content_developer(&self, args: AssignContentDeveloperArgs) -> Result<Value> {
        let update = WorkItemUpdate {
            state: Some("Active".to_string()),
            assigned_to: Some(args.assignee.clone()),
            ..Default::default()
        };

        match self.tracker.update_work_item(args.work_item_id, &update).await {
            Ok(item) => Ok(json!({
                "workItemId": item.id,
                "assignee": args.assignee,
                "state": "Active",
                "message": format!(
                    "Work item {} assigned to {} and set to Active",
                    item.id, args.assignee
                ),
            })),
            Err(e) => self.recover(Tool::AssignContentDeveloper, e, |reason| {
                fallback::assigned(args.work_item_id, &args.assignee, reason)
            }),
        }
    }

    async fn upload_attachment(&self, mut args: UploadAttachmentArgs) -> Result<Value> {
        let content = std::mem::take(&mut args.file_content);
        match self.attach_file(&args, content).await {
            Ok(attachment_url) => {
                let mut payload = json!({
                    "workItemId": args.work_item_id,
                    "fileName": args.file_name,
                    "attachmentUrl": attachment_url,
                    "message": format!(
                        "File {} uploaded to work item {}",
                        args.file_name, args.work_item_id
                    ),
                });
                if let Some(comment) = &args.comment {
                    payload["comment"] = json!(comment);
                }
                Ok(payload)
            }
            Err(e) => self.recover(Tool::UploadAttachment, e, |reason| {
                fallback::attachment(
                    &self.settings.organization_url,
                    &self.settings.project,
                    args.work_item_id,
                    &args.file_name,
                    args.comment.as_deref(),
                    reason,
                )
            }),
        }
    }

    async fn attach_file(&self, args: &UploadAttachmentArgs, content: Vec<u8>) -> Result<String> {
        let attachment = self
            .tracker
            .upload_attachment(&args.file_name, content)
            .await?;

        let relation_comment = args
            .comment
            .clone()
            .unwrap_or_else(|| format!("Uploaded file: {}", args.file_name));
        let history = args
            .comment
            .as_ref()
            .map(|comment| format!("File attached: {}. {}", args.file_name, comment));

        self.tracker
            .link_attachment(args.work_item_id, &attachment.url, &relation_comment, history)
            .await?;

        Ok(attachment.url)
    }

    // =========================================================================
    // Read tools
    // =========================================================================

    async fn get_request_details(&self, args: GetRequestDetailsArgs) -> Result<Value> {
        match self.tracker.get_work_item(args.work_item_id).await {
            Ok(item) => Ok(details_payload(&item)),
            Err(e) => self.recover(Tool::GetRequestDetails, e, |reason| {
                fallback::request_details(
                    &self.settings.organization_url,
                    &self.settings.project,
                    args.work_item_id,
                    reason,
                )
            }),
        }
    }

    async fn get_team_dashboard(&self, args: GetTeamDashboardArgs) -> Result<Value> {
        match self.dashboard(&args).await {
            Ok(payload) => Ok(payload),
            Err(e) => self.recover(Tool::GetTeamDashboard, e, |reason| {
                fallback::dashboard(&self.settings.organization_url, &self.settings.project, reason)
            }),
        }
    }

    async fn dashboard(&self, args: &GetTeamDashboardArgs) -> Result<Value> {
        let projects = self.tracker.list_projects().await?;
        let filters = json!({
            "assignee": args.assignee,
            "status": args.status,
            "productArea": args.product_area,
        });

        let Some(project) = projects.iter().find(|p| p.name == self.settings.project) else {
            tracing::warn!(project = %self.settings.project, "Configured project not found");
            return Ok(json!({
                "connectionStatus": "project-missing",
                "organization": self.settings.organization_url,
                "project": self.settings.project,
                "availableProjects": projects.iter().map(|p| p.name.as_str()).collect::<Vec<_>>(),
                "filters": filters,
            }));
        };

        let work_item_types = match self.tracker.list_work_item_types().await {
            Ok(types) => types,
            Err(e) => {
                tracing::warn!(error = %e, "Could not list work item types");
                Vec::new()
            }
        };

        Ok(json!({
            "connectionStatus": "connected",
            "organization": self.settings.organization_url,
            "project": {
                "id": project.id,
                "name": project.name,
                "url": project.url,
                "description": project.description,
            },
            "workItemTypes": work_item_types,
            "filters": filters,
        }))
    }

    async fn get_user_work_items(&self, args: GetUserWorkItemsArgs) -> Result<Value> {
        let states = args.states();

        let ids = match self
            .tracker
            .query_assigned_ids(&args.user_email, &states)
            .await
        {
            Ok(ids) => ids,
            Err(e) => {
                return self.recover(Tool::GetUserWorkItems, e, |reason| {
                    fallback::user_work_items(
                        &self.settings.organization_url,
                        &self.settings.project,
                        &args.user_email,
                        &states,
                        reason,
                    )
                })
            }
        };

        let items = self.fetch_work_items_batched(&ids).await;
        tracing::debug!(
            user = %args.user_email,
            matched = ids.len(),
            fetched = items.len(),
            "Fetched user work items"
        );

        Ok(user_work_items_payload(&args.user_email, &states, &items))
    }

    /// Fetch items in batches within the page limit.
    ///
    /// Duplicate ids are fetched once. A failing batch is logged and skipped.
    pub(crate) async fn fetch_work_items_batched(&self, ids: &[u64]) -> Vec<WorkItem> {
        let mut seen = HashSet::new();
        let unique: Vec<u64> = ids.iter().copied().filter(|id| seen.insert(*id)).collect();

        let mut batches = Vec::new();
        for chunk in unique.chunks(WORK_ITEM_PAGE_LIMIT) {
            match self.tracker.get_work_items_batch(chunk).await {
                Ok(items) => batches.push(items),
                Err(e) => {
                    tracing::warn!(batch_size = chunk.len(), error = %e, "Skipping failed work item batch")
                }
            }
        }

        merge_by_key(batches, |item| item.id)
    }

    async fn get_area_paths(&self, args: GetAreaPathsArgs) -> Result<Value> {
        match self.tracker.get_area_tree(args.depth()).await {
            Ok(tree) => {
                let paths = area_paths(&tree);
                let note = if paths.is_empty() {
                    "No area paths found. Check the project configuration."
                } else {
                    "Area paths retrieved successfully"
                };
                Ok(json!({
                    "areaPaths": paths,
                    "total": paths.len(),
                    "note": note,
                }))
            }
            Err(e) => self.recover(Tool::GetAreaPaths, e, fallback::area_paths),
        }
    }

    async fn get_iterations(&self, args: GetIterationsArgs) -> Result<Value> {
        let team_name = args
            .team_name
            .clone()
            .unwrap_or_else(|| self.settings.default_team.clone());
        let include_current_and_future = args.include_current_and_future();

        match self.load_iterations(&team_name, include_current_and_future).await {
            Ok(iterations) => {
                let note = if iterations.is_empty() {
                    "No iterations found. Check team configuration."
                } else {
                    "Iterations retrieved successfully"
                };
                Ok(json!({
                    "iterations": iterations,
                    "total": iterations.len(),
                    "teamName": team_name,
                    "includeCurrentAndFuture": include_current_and_future,
                    "note": note,
                }))
            }
            Err(e) => self.recover(Tool::GetIterations, e, |reason| {
                fallback::iterations(&team_name, include_current_and_future, reason)
            }),
        }
    }

    async fn load_iterations(&self, team_name: &str, include_current_and_future: bool) -> Result<Vec<Value>> {
        let team = match self.tracker.list_teams().await {
            Ok(teams) => resolve_team(&teams, team_name).cloned(),
            Err(e) => {
                tracing::warn!(error = %e, "Could not list teams, using project iterations");
                None
            }
        };

        match team {
            Some(team) => {
                tracing::debug!(team = %team.name, "Listing team iterations");
                let iterations = self.tracker.get_team_iterations(&team.id).await?;
                let today = Utc::now().date_naive();
                Ok(team_iteration_views(&iterations, include_current_and_future, today))
            }
            None => {
                let tree = self.tracker.get_iteration_tree(PROJECT_ITERATION_DEPTH).await?;
                Ok(project_iteration_views(&tree))
            }
        }
    }

    async fn validate_user(&self, args: ValidateUserArgs) -> Result<Value> {
        let email = args.user_email.trim();
        match self.tracker.search_identities(email).await {
            Ok(users) => {
                if let Some(user) = users.iter().find(|u| u.matches_exactly(email)) {
                    return Ok(json!({
                        "valid": true,
                        "user": {
                            "email": user.mail_address,
                            "displayName": user.display_name,
                            "principalName": user.principal_name,
                            "id": user.origin_id,
                        },
                        "similarUsers": [],
                        "message": "User found and valid for assignment",
                    }));
                }

                let similar: Vec<Value> = users
                    .iter()
                    .filter(|u| u.resembles(email))
                    .take(MAX_SIMILAR_USERS)
                    .map(|u| {
                        json!({
                            "email": u.mail_address,
                            "displayName": u.display_name,
                            "principalName": u.principal_name,
                        })
                    })
                    .collect();
                let message = if similar.is_empty() {
                    "User not found in the organization"
                } else {
                    "User not found exactly, but similar users exist"
                };
                Ok(json!({
                    "valid": false,
                    "user": null,
                    "similarUsers": similar,
                    "message": message,
                }))
            }
            Err(e) => self.recover(Tool::ValidateUser, e, |reason| {
                fallback::validated_user(email, reason)
            }),
        }
    }
}

// =============================================================================
// Payload shaping
// =============================================================================

fn build_draft(args: &CreateContentRequestArgs) -> WorkItemDraft {
    let mut lines = vec![
        args.description.clone(),
        String::new(),
        format!("Product Area: {}", args.product_area),
        format!("Document Type: {}", args.document_type),
        format!("Business Justification: {}", args.business_justification),
        format!("Urgency: {}", args.urgency),
        format!("Requestor: {}", args.requestor_email),
        format!("Reviewers: {}", args.reviewers.join(", ")),
    ];
    if let Some(deadline) = &args.deadline {
        lines.push(format!("Deadline: {}", deadline));
    }
    if !args.existing_content_links.is_empty() {
        lines.push(format!(
            "Existing Content Links: {}",
            args.existing_content_links.join(", ")
        ));
    }

    WorkItemDraft {
        title: format!("[{}] {}", args.product_area, args.title),
        description: lines.join("\n"),
        priority: priority_from_urgency(&args.urgency),
        assigned_to: args
            .content_developer
            .clone()
            .filter(|dev| !dev.trim().is_empty()),
        due_date: args.deadline.clone(),
    }
}

fn details_payload(item: &WorkItem) -> Value {
    json!({
        "id": item.id,
        "title": item.title,
        "description": item.description,
        "status": item.state,
        "assignedTo": item.assigned_to.as_deref().unwrap_or("Unassigned"),
        "createdBy": item.created_by,
        "createdDate": item.created_date,
        "tags": item.tags,
        "priority": item.priority,
        "dueDate": item.due_date,
        "areaPath": item.area_path,
        "iterationPath": item.iteration_path,
        "url": item.url,
    })
}

fn description_preview(description: Option<&str>) -> String {
    let description = description.unwrap_or_default();
    if description.chars().count() > DESCRIPTION_PREVIEW_CHARS {
        let preview: String = description.chars().take(DESCRIPTION_PREVIEW_CHARS).collect();
        format!("{}...", preview)
    } else {
        description.to_string()
    }
}

fn user_work_items_payload(user_email: &str, states: &[String], items: &[WorkItem]) -> Value {
    let work_items: Vec<Value> = items
        .iter()
        .map(|item| {
            json!({
                "id": item.id,
                "title": item.title,
                "state": item.state,
                "workItemType": item.work_item_type,
                "teamProject": item.team_project,
                "assignedTo": item.assigned_to.as_deref().unwrap_or("Unassigned"),
                "createdDate": item.created_date,
                "changedDate": item.changed_date,
                "priority": item.priority,
                "dueDate": item.due_date,
                "iterationPath": item.iteration_path,
                "areaPath": item.area_path,
                "url": item.url,
                "description": description_preview(item.description.as_deref()),
            })
        })
        .collect();

    let by_state: BTreeMap<&str, usize> = states
        .iter()
        .map(|state| {
            let count = items.iter().filter(|item| &item.state == state).count();
            (state.as_str(), count)
        })
        .collect();
    let by_priority: BTreeMap<String, usize> = (1..=4u8)
        .map(|priority| {
            let count = items
                .iter()
                .filter(|item| item.priority == Some(priority))
                .count();
            (format!("Priority {}", priority), count)
        })
        .collect();

    let mut payload = json!({
        "userEmail": user_email,
        "totalCount": work_items.len(),
        "queriedStates": states,
        "workItems": work_items,
        "summary": {
            "byState": by_state,
            "byPriority": by_priority,
        },
    });
    if items.is_empty() {
        payload["message"] =
            json!("No work items found assigned to this user with the specified states");
    }
    payload
}

/// Area paths under the security docs node, or every path when none match.
pub fn area_paths(tree: &ClassificationNode) -> Vec<String> {
    let mut all = Vec::new();
    tree.walk(&mut |_, path| all.push(path.to_string()));

    let preferred: Vec<String> = all
        .iter()
        .filter(|path| path.contains(SECURITY_AREA_MARKER))
        .cloned()
        .collect();
    if preferred.is_empty() {
        all
    } else {
        preferred
    }
}

/// Team to list iterations for: exact name, then a content or default team,
/// then the first team.
pub fn resolve_team<'a>(teams: &'a [Team], wanted: &str) -> Option<&'a Team> {
    teams
        .iter()
        .find(|t| t.name == wanted)
        .or_else(|| {
            teams
                .iter()
                .find(|t| t.name.contains("Content") || t.name.contains("Default"))
        })
        .or_else(|| teams.first())
}

/// `past`, `current` or `future` relative to `today`.
pub fn iteration_state(
    start: Option<NaiveDate>,
    finish: Option<NaiveDate>,
    today: NaiveDate,
) -> &'static str {
    match (start, finish) {
        (_, Some(finish)) if finish < today => "past",
        (Some(start), Some(_)) if start <= today => "current",
        _ => "future",
    }
}

pub fn team_iteration_views(
    iterations: &[Iteration],
    include_current_and_future: bool,
    today: NaiveDate,
) -> Vec<Value> {
    iterations
        .iter()
        .filter_map(|iteration| {
            let start = iteration.start_date.as_deref().and_then(parse_iso_date);
            let finish = iteration.finish_date.as_deref().and_then(parse_iso_date);
            let state = iteration_state(start, finish, today);
            if include_current_and_future && state == "past" {
                return None;
            }
            Some(json!({
                "id": iteration.id,
                "name": iteration.name,
                "path": iteration.path,
                "startDate": start.map(|d| d.to_string()),
                "finishDate": finish.map(|d| d.to_string()),
                "state": state,
            }))
        })
        .collect()
}

/// Iteration nodes below the project root; dates are not interpreted.
pub fn project_iteration_views(tree: &ClassificationNode) -> Vec<Value> {
    let mut views = Vec::new();
    for child in &tree.children {
        child.walk(&mut |node, path| {
            let attributes = node.attributes.as_ref();
            views.push(json!({
                "id": node.id,
                "name": node.name,
                "path": path,
                "startDate": attributes.and_then(|a| a.start_date.clone()),
                "finishDate": attributes.and_then(|a| a.finish_date.clone()),
                "state": "unknown",
            }));
        });
    }
    views
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fallback::is_fallback;
    use contentreq_core::{AttachmentRef, Identity, MockWorkTracker, NodeAttributes, ProjectSummary};
    use mockall::predicate::eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn settings() -> HandlerSettings {
        HandlerSettings::from(&AzureDevOpsConfig::default())
    }

    fn handler(mock: MockWorkTracker) -> ToolHandler {
        ToolHandler::new(Arc::new(mock), settings())
    }

    fn item(id: u64, state: &str) -> WorkItem {
        WorkItem {
            id,
            title: format!("Item {}", id),
            state: state.to_string(),
            priority: Some(2),
            url: format!("https://dev.azure.com/msft-skilling/Content/_workitems/edit/{}", id),
            ..Default::default()
        }
    }

    fn unreachable() -> Error {
        Error::Http("connection refused".to_string())
    }

    async fn payload(handler: &ToolHandler, name: &str, args: Value) -> Value {
        let result = handler.call_tool(name, Some(args)).await.unwrap();
        assert!(!result.is_error(), "unexpected error result: {:?}", result);
        result.payload()
    }

    fn create_args() -> Value {
        json!({
            "productArea": "Security",
            "documentType": "How-to",
            "title": "Rotate keys",
            "description": "Explain key rotation",
            "businessJustification": "Customer asks",
            "urgency": "Critical",
            "requestorEmail": "req@example.com",
            "reviewers": ["r1@example.com", "r2@example.com"],
            "deadline": "2025-06-30"
        })
    }

    #[test]
    fn test_list_tools_matches_catalog() {
        let handler = handler(MockWorkTracker::new());
        let names: Vec<_> = handler.list_tools().into_iter().map(|t| t.name).collect();
        assert!(names.contains(&"create_content_request".to_string()));
        assert!(!names.contains(&"delete_work_item".to_string()));
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let handler = handler(MockWorkTracker::new());
        let err = handler.call_tool("delete_work_item", None).await.unwrap_err();
        assert_eq!(err, DispatchError::UnknownTool("delete_work_item".to_string()));
    }

    #[tokio::test]
    async fn test_invalid_arguments_never_reach_tracker() {
        // No expectations: any tracker call would panic.
        let handler = handler(MockWorkTracker::new());
        let mut args = create_args();
        args["urgency"] = json!("Whenever");

        let err = handler
            .call_tool("create_content_request", Some(args))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::InvalidArguments { .. }));
    }

    #[tokio::test]
    async fn test_create_content_request() {
        let mut mock = MockWorkTracker::new();
        mock.expect_create_work_item()
            .withf(|draft| {
                draft.title == "[Security] Rotate keys"
                    && draft.priority == 1
                    && draft.due_date.as_deref() == Some("2025-06-30")
                    && draft.assigned_to.is_none()
                    && draft.description.contains("Reviewers: r1@example.com, r2@example.com")
                    && draft.description.contains("Deadline: 2025-06-30")
            })
            .times(1)
            .returning(|draft| {
                Ok(WorkItem {
                    title: draft.title.clone(),
                    ..item(4242, "New")
                })
            });

        let payload = payload(&handler(mock), "create_content_request", create_args()).await;
        assert_eq!(payload["workItemId"], 4242);
        assert_eq!(payload["title"], "[Security] Rotate keys");
        assert_eq!(payload["state"], "New");
        assert!(!is_fallback(&payload));
    }

    #[tokio::test]
    async fn test_create_falls_back_when_remote_unreachable() {
        let mut mock = MockWorkTracker::new();
        mock.expect_create_work_item()
            .times(1)
            .returning(|_| Err(unreachable()));

        let payload = payload(&handler(mock), "create_content_request", create_args()).await;
        assert!(is_fallback(&payload));
        assert_eq!(payload[fallback::SIMULATED_KEY], true);
        let id = payload["workItemId"].as_u64().unwrap();
        assert!((1000..11_000).contains(&id));
        assert!(payload["note"]
            .as_str()
            .unwrap()
            .contains("connection refused"));
    }

    #[tokio::test]
    async fn test_local_error_is_error_result() {
        let mut mock = MockWorkTracker::new();
        mock.expect_get_work_item()
            .returning(|_| Err(Error::Config("missing token".to_string())));

        let result = handler(mock)
            .call_tool("get_request_details", Some(json!({"workItemId": 7})))
            .await
            .unwrap();
        assert!(result.is_error());
        assert!(result.text_content().contains("missing token"));
    }

    #[tokio::test]
    async fn test_update_request_status() {
        let mut mock = MockWorkTracker::new();
        mock.expect_update_work_item()
            .with(
                eq(12),
                eq(WorkItemUpdate {
                    state: Some("Resolved".to_string()),
                    assigned_to: None,
                    history: Some("done".to_string()),
                }),
            )
            .times(1)
            .returning(|id, _| Ok(item(id, "Resolved")));

        let payload = payload(
            &handler(mock),
            "update_request_status",
            json!({"workItemId": 12, "status": "Resolved", "comment": "done"}),
        )
        .await;
        assert_eq!(payload["status"], "Resolved");
        assert_eq!(payload["comment"], "done");
        assert!(payload.get("fallback").is_none());
    }

    #[tokio::test]
    async fn test_assign_sets_active() {
        let mut mock = MockWorkTracker::new();
        mock.expect_update_work_item()
            .withf(|id, update| {
                *id == 5
                    && update.state.as_deref() == Some("Active")
                    && update.assigned_to.as_deref() == Some("dev@example.com")
            })
            .returning(|id, _| Ok(item(id, "Active")));

        let payload = payload(
            &handler(mock),
            "assign_content_developer",
            json!({"workItemId": 5, "assignee": "dev@example.com"}),
        )
        .await;
        assert_eq!(payload["state"], "Active");
        assert_eq!(payload["assignee"], "dev@example.com");
    }

    #[tokio::test]
    async fn test_assign_falls_back() {
        let mut mock = MockWorkTracker::new();
        mock.expect_update_work_item()
            .returning(|_, _| Err(Error::ServerError { status: 503, message: "down".into() }));

        let payload = payload(
            &handler(mock),
            "assign_content_developer",
            json!({"workItemId": 5, "assignee": "dev@example.com"}),
        )
        .await;
        assert!(is_fallback(&payload));
        assert_eq!(payload["workItemId"], 5);
    }

    #[tokio::test]
    async fn test_request_details() {
        let mut mock = MockWorkTracker::new();
        mock.expect_get_work_item().with(eq(9)).returning(|id| {
            Ok(WorkItem {
                description: Some("<p>Body</p>".to_string()),
                ..item(id, "Active")
            })
        });

        let payload = payload(&handler(mock), "get_request_details", json!({"workItemId": 9})).await;
        assert_eq!(payload["id"], 9);
        assert_eq!(payload["status"], "Active");
        assert_eq!(payload["assignedTo"], "Unassigned");
        assert_eq!(payload["priority"], 2);
    }

    #[tokio::test]
    async fn test_user_work_items_empty() {
        let mut mock = MockWorkTracker::new();
        mock.expect_query_assigned_ids()
            .withf(|email, states| email == "a@b.com" && states == ["New", "Active"])
            .returning(|_, _| Ok(vec![]));
        mock.expect_get_work_items_batch().never();

        let payload = payload(
            &handler(mock),
            "get_user_work_items",
            json!({"userEmail": "a@b.com", "includeStates": ["New", "Active"]}),
        )
        .await;
        assert_eq!(payload["totalCount"], 0);
        assert_eq!(payload["workItems"], json!([]));
        assert!(!is_fallback(&payload));
    }

    #[tokio::test]
    async fn test_user_work_items_summary_and_truncation() {
        let mut mock = MockWorkTracker::new();
        mock.expect_query_assigned_ids()
            .returning(|_, _| Ok(vec![1, 2, 2]));
        mock.expect_get_work_items_batch()
            .withf(|ids| ids == [1, 2])
            .times(1)
            .returning(|_| {
                Ok(vec![
                    WorkItem {
                        description: Some("x".repeat(250)),
                        ..item(1, "New")
                    },
                    item(2, "Active"),
                ])
            });

        let payload = payload(
            &handler(mock),
            "get_user_work_items",
            json!({"userEmail": "a@b.com"}),
        )
        .await;
        assert_eq!(payload["totalCount"], 2);
        assert_eq!(payload["queriedStates"], json!(["New", "Active", "Resolved"]));
        assert_eq!(payload["summary"]["byState"]["New"], 1);
        assert_eq!(payload["summary"]["byState"]["Resolved"], 0);
        assert_eq!(payload["summary"]["byPriority"]["Priority 2"], 2);
        let description = payload["workItems"][0]["description"].as_str().unwrap();
        assert_eq!(description.len(), 203);
        assert!(description.ends_with("..."));
    }

    #[tokio::test]
    async fn test_batches_are_chunked_and_failures_skipped() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let mut mock = MockWorkTracker::new();
        mock.expect_get_work_items_batch().returning(move |ids| {
            assert!(ids.len() <= WORK_ITEM_PAGE_LIMIT);
            if counter.fetch_add(1, Ordering::SeqCst) == 1 {
                return Err(Error::ServerError { status: 500, message: "boom".into() });
            }
            Ok(ids.iter().map(|id| item(*id, "Active")).collect())
        });

        let handler = handler(mock);
        let ids: Vec<u64> = (1..=450).collect();
        let items = handler.fetch_work_items_batched(&ids).await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // Second batch (201..=400) failed.
        assert_eq!(items.len(), 250);
        let unique: HashSet<u64> = items.iter().map(|i| i.id).collect();
        assert_eq!(unique.len(), items.len());
    }

    #[tokio::test]
    async fn test_batches_all_succeed() {
        let mut mock = MockWorkTracker::new();
        mock.expect_get_work_items_batch()
            .times(3)
            .returning(|ids| Ok(ids.iter().map(|id| item(*id, "New")).collect()));

        let ids: Vec<u64> = (1..=401).collect();
        let items = handler(mock).fetch_work_items_batched(&ids).await;
        assert_eq!(items.len(), 401);
    }

    #[tokio::test]
    async fn test_user_work_items_fallback() {
        let mut mock = MockWorkTracker::new();
        mock.expect_query_assigned_ids()
            .returning(|_, _| Err(unreachable()));

        let payload = payload(
            &handler(mock),
            "get_user_work_items",
            json!({"userEmail": "a@b.com"}),
        )
        .await;
        assert!(is_fallback(&payload));
        assert!(payload["workItems"].as_array().unwrap().len() > 0);
    }

    fn area_tree() -> ClassificationNode {
        ClassificationNode {
            name: "Content".to_string(),
            children: vec![ClassificationNode {
                name: "Production".to_string(),
                children: vec![
                    ClassificationNode {
                        name: "MSec Docs".to_string(),
                        children: vec![ClassificationNode {
                            name: "Security".to_string(),
                            children: vec![ClassificationNode {
                                name: "Identity".to_string(),
                                ..Default::default()
                            }],
                            ..Default::default()
                        }],
                        ..Default::default()
                    },
                    ClassificationNode {
                        name: "Azure".to_string(),
                        ..Default::default()
                    },
                ],
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_area_paths_prefers_security_subtree() {
        assert_eq!(
            area_paths(&area_tree()),
            vec![
                "Content\\Production\\MSec Docs\\Security",
                "Content\\Production\\MSec Docs\\Security\\Identity",
            ]
        );
    }

    #[test]
    fn test_area_paths_without_security_returns_all() {
        let tree = ClassificationNode {
            name: "Content".to_string(),
            children: vec![ClassificationNode {
                name: "Azure".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        };
        assert_eq!(area_paths(&tree), vec!["Content", "Content\\Azure"]);
    }

    #[tokio::test]
    async fn test_area_paths_are_stable_across_calls() {
        let mut mock = MockWorkTracker::new();
        mock.expect_get_area_tree()
            .with(eq(5))
            .times(2)
            .returning(|_| Ok(area_tree()));

        let handler = handler(mock);
        let first = payload(&handler, "get_area_paths", json!({})).await;
        let second = payload(&handler, "get_area_paths", json!({})).await;
        assert_eq!(first, second);
        assert_eq!(first["total"], 2);
    }

    #[tokio::test]
    async fn test_area_paths_fallback() {
        let mut mock = MockWorkTracker::new();
        mock.expect_get_area_tree().returning(|_| Err(unreachable()));

        let payload = payload(&handler(mock), "get_area_paths", json!({"depth": 3})).await;
        assert!(is_fallback(&payload));
        assert!(payload.get(fallback::SIMULATED_KEY).is_none());
        assert_eq!(payload["total"], 5);
    }

    fn team(id: &str, name: &str) -> Team {
        Team {
            id: id.to_string(),
            name: name.to_string(),
        }
    }

    #[test]
    fn test_resolve_team() {
        let teams = vec![team("1", "Alpha"), team("2", "Content Writers"), team("3", "Content Team")];
        assert_eq!(resolve_team(&teams, "Content Team").unwrap().id, "3");
        assert_eq!(resolve_team(&teams, "Missing").unwrap().id, "2");

        let teams = vec![team("1", "Alpha"), team("2", "Beta")];
        assert_eq!(resolve_team(&teams, "Missing").unwrap().id, "1");
        assert!(resolve_team(&[], "Missing").is_none());
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_iteration_state() {
        let today = date("2025-02-01");
        assert_eq!(iteration_state(Some(date("2025-01-01")), Some(date("2025-01-15")), today), "past");
        assert_eq!(iteration_state(Some(date("2025-01-20")), Some(date("2025-02-05")), today), "current");
        assert_eq!(iteration_state(Some(date("2025-03-01")), Some(date("2025-03-15")), today), "future");
        assert_eq!(iteration_state(None, None, today), "future");
    }

    #[test]
    fn test_team_iteration_views_filter_past() {
        let iterations = vec![
            Iteration {
                id: "a".into(),
                name: "Sprint 1".into(),
                path: "Content\\Sprint 1".into(),
                start_date: Some("2025-01-01T00:00:00Z".into()),
                finish_date: Some("2025-01-15T00:00:00Z".into()),
            },
            Iteration {
                id: "b".into(),
                name: "Sprint 2".into(),
                path: "Content\\Sprint 2".into(),
                start_date: Some("2025-01-20T00:00:00Z".into()),
                finish_date: Some("2025-02-05T00:00:00Z".into()),
            },
        ];
        let today = date("2025-02-01");

        let views = team_iteration_views(&iterations, true, today);
        assert_eq!(views.len(), 1);
        assert_eq!(views[0]["state"], "current");
        assert_eq!(views[0]["startDate"], "2025-01-20");

        let views = team_iteration_views(&iterations, false, today);
        assert_eq!(views.len(), 2);
        assert_eq!(views[0]["state"], "past");
    }

    #[tokio::test]
    async fn test_iterations_without_teams_use_project_tree() {
        let mut mock = MockWorkTracker::new();
        mock.expect_list_teams().returning(|| Ok(vec![]));
        mock.expect_get_iteration_tree().with(eq(2)).returning(|_| {
            Ok(ClassificationNode {
                name: "Content".to_string(),
                children: vec![ClassificationNode {
                    id: Some(11),
                    name: "Sprint 1".to_string(),
                    attributes: Some(NodeAttributes {
                        start_date: Some("2025-01-01T00:00:00Z".to_string()),
                        finish_date: None,
                    }),
                    children: vec![],
                }],
                ..Default::default()
            })
        });

        let payload = payload(&handler(mock), "get_iterations", json!({})).await;
        assert_eq!(payload["teamName"], "Content Team");
        assert_eq!(payload["total"], 1);
        assert_eq!(payload["iterations"][0]["path"], "Sprint 1");
        assert_eq!(payload["iterations"][0]["state"], "unknown");
    }

    #[tokio::test]
    async fn test_iterations_for_named_team() {
        let mut mock = MockWorkTracker::new();
        mock.expect_list_teams()
            .returning(|| Ok(vec![team("t-1", "Docs"), team("t-2", "Content Team")]));
        mock.expect_get_team_iterations()
            .withf(|id| id == "t-1")
            .returning(|_| {
                Ok(vec![Iteration {
                    id: "i".into(),
                    name: "Future".into(),
                    path: "Content\\Future".into(),
                    start_date: Some("2999-01-01".into()),
                    finish_date: Some("2999-01-14".into()),
                }])
            });

        let payload = payload(&handler(mock), "get_iterations", json!({"teamName": "Docs"})).await;
        assert_eq!(payload["teamName"], "Docs");
        assert_eq!(payload["iterations"][0]["state"], "future");
    }

    #[tokio::test]
    async fn test_iterations_fallback() {
        let mut mock = MockWorkTracker::new();
        mock.expect_list_teams().returning(|| Err(unreachable()));
        mock.expect_get_iteration_tree().returning(|_| Err(unreachable()));

        let payload = payload(&handler(mock), "get_iterations", json!({})).await;
        assert!(is_fallback(&payload));
        assert_eq!(payload["total"], 3);
    }

    #[tokio::test]
    async fn test_upload_attachment() {
        let mut mock = MockWorkTracker::new();
        mock.expect_upload_attachment()
            .withf(|name, content| name == "notes.txt" && content == b"hello")
            .returning(|_, _| {
                Ok(AttachmentRef {
                    id: "att-1".into(),
                    url: "https://dev.azure.com/org/_apis/wit/attachments/att-1".into(),
                })
            });
        mock.expect_link_attachment()
            .withf(|id, url, comment, history| {
                *id == 3
                    && url.ends_with("att-1")
                    && comment == "draft"
                    && history.as_deref() == Some("File attached: notes.txt. draft")
            })
            .times(1)
            .returning(|_, _, _, _| Ok(()));

        let payload = payload(
            &handler(mock),
            "upload_attachment",
            json!({"workItemId": 3, "fileName": "notes.txt", "fileContent": "aGVsbG8=", "comment": "draft"}),
        )
        .await;
        assert!(payload["attachmentUrl"].as_str().unwrap().ends_with("att-1"));
        assert_eq!(payload["comment"], "draft");
    }

    #[tokio::test]
    async fn test_upload_link_failure_falls_back() {
        let mut mock = MockWorkTracker::new();
        mock.expect_upload_attachment().returning(|_, _| {
            Ok(AttachmentRef {
                id: "att-1".into(),
                url: "https://x/att-1".into(),
            })
        });
        mock.expect_link_attachment()
            .returning(|_, _, _, _| Err(Error::NotFound("work item".into())));

        let payload = payload(
            &handler(mock),
            "upload_attachment",
            json!({"workItemId": 3, "fileName": "a.txt", "fileContent": "aGVsbG8="}),
        )
        .await;
        assert!(is_fallback(&payload));
    }

    fn identity(mail: &str, name: &str) -> Identity {
        Identity {
            display_name: Some(name.to_string()),
            mail_address: Some(mail.to_string()),
            principal_name: Some(mail.to_string()),
            origin_id: Some(format!("origin-{}", name)),
        }
    }

    #[tokio::test]
    async fn test_validate_user_exact_match() {
        let mut mock = MockWorkTracker::new();
        mock.expect_search_identities()
            .returning(|_| Ok(vec![identity("jane@microsoft.com", "Jane")]));

        let payload = payload(
            &handler(mock),
            "validate_user",
            json!({"userEmail": "jane@microsoft.com"}),
        )
        .await;
        assert_eq!(payload["valid"], true);
        assert_eq!(payload["user"]["id"], "origin-Jane");
    }

    #[tokio::test]
    async fn test_validate_user_similar_capped() {
        let mut mock = MockWorkTracker::new();
        mock.expect_search_identities().returning(|_| {
            Ok((0..8)
                .map(|i| identity(&format!("jane{}@microsoft.com", i), "Jane"))
                .collect())
        });

        let payload = payload(&handler(mock), "validate_user", json!({"userEmail": "jane"})).await;
        assert_eq!(payload["valid"], false);
        assert_eq!(payload["similarUsers"].as_array().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_validate_user_fallback_uses_heuristics() {
        let mut mock = MockWorkTracker::new();
        mock.expect_search_identities()
            .returning(|_| Err(unreachable()));

        let payload = payload(
            &handler(mock),
            "validate_user",
            json!({"userEmail": "nobody@nowhere.test"}),
        )
        .await;
        assert!(is_fallback(&payload));
        assert_eq!(payload["valid"], false);
    }

    #[tokio::test]
    async fn test_dashboard_connected() {
        let mut mock = MockWorkTracker::new();
        mock.expect_list_projects().returning(|| {
            Ok(vec![ProjectSummary {
                id: "p-1".into(),
                name: "Content".into(),
                url: None,
                description: None,
            }])
        });
        mock.expect_list_work_item_types()
            .returning(|| Ok(vec!["Bug".into(), "User Story".into()]));

        let payload = payload(&handler(mock), "get_team_dashboard", json!({})).await;
        assert_eq!(payload["connectionStatus"], "connected");
        assert_eq!(payload["workItemTypes"], json!(["Bug", "User Story"]));
    }

    #[tokio::test]
    async fn test_dashboard_project_missing() {
        let mut mock = MockWorkTracker::new();
        mock.expect_list_projects().returning(|| {
            Ok(vec![ProjectSummary {
                id: "p-2".into(),
                name: "Other".into(),
                url: None,
                description: None,
            }])
        });
        mock.expect_list_work_item_types().never();

        let payload = payload(&handler(mock), "get_team_dashboard", json!({})).await;
        assert_eq!(payload["connectionStatus"], "project-missing");
        assert_eq!(payload["availableProjects"], json!(["Other"]));
    }

    #[tokio::test]
    async fn test_dashboard_unreachable() {
        let mut mock = MockWorkTracker::new();
        mock.expect_list_projects().returning(|| Err(unreachable()));

        let payload = payload(&handler(mock), "get_team_dashboard", json!({})).await;
        assert_eq!(payload["connectionStatus"], "unreachable");
        assert!(is_fallback(&payload));
    }
}
