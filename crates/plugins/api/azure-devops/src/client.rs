//! Azure DevOps REST API client implementation.
//!
//! Authenticates with a personal access token sent as HTTP Basic auth with
//! an empty user name. All calls target API version 7.0 except the graph user
//! directory, which is only available as a preview.

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use contentreq_core::config::AzureDevOpsConfig;
use contentreq_core::provider::WORK_ITEM_PAGE_LIMIT;
use contentreq_core::{
    AttachmentRef, ClassificationNode, Error, Identity, Iteration, NodeAttributes, ProjectSummary,
    Result, Team, WorkItem, WorkItemDraft, WorkItemUpdate, WorkTracker,
};
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::types::{
    AdoAttachment, AdoClassificationNode, AdoGraphUser, AdoIteration, AdoList, AdoProject,
    AdoRelation, AdoTeam, AdoWorkItem, AdoWorkItemType, PatchOperation, RelationAttributes,
    WiqlQuery, WiqlResult,
};

const API_VERSION: &str = "7.0";
const GRAPH_API_VERSION: &str = "7.0-preview.1";
const JSON_PATCH: &str = "application/json-patch+json";
const OCTET_STREAM: &str = "application/octet-stream";

/// Azure DevOps API client bound to one organization and project.
pub struct AdoClient {
    base_url: String,
    project: String,
    work_item_type: String,
    auth_header: String,
    client: reqwest::Client,
}

impl AdoClient {
    /// Create a client for `organization_url` with default settings.
    pub fn new(
        organization_url: impl Into<String>,
        project: impl Into<String>,
        token: &str,
    ) -> Result<Self> {
        let defaults = AzureDevOpsConfig::default();
        Self::build(
            organization_url.into(),
            project.into(),
            defaults.work_item_type,
            token,
            Duration::from_secs(defaults.request_timeout_secs),
        )
    }

    /// Create a client from the `[azure_devops]` config section.
    pub fn from_config(config: &AzureDevOpsConfig, token: &str) -> Result<Self> {
        Self::build(
            config.organization_url.clone(),
            config.project.clone(),
            config.work_item_type.clone(),
            token,
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    fn build(
        organization_url: String,
        project: String,
        work_item_type: String,
        token: &str,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("contentreq")
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Http(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            base_url: organization_url.trim_end_matches('/').to_string(),
            project,
            work_item_type,
            auth_header: basic_auth(token),
            client,
        })
    }


    /// Build request with auth header.
    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        debug!(method = %method, url = %url, "Azure DevOps request");
        self.client
            .request(method, url)
            .header(AUTHORIZATION, &self.auth_header)
            .header(ACCEPT, "application/json")
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T> {
        let builder = self
            .request(Method::GET, path)
            .query(&[("api-version", API_VERSION)])
            .query(query);
        self.send(builder).await
    }

    async fn patch_document<T: DeserializeOwned>(
        &self,
        path: &str,
        operations: &[PatchOperation],
    ) -> Result<T> {
        let body = serde_json::to_vec(operations)?;
        let builder = self
            .request(Method::PATCH, path)
            .query(&[("api-version", API_VERSION)])
            .header(CONTENT_TYPE, JSON_PATCH)
            .body(body);
        self.send(builder).await
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T> {
        let response = builder
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        self.handle_response(response).await
    }

    /// Handle response and map errors.
    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let status = response.status();

        if !status.is_success() {
            let status_code = status.as_u16();
            let message = response.text().await.unwrap_or_default();
            warn!(
                status = status_code,
                message = message,
                "Azure DevOps API error response"
            );
            return Err(Error::from_status(status_code, message));
        }

        response
            .json()
            .await
            .map_err(|e| Error::InvalidData(format!("Failed to parse response: {}", e)))
    }

    fn work_item_path(&self, id: u64) -> String {
        format!("/{}/_apis/wit/workitems/{}", self.project, id)
    }

    fn map_work_item(&self, item: AdoWorkItem) -> WorkItem {
        map_work_item(item, &self.base_url, &self.project)
    }
}

#[async_trait]
impl WorkTracker for AdoClient {
    async fn create_work_item(&self, draft: &WorkItemDraft) -> Result<WorkItem> {
        let path = format!(
            "/{}/_apis/wit/workitems/${}",
            self.project, self.work_item_type
        );
        let operations = create_operations(draft);
        let body = serde_json::to_vec(&operations)?;

        let builder = self
            .request(Method::POST, &path)
            .query(&[("api-version", API_VERSION)])
            .header(CONTENT_TYPE, JSON_PATCH)
            .body(body);
        let item: AdoWorkItem = self.send(builder).await?;
        Ok(self.map_work_item(item))
    }

    async fn update_work_item(&self, id: u64, update: &WorkItemUpdate) -> Result<WorkItem> {
        let operations = update_operations(update);
        if operations.is_empty() {
            return self.get_work_item(id).await;
        }
        let item: AdoWorkItem = self
            .patch_document(&self.work_item_path(id), &operations)
            .await?;
        Ok(self.map_work_item(item))
    }

    async fn get_work_item(&self, id: u64) -> Result<WorkItem> {
        let item: AdoWorkItem = self
            .get(&self.work_item_path(id), &[("$expand", "all")])
            .await?;
        Ok(self.map_work_item(item))
    }

    async fn query_assigned_ids(&self, assignee: &str, states: &[String]) -> Result<Vec<u64>> {
        let body = WiqlQuery {
            query: assigned_items_query(assignee, states),
        };
        debug!(query = %body.query, "Running WIQL query");

        let builder = self
            .request(Method::POST, "/_apis/wit/wiql")
            .query(&[("api-version", API_VERSION)])
            .json(&body);
        let result: WiqlResult = self.send(builder).await?;
        Ok(result.work_items.into_iter().map(|r| r.id).collect())
    }

    async fn get_work_items_batch(&self, ids: &[u64]) -> Result<Vec<WorkItem>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        if ids.len() > WORK_ITEM_PAGE_LIMIT {
            return Err(Error::InvalidData(format!(
                "Batch of {} ids exceeds the limit of {}",
                ids.len(),
                WORK_ITEM_PAGE_LIMIT
            )));
        }

        let ids_param = ids
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(",");
        let list: AdoList<AdoWorkItem> = self
            .get(
                "/_apis/wit/workitems",
                &[("ids", ids_param.as_str()), ("$expand", "all")],
            )
            .await?;
        Ok(list
            .value
            .into_iter()
            .map(|item| self.map_work_item(item))
            .collect())
    }

    async fn get_area_tree(&self, depth: u32) -> Result<ClassificationNode> {
        let path = format!("/{}/_apis/wit/classificationnodes/areas", self.project);
        let depth = depth.to_string();
        let node: AdoClassificationNode = self.get(&path, &[("$depth", depth.as_str())]).await?;
        Ok(map_node(node))
    }

    async fn get_iteration_tree(&self, depth: u32) -> Result<ClassificationNode> {
        let path = format!("/{}/_apis/wit/classificationnodes/iterations", self.project);
        let depth = depth.to_string();
        let node: AdoClassificationNode = self.get(&path, &[("$depth", depth.as_str())]).await?;
        Ok(map_node(node))
    }

    async fn list_teams(&self) -> Result<Vec<Team>> {
        let path = format!("/{}/_apis/teams", self.project);
        let list: AdoList<AdoTeam> = self.get(&path, &[]).await?;
        Ok(list
            .value
            .into_iter()
            .map(|t| Team {
                id: t.id,
                name: t.name,
            })
            .collect())
    }

    async fn get_team_iterations(&self, team_id: &str) -> Result<Vec<Iteration>> {
        let path = format!(
            "/{}/{}/_apis/work/teamsettings/iterations",
            self.project, team_id
        );
        let list: AdoList<AdoIteration> = self.get(&path, &[]).await?;
        Ok(list.value.into_iter().map(map_iteration).collect())
    }

    async fn upload_attachment(&self, file_name: &str, content: Vec<u8>) -> Result<AttachmentRef> {
        debug!(file_name = file_name, size = content.len(), "Uploading attachment");

        let builder = self
            .request(Method::POST, "/_apis/wit/attachments")
            .query(&[("api-version", API_VERSION), ("fileName", file_name)])
            .header(CONTENT_TYPE, OCTET_STREAM)
            .body(content);
        let attachment: AdoAttachment = self.send(builder).await?;
        Ok(AttachmentRef {
            id: attachment.id,
            url: attachment.url,
        })
    }

    async fn link_attachment(
        &self,
        id: u64,
        attachment_url: &str,
        comment: &str,
        history: Option<String>,
    ) -> Result<()> {
        let mut operations = vec![PatchOperation::add_relation(AdoRelation {
            rel: "AttachedFile".to_string(),
            url: attachment_url.to_string(),
            attributes: RelationAttributes {
                comment: comment.to_string(),
            },
        })];
        if let Some(history) = history {
            operations.push(PatchOperation::add_field("System.History", history));
        }

        let _: AdoWorkItem = self
            .patch_document(&self.work_item_path(id), &operations)
            .await?;
        Ok(())
    }

    async fn search_identities(&self, email: &str) -> Result<Vec<Identity>> {
        let filter = format!(
            "startswith(mailAddress,'{0}') or startswith(principalName,'{0}')",
            escape_quotes(email)
        );
        let builder = self
            .request(Method::GET, "/_apis/graph/users")
            .query(&[("api-version", GRAPH_API_VERSION), ("$filter", filter.as_str())]);
        let list: AdoList<AdoGraphUser> = self.send(builder).await?;
        Ok(list
            .value
            .into_iter()
            .map(|u| Identity {
                display_name: u.display_name,
                mail_address: u.mail_address,
                principal_name: u.principal_name,
                origin_id: u.origin_id,
            })
            .collect())
    }

    async fn list_projects(&self) -> Result<Vec<ProjectSummary>> {
        let list: AdoList<AdoProject> = self.get("/_apis/projects", &[]).await?;
        Ok(list
            .value
            .into_iter()
            .map(|p| ProjectSummary {
                id: p.id,
                name: p.name,
                url: p.url,
                description: p.description,
            })
            .collect())
    }

    async fn list_work_item_types(&self) -> Result<Vec<String>> {
        let path = format!("/{}/_apis/wit/workitemtypes", self.project);
        let list: AdoList<AdoWorkItemType> = self.get(&path, &[]).await?;
        Ok(list.value.into_iter().map(|t| t.name).collect())
    }
}

// =============================================================================
// Request building
// =============================================================================

fn basic_auth(token: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!(":{}", token)))
}

/// WIQL string literals escape a single quote by doubling it.
fn escape_quotes(value: &str) -> String {
    value.replace('\'', "''")
}

fn assigned_items_query(assignee: &str, states: &[String]) -> String {
    let mut query = format!(
        "SELECT [System.Id] FROM WorkItems WHERE [System.AssignedTo] = '{}'",
        escape_quotes(assignee)
    );
    if !states.is_empty() {
        let list = states
            .iter()
            .map(|s| format!("'{}'", escape_quotes(s)))
            .collect::<Vec<_>>()
            .join(", ");
        query.push_str(&format!(" AND [System.State] IN ({})", list));
    }
    query.push_str(" ORDER BY [System.ChangedDate] DESC");
    query
}

fn create_operations(draft: &WorkItemDraft) -> Vec<PatchOperation> {
    let mut operations = vec![
        PatchOperation::add_field("System.Title", draft.title.as_str()),
        PatchOperation::add_field("System.Description", draft.description.as_str()),
        PatchOperation::add_field("Microsoft.VSTS.Common.Priority", draft.priority),
    ];
    if let Some(assignee) = &draft.assigned_to {
        operations.push(PatchOperation::add_field("System.AssignedTo", assignee.as_str()));
    }
    if let Some(due) = &draft.due_date {
        operations.push(PatchOperation::add_field(
            "Microsoft.VSTS.Scheduling.DueDate",
            due.as_str(),
        ));
    }
    operations
}

fn update_operations(update: &WorkItemUpdate) -> Vec<PatchOperation> {
    let mut operations = Vec::new();
    if let Some(assignee) = &update.assigned_to {
        operations.push(PatchOperation::add_field("System.AssignedTo", assignee.as_str()));
    }
    if let Some(state) = &update.state {
        operations.push(PatchOperation::add_field("System.State", state.as_str()));
    }
    if let Some(history) = &update.history {
        operations.push(PatchOperation::add_field("System.History", history.as_str()));
    }
    operations
}

// =============================================================================
// Response mapping
// =============================================================================

fn map_work_item(item: AdoWorkItem, base_url: &str, project: &str) -> WorkItem {
    let fields = &item.fields;
    let url = item
        .links
        .as_ref()
        .and_then(|l| l.html.as_ref())
        .map(|h| h.href.clone())
        .unwrap_or_else(|| format!("{}/{}/_workitems/edit/{}", base_url, project, item.id));

    WorkItem {
        id: item.id,
        title: field_str(fields, "System.Title").unwrap_or_default(),
        state: field_str(fields, "System.State").unwrap_or_default(),
        work_item_type: field_str(fields, "System.WorkItemType"),
        team_project: field_str(fields, "System.TeamProject"),
        assigned_to: fields.get("System.AssignedTo").and_then(identity_name),
        created_by: fields.get("System.CreatedBy").and_then(identity_name),
        created_date: field_str(fields, "System.CreatedDate"),
        changed_date: field_str(fields, "System.ChangedDate"),
        priority: fields
            .get("Microsoft.VSTS.Common.Priority")
            .and_then(Value::as_u64)
            .and_then(|p| u8::try_from(p).ok()),
        due_date: field_str(fields, "Microsoft.VSTS.Scheduling.DueDate"),
        area_path: field_str(fields, "System.AreaPath"),
        iteration_path: field_str(fields, "System.IterationPath"),
        tags: field_str(fields, "System.Tags"),
        description: field_str(fields, "System.Description"),
        url,
    }
}

fn field_str(fields: &Map<String, Value>, name: &str) -> Option<String> {
    match fields.get(name)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Identity fields are objects in `$expand=all` responses and plain strings
/// in older payloads.
fn identity_name(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Object(obj) => obj
            .get("displayName")
            .or_else(|| obj.get("uniqueName"))
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    }
}

fn map_node(node: AdoClassificationNode) -> ClassificationNode {
    ClassificationNode {
        id: node.id,
        name: node.name,
        attributes: node.attributes.map(|a| NodeAttributes {
            start_date: a.start_date,
            finish_date: a.finish_date,
        }),
        children: node.children.into_iter().map(map_node).collect(),
    }
}

fn map_iteration(iteration: AdoIteration) -> Iteration {
    let (start_date, finish_date) = iteration
        .attributes
        .map(|a| (a.start_date, a.finish_date))
        .unwrap_or_default();
    Iteration {
        path: iteration.path.unwrap_or_else(|| iteration.name.clone()),
        id: iteration.id,
        name: iteration.name,
        start_date,
        finish_date,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_basic_auth_uses_empty_user() {
        assert_eq!(basic_auth("pat-token"), "Basic OnBhdC10b2tlbg==");
    }

    #[test]
    fn test_assigned_items_query() {
        let query = assigned_items_query(
            "o'brien@example.com",
            &["New".to_string(), "Active".to_string()],
        );
        assert_eq!(
            query,
            "SELECT [System.Id] FROM WorkItems WHERE [System.AssignedTo] = 'o''brien@example.com' \
             AND [System.State] IN ('New', 'Active') ORDER BY [System.ChangedDate] DESC"
        );

        let query = assigned_items_query("Jane Doe", &[]);
        assert!(!query.contains("System.State"));
    }

    #[test]
    fn test_create_operations() {
        let draft = WorkItemDraft {
            title: "[Security] Doc".to_string(),
            description: "body".to_string(),
            priority: 2,
            assigned_to: Some("dev@example.com".to_string()),
            due_date: None,
        };
        let ops = create_operations(&draft);

        assert_eq!(ops.len(), 4);
        assert_eq!(ops[0].path, "/fields/System.Title");
        assert_eq!(ops[2].value, json!(2));
        assert_eq!(ops[3].path, "/fields/System.AssignedTo");
    }

    #[test]
    fn test_update_operations_skip_missing() {
        let ops = update_operations(&WorkItemUpdate {
            state: Some("Active".to_string()),
            ..Default::default()
        });
        assert_eq!(ops, vec![PatchOperation::add_field("System.State", "Active")]);
        assert!(update_operations(&WorkItemUpdate::default()).is_empty());
    }

    #[test]
    fn test_map_work_item() {
        let raw: AdoWorkItem = serde_json::from_value(json!({
            "id": 42,
            "fields": {
                "System.Title": "Write docs",
                "System.State": "Active",
                "System.AssignedTo": {"displayName": "Jane Doe", "uniqueName": "jane@example.com"},
                "System.CreatedBy": "Bob",
                "Microsoft.VSTS.Common.Priority": 2,
                "System.AreaPath": "Content\\Security"
            },
            "_links": {"html": {"href": "https://dev.azure.com/org/Content/_workitems/edit/42"}}
        }))
        .unwrap();

        let item = map_work_item(raw, "https://dev.azure.com/org", "Content");

        assert_eq!(item.id, 42);
        assert_eq!(item.title, "Write docs");
        assert_eq!(item.assigned_to, Some("Jane Doe".to_string()));
        assert_eq!(item.created_by, Some("Bob".to_string()));
        assert_eq!(item.priority, Some(2));
        assert_eq!(item.url, "https://dev.azure.com/org/Content/_workitems/edit/42");
    }

    #[test]
    fn test_map_work_item_builds_url_without_links() {
        let raw: AdoWorkItem = serde_json::from_value(json!({"id": 7, "fields": {}})).unwrap();
        let item = map_work_item(raw, "https://dev.azure.com/org", "Content");
        assert_eq!(item.url, "https://dev.azure.com/org/Content/_workitems/edit/7");
        assert_eq!(item.title, "");
        assert!(item.assigned_to.is_none());
    }

    mod integration {
        use super::*;
        use httpmock::prelude::*;

        const AUTH: &str = "Basic OnBhdC10b2tlbg==";

        fn create_client(server: &MockServer) -> AdoClient {
            AdoClient::new(server.base_url(), "Content", "pat-token").unwrap()
        }

        fn sample_item_json(id: u64, title: &str) -> Value {
            json!({
                "id": id,
                "fields": {
                    "System.Title": title,
                    "System.State": "New",
                    "Microsoft.VSTS.Common.Priority": 3
                },
                "_links": {"html": {"href": format!("https://example.test/edit/{}", id)}}
            })
        }

        #[tokio::test]
        async fn test_create_work_item() {
            let server = MockServer::start();

            server.mock(|when, then| {
                when.method(POST)
                    .header("Authorization", AUTH)
                    .header("Content-Type", JSON_PATCH)
                    .query_param("api-version", "7.0")
                    .body_includes("\"/fields/System.Title\"")
                    .body_includes("[Security] Doc")
                    .body_includes("\"/fields/Microsoft.VSTS.Scheduling.DueDate\"");
                then.status(200)
                    .json_body(sample_item_json(1234, "[Security] Doc"));
            });

            let client = create_client(&server);
            let item = client
                .create_work_item(&WorkItemDraft {
                    title: "[Security] Doc".to_string(),
                    description: "desc".to_string(),
                    priority: 3,
                    assigned_to: None,
                    due_date: Some("2025-03-01".to_string()),
                })
                .await
                .unwrap();

            assert_eq!(item.id, 1234);
            assert_eq!(item.title, "[Security] Doc");
            assert_eq!(item.url, "https://example.test/edit/1234");
        }

        #[tokio::test]
        async fn test_update_work_item() {
            let server = MockServer::start();

            server.mock(|when, then| {
                when.method(PATCH)
                    .path("/Content/_apis/wit/workitems/42")
                    .header("Content-Type", JSON_PATCH)
                    .body_includes("\"/fields/System.State\"")
                    .body_includes("\"/fields/System.History\"");
                then.status(200).json_body(json!({
                    "id": 42,
                    "fields": {"System.Title": "Doc", "System.State": "Closed"}
                }));
            });

            let client = create_client(&server);
            let item = client
                .update_work_item(
                    42,
                    &WorkItemUpdate {
                        state: Some("Closed".to_string()),
                        history: Some("done".to_string()),
                        ..Default::default()
                    },
                )
                .await
                .unwrap();

            assert_eq!(item.state, "Closed");
        }

        #[tokio::test]
        async fn test_get_work_item_expands_all() {
            let server = MockServer::start();

            server.mock(|when, then| {
                when.method(GET)
                    .path("/Content/_apis/wit/workitems/5")
                    .query_param("$expand", "all")
                    .header("Authorization", AUTH);
                then.status(200).json_body(sample_item_json(5, "Five"));
            });

            let client = create_client(&server);
            let item = client.get_work_item(5).await.unwrap();
            assert_eq!(item.title, "Five");
            assert_eq!(item.priority, Some(3));
        }

        #[tokio::test]
        async fn test_get_work_item_not_found() {
            let server = MockServer::start();

            server.mock(|when, then| {
                when.method(GET).path("/Content/_apis/wit/workitems/999");
                then.status(404).body("TF401232: Work item 999 does not exist");
            });

            let client = create_client(&server);
            let result = client.get_work_item(999).await;
            assert!(matches!(result, Err(Error::NotFound(_))));
        }

        #[tokio::test]
        async fn test_unauthorized_maps_error() {
            let server = MockServer::start();

            server.mock(|when, then| {
                when.method(GET).path("/_apis/projects");
                then.status(401).body("Unauthorized");
            });

            let client = create_client(&server);
            let result = client.list_projects().await;
            assert!(matches!(result, Err(Error::Unauthorized(_))));
        }

        #[tokio::test]
        async fn test_malformed_response_is_invalid_data() {
            let server = MockServer::start();

            server.mock(|when, then| {
                when.method(GET).path("/_apis/projects");
                then.status(200).body("<html>sign in</html>");
            });

            let client = create_client(&server);
            let result = client.list_projects().await;
            assert!(matches!(result, Err(Error::InvalidData(_))));
        }

        #[tokio::test]
        async fn test_query_assigned_ids() {
            let server = MockServer::start();

            server.mock(|when, then| {
                when.method(POST)
                    .path("/_apis/wit/wiql")
                    .body_includes("[System.AssignedTo] = 'a@b.com'")
                    .body_includes("('New', 'Active')");
                then.status(200).json_body(json!({
                    "queryType": "flat",
                    "workItems": [{"id": 3, "url": "x"}, {"id": 1, "url": "y"}]
                }));
            });

            let client = create_client(&server);
            let ids = client
                .query_assigned_ids("a@b.com", &["New".to_string(), "Active".to_string()])
                .await
                .unwrap();
            assert_eq!(ids, vec![3, 1]);
        }

        #[tokio::test]
        async fn test_query_assigned_ids_empty() {
            let server = MockServer::start();

            server.mock(|when, then| {
                when.method(POST).path("/_apis/wit/wiql");
                then.status(200).json_body(json!({"workItems": []}));
            });

            let client = create_client(&server);
            let ids = client
                .query_assigned_ids("a@b.com", &["New".to_string()])
                .await
                .unwrap();
            assert!(ids.is_empty());
        }

        #[tokio::test]
        async fn test_get_work_items_batch() {
            let server = MockServer::start();

            server.mock(|when, then| {
                when.method(GET)
                    .path("/_apis/wit/workitems")
                    .query_param("ids", "1,2")
                    .query_param("$expand", "all");
                then.status(200).json_body(json!({
                    "count": 2,
                    "value": [sample_item_json(1, "One"), sample_item_json(2, "Two")]
                }));
            });

            let client = create_client(&server);
            let items = client.get_work_items_batch(&[1, 2]).await.unwrap();
            assert_eq!(items.len(), 2);
            assert_eq!(items[1].title, "Two");
        }

        #[tokio::test]
        async fn test_get_work_items_batch_rejects_oversized() {
            let server = MockServer::start();
            let client = create_client(&server);

            let ids: Vec<u64> = (1..=201).collect();
            let result = client.get_work_items_batch(&ids).await;
            assert!(matches!(result, Err(Error::InvalidData(_))));

            assert!(client.get_work_items_batch(&[]).await.unwrap().is_empty());
        }

        #[tokio::test]
        async fn test_get_area_tree() {
            let server = MockServer::start();

            server.mock(|when, then| {
                when.method(GET)
                    .path("/Content/_apis/wit/classificationnodes/areas")
                    .query_param("$depth", "3");
                then.status(200).json_body(json!({
                    "id": 1,
                    "name": "Content",
                    "structureType": "area",
                    "hasChildren": true,
                    "children": [{"id": 2, "name": "Production", "hasChildren": false}]
                }));
            });

            let client = create_client(&server);
            let tree = client.get_area_tree(3).await.unwrap();
            assert_eq!(tree.name, "Content");
            assert_eq!(tree.children.len(), 1);
            assert_eq!(tree.children[0].name, "Production");
        }

        #[tokio::test]
        async fn test_teams_and_iterations() {
            let server = MockServer::start();

            server.mock(|when, then| {
                when.method(GET).path("/Content/_apis/teams");
                then.status(200).json_body(json!({
                    "value": [{"id": "t-1", "name": "Content Team"}],
                    "count": 1
                }));
            });
            server.mock(|when, then| {
                when.method(GET)
                    .path("/Content/t-1/_apis/work/teamsettings/iterations");
                then.status(200).json_body(json!({
                    "value": [{
                        "id": "it-1",
                        "name": "Sprint 9",
                        "path": "Content\\Sprint 9",
                        "attributes": {
                            "startDate": "2025-01-01T00:00:00Z",
                            "finishDate": "2025-01-14T00:00:00Z",
                            "timeFrame": "past"
                        }
                    }]
                }));
            });

            let client = create_client(&server);
            let teams = client.list_teams().await.unwrap();
            assert_eq!(teams[0].name, "Content Team");

            let iterations = client.get_team_iterations(&teams[0].id).await.unwrap();
            assert_eq!(iterations.len(), 1);
            assert_eq!(iterations[0].path, "Content\\Sprint 9");
            assert_eq!(
                iterations[0].finish_date.as_deref(),
                Some("2025-01-14T00:00:00Z")
            );
        }

        #[tokio::test]
        async fn test_upload_and_link_attachment() {
            let server = MockServer::start();

            server.mock(|when, then| {
                when.method(POST)
                    .path("/_apis/wit/attachments")
                    .query_param("fileName", "notes.txt")
                    .header("Content-Type", OCTET_STREAM)
                    .body("hello");
                then.status(201).json_body(json!({
                    "id": "att-1",
                    "url": "https://example.test/_apis/wit/attachments/att-1"
                }));
            });
            server.mock(|when, then| {
                when.method(PATCH)
                    .path("/Content/_apis/wit/workitems/42")
                    .body_includes("\"/relations/-\"")
                    .body_includes("AttachedFile")
                    .body_includes("https://example.test/_apis/wit/attachments/att-1");
                then.status(200).json_body(sample_item_json(42, "Doc"));
            });

            let client = create_client(&server);
            let attachment = client
                .upload_attachment("notes.txt", b"hello".to_vec())
                .await
                .unwrap();
            assert_eq!(attachment.id, "att-1");

            client
                .link_attachment(42, &attachment.url, "Uploaded file: notes.txt", None)
                .await
                .unwrap();
        }

        #[tokio::test]
        async fn test_search_identities() {
            let server = MockServer::start();

            server.mock(|when, then| {
                when.method(GET)
                    .path("/_apis/graph/users")
                    .query_param("api-version", "7.0-preview.1")
                    .query_param_exists("$filter");
                then.status(200).json_body(json!({
                    "count": 1,
                    "value": [{
                        "displayName": "Jane Doe",
                        "mailAddress": "jane@example.com",
                        "principalName": "jane@example.com",
                        "originId": "o-1",
                        "subjectKind": "user"
                    }]
                }));
            });

            let client = create_client(&server);
            let users = client.search_identities("jane@example.com").await.unwrap();
            assert_eq!(users.len(), 1);
            assert!(users[0].matches_exactly("jane@example.com"));
            assert_eq!(users[0].origin_id.as_deref(), Some("o-1"));
        }

        #[tokio::test]
        async fn test_projects_and_types() {
            let server = MockServer::start();

            server.mock(|when, then| {
                when.method(GET).path("/_apis/projects");
                then.status(200).json_body(json!({
                    "value": [{"id": "p-1", "name": "Content", "state": "wellFormed"}]
                }));
            });
            server.mock(|when, then| {
                when.method(GET).path("/Content/_apis/wit/workitemtypes");
                then.status(200).json_body(json!({
                    "value": [{"name": "Bug"}, {"name": "User Story"}]
                }));
            });

            let client = create_client(&server);
            let projects = client.list_projects().await.unwrap();
            assert_eq!(projects[0].name, "Content");
            let types = client.list_work_item_types().await.unwrap();
            assert_eq!(types, vec!["Bug".to_string(), "User Story".to_string()]);
        }

        #[tokio::test]
        async fn test_server_error_maps_error() {
            let server = MockServer::start();

            server.mock(|when, then| {
                when.method(GET).path("/Content/_apis/teams");
                then.status(503).body("busy");
            });

            let client = create_client(&server);
            let result = client.list_teams().await;
            assert!(matches!(
                result,
                Err(Error::ServerError { status: 503, .. })
            ));
        }
    }
}
