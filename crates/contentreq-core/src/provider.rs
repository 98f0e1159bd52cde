//! Work-tracker trait implemented by remote backends (Azure DevOps).

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{
    AttachmentRef, ClassificationNode, Identity, Iteration, ProjectSummary, Team, WorkItem,
    WorkItemDraft, WorkItemUpdate,
};

/// Largest number of ids a single batch read may carry.
pub const WORK_ITEM_PAGE_LIMIT: usize = 200;

/// Remote operations the tool handlers are built from.
///
/// Each method is one logical remote call; batching, fallback and output
/// shaping live in the handlers.
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
#[async_trait]
pub trait WorkTracker: Send + Sync {
    /// Create a work item in the configured project.
    async fn create_work_item(&self, draft: &WorkItemDraft) -> Result<WorkItem>;

    /// Apply a partial update to a work item.
    async fn update_work_item(&self, id: u64, update: &WorkItemUpdate) -> Result<WorkItem>;

    /// Get a single work item with all fields expanded.
    async fn get_work_item(&self, id: u64) -> Result<WorkItem>;

    /// Ids of items assigned to `assignee` in any of `states`, newest change first.
    async fn query_assigned_ids(&self, assignee: &str, states: &[String]) -> Result<Vec<u64>>;

    /// Fetch one batch of work items. Callers keep batches within the page limit.
    async fn get_work_items_batch(&self, ids: &[u64]) -> Result<Vec<WorkItem>>;

    /// Area classification tree of the project.
    async fn get_area_tree(&self, depth: u32) -> Result<ClassificationNode>;

    /// Iteration classification tree of the project.
    async fn get_iteration_tree(&self, depth: u32) -> Result<ClassificationNode>;

    /// Teams of the project.
    async fn list_teams(&self) -> Result<Vec<Team>>;

    /// Iterations configured for a team.
    async fn get_team_iterations(&self, team_id: &str) -> Result<Vec<Iteration>>;

    /// Upload raw bytes as an attachment.
    async fn upload_attachment(&self, file_name: &str, content: Vec<u8>) -> Result<AttachmentRef>;

    /// Link an uploaded attachment to a work item.
    async fn link_attachment(
        &self,
        id: u64,
        attachment_url: &str,
        comment: &str,
        history: Option<String>,
    ) -> Result<()>;

    /// Directory users whose mail or principal name starts with `email`.
    async fn search_identities(&self, email: &str) -> Result<Vec<Identity>>;

    /// Projects visible to the credential.
    async fn list_projects(&self) -> Result<Vec<ProjectSummary>>;

    /// Work item type names of the configured project.
    async fn list_work_item_types(&self) -> Result<Vec<String>>;
}
