//! Work item listing: identity resolution, filtering, stats and paging.

use contentreq_core::identity::{candidate_identities, merge_by_key};
use contentreq_core::mapping::{bucket_for_state, StateBucket, StatusFilter};
use contentreq_mcp::fallback::is_fallback;
use contentreq_mcp::Tool;
use contentreq_supervisor::ToolInvoker;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::error::ApiError;
use crate::invoke;

/// Every state a listing asks for, whatever the filter.
pub const LISTING_STATES: [&str; 8] = [
    "New",
    "Active",
    "Committed",
    "In Progress",
    "In Review",
    "Resolved",
    "Done",
    "Closed",
];

pub const DEFAULT_PAGE_SIZE: usize = 10;
pub const MAX_PAGE_SIZE: usize = 100;

/// Work items assigned to a user under any of their identities.
#[derive(Debug, Clone, PartialEq)]
pub struct Assigned {
    pub items: Vec<Value>,
    /// The items are sample data from the worker's fallback mode
    pub fallback: bool,
}

/// Query each candidate identity and union the results by work item id.
///
/// The first candidate must succeed. Later candidates are best effort, and
/// their fallback samples are never mixed into real results.
pub async fn assigned_to(invoker: &dyn ToolInvoker, email: &str) -> Result<Assigned, ApiError> {
    let tool = Tool::GetUserWorkItems.name();
    let mut result_sets = Vec::new();
    let mut fallback = false;

    for (index, candidate) in candidate_identities(email).into_iter().enumerate() {
        let arguments = json!({ "userEmail": candidate, "includeStates": LISTING_STATES });
        match invoke(invoker, tool, arguments).await {
            Ok(payload) if index == 0 => {
                fallback = is_fallback(&payload);
                result_sets.push(work_items_of(&payload));
                if fallback {
                    break;
                }
            }
            Ok(payload) if is_fallback(&payload) => {
                debug!(candidate = %candidate, "Ignoring fallback results for alternate identity");
            }
            Ok(payload) => result_sets.push(work_items_of(&payload)),
            Err(e) if index == 0 => return Err(e),
            Err(e) => warn!(candidate = %candidate, error = %e, "Lookup by alternate identity failed"),
        }
    }

    let items = merge_by_key(result_sets, |item| item.get("id").and_then(Value::as_u64));
    Ok(Assigned { items, fallback })
}

fn work_items_of(payload: &Value) -> Vec<Value> {
    payload
        .get("workItems")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

fn state_of(item: &Value) -> &str {
    item.get("state").and_then(Value::as_str).unwrap_or_default()
}

pub fn filter_by_status(items: Vec<Value>, filter: StatusFilter) -> Vec<Value> {
    items
        .into_iter()
        .filter(|item| filter.matches(state_of(item)))
        .collect()
}

/// Counts per state bucket.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub total: usize,
    pub new: usize,
    pub committed: usize,
    pub active: usize,
    pub in_review: usize,
    pub closed: usize,
}

pub fn stats(items: &[Value]) -> Stats {
    let mut stats = Stats {
        total: items.len(),
        ..Default::default()
    };
    for item in items {
        match bucket_for_state(state_of(item)) {
            Some(StateBucket::New) => stats.new += 1,
            Some(StateBucket::Committed) => stats.committed += 1,
            Some(StateBucket::Active) => stats.active += 1,
            Some(StateBucket::InReview) => stats.in_review += 1,
            Some(StateBucket::Closed) => stats.closed += 1,
            None => {}
        }
    }
    stats
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub current_page: usize,
    pub page_size: usize,
    pub total_items: usize,
    pub total_pages: usize,
    pub has_next_page: bool,
    pub has_previous_page: bool,
}

/// Slice out a 1-based page. Page 0 is treated as page 1.
pub fn paginate(items: Vec<Value>, page: usize, page_size: usize) -> (Vec<Value>, Pagination) {
    let page = page.max(1);
    let page_size = page_size.clamp(1, MAX_PAGE_SIZE);
    let total_items = items.len();
    let total_pages = total_items.div_ceil(page_size);
    let slice = items
        .into_iter()
        .skip((page - 1).saturating_mul(page_size))
        .take(page_size)
        .collect();
    (
        slice,
        Pagination {
            current_page: page,
            page_size,
            total_items,
            total_pages,
            has_next_page: page < total_pages,
            has_previous_page: page > 1,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items(states: &[&str]) -> Vec<Value> {
        states
            .iter()
            .enumerate()
            .map(|(i, state)| json!({"id": i + 1, "state": state}))
            .collect()
    }

    #[test]
    fn test_filter_by_bucket() {
        let all = items(&["New", "Active", "In Progress", "Resolved", "Closed", "Removed"]);
        let active = filter_by_status(all.clone(), "active".parse().unwrap());
        assert_eq!(active.len(), 2);
        let in_review = filter_by_status(all.clone(), "in_review".parse().unwrap());
        assert_eq!(in_review.len(), 1);
        assert_eq!(filter_by_status(all, StatusFilter::All).len(), 6);
    }

    #[test]
    fn test_stats_skip_unbucketed_states() {
        let stats = stats(&items(&["New", "New", "Committed", "Done", "Removed"]));
        assert_eq!(
            stats,
            Stats {
                total: 5,
                new: 2,
                committed: 1,
                active: 0,
                in_review: 0,
                closed: 1,
            }
        );
    }

    #[test]
    fn test_paginate() {
        let all = items(&["New"; 23]);
        let (page, info) = paginate(all.clone(), 3, 10);
        assert_eq!(page.len(), 3);
        assert_eq!(page[0]["id"], 21);
        assert_eq!(info.total_pages, 3);
        assert!(!info.has_next_page);
        assert!(info.has_previous_page);

        let (page, info) = paginate(all.clone(), 0, 10);
        assert_eq!(info.current_page, 1);
        assert_eq!(page.len(), 10);

        let (page, info) = paginate(all, 9, 10);
        assert!(page.is_empty());
        assert_eq!(info.total_items, 23);
    }

    #[test]
    fn test_paginate_empty() {
        let (page, info) = paginate(Vec::new(), 1, DEFAULT_PAGE_SIZE);
        assert!(page.is_empty());
        assert_eq!(info.total_pages, 0);
        assert!(!info.has_next_page);
        assert!(!info.has_previous_page);
    }

    #[test]
    fn test_page_size_is_clamped() {
        let (_, info) = paginate(items(&["New"; 3]), 1, 0);
        assert_eq!(info.page_size, 1);
        let (_, info) = paginate(items(&["New"; 3]), 1, 10_000);
        assert_eq!(info.page_size, MAX_PAGE_SIZE);
    }
}
