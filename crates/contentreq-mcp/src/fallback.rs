//! Degraded-mode payloads returned when the remote tracker is unreachable.
//!
//! Every payload built here carries `"fallback": true` and a `note` starting
//! with `Fallback mode`, so callers can tell it apart from a remote answer.
//! Identifiers in these payloads are synthesized and never durable.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{json, Value};
use uuid::Uuid;

pub const FALLBACK_KEY: &str = "fallback";
pub const NOTE_PREFIX: &str = "Fallback mode";
/// Set on fallbacks standing in for a remote change that never happened.
pub const SIMULATED_KEY: &str = "simulated";

const FALLBACK_AREA_PATHS: [&str; 5] = [
    "Content\\Production\\MSec Docs\\Security\\Authentication",
    "Content\\Production\\MSec Docs\\Security\\Authorization",
    "Content\\Production\\MSec Docs\\Security\\Data Protection",
    "Content\\Production\\MSec Docs\\Security\\Network Security",
    "Content\\Production\\MSec Docs\\Security\\Compliance",
];

static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern is valid")
});
const TRUSTED_DOMAINS: [&str; 3] = ["microsoft.com", "outlook.com", "hotmail.com"];

/// Whether a payload was produced in fallback mode.
pub fn is_fallback(payload: &Value) -> bool {
    payload.get(FALLBACK_KEY).and_then(Value::as_bool) == Some(true)
}

/// Add the fallback marker and note to an object payload.
pub fn mark(mut payload: Value, what: &str, reason: &str) -> Value {
    if let Some(object) = payload.as_object_mut() {
        object.insert(FALLBACK_KEY.to_string(), Value::Bool(true));
        object.insert(
            "note".to_string(),
            Value::String(format!("{} - {}. Original error: {}", NOTE_PREFIX, what, reason)),
        );
    }
    payload
}

/// Locally synthesized work item id in `1000..11000`.
pub fn simulated_work_item_id() -> u64 {
    1000 + (Uuid::new_v4().as_u128() % 10_000) as u64
}

fn simulated_url(organization_url: &str, project: &str, id: u64) -> String {
    format!(
        "{}/{}/_workitems/edit/{}",
        organization_url.trim_end_matches('/'),
        project,
        id
    )
}

pub fn created(organization_url: &str, project: &str, title: &str, reason: &str) -> Value {
    let id = simulated_work_item_id();
    mark(
        json!({
            "workItemId": id,
            "title": title,
            "state": "New",
            "url": simulated_url(organization_url, project, id),
            "message": "Content request recorded locally; it was not created in Azure DevOps",
        }),
        "simulated work item",
        reason,
    )
}

pub fn status_updated(work_item_id: u64, status: &str, comment: Option<&str>, reason: &str) -> Value {
    let mut payload = json!({
        "workItemId": work_item_id,
        "status": status,
        "message": format!("Status change to {} was not applied remotely", status),
    });
    if let Some(comment) = comment {
        payload["comment"] = json!(comment);
    }
    mark(payload, "simulated status update", reason)
}

pub fn assigned(work_item_id: u64, assignee: &str, reason: &str) -> Value {
    mark(
        json!({
            "workItemId": work_item_id,
            "assignee": assignee,
            "state": "Active",
            "message": format!("Assignment to {} was not applied remotely", assignee),
        }),
        "simulated assignment",
        reason,
    )
}

pub fn request_details(
    organization_url: &str,
    project: &str,
    work_item_id: u64,
    reason: &str,
) -> Value {
    mark(
        json!({
            "id": work_item_id,
            "title": "Sample content request",
            "description": "Details are unavailable while Azure DevOps cannot be reached.",
            "status": "New",
            "assignedTo": "Unassigned",
            "createdBy": null,
            "createdDate": null,
            "tags": null,
            "priority": 3,
            "dueDate": null,
            "areaPath": FALLBACK_AREA_PATHS[0],
            "iterationPath": null,
            "url": simulated_url(organization_url, project, work_item_id),
        }),
        "sample work item details",
        reason,
    )
}

pub fn dashboard(organization_url: &str, project: &str, reason: &str) -> Value {
    mark(
        json!({
            "connectionStatus": "unreachable",
            "organization": organization_url,
            "project": project,
            "projectFound": false,
            "availableProjects": [],
            "workItemTypes": [],
            "diagnosis": [
                "Check that the personal access token is valid",
                "Verify the organization URL",
                "Confirm the project name",
                "Ensure the token has Work Items (Read) and Project and Team (Read) scopes",
            ],
        }),
        "connection test failed",
        reason,
    )
}

pub fn user_work_items(
    organization_url: &str,
    project: &str,
    user_email: &str,
    states: &[String],
    reason: &str,
) -> Value {
    let samples = [
        (1001_u64, "Sample: Update authentication overview", "Active", 2),
        (1002_u64, "Sample: Document conditional access policies", "New", 3),
    ];
    let work_items: Vec<Value> = samples
        .iter()
        .map(|(id, title, state, priority)| {
            json!({
                "id": id,
                "title": title,
                "state": state,
                "workItemType": "User Story",
                "teamProject": project,
                "assignedTo": user_email,
                "priority": priority,
                "areaPath": FALLBACK_AREA_PATHS[0],
                "url": simulated_url(organization_url, project, *id),
                "description": "Sample work item shown while Azure DevOps cannot be reached.",
            })
        })
        .collect();

    mark(
        json!({
            "userEmail": user_email,
            "totalCount": work_items.len(),
            "queriedStates": states,
            "workItems": work_items,
        }),
        "sample work items",
        reason,
    )
}

pub fn area_paths(reason: &str) -> Value {
    mark(
        json!({
            "areaPaths": FALLBACK_AREA_PATHS,
            "total": FALLBACK_AREA_PATHS.len(),
        }),
        "using simulated area paths",
        reason,
    )
}

pub fn iterations(team_name: &str, include_current_and_future: bool, reason: &str) -> Value {
    let iterations = json!([
        {"id": "iter1", "name": "Sprint 1", "path": "Content\\Sprint 1", "startDate": "2025-01-01", "finishDate": "2025-01-15", "state": "future"},
        {"id": "iter2", "name": "Sprint 2", "path": "Content\\Sprint 2", "startDate": "2025-01-16", "finishDate": "2025-01-30", "state": "future"},
        {"id": "iter3", "name": "Sprint 3", "path": "Content\\Sprint 3", "startDate": "2025-01-31", "finishDate": "2025-02-14", "state": "future"},
    ]);
    mark(
        json!({
            "iterations": iterations,
            "total": 3,
            "teamName": team_name,
            "includeCurrentAndFuture": include_current_and_future,
        }),
        "using simulated iterations",
        reason,
    )
}

pub fn attachment(
    organization_url: &str,
    project: &str,
    work_item_id: u64,
    file_name: &str,
    comment: Option<&str>,
    reason: &str,
) -> Value {
    let token = Uuid::new_v4().simple().to_string();
    let mut payload = json!({
        "workItemId": work_item_id,
        "fileName": file_name,
        "attachmentUrl": format!(
            "{}/{}/_apis/wit/attachments/{}",
            organization_url.trim_end_matches('/'),
            project,
            &token[..9]
        ),
        "message": format!("Upload of {} was simulated", file_name),
    });
    if let Some(comment) = comment {
        payload["comment"] = json!(comment);
    }
    mark(payload, "simulated upload", reason)
}

/// Email-syntax and domain judgment used when the directory is unreachable.
pub fn looks_like_trusted_email(email: &str) -> bool {
    EMAIL.is_match(email) && TRUSTED_DOMAINS.iter().any(|domain| email.ends_with(domain))
}

pub fn validated_user(email: &str, reason: &str) -> Value {
    let valid = looks_like_trusted_email(email);
    let user = if valid {
        json!({
            "email": email,
            "displayName": email.split('@').next().unwrap_or(email),
            "principalName": email,
            "id": "unknown",
        })
    } else {
        Value::Null
    };
    let verdict = if valid {
        "address looks valid"
    } else {
        "address does not look valid"
    };
    mark(
        json!({
            "valid": valid,
            "user": user,
            "similarUsers": [],
            "message": format!("Fallback validation: {}", verdict),
        }),
        "email heuristics only",
        reason,
    )
}
