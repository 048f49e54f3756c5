//! Host-provided request context: auth, the audience snapshot, and the
//! narration of audience-state changes.

use serde::{Deserialize, Serialize};
use strum_macros::Display;

/// Auth context the host hands the widget; forwarded on every agent call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwt: Option<String>,
    pub user_id: String,
    pub environment_id: String,
    pub profile_id: String,
    #[serde(default)]
    pub permissions: Vec<String>,
}

impl AuthContext {
    pub fn is_authenticated(&self) -> bool {
        !self.user_id.is_empty() && !self.environment_id.is_empty()
    }
}

/// Snapshot of the host's audience selection state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudienceState {
    pub folders: Vec<AudienceFolder>,
    pub total_audience_count: u64,
    /// Host-side snapshot time (unix millis); distinguishes pushes.
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudienceFolder {
    pub id: String,
    pub name: String,
    pub operator: FolderOperator,
    pub selected_values: Vec<FolderValue>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum FolderOperator {
    And,
    Or,
    Not,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderValue {
    pub id: String,
    pub label: String,
}

/// Human-readable description of what changed between two audience
/// snapshots, or None when nothing visible changed.
pub fn describe_state_diff(prev: &AudienceState, curr: &AudienceState) -> Option<String> {
    let mut parts: Vec<String> = Vec::new();

    let count_diff = curr.total_audience_count as i64 - prev.total_audience_count as i64;
    if count_diff != 0 {
        let direction = if count_diff > 0 { "up" } else { "down" };
        parts.push(format!(
            "{} records ({direction} {})",
            curr.total_audience_count,
            count_diff.unsigned_abs()
        ));
    }

    for curr_folder in &curr.folders {
        let Some(prev_folder) = prev.folders.iter().find(|f| f.id == curr_folder.id) else {
            parts.push(format!("added folder \"{}\"", curr_folder.name));
            continue;
        };

        let added: Vec<&str> = curr_folder
            .selected_values
            .iter()
            .filter(|v| !prev_folder.selected_values.iter().any(|p| p.id == v.id))
            .map(|v| v.label.as_str())
            .collect();
        let removed: Vec<&str> = prev_folder
            .selected_values
            .iter()
            .filter(|v| !curr_folder.selected_values.iter().any(|c| c.id == v.id))
            .map(|v| v.label.as_str())
            .collect();

        if !added.is_empty() {
            parts.push(format!("{}: +{}", curr_folder.name, added.join(", ")));
        }
        if !removed.is_empty() {
            parts.push(format!("{}: -{}", curr_folder.name, removed.join(", ")));
        }
    }

    for prev_folder in &prev.folders {
        if !curr.folders.iter().any(|f| f.id == prev_folder.id) {
            parts.push(format!("removed folder \"{}\"", prev_folder.name));
        }
    }

    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" · "))
    }
}
