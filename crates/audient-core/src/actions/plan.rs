//! Plan payload and its decomposition into ordered atomic operations.

use serde::{Deserialize, Serialize};

use super::UiAction;

pub(crate) const DEFAULT_FIELD_ID: &str = "default";

/// A bulk selection plan proposed by the agent: one entry per audience
/// builder folder the plan touches, in the order they should be applied.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    #[serde(default)]
    pub criteria: Vec<PlanCriterion>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanCriterion {
    pub folder_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder_name: Option<String>,
    #[serde(default)]
    pub values: Vec<PlanValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_field_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_field_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub demographic_field_id: Option<String>,
    #[serde(default)]
    pub demographic_options: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanValue {
    pub id: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub selected: bool,
}

/// Break a plan into atomic operations, preserving criterion order.
///
/// Per criterion the fixed step order is: expand the folder, select the
/// selected values, set the date range, set the search query, select
/// demographic options. Steps whose inputs are absent are omitted — a
/// date range needs both bounds. Order matters: every later step assumes
/// the folder from step one is expanded.
pub fn decompose_plan(plan: &Plan) -> Vec<UiAction> {
    let mut actions = Vec::new();

    for criterion in &plan.criteria {
        actions.push(UiAction::ExpandFolder {
            folder_id: criterion.folder_id.clone(),
        });

        let selected_ids: Vec<String> = criterion
            .values
            .iter()
            .filter(|v| v.selected)
            .map(|v| v.id.clone())
            .collect();
        if !selected_ids.is_empty() {
            actions.push(UiAction::SelectValues {
                folder_id: criterion.folder_id.clone(),
                value_ids: selected_ids,
                selected: true,
            });
        }

        if let (Some(from), Some(to)) = (&criterion.date_from, &criterion.date_to) {
            actions.push(UiAction::SetDate {
                folder_id: criterion.folder_id.clone(),
                field_id: field_or_default(&criterion.date_field_id),
                from: from.clone(),
                to: to.clone(),
            });
        }

        if let Some(query) = &criterion.search_query {
            actions.push(UiAction::SetSearch {
                folder_id: criterion.folder_id.clone(),
                field_id: field_or_default(&criterion.search_field_id),
                query: query.clone(),
            });
        }

        if !criterion.demographic_options.is_empty() {
            actions.push(UiAction::SelectDemographic {
                folder_id: criterion.folder_id.clone(),
                field_id: field_or_default(&criterion.demographic_field_id),
                option_ids: criterion.demographic_options.clone(),
            });
        }
    }

    actions
}

fn field_or_default(field_id: &Option<String>) -> String {
    field_id
        .clone()
        .unwrap_or_else(|| DEFAULT_FIELD_ID.to_string())
}
