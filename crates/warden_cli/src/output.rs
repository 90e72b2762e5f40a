//! Result rendering: tables for people, JSON for machines.

use std::cmp::Reverse;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tabled::Tabled;
use tabled::settings::Style;
use warden::github::{ExtendedOrg, ViewerRepository};
use warden::{AnalyzedData, PolicyStatus, Role, TokenScopes};

/// Output format for command results.
#[derive(Debug, Clone, Copy, Default, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum OutputFormat {
    /// Display as a formatted table (default)
    #[default]
    Table,
    /// Display as JSON
    Json,
}

fn table<T: Tabled>(rows: Vec<T>) -> String {
    let mut table = tabled::Table::new(rows);
    table.with(Style::rounded());
    table.to_string()
}

fn render<T: Serialize, R: Tabled>(
    items: &T,
    rows: impl FnOnce() -> Vec<R>,
    format: OutputFormat,
) -> Result<String, serde_json::Error> {
    match format {
        OutputFormat::Table => Ok(table(rows())),
        OutputFormat::Json => serde_json::to_string_pretty(items),
    }
}

#[derive(Debug, Clone, Tabled)]
struct PolicyRow {
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Severity")]
    severity: String,
    #[tabled(rename = "Namespace")]
    namespace: String,
    #[tabled(rename = "Entity")]
    entity: String,
    #[tabled(rename = "Policy")]
    policy: String,
    #[tabled(rename = "Link")]
    link: String,
}

impl PolicyRow {
    fn from_result(result: &AnalyzedData) -> Self {
        let policy = if result.title.is_empty() {
            result.policy_name.clone()
        } else {
            result.title.clone()
        };
        Self {
            status: result.status.to_string(),
            severity: result.severity.to_string(),
            namespace: result.namespace.to_string(),
            entity: result.entity_name.clone(),
            policy,
            link: result.canonical_link.clone(),
        }
    }
}

/// Failed first, then by descending severity, policy and entity.
fn sort_results(results: &mut [AnalyzedData]) {
    results.sort_by(|a, b| {
        let rank = |r: &AnalyzedData| match r.status {
            PolicyStatus::Failed => 0,
            PolicyStatus::Passed => 1,
            PolicyStatus::Skipped => 2,
        };
        (rank(a), Reverse(a.severity), &a.policy_name, &a.entity_name).cmp(&(
            rank(b),
            Reverse(b.severity),
            &b.policy_name,
            &b.entity_name,
        ))
    });
}

pub(crate) fn render_analysis(
    mut results: Vec<AnalyzedData>,
    format: OutputFormat,
    failed_only: bool,
) -> Result<String, serde_json::Error> {
    if failed_only {
        results.retain(|r| r.status == PolicyStatus::Failed);
    }
    sort_results(&mut results);
    render(&results, || results.iter().map(PolicyRow::from_result).collect(), format)
}

#[derive(Debug, Clone, Serialize, Tabled)]
struct OrgRow {
    #[tabled(rename = "Organization")]
    organization: String,
    #[tabled(rename = "Role")]
    role: String,
    #[tabled(rename = "Plan")]
    plan: String,
    #[tabled(rename = "Analysis")]
    analysis: &'static str,
}

impl OrgRow {
    fn from_org(org: &ExtendedOrg) -> Self {
        Self {
            organization: org.name().to_string(),
            role: org.role.to_string(),
            plan: org
                .organization
                .plan
                .as_ref()
                .map_or_else(|| "unknown".to_string(), |p| p.name.clone()),
            // Only owners can read everything the policies look at.
            analysis: if org.role == Role::ORG_OWNER { "full" } else { "partial" },
        }
    }
}

pub(crate) fn render_orgs(orgs: &[ExtendedOrg], format: OutputFormat) -> Result<String, serde_json::Error> {
    let mut rows: Vec<OrgRow> = orgs.iter().map(OrgRow::from_org).collect();
    rows.sort_by(|a, b| (a.analysis, &a.organization).cmp(&(b.analysis, &b.organization)));
    render(&rows, || rows.clone(), format)
}

#[derive(Debug, Clone, Tabled)]
struct RepoRow {
    #[tabled(rename = "Repository")]
    repository: String,
    #[tabled(rename = "Permission")]
    permission: String,
}

pub(crate) fn render_repositories(
    repositories: &[ViewerRepository],
    format: OutputFormat,
) -> Result<String, serde_json::Error> {
    render(
        &repositories,
        || {
            repositories
                .iter()
                .map(|r| RepoRow {
                    repository: r.name_with_owner.clone(),
                    permission: r
                        .viewer_permission
                        .map_or_else(|| "NONE".to_string(), |p| p.to_string()),
                })
                .collect()
        },
        format,
    )
}

#[derive(Debug, Clone, Tabled)]
struct ScopeRow {
    #[tabled(rename = "Scope")]
    scope: String,
}

pub(crate) fn render_scopes(scopes: &TokenScopes, format: OutputFormat) -> Result<String, serde_json::Error> {
    render(
        scopes,
        || scopes.iter().map(|s| ScopeRow { scope: s.to_string() }).collect(),
        format,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};
    use warden::analyze::Annotations;
    use warden::{Namespace, Severity};

    fn analyzed(policy: &str, entity: &str, status: PolicyStatus, severity: Severity) -> AnalyzedData {
        AnalyzedData {
            entity: json!({}),
            entity_name: entity.to_string(),
            namespace: Namespace::Repository,
            policy_name: policy.to_string(),
            fully_qualified_policy_name: format!("data.repository.{policy}"),
            title: String::new(),
            description: String::new(),
            annotations: Annotations::default(),
            required_enrichers: Vec::new(),
            remediation_steps: Vec::new(),
            severity,
            canonical_link: format!("https://github.com/{entity}"),
            extra_data: Value::Null,
            status,
        }
    }

    #[test]
    fn failures_sort_first_by_severity() {
        let mut results = vec![
            analyzed("a", "acme/api", PolicyStatus::Passed, Severity::Critical),
            analyzed("b", "acme/api", PolicyStatus::Failed, Severity::Low),
            analyzed("c", "acme/api", PolicyStatus::Failed, Severity::High),
            analyzed("d", "acme/api", PolicyStatus::Skipped, Severity::High),
        ];
        sort_results(&mut results);
        let order: Vec<&str> = results.iter().map(|r| r.policy_name.as_str()).collect();
        assert_eq!(order, ["c", "b", "a", "d"]);
    }

    #[test]
    fn failed_only_json_drops_other_statuses() {
        let results = vec![
            analyzed("a", "acme/api", PolicyStatus::Passed, Severity::Low),
            analyzed("b", "acme/web", PolicyStatus::Failed, Severity::Medium),
        ];
        let out = render_analysis(results, OutputFormat::Json, true).expect("json");
        let value: Value = serde_json::from_str(&out).expect("valid json");
        assert_eq!(value.as_array().map(Vec::len), Some(1));
        assert_eq!(value[0]["status"], "FAILED");
        assert_eq!(value[0]["severity"], "MEDIUM");
    }

    #[test]
    fn table_uses_titles_when_present() {
        let mut result = analyzed("open_hooks", "acme/api", PolicyStatus::Failed, Severity::High);
        result.title = "Webhooks should use TLS".into();
        let out = render_analysis(vec![result], OutputFormat::Table, false).expect("table");
        assert!(out.contains("Webhooks should use TLS"));
        assert!(out.contains("FAILED"));
        assert!(out.contains("acme/api"));
    }

    #[test]
    fn scopes_render_in_both_formats() {
        let scopes = TokenScopes::from_header("read:org");
        let table = render_scopes(&scopes, OutputFormat::Table).expect("table");
        assert!(table.contains("read:org"));
        let json = render_scopes(&scopes, OutputFormat::Json).expect("json");
        assert_eq!(serde_json::from_str::<Value>(&json).expect("json"), json!(["read:org"]));
    }

    #[test]
    fn repositories_without_permission_show_none() {
        let repos = vec![ViewerRepository {
            name_with_owner: "acme/api".into(),
            viewer_permission: None,
        }];
        let out = render_repositories(&repos, OutputFormat::Table).expect("table");
        assert!(out.contains("NONE"));
    }
}
