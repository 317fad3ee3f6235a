//! Run outcome aggregation.
//!
//! After the group runner finishes, every host is folded into a single
//! report: success and failure lists, the values store, and in debug mode
//! the per-action trail and final context dump for each failed host. The
//! report serializes to the machine-readable JSON object emitted in `--json`
//! mode.

use serde::Serialize;
use serde_json::json;

use smelter_types::Store;

use crate::instance::{ActionTrace, ExecutionInstance};

#[derive(Debug, Serialize)]
pub struct FailedHost {
    pub identity: String,
    #[serde(rename = "Error")]
    pub error: String,
    #[serde(rename = "Contexts", skip_serializing_if = "Vec::is_empty")]
    pub contexts: Vec<ActionTrace>,
    #[serde(rename = "FullContext", skip_serializing_if = "Option::is_none")]
    pub full_context: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct RunReport {
    pub values: serde_json::Value,
    #[serde(rename = "successCount")]
    pub success_count: usize,
    #[serde(rename = "failCount")]
    pub fail_count: usize,
    #[serde(rename = "successHosts")]
    pub success_hosts: Vec<String>,
    #[serde(rename = "failHosts")]
    pub fail_hosts: Vec<FailedHost>,
    /// Set only when the run aborted before producing any host results.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunReport {
    /// Aggregates finished instances into a report. Debug mode attaches the
    /// per-action trail and the final context dump to each failed host.
    pub fn from_instances(values: &Store, instances: &[ExecutionInstance], debug: bool) -> Self {
        let mut report = RunReport {
            values: values.to_value().to_json(),
            success_count: 0,
            fail_count: 0,
            success_hosts: Vec::new(),
            fail_hosts: Vec::new(),
            error: None,
        };

        for instance in instances {
            match instance.error() {
                Some(error) => {
                    report.fail_count += 1;
                    let mut failed = FailedHost {
                        identity: instance.host_ident().to_string(),
                        error: error.to_string(),
                        contexts: Vec::new(),
                        full_context: None,
                    };
                    if debug {
                        failed.contexts = instance.trail.clone();
                        failed.full_context =
                            Some(smelter_types::Value::Mapping(instance.context_mapping()).to_json());
                    }
                    report.fail_hosts.push(failed);
                }
                None => {
                    report.success_count += 1;
                    report.success_hosts.push(instance.host_ident().to_string());
                }
            }
        }

        report
    }

    /// A report for a run that failed before any host produced results.
    pub fn aborted(error: impl std::fmt::Display) -> Self {
        RunReport {
            values: json!({}),
            success_count: 0,
            fail_count: 0,
            success_hosts: Vec::new(),
            fail_hosts: Vec::new(),
            error: Some(error.to_string()),
        }
    }

    /// True when every host completed without error.
    pub fn ok(&self) -> bool {
        self.fail_count == 0 && self.error.is_none()
    }

    pub fn to_json_string(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| format!("{{\"error\":\"{e}\"}}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aborted_report_serializes_with_error() {
        let report = RunReport::aborted("no hosts specified");
        let text = report.to_json_string();
        assert!(text.contains("\"error\":\"no hosts specified\""));
        assert!(text.contains("\"successCount\":0"));
        assert!(!report.ok());
    }

    #[test]
    fn field_names_match_the_wire_format() {
        let report = RunReport {
            values: json!({"a": 1}),
            success_count: 1,
            fail_count: 1,
            success_hosts: vec!["good".into()],
            fail_hosts: vec![FailedHost {
                identity: "bad".into(),
                error: "boom".into(),
                contexts: Vec::new(),
                full_context: None,
            }],
            error: None,
        };

        let value: serde_json::Value = serde_json::from_str(&report.to_json_string()).unwrap();
        assert_eq!(value["successHosts"][0], "good");
        assert_eq!(value["failHosts"][0]["identity"], "bad");
        assert_eq!(value["failHosts"][0]["Error"], "boom");
        assert!(value.get("error").is_none());
    }
}
