use crate::github::{GitHubAdapter, IssueMeta, PrMeta};

/// A precondition a phase must satisfy before it runs (direct translation
/// of the original `Contract`/`check_preconditions`).
pub struct Contract {
    pub name: &'static str,
    pub check: fn(&ContractInputs) -> bool,
    pub violation_message: &'static str,
    pub failure_label: Option<&'static str>,
}

pub struct ContractInputs<'a> {
    pub issue: Option<&'a IssueMeta>,
    pub pr: Option<&'a PrMeta>,
}

fn issue_exists(i: &ContractInputs) -> bool {
    i.issue.is_some()
}

fn issue_open(i: &ContractInputs) -> bool {
    i.issue.map(|m| m.state == "OPEN").unwrap_or(false)
}

fn issue_has_loom_issue_label(i: &ContractInputs) -> bool {
    i.issue.map(|m| m.has_label("loom:issue")).unwrap_or(false)
}

fn no_existing_pr(i: &ContractInputs) -> bool {
    i.pr.is_none()
}

fn pr_exists(i: &ContractInputs) -> bool {
    i.pr.is_some()
}

fn pr_open(i: &ContractInputs) -> bool {
    i.pr.map(|p| p.state == "OPEN").unwrap_or(false)
}

fn pr_has_review_requested(i: &ContractInputs) -> bool {
    i.pr.map(|p| p.has_label("loom:review-requested")).unwrap_or(false)
}

fn pr_has_changes_requested(i: &ContractInputs) -> bool {
    i.pr.map(|p| p.has_label("loom:changes-requested")).unwrap_or(false)
}

fn pr_has_loom_pr_label(i: &ContractInputs) -> bool {
    i.pr.map(|p| p.has_label("loom:pr")).unwrap_or(false)
}

pub const CURATOR_CONTRACTS: &[Contract] = &[
    Contract { name: "issue_exists", check: issue_exists, violation_message: "issue does not exist", failure_label: None },
    Contract { name: "issue_open", check: issue_open, violation_message: "issue is not open", failure_label: None },
];

pub const BUILDER_CONTRACTS: &[Contract] = &[
    Contract { name: "issue_exists", check: issue_exists, violation_message: "issue does not exist", failure_label: Some("loom:failed:builder") },
    Contract { name: "issue_open", check: issue_open, violation_message: "issue is not open", failure_label: Some("loom:failed:builder") },
    Contract {
        name: "has_loom_issue",
        check: issue_has_loom_issue_label,
        violation_message: "issue missing loom:issue label",
        failure_label: Some("loom:failed:builder"),
    },
    Contract { name: "no_existing_pr", check: no_existing_pr, violation_message: "a PR already exists for this issue", failure_label: None },
];

pub const JUDGE_CONTRACTS: &[Contract] = &[
    Contract { name: "pr_exists", check: pr_exists, violation_message: "PR does not exist", failure_label: Some("loom:failed:judge") },
    Contract { name: "pr_open", check: pr_open, violation_message: "PR is not open", failure_label: Some("loom:failed:judge") },
    Contract {
        name: "pr_review_requested",
        check: pr_has_review_requested,
        violation_message: "PR missing loom:review-requested label",
        failure_label: Some("loom:failed:judge"),
    },
];

pub const DOCTOR_CONTRACTS: &[Contract] = &[
    Contract { name: "pr_exists", check: pr_exists, violation_message: "PR does not exist", failure_label: Some("loom:failed:doctor") },
    Contract { name: "pr_open", check: pr_open, violation_message: "PR is not open", failure_label: Some("loom:failed:doctor") },
    Contract {
        name: "pr_changes_requested",
        check: pr_has_changes_requested,
        violation_message: "PR missing loom:changes-requested label",
        failure_label: Some("loom:failed:doctor"),
    },
];

pub const MERGE_CONTRACTS: &[Contract] = &[
    Contract { name: "pr_exists", check: pr_exists, violation_message: "PR does not exist", failure_label: None },
    Contract { name: "pr_has_loom_pr", check: pr_has_loom_pr_label, violation_message: "PR missing loom:pr label", failure_label: None },
];

#[derive(Debug)]
pub struct ContractViolation {
    pub contract_name: &'static str,
    pub message: &'static str,
    pub failure_label: Option<&'static str>,
}

/// Checks contracts strictly in order, returning the first violation.
pub fn check_preconditions(contracts: &[Contract], inputs: &ContractInputs) -> Option<ContractViolation> {
    for contract in contracts {
        if !(contract.check)(inputs) {
            return Some(ContractViolation {
                contract_name: contract.name,
                message: contract.violation_message,
                failure_label: contract.failure_label,
            });
        }
    }
    None
}

/// Removes loom:building, applies the failure label if any, and always
/// posts a diagnostic comment.
pub fn apply_contract_violation(
    github: &GitHubAdapter,
    issue: u64,
    phase: &str,
    violation: &ContractViolation,
) -> anyhow::Result<()> {
    if let Some(label) = violation.failure_label {
        github.issue_transition_label(issue, "loom:building", label)?;
    } else {
        let _ = github.issue_remove_label(issue, "loom:building");
    }
    let body = format!(
        "Contract violated in phase `{phase}`: `{}`\n\n{}",
        violation.contract_name, violation.message
    );
    github.issue_comment(issue, &body)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_issue_with(labels: &[&str]) -> IssueMeta {
        IssueMeta {
            url: "https://github.com/x/y/issues/1".into(),
            state: "OPEN".into(),
            title: "t".into(),
            labels: labels.iter().map(|l| crate::github::Label { name: l.to_string() }).collect(),
        }
    }

    #[test]
    fn first_violation_short_circuits_the_rest() {
        let inputs = ContractInputs { issue: None, pr: None };
        let violation = check_preconditions(BUILDER_CONTRACTS, &inputs).unwrap();
        assert_eq!(violation.contract_name, "issue_exists");
    }

    #[test]
    fn builder_passes_with_open_issue_and_label_and_no_pr() {
        let issue = open_issue_with(&["loom:issue"]);
        let inputs = ContractInputs { issue: Some(&issue), pr: None };
        assert!(check_preconditions(BUILDER_CONTRACTS, &inputs).is_none());
    }

    #[test]
    fn builder_contract_violation_carries_no_failure_label_for_existing_pr() {
        let issue = open_issue_with(&["loom:issue"]);
        let pr = PrMeta { state: "OPEN".into(), labels: vec![], mergeable: "UNKNOWN".into(), merge_state_status: "UNKNOWN".into() };
        let inputs = ContractInputs { issue: Some(&issue), pr: Some(&pr) };
        let violation = check_preconditions(BUILDER_CONTRACTS, &inputs).unwrap();
        assert_eq!(violation.contract_name, "no_existing_pr");
        assert!(violation.failure_label.is_none());
    }

    #[test]
    fn merge_contract_has_no_failure_label() {
        assert!(MERGE_CONTRACTS.iter().all(|c| c.failure_label.is_none()));
    }
}
