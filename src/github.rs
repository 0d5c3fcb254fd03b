use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::process::Command;

/// Thin adapter over the `gh` CLI. Every call tolerates a non-zero exit by
/// returning an error the caller can log-and-skip; nothing here talks to the
/// network directly.
pub struct GitHubAdapter {
    repo_root: std::path::PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Label {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IssueMeta {
    pub url: String,
    pub state: String,
    pub title: String,
    #[serde(default)]
    pub labels: Vec<Label>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PrMeta {
    pub state: String,
    #[serde(default)]
    pub labels: Vec<Label>,
    pub mergeable: String,
    #[serde(rename = "mergeStateStatus")]
    pub merge_state_status: String,
}

impl IssueMeta {
    pub fn has_label(&self, name: &str) -> bool {
        self.labels.iter().any(|l| l.name == name)
    }

    /// `gh issue view` happily resolves a PR number too; the URL containing
    /// "/pull/" is how we detect that mix-up.
    pub fn is_actually_a_pr(&self) -> bool {
        self.url.contains("/pull/")
    }
}

impl PrMeta {
    pub fn has_label(&self, name: &str) -> bool {
        self.labels.iter().any(|l| l.name == name)
    }

    pub fn is_mergeable_clean(&self) -> bool {
        self.mergeable == "MERGEABLE" && self.merge_state_status == "CLEAN"
    }
}

impl GitHubAdapter {
    pub fn new(repo_root: impl Into<std::path::PathBuf>) -> Self {
        GitHubAdapter { repo_root: repo_root.into() }
    }

    fn run(&self, args: &[&str]) -> Result<std::process::Output> {
        Command::new("gh")
            .args(args)
            .current_dir(&self.repo_root)
            .output()
            .with_context(|| format!("failed to execute gh {}", args.join(" ")))
    }

    pub fn issue_view(&self, issue: u64) -> Result<IssueMeta> {
        let n = issue.to_string();
        let output = self.run(&["issue", "view", &n, "--json", "url,state,title,labels"])?;
        if !output.status.success() || output.stdout.is_empty() {
            bail!("gh issue view {issue} failed: {}", String::from_utf8_lossy(&output.stderr));
        }
        serde_json::from_slice(&output.stdout).context("failed to parse gh issue view output")
    }

    pub fn issue_add_label(&self, issue: u64, label: &str) -> Result<()> {
        let n = issue.to_string();
        let output = self.run(&["issue", "edit", &n, "--add-label", label])?;
        if !output.status.success() {
            bail!("gh issue edit --add-label failed: {}", String::from_utf8_lossy(&output.stderr));
        }
        Ok(())
    }

    pub fn issue_remove_label(&self, issue: u64, label: &str) -> Result<()> {
        let n = issue.to_string();
        let output = self.run(&["issue", "edit", &n, "--remove-label", label])?;
        if !output.status.success() {
            bail!("gh issue edit --remove-label failed: {}", String::from_utf8_lossy(&output.stderr));
        }
        Ok(())
    }

    /// Single-call label transition used by contract violations: remove one
    /// label and add another atomically from `gh`'s point of view.
    pub fn issue_transition_label(&self, issue: u64, remove: &str, add: &str) -> Result<()> {
        let n = issue.to_string();
        let output = self.run(&["issue", "edit", &n, "--remove-label", remove, "--add-label", add])?;
        if !output.status.success() {
            bail!("gh issue edit transition failed: {}", String::from_utf8_lossy(&output.stderr));
        }
        Ok(())
    }

    pub fn issue_comment(&self, issue: u64, body: &str) -> Result<()> {
        let n = issue.to_string();
        let output = self.run(&["issue", "comment", &n, "--body", body])?;
        if !output.status.success() {
            bail!("gh issue comment failed: {}", String::from_utf8_lossy(&output.stderr));
        }
        Ok(())
    }

    pub fn pr_view(&self, pr: u64) -> Result<PrMeta> {
        let n = pr.to_string();
        let output = self.run(&["pr", "view", &n, "--json", "state,labels,mergeable,mergeStateStatus"])?;
        if !output.status.success() || output.stdout.is_empty() {
            bail!("gh pr view {pr} failed: {}", String::from_utf8_lossy(&output.stderr));
        }
        serde_json::from_slice(&output.stdout).context("failed to parse gh pr view output")
    }

    /// Lists open issue numbers carrying `label`, one pipeline bucket at a time.
    pub fn issues_with_label(&self, label: &str) -> Result<Vec<u64>> {
        let output = self.run(&["issue", "list", "--label", label, "--json", "number", "--state", "open", "--limit", "200"])?;
        if !output.status.success() {
            bail!("gh issue list failed: {}", String::from_utf8_lossy(&output.stderr));
        }
        #[derive(Deserialize)]
        struct Entry {
            number: u64,
        }
        let entries: Vec<Entry> = serde_json::from_slice(&output.stdout).unwrap_or_default();
        Ok(entries.into_iter().map(|e| e.number).collect())
    }

    pub fn pr_for_issue(&self, issue: u64) -> Result<Option<u64>> {
        let output = self.run(&[
            "pr",
            "list",
            "--search",
            &format!("issue-{issue} in:head"),
            "--json",
            "number",
            "--state",
            "open",
        ])?;
        if !output.status.success() {
            bail!("gh pr list failed: {}", String::from_utf8_lossy(&output.stderr));
        }
        #[derive(Deserialize)]
        struct Entry {
            number: u64,
        }
        let entries: Vec<Entry> = serde_json::from_slice(&output.stdout).unwrap_or_default();
        Ok(entries.first().map(|e| e.number))
    }

    pub fn pr_merge(&self, pr: u64, squash: bool, delete_branch: bool) -> Result<()> {
        let n = pr.to_string();
        let mut args = vec!["pr", "merge", n.as_str()];
        if squash {
            args.push("--squash");
        }
        if delete_branch {
            args.push("--delete-branch");
        }
        let output = self.run(&args)?;
        if !output.status.success() {
            bail!("gh pr merge failed: {}", String::from_utf8_lossy(&output.stderr));
        }
        Ok(())
    }

    pub fn auth_status_ok(&self) -> bool {
        self.run(&["auth", "status"]).map(|o| o.status.success()).unwrap_or(false)
    }
}
