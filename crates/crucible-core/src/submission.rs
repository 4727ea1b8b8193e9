//! Change events, refs and submissions.

use crate::ids::{RefId, RepositoryId, SubmissionId, UserId};
use crate::naming::{is_owner_repo, is_sha, qualify_branch};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An incoming change event: a push, a pull request, or a manual request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionRequest {
    /// Repository being tested against. May be empty for manual submissions.
    #[serde(default)]
    pub parent: String,
    /// Repository carrying the change.
    pub fork: String,
    /// SHA or branch name of the change.
    pub head_sha: String,
    /// SHA or branch name to diff against; all zeros for a new branch.
    #[serde(default)]
    pub base_sha: String,
    /// Pull request number, if any.
    #[serde(default)]
    pub ticket_id: Option<i64>,
    #[serde(default)]
    pub submitted_by: Option<String>,
    /// Test every task rather than only the ones touched by the diff.
    #[serde(default)]
    pub all: bool,
    /// Requested by a person rather than a hook.
    #[serde(default)]
    pub manual: bool,
}

impl SubmissionRequest {
    /// Check the request and normalize branch names to `heads/<name>`.
    pub fn validate(&mut self) -> Result<()> {
        if !self.manual {
            if !is_owner_repo(&self.parent) {
                return Err(Error::Validation(format!(
                    "invalid parent repository {:?}",
                    self.parent
                )));
            }
            if self.all {
                return Err(Error::Validation(
                    "hook-triggered submissions may not force all".into(),
                ));
            }
        } else if !self.parent.is_empty() && !is_owner_repo(&self.parent) {
            return Err(Error::Validation(format!(
                "invalid parent repository {:?}",
                self.parent
            )));
        }

        if !is_owner_repo(&self.fork) {
            return Err(Error::Validation(format!(
                "invalid fork repository {:?}",
                self.fork
            )));
        }

        if self.head_sha.trim().is_empty() {
            return Err(Error::Validation("head sha is empty".into()));
        }
        if !is_sha(&self.head_sha) {
            self.head_sha = qualify_branch(&self.head_sha)?;
        }

        if self.base_sha.trim().is_empty() {
            if !self.manual {
                return Err(Error::Validation("base sha is empty".into()));
            }
        } else if !is_sha(&self.base_sha) {
            self.base_sha = qualify_branch(&self.base_sha)?;
        }

        Ok(())
    }
}

/// A (repository, ref name, SHA) tuple. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ref {
    pub id: RefId,
    pub repository_id: RepositoryId,
    pub ref_name: String,
    pub sha: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRef {
    pub repository_id: RepositoryId,
    pub ref_name: String,
    pub sha: String,
}

impl NewRef {
    pub fn validate(&self) -> Result<()> {
        if self.ref_name.is_empty() {
            return Err(Error::Validation("ref name is empty".into()));
        }
        if self.sha.len() != 40 {
            return Err(Error::Validation(format!(
                "sha {:?} is not 40 characters",
                self.sha
            )));
        }
        Ok(())
    }
}

/// One accepted change event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub id: SubmissionId,
    pub base_ref_id: RefId,
    pub head_ref_id: Option<RefId>,
    pub user_id: Option<UserId>,
    pub ticket_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSubmission {
    pub base_ref_id: RefId,
    pub head_ref_id: Option<RefId>,
    pub user_id: Option<UserId>,
    pub ticket_id: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SHA: &str = "be3d26c478991039e951097f2c99f56b55396940";

    fn hook() -> SubmissionRequest {
        SubmissionRequest {
            parent: "erikh/foobar".into(),
            fork: "erikh/foobar".into(),
            head_sha: SHA.into(),
            base_sha: crate::naming::ZERO_SHA.into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_hook_submission_validates() {
        let mut req = hook();
        req.validate().unwrap();
        assert_eq!(req.head_sha, SHA);
    }

    #[test]
    fn test_hook_may_not_force_all() {
        let mut req = hook();
        req.all = true;
        assert!(req.validate().unwrap_err().is_validation());
    }

    #[test]
    fn test_branch_names_are_qualified() {
        let mut req = hook();
        req.head_sha = "refs/heads/feature".into();
        req.base_sha = "master".into();
        req.validate().unwrap();
        assert_eq!(req.head_sha, "heads/feature");
        assert_eq!(req.base_sha, "heads/master");
    }

    #[test]
    fn test_manual_without_parent_or_base() {
        let mut req = SubmissionRequest {
            fork: "erikh/foobar".into(),
            head_sha: "master".into(),
            manual: true,
            all: true,
            ..Default::default()
        };
        req.validate().unwrap();
        assert_eq!(req.head_sha, "heads/master");
    }

    #[test]
    fn test_rejects_bad_names() {
        let mut req = hook();
        req.fork = "nope".into();
        assert!(req.validate().is_err());

        let mut req = hook();
        req.parent = "a/b/c".into();
        assert!(req.validate().is_err());

        let mut req = hook();
        req.head_sha = "  ".into();
        assert!(req.validate().is_err());

        let mut req = hook();
        req.base_sha = String::new();
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_new_ref_validation() {
        let good = NewRef {
            repository_id: RepositoryId::new(1),
            ref_name: "heads/master".into(),
            sha: SHA.into(),
        };
        good.validate().unwrap();

        let short = NewRef {
            sha: "abc".into(),
            ..good.clone()
        };
        assert!(short.validate().is_err());

        let unnamed = NewRef {
            ref_name: String::new(),
            ..good
        };
        assert!(unnamed.validate().is_err());
    }
}
