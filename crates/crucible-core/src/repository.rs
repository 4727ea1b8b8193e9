//! Repository and user types.

use crate::ids::{RepositoryId, UserId};
use crate::naming::{self, DEFAULT_MAIN_BRANCH};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
}

/// A repository known to the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repository {
    pub id: RepositoryId,
    /// `owner/name`, unique.
    pub name: String,
    pub owner_id: UserId,
    pub private: bool,
    pub disabled: bool,
    pub auto_created: bool,
    /// Opaque metadata from the source host.
    pub upstream: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl Repository {
    /// The default branch in `heads/<name>` form.
    pub fn main_branch(&self) -> String {
        qualified_main_branch(
            self.upstream
                .get("default_branch")
                .and_then(|v| v.as_str())
                .unwrap_or_default(),
        )
    }

    pub fn owner_repo(&self) -> crate::Result<(&str, &str)> {
        naming::owner_repo(&self.name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRepository {
    pub name: String,
    pub owner_id: UserId,
    pub private: bool,
    pub disabled: bool,
    pub auto_created: bool,
    pub upstream: serde_json::Value,
}

impl NewRepository {
    /// A disabled record registered on first sight of a fork.
    pub fn auto_created(remote: &RemoteRepository, owner_id: UserId) -> Self {
        Self {
            name: remote.full_name.clone(),
            owner_id,
            private: remote.private,
            disabled: true,
            auto_created: true,
            upstream: remote.to_upstream(),
        }
    }
}

/// Repository metadata as reported by the source host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRepository {
    pub full_name: String,
    #[serde(default)]
    pub default_branch: String,
    #[serde(default)]
    pub private: bool,
    #[serde(default)]
    pub fork: bool,
    /// Full name of the upstream repository for forks.
    #[serde(default)]
    pub parent: Option<String>,
}

impl RemoteRepository {
    pub fn main_branch(&self) -> String {
        qualified_main_branch(&self.default_branch)
    }

    pub fn to_upstream(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

fn qualified_main_branch(default_branch: &str) -> String {
    if default_branch.is_empty() {
        DEFAULT_MAIN_BRANCH.to_string()
    } else {
        format!("heads/{default_branch}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo(upstream: serde_json::Value) -> Repository {
        Repository {
            id: RepositoryId::new(1),
            name: "erikh/foobar".into(),
            owner_id: UserId::new(1),
            private: false,
            disabled: false,
            auto_created: false,
            upstream,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_main_branch_from_upstream() {
        let r = repo(serde_json::json!({"default_branch": "main"}));
        assert_eq!(r.main_branch(), "heads/main");
    }

    #[test]
    fn test_main_branch_fallback() {
        assert_eq!(repo(serde_json::Value::Null).main_branch(), "heads/master");
        assert_eq!(
            repo(serde_json::json!({"default_branch": ""})).main_branch(),
            "heads/master"
        );
    }

    #[test]
    fn test_auto_created_record_is_disabled() {
        let remote = RemoteRepository {
            full_name: "someone/foobar".into(),
            default_branch: "master".into(),
            fork: true,
            parent: Some("erikh/foobar".into()),
            ..Default::default()
        };
        let new = NewRepository::auto_created(&remote, UserId::new(3));
        assert!(new.disabled);
        assert!(new.auto_created);
        assert_eq!(new.upstream["parent"], "erikh/foobar");
    }
}
