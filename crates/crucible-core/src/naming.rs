//! Repository, SHA and branch naming rules.

use crate::{Error, Result};

/// The all-zero SHA the source host reports for "no commit" (new or deleted
/// branches).
pub const ZERO_SHA: &str = "0000000000000000000000000000000000000000";

/// Branch assumed when a repository's upstream metadata names no default.
pub const DEFAULT_MAIN_BRANCH: &str = "heads/master";

/// Run name prefix used for tasks at the repository root.
pub const ROOT_RUN_PREFIX: &str = "*root*";

/// Split an `owner/name` repository name into its two parts.
pub fn owner_repo(name: &str) -> Result<(&str, &str)> {
    let mut parts = name.split('/');
    let (Some(owner), Some(repo), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(Error::Validation(format!(
            "repository name {name:?}: invalid number of parts"
        )));
    };

    for part in [owner, repo] {
        if part.is_empty() {
            return Err(Error::Validation(format!(
                "repository name {name:?}: part is empty"
            )));
        }
        if part.starts_with('.')
            || part.ends_with('.')
            || part.contains(['<', '>', '&', '%'])
        {
            return Err(Error::Validation(format!(
                "repository name {name:?} contains invalid characters"
            )));
        }
    }

    Ok((owner, repo))
}

pub fn is_owner_repo(name: &str) -> bool {
    owner_repo(name).is_ok()
}

/// Whether the string looks like a full hex SHA-1 digest.
pub fn is_sha(sha: &str) -> bool {
    let sha = sha.trim();
    sha.len() == 40 && sha.chars().all(|c| c.is_ascii_hexdigit())
}

pub fn is_zero_sha(sha: &str) -> bool {
    sha == ZERO_SHA
}

/// Normalize a branch name to the internal `heads/<name>` form.
pub fn qualify_branch(branch: &str) -> Result<String> {
    if is_sha(branch) {
        return Err(Error::Validation(format!(
            "{branch:?} is not a branch; is a sha"
        )));
    }

    if branch.starts_with('/') {
        return Err(Error::Validation(format!("invalid branch name {branch:?}")));
    }

    let branch = branch.trim();
    let branch = branch.strip_prefix("refs/heads/").unwrap_or(branch);

    let cleaned: Vec<&str> = branch
        .split('/')
        .map(str::trim)
        .filter(|p| !p.is_empty() && *p != "." && *p != "..")
        .collect();

    match cleaned.as_slice() {
        [] => Err(Error::Validation(format!(
            "branch {branch:?}: paths were invalid"
        ))),
        ["heads"] => Err(Error::Validation(format!(
            "branch {branch:?}: paths were invalid"
        ))),
        ["heads", ..] => Ok(cleaned.join("/")),
        _ => Ok(format!("heads/{}", cleaned.join("/"))),
    }
}

/// Name a run after its task directory: `<dir>:<run>`, with the repository
/// root spelled `*root*`.
pub fn run_name(dir: &str, run: &str) -> String {
    let dir = if dir.is_empty() || dir == "." {
        ROOT_RUN_PREFIX
    } else {
        dir
    };
    format!("{dir}:{run}")
}

/// Directory portion of a slash-separated path; `"."` for top-level files.
pub fn parent_dir(path: &str) -> &str {
    match path.trim_end_matches('/').rsplit_once('/') {
        Some(("", _)) => "/",
        Some((dir, _)) => dir,
        None => ".",
    }
}

/// Base name of a slash-separated path.
pub fn base_name(path: &str) -> &str {
    let path = path.trim_end_matches('/');
    path.rsplit_once('/').map_or(path, |(_, base)| base)
}
