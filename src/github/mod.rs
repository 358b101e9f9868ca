//! GitHub provider client
//!
//! Thin wrapper over the GitHub REST API for the three calls the transfer
//! state machine needs: collaborator invitation, collaborator-access check
//! and repository ownership transfer. The trait seam lets tests substitute a
//! mock host. The seller's access token is fetched just-in-time per call and
//! never stored on the client.

use axum::async_trait;
use reqwest::StatusCode;
use serde_json::json;
use thiserror::Error;

use crate::error::ApiError;

/// Provider call failure
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("GitHub request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("GitHub returned unexpected status {0}")]
    UnexpectedStatus(u16),
}

impl From<ProviderError> for ApiError {
    fn from(err: ProviderError) -> Self {
        ApiError::ExternalServiceError(err.to_string())
    }
}

/// A repository identified as `owner/repo`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoRef {
    pub owner: String,
    pub repo: String,
}

impl RepoRef {
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }
}

/// Extract `owner` and `repo` from a repository URL.
///
/// Accepts `https://<host>/<owner>/<repo>[.git][/...]`. Returns `None` on
/// non-matching input; callers treat `None` as a distinct "cannot verify"
/// state, not an error.
pub fn parse_repo_url(url: &str) -> Option<RepoRef> {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))?;

    let mut segments = rest.split('/').filter(|s| !s.is_empty());
    let _host = segments.next()?;
    let owner = segments.next()?;
    let repo = segments.next()?;

    let repo = repo.strip_suffix(".git").unwrap_or(repo);
    if owner.is_empty() || repo.is_empty() {
        return None;
    }

    Some(RepoRef {
        owner: owner.to_string(),
        repo: repo.to_string(),
    })
}

/// Code-hosting provider operations used by the transfer state machine
#[async_trait]
pub trait CodeHost: Send + Sync {
    /// Invite `username` as a collaborator on the repository.
    async fn send_collaborator_invite(
        &self,
        repo: &RepoRef,
        username: &str,
        token: &str,
    ) -> Result<(), ProviderError>;

    /// Whether `username` has accepted collaborator access.
    ///
    /// GitHub only lists a user under `/collaborators` once the invitation
    /// is accepted, so presence is the acceptance signal.
    async fn check_collaborator_access(
        &self,
        repo: &RepoRef,
        username: &str,
        token: &str,
    ) -> Result<bool, ProviderError>;

    /// Transfer repository ownership to `new_owner`.
    async fn transfer_repository_ownership(
        &self,
        repo: &RepoRef,
        new_owner: &str,
        token: &str,
    ) -> Result<(), ProviderError>;
}

/// GitHub REST API client
pub struct GithubClient {
    http: reqwest::Client,
    api_url: String,
}

impl GithubClient {
    pub fn new(api_url: String, timeout: std::time::Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("shipwright-backend")
            .build()
            .unwrap_or_default();

        Self { http, api_url }
    }

    fn repo_endpoint(&self, repo: &RepoRef, tail: &str) -> String {
        format!("{}/repos/{}/{}{}", self.api_url, repo.owner, repo.repo, tail)
    }
}

#[async_trait]
impl CodeHost for GithubClient {
    async fn send_collaborator_invite(
        &self,
        repo: &RepoRef,
        username: &str,
        token: &str,
    ) -> Result<(), ProviderError> {
        let url = self.repo_endpoint(repo, &format!("/collaborators/{}", username));

        let response = self
            .http
            .put(&url)
            .bearer_auth(token)
            .header("Accept", "application/vnd.github+json")
            .json(&json!({ "permission": "pull" }))
            .send()
            .await?;

        match response.status() {
            // 201 = invitation created, 204 = already a collaborator
            StatusCode::CREATED | StatusCode::NO_CONTENT => Ok(()),
            status => Err(ProviderError::UnexpectedStatus(status.as_u16())),
        }
    }

    async fn check_collaborator_access(
        &self,
        repo: &RepoRef,
        username: &str,
        token: &str,
    ) -> Result<bool, ProviderError> {
        let url = self.repo_endpoint(repo, &format!("/collaborators/{}", username));

        let response = self
            .http
            .get(&url)
            .bearer_auth(token)
            .header("Accept", "application/vnd.github+json")
            .send()
            .await?;

        match response.status() {
            StatusCode::NO_CONTENT => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(ProviderError::UnexpectedStatus(status.as_u16())),
        }
    }

    async fn transfer_repository_ownership(
        &self,
        repo: &RepoRef,
        new_owner: &str,
        token: &str,
    ) -> Result<(), ProviderError> {
        let url = self.repo_endpoint(repo, "/transfer");

        let response = self
            .http
            .post(&url)
            .bearer_auth(token)
            .header("Accept", "application/vnd.github+json")
            .json(&json!({ "new_owner": new_owner }))
            .send()
            .await?;

        match response.status() {
            StatusCode::ACCEPTED => Ok(()),
            status => Err(ProviderError::UnexpectedStatus(status.as_u16())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_repo_url_basic() {
        let repo = parse_repo_url("https://github.com/octocat/hello-world").unwrap();
        assert_eq!(repo.owner, "octocat");
        assert_eq!(repo.repo, "hello-world");
        assert_eq!(repo.full_name(), "octocat/hello-world");
    }

    #[test]
    fn test_parse_repo_url_git_suffix_and_trailing_path() {
        let repo = parse_repo_url("https://github.com/octocat/hello-world.git").unwrap();
        assert_eq!(repo.repo, "hello-world");

        let repo = parse_repo_url("https://github.com/octocat/hello-world/tree/main").unwrap();
        assert_eq!(repo.repo, "hello-world");
    }

    #[test]
    fn test_parse_repo_url_rejects_non_matching() {
        assert!(parse_repo_url("not a url").is_none());
        assert!(parse_repo_url("https://github.com/only-owner").is_none());
        assert!(parse_repo_url("ftp://github.com/a/b").is_none());
        assert!(parse_repo_url("").is_none());
    }
}
