//! Resolver calling the git service over HTTP.

use std::time::Duration;

use async_trait::async_trait;
use http::StatusCode;
use serde::Deserialize;
use url::Url;

use crate::model::Repository;

use super::{GitRefResolver, RefError, RefInfo, RefKind};

#[derive(Debug, Deserialize)]
struct RefResponse {
    sha: String,
}

/// Resolves refs through `GET {base}/repos/{git_uid}/refs/{heads|tags}/{name}`.
///
/// A 404 means the ref does not exist. Transport failures and every other
/// non-success status are reported as transient; no retries happen here.
#[derive(Debug, Clone)]
pub struct HttpRefResolver {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpRefResolver {
    /// Creates a resolver for the service at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns the underlying error when the HTTP client cannot be built.
    pub fn new(base_url: Url, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base_url })
    }

    fn ref_url(&self, repo: &Repository, name: &str, kind: RefKind) -> Result<Url, RefError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| RefError::Transient {
                message: format!("git service URL {} cannot be a base", self.base_url),
            })?
            .pop_if_empty()
            .extend(["repos", repo.git_uid.as_str(), "refs", kind.as_str()])
            .extend(name.split('/'));
        Ok(url)
    }
}

#[async_trait]
impl GitRefResolver for HttpRefResolver {
    async fn resolve_ref(
        &self,
        repo: &Repository,
        name: &str,
        kind: RefKind,
    ) -> Result<RefInfo, RefError> {
        if name.is_empty() {
            return Err(RefError::NotFound {
                name: String::new(),
                kind,
            });
        }

        let url = self.ref_url(repo, name, kind)?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|error| RefError::Transient {
                message: format!("git service request failed: {error}"),
            })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(RefError::NotFound {
                name: name.to_owned(),
                kind,
            });
        }
        if !status.is_success() {
            return Err(RefError::Transient {
                message: format!("git service returned {status} for {kind} {name}"),
            });
        }

        let body: RefResponse = response.json().await.map_err(|error| RefError::Transient {
            message: format!("git service returned an unreadable body: {error}"),
        })?;

        Ok(RefInfo {
            name: name.to_owned(),
            kind,
            sha: body.sha,
        })
    }
}
