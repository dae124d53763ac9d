//! Best-effort push of the worker metrics to a Prometheus Pushgateway.

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::Url;
use std::time::Duration;
use thiserror::Error;

use super::TEXT_CONTENT_TYPE;
use crate::config::{PushAuth, PushConfig};

/// Pushgateway job name for this worker.
pub const JOB_NAME: &str = "status_worker";

#[derive(Error, Debug)]
pub enum PushError {
    #[error("pushgateway url cannot take a path: {0}")]
    InvalidUrl(String),
    #[error("push request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("pushgateway answered {0}")]
    Status(u16),
}

/// Sends metrics to `<gateway>/metrics/job/status_worker[/owner/<owner>]`.
#[derive(Clone)]
pub struct Pusher {
    client: reqwest::Client,
    url: Url,
    auth: Option<PushAuth>,
}

impl Pusher {
    /// `owner` becomes the grouping label; `None` pushes ungrouped.
    pub fn new(config: &PushConfig, owner: Option<&str>) -> Result<Self, PushError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            url: push_url(&config.url, owner)?,
            auth: config.auth.clone(),
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Push one exposition body, adding to whatever the group already holds.
    pub async fn push(&self, body: String) -> Result<(), PushError> {
        let mut request = self
            .client
            .post(self.url.clone())
            .header(CONTENT_TYPE, TEXT_CONTENT_TYPE)
            .body(body);

        request = match &self.auth {
            Some(PushAuth::Header(value)) => request.header(AUTHORIZATION, value),
            Some(PushAuth::Basic { user, password }) => request.basic_auth(user, Some(password)),
            None => request,
        };

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(PushError::Status(response.status().as_u16()));
        }
        Ok(())
    }

    /// Fire-and-forget push; failures are logged and never reach the caller.
    pub fn push_in_background(&self, body: String) {
        let pusher = self.clone();
        tokio::spawn(async move {
            match pusher.push(body).await {
                Ok(()) => tracing::debug!("Metrics: pushed to {}", pusher.url),
                Err(e) => tracing::error!("Metrics: pushgateway push failed: {}", e),
            }
        });
    }
}

/// Build the grouping url for the job and optional owner label.
pub fn push_url(base: &Url, owner: Option<&str>) -> Result<Url, PushError> {
    let mut url = base.clone();
    {
        let mut segments = url
            .path_segments_mut()
            .map_err(|_| PushError::InvalidUrl(base.to_string()))?;
        segments.pop_if_empty().extend(["metrics", "job", JOB_NAME]);
        if let Some(owner) = owner {
            segments.extend(["owner", owner]);
        }
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::spawn_push_gateway;

    #[test]
    fn test_push_url_grouping() {
        let base = Url::parse("http://push.test:9091").unwrap();
        assert_eq!(
            push_url(&base, None).unwrap().as_str(),
            "http://push.test:9091/metrics/job/status_worker"
        );
        assert_eq!(
            push_url(&base, Some("host-1:42:abc123")).unwrap().as_str(),
            "http://push.test:9091/metrics/job/status_worker/owner/host-1:42:abc123"
        );

        let nested = Url::parse("http://push.test/gateway/").unwrap();
        assert_eq!(
            push_url(&nested, Some("a b")).unwrap().as_str(),
            "http://push.test/gateway/metrics/job/status_worker/owner/a%20b"
        );
    }

    #[test]
    fn test_push_url_rejects_opaque_base() {
        let base = Url::parse("mailto:ops@example.com").unwrap();
        assert!(matches!(push_url(&base, None), Err(PushError::InvalidUrl(_))));
    }

    #[tokio::test]
    async fn test_push_posts_body_with_auth() {
        let (addr, mut rx) = spawn_push_gateway().await;

        let config = PushConfig {
            url: Url::parse(&format!("http://{}", addr)).unwrap(),
            auth: Some(PushAuth::Header("Basic dXNlcjpwYXNz".to_string())),
        };
        let pusher = Pusher::new(&config, Some("worker-a")).unwrap();
        pusher.push("status_worker_checks_total 1\n".to_string()).await.unwrap();

        let seen = rx.recv().await.unwrap();
        assert_eq!(seen.path, "/metrics/job/status_worker/owner/worker-a");
        assert_eq!(seen.auth.as_deref(), Some("Basic dXNlcjpwYXNz"));
        assert_eq!(seen.body, "status_worker_checks_total 1\n");
    }

    #[tokio::test]
    async fn test_push_to_dead_gateway_errors() {
        let addr = crate::testutil::unused_addr();
        let config = PushConfig {
            url: Url::parse(&format!("http://{}", addr)).unwrap(),
            auth: None,
        };
        let pusher = Pusher::new(&config, None).unwrap();
        assert!(matches!(
            pusher.push(String::new()).await,
            Err(PushError::Request(_))
        ));
    }
}
