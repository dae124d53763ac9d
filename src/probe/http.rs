//! HTTP probe implementation.

use std::time::Duration;

use super::ProbeError;

/// Whether an HTTP status counts as the target being up.
pub fn is_success(status: u16) -> bool {
    (200..400).contains(&status)
}

/// Run a single GET against `url` with the client's bounded timeout.
///
/// Returns the response status code. The body is not read; latency is
/// measured to the response head.
pub async fn run_http_probe(
    client: &reqwest::Client,
    url: &str,
    timeout: Duration,
) -> Result<u16, ProbeError> {
    let response = client
        .get(url)
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| {
            if e.is_timeout() {
                ProbeError::Timeout(timeout)
            } else {
                ProbeError::Network(e.to_string())
            }
        })?;

    Ok(response.status().as_u16())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_range() {
        for status in 100..600u16 {
            assert_eq!(is_success(status), (200..400).contains(&status), "status {}", status);
        }
        assert!(is_success(200));
        assert!(is_success(399));
        assert!(!is_success(199));
        assert!(!is_success(400));
    }

    #[tokio::test]
    async fn test_http_probe_invalid_url() {
        let client = reqwest::Client::new();
        let result = run_http_probe(&client, "http://256.256.256.256", Duration::from_millis(100)).await;
        assert!(result.is_err());
    }
}
