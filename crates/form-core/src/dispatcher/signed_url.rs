//! V4 signed-URL policy: validate, pre-flight, and refresh (spec.md
//! §4.3.2).

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};

use crate::contracts::{FormError, FormResult};
use crate::net_safety::validate_outbound_url;

const PREFLIGHT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);
const REQUIRED_HOST_SUFFIX: &str = "storage.googleapis.com";
const REQUIRED_ALGORITHM: &str = "GOOG4-RSA-SHA256";

/// Seam over whatever actually produces a V4 signed URL (a GCS service
/// account key signer in production, a fixture in tests).
#[async_trait]
pub trait SignedUrlSigner: Send + Sync {
    async fn sign(&self, bucket: &str, object: &str, ttl_hours: i64) -> FormResult<String>;
}

/// Rejects anything that isn't a `storage.googleapis.com` V4-signed GET
/// for exactly the declared bucket/object (spec.md §4.3.2).
pub fn validate_signed_url(url: &str, bucket: &str, object: &str) -> FormResult<url::Url> {
    let parsed = validate_outbound_url(url)?;
    if parsed.scheme() != "https" {
        return Err(FormError::validation("signed URL must use https"));
    }
    let host = parsed.host_str().unwrap_or_default();
    if !host.ends_with(REQUIRED_HOST_SUFFIX) {
        return Err(FormError::validation(format!(
            "signed URL host must end with {REQUIRED_HOST_SUFFIX}"
        )));
    }
    let expected_path = format!("/{bucket}/{object}");
    if parsed.path() != expected_path {
        return Err(FormError::validation(
            "signed URL path does not match the declared bucket/object",
        ));
    }
    let has_algorithm = parsed
        .query_pairs()
        .any(|(k, v)| k == "X-Goog-Algorithm" && v == REQUIRED_ALGORITHM);
    if !has_algorithm {
        return Err(FormError::validation(format!(
            "signed URL must carry X-Goog-Algorithm={REQUIRED_ALGORITHM}"
        )));
    }
    Ok(parsed)
}

/// Parses `X-Goog-Date` (`yyyyMMddTHHmmssZ`) and `X-Goog-Expires`
/// (seconds) out of the query string, returning the URL's expiry
/// instant.
fn expires_at(url: &url::Url) -> Option<DateTime<Utc>> {
    let mut goog_date = None;
    let mut goog_expires = None;
    for (k, v) in url.query_pairs() {
        match k.as_ref() {
            "X-Goog-Date" => goog_date = Some(v.into_owned()),
            "X-Goog-Expires" => goog_expires = v.parse::<i64>().ok(),
            _ => {}
        }
    }
    let date = DateTime::parse_from_str(&format!("{}+0000", goog_date?), "%Y%m%dT%H%M%SZ%z").ok()?;
    Some(date.with_timezone(&Utc) + ChronoDuration::seconds(goog_expires?))
}

/// Whether the signed URL should be treated as expired: the pre-flight
/// HEAD returned >=400, or the remaining lifetime is at or below
/// `refresh_threshold_seconds` (spec.md §4.3.2).
pub fn needs_refresh(preflight_status: Option<u16>, expires: Option<DateTime<Utc>>, refresh_threshold_seconds: i64) -> bool {
    if let Some(status) = preflight_status {
        if status >= 400 {
            return true;
        }
    }
    match expires {
        Some(expires) => (expires - Utc::now()).num_seconds() <= refresh_threshold_seconds,
        None => true,
    }
}

/// Issues a HEAD request against the signed URL and returns its status
/// code; network failures are treated as "needs refresh" by the caller.
pub async fn preflight_head(url: &str) -> FormResult<u16> {
    let client = reqwest::Client::builder()
        .timeout(PREFLIGHT_TIMEOUT)
        .build()
        .map_err(|e| FormError::internal(format!("failed to build HTTP client: {e}")))?;
    let response = client
        .head(url)
        .send()
        .await
        .map_err(|e| FormError::provider(format!("signed URL pre-flight failed: {e}"), true))?;
    Ok(response.status().as_u16())
}

/// Ensures a fresh signed URL for `bucket/object`: validates the
/// current one, pre-flights it, and re-signs with `TTL =
/// max(1, ttl_hours)` if it fails validation, the pre-flight fails, or
/// it is within `refresh_threshold_seconds` of expiry.
pub async fn ensure_fresh_signed_url(
    signer: &dyn SignedUrlSigner,
    current_url: &str,
    bucket: &str,
    object: &str,
    ttl_hours: i64,
    refresh_threshold_seconds: i64,
) -> FormResult<String> {
    let ttl_hours = ttl_hours.max(1);
    let validated = validate_signed_url(current_url, bucket, object);
    let (preflight_status, expires) = match &validated {
        Ok(parsed) => {
            let status = preflight_head(current_url).await.ok();
            (status, expires_at(parsed))
        }
        Err(_) => (None, None),
    };

    if validated.is_ok() && !needs_refresh(preflight_status, expires, refresh_threshold_seconds) {
        return Ok(current_url.to_string());
    }
    signer.sign(bucket, object, ttl_hours).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signed_url(expires_seconds_from_now: i64) -> String {
        let date = Utc::now().format("%Y%m%dT%H%M%SZ").to_string();
        format!(
            "https://storage.googleapis.com/my-bucket/config.json?X-Goog-Algorithm=GOOG4-RSA-SHA256&X-Goog-Date={date}&X-Goog-Expires={expires_seconds_from_now}"
        )
    }

    #[test]
    fn rejects_non_gcs_host() {
        let err = validate_signed_url("https://evil.example.com/my-bucket/config.json?X-Goog-Algorithm=GOOG4-RSA-SHA256", "my-bucket", "config.json");
        assert!(err.is_err());
    }

    #[test]
    fn rejects_mismatched_bucket_object() {
        let url = signed_url(3600);
        assert!(validate_signed_url(&url, "other-bucket", "config.json").is_err());
    }

    #[test]
    fn accepts_matching_signed_url() {
        let url = signed_url(3600);
        assert!(validate_signed_url(&url, "my-bucket", "config.json").is_ok());
    }

    #[test]
    fn needs_refresh_when_close_to_expiry() {
        let url = validate_signed_url(&signed_url(30), "my-bucket", "config.json").unwrap();
        let expires = expires_at(&url);
        assert!(needs_refresh(Some(200), expires, 60));
    }

    #[test]
    fn does_not_need_refresh_well_before_expiry() {
        let url = validate_signed_url(&signed_url(7200), "my-bucket", "config.json").unwrap();
        let expires = expires_at(&url);
        assert!(!needs_refresh(Some(200), expires, 60));
    }

    #[test]
    fn preflight_failure_status_forces_refresh() {
        assert!(needs_refresh(Some(404), Some(Utc::now() + ChronoDuration::hours(1)), 60));
    }
}
