//! Metadata-server bearer token fetch, shared by `gcp_client` and
//! `gcs_signer`: the one piece of GCP auth both need and neither
//! should duplicate.

use serde_json::Value;

use crate::contracts::{FormError, FormResult};

const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

/// Reads an access token the way workloads on GCE/Cloud Run do: from
/// the instance metadata server, never a key file on disk.
pub async fn metadata_access_token(client: &reqwest::Client) -> FormResult<String> {
    let response = client
        .get(METADATA_TOKEN_URL)
        .header("Metadata-Flavor", "Google")
        .send()
        .await
        .map_err(|e| FormError::provider(format!("failed to reach metadata server: {e}"), true))?;
    let body: Value = response
        .json()
        .await
        .map_err(|e| FormError::provider(format!("metadata server returned unexpected body: {e}"), true))?;
    body["access_token"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| FormError::provider("metadata server response missing access_token", true))
}
