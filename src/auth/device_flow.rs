use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

use super::store::AuthCredential;
use crate::config::AuthConfig;
use crate::error::AuthError;

const DEVICE_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:device_code";
const SLOW_DOWN_STEP: Duration = Duration::from_secs(5);

/// Response from the device authorization endpoint. Valid for `expires_in`
/// seconds from issuance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceAuthorization {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    pub expires_in: u64,
    #[serde(default = "default_interval")]
    pub interval: u64,
}

fn default_interval() -> u64 {
    5
}

#[derive(Debug, Clone, Deserialize)]
struct AccessTokenGrant {
    access_token: String,
}

#[derive(Debug, Clone, Deserialize)]
struct DeviceTokenError {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum DeviceTokenResponse {
    Granted(AccessTokenGrant),
    Pending(DeviceTokenError),
}

/// Request a device code for the configured client id and scope.
pub async fn request_device_code(
    http: &reqwest::Client,
    config: &AuthConfig,
) -> Result<DeviceAuthorization, AuthError> {
    let response = http
        .post(&config.device_code_url)
        .header("Accept", "application/json")
        .json(&serde_json::json!({
            "client_id": config.client_id,
            "scope": config.scope,
        }))
        .send()
        .await?;

    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        return Err(match serde_json::from_str::<DeviceTokenError>(&body) {
            Ok(err) => AuthError::device_flow(format!(
                "device code error: {} - {}",
                err.error,
                err.error_description.unwrap_or_default()
            )),
            Err(_) => AuthError::device_flow(format!("device code request returned {status}")),
        });
    }

    serde_json::from_str(&body)
        .map_err(|e| AuthError::device_flow(format!("failed to parse device code response: {e}")))
}

/// Poll the access token endpoint until the user authorizes the device or the
/// code expires.
pub async fn poll_for_token(
    http: &reqwest::Client,
    config: &AuthConfig,
    device: &DeviceAuthorization,
) -> Result<AuthCredential, AuthError> {
    let started = Instant::now();
    let expires_after = Duration::from_secs(device.expires_in);
    let mut interval = Duration::from_secs(device.interval);

    loop {
        let remaining = expires_after.saturating_sub(started.elapsed());
        if remaining.is_zero() {
            return Err(AuthError::DeviceFlowExpired);
        }

        tokio::time::sleep(interval.min(remaining)).await;

        // The code may have expired while we slept
        if started.elapsed() >= expires_after {
            return Err(AuthError::DeviceFlowExpired);
        }

        let response = http
            .post(&config.access_token_url)
            .header("Accept", "application/json")
            .json(&serde_json::json!({
                "client_id": config.client_id,
                "device_code": device.device_code,
                "grant_type": DEVICE_GRANT_TYPE,
            }))
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() && status.as_u16() != 400 {
            return Err(AuthError::device_flow(format!(
                "token endpoint returned {status}: {body}"
            )));
        }

        match serde_json::from_str::<DeviceTokenResponse>(&body) {
            Ok(DeviceTokenResponse::Granted(grant)) if !grant.access_token.is_empty() => {
                return Ok(AuthCredential::new(grant.access_token));
            }
            Ok(DeviceTokenResponse::Granted(_)) => return Err(AuthError::EmptyToken),
            Ok(DeviceTokenResponse::Pending(err)) => match err.error.as_str() {
                "authorization_pending" => {
                    tracing::debug!(
                        interval_secs = interval.as_secs(),
                        "Waiting for device authorization"
                    );
                }
                "slow_down" => {
                    interval += SLOW_DOWN_STEP;
                    tracing::debug!(
                        interval_secs = interval.as_secs(),
                        "Token endpoint asked to slow down"
                    );
                }
                "expired_token" => return Err(AuthError::DeviceFlowExpired),
                "access_denied" => return Err(AuthError::AccessDenied),
                other => {
                    return Err(AuthError::device_flow(format!(
                        "{} - {}",
                        other,
                        err.error_description.unwrap_or_default()
                    )));
                }
            },
            Err(e) => {
                return Err(AuthError::device_flow(format!(
                    "failed to parse token response: {e}"
                )));
            }
        }
    }
}
