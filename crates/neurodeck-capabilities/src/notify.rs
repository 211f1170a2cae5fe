//! Notification adapter -- outbound SMS through the Twilio Messages API.
//!
//! Carries both SOS alerts and routine check-ins. The destination defaults
//! to the configured emergency contact; a request can override it with a
//! `to` field. Credentials are held as options so a deck without SMS
//! configured still boots and fails only the steps that need delivery.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{debug, info};

use neurodeck_engine::{Capability, CapabilityError, CapabilityResult};

use crate::config::Credentials;

/// Messages API base, versioned the way Twilio versions it.
const TWILIO_API_BASE: &str = "https://api.twilio.com/2010-04-01";

/// Hard ceiling on one delivery round trip.
const DELIVERY_TIMEOUT: Duration = Duration::from_secs(15);

/// SMS notification capability.
pub struct SmsNotifier {
    account_sid: Option<String>,
    auth_token: Option<String>,
    from_number: Option<String>,
    default_contact: Option<String>,
    api_base: String,
    http: reqwest::Client,
}

impl SmsNotifier {
    /// Create a notifier from the credential set.
    pub fn from_credentials(credentials: &Credentials) -> Self {
        let http = reqwest::Client::builder()
            .user_agent("Neurodeck/0.1")
            .timeout(DELIVERY_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            account_sid: credentials.twilio_account_sid.clone(),
            auth_token: credentials.twilio_auth_token.clone(),
            from_number: credentials.twilio_phone_number.clone(),
            default_contact: credentials.emergency_contact.clone(),
            api_base: TWILIO_API_BASE.to_string(),
            http,
        }
    }

    /// Point the adapter at a different API base (regional proxies, tests).
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into();
        self
    }

    /// The account triple, or an auth error naming every missing variable.
    fn account(&self) -> Result<(&str, &str, &str), CapabilityError> {
        match (
            self.account_sid.as_deref(),
            self.auth_token.as_deref(),
            self.from_number.as_deref(),
        ) {
            (Some(sid), Some(token), Some(from)) => Ok((sid, token, from)),
            _ => Err(CapabilityError::Auth {
                reason: "SMS credentials are not configured (TWILIO_ACCOUNT_SID, \
                         TWILIO_AUTH_TOKEN, TWILIO_PHONE_NUMBER)"
                    .into(),
            }),
        }
    }

    /// Destination number: the request's `to` when present, otherwise the
    /// configured emergency contact.
    fn destination<'a>(&'a self, request: &'a Value) -> Result<&'a str, CapabilityError> {
        request
            .get("to")
            .and_then(Value::as_str)
            .filter(|to| !to.trim().is_empty())
            .or(self.default_contact.as_deref())
            .ok_or_else(|| CapabilityError::InvalidRequest {
                reason: "no destination: request carries no `to` and EMERGENCY_CONTACT is not set"
                    .into(),
            })
    }
}

/// Human-readable detail from a Messages API error payload.
fn api_message(payload: &Value) -> String {
    payload
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("no detail")
        .to_string()
}

#[async_trait]
impl Capability for SmsNotifier {
    fn name(&self) -> &str {
        "notify"
    }

    async fn invoke(&self, request: Value) -> CapabilityResult {
        let body = request
            .get("body")
            .and_then(Value::as_str)
            .filter(|body| !body.trim().is_empty())
            .ok_or_else(|| CapabilityError::InvalidRequest {
                reason: "missing required string field `body`".into(),
            })?;
        let (sid, token, from) = self.account()?;
        let to = self.destination(&request)?;

        let url = format!("{}/Accounts/{}/Messages.json", self.api_base, sid);
        debug!(to, bytes = body.len(), "sending sms");

        let response = self
            .http
            .post(&url)
            .basic_auth(sid, Some(token))
            .form(&[("Body", body), ("From", from), ("To", to)])
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CapabilityError::Transport {
                        reason: "sms delivery timed out".into(),
                    }
                } else {
                    CapabilityError::Transport {
                        reason: format!("sms delivery failed: {e}"),
                    }
                }
            })?;

        let status = response.status();
        let payload: Value =
            response
                .json()
                .await
                .map_err(|e| CapabilityError::MalformedResponse {
                    reason: format!("delivery response is not JSON: {e}"),
                })?;

        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
        {
            return Err(CapabilityError::Auth {
                reason: format!("sms transport rejected the credentials: {}", api_message(&payload)),
            });
        }
        if !status.is_success() {
            return Err(CapabilityError::Transport {
                reason: format!("sms transport answered {status}: {}", api_message(&payload)),
            });
        }

        let delivery_id = payload
            .get("sid")
            .and_then(Value::as_str)
            .ok_or_else(|| CapabilityError::MalformedResponse {
                reason: "delivery response carries no message sid".into(),
            })?;

        info!(delivery_id, to, "sms accepted by transport");

        Ok(json!({
            "delivery_id": delivery_id,
            "to": to,
        }))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn full_credentials() -> Credentials {
        Credentials {
            twilio_account_sid: Some("AC0123456789".into()),
            twilio_auth_token: Some("secret".into()),
            twilio_phone_number: Some("+15550002222".into()),
            emergency_contact: Some("+15550001111".into()),
            ..Credentials::default()
        }
    }

    #[tokio::test]
    async fn missing_body_is_rejected() {
        let notifier = SmsNotifier::from_credentials(&full_credentials());
        let err = notifier.invoke(json!({})).await.unwrap_err();
        assert!(matches!(err, CapabilityError::InvalidRequest { .. }));

        let err = notifier.invoke(json!({"body": "   "})).await.unwrap_err();
        assert!(matches!(err, CapabilityError::InvalidRequest { .. }));
    }

    #[tokio::test]
    async fn missing_credentials_fail_before_any_network_call() {
        let notifier = SmsNotifier::from_credentials(&Credentials::default());
        let err = notifier.invoke(json!({"body": "hi"})).await.unwrap_err();
        match err {
            CapabilityError::Auth { reason } => {
                assert!(reason.contains("TWILIO_ACCOUNT_SID"));
            }
            other => panic!("expected auth error, got {other:?}"),
        }
    }

    #[test]
    fn request_destination_overrides_the_default_contact() {
        let notifier = SmsNotifier::from_credentials(&full_credentials());

        let override_to = json!({"to": "+15559998888"});
        assert_eq!(
            notifier.destination(&override_to).unwrap(),
            "+15559998888"
        );
        assert_eq!(notifier.destination(&json!({})).unwrap(), "+15550001111");
        // Blank override falls back too.
        assert_eq!(
            notifier.destination(&json!({"to": ""})).unwrap(),
            "+15550001111"
        );
    }

    #[test]
    fn no_destination_anywhere_is_a_request_error() {
        let mut credentials = full_credentials();
        credentials.emergency_contact = None;
        let notifier = SmsNotifier::from_credentials(&credentials);

        let err = notifier.destination(&json!({})).unwrap_err();
        assert!(matches!(err, CapabilityError::InvalidRequest { .. }));
    }

    #[test]
    fn api_message_prefers_the_payload_detail() {
        assert_eq!(
            api_message(&json!({"message": "The From number is invalid"})),
            "The From number is invalid"
        );
        assert_eq!(api_message(&json!({})), "no detail");
    }
}
