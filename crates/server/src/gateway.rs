//! Checkout-session verification against a Stripe-compatible HTTP API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use gemsource_core::config::GatewayConfig;
use gemsource_core::domain::order::OrderId;
use gemsource_core::payments::{GatewayError, GatewaySession, PaymentGateway};

const PAID_STATUS: &str = "paid";

pub struct HttpPaymentGateway {
    client: Client,
    base_url: String,
    secret_key: Option<SecretString>,
}

impl HttpPaymentGateway {
    pub fn from_config(config: &GatewayConfig) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|error| GatewayError::NotConfigured(error.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            secret_key: config.secret_key.clone(),
        })
    }

    pub fn is_configured(&self) -> bool {
        self.secret_key.as_ref().is_some_and(|key| !key.expose_secret().trim().is_empty())
    }

    fn session_url(&self, session_id: &str) -> String {
        format!("{}/v1/checkout/sessions/{session_id}", self.base_url)
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn verify_session(&self, session_id: &str) -> Result<GatewaySession, GatewayError> {
        let secret_key = self
            .secret_key
            .as_ref()
            .filter(|key| !key.expose_secret().trim().is_empty())
            .ok_or_else(|| GatewayError::NotConfigured("gateway.secret_key is not set".into()))?;

        if session_id.trim().is_empty()
            || !session_id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(GatewayError::Status {
                status: StatusCode::BAD_REQUEST.as_u16(),
                message: format!("malformed checkout session id `{session_id}`"),
            });
        }

        let response = self
            .client
            .get(self.session_url(session_id))
            .bearer_auth(secret_key.expose_secret())
            .send()
            .await
            .map_err(|error| {
                warn!(
                    event_name = "payment.gateway.request_failed",
                    session_id = %session_id,
                    error = %error,
                    "checkout session request failed"
                );
                GatewayError::Transport(error.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Status {
                status: status.as_u16(),
                message: gateway_error_message(&body).unwrap_or_else(|| status.to_string()),
            });
        }

        let payload: CheckoutSessionPayload =
            response.json().await.map_err(|error| GatewayError::Decode(error.to_string()))?;
        let session = payload.into_session(session_id)?;
        debug!(
            event_name = "payment.gateway.session_verified",
            session_id = %session.session_id,
            paid = session.paid,
            "checkout session verified"
        );
        Ok(session)
    }
}

#[derive(Debug, Deserialize)]
struct CheckoutSessionPayload {
    id: Option<String>,
    payment_status: Option<String>,
    amount_total: Option<i64>,
    #[serde(default)]
    payment_intent: Option<Value>,
    #[serde(default)]
    client_reference_id: Option<String>,
    #[serde(default)]
    metadata: Option<Value>,
}

impl CheckoutSessionPayload {
    fn into_session(self, requested_id: &str) -> Result<GatewaySession, GatewayError> {
        let session_id = self.id.unwrap_or_else(|| requested_id.to_string());
        if session_id != requested_id {
            return Err(GatewayError::Decode(format!(
                "gateway returned session `{session_id}` for `{requested_id}`"
            )));
        }

        let amount = match self.amount_total {
            Some(minor) if minor < 0 => {
                return Err(GatewayError::Decode(format!("negative amount_total {minor}")));
            }
            Some(minor) => Some(Decimal::new(minor, 2)),
            None => None,
        };

        // Expanded intents arrive as objects carrying their own id.
        let payment_reference = match self.payment_intent {
            Some(Value::String(id)) => Some(id),
            Some(Value::Object(intent)) => intent.get("id").and_then(Value::as_str).map(str::to_string),
            _ => None,
        };

        let order_id = self
            .metadata
            .as_ref()
            .and_then(|metadata| metadata.get("order_id"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .or(self.client_reference_id)
            .filter(|id| !id.trim().is_empty())
            .map(OrderId);

        Ok(GatewaySession {
            session_id,
            payment_reference,
            paid: self.payment_status.as_deref() == Some(PAID_STATUS),
            amount,
            order_id,
        })
    }
}

fn gateway_error_message(body: &str) -> Option<String> {
    let payload: Value = serde_json::from_str(body).ok()?;
    payload
        .get("error")
        .and_then(|error| error.get("message"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use axum::extract::Path;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::get;
    use axum::{Json, Router};
    use rust_decimal::Decimal;
    use secrecy::SecretString;
    use serde_json::{json, Value};

    use gemsource_core::config::GatewayConfig;
    use gemsource_core::domain::order::OrderId;
    use gemsource_core::payments::{GatewayError, PaymentGateway};

    use super::HttpPaymentGateway;

    async fn checkout_session(
        Path(session_id): Path<String>,
        headers: HeaderMap,
    ) -> (StatusCode, Json<Value>) {
        let authorized = headers
            .get("authorization")
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value == "Bearer sk_test_gateway");
        if !authorized {
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": { "message": "Invalid API Key provided" } })),
            );
        }

        match session_id.as_str() {
            "cs_paid" => (
                StatusCode::OK,
                Json(json!({
                    "id": "cs_paid",
                    "payment_status": "paid",
                    "amount_total": 46000,
                    "payment_intent": "pi_paid",
                    "metadata": { "order_id": "ord-1" }
                })),
            ),
            "cs_expanded" => (
                StatusCode::OK,
                Json(json!({
                    "id": "cs_expanded",
                    "payment_status": "unpaid",
                    "amount_total": 1250,
                    "payment_intent": { "id": "pi_expanded", "object": "payment_intent" },
                    "client_reference_id": "ord-2"
                })),
            ),
            "cs_garbled" => (StatusCode::OK, Json(json!({ "id": 42 }))),
            _ => (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": { "message": "No such checkout.session" } })),
            ),
        }
    }

    async fn spawn_fake_gateway() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind listener");
        let address = listener.local_addr().expect("local address");
        let router = Router::new().route("/v1/checkout/sessions/{session_id}", get(checkout_session));
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });
        format!("http://{address}")
    }

    fn gateway(base_url: String, secret_key: Option<&str>) -> HttpPaymentGateway {
        HttpPaymentGateway::from_config(&GatewayConfig {
            base_url,
            secret_key: secret_key.map(|key| SecretString::from(key.to_string())),
            timeout_secs: 5,
        })
        .expect("gateway client")
    }

    #[tokio::test]
    async fn paid_session_maps_minor_units_and_references() {
        let gateway = gateway(spawn_fake_gateway().await, Some("sk_test_gateway"));

        let session = gateway.verify_session("cs_paid").await.expect("session verifies");

        assert!(session.paid);
        assert_eq!(session.amount, Some(Decimal::new(46000, 2)));
        assert_eq!(session.payment_reference.as_deref(), Some("pi_paid"));
        assert_eq!(session.order_id, Some(OrderId("ord-1".to_string())));
        assert_eq!(session.reference(), "pi_paid");
    }

    #[tokio::test]
    async fn expanded_intent_and_client_reference_are_read() {
        let gateway = gateway(spawn_fake_gateway().await, Some("sk_test_gateway"));

        let session = gateway.verify_session("cs_expanded").await.expect("session verifies");

        assert!(!session.paid);
        assert_eq!(session.payment_reference.as_deref(), Some("pi_expanded"));
        assert_eq!(session.order_id, Some(OrderId("ord-2".to_string())));
    }

    #[tokio::test]
    async fn http_failures_surface_status_and_gateway_message() {
        let base_url = spawn_fake_gateway().await;

        let missing = gateway(base_url.clone(), Some("sk_test_gateway"))
            .verify_session("cs_missing")
            .await
            .expect_err("unknown session");
        assert_eq!(
            missing,
            GatewayError::Status { status: 404, message: "No such checkout.session".to_string() }
        );

        let unauthorized = gateway(base_url, Some("sk_test_wrong"))
            .verify_session("cs_paid")
            .await
            .expect_err("wrong key");
        assert!(matches!(unauthorized, GatewayError::Status { status: 401, .. }));
    }

    #[tokio::test]
    async fn undecodable_body_is_a_decode_error() {
        let gateway = gateway(spawn_fake_gateway().await, Some("sk_test_gateway"));

        let error = gateway.verify_session("cs_garbled").await.expect_err("garbled payload");

        assert!(matches!(error, GatewayError::Decode(_)));
    }

    #[tokio::test]
    async fn missing_secret_key_is_not_configured() {
        let gateway = gateway("http://127.0.0.1:9".to_string(), None);

        assert!(!gateway.is_configured());
        let error = gateway.verify_session("cs_paid").await.expect_err("no key");
        assert!(matches!(error, GatewayError::NotConfigured(_)));
    }

    #[tokio::test]
    async fn unreachable_gateway_is_a_transport_error() {
        let gateway = gateway("http://127.0.0.1:9".to_string(), Some("sk_test_gateway"));

        let error = gateway.verify_session("cs_paid").await.expect_err("nothing listening");

        assert!(matches!(error, GatewayError::Transport(_)));
    }
}
