use anyhow::Result;
use hmac::{Hmac, Mac};
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::Sha256;
use tracing::error;

type HmacSha256 = Hmac<Sha256>;

/// Minimal Razorpay client built on reqwest.
pub struct RazorpayClient {
    http: reqwest::Client,
    base_url: String,
    key_id: String,
    key_secret: String,
    webhook_secret: String,
}

/// A webhook delivery as Razorpay posts it. The same logical event can be
/// delivered more than once, so identity comes from `dedupe_id`, not from
/// any field Razorpay guarantees unique.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingEvent {
    pub event: String,
    pub created_at: i64,
    pub account_id: Option<String>,
    #[serde(default)]
    pub payload: BillingEventPayload,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BillingEventPayload {
    pub subscription: Option<EventEntity<RazorpaySubscription>>,
    pub payment: Option<EventEntity<RazorpayPayment>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEntity<T> {
    pub entity: T,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RazorpaySubscription {
    pub id: String,
    pub status: String,
    pub plan_id: Option<String>,
    pub customer_id: Option<String>,
    pub current_start: Option<i64>,
    pub current_end: Option<i64>,
    pub ended_at: Option<i64>,
    pub short_url: Option<String>,
    pub paid_count: Option<i64>,
    pub total_count: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RazorpayPayment {
    pub id: String,
    pub order_id: Option<String>,
    pub amount: i64,
    pub currency: String,
    pub status: String,
    pub method: Option<String>,
    pub error_code: Option<String>,
    pub error_description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RazorpayRefund {
    pub id: String,
    pub payment_id: String,
    pub amount: i64,
    pub currency: String,
    pub status: String,
}

#[derive(Debug, Deserialize)]
struct RazorpayErrorEnvelope {
    error: RazorpayErrorDetails,
}

#[derive(Debug, Deserialize)]
struct RazorpayErrorDetails {
    code: Option<String>,
    description: Option<String>,
    field: Option<String>,
    reason: Option<String>,
}

impl BillingEvent {
    /// Stable identity for idempotent processing. Razorpay does not ship a
    /// unique delivery id in the body, so we derive one from the event name,
    /// creation time and the entities it references.
    pub fn dedupe_id(&self) -> String {
        let subscription_id = self
            .payload
            .subscription
            .as_ref()
            .map(|wrapper| wrapper.entity.id.as_str())
            .unwrap_or("none");
        let payment_id = self
            .payload
            .payment
            .as_ref()
            .map(|wrapper| wrapper.entity.id.as_str())
            .unwrap_or("none");
        let account_id = self.account_id.as_deref().unwrap_or("none");

        format!(
            "{}:{}:{}:{}:{}",
            self.event, self.created_at, subscription_id, payment_id, account_id
        )
    }
}

impl RazorpayClient {
    pub fn new(key_id: String, key_secret: String, webhook_secret: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: "https://api.razorpay.com/v1".to_string(),
            key_id,
            key_secret,
            webhook_secret,
        }
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }

    async fn ensure_success(resp: reqwest::Response, context: &str) -> Result<reqwest::Response> {
        if resp.status().is_success() {
            return Ok(resp);
        }

        let status = resp.status();
        let request_id = resp
            .headers()
            .get("x-razorpay-request-id")
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_string());

        let body = match resp.text().await {
            Ok(text) if !text.is_empty() => text,
            Ok(_) => "<empty response body>".to_string(),
            Err(err) => format!("<failed to read response body: {err}>"),
        };

        let (error_code, error_description, error_field, error_reason) =
            match serde_json::from_str::<RazorpayErrorEnvelope>(&body) {
                Ok(envelope) => {
                    let details = envelope.error;
                    (
                        details.code,
                        details.description,
                        details.field,
                        details.reason,
                    )
                }
                Err(_) => (None, None, None, None),
            };

        error!(
            status = %status,
            razorpay_request_id = ?request_id,
            razorpay_error_code = ?error_code,
            razorpay_error_description = ?error_description,
            razorpay_error_field = ?error_field,
            razorpay_error_reason = ?error_reason,
            response_body = %body,
            context = %context,
            "razorpay api request failed"
        );

        anyhow::bail!(
            "Razorpay API request failed: {} (status {}, request_id={:?})",
            context,
            status,
            request_id
        );
    }

    /// Creates a Razorpay customer for the given email/user.
    pub async fn create_customer(&self, email: &str, name: Option<&str>) -> Result<String> {
        // https://razorpay.com/docs/api/customers/create
        let body = json!({
            "email": email,
            "name": name.unwrap_or(email),
            // Keeps repeat signups from failing on the email uniqueness check.
            "fail_existing": "0",
        });

        let resp = self
            .http
            .post(format!("{}/customers", self.base_url))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .header(CONTENT_TYPE, "application/json")
            .json(&body)
            .send()
            .await?;
        let resp = Self::ensure_success(resp, "create customer").await?;

        #[derive(Deserialize)]
        struct CustomerResp {
            id: String,
        }

        let parsed: CustomerResp = resp.json().await?;
        Ok(parsed.id)
    }

    /// Creates a subscription on the given plan and returns it, including the
    /// hosted checkout `short_url` the user completes authentication on.
    pub async fn create_subscription(
        &self,
        plan_id: &str,
        customer_id: &str,
        total_count: i64,
    ) -> Result<RazorpaySubscription> {
        // https://razorpay.com/docs/api/payments/subscriptions/create-subscription
        let body = json!({
            "plan_id": plan_id,
            "customer_id": customer_id,
            "total_count": total_count,
            "customer_notify": 1,
        });

        let resp = self
            .http
            .post(format!("{}/subscriptions", self.base_url))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .header(CONTENT_TYPE, "application/json")
            .json(&body)
            .send()
            .await?;
        let resp = Self::ensure_success(resp, "create subscription").await?;

        let subscription: RazorpaySubscription = resp.json().await?;
        Ok(subscription)
    }

    pub async fn fetch_subscription(&self, subscription_id: &str) -> Result<RazorpaySubscription> {
        // https://razorpay.com/docs/api/payments/subscriptions/fetch-subscription-id
        let resp = self
            .http
            .get(format!("{}/subscriptions/{}", self.base_url, subscription_id))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .send()
            .await?;
        let resp = Self::ensure_success(resp, "fetch subscription").await?;

        let subscription: RazorpaySubscription = resp.json().await?;
        Ok(subscription)
    }

    /// Cancels a subscription at the end of the current billing cycle.
    pub async fn cancel_subscription(&self, subscription_id: &str) -> Result<()> {
        // https://razorpay.com/docs/api/payments/subscriptions/cancel-subscription
        let body = json!({ "cancel_at_cycle_end": 1 });

        let resp = self
            .http
            .post(format!(
                "{}/subscriptions/{}/cancel",
                self.base_url, subscription_id
            ))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .header(CONTENT_TYPE, "application/json")
            .json(&body)
            .send()
            .await?;
        Self::ensure_success(resp, "cancel subscription").await?;

        Ok(())
    }

    pub async fn fetch_payment(&self, payment_id: &str) -> Result<RazorpayPayment> {
        // https://razorpay.com/docs/api/payments/fetch-with-id
        let resp = self
            .http
            .get(format!("{}/payments/{}", self.base_url, payment_id))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .send()
            .await?;
        let resp = Self::ensure_success(resp, "fetch payment").await?;

        let payment: RazorpayPayment = resp.json().await?;
        Ok(payment)
    }

    /// Issues a refund against a captured payment. `amount` of None refunds
    /// the full remaining amount.
    pub async fn create_refund(
        &self,
        payment_id: &str,
        amount: Option<i64>,
        reason: Option<&str>,
    ) -> Result<RazorpayRefund> {
        // https://razorpay.com/docs/api/refunds/create-instant
        let mut body = serde_json::Map::new();
        if let Some(amount) = amount {
            body.insert("amount".to_string(), json!(amount));
        }
        if let Some(reason) = reason {
            body.insert("notes".to_string(), json!({ "reason": reason }));
        }

        let resp = self
            .http
            .post(format!("{}/payments/{}/refund", self.base_url, payment_id))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .header(CONTENT_TYPE, "application/json")
            .json(&serde_json::Value::Object(body))
            .send()
            .await?;
        let resp = Self::ensure_success(resp, "create refund").await?;

        let refund: RazorpayRefund = resp.json().await?;
        Ok(refund)
    }

    /// Verifies the webhook signature over the raw request body.
    /// https://razorpay.com/docs/webhooks/validate-test
    pub fn verify_webhook_signature(
        &self,
        payload: &[u8],
        signature_header: &str,
    ) -> Result<BillingEvent> {
        let mut mac = HmacSha256::new_from_slice(self.webhook_secret.as_bytes())?;
        mac.update(payload);

        // verify_slice compares in constant time; a malformed header gets the
        // same error as a wrong digest.
        let provided = hex::decode(signature_header.trim())
            .map_err(|_| anyhow::anyhow!("invalid webhook signature"))?;
        mac.verify_slice(&provided)
            .map_err(|_| anyhow::anyhow!("invalid webhook signature"))?;

        let event: BillingEvent = serde_json::from_slice(payload)?;
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &str, payload: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(payload);
        hex::encode(mac.finalize().into_bytes())
    }

    fn client() -> RazorpayClient {
        RazorpayClient::new(
            "rzp_test_key".to_string(),
            "rzp_test_secret".to_string(),
            "whsec_test".to_string(),
        )
    }

    fn charged_event_body() -> String {
        json!({
            "event": "subscription.charged",
            "created_at": 1_700_000_000,
            "account_id": "acc_123",
            "payload": {
                "subscription": {
                    "entity": {
                        "id": "sub_abc",
                        "status": "active",
                        "plan_id": "plan_pro",
                        "customer_id": "cust_xyz",
                        "current_start": 1_700_000_000,
                        "current_end": 1_702_592_000
                    }
                },
                "payment": {
                    "entity": {
                        "id": "pay_def",
                        "order_id": "order_ghi",
                        "amount": 49900,
                        "currency": "INR",
                        "status": "captured",
                        "method": "card"
                    }
                }
            }
        })
        .to_string()
    }

    #[test]
    fn accepts_valid_signature_and_parses_event() {
        let body = charged_event_body();
        let signature = sign("whsec_test", body.as_bytes());

        let event = client()
            .verify_webhook_signature(body.as_bytes(), &signature)
            .unwrap();

        assert_eq!(event.event, "subscription.charged");
        assert_eq!(
            event.payload.subscription.unwrap().entity.id,
            "sub_abc"
        );
        assert_eq!(event.payload.payment.unwrap().entity.amount, 49900);
    }

    #[test]
    fn rejects_tampered_payload() {
        let body = charged_event_body();
        let signature = sign("whsec_test", body.as_bytes());
        let tampered = body.replace("49900", "1");

        let result = client().verify_webhook_signature(tampered.as_bytes(), &signature);
        assert!(result.is_err());
    }

    #[test]
    fn rejects_signature_from_wrong_secret() {
        let body = charged_event_body();
        let signature = sign("whsec_other", body.as_bytes());

        let result = client().verify_webhook_signature(body.as_bytes(), &signature);
        assert!(result.is_err());
    }

    #[test]
    fn rejects_malformed_signature_header() {
        let body = charged_event_body();

        let result = client().verify_webhook_signature(body.as_bytes(), "not-hex-at-all");
        assert_eq!(result.unwrap_err().to_string(), "invalid webhook signature");

        // Truncated but valid hex must also fail, not panic.
        let signature = sign("whsec_test", body.as_bytes());
        let result = client().verify_webhook_signature(body.as_bytes(), &signature[..16]);
        assert!(result.is_err());
    }

    #[test]
    fn dedupe_id_is_stable_across_redeliveries() {
        let body = charged_event_body();
        let first: BillingEvent = serde_json::from_str(&body).unwrap();
        let second: BillingEvent = serde_json::from_str(&body).unwrap();

        assert_eq!(first.dedupe_id(), second.dedupe_id());
        assert_eq!(
            first.dedupe_id(),
            "subscription.charged:1700000000:sub_abc:pay_def:acc_123"
        );
    }

    #[test]
    fn dedupe_id_marks_missing_entities() {
        let body = json!({
            "event": "subscription.cancelled",
            "created_at": 1_700_000_500,
            "payload": {
                "subscription": { "entity": { "id": "sub_abc", "status": "cancelled" } }
            }
        })
        .to_string();

        let event: BillingEvent = serde_json::from_str(&body).unwrap();
        assert_eq!(
            event.dedupe_id(),
            "subscription.cancelled:1700000500:sub_abc:none:none"
        );
    }
}
