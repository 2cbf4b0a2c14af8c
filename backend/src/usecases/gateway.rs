use anyhow::Result as AnyResult;
use async_trait::async_trait;
use crates::payments::razorpay_client::{
    BillingEvent, RazorpayClient, RazorpayPayment, RazorpayRefund, RazorpaySubscription,
};

/// Seam between the use cases and the provider HTTP client, so tests can run
/// against a mock instead of the network. These are the only calls that ever
/// pass through the circuit breaker. The mock is generated unconditionally
/// so the worker's tests can use it across the crate boundary.
#[mockall::automock]
#[async_trait]
pub trait BillingGateway: Send + Sync {
    async fn create_customer<'a>(&self, email: &str, name: Option<&'a str>) -> AnyResult<String>;

    async fn create_subscription(
        &self,
        plan_id: &str,
        customer_id: &str,
        total_count: i64,
    ) -> AnyResult<RazorpaySubscription>;

    async fn fetch_subscription(&self, subscription_id: &str) -> AnyResult<RazorpaySubscription>;

    async fn cancel_subscription(&self, subscription_id: &str) -> AnyResult<()>;

    async fn fetch_payment(&self, payment_id: &str) -> AnyResult<RazorpayPayment>;

    async fn create_refund<'a>(
        &self,
        payment_id: &str,
        amount: Option<i64>,
        reason: Option<&'a str>,
    ) -> AnyResult<RazorpayRefund>;

    fn verify_webhook_signature(&self, payload: &[u8], signature: &str) -> AnyResult<BillingEvent>;
}

#[async_trait]
impl BillingGateway for RazorpayClient {
    async fn create_customer<'a>(&self, email: &str, name: Option<&'a str>) -> AnyResult<String> {
        self.create_customer(email, name).await
    }

    async fn create_subscription(
        &self,
        plan_id: &str,
        customer_id: &str,
        total_count: i64,
    ) -> AnyResult<RazorpaySubscription> {
        self.create_subscription(plan_id, customer_id, total_count)
            .await
    }

    async fn fetch_subscription(&self, subscription_id: &str) -> AnyResult<RazorpaySubscription> {
        self.fetch_subscription(subscription_id).await
    }

    async fn cancel_subscription(&self, subscription_id: &str) -> AnyResult<()> {
        self.cancel_subscription(subscription_id).await
    }

    async fn fetch_payment(&self, payment_id: &str) -> AnyResult<RazorpayPayment> {
        self.fetch_payment(payment_id).await
    }

    async fn create_refund<'a>(
        &self,
        payment_id: &str,
        amount: Option<i64>,
        reason: Option<&'a str>,
    ) -> AnyResult<RazorpayRefund> {
        self.create_refund(payment_id, amount, reason).await
    }

    fn verify_webhook_signature(&self, payload: &[u8], signature: &str) -> AnyResult<BillingEvent> {
        self.verify_webhook_signature(payload, signature)
    }
}
