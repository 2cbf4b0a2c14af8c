pub mod billing_webhooks;
pub mod gateway;
pub mod subscription_sync;
pub mod subscriptions;
