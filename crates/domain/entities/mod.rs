pub mod jobs;
pub mod payments;
pub mod processed_webhooks;
pub mod subscriptions;
pub mod users;
