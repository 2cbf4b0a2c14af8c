pub mod jobs;
pub mod payments;
pub mod subscriptions;
pub mod sync;
pub mod users;
pub mod webhooks;
