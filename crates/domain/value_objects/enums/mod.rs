pub mod job_statuses;
pub mod job_types;
pub mod payment_statuses;
pub mod subscription_statuses;
pub mod user_tiers;
pub mod webhook_events;
