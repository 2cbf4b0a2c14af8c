pub mod enums;
pub mod jobs;
pub mod payments;
pub mod sync;
pub mod webhooks;
