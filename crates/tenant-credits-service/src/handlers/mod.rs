//! API handlers.

pub mod credits;
pub mod health;
pub mod referrals;
pub mod subscription;
pub mod webhooks;
