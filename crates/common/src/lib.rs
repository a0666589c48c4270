//! Shared value types used across the saga workspace.

pub mod money;
pub mod types;

pub use money::Money;
pub use types::{SagaId, Version};
