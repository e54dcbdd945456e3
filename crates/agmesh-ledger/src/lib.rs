mod bus;
mod error;
mod store;

pub use bus::{MessageBus, Publisher, Subscription, SubscriptionFilter};
pub use error::{Error, Result};
pub use store::{Ledger, RoleUsage, TokenUsageReport};
