//! In-memory adapters.
//!
//! Used by unit and integration tests, and by the binary when no database
//! URL is configured. Not durable.

mod mock_gateway;
mod payment_store;
mod recording;
mod subscription_repository;

pub use mock_gateway::MockGateway;
pub use payment_store::InMemoryPaymentStore;
pub use recording::{FixedCartResumer, RecordingListener, RecordingNotifier, StaticPanel};
pub use subscription_repository::InMemorySubscriptionRepository;
