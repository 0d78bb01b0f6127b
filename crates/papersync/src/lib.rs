pub mod api;
pub mod billing;
pub mod chunks;
pub mod config;
pub mod error;
pub mod poll;
pub mod processing;

pub use api::{ApiClient, ApiError, BillingApi, ProcessingApi};
pub use billing::{BillingError, BillingEvent, CheckoutSignal, ClientLocation, SubscriptionSync};
pub use chunks::{Chunk, ChunkQuery, SortDirection, SortKey};
pub use config::{ApiConfig, BillingSyncConfig, ProcessingPollConfig, SyncConfig};
pub use error::{ConfigError, PapersyncError, Result};
pub use poll::{PollConfig, PollEvent, PollHandle, PollOutcome, SessionPhase, StatusPoller};
pub use processing::{
    FailureKind, ProcessingError, ProcessingEvent, ProcessingState, ProcessingTracker,
    TriggerOutcome,
};
