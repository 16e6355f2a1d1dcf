//! # Festa Core
//!
//! Shared vocabulary for the Festa workspace: domain types (destinations,
//! date records, principals), the collaborator traits the scheduler talks
//! through, the error taxonomy and the TOML configuration.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::FestaConfig;
pub use error::{DeliveryError, FestaError, Result};
pub use traits::{Messenger, RecordStore};
pub use types::{
    DateRecord, DeleteOutcome, Destination, LeapDayPolicy, MemberChange, MemberStatus, MessageId,
    NamedRecord, Principal, RecordKind, SubscriptionKind, TrackedMessage,
};
