//! Publish/subscribe over the overlay.

mod router;
mod seen;

pub use router::{Message, PubSub, Subscription, SubscriptionId};
pub use seen::SeenCache;

/// Identifies a message for duplicate suppression.
pub type MessageId = plexus_crypto::Hash;
