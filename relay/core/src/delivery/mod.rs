//! Delivery Channels
//!
//! Envelopes reach clients over one of two channels:
//!
//! - **Publish**: GraphQL pub/sub mutation, for `private` connections
//! - **Push**: websocket gateway management API, for everything else
//!
//! Both implement [`DeliveryChannel`], so the relay can be driven against
//! in-memory channels in tests.

mod publish;
mod push;
mod traits;

pub use publish::{PublishChannel, API_KEY_HEADER, PUBLISH_MUTATION};
pub use push::PushChannel;
pub use traits::{ChannelKind, DeliveryChannel, DeliveryError, DeliveryReceipt};
