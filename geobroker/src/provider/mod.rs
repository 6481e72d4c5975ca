//! Activated provider handles and their update payloads.
//!
//! A [`ProviderHandle`] wraps one activated remote provider: its declared
//! catalog entry, live status, invocation with timeouts, and the update and
//! status streams the broker relays to clients.

mod handle;
mod update;

pub use handle::{HandleStatus, ProviderHandle};
pub use update::{ProviderUpdate, UpdatePayload};
