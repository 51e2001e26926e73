//! Publish/subscribe transport abstractions for hush.
//!
//! Relays are untrusted, may be offline, and may deliver the same event more
//! than once. Consumers see a merged, de-duplicated stream per subscription.

pub mod event;
pub mod traits;
pub mod dedup;
pub mod reconnect;
pub mod testing;

pub use event::*;
pub use traits::*;
pub use dedup::*;
pub use reconnect::*;
pub use testing::*;
