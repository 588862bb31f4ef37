//! Client side of the change-notification channel.
//!
//! - [`ChannelManager`]: keeps one duplex session open per cache context and
//!   reopens it on close or fault
//! - [`Connector`]: how a session is opened ([`GrpcConnector`] or
//!   [`InProcessConnector`])
//! - [`ChangeReporter`]: unary client for change-detection producers

mod channel;
mod connector;
mod manager;
mod reporter;

pub use channel::*;
pub use connector::*;
pub use manager::*;
pub use reporter::*;
