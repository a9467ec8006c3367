//! # mouseshare-node
//!
//! The MouseShare peer daemon. Every machine in a MouseShare group runs the
//! same process; there is no master/client split. A node simultaneously:
//!
//! - accepts inbound peer connections ([`net::listener`]) and dials outbound
//!   ones ([`net::connection`]),
//! - broadcasts and receives presence datagrams ([`net::discovery`]),
//! - runs the control engine ([`engine`]) that decides, for every local input
//!   event, whether it stays local, transfers control to a neighbour, or is
//!   forwarded to the peer currently being controlled.
//!
//! OS specifics (global input hooks, input synthesis, screen metrics, the
//! clipboard) are reached only through the [`capabilities`] traits, so the
//! whole engine runs unmodified in tests against the recording doubles in
//! [`capabilities::mock`].

pub mod capabilities;
pub mod config;
pub mod engine;
pub mod events;
pub mod net;
pub mod node;
pub mod peers;

pub use config::Settings;
pub use engine::{ControlEngine, ControlState};
pub use events::NodeEvent;
pub use node::Node;
