//! Socket job engine: bounded MessageBox queues on one side, sockets on
//! the other, and per-variant send/receive jobs ticking between them.
//!
//! Application code fragments payloads into [`mailbox::MessageBox`]es; a
//! [`send_job::SendJob`] drains them onto the wire with the length-prefix
//! handshake and optional symmetric encryption; a
//! [`recv_job::ReceiveJob`] mirrors the read path back into boxes. Job
//! behavior is fixed at construction by the (communication type,
//! cardinality) pair resolving to a [`job::SendVariant`].

mod duplex;

pub mod error;
pub mod job;
pub mod mailbox;
pub mod observer;
pub mod protocol;
pub mod recv_job;
pub mod send_job;

pub use error::EngineError;
pub use job::{
    shutdown_channel, Cardinality, CommType, JobConfig, SendVariant, Shutdown, TickOutcome,
    Transport, UdpLink,
};
pub use mailbox::{BoxSet, MessageBox};
pub use observer::{JobEvent, Observer};
pub use recv_job::ReceiveJob;
pub use send_job::SendJob;
