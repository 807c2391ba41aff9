//! portage-core — frame format, symmetric crypto, config, and marshalling.
//! The engine crate depends on this one.

pub mod config;
pub mod crypto;
pub mod frame;
pub mod marshal;

pub use config::PortageConfig;
pub use crypto::{Cipher, SecurityMode};
pub use frame::{fragment, reassemble, FrameError, Message, HEADER_LEN};
pub use marshal::{JsonMarshaller, Marshaller};
