//! # CarLink Channel
//!
//! The secure-channel layer between the message stream and the association
//! flows: a state machine that drives the injected UKey2 primitive through
//! its handshake, supports saving and resuming sessions, and hands the
//! stream an encryptor once established.
//!
//! All interaction is event-in/action-out: inbound handshake payloads and
//! user confirmations go in, [`ChannelAction`]s (messages to send, the
//! verification token to surface, establishment) come out. The owner — a
//! connection's event loop — performs the actions, so the channel holds no
//! reference to the stream.
//!
//! ## Module Structure
//!
//! - `ukey2_channel`: the UKey2-driving state machine, fresh and resumed
//! - `passthrough`: the no-crypto legacy variant with its fixed code
//! - `channel`: the tagged sum the rest of the stack works with
//! - `cipher`: the encryptor handle installed into the stream
//! - `saved`: persisted session blob codec
//! - `error`: channel error taxonomy

pub mod channel;
pub mod cipher;
pub mod error;
pub mod passthrough;
pub mod saved;
pub mod ukey2_channel;

pub use channel::SecureBleChannel;
pub use cipher::SessionCipher;
pub use error::{ChannelError, Result};
pub use passthrough::PassthroughChannel;
pub use saved::SavedSession;
pub use ukey2_channel::{ChannelAction, ChannelState, Ukey2Channel};
