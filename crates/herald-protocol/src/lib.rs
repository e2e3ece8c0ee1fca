//! # herald-protocol
//!
//! Client wire protocol for the Herald broadcast gateway.
//!
//! Clients talk to Herald over WebSocket. Every message is a [`Frame`],
//! sent either as a JSON text message or as a length-prefixed MessagePack
//! binary message.
//!
//! ## Frame Types
//!
//! - `Subscribe` / `Unsubscribe` - Channel membership
//! - `ClientEvent` - Relay an event to the other members of a channel
//! - `Event` - An event delivered to the client
//! - `Connected` / `Error` - Handshake and protocol errors
//! - `Ping` / `Pong` - Keepalive
//!
//! ## Example
//!
//! ```rust
//! use herald_protocol::{Frame, codec};
//!
//! let frame = Frame::subscribe("private-orders");
//!
//! let text = codec::encode(&frame).unwrap();
//! let decoded = codec::decode(&text).unwrap();
//! assert_eq!(frame, decoded);
//! ```

pub mod codec;
pub mod frames;

pub use codec::{decode, encode, ProtocolError};
pub use frames::{ClientEventBody, Frame};
