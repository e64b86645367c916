//! Peer-to-peer video call signaling.
//!
//! Two participants join a named room over a channel transport; the signaling
//! layer turns presence events into an offer/answer exchange that opens a
//! direct media connection between them. The channel transport and the
//! connection primitive are trait seams: production implementations speak to
//! a websocket room server and to the `webrtc` crate, while the test suite
//! drives the same code over in-memory doubles.

pub mod config;
pub mod connection;
pub mod media;
pub mod protocol;
pub mod signaling;
pub mod transport;
