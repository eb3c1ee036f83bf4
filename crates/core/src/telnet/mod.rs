//! Telnet negotiation and framing
//!
//! A deliberately small implementation of the parts of RFC 854 a console
//! needs:
//! - IAC escaping in both directions
//! - WILL/WONT/DO/DONT answered from a fixed preference table
//! - Subnegotiations consumed without interpretation
//! - NVT line-ending translation, switched off by BINARY

mod context;
mod options;

pub use context::{EventSink, TelnetContext, TelnetEvent, DO, DONT, IAC, SB, SE, WILL, WONT};
pub use options::{LocalStance, NegotiationPreferences, OptionPreference, RemoteStance, TelnetOption};
