//! Per-connection telnet state machine
//!
//! Parses the inbound byte stream (IAC commands, option negotiation,
//! subnegotiation) and frames outbound application text. Everything the
//! connection has to act on is reported through [`EventSink`] as one of
//! two events: bytes to transmit, or decoded application data.

use std::sync::Arc;

use super::options::{LocalStance, NegotiationPreferences, RemoteStance, TelnetOption};

pub const IAC: u8 = 255;
pub const DONT: u8 = 254;
pub const DO: u8 = 253;
pub const WONT: u8 = 252;
pub const WILL: u8 = 251;
pub const SB: u8 = 250;
pub const SE: u8 = 240;

const CR: u8 = b'\r';
const LF: u8 = b'\n';
const NUL: u8 = 0;

/// Event emitted by [`TelnetContext`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelnetEvent<'a> {
    /// Protocol-framed bytes that must be written to the socket
    Send(&'a [u8]),
    /// Application data with telnet commands stripped
    Data(&'a [u8]),
}

/// Receiver for telnet events, normally the session that owns the context
pub trait EventSink {
    fn on_event(&mut self, event: TelnetEvent<'_>);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    Data,
    Iac,
    Negotiate(u8),
    SbOption,
    SbData,
    SbIac,
}

/// Progress of an inbound CR through NVT translation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CrState {
    None,
    /// CR seen mid-read; the next byte decides what it means
    Held,
    /// CR ended a read and was delivered; drop one LF or NUL after it
    Delivered,
}

/// Negotiated state of a single option
#[derive(Debug, Clone, Copy, Default)]
struct OptionState {
    /// We perform the option
    us: bool,
    /// The remote performs the option
    him: bool,
}

/// Telnet negotiation context for one connection
pub struct TelnetContext {
    preferences: Arc<NegotiationPreferences>,
    state: ParseState,
    options: [OptionState; 256],
    cr: CrState,
    data: Vec<u8>,
}

impl TelnetContext {
    /// Create context bound to the shared preference table
    pub fn new(preferences: Arc<NegotiationPreferences>) -> Self {
        Self {
            preferences,
            state: ParseState::Data,
            options: [OptionState::default(); 256],
            cr: CrState::None,
            data: Vec::with_capacity(256),
        }
    }

    /// We have agreed to perform `option`
    pub fn local_enabled(&self, option: TelnetOption) -> bool {
        self.options[option.code() as usize].us
    }

    /// The remote has agreed to perform `option`
    pub fn remote_enabled(&self, option: TelnetOption) -> bool {
        self.options[option.code() as usize].him
    }

    /// Feed bytes received from the socket
    pub fn receive(&mut self, input: &[u8], sink: &mut impl EventSink) {
        for &byte in input {
            match self.state {
                ParseState::Data => {
                    if byte == IAC {
                        self.state = ParseState::Iac;
                    } else {
                        self.push_data(byte);
                    }
                }
                ParseState::Iac => match byte {
                    IAC => {
                        self.push_data(IAC);
                        self.state = ParseState::Data;
                    }
                    WILL | WONT | DO | DONT => {
                        self.state = ParseState::Negotiate(byte);
                    }
                    SB => {
                        self.state = ParseState::SbOption;
                    }
                    command => {
                        tracing::trace!("Ignoring telnet command {}", command);
                        self.state = ParseState::Data;
                    }
                },
                ParseState::Negotiate(verb) => {
                    self.flush_data(sink);
                    self.negotiate(verb, TelnetOption(byte), sink);
                    self.state = ParseState::Data;
                }
                ParseState::SbOption => {
                    tracing::trace!("Skipping subnegotiation for option {}", byte);
                    self.state = ParseState::SbData;
                }
                ParseState::SbData => {
                    if byte == IAC {
                        self.state = ParseState::SbIac;
                    }
                }
                ParseState::SbIac => {
                    self.state = match byte {
                        SE => ParseState::Data,
                        _ => ParseState::SbData,
                    };
                }
            }
        }

        // A CR closing the read goes out now so a bare-CR line is not stuck
        if self.cr == CrState::Held {
            self.data.push(CR);
            self.cr = CrState::Delivered;
        }
        self.flush_data(sink);
    }

    /// Frame application text and emit it as a single `Send` event
    ///
    /// IAC is doubled. Unless we negotiated BINARY, line endings follow the
    /// NVT rules: LF goes out as CR LF and a bare CR as CR NUL.
    pub fn send_text(&mut self, text: &[u8], sink: &mut impl EventSink) {
        if text.is_empty() {
            return;
        }

        let binary = self.local_enabled(TelnetOption::BINARY);
        let mut framed = Vec::with_capacity(text.len() + text.len() / 8 + 2);
        for &byte in text {
            match byte {
                IAC => framed.extend_from_slice(&[IAC, IAC]),
                LF if !binary => framed.extend_from_slice(&[CR, LF]),
                CR if !binary => framed.extend_from_slice(&[CR, NUL]),
                _ => framed.push(byte),
            }
        }
        sink.on_event(TelnetEvent::Send(&framed));
    }

    /// Send a raw negotiation command, e.g. to announce an option up front
    pub fn send_negotiation(&mut self, verb: u8, option: TelnetOption, sink: &mut impl EventSink) {
        sink.on_event(TelnetEvent::Send(&[IAC, verb, option.code()]));
    }

    // Answers only on a state change, which keeps two agreeing peers from
    // acknowledging each other forever
    fn negotiate(&mut self, verb: u8, option: TelnetOption, sink: &mut impl EventSink) {
        let idx = option.code() as usize;
        let reply = match verb {
            WILL if !self.options[idx].him => match self.preferences.remote(option) {
                RemoteStance::Do => {
                    self.options[idx].him = true;
                    Some(DO)
                }
                RemoteStance::Dont => Some(DONT),
            },
            WONT if self.options[idx].him => {
                self.options[idx].him = false;
                Some(DONT)
            }
            DO if !self.options[idx].us => match self.preferences.local(option) {
                LocalStance::Will => {
                    self.options[idx].us = true;
                    Some(WILL)
                }
                LocalStance::Wont => Some(WONT),
            },
            DONT if self.options[idx].us => {
                self.options[idx].us = false;
                Some(WONT)
            }
            _ => None,
        };

        tracing::trace!(
            "Telnet negotiation verb={} option={} reply={:?}",
            verb,
            option.code(),
            reply
        );

        if let Some(reply) = reply {
            self.send_negotiation(reply, option, sink);
        }
    }

    fn push_data(&mut self, byte: u8) {
        if self.remote_enabled(TelnetOption::BINARY) {
            self.data.push(byte);
            return;
        }

        match std::mem::replace(&mut self.cr, CrState::None) {
            CrState::None => {}
            CrState::Held => match byte {
                LF => {
                    self.data.push(LF);
                    return;
                }
                NUL => {
                    self.data.push(CR);
                    return;
                }
                _ => self.data.push(CR),
            },
            CrState::Delivered => {
                if byte == LF || byte == NUL {
                    return;
                }
            }
        }

        if byte == CR {
            self.cr = CrState::Held;
        } else {
            self.data.push(byte);
        }
    }

    fn flush_data(&mut self, sink: &mut impl EventSink) {
        if !self.data.is_empty() {
            sink.on_event(TelnetEvent::Data(&self.data));
            self.data.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        sent: Vec<u8>,
        data: Vec<u8>,
        events: usize,
    }

    impl EventSink for Recorder {
        fn on_event(&mut self, event: TelnetEvent<'_>) {
            self.events += 1;
            match event {
                TelnetEvent::Send(bytes) => self.sent.extend_from_slice(bytes),
                TelnetEvent::Data(bytes) => self.data.extend_from_slice(bytes),
            }
        }
    }

    fn context() -> TelnetContext {
        TelnetContext::new(Arc::new(NegotiationPreferences::default()))
    }

    #[test]
    fn test_plain_data_passthrough() {
        let mut ctx = context();
        let mut rec = Recorder::default();

        ctx.receive(b"help", &mut rec);

        assert_eq!(rec.data, b"help");
        assert!(rec.sent.is_empty());
    }

    #[test]
    fn test_escaped_iac_in_data() {
        let mut ctx = context();
        let mut rec = Recorder::default();

        ctx.receive(&[b'a', IAC, IAC, b'b'], &mut rec);

        assert_eq!(rec.data, vec![b'a', IAC, b'b']);
    }

    #[test]
    fn test_accepts_preferred_option() {
        let mut ctx = context();
        let mut rec = Recorder::default();

        ctx.receive(&[IAC, DO, TelnetOption::TTYPE.code()], &mut rec);

        assert_eq!(rec.sent, vec![IAC, WILL, TelnetOption::TTYPE.code()]);
        assert!(ctx.local_enabled(TelnetOption::TTYPE));
    }

    #[test]
    fn test_refuses_unlisted_option() {
        let mut ctx = context();
        let mut rec = Recorder::default();

        ctx.receive(&[IAC, WILL, TelnetOption::SGA.code()], &mut rec);
        ctx.receive(&[IAC, DO, TelnetOption::ECHO.code()], &mut rec);

        assert_eq!(
            rec.sent,
            vec![IAC, DONT, TelnetOption::SGA.code(), IAC, WONT, TelnetOption::ECHO.code()]
        );
        assert!(!ctx.remote_enabled(TelnetOption::SGA));
        assert!(!ctx.local_enabled(TelnetOption::ECHO));
    }

    #[test]
    fn test_repeated_request_not_acknowledged_twice() {
        let mut ctx = context();
        let mut rec = Recorder::default();

        ctx.receive(&[IAC, WILL, TelnetOption::NAWS.code()], &mut rec);
        let after_first = rec.sent.len();
        // NAWS remote stance is DONT so every WILL is refused, but LINEMODE is DO
        ctx.receive(&[IAC, WILL, TelnetOption::LINEMODE.code()], &mut rec);
        let after_accept = rec.sent.len();
        ctx.receive(&[IAC, WILL, TelnetOption::LINEMODE.code()], &mut rec);

        assert_eq!(after_first, 3);
        assert_eq!(after_accept, 6);
        assert_eq!(rec.sent.len(), after_accept);
    }

    #[test]
    fn test_subnegotiation_is_consumed() {
        let mut ctx = context();
        let mut rec = Recorder::default();

        let mut input = b"ab".to_vec();
        input.extend_from_slice(&[IAC, SB, TelnetOption::NAWS.code(), 0, 80, IAC, IAC, 0, 24, IAC, SE]);
        input.extend_from_slice(b"cd");
        ctx.receive(&input, &mut rec);

        assert_eq!(rec.data, b"abcd");
        assert!(rec.sent.is_empty());
    }

    #[test]
    fn test_command_split_across_reads() {
        let mut ctx = context();
        let mut rec = Recorder::default();

        ctx.receive(&[b'x', IAC], &mut rec);
        ctx.receive(&[DO], &mut rec);
        ctx.receive(&[TelnetOption::BINARY.code(), b'y'], &mut rec);

        assert_eq!(rec.data, b"xy");
        assert_eq!(rec.sent, vec![IAC, WILL, TelnetOption::BINARY.code()]);
    }

    #[test]
    fn test_nvt_input_translation() {
        let mut ctx = context();
        let mut rec = Recorder::default();

        ctx.receive(b"one\r\ntwo\r\0three", &mut rec);
        assert_eq!(rec.data, b"one\ntwo\rthree");
    }

    #[test]
    fn test_cr_ending_a_read_is_delivered_at_once() {
        let mut ctx = context();
        let mut rec = Recorder::default();

        ctx.receive(b"help\r", &mut rec);
        assert_eq!(rec.data, b"help\r");

        // The LF or NUL completing that CR is swallowed, nothing else is
        ctx.receive(b"\n", &mut rec);
        ctx.receive(b"next\r", &mut rec);
        ctx.receive(b"\0x", &mut rec);
        ctx.receive(b"\r", &mut rec);
        ctx.receive(b"y", &mut rec);
        assert_eq!(rec.data, b"help\rnext\rx\ry");
    }

    #[test]
    fn test_send_text_nvt_framing() {
        let mut ctx = context();
        let mut rec = Recorder::default();

        ctx.send_text(&[b'a', b'\n', b'b', b'\r', IAC], &mut rec);

        assert_eq!(rec.sent, vec![b'a', CR, LF, b'b', CR, NUL, IAC, IAC]);
        assert_eq!(rec.events, 1);
    }

    #[test]
    fn test_send_text_binary_mode_only_escapes_iac() {
        let mut ctx = context();
        let mut rec = Recorder::default();
        ctx.receive(&[IAC, DO, TelnetOption::BINARY.code()], &mut rec);
        rec.sent.clear();

        ctx.send_text(&[b'a', b'\n', IAC], &mut rec);

        assert_eq!(rec.sent, vec![b'a', b'\n', IAC, IAC]);
    }

    #[test]
    fn test_framing_round_trip() {
        let original = b"line one\nline two\r\nbare\rend\xff\xfe".to_vec();

        let mut server = context();
        let mut framed = Recorder::default();
        server.send_text(&original, &mut framed);

        let mut client = context();
        let mut unframed = Recorder::default();
        client.receive(&framed.sent, &mut unframed);

        assert_eq!(unframed.data, original);
    }
}
