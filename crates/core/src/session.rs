//! Connection handler for one telnet session
//!
//! A single-task loop multiplexes two readiness conditions on the socket:
//! - readable: feed bytes through telnet decoding into the line handler
//! - writable while output is pending: drain a chunk from the buffer, frame
//!   it, send it
//!
//! The readiness wait is bounded so pending output is re-checked even when
//! the remote stays silent.

use std::sync::Arc;
use tokio::io::{AsyncWriteExt, Interest};
use tokio::net::TcpStream;

use crate::command::LineHandler;
use crate::config::BridgeConfig;
use crate::line::{LineDecoder, LineError};
use crate::redirect::OutputRedirector;
use crate::telnet::{EventSink, NegotiationPreferences, TelnetContext, TelnetEvent};

/// Everything a session needs that outlives it
#[derive(Clone)]
pub struct SessionContext {
    pub config: Arc<BridgeConfig>,
    pub console: Arc<OutputRedirector>,
    pub handler: Arc<dyn LineHandler>,
    pub preferences: Arc<NegotiationPreferences>,
}

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Remote closed the connection
    Closed,
    /// Read failed
    ReadError,
    /// Readiness wait failed
    PollError,
}

/// Typed per-session state that telnet events are delivered to
struct SessionSink {
    outbound: Vec<u8>,
    decoder: LineDecoder,
    lines: Vec<Result<String, LineError>>,
}

impl EventSink for SessionSink {
    fn on_event(&mut self, event: TelnetEvent<'_>) {
        match event {
            TelnetEvent::Send(bytes) => self.outbound.extend_from_slice(bytes),
            TelnetEvent::Data(bytes) => {
                let lines = self.decoder.feed(bytes);
                self.lines.extend(lines);
            }
        }
    }
}

/// One accepted connection
pub struct Session {
    stream: TcpStream,
    ctx: SessionContext,
    telnet: TelnetContext,
    sink: SessionSink,
    rx_buf: Vec<u8>,
}

impl Session {
    /// ACCEPTED: allocate per-session state and the telnet context
    pub fn new(stream: TcpStream, ctx: SessionContext) -> Self {
        let telnet = TelnetContext::new(Arc::clone(&ctx.preferences));
        let sink = SessionSink {
            outbound: Vec::with_capacity(ctx.config.tx_chunk_size * 2),
            decoder: LineDecoder::new(ctx.config.max_line_length),
            lines: Vec::new(),
        };
        let rx_buf = vec![0u8; ctx.config.rx_buffer_size];

        Self {
            stream,
            ctx,
            telnet,
            sink,
            rx_buf,
        }
    }

    /// SERVING until the connection dies; the socket closes on drop
    pub async fn run(mut self) -> SessionEnd {
        let buffer = Arc::clone(self.ctx.console.buffer());
        let poll_timeout = self.ctx.config.poll_timeout();
        let drain_wait = self.ctx.config.drain_wait();
        let tx_chunk = self.ctx.config.tx_chunk_size;

        loop {
            let pending = !buffer.is_empty();
            let interest = if pending {
                Interest::READABLE | Interest::WRITABLE
            } else {
                Interest::READABLE
            };

            let ready = match tokio::time::timeout(poll_timeout, self.stream.ready(interest)).await {
                Err(_) => continue,
                Ok(Err(e)) => {
                    tracing::error!("Socket poll error: {}", e);
                    return SessionEnd::PollError;
                }
                Ok(Ok(ready)) => ready,
            };

            if ready.is_readable() || ready.is_read_closed() {
                match self.stream.try_read(&mut self.rx_buf) {
                    Ok(0) => {
                        tracing::info!("Telnet client closed the connection");
                        return SessionEnd::Closed;
                    }
                    Ok(n) => {
                        self.telnet.receive(&self.rx_buf[..n], &mut self.sink);
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                    Err(e) => {
                        tracing::error!("Telnet receive error: {}", e);
                        return SessionEnd::ReadError;
                    }
                }
            }

            if pending && ready.is_writable() {
                let chunk = buffer.take_upto(tx_chunk, drain_wait).await;
                // No per-chunk logging: the log output itself lands in this buffer
                if !chunk.is_empty() {
                    self.telnet.send_text(&chunk, &mut self.sink);
                }
            }

            self.flush_outbound().await;
            self.dispatch_lines();
        }
    }

    // Send errors are left for the read side to notice
    async fn flush_outbound(&mut self) {
        if self.sink.outbound.is_empty() {
            return;
        }
        if let Err(e) = self.stream.write_all(&self.sink.outbound).await {
            tracing::warn!("Telnet send error: {}", e);
        }
        self.sink.outbound.clear();
    }

    fn dispatch_lines(&mut self) {
        for line in self.sink.lines.drain(..) {
            match line {
                Ok(line) => self.ctx.handler.handle_line(&line, &self.ctx.console),
                Err(LineError::TooLong { length, max }) => {
                    self.ctx.handler.handle_overflow(length, max, &self.ctx.console)
                }
            }
        }
    }
}

/// Run one connection from accept to close
pub async fn serve_connection(stream: TcpStream, ctx: SessionContext) -> SessionEnd {
    Session::new(stream, ctx).run().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BoundedByteBuffer;
    use crate::telnet::TelnetEvent;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[derive(Default)]
    struct Recorder {
        lines: Mutex<Vec<String>>,
        overflows: Mutex<Vec<usize>>,
    }

    impl LineHandler for Recorder {
        fn handle_line(&self, line: &str, console: &Arc<OutputRedirector>) {
            self.lines.lock().unwrap().push(line.to_string());
            console.write(format!("ran {}\n", line).as_bytes());
        }

        fn handle_overflow(&self, length: usize, _max: usize, _console: &Arc<OutputRedirector>) {
            self.overflows.lock().unwrap().push(length);
        }
    }

    #[derive(Default)]
    struct Unframe {
        data: Vec<u8>,
    }

    impl EventSink for Unframe {
        fn on_event(&mut self, event: TelnetEvent<'_>) {
            if let TelnetEvent::Data(bytes) = event {
                self.data.extend_from_slice(bytes);
            }
        }
    }

    fn context(handler: Arc<dyn LineHandler>) -> SessionContext {
        let config = BridgeConfig::default();
        let buffer = Arc::new(BoundedByteBuffer::new(config.buffer_capacity).unwrap());
        SessionContext {
            config: Arc::new(config),
            console: Arc::new(OutputRedirector::new(buffer, false)),
            handler,
            preferences: Arc::new(NegotiationPreferences::default()),
        }
    }

    async fn connected(ctx: SessionContext) -> (TcpStream, tokio::task::JoinHandle<SessionEnd>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        let task = tokio::spawn(serve_connection(server, ctx));
        (client, task)
    }

    /// Read and unframe until `expected` bytes of application data arrived
    async fn read_unframed(client: &mut TcpStream, expected: usize) -> Vec<u8> {
        let mut telnet = TelnetContext::new(Arc::new(NegotiationPreferences::default()));
        let mut sink = Unframe::default();
        let mut buf = [0u8; 512];

        while sink.data.len() < expected {
            let n = tokio::time::timeout(Duration::from_secs(5), client.read(&mut buf))
                .await
                .expect("timed out waiting for output")
                .unwrap();
            assert!(n > 0, "server closed early");
            telnet.receive(&buf[..n], &mut sink);
        }
        sink.data
    }

    #[tokio::test]
    async fn test_output_round_trip() {
        let ctx = context(Arc::new(Recorder::default()));
        let console = Arc::clone(&ctx.console);
        let original = b"boot\nstatus: \xff ok\r\nbare\rdone\n".to_vec();

        console.write(&original[..10]);
        let (mut client, _task) = connected(ctx).await;
        console.write(&original[10..]);

        let received = read_unframed(&mut client, original.len()).await;
        assert_eq!(received, original);
    }

    #[tokio::test]
    async fn test_lines_reach_handler() {
        let recorder = Arc::new(Recorder::default());
        let (mut client, _task) = connected(context(recorder.clone())).await;

        client.write_all(b"help\r\nver").await.unwrap();
        client.write_all(b"sion\r\n").await.unwrap();

        let out = read_unframed(&mut client, b"ran help\nran version\n".len()).await;
        assert_eq!(out, b"ran help\nran version\n");
        assert_eq!(*recorder.lines.lock().unwrap(), vec!["help", "version"]);
    }

    #[tokio::test]
    async fn test_every_terminator_form_dispatches_over_socket() {
        for input in [&b"help\r\n"[..], b"help\n", b"help\r", b"help\n\r"] {
            let recorder = Arc::new(Recorder::default());
            let (mut client, _task) = connected(context(recorder.clone())).await;

            client.write_all(input).await.unwrap();

            let out = read_unframed(&mut client, b"ran help\n".len()).await;
            assert_eq!(out, b"ran help\n", "input {:?}", input);
            assert_eq!(*recorder.lines.lock().unwrap(), vec!["help"], "input {:?}", input);
        }
    }

    #[tokio::test]
    async fn test_over_length_line_keeps_session_open() {
        let recorder = Arc::new(Recorder::default());
        let (mut client, task) = connected(context(recorder.clone())).await;

        let mut input = vec![b'x'; 300];
        input.extend_from_slice(b"\r\nhelp\r\n");
        client.write_all(&input).await.unwrap();

        let out = read_unframed(&mut client, b"ran help\n".len()).await;
        assert_eq!(out, b"ran help\n");
        assert_eq!(*recorder.overflows.lock().unwrap(), vec![300]);
        assert!(!task.is_finished());
    }

    #[tokio::test]
    async fn test_negotiation_reply_sent() {
        let (mut client, _task) = connected(context(Arc::new(Recorder::default()))).await;

        client.write_all(&[crate::telnet::IAC, crate::telnet::DO, 24]).await.unwrap();

        let mut reply = [0u8; 3];
        tokio::time::timeout(Duration::from_secs(5), client.read_exact(&mut reply))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply, [crate::telnet::IAC, crate::telnet::WILL, 24]);
    }

    #[tokio::test]
    async fn test_remote_close_ends_session() {
        let (client, task) = connected(context(Arc::new(Recorder::default()))).await;
        drop(client);

        let end = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(end, SessionEnd::Closed | SessionEnd::ReadError));
    }
}
