//! Host side of the microcontroller serial link.
//!
//! `SerialLink` owns the write half of a transport and a reader thread that
//! pushes received lines onto a channel. Callers wait for lines against a
//! deadline instead of polling the receive buffer.
//!
//! Transports:
//! - A TTY device (`/dev/ttyACM0`), baud rate set through termios on Linux
//! - `stub://` ports, answered by an in-process simulated controller
//! - Any `Read`/`Write` pair via `SerialLink::from_io` (scripted tests)
//!
//! Every command is request/response except `H<side>`, which streams.

pub mod protocol;
pub mod simulated;
mod tty;

use anyhow::Result;
use std::io::{BufRead, BufReader, Read, Write};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::blocking::BlockSide;
pub use protocol::{
    parse_distance_reply, parse_monitor_line, Command, DistanceSample, MonitorLine,
    BALL_DETECTED, REPLY_OK,
};
pub use simulated::{SimulatedConfig, SimulatedController};

const DEFAULT_PORT: &str = "/dev/ttyACM0";
const DEFAULT_BAUD: u32 = 9600;
/// The canned block motion runs for several seconds before `OK`.
const BLOCK_REPLY_TIMEOUT: Duration = Duration::from_secs(10);
const READER_STOP_GRACE: Duration = Duration::from_millis(500);

#[derive(Clone, Debug)]
pub struct SerialConfig {
    /// Device path, or `stub://<name>` for the simulated controller.
    pub port: String,
    pub baud_rate: u32,
    /// Reply timeout for request/response commands.
    pub timeout: Duration,
    /// Wait after opening for the microcontroller to come out of reset.
    pub reset_delay: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT.to_string(),
            baud_rate: DEFAULT_BAUD,
            timeout: Duration::from_secs(1),
            reset_delay: Duration::from_secs(2),
        }
    }
}

/// Failure classes surfaced by the link. Carried inside `anyhow::Error`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LinkError {
    NotConnected,
    Timeout,
    UnexpectedResponse { command: String, response: String },
    Io(String),
}

impl std::fmt::Display for LinkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkError::NotConnected => write!(f, "serial link not connected"),
            LinkError::Timeout => write!(f, "serial read timed out"),
            LinkError::UnexpectedResponse { command, response } => {
                write!(f, "unexpected response to {}: {:?}", command, response)
            }
            LinkError::Io(msg) => write!(f, "serial i/o failed: {}", msg),
        }
    }
}

impl std::error::Error for LinkError {}

/// `Read` adapter over a channel of byte chunks. EOF once every sender is gone.
pub struct ChannelReader {
    rx: Receiver<Vec<u8>>,
    pending: Vec<u8>,
    offset: usize,
}

impl ChannelReader {
    pub fn new(rx: Receiver<Vec<u8>>) -> Self {
        Self {
            rx,
            pending: Vec::new(),
            offset: 0,
        }
    }

    /// A connected sender/reader pair.
    pub fn pair() -> (Sender<Vec<u8>>, Self) {
        let (tx, rx) = mpsc::channel();
        (tx, Self::new(rx))
    }
}

impl Read for ChannelReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        while self.offset >= self.pending.len() {
            match self.rx.recv() {
                Ok(chunk) => {
                    self.pending = chunk;
                    self.offset = 0;
                }
                Err(_) => return Ok(0),
            }
        }
        let available = &self.pending[self.offset..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.offset += n;
        Ok(n)
    }
}

pub struct SerialLink {
    label: String,
    writer: Option<Box<dyn Write + Send>>,
    lines: Receiver<String>,
    reader: Option<JoinHandle<()>>,
    stop_reader: Option<Box<dyn FnOnce() + Send>>,
    timeout: Duration,
}

impl SerialLink {
    /// Open the configured port and run the connection handshake: wait out the
    /// controller reset, flush, and discard the startup banner.
    pub fn open(config: &SerialConfig) -> Result<Self> {
        let mut link = if config.port.starts_with("stub://") {
            let controller = SimulatedController::new(SimulatedConfig::default());
            let (reader, writer) = controller.into_io();
            Self::from_io(&config.port, reader, writer, config.timeout)
        } else {
            let (reader, writer, stop) = tty::open(&config.port, config.baud_rate)
                .map_err(|e| anyhow::Error::new(LinkError::Io(format!("{:#}", e))))?;
            let mut link = Self::from_io(&config.port, reader, writer, config.timeout);
            link.stop_reader = Some(Box::new(stop));
            link
        };

        std::thread::sleep(config.reset_delay);
        link.flush_input();
        if let Some(banner) = link.try_line() {
            log::debug!("controller startup: {}", banner);
        }
        log::info!(
            "serial link connected on {} ({} baud)",
            config.port,
            config.baud_rate
        );
        Ok(link)
    }

    /// Wrap an already-open transport. No handshake is performed.
    pub fn from_io<R, W>(label: &str, reader: R, writer: W, timeout: Duration) -> Self
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        let reader_label = label.to_string();
        let handle = std::thread::spawn(move || read_lines(reader, tx, &reader_label));
        Self {
            label: label.to_string(),
            writer: Some(Box::new(writer)),
            lines: rx,
            reader: Some(handle),
            stop_reader: None,
            timeout,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_connected(&self) -> bool {
        self.writer.is_some()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Close the transport and stop the reader thread.
    pub fn disconnect(&mut self) {
        let was_connected = self.writer.take().is_some();
        if let Some(stop) = self.stop_reader.take() {
            stop();
        }
        if let Some(handle) = self.reader.take() {
            // The reader exits once the transport reports EOF.
            let grace = Instant::now() + READER_STOP_GRACE;
            while !handle.is_finished() && Instant::now() < grace {
                std::thread::sleep(Duration::from_millis(5));
            }
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                log::debug!("serial reader {} still draining; detaching", self.label);
            }
        }
        if was_connected {
            log::info!("serial link {} disconnected", self.label);
        }
    }

    /// Write one command line.
    pub fn send(&mut self, command: &Command) -> Result<()> {
        let line = command.encode()?;
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| anyhow::Error::new(LinkError::NotConnected))?;
        writer
            .write_all(line.as_bytes())
            .and_then(|_| writer.flush())
            .map_err(|e| anyhow::Error::new(LinkError::Io(e.to_string())))?;
        log::debug!("serial tx {}: {}", self.label, line.trim_end());
        Ok(())
    }

    /// Send `command` and wait for a single reply line.
    pub fn request(&mut self, command: &Command, timeout: Duration) -> Result<String> {
        self.send(command)?;
        self.recv_line(timeout)
    }

    /// Wait up to `timeout` for the next non-empty line.
    pub fn recv_line(&mut self, timeout: Duration) -> Result<String> {
        match self.next_line(Instant::now() + timeout)? {
            Some(line) => Ok(line),
            None => Err(anyhow::Error::new(LinkError::Timeout)),
        }
    }

    /// Wait until `deadline` for the next line. `Ok(None)` once the deadline passes.
    pub fn next_line(&mut self, deadline: Instant) -> Result<Option<String>> {
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let received = if remaining.is_zero() {
                match self.lines.try_recv() {
                    Ok(line) => Ok(line),
                    Err(TryRecvError::Empty) => return Ok(None),
                    Err(TryRecvError::Disconnected) => Err(RecvTimeoutError::Disconnected),
                }
            } else {
                self.lines.recv_timeout(remaining)
            };
            match received {
                Ok(line) if line.is_empty() => continue,
                Ok(line) => {
                    log::trace!("serial rx {}: {}", self.label, line);
                    return Ok(Some(line));
                }
                Err(RecvTimeoutError::Timeout) => return Ok(None),
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(anyhow::Error::new(LinkError::Io(
                        "serial reader stopped".to_string(),
                    )))
                }
            }
        }
    }

    /// Drop any lines received but not yet consumed.
    pub fn flush_input(&mut self) -> usize {
        let mut dropped = 0;
        while self.lines.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            log::debug!("serial {}: flushed {} stale line(s)", self.label, dropped);
        }
        dropped
    }

    fn try_line(&mut self) -> Option<String> {
        self.lines.try_recv().ok()
    }

    /// `I`: move every actuator to rest.
    pub fn initialize_actuators(&mut self) -> bool {
        match self.expect_ok(&Command::Initialize, self.timeout) {
            Ok(()) => true,
            Err(e) => {
                log::error!("initialize actuators failed: {:#}", e);
                false
            }
        }
    }

    /// `D<side>`: single-shot distance read, in centimeters.
    pub fn read_distance(&mut self, side: BlockSide) -> Option<f64> {
        let command = Command::ReadDistance(side);
        let reply = match self.request(&command, self.timeout) {
            Ok(reply) => reply,
            Err(e) => {
                log::error!("read distance ({}) failed: {:#}", side, e);
                return None;
            }
        };
        match parse_distance_reply(&reply) {
            Some(cm) => {
                log::debug!("distance ({}): {:.1} cm", side, cm);
                Some(cm)
            }
            None => {
                log::error!("read distance ({}): invalid response {:?}", side, reply);
                None
            }
        }
    }

    /// `S<id><value>`: set one actuator. Out-of-range arguments are rejected
    /// before anything is written.
    pub fn set_actuator(&mut self, id: u8, value: u16) -> bool {
        if let Err(e) = protocol::validate_actuator(id, value) {
            log::error!("set actuator rejected: {:#}", e);
            return false;
        }
        match self.expect_ok(&Command::SetActuator { id, value }, self.timeout) {
            Ok(()) => {
                log::debug!("actuator {} set to {}", id, value);
                true
            }
            Err(e) => {
                log::error!("set actuator {} failed: {:#}", id, e);
                false
            }
        }
    }

    /// `B<side>`: run the canned block and wait for it to finish.
    pub fn block(&mut self, side: BlockSide) -> bool {
        match self.expect_ok(&Command::Block(side), BLOCK_REPLY_TIMEOUT) {
            Ok(()) => {
                log::info!("canned block {} complete", side);
                true
            }
            Err(e) => {
                log::error!("canned block {} failed: {:#}", side, e);
                false
            }
        }
    }

    /// `H<side>`: open a monitoring window. Replies stream through `next_line`.
    pub fn start_monitoring(&mut self, side: BlockSide) -> Result<()> {
        self.send(&Command::Monitor(side))
    }

    fn expect_ok(&mut self, command: &Command, timeout: Duration) -> Result<()> {
        let reply = self.request(command, timeout)?;
        if reply == REPLY_OK {
            return Ok(());
        }
        let encoded = command.encode()?;
        Err(anyhow::Error::new(LinkError::UnexpectedResponse {
            command: encoded.trim_end().to_string(),
            response: reply,
        }))
    }
}

impl Drop for SerialLink {
    fn drop(&mut self) {
        self.writer.take();
        if let Some(stop) = self.stop_reader.take() {
            stop();
        }
    }
}

fn read_lines<R: Read>(reader: R, tx: Sender<String>, label: &str) {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {
                // Undecodable bytes are replaced, never fatal.
                let line = String::from_utf8_lossy(&buf).trim().to_string();
                if tx.send(line).is_err() {
                    break;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                log::warn!("serial reader {} stopped: {}", label, e);
                break;
            }
        }
    }
    log::debug!("serial reader {} finished", label);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Writer that records bytes and answers each command line from a script.
    struct Scripted {
        written: Arc<Mutex<Vec<u8>>>,
        replies: Sender<Vec<u8>>,
        script: Vec<(&'static str, &'static str)>,
        line: Vec<u8>,
    }

    impl Write for Scripted {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.written.lock().unwrap().extend_from_slice(buf);
            for &b in buf {
                if b == b'\n' {
                    let cmd = String::from_utf8_lossy(&self.line).to_string();
                    self.line.clear();
                    if let Some((_, reply)) = self.script.iter().find(|(c, _)| *c == cmd) {
                        let _ = self.replies.send(reply.as_bytes().to_vec());
                    }
                } else {
                    self.line.push(b);
                }
            }
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn scripted(script: Vec<(&'static str, &'static str)>) -> (SerialLink, Arc<Mutex<Vec<u8>>>) {
        let (tx, reader) = ChannelReader::pair();
        let written = Arc::new(Mutex::new(Vec::new()));
        let writer = Scripted {
            written: written.clone(),
            replies: tx,
            script,
            line: Vec::new(),
        };
        let link = SerialLink::from_io("test", reader, writer, Duration::from_millis(200));
        (link, written)
    }

    #[test]
    fn request_response_commands() {
        let (mut link, written) = scripted(vec![
            ("I", "OK\n"),
            ("DL", "D01234\n"),
            ("DR", "ERR\n"),
            ("S00300", "OK\n"),
            ("S01300", "BAD\n"),
            ("BR", "OK\r\n"),
        ]);
        assert!(link.initialize_actuators());
        assert_eq!(link.read_distance(BlockSide::Left), Some(123.4));
        assert_eq!(link.read_distance(BlockSide::Right), None);
        assert!(link.set_actuator(0, 300));
        assert!(!link.set_actuator(1, 300));
        assert!(link.block(BlockSide::Right));

        let sent = String::from_utf8(written.lock().unwrap().clone()).unwrap();
        assert_eq!(sent, "I\nDL\nDR\nS00300\nS01300\nBR\n");
    }

    #[test]
    fn invalid_actuator_arguments_are_not_sent() {
        let (mut link, written) = scripted(vec![]);
        assert!(!link.set_actuator(16, 300));
        assert!(!link.set_actuator(3, 700));
        assert!(written.lock().unwrap().is_empty());
    }

    #[test]
    fn missing_reply_is_a_timeout() {
        let (mut link, _) = scripted(vec![]);
        let err = link
            .request(&Command::Initialize, Duration::from_millis(50))
            .unwrap_err();
        assert_eq!(err.downcast_ref::<LinkError>(), Some(&LinkError::Timeout));
        assert!(!link.initialize_actuators());
    }

    #[test]
    fn unexpected_token_is_classified() {
        let (mut link, _) = scripted(vec![("I", "NOPE\n")]);
        let err = link
            .expect_ok(&Command::Initialize, Duration::from_millis(200))
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<LinkError>(),
            Some(LinkError::UnexpectedResponse { .. })
        ));
    }

    #[test]
    fn disconnected_link_refuses_commands() {
        let (mut link, _) = scripted(vec![("I", "OK\n")]);
        link.disconnect();
        assert!(!link.is_connected());
        let err = link.send(&Command::Initialize).unwrap_err();
        assert_eq!(err.downcast_ref::<LinkError>(), Some(&LinkError::NotConnected));
    }

    #[test]
    fn next_line_returns_none_at_deadline() {
        let (mut link, _) = scripted(vec![]);
        let start = Instant::now();
        let line = link.next_line(start + Duration::from_millis(30)).unwrap();
        assert!(line.is_none());
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn stub_port_runs_handshake_against_simulator() {
        let config = SerialConfig {
            port: "stub://keeper".to_string(),
            reset_delay: Duration::from_millis(20),
            ..SerialConfig::default()
        };
        let mut link = SerialLink::open(&config).unwrap();
        assert!(link.initialize_actuators());
        assert!(link.read_distance(BlockSide::Left).is_some());
        link.disconnect();
    }
}
