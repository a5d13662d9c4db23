//! # Cellular Modem Link
//!
//! Owns the one serial connection to the SIM7070G and everything that rides
//! on it: port/baud auto-detection, the ordered setup sequence, network
//! registration checks, and SMS sends with bounded retries.
//!
//! ## State machine
//!
//! ```text
//! Disconnected -> Connecting -> Ready -> Degraded -> (Ready | Disconnected)
//! ```
//!
//! `connect` leaves the link in `Connecting` with a live port; `initialize`
//! promotes it to `Ready` once the required setup commands have succeeded.
//! Crossing the consecutive-send-failure threshold while `Ready` moves the
//! link to `Degraded` and triggers one automatic teardown-and-reconnect.
//! If that fails the link parks in `Disconnected` and reporting is suspended
//! until the orchestration loop asks for another [`ModemLink::reconnect`].
//!
//! ## Concurrency
//!
//! The protocol is half-duplex request/response with no request ids, so a
//! single mutex serializes every command exchange. One in-flight command at
//! a time; the lock is held for the whole of a send operation, retries
//! included. Every read is bounded by a timeout, since an unbounded read on
//! a serial link hangs forever when the far end goes quiet.

use std::io;
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use crate::at::{self, Verdict};
use crate::config::ModemConfig;
use crate::retry::{Attempt, RetryPolicy};

/// Serial devices a SIM module shows up on across Pi revisions and USB
/// adapters, in the order worth trying.
pub const CANDIDATE_PORTS: &[&str] = &[
    "/dev/serial0",
    "/dev/ttyS0",
    "/dev/ttyAMA0",
    "/dev/ttyUSB0",
    "/dev/ttyACM0",
];

/// Baud rates the SIM7070G auto-bauds against, preferred first.
pub const CANDIDATE_BAUDS: &[u32] = &[115200, 57600, 9600, 38400];

/// Spacing between reads while waiting on a reply.
const READ_POLL: Duration = Duration::from_millis(50);

/// Pause between SMS send attempts.
const SEND_RETRY_PAUSE: Duration = Duration::from_secs(2);

/// Byte-oriented half-duplex transport to the modem.
///
/// Abstracted from `serialport` so the link logic can run against scripted
/// mock ports in tests. Implementations must bound every read.
pub trait ModemPort: Send {
    /// Write the full buffer.
    fn write_all(&mut self, data: &[u8]) -> io::Result<()>;
    /// Drain whatever input is currently buffered, lossily decoded.
    fn read_available(&mut self) -> io::Result<String>;
    /// Discard any stale buffered input.
    fn clear_input(&mut self) -> io::Result<()>;
}

/// Factory producing an open port for a given device path and baud rate.
pub type PortOpener = Box<dyn Fn(&str, u32) -> io::Result<Box<dyn ModemPort>> + Send + Sync>;

/// Open a real serial port, 8N1 with a bounded read timeout.
pub fn open_serial_port(path: &str, baud: u32) -> io::Result<Box<dyn ModemPort>> {
    let port = serialport::new(path, baud)
        .timeout(Duration::from_millis(500))
        .data_bits(serialport::DataBits::Eight)
        .stop_bits(serialport::StopBits::One)
        .parity(serialport::Parity::None)
        .open()
        .map_err(io::Error::other)?;
    Ok(Box::new(SerialModemPort { inner: port }))
}

struct SerialModemPort {
    inner: Box<dyn serialport::SerialPort>,
}

impl ModemPort for SerialModemPort {
    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        io::Write::write_all(&mut self.inner, data)
    }

    fn read_available(&mut self) -> io::Result<String> {
        let waiting = self.inner.bytes_to_read().map_err(io::Error::other)? as usize;
        if waiting == 0 {
            return Ok(String::new());
        }
        let mut buf = vec![0u8; waiting];
        io::Read::read_exact(&mut self.inner, &mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    fn clear_input(&mut self) -> io::Result<()> {
        self.inner
            .clear(serialport::ClearBuffer::Input)
            .map_err(io::Error::other)
    }
}

/// Where the link currently stands; see the module docs for transitions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkState {
    /// No open connection
    Disconnected,
    /// Port open and responsive, setup not yet confirmed
    Connecting,
    /// Setup complete, accepting send requests
    Ready,
    /// Too many consecutive send failures; reconnect in progress
    Degraded,
}

/// Everything guarded by the command lock.
struct Session {
    port: Option<Box<dyn ModemPort>>,
    state: LinkState,
    consecutive_send_failures: u32,
}

/// The single owned connection to the cellular modem.
pub struct ModemLink {
    session: Mutex<Session>,
    opener: PortOpener,
    /// (path, baud) combinations in probe order, preferred first
    candidates: Vec<(String, u32)>,
    send_retries: RetryPolicy,
    probe_retries: RetryPolicy,
    probe_timeout: Duration,
    command_timeout: Duration,
    sms_prompt_timeout: Duration,
    sms_confirm_timeout: Duration,
    degraded_threshold: u32,
    network_backoff: Duration,
}

impl ModemLink {
    /// Build a link over real serial hardware.
    pub fn new(config: &ModemConfig) -> Self {
        Self::with_opener(config, Box::new(open_serial_port))
    }

    /// Build a link with a custom port factory (tests use scripted ports).
    pub fn with_opener(config: &ModemConfig, opener: PortOpener) -> Self {
        let mut candidates = vec![(config.serial_port.clone(), config.baud_rate)];
        for &path in CANDIDATE_PORTS {
            for &baud in CANDIDATE_BAUDS {
                if path == config.serial_port && baud == config.baud_rate {
                    continue;
                }
                candidates.push((path.to_string(), baud));
            }
        }
        ModemLink {
            session: Mutex::new(Session {
                port: None,
                state: LinkState::Disconnected,
                consecutive_send_failures: 0,
            }),
            opener,
            candidates,
            send_retries: RetryPolicy::new(config.max_send_retries, SEND_RETRY_PAUSE),
            probe_retries: RetryPolicy::new(2, Duration::from_millis(200)),
            probe_timeout: Duration::from_secs(1),
            command_timeout: Duration::from_secs(2),
            sms_prompt_timeout: Duration::from_secs(5),
            sms_confirm_timeout: Duration::from_secs(15),
            degraded_threshold: config.degraded_threshold,
            network_backoff: Duration::from_secs(config.network_backoff_s),
        }
    }

    fn lock_session(&self) -> MutexGuard<'_, Session> {
        // A poisoned lock just means another thread panicked mid-command;
        // the session data itself is still usable for teardown.
        self.session.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Current link state.
    pub fn state(&self) -> LinkState {
        self.lock_session().state
    }

    /// Find a responsive modem among the candidate port/baud combinations,
    /// preferred configuration first.
    ///
    /// Individual probe failures never raise; the return value reports
    /// overall success. On success exactly one port is left open and the
    /// link is `Connecting`, awaiting [`initialize`](Self::initialize).
    pub fn connect(&self) -> bool {
        let mut session = self.lock_session();
        self.connect_locked(&mut session)
    }

    /// Run the ordered setup sequence; promotes the link to `Ready`.
    ///
    /// A required step failing aborts immediately and returns false without
    /// touching later steps; optional step failures are logged and skipped.
    /// Never auto-reconnects: the caller decides what a failed init means.
    pub fn initialize(&self) -> bool {
        let mut session = self.lock_session();
        self.initialize_locked(&mut session)
    }

    /// Query network registration; home (1) and roaming (5) are ready.
    ///
    /// Callers should back off several seconds on a not-ready answer rather
    /// than busy-retrying; registration takes time after power-up.
    pub fn check_network(&self) -> bool {
        let mut session = self.lock_session();
        let Some(port) = session.port.as_mut() else {
            log::warn!("network check requested with no open connection");
            return false;
        };
        match exchange(port.as_mut(), "AT+CREG?", self.command_timeout) {
            Ok((raw, _)) => {
                let ready = at::registration_ready(&raw);
                if !ready {
                    log::info!("network not registered yet: {}", raw.trim());
                }
                ready
            }
            Err(e) => {
                log::warn!("network check I/O error: {}", e);
                false
            }
        }
    }

    /// Send one text message, retrying the whole sequence up to the
    /// configured budget.
    ///
    /// Holds the command lock for the duration. Overall failure is visible
    /// to the caller and counts toward the degraded threshold; crossing it
    /// tears the connection down and attempts one automatic reconnect.
    pub fn send_text(&self, destination: &str, body: &str) -> bool {
        let mut session = self.lock_session();
        if session.state != LinkState::Ready {
            log::warn!("send_text refused: link is {:?}", session.state);
            return false;
        }
        let outcome = {
            let Some(port) = session.port.as_mut() else {
                log::warn!("send_text refused: no open connection");
                return false;
            };
            self.send_retries.run("sms send", |attempt| {
                self.try_send(port.as_mut(), destination, body, attempt)
            })
        };

        match outcome {
            Some(()) => {
                session.consecutive_send_failures = 0;
                true
            }
            None => {
                session.consecutive_send_failures += 1;
                log::error!(
                    "SMS to {} failed after {} attempts ({} consecutive failed sends)",
                    destination,
                    self.send_retries.max_attempts,
                    session.consecutive_send_failures
                );
                if session.consecutive_send_failures >= self.degraded_threshold {
                    log::warn!("degraded threshold reached, tearing down connection");
                    session.state = LinkState::Degraded;
                    self.rebuild_locked(&mut session);
                }
                false
            }
        }
    }

    /// Tear down and rebuild the connection from scratch.
    pub fn reconnect(&self) -> bool {
        let mut session = self.lock_session();
        session.port = None;
        self.connect_locked(&mut session) && self.initialize_locked(&mut session)
    }

    /// Release the connection. Safe to call repeatedly; never raises.
    pub fn close(&self) {
        let mut session = self.lock_session();
        if session.port.take().is_some() {
            log::info!("modem connection closed");
        }
        session.state = LinkState::Disconnected;
    }

    // -- Private Implementation --

    fn connect_locked(&self, session: &mut Session) -> bool {
        session.state = LinkState::Connecting;
        session.port = None;
        for (path, baud) in &self.candidates {
            let mut port = match (self.opener)(path, *baud) {
                Ok(port) => port,
                Err(e) => {
                    log::debug!("cannot open {} at {} baud: {}", path, baud, e);
                    continue;
                }
            };
            let alive = self
                .probe_retries
                .run("liveness probe", |attempt| {
                    match exchange(port.as_mut(), at::LIVENESS_PROBE, self.probe_timeout) {
                        Ok((raw, _)) if at::is_affirmative(&raw) => Attempt::Done(()),
                        Ok((raw, _)) => {
                            log::debug!(
                                "{} at {} baud: probe attempt {} got {:?}",
                                path,
                                baud,
                                attempt,
                                raw.trim()
                            );
                            Attempt::Retry
                        }
                        Err(e) => {
                            log::debug!(
                                "{} at {} baud: probe attempt {} I/O error: {}",
                                path,
                                baud,
                                attempt,
                                e
                            );
                            Attempt::Retry
                        }
                    }
                })
                .is_some();
            if alive {
                log::info!("modem found on {} at {} baud", path, baud);
                session.port = Some(port);
                return true;
            }
            // Silent combination: the port drops here, nothing stays open
        }
        log::error!("no modem found on any candidate port/baud combination");
        session.state = LinkState::Disconnected;
        false
    }

    fn initialize_locked(&self, session: &mut Session) -> bool {
        let Some(port) = session.port.as_mut() else {
            log::warn!("initialize requested with no open connection");
            return false;
        };
        for step in at::INIT_SEQUENCE {
            match exchange(port.as_mut(), step.command, step.timeout) {
                Ok((raw, _)) if at::is_affirmative(&raw) => {
                    log::debug!("init step {} ({}) ok", step.label, step.command);
                }
                Ok((raw, verdict)) => {
                    if step.required {
                        log::error!(
                            "required init step {} ({}) failed with {:?}: {}",
                            step.label,
                            step.command,
                            verdict,
                            raw.trim()
                        );
                        return false;
                    }
                    log::warn!(
                        "optional init step {} failed with {:?} ({}), continuing",
                        step.label,
                        verdict,
                        raw.trim()
                    );
                }
                Err(e) => {
                    if step.required {
                        log::error!("required init step {} I/O error: {}", step.label, e);
                        return false;
                    }
                    log::warn!("optional init step {} I/O error: {}, continuing", step.label, e);
                }
            }
        }
        session.state = LinkState::Ready;
        session.consecutive_send_failures = 0;
        log::info!("modem initialized, link ready");
        true
    }

    /// One complete send attempt: network re-check, send command, prompt,
    /// body, terminator, confirmation. Partial sends are never resumed; a
    /// failed attempt retries the sequence from scratch.
    fn try_send(
        &self,
        port: &mut dyn ModemPort,
        destination: &str,
        body: &str,
        attempt: u32,
    ) -> Attempt<()> {
        // Registration can lapse between sends, so every attempt re-checks
        match exchange(port, "AT+CREG?", self.command_timeout) {
            Ok((raw, _)) if at::registration_ready(&raw) => {}
            Ok((raw, _)) => {
                log::warn!(
                    "send attempt {}: network not ready ({}), backing off {:?}",
                    attempt,
                    raw.trim(),
                    self.network_backoff
                );
                thread::sleep(self.network_backoff);
                return Attempt::Retry;
            }
            Err(e) => {
                log::warn!("send attempt {}: network check I/O error: {}", attempt, e);
                return Attempt::Retry;
            }
        }

        if let Err(e) = port.clear_input() {
            log::warn!("send attempt {}: cannot clear input: {}", attempt, e);
            return Attempt::Retry;
        }
        let command = format!("AT+CMGS=\"{}\"\r", destination);
        if let Err(e) = port.write_all(command.as_bytes()) {
            log::warn!("send attempt {}: write failed: {}", attempt, e);
            return Attempt::Retry;
        }

        // Wait for the '>' prompt before pushing the body
        let deadline = Instant::now() + self.sms_prompt_timeout;
        let mut seen = String::new();
        loop {
            match port.read_available() {
                Ok(chunk) => seen.push_str(&chunk),
                Err(e) => {
                    log::warn!("send attempt {}: read failed awaiting prompt: {}", attempt, e);
                    return Attempt::Retry;
                }
            }
            if seen.contains(at::SMS_PROMPT) {
                break;
            }
            if at::classify(&seen) == Verdict::Error {
                log::warn!(
                    "send attempt {}: error instead of prompt ({})",
                    attempt,
                    seen.trim()
                );
                return Attempt::Retry;
            }
            if Instant::now() >= deadline {
                log::warn!(
                    "send attempt {}: no prompt within {:?} ({})",
                    attempt,
                    self.sms_prompt_timeout,
                    seen.trim()
                );
                return Attempt::Retry;
            }
            thread::sleep(READ_POLL);
        }

        if let Err(e) = port.write_all(body.as_bytes()) {
            log::warn!("send attempt {}: body write failed: {}", attempt, e);
            return Attempt::Retry;
        }
        if let Err(e) = port.write_all(&[at::SMS_TERMINATOR]) {
            log::warn!("send attempt {}: terminator write failed: {}", attempt, e);
            return Attempt::Retry;
        }

        match collect_verdict(port, self.sms_confirm_timeout) {
            Ok((raw, _)) if raw.contains(at::SMS_SENT_MARKER) || at::is_affirmative(&raw) => {
                log::info!("SMS accepted by modem: {}", raw.trim());
                Attempt::Done(())
            }
            Ok((raw, verdict)) => {
                log::warn!(
                    "send attempt {}: {:?} confirmation ({})",
                    attempt,
                    verdict,
                    raw.trim()
                );
                Attempt::Retry
            }
            Err(e) => {
                log::warn!("send attempt {}: read failed awaiting confirmation: {}", attempt, e);
                Attempt::Retry
            }
        }
    }

    /// Teardown-and-reconnect after crossing the degraded threshold.
    fn rebuild_locked(&self, session: &mut Session) {
        session.port = None;
        if self.connect_locked(session) && self.initialize_locked(session) {
            log::info!("link recovered after degraded reconnect");
        } else {
            session.port = None;
            session.state = LinkState::Disconnected;
            log::error!("degraded reconnect failed; reporting suspended until next attempt");
        }
    }
}

impl Drop for ModemLink {
    fn drop(&mut self) {
        // The serial handle must be released on every exit path
        self.close();
    }
}

/// Write a command line and collect the classified reply.
fn exchange(
    port: &mut dyn ModemPort,
    command: &str,
    timeout: Duration,
) -> io::Result<(String, Verdict)> {
    port.clear_input()?;
    port.write_all(command.as_bytes())?;
    port.write_all(b"\r\n")?;
    collect_verdict(port, timeout)
}

/// Accumulate reply text until it classifies definitively or the deadline
/// passes (in which case the accumulated text is returned as ambiguous).
fn collect_verdict(port: &mut dyn ModemPort, timeout: Duration) -> io::Result<(String, Verdict)> {
    let deadline = Instant::now() + timeout;
    let mut raw = String::new();
    loop {
        raw.push_str(&port.read_available()?);
        match at::classify(&raw) {
            Verdict::Ambiguous if Instant::now() < deadline => thread::sleep(READ_POLL),
            verdict => return Ok((raw, verdict)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Scripted half-duplex port: each write that ends a command (carriage
    /// return or the SMS terminator) queues up the next scripted reply.
    struct MockPort {
        replies: VecDeque<String>,
        pending: Option<String>,
        written: Arc<Mutex<Vec<u8>>>,
        open_count: Arc<AtomicUsize>,
    }

    impl MockPort {
        fn new(
            replies: &[&str],
            written: Arc<Mutex<Vec<u8>>>,
            open_count: Arc<AtomicUsize>,
        ) -> Self {
            open_count.fetch_add(1, Ordering::SeqCst);
            MockPort {
                replies: replies.iter().map(|r| r.to_string()).collect(),
                pending: None,
                written,
                open_count,
            }
        }
    }

    impl Drop for MockPort {
        fn drop(&mut self) {
            self.open_count.fetch_sub(1, Ordering::SeqCst);
        }
    }

    impl ModemPort for MockPort {
        fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
            self.written.lock().unwrap().extend_from_slice(data);
            if data.contains(&b'\r') || data == [at::SMS_TERMINATOR] {
                self.pending = self.replies.pop_front();
            }
            Ok(())
        }

        fn read_available(&mut self) -> io::Result<String> {
            Ok(self.pending.take().unwrap_or_default())
        }

        fn clear_input(&mut self) -> io::Result<()> {
            self.pending = None;
            Ok(())
        }
    }

    /// Link with instant timeouts and no retry pauses.
    fn test_link(opener: PortOpener, candidates: Vec<(String, u32)>) -> ModemLink {
        let config = Config::default().modem;
        let mut link = ModemLink::with_opener(&config, opener);
        link.candidates = candidates;
        link.send_retries = RetryPolicy::new(3, Duration::ZERO);
        link.probe_retries = RetryPolicy::new(1, Duration::ZERO);
        link.probe_timeout = Duration::from_millis(10);
        link.command_timeout = Duration::from_millis(10);
        link.sms_prompt_timeout = Duration::from_millis(10);
        link.sms_confirm_timeout = Duration::from_millis(10);
        link.network_backoff = Duration::ZERO;
        link
    }

    /// Link with a scripted port already injected and marked Ready.
    fn ready_link(replies: &[&str]) -> (ModemLink, Arc<Mutex<Vec<u8>>>, Arc<AtomicUsize>) {
        let written = Arc::new(Mutex::new(Vec::new()));
        let open_count = Arc::new(AtomicUsize::new(0));
        let port = MockPort::new(replies, written.clone(), open_count.clone());
        let link = test_link(
            Box::new(|_, _| Err(io::Error::other("no port"))),
            Vec::new(),
        );
        {
            let mut session = link.lock_session();
            session.port = Some(Box::new(port));
            session.state = LinkState::Ready;
        }
        (link, written, open_count)
    }

    fn written_text(written: &Arc<Mutex<Vec<u8>>>) -> String {
        String::from_utf8_lossy(&written.lock().unwrap()).into_owned()
    }

    const CREG_HOME: &str = "\r\n+CREG: 0,1\r\n\r\nOK\r\n";
    const CREG_SEARCHING: &str = "\r\n+CREG: 0,2\r\n\r\nOK\r\n";

    #[test]
    fn connect_selects_only_responsive_combination() {
        let written = Arc::new(Mutex::new(Vec::new()));
        let open_count = Arc::new(AtomicUsize::new(0));
        let opener_written = written.clone();
        let opener_count = open_count.clone();
        let opener: PortOpener = Box::new(move |path, baud| {
            let replies: &[&str] = if path == "/dev/ttyB" && baud == 115200 {
                &["\r\nOK\r\n"]
            } else {
                &[]
            };
            Ok(Box::new(MockPort::new(
                replies,
                opener_written.clone(),
                opener_count.clone(),
            )))
        });
        let link = test_link(
            opener,
            vec![
                ("/dev/ttyA".to_string(), 9600),
                ("/dev/ttyA".to_string(), 115200),
                ("/dev/ttyB".to_string(), 9600),
                ("/dev/ttyB".to_string(), 115200),
            ],
        );

        assert!(link.connect());
        assert_eq!(link.state(), LinkState::Connecting);
        // Exactly the winning port is still open; silent ones were dropped
        assert_eq!(open_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn connect_exhausting_candidates_stays_disconnected() {
        let opener: PortOpener = Box::new(|_, _| Err(io::Error::other("no such device")));
        let link = test_link(opener, vec![("/dev/ttyA".to_string(), 9600)]);
        assert!(!link.connect());
        assert_eq!(link.state(), LinkState::Disconnected);
    }

    #[test]
    fn connect_accepts_weak_success_echo() {
        // Auto-bauding modem echoes "AT" without an OK yet
        let written = Arc::new(Mutex::new(Vec::new()));
        let open_count = Arc::new(AtomicUsize::new(0));
        let w = written.clone();
        let c = open_count.clone();
        let opener: PortOpener =
            Box::new(move |_, _| Ok(Box::new(MockPort::new(&["AT\r\n"], w.clone(), c.clone()))));
        let link = test_link(opener, vec![("/dev/serial0".to_string(), 115200)]);
        assert!(link.connect());
    }

    #[test]
    fn initialize_promotes_to_ready() {
        let (link, _written, _open) = ready_link(&["OK", "OK", "OK", "OK", "OK"]);
        link.lock_session().state = LinkState::Connecting;
        assert!(link.initialize());
        assert_eq!(link.state(), LinkState::Ready);
    }

    #[test]
    fn initialize_aborts_on_required_error_before_later_steps() {
        // ATE0 succeeds, AT+CMGF=1 errors: nothing after may be attempted
        let (link, written, _open) = ready_link(&["OK", "\r\nERROR\r\n", "OK", "OK", "OK"]);
        link.lock_session().state = LinkState::Connecting;
        assert!(!link.initialize());
        assert_ne!(link.state(), LinkState::Ready);

        let sent = written_text(&written);
        assert!(sent.contains("AT+CMGF=1"));
        assert!(!sent.contains("AT+CNMI"));
        assert!(!sent.contains("AT+CSCS"));
    }

    #[test]
    fn initialize_tolerates_optional_failures() {
        let (link, written, _open) =
            ready_link(&["OK", "OK", "\r\nERROR\r\n", "\r\nERROR\r\n", "OK"]);
        link.lock_session().state = LinkState::Connecting;
        assert!(link.initialize());
        assert_eq!(link.state(), LinkState::Ready);
        // Optional failures did not stop the sequence
        assert!(written_text(&written).contains("AT+CPMS"));
    }

    #[test]
    fn check_network_home_and_roaming() {
        let (link, _w, _o) = ready_link(&[CREG_HOME]);
        assert!(link.check_network());

        let (link, _w, _o) = ready_link(&["\r\n+CREG: 0,5\r\n\r\nOK\r\n"]);
        assert!(link.check_network());

        let (link, _w, _o) = ready_link(&[CREG_SEARCHING]);
        assert!(!link.check_network());
    }

    #[test]
    fn send_text_happy_path() {
        let (link, written, _open) = ready_link(&[
            CREG_HOME,
            "\r\n> ",
            "\r\n+CMGS: 12\r\n\r\nOK\r\n",
        ]);
        assert!(link.send_text("+306900000000", "Bike speed: 21.3 km/h"));

        let sent = written_text(&written);
        assert!(sent.contains("AT+CMGS=\"+306900000000\"\r"));
        assert!(sent.contains("Bike speed: 21.3 km/h\u{1a}"));
    }

    #[test]
    fn send_text_failure_below_threshold_keeps_port_open() {
        // Three attempts, each: CREG ok then ERROR instead of a prompt
        let (link, _written, open_count) = ready_link(&[
            CREG_HOME,
            "\r\nERROR\r\n",
            CREG_HOME,
            "\r\nERROR\r\n",
            CREG_HOME,
            "\r\nERROR\r\n",
        ]);
        assert!(!link.send_text("+306900000000", "hello"));

        // One failed operation is below the default threshold of 3:
        // the connection stays open and the link stays Ready
        assert_eq!(link.state(), LinkState::Ready);
        assert_eq!(open_count.load(Ordering::SeqCst), 1);
        assert!(link.lock_session().port.is_some());
    }

    #[test]
    fn send_text_network_not_ready_is_retried_then_fails() {
        let (link, written, _open) =
            ready_link(&[CREG_SEARCHING, CREG_SEARCHING, CREG_SEARCHING]);
        assert!(!link.send_text("+306900000000", "hello"));
        // Never got past the registration check
        assert!(!written_text(&written).contains("AT+CMGS"));
    }

    #[test]
    fn crossing_degraded_threshold_reconnects() {
        // Failing sends: each operation consumes CREG ok + ERROR, times 3
        // attempts, times 3 operations
        let mut replies = Vec::new();
        for _ in 0..9 {
            replies.push(CREG_HOME);
            replies.push("\r\nERROR\r\n");
        }
        let (mut link, _written, _open) = ready_link(&replies);

        // Reconnect opener hands out a healthy modem: probe + full init
        let recovered_count = Arc::new(AtomicUsize::new(0));
        let w = Arc::new(Mutex::new(Vec::new()));
        let c = recovered_count.clone();
        link.opener = Box::new(move |_, _| {
            Ok(Box::new(MockPort::new(
                &["OK", "OK", "OK", "OK", "OK", "OK"],
                w.clone(),
                c.clone(),
            )))
        });
        link.candidates = vec![("/dev/serial0".to_string(), 115200)];

        assert!(!link.send_text("+3069", "a"));
        assert!(!link.send_text("+3069", "b"));
        assert_eq!(link.state(), LinkState::Ready);

        // Third consecutive failure crosses the threshold and triggers the
        // automatic teardown-and-reconnect, which succeeds
        assert!(!link.send_text("+3069", "c"));
        assert_eq!(link.state(), LinkState::Ready);
        assert_eq!(link.lock_session().consecutive_send_failures, 0);
        assert_eq!(recovered_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn crossing_degraded_threshold_with_dead_modem_disconnects() {
        let mut replies = Vec::new();
        for _ in 0..9 {
            replies.push(CREG_HOME);
            replies.push("\r\nERROR\r\n");
        }
        let (link, _written, open_count) = ready_link(&replies);

        for _ in 0..3 {
            assert!(!link.send_text("+3069", "x"));
        }
        assert_eq!(link.state(), LinkState::Disconnected);
        assert!(link.lock_session().port.is_none());
        assert_eq!(open_count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn send_refused_when_disconnected() {
        let link = test_link(
            Box::new(|_, _| Err(io::Error::other("no port"))),
            Vec::new(),
        );
        assert!(!link.send_text("+3069", "hello"));
    }

    #[test]
    fn close_is_idempotent_and_releases_port() {
        let (link, _written, open_count) = ready_link(&[]);
        assert_eq!(open_count.load(Ordering::SeqCst), 1);
        link.close();
        assert_eq!(open_count.load(Ordering::SeqCst), 0);
        assert_eq!(link.state(), LinkState::Disconnected);
        link.close();
        assert_eq!(link.state(), LinkState::Disconnected);
    }
}
