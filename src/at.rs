//! # AT Response Classification
//!
//! Modem replies are free text: a command may come back as a clean `OK`, an
//! `ERROR` (or `+CMS ERROR: ...`), or firmware chatter that contains neither.
//! Every substring rule lives here, in one three-valued classifier, instead
//! of being inlined at each call site in the link code.
//!
//! The SIM7070G in particular echoes unexpected text while auto-bauding, so
//! an otherwise ambiguous reply that still carries the `AT` echo is treated
//! as a weak success by [`is_affirmative`]. That tolerance is what makes the
//! port/baud auto-detection work on a modem that has not settled yet.

use std::time::Duration;

/// Liveness probe sent to detect a responsive modem.
pub const LIVENESS_PROBE: &str = "AT";

/// Token whose presence upgrades an ambiguous reply to a weak success.
pub const LIVENESS_TOKEN: &str = "AT";

/// Marker for a definitive success reply.
pub const SUCCESS_MARKER: &str = "OK";

/// Marker for a definitive failure reply (also matches `+CMS ERROR`).
pub const ERROR_MARKER: &str = "ERROR";

/// Prompt character the modem prints when it is ready for an SMS body.
pub const SMS_PROMPT: char = '>';

/// Confirmation marker for a delivered SMS submit.
pub const SMS_SENT_MARKER: &str = "+CMGS";

/// Control byte terminating an SMS body (Ctrl-Z).
pub const SMS_TERMINATOR: u8 = 0x1A;

/// Three-valued outcome of classifying a raw modem reply.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    /// Reply contains the success marker
    Success,
    /// Reply contains an explicit error marker; hard failure, the command
    /// layer never retries these on its own
    Error,
    /// Neither marker present; soft failure unless the liveness token says
    /// otherwise
    Ambiguous,
}

/// Map raw response text to a [`Verdict`].
///
/// The error marker wins over the success marker: a reply like
/// `+CMS ERROR: 500\r\nOK` is a failure.
pub fn classify(response: &str) -> Verdict {
    if response.contains(ERROR_MARKER) {
        Verdict::Error
    } else if response.contains(SUCCESS_MARKER) {
        Verdict::Success
    } else {
        Verdict::Ambiguous
    }
}

/// True if the reply should be taken as a success, including the weak
/// success of an ambiguous reply that carries the liveness token.
pub fn is_affirmative(response: &str) -> bool {
    match classify(response) {
        Verdict::Success => true,
        Verdict::Error => false,
        Verdict::Ambiguous => response.contains(LIVENESS_TOKEN),
    }
}

/// Parse an `AT+CREG?` reply; registration status 1 (home) and 5 (roaming)
/// count as ready, everything else (searching, denied, unknown) does not.
pub fn registration_ready(response: &str) -> bool {
    let Some(idx) = response.find("+CREG:") else {
        return false;
    };
    let fields = response[idx + "+CREG:".len()..]
        .lines()
        .next()
        .unwrap_or("");
    matches!(fields.split(',').nth(1).map(str::trim), Some("1") | Some("5"))
}

/// One step of the modem setup sequence.
pub struct InitStep {
    /// Command text, without the trailing CR LF
    pub command: &'static str,
    /// Short name for log lines
    pub label: &'static str,
    /// Required steps abort initialization on failure; optional steps log
    /// and continue
    pub required: bool,
    /// How long to wait for this step's reply
    pub timeout: Duration,
}

/// Ordered setup sequence for the SIM7070G.
///
/// Order matters: echo-off and text mode must land before any send attempt.
/// The storage and character-set steps are nice-to-have and vary by
/// firmware, so their failure is tolerated.
pub const INIT_SEQUENCE: &[InitStep] = &[
    InitStep {
        command: "ATE0",
        label: "echo off",
        required: true,
        timeout: Duration::from_secs(2),
    },
    InitStep {
        command: "AT+CMGF=1",
        label: "text mode",
        required: true,
        timeout: Duration::from_secs(2),
    },
    InitStep {
        command: "AT+CNMI=0,0,0,0,0",
        label: "notifications off",
        required: false,
        timeout: Duration::from_secs(2),
    },
    InitStep {
        command: "AT+CSCS=\"GSM\"",
        label: "character set",
        required: false,
        timeout: Duration::from_secs(2),
    },
    InitStep {
        command: "AT+CPMS=\"ME\",\"ME\",\"ME\"",
        label: "message storage",
        required: false,
        timeout: Duration::from_secs(3),
    },
];
