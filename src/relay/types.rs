use std::fmt;
use std::net::Ipv4Addr;

use super::rules::Rule;

/// Conversation stages, in the order the state machine visits them.
#[cfg_attr(feature = "with-serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Resolve,
    Connect,
    Banner,
    Helo,
    MailFrom,
    RcptTo,
    DataStart,
    DataEnd,
    Rset,
    Quit,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Resolve => "resolve",
            Self::Connect => "connect",
            Self::Banner => "banner",
            Self::Helo => "HELO",
            Self::MailFrom => "MAIL FROM",
            Self::RcptTo => "RCPT TO",
            Self::DataStart => "DATA",
            Self::DataEnd => "DATA end",
            Self::Rset => "RSET",
            Self::Quit => "QUIT",
        })
    }
}

/// A raw SMTP reply, preserving the numeric status code and message text.
/// Multi-line replies are joined with `\n`.
#[cfg_attr(feature = "with-serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpReply {
    pub code: u16,
    pub message: String,
}

impl SmtpReply {
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn is_positive_completion(&self) -> bool {
        (200..300).contains(&self.code)
    }

    pub fn is_positive_intermediate(&self) -> bool {
        (300..400).contains(&self.code)
    }

    pub fn is_transient_failure(&self) -> bool {
        (400..500).contains(&self.code)
    }
}

impl fmt::Display for SmtpReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.code)
        } else {
            write!(f, "{} {}", self.code, self.message.replace('\n', " / "))
        }
    }
}

/// Result of one relay attempt.
///
/// The polarity is inverted with respect to a usual health check:
/// `Passed` means the server **accepted** mail for a foreign domain and is
/// therefore a vulnerable open relay; `Failed` means the attempt was refused,
/// which is the secure behaviour.
#[cfg_attr(feature = "with-serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Relay accepted: the host is VULNERABLE.
    Passed,
    /// Relay refused (or not reached): the host behaved securely for this rule.
    Failed,
}

impl RelayOutcome {
    pub fn is_vulnerable(&self) -> bool {
        matches!(self, Self::Passed)
    }
}

impl fmt::Display for RelayOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Passed => f.write_str("passed (open relay)"),
            Self::Failed => f.write_str("failed (relay refused)"),
        }
    }
}

#[cfg_attr(feature = "with-serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The server answered with an unexpected status class.
    Rejected,
    /// The connection broke: reset, EOF, timeout or unparsable reply.
    Io,
    /// A scan-wide cancellation arrived before the stage's command was sent.
    Cancelled,
}

/// Why a rule stopped before (or after) reaching its verdict.
#[cfg_attr(feature = "with-serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageFailure {
    pub stage: Stage,
    pub kind: FailureKind,
    pub code: Option<u16>,
    pub message: String,
}

impl StageFailure {
    pub(crate) fn rejected(stage: Stage, reply: &SmtpReply) -> Self {
        Self {
            stage,
            kind: FailureKind::Rejected,
            code: Some(reply.code),
            message: reply.message.clone(),
        }
    }

    pub(crate) fn io(stage: Stage, err: &std::io::Error) -> Self {
        Self {
            stage,
            kind: FailureKind::Io,
            code: None,
            message: err.to_string(),
        }
    }

    pub(crate) fn cancelled(stage: Stage) -> Self {
        Self {
            stage,
            kind: FailureKind::Cancelled,
            code: None,
            message: "scan cancelled".to_string(),
        }
    }
}

impl fmt::Display for StageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.kind, self.code) {
            (FailureKind::Rejected, Some(code)) => {
                write!(f, "{} rejected with {code}", self.stage)
            }
            (FailureKind::Cancelled, _) => write!(f, "{} cancelled", self.stage),
            _ => write!(f, "{} failed: {}", self.stage, self.message),
        }
    }
}

/// Outcome of one rule against one host, with the request lines that were
/// sent and every reply received along the way.
#[cfg_attr(feature = "with-serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub rule_index: usize,
    /// The rule after template expansion for this host.
    pub rule: Rule,
    pub outcome: RelayOutcome,
    pub failure: Option<StageFailure>,
    pub helo_request: Option<String>,
    pub mail_from_request: Option<String>,
    pub rcpt_to_request: Option<String>,
    pub banner: Option<SmtpReply>,
    pub helo: Option<SmtpReply>,
    pub mail_from: Option<SmtpReply>,
    pub rcpt_to: Option<SmtpReply>,
    pub data_start: Option<SmtpReply>,
    pub data_end: Option<SmtpReply>,
    pub rset: Option<SmtpReply>,
}

impl CheckResult {
    pub fn new(rule_index: usize, rule: Rule, banner: Option<SmtpReply>) -> Self {
        Self {
            rule_index,
            rule,
            outcome: RelayOutcome::Failed,
            failure: None,
            helo_request: None,
            mail_from_request: None,
            rcpt_to_request: None,
            banner,
            helo: None,
            mail_from: None,
            rcpt_to: None,
            data_start: None,
            data_end: None,
            rset: None,
        }
    }

    pub fn passed(&self) -> bool {
        self.outcome.is_vulnerable()
    }

    /// SMTP code of the deciding failure, `0` when none was recorded or the
    /// failure carried no code (I/O errors).
    pub fn error_code(&self) -> u16 {
        self.failure.as_ref().and_then(|f| f.code).unwrap_or(0)
    }

    /// The rule was refused with a 4xx reply (greylisting, rate limits):
    /// the host may still relay on a later attempt.
    pub fn is_temporary_refusal(&self) -> bool {
        self.failure
            .as_ref()
            .filter(|failure| failure.kind == FailureKind::Rejected)
            .and_then(|failure| self.reply(failure.stage))
            .is_some_and(SmtpReply::is_transient_failure)
    }

    /// The reply recorded for `stage`, if that stage ran.
    pub fn reply(&self, stage: Stage) -> Option<&SmtpReply> {
        match stage {
            Stage::Banner => self.banner.as_ref(),
            Stage::Helo => self.helo.as_ref(),
            Stage::MailFrom => self.mail_from.as_ref(),
            Stage::RcptTo => self.rcpt_to.as_ref(),
            Stage::DataStart => self.data_start.as_ref(),
            Stage::DataEnd => self.data_end.as_ref(),
            Stage::Rset => self.rset.as_ref(),
            Stage::Resolve | Stage::Connect | Stage::Quit => None,
        }
    }

    pub(crate) fn record(&mut self, stage: Stage, reply: SmtpReply) {
        let slot = match stage {
            Stage::Banner => &mut self.banner,
            Stage::Helo => &mut self.helo,
            Stage::MailFrom => &mut self.mail_from,
            Stage::RcptTo => &mut self.rcpt_to,
            Stage::DataStart => &mut self.data_start,
            Stage::DataEnd => &mut self.data_end,
            Stage::Rset => &mut self.rset,
            Stage::Resolve | Stage::Connect | Stage::Quit => return,
        };
        *slot = Some(reply);
    }
}

/// Per-target scan state and accumulated results.
#[cfg_attr(feature = "with-serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostRecord {
    pub index: usize,
    pub address: Ipv4Addr,
    pub hostname: Option<String>,
    pub resolved: bool,
    pub smtp_open: bool,
    /// The conversation was aborted by an unrecoverable I/O failure.
    pub fatal: bool,
    /// The scan task for this host failed or never reported back.
    pub fatal_error: bool,
    pub cancelled: bool,
    /// Set once the host's scan task has run to completion.
    pub visited: bool,
    pub error: Option<String>,
    pub banner: Option<SmtpReply>,
    pub checks: Vec<CheckResult>,
    /// Reply to the closing `QUIT`, when one was sent and answered.
    pub quit: Option<SmtpReply>,
}

impl HostRecord {
    pub fn new(index: usize, address: Ipv4Addr) -> Self {
        Self {
            index,
            address,
            hostname: None,
            resolved: false,
            smtp_open: false,
            fatal: false,
            fatal_error: false,
            cancelled: false,
            visited: false,
            error: None,
            banner: None,
            checks: Vec::new(),
            quit: None,
        }
    }

    pub fn is_vulnerable(&self) -> bool {
        self.checks.iter().any(CheckResult::passed)
    }

    pub fn passed_checks(&self) -> impl Iterator<Item = &CheckResult> {
        self.checks.iter().filter(|check| check.passed())
    }
}
