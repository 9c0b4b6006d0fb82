use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::scan::{CancelToken, Probe, ScanOptions};

use super::resolver::{ReverseLookup, SystemResolver, system_resolver};
use super::rules::{Rule, TemplateVars};
use super::session::{Connect, SmtpTransport, TcpConnector};
use super::types::{CheckResult, HostRecord, RelayOutcome, SmtpReply, Stage, StageFailure};

/// Body lines written by [`test_message`], terminator excluded.
pub(crate) const TEST_MESSAGE_LINES: u32 = 8;

/// Relay check state machine for one host at a time:
/// resolve, connect, banner, every rule (HELO, MAIL FROM, RCPT TO, optional
/// DATA, RSET), QUIT.
pub struct RelayProbe<C = TcpConnector, R = SystemResolver> {
    options: Arc<ScanOptions>,
    connector: C,
    resolver: Option<R>,
}

impl RelayProbe<TcpConnector, SystemResolver> {
    /// Plaintext TCP checks. The system resolver is only built when hostname
    /// resolution is enabled and is shared by every scan thread; if it fails
    /// to build every host stays unresolved.
    pub fn from_options(options: Arc<ScanOptions>) -> Self {
        let resolver = if options.resolve_hostnames {
            match system_resolver() {
                Ok(resolver) => Some(resolver),
                Err(err) => {
                    warn!(error = %err, "reverse DNS disabled");
                    None
                }
            }
        } else {
            None
        };
        Self {
            options,
            connector: TcpConnector,
            resolver,
        }
    }
}

impl<C: Connect, R: ReverseLookup> RelayProbe<C, R> {
    pub fn new(options: Arc<ScanOptions>, connector: C, resolver: Option<R>) -> Self {
        Self {
            options,
            connector,
            resolver,
        }
    }

    pub fn options(&self) -> &ScanOptions {
        &self.options
    }

    pub fn check_host(&self, index: usize, address: Ipv4Addr, cancel: &CancelToken) -> HostRecord {
        let mut host = HostRecord::new(index, address);
        if cancel.is_cancelled() {
            host.cancelled = true;
            return host;
        }

        if self.options.resolve_hostnames {
            self.resolve(&mut host);
        }

        let addr = SocketAddr::from((address, self.options.port));
        let transport = match self.connector.connect(
            addr,
            self.options.connect_timeout,
            self.options.read_timeout,
        ) {
            Ok(transport) => transport,
            Err(err) => {
                debug!(%address, error = %err, "smtp port unreachable");
                host.error = Some(format!("{}: {err}", Stage::Connect));
                return host;
            }
        };
        host.smtp_open = true;

        let mut conversation = Conversation {
            transport,
            options: &self.options,
            cancel,
        };

        if cancel.is_cancelled() {
            close_on_interrupt(&mut host, &mut conversation, Interrupt::Cancelled(Stage::Banner));
            return host;
        }
        match conversation.read(Stage::Banner, self.options.read_timeout) {
            Ok(reply) => {
                if !reply.is_positive_completion() {
                    debug!(%address, code = reply.code, "unwelcoming banner");
                }
                host.banner = Some(reply);
            }
            Err(interrupt) => {
                close_on_interrupt(&mut host, &mut conversation, interrupt);
                return host;
            }
        }

        let vars = TemplateVars::new(address, host.hostname.as_deref())
            .with_relay(self.options.relay_address.as_ref());
        let rules: Vec<Rule> = self.options.rules.iter().map(|r| r.expand(&vars)).collect();
        for (rule_index, rule) in rules.into_iter().enumerate() {
            if cancel.is_cancelled() {
                close_on_interrupt(&mut host, &mut conversation, Interrupt::Cancelled(Stage::Helo));
                return host;
            }
            let mut check = CheckResult::new(rule_index, rule, host.banner.clone());
            let result = conversation.run_rule(&mut check, address);
            host.checks.push(check);
            if let Err(interrupt) = result {
                if let Some(last) = host.checks.last_mut() {
                    last.failure.get_or_insert_with(|| interrupt.to_failure());
                }
                close_on_interrupt(&mut host, &mut conversation, interrupt);
                return host;
            }
        }

        host.quit = conversation.quit();
        if host.is_vulnerable() {
            info!(%address, passed = host.passed_checks().count(), "open relay found");
        } else {
            debug!(%address, checks = host.checks.len(), "relay refused");
        }
        host
    }

    fn resolve(&self, host: &mut HostRecord) {
        let Some(resolver) = &self.resolver else {
            return;
        };
        match resolver.reverse(host.address) {
            Ok(Some(name)) => {
                host.hostname = Some(name);
                host.resolved = true;
            }
            Ok(None) => debug!(address = %host.address, "no PTR record"),
            Err(err) => debug!(address = %host.address, error = %err, "reverse lookup failed"),
        }
    }
}

impl<C, R> Probe for RelayProbe<C, R>
where
    C: Connect,
    R: ReverseLookup,
{
    fn probe(&self, index: usize, address: Ipv4Addr, cancel: &CancelToken) -> HostRecord {
        self.check_host(index, address, cancel)
    }
}

/// Why a conversation stopped before QUIT.
#[derive(Debug)]
enum Interrupt {
    /// The scan was cancelled before the stage could send anything.
    Cancelled(Stage),
    /// The connection is no longer usable.
    Broken(StageFailure),
}

impl Interrupt {
    fn to_failure(&self) -> StageFailure {
        match self {
            Self::Cancelled(stage) => StageFailure::cancelled(*stage),
            Self::Broken(failure) => failure.clone(),
        }
    }
}

fn close_on_interrupt<T: SmtpTransport>(
    host: &mut HostRecord,
    conversation: &mut Conversation<'_, T>,
    interrupt: Interrupt,
) {
    match interrupt {
        // Before the banner the server owes a reply, inside DATA it reads
        // QUIT as message text: drop the connection instead.
        Interrupt::Cancelled(Stage::Banner | Stage::DataEnd) => {
            debug!(address = %host.address, "cancelled mid-exchange, closing without QUIT");
            host.cancelled = true;
        }
        Interrupt::Cancelled(_) => {
            host.cancelled = true;
            host.quit = conversation.quit();
        }
        Interrupt::Broken(failure) => {
            // the stream may be mid-reply; no QUIT
            warn!(address = %host.address, %failure, "conversation aborted");
            host.fatal = true;
            host.error = Some(failure.to_string());
        }
    }
}

struct Conversation<'a, T> {
    transport: T,
    options: &'a ScanOptions,
    cancel: &'a CancelToken,
}

impl<T: SmtpTransport> Conversation<'_, T> {
    /// Reads the reply owed for the last command. Cancellation is only
    /// honoured before sending, so the stream stays at a command boundary.
    fn read(&mut self, stage: Stage, timeout: Duration) -> Result<SmtpReply, Interrupt> {
        let reply = self
            .transport
            .read_reply(timeout)
            .map_err(|err| Interrupt::Broken(StageFailure::io(stage, &err)))?;
        debug!(%stage, code = reply.code, "reply");
        Ok(reply)
    }

    fn send(&mut self, stage: Stage, line: &str) -> Result<(), Interrupt> {
        if self.cancel.is_cancelled() {
            return Err(Interrupt::Cancelled(stage));
        }
        self.transport
            .send_line(line)
            .map_err(|err| Interrupt::Broken(StageFailure::io(stage, &err)))
    }

    /// Sends `command`, records the reply on `check`, returns it.
    fn step(
        &mut self,
        check: &mut CheckResult,
        stage: Stage,
        command: &str,
        timeout: Duration,
    ) -> Result<SmtpReply, Interrupt> {
        debug!(%stage, command, "send");
        self.send(stage, command)?;
        let reply = self.read(stage, timeout)?;
        check.record(stage, reply.clone());
        Ok(reply)
    }

    /// Runs one rule. `Err` means the connection is no longer usable.
    fn run_rule(&mut self, check: &mut CheckResult, address: Ipv4Addr) -> Result<(), Interrupt> {
        let read_timeout = self.options.read_timeout;

        let helo = check.rule.helo_command();
        check.helo_request = Some(helo.clone());
        let reply = self.step(check, Stage::Helo, &helo, read_timeout)?;
        if !reply.is_positive_completion() {
            return self.reject(check, Stage::Helo, &reply);
        }

        let mail_from = check.rule.mail_from_command();
        check.mail_from_request = Some(mail_from.clone());
        let reply = self.step(check, Stage::MailFrom, &mail_from, read_timeout)?;
        if !reply.is_positive_completion() {
            return self.reject(check, Stage::MailFrom, &reply);
        }

        let rcpt_to = check.rule.rcpt_to_command();
        check.rcpt_to_request = Some(rcpt_to.clone());
        let reply = self.step(check, Stage::RcptTo, &rcpt_to, read_timeout)?;
        if !reply.is_positive_completion() {
            return self.reject(check, Stage::RcptTo, &reply);
        }

        if self.options.send_data {
            let reply = self.step(check, Stage::DataStart, "DATA", read_timeout)?;
            if !reply.is_positive_intermediate() {
                return self.reject(check, Stage::DataStart, &reply);
            }
            for line in test_message(self.options, check, address) {
                self.send(Stage::DataEnd, &line)?;
            }
            let reply = self.step(check, Stage::DataEnd, ".", self.options.mail_timeout)?;
            if !reply.is_positive_completion() {
                return self.reject(check, Stage::DataEnd, &reply);
            }
        }

        check.outcome = RelayOutcome::Passed;
        self.reset(check)
    }

    fn reject(
        &mut self,
        check: &mut CheckResult,
        stage: Stage,
        reply: &SmtpReply,
    ) -> Result<(), Interrupt> {
        check.failure = Some(StageFailure::rejected(stage, reply));
        self.reset(check)
    }

    fn reset(&mut self, check: &mut CheckResult) -> Result<(), Interrupt> {
        self.step(check, Stage::Rset, "RSET", self.options.read_timeout)
            .map(drop)
    }

    /// Best-effort `QUIT`, returning the server's reply if one came back.
    /// The connection is dropped either way.
    fn quit(&mut self) -> Option<SmtpReply> {
        self.transport.send_line("QUIT").ok()?;
        let reply = self.transport.read_reply(self.options.read_timeout).ok()?;
        debug!(stage = %Stage::Quit, code = reply.code, "reply");
        Some(reply)
    }
}

/// Message body lines for the DATA stage, dot-stuffed, without the
/// terminating `.`.
fn test_message(options: &ScanOptions, check: &CheckResult, address: Ipv4Addr) -> Vec<String> {
    let rule = &check.rule;
    let from = if rule.mail_from.is_empty() {
        "<>".to_string()
    } else {
        format!("<{}>", rule.mail_from)
    };
    let lines = vec![
        format!("From: {from}"),
        format!("To: <{}>", rule.rcpt_to),
        format!(
            "Subject: {} {address} rule {}",
            options.message_subject, check.rule_index
        ),
        format!("X-Relayscan-Target: {address}"),
        format!("X-Relayscan-Rule: {}", check.rule_index),
        String::new(),
        format!(
            "This message was relayed by {address} while testing rule {}.",
            check.rule_index
        ),
        "If you received it, that host is an open relay.".to_string(),
    ];
    lines
        .into_iter()
        .map(|line| {
            if line.starts_with('.') {
                format!(".{line}")
            } else {
                line
            }
        })
        .collect()
}
