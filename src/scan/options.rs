use std::time::Duration;

use crate::relay::{RelayAddress, RuleSet, TEST_MESSAGE_LINES};
use crate::targets::Targets;

use super::error::ConfigError;

/// Immutable configuration for one scan. Built once, validated with
/// [`ScanOptions::validate`], then shared by reference with every component.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub targets: Targets,
    pub rules: RuleSet,
    /// Maximum number of hosts probed at the same time.
    pub concurrency: usize,
    pub port: u16,
    pub connect_timeout: Duration,
    /// Deadline for each reply (banner, HELO, MAIL FROM, RCPT TO, DATA, RSET).
    pub read_timeout: Duration,
    /// Deadline for the reply following the DATA terminator.
    pub mail_timeout: Duration,
    pub resolve_hostnames: bool,
    /// Continue accepted relay attempts with `DATA` and a short test message.
    pub send_data: bool,
    pub message_subject: String,
    /// Mailbox substituted for the `{name}` / `{domain}` rule macros.
    pub relay_address: Option<RelayAddress>,
    /// Safety ceiling on the number of targets.
    pub max_targets: u64,
    /// Confirms scans above `max_targets` or over an unbounded range.
    pub allow_large_scan: bool,
    /// Extra attempts when the OS refuses to start a scan thread.
    pub spawn_retries: u32,
    pub spawn_backoff: Duration,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            targets: Targets::List(Vec::new()),
            rules: RuleSet::default(),
            concurrency: 32,
            port: 25,
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(30),
            mail_timeout: Duration::from_secs(60),
            resolve_hostnames: false,
            send_data: false,
            message_subject: "relayscan open relay test".to_string(),
            relay_address: None,
            max_targets: 65_536,
            allow_large_scan: false,
            spawn_retries: 5,
            spawn_backoff: Duration::from_millis(200),
        }
    }
}

impl ScanOptions {
    pub fn new(targets: Targets, rules: RuleSet) -> Self {
        Self {
            targets,
            rules,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        if self.port == 0 {
            return Err(ConfigError::ZeroPort);
        }
        for (name, value) in [
            ("connect", self.connect_timeout),
            ("read", self.read_timeout),
            ("mail", self.mail_timeout),
        ] {
            if value.is_zero() {
                return Err(ConfigError::ZeroTimeout { name });
            }
        }
        if self.rules.is_empty() {
            return Err(crate::relay::RuleError::Empty.into());
        }
        if self.relay_address.is_none() && self.rules.needs_relay_address() {
            return Err(ConfigError::MissingRelayAddress);
        }
        if !self.allow_large_scan {
            if self.targets.is_unbounded() {
                return Err(ConfigError::UnboundedRange);
            }
            let count = self.targets.count();
            if count > self.max_targets {
                return Err(ConfigError::RangeTooLarge {
                    count,
                    ceiling: self.max_targets,
                });
            }
        }
        if usize::try_from(self.targets.count()).is_err() {
            return Err(ConfigError::RangeTooLarge {
                count: self.targets.count(),
                ceiling: usize::MAX as u64,
            });
        }
        Ok(())
    }

    /// Upper bound on the time one host can take: connect, banner, every
    /// rule stage, and QUIT. Each command write is bounded by the socket
    /// write timeout (`read_timeout`), each reply by its own read deadline.
    pub fn host_deadline(&self) -> Duration {
        let io = self.read_timeout;
        // HELO, MAIL FROM, RCPT TO, RSET: one write and one reply each
        let mut per_rule = io * 8;
        if self.send_data {
            // DATA, body lines and the terminator are writes; two replies
            per_rule += io * (2 + TEST_MESSAGE_LINES) + io + self.mail_timeout;
        }
        let rules = u32::try_from(self.rules.len()).unwrap_or(u32::MAX);
        // banner read, then QUIT write and reply
        self.connect_timeout + io * 3 + per_rule.saturating_mul(rules)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::Rule;
    use crate::targets::AddressRange;

    fn options(targets: Targets) -> ScanOptions {
        let rules = RuleSet::new(vec![Rule::new("test", "a@test", "b@external.com")])
            .expect("valid rules");
        ScanOptions::new(targets, rules)
    }

    #[test]
    fn defaults_need_rules() {
        let err = ScanOptions::default().validate().expect_err("no rules");
        assert!(matches!(err, ConfigError::Rules(_)));
    }

    #[test]
    fn empty_target_list_is_valid() {
        assert!(options(Targets::List(Vec::new())).validate().is_ok());
    }

    #[test]
    fn zero_concurrency_rejected() {
        let mut opts = options(Targets::List(Vec::new()));
        opts.concurrency = 0;
        assert_eq!(opts.validate(), Err(ConfigError::ZeroConcurrency));
    }

    #[test]
    fn zero_timeout_rejected() {
        let mut opts = options(Targets::List(Vec::new()));
        opts.read_timeout = Duration::ZERO;
        assert_eq!(
            opts.validate(),
            Err(ConfigError::ZeroTimeout { name: "read" })
        );
    }

    #[test]
    fn unbounded_range_requires_opt_in() {
        let mut opts = options(AddressRange::unbounded().into());
        assert_eq!(opts.validate(), Err(ConfigError::UnboundedRange));
        opts.allow_large_scan = true;
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn ceiling_applies_to_large_ranges() {
        let range: AddressRange = "10.0-1.*.*".parse().expect("parses");
        let mut opts = options(range.into());
        assert_eq!(
            opts.validate(),
            Err(ConfigError::RangeTooLarge {
                count: 2 * 255 * 255,
                ceiling: 65_536
            })
        );
        opts.max_targets = 200_000;
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn host_deadline_accounts_for_rules_and_data() {
        let mut opts = options(Targets::List(Vec::new()));
        opts.connect_timeout = Duration::from_secs(1);
        opts.read_timeout = Duration::from_secs(2);
        opts.mail_timeout = Duration::from_secs(5);
        // connect + banner/QUIT + four command round trips
        assert_eq!(opts.host_deadline(), Duration::from_secs(1 + 6 + 16));
        opts.send_data = true;
        // + ten message writes, the DATA reply and the final reply
        assert_eq!(opts.host_deadline(), Duration::from_secs(1 + 6 + 16 + 20 + 2 + 5));
    }

    #[test]
    fn host_deadline_counts_write_timeouts() {
        let mut opts = options(Targets::List(Vec::new()));
        opts.read_timeout = Duration::from_secs(1);
        opts.send_data = true;
        let reads_only = opts.connect_timeout
            + opts.read_timeout * 2
            + (opts.read_timeout * 5 + opts.mail_timeout);
        let writes = opts.read_timeout * (5 + 2 + TEST_MESSAGE_LINES);
        assert_eq!(opts.host_deadline(), reads_only + writes);
    }

    #[test]
    fn relay_macros_require_relay_address() {
        let mut opts = ScanOptions::new(Targets::List(Vec::new()), RuleSet::standard_relay());
        assert_eq!(opts.validate(), Err(ConfigError::MissingRelayAddress));
        opts.relay_address = Some("alice@relay-check.example".parse().expect("address"));
        assert!(opts.validate().is_ok());
    }
}
