use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use relayscan::{AddressRange, RelayAddress, RuleSet, ScanOptions, Targets};

#[derive(Parser)]
#[command(name = "relayscan-cli", version, about = "Scan IPv4 ranges for open SMTP relays")]
pub struct Cli {
    /// range: a.b.c.d-e.f.g.h, or per-octet spans such as 10.0.0-3.*
    #[arg(long, conflicts_with = "targets_file", required_unless_present = "targets_file")]
    pub range: Option<String>,

    /// one IPv4 address per line, # comments allowed
    #[arg(long)]
    pub targets_file: Option<PathBuf>,

    /// rule file, one `helo|mail_from|rcpt_to` per line
    #[arg(long)]
    pub rules_file: Option<PathBuf>,

    /// foreign domain used by the built-in rules
    #[arg(long, default_value = "relay-test.invalid")]
    pub external_domain: String,

    /// mailbox you control (name@domain): fills {name}/{domain} in rules,
    /// built-in rules relay to it, implies --send-data
    #[arg(short = 'b', long)]
    pub relay_address: Option<String>,

    /// maximum number of hosts probed at once
    #[arg(long, default_value_t = 32)]
    pub threads: usize,

    /// TCP connect timeout (seconds)
    #[arg(long, default_value_t = 10)]
    pub connect_timeout: u64,

    /// per-reply timeout (seconds)
    #[arg(long, default_value_t = 30)]
    pub read_timeout: u64,

    /// timeout after the DATA terminator (seconds)
    #[arg(long, default_value_t = 60)]
    pub mail_timeout: u64,

    #[arg(long, default_value_t = 25)]
    pub port: u16,

    /// reverse-resolve every target before connecting
    #[arg(long)]
    pub resolve: bool,

    /// go through DATA and send a short test message on accepted relays
    #[arg(long)]
    pub send_data: bool,

    /// refuse larger scans unless --allow-large-scan is given
    #[arg(long, default_value_t = 65_536)]
    pub max_targets: u64,

    #[arg(long)]
    pub allow_large_scan: bool,

    /// format: human|json|ndjson|csv
    #[arg(long, default_value = "human")]
    pub format: String,

    /// write report to file (JSON/NDJSON/CSV per --format)
    #[arg(long)]
    pub out: Option<String>,

    /// only report hosts that relayed at least once
    #[arg(long)]
    pub vulnerable_only: bool,

    /// human format: print bare addresses, one per line, no summary
    #[arg(short = 'q', long)]
    pub ips_only: bool,

    /// -v for info, -vv for debug (RUST_LOG wins when set)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }

    pub fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "info",
            _ => "debug",
        }
    }

    pub fn targets(&self) -> Result<Targets> {
        if let Some(path) = &self.targets_file {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("read targets file {}", path.display()))?;
            return Targets::parse_list(&text)
                .with_context(|| format!("parse targets file {}", path.display()));
        }
        let range = self.range.as_deref().unwrap_or_default();
        let range: AddressRange = range
            .parse()
            .with_context(|| format!("invalid --range '{range}'"))?;
        Ok(range.into())
    }

    pub fn rules(&self) -> Result<RuleSet> {
        match &self.rules_file {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("read rules file {}", path.display()))?;
                RuleSet::parse(&text).with_context(|| format!("parse rules file {}", path.display()))
            }
            None if self.relay_address.is_some() => Ok(RuleSet::standard_relay()),
            None => Ok(RuleSet::standard(&self.external_domain)),
        }
    }

    pub fn relay_address(&self) -> Result<Option<RelayAddress>> {
        self.relay_address
            .as_deref()
            .map(|raw| {
                raw.parse::<RelayAddress>()
                    .with_context(|| format!("invalid --relay-address '{raw}'"))
            })
            .transpose()
    }

    pub fn scan_options(&self) -> Result<ScanOptions> {
        let mut options = ScanOptions::new(self.targets()?, self.rules()?);
        options.relay_address = self.relay_address()?;
        options.concurrency = self.threads;
        options.port = self.port;
        options.connect_timeout = Duration::from_secs(self.connect_timeout);
        options.read_timeout = Duration::from_secs(self.read_timeout);
        options.mail_timeout = Duration::from_secs(self.mail_timeout);
        options.resolve_hostnames = self.resolve;
        options.send_data = self.send_data || options.relay_address.is_some();
        options.max_targets = self.max_targets;
        options.allow_large_scan = self.allow_large_scan;
        options.validate().context("invalid scan configuration")?;
        Ok(options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relayscan::ConfigError;

    fn cli(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("relayscan-cli").chain(args.iter().copied()))
            .expect("arguments parse")
    }

    #[test]
    fn range_and_timeouts_reach_scan_options() {
        let cli = cli(&[
            "--range",
            "192.0.2.1-192.0.2.4",
            "--threads",
            "3",
            "--read-timeout",
            "7",
            "--port",
            "2525",
        ]);
        let options = cli.scan_options().expect("options");
        assert_eq!(options.targets.count(), 4);
        assert_eq!(options.concurrency, 3);
        assert_eq!(options.read_timeout, Duration::from_secs(7));
        assert_eq!(options.port, 2525);
        assert!(!options.send_data);
        assert!(options.relay_address.is_none());
        assert_eq!(options.rules, RuleSet::standard("relay-test.invalid"));
    }

    #[test]
    fn relay_address_selects_macro_rules_and_data() {
        let cli = cli(&["--range", "192.0.2.1", "-b", "alice@relay-check.example", "-q"]);
        assert!(cli.ips_only);
        let options = cli.scan_options().expect("options");
        assert!(options.send_data);
        assert_eq!(options.rules, RuleSet::standard_relay());
        let relay = options.relay_address.expect("relay address");
        assert_eq!(relay.name, "alice");
        assert_eq!(relay.domain, "relay-check.example");
    }

    #[test]
    fn bad_relay_address_is_refused() {
        let err = cli(&["--range", "192.0.2.1", "--relay-address", "nobody"])
            .scan_options()
            .expect_err("not name@domain");
        assert!(format!("{err:#}").contains("--relay-address"));
    }

    #[test]
    fn macro_rules_without_relay_address_fail_validation() {
        let path = std::env::temp_dir().join(format!("relayscan-rules-{}.txt", std::process::id()));
        std::fs::write(&path, "test||{name}@{domain}\n").expect("write rules");
        let cli = cli(&["--range", "192.0.2.1", "--rules-file", path.to_str().expect("utf8 path")]);
        let err = cli.scan_options().expect_err("macros need an address");
        std::fs::remove_file(&path).ok();
        assert_eq!(
            err.downcast_ref::<ConfigError>(),
            Some(&ConfigError::MissingRelayAddress)
        );
    }

    #[test]
    fn range_and_targets_file_conflict() {
        let parsed = Cli::try_parse_from([
            "relayscan-cli",
            "--range",
            "192.0.2.1",
            "--targets-file",
            "hosts.txt",
        ]);
        assert!(parsed.is_err());
    }
}
