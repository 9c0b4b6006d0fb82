use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use super::error::RuleError;

/// A relay-attempt template: the identity announced with `HELO` and the
/// envelope used for `MAIL FROM` / `RCPT TO`.
///
/// Fields may contain the placeholders `{ip}`, `{ip_literal}` and `{host}`,
/// replaced per target by [`Rule::expand`], and `{name}` / `{domain}`, the
/// two halves of the scan's [`RelayAddress`] (`--NAME--` and `--DOMAIN--`
/// are accepted too). An empty `mail_from` is sent as the null sender `<>`.
#[cfg_attr(feature = "with-serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub helo: String,
    pub mail_from: String,
    pub rcpt_to: String,
}

impl Rule {
    pub fn new(
        helo: impl Into<String>,
        mail_from: impl Into<String>,
        rcpt_to: impl Into<String>,
    ) -> Self {
        Self {
            helo: helo.into(),
            mail_from: mail_from.into(),
            rcpt_to: rcpt_to.into(),
        }
    }

    pub fn validate(&self) -> Result<(), RuleError> {
        for (field, value) in [
            ("helo", &self.helo),
            ("mail_from", &self.mail_from),
            ("rcpt_to", &self.rcpt_to),
        ] {
            if value.contains(['\r', '\n']) {
                return Err(RuleError::LineBreak { field });
            }
        }
        if self.helo.trim().is_empty() {
            return Err(RuleError::EmptyField { field: "helo" });
        }
        if self.rcpt_to.trim().is_empty() {
            return Err(RuleError::EmptyField { field: "rcpt_to" });
        }
        Ok(())
    }

    /// Whether any field refers to the relay address.
    pub fn uses_relay_address(&self) -> bool {
        [&self.helo, &self.mail_from, &self.rcpt_to]
            .iter()
            .any(|field| RELAY_MACROS.iter().any(|m| field.contains(m)))
    }

    pub fn expand(&self, vars: &TemplateVars<'_>) -> Rule {
        Rule {
            helo: vars.apply(&self.helo),
            mail_from: vars.apply(&self.mail_from),
            rcpt_to: vars.apply(&self.rcpt_to),
        }
    }

    pub(crate) fn helo_command(&self) -> String {
        format!("HELO {}", self.helo)
    }

    pub(crate) fn mail_from_command(&self) -> String {
        format!("MAIL FROM:<{}>", self.mail_from)
    }

    pub(crate) fn rcpt_to_command(&self) -> String {
        format!("RCPT TO:<{}>", self.rcpt_to)
    }
}

impl FromStr for Rule {
    type Err = RuleError;

    /// Parses `helo|mail_from|rcpt_to`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.split('|').map(str::trim).collect();
        let [helo, mail_from, rcpt_to] = fields.as_slice() else {
            return Err(RuleError::FieldCount {
                found: fields.len(),
            });
        };
        let rule = Rule::new(*helo, *mail_from, *rcpt_to);
        rule.validate()?;
        Ok(rule)
    }
}

const RELAY_MACROS: [&str; 4] = ["{name}", "{domain}", "--NAME--", "--DOMAIN--"];

/// Mailbox the relay attempts are addressed to, split at its last `@`.
#[cfg_attr(feature = "with-serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayAddress {
    pub name: String,
    pub domain: String,
}

impl FromStr for RelayAddress {
    type Err = RuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = || RuleError::RelayAddress {
            value: s.to_string(),
        };
        let (name, domain) = s.rsplit_once('@').ok_or_else(invalid)?;
        if name.is_empty()
            || domain.is_empty()
            || s.contains(|c: char| c.is_whitespace() || c == '<' || c == '>')
        {
            return Err(invalid());
        }
        Ok(Self {
            name: name.to_string(),
            domain: domain.to_string(),
        })
    }
}

impl fmt::Display for RelayAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.domain)
    }
}

/// Per-target values substituted into rule templates.
#[derive(Debug, Clone)]
pub struct TemplateVars<'a> {
    pub address: Ipv4Addr,
    pub hostname: Option<&'a str>,
    pub relay: Option<&'a RelayAddress>,
}

impl<'a> TemplateVars<'a> {
    pub fn new(address: Ipv4Addr, hostname: Option<&'a str>) -> Self {
        Self {
            address,
            hostname,
            relay: None,
        }
    }

    pub fn with_relay(mut self, relay: Option<&'a RelayAddress>) -> Self {
        self.relay = relay;
        self
    }

    fn apply(&self, template: &str) -> String {
        if !template.contains('{') && !template.contains("--") {
            return template.to_string();
        }
        let literal = format!("[{}]", self.address);
        let host = self.hostname.unwrap_or(literal.as_str());
        let mut out = template
            .replace("{ip_literal}", &literal)
            .replace("{ip}", &self.address.to_string())
            .replace("{host}", host);
        // left untouched without a relay address; validation refuses that
        if let Some(relay) = self.relay {
            out = out
                .replace("{name}", &relay.name)
                .replace("--NAME--", &relay.name)
                .replace("{domain}", &relay.domain)
                .replace("--DOMAIN--", &relay.domain);
        }
        out
    }
}

/// Ordered, read-only collection of rules shared by every scan task.
#[cfg_attr(feature = "with-serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    pub fn new(rules: Vec<Rule>) -> Result<Self, RuleError> {
        for (idx, rule) in rules.iter().enumerate() {
            rule.validate().map_err(|source| RuleError::at_line(idx + 1, source))?;
        }
        Ok(Self { rules })
    }

    /// Parses a rule file: one `helo|mail_from|rcpt_to` per line, `#` starts
    /// a comment line, blank lines are skipped.
    pub fn parse(text: &str) -> Result<Self, RuleError> {
        let mut rules = Vec::new();
        for (idx, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let rule = line
                .parse::<Rule>()
                .map_err(|source| RuleError::at_line(idx + 1, source))?;
            rules.push(rule);
        }
        if rules.is_empty() {
            return Err(RuleError::Empty);
        }
        Ok(Self { rules })
    }

    /// Classic relay attempts against `external_domain`, a domain the
    /// scanned hosts are not expected to serve.
    pub fn standard(external_domain: &str) -> Self {
        Self::standard_to("check", external_domain)
    }

    /// The built-in rules addressed to the scan's relay address, through the
    /// `{name}` and `{domain}` macros.
    pub fn standard_relay() -> Self {
        Self::standard_to("{name}", "{domain}")
    }

    fn standard_to(n: &str, d: &str) -> Self {
        let rules = vec![
            Rule::new("relaytest.invalid", format!("probe@{d}"), format!("{n}@{d}")),
            Rule::new("relaytest.invalid", "", format!("{n}@{d}")),
            Rule::new("{host}", "postmaster@{ip_literal}", format!("{n}@{d}")),
            Rule::new(
                "relaytest.invalid",
                format!("probe@{d}"),
                format!("{n}%{d}@{{ip_literal}}"),
            ),
            Rule::new(
                "relaytest.invalid",
                format!("probe@{d}"),
                format!("{d}!{n}@{{ip_literal}}"),
            ),
            Rule::new(
                "relaytest.invalid",
                format!("probe@{d}"),
                format!("\"{n}@{d}\"@{{ip_literal}}"),
            ),
        ];
        Self { rules }
    }

    pub fn needs_relay_address(&self) -> bool {
        self.rules.iter().any(Rule::uses_relay_address)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Rule> {
        self.rules.iter()
    }
}

impl<'a> IntoIterator for &'a RuleSet {
    type Item = &'a Rule;
    type IntoIter = std::slice::Iter<'a, Rule>;

    fn into_iter(self) -> Self::IntoIter {
        self.rules.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rule_file_skipping_comments() {
        let text = "# relay rules\n\ntest|a@test|b@external.com\n  mx.local | | x@external.com  \n";
        let set = RuleSet::parse(text).expect("rules parse");
        assert_eq!(set.len(), 2);
        let rules: Vec<&Rule> = set.iter().collect();
        assert_eq!(*rules[0], Rule::new("test", "a@test", "b@external.com"));
        assert_eq!(rules[1].mail_from, "");
        assert_eq!(rules[1].mail_from_command(), "MAIL FROM:<>");
    }

    #[test]
    fn reports_line_of_bad_rule() {
        let err = RuleSet::parse("a|b|c\nonly-two|fields\n").expect_err("should fail");
        match err {
            RuleError::Line { line, source } => {
                assert_eq!(line, 2);
                assert!(matches!(*source, RuleError::FieldCount { found: 2 }));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn empty_rule_file_is_rejected() {
        assert!(matches!(
            RuleSet::parse("# nothing here\n"),
            Err(RuleError::Empty)
        ));
    }

    #[test]
    fn line_breaks_are_refused() {
        let err = RuleSet::new(vec![Rule::new("x", "a@b\r\nDATA", "c@d")])
            .expect_err("injection refused");
        assert!(matches!(
            err,
            RuleError::Line { line: 1, ref source } if matches!(**source, RuleError::LineBreak { field: "mail_from" })
        ));
    }

    #[test]
    fn empty_recipient_is_refused() {
        assert!(matches!(
            "helo|a@b|".parse::<Rule>(),
            Err(RuleError::EmptyField { field: "rcpt_to" })
        ));
    }

    #[test]
    fn expands_placeholders() {
        let rule = Rule::new("{host}", "probe@{ip}", "check%example.net@{ip_literal}");
        let unresolved = rule.expand(&TemplateVars::new(Ipv4Addr::new(192, 0, 2, 1), None));
        assert_eq!(unresolved.helo, "[192.0.2.1]");
        assert_eq!(unresolved.mail_from, "probe@192.0.2.1");
        assert_eq!(unresolved.rcpt_to, "check%example.net@[192.0.2.1]");

        let resolved = rule.expand(&TemplateVars::new(
            Ipv4Addr::new(192, 0, 2, 1),
            Some("mx.example.org"),
        ));
        assert_eq!(resolved.helo, "mx.example.org");
    }

    #[test]
    fn relay_macros_expand_from_relay_address() {
        let relay: RelayAddress = "alice@relay-check.example".parse().expect("address");
        let rule = Rule::new("{host}", "--NAME--@{ip}", "{name}%{domain}@{ip_literal}");
        assert!(rule.uses_relay_address());

        let vars = TemplateVars::new(Ipv4Addr::new(192, 0, 2, 7), None).with_relay(Some(&relay));
        let expanded = rule.expand(&vars);
        assert_eq!(expanded.mail_from, "alice@192.0.2.7");
        assert_eq!(expanded.rcpt_to, "alice%relay-check.example@[192.0.2.7]");
        assert!(!expanded.uses_relay_address());

        let legacy = Rule::new("x", "", "--NAME--@--DOMAIN--").expand(&vars);
        assert_eq!(legacy.rcpt_to, "alice@relay-check.example");
    }

    #[test]
    fn relay_address_needs_both_halves() {
        let relay: RelayAddress = " first.last@mx.example.org ".parse().expect("address");
        assert_eq!(relay.name, "first.last");
        assert_eq!(relay.domain, "mx.example.org");
        assert_eq!(relay.to_string(), "first.last@mx.example.org");
        for bad in ["nobody", "@example.org", "alice@", "a b@example.org", "<a@b>"] {
            assert!(
                matches!(bad.parse::<RelayAddress>(), Err(RuleError::RelayAddress { .. })),
                "{bad} should be refused"
            );
        }
    }

    #[test]
    fn standard_relay_set_uses_macros() {
        let set = RuleSet::standard_relay();
        assert!(set.needs_relay_address());
        assert!(!RuleSet::standard("external.com").needs_relay_address());
        assert!(set.iter().all(|rule| rule.validate().is_ok()));
    }

    #[test]
    fn standard_set_targets_external_domain() {
        let set = RuleSet::standard("external.com");
        assert!(!set.is_empty());
        assert!(set.iter().all(|rule| rule.validate().is_ok()));
        assert!(set.iter().all(|rule| rule.rcpt_to.contains("external.com")));
    }
}
