#[cfg(any(feature = "with-serde", feature = "with-csv"))]
use anyhow::Context;
use std::io::Write;

use anyhow::{Result, bail};

use crate::args::Cli;
use relayscan::{HostRecord, ScanReport};

/// Hosts selected for reporting, in scan order.
pub fn select_rows<'a>(report: &'a ScanReport, cli: &Cli) -> Vec<&'a HostRecord> {
    report
        .hosts
        .iter()
        .filter(|host| !cli.vulnerable_only || host.is_vulnerable())
        .collect()
}

pub fn write_reports(rows: &[&HostRecord], report: &ScanReport, cli: &Cli) -> Result<()> {
    match cli.format.as_str() {
        "human" => write_human(rows, report, cli),
        "json" => write_json(rows, cli),
        "ndjson" => write_ndjson(rows, cli),
        "csv" => write_csv(rows, cli),
        other => bail!("unknown --format '{other}', use: human|json|ndjson|csv"),
    }
}

fn write_human(rows: &[&HostRecord], report: &ScanReport, cli: &Cli) -> Result<()> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    render_human(&mut out, rows, report, cli.ips_only)?;
    out.flush()?;
    Ok(())
}

fn render_human(
    out: &mut impl Write,
    rows: &[&HostRecord],
    report: &ScanReport,
    ips_only: bool,
) -> std::io::Result<()> {
    if ips_only {
        for host in rows {
            writeln!(out, "{}", host.address)?;
        }
        return Ok(());
    }

    for host in rows {
        let name = host
            .hostname
            .as_deref()
            .map(|name| format!(" ({name})"))
            .unwrap_or_default();
        let passed = host.passed_checks().count();
        if host.is_vulnerable() {
            writeln!(
                out,
                "[RELAY]   {}{name} :: {passed}/{} rule(s) relayed",
                host.address,
                host.checks.len()
            )?;
        } else if host.fatal || host.fatal_error {
            writeln!(
                out,
                "[FATAL]   {}{name} :: {}",
                host.address,
                host.error.as_deref().unwrap_or("unknown error")
            )?;
        } else if host.cancelled {
            writeln!(out, "[SKIPPED] {}{name}", host.address)?;
        } else if !host.smtp_open {
            writeln!(
                out,
                "[CLOSED]  {}{name} :: {}",
                host.address,
                host.error.as_deref().unwrap_or("no answer")
            )?;
        } else {
            let temporary = host
                .checks
                .iter()
                .filter(|check| check.is_temporary_refusal())
                .count();
            let retry = if temporary > 0 {
                format!(", {temporary} temporarily (retry later)")
            } else {
                String::new()
            };
            writeln!(
                out,
                "[SECURE]  {}{name} :: {} rule(s) refused{retry}",
                host.address,
                host.checks.len()
            )?;
        }

        for check in host.passed_checks() {
            writeln!(
                out,
                "          rule {}: HELO {} / MAIL FROM:<{}> / RCPT TO:<{}>",
                check.rule_index, check.rule.helo, check.rule.mail_from, check.rule.rcpt_to
            )?;
        }
    }
    writeln!(out, "{}", report.summary())?;
    if report.cancelled {
        writeln!(out, "scan interrupted before every host was checked")?;
    }
    Ok(())
}

#[cfg(feature = "with-serde")]
fn write_json(rows: &[&HostRecord], cli: &Cli) -> Result<()> {
    let s = serde_json::to_string_pretty(rows)?;
    if let Some(path) = &cli.out {
        write_all_atomically(path, s.as_bytes())?;
    } else {
        println!("{s}");
    }
    Ok(())
}

#[cfg(not(feature = "with-serde"))]
fn write_json(_: &[&HostRecord], _: &Cli) -> Result<()> {
    bail!("format=json requires the 'with-serde' feature")
}

#[cfg(feature = "with-serde")]
fn write_ndjson(rows: &[&HostRecord], cli: &Cli) -> Result<()> {
    if let Some(path) = &cli.out {
        let mut buf = Vec::new();
        for row in rows {
            let line = serde_json::to_string(row)?;
            buf.extend_from_slice(line.as_bytes());
            buf.push(b'\n');
        }
        write_all_atomically(path, &buf)?;
    } else {
        for row in rows {
            println!("{}", serde_json::to_string(row)?);
        }
    }
    Ok(())
}

#[cfg(not(feature = "with-serde"))]
fn write_ndjson(_: &[&HostRecord], _: &Cli) -> Result<()> {
    bail!("format=ndjson requires the 'with-serde' feature")
}

#[cfg(feature = "with-csv")]
const CSV_HEADER: [&str; 10] = [
    "address",
    "hostname",
    "smtp_open",
    "vulnerable",
    "passed",
    "checks",
    "fatal",
    "cancelled",
    "banner_code",
    "error",
];

#[cfg(feature = "with-csv")]
fn write_csv(rows: &[&HostRecord], cli: &Cli) -> Result<()> {
    if let Some(path) = &cli.out {
        let mut wtr = csv::Writer::from_writer(Vec::new());
        wtr.write_record(CSV_HEADER)?;
        for row in rows {
            wtr.write_record(csv_record(row))?;
        }
        let data = wtr.into_inner()?;
        write_all_atomically(path, &data)?;
    } else {
        let mut wtr = csv::Writer::from_writer(std::io::stdout());
        wtr.write_record(CSV_HEADER)?;
        for row in rows {
            wtr.write_record(csv_record(row))?;
        }
        wtr.flush()?;
    }
    Ok(())
}

#[cfg(not(feature = "with-csv"))]
fn write_csv(_: &[&HostRecord], _: &Cli) -> Result<()> {
    bail!("format=csv requires the 'with-csv' feature")
}

#[cfg(feature = "with-csv")]
fn csv_record(host: &HostRecord) -> Vec<String> {
    vec![
        host.address.to_string(),
        host.hostname.clone().unwrap_or_default(),
        host.smtp_open.to_string(),
        host.is_vulnerable().to_string(),
        host.passed_checks().count().to_string(),
        host.checks.len().to_string(),
        (host.fatal || host.fatal_error).to_string(),
        host.cancelled.to_string(),
        host.banner
            .as_ref()
            .map(|reply| reply.code.to_string())
            .unwrap_or_default(),
        host.error.clone().unwrap_or_default(),
    ]
}

#[cfg(any(feature = "with-serde", feature = "with-csv"))]
fn write_all_atomically(path: &str, bytes: &[u8]) -> Result<()> {
    let tmp = format!("{path}.tmp");
    {
        let mut f = std::fs::File::create(&tmp)?;
        f.write_all(bytes)?;
        f.sync_all()?;
    }
    std::fs::rename(&tmp, path).with_context(|| format!("rename {tmp} -> {path}"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;
    use std::time::Duration;

    use relayscan::relay::FailureKind;
    use relayscan::{CheckResult, Rule, SmtpReply, Stage, StageFailure};

    use super::*;

    fn host(last: u8) -> HostRecord {
        let mut host = HostRecord::new(usize::from(last), Ipv4Addr::new(192, 0, 2, last));
        host.visited = true;
        host.smtp_open = true;
        host.hostname = Some(format!("mx{last}.example.org"));
        host
    }

    fn report(hosts: Vec<HostRecord>) -> ScanReport {
        ScanReport {
            hosts,
            cancelled: false,
            elapsed: Duration::from_millis(5),
            peak_active: 1,
        }
    }

    fn render(rows: &[&HostRecord], report: &ScanReport, ips_only: bool) -> String {
        let mut out = Vec::new();
        render_human(&mut out, rows, report, ips_only).expect("render");
        String::from_utf8(out).expect("utf8 output")
    }

    #[test]
    fn ips_only_prints_bare_addresses() {
        let report = report(vec![host(1), host(2)]);
        let rows: Vec<&HostRecord> = report.hosts.iter().collect();
        assert_eq!(render(&rows, &report, true), "192.0.2.1\n192.0.2.2\n");
    }

    #[test]
    fn secure_host_line_mentions_temporary_refusals() {
        let mut greylisted = host(3);
        let mut check = CheckResult::new(0, Rule::new("test", "a@test", "b@external.com"), None);
        check.rcpt_to = Some(SmtpReply::new(451, "4.7.1 Greylisted"));
        check.failure = Some(StageFailure {
            stage: Stage::RcptTo,
            kind: FailureKind::Rejected,
            code: Some(451),
            message: "4.7.1 Greylisted".to_string(),
        });
        greylisted.checks.push(check);
        let report = report(vec![greylisted]);
        let rows: Vec<&HostRecord> = report.hosts.iter().collect();

        let text = render(&rows, &report, false);
        assert!(text.starts_with(
            "[SECURE]  192.0.2.3 (mx3.example.org) :: 1 rule(s) refused, 1 temporarily (retry later)\n"
        ));
        assert!(text.contains("1 host(s): 1 smtp open"));
    }
}
