//! Human-readable output for CLI commands.

use serde::Serialize;
use std::io::{self, Write};

use crate::domain::{AclRule, Decision, Domain, RelaySession, ResultRecord};

/// JSON body printed by `check --json`.
#[derive(Debug, Serialize)]
pub struct CheckReport<'a> {
    pub session: &'a RelaySession,
    pub decision: Option<&'a Decision>,
    pub results: &'a [ResultRecord],
}

pub fn domain<W: Write>(out: &mut W, domain: &Domain) -> io::Result<()> {
    writeln!(out)?;
    writeln!(
        out,
        "  {}  [{}] [implicit {}]",
        domain.name,
        if domain.enabled { "enabled" } else { "disabled" },
        domain.implicit_action
    )
}

/// Rules as an aligned table; wildcard fields print as `*`.
pub fn rule_table<W: Write>(out: &mut W, rules: &[AclRule]) -> io::Result<()> {
    let user_width = rules
        .iter()
        .filter_map(|r| r.user.as_deref())
        .map(str::len)
        .fold("user".len(), usize::max);
    let ip_width = rules
        .iter()
        .filter_map(|r| r.address.as_deref())
        .map(str::len)
        .fold("ip".len(), usize::max);

    writeln!(out)?;
    writeln!(
        out,
        "    {:>3}  {:<user_width$}  {:<ip_width$}  action",
        "seq", "user", "ip"
    )?;
    writeln!(
        out,
        "    {}  {}  {}  ------",
        "-".repeat(3),
        "-".repeat(user_width),
        "-".repeat(ip_width)
    )?;

    if rules.is_empty() {
        writeln!(out, "    (no ACLs)")?;
    }
    for rule in rules {
        writeln!(
            out,
            "    {:>3}  {:<user_width$}  {:<ip_width$}  {}",
            rule.sequence,
            rule.user.as_deref().unwrap_or("*"),
            rule.address.as_deref().unwrap_or("*"),
            rule.action
        )?;
    }
    writeln!(out)
}

pub fn check_outcome<W: Write>(
    out: &mut W,
    session: &RelaySession,
    decision: Option<&Decision>,
    results: &[ResultRecord],
) -> io::Result<()> {
    let Some(decision) = decision else {
        return writeln!(out, "{}: session not relaying, no ACL check", session.target_host);
    };

    writeln!(
        out,
        "{} from {} (user {}): {}",
        session.target_host,
        session.remote_ip,
        session.user().unwrap_or("-"),
        decision
    )?;
    for record in results {
        writeln!(out, "  {:<4} {:<8} {}", record.outcome.to_string(), record.tier, record.message)?;
    }
    Ok(())
}
