use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Subcommand, ValueEnum};
use thiserror::Error;
use tracing::debug;

use crate::admin::{AdminError, RuleAdmin, RuleChanges, RuleDraft};
use crate::domain::{Action, DomainPatch, RelaySession, ResultRecord};
use crate::observability::MetricsRegistry;
use crate::policy::PolicyHandle;
use crate::rules::RelayAclEngine;
use crate::storage::RuleStore;

use super::render;

/// Errors returned by CLI commands.
#[derive(Error, Debug)]
pub enum CommandError {
    #[error(transparent)]
    Admin(#[from] AdminError),

    #[error("Failed to write output: {0}")]
    Output(#[from] std::io::Error),

    #[error("Failed to encode output: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// List single or all domains
    List(ListArgs),

    /// Add, modify or delete a domain
    Domain(DomainArgs),

    /// Add, modify or delete an access list entry
    Acl(AclArgs),

    /// Evaluate a relay attempt against the stored rules
    Check(CheckArgs),
}

impl Command {
    /// Whether the command may change the rule database.
    pub fn writes(&self) -> bool {
        matches!(self, Command::Domain(_) | Command::Acl(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Operation {
    Add,
    Mod,
    Del,
}

#[derive(Debug, Clone, Default, Args)]
pub struct ListArgs {
    /// Domain to list
    pub domain: Option<String>,

    /// Include ACLs
    #[arg(short = 'a', long = "acls")]
    pub acls: bool,
}

#[derive(Debug, Clone, Args)]
pub struct DomainArgs {
    #[arg(value_enum)]
    pub op: Operation,

    pub domain: String,

    /// Enable ACL checks for the domain
    #[arg(short = 'e', long, conflicts_with = "disable")]
    pub enable: bool,

    /// Disable ACL checks for the domain
    #[arg(short = 'd', long)]
    pub disable: bool,

    /// Implicitly permit when no ACL matches
    #[arg(short = 'p', long, conflicts_with = "deny")]
    pub permit: bool,

    /// Implicitly deny when no ACL matches
    #[arg(short = 'x', long)]
    pub deny: bool,
}

impl DomainArgs {
    pub fn patch(&self) -> DomainPatch {
        DomainPatch {
            implicit_action: flag_action(self.permit, self.deny),
            enabled: match (self.enable, self.disable) {
                (true, _) => Some(true),
                (_, true) => Some(false),
                _ => None,
            },
        }
    }
}

#[derive(Debug, Clone, Args)]
pub struct AclArgs {
    #[arg(value_enum)]
    pub op: Operation,

    pub domain: String,

    /// Sequence number (0 <= x < 1000), allocated automatically on add
    #[arg(short = 's', long = "seq", allow_negative_numbers = true)]
    pub sequence: Option<i64>,

    /// Authenticated user; empty matches any user
    #[arg(short = 'u', long)]
    pub user: Option<String>,

    /// IP address or range; empty matches any address
    #[arg(short = 'i', long = "ip")]
    pub address: Option<String>,

    /// Permit matching sessions
    #[arg(short = 'p', long, conflicts_with = "deny")]
    pub permit: bool,

    /// Deny matching sessions
    #[arg(short = 'x', long)]
    pub deny: bool,
}

impl AclArgs {
    fn action(&self) -> Option<Action> {
        flag_action(self.permit, self.deny)
    }

    fn require_sequence(&self) -> Result<i64, AdminError> {
        self.sequence.ok_or(AdminError::MissingSequence)
    }
}

#[derive(Debug, Clone, Args)]
pub struct CheckArgs {
    /// Target domain of the relay attempt
    pub domain: String,

    /// Remote address of the client
    #[arg(long)]
    pub ip: String,

    /// Authenticated user
    #[arg(long)]
    pub user: Option<String>,

    /// Evaluate as a non-relaying session
    #[arg(long)]
    pub not_relaying: bool,

    /// Print the decision as JSON
    #[arg(long)]
    pub json: bool,

    /// Also print evaluation metrics in Prometheus text format
    #[arg(long)]
    pub metrics: bool,
}

impl CheckArgs {
    pub fn session(&self) -> RelaySession {
        let mut session = RelaySession::new(&self.domain, &self.ip).with_relaying(!self.not_relaying);
        if let Some(user) = &self.user {
            session = session.with_user(user.clone());
        }
        session
    }
}

fn flag_action(permit: bool, deny: bool) -> Option<Action> {
    match (permit, deny) {
        (true, _) => Some(Action::Permit),
        (_, true) => Some(Action::Deny),
        _ => None,
    }
}

/// Shared state for running one command.
#[derive(Clone)]
pub struct CommandContext {
    pub store: Arc<dyn RuleStore>,
    pub policy: PolicyHandle,
    pub store_timeout: Duration,
    /// Registry shared with the policy watcher
    pub metrics: Arc<MetricsRegistry>,
}

/// Run a command, writing its human-readable outcome to `out`.
pub async fn execute<W: Write>(
    command: &Command,
    ctx: &CommandContext,
    out: &mut W,
) -> Result<(), CommandError> {
    debug!(command = ?command, "Executing command");

    match command {
        Command::List(args) => list(args, ctx, out).await,
        Command::Domain(args) => domain(args, ctx, out).await,
        Command::Acl(args) => acl(args, ctx, out).await,
        Command::Check(args) => check(args, ctx, out).await,
    }
}

async fn list<W: Write>(args: &ListArgs, ctx: &CommandContext, out: &mut W) -> Result<(), CommandError> {
    let admin = RuleAdmin::new(ctx.store.clone());
    let listings = admin.list(args.domain.as_deref(), args.acls).await?;

    writeln!(out, "List of domains:")?;
    for listing in &listings {
        render::domain(out, &listing.domain)?;
        if let Some(rules) = &listing.rules {
            render::rule_table(out, rules)?;
        }
    }
    Ok(())
}

async fn domain<W: Write>(
    args: &DomainArgs,
    ctx: &CommandContext,
    out: &mut W,
) -> Result<(), CommandError> {
    let admin = RuleAdmin::new(ctx.store.clone());
    let patch = args.patch();

    let domain = match args.op {
        Operation::Add => admin.add_domain(&args.domain, &patch).await?,
        Operation::Mod => admin.modify_domain(&args.domain, &patch).await?,
        Operation::Del => {
            if admin.delete_domain(&args.domain).await? {
                writeln!(out, "Domain \"{}\" deleted.", args.domain)?;
            } else {
                writeln!(out, "Domain \"{}\" not found.", args.domain)?;
            }
            return Ok(());
        }
    };

    render::domain(out, &domain)?;
    Ok(())
}

async fn acl<W: Write>(args: &AclArgs, ctx: &CommandContext, out: &mut W) -> Result<(), CommandError> {
    let admin = RuleAdmin::new(ctx.store.clone());

    match args.op {
        Operation::Add => {
            let draft = RuleDraft {
                sequence: args.sequence,
                user: args.user.clone(),
                address: args.address.clone(),
                action: args.action(),
            };
            let rule = admin.add_rule(&args.domain, draft).await?;
            writeln!(out, "ACL rule {} added.", rule.sequence)?;
        }
        Operation::Mod => {
            let sequence = args.require_sequence()?;
            let changes = RuleChanges {
                user: args.user.clone(),
                address: args.address.clone(),
                action: args.action(),
            };
            let rule = admin.modify_rule(&args.domain, sequence, changes).await?;
            writeln!(out, "ACL rule {} modified.", rule.sequence)?;
        }
        Operation::Del => {
            let sequence = args.require_sequence()?;
            if !admin.delete_rule(&args.domain, sequence).await? {
                let sequence = u32::try_from(sequence).map_err(|_| AdminError::InvalidSequence(sequence))?;
                return Err(AdminError::RuleNotFound {
                    domain: args.domain.clone(),
                    sequence,
                }
                .into());
            }
            writeln!(out, "ACL rule deleted.")?;
        }
    }

    let listing = admin.list(Some(&args.domain), true).await?;
    for entry in &listing {
        render::domain(out, &entry.domain)?;
        if let Some(rules) = &entry.rules {
            render::rule_table(out, rules)?;
        }
    }
    Ok(())
}

async fn check<W: Write>(args: &CheckArgs, ctx: &CommandContext, out: &mut W) -> Result<(), CommandError> {
    let engine = RelayAclEngine::new(ctx.store.clone(), ctx.policy.clone())
        .with_store_timeout(ctx.store_timeout)
        .with_metrics(ctx.metrics.clone());

    let session = args.session();
    let mut records: Vec<ResultRecord> = Vec::new();
    let decision = engine.check(&session, &mut records).await;

    if args.json {
        let report = render::CheckReport {
            session: &session,
            decision: decision.as_ref(),
            results: &records,
        };
        serde_json::to_writer_pretty(&mut *out, &report)?;
        writeln!(out)?;
    } else {
        render::check_outcome(out, &session, decision.as_ref(), &records)?;
    }

    if args.metrics {
        write!(out, "{}", engine.metrics().to_prometheus())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DefaultHandle, RelayPolicy};
    use crate::storage::{MemoryStore, SqliteStore};
    use clap::Parser;

    #[derive(Debug, Parser)]
    struct TestCli {
        #[command(subcommand)]
        command: Command,
    }

    fn parse(args: &[&str]) -> Result<Command, clap::Error> {
        let mut argv = vec!["relay-acl"];
        argv.extend_from_slice(args);
        TestCli::try_parse_from(argv).map(|cli| cli.command)
    }

    fn context(store: Arc<MemoryStore>, handle: DefaultHandle) -> CommandContext {
        CommandContext {
            store,
            policy: PolicyHandle::fixed(RelayPolicy::default().with_default_handle(handle)),
            store_timeout: Duration::from_millis(200),
            metrics: Arc::new(MetricsRegistry::new()),
        }
    }

    async fn run(ctx: &CommandContext, args: &[&str]) -> Result<String, CommandError> {
        let command = parse(args).unwrap();
        let mut out = Vec::new();
        execute(&command, ctx, &mut out).await?;
        Ok(String::from_utf8(out).unwrap())
    }

    #[test]
    fn test_conflicting_flags_rejected() {
        assert!(parse(&["domain", "add", "example.com", "-e", "-d"]).is_err());
        assert!(parse(&["domain", "add", "example.com", "-p", "-x"]).is_err());
        assert!(parse(&["acl", "add", "example.com", "--permit", "--deny"]).is_err());
        assert!(parse(&["acl", "frob", "example.com"]).is_err());
    }

    #[test]
    fn test_domain_patch_from_flags() {
        let Command::Domain(args) = parse(&["domain", "mod", "example.com", "-d"]).unwrap() else {
            panic!("expected domain command");
        };
        let patch = args.patch();
        assert_eq!(patch.enabled, Some(false));
        assert_eq!(patch.implicit_action, None);
    }

    #[test]
    fn test_negative_sequence_parses() {
        let Command::Acl(args) = parse(&["acl", "del", "example.com", "-s", "-5"]).unwrap() else {
            panic!("expected acl command");
        };
        assert_eq!(args.sequence, Some(-5));
    }

    #[test]
    fn test_writes() {
        assert!(parse(&["acl", "add", "example.com"]).unwrap().writes());
        assert!(!parse(&["list"]).unwrap().writes());
        assert!(!parse(&["check", "example.com", "--ip", "1.2.3.4"]).unwrap().writes());
    }

    #[tokio::test]
    async fn test_domain_and_acl_commands() {
        let store = Arc::new(MemoryStore::new());
        let ctx = context(store.clone(), DefaultHandle::Skip);

        let out = run(&ctx, &["domain", "add", "example.com", "-x"]).await.unwrap();
        assert!(out.contains("example.com"));
        assert!(out.contains("deny"));

        let out = run(&ctx, &["acl", "add", "example.com", "-i", "10.0.0.0/8", "-x"])
            .await
            .unwrap();
        assert!(out.contains("ACL rule 10 added."));
        assert!(out.contains("10.0.0.0/8"));

        run(&ctx, &["acl", "add", "example.com", "-p"]).await.unwrap();
        let rules = store.list_rules("example.com").await.unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[1].sequence, 20);

        let out = run(&ctx, &["acl", "mod", "example.com", "-s", "20", "-u", "alice"])
            .await
            .unwrap();
        assert!(out.contains("alice"));

        let out = run(&ctx, &["acl", "del", "example.com", "-s", "20"]).await.unwrap();
        assert!(out.contains("ACL rule deleted."));

        let out = run(&ctx, &["domain", "del", "example.com"]).await.unwrap();
        assert!(out.contains("deleted"));
        assert!(store.get_domain("example.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_acl_errors() {
        let store = Arc::new(MemoryStore::new());
        let ctx = context(store, DefaultHandle::Skip);
        run(&ctx, &["domain", "add", "example.com"]).await.unwrap();

        let err = run(&ctx, &["acl", "mod", "example.com"]).await.unwrap_err();
        assert!(matches!(err, CommandError::Admin(AdminError::MissingSequence)));

        let err = run(&ctx, &["acl", "del", "example.com", "-s", "40"]).await.unwrap_err();
        assert!(matches!(err, CommandError::Admin(AdminError::RuleNotFound { sequence: 40, .. })));

        let err = run(&ctx, &["acl", "add", "example.com", "-s", "1000"]).await.unwrap_err();
        assert!(matches!(err, CommandError::Admin(AdminError::InvalidSequence(1000))));
    }

    #[tokio::test]
    async fn test_list_command() {
        let store = Arc::new(MemoryStore::new());
        let ctx = context(store, DefaultHandle::Skip);
        run(&ctx, &["domain", "add", "example.com"]).await.unwrap();
        run(&ctx, &["acl", "add", "example.com", "-u", "bob"]).await.unwrap();

        let out = run(&ctx, &["list"]).await.unwrap();
        assert!(out.contains("example.com"));
        assert!(!out.contains("bob"));

        let out = run(&ctx, &["list", "example.com", "-a"]).await.unwrap();
        assert!(out.contains("bob"));

        let err = run(&ctx, &["list", "missing.com"]).await.unwrap_err();
        assert!(matches!(err, CommandError::Admin(AdminError::DomainNotFound(_))));
    }

    #[tokio::test]
    async fn test_check_command() {
        let store = Arc::new(MemoryStore::new());
        let ctx = context(store, DefaultHandle::Deny);
        run(&ctx, &["domain", "add", "example.com"]).await.unwrap();
        run(&ctx, &["acl", "add", "example.com", "-i", "10.0.0.0/8", "-x"])
            .await
            .unwrap();

        let out = run(&ctx, &["check", "example.com", "--ip", "10.1.1.1"]).await.unwrap();
        assert!(out.contains("DENY"));

        let out = run(&ctx, &["check", "example.com", "--ip", "8.8.8.8", "--json"])
            .await
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["decision"]["outcome"], "PERMIT");
        assert_eq!(value["results"][0]["message"], "domain(permit)");

        let out = run(&ctx, &["check", "other.com", "--ip", "8.8.8.8", "--json"])
            .await
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["decision"]["tier"], "GLOBAL_DEFAULT");

        let out = run(&ctx, &["check", "example.com", "--ip", "10.1.1.1", "--not-relaying"])
            .await
            .unwrap();
        assert!(out.contains("not relaying"));

        let out = run(&ctx, &["check", "example.com", "--ip", "10.1.1.1", "--metrics"])
            .await
            .unwrap();
        assert!(out.contains("relay_acl_evaluations_total 4"));
        assert!(out.contains("relay_acl_evaluations_skipped_total 1"));
    }

    #[tokio::test]
    async fn test_check_metrics_include_policy_reloads() {
        let ctx = context(Arc::new(MemoryStore::new()), DefaultHandle::Skip);
        ctx.metrics.record_policy_reload(true);
        ctx.metrics.record_policy_reload(false);

        let out = run(&ctx, &["check", "example.com", "--ip", "10.1.1.1", "--metrics"])
            .await
            .unwrap();
        assert!(out.contains("relay_acl_policy_reloads_total 2"));
        assert!(out.contains("relay_acl_policy_reload_errors_total 1"));
        assert!(out.contains("relay_acl_evaluations_total 1"));
    }

    #[tokio::test]
    async fn test_check_against_missing_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.db");

        let ctx = CommandContext {
            store: Arc::new(SqliteStore::open_lazy(&path)),
            policy: PolicyHandle::fixed(RelayPolicy::default().with_default_handle(DefaultHandle::Deny)),
            store_timeout: Duration::from_secs(2),
            metrics: Arc::new(MetricsRegistry::new()),
        };

        let out = run(&ctx, &["check", "example.com", "--ip", "10.1.1.1", "--json"])
            .await
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["results"][0]["outcome"], "err");
        assert_eq!(value["decision"]["tier"], "GLOBAL_DEFAULT");
        assert_eq!(value["decision"]["outcome"], "DENY");
        assert!(!path.exists());
        assert_eq!(ctx.metrics.store_errors_total.load(std::sync::atomic::Ordering::Relaxed), 1);
    }
}
