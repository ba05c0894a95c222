use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of a result record handed to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultKind {
    Pass,
    Fail,
    Skip,
    Err,
}

impl fmt::Display for ResultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResultKind::Pass => "pass",
            ResultKind::Fail => "fail",
            ResultKind::Skip => "skip",
            ResultKind::Err => "err",
        };
        f.write_str(s)
    }
}

/// Structured record emitted for each evaluation.
///
/// Identifies which tier decided and how, so downstream policy can tell
/// an explicit permit from "no ACL input registered".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultRecord {
    /// Source tag (`acl`, `domain`, `implicit` or `store`)
    pub tier: String,

    pub outcome: ResultKind,

    /// Human-readable detail, e.g. `acl(deny)`
    pub message: String,
}

impl ResultRecord {
    pub fn new(tier: impl Into<String>, outcome: ResultKind, message: impl Into<String>) -> Self {
        ResultRecord {
            tier: tier.into(),
            outcome,
            message: message.into(),
        }
    }

    pub fn pass(tier: impl Into<String>, message: impl Into<String>) -> Self {
        ResultRecord::new(tier, ResultKind::Pass, message)
    }

    pub fn fail(tier: impl Into<String>, message: impl Into<String>) -> Self {
        ResultRecord::new(tier, ResultKind::Fail, message)
    }

    pub fn skip(tier: impl Into<String>, message: impl Into<String>) -> Self {
        ResultRecord::new(tier, ResultKind::Skip, message)
    }

    /// Record for a failure that was absorbed during evaluation.
    pub fn err(message: impl Into<String>) -> Self {
        ResultRecord::new("store", ResultKind::Err, message)
    }
}

impl fmt::Display for ResultRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} {}", self.outcome, self.tier, self.message)
    }
}

/// Receiver for result records, provided by the host session.
pub trait ResultSink {
    fn add(&mut self, record: ResultRecord);
}

impl ResultSink for Vec<ResultRecord> {
    fn add(&mut self, record: ResultRecord) {
        self.push(record);
    }
}
