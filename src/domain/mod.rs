pub mod acl;
pub mod decision;
pub mod policy;
pub mod result;
pub mod session;

pub use acl::{AclRule, Action, Domain, DomainPatch, RulePatch, SEQUENCE_LIMIT, SEQUENCE_STEP};
pub use decision::{Decision, Outcome, Tier};
pub use policy::{DefaultHandle, RelayPolicy};
pub use result::{ResultKind, ResultRecord, ResultSink};
pub use session::RelaySession;
