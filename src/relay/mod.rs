//! SMTP open-relay checks.
//!
//! [`RelayProbe::check_host`] drives one host through the conversation and
//! returns its [`HostRecord`]. Every rule of the [`RuleSet`] yields one
//! [`CheckResult`]; beware the polarity: a [`RelayOutcome::Passed`] check
//! means the host relayed mail and is vulnerable.

mod error;
mod probe;
mod resolver;
mod rules;
mod session;
mod types;

pub use error::{LookupError, RuleError};
pub use probe::RelayProbe;
pub(crate) use probe::TEST_MESSAGE_LINES;
pub use resolver::{ReverseLookup, SystemResolver, system_resolver};
pub use rules::{RelayAddress, Rule, RuleSet, TemplateVars};
pub use session::{Connect, SmtpTransport, TcpConnector, TcpTransport};
pub use types::{
    CheckResult, FailureKind, HostRecord, RelayOutcome, SmtpReply, Stage, StageFailure,
};
