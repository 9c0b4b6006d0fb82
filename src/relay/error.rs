use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleError {
    #[error("rule set is empty")]
    Empty,
    #[error("expected 'helo|mail_from|rcpt_to', found {found} field(s)")]
    FieldCount { found: usize },
    #[error("rule field '{field}' must not be empty")]
    EmptyField { field: &'static str },
    #[error("rule field '{field}' contains a line break")]
    LineBreak { field: &'static str },
    #[error("'{value}' is not a usable relay address, expected name@domain")]
    RelayAddress { value: String },
    #[error("rule {line}: {source}")]
    Line {
        line: usize,
        #[source]
        source: Box<RuleError>,
    },
}

impl RuleError {
    pub(crate) fn at_line(line: usize, source: RuleError) -> Self {
        Self::Line {
            line,
            source: Box::new(source),
        }
    }
}

/// Failure of the reverse DNS collaborator. Never fatal for a host.
#[derive(Debug, Error)]
pub enum LookupError {
    #[error("resolver initialization failed: {source}")]
    ResolverInit {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("reverse lookup failed: {source}")]
    Lookup {
        #[source]
        source: trust_dns_resolver::error::ResolveError,
    },
}

impl LookupError {
    pub(crate) fn resolver_init<E>(source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::ResolverInit {
            source: Box::new(source),
        }
    }
}
