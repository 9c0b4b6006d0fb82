use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TargetError {
    #[error("address range is empty")]
    Empty,
    #[error("expected four octets in '{input}'")]
    OctetCount { input: String },
    #[error("invalid octet '{value}' in '{input}'")]
    InvalidOctet { input: String, value: String },
    #[error("octet {position} span {lo}-{hi} is descending")]
    DescendingSpan { position: usize, lo: u8, hi: u8 },
    #[error("invalid address on line {line}: '{value}'")]
    InvalidListEntry { line: usize, value: String },
    #[error("address list contains no address")]
    EmptyList,
}

impl TargetError {
    pub(crate) fn invalid_octet(input: &str, value: &str) -> Self {
        Self::InvalidOctet {
            input: input.to_string(),
            value: value.to_string(),
        }
    }
}
