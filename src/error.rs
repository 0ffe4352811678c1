use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArchivistError {
    #[error("source store unavailable: {0}")]
    SourceUnavailable(String),
    #[error("config file invalid or unreadable: {0}")]
    InvalidConfig(String),
    #[error("another cycle holds the lock: {0}")]
    CycleLocked(String),
}

impl ArchivistError {
    /// Stable code printed in reports so operators can grep for it.
    pub fn code(&self) -> &'static str {
        match self {
            Self::SourceUnavailable(_) => "E001_SOURCE_UNAVAILABLE",
            Self::InvalidConfig(_) => "E002_CONFIG_INVALID",
            Self::CycleLocked(_) => "E003_CYCLE_LOCKED",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ArchivistError;
    use std::collections::BTreeSet;

    #[test]
    fn codes_are_distinct() {
        let errors = [
            ArchivistError::SourceUnavailable(String::new()),
            ArchivistError::InvalidConfig(String::new()),
            ArchivistError::CycleLocked(String::new()),
        ];
        let codes: BTreeSet<&str> = errors.iter().map(ArchivistError::code).collect();
        assert_eq!(codes.len(), errors.len());
    }
}
