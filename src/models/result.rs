use std::fmt;
use std::time::Duration;

/// Short identifier unique to one installer invocation
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RunId(String);

impl RunId {
    /// First eight hex characters of a random v4 UUID
    pub fn generate() -> Self {
        let mut id = uuid::Uuid::new_v4().simple().to_string();
        id.truncate(8);
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RunId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Outcome of one installer run. Built exactly once, at the end of the run.
#[derive(Debug, Clone, PartialEq)]
pub struct InstallResult {
    pub success: bool,
    pub duration: Duration,
    pub packages_installed: usize,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub run_id: RunId,
}

impl InstallResult {
    /// Process exit code for this outcome
    pub fn exit_code(&self) -> i32 {
        if self.success { 0 } else { 1 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_id_shape() {
        let id = RunId::generate();
        assert_eq!(id.as_str().len(), 8);
        assert!(id.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(id, RunId::generate());
    }

    #[test]
    fn test_exit_code() {
        let mut result = InstallResult {
            success: true,
            duration: Duration::from_secs(1),
            packages_installed: 2,
            errors: Vec::new(),
            warnings: Vec::new(),
            run_id: RunId::from("abcd1234"),
        };
        assert_eq!(result.exit_code(), 0);

        result.success = false;
        assert_eq!(result.exit_code(), 1);
    }
}
