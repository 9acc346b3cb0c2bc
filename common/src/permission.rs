//! Declarative permission overrides applied to copied files.
//!
//! A [`PermissionRule`] names a destination path and the mode it should end up with. The mode can
//! be given numerically or as an octal string (`"755"`, `"0644"`); the string form is resolved on
//! first use and the result cached in the rule, so a rule shared by several applications is only
//! ever parsed once.

use tracing::instrument;

use crate::fs::FileSystem;

/// Largest mode a rule may resolve to. Values must fit a 10-bit signed integer, which leaves the
/// plain `rwx` bits and excludes setuid, setgid and sticky.
pub const MAX_MODE: u32 = 0o777;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PermissionError {
    #[error("invalid permission {permission:?}: not an octal number")]
    InvalidOctal { permission: String },
    #[error("invalid permission {permission:?}: {mode:#o} is out of range (max {max:#o})", max = MAX_MODE)]
    OutOfRange { permission: String, mode: u32 },
    #[error("invalid permission rule {0:?}, expected PATH=MODE")]
    InvalidRule(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionRule {
    /// Destination path, compared for exact equality against each copied file's destination.
    pub path: String,
    /// Octal permission string, used only while `mode` is zero.
    pub permission: String,
    /// Resolved mode; zero means "not resolved yet".
    pub mode: u32,
}

impl PermissionRule {
    pub fn with_mode(path: impl Into<String>, mode: u32) -> Self {
        Self {
            path: path.into(),
            permission: String::new(),
            mode,
        }
    }

    pub fn with_permission(path: impl Into<String>, permission: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            permission: permission.into(),
            mode: 0,
        }
    }

    /// Parses the `PATH=MODE` command line form. The last `=` separates the mode so paths may
    /// contain `=` themselves.
    pub fn parse(rule: &str) -> Result<Self, PermissionError> {
        let (path, permission) = rule
            .rsplit_once('=')
            .filter(|(path, permission)| !path.is_empty() && !permission.is_empty())
            .ok_or_else(|| PermissionError::InvalidRule(rule.to_string()))?;
        let mut parsed = Self::with_permission(path, permission);
        // surface typos when the rule is built rather than halfway through a transfer
        parsed.resolve()?;
        Ok(parsed)
    }

    /// Returns the numeric mode, resolving the permission string on first call.
    pub fn resolve(&mut self) -> Result<u32, PermissionError> {
        if self.mode != 0 || self.permission.is_empty() {
            return Ok(self.mode);
        }
        if !self.permission.starts_with('0') {
            self.permission.insert(0, '0');
        }
        let mode = u32::from_str_radix(&self.permission, 8).map_err(|_| {
            PermissionError::InvalidOctal {
                permission: self.permission.clone(),
            }
        })?;
        if mode > MAX_MODE {
            return Err(PermissionError::OutOfRange {
                permission: self.permission.clone(),
                mode,
            });
        }
        self.mode = mode;
        Ok(mode)
    }
}

/// First rule whose path equals `destination`.
pub fn find_rule<'a>(
    rules: &'a mut [PermissionRule],
    destination: &str,
) -> Option<&'a mut PermissionRule> {
    rules.iter_mut().find(|rule| rule.path == destination)
}

/// Resolves the rule and sets the resulting mode on `path` in the destination file system.
#[instrument(skip(fs))]
pub async fn apply<D: FileSystem>(
    fs: &D,
    path: &str,
    rule: &mut PermissionRule,
) -> anyhow::Result<()> {
    let mode = rule.resolve()?;
    tracing::debug!("setting mode {:#o}", mode);
    fs.set_mode(path, mode).await
}
