//! Types used to describe how a child's standard streams are wired

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// One of the three standard streams of a child process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StdStream {
    Stdin,
    Stdout,
    Stderr,
}

impl StdStream {
    /// Convert the stream to its conventional lowercase name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Stdin => "stdin",
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }

    /// Whether bytes flow from the child to the parent on this stream.
    #[must_use]
    pub const fn is_output(&self) -> bool {
        !matches!(self, Self::Stdin)
    }
}

impl fmt::Display for StdStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a single standard stream of the child is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamPolicy {
    /// The caller reads (stdout/stderr) or writes (stdin) the stream.
    #[default]
    Interactive,
    /// Output is drained and thrown away; stdin reads from the null device.
    Discarded,
    /// The OS redirects the stream to a file.
    FileRedirect,
    /// The child shares the parent's own stream.
    Inherited,
    /// Output is drained into the structured logger, one batch of lines at a time.
    Logged,
}

impl StreamPolicy {
    /// Convert policy to string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Interactive => "interactive",
            Self::Discarded => "discarded",
            Self::FileRedirect => "file_redirect",
            Self::Inherited => "inherited",
            Self::Logged => "logged",
        }
    }

    /// Policies the kernel resolves entirely at spawn time.
    #[must_use]
    pub const fn is_os_level(&self) -> bool {
        matches!(self, Self::FileRedirect | Self::Inherited)
    }
}

impl fmt::Display for StreamPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// File target of a [`StreamPolicy::FileRedirect`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedirectTarget {
    pub path: PathBuf,
    /// Append to an existing file instead of truncating it. Ignored for stdin.
    pub append: bool,
}

impl RedirectTarget {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, append: bool) -> Self {
        Self {
            path: path.into(),
            append,
        }
    }

    /// Whether two targets name the same file on disk.
    ///
    /// Existing files are compared after canonicalization; otherwise the
    /// lexically absolute paths are compared.
    #[must_use]
    pub fn same_file_as(&self, other: &RedirectTarget) -> bool {
        same_file(&self.path, &other.path)
    }
}

fn same_file(a: &Path, b: &Path) -> bool {
    if let (Ok(a), Ok(b)) = (a.canonicalize(), b.canonicalize()) {
        return a == b;
    }
    match (std::path::absolute(a), std::path::absolute(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

/// Policy plus optional redirect target for one stream.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StreamConfig {
    pub policy: StreamPolicy,
    pub target: Option<RedirectTarget>,
}

impl StreamConfig {
    #[must_use]
    pub const fn new(policy: StreamPolicy) -> Self {
        Self {
            policy,
            target: None,
        }
    }

    #[must_use]
    pub fn redirect(target: RedirectTarget) -> Self {
        Self {
            policy: StreamPolicy::FileRedirect,
            target: Some(target),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_display_matches_as_str() {
        for policy in [
            StreamPolicy::Interactive,
            StreamPolicy::Discarded,
            StreamPolicy::FileRedirect,
            StreamPolicy::Inherited,
            StreamPolicy::Logged,
        ] {
            assert_eq!(policy.to_string(), policy.as_str());
        }
        assert_eq!(StreamPolicy::default(), StreamPolicy::Interactive);
    }

    #[test]
    fn test_os_level_policies() {
        assert!(StreamPolicy::FileRedirect.is_os_level());
        assert!(StreamPolicy::Inherited.is_os_level());
        assert!(!StreamPolicy::Interactive.is_os_level());
        assert!(!StreamPolicy::Discarded.is_os_level());
        assert!(!StreamPolicy::Logged.is_os_level());
    }

    #[test]
    fn test_std_stream_direction() {
        assert!(!StdStream::Stdin.is_output());
        assert!(StdStream::Stdout.is_output());
        assert!(StdStream::Stderr.is_output());
        assert_eq!(StdStream::Stderr.to_string(), "stderr");
    }

    #[test]
    fn test_same_file_lexical() {
        let a = RedirectTarget::new("logs/out.txt", false);
        let b = RedirectTarget::new("logs/out.txt", true);
        let c = RedirectTarget::new("logs/err.txt", false);
        assert!(a.same_file_as(&b));
        assert!(!a.same_file_as(&c));
    }

    #[test]
    fn test_same_file_canonical() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("shared.log");
        std::fs::write(&file, b"").unwrap();

        let direct = RedirectTarget::new(&file, false);
        let dotted = RedirectTarget::new(dir.path().join(".").join("shared.log"), false);
        assert!(direct.same_file_as(&dotted));
    }
}
