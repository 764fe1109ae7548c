//! Per-(user, session) sandboxed filesystem.
//!
//! Every session gets its own directory under a shared base directory.
//! Filenames are restricted to a narrow charset and writes are capped by
//! per-file and per-session size quotas so that one session can never
//! read, write, or exhaust storage outside of its own directory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Default per-file size cap (bytes) if not overridden by config.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 5 * 1024 * 1024;
/// Default per-session total size cap (bytes) if not overridden by config.
pub const DEFAULT_MAX_SESSION_SIZE: u64 = 50 * 1024 * 1024;

const SEED_INDEX_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="UTF-8">
  <title>New Project</title>
  <link rel="stylesheet" href="style.css">
</head>
<body>
  <h1>Hello, world!</h1>
  <script src="script.js"></script>
</body>
</html>
"#;
const SEED_STYLE_CSS: &str = "body {\n  font-family: sans-serif;\n}\n";
const SEED_SCRIPT_JS: &str = "console.log(\"ready\");\n";

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("invalid filename: {0}")]
    InvalidName(String),
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),
    #[error("file not found: {0}")]
    NotFound(String),
    #[error("content is not valid UTF-8: {0}")]
    NotUtf8(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SandboxError>;

/// Quotas and storage root shared by all sandboxes in the process.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    pub base_dir: PathBuf,
    pub max_file_size: u64,
    pub max_session_size: u64,
}

impl SandboxConfig {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            max_session_size: DEFAULT_MAX_SESSION_SIZE,
        }
    }

    pub fn with_max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = bytes;
        self
    }

    pub fn with_max_session_size(mut self, bytes: u64) -> Self {
        self.max_session_size = bytes;
        self
    }
}

/// Handle to a single session's sandboxed directory.
///
/// Cheap to construct; all state lives on disk under `<base>/<user_id>/<session_id>/`.
#[derive(Debug, Clone)]
pub struct Sandbox {
    config: SandboxConfig,
    user_id: String,
    session_id: String,
}

impl Sandbox {
    pub fn new(config: SandboxConfig, user_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            config,
            user_id: user_id.into(),
            session_id: session_id.into(),
        }
    }

    /// Directory this sandbox is confined to: `<base>/<user_id>/<session_id>/`.
    pub fn root(&self) -> PathBuf {
        self.config
            .base_dir
            .join(&self.user_id)
            .join(&self.session_id)
    }

    /// Create the session directory and seed it with a default skeleton.
    pub async fn initialize(&self) -> Result<()> {
        tokio::fs::create_dir_all(self.root()).await?;
        self.write("index.html", SEED_INDEX_HTML.as_bytes()).await?;
        self.write("style.css", SEED_STYLE_CSS.as_bytes()).await?;
        self.write("script.js", SEED_SCRIPT_JS.as_bytes()).await?;
        Ok(())
    }

    /// Sorted list of filenames currently in the session's sandbox.
    pub async fn list(&self) -> Result<Vec<String>> {
        let root = self.root();
        let mut names = match tokio::fs::read_dir(&root).await {
            Ok(mut entries) => {
                let mut out = Vec::new();
                while let Some(entry) = entries.next_entry().await? {
                    if entry.file_type().await?.is_file()
                        && let Some(name) = entry.file_name().to_str()
                    {
                        out.push(name.to_string());
                    }
                }
                out
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        names.sort();
        Ok(names)
    }

    /// Read a file's contents as a UTF-8 string.
    pub async fn read(&self, name: &str) -> Result<String> {
        let path = self.validated_path(name)?;
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => SandboxError::NotFound(name.to_string()),
                _ => SandboxError::Io(e),
            })?;
        String::from_utf8(bytes).map_err(|e| SandboxError::NotUtf8(e.utf8_error().to_string()))
    }

    /// Create or overwrite `name` with `content`, enforcing per-file and
    /// per-session quotas. Durable before returning. Leaves the filesystem
    /// unchanged if the write would violate a quota.
    pub async fn write(&self, name: &str, content: &[u8]) -> Result<()> {
        let path = self.validated_path(name)?;

        if content.len() as u64 > self.config.max_file_size {
            return Err(SandboxError::QuotaExceeded(format!(
                "{} exceeds max file size of {} bytes",
                name, self.config.max_file_size
            )));
        }

        let existing_total = self.total_size().await?;
        let existing_file_size = tokio::fs::metadata(&path).await.map(|m| m.len()).unwrap_or(0);
        let projected_total = existing_total - existing_file_size + content.len() as u64;
        if projected_total > self.config.max_session_size {
            return Err(SandboxError::QuotaExceeded(format!(
                "writing {} would bring session total to {} bytes, exceeding max of {} bytes",
                name, projected_total, self.config.max_session_size
            )));
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, content).await?;
        Ok(())
    }

    /// Remove a file. Not an error if it never existed.
    pub async fn delete(&self, name: &str) -> Result<()> {
        let path = self.validated_path(name)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Read every file in the sandbox into memory, keyed by filename.
    pub async fn get_all(&self) -> Result<HashMap<String, Vec<u8>>> {
        let names = self.list().await?;
        let mut out = HashMap::with_capacity(names.len());
        for name in names {
            let path = self.validated_path(&name)?;
            let bytes = tokio::fs::read(&path).await?;
            out.insert(name, bytes);
        }
        Ok(out)
    }

    /// Remove the whole session directory and everything in it.
    pub async fn delete_session(&self) -> Result<()> {
        match tokio::fs::remove_dir_all(self.root()).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Sum of all file sizes currently in the sandbox.
    async fn total_size(&self) -> Result<u64> {
        let names = self.list().await?;
        let mut total = 0u64;
        for name in names {
            let path = self.root().join(&name);
            total += tokio::fs::metadata(&path).await.map(|m| m.len()).unwrap_or(0);
        }
        Ok(total)
    }

    /// Validate `name` against the filename grammar and join it to the
    /// session root. Never returns a path outside `root()`.
    fn validated_path(&self, name: &str) -> Result<PathBuf> {
        validate_filename(name)?;
        Ok(self.root().join(name))
    }
}

/// Filename grammar: `[A-Za-z0-9_.-]+`, excluding exactly `.` and `..`.
pub fn validate_filename(name: &str) -> Result<()> {
    if name.is_empty() || name == "." || name == ".." {
        return Err(SandboxError::InvalidName(name.to_string()));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(SandboxError::InvalidName(name.to_string()));
    }
    // Reject anything that could still climb out via path separators baked
    // into a single "name" on some platforms.
    if Path::new(name).components().count() != 1 {
        return Err(SandboxError::InvalidName(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sandbox(tmp: &TempDir) -> Sandbox {
        let config = SandboxConfig::new(tmp.path())
            .with_max_file_size(100)
            .with_max_session_size(250);
        Sandbox::new(config, "user1", "session1")
    }

    #[tokio::test]
    async fn initialize_seeds_default_files() {
        let tmp = TempDir::new().unwrap();
        let sb = sandbox(&tmp);
        sb.initialize().await.unwrap();
        let names = sb.list().await.unwrap();
        assert_eq!(names, vec!["index.html", "script.js", "style.css"]);
    }

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let tmp = TempDir::new().unwrap();
        let sb = sandbox(&tmp);
        sb.write("a.txt", b"hello").await.unwrap();
        assert_eq!(sb.read("a.txt").await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn rejects_invalid_filenames() {
        let tmp = TempDir::new().unwrap();
        let sb = sandbox(&tmp);
        for bad in ["..", ".", "../x", "a/b", ""] {
            let err = sb.write(bad, b"x").await.unwrap_err();
            assert!(matches!(err, SandboxError::InvalidName(_)));
        }
        // Filesystem untouched by any of the rejected writes.
        assert!(sb.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rejects_oversize_file() {
        let tmp = TempDir::new().unwrap();
        let sb = sandbox(&tmp);
        let big = vec![0u8; 200];
        let err = sb.write("big.bin", &big).await.unwrap_err();
        assert!(matches!(err, SandboxError::QuotaExceeded(_)));
        assert!(sb.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rejects_session_total_overflow() {
        let tmp = TempDir::new().unwrap();
        let sb = sandbox(&tmp);
        sb.write("a.txt", &vec![0u8; 90]).await.unwrap();
        sb.write("b.txt", &vec![0u8; 90]).await.unwrap();
        // 90 + 90 + 90 = 270 > 250
        let err = sb.write("c.txt", &vec![0u8; 90]).await.unwrap_err();
        assert!(matches!(err, SandboxError::QuotaExceeded(_)));
        assert_eq!(sb.list().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn overwrite_does_not_double_count_existing_file() {
        let tmp = TempDir::new().unwrap();
        let sb = sandbox(&tmp);
        sb.write("a.txt", &vec![0u8; 90]).await.unwrap();
        // Overwriting the same file with the same size should not trip quota.
        sb.write("a.txt", &vec![1u8; 90]).await.unwrap();
        assert_eq!(sb.read("a.txt").await.unwrap().len(), 90);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let sb = sandbox(&tmp);
        sb.delete("missing.txt").await.unwrap();
        sb.write("a.txt", b"x").await.unwrap();
        sb.delete("a.txt").await.unwrap();
        assert!(sb.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn get_all_reads_every_file() {
        let tmp = TempDir::new().unwrap();
        let sb = sandbox(&tmp);
        sb.write("a.txt", b"1").await.unwrap();
        sb.write("b.txt", b"22").await.unwrap();
        let all = sb.get_all().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all["a.txt"], b"1");
        assert_eq!(all["b.txt"], b"22");
    }

    #[tokio::test]
    async fn delete_session_removes_root() {
        let tmp = TempDir::new().unwrap();
        let sb = sandbox(&tmp);
        sb.write("a.txt", b"1").await.unwrap();
        sb.delete_session().await.unwrap();
        assert!(!sb.root().exists());
        // Idempotent.
        sb.delete_session().await.unwrap();
    }

    #[test]
    fn filename_grammar() {
        assert!(validate_filename("index.html").is_ok());
        assert!(validate_filename("a-b_c.1.txt").is_ok());
        assert!(validate_filename(".").is_err());
        assert!(validate_filename("..").is_err());
        assert!(validate_filename("a/b").is_err());
        assert!(validate_filename("").is_err());
        assert!(validate_filename("héllo.txt").is_err());
    }
}
