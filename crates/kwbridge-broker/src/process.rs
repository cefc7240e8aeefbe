use async_trait::async_trait;

/// A process as seen by the OS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEntry {
    /// Executable name without path or extension, e.g. `chrome`.
    pub app_name: String,
    /// Parent process id.
    pub ppid: u32,
}

/// Process lookup failure. Never fatal for a connection.
#[derive(Debug, thiserror::Error)]
pub enum ProcessLookupError {
    #[error("process {0} not found")]
    NotFound(u32),

    #[error("cannot read process {pid}: {source}")]
    Io {
        pid: u32,
        source: std::io::Error,
    },

    #[error("unexpected process record for {pid}: {reason}")]
    Malformed { pid: u32, reason: String },

    #[error("process lookup is not supported on this platform")]
    Unsupported,
}

/// Resolves a pid to its executable name and parent.
#[async_trait]
pub trait ProcessInfo: Send + Sync + 'static {
    async fn lookup(&self, pid: u32) -> Result<ProcessEntry, ProcessLookupError>;
}

/// Reads `/proc/<pid>/stat`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcfsProcessInfo;

#[async_trait]
impl ProcessInfo for ProcfsProcessInfo {
    async fn lookup(&self, pid: u32) -> Result<ProcessEntry, ProcessLookupError> {
        if !cfg!(target_os = "linux") {
            return Err(ProcessLookupError::Unsupported);
        }
        let path = format!("/proc/{pid}/stat");
        let stat = tokio::fs::read_to_string(&path).await.map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                ProcessLookupError::NotFound(pid)
            } else {
                ProcessLookupError::Io { pid, source }
            }
        })?;
        parse_proc_stat(pid, &stat)
    }
}

/// Parse `comm` and `ppid` from a `/proc/<pid>/stat` line.
///
/// `comm` is wrapped in parentheses and may itself contain spaces or
/// parentheses, so the record is split at the last `)`.
fn parse_proc_stat(pid: u32, stat: &str) -> Result<ProcessEntry, ProcessLookupError> {
    let malformed = |reason: &str| ProcessLookupError::Malformed {
        pid,
        reason: reason.to_string(),
    };

    let open = stat.find('(').ok_or_else(|| malformed("missing '('"))?;
    let close = stat.rfind(')').ok_or_else(|| malformed("missing ')'"))?;
    if close < open {
        return Err(malformed("unbalanced parentheses"));
    }
    let app_name = stat[open + 1..close].to_string();

    // After comm: state, ppid, ...
    let mut rest = stat[close + 1..].split_whitespace();
    let _state = rest.next().ok_or_else(|| malformed("missing state"))?;
    let ppid = rest
        .next()
        .ok_or_else(|| malformed("missing ppid"))?
        .parse::<u32>()
        .map_err(|_| malformed("non-numeric ppid"))?;

    Ok(ProcessEntry { app_name, ppid })
}
