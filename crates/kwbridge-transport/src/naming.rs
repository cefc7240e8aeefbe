//! Deterministic per-user socket names.
//!
//! Extensions compute the same name on their side, so the layout here is
//! part of the wire contract and must not change between releases.

use std::path::{Path, PathBuf};

use crate::error::{Result, TransportError};

/// Maximum socket name length on the current platform.
pub const MAX_SOCKET_NAME_LEN: usize = Platform::current().max_socket_name_len();

const SOCKET_BASENAME: &str = "keeweb-connect";

/// Platform families with distinct socket naming rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    MacOs,
    Windows,
    OtherUnix,
}

impl Platform {
    /// The platform this binary was built for.
    pub const fn current() -> Self {
        if cfg!(target_os = "macos") {
            Platform::MacOs
        } else if cfg!(windows) {
            Platform::Windows
        } else {
            Platform::OtherUnix
        }
    }

    /// Longest socket name accepted on this platform.
    pub const fn max_socket_name_len(self) -> usize {
        match self {
            Platform::Windows => 256,
            Platform::MacOs | Platform::OtherUnix => 104,
        }
    }
}

/// The OS account the socket belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserInfo {
    pub username: String,
    pub uid: u32,
}

impl UserInfo {
    /// Look up the account running this process.
    pub fn current() -> Result<Self> {
        current_user()
    }
}

/// Build the socket name for `user` on `platform`.
///
/// - macOS: `/Users/<user>/Library/Group Containers/<team>.keeweb/conn.sock`
/// - Windows: `\\.\pipe\keeweb-connect-<user>`
/// - other Unix: `<temp_dir>/keeweb-connect-<uid>.sock`
///
/// macOS falls back to the generic Unix layout when no team id is known,
/// since the group container only exists for signed builds.
pub fn socket_name(
    platform: Platform,
    user: &UserInfo,
    temp_dir: &Path,
    apple_team_id: Option<&str>,
) -> PathBuf {
    match (platform, apple_team_id) {
        (Platform::MacOs, Some(team_id)) => PathBuf::from(format!(
            "/Users/{}/Library/Group Containers/{team_id}.keeweb/conn.sock",
            user.username
        )),
        (Platform::Windows, _) => {
            PathBuf::from(format!(r"\\.\pipe\{SOCKET_BASENAME}-{}", user.username))
        }
        _ => temp_dir.join(format!("{SOCKET_BASENAME}-{}.sock", user.uid)),
    }
}

/// Resolve the socket name for the current user on the current platform.
pub fn socket_name_for_current_user(apple_team_id: Option<&str>) -> Result<PathBuf> {
    let user = UserInfo::current()?;
    Ok(socket_name(
        Platform::current(),
        &user,
        &std::env::temp_dir(),
        apple_team_id,
    ))
}

/// Reject names that do not fit the platform limit.
pub fn validate_socket_name(platform: Platform, path: &Path) -> Result<()> {
    let len = path.as_os_str().len();
    let max = platform.max_socket_name_len();
    if len > max {
        return Err(TransportError::PathTooLong {
            path: path.to_path_buf(),
            len,
            max,
        });
    }
    Ok(())
}

#[cfg(unix)]
fn current_user() -> Result<UserInfo> {
    use std::ffi::CStr;

    // SAFETY: getuid has no preconditions and cannot fail.
    let uid = unsafe { libc::getuid() };

    // SAFETY: passwd is a plain C struct; all-zero is a valid bit pattern.
    let mut pwd: libc::passwd = unsafe { std::mem::zeroed() };
    let mut buf = vec![0 as libc::c_char; 4096];
    let mut result: *mut libc::passwd = std::ptr::null_mut();

    // SAFETY: `pwd`, `buf` and `result` are valid writable locations for the
    // sizes passed; getpwuid_r only writes within them.
    let rc = unsafe { libc::getpwuid_r(uid, &mut pwd, buf.as_mut_ptr(), buf.len(), &mut result) };

    let username = if rc == 0 && !result.is_null() && !pwd.pw_name.is_null() {
        // SAFETY: on success pw_name points at a NUL-terminated string inside `buf`.
        unsafe { CStr::from_ptr(pwd.pw_name) }
            .to_string_lossy()
            .into_owned()
    } else {
        std::env::var("USER").map_err(|_| {
            TransportError::UnknownUser(format!("no passwd entry for uid {uid}"))
        })?
    };

    Ok(UserInfo { username, uid })
}

#[cfg(windows)]
fn current_user() -> Result<UserInfo> {
    let username = std::env::var("USERNAME")
        .map_err(|_| TransportError::UnknownUser("USERNAME is not set".to_string()))?;
    Ok(UserInfo { username, uid: 0 })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> UserInfo {
        UserInfo {
            username: "alice".to_string(),
            uid: 1000,
        }
    }

    #[test]
    fn unix_name_uses_uid_in_temp_dir() {
        let name = socket_name(Platform::OtherUnix, &alice(), Path::new("/tmp"), None);
        assert_eq!(name, PathBuf::from("/tmp/keeweb-connect-1000.sock"));
    }

    #[test]
    fn macos_name_uses_group_container() {
        let name = socket_name(Platform::MacOs, &alice(), Path::new("/tmp"), Some("3LE7JZ657W"));
        assert_eq!(
            name,
            PathBuf::from("/Users/alice/Library/Group Containers/3LE7JZ657W.keeweb/conn.sock")
        );
    }

    #[test]
    fn macos_without_team_id_falls_back_to_temp_dir() {
        let name = socket_name(Platform::MacOs, &alice(), Path::new("/var/tmp"), None);
        assert_eq!(name, PathBuf::from("/var/tmp/keeweb-connect-1000.sock"));
    }

    #[test]
    fn windows_name_is_a_pipe_keyed_by_username() {
        let name = socket_name(Platform::Windows, &alice(), Path::new("C:/Temp"), None);
        assert_eq!(name, PathBuf::from(r"\\.\pipe\keeweb-connect-alice"));
    }

    #[test]
    fn name_at_limit_is_accepted() {
        let path = PathBuf::from("a".repeat(104));
        assert!(validate_socket_name(Platform::OtherUnix, &path).is_ok());
    }

    #[test]
    fn overlong_name_is_rejected() {
        let user = UserInfo {
            username: "u".repeat(120),
            uid: 501,
        };
        let name = socket_name(Platform::MacOs, &user, Path::new("/tmp"), Some("TEAM"));
        let err = validate_socket_name(Platform::MacOs, &name).unwrap_err();
        assert!(matches!(err, TransportError::PathTooLong { max: 104, .. }));
    }

    #[test]
    fn windows_allows_longer_names() {
        let path = PathBuf::from("p".repeat(200));
        assert!(validate_socket_name(Platform::Windows, &path).is_ok());
        assert!(validate_socket_name(Platform::OtherUnix, &path).is_err());
    }

    #[test]
    #[cfg(unix)]
    fn current_user_resolves() {
        let user = UserInfo::current().unwrap();
        assert!(!user.username.is_empty());
    }
}
