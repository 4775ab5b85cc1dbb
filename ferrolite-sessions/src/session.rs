//! Session records and the requests that create and change them.

use ferrolite_protocol::id::{KernelId, SessionId};
use ferrolite_protocol::lifecycle::KernelModel;
use serde::{Deserialize, Serialize};

/// A binding between a document and a (possibly shared) kernel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Unique id.
    pub id: SessionId,
    /// Document path, optionally prefixed with a drive (`Drive:dir/a.ipynb`).
    pub path: String,
    /// Display name. Unique across sessions.
    pub name: String,
    /// Session kind: `notebook`, `console`, `file`, ...
    #[serde(rename = "type")]
    pub type_: String,
    /// The bound kernel.
    pub kernel: Option<KernelModel>,
}

/// Which kernel a session should use.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelRef {
    /// A live kernel to share.
    #[serde(default)]
    pub id: Option<KernelId>,
    /// A kernel spec to start.
    #[serde(default)]
    pub name: Option<String>,
}

impl KernelRef {
    /// Refer to a live kernel by id.
    pub fn id(id: impl Into<KernelId>) -> Self {
        Self {
            id: Some(id.into()),
            name: None,
        }
    }

    /// Ask for a new kernel of spec `name`.
    pub fn name(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: Some(name.into()),
        }
    }
}

/// Arguments of [`SessionStore::start_new`](crate::SessionStore::start_new).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartSession {
    /// Document path.
    pub path: String,
    /// Display name; the path when empty.
    #[serde(default)]
    pub name: String,
    /// Session kind; the configured default when absent.
    #[serde(default, rename = "type")]
    pub type_: Option<String>,
    /// Kernel to use; the registry default spec when absent.
    #[serde(default)]
    pub kernel: Option<KernelRef>,
}

impl StartSession {
    /// A session for `path` named after it.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Set the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the session kind.
    pub fn with_type(mut self, type_: impl Into<String>) -> Self {
        self.type_ = Some(type_.into());
        self
    }

    /// Choose the kernel.
    pub fn with_kernel(mut self, kernel: KernelRef) -> Self {
        self.kernel = Some(kernel);
        self
    }
}

/// Arguments of [`SessionStore::patch`](crate::SessionStore::patch). Absent
/// fields are left alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchSession {
    /// Session to change.
    pub id: SessionId,
    /// New document path.
    #[serde(default)]
    pub path: Option<String>,
    /// New display name.
    #[serde(default)]
    pub name: Option<String>,
    /// New session kind.
    #[serde(default, rename = "type")]
    pub type_: Option<String>,
    /// Kernel to switch to.
    #[serde(default)]
    pub kernel: Option<KernelRef>,
}

impl PatchSession {
    /// A patch that changes nothing yet.
    pub fn new(id: SessionId) -> Self {
        Self {
            id,
            path: None,
            name: None,
            type_: None,
            kernel: None,
        }
    }

    /// Move the session to `path`.
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Rename the session.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Change the session kind.
    pub fn with_type(mut self, type_: impl Into<String>) -> Self {
        self.type_ = Some(type_.into());
        self
    }

    /// Switch kernels.
    pub fn with_kernel(mut self, kernel: KernelRef) -> Self {
        self.kernel = Some(kernel);
        self
    }
}

/// Kernel working location for a document: its drive prefix plus its
/// directory.
///
/// ```
/// use ferrolite_sessions::location_for;
///
/// assert_eq!(location_for("Drive:dir/a.ipynb"), "Drive:dir");
/// assert_eq!(location_for("/a.ipynb"), "");
/// assert_eq!(location_for("dir/sub/a.ipynb"), "dir/sub");
/// ```
pub fn location_for(path: &str) -> String {
    let (drive, local) = match path.split_once(':') {
        Some((drive, rest)) if !drive.contains('/') => (Some(drive), rest),
        _ => (None, path),
    };
    let local = local.trim_start_matches('/');
    let dir = local.rsplit_once('/').map_or("", |(dir, _)| dir);
    match drive {
        Some(drive) => format!("{drive}:{dir}"),
        None => dir.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn location_of_root_documents() {
        assert_eq!(location_for("a.ipynb"), "");
        assert_eq!(location_for("Drive:a.ipynb"), "Drive:");
        assert_eq!(location_for("Drive:/nested/dir/b.py"), "Drive:nested/dir");
    }

    #[test]
    fn session_type_is_renamed_on_the_wire() {
        let session = Session {
            id: SessionId::new("s1"),
            path: "a.ipynb".into(),
            name: "a.ipynb".into(),
            type_: "notebook".into(),
            kernel: None,
        };
        let wire = serde_json::to_value(&session).unwrap();
        assert_eq!(wire["type"], "notebook");
        assert!(wire.get("type_").is_none());
    }
}
