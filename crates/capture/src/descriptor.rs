use serde::{Serialize, Serializer};
use std::fmt;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    LocalCamera,
    IpStream,
    DroneStream,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::LocalCamera => "local-camera",
            SourceKind::IpStream => "ip-stream",
            SourceKind::DroneStream => "drone-stream",
        }
    }

    fn id_prefix(&self) -> &'static str {
        match self {
            SourceKind::LocalCamera => "local",
            SourceKind::IpStream => "ip",
            SourceKind::DroneStream => "drone",
        }
    }

    /// `local-1`, `ip-3`, ...
    pub(crate) fn source_id(&self, n: usize) -> String {
        format!("{}-{}", self.id_prefix(), n)
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a source's frames come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    /// Platform device handle, e.g. `/dev/video0`.
    Device(String),
    Url(Url),
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Device(handle) => f.write_str(handle),
            Locator::Url(url) => f.write_str(url.as_str()),
        }
    }
}

impl Serialize for Locator {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Immutable description of a video source. Identity is `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceDescriptor {
    pub id: String,
    pub kind: SourceKind,
    pub display_name: String,
    pub locator: Locator,
}

impl SourceDescriptor {
    pub fn is_local(&self) -> bool {
        self.kind == SourceKind::LocalCamera
    }
}
