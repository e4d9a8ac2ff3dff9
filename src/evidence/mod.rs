//! Evidence descriptors and the registry that validates and records them.
//!
//! Evidence is content-addressed: the id is derived from kind, locator and
//! checksum, so registering the same descriptor twice yields the same id.

mod registry;

pub use registry::EvidenceRegistry;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Content-derived evidence identifier (32 lowercase hex characters).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EvidenceId(String);

impl EvidenceId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for EvidenceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for EvidenceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Supported evidence types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EvidenceKind {
    #[serde(rename = "rawdisk")]
    RawDisk,
    #[serde(rename = "directory")]
    Directory,
    #[serde(rename = "compresseddirectory")]
    CompressedDirectory,
    #[serde(rename = "ewfdisk")]
    EwfDisk,
    #[serde(rename = "googlecloud-disk")]
    GoogleCloudDisk,
    #[serde(rename = "googlecloud-disk-embedded")]
    GoogleCloudDiskRawEmbedded,
    #[serde(rename = "rawmemory")]
    RawMemory,
    #[serde(rename = "bodyfile")]
    BodyFile,
    #[serde(rename = "docker-container")]
    DockerContainer,
    #[serde(rename = "containerd-container")]
    ContainerdContainer,
    #[serde(rename = "chromium-profile")]
    ChromiumProfile,
    #[serde(rename = "disk-partition")]
    DiskPartition,
    #[serde(rename = "textfile")]
    TextFile,
}

impl EvidenceKind {
    pub const ALL: [EvidenceKind; 13] = [
        EvidenceKind::RawDisk,
        EvidenceKind::Directory,
        EvidenceKind::CompressedDirectory,
        EvidenceKind::EwfDisk,
        EvidenceKind::GoogleCloudDisk,
        EvidenceKind::GoogleCloudDiskRawEmbedded,
        EvidenceKind::RawMemory,
        EvidenceKind::BodyFile,
        EvidenceKind::DockerContainer,
        EvidenceKind::ContainerdContainer,
        EvidenceKind::ChromiumProfile,
        EvidenceKind::DiskPartition,
        EvidenceKind::TextFile,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EvidenceKind::RawDisk => "rawdisk",
            EvidenceKind::Directory => "directory",
            EvidenceKind::CompressedDirectory => "compresseddirectory",
            EvidenceKind::EwfDisk => "ewfdisk",
            EvidenceKind::GoogleCloudDisk => "googlecloud-disk",
            EvidenceKind::GoogleCloudDiskRawEmbedded => "googlecloud-disk-embedded",
            EvidenceKind::RawMemory => "rawmemory",
            EvidenceKind::BodyFile => "bodyfile",
            EvidenceKind::DockerContainer => "docker-container",
            EvidenceKind::ContainerdContainer => "containerd-container",
            EvidenceKind::ChromiumProfile => "chromium-profile",
            EvidenceKind::DiskPartition => "disk-partition",
            EvidenceKind::TextFile => "textfile",
        }
    }

    /// Attributes that must be present (and non-empty) for this kind.
    pub fn required_attributes(&self) -> &'static [&'static str] {
        match self {
            EvidenceKind::GoogleCloudDisk => &["project", "zone"],
            EvidenceKind::GoogleCloudDiskRawEmbedded => &["project", "zone", "embedded_path"],
            _ => &[],
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            EvidenceKind::RawDisk => "Raw disk image file",
            EvidenceKind::Directory => "Directory on a shared filesystem",
            EvidenceKind::CompressedDirectory => "Compressed tarball of a directory",
            EvidenceKind::EwfDisk => "Expert Witness Format disk image",
            EvidenceKind::GoogleCloudDisk => "Google Cloud persistent disk",
            EvidenceKind::GoogleCloudDiskRawEmbedded => {
                "Raw disk image embedded in a Google Cloud persistent disk"
            }
            EvidenceKind::RawMemory => "Raw memory image",
            EvidenceKind::BodyFile => "Bodyfile timeline",
            EvidenceKind::DockerContainer => "Docker container filesystem",
            EvidenceKind::ContainerdContainer => "containerd container filesystem",
            EvidenceKind::ChromiumProfile => "Chromium browser profile",
            EvidenceKind::DiskPartition => "Single partition of a disk image",
            EvidenceKind::TextFile => "Plain text file",
        }
    }
}

impl std::fmt::Display for EvidenceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EvidenceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        EvidenceKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == wanted)
            .ok_or_else(|| format!("unrecognized evidence kind '{}'", s))
    }
}

/// Evidence as submitted by a client, before validation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvidenceDescriptor {
    pub kind: String,
    #[serde(alias = "locator", alias = "source_path")]
    pub source_locator: String,
    #[serde(default)]
    pub checksum: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl EvidenceDescriptor {
    pub fn new(kind: impl Into<String>, source_locator: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            source_locator: source_locator.into(),
            ..Self::default()
        }
    }

    pub fn with_checksum(mut self, checksum: impl Into<String>) -> Self {
        self.checksum = Some(checksum.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// A registered, immutable evidence record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub id: EvidenceId,
    pub kind: EvidenceKind,
    pub source_locator: String,
    pub checksum: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
}

impl Evidence {
    /// Display name, falling back to the locator.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.source_locator)
    }
}
