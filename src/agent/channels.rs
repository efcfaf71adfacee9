use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Where the connection manager gets the channel list for each subscribe.
pub trait ChannelSource: Send + Sync {
    fn current_channels(&self) -> Vec<String>;
}

impl ChannelSource for Vec<String> {
    fn current_channels(&self) -> Vec<String> {
        self.clone()
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelFile {
    #[serde(default)]
    current_channel: Vec<String>,
}

/// Persisted subscription list (`{"currentChannel": [...]}`).
#[derive(Debug, Clone)]
pub struct ChannelStore {
    path: PathBuf,
}

impl ChannelStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Empty when the file is missing or unreadable.
    pub fn current(&self) -> Vec<String> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) => {
                debug!(path = %self.path.display(), error = %e, "no channel file");
                return Vec::new();
            }
        };
        match serde_json::from_str::<ChannelFile>(&raw) {
            Ok(file) => file.current_channel,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "channel file is corrupt");
                Vec::new()
            }
        }
    }

    pub fn set(&self, channels: &[String]) -> Result<()> {
        self.write(channels)?;
        info!(channels = ?channels, "channel list saved");
        Ok(())
    }

    /// Delete the file. Already gone is fine.
    pub fn reset(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                info!(path = %self.path.display(), "channel list reset");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("removing {}", self.path.display())),
        }
    }

    /// First-run bootstrap: create the file with an empty list.
    pub fn ensure_exists(&self) -> Result<()> {
        if self.path.exists() {
            return Ok(());
        }
        self.write(&[])
    }

    fn write(&self, channels: &[String]) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let body = serde_json::to_string_pretty(&ChannelFile {
            current_channel: channels.to_vec(),
        })?;
        std::fs::write(&self.path, body)
            .with_context(|| format!("writing {}", self.path.display()))
    }
}

impl ChannelSource for ChannelStore {
    fn current_channels(&self) -> Vec<String> {
        self.current()
    }
}

/// Split a comma separated list, trimming whitespace and dropping empties.
pub fn parse_channel_list(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
