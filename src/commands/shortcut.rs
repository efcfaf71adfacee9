use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::agent::config::ExecutorSettings;

/// Writes `.desktop` launchers for freshly installed programs.
#[derive(Debug, Clone)]
pub struct ShortcutWriter {
    desktop_dir: PathBuf,
    icon_dir: PathBuf,
    fallback_icon: PathBuf,
}

impl ShortcutWriter {
    pub fn new(desktop_dir: PathBuf, icon_dir: PathBuf, fallback_icon: PathBuf) -> Self {
        Self {
            desktop_dir,
            icon_dir,
            fallback_icon,
        }
    }

    pub fn from_settings(settings: &ExecutorSettings) -> Self {
        Self::new(
            settings.desktop_dir(),
            settings.icon_dir.clone(),
            settings.fallback_icon.clone(),
        )
    }

    pub fn launcher_path(&self, name: &str) -> PathBuf {
        self.desktop_dir.join(format!("{name}.desktop"))
    }

    /// The package's own 48px icon when installed, otherwise the fallback.
    pub async fn icon_for(&self, name: &str) -> PathBuf {
        let candidate = self.icon_dir.join(format!("{name}.png"));
        if tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
            candidate
        } else {
            self.fallback_icon.clone()
        }
    }

    pub fn render(exec_path: &Path, name: &str, icon: &Path) -> String {
        format!(
            "[Desktop Entry]\n\
             Type=Application\n\
             Name={name}\n\
             Exec={exec}\n\
             Icon={icon}\n\
             Terminal=false\n\
             Categories=Utility;\n\
             StartupNotify=false\n",
            exec = exec_path.display(),
            icon = icon.display(),
        )
    }

    /// Write the launcher and mark it executable.
    pub async fn create(&self, exec_path: &Path, name: &str) -> Result<PathBuf> {
        let icon = self.icon_for(name).await;
        let path = self.launcher_path(name);

        tokio::fs::create_dir_all(&self.desktop_dir)
            .await
            .with_context(|| format!("creating {}", self.desktop_dir.display()))?;
        tokio::fs::write(&path, Self::render(exec_path, name, &icon))
            .await
            .with_context(|| format!("writing {}", path.display()))?;
        make_executable(&path).await?;

        info!(shortcut = %path.display(), exec = %exec_path.display(), "desktop shortcut created");
        Ok(path)
    }
}

#[cfg(unix)]
async fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
        .await
        .with_context(|| format!("setting executable bit on {}", path.display()))
}

#[cfg(not(unix))]
async fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn writes_launcher_with_fallback_icon() {
        let desktop = tempdir().unwrap();
        let icons = tempdir().unwrap();
        let writer = ShortcutWriter::new(
            desktop.path().to_path_buf(),
            icons.path().to_path_buf(),
            PathBuf::from("/fallback.png"),
        );

        let path = writer
            .create(Path::new("/usr/bin/vlc"), "vlc")
            .await
            .unwrap();
        let body = std::fs::read_to_string(&path).unwrap();

        assert_eq!(path, desktop.path().join("vlc.desktop"));
        assert!(body.starts_with("[Desktop Entry]\n"));
        assert!(body.contains("Type=Application\n"));
        assert!(body.contains("Name=vlc\n"));
        assert!(body.contains("Exec=/usr/bin/vlc\n"));
        assert!(body.contains("Icon=/fallback.png\n"));
        assert!(body.contains("Terminal=false\n"));
        assert!(body.contains("Categories=Utility;\n"));

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o111, 0o111);
        }
    }

    #[tokio::test]
    async fn prefers_package_icon_when_present() {
        let desktop = tempdir().unwrap();
        let icons = tempdir().unwrap();
        std::fs::write(icons.path().join("gimp.png"), b"png").unwrap();
        let writer = ShortcutWriter::new(
            desktop.path().to_path_buf(),
            icons.path().to_path_buf(),
            PathBuf::from("/fallback.png"),
        );

        assert_eq!(writer.icon_for("gimp").await, icons.path().join("gimp.png"));
        assert_eq!(writer.icon_for("jq").await, PathBuf::from("/fallback.png"));
    }

    #[tokio::test]
    async fn unwritable_desktop_is_an_error() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"x").unwrap();
        let writer = ShortcutWriter::new(
            blocker.join("Desktop"),
            dir.path().to_path_buf(),
            PathBuf::from("/fallback.png"),
        );

        assert!(writer.create(Path::new("/usr/bin/jq"), "jq").await.is_err());
    }
}
