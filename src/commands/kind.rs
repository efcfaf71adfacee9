use regex::Regex;
use std::sync::OnceLock;

pub const WALLPAPER_PREFIX: &str = "gsettings set org.gnome.desktop.background picture-uri";
pub const SERIAL_NUMBER_QUERY: &str = "sudo dmidecode -t system | grep Serial";
const INSTALL_PREFIXES: &[&str] = &["sudo apt install", "apt install"];

/// What a raw command string turned out to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandKind {
    /// `url` is `None` when the command carried no quoted http(s) URL
    WallpaperSet { url: Option<String> },
    SerialNumberQuery,
    PackageInstall { packages: Vec<String> },
    Generic,
}

/// A classified command. Classification is purely textual and first match wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub raw: String,
    pub kind: CommandKind,
}

impl Command {
    pub fn classify(raw: &str) -> Self {
        let kind = if raw.starts_with(WALLPAPER_PREFIX) {
            CommandKind::WallpaperSet {
                url: extract_wallpaper_url(raw),
            }
        } else if raw == SERIAL_NUMBER_QUERY {
            CommandKind::SerialNumberQuery
        } else if INSTALL_PREFIXES.iter().any(|p| raw.starts_with(p)) {
            CommandKind::PackageInstall {
                packages: parse_package_names(raw),
            }
        } else {
            CommandKind::Generic
        };

        Self {
            raw: raw.to_string(),
            kind,
        }
    }
}

/// First single-quoted http(s) URL in the command.
pub fn extract_wallpaper_url(raw: &str) -> Option<String> {
    static URL_RE: OnceLock<Regex> = OnceLock::new();
    let re = URL_RE.get_or_init(|| {
        Regex::new(r"'(https?://[^']+)'").expect("static regex")
    });
    re.captures(raw).map(|caps| caps[1].to_string())
}

/// Every token after the `install` keyword that is not a flag.
pub fn parse_package_names(raw: &str) -> Vec<String> {
    let tokens: Vec<&str> = raw.split_whitespace().collect();
    let Some(idx) = tokens.iter().position(|t| *t == "install") else {
        return Vec::new();
    };
    tokens[idx + 1..]
        .iter()
        .filter(|t| !t.starts_with('-'))
        .map(|t| t.to_string())
        .collect()
}

/// Name reported when the install command itself failed: the fourth token.
pub fn guess_failed_package(raw: &str) -> String {
    raw.split_whitespace()
        .nth(3)
        .unwrap_or("unknown")
        .to_string()
}

/// Pull the value out of a `Serial Number: XYZ` line.
pub fn parse_serial_number(stdout: &str) -> Option<String> {
    static SERIAL_RE: OnceLock<Regex> = OnceLock::new();
    let re = SERIAL_RE.get_or_init(|| {
        Regex::new(r"Serial Number:\s*(.+)").expect("static regex")
    });
    re.captures(stdout)
        .map(|caps| caps[1].trim().to_string())
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_wallpaper_with_url() {
        let cmd = Command::classify(
            "gsettings set org.gnome.desktop.background picture-uri 'https://x/y.png'",
        );
        assert_eq!(
            cmd.kind,
            CommandKind::WallpaperSet {
                url: Some("https://x/y.png".to_string())
            }
        );
    }

    #[test]
    fn wallpaper_without_quoted_url_has_no_url() {
        let cmd = Command::classify(
            "gsettings set org.gnome.desktop.background picture-uri file:///tmp/a.png",
        );
        assert_eq!(cmd.kind, CommandKind::WallpaperSet { url: None });
    }

    #[test]
    fn first_quoted_url_wins() {
        let url = extract_wallpaper_url("x 'http://a/1.jpg' 'https://b/2.jpg'");
        assert_eq!(url.as_deref(), Some("http://a/1.jpg"));
    }

    #[test]
    fn classifies_package_install() {
        let cmd = Command::classify("sudo apt install -y curl jq");
        assert_eq!(
            cmd.kind,
            CommandKind::PackageInstall {
                packages: vec!["curl".to_string(), "jq".to_string()]
            }
        );

        let cmd = Command::classify("apt install vlc");
        assert_eq!(
            cmd.kind,
            CommandKind::PackageInstall {
                packages: vec!["vlc".to_string()]
            }
        );
    }

    #[test]
    fn classifies_serial_query_only_on_exact_text() {
        assert_eq!(
            Command::classify(SERIAL_NUMBER_QUERY).kind,
            CommandKind::SerialNumberQuery
        );
        assert_eq!(
            Command::classify("sudo dmidecode -t system").kind,
            CommandKind::Generic
        );
    }

    #[test]
    fn everything_else_is_generic() {
        for raw in ["ls -la", "apt-get install curl", "sudo apt update", ""] {
            assert_eq!(Command::classify(raw).kind, CommandKind::Generic, "{raw}");
        }
    }

    #[test]
    fn failed_package_guess_uses_fourth_token() {
        assert_eq!(guess_failed_package("sudo apt install curl"), "curl");
        assert_eq!(guess_failed_package("apt install -y"), "unknown");
    }

    #[test]
    fn serial_parsing() {
        let out = "\tSerial Number: PF2ABCDE  \n\tUUID: 1234";
        assert_eq!(parse_serial_number(out).as_deref(), Some("PF2ABCDE"));
        assert_eq!(parse_serial_number("nothing here"), None);
    }
}
