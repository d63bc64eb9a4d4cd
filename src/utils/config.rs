use anyhow::{bail, Context, Result};
use clap::ValueEnum;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::renderer::DisplayMode;
use crate::shared::constants;

/// Settings read from a `key = value` config file. Unset keys stay `None`.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct FileConfig {
    pub capacity: Option<usize>,
    pub mode: Option<DisplayMode>,
    pub exit_on_end: Option<bool>,
    pub headless: Option<bool>,
    pub log_dir: Option<PathBuf>,
    /// Keys this build does not know about, kept so they can be logged.
    pub unknown_keys: Vec<String>,
}

impl FileConfig {
    /// Reads `path`. A missing file is an error only when `required` is set.
    pub fn load(path: &Path, required: bool) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(content) => {
                Self::parse(&content).with_context(|| format!("invalid config {}", path.display()))
            }
            Err(e) if e.kind() == ErrorKind::NotFound && !required => Ok(Self::default()),
            Err(e) => Err(e).with_context(|| format!("failed to read {}", path.display())),
        }
    }

    pub fn parse(content: &str) -> Result<Self> {
        let mut config = Self::default();

        for (idx, line) in content.lines().enumerate() {
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                bail!("line {}: expected `key = value`, got `{}`", idx + 1, line);
            };
            let (key, value) = (key.trim(), value.trim());

            let parsed = match key {
                "capacity" => value
                    .parse::<usize>()
                    .ok()
                    .filter(|c| (1..=constants::MAX_RING_CAPACITY).contains(c))
                    .map(|c| config.capacity = Some(c)),
                "mode" => DisplayMode::from_str(value, true)
                    .ok()
                    .map(|m| config.mode = Some(m)),
                "exit-on-end" => parse_bool(value).map(|b| config.exit_on_end = Some(b)),
                "headless" => parse_bool(value).map(|b| config.headless = Some(b)),
                "log-dir" if !value.is_empty() => {
                    config.log_dir = Some(PathBuf::from(value));
                    Some(())
                }
                _ => {
                    config.unknown_keys.push(key.to_string());
                    Some(())
                }
            };

            if parsed.is_none() {
                bail!("line {}: invalid value `{}` for `{}`", idx + 1, value, key);
            }
        }

        Ok(config)
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Some(true),
        "false" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_keys_and_comments() {
        let config = FileConfig::parse(
            "# player settings\n\
             capacity = 4\n\
             mode = ascii   # cheaper terminals\n\
             \n\
             exit-on-end = no\n\
             headless=true\n\
             log-dir = /tmp/fr\n\
             font-size = 12\n",
        )
        .unwrap();

        assert_eq!(config.capacity, Some(4));
        assert_eq!(config.mode, Some(DisplayMode::Ascii));
        assert_eq!(config.exit_on_end, Some(false));
        assert_eq!(config.headless, Some(true));
        assert_eq!(config.log_dir, Some(PathBuf::from("/tmp/fr")));
        assert_eq!(config.unknown_keys, vec!["font-size".to_string()]);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(FileConfig::parse("capacity = 0").is_err());
        assert!(FileConfig::parse("capacity = 1025").is_err());
        assert!(FileConfig::parse("capacity = 4000000000").is_err());
        assert_eq!(FileConfig::parse("capacity = 1024").unwrap().capacity, Some(1024));
        assert!(FileConfig::parse("capacity = lots").is_err());
        assert!(FileConfig::parse("mode = sixel").is_err());
        assert!(FileConfig::parse("just words").is_err());
    }

    #[test]
    fn missing_file_is_only_fatal_when_required() {
        let path = std::env::temp_dir().join("framering-does-not-exist.config");
        assert_eq!(FileConfig::load(&path, false).unwrap(), FileConfig::default());
        assert!(FileConfig::load(&path, true).is_err());
    }

    #[test]
    fn loads_from_disk() {
        let path = std::env::temp_dir().join(format!("framering-{}.config", std::process::id()));
        fs::write(&path, "capacity = 7\n").unwrap();

        let config = FileConfig::load(&path, true).unwrap();
        let _ = fs::remove_file(&path);

        assert_eq!(config.capacity, Some(7));
        assert_eq!(config.mode, None);
    }
}
