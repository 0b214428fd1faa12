use crate::error::FramebotError;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{de, Deserialize, Deserializer};

/// Everything a run needs to know, read once at startup.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub season: u32,
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,
    #[serde(default = "default_log_file")]
    pub log_file: Option<PathBuf>,
    #[serde(default = "default_outbox_dir")]
    pub outbox_dir: PathBuf,
    #[serde(default)]
    pub posting: PostingConfig,
    #[serde(default)]
    pub selection: SelectionConfig,
    pub episodes: BTreeMap<u32, EpisodeConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PostingConfig {
    /// Placeholders: `{season}`, `{episode}`, `{frame}`, `{timestamp}`.
    pub msg_single_frame: String,
    /// Attach the matching subtitles to the post.
    pub posting_subtitles: bool,
    /// Use every subtitle track of an episode instead of only the first one.
    pub multi_language_subtitles: bool,
}

impl Default for PostingConfig {
    fn default() -> Self {
        Self {
            msg_single_frame: "Season {season}, Episode {episode}, Frame {frame} ({timestamp})"
                .to_string(),
            posting_subtitles: true,
            multi_language_subtitles: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SelectionConfig {
    #[serde(deserialize_with = "human_duration")]
    pub exclusion_window: Duration,
    /// The history is cleared once it holds this many records.
    pub history_limit: usize,
    /// Clear the history when no episode has an eligible frame left.
    pub reset_when_exhausted: bool,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            exclusion_window: Duration::from_secs(5),
            history_limit: 5000,
            reset_when_exhausted: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EpisodeConfig {
    #[serde(deserialize_with = "human_duration")]
    pub duration: Duration,
    pub img_fps: f64,
    /// Directory holding the extracted frames, named by frame number (`0042.jpg`).
    pub frames_dir: PathBuf,
    /// Number of the image showing the very start of the episode.
    #[serde(default = "default_first_frame")]
    pub first_frame: u64,
    pub subtitles_dir: Option<PathBuf>,
}

fn default_state_file() -> PathBuf {
    PathBuf::from("temp/frame_history.json")
}

fn default_log_file() -> Option<PathBuf> {
    Some(PathBuf::from("logs/app.log"))
}

fn default_first_frame() -> u64 {
    1
}

fn default_outbox_dir() -> PathBuf {
    PathBuf::from("outbox")
}

fn human_duration<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    let raw = String::deserialize(deserializer)?;
    humantime::parse_duration(&raw).map_err(de::Error::custom)
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to open config file: '{}'", path.display()))?;
        Self::from_yaml(&raw)
            .with_context(|| format!("Failed to load config file: '{}'", path.display()))
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(raw).context("Invalid YAML")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), FramebotError> {
        if self.episodes.is_empty() {
            return Err(FramebotError::Config("no episodes configured".to_string()));
        }
        for (number, episode) in &self.episodes {
            if !episode.img_fps.is_finite() || episode.img_fps <= 0.0 {
                return Err(FramebotError::Config(format!(
                    "episode {} has an invalid img_fps of {}",
                    number, episode.img_fps
                )));
            }
            if episode.duration == Duration::ZERO {
                return Err(FramebotError::Config(format!(
                    "episode {} has no duration",
                    number
                )));
            }
            // Offsets within one frame of a posted one would post the same image again.
            if self.selection.exclusion_window.as_secs_f64() * episode.img_fps < 1.0 {
                return Err(FramebotError::Config(format!(
                    "selection.exclusion_window of {} is shorter than a frame of episode {}",
                    humantime::format_duration(self.selection.exclusion_window),
                    number
                )));
            }
        }
        if self.selection.history_limit == 0 {
            return Err(FramebotError::Config(
                "selection.history_limit must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
season: 2
state_file: state/history.json
log_file: ~
outbox_dir: out
posting:
  msg_single_frame: "S{season}E{episode} {frame}"
  posting_subtitles: false
  multi_language_subtitles: true
selection:
  exclusion_window: 1m 30s
  history_limit: 10
  reset_when_exhausted: false
episodes:
  1:
    duration: 24m 10s
    img_fps: 2
    frames_dir: frames/01
    subtitles_dir: subtitles/01
  2:
    duration: 23m
    img_fps: 23.976
    frames_dir: frames/02
    first_frame: 0
"#;

    #[test]
    fn parses_full_config() {
        let config = Config::from_yaml(FULL).unwrap();

        assert_eq!(config.season, 2);
        assert_eq!(config.state_file, PathBuf::from("state/history.json"));
        assert_eq!(config.log_file, None);
        assert!(!config.posting.posting_subtitles);
        assert!(config.posting.multi_language_subtitles);
        assert_eq!(config.selection.exclusion_window, Duration::from_secs(90));
        assert_eq!(config.selection.history_limit, 10);
        assert_eq!(config.episodes.len(), 2);
        assert_eq!(config.episodes[&1].duration, Duration::from_secs(1450));
        assert_eq!(config.episodes[&2].subtitles_dir, None);
        assert_eq!(config.episodes[&1].first_frame, 1);
        assert_eq!(config.episodes[&2].first_frame, 0);
    }

    #[test]
    fn applies_defaults() {
        let config = Config::from_yaml(
            "episodes:\n  1:\n    duration: 10s\n    img_fps: 1\n    frames_dir: f\n",
        )
        .unwrap();

        assert_eq!(config.season, 0);
        assert_eq!(config.state_file, default_state_file());
        assert_eq!(config.log_file, default_log_file());
        assert_eq!(config.selection.exclusion_window, Duration::from_secs(5));
        assert_eq!(config.selection.history_limit, 5000);
        assert!(config.posting.posting_subtitles);
        assert_eq!(config.episodes[&1].first_frame, 1);
    }

    #[test]
    fn exclusion_window_spans_at_least_a_frame() {
        let episode = |window: &str, fps: &str| {
            Config::from_yaml(&format!(
                "selection:\n  exclusion_window: {}\nepisodes:\n  1:\n    duration: 10s\n    img_fps: {}\n    frames_dir: f\n",
                window, fps
            ))
        };

        assert!(episode("0s", "1").is_err());
        assert!(episode("999ms", "1").is_err());
        assert!(episode("1s", "1").is_ok());
        assert!(episode("41ms", "23.976").is_err());
        assert!(episode("42ms", "23.976").is_ok());
    }

    #[test]
    fn rejects_invalid_configs() {
        assert!(Config::from_yaml("season: 1\n").is_err());
        assert!(Config::from_yaml("episodes: {}\n").is_err());
        assert!(Config::from_yaml(
            "episodes:\n  1:\n    duration: 10s\n    img_fps: 0\n    frames_dir: f\n"
        )
        .is_err());
        assert!(Config::from_yaml(
            "episodes:\n  1:\n    duration: ten seconds\n    img_fps: 1\n    frames_dir: f\n"
        )
        .is_err());
        assert!(Config::from_yaml(
            "episodes:\n  1:\n    duration: 10s\n    img_fps: 1\n    frames_dir: f\n    colour: red\n"
        )
        .is_err());
    }
}
