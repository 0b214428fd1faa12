use crate::caption;
use crate::config::{Config, EpisodeConfig};
use crate::error::FramebotError;
use crate::matcher::captions_at;
use crate::poster::{Post, Poster};
use crate::selector::{select_frame, FrameCandidate};
use crate::state::{RunRecord, RunStateStore};
use crate::subtitle::SubtitleLibrary;
use crate::template;
use crate::timecode::{format_timecode, offset_to_frame};

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use chrono::{SubsecRound, Utc};
use rand::seq::SliceRandom;
use rand::Rng;

/// Result of a successful run.
#[derive(Debug)]
pub struct Published {
    pub id: String,
    pub post: Post,
    pub record: RunRecord,
}

/// Runs one scheduled invocation: pick a frame, caption it, post it and
/// remember it.
pub struct Orchestrator<'a, P> {
    config: &'a Config,
    poster: P,
    dry_run: bool,
}

impl<'a, P: Poster> Orchestrator<'a, P> {
    pub fn new(config: &'a Config, poster: P) -> Self {
        Self {
            config,
            poster,
            dry_run: false,
        }
    }

    /// Posts without recording anything in the history.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn run_once<R: Rng + ?Sized>(
        &mut self,
        store: &mut RunStateStore,
        rng: &mut R,
    ) -> Result<Published> {
        if store.len() >= self.config.selection.history_limit {
            log::info!(
                "History holds {} frames, the limit is {}; starting over",
                store.len(),
                self.config.selection.history_limit
            );
            store.clear();
        }

        let (number, episode, candidate) = match self.pick(store, rng) {
            Err(FramebotError::NoEligibleFrame { .. })
                if self.config.selection.reset_when_exhausted && !store.is_empty() =>
            {
                log::warn!("Every frame has been posted recently, clearing the history");
                store.clear();
                self.pick(store, rng)?
            }
            other => other?,
        };

        let frame = offset_to_frame(candidate.offset, episode.img_fps)
            .and_then(|frame| frame.checked_add(episode.first_frame))
            .ok_or_else(|| anyhow!("Episode {} has an invalid frame rate", number))?;
        let image = frame_image(episode, frame);
        if !image.is_file() {
            return Err(anyhow!(
                "Frame {} of episode {} not found at '{}'",
                frame,
                number,
                image.display()
            ));
        }

        let timestamp = format_timecode(candidate.offset);
        let caption = self.caption(episode, candidate)?;
        let message = self.message(number, frame, &timestamp);
        let post = Post {
            episode: number,
            frame,
            timestamp,
            message,
            image,
            caption,
        };

        let id = self
            .poster
            .publish(&post)
            .with_context(|| format!("Failed to post frame {} of episode {}", frame, number))?;
        log::info!("Posted episode {} frame {} as {}", number, frame, id);

        let record = RunRecord::new(number, candidate.offset, Utc::now().trunc_subsecs(0));
        if !self.dry_run {
            store.append(record.clone());
            store.persist().context("Failed to save the frame history")?;
        }
        Ok(Published { id, post, record })
    }

    /// Tries the episodes in random order until one has an eligible frame left.
    fn pick<R: Rng + ?Sized>(
        &self,
        store: &RunStateStore,
        rng: &mut R,
    ) -> Result<(u32, &'a EpisodeConfig, FrameCandidate), FramebotError> {
        let config: &'a Config = self.config;
        let mut episodes: Vec<(&u32, &'a EpisodeConfig)> = config.episodes.iter().collect();
        episodes.shuffle(rng);

        let window = config.selection.exclusion_window;
        let mut last_err = None;
        for (&number, episode) in episodes {
            match select_frame(episode.duration, store.offsets_for(number), window, rng) {
                Ok(candidate) => return Ok((number, episode, candidate)),
                Err(err) => {
                    log::debug!("Episode {}: {}", number, err);
                    last_err = Some(err);
                }
            }
        }
        Err(last_err.unwrap_or(FramebotError::Config("no episodes configured".to_string())))
    }

    fn caption(&self, episode: &EpisodeConfig, candidate: FrameCandidate) -> Result<Option<String>> {
        if !self.config.posting.posting_subtitles {
            return Ok(None);
        }
        let dir = match &episode.subtitles_dir {
            Some(dir) => dir,
            None => return Ok(None),
        };
        let library = SubtitleLibrary::load_dir(dir)?;
        if library.is_empty() {
            log::warn!("Subtitles are enabled, but none were found in '{}'", dir.display());
            return Ok(None);
        }

        let mut matches = captions_at(&library, candidate.offset);
        if !self.config.posting.multi_language_subtitles {
            // The first language, whether or not it has anything to say at this offset.
            let first = library.tracks().next().map(|t| t.language_tag());
            matches.retain(|(track, _)| Some(track.language_tag()) == first);
        }
        Ok(caption::compose(matches))
    }

    fn message(&self, episode: u32, frame: u64, timestamp: &str) -> String {
        let mut values = HashMap::new();
        values.insert("season", self.config.season.to_string());
        values.insert("episode", episode.to_string());
        values.insert("frame", frame.to_string());
        values.insert("timestamp", timestamp.to_string());
        template::render(&self.config.posting.msg_single_frame, &values)
    }
}

fn frame_image(episode: &EpisodeConfig, frame: u64) -> PathBuf {
    episode.frames_dir.join(format!("{:04}.jpg", frame))
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::path::Path;
    use std::time::Duration;

    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[derive(Default)]
    struct RecordingPoster {
        posts: Vec<Post>,
    }

    impl Poster for RecordingPoster {
        fn publish(&mut self, post: &Post) -> Result<String> {
            self.posts.push(post.clone());
            Ok(format!("post-{}", self.posts.len()))
        }
    }

    struct FailingPoster;

    impl Poster for FailingPoster {
        fn publish(&mut self, _post: &Post) -> Result<String> {
            Err(anyhow!("the network is down"))
        }
    }

    /// One episode of `seconds` seconds at one frame per second, with a frame
    /// image for every second numbered from 1 and an English track covering
    /// all of it.
    fn setup(root: &Path, seconds: u64, extra: &str) -> Config {
        let frames = root.join("frames");
        std::fs::create_dir_all(&frames).unwrap();
        for frame in 1..=seconds {
            std::fs::write(frames.join(format!("{:04}.jpg", frame)), b"jpg").unwrap();
        }
        let subs = root.join("subtitles");
        std::fs::create_dir_all(&subs).unwrap();
        std::fs::write(
            subs.join("ep01.en.srt"),
            format!(
                "1\n00:00:00,000 --> 00:{:02}:{:02},000\nHello there\n",
                seconds / 60,
                seconds % 60
            ),
        )
        .unwrap();

        let yaml = format!(
            "season: 1
state_file: {root}/temp/history.json
posting:
  msg_single_frame: \"S{{season}}E{{episode}} frame {{frame}} at {{timestamp}}\"
{extra}
episodes:
  1:
    duration: {seconds}s
    img_fps: 1
    frames_dir: {root}/frames
    subtitles_dir: {root}/subtitles
",
            root = root.display(),
            seconds = seconds,
            extra = extra,
        );
        Config::from_yaml(&yaml).unwrap()
    }

    #[test]
    fn posts_a_captioned_frame_and_records_it() {
        let dir = tempfile::tempdir().unwrap();
        let config = setup(dir.path(), 10, "");
        let mut store = RunStateStore::load(&config.state_file);
        let mut poster = RecordingPoster::default();
        let mut rng = StdRng::seed_from_u64(5);

        let published = Orchestrator::new(&config, &mut poster)
            .run_once(&mut store, &mut rng)
            .unwrap();

        assert_eq!(published.id, "post-1");
        let post = &published.post;
        assert_eq!(post.episode, 1);
        assert!((1..=10).contains(&post.frame));
        assert_eq!(
            post.message,
            format!("S1E1 frame {} at {}", post.frame, post.timestamp)
        );
        assert_eq!(
            post.caption.as_deref(),
            Some("Subtitles:\n[English]\nHello there")
        );
        assert!(post.image.ends_with(format!("{:04}.jpg", post.frame)));

        let reloaded = RunStateStore::load(&config.state_file);
        assert_eq!(reloaded.len(), 1);
        assert!(reloaded.contains(1, published.record.offset));
        assert_eq!(poster.posts.len(), 1);
    }

    #[test]
    fn failed_post_leaves_history_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let config = setup(dir.path(), 10, "");
        let mut store = RunStateStore::load(&config.state_file);
        let mut rng = StdRng::seed_from_u64(5);

        let result = Orchestrator::new(&config, FailingPoster).run_once(&mut store, &mut rng);

        assert!(result.is_err());
        assert!(store.is_empty());
        assert!(!config.state_file.exists());
    }

    #[test]
    fn dry_run_does_not_record() {
        let dir = tempfile::tempdir().unwrap();
        let config = setup(dir.path(), 10, "");
        let mut store = RunStateStore::load(&config.state_file);
        let mut poster = RecordingPoster::default();
        let mut rng = StdRng::seed_from_u64(5);

        Orchestrator::new(&config, &mut poster)
            .dry_run(true)
            .run_once(&mut store, &mut rng)
            .unwrap();

        assert!(store.is_empty());
        assert!(!config.state_file.exists());
    }

    #[test]
    fn consecutive_runs_keep_their_distance() {
        let dir = tempfile::tempdir().unwrap();
        let config = setup(
            dir.path(),
            60,
            "selection:\n  exclusion_window: 10s\n  reset_when_exhausted: false\n",
        );
        let mut store = RunStateStore::load(&config.state_file);
        let mut poster = RecordingPoster::default();
        let mut rng = StdRng::seed_from_u64(11);

        for _ in 0..3 {
            Orchestrator::new(&config, &mut poster)
                .run_once(&mut store, &mut rng)
                .unwrap();
        }

        let offsets: Vec<Duration> = store.offsets_for(1).collect();
        assert_eq!(offsets.len(), 3);
        for pair in offsets.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_secs(10));
        }
    }

    #[test]
    fn exhausted_history_is_cleared_when_allowed() {
        let dir = tempfile::tempdir().unwrap();
        let config = setup(dir.path(), 1, "selection:\n  exclusion_window: 5s\n");
        let mut store = RunStateStore::load(&config.state_file);
        store.append(RunRecord::new(1, Duration::from_millis(400), Utc::now()));
        let mut poster = RecordingPoster::default();
        let mut rng = StdRng::seed_from_u64(2);

        let published = Orchestrator::new(&config, &mut poster)
            .run_once(&mut store, &mut rng)
            .unwrap();

        assert_eq!(published.post.frame, 1);
        assert_eq!(store.len(), 1);
        assert!(store.contains(1, published.record.offset));
    }

    #[test]
    fn exhausted_history_is_an_error_otherwise() {
        let dir = tempfile::tempdir().unwrap();
        let config = setup(
            dir.path(),
            1,
            "selection:\n  exclusion_window: 5s\n  reset_when_exhausted: false\n",
        );
        let mut store = RunStateStore::load(&config.state_file);
        store.append(RunRecord::new(1, Duration::from_millis(400), Utc::now()));
        let mut poster = RecordingPoster::default();
        let mut rng = StdRng::seed_from_u64(2);

        let err = Orchestrator::new(&config, &mut poster)
            .run_once(&mut store, &mut rng)
            .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<FramebotError>(),
            Some(FramebotError::NoEligibleFrame { .. })
        ));
        assert_eq!(store.len(), 1);
        assert!(poster.posts.is_empty());
    }

    #[test]
    fn every_frame_of_a_one_based_directory_is_reachable() {
        let dir = tempfile::tempdir().unwrap();
        let config = setup(dir.path(), 10, "");
        let mut store = RunStateStore::load(&config.state_file);
        let mut poster = RecordingPoster::default();
        let mut rng = StdRng::seed_from_u64(3);

        for _ in 0..200 {
            Orchestrator::new(&config, &mut poster)
                .dry_run(true)
                .run_once(&mut store, &mut rng)
                .unwrap();
        }

        let mut frames: Vec<u64> = poster.posts.iter().map(|p| p.frame).collect();
        frames.sort_unstable();
        frames.dedup();
        assert_eq!(frames, (1..=10).collect::<Vec<_>>());
    }

    #[test]
    fn zero_based_frame_directories() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = setup(dir.path(), 10, "");
        let frames = dir.path().join("frames");
        std::fs::write(frames.join("0000.jpg"), b"jpg").unwrap();
        std::fs::remove_file(frames.join("0010.jpg")).unwrap();
        config.episodes.get_mut(&1).unwrap().first_frame = 0;
        let mut store = RunStateStore::load(&config.state_file);
        let mut poster = RecordingPoster::default();
        let mut rng = StdRng::seed_from_u64(4);

        for _ in 0..100 {
            Orchestrator::new(&config, &mut poster)
                .dry_run(true)
                .run_once(&mut store, &mut rng)
                .unwrap();
        }

        assert!(poster.posts.iter().all(|p| p.frame < 10));
    }

    #[test]
    fn unreadable_track_is_left_out_of_the_caption() {
        let dir = tempfile::tempdir().unwrap();
        let config = setup(dir.path(), 10, "  multi_language_subtitles: true\n");
        std::fs::write(
            dir.path().join("subtitles").join("ep01.pt.srt"),
            b"1\n00:00:00,000 --> 00:00:10,000\nOl\xe1\n",
        )
        .unwrap();
        let mut store = RunStateStore::load(&config.state_file);
        let mut poster = RecordingPoster::default();
        let mut rng = StdRng::seed_from_u64(5);

        let published = Orchestrator::new(&config, &mut poster)
            .run_once(&mut store, &mut rng)
            .unwrap();

        assert_eq!(
            published.post.caption.as_deref(),
            Some("Subtitles:\n[English]\nHello there")
        );
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn signs_share_the_language_of_their_dialogue() {
        let dir = tempfile::tempdir().unwrap();
        let config = setup(dir.path(), 10, "");
        let subs = dir.path().join("subtitles");
        std::fs::remove_file(subs.join("ep01.en.srt")).unwrap();
        std::fs::write(
            subs.join("ep01.en.ass"),
            "[Events]
Dialogue: 0,0:00:00.00,0:00:10.00,Signs,,0,0,0,,Bakery
Dialogue: 0,0:00:00.00,0:00:10.00,Default,,0,0,0,,Hello there
",
        )
        .unwrap();
        std::fs::write(
            subs.join("ep01.pt.srt"),
            "1\n00:00:00,000 --> 00:00:10,000\nOlá\n",
        )
        .unwrap();
        let mut store = RunStateStore::load(&config.state_file);
        let mut poster = RecordingPoster::default();
        let mut rng = StdRng::seed_from_u64(6);

        let published = Orchestrator::new(&config, &mut poster)
            .run_once(&mut store, &mut rng)
            .unwrap();

        assert_eq!(
            published.post.caption.as_deref(),
            Some("Subtitles:\n[English]\nHello there\n【 Bakery 】")
        );
    }

    #[test]
    fn history_limit_starts_over() {
        let dir = tempfile::tempdir().unwrap();
        let config = setup(
            dir.path(),
            10,
            "selection:\n  history_limit: 2\n  exclusion_window: 1s\n",
        );
        let mut store = RunStateStore::load(&config.state_file);
        store.append(RunRecord::new(1, Duration::from_secs(1), Utc::now()));
        store.append(RunRecord::new(1, Duration::from_secs(2), Utc::now()));
        let mut poster = RecordingPoster::default();
        let mut rng = StdRng::seed_from_u64(8);

        Orchestrator::new(&config, &mut poster)
            .run_once(&mut store, &mut rng)
            .unwrap();

        assert_eq!(store.len(), 1);
    }
}
