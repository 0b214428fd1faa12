use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

/// A frame ready to be published.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Post {
    pub episode: u32,
    pub frame: u64,
    pub timestamp: String,
    pub message: String,
    pub image: PathBuf,
    /// Posted as a reply to the frame, when present.
    pub caption: Option<String>,
}

/// Hands posts over to wherever they get published.
pub trait Poster {
    /// Publishes `post` and returns an identifier for it.
    fn publish(&mut self, post: &Post) -> Result<String>;
}

impl<P: Poster + ?Sized> Poster for &mut P {
    fn publish(&mut self, post: &Post) -> Result<String> {
        (**self).publish(post)
    }
}

/// Drops every post as a JSON document into a directory, from where an
/// uploader picks them up.
pub struct OutboxPoster {
    dir: PathBuf,
}

impl OutboxPoster {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl Poster for OutboxPoster {
    fn publish(&mut self, post: &Post) -> Result<String> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create outbox: '{}'", self.dir.display()))?;
        let id = format!("{:02}-{:04}", post.episode, post.frame);
        let path = self.dir.join(format!("{}.json", id));
        let json = serde_json::to_string_pretty(post).context("Failed to serialise post")?;
        std::fs::write(&path, json)
            .with_context(|| format!("Failed to write post: '{}'", path.display()))?;
        log::info!("Queued episode {} frame {} as '{}'", post.episode, post.frame, path.display());
        Ok(id)
    }
}

/// Only logs what would have been posted.
pub struct DryRunPoster;

impl Poster for DryRunPoster {
    fn publish(&mut self, post: &Post) -> Result<String> {
        log::info!(
            "Dry run, not posting episode {} frame {} ({}):\n{}",
            post.episode,
            post.frame,
            post.image.display(),
            post.message
        );
        if let Some(caption) = &post.caption {
            log::info!("Dry run caption:\n{}", caption);
        }
        Ok(String::from("dry-run"))
    }
}
