use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde_json::{Value, json};

use crate::error::Result;
use crate::viewport::{BoundingBox, Resolution};

/// Append-only JSONL trace for one session, written under a directory
/// namespaced by the session identifier. Frame images for each step live in
/// the same directory.
///
/// Every append is a single flushed line, so a tick that aborts midway never
/// corrupts records already on disk.
pub struct TraceLog {
    file: File,
    dir: PathBuf,
}

impl TraceLog {
    pub fn create(log_root: &Path, session: &str) -> Result<Self> {
        let dir = log_root.join(session);
        fs::create_dir_all(&dir)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join("trace.jsonl"))?;
        Ok(Self { file, dir })
    }

    /// Path for the frame image of a given step index.
    pub fn frame_path(&self, step: u32) -> PathBuf {
        self.dir.join(format!("{step}.png"))
    }

    fn append(&mut self, record: Value) -> Result<()> {
        let mut line = record.to_string();
        line.push('\n');
        self.file.write_all(line.as_bytes())?;
        self.file.flush()?;
        Ok(())
    }

    /// One record per scroll-induced frame.
    pub fn scroll(&mut self, distance: f64, resolution: Resolution) -> Result<()> {
        self.append(json!({
            "action": format!("scroll[{distance}]"),
            "resolution": resolution,
        }))
    }

    /// Pre-action record: the chosen action, the bounding box it resolved to,
    /// and the full markup it was decided against.
    pub fn action(
        &mut self,
        action: &str,
        bb: Option<&BoundingBox>,
        html: &str,
        resolution: Resolution,
    ) -> Result<()> {
        self.append(json!({
            "action": action,
            "bb": bb,
            "html": html,
            "resolution": resolution,
        }))
    }

    /// Terminal record, appended once when the session ends.
    pub fn done(&mut self, reward: f64, html: &str, resolution: Resolution) -> Result<()> {
        self.append(json!({
            "action": "done",
            "reward": reward,
            "html": html,
            "resolution": resolution,
        }))
    }
}
