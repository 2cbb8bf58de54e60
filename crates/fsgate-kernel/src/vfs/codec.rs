//! Path tokens.
//!
//! Clients never see raw paths. A token is `v{index}_{body}` where `index`
//! is the volume's position in the mount table and `body` is the
//! unpadded URL-safe base64 of the volume-relative path with a leading
//! `/`. The volume root therefore encodes as `v{index}_Lw`.
//!
//! Encoding and decoding of the token text are pure. Resolving the index
//! against live volumes happens in [`super::MountTable::decode`], which
//! fails closed on indices that no longer exist.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use std::sync::Arc;

use super::mount::Volume;
use super::types::{join, normalize, split};

const MARKER: char = 'v';

/// Encode a volume index and normalized relative path.
pub fn encode(index: usize, relative: &str) -> String {
    let body = URL_SAFE_NO_PAD.encode(format!("/{relative}"));
    format!("{MARKER}{index}_{body}")
}

/// Decode a token into (volume index, normalized relative path).
///
/// Returns `None` for anything malformed, including bodies that try to
/// climb out of the volume with `..`.
pub fn decode(token: &str) -> Option<(usize, String)> {
    let rest = token.strip_prefix(MARKER)?;
    let (index, body) = rest.split_once('_')?;
    if index.is_empty() || !index.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let index: usize = index.parse().ok()?;
    // Older clients pad with `.` in place of `=`
    let body = body.trim_end_matches(['.', '=']);
    let raw = URL_SAFE_NO_PAD.decode(body).ok()?;
    let path = String::from_utf8(raw).ok()?;
    if !path.starts_with('/') {
        return None;
    }
    Some((index, normalize(&path)?))
}

/// A decoded token bound to the volume it names.
#[derive(Clone)]
pub struct Target {
    /// Position of the volume at decode time.
    pub index: usize,
    pub volume: Arc<Volume>,
    /// Path relative to the volume root; empty for the root itself.
    pub relative: String,
}

impl std::fmt::Debug for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Target")
            .field("index", &self.index)
            .field("root", &self.volume.root)
            .field("relative", &self.relative)
            .finish()
    }
}

impl Target {
    pub fn new(index: usize, volume: Arc<Volume>, relative: impl Into<String>) -> Self {
        Self {
            index,
            volume,
            relative: relative.into(),
        }
    }

    pub fn token(&self) -> String {
        encode(self.index, &self.relative)
    }

    pub fn is_root(&self) -> bool {
        self.relative.is_empty()
    }

    /// Absolute gateway path, e.g. `/home/docs/a.txt`.
    pub fn absolute(&self) -> String {
        if self.relative.is_empty() {
            self.volume.root.clone()
        } else if self.volume.root == "/" {
            format!("/{}", self.relative)
        } else {
            format!("{}/{}", self.volume.root, self.relative)
        }
    }

    /// Display name: the last path component, or the volume name at the root.
    pub fn name(&self) -> String {
        match split(&self.relative) {
            Some((_, name)) => name.to_string(),
            None => self.volume.display_name(),
        }
    }

    /// The containing directory. The root has none.
    pub fn parent(&self) -> Option<Target> {
        let (parent, _) = split(&self.relative)?;
        Some(Target::new(self.index, Arc::clone(&self.volume), parent))
    }

    /// A direct child of this directory.
    pub fn child(&self, name: &str) -> Target {
        Target::new(
            self.index,
            Arc::clone(&self.volume),
            join(&self.relative, name),
        )
    }

    /// True when `other` is this target or lies underneath it.
    pub fn contains(&self, other: &Target) -> bool {
        Arc::ptr_eq(&self.volume, &other.volume)
            && (self.relative.is_empty()
                || other.relative == self.relative
                || other.relative.starts_with(&format!("{}/", self.relative)))
    }
}
