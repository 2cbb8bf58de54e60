//! Volume table with longest-prefix routing.
//!
//! The table is a copy-on-write snapshot: readers clone an `Arc` and scan
//! without holding the lock, mount and unmount swap in a new vector. A
//! volume's index is its position in the vector, so unmounting an earlier
//! volume shifts every later index and invalidates tokens issued for them.

use parking_lot::RwLock;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::info;

use super::codec::{self, Target};
use super::error::{VfsError, VfsResult};
use super::ops::Driver;
use super::types::{Permissions, normalize};

/// Display and bookkeeping metadata for a volume.
#[derive(Debug, Clone, Default)]
pub struct VolumeMeta {
    /// Backend kind, e.g. `memory`, `local`, `s3`, `remote`, `artifact`.
    pub kind: String,
    /// Name shown for the volume root instead of the last root component.
    pub alias: Option<String>,
    pub icon: Option<String>,
    /// External URL of the backing store, if it has one.
    pub url: Option<String>,
    /// Mounted on demand by a client rather than from configuration.
    pub network: bool,
    /// Commands this volume refuses in addition to the gateway-wide list.
    pub disabled: Vec<String>,
}

impl VolumeMeta {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            ..Self::default()
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = Some(icon.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn network(mut self) -> Self {
        self.network = true;
        self
    }

    pub fn with_disabled<I, S>(mut self, commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.disabled = commands.into_iter().map(Into::into).collect();
        self
    }

    pub fn is_disabled(&self, command: &str) -> bool {
        self.disabled.iter().any(|d| d == command)
    }
}

/// One mounted backend.
pub struct Volume {
    /// Absolute root prefix, e.g. `/home`.
    pub root: String,
    pub permissions: Permissions,
    pub driver: Arc<dyn Driver>,
    pub meta: VolumeMeta,
    /// Key handed back to the client for unmounting.
    pub mount_key: String,
}

impl std::fmt::Debug for Volume {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Volume")
            .field("root", &self.root)
            .field("permissions", &self.permissions)
            .field("meta", &self.meta)
            .field("mount_key", &self.mount_key)
            .finish()
    }
}

impl Volume {
    pub fn display_name(&self) -> String {
        if let Some(alias) = &self.meta.alias {
            return alias.clone();
        }
        match self.root.rsplit('/').next() {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => "/".to_string(),
        }
    }

    /// Writes are allowed by both the volume flags and the driver.
    pub fn writable(&self) -> bool {
        self.permissions.write && !self.driver.read_only()
    }

    pub fn check_writable(&self) -> VfsResult<()> {
        if self.writable() {
            Ok(())
        } else {
            Err(VfsError::ReadOnly)
        }
    }

    /// Locked volumes refuse rename and removal.
    pub fn check_unlocked(&self, path: &str) -> VfsResult<()> {
        self.check_writable()?;
        if self.permissions.locked {
            Err(VfsError::permission_denied(path))
        } else {
            Ok(())
        }
    }
}

/// Ordered list of mounted volumes.
pub struct MountTable {
    volumes: RwLock<Arc<Vec<Arc<Volume>>>>,
}

impl std::fmt::Debug for MountTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let roots: Vec<String> = self.snapshot().iter().map(|v| v.root.clone()).collect();
        f.debug_struct("MountTable").field("roots", &roots).finish()
    }
}

impl Default for MountTable {
    fn default() -> Self {
        Self::new()
    }
}

impl MountTable {
    /// Create a new empty mount table.
    pub fn new() -> Self {
        Self {
            volumes: RwLock::new(Arc::new(Vec::new())),
        }
    }

    /// Current volumes in index order.
    pub fn snapshot(&self) -> Arc<Vec<Arc<Volume>>> {
        Arc::clone(&self.volumes.read())
    }

    pub fn len(&self) -> usize {
        self.volumes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Normalize a mount path: ensure it starts with `/` and has no trailing slash.
    fn normalize_mount_path(path: &str) -> VfsResult<String> {
        let relative = normalize(path).ok_or_else(|| VfsError::invalid_path(path))?;
        Ok(format!("/{relative}"))
    }

    /// Append a volume.
    ///
    /// A root already taken by another volume gets `-1`, `-2`, ... appended
    /// until it is unique. Returns the mounted volume with its final root
    /// and mount key.
    pub fn mount(
        &self,
        root: &str,
        permissions: Permissions,
        driver: Arc<dyn Driver>,
        meta: VolumeMeta,
    ) -> VfsResult<Target> {
        let requested = Self::normalize_mount_path(root)?;
        let mut guard = self.volumes.write();

        let taken = |candidate: &str| guard.iter().any(|v| v.root == candidate);
        let mut root = requested.clone();
        let mut suffix = 1;
        while taken(&root) {
            root = format!("{requested}-{suffix}");
            suffix += 1;
        }

        let volume = Arc::new(Volume {
            mount_key: Self::mount_key(&meta.kind),
            root,
            permissions,
            driver,
            meta,
        });

        let mut next = Vec::clone(&guard);
        next.push(Arc::clone(&volume));
        let index = next.len() - 1;
        *guard = Arc::new(next);

        info!(root = %volume.root, kind = %volume.meta.kind, index, "mounted volume");
        Ok(Target::new(index, volume, ""))
    }

    fn mount_key(kind: &str) -> String {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        let nonce = uuid::Uuid::new_v4().simple().to_string();
        format!("{kind}-{millis}-{}", &nonce[..8])
    }

    /// Remove the volume with the given mount key.
    ///
    /// Returns the root token the volume had before removal. The driver is
    /// released once the last in-flight request holding it finishes.
    pub fn unmount(&self, mount_key: &str) -> VfsResult<String> {
        let mut guard = self.volumes.write();
        let index = guard
            .iter()
            .position(|v| v.mount_key == mount_key)
            .ok_or_else(|| VfsError::not_found(mount_key))?;

        let mut next = Vec::clone(&guard);
        let removed = next.remove(index);
        *guard = Arc::new(next);

        info!(root = %removed.root, index, "unmounted volume");
        Ok(codec::encode(index, ""))
    }

    /// Find the volume owning an absolute path.
    ///
    /// The longest root that matches on a component boundary wins, so
    /// `/home` never claims `/homework`.
    pub fn resolve(&self, absolute: &str) -> Option<Target> {
        let path = Self::normalize_mount_path(absolute).ok()?;
        let volumes = self.snapshot();

        let mut best: Option<(usize, &Arc<Volume>)> = None;
        for (index, volume) in volumes.iter().enumerate() {
            let root = volume.root.as_str();
            let is_match = root == "/"
                || path == root
                || path
                    .strip_prefix(root)
                    .is_some_and(|rest| rest.starts_with('/'));
            if is_match && best.is_none_or(|(_, b)| root.len() > b.root.len()) {
                best = Some((index, volume));
            }
        }

        let (index, volume) = best?;
        let relative = path[volume.root.len()..].trim_start_matches('/').to_string();
        Some(Target::new(index, Arc::clone(volume), relative))
    }

    /// Token for an absolute path, if some volume owns it.
    pub fn encode(&self, absolute: &str) -> Option<String> {
        self.resolve(absolute).map(|t| t.token())
    }

    /// Decode a token against the current volumes.
    ///
    /// Returns `None` for malformed tokens and for indices past the end of
    /// the table.
    pub fn decode(&self, token: &str) -> Option<Target> {
        let (index, relative) = codec::decode(token)?;
        let volume = self.snapshot().get(index).cloned()?;
        Some(Target::new(index, volume, relative))
    }

    /// Decode or fail with `InvalidTarget`.
    pub fn target(&self, token: &str) -> VfsResult<Target> {
        self.decode(token)
            .ok_or_else(|| VfsError::invalid_target(token))
    }

    /// Root target of the volume at `index`.
    pub fn root(&self, index: usize) -> Option<Target> {
        let volume = self.snapshot().get(index).cloned()?;
        Some(Target::new(index, volume, ""))
    }

    /// Root targets of every volume in index order.
    pub fn roots(&self) -> Vec<Target> {
        self.snapshot()
            .iter()
            .enumerate()
            .map(|(index, volume)| Target::new(index, Arc::clone(volume), ""))
            .collect()
    }

    /// Root target of the volume with this mount key.
    pub fn find(&self, mount_key: &str) -> Option<Target> {
        self.roots()
            .into_iter()
            .find(|t| t.volume.mount_key == mount_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::backends::MemoryBackend;

    fn table_with(roots: &[&str]) -> MountTable {
        let table = MountTable::new();
        for root in roots {
            table
                .mount(
                    root,
                    Permissions::read_write(),
                    Arc::new(MemoryBackend::new()),
                    VolumeMeta::new("memory"),
                )
                .unwrap();
        }
        table
    }

    #[test]
    fn test_resolve_longest_prefix() {
        let table = table_with(&["/home", "/home/shared", "/tmp"]);

        let t = table.resolve("/home/docs/a.txt").unwrap();
        assert_eq!(t.index, 0);
        assert_eq!(t.relative, "docs/a.txt");

        let t = table.resolve("/home/shared/x").unwrap();
        assert_eq!(t.index, 1);
        assert_eq!(t.relative, "x");

        let t = table.resolve("/tmp").unwrap();
        assert_eq!(t.index, 2);
        assert!(t.is_root());
    }

    #[test]
    fn test_resolve_component_boundary() {
        let table = table_with(&["/home"]);
        assert!(table.resolve("/homework/a").is_none());
        assert!(table.resolve("/elsewhere").is_none());
    }

    #[test]
    fn test_encode_decode_round_trip() {
        let table = table_with(&["/home", "/tmp"]);
        for path in ["/home", "/home/docs/report.txt", "/tmp/a b/c"] {
            let token = table.encode(path).unwrap();
            let target = table.decode(&token).unwrap();
            assert_eq!(target.absolute(), path);
        }
        assert_eq!(table.encode("/home").as_deref(), Some("v0_Lw"));
    }

    #[test]
    fn test_collision_suffix() {
        let table = table_with(&["/data", "/data", "/data"]);
        let roots: Vec<String> = table.roots().iter().map(|t| t.volume.root.clone()).collect();
        assert_eq!(roots, vec!["/data", "/data-1", "/data-2"]);
    }

    #[test]
    fn test_unmount_invalidates_later_tokens() {
        let table = table_with(&["/home", "/tmp"]);
        let tmp_token = table.encode("/tmp/x").unwrap();
        let key = table.root(0).unwrap().volume.mount_key.clone();

        let removed = table.unmount(&key).unwrap();
        assert_eq!(removed, "v0_Lw");
        assert_eq!(table.len(), 1);

        // v1 is past the end now
        assert!(table.decode(&tmp_token).is_none());
        assert!(table.target(&tmp_token).is_err());
        assert!(table.unmount(&key).is_err());
    }

    #[test]
    fn test_snapshot_survives_unmount() {
        let table = table_with(&["/home"]);
        let snapshot = table.snapshot();
        let key = snapshot[0].mount_key.clone();
        table.unmount(&key).unwrap();
        assert_eq!(snapshot.len(), 1);
        assert!(table.is_empty());
    }

    #[test]
    fn test_target_navigation() {
        let table = table_with(&["/home"]);
        let root = table.root(0).unwrap();
        assert_eq!(root.name(), "home");
        assert!(root.parent().is_none());

        let file = root.child("docs").child("a.txt");
        assert_eq!(file.absolute(), "/home/docs/a.txt");
        assert_eq!(file.name(), "a.txt");
        assert_eq!(file.parent().unwrap().relative, "docs");
        assert!(root.contains(&file));
        assert!(!file.contains(&root));
        assert!(!root.child("doc").contains(&file));
    }

    #[test]
    fn test_mount_keys_are_unique() {
        let table = table_with(&["/a", "/b"]);
        let roots = table.roots();
        assert_ne!(roots[0].volume.mount_key, roots[1].volume.mount_key);
        assert!(roots[0].volume.mount_key.starts_with("memory-"));
        assert!(table.find(&roots[1].volume.mount_key).is_some());
    }
}
