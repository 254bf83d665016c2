//! Reference-counted bookkeeping shared by notifier backends.

use super::SubscriptionHandle;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Result of a subscription.
#[derive(Debug)]
pub(crate) struct Subscribed {
    pub handle: SubscriptionHandle,
    /// Directory that needs an OS watch because it had none before.
    pub arm: Option<PathBuf>,
}

/// Tracks which files are of interest and which directories carry an OS watch.
///
/// Files are watched through their parent directory, so one directory watch
/// serves every interesting file inside it.
#[derive(Debug, Default)]
pub(crate) struct SubscriptionRegistry {
    next_id: u64,
    handles: HashMap<SubscriptionHandle, PathBuf>,
    paths: HashMap<PathBuf, usize>,
    dirs: HashMap<PathBuf, usize>,
}

impl SubscriptionRegistry {
    pub fn subscribe(&mut self, path: &Path) -> Subscribed {
        self.next_id += 1;
        let handle = SubscriptionHandle(self.next_id);
        self.handles.insert(handle, path.to_path_buf());
        *self.paths.entry(path.to_path_buf()).or_default() += 1;

        let dir = watch_dir(path);
        let count = self.dirs.entry(dir.clone()).or_default();
        *count += 1;

        Subscribed {
            handle,
            arm: (*count == 1).then_some(dir),
        }
    }

    /// Drop a subscription, returning the directory whose OS watch is no
    /// longer needed.
    pub fn unsubscribe(&mut self, handle: SubscriptionHandle) -> Option<PathBuf> {
        let path = self.handles.remove(&handle)?;

        if let Some(count) = self.paths.get_mut(&path) {
            *count -= 1;
            if *count == 0 {
                self.paths.remove(&path);
            }
        }

        let dir = watch_dir(&path);
        let count = self.dirs.get_mut(&dir)?;
        *count -= 1;
        if *count == 0 {
            self.dirs.remove(&dir);
            Some(dir)
        } else {
            None
        }
    }

    pub fn is_interested(&self, path: &Path) -> bool {
        self.paths.contains_key(path)
    }

    pub fn subscription_count(&self) -> usize {
        self.handles.len()
    }

    pub fn armed_dirs(&self) -> usize {
        self.dirs.len()
    }
}

fn watch_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_subscription_arms_directory() {
        let mut registry = SubscriptionRegistry::default();

        let a = registry.subscribe(Path::new("/docs/a.txt"));
        assert_eq!(a.arm, Some(PathBuf::from("/docs")));

        let b = registry.subscribe(Path::new("/docs/b.txt"));
        assert_eq!(b.arm, None);
        assert_ne!(a.handle, b.handle);
        assert_eq!(registry.armed_dirs(), 1);
    }

    #[test]
    fn test_shared_path_is_reference_counted() {
        let mut registry = SubscriptionRegistry::default();
        let first = registry.subscribe(Path::new("/docs/a.txt"));
        let second = registry.subscribe(Path::new("/docs/a.txt"));

        assert_eq!(registry.unsubscribe(first.handle), None);
        assert!(registry.is_interested(Path::new("/docs/a.txt")));

        assert_eq!(registry.unsubscribe(second.handle), Some(PathBuf::from("/docs")));
        assert!(!registry.is_interested(Path::new("/docs/a.txt")));
        assert_eq!(registry.armed_dirs(), 0);
    }

    #[test]
    fn test_unknown_handle_is_ignored() {
        let mut registry = SubscriptionRegistry::default();
        let sub = registry.subscribe(Path::new("/docs/a.txt"));
        assert!(registry.unsubscribe(sub.handle).is_some());
        assert_eq!(registry.unsubscribe(sub.handle), None);
        assert_eq!(registry.subscription_count(), 0);
    }
}
