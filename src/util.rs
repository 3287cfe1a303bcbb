//! Miscellaneous utilities for the zone management core.

use std::{fmt, fs, io};

use camino::{Utf8Path, Utf8PathBuf};

/// Atomically write a file.
///
/// # Panics
///
/// Panics if 'path' does not have a containing directory.
pub fn write_file(path: &Utf8Path, contents: &[u8]) -> io::Result<()> {
    // Ensure such a path _can_ exist.
    let dir = path
        .parent()
        .expect("'path' must be a file, so it must have a parent");
    fs::create_dir_all(dir)?;

    // Obtain a temporary file in the same directory.
    let mut tmp_file = tempfile::Builder::new().tempfile_in(dir)?;

    // Fill up the temporary file.
    {
        use io::Write as _;
        tmp_file.as_file_mut().write_all(contents)?;
    }

    // Replace the target path with the temporary file.
    let _ = tmp_file.persist(path)?;

    Ok(())
}

/// Find a free sidecar path `<path>.0` .. `<path>.9` that does not currently
/// exist on disk.
///
/// Grounded on `zones_find_free_filename` in the original Knot DNS source:
/// the zonefile-sync atomic swap needs a scratch name nothing else is using.
pub fn find_free_sidecar(path: &Utf8Path) -> Option<Utf8PathBuf> {
    (0..10u32)
        .map(|suffix| Utf8PathBuf::from(format!("{path}.{suffix}")))
        .find(|candidate| !candidate.exists())
}

/// Update a value, recording whether anything changed.
#[inline]
pub fn update_value<T: Eq>(dst: &mut T, value: T, changed: &mut bool) {
    if *dst != value {
        *changed = true;
        *dst = value;
    }
}

//----------- AbortOnDrop -----------------------------------------------------

/// A [`tokio::task::JoinHandle`] that aborts its task when dropped.
///
/// Per-zone timers (REFRESH/RETRY/EXPIRE/NOTIFY-send/zonefile-sync) are all
/// represented as spawned tasks wrapped in this type, so replacing or
/// cancelling a timer can never leave the old task running unsupervised.
#[derive(Debug)]
pub struct AbortOnDrop {
    handle: tokio::task::JoinHandle<()>,
}

impl AbortOnDrop {
    /// The id of the wrapped task.
    ///
    /// Used to detect stale self-reschedules, the same way `Zone::mark_dirty`
    /// checks `task::id()` before clearing `enqueued_save`.
    pub fn id(&self) -> tokio::task::Id {
        self.handle.id()
    }

    /// Cancel the task and wait for it to actually stop.
    ///
    /// Unlike a bare `abort()`, this blocks until the task has observed the
    /// cancellation. The NOTIFY cancellation protocol relies on this to avoid
    /// a race between a timer firing and a reconfiguration retiring it.
    pub async fn cancel(self) {
        self.handle.abort();
        let _ = self.handle.await;
    }
}

impl From<tokio::task::JoinHandle<()>> for AbortOnDrop {
    fn from(handle: tokio::task::JoinHandle<()>) -> Self {
        Self { handle }
    }
}

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

impl fmt::Display for AbortOnDrop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task {:?}", self.handle.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn free_sidecar_skips_existing() {
        let dir = tempfile::tempdir().unwrap();
        let base = Utf8PathBuf::from_path_buf(dir.path().join("example.zone")).unwrap();
        std::fs::write(format!("{base}.0"), b"").unwrap();
        std::fs::write(format!("{base}.1"), b"").unwrap();

        let free = find_free_sidecar(&base).unwrap();
        assert_eq!(free, Utf8PathBuf::from(format!("{base}.2")));
    }

    #[tokio::test]
    async fn abort_on_drop_stops_task() {
        let flag = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag2 = flag.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
            flag2.store(true, std::sync::atomic::Ordering::SeqCst);
        });
        let guard = AbortOnDrop::from(handle);
        guard.cancel().await;
        assert!(!flag.load(std::sync::atomic::Ordering::SeqCst));
    }
}
