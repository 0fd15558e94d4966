//! Content-addressed scratch store rooted at `<working_dir>/.worker_output/`
//! (spec.md §3, §4.4).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use farmcore_lib::{FarmError, FarmResult};

use crate::lock::ExclusiveLock;

/// Owns `.worker_output/` under a working directory and the `write.lock`
/// sentinel that serializes writes into its top-level files.
pub struct ScratchStore {
    root: PathBuf,
    write_lock: ExclusiveLock,
}

impl ScratchStore {
    pub fn open_or_create(working_dir: impl AsRef<Path>) -> FarmResult<Self> {
        let root = working_dir.as_ref().join(".worker_output");
        fs::create_dir_all(&root)?;
        let write_lock = ExclusiveLock::new(root.join("write.lock"));
        Ok(Self { root, write_lock })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn seqs_path(&self, id_hash: &str) -> PathBuf {
        self.root.join(format!("{id_hash}.seqs"))
    }

    pub fn aln_path(&self, id_hash: &str) -> PathBuf {
        self.root.join(format!("{id_hash}.aln"))
    }

    pub fn graph_path(&self, id_hash: &str) -> PathBuf {
        self.root.join(format!("{id_hash}.graph"))
    }

    pub fn subjob_dir(&self, id_hash: &str) -> PathBuf {
        self.root.join(id_hash)
    }

    pub fn ss2_path(&self, id_hash: &str, sequence_name: &str) -> PathBuf {
        self.subjob_dir(id_hash).join(format!("{sequence_name}.ss2"))
    }

    pub fn pair_list_path(&self, id_hash: &str, subjob_num: u32, num_subjobs: u32) -> PathBuf {
        self.subjob_dir(id_hash)
            .join(format!("{subjob_num}_of_{num_subjobs}.txt"))
    }

    pub fn sim_df_path(&self, id_hash: &str, subjob_num: u32, num_subjobs: u32) -> PathBuf {
        self.subjob_dir(id_hash)
            .join(format!("{subjob_num}_of_{num_subjobs}.sim_df"))
    }

    /// Reads unlocked per spec.md §4.4: "Read paths require no locking."
    pub fn read(&self, path: &Path) -> FarmResult<String> {
        fs::read_to_string(path).map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                FarmError::MissingScratch(path.display().to_string())
            } else {
                FarmError::Io(err)
            }
        })
    }

    pub fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    /// Writes a shared top-level artifact (`.graph`, `.aln`) serialized via
    /// `write.lock` with `max_wait = 0`: if the lock is already held, the
    /// caller assumes another participant already produced the file and
    /// returns `Ok(false)` without writing (spec.md §4.4).
    pub fn write_shared(&self, path: &Path, contents: &str) -> FarmResult<bool> {
        match self.write_lock.acquire(Some(Duration::ZERO), false) {
            Ok(_guard) => {
                fs::write(path, contents)?;
                Ok(true)
            }
            Err(FarmError::LockTimeout { .. }) => Ok(false),
            Err(other) => Err(other),
        }
    }

    /// Sub-job files under `<id_hash>/` are written only by the owning
    /// worker and need no lock (spec.md §4.4).
    pub fn write_owned(&self, path: &Path, contents: &str) -> FarmResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, contents)?;
        Ok(())
    }

    /// Deletes `<id_hash>.{graph,aln,seqs}` and recursively `<id_hash>/`,
    /// ignoring missing-file errors (spec.md §4.5 step 4).
    pub fn delete_job_artifacts(&self, id_hash: &str) {
        for path in [self.seqs_path(id_hash), self.aln_path(id_hash), self.graph_path(id_hash)] {
            if let Err(err) = fs::remove_file(&path) {
                if err.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %path.display(), %err, "failed to delete scratch artifact");
                }
            }
        }
        let dir = self.subjob_dir(id_hash);
        if let Err(err) = fs::remove_dir_all(&dir) {
            if err.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %dir.display(), %err, "failed to delete sub-job scratch directory");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_missing_file_surfaces_missing_scratch() {
        let dir = tempfile::tempdir().unwrap();
        let store = ScratchStore::open_or_create(dir.path()).unwrap();
        let err = store.read(&store.seqs_path("foo")).unwrap_err();
        assert!(matches!(err, FarmError::MissingScratch(_)));
    }

    #[test]
    fn write_shared_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = ScratchStore::open_or_create(dir.path()).unwrap();
        let path = store.aln_path("foo");
        assert!(store.write_shared(&path, ">a\nAAAA\n").unwrap());
        assert_eq!(store.read(&path).unwrap(), ">a\nAAAA\n");
    }

    #[test]
    fn write_shared_yields_to_an_existing_writer() {
        let dir = tempfile::tempdir().unwrap();
        let store = ScratchStore::open_or_create(dir.path()).unwrap();
        let held = store.write_lock.acquire(None, false).unwrap();
        let wrote = store.write_shared(&store.aln_path("foo"), "ignored").unwrap();
        assert!(!wrote);
        drop(held);
    }

    #[test]
    fn delete_job_artifacts_ignores_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = ScratchStore::open_or_create(dir.path()).unwrap();
        store.delete_job_artifacts("never-existed");
    }

    #[test]
    fn delete_job_artifacts_removes_subjob_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = ScratchStore::open_or_create(dir.path()).unwrap();
        let pair_list = store.pair_list_path("foo", 1, 2);
        store.write_owned(&pair_list, "a,b\n").unwrap();
        assert!(pair_list.exists());

        store.delete_job_artifacts("foo");
        assert!(!store.subjob_dir("foo").exists());
    }
}
