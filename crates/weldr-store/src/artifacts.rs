//! Compose output files: image, build log, and manifest, plus tar bundles.

use crate::layout::StateLayout;
use crate::{fsync_dir, StoreError};
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use tempfile::NamedTempFile;
use uuid::Uuid;

const LOG_FILE: &str = "osbuild.log";
const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    layout: StateLayout,
}

impl ArtifactStore {
    pub fn new(layout: StateLayout) -> Self {
        Self { layout }
    }

    fn write_file(&self, id: Uuid, file: &str, data: &[u8]) -> Result<PathBuf, StoreError> {
        let dir = self.layout.output_dir(id);
        fs::create_dir_all(&dir)?;
        let dest = dir.join(file);
        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(data)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&dest).map_err(|e| StoreError::Io(e.error))?;
        fsync_dir(&dir)?;
        Ok(dest)
    }

    pub fn write_image(
        &self,
        id: Uuid,
        filename: &str,
        data: &[u8],
    ) -> Result<PathBuf, StoreError> {
        self.write_file(id, filename, data)
    }

    pub fn write_log(&self, id: Uuid, text: &str) -> Result<(), StoreError> {
        self.write_file(id, LOG_FILE, text.as_bytes()).map(|_| ())
    }

    pub fn write_manifest(&self, id: Uuid, manifest: &serde_json::Value) -> Result<(), StoreError> {
        let data = serde_json::to_vec_pretty(manifest)?;
        self.write_file(id, MANIFEST_FILE, &data).map(|_| ())
    }

    /// Path of the image file when it exists.
    pub fn image_path(&self, id: Uuid, filename: &str) -> Option<PathBuf> {
        let path = self.layout.output_dir(id).join(filename);
        path.is_file().then_some(path)
    }

    /// The build log, empty when none was written.
    pub fn read_log(&self, id: Uuid) -> Result<String, StoreError> {
        match fs::read_to_string(self.layout.output_dir(id).join(LOG_FILE)) {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn read_manifest(&self, id: Uuid) -> Result<Vec<u8>, StoreError> {
        match fs::read(self.layout.output_dir(id).join(MANIFEST_FILE)) {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(b"{}".to_vec()),
            Err(e) => Err(e.into()),
        }
    }

    /// Tar holding `<uuid>.json`.
    pub fn metadata_tar(&self, id: Uuid) -> Result<Vec<u8>, StoreError> {
        let mut ar = tar::Builder::new(Vec::new());
        append_bytes(&mut ar, &format!("{id}.json"), &self.read_manifest(id)?)?;
        Ok(ar.into_inner()?)
    }

    /// Tar holding `logs/osbuild.log`.
    pub fn logs_tar(&self, id: Uuid) -> Result<Vec<u8>, StoreError> {
        let mut ar = tar::Builder::new(Vec::new());
        append_bytes(&mut ar, "logs/osbuild.log", self.read_log(id)?.as_bytes())?;
        Ok(ar.into_inner()?)
    }

    /// Tar holding the manifest, the log, and the image when it exists.
    pub fn results_tar(
        &self,
        id: Uuid,
        image_filename: Option<&str>,
    ) -> Result<Vec<u8>, StoreError> {
        let mut ar = tar::Builder::new(Vec::new());
        append_bytes(&mut ar, &format!("{id}.json"), &self.read_manifest(id)?)?;
        append_bytes(&mut ar, "logs/osbuild.log", self.read_log(id)?.as_bytes())?;
        if let Some(name) = image_filename {
            if let Some(path) = self.image_path(id, name) {
                let data = fs::read(path)?;
                append_bytes(&mut ar, name, &data)?;
            }
        }
        Ok(ar.into_inner()?)
    }

    /// Delete the output directory of a compose. Missing directories are fine.
    pub fn remove(&self, id: Uuid) -> Result<(), StoreError> {
        match fs::remove_dir_all(self.layout.output_dir(id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn append_bytes(ar: &mut tar::Builder<Vec<u8>>, path: &str, data: &[u8]) -> Result<(), StoreError> {
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(tar::EntryType::Regular);
    header.set_mtime(0);
    header.set_uid(0);
    header.set_gid(0);
    header.set_mode(0o644);
    header.set_size(data.len() as u64);
    header.set_cksum();
    ar.append_data(&mut header, path, data)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn entries(data: &[u8]) -> Vec<(String, String)> {
        let mut ar = tar::Archive::new(data);
        ar.entries()
            .unwrap()
            .map(|e| {
                let mut e = e.unwrap();
                let path = e.path().unwrap().to_string_lossy().into_owned();
                let mut body = String::new();
                e.read_to_string(&mut body).unwrap();
                (path, body)
            })
            .collect()
    }

    fn store() -> (tempfile::TempDir, ArtifactStore) {
        let dir = tempfile::tempdir().unwrap();
        let layout = StateLayout::new(dir.path());
        layout.initialize().unwrap();
        (dir, ArtifactStore::new(layout))
    }

    #[test]
    fn logs_tar_contains_log() {
        let (_dir, store) = store();
        let id = Uuid::new_v4();
        store.write_log(id, "build ok\n").unwrap();
        let e = entries(&store.logs_tar(id).unwrap());
        assert_eq!(e, vec![("logs/osbuild.log".to_owned(), "build ok\n".to_owned())]);
    }

    #[test]
    fn results_tar_includes_image_when_present() {
        let (_dir, store) = store();
        let id = Uuid::new_v4();
        store.write_manifest(id, &serde_json::json!({"pipelines": []})).unwrap();
        store.write_log(id, "log").unwrap();
        store.write_image(id, "disk.qcow2", b"IMAGE").unwrap();
        let names: Vec<String> = entries(&store.results_tar(id, Some("disk.qcow2")).unwrap())
            .into_iter()
            .map(|(p, _)| p)
            .collect();
        assert_eq!(
            names,
            vec![
                format!("{id}.json"),
                "logs/osbuild.log".to_owned(),
                "disk.qcow2".to_owned()
            ]
        );
    }

    #[test]
    fn metadata_tar_defaults_to_empty_manifest() {
        let (_dir, store) = store();
        let id = Uuid::new_v4();
        let e = entries(&store.metadata_tar(id).unwrap());
        assert_eq!(e[0].0, format!("{id}.json"));
        assert_eq!(e[0].1, "{}");
    }

    #[test]
    fn remove_clears_output_dir() {
        let (_dir, store) = store();
        let id = Uuid::new_v4();
        store.write_image(id, "x.img", b"x").unwrap();
        assert!(store.image_path(id, "x.img").is_some());
        store.remove(id).unwrap();
        assert!(store.image_path(id, "x.img").is_none());
        store.remove(id).unwrap();
    }
}
