//! Répertoire de travail temporaire des encodeurs fichier
//!
//! Les pilotes GeoPackage, Shapefile et KML écrivent sur disque. Le
//! répertoire et tout son contenu sont supprimés au drop, y compris quand
//! l'encodage échoue ou que la tâche est abandonnée.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::trace;

/// Répertoire temporaire à durée de vie limitée à un encodage
#[derive(Debug)]
pub struct ScratchDir {
    dir: TempDir,
}

impl ScratchDir {
    /// Crée un répertoire sous `root` (ou sous le répertoire temporaire système)
    pub fn create(root: Option<&Path>) -> io::Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("correction-export-");
        let dir = match root {
            Some(root) => {
                fs::create_dir_all(root)?;
                builder.tempdir_in(root)?
            }
            None => builder.tempdir()?,
        };
        trace!(path = %dir.path().display(), "Scratch directory created");
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Chemin d'un fichier dans le répertoire
    pub fn file(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Fichiers présents, triés par nom
    pub fn entries(&self) -> io::Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(self.dir.path())? {
            let path = entry?.path();
            if path.is_file() {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scratch_removed_on_drop() {
        let path = {
            let scratch = ScratchDir::create(None).unwrap();
            fs::write(scratch.file("a.txt"), b"x").unwrap();
            fs::write(scratch.file("b.txt"), b"y").unwrap();
            assert_eq!(scratch.entries().unwrap().len(), 2);
            scratch.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn test_scratch_removed_on_error_path() {
        fn failing(root: &Path) -> Result<(), io::Error> {
            let scratch = ScratchDir::create(Some(root))?;
            fs::write(scratch.file("partial.shp"), b"\0\0")?;
            Err(io::Error::new(io::ErrorKind::Other, "writer failed"))
        }

        let root = tempfile::tempdir().unwrap();
        assert!(failing(root.path()).is_err());
        assert_eq!(fs::read_dir(root.path()).unwrap().count(), 0);
    }
}
