//! Read-only access to a WAR or AMP: either a zip archive or an exploded directory.

use super::ModuleError;
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use zip::result::ZipError;
use zip::ZipArchive;

pub const MANIFEST_PATH: &str = "META-INF/MANIFEST.MF";

#[derive(Clone, Debug)]
pub enum WarSource {
    Archive(PathBuf),
    Directory(PathBuf),
}

impl WarSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ModuleError> {
        let path = path.as_ref();
        if path.is_dir() {
            Ok(WarSource::Directory(path.to_path_buf()))
        } else if path.is_file() {
            Ok(WarSource::Archive(path.to_path_buf()))
        } else {
            Err(ModuleError::NotFound(path.display().to_string()))
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            WarSource::Archive(p) | WarSource::Directory(p) => p,
        }
    }

    /// Bytes of the entry at `name` (slash-separated, relative to the root), if present.
    pub fn read(&self, name: &str) -> Result<Option<Vec<u8>>, ModuleError> {
        let name = name.trim_start_matches('/');
        match self {
            WarSource::Directory(root) => {
                let path = root.join(name);
                if !path.is_file() {
                    return Ok(None);
                }
                Ok(Some(std::fs::read(path)?))
            }
            WarSource::Archive(path) => {
                let mut archive = ZipArchive::new(File::open(path)?)?;
                let mut entry = match archive.by_name(name) {
                    Ok(entry) => entry,
                    Err(ZipError::FileNotFound) => return Ok(None),
                    Err(e) => return Err(e.into()),
                };
                let mut buf = Vec::new();
                entry.read_to_end(&mut buf)?;
                Ok(Some(buf))
            }
        }
    }

    pub fn read_string(&self, name: &str) -> Result<Option<String>, ModuleError> {
        Ok(self.read(name)?.map(|b| String::from_utf8_lossy(&b).into_owned()))
    }

    /// Main attributes of `META-INF/MANIFEST.MF`; empty when there is no manifest.
    pub fn manifest(&self) -> Result<HashMap<String, String>, ModuleError> {
        Ok(self
            .read_string(MANIFEST_PATH)?
            .map(|text| parse_manifest(&text))
            .unwrap_or_default())
    }
}

/// Parse the main section of a JAR manifest. Lines starting with a single space continue the
/// previous value; the main section ends at the first blank line.
pub fn parse_manifest(text: &str) -> HashMap<String, String> {
    let mut attributes = HashMap::new();
    let mut current: Option<(String, String)> = None;
    for line in text.lines() {
        if let Some(continued) = line.strip_prefix(' ') {
            if let Some((_, value)) = current.as_mut() {
                value.push_str(continued);
            }
            continue;
        }
        if let Some((k, v)) = current.take() {
            attributes.insert(k, v);
        }
        if line.trim().is_empty() {
            break;
        }
        if let Some((k, v)) = line.split_once(':') {
            current = Some((k.trim().to_string(), v.trim_start().to_string()));
        }
    }
    if let Some((k, v)) = current {
        attributes.insert(k, v);
    }
    attributes
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    #[test]
    fn manifest_continuations_and_sections() {
        let text = "Manifest-Version: 1.0\r\nImplementation-Title: Alfresco Repository Commu\r\n nity\r\nSpecification-Version: 4.2.0\r\n\r\nName: other\r\nSpecification-Version: 9\r\n";
        let m = parse_manifest(text);
        assert_eq!(m["Implementation-Title"], "Alfresco Repository Community");
        assert_eq!(m["Specification-Version"], "4.2.0");
        assert!(!m.contains_key("Name"));
    }

    #[test]
    fn archive_and_directory_read_the_same_entries() {
        let dir = tempfile::tempdir().unwrap();
        let exploded = dir.path().join("war");
        std::fs::create_dir_all(exploded.join("META-INF")).unwrap();
        std::fs::write(exploded.join(MANIFEST_PATH), "Specification-Title: Alfresco Share\n").unwrap();

        let archive_path = dir.path().join("share.war");
        let mut zip = ZipWriter::new(File::create(&archive_path).unwrap());
        zip.start_file(MANIFEST_PATH, SimpleFileOptions::default()).unwrap();
        zip.write_all(b"Specification-Title: Alfresco Share\n").unwrap();
        zip.finish().unwrap();

        for source in [WarSource::open(&exploded).unwrap(), WarSource::open(&archive_path).unwrap()] {
            assert_eq!(source.manifest().unwrap()["Specification-Title"], "Alfresco Share");
            assert!(source.read("WEB-INF/missing").unwrap().is_none());
        }
        assert!(matches!(WarSource::open(dir.path().join("nope.war")), Err(ModuleError::NotFound(_))));
    }
}
