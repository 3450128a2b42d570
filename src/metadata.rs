//! Enrichment Metadata
//!
//! The monitoring agent drops `key=value` property files on the host that
//! should be attached to every piece of telemetry as resource attributes.
//! None of them are required to exist.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

/// Indirection file in the working directory; its content is the path of
/// the real properties file.
pub const INDIRECT_METADATA_FILE: &str = "dt_metadata_e617c525669e072eebe3d0f08212e8f2.properties";

/// Host-level enrichment file written by the agent.
pub const HOST_METADATA_FILE: &str = "/var/lib/dynatrace/enrichment/dt_metadata.properties";

/// A place to look for metadata properties
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataSource {
    /// The path is the properties file itself.
    Direct(PathBuf),
    /// The path holds the location of the properties file.
    Indirect(PathBuf),
}

impl MetadataSource {
    fn read(&self) -> io::Result<String> {
        match self {
            MetadataSource::Direct(path) => fs::read_to_string(path),
            MetadataSource::Indirect(pointer) => {
                let target = fs::read_to_string(pointer)?;
                fs::read_to_string(Path::new(target.trim()))
            }
        }
    }
}

/// The sources checked at startup, in order.
pub fn default_sources() -> Vec<MetadataSource> {
    vec![
        MetadataSource::Indirect(PathBuf::from(INDIRECT_METADATA_FILE)),
        MetadataSource::Direct(PathBuf::from(HOST_METADATA_FILE)),
    ]
}

/// Load all properties from `sources` into one map.
///
/// Later sources (and later lines) overwrite earlier values for the same key.
/// Unreadable sources are skipped.
pub fn load_metadata(sources: &[MetadataSource]) -> BTreeMap<String, String> {
    let mut metadata = BTreeMap::new();

    for source in sources {
        let content = match source.read() {
            Ok(content) => content,
            Err(e) => {
                debug!(source = ?source, error = %e, "Skipping metadata source");
                continue;
            }
        };

        for (key, value) in content.lines().filter_map(parse_line) {
            metadata.insert(key, value);
        }
    }

    metadata
}

fn parse_line(line: &str) -> Option<(String, String)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    let (key, value) = line.split_once('=')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }

    Some((key.to_string(), value.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_reads_key_value_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dt_metadata.properties");
        fs::write(&path, "a=1\nb=2\n").unwrap();

        let metadata = load_metadata(&[MetadataSource::Direct(path)]);

        assert_eq!(metadata.len(), 2);
        assert_eq!(metadata.get("a").map(String::as_str), Some("1"));
        assert_eq!(metadata.get("b").map(String::as_str), Some("2"));
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let metadata = load_metadata(&[
            MetadataSource::Direct(dir.path().join("missing.properties")),
            MetadataSource::Indirect(dir.path().join("missing-pointer.properties")),
        ]);
        assert!(metadata.is_empty());
    }

    #[test]
    fn test_indirect_source_follows_pointer() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("real.properties");
        let pointer = dir.path().join("pointer.properties");
        fs::write(&target, "dt.entity.host=HOST-42\n").unwrap();
        fs::write(&pointer, format!("{}\n", target.display())).unwrap();

        let metadata = load_metadata(&[MetadataSource::Indirect(pointer)]);

        assert_eq!(
            metadata.get("dt.entity.host").map(String::as_str),
            Some("HOST-42")
        );
    }

    #[test]
    fn test_later_sources_win() {
        let dir = tempdir().unwrap();
        let first = dir.path().join("first.properties");
        let second = dir.path().join("second.properties");
        fs::write(&first, "shared=first\nonly_first=yes\n").unwrap();
        fs::write(&second, "shared=second\n").unwrap();

        let metadata = load_metadata(&[
            MetadataSource::Direct(first),
            MetadataSource::Direct(dir.path().join("gap.properties")),
            MetadataSource::Direct(second),
        ]);

        assert_eq!(metadata.get("shared").map(String::as_str), Some("second"));
        assert_eq!(metadata.get("only_first").map(String::as_str), Some("yes"));
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mixed.properties");
        fs::write(
            &path,
            "# comment\n\nno-separator\n=orphan\nurl=http://host/?q=1\n  spaced = value  \n",
        )
        .unwrap();

        let metadata = load_metadata(&[MetadataSource::Direct(path)]);

        assert_eq!(metadata.len(), 2);
        assert_eq!(
            metadata.get("url").map(String::as_str),
            Some("http://host/?q=1")
        );
        assert_eq!(metadata.get("spaced").map(String::as_str), Some("value"));
    }
}
