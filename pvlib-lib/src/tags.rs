//! Event-tag descriptions, loaded from a `code=short;long` text file in
//! the resource directory. A missing or partial tag file is not fatal;
//! events simply lose their human-readable message.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

use tracing::warn;

/// Compiled-in fallback; `PVLIB_RESOURCE_DIR` overrides it at runtime.
const DEFAULT_RESOURCE_DIR: &str = "/usr/share/pvlib";

pub const TAG_FILE_NAME: &str = "en_US_tags.txt";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub short_desc: String,
    pub long_desc: String,
}

#[derive(Debug, Clone, Default)]
pub struct TagMap {
    tags: HashMap<u32, Tag>,
}

impl TagMap {
    pub fn new() -> Self {
        TagMap::default()
    }

    pub fn load(path: &Path) -> io::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(Self::parse(&content))
    }

    /// Parse `code=short;long` lines; anything else is logged and skipped.
    pub fn parse(content: &str) -> Self {
        let mut tags = HashMap::new();
        for line in content.lines() {
            if line.is_empty() {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                warn!("invalid tag line: {line}");
                continue;
            };
            let Some((short_desc, long_desc)) = value.split_once(';') else {
                warn!("invalid tag line: {line}");
                continue;
            };
            let Ok(code) = key.trim().parse::<u32>() else {
                warn!("invalid tag code: {key}");
                continue;
            };
            tags.insert(
                code,
                Tag {
                    short_desc: short_desc.to_string(),
                    long_desc: long_desc.to_string(),
                },
            );
        }
        TagMap { tags }
    }

    pub fn get(&self, code: u32) -> Option<&Tag> {
        self.tags.get(&code)
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }
}

/// Resource directory: `PVLIB_RESOURCE_DIR` if set, the compiled-in
/// default otherwise.
pub fn resources_path() -> PathBuf {
    match std::env::var_os("PVLIB_RESOURCE_DIR") {
        Some(dir) => PathBuf::from(dir),
        None => PathBuf::from(DEFAULT_RESOURCE_DIR),
    }
}

pub fn tag_file_path() -> PathBuf {
    resources_path().join(TAG_FILE_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_lines() {
        let tags = TagMap::parse("417=Grid fault;The grid operator caused a fault\n517=Alarm;An alarm was raised\n");
        assert_eq!(tags.len(), 2);
        let tag = tags.get(417).unwrap();
        assert_eq!(tag.short_desc, "Grid fault");
        assert_eq!(tag.long_desc, "The grid operator caused a fault");
    }

    #[test]
    fn skips_malformed_lines() {
        let tags = TagMap::parse("no separators\n417\n417=only short\nx=a;b\n517=ok;fine\n");
        assert_eq!(tags.len(), 1);
        assert!(tags.get(517).is_some());
        assert!(tags.get(417).is_none());
    }

    #[test]
    fn long_description_keeps_later_semicolons() {
        let tags = TagMap::parse("1=short;long; with; semicolons");
        assert_eq!(tags.get(1).unwrap().long_desc, "long; with; semicolons");
    }

    #[test]
    fn missing_lookups_are_none() {
        assert!(TagMap::new().get(417).is_none());
    }
}
