use std::collections::BTreeSet;

use anyhow::{anyhow, bail, Result};
use dicom_core::Tag;
use serde::{Deserialize, Serialize};

use crate::dicom::{parse_tag, tag_name};
use crate::error::EditError;
use crate::row::format_tag;

const DEFAULT_PROTECTED_GROUPS: &[&str] = &["0002", "5000-50FF", "6000-60FF", "7FE0"];

const DEFAULT_PROTECTED_TAGS: &[&str] = &[
    "Rows",
    "Columns",
    "PhotometricInterpretation",
    "SamplesPerPixel",
    "BitsAllocated",
    "BitsStored",
    "HighBit",
    "PixelRepresentation",
    "PlanarConfiguration",
    "NumberOfFrames",
    "PixelData",
];

/// Inclusive range of tag groups, e.g. the repeating overlay groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupRange {
    pub first: u16,
    pub last: u16,
}

impl GroupRange {
    pub fn single(group: u16) -> Self {
        Self {
            first: group,
            last: group,
        }
    }

    pub fn contains(&self, tag: Tag) -> bool {
        (self.first..=self.last).contains(&tag.group())
    }

    /// Parses `gggg` or `gggg-gggg` (hex).
    pub fn parse(text: &str) -> Result<Self> {
        let group = |part: &str| {
            let part = part.trim();
            u16::from_str_radix(part, 16).map_err(|_| anyhow!("'{part}' is not a hex tag group"))
        };
        let range = match text.split_once('-') {
            Some((first, last)) => Self {
                first: group(first)?,
                last: group(last)?,
            },
            None => Self::single(group(text)?),
        };
        if range.first > range.last {
            bail!("group range '{text}' is reversed");
        }
        Ok(range)
    }
}

/// Tag lists as they appear in the settings file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicySettings {
    pub protected_groups: Vec<String>,
    /// Dictionary keywords or `(gggg,eeee)` tags.
    pub protected_tags: Vec<String>,
}

impl Default for PolicySettings {
    fn default() -> Self {
        Self {
            protected_groups: DEFAULT_PROTECTED_GROUPS
                .iter()
                .map(|group| group.to_string())
                .collect(),
            protected_tags: DEFAULT_PROTECTED_TAGS
                .iter()
                .map(|tag| tag.to_string())
                .collect(),
        }
    }
}

/// Which tags may not be modified, deleted or inserted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditPolicy {
    pub protected_groups: Vec<GroupRange>,
    pub protected_tags: BTreeSet<Tag>,
}

impl Default for EditPolicy {
    fn default() -> Self {
        // the built-in lists are all valid
        Self::from_settings(&PolicySettings::default()).unwrap_or_else(|_| Self::permissive())
    }
}

impl EditPolicy {
    pub fn permissive() -> Self {
        Self {
            protected_groups: Vec::new(),
            protected_tags: BTreeSet::new(),
        }
    }

    pub fn from_settings(settings: &PolicySettings) -> Result<Self> {
        let protected_groups = settings
            .protected_groups
            .iter()
            .map(|text| GroupRange::parse(text))
            .collect::<Result<Vec<_>>>()?;
        let protected_tags = settings
            .protected_tags
            .iter()
            .map(|text| parse_tag(text).ok_or_else(|| anyhow!("'{text}' is not a known tag")))
            .collect::<Result<BTreeSet<_>>>()?;
        Ok(Self {
            protected_groups,
            protected_tags,
        })
    }

    pub fn is_protected(&self, tag: Tag) -> bool {
        self.protected_tags.contains(&tag)
            || self.protected_groups.iter().any(|range| range.contains(tag))
    }

    pub fn check(&self, tag: Tag) -> Result<(), EditError> {
        if self.is_protected(tag) {
            log::warn!("refused edit of protected tag {}", format_tag(tag));
            return Err(EditError::StructuralGuard {
                tag: format_tag(tag),
                name: tag_name(tag),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_guards_geometry_and_reserved_groups() {
        let policy = EditPolicy::default();
        assert!(policy.is_protected(Tag(0x0028, 0x0010)));
        assert!(policy.is_protected(Tag(0x0028, 0x0011)));
        assert!(policy.is_protected(Tag(0x7FE0, 0x0010)));
        assert!(policy.is_protected(Tag(0x0002, 0x0010)));
        assert!(policy.is_protected(Tag(0x6002, 0x3000)));
        assert!(policy.is_protected(Tag(0x501E, 0x0010)));
        assert!(!policy.is_protected(Tag(0x0010, 0x0010)));
        assert!(!policy.is_protected(Tag(0x0008, 0x1140)));
    }

    #[test]
    fn check_names_the_rejected_tag() {
        let err = EditPolicy::default()
            .check(Tag(0x0028, 0x0010))
            .expect_err("Rows is protected");
        assert_eq!(
            err,
            EditError::StructuralGuard {
                tag: "(0028,0010)".to_string(),
                name: "Rows".to_string(),
            }
        );
        assert!(EditPolicy::permissive().check(Tag(0x0028, 0x0010)).is_ok());
    }

    #[test]
    fn settings_accept_keywords_and_numeric_tags() {
        let settings = PolicySettings {
            protected_groups: vec!["0009-000B".to_string()],
            protected_tags: vec!["PatientID".to_string(), "(0010,0030)".to_string()],
        };
        let policy = EditPolicy::from_settings(&settings).expect("valid settings");
        assert!(policy.is_protected(Tag(0x0010, 0x0020)));
        assert!(policy.is_protected(Tag(0x0010, 0x0030)));
        assert!(policy.is_protected(Tag(0x000A, 0x0001)));
        assert!(!policy.is_protected(Tag(0x0028, 0x0010)));
    }

    #[test]
    fn malformed_settings_are_rejected() {
        let bad_tag = PolicySettings {
            protected_tags: vec!["NoSuchKeyword".to_string()],
            ..PolicySettings::default()
        };
        assert!(EditPolicy::from_settings(&bad_tag).is_err());

        let reversed = PolicySettings {
            protected_groups: vec!["60FF-6000".to_string()],
            ..PolicySettings::default()
        };
        assert!(EditPolicy::from_settings(&reversed).is_err());
        assert!(GroupRange::parse("zz").is_err());
    }
}
