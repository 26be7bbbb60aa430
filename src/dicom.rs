use std::path::Path;
use std::sync::OnceLock;
use std::{fs, io::Cursor};

use anyhow::{Context, Result};
use dicom_core::dictionary::{DataDictionary, DataDictionaryEntry};
use dicom_core::value::DataSetSequence;
use dicom_core::{DataElement, Length, PrimitiveValue, Tag, VR};
use dicom_dictionary_std::StandardDataDictionary;
use dicom_object::mem::InMemElement;
use dicom_object::{
    from_reader, open_file, DefaultDicomObject, FileMetaTable, FileMetaTableBuilder,
    InMemDicomObject, ReadError,
};

use crate::error::EditError;

const EXPLICIT_VR_LITTLE_ENDIAN: &str = "1.2.840.10008.1.2.1";

pub fn open_dicom_object(path: &Path) -> Result<DefaultDicomObject> {
    let err = match open_file(path) {
        Ok(obj) => return Ok(obj),
        Err(err) => err,
    };

    if is_missing_meta_group_length_error(&err) {
        let bytes = fs::read(path).with_context(|| format!("Could not read {}", path.display()))?;
        if let Some(repaired) = repair_missing_meta_group_length(&bytes) {
            log::warn!(
                "{} has no (0002,0000) group length, reading repaired copy",
                path.display()
            );
            // reading starts at the "DICM" magic, after any preamble
            let start = preamble_end(&repaired).map_or(0, |end| end - 4);
            return from_reader(Cursor::new(&repaired[start..])).with_context(|| {
                format!(
                    "Could not open {} after repairing File Meta Information Group Length",
                    path.display()
                )
            });
        }
    }

    Err(err).with_context(|| format!("Could not open {}", path.display()))
}

/// Writes `dataset` to `path`, reusing the meta table read with the file.
pub fn save_dicom_object(
    meta: Option<&FileMetaTable>,
    dataset: &InMemDicomObject,
    path: &Path,
) -> Result<()> {
    let file_object = match meta {
        Some(meta) => dataset.clone().with_exact_meta(meta.clone()),
        None => dataset
            .clone()
            .with_meta(FileMetaTableBuilder::new().transfer_syntax(EXPLICIT_VR_LITTLE_ENDIAN))
            .context("Could not build File Meta Information for the data set")?,
    };

    file_object
        .write_to_file(path)
        .with_context(|| format!("Could not write {}", path.display()))
}

fn is_missing_meta_group_length_error(error: &ReadError) -> bool {
    matches!(
        error,
        ReadError::ParseMetaDataSet {
            source: dicom_object::meta::Error::UnexpectedTag { tag, .. }
        } if tag.group() == 0x0002 && tag.element() != 0x0000
    )
}

fn repair_missing_meta_group_length(bytes: &[u8]) -> Option<Vec<u8>> {
    let offset = preamble_end(bytes)?;
    let first = read_tag_le(bytes, offset)?;
    if first.group() != 0x0002 || first.element() == 0x0000 {
        return None;
    }

    let group_len = u32::try_from(meta_group_span(bytes, offset)?).ok()?;

    let mut group_length_element = Vec::with_capacity(12);
    group_length_element.extend_from_slice(&0x0002u16.to_le_bytes());
    group_length_element.extend_from_slice(&0x0000u16.to_le_bytes());
    group_length_element.extend_from_slice(b"UL");
    group_length_element.extend_from_slice(&4u16.to_le_bytes());
    group_length_element.extend_from_slice(&group_len.to_le_bytes());

    let mut repaired = Vec::with_capacity(bytes.len() + group_length_element.len());
    repaired.extend_from_slice(&bytes[..offset]);
    repaired.extend_from_slice(&group_length_element);
    repaired.extend_from_slice(&bytes[offset..]);
    Some(repaired)
}

fn preamble_end(bytes: &[u8]) -> Option<usize> {
    if bytes.get(128..132) == Some(b"DICM".as_slice()) {
        Some(132)
    } else if bytes.get(..4) == Some(b"DICM".as_slice()) {
        Some(4)
    } else {
        None
    }
}

fn read_tag_le(bytes: &[u8], at: usize) -> Option<Tag> {
    let raw = bytes.get(at..at + 4)?;
    Some(Tag(
        u16::from_le_bytes([raw[0], raw[1]]),
        u16::from_le_bytes([raw[2], raw[3]]),
    ))
}

/// Byte length of the explicit VR little endian group 0002 run at `start`.
fn meta_group_span(bytes: &[u8], start: usize) -> Option<usize> {
    let mut position = start;
    while let Some(tag) = read_tag_le(bytes, position) {
        if tag.group() != 0x0002 {
            break;
        }
        let vr = bytes.get(position + 4..position + 6)?;
        let long_form = matches!(
            vr,
            b"OB" | b"OD" | b"OF" | b"OL" | b"OW" | b"SQ" | b"UC" | b"UR" | b"UT" | b"UN"
        );
        let (header_len, value_len) = if long_form {
            let raw = bytes.get(position + 8..position + 12)?;
            let len = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
            if len == u32::MAX {
                return None;
            }
            (12, len as usize)
        } else {
            let raw = bytes.get(position + 6..position + 8)?;
            (8, u16::from_le_bytes([raw[0], raw[1]]) as usize)
        };

        let next = position.checked_add(header_len)?.checked_add(value_len)?;
        if next > bytes.len() {
            return None;
        }
        position = next;
    }

    (position > start).then(|| position - start)
}

/// Dictionary keyword for `tag`, with the usual placeholders for unknown tags.
pub fn tag_name(tag: Tag) -> String {
    if let Some(entry) = StandardDataDictionary.by_tag(tag) {
        return entry.alias().to_string();
    }
    if tag.element() == 0x0000 {
        "GenericGroupLength".to_string()
    } else if tag.group() % 2 == 1 {
        "PrivateTag".to_string()
    } else {
        "Unknown Tag & Data".to_string()
    }
}

/// Value representation the standard dictionary gives `tag`.
///
/// Context-dependent entries such as pixel data resolve to their usual
/// VR (`US` or `OW`).
pub fn dictionary_vr(tag: Tag) -> Option<VR> {
    StandardDataDictionary
        .by_tag(tag)
        .map(|entry| entry.vr().relaxed())
}

/// A standard attribute offered when choosing a tag to insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DictionaryTag {
    pub tag: Tag,
    pub keyword: String,
    pub vr: VR,
}

// Groups with standard attributes. Repeating groups (50xx, 60xx, 7Fxx)
// are listed once, at their zeroed form.
const DICTIONARY_GROUPS: &[u16] = &[
    0x0002, 0x0004, 0x0006, 0x0008, 0x0010, 0x0012, 0x0014, 0x0016, 0x0018, 0x0020, 0x0022,
    0x0024, 0x0028, 0x0032, 0x0034, 0x0038, 0x003A, 0x0040, 0x0042, 0x0044, 0x0046, 0x0048,
    0x0050, 0x0052, 0x0054, 0x0060, 0x0062, 0x0064, 0x0066, 0x0068, 0x006A, 0x0070, 0x0072,
    0x0074, 0x0076, 0x0078, 0x0080, 0x0082, 0x0088, 0x0100, 0x0400, 0x1000, 0x1010, 0x2000,
    0x2010, 0x2020, 0x2030, 0x2040, 0x2050, 0x2100, 0x2110, 0x2120, 0x2130, 0x2200, 0x3002,
    0x3004, 0x3006, 0x3008, 0x300A, 0x300C, 0x300E, 0x3010, 0x4000, 0x4008, 0x4010, 0x4FFE,
    0x5000, 0x5200, 0x5400, 0x5600, 0x6000, 0x7F00, 0x7FE0, 0xFFFA, 0xFFFC,
];

/// Standard attributes that can be placed in a data set, in tag order.
///
/// Built on first use. Command (0000,xxxx) and item/delimitation
/// (FFFE,xxxx) tags are left out.
pub fn dictionary_tags() -> &'static [DictionaryTag] {
    static TAGS: OnceLock<Vec<DictionaryTag>> = OnceLock::new();
    TAGS.get_or_init(|| {
        let mut tags = DICTIONARY_GROUPS
            .iter()
            .flat_map(|&group| (0..=u16::MAX).map(move |element| Tag(group, element)))
            .filter_map(dictionary_entry)
            .collect::<Vec<_>>();
        tags.sort_by_key(|entry| entry.tag);
        log::debug!("indexed {} dictionary tags", tags.len());
        tags
    })
}

fn dictionary_entry(tag: Tag) -> Option<DictionaryTag> {
    let dictionary = StandardDataDictionary;
    let entry = dictionary.by_tag(tag)?;
    // generic and repeating entries answer for many tags; keep only their own
    if entry.tag() != tag {
        return None;
    }
    Some(DictionaryTag {
        tag,
        keyword: entry.alias().to_string(),
        vr: entry.vr().relaxed(),
    })
}

/// Entries whose keyword or `(gggg,eeee)` text contains `needle`, ignoring case.
pub fn search_dictionary<'a>(entries: &'a [DictionaryTag], needle: &str) -> Vec<&'a DictionaryTag> {
    let needle = needle.trim().to_lowercase();
    entries
        .iter()
        .filter(|entry| {
            needle.is_empty()
                || entry.keyword.to_lowercase().contains(&needle)
                || crate::row::format_tag(entry.tag).to_lowercase().contains(&needle)
        })
        .collect()
}

/// Accepts `(gggg,eeee)`, `gggg,eeee`, `ggggeeee` or a dictionary keyword.
pub fn parse_tag(text: &str) -> Option<Tag> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    let inner = trimmed.trim_start_matches('(').trim_end_matches(')');
    let numeric = match inner.split_once(',') {
        Some((group, element)) => parse_tag_parts(group.trim(), element.trim()),
        None if inner.len() == 8 => parse_tag_parts(&inner[..4], &inner[4..]),
        None => None,
    };
    numeric.or_else(|| StandardDataDictionary.parse_tag(trimmed))
}

fn parse_tag_parts(group: &str, element: &str) -> Option<Tag> {
    let is_hex4 = |part: &str| part.len() == 4 && part.chars().all(|c| c.is_ascii_hexdigit());
    if !is_hex4(group) || !is_hex4(element) {
        return None;
    }
    Some(Tag(
        u16::from_str_radix(group, 16).ok()?,
        u16::from_str_radix(element, 16).ok()?,
    ))
}

pub fn parse_vr(text: &str) -> Option<VR> {
    match text.trim().to_ascii_uppercase().as_bytes() {
        [first, second] => VR::from_binary([*first, *second]),
        _ => None,
    }
}

pub fn vr_code(vr: VR) -> String {
    String::from(vr.to_string())
}

pub fn element_length(element: &InMemElement) -> Option<u32> {
    element.header().len.get()
}

/// Display text for an element: at most `limit` values, space separated.
pub fn element_value_text(element: &InMemElement, limit: usize) -> String {
    let value = element.value();
    match value.primitive() {
        Some(primitive) => primitive
            .to_multi_str()
            .iter()
            .take(limit)
            .map(|part| part.trim_end_matches(|c: char| c == '\0' || c == ' '))
            .collect::<Vec<_>>()
            .join(" "),
        None => match value.fragments() {
            Some(fragments) => format!("<encapsulated pixel data, {} fragments>", fragments.len()),
            None => String::new(),
        },
    }
}

/// Backslash-joined value as it would be typed back into an edit field.
pub fn element_edit_text(element: &InMemElement) -> String {
    element
        .value()
        .primitive()
        .map(|primitive| {
            primitive
                .to_multi_str()
                .iter()
                .map(|part| part.trim_end_matches(|c: char| c == '\0' || c == ' '))
                .collect::<Vec<_>>()
                .join("\\")
        })
        .unwrap_or_default()
}

/// File meta information group as `(tag, vr, value)` entries in tag order.
pub fn meta_entries(meta: &FileMetaTable) -> Vec<(Tag, VR, String)> {
    let clean = |value: &str| value.trim_end_matches(|c: char| c == '\0' || c == ' ').to_string();
    let mut entries = vec![
        (
            Tag(0x0002, 0x0000),
            VR::UL,
            meta.information_group_length.to_string(),
        ),
        (
            Tag(0x0002, 0x0001),
            VR::OB,
            format!(
                "{} {}",
                meta.information_version[0], meta.information_version[1]
            ),
        ),
        (
            Tag(0x0002, 0x0002),
            VR::UI,
            clean(&meta.media_storage_sop_class_uid),
        ),
        (
            Tag(0x0002, 0x0003),
            VR::UI,
            clean(&meta.media_storage_sop_instance_uid),
        ),
        (Tag(0x0002, 0x0010), VR::UI, clean(&meta.transfer_syntax)),
        (
            Tag(0x0002, 0x0012),
            VR::UI,
            clean(&meta.implementation_class_uid),
        ),
    ];
    if let Some(name) = meta.implementation_version_name.as_deref() {
        entries.push((Tag(0x0002, 0x0013), VR::SH, clean(name)));
    }
    if let Some(title) = meta.source_application_entity_title.as_deref() {
        entries.push((Tag(0x0002, 0x0016), VR::AE, clean(title)));
    }
    entries
}

pub fn find_element(scope: &InMemDicomObject, tag: Tag) -> Option<&InMemElement> {
    scope.element(tag).ok()
}

/// Items of the sequence `tag` in `scope`; `None` when `tag` is absent or not a sequence.
pub fn find_sequence(scope: &InMemDicomObject, tag: Tag) -> Option<&[InMemDicomObject]> {
    find_element(scope, tag)?.items()
}

pub fn sequence_element(tag: Tag, items: Vec<InMemDicomObject>) -> InMemElement {
    DataElement::new(tag, VR::SQ, DataSetSequence::new(items, Length::UNDEFINED))
}

pub fn put_value(scope: &mut InMemDicomObject, tag: Tag, vr: VR, text: &str) -> Result<(), EditError> {
    let value = parse_value(vr, text)?;
    scope.put(DataElement::new(tag, vr, value));
    Ok(())
}

pub fn delete_element(scope: &mut InMemDicomObject, tag: Tag) -> Result<(), EditError> {
    if scope.remove_element(tag) {
        Ok(())
    } else {
        Err(EditError::not_found(format!(
            "{} in the selected scope",
            crate::row::format_tag(tag)
        )))
    }
}

pub fn delete_item(items: &mut Vec<InMemDicomObject>, ordinal: usize) -> Result<(), EditError> {
    if ordinal >= items.len() {
        return Err(EditError::not_found(format!(
            "item #{ordinal} (sequence has {} items)",
            items.len()
        )));
    }
    items.remove(ordinal);
    Ok(())
}

pub fn insert_item(items: &mut Vec<InMemDicomObject>) -> usize {
    items.push(InMemDicomObject::new_empty());
    items.len() - 1
}

pub fn insert_element(scope: &mut InMemDicomObject, element: InMemElement) -> Result<(), EditError> {
    let tag = element.header().tag;
    if find_element(scope, tag).is_some() {
        return Err(EditError::invalid_operation(format!(
            "{} already exists in the selected scope",
            crate::row::format_tag(tag)
        )));
    }
    scope.put(element);
    Ok(())
}

/// Converts backslash-separated text into a value of the given VR.
pub fn parse_value(vr: VR, text: &str) -> Result<PrimitiveValue, EditError> {
    let code = vr_code(vr);
    if text.trim().is_empty() {
        return Err(EditError::invalid_value(code, "value is empty"));
    }

    let parts: Vec<&str> = if is_single_valued(vr) {
        vec![text]
    } else {
        text.split('\\').collect()
    };

    let value = match vr {
        VR::SQ => {
            return Err(EditError::invalid_value(
                code,
                "a sequence holds items, not a text value",
            ))
        }
        VR::US | VR::OW => PrimitiveValue::U16(parse_numbers(&code, &parts)?.into_iter().collect()),
        VR::SS => PrimitiveValue::I16(parse_numbers(&code, &parts)?.into_iter().collect()),
        VR::UL | VR::OL => PrimitiveValue::U32(parse_numbers(&code, &parts)?.into_iter().collect()),
        VR::SL => PrimitiveValue::I32(parse_numbers(&code, &parts)?.into_iter().collect()),
        VR::UV | VR::OV => PrimitiveValue::U64(parse_numbers(&code, &parts)?.into_iter().collect()),
        VR::SV => PrimitiveValue::I64(parse_numbers(&code, &parts)?.into_iter().collect()),
        VR::FL | VR::OF => PrimitiveValue::F32(parse_numbers(&code, &parts)?.into_iter().collect()),
        VR::FD | VR::OD => PrimitiveValue::F64(parse_numbers(&code, &parts)?.into_iter().collect()),
        VR::OB | VR::UN => PrimitiveValue::U8(parse_numbers(&code, &parts)?.into_iter().collect()),
        VR::AT => {
            let tags = parts
                .iter()
                .map(|part| {
                    let inner = part.trim().trim_start_matches('(').trim_end_matches(')');
                    inner
                        .split_once(',')
                        .and_then(|(group, element)| parse_tag_parts(group.trim(), element.trim()))
                        .ok_or_else(|| {
                            EditError::invalid_value(&code, format!("'{}' is not a tag", part.trim()))
                        })
                })
                .collect::<Result<Vec<_>, _>>()?;
            PrimitiveValue::Tags(tags.into_iter().collect())
        }
        _ => {
            for part in &parts {
                check_string_value(vr, &code, part)?;
            }
            if parts.len() == 1 {
                PrimitiveValue::Str(parts[0].to_string())
            } else {
                PrimitiveValue::Strs(parts.iter().map(|part| part.to_string()).collect())
            }
        }
    };
    Ok(value)
}

fn is_single_valued(vr: VR) -> bool {
    matches!(vr, VR::LT | VR::ST | VR::UT | VR::UR)
}

fn parse_numbers<T: std::str::FromStr>(code: &str, parts: &[&str]) -> Result<Vec<T>, EditError> {
    parts
        .iter()
        .map(|part| {
            part.trim().parse::<T>().map_err(|_| {
                EditError::invalid_value(code, format!("'{}' is not a valid number", part.trim()))
            })
        })
        .collect()
}

fn max_value_len(vr: VR) -> Option<usize> {
    match vr {
        VR::AE | VR::CS | VR::DS | VR::SH | VR::TM => Some(16),
        VR::AS => Some(4),
        VR::DA => Some(8),
        VR::DT => Some(26),
        VR::IS => Some(12),
        VR::LO | VR::UI => Some(64),
        VR::PN => Some(3 * 64 + 2),
        VR::ST => Some(1024),
        VR::LT => Some(10240),
        _ => None,
    }
}

fn check_string_value(vr: VR, code: &str, value: &str) -> Result<(), EditError> {
    let reject = |reason: String| Err(EditError::invalid_value(code, reason));

    if let Some(max) = max_value_len(vr) {
        if value.len() > max {
            return reject(format!("'{value}' is longer than {max} characters"));
        }
    }

    let trimmed = value.trim();
    match vr {
        VR::DA => {
            if trimmed.len() != 8 || !trimmed.chars().all(|c| c.is_ascii_digit()) {
                return reject(format!("'{trimmed}' is not a date (YYYYMMDD)"));
            }
        }
        VR::TM => {
            let (clock, fraction) = trimmed.split_once('.').unwrap_or((trimmed, ""));
            let clock_ok = matches!(clock.len(), 2 | 4 | 6) && clock.chars().all(|c| c.is_ascii_digit());
            if !clock_ok || !fraction.chars().all(|c| c.is_ascii_digit()) {
                return reject(format!("'{trimmed}' is not a time (HHMMSS.FFFFFF)"));
            }
        }
        VR::IS => {
            let in_range = trimmed
                .parse::<i64>()
                .map(|number| (i32::MIN as i64..=i32::MAX as i64).contains(&number))
                .unwrap_or(false);
            if !in_range {
                return reject(format!("'{trimmed}' is not an integer string"));
            }
        }
        VR::DS => {
            if trimmed.parse::<f64>().is_err() {
                return reject(format!("'{trimmed}' is not a decimal string"));
            }
        }
        VR::UI => {
            let valid = !trimmed.is_empty()
                && trimmed
                    .split('.')
                    .all(|component| !component.is_empty() && component.chars().all(|c| c.is_ascii_digit()));
            if !valid {
                return reject(format!("'{trimmed}' is not a UID"));
            }
        }
        VR::AS => {
            let bytes = trimmed.as_bytes();
            let valid = bytes.len() == 4
                && bytes[..3].iter().all(u8::is_ascii_digit)
                && matches!(bytes[3], b'D' | b'W' | b'M' | b'Y');
            if !valid {
                return reject(format!("'{trimmed}' is not an age string (nnnD/W/M/Y)"));
            }
        }
        VR::CS => {
            if !value
                .chars()
                .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == ' ' || c == '_')
            {
                return reject(format!("'{value}' contains characters not allowed in a code string"));
            }
        }
        _ => {}
    }
    Ok(())
}
