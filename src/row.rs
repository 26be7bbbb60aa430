use dicom_core::Tag;

pub const ITEM_TAG: Tag = Tag(0xFFFE, 0xE000);
pub const ITEM_DELIMITER_TAG: Tag = Tag(0xFFFE, 0xE00D);
pub const SEQUENCE_DELIMITER_TAG: Tag = Tag(0xFFFE, 0xE0DD);

pub const ITEM_VR: &str = "na";
pub const SEQUENCE_DELIMITER_VR: &str = "??";

pub const ITEM_DESCRIPTION: &str = "Item";
pub const ITEM_DELIMITER_DESCRIPTION: &str = "ItemDelimitationItem";
pub const SEQUENCE_DELIMITER_DESCRIPTION: &str = "SequenceDelimitationItem";

const INDENT_UNIT: &str = "  ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RowKind {
    Element,
    SequenceHeader,
    Item,
    ItemDelimiter,
    SequenceDelimiter,
}

/// One line of the flattened tag table.
///
/// `position` is the row's index in the list it was flattened into and
/// `parent` the position of the enclosing sequence header or item row.
/// Both are only meaningful until the next flatten pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub kind: RowKind,
    pub tag: Tag,
    pub vr: String,
    pub vm: u32,
    pub length: Option<u32>,
    pub description: String,
    pub value: String,
    pub depth: usize,
    pub position: usize,
    pub parent: Option<usize>,
}

impl Row {
    pub fn element(
        tag: Tag,
        vr: impl Into<String>,
        vm: u32,
        length: Option<u32>,
        description: impl Into<String>,
        value: impl Into<String>,
        depth: usize,
    ) -> Self {
        Self {
            kind: RowKind::Element,
            tag,
            vr: vr.into(),
            vm,
            length,
            description: description.into(),
            value: value.into(),
            depth,
            position: 0,
            parent: None,
        }
    }

    pub fn sequence_header(
        tag: Tag,
        item_count: u32,
        length: Option<u32>,
        description: impl Into<String>,
        depth: usize,
    ) -> Self {
        Self {
            kind: RowKind::SequenceHeader,
            vr: "SQ".to_string(),
            ..Self::element(tag, "", item_count, length, description, "", depth)
        }
    }

    pub fn item(member_count: u32, depth: usize) -> Self {
        Self {
            kind: RowKind::Item,
            ..Self::element(
                ITEM_TAG,
                ITEM_VR,
                member_count,
                None,
                ITEM_DESCRIPTION,
                "",
                depth,
            )
        }
    }

    pub fn item_delimiter(depth: usize) -> Self {
        Self {
            kind: RowKind::ItemDelimiter,
            ..Self::element(
                ITEM_DELIMITER_TAG,
                ITEM_VR,
                0,
                Some(0),
                ITEM_DELIMITER_DESCRIPTION,
                "",
                depth,
            )
        }
    }

    pub fn sequence_delimiter(depth: usize) -> Self {
        Self {
            kind: RowKind::SequenceDelimiter,
            ..Self::element(
                SEQUENCE_DELIMITER_TAG,
                SEQUENCE_DELIMITER_VR,
                0,
                Some(0),
                SEQUENCE_DELIMITER_DESCRIPTION,
                "",
                depth,
            )
        }
    }

    pub fn is_delimiter(&self) -> bool {
        matches!(
            self.kind,
            RowKind::ItemDelimiter | RowKind::SequenceDelimiter
        )
    }

    /// Rows that open a nesting scope: sequence headers and items.
    pub fn opens_scope(&self) -> bool {
        matches!(self.kind, RowKind::SequenceHeader | RowKind::Item)
    }

    pub fn tag_text(&self) -> String {
        format_tag(self.tag)
    }

    pub fn indented_tag(&self) -> String {
        format!("{}{}", INDENT_UNIT.repeat(self.depth), self.tag_text())
    }

    pub fn vm_text(&self) -> String {
        self.vm.to_string()
    }

    pub fn length_text(&self) -> String {
        match self.length {
            Some(length) => length.to_string(),
            None => "undefined".to_string(),
        }
    }

    /// Case-insensitive match of `needle` against the six display columns.
    pub fn contains(&self, needle: &str) -> bool {
        let needle = needle.to_uppercase();
        [
            self.tag_text(),
            self.vr.clone(),
            self.vm_text(),
            self.length_text(),
            self.description.clone(),
            self.value.clone(),
        ]
        .iter()
        .any(|column| column.to_uppercase().contains(&needle))
    }
}

pub fn format_tag(tag: Tag) -> String {
    format!("({:04X},{:04X})", tag.group(), tag.element())
}

/// Rows matching `needle`; every row when the needle is blank.
pub fn filter_rows<'a>(rows: &'a [Row], needle: &str) -> Vec<&'a Row> {
    let needle = needle.trim();
    if needle.is_empty() {
        return rows.iter().collect();
    }
    rows.iter().filter(|row| row.contains(needle)).collect()
}
