//! Projection of the nested data set onto the flat, indented row table.
//!
//! Every sequence becomes a header row followed by its items, each item
//! closed by an item delimiter row, and the sequence closed by a sequence
//! delimiter row at the header's depth:
//!
//! ```text
//! (0008,1140) SQ              depth d
//!   (FFFE,E000) Item          depth d+1
//!     ...members...           depth d+2
//!   (FFFE,E00D) ItemDelim     depth d+1
//! (FFFE,E0DD) SequenceDelim   depth d
//! ```

use dicom_core::VR;
use dicom_object::mem::InMemElement;
use dicom_object::{FileMetaTable, InMemDicomObject};

use crate::dicom::{element_length, element_value_text, meta_entries, tag_name, vr_code};
use crate::row::Row;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlattenOptions {
    /// Maximum number of values shown per element.
    pub value_limit: usize,
    /// Value text longer than this is cut and suffixed with `...`.
    pub max_value_chars: usize,
    pub include_meta: bool,
}

impl Default for FlattenOptions {
    fn default() -> Self {
        Self {
            value_limit: 10,
            max_value_chars: 256,
            include_meta: true,
        }
    }
}

pub fn flatten(
    meta: Option<&FileMetaTable>,
    dataset: &InMemDicomObject,
    options: &FlattenOptions,
) -> Vec<Row> {
    let mut flattener = Flattener {
        rows: Vec::new(),
        options,
    };

    if options.include_meta {
        if let Some(meta) = meta {
            flattener.meta(meta);
        }
    }
    flattener.scope(dataset, 0, None);

    log::debug!("flattened data set into {} rows", flattener.rows.len());
    flattener.rows
}

struct Flattener<'o> {
    rows: Vec<Row>,
    options: &'o FlattenOptions,
}

impl Flattener<'_> {
    fn push(&mut self, mut row: Row, parent: Option<usize>) -> usize {
        let position = self.rows.len();
        row.position = position;
        row.parent = parent;
        self.rows.push(row);
        position
    }

    fn meta(&mut self, meta: &FileMetaTable) {
        for (tag, vr, value) in meta_entries(meta) {
            let length = match vr {
                VR::UL => 4,
                VR::OB => 2,
                _ => (value.len() + value.len() % 2) as u32,
            };
            let value = self.clip(value);
            self.push(
                Row::element(tag, vr_code(vr), 1, Some(length), tag_name(tag), value, 0),
                None,
            );
        }
    }

    fn scope(&mut self, scope: &InMemDicomObject, depth: usize, parent: Option<usize>) {
        for element in scope {
            match element.items() {
                Some(items) if element.vr() == VR::SQ => {
                    self.sequence(element, items, depth, parent)
                }
                _ => self.element(element, depth, parent),
            }
        }
    }

    fn element(&mut self, element: &InMemElement, depth: usize, parent: Option<usize>) {
        let header = element.header();
        let value = self.clip(element_value_text(element, self.options.value_limit));
        self.push(
            Row::element(
                header.tag,
                vr_code(header.vr),
                element.value().multiplicity(),
                element_length(element),
                tag_name(header.tag),
                value,
                depth,
            ),
            parent,
        );
    }

    fn sequence(
        &mut self,
        element: &InMemElement,
        items: &[InMemDicomObject],
        depth: usize,
        parent: Option<usize>,
    ) {
        let tag = element.header().tag;
        let header = self.push(
            Row::sequence_header(
                tag,
                items.len() as u32,
                element_length(element),
                tag_name(tag),
                depth,
            ),
            parent,
        );

        for item in items {
            let member_count = item.into_iter().count() as u32;
            let item_row = self.push(Row::item(member_count, depth + 1), Some(header));
            self.scope(item, depth + 2, Some(item_row));
            self.push(Row::item_delimiter(depth + 1), Some(header));
        }
        self.push(Row::sequence_delimiter(depth), parent);
    }

    fn clip(&self, value: String) -> String {
        let max = self.options.max_value_chars;
        if value.chars().count() <= max {
            return value;
        }
        let mut clipped = value.chars().take(max).collect::<String>();
        clipped.push_str("...");
        clipped
    }
}
