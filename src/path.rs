//! Recovers where a selected row lives in the tree.
//!
//! A row alone is ambiguous: the same tag can appear in every item of a
//! sequence. The ancestor chain of the row, plus the ordinal of each item
//! on that chain, is what addresses exactly one node.

use dicom_core::Tag;

use crate::error::EditError;
use crate::row::{format_tag, Row, RowKind};

/// One descent step: item number `item` of sequence `sequence`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemStep {
    pub sequence: Tag,
    pub item: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// Nothing selected: the data set itself.
    Root,
    Element(Tag),
    Sequence(Tag),
    Item(ItemStep),
}

/// Scope steps from the data set root (outermost first) and the node they lead to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    pub scope: Vec<ItemStep>,
    pub target: Target,
}

impl ResolvedPath {
    pub fn root() -> Self {
        Self {
            scope: Vec::new(),
            target: Target::Root,
        }
    }
}

/// Enclosing sequence headers and items of `selected`, innermost first.
pub fn reconstruct_path(rows: &[Row], selected: usize) -> Result<Vec<&Row>, EditError> {
    Ok(ancestor_positions(rows, selected)?
        .into_iter()
        .map(|position| &rows[position])
        .collect())
}

fn ancestor_positions(rows: &[Row], selected: usize) -> Result<Vec<usize>, EditError> {
    let row = rows
        .get(selected)
        .ok_or_else(|| EditError::not_found(format!("row {selected}")))?;

    let ancestors = if row.parent.is_some() {
        parent_chain(rows, selected)
    } else {
        scan_positions(rows, selected)
    };

    if ancestors.len() != row.depth {
        return Err(inconsistent_rows(row));
    }
    Ok(ancestors)
}

fn parent_chain(rows: &[Row], selected: usize) -> Vec<usize> {
    let mut chain = Vec::new();
    let mut current = selected;
    while let Some(parent) = rows[current].parent {
        // parents always precede their children; anything else is a corrupt list
        if parent >= current || parent >= rows.len() {
            break;
        }
        chain.push(parent);
        current = parent;
    }
    chain
}

/// Backward depth scan: the nearest earlier row one level shallower is the
/// parent, repeated until the root level is reached.
pub fn scan_ancestors(rows: &[Row], selected: usize) -> Vec<&Row> {
    scan_positions(rows, selected)
        .into_iter()
        .map(|position| &rows[position])
        .collect()
}

fn scan_positions(rows: &[Row], selected: usize) -> Vec<usize> {
    let Some(row) = rows.get(selected) else {
        return Vec::new();
    };

    let mut depth = row.depth;
    let mut ancestors = Vec::new();
    for position in (0..selected).rev() {
        if depth == 0 {
            break;
        }
        if rows[position].depth + 1 == depth {
            ancestors.push(position);
            depth -= 1;
        }
    }
    ancestors
}

/// Zero-based ordinal of the item of sequence `header` that contains `target`.
///
/// Counts the item delimiters of that sequence between the header and the
/// target; delimiters of deeper nested sequences are not counted.
pub fn item_ordinal(rows: &[Row], header: usize, target: usize) -> usize {
    let Some(item_depth) = rows.get(header).map(|row| row.depth + 1) else {
        return 0;
    };
    rows.get(header + 1..target)
        .unwrap_or_default()
        .iter()
        .filter(|row| row.kind == RowKind::ItemDelimiter && row.depth == item_depth)
        .count()
}

/// Resolves a selection into the scope steps and target a mutation needs.
pub fn resolve(rows: &[Row], selected: Option<usize>) -> Result<ResolvedPath, EditError> {
    let Some(selected) = selected else {
        return Ok(ResolvedPath::root());
    };
    let row = rows
        .get(selected)
        .ok_or_else(|| EditError::not_found(format!("row {selected}")))?;
    if row.is_delimiter() {
        return Err(EditError::invalid_operation(format!(
            "{} rows only mark the end of a scope and cannot be edited",
            row.description
        )));
    }

    let mut ancestors = ancestor_positions(rows, selected)?;
    ancestors.reverse();

    let pairs = ancestors.chunks_exact(2);
    let remainder = pairs.remainder();
    let mut scope = Vec::with_capacity(ancestors.len() / 2);
    for pair in pairs {
        let (header, item) = (&rows[pair[0]], &rows[pair[1]]);
        if header.kind != RowKind::SequenceHeader || item.kind != RowKind::Item {
            return Err(inconsistent_rows(row));
        }
        scope.push(ItemStep {
            sequence: header.tag,
            item: item_ordinal(rows, pair[0], pair[1]),
        });
    }

    let target = match (row.kind, remainder) {
        (RowKind::Element, []) => Target::Element(row.tag),
        (RowKind::SequenceHeader, []) => Target::Sequence(row.tag),
        (RowKind::Item, [header]) if rows[*header].kind == RowKind::SequenceHeader => {
            Target::Item(ItemStep {
                sequence: rows[*header].tag,
                item: item_ordinal(rows, *header, selected),
            })
        }
        _ => return Err(inconsistent_rows(row)),
    };

    log::debug!(
        "row {selected} {} resolved to {:?} via {} item steps",
        row.tag_text(),
        target,
        scope.len()
    );
    Ok(ResolvedPath { scope, target })
}

/// Row of the node `path` addresses, the inverse of [`resolve`].
///
/// Follows parent links down from the root, so `rows` must come straight
/// from a flatten pass. `None` for [`Target::Root`] or a path with no row.
pub fn locate(rows: &[Row], path: &ResolvedPath) -> Option<usize> {
    let mut scope = None;
    for step in &path.scope {
        let header = child(rows, scope, RowKind::SequenceHeader, step.sequence)?;
        scope = Some(nth_item(rows, header, step.item)?);
    }
    match path.target {
        Target::Root => None,
        Target::Element(tag) => child(rows, scope, RowKind::Element, tag),
        Target::Sequence(tag) => child(rows, scope, RowKind::SequenceHeader, tag),
        Target::Item(step) => {
            let header = child(rows, scope, RowKind::SequenceHeader, step.sequence)?;
            nth_item(rows, header, step.item)
        }
    }
}

fn child(rows: &[Row], parent: Option<usize>, kind: RowKind, tag: Tag) -> Option<usize> {
    let start = parent.map_or(0, |parent| parent + 1);
    rows.get(start..)?
        .iter()
        .find(|row| row.parent == parent && row.kind == kind && row.tag == tag)
        .map(|row| row.position)
}

fn nth_item(rows: &[Row], header: usize, ordinal: usize) -> Option<usize> {
    rows.get(header + 1..)?
        .iter()
        .filter(|row| row.parent == Some(header) && row.kind == RowKind::Item)
        .nth(ordinal)
        .map(|row| row.position)
}

fn inconsistent_rows(row: &Row) -> EditError {
    EditError::invalid_operation(format!(
        "row history around {} at depth {} does not nest correctly",
        format_tag(row.tag),
        row.depth
    ))
}
