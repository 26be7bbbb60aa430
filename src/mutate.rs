//! Modify, delete and insert at a resolved position of the tree.
//!
//! Each operation changes exactly one node. Nested scopes are edited on
//! cloned item lists which are only written back once the change has
//! succeeded, so a failed operation leaves the data set untouched.

use dicom_core::{Tag, VR};
use dicom_object::mem::InMemElement;
use dicom_object::InMemDicomObject;

use crate::dicom::{
    delete_element, delete_item, element_edit_text, find_element, find_sequence, insert_element,
    insert_item, parse_value, put_value, sequence_element,
};
use crate::error::EditError;
use crate::path::{ItemStep, ResolvedPath, Target};
use crate::row::format_tag;

/// Shape of a node to insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NewNode {
    Element { tag: Tag, vr: VR, value: String },
    Sequence { tag: Tag },
    Item,
}

impl NewNode {
    fn into_element(self) -> Result<(InMemElement, Target), EditError> {
        match self {
            NewNode::Element { tag, vr, value } => {
                check_insertable_tag(tag)?;
                if vr == VR::SQ {
                    return Err(EditError::invalid_operation(format!(
                        "{} has VR SQ; insert it as a sequence",
                        format_tag(tag)
                    )));
                }
                let value = parse_value(vr, &value)?;
                Ok((
                    dicom_core::DataElement::new(tag, vr, value),
                    Target::Element(tag),
                ))
            }
            NewNode::Sequence { tag } => {
                check_insertable_tag(tag)?;
                Ok((sequence_element(tag, Vec::new()), Target::Sequence(tag)))
            }
            NewNode::Item => Err(EditError::invalid_operation(
                "an item can only be inserted directly under a sequence header",
            )),
        }
    }
}

fn check_insertable_tag(tag: Tag) -> Result<(), EditError> {
    if tag.group() == 0xFFFE {
        return Err(EditError::invalid_operation(format!(
            "{} is an item or delimiter tag and cannot be inserted as an element",
            format_tag(tag)
        )));
    }
    Ok(())
}

/// Replaces the value of the selected element with `text`.
pub fn modify(root: &mut InMemDicomObject, path: &ResolvedPath, text: &str) -> Result<(), EditError> {
    let tag = match path.target {
        Target::Element(tag) => tag,
        Target::Sequence(tag) => {
            return Err(EditError::invalid_operation(format!(
                "{} is a sequence; edit the elements inside its items",
                format_tag(tag)
            )))
        }
        Target::Item(_) => {
            return Err(EditError::invalid_operation(
                "an item has no value of its own",
            ))
        }
        Target::Root => return Err(EditError::invalid_operation("no element selected")),
    };

    edit_scope(root, &path.scope, |scope| {
        let vr = find_element(scope, tag)
            .map(|element| element.vr())
            .ok_or_else(|| missing_element(tag))?;
        put_value(scope, tag, vr, text)
    })
}

/// Removes the selected element, sequence, or item occurrence.
pub fn delete(root: &mut InMemDicomObject, path: &ResolvedPath) -> Result<(), EditError> {
    match path.target {
        Target::Element(tag) | Target::Sequence(tag) => {
            edit_scope(root, &path.scope, |scope| delete_element(scope, tag))
        }
        Target::Item(step) => edit_sequence(root, &path.scope, step.sequence, |items| {
            delete_item(items, step.item)
        }),
        Target::Root => Err(EditError::invalid_operation("nothing selected to delete")),
    }
}

/// Inserts `node` relative to the selection and returns where it landed.
///
/// A selected sequence header takes a new item; a selected item takes a
/// new member; a selected element takes a sibling; no selection inserts
/// at the data set root.
pub fn insert(
    root: &mut InMemDicomObject,
    path: &ResolvedPath,
    node: NewNode,
) -> Result<ResolvedPath, EditError> {
    match (path.target, node) {
        (Target::Sequence(sequence), NewNode::Item) => {
            let item = edit_sequence(root, &path.scope, sequence, |items| Ok(insert_item(items)))?;
            Ok(ResolvedPath {
                scope: path.scope.clone(),
                target: Target::Item(ItemStep { sequence, item }),
            })
        }
        (Target::Sequence(tag), _) => Err(EditError::invalid_operation(format!(
            "only items can be inserted directly under sequence {}",
            format_tag(tag)
        ))),
        (target, node) => {
            let (element, inserted) = node.into_element()?;
            let mut scope = path.scope.clone();
            if let Target::Item(step) = target {
                scope.push(step);
            }
            edit_scope(root, &scope, |scope| insert_element(scope, element))?;
            Ok(ResolvedPath {
                scope,
                target: inserted,
            })
        }
    }
}

/// Current value of the selected element as backslash-separated text.
pub fn read_value(root: &InMemDicomObject, path: &ResolvedPath) -> Result<String, EditError> {
    let Target::Element(tag) = path.target else {
        return Err(EditError::invalid_operation(
            "only plain elements carry an editable value",
        ));
    };
    let scope = scope_at(root, &path.scope)?;
    find_element(scope, tag)
        .map(element_edit_text)
        .ok_or_else(|| missing_element(tag))
}

fn scope_at<'a>(
    root: &'a InMemDicomObject,
    steps: &[ItemStep],
) -> Result<&'a InMemDicomObject, EditError> {
    let mut scope = root;
    for step in steps {
        scope = find_sequence(scope, step.sequence)
            .and_then(|items| items.get(step.item))
            .ok_or_else(|| missing_item(step))?;
    }
    Ok(scope)
}

fn item_list(scope: &InMemDicomObject, step: &ItemStep) -> Result<Vec<InMemDicomObject>, EditError> {
    let items = find_sequence(scope, step.sequence).ok_or_else(|| missing_sequence(step.sequence))?;
    if step.item >= items.len() {
        return Err(missing_item(step));
    }
    Ok(items.to_vec())
}

/// Runs `edit` against the item addressed by `steps` (or the root when empty).
///
/// Descends iteratively, keeping a cloned item list per level; after a
/// successful edit the lists are folded back up, each sequence re-wrapped
/// so its recorded length is recomputed on write.
fn edit_scope<R>(
    root: &mut InMemDicomObject,
    steps: &[ItemStep],
    edit: impl FnOnce(&mut InMemDicomObject) -> Result<R, EditError>,
) -> Result<R, EditError> {
    let mut frames: Vec<(ItemStep, Vec<InMemDicomObject>)> = Vec::with_capacity(steps.len());
    for step in steps {
        let parent = match frames.last() {
            Some((outer, items)) => &items[outer.item],
            None => &*root,
        };
        let items = item_list(parent, step)?;
        frames.push((*step, items));
    }

    let output = match frames.last_mut() {
        Some((step, items)) => edit(&mut items[step.item])?,
        None => return edit(root),
    };

    while let Some((step, items)) = frames.pop() {
        let element = sequence_element(step.sequence, items);
        match frames.last_mut() {
            Some((outer, outer_items)) => {
                outer_items[outer.item].put(element);
            }
            None => {
                root.put(element);
            }
        }
    }
    Ok(output)
}

fn edit_sequence<R>(
    root: &mut InMemDicomObject,
    steps: &[ItemStep],
    sequence: Tag,
    edit: impl FnOnce(&mut Vec<InMemDicomObject>) -> Result<R, EditError>,
) -> Result<R, EditError> {
    edit_scope(root, steps, |scope| {
        let mut items = find_sequence(scope, sequence)
            .ok_or_else(|| missing_sequence(sequence))?
            .to_vec();
        let output = edit(&mut items)?;
        scope.put(sequence_element(sequence, items));
        Ok(output)
    })
}

fn missing_element(tag: Tag) -> EditError {
    EditError::not_found(format!("{} in the selected scope", format_tag(tag)))
}

fn missing_sequence(tag: Tag) -> EditError {
    EditError::not_found(format!("sequence {}", format_tag(tag)))
}

fn missing_item(step: &ItemStep) -> EditError {
    EditError::not_found(format!(
        "item #{} of sequence {}",
        step.item,
        format_tag(step.sequence)
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flatten::tests::{
        item, nested_dataset, text_element, two_item_dataset, REFERENCED_IMAGE_SEQUENCE,
        REFERENCED_SOP_CLASS_UID,
    };
    use crate::flatten::{flatten, FlattenOptions};
    use crate::path::resolve;
    use crate::row::{Row, RowKind};
    use dicom_core::value::DataSetSequence;
    use dicom_core::{DataElement, Length};

    fn rows_of(dataset: &InMemDicomObject) -> Vec<Row> {
        flatten(None, dataset, &FlattenOptions::default())
    }

    fn path_to(dataset: &InMemDicomObject, position: usize) -> ResolvedPath {
        resolve(&rows_of(dataset), Some(position)).expect("selection resolves")
    }

    fn first_row(rows: &[Row], tag: Tag) -> &Row {
        rows.iter().find(|row| row.tag == tag).expect("row should exist")
    }

    #[test]
    fn deleting_second_occurrence_keeps_the_first() {
        let mut dataset = two_item_dataset();
        let before = rows_of(&dataset);
        let path = path_to(&dataset, 5);

        delete(&mut dataset, &path).expect("delete succeeds");

        let after = rows_of(&dataset);
        assert_eq!(after.len(), 7);
        assert_eq!(after[2], before[2]);
        assert_eq!(after[0].vm, 2);
        assert_eq!(after[4].kind, RowKind::Item);
        assert_eq!(after[5].kind, RowKind::ItemDelimiter);
    }

    #[test]
    fn modify_changes_only_the_resolved_occurrence() {
        let mut dataset = two_item_dataset();
        let path = path_to(&dataset, 5);

        modify(&mut dataset, &path, "9.8.7").expect("modify succeeds");

        let rows = rows_of(&dataset);
        assert_eq!(rows[2].value, "1.2.3");
        assert_eq!(rows[5].value, "9.8.7");
    }

    #[test]
    fn modify_nested_element_two_levels_down() {
        let mut dataset = nested_dataset();
        let rows = rows_of(&dataset);
        let position = first_row(&rows, Tag(0x0040, 0xA160)).position;
        let path = resolve(&rows, Some(position)).expect("resolves");

        modify(&mut dataset, &path, "updated finding").expect("modify succeeds");

        let rows = rows_of(&dataset);
        assert_eq!(first_row(&rows, Tag(0x0040, 0xA160)).value, "updated finding");
        assert_eq!(first_row(&rows, REFERENCED_IMAGE_SEQUENCE).vm, 2);
        assert_eq!(read_value(&dataset, &path).expect("readable"), "updated finding");
    }

    #[test]
    fn edited_sequences_drop_their_stored_lengths() {
        let sized = |tag: Tag, items: Vec<InMemDicomObject>| -> InMemElement {
            DataElement::new(tag, VR::SQ, DataSetSequence::new(items, Length(64)))
        };
        let finding = Tag(0x0040, 0xA160);
        let other_sequence = Tag(0x0008, 0x1115);
        let mut dataset = InMemDicomObject::from_element_iter([
            sized(
                REFERENCED_IMAGE_SEQUENCE,
                vec![item(vec![sized(
                    Tag(0x0040, 0xA730),
                    vec![item(vec![text_element(finding, VR::UT, "finding")])],
                )])],
            ),
            sized(
                other_sequence,
                vec![item(vec![text_element(REFERENCED_SOP_CLASS_UID, VR::UI, "1.2.3")])],
            ),
        ]);
        let rows = rows_of(&dataset);
        assert!(rows
            .iter()
            .filter(|row| row.kind == RowKind::SequenceHeader)
            .all(|row| row.length == Some(64)));

        let path = resolve(&rows, Some(first_row(&rows, finding).position)).expect("resolves");
        modify(&mut dataset, &path, "revised").expect("modify succeeds");

        let rows = rows_of(&dataset);
        assert_eq!(first_row(&rows, finding).value, "revised");
        assert_eq!(first_row(&rows, REFERENCED_IMAGE_SEQUENCE).length, None);
        assert_eq!(first_row(&rows, Tag(0x0040, 0xA730)).length, None);
        assert_eq!(first_row(&rows, other_sequence).length, Some(64));
    }

    #[test]
    fn rejected_value_leaves_tree_unchanged() {
        let mut dataset = two_item_dataset();
        let before = rows_of(&dataset);
        let path = path_to(&dataset, 5);

        assert!(matches!(
            modify(&mut dataset, &path, "not a uid"),
            Err(EditError::InvalidValue { .. })
        ));
        assert!(matches!(
            modify(&mut dataset, &path, ""),
            Err(EditError::InvalidValue { .. })
        ));
        assert_eq!(rows_of(&dataset), before);
    }

    #[test]
    fn modify_rejects_structural_targets() {
        let mut dataset = two_item_dataset();
        for position in [0, 1] {
            let path = path_to(&dataset, position);
            assert!(matches!(
                modify(&mut dataset, &path, "x"),
                Err(EditError::InvalidOperation(_))
            ));
        }
    }

    #[test]
    fn stale_paths_report_not_found() {
        let mut dataset = two_item_dataset();
        let path = ResolvedPath {
            scope: vec![ItemStep {
                sequence: REFERENCED_IMAGE_SEQUENCE,
                item: 5,
            }],
            target: Target::Element(REFERENCED_SOP_CLASS_UID),
        };
        assert!(matches!(
            delete(&mut dataset, &path),
            Err(EditError::NotFound(_))
        ));

        let missing = ResolvedPath {
            scope: Vec::new(),
            target: Target::Element(Tag(0x0010, 0x0020)),
        };
        assert!(matches!(
            modify(&mut dataset, &missing, "X"),
            Err(EditError::NotFound(_))
        ));
    }

    #[test]
    fn deleting_an_item_removes_its_whole_block() {
        let mut dataset = two_item_dataset();
        let path = path_to(&dataset, 1);

        delete(&mut dataset, &path).expect("delete item succeeds");

        let rows = rows_of(&dataset);
        assert_eq!(rows.len(), 5);
        assert_eq!(rows[0].vm, 1);
    }

    #[test]
    fn deleting_a_sequence_header_removes_the_sequence() {
        let mut dataset = nested_dataset();
        let rows = rows_of(&dataset);
        let position = first_row(&rows, Tag(0x0040, 0xA730)).position;
        let path = resolve(&rows, Some(position)).expect("resolves");

        delete(&mut dataset, &path).expect("delete sequence succeeds");

        let rows = rows_of(&dataset);
        assert!(rows.iter().all(|row| row.tag != Tag(0x0040, 0xA730)));
        assert!(rows.iter().all(|row| row.tag != Tag(0x0040, 0xA160)));
        assert!(rows.iter().any(|row| row.tag == Tag(0x0008, 0x1155)));
    }

    #[test]
    fn insert_item_under_sequence_header() {
        let mut dataset = two_item_dataset();
        let path = path_to(&dataset, 0);

        let inserted = insert(&mut dataset, &path, NewNode::Item).expect("insert succeeds");

        assert_eq!(
            inserted.target,
            Target::Item(ItemStep {
                sequence: REFERENCED_IMAGE_SEQUENCE,
                item: 2
            })
        );
        let rows = rows_of(&dataset);
        assert_eq!(rows.len(), 10);
        assert_eq!(rows[0].vm, 3);
        assert_eq!(rows[7].kind, RowKind::Item);
        assert_eq!(rows[8].kind, RowKind::ItemDelimiter);
    }

    #[test]
    fn insert_element_into_selected_item() {
        let mut dataset = two_item_dataset();
        let path = path_to(&dataset, 4);
        let node = NewNode::Element {
            tag: Tag(0x0008, 0x1155),
            vr: VR::UI,
            value: "1.2.3.4".to_string(),
        };

        let inserted = insert(&mut dataset, &path, node).expect("insert succeeds");
        assert_eq!(inserted.scope.len(), 1);
        assert_eq!(inserted.scope[0].item, 1);

        let rows = rows_of(&dataset);
        let new_row = first_row(&rows, Tag(0x0008, 0x1155));
        assert_eq!(new_row.depth, 2);
        assert_eq!(new_row.value, "1.2.3.4");
        assert!(new_row.position > 4);
    }

    #[test]
    fn insert_sibling_next_to_selected_element() {
        let mut dataset = nested_dataset();
        let rows = rows_of(&dataset);
        let position = first_row(&rows, Tag(0x0040, 0xA040)).position;
        let path = resolve(&rows, Some(position)).expect("resolves");
        let node = NewNode::Element {
            tag: Tag(0x0040, 0xA010),
            vr: VR::CS,
            value: "CONTAINS".to_string(),
        };

        insert(&mut dataset, &path, node).expect("insert succeeds");

        let rows = rows_of(&dataset);
        assert_eq!(first_row(&rows, Tag(0x0040, 0xA010)).depth, 4);
    }

    #[test]
    fn insert_at_root_without_selection() {
        let mut dataset = two_item_dataset();
        let node = NewNode::Sequence {
            tag: Tag(0x0040, 0x0275),
        };

        let inserted =
            insert(&mut dataset, &ResolvedPath::root(), node).expect("insert succeeds");

        assert!(inserted.scope.is_empty());
        let rows = rows_of(&dataset);
        let header = first_row(&rows, Tag(0x0040, 0x0275));
        assert_eq!(header.kind, RowKind::SequenceHeader);
        assert_eq!(header.depth, 0);
    }

    #[test]
    fn shape_mismatches_are_rejected_before_touching_the_tree() {
        let mut dataset = two_item_dataset();
        let before = rows_of(&dataset);
        let header = path_to(&dataset, 0);
        let element = path_to(&dataset, 2);
        let scalar = NewNode::Element {
            tag: Tag(0x0010, 0x0010),
            vr: VR::PN,
            value: "Doe^John".to_string(),
        };

        assert!(matches!(
            insert(&mut dataset, &header, scalar),
            Err(EditError::InvalidOperation(_))
        ));
        assert!(matches!(
            insert(&mut dataset, &element, NewNode::Item),
            Err(EditError::InvalidOperation(_))
        ));
        assert!(matches!(
            insert(&mut dataset, &ResolvedPath::root(), NewNode::Item),
            Err(EditError::InvalidOperation(_))
        ));
        assert!(matches!(
            insert(
                &mut dataset,
                &element,
                NewNode::Element {
                    tag: Tag(0x0008, 0x1199),
                    vr: VR::SQ,
                    value: String::new()
                }
            ),
            Err(EditError::InvalidOperation(_))
        ));
        assert!(matches!(
            insert(
                &mut dataset,
                &element,
                NewNode::Element {
                    tag: REFERENCED_SOP_CLASS_UID,
                    vr: VR::UI,
                    value: "1.2".to_string()
                }
            ),
            Err(EditError::InvalidOperation(_))
        ));
        assert_eq!(rows_of(&dataset), before);
    }

    #[test]
    fn read_value_joins_with_backslash() {
        let dataset = InMemDicomObject::from_element_iter([dicom_core::DataElement::new(
            Tag(0x0008, 0x0008),
            VR::CS,
            parse_value(VR::CS, "ORIGINAL\\PRIMARY").expect("valid CS"),
        )]);
        let path = path_to(&dataset, 0);
        assert_eq!(
            read_value(&dataset, &path).expect("readable"),
            "ORIGINAL\\PRIMARY"
        );
    }
}
