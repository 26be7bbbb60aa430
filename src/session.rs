//! One open file: the tree, its rows, and the edit operations on them.
//!
//! Every mutation runs the same sequence: policy check, path resolution,
//! one call into [`crate::mutate`], then a full re-flatten. Rows handed
//! out before a mutation are stale afterwards.

use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use dicom_core::Tag;
use dicom_object::{FileMetaTable, InMemDicomObject};

use crate::config::Settings;
use crate::dicom::{open_dicom_object, save_dicom_object};
use crate::error::EditError;
use crate::flatten::{flatten, FlattenOptions};
use crate::mutate::{self, NewNode};
use crate::path::{locate, resolve, scan_ancestors, ResolvedPath};
use crate::policy::EditPolicy;
use crate::row::{filter_rows, format_tag, Row, RowKind, ITEM_VR};

pub struct Session {
    dataset: InMemDicomObject,
    meta: Option<FileMetaTable>,
    path: Option<PathBuf>,
    rows: Vec<Row>,
    meta_rows: usize,
    options: FlattenOptions,
    policy: EditPolicy,
    dirty: bool,
}

impl Session {
    pub fn open(path: &Path, settings: &Settings) -> Result<Self> {
        let object = open_dicom_object(path)?;
        let meta = object.meta().clone();
        let mut session = Self::from_parts(Some(meta), object.into_inner(), settings);
        session.path = Some(path.to_path_buf());
        log::info!(
            "opened {} ({} rows)",
            path.display(),
            session.rows.len()
        );
        Ok(session)
    }

    pub fn from_parts(
        meta: Option<FileMetaTable>,
        dataset: InMemDicomObject,
        settings: &Settings,
    ) -> Self {
        let mut session = Self {
            dataset,
            meta,
            path: None,
            rows: Vec::new(),
            meta_rows: 0,
            options: settings.flatten_options(),
            policy: settings.edit_policy(),
            dirty: false,
        };
        session.reflatten();
        session
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn search(&self, needle: &str) -> Vec<&Row> {
        filter_rows(&self.rows, needle)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn dataset(&self) -> &InMemDicomObject {
        &self.dataset
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn policy(&self) -> &EditPolicy {
        &self.policy
    }

    /// Whether the row at `position` belongs to the file meta information.
    pub fn is_meta_row(&self, position: usize) -> bool {
        position < self.meta_rows
    }

    /// Switches the meta rows on or off; also re-flattens.
    pub fn set_show_meta(&mut self, show: bool) {
        if self.options.include_meta != show {
            self.options.include_meta = show;
            self.reflatten();
        }
    }

    /// Text to prefill an edit of the row at `selected`.
    pub fn value_for_edit(&self, selected: usize) -> Result<String, EditError> {
        let row = self.row(selected)?;
        if self.is_meta_row(selected) {
            return Ok(row.value.clone());
        }
        let path = resolve(&self.rows, Some(selected))?;
        mutate::read_value(&self.dataset, &path)
    }

    pub fn modify(&mut self, selected: usize, text: &str) -> Result<(), EditError> {
        let result = self.prepare_existing(selected).and_then(|path| {
            let row = &self.rows[selected];
            if text.trim().is_empty() && row.vr != ITEM_VR && row.vr != "SQ" {
                return Err(EditError::invalid_value(row.vr.clone(), "value is empty"));
            }
            mutate::modify(&mut self.dataset, &path, text)
        });
        self.finish("modify", result)
    }

    pub fn delete(&mut self, selected: usize) -> Result<(), EditError> {
        let result = self
            .prepare_existing(selected)
            .and_then(|path| mutate::delete(&mut self.dataset, &path));
        self.finish("delete", result)
    }

    /// Inserts `node` relative to `selected`; `None` inserts at the data set root.
    ///
    /// Returns the row the new node landed on in the re-flattened list.
    pub fn insert(&mut self, selected: Option<usize>, node: NewNode) -> Result<Option<usize>, EditError> {
        let result = self
            .prepare_insert(selected, &node)
            .and_then(|path| mutate::insert(&mut self.dataset, &path, node));
        let inserted = self.finish("insert", result)?;
        let position = locate(&self.rows, &inserted);
        log::debug!(
            "inserted {:?} at {} item steps, row {position:?}",
            inserted.target,
            inserted.scope.len()
        );
        Ok(position)
    }

    /// Writes to `path`, or back to the file the session was opened from.
    pub fn save(&mut self, path: Option<&Path>) -> Result<PathBuf> {
        let target = match path.or(self.path.as_deref()) {
            Some(target) => target.to_path_buf(),
            None => bail!("No file name to save to; choose one with Save As"),
        };
        save_dicom_object(self.meta.as_ref(), &self.dataset, &target)?;
        log::info!("saved {}", target.display());
        self.path = Some(target.clone());
        self.dirty = false;
        Ok(target)
    }

    fn row(&self, position: usize) -> Result<&Row, EditError> {
        self.rows
            .get(position)
            .ok_or_else(|| EditError::not_found(format!("row {position}")))
    }

    /// Tag the policy judges for a row; items answer for their sequence.
    fn guarded_tag(&self, position: usize) -> Result<Tag, EditError> {
        let row = self.row(position)?;
        if row.kind != RowKind::Item {
            return Ok(row.tag);
        }
        let header = match row.parent {
            Some(parent) => self.rows.get(parent),
            None => scan_ancestors(&self.rows, position).into_iter().next(),
        };
        header
            .map(|header| header.tag)
            .ok_or_else(|| EditError::invalid_operation("item row has no enclosing sequence"))
    }

    fn prepare_existing(&self, selected: usize) -> Result<ResolvedPath, EditError> {
        self.policy.check(self.guarded_tag(selected)?)?;
        self.reject_meta(selected)?;
        resolve(&self.rows, Some(selected))
    }

    fn prepare_insert(&self, selected: Option<usize>, node: &NewNode) -> Result<ResolvedPath, EditError> {
        if let NewNode::Element { tag, .. } | NewNode::Sequence { tag } = node {
            self.policy.check(*tag)?;
        }
        if let Some(selected) = selected {
            self.policy.check(self.guarded_tag(selected)?)?;
            self.reject_meta(selected)?;
        }
        resolve(&self.rows, selected)
    }

    fn reject_meta(&self, selected: usize) -> Result<(), EditError> {
        if self.is_meta_row(selected) {
            return Err(EditError::invalid_operation(format!(
                "{} belongs to the file meta information, which is rebuilt on save",
                format_tag(self.rows[selected].tag)
            )));
        }
        Ok(())
    }

    fn finish<T>(&mut self, operation: &str, result: Result<T, EditError>) -> Result<T, EditError> {
        match &result {
            Ok(_) => {
                self.dirty = true;
                self.reflatten();
            }
            Err(err) => log::warn!("{operation} rejected: {err}"),
        }
        result
    }

    fn reflatten(&mut self) {
        let meta = self.meta.as_ref().filter(|_| self.options.include_meta);
        self.rows = flatten(meta, &self.dataset, &self.options);
        self.meta_rows = meta
            .map(|_| {
                self.rows
                    .iter()
                    .take_while(|row| row.tag.group() == 0x0002 && row.depth == 0)
                    .count()
            })
            .unwrap_or(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flatten::tests::{
        nested_dataset, text_element, two_item_dataset, REFERENCED_IMAGE_SEQUENCE,
        REFERENCED_SOP_CLASS_UID,
    };
    use crate::policy::PolicySettings;
    use dicom_core::{DataElement, PrimitiveValue, VR};
    use dicom_object::FileMetaTableBuilder;

    fn session_with(dataset: InMemDicomObject) -> Session {
        Session::from_parts(None, dataset, &Settings::default())
    }

    fn image_dataset() -> InMemDicomObject {
        InMemDicomObject::from_element_iter([
            text_element(Tag(0x0008, 0x0016), VR::UI, "1.2.840.10008.5.1.4.1.1.7"),
            text_element(Tag(0x0008, 0x0018), VR::UI, "1.2.3.4.5"),
            text_element(Tag(0x0010, 0x0010), VR::PN, "Doe^Jane"),
            DataElement::new(Tag(0x0028, 0x0010), VR::US, PrimitiveValue::from(512_u16)),
            DataElement::new(Tag(0x0028, 0x0011), VR::US, PrimitiveValue::from(256_u16)),
        ])
    }

    fn test_meta() -> FileMetaTable {
        FileMetaTableBuilder::new()
            .media_storage_sop_class_uid("1.2.840.10008.5.1.4.1.1.7")
            .media_storage_sop_instance_uid("1.2.3.4.5")
            .transfer_syntax("1.2.840.10008.1.2.1")
            .build()
            .expect("valid meta table")
    }

    #[test]
    fn deleting_second_item_element_drops_one_row() {
        let mut session = session_with(two_item_dataset());
        assert_eq!(session.rows().len(), 8);
        let first = session.rows()[2].clone();

        session.delete(5).expect("delete succeeds");

        assert_eq!(session.rows().len(), 7);
        assert_eq!(session.rows()[2], first);
        assert!(session.is_dirty());
    }

    #[test]
    fn empty_value_on_top_level_element_is_invalid() {
        let mut session = session_with(image_dataset());
        let before = session.rows().to_vec();
        let patient_name = before
            .iter()
            .position(|row| row.tag == Tag(0x0010, 0x0010))
            .expect("patient name row");

        assert!(matches!(
            session.modify(patient_name, "  "),
            Err(EditError::InvalidValue { .. })
        ));
        assert_eq!(session.rows(), before.as_slice());
        assert!(!session.is_dirty());
    }

    #[test]
    fn image_geometry_tags_are_guarded() {
        let mut session = session_with(image_dataset());
        for tag in [Tag(0x0028, 0x0010), Tag(0x0028, 0x0011)] {
            let position = session
                .rows()
                .iter()
                .position(|row| row.tag == tag)
                .expect("geometry row");
            assert!(matches!(
                session.delete(position),
                Err(EditError::StructuralGuard { .. })
            ));
            assert!(matches!(
                session.modify(position, "1024"),
                Err(EditError::StructuralGuard { .. })
            ));
        }
        assert!(matches!(
            session.insert(
                None,
                NewNode::Element {
                    tag: Tag(0x0028, 0x0002),
                    vr: VR::US,
                    value: "1".to_string()
                }
            ),
            Err(EditError::StructuralGuard { .. })
        ));
        assert_eq!(session.rows().len(), 5);
    }

    #[test]
    fn items_are_guarded_by_their_sequence() {
        let settings = Settings {
            policy: PolicySettings {
                protected_groups: Vec::new(),
                protected_tags: vec!["ReferencedImageSequence".to_string()],
            },
            ..Settings::default()
        };
        let mut session = Session::from_parts(None, two_item_dataset(), &settings);
        assert!(matches!(
            session.delete(4),
            Err(EditError::StructuralGuard { .. })
        ));
        assert!(matches!(
            session.insert(Some(0), NewNode::Item),
            Err(EditError::StructuralGuard { .. })
        ));
        // members of the items are still editable
        session.modify(5, "1.2.4").expect("member edit succeeds");
        assert_eq!(session.rows()[5].value, "1.2.4");
    }

    #[test]
    fn meta_rows_are_shown_first_and_are_read_only() {
        let settings = Settings {
            policy: PolicySettings {
                protected_groups: Vec::new(),
                protected_tags: Vec::new(),
            },
            ..Settings::default()
        };
        let mut session = Session::from_parts(Some(test_meta()), image_dataset(), &settings);
        assert!(session.is_meta_row(0));
        assert_eq!(session.rows()[0].tag, Tag(0x0002, 0x0000));
        let transfer_syntax = session
            .rows()
            .iter()
            .position(|row| row.tag == Tag(0x0002, 0x0010))
            .expect("transfer syntax row");

        assert_eq!(
            session.value_for_edit(transfer_syntax).expect("readable"),
            "1.2.840.10008.1.2.1"
        );
        assert!(matches!(
            session.delete(transfer_syntax),
            Err(EditError::InvalidOperation(_))
        ));

        let with_meta = session.rows().len();
        session.set_show_meta(false);
        assert!(!session.is_meta_row(0));
        assert_eq!(session.rows().len(), 5);
        assert!(with_meta > 5);
    }

    #[test]
    fn meta_rows_fall_under_the_default_policy() {
        let mut session =
            Session::from_parts(Some(test_meta()), image_dataset(), &Settings::default());
        assert!(matches!(
            session.modify(2, "1.2.3"),
            Err(EditError::StructuralGuard { .. })
        ));
    }

    #[test]
    fn edits_resolve_through_rows_after_meta() {
        let mut session =
            Session::from_parts(Some(test_meta()), nested_dataset(), &Settings::default());
        let nested = session
            .rows()
            .iter()
            .position(|row| row.tag == Tag(0x0040, 0xA160))
            .expect("nested text row");

        assert_eq!(session.value_for_edit(nested).expect("readable"), "finding");
        session.modify(nested, "revised").expect("modify succeeds");
        assert_eq!(session.rows()[nested].value, "revised");
    }

    #[test]
    fn insert_and_search() {
        let mut session = session_with(two_item_dataset());
        let new_item = session.insert(Some(0), NewNode::Item).expect("item insert");
        assert_eq!(new_item, Some(7));
        session
            .insert(
                Some(7),
                NewNode::Element {
                    tag: Tag(0x0008, 0x1155),
                    vr: VR::UI,
                    value: "7.7.7".to_string(),
                },
            )
            .expect("element insert into new item");

        assert_eq!(session.rows().len(), 11);
        let hits = session.search("7.7.7");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].depth, 2);
        assert_eq!(session.search("").len(), 11);
    }

    #[test]
    fn insert_reports_the_row_of_the_new_node() {
        let mut session = session_with(image_dataset());
        let modality = session
            .insert(
                None,
                NewNode::Element {
                    tag: Tag(0x0008, 0x0060),
                    vr: VR::CS,
                    value: "MG".to_string(),
                },
            )
            .expect("root insert")
            .expect("new row");
        // sorted in by tag, ahead of rows that were already there
        assert_eq!(modality, 2);
        assert_eq!(session.rows()[modality].tag, Tag(0x0008, 0x0060));

        let sequence = session
            .insert(
                Some(modality),
                NewNode::Sequence {
                    tag: Tag(0x0040, 0xA730),
                },
            )
            .expect("sibling insert")
            .expect("new row");
        assert_eq!(session.rows()[sequence].kind, RowKind::SequenceHeader);
        let item = session
            .insert(Some(sequence), NewNode::Item)
            .expect("item insert")
            .expect("new row");
        assert_eq!(session.rows()[item].kind, RowKind::Item);
        assert_eq!(session.rows()[item].parent, Some(sequence));
    }

    #[test]
    fn delimiter_selection_is_rejected() {
        let mut session = session_with(two_item_dataset());
        assert!(matches!(
            session.delete(3),
            Err(EditError::InvalidOperation(_))
        ));
        assert!(matches!(session.delete(42), Err(EditError::NotFound(_))));
    }

    #[test]
    fn save_without_a_path_fails() {
        let mut session = session_with(image_dataset());
        assert!(session.save(None).is_err());
    }

    fn temp_dicom_path(label: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "tagtree-session-{label}-{}-{}.dcm",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos()
        ))
    }

    /// Tag, depth, VM and value of every data set row.
    fn tree_view(session: &Session) -> Vec<(Tag, usize, u32, String)> {
        session.rows()[session.meta_rows..]
            .iter()
            .map(|row| (row.tag, row.depth, row.vm, row.value.clone()))
            .collect()
    }

    #[test]
    fn saved_file_reopens_with_the_edit() {
        let path = temp_dicom_path("flat");
        let mut session = session_with(image_dataset());
        let name = session
            .rows()
            .iter()
            .position(|row| row.tag == Tag(0x0010, 0x0010))
            .expect("patient name row");
        session.modify(name, "Roe^Richard").expect("modify succeeds");

        let saved = session.save(Some(&path)).expect("save succeeds");
        assert!(!session.is_dirty());
        assert_eq!(session.path(), Some(saved.as_path()));

        let reopened = Session::open(&path, &Settings::default()).expect("reopen succeeds");
        let patient_name = reopened
            .rows()
            .iter()
            .find(|row| row.tag == Tag(0x0010, 0x0010))
            .expect("patient name row");
        assert_eq!(patient_name.value, "Roe^Richard");
        assert!(reopened.is_meta_row(0));

        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn nested_edits_survive_save_and_reopen() {
        let path = temp_dicom_path("nested");
        let mut session =
            Session::from_parts(Some(test_meta()), nested_dataset(), &Settings::default());
        let finding = session
            .rows()
            .iter()
            .position(|row| row.tag == Tag(0x0040, 0xA160))
            .expect("nested text row");
        session.modify(finding, "revised finding").expect("modify succeeds");

        let header = session
            .rows()
            .iter()
            .position(|row| row.tag == REFERENCED_IMAGE_SEQUENCE)
            .expect("sequence header row");
        let item = session
            .insert(Some(header), NewNode::Item)
            .expect("item insert")
            .expect("new item row");
        session
            .insert(
                Some(item),
                NewNode::Element {
                    tag: REFERENCED_SOP_CLASS_UID,
                    vr: VR::UI,
                    value: "7.8.9".to_string(),
                },
            )
            .expect("element insert into new item");

        session.save(Some(&path)).expect("save succeeds");
        let reopened = Session::open(&path, &Settings::default()).expect("reopen succeeds");

        assert_eq!(tree_view(&reopened), tree_view(&session));
        let class_uids = reopened
            .rows()
            .iter()
            .filter(|row| row.tag == REFERENCED_SOP_CLASS_UID)
            .map(|row| row.value.as_str())
            .collect::<Vec<_>>();
        assert_eq!(class_uids, ["1.2.3", "1.2.3", "7.8.9"]);
        assert!(reopened
            .rows()
            .iter()
            .any(|row| row.tag == Tag(0x0040, 0xA160) && row.value == "revised finding"));

        let _ = std::fs::remove_file(path);
    }
}
