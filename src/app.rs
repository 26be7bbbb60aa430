use std::path::{Path, PathBuf};

use egui::{Key, Modifiers, ResizeDirection, Sense, ViewportCommand};

use tagtree::config::Settings;
use tagtree::dicom::{
    dictionary_tags, dictionary_vr, parse_tag, parse_vr, search_dictionary, vr_code, DictionaryTag,
};
use tagtree::mutate::NewNode;
use tagtree::row::{format_tag, Row, RowKind};
use tagtree::Session;

const APP_TITLE: &str = "TagTree";
const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

const COLUMN_TITLES: [&str; 6] = ["Tag", "VR", "VM", "Length", "Description", "Value"];
const COLUMN_WIDTHS: [f32; 5] = [250.0, 44.0, 48.0, 84.0, 250.0];
const VALUE_COLUMN_MIN_WIDTH: f32 = 320.0;
const CELL_PADDING: f32 = 6.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Open,
    Save,
    SaveAs,
    CloseFile,
    Quit,
    Edit,
    Delete,
    Insert,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InsertKind {
    Element,
    Sequence,
    Item,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct InsertForm {
    kind: InsertKind,
    tag: String,
    vr: String,
    value: String,
}

impl InsertForm {
    /// Item when a sequence header is selected, element otherwise.
    fn for_selection(selected: Option<&Row>) -> Self {
        let kind = match selected.map(|row| row.kind) {
            Some(RowKind::SequenceHeader) => InsertKind::Item,
            _ => InsertKind::Element,
        };
        Self {
            kind,
            tag: String::new(),
            vr: String::new(),
            value: String::new(),
        }
    }

    fn to_new_node(&self) -> Result<NewNode, String> {
        if self.kind == InsertKind::Item {
            return Ok(NewNode::Item);
        }

        let tag = parse_tag(&self.tag)
            .ok_or_else(|| format!("'{}' is not a tag number or keyword.", self.tag.trim()))?;
        if self.kind == InsertKind::Sequence {
            return Ok(NewNode::Sequence { tag });
        }

        let vr = if self.vr.trim().is_empty() {
            dictionary_vr(tag).ok_or_else(|| {
                format!("{} is not in the dictionary; enter its VR.", format_tag(tag))
            })?
        } else {
            parse_vr(&self.vr)
                .ok_or_else(|| format!("'{}' is not a value representation.", self.vr.trim()))?
        };
        if vr == dicom_core::VR::SQ {
            return Ok(NewNode::Sequence { tag });
        }
        if self.value.trim().is_empty() {
            return Err("Enter a value for the new element.".to_string());
        }
        Ok(NewNode::Element {
            tag,
            vr,
            value: self.value.clone(),
        })
    }
}

enum Dialog {
    Edit {
        position: usize,
        label: String,
        value: String,
    },
    Insert {
        anchor: Option<usize>,
        form: InsertForm,
        error: Option<String>,
    },
    /// Unsaved changes would be lost by `then`.
    ConfirmDiscard { then: Command },
}

pub struct TagTreeApp {
    settings: Settings,
    session: Option<Session>,
    selected: Option<usize>,
    search: String,
    dialog: Option<Dialog>,
    pending_open: Option<PathBuf>,
    discard_confirmed: bool,
    status_line: String,
}

impl Default for TagTreeApp {
    fn default() -> Self {
        Self::new(Settings::default(), None, None)
    }
}

impl TagTreeApp {
    pub fn new(settings: Settings, open: Option<PathBuf>, initial_status: Option<String>) -> Self {
        Self {
            settings,
            session: None,
            selected: None,
            search: String::new(),
            dialog: None,
            pending_open: open,
            discard_confirmed: false,
            status_line: initial_status.unwrap_or_default(),
        }
    }

    fn apply_black_background(ctx: &egui::Context) {
        let mut visuals = egui::Visuals::dark();
        let line_base = egui::Color32::from_gray(28);
        let line_hover = egui::Color32::from_gray(42);
        let line_active = egui::Color32::from_gray(56);

        visuals.panel_fill = egui::Color32::BLACK;
        visuals.window_fill = egui::Color32::from_gray(10);
        visuals.faint_bg_color = egui::Color32::from_gray(8);
        visuals.extreme_bg_color = egui::Color32::BLACK;
        visuals.window_stroke = egui::Stroke::new(1.0, line_base);
        visuals.widgets.noninteractive.bg_stroke = egui::Stroke::new(1.0, line_base);
        visuals.widgets.inactive.bg_stroke = egui::Stroke::new(1.0, line_base);
        visuals.widgets.hovered.bg_stroke = egui::Stroke::new(1.0, line_hover);
        visuals.widgets.active.bg_stroke = egui::Stroke::new(1.0, line_active);
        visuals.widgets.open.bg_stroke = egui::Stroke::new(1.0, line_base);
        ctx.set_visuals(visuals);
    }

    fn is_dirty(&self) -> bool {
        self.session.as_ref().is_some_and(Session::is_dirty)
    }

    fn window_title(&self) -> String {
        let base = format!("{APP_TITLE} v{APP_VERSION}");
        let Some(session) = self.session.as_ref() else {
            return base;
        };
        let name = session
            .path()
            .and_then(Path::file_name)
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| "untitled".to_string());
        let marker = if session.is_dirty() { " *" } else { "" };
        format!("{name}{marker} - {base}")
    }

    fn selected_row(&self) -> Option<&Row> {
        let session = self.session.as_ref()?;
        session.rows().get(self.selected?)
    }

    fn run(&mut self, command: Command, ctx: &egui::Context) {
        let discards_changes = matches!(command, Command::Open | Command::CloseFile | Command::Quit);
        if discards_changes && self.is_dirty() && !self.discard_confirmed {
            self.dialog = Some(Dialog::ConfirmDiscard { then: command });
            return;
        }
        self.discard_confirmed = false;

        match command {
            Command::Open => {
                let picked = rfd::FileDialog::new()
                    .add_filter("DICOM", &["dcm", "dicom"])
                    .add_filter("All files", &["*"])
                    .pick_file();
                if let Some(path) = picked {
                    self.open_path(path);
                }
            }
            Command::Save => self.save(None),
            Command::SaveAs => self.save_as(),
            Command::CloseFile => self.close_file(),
            Command::Quit => {
                // already confirmed, so let the close through
                self.session = None;
                ctx.send_viewport_cmd(ViewportCommand::Close);
            }
            Command::Edit => self.begin_edit(),
            Command::Delete => self.delete_selected(),
            Command::Insert => self.begin_insert(),
        }
    }

    fn open_path(&mut self, path: PathBuf) {
        match Session::open(&path, &self.settings) {
            Ok(session) => {
                self.status_line = format!("Opened {} ({} rows)", path.display(), session.rows().len());
                self.session = Some(session);
                self.selected = None;
                self.search.clear();
            }
            Err(err) => {
                self.status_line = format!("Error opening {}: {err:#}", path.display());
            }
        }
    }

    fn save(&mut self, path: Option<&Path>) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if path.is_none() && session.path().is_none() {
            self.save_as();
            return;
        }
        self.status_line = match session.save(path) {
            Ok(saved) => format!("Saved {}", saved.display()),
            Err(err) => format!("Error saving: {err:#}"),
        };
    }

    fn save_as(&mut self) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        let file_name = session
            .path()
            .and_then(Path::file_name)
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| "untitled.dcm".to_string());
        let picked = rfd::FileDialog::new()
            .add_filter("DICOM", &["dcm", "dicom"])
            .set_file_name(file_name)
            .save_file();
        if let Some(path) = picked {
            self.save(Some(&path));
        }
    }

    fn close_file(&mut self) {
        if self.session.take().is_some() {
            self.status_line = "Closed file".to_string();
        }
        self.selected = None;
        self.search.clear();
    }

    fn begin_edit(&mut self) {
        let (Some(session), Some(position)) = (self.session.as_ref(), self.selected) else {
            self.status_line = "Select an element to edit.".to_string();
            return;
        };
        match session.value_for_edit(position) {
            Ok(value) => {
                let label = session
                    .rows()
                    .get(position)
                    .map(|row| format!("{} {}", row.tag_text(), row.description))
                    .unwrap_or_default();
                self.dialog = Some(Dialog::Edit {
                    position,
                    label,
                    value,
                });
            }
            Err(err) => self.status_line = err.to_string(),
        }
    }

    fn begin_insert(&mut self) {
        if self.session.is_none() {
            return;
        }
        self.dialog = Some(Dialog::Insert {
            anchor: self.selected,
            form: InsertForm::for_selection(self.selected_row()),
            error: None,
        });
    }

    fn delete_selected(&mut self) {
        let (Some(session), Some(position)) = (self.session.as_mut(), self.selected) else {
            self.status_line = "Select a row to delete.".to_string();
            return;
        };
        let label = session
            .rows()
            .get(position)
            .map(|row| format!("{} {}", row.tag_text(), row.description))
            .unwrap_or_default();
        match session.delete(position) {
            Ok(()) => {
                self.status_line = format!("Deleted {label}");
                self.selected = (position < session.rows().len()).then_some(position);
            }
            Err(err) => self.status_line = err.to_string(),
        }
    }

    fn commit_edit(&mut self, position: usize, value: &str) -> bool {
        let Some(session) = self.session.as_mut() else {
            return true;
        };
        match session.modify(position, value) {
            Ok(()) => {
                self.status_line = format!("Updated {}", format_tag(session.rows()[position].tag));
                true
            }
            Err(err) => {
                self.status_line = err.to_string();
                false
            }
        }
    }

    fn commit_insert(&mut self, anchor: Option<usize>, form: &InsertForm) -> Result<(), String> {
        let node = form.to_new_node()?;
        let Some(session) = self.session.as_mut() else {
            return Ok(());
        };
        let position = session.insert(anchor, node).map_err(|err| err.to_string())?;
        self.selected = position;
        self.status_line = match position.and_then(|position| session.rows().get(position)) {
            Some(row) => format!("Inserted {} {}", row.tag_text(), row.description),
            None => "Inserted new node".to_string(),
        };
        Ok(())
    }

    fn keyboard_command(&self, ctx: &egui::Context) -> Option<Command> {
        if self.dialog.is_some() {
            return None;
        }
        let typing = ctx.wants_keyboard_input();
        ctx.input_mut(|input| {
            if input.consume_key(Modifiers::COMMAND | Modifiers::SHIFT, Key::S) {
                Some(Command::SaveAs)
            } else if input.consume_key(Modifiers::COMMAND, Key::S) {
                Some(Command::Save)
            } else if input.consume_key(Modifiers::COMMAND, Key::O) {
                Some(Command::Open)
            } else if input.consume_key(Modifiers::COMMAND, Key::W) {
                Some(Command::CloseFile)
            } else if typing {
                None
            } else if input.consume_key(Modifiers::NONE, Key::Enter) {
                Some(Command::Edit)
            } else if input.consume_key(Modifiers::NONE, Key::Delete) {
                Some(Command::Delete)
            } else if input.consume_key(Modifiers::NONE, Key::Insert) {
                Some(Command::Insert)
            } else {
                None
            }
        })
    }

    fn show_titlebar(&mut self, ctx: &egui::Context) -> Option<Command> {
        let mut command = None;
        let is_maximized = ctx.input(|input| input.viewport().maximized.unwrap_or(false));
        let title_text = self.window_title();
        let has_session = self.session.is_some();
        let bar_fill = ctx.style().visuals.panel_fill;

        egui::TopBottomPanel::top("titlebar")
            .show_separator_line(false)
            .frame(egui::Frame::none().fill(bar_fill))
            .exact_height(30.0)
            .show(ctx, |ui| {
                let button_size = egui::vec2(28.0, 22.0);
                let side_width = button_size.x * 3.0 + ui.spacing().item_spacing.x * 2.0;
                let titlebar_rect = ui.max_rect();
                let center_width = (ui.available_width()
                    - side_width * 2.0
                    - ui.spacing().item_spacing.x * 2.0)
                    .max(0.0);

                ui.add_space(2.0);
                ui.horizontal(|ui| {
                    ui.allocate_ui_with_layout(
                        egui::vec2(side_width, button_size.y),
                        egui::Layout::left_to_right(egui::Align::Center),
                        |ui| {
                            ui.add_space(4.0);
                            let menu_button = egui::Button::new("")
                                .fill(bar_fill)
                                .stroke(egui::Stroke::NONE)
                                .min_size(egui::vec2(20.0, 18.0));
                            let menu_response =
                                egui::menu::menu_custom_button(ui, menu_button, |ui| {
                                    command = self.show_file_menu(ui, has_session);
                                });

                            let icon_rect =
                                menu_response.response.rect.shrink2(egui::vec2(5.0, 5.0));
                            let line_color = ui.visuals().widgets.inactive.fg_stroke.color;
                            let line_stroke = egui::Stroke::new(1.0, line_color);
                            for y in [
                                icon_rect.top() + 1.0,
                                icon_rect.center().y,
                                icon_rect.bottom() - 1.0,
                            ] {
                                ui.painter().line_segment(
                                    [
                                        egui::pos2(icon_rect.left(), y),
                                        egui::pos2(icon_rect.right(), y),
                                    ],
                                    line_stroke,
                                );
                            }
                        },
                    );

                    let (title_rect, drag_response) = ui.allocate_exact_size(
                        egui::vec2(center_width, button_size.y),
                        Sense::click_and_drag(),
                    );
                    ui.painter().text(
                        egui::pos2(titlebar_rect.center().x, title_rect.center().y),
                        egui::Align2::CENTER_CENTER,
                        &title_text,
                        egui::FontId::proportional(14.0),
                        ui.visuals().text_color(),
                    );
                    if drag_response.is_pointer_button_down_on() {
                        ctx.send_viewport_cmd(ViewportCommand::StartDrag);
                    }
                    if drag_response.double_clicked() {
                        ctx.send_viewport_cmd(ViewportCommand::Maximized(!is_maximized));
                    }

                    ui.allocate_ui_with_layout(
                        egui::vec2(ui.available_width(), button_size.y),
                        egui::Layout::right_to_left(egui::Align::Center),
                        |ui| {
                            let window_button = |ui: &mut egui::Ui, label: &str| {
                                ui.add_sized(
                                    button_size,
                                    egui::Button::new(label)
                                        .fill(bar_fill)
                                        .stroke(egui::Stroke::NONE),
                                )
                                .clicked()
                            };
                            if window_button(ui, "X") {
                                command = Some(Command::Quit);
                            }
                            if window_button(ui, "□") {
                                ctx.send_viewport_cmd(ViewportCommand::Maximized(!is_maximized));
                            }
                            if window_button(ui, "_") {
                                ctx.send_viewport_cmd(ViewportCommand::Minimized(true));
                            }
                        },
                    );
                });
            });

        command
    }

    fn show_file_menu(&mut self, ui: &mut egui::Ui, has_session: bool) -> Option<Command> {
        let mut command = None;
        let mut item = |ui: &mut egui::Ui, enabled: bool, label: &str, shortcut: &str, action| {
            let button = egui::Button::new(label).shortcut_text(shortcut);
            if ui.add_enabled(enabled, button).clicked() {
                command = Some(action);
                ui.close_menu();
            }
        };
        item(ui, true, "Open...", "Ctrl+O", Command::Open);
        item(ui, has_session, "Save", "Ctrl+S", Command::Save);
        item(ui, has_session, "Save As...", "Ctrl+Shift+S", Command::SaveAs);
        item(ui, has_session, "Close File", "Ctrl+W", Command::CloseFile);
        ui.separator();
        item(ui, has_session, "Edit Value", "Enter", Command::Edit);
        item(ui, has_session, "Insert...", "Insert", Command::Insert);
        item(ui, has_session, "Delete", "Del", Command::Delete);
        ui.separator();

        let mut show_meta = self.settings.display.show_meta;
        if ui.checkbox(&mut show_meta, "Show File Meta Information").changed() {
            self.settings.display.show_meta = show_meta;
            if let Some(session) = self.session.as_mut() {
                session.set_show_meta(show_meta);
                self.selected = None;
            }
        }
        ui.separator();
        item(ui, true, "Quit", "", Command::Quit);
        command
    }

    fn show_toolbar(&mut self, ui: &mut egui::Ui) -> Option<Command> {
        let mut command = None;
        ui.horizontal(|ui| {
            ui.add(
                egui::TextEdit::singleline(&mut self.search)
                    .hint_text("Search tags, names and values")
                    .desired_width(320.0),
            );
            if !self.search.is_empty() && ui.button("Clear").clicked() {
                self.search.clear();
            }
            ui.separator();
            let has_selection = self.selected.is_some();
            if ui.add_enabled(has_selection, egui::Button::new("Edit")).clicked() {
                command = Some(Command::Edit);
            }
            if ui.button("Insert").clicked() {
                command = Some(Command::Insert);
            }
            if ui.add_enabled(has_selection, egui::Button::new("Delete")).clicked() {
                command = Some(Command::Delete);
            }
        });
        command
    }

    fn show_table(&mut self, ui: &mut egui::Ui) -> Option<Command> {
        let Some(session) = self.session.as_ref() else {
            ui.centered_and_justified(|ui| {
                ui.label("Open a DICOM file (Ctrl+O) to inspect its tags.");
            });
            return None;
        };

        let visible = session.search(&self.search);
        let row_height = ui.text_style_height(&egui::TextStyle::Monospace) + 6.0;
        let value_width = (ui.available_width() - COLUMN_WIDTHS.iter().sum::<f32>())
            .max(VALUE_COLUMN_MIN_WIDTH);
        let widths = column_widths(value_width);
        let mut clicked = None;
        let mut command = None;

        let header_color = ui.visuals().strong_text_color();
        let (header_rect, _) = ui.allocate_exact_size(
            egui::vec2(widths.iter().sum(), row_height),
            Sense::hover(),
        );
        paint_cells(ui, header_rect, &widths, &COLUMN_TITLES.map(String::from), header_color);
        ui.separator();

        egui::ScrollArea::both()
            .auto_shrink([false, false])
            .show_rows(ui, row_height, visible.len(), |ui, range| {
                for row in &visible[range] {
                    let (rect, response) = ui.allocate_exact_size(
                        egui::vec2(widths.iter().sum(), row_height),
                        Sense::click(),
                    );
                    if self.selected == Some(row.position) {
                        ui.painter()
                            .rect_filled(rect, 0.0, ui.visuals().selection.bg_fill);
                    } else if response.hovered() {
                        ui.painter().rect_filled(rect, 0.0, egui::Color32::from_gray(20));
                    }
                    let color = row_color(ui, session, row);
                    let cells = [
                        row.indented_tag(),
                        row.vr.clone(),
                        row.vm_text(),
                        row.length_text(),
                        row.description.clone(),
                        row.value.clone(),
                    ];
                    paint_cells(ui, rect, &widths, &cells, color);

                    if response.clicked() {
                        clicked = Some(row.position);
                    }
                    if response.double_clicked() {
                        clicked = Some(row.position);
                        command = Some(Command::Edit);
                    }
                }
            });

        if let Some(position) = clicked {
            self.selected = Some(position);
        }
        command
    }

    fn show_dialog(&mut self, ctx: &egui::Context) -> Option<Command> {
        let mut dialog = self.dialog.take()?;
        let mut keep_open = true;
        let mut follow_up = None;

        match &mut dialog {
            Dialog::Edit {
                position,
                label,
                value,
            } => {
                let mut apply = false;
                modal_window("Edit Value").show(ctx, |ui| {
                    ui.label(label.as_str());
                    ui.label(
                        egui::RichText::new("Separate multiple values with a backslash.").weak(),
                    );
                    let response = ui.add(
                        egui::TextEdit::singleline(&mut *value)
                            .desired_width(420.0)
                            .font(egui::TextStyle::Monospace),
                    );
                    if !response.has_focus() && !response.lost_focus() {
                        response.request_focus();
                    }
                    let entered =
                        response.lost_focus() && ui.input(|input| input.key_pressed(Key::Enter));
                    ui.horizontal(|ui| {
                        apply = ui.button("Apply").clicked() || entered;
                        if ui.button("Cancel").clicked() {
                            keep_open = false;
                        }
                    });
                });
                if apply && self.commit_edit(*position, value) {
                    keep_open = false;
                }
            }
            Dialog::Insert {
                anchor,
                form,
                error,
            } => {
                let mut apply = false;
                let target = anchor
                    .and_then(|position| self.session.as_ref()?.rows().get(position))
                    .map(|row| format!("Relative to {} {}", row.tag_text(), row.description))
                    .unwrap_or_else(|| "At the data set root".to_string());
                modal_window("Insert").show(ctx, |ui| {
                    ui.label(target);
                    ui.horizontal(|ui| {
                        ui.radio_value(&mut form.kind, InsertKind::Element, "Element");
                        ui.radio_value(&mut form.kind, InsertKind::Sequence, "Sequence");
                        ui.radio_value(&mut form.kind, InsertKind::Item, "Item");
                    });
                    egui::Grid::new("insert-form").num_columns(2).show(ui, |ui| {
                        if form.kind != InsertKind::Item {
                            ui.label("Tag");
                            ui.add(
                                egui::TextEdit::singleline(&mut form.tag)
                                    .hint_text("(0010,0020) or PatientID"),
                            );
                            ui.end_row();
                        }
                        if form.kind == InsertKind::Element {
                            ui.label("VR");
                            ui.add(
                                egui::TextEdit::singleline(&mut form.vr)
                                    .hint_text("from dictionary")
                                    .desired_width(110.0),
                            );
                            ui.end_row();
                            ui.label("Value");
                            ui.text_edit_singleline(&mut form.value);
                            ui.end_row();
                        }
                    });
                    if form.kind != InsertKind::Item {
                        show_dictionary_list(ui, form);
                    }
                    if let Some(message) = error.as_deref() {
                        ui.colored_label(ui.visuals().error_fg_color, message);
                    }
                    ui.horizontal(|ui| {
                        apply = ui.button("Insert").clicked();
                        if ui.button("Cancel").clicked() {
                            keep_open = false;
                        }
                    });
                });
                if apply {
                    match self.commit_insert(*anchor, form) {
                        Ok(()) => keep_open = false,
                        Err(message) => *error = Some(message),
                    }
                }
            }
            Dialog::ConfirmDiscard { then } => {
                modal_window("Unsaved Changes").show(ctx, |ui| {
                    ui.label("The file has unsaved changes. Discard them?");
                    ui.horizontal(|ui| {
                        if ui.button("Discard").clicked() {
                            follow_up = Some(*then);
                            keep_open = false;
                        }
                        if ui.button("Cancel").clicked() {
                            keep_open = false;
                        }
                    });
                });
            }
        }

        if ctx.input(|input| input.key_pressed(Key::Escape)) {
            keep_open = false;
        }
        if keep_open {
            self.dialog = Some(dialog);
        }
        if follow_up.is_some() {
            self.discard_confirmed = true;
        }
        follow_up
    }

    fn show_resize_grip(&self, ctx: &egui::Context) {
        const GRIP_SIZE: f32 = 18.0;
        const MARGIN: f32 = 1.0;

        egui::Area::new(egui::Id::new("window-resize-grip"))
            .order(egui::Order::Foreground)
            .anchor(egui::Align2::RIGHT_BOTTOM, egui::vec2(-MARGIN, -MARGIN))
            .show(ctx, |ui| {
                let (rect, response) = ui
                    .allocate_exact_size(egui::vec2(GRIP_SIZE, GRIP_SIZE), Sense::click_and_drag());

                if response.drag_started() {
                    ui.ctx().send_viewport_cmd(ViewportCommand::BeginResize(
                        ResizeDirection::SouthEast,
                    ));
                }
                if response.hovered() && !response.dragged() {
                    ui.ctx().set_cursor_icon(egui::CursorIcon::ResizeSouthEast);
                }

                let stroke = egui::Stroke::new(1.0, egui::Color32::from_gray(72));
                let r = rect.shrink(3.0);
                for offset in [0.0_f32, 4.0, 8.0] {
                    ui.painter().line_segment(
                        [
                            egui::pos2(r.right() - 4.0 - offset, r.bottom()),
                            egui::pos2(r.right(), r.bottom() - 4.0 - offset),
                        ],
                        stroke,
                    );
                }
            });
    }
}

impl eframe::App for TagTreeApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        Self::apply_black_background(ctx);

        if let Some(path) = self.pending_open.take() {
            self.open_path(path);
        }

        if ctx.input(|input| input.viewport().close_requested()) && self.is_dirty() {
            ctx.send_viewport_cmd(ViewportCommand::CancelClose);
            self.dialog = Some(Dialog::ConfirmDiscard {
                then: Command::Quit,
            });
        }

        let mut commands = Vec::new();
        commands.extend(self.keyboard_command(ctx));
        commands.extend(self.show_titlebar(ctx));

        egui::TopBottomPanel::bottom("status")
            .show_separator_line(false)
            .show(ctx, |ui| {
                ui.horizontal(|ui| {
                    ui.label(&self.status_line);
                    if let Some(session) = self.session.as_ref() {
                        ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                            ui.label(format!("{} rows", session.rows().len()));
                        });
                    }
                });
            });

        egui::CentralPanel::default().show(ctx, |ui| {
            if self.session.is_some() {
                commands.extend(self.show_toolbar(ui));
                ui.add_space(4.0);
            }
            commands.extend(self.show_table(ui));
        });

        commands.extend(self.show_dialog(ctx));
        for command in commands {
            self.run(command, ctx);
        }

        ctx.send_viewport_cmd(ViewportCommand::Title(self.window_title()));
        self.show_resize_grip(ctx);
    }
}

/// Dictionary entries matching the tag field; picking one fills in tag and VR.
fn show_dictionary_list(ui: &mut egui::Ui, form: &mut InsertForm) {
    let matches = search_dictionary(dictionary_tags(), &form.tag);
    let current = parse_tag(&form.tag);
    let mut picked: Option<&DictionaryTag> = None;

    ui.label(egui::RichText::new(format!("{} dictionary matches", matches.len())).weak());
    let row_height = ui.text_style_height(&egui::TextStyle::Monospace) + 4.0;
    egui::ScrollArea::vertical()
        .id_salt("insert-dictionary")
        .max_height(180.0)
        .auto_shrink([false, true])
        .show_rows(ui, row_height, matches.len(), |ui, range| {
            for entry in &matches[range] {
                let text = format!(
                    "{}  {:<2}  {}",
                    format_tag(entry.tag),
                    vr_code(entry.vr),
                    entry.keyword
                );
                let label = egui::RichText::new(text).monospace();
                if ui.selectable_label(current == Some(entry.tag), label).clicked() {
                    picked = Some(*entry);
                }
            }
        });

    if let Some(entry) = picked {
        form.tag = entry.keyword.clone();
        form.vr = vr_code(entry.vr);
        if entry.vr == dicom_core::VR::SQ {
            form.kind = InsertKind::Sequence;
        }
    }
}

fn modal_window(title: &str) -> egui::Window<'static> {
    egui::Window::new(title)
        .collapsible(false)
        .resizable(false)
        .anchor(egui::Align2::CENTER_CENTER, egui::Vec2::ZERO)
}

fn column_widths(value_width: f32) -> [f32; 6] {
    [
        COLUMN_WIDTHS[0],
        COLUMN_WIDTHS[1],
        COLUMN_WIDTHS[2],
        COLUMN_WIDTHS[3],
        COLUMN_WIDTHS[4],
        value_width,
    ]
}

fn row_color(ui: &egui::Ui, session: &Session, row: &Row) -> egui::Color32 {
    if row.is_delimiter() || session.is_meta_row(row.position) {
        egui::Color32::from_gray(110)
    } else if session.policy().is_protected(row.tag) {
        egui::Color32::from_rgb(200, 170, 90)
    } else {
        ui.visuals().text_color()
    }
}

fn paint_cells(ui: &egui::Ui, rect: egui::Rect, widths: &[f32; 6], cells: &[String; 6], color: egui::Color32) {
    let font = egui::FontId::monospace(12.5);
    let mut left = rect.left();
    for (width, text) in widths.iter().zip(cells) {
        let cell = egui::Rect::from_min_size(egui::pos2(left, rect.top()), egui::vec2(*width, rect.height()));
        ui.painter().with_clip_rect(cell.shrink2(egui::vec2(CELL_PADDING / 2.0, 0.0))).text(
            egui::pos2(cell.left() + CELL_PADDING, cell.center().y),
            egui::Align2::LEFT_CENTER,
            text,
            font.clone(),
            color,
        );
        left += width;
    }
}
