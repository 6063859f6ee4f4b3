//! Event feed panel.
//!
//! Renders the shared event feed as a scrolling, filterable list at the
//! bottom of the window. Errors render in red; the view sticks to the
//! newest entry unless the user scrolls away.

use crate::event_log::{EventLog, Severity};
use eframe::egui;

/// UI state for the log panel.
pub struct LogPanelState {
    pub filter_text: String,
    pub errors_only: bool,
    pub scroll_to_bottom: bool,
}

impl Default for LogPanelState {
    fn default() -> Self {
        Self {
            filter_text: String::new(),
            errors_only: false,
            scroll_to_bottom: true,
        }
    }
}

pub fn render(ui: &mut egui::Ui, events: &EventLog, state: &mut LogPanelState) {
    ui.horizontal(|ui| {
        ui.label("Log");
        ui.separator();
        ui.label("Filter:");
        ui.text_edit_singleline(&mut state.filter_text);
        ui.checkbox(&mut state.errors_only, "Errors only");
        ui.checkbox(&mut state.scroll_to_bottom, "Follow");
        if ui.button("Clear").clicked() {
            events.clear();
        }
    });
    ui.separator();

    let entries = events.snapshot();
    let filter = state.filter_text.to_lowercase();
    let mut scroll = egui::ScrollArea::vertical().auto_shrink([false, false]);
    if state.scroll_to_bottom {
        scroll = scroll.stick_to_bottom(true);
    }
    scroll.show(ui, |ui| {
        for entry in entries.iter().filter(|entry| {
            (!state.errors_only || entry.severity == Severity::Error)
                && (filter.is_empty() || entry.message.to_lowercase().contains(&filter))
        }) {
            let line = format!(
                "{} {}",
                entry.timestamp.format("%H:%M:%S"),
                entry.message
            );
            match entry.severity {
                Severity::Error => {
                    ui.colored_label(egui::Color32::from_rgb(220, 80, 80), line);
                }
                Severity::Info => {
                    ui.label(line);
                }
            }
        }
    });
}
