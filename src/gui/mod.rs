//! The eframe/egui control panel.
//!
//! One window: drive and instrument controls along the top, jog and program
//! controls in a side panel, the stage position plot in the centre and the
//! event feed at the bottom. The GUI owns no worker logic; buttons raise
//! request flags or spawn one-shot locked drive calls on the runtime, and
//! all state shown comes from [`UiEvent`]s or the shared handles in the
//! worker context.

mod log_panel;

use crate::config::{Settings, StageAxis};
use crate::drive::Direction;
use crate::instrument::{self, Acquisition};
use crate::program::{Program, ScanOrder};
use crate::workers::{self, UiEvent, WorkerContext};
use eframe::egui;
use egui_plot::{Plot, PlotPoints, Points};
use log_panel::LogPanelState;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::PoisonError;
use tokio::sync::mpsc;

/// Recent positions kept for the trail on the plot.
const TRAIL_CAPACITY: usize = 500;

/// Program generation inputs, in engineering units.
struct ProgramDraft {
    min_x: f64,
    max_x: f64,
    x_inc: f64,
    min_y: f64,
    max_y: f64,
    y_inc: f64,
    pre_delay: f64,
    post_delay: f64,
    order: ScanOrder,
}

impl ProgramDraft {
    fn from_settings(settings: &Settings) -> Self {
        Self {
            min_x: 0.0,
            max_x: settings.x_dist,
            x_inc: settings.x_dist / 10.0,
            min_y: 0.0,
            max_y: settings.y_dist,
            y_inc: settings.y_dist / 10.0,
            pre_delay: 0.5,
            post_delay: 0.5,
            order: ScanOrder::XThenY,
        }
    }
}

pub struct TraverserGui {
    ctx: WorkerContext,
    ui_rx: mpsc::UnboundedReceiver<UiEvent>,
    runtime: tokio::runtime::Handle,
    config_path: PathBuf,

    /// Latest position in engineering units.
    position: Option<(f64, f64)>,
    trail: VecDeque<[f64; 2]>,
    program_overlay: Vec<[f64; 2]>,
    moving: bool,
    latest_reading: Option<Acquisition>,
    alert: Option<String>,

    selected_instrument: String,
    log_file_input: String,
    program_file_input: String,
    program_draft: ProgramDraft,
    show_program_window: bool,
    show_settings_window: bool,
    settings_draft: Settings,
    log_panel: LogPanelState,
}

impl TraverserGui {
    pub fn new(
        _cc: &eframe::CreationContext<'_>,
        ctx: WorkerContext,
        ui_rx: mpsc::UnboundedReceiver<UiEvent>,
        runtime: tokio::runtime::Handle,
        config_path: PathBuf,
    ) -> Self {
        let settings = ctx.settings_snapshot();
        Self {
            ctx,
            ui_rx,
            runtime,
            config_path,
            position: None,
            trail: VecDeque::with_capacity(TRAIL_CAPACITY),
            program_overlay: Vec::new(),
            moving: false,
            latest_reading: None,
            alert: None,
            selected_instrument: instrument::names()
                .first()
                .map(|n| n.to_string())
                .unwrap_or_default(),
            log_file_input: String::new(),
            program_file_input: String::new(),
            program_draft: ProgramDraft::from_settings(&settings),
            show_program_window: false,
            show_settings_window: false,
            settings_draft: settings,
            log_panel: LogPanelState::default(),
        }
    }

    fn drain_events(&mut self) {
        let settings = self.ctx.settings_snapshot();
        while let Ok(event) = self.ui_rx.try_recv() {
            match event {
                UiEvent::Position { x, y } => {
                    let xu = settings.value_to_units(x, StageAxis::X);
                    let yu = settings.value_to_units(y, StageAxis::Y);
                    self.position = Some((xu, yu));
                    self.moving = true;
                    if self.trail.len() >= TRAIL_CAPACITY {
                        self.trail.pop_front();
                    }
                    self.trail.push_back([xu, yu]);
                }
                UiEvent::MotionStopped => {
                    self.moving = false;
                }
                UiEvent::ProgramUpdated => {
                    self.rebuild_program_overlay(&settings);
                }
                UiEvent::Reading(reading) => {
                    self.latest_reading = Some(reading);
                }
                UiEvent::Alert(message) => {
                    self.alert = Some(message);
                }
                UiEvent::ProgramFinished => {}
            }
        }
    }

    fn rebuild_program_overlay(&mut self, settings: &Settings) {
        let program = self
            .ctx
            .program
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        self.program_overlay = program
            .points
            .iter()
            .map(|p| {
                [
                    settings.value_to_units(p.x, StageAxis::X),
                    settings.value_to_units(p.y, StageAxis::Y),
                ]
            })
            .collect();
    }

    fn program_running(&self) -> bool {
        self.ctx
            .program
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .running
    }

    fn jog(&self, axis: StageAxis, direction: Direction) {
        let motor = self.ctx.settings_snapshot().motor(axis);
        self.runtime
            .spawn(workers::ui_jog(self.ctx.clone(), motor, direction));
    }

    fn stop_axis(&self, axis: StageAxis) {
        let motor = self.ctx.settings_snapshot().motor(axis);
        self.runtime
            .spawn(workers::ui_stop_axis(self.ctx.clone(), motor));
    }

    fn connect_instrument(&self) {
        self.runtime.spawn(workers::ui_connect_instrument(
            self.ctx.clone(),
            self.selected_instrument.clone(),
        ));
    }

    fn disconnect_instrument(&self) {
        self.runtime
            .spawn(workers::ui_disconnect_instrument(self.ctx.clone()));
    }

    fn run_program(&mut self) {
        if self.log_file_input.trim().is_empty() {
            self.alert = Some("No log file set".to_string());
            return;
        }
        {
            let mut program = self
                .ctx
                .program
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            program.log_file = Some(PathBuf::from(self.log_file_input.trim()));
        }
        self.ctx.control.program.request();
    }

    fn generate_program(&mut self) {
        let settings = self.ctx.settings_snapshot();
        let draft = &self.program_draft;
        let generated = Program::generate(
            &settings,
            draft.min_x,
            draft.max_x,
            draft.min_y,
            draft.max_y,
            draft.x_inc,
            draft.y_inc,
            draft.pre_delay,
            draft.post_delay,
            draft.order,
        );
        let count = generated.points.len();
        {
            let mut program = self
                .ctx
                .program
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            let log_file = program.log_file.take();
            *program = generated;
            program.log_file = log_file;
        }
        self.ctx
            .events
            .push(format!("Program generated: {count} points"), true);
    }

    fn load_program(&mut self) {
        let settings = self.ctx.settings_snapshot();
        let path = PathBuf::from(self.program_file_input.trim());
        let mut program = self
            .ctx
            .program
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        match program.load(&settings, &path) {
            Ok(count) => {
                drop(program);
                self.ctx
                    .events
                    .push(format!("Program loaded: {count} points"), true);
            }
            Err(e) => {
                drop(program);
                self.ctx.events.push(
                    format!("Failed to read program from file {}: {e}", path.display()),
                    false,
                );
            }
        }
    }

    fn save_program(&mut self) {
        let settings = self.ctx.settings_snapshot();
        let path = PathBuf::from(self.program_file_input.trim());
        let program = self
            .ctx
            .program
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        match program.save(&settings, &path) {
            Ok(()) => {
                drop(program);
                self.ctx
                    .events
                    .push(format!("Program saved to {}", path.display()), true);
            }
            Err(e) => {
                drop(program);
                self.ctx
                    .events
                    .push(format!("Failed to save program: {e}"), false);
            }
        }
    }

    fn save_settings(&mut self) {
        {
            let mut settings = self
                .ctx
                .settings
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            *settings = self.settings_draft.clone();
        }
        match self.settings_draft.save(&self.config_path) {
            Ok(()) => self.ctx.events.push(
                format!("Configuration saved to {}", self.config_path.display()),
                true,
            ),
            Err(e) => self
                .ctx
                .events
                .push(format!("Failed to save configuration: {e}"), false),
        }
    }

    fn top_panel(&mut self, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            ui.heading("Traverser");
            ui.separator();
            if ui.button("Connect").clicked() {
                self.runtime.spawn(workers::ui_connect(self.ctx.clone()));
            }
            if ui.button("Disconnect").clicked() {
                self.runtime.spawn(workers::ui_disconnect(self.ctx.clone()));
            }
            ui.separator();
            if ui.button("Start").clicked() {
                self.ctx.control.start.request();
            }
            let stop = egui::Button::new(
                egui::RichText::new("STOP").strong().color(egui::Color32::WHITE),
            )
            .fill(egui::Color32::from_rgb(180, 40, 40));
            if ui.add(stop).clicked() {
                self.ctx.control.stop.request();
            }
            ui.separator();
            egui::ComboBox::from_label("Instrument")
                .selected_text(self.selected_instrument.clone())
                .show_ui(ui, |ui| {
                    for name in instrument::names() {
                        ui.selectable_value(
                            &mut self.selected_instrument,
                            name.to_string(),
                            name,
                        );
                    }
                });
            if ui.button("Connect instrument").clicked() {
                self.connect_instrument();
            }
            if ui.button("Disconnect instrument").clicked() {
                self.disconnect_instrument();
            }
            ui.separator();
            if ui.button("Settings").clicked() {
                self.settings_draft = self.ctx.settings_snapshot();
                self.show_settings_window = true;
            }
        });
    }

    fn side_panel(&mut self, ui: &mut egui::Ui) {
        let running = self.program_running();
        ui.add_enabled_ui(!running, |ui| {
            ui.heading("Motion");
            egui::Grid::new("jog_grid").show(ui, |ui| {
                ui.label("x");
                if ui.button("x-").clicked() {
                    self.jog(StageAxis::X, Direction::Reverse);
                }
                if ui.button("x+").clicked() {
                    self.jog(StageAxis::X, Direction::Forward);
                }
                if ui.button("stop x").clicked() {
                    self.stop_axis(StageAxis::X);
                }
                ui.end_row();
                ui.label("y");
                if ui.button("y-").clicked() {
                    self.jog(StageAxis::Y, Direction::Reverse);
                }
                if ui.button("y+").clicked() {
                    self.jog(StageAxis::Y, Direction::Forward);
                }
                if ui.button("stop y").clicked() {
                    self.stop_axis(StageAxis::Y);
                }
                ui.end_row();
            });
            if ui.button("Go home").clicked() {
                self.runtime.spawn(workers::ui_go_home(self.ctx.clone()));
            }
        });

        ui.separator();
        ui.heading("Program");
        ui.add_enabled_ui(!running, |ui| {
            if ui.button("Configure…").clicked() {
                self.show_program_window = true;
            }
            ui.horizontal(|ui| {
                ui.label("Log file:");
                ui.text_edit_singleline(&mut self.log_file_input);
            });
            if ui.button("Run").clicked() {
                self.run_program();
            }
        });
        if running {
            ui.label("Program running…");
        }

        ui.separator();
        ui.heading("Status");
        match self.position {
            Some((x, y)) => {
                ui.label(format!("x: {x:.2}  y: {y:.2}"));
            }
            None => {
                ui.label("position unknown");
            }
        }
        ui.label(if self.moving { "moving" } else { "idle" });
        if let Some(reading) = &self.latest_reading {
            ui.separator();
            for channel in reading {
                match (&channel.value, &channel.error) {
                    (Some(value), _) => {
                        ui.label(format!("{}: {value} {}", channel.id, channel.unit));
                    }
                    (None, Some(error)) => {
                        ui.colored_label(
                            egui::Color32::from_rgb(220, 80, 80),
                            format!("{}: {error}", channel.id),
                        );
                    }
                    (None, None) => {
                        ui.label(format!("{}: -", channel.id));
                    }
                }
            }
        }
    }

    fn plot(&mut self, ui: &mut egui::Ui) {
        let overlay = self.program_overlay.clone();
        let trail: Vec<[f64; 2]> = self.trail.iter().copied().collect();
        let position = self.position;
        Plot::new("stage_plot")
            .data_aspect(1.0)
            .show(ui, |plot_ui| {
                if !overlay.is_empty() {
                    plot_ui.points(
                        Points::new(PlotPoints::from(overlay))
                            .radius(2.5)
                            .color(egui::Color32::GRAY)
                            .name("program"),
                    );
                }
                if !trail.is_empty() {
                    plot_ui.points(
                        Points::new(PlotPoints::from(trail))
                            .radius(1.5)
                            .color(egui::Color32::LIGHT_BLUE)
                            .name("trail"),
                    );
                }
                if let Some((x, y)) = position {
                    plot_ui.points(
                        Points::new(PlotPoints::from(vec![[x, y]]))
                            .radius(5.0)
                            .color(egui::Color32::GOLD)
                            .name("stage"),
                    );
                }
            });
    }

    fn program_window(&mut self, ctx: &egui::Context) {
        let mut open = self.show_program_window;
        let mut generate = false;
        let mut load = false;
        let mut save = false;
        egui::Window::new("Program")
            .open(&mut open)
            .show(ctx, |ui| {
                let draft = &mut self.program_draft;
                egui::Grid::new("program_grid").show(ui, |ui| {
                    ui.label("min x");
                    ui.add(egui::DragValue::new(&mut draft.min_x).speed(1.0));
                    ui.label("max x");
                    ui.add(egui::DragValue::new(&mut draft.max_x).speed(1.0));
                    ui.label("x inc");
                    ui.add(egui::DragValue::new(&mut draft.x_inc).speed(1.0));
                    ui.end_row();
                    ui.label("min y");
                    ui.add(egui::DragValue::new(&mut draft.min_y).speed(1.0));
                    ui.label("max y");
                    ui.add(egui::DragValue::new(&mut draft.max_y).speed(1.0));
                    ui.label("y inc");
                    ui.add(egui::DragValue::new(&mut draft.y_inc).speed(1.0));
                    ui.end_row();
                    ui.label("pre delay");
                    ui.add(egui::DragValue::new(&mut draft.pre_delay).speed(0.1));
                    ui.label("post delay");
                    ui.add(egui::DragValue::new(&mut draft.post_delay).speed(0.1));
                    ui.end_row();
                });
                ui.horizontal(|ui| {
                    ui.label("Order:");
                    ui.selectable_value(&mut draft.order, ScanOrder::XThenY, "x then y");
                    ui.selectable_value(&mut draft.order, ScanOrder::YThenX, "y then x");
                });
                if ui.button("Generate").clicked() {
                    generate = true;
                }
                ui.separator();
                ui.horizontal(|ui| {
                    ui.label("Program file:");
                    ui.text_edit_singleline(&mut self.program_file_input);
                });
                ui.horizontal(|ui| {
                    if ui.button("Load").clicked() {
                        load = true;
                    }
                    if ui.button("Save").clicked() {
                        save = true;
                    }
                });
            });
        self.show_program_window = open;
        if generate {
            self.generate_program();
        }
        if load {
            self.load_program();
        }
        if save {
            self.save_program();
        }
    }

    fn settings_window(&mut self, ctx: &egui::Context) {
        let mut open = self.show_settings_window;
        let mut save = false;
        egui::Window::new("Settings")
            .open(&mut open)
            .show(ctx, |ui| {
                let draft = &mut self.settings_draft;
                egui::Grid::new("settings_grid").show(ui, |ui| {
                    ui.label("serial port");
                    ui.text_edit_singleline(&mut draft.serial_port);
                    ui.end_row();
                    ui.label("baud rate");
                    ui.add(egui::DragValue::new(&mut draft.baud_rate));
                    ui.end_row();
                    ui.label("timeout (s)");
                    ui.add(egui::DragValue::new(&mut draft.timeout).speed(0.1));
                    ui.end_row();
                    ui.label("velocity");
                    ui.add(egui::DragValue::new(&mut draft.vel).speed(0.1));
                    ui.end_row();
                    ui.label("acceleration");
                    ui.add(egui::DragValue::new(&mut draft.accel).speed(0.1));
                    ui.end_row();
                    ui.label("deceleration");
                    ui.add(egui::DragValue::new(&mut draft.decel).speed(0.1));
                    ui.end_row();
                    ui.label("x travel (device)");
                    ui.add(egui::DragValue::new(&mut draft.max_x));
                    ui.end_row();
                    ui.label("y travel (device)");
                    ui.add(egui::DragValue::new(&mut draft.max_y));
                    ui.end_row();
                    ui.label("x travel (units)");
                    ui.add(egui::DragValue::new(&mut draft.x_dist));
                    ui.end_row();
                    ui.label("y travel (units)");
                    ui.add(egui::DragValue::new(&mut draft.y_dist));
                    ui.end_row();
                    ui.label("x units");
                    ui.text_edit_singleline(&mut draft.x_units);
                    ui.end_row();
                    ui.label("y units");
                    ui.text_edit_singleline(&mut draft.y_units);
                    ui.end_row();
                    ui.label("instrument poll (s)");
                    ui.add(egui::DragValue::new(&mut draft.poll_instrument).speed(0.1));
                    ui.end_row();
                });
                if ui.button("Save").clicked() {
                    save = true;
                }
            });
        self.show_settings_window = open;
        if save {
            self.save_settings();
            self.show_settings_window = false;
        }
    }

    fn alert_window(&mut self, ctx: &egui::Context) {
        let Some(message) = self.alert.clone() else {
            return;
        };
        let mut dismissed = false;
        egui::Window::new("Alert")
            .collapsible(false)
            .resizable(false)
            .anchor(egui::Align2::CENTER_CENTER, [0.0, 0.0])
            .show(ctx, |ui| {
                ui.label(message);
                if ui.button("Ok").clicked() {
                    dismissed = true;
                }
            });
        if dismissed {
            self.alert = None;
        }
    }
}

impl eframe::App for TraverserGui {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.drain_events();

        egui::TopBottomPanel::top("top_panel").show(ctx, |ui| {
            self.top_panel(ui);
        });
        egui::TopBottomPanel::bottom("log_panel")
            .resizable(true)
            .min_height(120.0)
            .show(ctx, |ui| {
                log_panel::render(ui, &self.ctx.events, &mut self.log_panel);
            });
        egui::SidePanel::right("controls_panel")
            .min_width(220.0)
            .show(ctx, |ui| {
                self.side_panel(ui);
            });
        egui::CentralPanel::default().show(ctx, |ui| {
            self.plot(ui);
        });

        self.program_window(ctx);
        self.settings_window(ctx);
        self.alert_window(ctx);

        // Poll-driven updates keep arriving while the window is idle
        ctx.request_repaint_after(std::time::Duration::from_millis(100));
    }
}

/// Runs the GUI on the current thread until the window closes.
pub fn run(
    ctx: WorkerContext,
    ui_rx: mpsc::UnboundedReceiver<UiEvent>,
    runtime: tokio::runtime::Handle,
    config_path: PathBuf,
) -> eframe::Result {
    let native_options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default().with_inner_size([1100.0, 750.0]),
        ..Default::default()
    };
    eframe::run_native(
        "Traverser",
        native_options,
        Box::new(move |cc| {
            Ok(Box::new(TraverserGui::new(
                cc,
                ctx,
                ui_rx,
                runtime,
                config_path,
            )))
        }),
    )
}
