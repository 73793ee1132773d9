// main.rs — viewer: demo district, projection records, map / first-person controls, egui panels

#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]

mod depth_pass;
mod renderer;

use projection_mapper::config::ViewerConfig;
use projection_mapper::loader::AssetLoader;
use projection_mapper::mesh::{build_box, build_plane};
use projection_mapper::operator::{CameraMode, OperatorKey};
use projection_mapper::projection::ProjectionId;
use projection_mapper::records;
use projection_mapper::{Stage, ProjectorKind};
use renderer::Renderer;

use glam::Vec3;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use winit::{
    dpi::LogicalSize,
    event::*,
    event_loop::{ControlFlow, EventLoop},
    window::{CursorGrabMode, Fullscreen, Window, WindowBuilder},
};

/// Requests collected while the UI closure only sees the stage immutably.
enum UiAction {
    OpenRecords(PathBuf),
    Export,
    Select(usize),
    ToMap,
    Attribute(ProjectionId, &'static str, String),
    Layers(ProjectionId, Option<BTreeSet<String>>),
    Raise(ProjectionId, usize),
    Remove(ProjectionId),
    Time(f32),
}

fn main() {
    env_logger::init();

    let config = match ViewerConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            log::error!("{}", e);
            std::process::exit(2);
        }
    };

    let event_loop = EventLoop::new();
    let window = match WindowBuilder::new()
        .with_title("Projection Mapper")
        .with_inner_size(LogicalSize::new(1280, 720))
        .build(&event_loop)
    {
        Ok(w) => Arc::new(w),
        Err(e) => {
            log::error!("failed to create window: {}", e);
            std::process::exit(1);
        }
    };

    let mut renderer = match pollster::block_on(Renderer::new(window.clone())) {
        Ok(r) => r,
        Err(e) => {
            log::error!("{}", e);
            std::process::exit(1);
        }
    };

    let capture = Box::new(renderer.depth_capture(config.depth_resolution));
    let mut stage = Stage::with_loader(capture, AssetLoader::new(None));
    build_district(&mut stage, config.scene_size);
    if let Some(path) = &config.records {
        open_records(&mut stage, path);
    }

    // input state
    let mut orbiting = false;
    let mut panning = false;
    let mut is_fullscreen = false;

    // FPS
    let mut last_frame = Instant::now();
    let mut fps_window = Instant::now();
    let mut frame_count = 0;
    let mut fps = 0.0;

    event_loop.run(move |event, _, control_flow| {
        *control_flow = ControlFlow::Poll;

        match event {
            Event::WindowEvent { event, .. } => {
                // egui first
                let response = renderer.egui_state.on_event(&renderer.egui_ctx, &event);
                if response.consumed {
                    return;
                }

                match event {
                    WindowEvent::CloseRequested => {
                        *control_flow = ControlFlow::Exit;
                    }

                    WindowEvent::Resized(new_size) => {
                        renderer.resize(new_size);
                    }

                    WindowEvent::Focused(false) => {
                        release_pointer(&window);
                        stage.pointer_lost();
                    }

                    WindowEvent::KeyboardInput { input, .. } => {
                        if input.state != ElementState::Pressed {
                            return;
                        }
                        let Some(code) = input.virtual_keycode else {
                            return;
                        };
                        if let Some(key) = operator_key(code) {
                            stage.operator_mut().key(key);
                            return;
                        }
                        if let Some(index) = digit(code) {
                            stage.select(index);
                            return;
                        }
                        match code {
                            VirtualKeyCode::Return | VirtualKeyCode::Space => stage.toggle_mode(),
                            VirtualKeyCode::Escape => {
                                release_pointer(&window);
                                stage.pointer_lost();
                            }
                            VirtualKeyCode::X => log_pose(&stage),
                            VirtualKeyCode::C => export(&stage, &config.export),
                            VirtualKeyCode::O => {
                                if let Some(path) = pick_records() {
                                    open_records(&mut stage, &path);
                                }
                            }
                            VirtualKeyCode::F11 => {
                                is_fullscreen = !is_fullscreen;
                                window.set_fullscreen(is_fullscreen.then(|| Fullscreen::Borderless(None)));
                            }
                            _ => {}
                        }
                    }

                    WindowEvent::MouseInput { state, button, .. } => {
                        let pressed = state == ElementState::Pressed;
                        match button {
                            MouseButton::Left => orbiting = pressed,
                            MouseButton::Middle => panning = pressed,
                            // held right button edits the attached projection
                            MouseButton::Right => stage.operator_mut().set_grab(pressed),
                            _ => {}
                        }
                    }

                    WindowEvent::MouseWheel { delta, .. } => {
                        let scroll = match delta {
                            MouseScrollDelta::LineDelta(_, y) => y,
                            MouseScrollDelta::PixelDelta(pos) => pos.y as f32 / 20.0,
                        };
                        stage.operator_mut().zoom(scroll);
                    }

                    WindowEvent::DroppedFile(path) => open_records(&mut stage, &path),

                    _ => {}
                }
            }

            Event::DeviceEvent {
                event: DeviceEvent::MouseMotion { delta: (dx, dy) },
                ..
            } => {
                let (dx, dy) = (dx as f32, dy as f32);
                let operator = stage.operator_mut();
                if panning {
                    operator.pan(dx, dy);
                } else if operator.mode() == CameraMode::FirstPerson || orbiting {
                    operator.pointer_motion(dx, dy, orbiting);
                }
            }

            Event::RedrawRequested(_) => {
                let now = Instant::now();
                let dt = now.duration_since(last_frame).as_secs_f32();
                last_frame = now;
                frame_count += 1;
                if now.duration_since(fps_window).as_secs_f32() >= 1.0 {
                    fps = frame_count as f32 / now.duration_since(fps_window).as_secs_f32();
                    frame_count = 0;
                    fps_window = now;
                }

                stage.operator_mut().set_aspect(renderer.aspect());
                let report = stage.frame(dt);
                match report.pointer_capture {
                    Some(true) => grab_pointer(&window),
                    Some(false) => release_pointer(&window),
                    None => {}
                }

                let mut actions = Vec::new();
                let render_result = renderer.render_with_ui(&window, &stage, &report.view, |ctx| {
                    draw_ui(ctx, &stage, &mut actions, fps);
                });

                for action in actions {
                    apply(&mut stage, action, &config.export);
                }

                match render_result {
                    Ok(_) => {}
                    Err(wgpu::SurfaceError::Lost) => renderer.resize(renderer.size),
                    Err(wgpu::SurfaceError::OutOfMemory) => *control_flow = ControlFlow::Exit,
                    Err(e) => log::error!("render error: {:?}", e),
                }
            }

            Event::MainEventsCleared => {
                window.request_redraw();
            }

            _ => {}
        }
    });
}

/// Ground plane plus a grid of blocks with varying heights.
fn build_district(stage: &mut Stage, size: f32) {
    stage.add_model("ground", build_plane(size));

    let block = 24.0;
    let street = 16.0;
    let pitch = block + street;
    let count = ((size * 0.5) / pitch).floor() as i32;
    for i in -count..count {
        for j in -count..count {
            // deterministic skyline
            let seed = (i * 73 + j * 151).rem_euclid(17) as f32;
            let height = 6.0 + seed * 2.5;
            let min = Vec3::new(i as f32 * pitch + street * 0.5, 0.0, j as f32 * pitch + street * 0.5);
            let max = min + Vec3::new(block, height, block);
            stage.add_model(format!("block-{}-{}", i, j), build_box(min, max));
        }
    }
    log::info!("district: {} surfaces", stage.scene().surfaces().len());
}

fn open_records(stage: &mut Stage, path: &Path) {
    match records::load_records(path) {
        Ok(list) => {
            stage
                .loader_mut()
                .set_base_dir(path.parent().map(Path::to_path_buf));
            let tickets = stage.load_records(&list);
            log::info!("{}: {} projections loading", path.display(), tickets.len());
        }
        Err(e) => log::error!("{}", e),
    }
}

fn pick_records() -> Option<PathBuf> {
    rfd::FileDialog::new()
        .add_filter("Projection records", &["json"])
        .pick_file()
}

fn export(stage: &Stage, path: &Path) {
    if let Err(e) = stage.save_records(path) {
        log::error!("{}", e);
    }
}

fn log_pose(stage: &Stage) {
    let fp = &stage.operator().first_person;
    let r = fp.rotation();
    log::info!(
        "camera position=\"{:.3} {:.3} {:.3}\" rotation=\"{:.2} {:.2} {:.2}\" fov={:.1}",
        fp.position.x,
        fp.position.y,
        fp.position.z,
        r.x.to_degrees(),
        r.y.to_degrees(),
        r.z.to_degrees(),
        fp.fov,
    );
}

fn grab_pointer(window: &Window) {
    if window
        .set_cursor_grab(CursorGrabMode::Locked)
        .or_else(|_| window.set_cursor_grab(CursorGrabMode::Confined))
        .is_err()
    {
        log::warn!("pointer capture unavailable");
    }
    window.set_cursor_visible(false);
}

fn release_pointer(window: &Window) {
    if let Err(e) = window.set_cursor_grab(CursorGrabMode::None) {
        log::warn!("pointer release failed: {e}");
    }
    window.set_cursor_visible(true);
}

fn operator_key(code: VirtualKeyCode) -> Option<OperatorKey> {
    Some(match code {
        VirtualKeyCode::W => OperatorKey::Forward,
        VirtualKeyCode::S => OperatorKey::Back,
        VirtualKeyCode::A => OperatorKey::Left,
        VirtualKeyCode::D => OperatorKey::Right,
        VirtualKeyCode::E => OperatorKey::Up,
        VirtualKeyCode::Q => OperatorKey::Down,
        VirtualKeyCode::Up => OperatorKey::ArrowUp,
        VirtualKeyCode::Down => OperatorKey::ArrowDown,
        VirtualKeyCode::Left => OperatorKey::ArrowLeft,
        VirtualKeyCode::Right => OperatorKey::ArrowRight,
        _ => return None,
    })
}

fn digit(code: VirtualKeyCode) -> Option<usize> {
    use VirtualKeyCode::*;
    [Key1, Key2, Key3, Key4, Key5, Key6, Key7, Key8, Key9]
        .iter()
        .position(|k| *k == code)
}

fn apply(stage: &mut Stage, action: UiAction, export_path: &Path) {
    match action {
        UiAction::OpenRecords(path) => open_records(stage, &path),
        UiAction::Export => export(stage, export_path),
        UiAction::Select(index) => {
            stage.select(index);
        }
        UiAction::ToMap => stage.to_map(),
        UiAction::Attribute(id, name, value) => {
            stage.apply_attribute(id, name, &value);
        }
        UiAction::Layers(id, layers) => {
            stage.edit(id, |p, cx| p.set_visible_layers(cx.scene, layers));
        }
        UiAction::Raise(id, index) => {
            stage.set_projection_index(id, index);
        }
        UiAction::Remove(id) => {
            stage.remove_projection(id);
        }
        UiAction::Time(t) => stage.set_time(t),
    }
}

fn draw_ui(ctx: &egui::Context, stage: &Stage, actions: &mut Vec<UiAction>, fps: f32) {
    egui::TopBottomPanel::top("menu_bar").show(ctx, |ui| {
        egui::menu::bar(ui, |ui| {
            ui.menu_button("File", |ui| {
                if ui.button("Open records…").clicked() {
                    ui.close_menu();
                    if let Some(path) = pick_records() {
                        actions.push(UiAction::OpenRecords(path));
                    }
                }
                if ui.button("Export records").clicked() {
                    ui.close_menu();
                    actions.push(UiAction::Export);
                }
                if ui.button("Exit").clicked() {
                    std::process::exit(0);
                }
            });
            ui.menu_button("View", |ui| {
                if ui.button("Map view").clicked() {
                    ui.close_menu();
                    actions.push(UiAction::ToMap);
                }
            });
        });
    });

    egui::SidePanel::left("projections").show(ctx, |ui| {
        ui.heading("Projections");
        let attached = stage.operator().attached();
        let count = stage.projections().len();
        for (index, p) in stage.projections().iter().enumerate() {
            ui.horizontal(|ui| {
                let name = p.texture_source().unwrap_or("(no media)");
                let label = format!("{} {} [{}]", index + 1, name, p.camera().kind().name());
                if ui.selectable_label(attached == Some(p.id()), label).clicked() {
                    actions.push(UiAction::Select(index));
                }
                if index + 1 < count && ui.small_button("▲").clicked() {
                    actions.push(UiAction::Raise(p.id(), index + 1));
                }
                if ui.small_button("✖").clicked() {
                    actions.push(UiAction::Remove(p.id()));
                }
            });
        }

        let mut time = stage.time();
        let end = stage.keyframes().iter().map(|k| k.time).fold(0.0_f32, f32::max);
        if !stage.keyframes().is_empty()
            && ui
                .add(egui::Slider::new(&mut time, 0.0..=end.max(1.0)).text("time"))
                .changed()
        {
            actions.push(UiAction::Time(time));
        }

        let Some(p) = attached.and_then(|id| stage.projection(id)) else {
            return;
        };
        let id = p.id();
        ui.separator();
        ui.heading("Attached");

        let mut opacity = p.opacity();
        if ui
            .add(egui::Slider::new(&mut opacity, 0.0..=1.0).text("opacity"))
            .changed()
        {
            actions.push(UiAction::Attribute(id, "opacity", opacity.to_string()));
        }
        let camera = p.camera();
        if camera.kind() == ProjectorKind::Perspective {
            let mut fov = camera.fov();
            if ui.add(egui::Slider::new(&mut fov, 1.0..=170.0).text("fov")).changed() {
                actions.push(UiAction::Attribute(id, "fov", fov.to_string()));
            }
        }
        let mut far = camera.far();
        if ui
            .add(egui::Slider::new(&mut far, 10.0..=2000.0).text("far"))
            .changed()
        {
            actions.push(UiAction::Attribute(id, "far", far.to_string()));
        }
        let mut screen = p.screen();
        if ui.checkbox(&mut screen, "screen").changed() {
            actions.push(UiAction::Attribute(id, "screen", screen.to_string()));
        }
        if p.texture_sources().len() > 1 {
            ui.horizontal_wrapped(|ui| {
                for src in p.texture_sources() {
                    if ui.selectable_label(p.texture_source() == Some(src.as_str()), src.as_str()).clicked() {
                        actions.push(UiAction::Attribute(id, "src", src.clone()));
                    }
                }
            });
        }

        ui.separator();
        ui.label("Layers");
        egui::ScrollArea::vertical().show(ui, |ui| {
            let names: Vec<&str> = stage.scene().models().map(|s| s.name()).collect();
            for name in &names {
                let mut on = p.layer_visible(name);
                if ui.checkbox(&mut on, *name).changed() {
                    let mut layers: BTreeSet<String> = names
                        .iter()
                        .filter(|n| p.layer_visible(n))
                        .map(|n| n.to_string())
                        .collect();
                    if on {
                        layers.insert(name.to_string());
                    } else {
                        layers.remove(*name);
                    }
                    let all = layers.len() == names.len();
                    actions.push(UiAction::Layers(id, (!all).then_some(layers)));
                }
            }
        });
    });

    egui::TopBottomPanel::bottom("status_bar").show(ctx, |ui| {
        ui.horizontal(|ui| {
            if stage.loading() > 0 {
                ui.label(
                    egui::RichText::new(format!("Loading {}…", stage.loading()))
                        .color(egui::Color32::YELLOW),
                );
                ui.label("|");
            }
            let operator = stage.operator();
            ui.label(format!("{:?}", operator.mode()));
            if let Some(id) = operator.attached() {
                ui.label("|");
                ui.label(format!("attached #{}", id.raw()));
            }
            ui.label("|");
            ui.label(format!("{} projections", stage.projections().len()));
            ui.label("|");
            ui.label(egui::RichText::new(format!("FPS: {:.1}", fps)).color(egui::Color32::GREEN));
        });
    });
}
