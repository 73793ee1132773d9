// operator.rs — camera operator: map orbit camera, first-person camera and projector attachment

use crate::camera::{Euler, EulerOrder, ProjectorCamera};
use crate::projection::ProjectionId;
use glam::{Mat4, Quat, Vec2, Vec3};
use std::collections::VecDeque;
use std::f32::consts::{FRAC_PI_2, PI};

pub const MIN_MAP_DISTANCE: f32 = 10.0;
pub const MAX_MAP_DISTANCE: f32 = 1000.0;
/// Radians of look per pixel of pointer motion.
pub const LOOK_SENSITIVITY: f32 = 0.002;
/// Metres per movement key press.
pub const STEP: f32 = 1.0;
/// Degrees of fov or roll per arrow key press while editing.
pub const EDIT_STEP_DEGREES: f32 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraMode {
    Map,
    FirstPerson,
}

/// `controls` attribute: whether input moves the viewer, and whether it may
/// also edit an attached projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlsMode {
    Off,
    Move,
    Edit,
}

impl ControlsMode {
    pub fn parse(value: &str) -> Self {
        match value.trim() {
            "" | "true" | "move" => ControlsMode::Move,
            "edit" => ControlsMode::Edit,
            _ => ControlsMode::Off,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorKey {
    Forward,
    Back,
    Left,
    Right,
    Up,
    Down,
    ArrowUp,
    ArrowDown,
    ArrowLeft,
    ArrowRight,
}

/// Side effects queued for the stage, drained once per frame.
#[derive(Debug, Clone, PartialEq)]
pub enum OperatorCommand {
    /// Acquire (`true`) or release exclusive pointer capture.
    PointerCapture(bool),
    /// Grabbed movement applied to the projector's own pose: `look` in
    /// pointer pixels, `offset` along the projector's axes.
    Nudge {
        id: ProjectionId,
        look: Vec2,
        offset: Vec3,
    },
    AdjustFov {
        id: ProjectionId,
        delta: f32,
    },
    AdjustRoll {
        id: ProjectionId,
        delta: f32,
    },
}

/// Camera the final frame is rendered through.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewCamera {
    pub position: Vec3,
    pub view: Mat4,
    pub projection: Mat4,
}

impl ViewCamera {
    pub fn view_projection(&self) -> Mat4 {
        self.projection * self.view
    }
}

/// Orbiting top-down camera with map-style pan and zoom.
#[derive(Debug, Clone)]
pub struct OrbitCamera {
    pub target: Vec3,
    distance: f32,
    yaw: f32,
    pitch: f32,
    pub fov: f32,
    pub aspect: f32,
}

impl OrbitCamera {
    pub fn looking_at(position: Vec3, target: Vec3) -> Self {
        let offset = position - target;
        let distance = offset.length().clamp(MIN_MAP_DISTANCE, MAX_MAP_DISTANCE);
        let pitch = (offset.y / offset.length().max(f32::EPSILON)).clamp(-1.0, 1.0).asin();
        let yaw = offset.x.atan2(offset.z);
        Self {
            target,
            distance,
            yaw,
            pitch: pitch.clamp(0.05, FRAC_PI_2 - 0.01),
            fov: 60.0,
            aspect: 16.0 / 9.0,
        }
    }

    pub fn distance(&self) -> f32 {
        self.distance
    }

    pub fn position(&self) -> Vec3 {
        let (sy, cy) = self.yaw.sin_cos();
        let (sp, cp) = self.pitch.sin_cos();
        self.target + self.distance * Vec3::new(cp * sy, sp, cp * cy)
    }

    pub fn rotate(&mut self, dx: f32, dy: f32) {
        self.yaw = (self.yaw - dx * 0.005).rem_euclid(2.0 * PI);
        self.pitch = (self.pitch + dy * 0.005).clamp(0.05, FRAC_PI_2 - 0.01);
    }

    /// Drags the target across the ground plane, scaled by distance.
    pub fn pan(&mut self, dx: f32, dy: f32) {
        let (sy, cy) = self.yaw.sin_cos();
        let right = Vec3::new(cy, 0.0, -sy);
        let forward = Vec3::new(-sy, 0.0, -cy);
        let scale = self.distance * 0.002;
        self.target += (-dx * right + dy * forward) * scale;
    }

    pub fn zoom(&mut self, scroll: f32) {
        self.distance = (self.distance * 0.95f32.powf(scroll)).clamp(MIN_MAP_DISTANCE, MAX_MAP_DISTANCE);
    }

    pub fn view_camera(&self) -> ViewCamera {
        let position = self.position();
        ViewCamera {
            position,
            view: Mat4::look_at_rh(position, self.target, Vec3::Y),
            projection: Mat4::perspective_rh(self.fov.to_radians(), self.aspect, 1.0, 10000.0),
        }
    }
}

/// Free-look camera; orientation kept as YXZ yaw/pitch/roll.
#[derive(Debug, Clone)]
pub struct FirstPersonCamera {
    pub position: Vec3,
    yaw: f32,
    pitch: f32,
    roll: f32,
    pub fov: f32,
    pub aspect: f32,
}

impl Default for FirstPersonCamera {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 1.8, 0.0),
            yaw: 0.0,
            pitch: 0.0,
            roll: 0.0,
            fov: 60.0,
            aspect: 16.0 / 9.0,
        }
    }
}

impl FirstPersonCamera {
    pub fn rotation(&self) -> Euler {
        Euler::new(self.pitch, self.yaw, self.roll)
    }

    pub fn set_pose(&mut self, position: Vec3, rotation: Euler) {
        let r = rotation.reorder(EulerOrder::YXZ);
        self.position = position;
        self.pitch = r.x;
        self.yaw = r.y;
        self.roll = r.z;
    }

    pub fn orientation(&self) -> Quat {
        self.rotation().to_quat()
    }

    pub fn look(&mut self, dx: f32, dy: f32) {
        self.yaw -= dx * LOOK_SENSITIVITY;
        self.pitch = (self.pitch - dy * LOOK_SENSITIVITY).clamp(-FRAC_PI_2, FRAC_PI_2);
    }

    /// Moves along the camera's own axes.
    pub fn translate_local(&mut self, offset: Vec3) {
        self.position += self.orientation() * offset;
    }

    pub fn view_camera(&self) -> ViewCamera {
        let world = Mat4::from_rotation_translation(self.orientation(), self.position);
        ViewCamera {
            position: self.position,
            view: world.inverse(),
            projection: Mat4::perspective_rh(self.fov.to_radians(), self.aspect, 1.0, 10000.0),
        }
    }
}

/// Switches between the map and first-person cameras. Invariant: a
/// projection is only ever attached in first-person mode.
#[derive(Debug, Clone)]
pub struct CameraOperator {
    mode: CameraMode,
    pub map: OrbitCamera,
    pub first_person: FirstPersonCamera,
    attached: Option<ProjectionId>,
    controls: ControlsMode,
    grab: bool,
    commands: VecDeque<OperatorCommand>,
}

impl Default for CameraOperator {
    fn default() -> Self {
        Self::new(Vec3::new(0.0, 100.0, -100.0))
    }
}

impl CameraOperator {
    pub fn new(map_position: Vec3) -> Self {
        Self {
            mode: CameraMode::Map,
            map: OrbitCamera::looking_at(map_position, Vec3::ZERO),
            first_person: FirstPersonCamera::default(),
            attached: None,
            controls: ControlsMode::Edit,
            grab: false,
            commands: VecDeque::new(),
        }
    }

    pub fn mode(&self) -> CameraMode {
        self.mode
    }

    pub fn attached(&self) -> Option<ProjectionId> {
        self.attached
    }

    pub fn controls(&self) -> ControlsMode {
        self.controls
    }

    pub fn set_controls(&mut self, controls: ControlsMode) {
        self.controls = controls;
    }

    pub fn set_aspect(&mut self, aspect: f32) {
        self.map.aspect = aspect;
        self.first_person.aspect = aspect;
    }

    /// The live camera: map orbit or first-person, by mode.
    pub fn active_view(&self) -> ViewCamera {
        match self.mode {
            CameraMode::Map => self.map.view_camera(),
            CameraMode::FirstPerson => self.first_person.view_camera(),
        }
    }

    /// Returns the projection detached by leaving first-person, if any.
    pub fn to_map(&mut self) -> Option<ProjectionId> {
        if self.mode == CameraMode::Map {
            return None;
        }
        self.mode = CameraMode::Map;
        self.grab = false;
        self.commands.push_back(OperatorCommand::PointerCapture(false));
        self.detach_projection()
    }

    pub fn to_first_person(&mut self) {
        if self.mode == CameraMode::FirstPerson {
            return;
        }
        self.mode = CameraMode::FirstPerson;
        self.commands.push_back(OperatorCommand::PointerCapture(true));
    }

    pub fn toggle(&mut self) -> Option<ProjectionId> {
        match self.mode {
            CameraMode::Map => {
                self.to_first_person();
                None
            }
            CameraMode::FirstPerson => self.to_map(),
        }
    }

    /// Enters first-person and attaches `id`, auto-detaching the previous
    /// projection (returned). Without `reverse` the viewer steps into the
    /// projector's pose; with `reverse` the caller moves the projector to
    /// the viewer's pose.
    pub fn attach_projection(&mut self, id: ProjectionId, camera: &ProjectorCamera, reverse: bool) -> Option<ProjectionId> {
        let previous = self.detach_projection();
        self.to_first_person();
        if !reverse {
            self.first_person
                .set_pose(camera.world_position(), camera.rotation());
        }
        self.attached = Some(id);
        previous
    }

    pub fn detach_projection(&mut self) -> Option<ProjectionId> {
        self.grab = false;
        self.attached.take()
    }

    /// Exclusive pointer capture was lost outside our control: back to the
    /// map, detaching any projection.
    pub fn pointer_lost(&mut self) -> Option<ProjectionId> {
        let detached = self.detach_projection();
        if self.mode == CameraMode::FirstPerson {
            self.mode = CameraMode::Map;
            log::debug!("pointer capture lost, back to map view");
        }
        detached
    }

    pub fn set_grab(&mut self, grab: bool) {
        self.grab = grab;
    }

    /// Input currently edits the attached projection.
    pub fn editing(&self) -> Option<ProjectionId> {
        match (self.mode, self.controls, self.grab) {
            (CameraMode::FirstPerson, ControlsMode::Edit, true) => self.attached,
            _ => None,
        }
    }

    /// Keeps the viewer in the attached projector's eye after a lens edit.
    pub fn sync_from(&mut self, camera: &ProjectorCamera) {
        self.first_person
            .set_pose(camera.world_position(), camera.rotation());
    }

    pub fn key(&mut self, key: OperatorKey) {
        if self.controls == ControlsMode::Off || self.mode != CameraMode::FirstPerson {
            return;
        }
        if let Some(id) = self.editing() {
            let step = EDIT_STEP_DEGREES;
            let command = match key {
                OperatorKey::ArrowUp => Some(OperatorCommand::AdjustFov { id, delta: step }),
                OperatorKey::ArrowDown => Some(OperatorCommand::AdjustFov { id, delta: -step }),
                OperatorKey::ArrowLeft => Some(OperatorCommand::AdjustRoll { id, delta: step.to_radians() }),
                OperatorKey::ArrowRight => Some(OperatorCommand::AdjustRoll { id, delta: -step.to_radians() }),
                _ => None,
            };
            if let Some(command) = command {
                self.commands.push_back(command);
                return;
            }
        }

        let offset = match key {
            OperatorKey::Forward | OperatorKey::ArrowUp => Vec3::NEG_Z,
            OperatorKey::Back | OperatorKey::ArrowDown => Vec3::Z,
            OperatorKey::Left | OperatorKey::ArrowLeft => Vec3::NEG_X,
            OperatorKey::Right | OperatorKey::ArrowRight => Vec3::X,
            OperatorKey::Up => Vec3::Y,
            OperatorKey::Down => Vec3::NEG_Y,
        } * STEP;
        match self.editing() {
            Some(id) => self.commands.push_back(OperatorCommand::Nudge {
                id,
                look: Vec2::ZERO,
                offset,
            }),
            None => self.first_person.translate_local(offset),
        }
    }

    /// Pointer motion: looks around in first-person, orbits the map camera
    /// while `orbit` is held.
    pub fn pointer_motion(&mut self, dx: f32, dy: f32, orbit: bool) {
        if self.controls == ControlsMode::Off {
            return;
        }
        match self.mode {
            CameraMode::FirstPerson => match self.editing() {
                Some(id) => self.commands.push_back(OperatorCommand::Nudge {
                    id,
                    look: Vec2::new(dx, dy),
                    offset: Vec3::ZERO,
                }),
                None => self.first_person.look(dx, dy),
            },
            CameraMode::Map if orbit => self.map.rotate(dx, dy),
            CameraMode::Map => {}
        }
    }

    pub fn pan(&mut self, dx: f32, dy: f32) {
        if self.controls != ControlsMode::Off && self.mode == CameraMode::Map {
            self.map.pan(dx, dy);
        }
    }

    pub fn zoom(&mut self, scroll: f32) {
        if self.controls != ControlsMode::Off && self.mode == CameraMode::Map {
            self.map.zoom(scroll);
        }
    }

    pub fn drain_commands(&mut self) -> Vec<OperatorCommand> {
        self.commands.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn projector() -> ProjectorCamera {
        let mut camera = ProjectorCamera::perspective(50.0, 0.75, 1.0, 150.0);
        camera.set_position(Vec3::new(10.0, 1.8, -10.0));
        camera.set_rotation(Euler::new(-0.03, -1.02, -0.005));
        camera
    }

    fn invariant_holds(op: &CameraOperator) -> bool {
        op.attached().is_none() || op.mode() == CameraMode::FirstPerson
    }

    #[test]
    fn attaching_steps_into_the_projector() {
        let mut op = CameraOperator::default();
        let cam = projector();
        assert_eq!(op.attach_projection(ProjectionId::from_raw(0), &cam, false), None);
        assert_eq!(op.mode(), CameraMode::FirstPerson);
        assert!(op.first_person.position.abs_diff_eq(cam.world_position(), 1e-5));
        let v = Vec3::new(0.2, 0.1, -1.0);
        assert!((op.first_person.orientation() * v).abs_diff_eq(cam.orientation() * v, 1e-4));
        assert_eq!(op.drain_commands(), vec![OperatorCommand::PointerCapture(true)]);
    }

    #[test]
    fn attaching_again_detaches_the_previous_projection() {
        let mut op = CameraOperator::default();
        let cam = projector();
        op.attach_projection(ProjectionId::from_raw(0), &cam, false);
        let previous = op.attach_projection(ProjectionId::from_raw(1), &cam, false);
        assert_eq!(previous, Some(ProjectionId::from_raw(0)));
        assert_eq!(op.attached(), Some(ProjectionId::from_raw(1)));
    }

    #[test]
    fn every_transition_keeps_attachment_in_first_person() {
        let mut op = CameraOperator::default();
        let cam = projector();
        let id = ProjectionId::from_raw(3);

        op.attach_projection(id, &cam, true);
        assert!(invariant_holds(&op));
        assert_eq!(op.toggle(), Some(id));
        assert!(invariant_holds(&op));
        op.toggle();
        assert!(invariant_holds(&op));
        op.attach_projection(id, &cam, false);
        assert_eq!(op.pointer_lost(), Some(id));
        assert_eq!(op.mode(), CameraMode::Map);
        assert!(invariant_holds(&op));
        assert_eq!(op.detach_projection(), None);
    }

    #[test]
    fn arrows_edit_lens_only_while_grabbing() {
        let mut op = CameraOperator::default();
        let id = ProjectionId::from_raw(0);
        op.attach_projection(id, &projector(), false);
        op.drain_commands();

        let before = op.first_person.position;
        op.key(OperatorKey::ArrowUp);
        assert_ne!(op.first_person.position, before);
        assert!(op.drain_commands().is_empty());

        op.set_grab(true);
        let before = op.first_person.position;
        op.key(OperatorKey::ArrowUp);
        op.key(OperatorKey::ArrowLeft);
        assert_eq!(op.first_person.position, before);
        assert_eq!(
            op.drain_commands(),
            vec![
                OperatorCommand::AdjustFov { id, delta: 1.0 },
                OperatorCommand::AdjustRoll { id, delta: 1.0f32.to_radians() },
            ]
        );
    }

    #[test]
    fn grabbed_movement_nudges_the_projector_not_the_viewer() {
        let mut op = CameraOperator::default();
        let id = ProjectionId::from_raw(0);
        op.attach_projection(id, &projector(), false);
        op.drain_commands();
        op.set_grab(true);
        let before = op.first_person.clone();
        op.key(OperatorKey::Forward);
        op.pointer_motion(10.0, 0.0, false);
        assert_eq!(op.first_person.position, before.position);
        assert_eq!(op.first_person.rotation(), before.rotation());
        assert_eq!(
            op.drain_commands(),
            vec![
                OperatorCommand::Nudge { id, look: Vec2::ZERO, offset: Vec3::NEG_Z * STEP },
                OperatorCommand::Nudge { id, look: Vec2::new(10.0, 0.0), offset: Vec3::ZERO },
            ]
        );
    }

    #[test]
    fn map_zoom_is_clamped() {
        let mut op = CameraOperator::default();
        for _ in 0..200 {
            op.zoom(5.0);
        }
        assert!((op.map.distance() - MIN_MAP_DISTANCE).abs() < 1e-4);
        for _ in 0..200 {
            op.zoom(-5.0);
        }
        assert!((op.map.distance() - MAX_MAP_DISTANCE).abs() < 1e-3);
    }

    #[test]
    fn default_map_camera_starts_at_its_position() {
        let op = CameraOperator::default();
        assert!(op.active_view().position.abs_diff_eq(Vec3::new(0.0, 100.0, -100.0), 1e-3));
    }
}
