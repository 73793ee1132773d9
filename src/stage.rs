// stage.rs — scene composition: owns the scene, every projection and the camera operator

use crate::attributes::Attribute;
use crate::camera::Bounds;
use crate::depth::DepthCapture;
use crate::error::RecordError;
use crate::keyframe::{self, Keyframe};
use crate::loader::{AssetLoader, LoadTicket, LoadedTexture};
use crate::material::Texture;
use crate::mesh::Mesh;
use crate::operator::{CameraOperator, FirstPersonCamera, OperatorCommand, ViewCamera};
use crate::projection::{Projection, ProjectionId, ProjectionSettings, UpdateContext};
use crate::records::{self, KeyframeRecord, ProjectionRecord};
use crate::scene::{Scene, SurfaceId, SurfaceKind};
use glam::{Mat4, Vec3};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// What one frame did, and how to draw it.
#[derive(Debug, Clone)]
pub struct FrameReport {
    pub view: ViewCamera,
    /// Projections whose depth was recaptured this frame.
    pub updated: Vec<ProjectionId>,
    /// Latest pointer-capture request from the operator, if any.
    pub pointer_capture: Option<bool>,
}

pub struct Stage {
    scene: Scene,
    capture: Box<dyn DepthCapture>,
    projections: Vec<Projection>,
    next_id: u32,
    operator: CameraOperator,
    keyframes: Vec<Keyframe>,
    keyframes_dirty: bool,
    time: f32,
    elapsed: f32,
    loader: AssetLoader,
    /// Latest texture request per projection; older results are dropped.
    latest_load: BTreeMap<ProjectionId, LoadTicket>,
    /// Projections waiting for their first texture before they exist.
    pending: BTreeMap<LoadTicket, (ProjectionId, ProjectionSettings)>,
    scene_bounds: Option<Bounds>,
    bounds_dirty: bool,
}

impl Stage {
    pub fn new(capture: Box<dyn DepthCapture>) -> Self {
        Self::with_loader(capture, AssetLoader::default())
    }

    pub fn with_loader(capture: Box<dyn DepthCapture>, loader: AssetLoader) -> Self {
        Self {
            scene: Scene::new(),
            capture,
            projections: Vec::new(),
            next_id: 0,
            operator: CameraOperator::default(),
            keyframes: Vec::new(),
            keyframes_dirty: false,
            time: 0.0,
            elapsed: 0.0,
            loader,
            latest_load: BTreeMap::new(),
            pending: BTreeMap::new(),
            scene_bounds: None,
            bounds_dirty: false,
        }
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    pub fn operator(&self) -> &CameraOperator {
        &self.operator
    }

    /// Raw input goes straight to the operator; its side effects come back
    /// as commands on the next frame.
    pub fn operator_mut(&mut self) -> &mut CameraOperator {
        &mut self.operator
    }

    pub fn loader_mut(&mut self) -> &mut AssetLoader {
        &mut self.loader
    }

    pub fn projections(&self) -> &[Projection] {
        &self.projections
    }

    pub fn projection(&self, id: ProjectionId) -> Option<&Projection> {
        self.projections.iter().find(|p| p.id() == id)
    }

    /// Projection ids in z-order.
    pub fn order(&self) -> Vec<ProjectionId> {
        self.projections.iter().map(|p| p.id()).collect()
    }

    pub fn scene_bounds(&self) -> Option<Bounds> {
        self.scene_bounds
    }

    pub fn time(&self) -> f32 {
        self.time
    }

    /// Seconds of frames run, drives animated textures.
    pub fn elapsed(&self) -> f32 {
        self.elapsed
    }

    /// Requests awaiting a texture, including projections not yet created.
    pub fn loading(&self) -> usize {
        self.loader.pending()
    }

    // ---- surfaces ----

    /// Adds a base-scene model and binds every projection to it.
    pub fn add_model(&mut self, name: impl Into<String>, mesh: Mesh) -> SurfaceId {
        let id = self.scene.add_surface(name, mesh, SurfaceKind::Model);
        let order = self.order();
        for p in &mut self.projections {
            p.attach_to_surface(&mut self.scene, id, &order);
        }
        self.bounds_dirty = true;
        id
    }

    pub fn remove_model(&mut self, id: SurfaceId) -> bool {
        let Some(surface) = self.scene.surface(id) else {
            return false;
        };
        if surface.kind() != SurfaceKind::Model {
            return false;
        }
        self.invalidate_around(id);
        for p in &mut self.projections {
            p.detach_from_surface(&mut self.scene, id);
        }
        self.scene.remove_surface(id);
        self.bounds_dirty = true;
        true
    }

    pub fn set_surface_transform(&mut self, id: SurfaceId, transform: Mat4) -> bool {
        self.invalidate_around(id);
        let Some(surface) = self.scene.surface_mut(id) else {
            return false;
        };
        surface.set_transform(transform);
        self.bounds_dirty |= surface.kind() == SurfaceKind::Model;
        true
    }

    pub fn set_surface_mesh(&mut self, id: SurfaceId, mesh: Mesh) -> bool {
        self.invalidate_around(id);
        let Some(surface) = self.scene.surface_mut(id) else {
            return false;
        };
        surface.set_mesh(mesh);
        self.bounds_dirty |= surface.kind() == SurfaceKind::Model;
        true
    }

    /// Hidden models stop occluding.
    pub fn set_surface_visible(&mut self, id: SurfaceId, visible: bool) -> bool {
        self.invalidate_around(id);
        match self.scene.surface_mut(id) {
            Some(surface) => {
                surface.visible = visible;
                true
            }
            None => false,
        }
    }

    /// Marks projections that currently see `id` for recapture.
    fn invalidate_around(&mut self, id: SurfaceId) {
        let Some((min, max)) = self.scene.surface(id).and_then(|s| s.world_aabb()) else {
            return;
        };
        for p in &mut self.projections {
            if p.camera().frustum().intersects_aabb(min, max) {
                p.mark_dirty();
            }
        }
    }

    // ---- projections ----

    /// Creates a projection now, bound to every model. Without a texture it
    /// shows the fallback colour until one is set.
    pub fn add_projection(&mut self, settings: ProjectionSettings, texture: Option<Arc<Texture>>) -> ProjectionId {
        let id = self.allocate_id();
        self.insert_projection(id, settings, texture);
        id
    }

    /// Loads the first texture source in the background and creates the
    /// projection once it arrives. Nothing is created if the load fails.
    pub fn load_projection(&mut self, settings: ProjectionSettings) -> Option<LoadTicket> {
        let Some(url) = settings.texture_sources.first().cloned() else {
            log::warn!("projection has no media, not loading");
            return None;
        };
        let id = self.allocate_id();
        let ticket = self.loader.request(id, &url);
        self.pending.insert(ticket, (id, settings));
        Some(ticket)
    }

    /// Loads every record. Record keyframes target the id reserved for
    /// the projection and apply once it exists.
    pub fn load_records(&mut self, records: &[ProjectionRecord]) -> Vec<LoadTicket> {
        let mut tickets = Vec::new();
        for record in records {
            let Some(ticket) = self.load_projection(record.to_settings()) else {
                continue;
            };
            if let (Some(keyframes), Some((id, _))) = (&record.keyframes, self.pending.get(&ticket)) {
                let id = *id;
                self.keyframes.extend(keyframes.iter().map(|k| k.to_keyframe(id)));
            }
            tickets.push(ticket);
        }
        tickets
    }

    pub fn remove_projection(&mut self, id: ProjectionId) -> bool {
        let Some(pos) = self.projections.iter().position(|p| p.id() == id) else {
            return false;
        };
        if self.operator.attached() == Some(id) {
            self.operator.detach_projection();
        }
        let projection = self.projections.remove(pos);
        projection.destroy(&mut self.scene);
        self.latest_load.remove(&id);
        self.keyframes.retain(|k| k.target != id);
        self.reindex();
        true
    }

    /// Moves `id` to `index` in the z-order, re-sorting every surface's slots.
    pub fn set_projection_index(&mut self, id: ProjectionId, index: usize) -> bool {
        let Some(pos) = self.projections.iter().position(|p| p.id() == id) else {
            return false;
        };
        let projection = self.projections.remove(pos);
        let index = index.min(self.projections.len());
        self.projections.insert(index, projection);
        self.reindex();
        true
    }

    /// Runs `f` against projection `id` with the update context its
    /// camera-affecting setters need.
    pub fn edit<R>(
        &mut self,
        id: ProjectionId,
        f: impl FnOnce(&mut Projection, &mut UpdateContext<'_>) -> R,
    ) -> Option<R> {
        let p = self.projections.iter_mut().find(|p| p.id() == id)?;
        let mut cx = UpdateContext {
            scene: &mut self.scene,
            capture: self.capture.as_mut(),
        };
        Some(f(p, &mut cx))
    }

    /// Loads `url` and swaps it in as the projection's texture when done.
    pub fn select_texture_source(&mut self, id: ProjectionId, url: &str) -> Option<LoadTicket> {
        self.projection(id)?;
        let ticket = self.loader.request(id, url);
        self.latest_load.insert(id, ticket);
        Some(ticket)
    }

    /// Applies one declarative attribute. Returns false for unknown
    /// attributes, unparseable values and unknown projections.
    pub fn apply_attribute(&mut self, id: ProjectionId, name: &str, value: &str) -> bool {
        let Some(attribute) = Attribute::parse(name, value) else {
            log::debug!("ignoring attribute {}={:?}", name, value);
            return false;
        };
        match attribute {
            Attribute::Time(t) => {
                self.set_time(t);
                return true;
            }
            Attribute::Controls(mode) => {
                self.operator.set_controls(mode);
                return true;
            }
            Attribute::FirstPerson(on) => {
                return if on {
                    self.attach_projection(id, false)
                } else {
                    if self.operator.attached() == Some(id) {
                        self.detach_projection();
                    }
                    self.projection(id).is_some()
                };
            }
            Attribute::Src(url) => return self.select_texture_source(id, &url).is_some(),
            _ => {}
        }

        let scene_bounds = self.scene_bounds;
        self.edit(id, |p, cx| match attribute {
            Attribute::Position(v) => p.set_position(cx, v),
            Attribute::Rotation(r) => p.set_rotation(cx, r),
            Attribute::Bounds(b) => p.set_bounds(cx, b, false),
            Attribute::Layers(layers) => p.set_visible_layers(cx.scene, layers),
            Attribute::Fov(fov) => p.set_field_of_view(cx, fov),
            Attribute::Far(far) => p.set_far_plane(cx, far),
            Attribute::Opacity(o) => p.set_opacity(o),
            Attribute::Screen(on) => p.set_screen(cx.scene, on),
            Attribute::Focus(on) => p.set_focus(on),
            Attribute::ProjectionType(kind) => {
                p.set_kind(cx, kind);
                if let (true, true, Some(b)) = (kind.is_orthographic(), p.bounds_auto(), scene_bounds) {
                    p.set_bounds(cx, b, true);
                }
            }
            Attribute::Time(_) | Attribute::Controls(_) | Attribute::FirstPerson(_) | Attribute::Src(_) => {}
        })
        .is_some()
    }

    // ---- keyframes ----

    pub fn keyframes(&self) -> &[Keyframe] {
        &self.keyframes
    }

    pub fn add_keyframe(&mut self, keyframe: Keyframe) {
        self.keyframes.push(keyframe);
        self.keyframes_dirty = true;
    }

    pub fn remove_keyframes(&mut self, target: ProjectionId, attribute: &str) {
        self.keyframes
            .retain(|k| !(k.target == target && k.attribute == attribute));
        self.keyframes_dirty = true;
    }

    /// Keyframed attributes are re-evaluated on the next frame.
    pub fn set_time(&mut self, time: f32) {
        self.time = time;
        self.keyframes_dirty = true;
    }

    // ---- camera operator ----

    /// Steps into (or, with `reverse`, moves to) projection `id`.
    pub fn attach_projection(&mut self, id: ProjectionId, reverse: bool) -> bool {
        let Some(camera) = self.projection(id).map(|p| p.camera().clone()) else {
            return false;
        };
        let previous = self.operator.attach_projection(id, &camera, reverse);
        self.unfocus(previous);
        let position = self.operator.first_person.position;
        let rotation = self.operator.first_person.rotation();
        self.edit(id, |p, cx| {
            p.set_focus(true);
            if reverse {
                p.set_pose(cx, position, rotation);
            }
        });
        log::info!("attached projection {}", id.raw());
        true
    }

    pub fn detach_projection(&mut self) -> Option<ProjectionId> {
        let detached = self.operator.detach_projection();
        self.unfocus(detached);
        detached
    }

    /// Digit key: attaches the projection at `index`, or detaches it if it
    /// is already attached.
    pub fn select(&mut self, index: usize) -> bool {
        let Some(id) = self.projections.get(index).map(|p| p.id()) else {
            return false;
        };
        if self.operator.attached() == Some(id) {
            self.detach_projection();
            true
        } else {
            self.attach_projection(id, false)
        }
    }

    pub fn toggle_mode(&mut self) {
        let detached = self.operator.toggle();
        self.unfocus(detached);
    }

    pub fn to_map(&mut self) {
        let detached = self.operator.to_map();
        self.unfocus(detached);
    }

    pub fn pointer_lost(&mut self) {
        let detached = self.operator.pointer_lost();
        self.unfocus(detached);
    }

    fn unfocus(&mut self, id: Option<ProjectionId>) {
        if let Some(p) = id.and_then(|id| self.projections.iter_mut().find(|p| p.id() == id)) {
            p.set_focus(false);
        }
    }

    // ---- records ----

    pub fn export_records(&self) -> Vec<ProjectionRecord> {
        self.projections
            .iter()
            .map(|p| {
                let mut record = ProjectionRecord::from_projection(p);
                let keyframes: Vec<KeyframeRecord> = self
                    .keyframes
                    .iter()
                    .filter(|k| k.target == p.id())
                    .map(KeyframeRecord::from_keyframe)
                    .collect();
                record.keyframes = (!keyframes.is_empty()).then_some(keyframes);
                record
            })
            .collect()
    }

    pub fn save_records(&self, path: &Path) -> Result<(), RecordError> {
        records::save_records(path, &self.export_records())
    }

    // ---- frame ----

    /// One frame: keyframes, finished loads, operator commands, scene
    /// bounds, then depth recapture for every projection that needs it.
    pub fn frame(&mut self, dt: f32) -> FrameReport {
        self.elapsed += dt.max(0.0);

        if self.keyframes_dirty {
            self.keyframes_dirty = false;
            for (target, attribute, value) in keyframe::evaluate(&self.keyframes, self.time) {
                self.apply_attribute(target, &attribute, &value);
            }
        }

        for done in self.loader.poll() {
            self.finish_load(done);
        }

        let mut pointer_capture = None;
        for command in self.operator.drain_commands() {
            match command {
                OperatorCommand::PointerCapture(on) => pointer_capture = Some(on),
                command => self.run_command(command),
            }
        }

        if self.bounds_dirty {
            self.refresh_scene_bounds();
        }

        let changed: Vec<(Vec3, Vec3)> = self
            .scene
            .modified()
            .filter(|s| s.kind() == SurfaceKind::Model)
            .filter_map(|s| s.world_aabb())
            .collect();
        let mut updated = Vec::new();
        let mut cx = UpdateContext {
            scene: &mut self.scene,
            capture: self.capture.as_mut(),
        };
        for p in &mut self.projections {
            let frustum = p.camera().frustum();
            let touched = changed.iter().any(|(min, max)| frustum.intersects_aabb(*min, *max));
            if p.is_dirty() || touched {
                p.update(&mut cx);
                if !p.is_dirty() {
                    updated.push(p.id());
                }
            }
            p.clear_moved();
        }
        self.scene.clear_modified();

        FrameReport {
            view: self.operator.active_view(),
            updated,
            pointer_capture,
        }
    }

    fn run_command(&mut self, command: OperatorCommand) {
        match command {
            OperatorCommand::PointerCapture(_) => {}
            OperatorCommand::Nudge { id, look, offset } => {
                let camera = self.edit(id, |p, cx| {
                    let mut eye = FirstPersonCamera::default();
                    eye.set_pose(p.camera().position(), p.camera().rotation());
                    eye.look(look.x, look.y);
                    eye.translate_local(offset);
                    p.set_pose(cx, eye.position, eye.rotation());
                    p.camera().clone()
                });
                if let Some(camera) = camera {
                    self.operator.sync_from(&camera);
                }
            }
            OperatorCommand::AdjustFov { id, delta } => {
                self.edit(id, |p, cx| {
                    let fov = p.camera().fov() + delta;
                    p.set_field_of_view(cx, fov);
                });
            }
            OperatorCommand::AdjustRoll { id, delta } => {
                let camera = self.edit(id, |p, cx| {
                    let mut rotation = p.camera().rotation();
                    rotation.z += delta;
                    p.set_rotation(cx, rotation);
                    p.camera().clone()
                });
                if let Some(camera) = camera {
                    self.operator.sync_from(&camera);
                }
            }
        }
    }

    fn finish_load(&mut self, done: LoadedTexture) {
        if let Some((id, settings)) = self.pending.remove(&done.ticket) {
            match done.texture {
                Ok(texture) => self.insert_projection(id, settings, Some(texture)),
                Err(e) => log::error!("projection {} not created: {}", id.raw(), e),
            }
            return;
        }
        if self.latest_load.get(&done.target) != Some(&done.ticket) {
            log::debug!("dropping stale texture {} for projection {}", done.url, done.target.raw());
            return;
        }
        self.latest_load.remove(&done.target);
        match done.texture {
            Ok(texture) => {
                let id = done.target;
                self.edit(id, |p, cx| p.set_texture(cx, texture));
            }
            Err(e) => log::error!("texture {} not applied: {}", done.url, e),
        }
    }

    fn refresh_scene_bounds(&mut self) {
        self.bounds_dirty = false;
        self.scene_bounds = self
            .scene
            .model_bounds()
            .map(|(min, max)| Bounds::from_scene_box(min, max));
        let Some(bounds) = self.scene_bounds else {
            return;
        };
        log::debug!("scene bounds now {:?}", <[f32; 4]>::from(bounds));
        let mut cx = UpdateContext {
            scene: &mut self.scene,
            capture: self.capture.as_mut(),
        };
        for p in &mut self.projections {
            if p.camera().kind().is_orthographic() && p.bounds_auto() {
                p.set_bounds(&mut cx, bounds, true);
            }
        }
    }

    fn allocate_id(&mut self) -> ProjectionId {
        let id = ProjectionId::from_raw(self.next_id);
        self.next_id += 1;
        id
    }

    /// Inserts after the last projection with a smaller id so records keep
    /// their load order however their loads complete. The list may already
    /// be reordered, so no sorted search.
    fn insert_projection(&mut self, id: ProjectionId, settings: ProjectionSettings, texture: Option<Arc<Texture>>) {
        let pos = self
            .projections
            .iter()
            .rposition(|p| p.id() < id)
            .map_or(0, |i| i + 1);
        let projection = Projection::new(id, pos, settings, texture, self.scene_bounds, &mut self.scene);
        self.projections.insert(pos, projection);
        self.reindex();
        if self.keyframes.iter().any(|k| k.target == id) {
            self.keyframes_dirty = true;
        }

        let order = self.order();
        let models: Vec<SurfaceId> = self.scene.models().map(|s| s.id()).collect();
        let p = &mut self.projections[pos];
        for surface in models {
            p.attach_to_surface(&mut self.scene, surface, &order);
        }
        log::info!(
            "projection {} added ({}, {} surfaces)",
            id.raw(),
            p.camera().kind().name(),
            p.bindings().count()
        );
    }

    fn reindex(&mut self) {
        for (i, p) in self.projections.iter_mut().enumerate() {
            p.set_index(i);
        }
        let order = self.order();
        self.scene.reorder_slots(&order);
    }
}
