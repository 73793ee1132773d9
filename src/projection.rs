// projection.rs — one projector: camera, depth map, screen plane and per-surface materials

use crate::camera::{Bounds, Euler, ProjectorCamera, ProjectorKind};
use crate::depth::{DepthCapture, DepthMap};
use crate::material::{ProjectedMaterial, Texture};
use crate::mesh::build_quad;
use crate::scene::{Scene, SurfaceId, SurfaceKind};
use glam::{Mat4, Quat, Vec2, Vec3};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Screen planes sit this fraction of the far distance out, just inside the far plane.
pub const SCREEN_DEPTH: f32 = 0.999;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProjectionId(u32);

impl ProjectionId {
    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u32 {
        self.0
    }
}

/// Mutable surroundings every camera-affecting mutator needs to re-run the
/// update cycle.
pub struct UpdateContext<'a> {
    pub scene: &'a mut Scene,
    pub capture: &'a mut dyn DepthCapture,
}

/// Initial state of a projection.
#[derive(Debug, Clone)]
pub struct ProjectionSettings {
    pub kind: ProjectorKind,
    pub position: Vec3,
    pub rotation: Euler,
    pub fov: f32,
    /// Width / height; taken from the texture when absent.
    pub aspect: Option<f32>,
    pub near: f32,
    pub far: f32,
    /// Orthographic/map extents; `None` means "use the scene bounds".
    pub bounds: Option<Bounds>,
    pub layers: Option<BTreeSet<String>>,
    pub screen: bool,
    pub focus: bool,
    pub opacity: f32,
    pub texture_sources: Vec<String>,
}

impl Default for ProjectionSettings {
    fn default() -> Self {
        Self {
            kind: ProjectorKind::Perspective,
            position: Vec3::new(0.0, 1.8, 0.0),
            rotation: Euler::default(),
            fov: 60.0,
            aspect: None,
            near: 1.0,
            far: 150.0,
            bounds: None,
            layers: None,
            screen: true,
            focus: false,
            opacity: 1.0,
            texture_sources: Vec::new(),
        }
    }
}

/// Wireframe gizmo of the projector's view volume.
#[derive(Debug, Clone)]
pub struct FrustumHelper {
    corners: [Vec3; 8],
    pub visible: bool,
    pub color: [f32; 3],
}

impl FrustumHelper {
    pub const EDGES: [(usize, usize); 12] = [
        (0, 1), (1, 2), (2, 3), (3, 0),
        (4, 5), (5, 6), (6, 7), (7, 4),
        (0, 4), (1, 5), (2, 6), (3, 7),
    ];

    fn new(camera: &ProjectorCamera) -> Self {
        Self {
            corners: camera.frustum_corners(),
            visible: false,
            color: [0.0, 1.0, 0.0],
        }
    }

    pub fn update(&mut self, camera: &ProjectorCamera) {
        self.corners = camera.frustum_corners();
    }

    pub fn corners(&self) -> &[Vec3; 8] {
        &self.corners
    }
}

/// Quad filling the projector's frustum at the far plane.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScreenPlane {
    surface: SurfaceId,
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec2,
}

impl ScreenPlane {
    pub fn surface(&self) -> SurfaceId {
        self.surface
    }

    pub fn transform(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale.extend(1.0), self.rotation, self.position)
    }

    /// Placement for `camera`: centred on the frustum axis, scaled to the
    /// view size at `far`, pulled just inside the far plane.
    pub fn placement(camera: &ProjectorCamera) -> (Vec3, Quat, Vec2) {
        let rotation = camera.orientation();
        let far = camera.far();
        let (origin, scale) = match camera.kind() {
            ProjectorKind::Map => (camera.world_position(), camera.view_size(far)),
            ProjectorKind::Orthographic => {
                let b = camera.bounds();
                let offset = Vec3::new((b.left + b.right) / 2.0, (b.top + b.bottom) / 2.0, 0.0);
                (camera.world_position() + rotation * offset, camera.view_size(far))
            }
            ProjectorKind::Perspective => (camera.world_position(), camera.view_size(far)),
        };
        let position = origin + rotation * Vec3::new(0.0, 0.0, -far * SCREEN_DEPTH);
        (position, rotation, scale)
    }
}

pub struct Projection {
    id: ProjectionId,
    index: usize,
    camera: ProjectorCamera,
    bounds_auto: bool,
    /// Aspect follows the texture when none was given.
    aspect_auto: bool,
    texture: Option<Arc<Texture>>,
    texture_source: Option<String>,
    texture_sources: Vec<String>,
    layer_names: Option<BTreeSet<String>>,
    opacity: f32,
    focus: bool,
    screen: bool,
    depth: Option<Arc<DepthMap>>,
    plane: ScreenPlane,
    helper: FrustumHelper,
    bindings: BTreeMap<SurfaceId, ProjectedMaterial>,
    ready: bool,
    dirty: bool,
    moved: bool,
}

impl Projection {
    /// Builds the camera and screen plane and binds the plane to itself.
    /// Model surfaces are attached separately so slot order can follow the
    /// global z-order.
    pub fn new(
        id: ProjectionId,
        index: usize,
        settings: ProjectionSettings,
        texture: Option<Arc<Texture>>,
        scene_bounds: Option<Bounds>,
        scene: &mut Scene,
    ) -> Self {
        let aspect = settings
            .aspect
            .or_else(|| texture.as_ref().map(|t| t.aspect()))
            .unwrap_or(16.0 / 9.0);
        let bounds_auto = settings.bounds.is_none();
        let bounds = settings.bounds.or(scene_bounds).unwrap_or_default();

        let mut camera = match settings.kind {
            ProjectorKind::Perspective => {
                ProjectorCamera::perspective(settings.fov, aspect, settings.near, settings.far)
            }
            ProjectorKind::Orthographic => ProjectorCamera::orthographic(bounds, 0.0, settings.far),
            ProjectorKind::Map => ProjectorCamera::map(bounds, settings.position.y, settings.far),
        };
        camera.set_position(settings.position);
        camera.set_rotation(settings.rotation);

        let surface = scene.add_surface(format!("screen:{}", id.0), build_quad(), SurfaceKind::Screen(id));
        if let Some(s) = scene.surface_mut(surface) {
            s.visible = settings.screen;
        }
        let (position, rotation, scale) = ScreenPlane::placement(&camera);
        let plane = ScreenPlane {
            surface,
            position,
            rotation,
            scale,
        };

        let mut helper = FrustumHelper::new(&camera);
        helper.visible = settings.focus;

        let mut projection = Self {
            id,
            index,
            camera,
            bounds_auto,
            aspect_auto: settings.aspect.is_none(),
            texture_source: texture
                .as_ref()
                .map(|t| t.source().to_string())
                .or_else(|| settings.texture_sources.first().cloned()),
            texture,
            texture_sources: settings.texture_sources,
            layer_names: settings.layers,
            opacity: settings.opacity.clamp(0.0, 1.0),
            focus: settings.focus,
            screen: settings.screen,
            depth: None,
            plane,
            helper,
            bindings: BTreeMap::new(),
            ready: false,
            dirty: true,
            moved: false,
        };
        projection.attach_to_surface(scene, surface, &[id]);
        projection.ready = true;
        projection
    }

    pub fn id(&self) -> ProjectionId {
        self.id
    }

    /// Z-order; decides slot order on every shared surface.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn set_index(&mut self, index: usize) {
        self.index = index;
    }

    pub fn camera(&self) -> &ProjectorCamera {
        &self.camera
    }

    pub fn bounds_auto(&self) -> bool {
        self.bounds_auto
    }

    pub fn aspect_auto(&self) -> bool {
        self.aspect_auto
    }

    pub fn texture(&self) -> Option<&Arc<Texture>> {
        self.texture.as_ref()
    }

    pub fn texture_source(&self) -> Option<&str> {
        self.texture_source.as_deref()
    }

    pub fn texture_sources(&self) -> &[String] {
        &self.texture_sources
    }

    pub fn layer_names(&self) -> Option<&BTreeSet<String>> {
        self.layer_names.as_ref()
    }

    pub fn opacity(&self) -> f32 {
        self.opacity
    }

    pub fn focus(&self) -> bool {
        self.focus
    }

    pub fn screen(&self) -> bool {
        self.screen
    }

    pub fn depth_map(&self) -> Option<&Arc<DepthMap>> {
        self.depth.as_ref()
    }

    pub fn screen_plane(&self) -> &ScreenPlane {
        &self.plane
    }

    pub fn helper(&self) -> &FrustumHelper {
        &self.helper
    }

    pub fn bindings(&self) -> impl Iterator<Item = &ProjectedMaterial> + '_ {
        self.bindings.values()
    }

    pub fn binding(&self, surface: SurfaceId) -> Option<&ProjectedMaterial> {
        self.bindings.get(&surface)
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Needs an update on the next frame: a cycle was skipped or requested.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Pose or lens changed since the stage last cleared the flag.
    pub fn moved(&self) -> bool {
        self.moved
    }

    pub fn clear_moved(&mut self) {
        self.moved = false;
    }

    pub fn layer_visible(&self, name: &str) -> bool {
        self.layer_names.as_ref().map_or(true, |names| names.contains(name))
    }

    /// Adds a material slot on `surface`. Other projections' screen planes
    /// and surfaces already bound are refused.
    pub fn attach_to_surface(&mut self, scene: &mut Scene, surface: SurfaceId, order: &[ProjectionId]) -> bool {
        if self.bindings.contains_key(&surface) {
            return false;
        }
        match scene.surface(surface).map(|s| s.kind()) {
            Some(SurfaceKind::Model) => {}
            Some(SurfaceKind::Screen(owner)) if owner == self.id => {}
            _ => return false,
        }
        if !scene.attach_slot(surface, self.id, order) {
            return false;
        }
        self.bindings.insert(
            surface,
            ProjectedMaterial::new(surface, self.texture.clone(), self.opacity),
        );
        self.project_surface(scene, surface);
        true
    }

    pub fn detach_from_surface(&mut self, scene: &mut Scene, surface: SurfaceId) -> bool {
        if self.bindings.remove(&surface).is_none() {
            return false;
        }
        scene.detach_slot(surface, self.id)
    }

    /// Full cycle: recapture depth, place the screen plane, re-project every
    /// bound surface, refresh the helper. Skipped (and left dirty) until both
    /// this projection and the capture backend are ready.
    pub fn update(&mut self, cx: &mut UpdateContext<'_>) {
        if !self.ready || !cx.capture.is_ready() {
            log::debug!("projection {} not ready, deferring update", self.id.0);
            self.dirty = true;
            return;
        }
        let Some(depth) = cx.capture.capture(cx.scene, &self.camera) else {
            self.dirty = true;
            return;
        };
        self.depth = Some(Arc::new(depth));
        self.place_screen(cx.scene);
        self.helper.update(&self.camera);
        self.project_all(cx.scene);
        self.dirty = false;
    }

    pub fn set_position(&mut self, cx: &mut UpdateContext<'_>, position: Vec3) {
        self.camera.set_position(position);
        self.camera_changed(cx);
    }

    pub fn set_rotation(&mut self, cx: &mut UpdateContext<'_>, rotation: Euler) {
        self.camera.set_rotation(rotation);
        self.camera_changed(cx);
    }

    /// Position and rotation in one update cycle.
    pub fn set_pose(&mut self, cx: &mut UpdateContext<'_>, position: Vec3, rotation: Euler) {
        self.camera.set_position(position);
        self.camera.set_rotation(rotation);
        self.camera_changed(cx);
    }

    /// Perspective only; ignored for orthographic and map projectors.
    pub fn set_field_of_view(&mut self, cx: &mut UpdateContext<'_>, degrees: f32) {
        if self.camera.kind() != ProjectorKind::Perspective {
            log::debug!("projection {}: fov ignored for {} projector", self.id.0, self.camera.kind().name());
            return;
        }
        self.camera.set_fov(degrees);
        self.camera_changed(cx);
    }

    pub fn set_far_plane(&mut self, cx: &mut UpdateContext<'_>, distance: f32) {
        if !self.camera.set_far(distance) {
            log::debug!("projection {}: far {} not beyond near", self.id.0, distance);
            return;
        }
        self.camera_changed(cx);
    }

    /// Orthographic/map only. `auto` bounds follow the scene bounds; pinned
    /// ones are kept when the scene changes.
    pub fn set_bounds(&mut self, cx: &mut UpdateContext<'_>, bounds: Bounds, auto: bool) {
        if !self.camera.kind().is_orthographic() {
            log::debug!("projection {}: bounds ignored for perspective projector", self.id.0);
            return;
        }
        if auto && !self.bounds_auto {
            return;
        }
        self.bounds_auto = auto;
        self.camera.set_bounds(bounds);
        self.camera_changed(cx);
    }

    /// Swaps the projector kind, keeping pose, lens and bounds.
    pub fn set_kind(&mut self, cx: &mut UpdateContext<'_>, kind: ProjectorKind) {
        if kind == self.camera.kind() {
            return;
        }
        let old = &self.camera;
        let mut camera = match kind {
            ProjectorKind::Perspective => ProjectorCamera::perspective(old.fov(), old.aspect(), 1.0, old.far()),
            ProjectorKind::Orthographic => ProjectorCamera::orthographic(old.bounds(), 0.0, old.far()),
            ProjectorKind::Map => ProjectorCamera::map(old.bounds(), old.position().y, old.far()),
        };
        camera.set_position(old.position());
        camera.set_rotation(old.rotation());
        self.camera = camera;
        self.camera_changed(cx);
    }

    /// Swaps the texture on every binding. Appearance-only unless the
    /// aspect follows the texture and the new one is shaped differently,
    /// in which case the lens changes and the full update runs.
    pub fn set_texture(&mut self, cx: &mut UpdateContext<'_>, texture: Arc<Texture>) {
        self.texture_source = Some(texture.source().to_string());
        for binding in self.bindings.values_mut() {
            binding.set_texture(Some(texture.clone()));
        }
        let aspect = texture.aspect();
        self.texture = Some(texture);
        if self.aspect_auto && self.camera.kind() == ProjectorKind::Perspective && aspect != self.camera.aspect() {
            self.camera.set_aspect(aspect);
            self.camera_changed(cx);
        } else {
            self.project_all(cx.scene);
        }
    }

    /// `None` shows every layer. Only binding visibility changes.
    pub fn set_visible_layers(&mut self, scene: &Scene, layers: Option<BTreeSet<String>>) {
        self.layer_names = layers;
        for (surface, binding) in self.bindings.iter_mut() {
            if let Some(s) = scene.surface(*surface) {
                if s.kind() == SurfaceKind::Model {
                    binding.set_visible(self.layer_names.as_ref().map_or(true, |n| n.contains(s.name())));
                }
            }
        }
    }

    pub fn set_opacity(&mut self, opacity: f32) {
        self.opacity = opacity.clamp(0.0, 1.0);
        for binding in self.bindings.values_mut() {
            binding.set_opacity(self.opacity);
        }
    }

    pub fn set_focus(&mut self, focus: bool) {
        self.focus = focus;
        self.helper.visible = focus;
    }

    pub fn set_screen(&mut self, scene: &mut Scene, screen: bool) {
        self.screen = screen;
        if let Some(s) = scene.surface_mut(self.plane.surface) {
            s.visible = screen;
        }
        if let Some(b) = self.bindings.get_mut(&self.plane.surface) {
            b.set_visible(screen);
        }
        self.place_screen(scene);
    }

    /// Releases every material slot and the screen plane. Consumes the
    /// projection; nothing else may be called on it.
    pub fn destroy(self, scene: &mut Scene) {
        for surface in self.bindings.keys() {
            scene.detach_slot(*surface, self.id);
        }
        scene.remove_surface(self.plane.surface);
        log::info!("projection {} destroyed", self.id.0);
    }

    fn camera_changed(&mut self, cx: &mut UpdateContext<'_>) {
        self.moved = true;
        self.update(cx);
    }

    fn place_screen(&mut self, scene: &mut Scene) {
        let (position, rotation, scale) = ScreenPlane::placement(&self.camera);
        self.plane.position = position;
        self.plane.rotation = rotation;
        self.plane.scale = scale;
        let transform = self.plane.transform();
        if let Some(s) = scene.surface_mut(self.plane.surface) {
            if s.transform() != transform {
                s.set_transform(transform);
            }
        }
    }

    fn project_all(&mut self, scene: &Scene) {
        let surfaces: Vec<SurfaceId> = self.bindings.keys().copied().collect();
        for surface in surfaces {
            self.project_surface(scene, surface);
        }
    }

    fn project_surface(&mut self, scene: &Scene, surface: SurfaceId) {
        let Some(target) = scene.surface(surface) else {
            return;
        };
        let visible = match target.kind() {
            SurfaceKind::Model => self.layer_visible(target.name()),
            SurfaceKind::Screen(_) => self.screen,
        };
        if let Some(binding) = self.bindings.get_mut(&surface) {
            binding.project(&self.camera, self.depth.clone(), visible);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::depth::RasterDepthCapture;
    use crate::mesh::build_box;
    use image::{Rgba, RgbaImage};

    fn perspective() -> ProjectionSettings {
        ProjectionSettings {
            position: Vec3::new(10.0, 1.8, -10.0),
            rotation: Euler::new(-0.0316, -1.0258, -0.0055),
            fov: 50.0,
            aspect: Some(0.75),
            ..Default::default()
        }
    }

    fn scene_with_block() -> (Scene, SurfaceId) {
        let mut scene = Scene::new();
        let id = scene.add_surface("buildings", build_box(Vec3::new(-40.0, 0.0, -40.0), Vec3::new(-20.0, 12.0, -20.0)), SurfaceKind::Model);
        (scene, id)
    }

    #[test]
    fn screen_plane_fills_the_frustum_at_far() {
        let (mut scene, _) = scene_with_block();
        let mut capture = RasterDepthCapture::new(32);
        let mut p = Projection::new(ProjectionId(0), 0, perspective(), None, None, &mut scene);
        let mut cx = UpdateContext { scene: &mut scene, capture: &mut capture };
        p.set_field_of_view(&mut cx, 70.0);
        p.set_far_plane(&mut cx, 90.0);

        let plane = p.screen_plane();
        let size = p.camera().view_size(p.camera().far());
        assert!(plane.scale.abs_diff_eq(size, 1e-4));
        let expected = p.camera().world_position() + p.camera().forward() * 90.0 * SCREEN_DEPTH;
        assert!(plane.position.abs_diff_eq(expected, 1e-3));
        assert_eq!(scene.surface(plane.surface()).unwrap().transform(), plane.transform());
    }

    #[test]
    fn map_screen_plane_uses_bounds_centre() {
        let mut scene = Scene::new();
        let settings = ProjectionSettings {
            kind: ProjectorKind::Map,
            position: Vec3::new(0.0, 300.0, 0.0),
            far: 400.0,
            bounds: Some(Bounds::from([20.0, -40.0, -10.0, 30.0])),
            ..Default::default()
        };
        let p = Projection::new(ProjectionId(1), 0, settings, None, None, &mut scene);
        let plane = p.screen_plane();
        assert!(plane.scale.abs_diff_eq(Vec2::new(-60.0, -40.0), 1e-4));
        assert!(plane.position.abs_diff_eq(Vec3::new(10.0, 300.0 - 400.0 * SCREEN_DEPTH, -10.0), 1e-3));
    }

    #[test]
    fn bounds_are_ignored_on_perspective_projectors() {
        let (mut scene, _) = scene_with_block();
        let mut capture = RasterDepthCapture::new(8);
        let mut p = Projection::new(ProjectionId(0), 0, perspective(), None, None, &mut scene);
        let before = p.camera().clone();
        let mut cx = UpdateContext { scene: &mut scene, capture: &mut capture };
        p.set_bounds(&mut cx, Bounds::from([1.0, 2.0, 3.0, 4.0]), false);
        assert_eq!(p.camera(), &before);
        assert!(!p.moved());
    }

    #[test]
    fn pinned_bounds_survive_automatic_updates() {
        let mut scene = Scene::new();
        let mut capture = RasterDepthCapture::new(8);
        let settings = ProjectionSettings {
            kind: ProjectorKind::Orthographic,
            ..Default::default()
        };
        let mut p = Projection::new(ProjectionId(0), 0, settings, None, None, &mut scene);
        assert!(p.bounds_auto());
        let pinned = Bounds::from([-5.0, 5.0, 5.0, -5.0]);
        let mut cx = UpdateContext { scene: &mut scene, capture: &mut capture };
        p.set_bounds(&mut cx, pinned, false);
        p.set_bounds(&mut cx, Bounds::from([-50.0, 50.0, 50.0, -50.0]), true);
        assert_eq!(p.camera().bounds(), pinned);
    }

    #[test]
    fn layer_filter_only_toggles_visibility() {
        let (mut scene, block) = scene_with_block();
        let ground = scene.add_surface("ground", crate::mesh::build_plane(200.0), SurfaceKind::Model);
        let mut p = Projection::new(ProjectionId(0), 0, perspective(), None, None, &mut scene);
        p.attach_to_surface(&mut scene, block, &[p.id()]);
        p.attach_to_surface(&mut scene, ground, &[p.id()]);
        let groups = scene.surface(block).unwrap().mesh().groups().len();

        p.set_visible_layers(&scene, Some(BTreeSet::from(["ground".to_string()])));
        assert!(!p.binding(block).unwrap().is_visible());
        assert!(p.binding(ground).unwrap().is_visible());
        assert_eq!(scene.surface(block).unwrap().mesh().groups().len(), groups);

        p.set_visible_layers(&scene, None);
        assert!(p.binding(block).unwrap().is_visible());
    }

    #[test]
    fn other_screens_cannot_be_targeted() {
        let mut scene = Scene::new();
        let mut a = Projection::new(ProjectionId(0), 0, perspective(), None, None, &mut scene);
        let b = Projection::new(ProjectionId(1), 1, perspective(), None, None, &mut scene);
        assert!(!a.attach_to_surface(&mut scene, b.screen_plane().surface(), &[a.id(), b.id()]));
    }

    #[test]
    fn destroy_releases_slots_and_plane() {
        let (mut scene, block) = scene_with_block();
        let mut p = Projection::new(ProjectionId(0), 0, perspective(), None, None, &mut scene);
        p.attach_to_surface(&mut scene, block, &[p.id()]);
        assert_eq!(scene.surface(block).unwrap().slots().len(), 2);
        p.destroy(&mut scene);
        assert_eq!(scene.surface(block).unwrap().slots().len(), 1);
        assert_eq!(scene.surfaces().len(), 1);
    }

    #[test]
    fn orthographic_screen_plane_covers_asymmetric_bounds() {
        let mut scene = Scene::new();
        let settings = ProjectionSettings {
            kind: ProjectorKind::Orthographic,
            position: Vec3::new(5.0, 10.0, 0.0),
            rotation: Euler::new(-0.3, 0.4, 0.0),
            far: 200.0,
            bounds: Some(Bounds::from([-10.0, 30.0, 20.0, -5.0])),
            ..Default::default()
        };
        let p = Projection::new(ProjectionId(0), 0, settings, None, None, &mut scene);
        let transform = p.screen_plane().transform();
        let view_proj = p.camera().view_projection();
        for (x, y) in [(-0.5, -0.5), (0.5, -0.5), (0.5, 0.5), (-0.5, 0.5)] {
            let ndc = view_proj.project_point3(transform.transform_point3(Vec3::new(x, y, 0.0)));
            assert!((ndc.x.abs() - 1.0).abs() < 1e-3, "{ndc:?}");
            assert!((ndc.y.abs() - 1.0).abs() < 1e-3, "{ndc:?}");
            assert!((0.0..=1.0).contains(&ndc.z));
        }
    }

    #[test]
    fn swapped_texture_reshapes_an_unset_aspect() {
        let (mut scene, block) = scene_with_block();
        let mut capture = RasterDepthCapture::new(8);
        let image = |w, h| Arc::new(Texture::from_image("t.png", RgbaImage::from_pixel(w, h, Rgba([9, 9, 9, 255]))));
        let settings = ProjectionSettings {
            aspect: None,
            ..perspective()
        };
        let mut free = Projection::new(ProjectionId(0), 0, settings, Some(image(4, 4)), None, &mut scene);
        let mut fixed = Projection::new(ProjectionId(1), 1, perspective(), None, None, &mut scene);
        assert_eq!(free.camera().aspect(), 1.0);
        free.attach_to_surface(&mut scene, block, &[free.id(), fixed.id()]);

        let mut cx = UpdateContext { scene: &mut scene, capture: &mut capture };
        free.set_texture(&mut cx, image(16, 4));
        assert_eq!(free.camera().aspect(), 4.0);
        assert!(free.moved());
        assert_eq!(free.binding(block).unwrap().view_proj(), free.camera().view_projection());
        assert!(free.depth_map().is_some());

        fixed.set_texture(&mut cx, image(16, 4));
        assert_eq!(fixed.camera().aspect(), 0.75);
        assert!(!fixed.moved());
    }
}
