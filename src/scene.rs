// scene.rs — shared scene: target surfaces and their material-slot arrays

use crate::mesh::Mesh;
use crate::projection::ProjectionId;
use glam::{Mat4, Vec3};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceId(u32);

impl SurfaceId {
    pub fn raw(self) -> u32 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceKind {
    /// Base-scene geometry: receives projections and occludes them.
    Model,
    /// A projection's own screen plane. Never written to depth maps.
    Screen(ProjectionId),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BaseMaterial {
    pub color: [f32; 4],
}

pub const MODEL_COLOR: [f32; 4] = [0.933, 0.933, 0.933, 1.0];
pub const SCREEN_COLOR: [f32; 4] = [1.0, 1.0, 1.0, 0.9];

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MaterialSlot {
    Base(BaseMaterial),
    Projected(ProjectionId),
}

#[derive(Debug, Clone)]
pub struct TargetSurface {
    id: SurfaceId,
    name: String,
    kind: SurfaceKind,
    mesh: Mesh,
    transform: Mat4,
    pub visible: bool,
    slots: Vec<MaterialSlot>,
    modified: bool,
    revision: u64,
}

impl TargetSurface {
    pub fn id(&self) -> SurfaceId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> SurfaceKind {
        self.kind
    }

    pub fn mesh(&self) -> &Mesh {
        &self.mesh
    }

    pub fn transform(&self) -> Mat4 {
        self.transform
    }

    pub fn slots(&self) -> &[MaterialSlot] {
        &self.slots
    }

    /// Bumped on every geometry or transform change.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub fn base_material(&self) -> BaseMaterial {
        match self.slots.first() {
            Some(MaterialSlot::Base(m)) => *m,
            _ => BaseMaterial { color: MODEL_COLOR },
        }
    }

    pub fn slot_of(&self, projection: ProjectionId) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| *s == MaterialSlot::Projected(projection))
    }

    pub fn projections(&self) -> impl Iterator<Item = ProjectionId> + '_ {
        self.slots.iter().filter_map(|s| match s {
            MaterialSlot::Projected(id) => Some(*id),
            MaterialSlot::Base(_) => None,
        })
    }

    pub fn set_transform(&mut self, transform: Mat4) {
        self.transform = transform;
        self.touch();
    }

    /// Swaps geometry, keeping the slot array and regrouping the new mesh.
    pub fn set_mesh(&mut self, mesh: Mesh) {
        self.mesh = mesh;
        self.regroup();
        self.touch();
    }

    pub fn world_positions(&self) -> impl Iterator<Item = Vec3> + '_ {
        self.mesh
            .positions
            .iter()
            .map(|p| self.transform.transform_point3(Vec3::from(*p)))
    }

    pub fn world_triangles(&self) -> impl Iterator<Item = [Vec3; 3]> + '_ {
        self.mesh
            .triangles()
            .map(|tri| tri.map(|p| self.transform.transform_point3(p)))
    }

    pub fn world_aabb(&self) -> Option<(Vec3, Vec3)> {
        let mut it = self.world_positions();
        let first = it.next()?;
        Some(it.fold((first, first), |(min, max), p| (min.min(p), max.max(p))))
    }

    fn touch(&mut self) {
        self.modified = true;
        self.revision += 1;
    }

    fn regroup(&mut self) {
        self.mesh.clear_groups();
        for i in 0..self.slots.len() {
            self.mesh.add_full_group(i);
        }
    }
}

#[derive(Debug, Default)]
pub struct Scene {
    surfaces: Vec<TargetSurface>,
    next_id: u32,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a surface whose slot 0 is the plain base material.
    pub fn add_surface(&mut self, name: impl Into<String>, mesh: Mesh, kind: SurfaceKind) -> SurfaceId {
        let id = SurfaceId(self.next_id);
        self.next_id += 1;

        let color = match kind {
            SurfaceKind::Model => MODEL_COLOR,
            SurfaceKind::Screen(_) => SCREEN_COLOR,
        };
        let mut surface = TargetSurface {
            id,
            name: name.into(),
            kind,
            mesh,
            transform: Mat4::IDENTITY,
            visible: true,
            slots: vec![MaterialSlot::Base(BaseMaterial { color })],
            modified: true,
            revision: 0,
        };
        surface.regroup();
        self.surfaces.push(surface);
        id
    }

    pub fn remove_surface(&mut self, id: SurfaceId) -> Option<TargetSurface> {
        let pos = self.surfaces.iter().position(|s| s.id == id)?;
        Some(self.surfaces.remove(pos))
    }

    pub fn surface(&self, id: SurfaceId) -> Option<&TargetSurface> {
        self.surfaces.iter().find(|s| s.id == id)
    }

    pub fn surface_mut(&mut self, id: SurfaceId) -> Option<&mut TargetSurface> {
        self.surfaces.iter_mut().find(|s| s.id == id)
    }

    pub fn surface_by_name(&self, name: &str) -> Option<&TargetSurface> {
        self.surfaces.iter().find(|s| s.name == name)
    }

    pub fn surfaces(&self) -> &[TargetSurface] {
        &self.surfaces
    }

    pub fn models(&self) -> impl Iterator<Item = &TargetSurface> + '_ {
        self.surfaces
            .iter()
            .filter(|s| s.kind == SurfaceKind::Model)
    }

    /// Geometry written into depth maps: visible models only. Screen planes
    /// and frustum helpers never occlude.
    pub fn occluders(&self) -> impl Iterator<Item = &TargetSurface> + '_ {
        self.models().filter(|s| s.visible)
    }

    pub fn model_bounds(&self) -> Option<(Vec3, Vec3)> {
        self.models()
            .filter_map(|s| s.world_aabb())
            .reduce(|(amin, amax), (bmin, bmax)| (amin.min(bmin), amax.max(bmax)))
    }

    /// Adds a projected slot to `surface`, positioned by the projection's
    /// rank in `order`. Returns false if the surface is unknown or the
    /// projection already occupies a slot there.
    pub fn attach_slot(&mut self, surface: SurfaceId, projection: ProjectionId, order: &[ProjectionId]) -> bool {
        let Some(s) = self.surface_mut(surface) else {
            return false;
        };
        if s.slot_of(projection).is_some() {
            return false;
        }
        s.slots.push(MaterialSlot::Projected(projection));
        sort_projected(&mut s.slots, order);
        s.regroup();
        true
    }

    pub fn detach_slot(&mut self, surface: SurfaceId, projection: ProjectionId) -> bool {
        let Some(s) = self.surface_mut(surface) else {
            return false;
        };
        let Some(index) = s.slot_of(projection) else {
            return false;
        };
        s.slots.remove(index);
        s.mesh.remove_group(index)
    }

    /// Re-sorts every surface's projected slots after a z-order change.
    pub fn reorder_slots(&mut self, order: &[ProjectionId]) {
        for s in &mut self.surfaces {
            sort_projected(&mut s.slots, order);
            s.regroup();
        }
    }

    pub fn modified(&self) -> impl Iterator<Item = &TargetSurface> + '_ {
        self.surfaces.iter().filter(|s| s.modified)
    }

    pub fn clear_modified(&mut self) {
        for s in &mut self.surfaces {
            s.modified = false;
        }
    }
}

fn sort_projected(slots: &mut [MaterialSlot], order: &[ProjectionId]) {
    let rank = |slot: &MaterialSlot| match slot {
        MaterialSlot::Projected(id) => order.iter().position(|o| o == id).unwrap_or(usize::MAX),
        MaterialSlot::Base(_) => 0,
    };
    if slots.len() > 1 {
        slots[1..].sort_by_key(rank);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::build_box;

    fn pid(n: u32) -> ProjectionId {
        ProjectionId::from_raw(n)
    }

    fn assert_contiguous(surface: &TargetSurface) {
        assert_eq!(surface.mesh().groups().len(), surface.slots().len());
        for (i, g) in surface.mesh().groups().iter().enumerate() {
            assert_eq!(g.material_index, i);
        }
    }

    #[test]
    fn slots_follow_global_order() {
        let mut scene = Scene::new();
        let id = scene.add_surface("buildings", build_box(Vec3::ZERO, Vec3::ONE), SurfaceKind::Model);
        let order = [pid(3), pid(1), pid(2)];

        assert!(scene.attach_slot(id, pid(2), &order));
        assert!(scene.attach_slot(id, pid(3), &order));
        assert!(scene.attach_slot(id, pid(1), &order));
        assert!(!scene.attach_slot(id, pid(1), &order));

        let s = scene.surface(id).unwrap();
        assert_eq!(s.projections().collect::<Vec<_>>(), order.to_vec());
        assert_contiguous(s);
    }

    #[test]
    fn detach_shifts_later_slots_down() {
        let mut scene = Scene::new();
        let id = scene.add_surface("ground", build_box(Vec3::ZERO, Vec3::ONE), SurfaceKind::Model);
        let order = [pid(0), pid(1), pid(2)];
        for p in order {
            scene.attach_slot(id, p, &order);
        }

        assert!(scene.detach_slot(id, pid(1)));
        assert!(!scene.detach_slot(id, pid(1)));
        let s = scene.surface(id).unwrap();
        assert_eq!(s.slot_of(pid(2)), Some(2));
        assert_contiguous(s);
    }

    #[test]
    fn screens_do_not_occlude() {
        let mut scene = Scene::new();
        scene.add_surface("a", build_box(Vec3::ZERO, Vec3::ONE), SurfaceKind::Model);
        let hidden = scene.add_surface("b", build_box(Vec3::ZERO, Vec3::ONE), SurfaceKind::Model);
        scene.add_surface("screen", build_box(Vec3::ZERO, Vec3::ONE), SurfaceKind::Screen(pid(0)));
        scene.surface_mut(hidden).unwrap().visible = false;

        let names: Vec<&str> = scene.occluders().map(|s| s.name()).collect();
        assert_eq!(names, vec!["a"]);
    }

    #[test]
    fn model_bounds_cover_all_models() {
        let mut scene = Scene::new();
        scene.add_surface("a", build_box(Vec3::ZERO, Vec3::ONE), SurfaceKind::Model);
        let b = scene.add_surface("b", build_box(Vec3::ZERO, Vec3::ONE), SurfaceKind::Model);
        scene
            .surface_mut(b)
            .unwrap()
            .set_transform(Mat4::from_translation(Vec3::new(5.0, 0.0, -3.0)));

        let (min, max) = scene.model_bounds().unwrap();
        assert_eq!(min, Vec3::new(0.0, 0.0, -3.0));
        assert_eq!(max, Vec3::new(6.0, 1.0, 1.0));
    }
}
