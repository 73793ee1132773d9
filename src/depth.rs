// depth.rs — depth-capture pass from a projector's point of view

use crate::camera::ProjectorCamera;
use crate::scene::Scene;
use glam::{Vec2, Vec3, Vec4};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Default edge length of a depth map, in texels.
pub const DEFAULT_RESOLUTION: u32 = 512;

/// Opaque GPU resource holding a captured depth target. The renderer that
/// produced it downcasts it back to its own texture view.
pub type DeviceDepth = Arc<dyn Any + Send + Sync>;

#[derive(Clone)]
enum Texels {
    Host(Vec<f32>),
    Device(DeviceDepth),
}

/// Depth buffer in `[0, 1]` clip depth, row 0 at the top of the image.
/// Host maps are cleared to 1.0 (far plane) and can be sampled on the CPU.
/// Device maps live on the GPU only and sample as `None`.
#[derive(Clone)]
pub struct DepthMap {
    width: u32,
    height: u32,
    texels: Texels,
}

impl DepthMap {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            texels: Texels::Host(vec![1.0; (width * height) as usize]),
        }
    }

    pub fn from_device(width: u32, height: u32, depth: DeviceDepth) -> Self {
        Self {
            width,
            height,
            texels: Texels::Device(depth),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Host texels, empty for a device map.
    pub fn data(&self) -> &[f32] {
        match &self.texels {
            Texels::Host(data) => data.as_slice(),
            Texels::Device(_) => &[],
        }
    }

    pub fn device(&self) -> Option<&DeviceDepth> {
        match &self.texels {
            Texels::Host(_) => None,
            Texels::Device(depth) => Some(depth),
        }
    }

    pub fn texel(&self, x: u32, y: u32) -> Option<f32> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.data().get((y * self.width + x) as usize).copied()
    }

    /// Nearest-texel lookup; `None` outside the unit square or for a
    /// device map.
    pub fn sample(&self, uv: Vec2) -> Option<f32> {
        if !(0.0..=1.0).contains(&uv.x) || !(0.0..=1.0).contains(&uv.y) || self.width == 0 || self.height == 0 {
            return None;
        }
        let x = ((uv.x * self.width as f32) as u32).min(self.width - 1);
        let y = ((uv.y * self.height as f32) as u32).min(self.height - 1);
        self.texel(x, y)
    }

    fn write_min(&mut self, x: u32, y: u32, z: f32) {
        let i = (y * self.width + x) as usize;
        if let Texels::Host(data) = &mut self.texels {
            if z < data[i] {
                data[i] = z;
            }
        }
    }
}

impl PartialEq for DepthMap {
    fn eq(&self, other: &Self) -> bool {
        let same = match (&self.texels, &other.texels) {
            (Texels::Host(a), Texels::Host(b)) => a == b,
            (Texels::Device(a), Texels::Device(b)) => Arc::ptr_eq(a, b),
            _ => false,
        };
        same && self.width == other.width && self.height == other.height
    }
}

impl fmt::Debug for DepthMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.texels {
            Texels::Host(_) => "host",
            Texels::Device(_) => "device",
        };
        f.debug_struct("DepthMap")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("texels", &kind)
            .finish()
    }
}

/// Renders scene depth as seen by a projector camera.
pub trait DepthCapture {
    /// False until the backend's target exists; update cycles are skipped
    /// while not ready.
    fn is_ready(&self) -> bool {
        true
    }

    /// Depth of every occluder in `scene` as seen from `camera`. Screen
    /// planes and helpers are never drawn. `None` when not ready.
    fn capture(&mut self, scene: &Scene, camera: &ProjectorCamera) -> Option<DepthMap>;
}

/// CPU rasteriser. Deterministic: the same scene and camera always produce
/// the same buffer.
#[derive(Debug, Clone)]
pub struct RasterDepthCapture {
    resolution: u32,
}

impl Default for RasterDepthCapture {
    fn default() -> Self {
        Self::new(DEFAULT_RESOLUTION)
    }
}

impl RasterDepthCapture {
    pub fn new(resolution: u32) -> Self {
        Self {
            resolution: resolution.max(1),
        }
    }

    pub fn resolution(&self) -> u32 {
        self.resolution
    }
}

impl DepthCapture for RasterDepthCapture {
    fn capture(&mut self, scene: &Scene, camera: &ProjectorCamera) -> Option<DepthMap> {
        let mut map = DepthMap::new(self.resolution, self.resolution);
        let view_proj = camera.view_projection();
        for surface in scene.occluders() {
            for tri in surface.world_triangles() {
                let clip = tri.map(|p| view_proj * p.extend(1.0));
                rasterize(&mut map, clip);
            }
        }
        log::debug!(
            "captured {}x{} depth from {:?}",
            map.width,
            map.height,
            camera.world_position()
        );
        Some(map)
    }
}

fn rasterize(map: &mut DepthMap, clip: [Vec4; 3]) {
    let poly = clip_near(&clip);
    if poly.len() < 3 {
        return;
    }

    let (w, h) = (map.width as f32, map.height as f32);
    let screen: Vec<Vec3> = poly
        .iter()
        .map(|c| {
            let ndc = c.truncate() / c.w;
            Vec3::new((ndc.x * 0.5 + 0.5) * w, (0.5 - ndc.y * 0.5) * h, ndc.z)
        })
        .collect();

    for i in 1..screen.len() - 1 {
        raster_triangle(map, screen[0], screen[i], screen[i + 1]);
    }
}

/// Sutherland–Hodgman against the near plane (`z >= 0` in clip space).
fn clip_near(tri: &[Vec4; 3]) -> Vec<Vec4> {
    let mut out = Vec::with_capacity(4);
    for i in 0..3 {
        let a = tri[i];
        let b = tri[(i + 1) % 3];
        let (a_in, b_in) = (a.z >= 0.0, b.z >= 0.0);
        if a_in {
            out.push(a);
        }
        if a_in != b_in {
            let t = a.z / (a.z - b.z);
            out.push(a + (b - a) * t);
        }
    }
    out
}

fn edge(a: Vec3, b: Vec3, p: Vec2) -> f32 {
    (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x)
}

fn raster_triangle(map: &mut DepthMap, a: Vec3, b: Vec3, c: Vec3) {
    let area = edge(a, b, c.truncate());
    if area.abs() < 1e-8 {
        return;
    }

    let min = a.min(b).min(c);
    let max = a.max(b).max(c);
    if max.x < 0.0 || max.y < 0.0 || min.x >= map.width as f32 || min.y >= map.height as f32 {
        return;
    }
    let x0 = min.x.max(0.0).floor() as u32;
    let y0 = min.y.max(0.0).floor() as u32;
    let x1 = (max.x.ceil() as u32).min(map.width - 1);
    let y1 = (max.y.ceil() as u32).min(map.height - 1);

    for y in y0..=y1 {
        for x in x0..=x1 {
            let p = Vec2::new(x as f32 + 0.5, y as f32 + 0.5);
            let w0 = edge(b, c, p) / area;
            let w1 = edge(c, a, p) / area;
            let w2 = edge(a, b, p) / area;
            if w0 < 0.0 || w1 < 0.0 || w2 < 0.0 {
                continue;
            }
            let z = a.z * w0 + b.z * w1 + c.z * w2;
            if (0.0..=1.0).contains(&z) {
                map.write_min(x, y, z);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::Euler;
    use crate::mesh::{build_box, build_quad};
    use crate::projection::ProjectionId;
    use crate::scene::SurfaceKind;
    use glam::Mat4;

    fn wall_scene() -> Scene {
        let mut scene = Scene::new();
        // 10 x 10 wall facing the camera, 20 m down -Z
        let id = scene.add_surface("wall", build_quad(), SurfaceKind::Model);
        scene.surface_mut(id).unwrap().set_transform(
            Mat4::from_translation(Vec3::new(0.0, 0.0, -20.0)) * Mat4::from_scale(Vec3::new(10.0, 10.0, 1.0)),
        );
        scene
    }

    fn camera() -> ProjectorCamera {
        ProjectorCamera::perspective(60.0, 1.0, 1.0, 100.0)
    }

    #[test]
    fn wall_depth_lands_in_the_centre() {
        let scene = wall_scene();
        let cam = camera();
        let map = RasterDepthCapture::new(64).capture(&scene, &cam).unwrap();

        let centre = map.sample(Vec2::splat(0.5)).unwrap();
        assert!((cam.linear_depth(centre) - 20.0).abs() < 0.1);
        assert_eq!(map.texel(0, 0), Some(1.0));
    }

    #[test]
    fn capture_is_bit_identical_when_repeated() {
        let scene = wall_scene();
        let mut cam = camera();
        cam.set_rotation(Euler::new(0.1, 0.2, 0.0));
        let mut capture = RasterDepthCapture::new(48);
        let first = capture.capture(&scene, &cam).unwrap();
        let second = capture.capture(&scene, &cam).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn screen_planes_are_not_captured() {
        let mut scene = Scene::new();
        let id = scene.add_surface(
            "screen",
            build_quad(),
            SurfaceKind::Screen(ProjectionId::from_raw(0)),
        );
        scene
            .surface_mut(id)
            .unwrap()
            .set_transform(Mat4::from_translation(Vec3::new(0.0, 0.0, -5.0)) * Mat4::from_scale(Vec3::splat(50.0)));
        let map = RasterDepthCapture::new(16).capture(&scene, &camera()).unwrap();
        assert!(map.data().iter().all(|&d| d == 1.0));
    }

    #[test]
    fn geometry_crossing_the_near_plane_is_clipped() {
        let mut scene = Scene::new();
        // box enclosing the camera: every face straddles or surrounds it
        scene.add_surface("room", build_box(Vec3::splat(-30.0), Vec3::splat(30.0)), SurfaceKind::Model);
        let cam = camera();
        let map = RasterDepthCapture::new(32).capture(&scene, &cam).unwrap();
        let centre = map.sample(Vec2::splat(0.5)).unwrap();
        assert!((cam.linear_depth(centre) - 30.0).abs() < 0.5);
        assert!(map.data().iter().all(|d| d.is_finite() && *d <= 1.0));
    }

    #[test]
    fn sample_outside_unit_square_is_none() {
        let map = DepthMap::new(4, 4);
        assert_eq!(map.sample(Vec2::new(1.2, 0.5)), None);
        assert_eq!(map.sample(Vec2::new(1.0, 1.0)), Some(1.0));
    }

    #[test]
    fn device_maps_never_occlude_on_the_cpu() {
        let handle: DeviceDepth = Arc::new(7_u32);
        let map = DepthMap::from_device(8, 8, handle.clone());
        assert!(map.data().is_empty());
        assert_eq!(map.sample(Vec2::splat(0.5)), None);
        assert_eq!(map.device().and_then(|d| d.downcast_ref::<u32>()), Some(&7));
        assert_eq!(map, DepthMap::from_device(8, 8, handle));
        assert_ne!(map, DepthMap::new(8, 8));
    }
}
