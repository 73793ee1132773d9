// camera.rs — projector cameras, Euler orientation and frustum math

use glam::{EulerRot, Mat4, Quat, Vec2, Vec3, Vec4};
use serde::{Deserialize, Serialize};

/// Axis order of an Euler rotation. Intrinsic, matching the record format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EulerOrder {
    XYZ,
    XZY,
    #[default]
    YXZ,
    YZX,
    ZXY,
    ZYX,
}

impl EulerOrder {
    fn rot(self) -> EulerRot {
        match self {
            EulerOrder::XYZ => EulerRot::XYZ,
            EulerOrder::XZY => EulerRot::XZY,
            EulerOrder::YXZ => EulerRot::YXZ,
            EulerOrder::YZX => EulerRot::YZX,
            EulerOrder::ZXY => EulerRot::ZXY,
            EulerOrder::ZYX => EulerRot::ZYX,
        }
    }
}

/// Rotation angles in radians about the world axes, applied in `order`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Euler {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub order: EulerOrder,
}

impl Default for Euler {
    fn default() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }
}

impl Euler {
    /// YXZ-ordered rotation, the order every projector camera is kept in.
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self::with_order(x, y, z, EulerOrder::YXZ)
    }

    pub fn with_order(x: f32, y: f32, z: f32, order: EulerOrder) -> Self {
        Self { x, y, z, order }
    }

    pub fn from_degrees(x: f32, y: f32, z: f32) -> Self {
        Self::new(x.to_radians(), y.to_radians(), z.to_radians())
    }

    pub fn to_quat(&self) -> Quat {
        let (a, b, c) = match self.order {
            EulerOrder::XYZ => (self.x, self.y, self.z),
            EulerOrder::XZY => (self.x, self.z, self.y),
            EulerOrder::YXZ => (self.y, self.x, self.z),
            EulerOrder::YZX => (self.y, self.z, self.x),
            EulerOrder::ZXY => (self.z, self.x, self.y),
            EulerOrder::ZYX => (self.z, self.y, self.x),
        };
        Quat::from_euler(self.order.rot(), a, b, c)
    }

    pub fn from_quat(q: Quat, order: EulerOrder) -> Self {
        let (a, b, c) = q.normalize().to_euler(order.rot());
        let (x, y, z) = match order {
            EulerOrder::XYZ => (a, b, c),
            EulerOrder::XZY => (a, c, b),
            EulerOrder::YXZ => (b, a, c),
            EulerOrder::YZX => (c, a, b),
            EulerOrder::ZXY => (b, c, a),
            EulerOrder::ZYX => (c, b, a),
        };
        Self::with_order(x, y, z, order)
    }

    /// Same orientation expressed in another axis order.
    pub fn reorder(&self, order: EulerOrder) -> Self {
        if self.order == order {
            return *self;
        }
        Self::from_quat(self.to_quat(), order)
    }

    pub fn to_array(&self) -> [f32; 3] {
        [self.x, self.y, self.z]
    }
}

/// Orthographic extents. For `Map` projectors these are world coordinates:
/// left/right run along Z, top/bottom along X.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f32; 4]", into = "[f32; 4]")]
pub struct Bounds {
    pub left: f32,
    pub right: f32,
    pub top: f32,
    pub bottom: f32,
}

impl Default for Bounds {
    fn default() -> Self {
        Self::from([100.0, -100.0, -100.0, 100.0])
    }
}

impl From<[f32; 4]> for Bounds {
    fn from([left, right, top, bottom]: [f32; 4]) -> Self {
        Self {
            left,
            right,
            top,
            bottom,
        }
    }
}

impl From<Bounds> for [f32; 4] {
    fn from(b: Bounds) -> Self {
        [b.left, b.right, b.top, b.bottom]
    }
}

impl Bounds {
    /// Scene bounds in map orientation: `[max.z, min.z, min.x, max.x]`.
    pub fn from_scene_box(min: Vec3, max: Vec3) -> Self {
        Self::from([max.z, min.z, min.x, max.x])
    }

    pub fn width(&self) -> f32 {
        self.right - self.left
    }

    pub fn height(&self) -> f32 {
        self.top - self.bottom
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProjectorKind {
    #[default]
    Perspective,
    Orthographic,
    /// Fixed top-down orthographic projector covering `bounds`.
    Map,
}

impl ProjectorKind {
    /// Unknown names fall back to perspective.
    pub fn parse(value: &str) -> Self {
        match value.trim() {
            "orthographic" => ProjectorKind::Orthographic,
            "map" => ProjectorKind::Map,
            _ => ProjectorKind::Perspective,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ProjectorKind::Perspective => "perspective",
            ProjectorKind::Orthographic => "orthographic",
            ProjectorKind::Map => "map",
        }
    }

    pub fn is_orthographic(self) -> bool {
        !matches!(self, ProjectorKind::Perspective)
    }
}

/// Looking along -Y with +X up the image and +Z to its right.
fn map_rotation() -> Euler {
    Euler::new(-std::f32::consts::FRAC_PI_2, -std::f32::consts::FRAC_PI_2, 0.0)
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectorCamera {
    kind: ProjectorKind,
    position: Vec3,
    rotation: Euler,
    fov: f32,
    aspect: f32,
    near: f32,
    far: f32,
    bounds: Bounds,
}

impl ProjectorCamera {
    pub fn perspective(fov: f32, aspect: f32, near: f32, far: f32) -> Self {
        Self {
            kind: ProjectorKind::Perspective,
            position: Vec3::ZERO,
            rotation: Euler::default(),
            fov,
            aspect,
            near,
            far: far.max(near + f32::EPSILON),
            bounds: Bounds::default(),
        }
    }

    pub fn orthographic(bounds: Bounds, near: f32, far: f32) -> Self {
        Self {
            kind: ProjectorKind::Orthographic,
            bounds,
            ..Self::perspective(60.0, 1.0, near, far)
        }
    }

    pub fn map(bounds: Bounds, height: f32, far: f32) -> Self {
        let mut camera = Self {
            kind: ProjectorKind::Map,
            bounds,
            ..Self::perspective(60.0, 1.0, 0.0, far)
        };
        camera.position.y = height;
        camera
    }

    pub fn kind(&self) -> ProjectorKind {
        self.kind
    }

    pub fn fov(&self) -> f32 {
        self.fov
    }

    pub fn aspect(&self) -> f32 {
        self.aspect
    }

    pub fn near(&self) -> f32 {
        self.near
    }

    pub fn far(&self) -> f32 {
        self.far
    }

    pub fn bounds(&self) -> Bounds {
        self.bounds
    }

    /// Position as set. Map projectors only honour the height component.
    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn rotation(&self) -> Euler {
        match self.kind {
            ProjectorKind::Map => map_rotation(),
            _ => self.rotation,
        }
    }

    pub fn set_position(&mut self, position: Vec3) {
        self.position = position;
    }

    pub fn set_rotation(&mut self, rotation: Euler) {
        self.rotation = rotation.reorder(EulerOrder::YXZ);
    }

    pub fn set_fov(&mut self, fov: f32) {
        self.fov = fov.clamp(0.1, 179.9);
    }

    pub fn set_aspect(&mut self, aspect: f32) {
        if aspect.is_finite() && aspect > 0.0 {
            self.aspect = aspect;
        }
    }

    /// Keeps `near < far`; a far plane at or before near is ignored.
    pub fn set_far(&mut self, far: f32) -> bool {
        if !(far > self.near) {
            return false;
        }
        self.far = far;
        true
    }

    pub fn set_bounds(&mut self, bounds: Bounds) {
        self.bounds = bounds;
    }

    pub fn world_position(&self) -> Vec3 {
        match self.kind {
            ProjectorKind::Map => Vec3::new(
                (self.bounds.top + self.bounds.bottom) / 2.0,
                self.position.y,
                (self.bounds.right + self.bounds.left) / 2.0,
            ),
            _ => self.position,
        }
    }

    pub fn orientation(&self) -> Quat {
        self.rotation().to_quat()
    }

    pub fn forward(&self) -> Vec3 {
        self.orientation() * Vec3::NEG_Z
    }

    pub fn world_from_camera(&self) -> Mat4 {
        Mat4::from_rotation_translation(self.orientation(), self.world_position())
    }

    pub fn view(&self) -> Mat4 {
        self.world_from_camera().inverse()
    }

    pub fn projection(&self) -> Mat4 {
        let b = self.bounds;
        match self.kind {
            ProjectorKind::Perspective => {
                Mat4::perspective_rh(self.fov.to_radians(), self.aspect, self.near, self.far)
            }
            ProjectorKind::Orthographic => {
                Mat4::orthographic_rh(b.left, b.right, b.bottom, b.top, self.near, self.far)
            }
            ProjectorKind::Map => {
                let (hw, hh) = (b.width() / 2.0, b.height() / 2.0);
                Mat4::orthographic_rh(-hw, hw, -hh, hh, self.near, self.far)
            }
        }
    }

    pub fn view_projection(&self) -> Mat4 {
        self.projection() * self.view()
    }

    /// Width and height of the visible area at `distance` along the view axis.
    pub fn view_size(&self, distance: f32) -> Vec2 {
        match self.kind {
            ProjectorKind::Perspective => {
                let height = 2.0 * (self.fov.to_radians() / 2.0).tan() * distance;
                Vec2::new(height * self.aspect, height)
            }
            ProjectorKind::Orthographic | ProjectorKind::Map => {
                Vec2::new(self.bounds.width(), self.bounds.height())
            }
        }
    }

    /// Distance along the view axis for a depth value in [0, 1].
    pub fn linear_depth(&self, ndc_z: f32) -> f32 {
        linear_depth(self.kind.is_orthographic(), self.near, self.far, ndc_z)
    }

    pub fn frustum(&self) -> Frustum {
        Frustum::from_matrix(self.view_projection())
    }

    /// Near-plane corners followed by far-plane corners.
    pub fn frustum_corners(&self) -> [Vec3; 8] {
        let inv = self.view_projection().inverse();
        let mut corners = [Vec3::ZERO; 8];
        for (i, corner) in corners.iter_mut().enumerate() {
            let z = if i < 4 { 0.0 } else { 1.0 };
            let (x, y) = match i % 4 {
                0 => (-1.0, -1.0),
                1 => (1.0, -1.0),
                2 => (1.0, 1.0),
                _ => (-1.0, 1.0),
            };
            *corner = inv.project_point3(Vec3::new(x, y, z));
        }
        corners
    }
}

pub fn linear_depth(orthographic: bool, near: f32, far: f32, ndc_z: f32) -> f32 {
    if orthographic {
        near + ndc_z * (far - near)
    } else {
        near * far / (far - ndc_z * (far - near))
    }
}

/// Six clip planes (left, right, bottom, top, near, far) as `n.xyz · p + w >= 0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frustum {
    planes: [Vec4; 6],
}

impl Frustum {
    /// Planes of a `[0, 1]` depth-range clip matrix.
    pub fn from_matrix(m: Mat4) -> Self {
        let (r0, r1, r2, r3) = (m.row(0), m.row(1), m.row(2), m.row(3));
        let planes = [r3 + r0, r3 - r0, r3 + r1, r3 - r1, r2, r3 - r2].map(|p| {
            let len = p.truncate().length();
            if len > 0.0 {
                p / len
            } else {
                p
            }
        });
        Self { planes }
    }

    pub fn intersects_aabb(&self, min: Vec3, max: Vec3) -> bool {
        self.planes.iter().all(|plane| {
            let n = plane.truncate();
            let p = Vec3::select(n.cmpge(Vec3::ZERO), max, min);
            n.dot(p) + plane.w >= 0.0
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4
    }

    #[test]
    fn euler_orders_describe_the_same_orientation() {
        let xyz = Euler::with_order(-0.0316, -1.0258, -0.0055, EulerOrder::XYZ);
        let yxz = xyz.reorder(EulerOrder::YXZ);
        assert_eq!(yxz.order, EulerOrder::YXZ);
        let v = Vec3::new(0.3, -0.2, 1.0);
        assert!((xyz.to_quat() * v).abs_diff_eq(yxz.to_quat() * v, 1e-5));
    }

    #[test]
    fn yxz_round_trips_through_quaternion() {
        let e = Euler::new(0.4, -1.2, 0.1);
        let back = Euler::from_quat(e.to_quat(), EulerOrder::YXZ);
        assert!(close(e.x, back.x) && close(e.y, back.y) && close(e.z, back.z));
    }

    #[test]
    fn perspective_view_size_grows_with_fov() {
        let mut camera = ProjectorCamera::perspective(50.0, 0.75, 1.0, 150.0);
        let narrow = camera.view_size(camera.far());
        camera.set_fov(60.0);
        let wide = camera.view_size(camera.far());
        assert!(wide.x > narrow.x && wide.y > narrow.y);
        assert!(close(narrow.x / narrow.y, 0.75));
    }

    #[test]
    fn far_plane_never_crosses_near() {
        let mut camera = ProjectorCamera::perspective(50.0, 1.0, 3.0, 150.0);
        assert!(!camera.set_far(2.0));
        assert_eq!(camera.far(), 150.0);
        assert!(camera.set_far(40.0));
    }

    #[test]
    fn map_camera_looks_down_over_bounds_centre() {
        let bounds = Bounds::from_scene_box(Vec3::new(-10.0, 0.0, -40.0), Vec3::new(30.0, 5.0, 20.0));
        let camera = ProjectorCamera::map(bounds, 200.0, 400.0);
        assert!(camera.forward().abs_diff_eq(Vec3::NEG_Y, 1e-5));
        assert!(camera.world_position().abs_diff_eq(Vec3::new(10.0, 200.0, -10.0), 1e-5));

        // top = min.x lands at the top edge, left = max.z at the left edge
        let vp = camera.view_projection();
        let top_left = vp.project_point3(Vec3::new(-10.0, 0.0, 20.0));
        assert!(close(top_left.x, -1.0) && close(top_left.y, 1.0));
    }

    #[test]
    fn linear_depth_spans_near_to_far() {
        let camera = ProjectorCamera::perspective(60.0, 1.0, 1.0, 100.0);
        assert!(close(camera.linear_depth(0.0), 1.0));
        assert!(close(camera.linear_depth(1.0), 100.0));
        let p = camera.projection().project_point3(Vec3::new(0.0, 0.0, -25.0));
        assert!((camera.linear_depth(p.z) - 25.0).abs() < 1e-2);
    }

    #[test]
    fn frustum_culls_boxes_behind_camera() {
        let camera = ProjectorCamera::perspective(60.0, 1.0, 1.0, 100.0);
        let frustum = camera.frustum();
        assert!(frustum.intersects_aabb(Vec3::new(-1.0, -1.0, -20.0), Vec3::new(1.0, 1.0, -10.0)));
        assert!(!frustum.intersects_aabb(Vec3::new(-1.0, -1.0, 10.0), Vec3::new(1.0, 1.0, 20.0)));
        assert!(!frustum.intersects_aabb(Vec3::new(-1.0, -1.0, -160.0), Vec3::new(1.0, 1.0, -150.0)));
    }
}
