// material.rs — projective material bound to one (projection, surface) pair

use crate::camera::{linear_depth, ProjectorCamera};
use crate::depth::DepthMap;
use crate::scene::SurfaceId;
use glam::{Mat4, Vec2, Vec3};
use image::RgbaImage;
use std::sync::Arc;

/// Relative and absolute slack when comparing a fragment against the depth
/// map, in linear view distance.
pub const DEPTH_BIAS_RELATIVE: f32 = 0.005;
pub const DEPTH_BIAS_ABSOLUTE: f32 = 0.05;

/// Default delay for frames that carry none, in seconds.
const DEFAULT_FRAME_DELAY: f32 = 0.1;

/// Decoded image or looping frame sequence used as a projector's source.
#[derive(Debug, Clone)]
pub struct Texture {
    source: String,
    frames: Vec<RgbaImage>,
    delays: Vec<f32>,
}

impl Texture {
    pub fn from_image(source: impl Into<String>, image: RgbaImage) -> Self {
        Self {
            source: source.into(),
            frames: vec![image],
            delays: vec![0.0],
        }
    }

    /// Frames with per-frame delays in seconds. Callers guarantee at least one frame.
    pub fn from_frames(source: impl Into<String>, frames: Vec<(RgbaImage, f32)>) -> Self {
        let (frames, delays) = frames
            .into_iter()
            .map(|(f, d)| (f, if d > 0.0 { d } else { DEFAULT_FRAME_DELAY }))
            .unzip();
        Self {
            source: source.into(),
            frames,
            delays,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Relabels the texture, e.g. with the URL it was requested by.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn width(&self) -> u32 {
        self.frames[0].width()
    }

    pub fn height(&self) -> u32 {
        self.frames[0].height()
    }

    pub fn aspect(&self) -> f32 {
        self.width() as f32 / self.height().max(1) as f32
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn is_animated(&self) -> bool {
        self.frames.len() > 1
    }

    /// Frame shown `elapsed` seconds after playback started; loops.
    pub fn frame_index_at(&self, elapsed: f32) -> usize {
        if !self.is_animated() {
            return 0;
        }
        let total: f32 = self.delays.iter().sum();
        let mut t = elapsed.rem_euclid(total);
        for (i, d) in self.delays.iter().enumerate() {
            if t < *d {
                return i;
            }
            t -= d;
        }
        self.frames.len() - 1
    }

    pub fn frame(&self, index: usize) -> &RgbaImage {
        &self.frames[index.min(self.frames.len() - 1)]
    }

    /// Nearest-texel colour in linear `[0, 1]` RGBA.
    pub fn sample(&self, uv: Vec2, elapsed: f32) -> [f32; 4] {
        let frame = self.frame(self.frame_index_at(elapsed));
        let x = ((uv.x.clamp(0.0, 1.0) * frame.width() as f32) as u32).min(frame.width() - 1);
        let y = ((uv.y.clamp(0.0, 1.0) * frame.height() as f32) as u32).min(frame.height() - 1);
        frame.get_pixel(x, y).0.map(|c| c as f32 / 255.0)
    }
}

/// Result of shading one surface point with a projective material.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Fragment {
    Textured([f32; 4]),
    /// Outside the frustum, occluded, or no texture: the plain colour.
    Fallback([f32; 4]),
}

/// Lens parameters needed to linearise the depth map.
#[derive(Debug, Clone, Copy, PartialEq)]
struct DepthLens {
    orthographic: bool,
    near: f32,
    far: f32,
}

#[derive(Debug, Clone)]
pub struct ProjectedMaterial {
    surface: SurfaceId,
    texture: Option<Arc<Texture>>,
    /// Fallback colour. Transparent by default so stacked slots show through.
    pub color: [f32; 4],
    opacity: f32,
    visible: bool,
    view_proj: Mat4,
    lens: DepthLens,
    depth: Option<Arc<DepthMap>>,
}

impl ProjectedMaterial {
    pub fn new(surface: SurfaceId, texture: Option<Arc<Texture>>, opacity: f32) -> Self {
        Self {
            surface,
            texture,
            color: [0.8, 0.8, 0.8, 0.0],
            opacity,
            visible: true,
            view_proj: Mat4::IDENTITY,
            lens: DepthLens {
                orthographic: false,
                near: 1.0,
                far: 2.0,
            },
            depth: None,
        }
    }

    pub fn surface(&self) -> SurfaceId {
        self.surface
    }

    pub fn texture(&self) -> Option<&Arc<Texture>> {
        self.texture.as_ref()
    }

    pub fn set_texture(&mut self, texture: Option<Arc<Texture>>) {
        self.texture = texture;
    }

    pub fn opacity(&self) -> f32 {
        self.opacity
    }

    pub fn set_opacity(&mut self, opacity: f32) {
        self.opacity = opacity.clamp(0.0, 1.0);
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    pub fn view_proj(&self) -> Mat4 {
        self.view_proj
    }

    pub fn depth(&self) -> Option<&Arc<DepthMap>> {
        self.depth.as_ref()
    }

    /// Takes the camera's current pose and lens and the freshly captured
    /// depth map.
    pub fn project(&mut self, camera: &ProjectorCamera, depth: Option<Arc<DepthMap>>, visible: bool) {
        self.view_proj = camera.view_projection();
        self.lens = DepthLens {
            orthographic: camera.kind().is_orthographic(),
            near: camera.near(),
            far: camera.far(),
        };
        self.depth = depth;
        self.visible = visible;
    }

    /// Texture coordinate and clip depth of `world` in the projector image,
    /// `None` outside the frustum.
    pub fn projector_uv(&self, world: Vec3) -> Option<(Vec2, f32)> {
        let clip = self.view_proj * world.extend(1.0);
        if clip.w <= 0.0 {
            return None;
        }
        let ndc = clip.truncate() / clip.w;
        if ndc.x.abs() > 1.0 || ndc.y.abs() > 1.0 || !(0.0..=1.0).contains(&ndc.z) {
            return None;
        }
        Some((Vec2::new(ndc.x * 0.5 + 0.5, 0.5 - ndc.y * 0.5), ndc.z))
    }

    /// True when a nearer surface was captured at `uv` than `ndc_z`.
    /// Without a depth map nothing is occluded.
    pub fn is_occluded(&self, uv: Vec2, ndc_z: f32) -> bool {
        let Some(stored) = self.depth.as_ref().and_then(|d| d.sample(uv)) else {
            return false;
        };
        let DepthLens {
            orthographic,
            near,
            far,
        } = self.lens;
        let fragment = linear_depth(orthographic, near, far, ndc_z);
        let nearest = linear_depth(orthographic, near, far, stored);
        fragment > nearest * (1.0 + DEPTH_BIAS_RELATIVE) + DEPTH_BIAS_ABSOLUTE
    }

    /// CPU reference of the fragment stage.
    pub fn shade(&self, world: Vec3, elapsed: f32) -> Fragment {
        let fallback = Fragment::Fallback(self.color);
        if !self.visible {
            return fallback;
        }
        let Some(texture) = &self.texture else {
            return fallback;
        };
        let Some((uv, z)) = self.projector_uv(world) else {
            return fallback;
        };
        if self.is_occluded(uv, z) {
            return fallback;
        }
        let [r, g, b, a] = texture.sample(uv, elapsed);
        Fragment::Textured([r, g, b, a * self.opacity])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn solid(w: u32, h: u32, rgba: [u8; 4]) -> RgbaImage {
        RgbaImage::from_pixel(w, h, Rgba(rgba))
    }

    #[test]
    fn animated_texture_loops_over_its_delays() {
        let tex = Texture::from_frames(
            "clip.gif",
            vec![(solid(2, 2, [255, 0, 0, 255]), 0.5), (solid(2, 2, [0, 255, 0, 255]), 0.25)],
        );
        assert!(tex.is_animated());
        assert_eq!(tex.frame_index_at(0.1), 0);
        assert_eq!(tex.frame_index_at(0.6), 1);
        assert_eq!(tex.frame_index_at(0.8), 0);
        assert_eq!(tex.sample(Vec2::splat(0.5), 0.6), [0.0, 1.0, 0.0, 1.0]);
    }

    #[test]
    fn still_texture_reports_aspect() {
        let tex = Texture::from_image("a.png", solid(40, 30, [0; 4]));
        assert!((tex.aspect() - 4.0 / 3.0).abs() < 1e-6);
        assert_eq!(tex.frame_index_at(12.0), 0);
    }

    #[test]
    fn points_outside_the_frustum_fall_back() {
        let mut camera = ProjectorCamera::perspective(60.0, 1.0, 1.0, 50.0);
        camera.set_position(Vec3::ZERO);
        let mut material = ProjectedMaterial::new(
            crate::scene::Scene::new().add_surface("x", crate::mesh::build_quad(), crate::scene::SurfaceKind::Model),
            Some(Arc::new(Texture::from_image("a.png", solid(4, 4, [255, 255, 255, 255])))),
            1.0,
        );
        material.view_proj = camera.view_projection();
        assert!(material.projector_uv(Vec3::new(0.0, 0.0, 10.0)).is_none());
        assert!(material.projector_uv(Vec3::new(0.0, 0.0, -80.0)).is_none());
        assert!(matches!(material.shade(Vec3::new(0.0, 0.0, 10.0), 0.0), Fragment::Fallback(_)));
        assert!(matches!(material.shade(Vec3::new(0.0, 0.0, -10.0), 0.0), Fragment::Textured(_)));
    }
}
