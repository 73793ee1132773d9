// records.rs — persisted projection records (JSON)

use crate::camera::{Bounds, Euler, EulerOrder, ProjectorKind};
use crate::error::RecordError;
use crate::keyframe::{Ease, Keyframe};
use crate::projection::{Projection, ProjectionId, ProjectionSettings};
use glam::Vec3;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

/// One URL, or several the projection can switch between.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MediaSource {
    One(String),
    Many(Vec<String>),
}

impl MediaSource {
    pub fn urls(&self) -> Vec<String> {
        match self {
            MediaSource::One(url) => vec![url.clone()],
            MediaSource::Many(urls) => urls.clone(),
        }
    }
}

/// Radians, with an optional Euler order (YXZ when absent).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordRotation {
    Ordered(f32, f32, f32, EulerOrder),
    Plain(f32, f32, f32),
}

impl RecordRotation {
    pub fn to_euler(self) -> Euler {
        match self {
            RecordRotation::Ordered(x, y, z, order) => Euler::with_order(x, y, z, order).reorder(EulerOrder::YXZ),
            RecordRotation::Plain(x, y, z) => Euler::new(x, y, z),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraRecord {
    pub position: [f32; 3],
    pub rotation: RecordRotation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fov: Option<f32>,
    /// Width / height.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ratio: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub far: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounds: Option<Bounds>,
    /// Width of a centred orthographic view; height follows `ratio`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orthographic: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub projection_type: Option<String>,
}

/// One timed attribute value. `ease` names the curve arriving at it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyframeRecord {
    pub time: f32,
    pub attribute: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ease: Option<String>,
}

impl KeyframeRecord {
    pub fn to_keyframe(&self, target: ProjectionId) -> Keyframe {
        let ease = self.ease.as_deref().map(Ease::parse).unwrap_or_default();
        Keyframe::new(target, self.time, self.attribute.as_str(), self.value.as_str()).with_ease(ease)
    }

    pub fn from_keyframe(keyframe: &Keyframe) -> Self {
        Self {
            time: keyframe.time,
            attribute: keyframe.attribute.clone(),
            value: keyframe.value.clone(),
            ease: (keyframe.ease != Ease::Linear).then(|| keyframe.ease.name().to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectionRecord {
    pub media: MediaSource,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    pub camera: CameraRecord,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layers: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screen: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opacity: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyframes: Option<Vec<KeyframeRecord>>,
}

impl ProjectionRecord {
    pub fn kind(&self) -> ProjectorKind {
        match (&self.camera.projection_type, self.camera.orthographic) {
            (Some(name), _) => ProjectorKind::parse(name),
            (None, Some(true)) => ProjectorKind::Orthographic,
            _ => ProjectorKind::Perspective,
        }
    }

    pub fn to_settings(&self) -> ProjectionSettings {
        let camera = &self.camera;
        let defaults = ProjectionSettings::default();
        let bounds = camera.bounds.or_else(|| {
            camera.size.map(|size| {
                let half_w = size / 2.0;
                let half_h = half_w / camera.ratio.unwrap_or(1.0);
                Bounds::from([-half_w, half_w, half_h, -half_h])
            })
        });
        ProjectionSettings {
            kind: self.kind(),
            position: Vec3::from(camera.position),
            rotation: camera.rotation.to_euler(),
            fov: camera.fov.unwrap_or(defaults.fov),
            aspect: camera.ratio,
            far: camera.far.unwrap_or(defaults.far),
            bounds,
            layers: self
                .layers
                .as_ref()
                .map(|l| l.iter().cloned().collect::<BTreeSet<_>>())
                .filter(|l| !l.is_empty()),
            screen: self.screen.unwrap_or(defaults.screen),
            opacity: self.opacity.unwrap_or(defaults.opacity),
            texture_sources: self.media.urls(),
            ..defaults
        }
    }

    /// Snapshot of a live projection.
    pub fn from_projection(projection: &Projection) -> Self {
        let camera = projection.camera();
        let kind = camera.kind();
        let r = camera.rotation().reorder(EulerOrder::YXZ);

        let sources = projection.texture_sources();
        let media = match (sources.len(), projection.texture_source()) {
            (0 | 1, Some(url)) => MediaSource::One(url.to_string()),
            (0, None) => MediaSource::One(String::new()),
            _ => MediaSource::Many(sources.to_vec()),
        };
        let media_type = projection
            .texture()
            .map(|t| if t.is_animated() { "animation" } else { "image" }.to_string());

        ProjectionRecord {
            media,
            media_type,
            camera: CameraRecord {
                position: camera.position().to_array(),
                rotation: RecordRotation::Ordered(r.x, r.y, r.z, EulerOrder::YXZ),
                fov: (kind == ProjectorKind::Perspective).then(|| camera.fov()),
                ratio: (!projection.aspect_auto()).then(|| camera.aspect()),
                far: Some(camera.far()),
                bounds: (kind.is_orthographic() && !projection.bounds_auto()).then(|| camera.bounds()),
                size: None,
                orthographic: None,
                projection_type: (kind != ProjectorKind::Perspective).then(|| kind.name().to_string()),
            },
            layers: projection.layer_names().map(|l| l.iter().cloned().collect()),
            screen: Some(projection.screen()),
            opacity: Some(projection.opacity()),
            keyframes: None,
        }
    }
}

pub fn parse_records(json: &str) -> Result<Vec<ProjectionRecord>, RecordError> {
    Ok(serde_json::from_str(json)?)
}

pub fn load_records(path: &Path) -> Result<Vec<ProjectionRecord>, RecordError> {
    let text = fs::read_to_string(path).map_err(|source| RecordError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let records = parse_records(&text)?;
    log::info!("loaded {} projection records from {}", records.len(), path.display());
    Ok(records)
}

pub fn save_records(path: &Path, records: &[ProjectionRecord]) -> Result<(), RecordError> {
    let text = serde_json::to_string_pretty(records)?;
    fs::write(path, text).map_err(|source| RecordError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    log::info!("wrote {} projection records to {}", records.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const RECORDS: &str = r#"[
        {
            "media": "./media/aerial.png",
            "type": "image",
            "camera": {
                "position": [48.6, 1131.6, -45.2],
                "rotation": [-1.5707963, 0.0, 1.5624073, "XYZ"],
                "fov": 50,
                "ratio": 0.75
            }
        },
        {
            "media": ["./media/a.png", "./media/b.gif"],
            "camera": {
                "position": [10, 1.8, -10],
                "rotation": [-0.03, -1.02, -0.005],
                "size": 40,
                "ratio": 2,
                "orthographic": true
            },
            "layers": ["ground"],
            "opacity": 0.5,
            "keyframes": [
                { "time": 0, "attribute": "opacity", "value": "0" },
                { "time": 4, "attribute": "opacity", "value": "1", "ease": "ease-in-out" }
            ]
        }
    ]"#;

    #[test]
    fn parses_both_media_and_rotation_shapes() {
        let records = parse_records(RECORDS).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].media, MediaSource::One("./media/aerial.png".into()));
        assert!(matches!(records[0].camera.rotation, RecordRotation::Ordered(_, _, _, EulerOrder::XYZ)));
        assert!(matches!(records[1].camera.rotation, RecordRotation::Plain(..)));
        assert_eq!(records[1].media.urls().len(), 2);
    }

    #[test]
    fn rotation_orders_are_reexpressed_in_yxz() {
        let records = parse_records(RECORDS).unwrap();
        let settings = records[0].to_settings();
        assert_eq!(settings.rotation.order, EulerOrder::YXZ);
        let original = Euler::with_order(-1.5707963, 0.0, 1.5624073, EulerOrder::XYZ).to_quat();
        let v = Vec3::new(0.3, -0.2, -1.0);
        assert!((settings.rotation.to_quat() * v).abs_diff_eq(original * v, 1e-4));
    }

    #[test]
    fn size_gives_centred_bounds() {
        let settings = parse_records(RECORDS).unwrap()[1].to_settings();
        assert_eq!(settings.kind, ProjectorKind::Orthographic);
        assert_eq!(settings.bounds, Some(Bounds::from([-20.0, 20.0, 10.0, -10.0])));
        assert_eq!(settings.opacity, 0.5);
        assert_eq!(settings.layers.unwrap().len(), 1);
    }

    #[test]
    fn save_then_load_keeps_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.json");
        let records = parse_records(RECORDS).unwrap();
        save_records(&path, &records).unwrap();
        assert_eq!(load_records(&path).unwrap(), records);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_records(&dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(err, RecordError::Io { .. }));
    }

    #[test]
    fn keyframes_carry_their_ease() {
        let records = parse_records(RECORDS).unwrap();
        assert!(records[0].keyframes.is_none());
        let target = ProjectionId::from_raw(7);
        let keyframes: Vec<Keyframe> = records[1]
            .keyframes
            .as_ref()
            .unwrap()
            .iter()
            .map(|k| k.to_keyframe(target))
            .collect();
        assert_eq!(keyframes[0].ease, Ease::Linear);
        assert_eq!(keyframes[1].ease, Ease::InOut);
        assert_eq!(keyframes[1].target, target);
        assert_eq!(KeyframeRecord::from_keyframe(&keyframes[1]).ease.as_deref(), Some("ease-in-out"));
    }
}
