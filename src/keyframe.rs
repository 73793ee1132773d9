// keyframe.rs — time-driven attribute values

use crate::projection::ProjectionId;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Ease {
    #[default]
    Linear,
    In,
    Out,
    InOut,
}

impl Ease {
    pub fn parse(value: &str) -> Self {
        match value.trim() {
            "ease-in" => Ease::In,
            "ease-out" => Ease::Out,
            "ease-in-out" => Ease::InOut,
            _ => Ease::Linear,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Ease::Linear => "linear",
            Ease::In => "ease-in",
            Ease::Out => "ease-out",
            Ease::InOut => "ease-in-out",
        }
    }

    pub fn apply(self, t: f32) -> f32 {
        let t = t.clamp(0.0, 1.0);
        match self {
            Ease::Linear => t,
            Ease::In => t * t,
            Ease::Out => 1.0 - (1.0 - t) * (1.0 - t),
            Ease::InOut => t * t * (3.0 - 2.0 * t),
        }
    }
}

/// `attribute` of `target` takes `value` at `time`. `ease` shapes the
/// segment arriving at this keyframe.
#[derive(Debug, Clone, PartialEq)]
pub struct Keyframe {
    pub target: ProjectionId,
    pub time: f32,
    pub attribute: String,
    pub value: String,
    pub ease: Ease,
}

impl Keyframe {
    pub fn new(target: ProjectionId, time: f32, attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            target,
            time,
            attribute: attribute.into(),
            value: value.into(),
            ease: Ease::Linear,
        }
    }

    pub fn with_ease(mut self, ease: Ease) -> Self {
        self.ease = ease;
        self
    }
}

/// Attribute values at `time`, one per `(target, attribute)` pair, in a
/// stable order. Pure: the same keyframes and time give the same output.
pub fn evaluate(keyframes: &[Keyframe], time: f32) -> Vec<(ProjectionId, String, String)> {
    let mut tracks: BTreeMap<(ProjectionId, &str), Vec<&Keyframe>> = BTreeMap::new();
    for kf in keyframes {
        tracks.entry((kf.target, kf.attribute.as_str())).or_default().push(kf);
    }

    tracks
        .into_iter()
        .map(|((target, attribute), mut track)| {
            track.sort_by(|a, b| a.time.total_cmp(&b.time));
            let value = match track.iter().position(|kf| kf.time > time) {
                None => track[track.len() - 1].value.clone(),
                Some(0) => track[0].value.clone(),
                Some(next) => {
                    let (a, b) = (track[next - 1], track[next]);
                    let progress = (time - a.time) / (b.time - a.time);
                    interpolate(&a.value, &b.value, b.ease.apply(progress))
                }
            };
            (target, attribute.to_string(), value)
        })
        .collect()
}

/// Token-wise blend of two whitespace-separated values. Numeric pairs are
/// interpolated, anything else takes the later token; differing token
/// counts take the later value whole.
pub fn interpolate(from: &str, to: &str, t: f32) -> String {
    let a: Vec<&str> = from.split_whitespace().collect();
    let b: Vec<&str> = to.split_whitespace().collect();
    if a.len() != b.len() {
        return to.to_string();
    }
    a.iter()
        .zip(&b)
        .map(|(x, y)| match (x.parse::<f32>(), y.parse::<f32>()) {
            (Ok(x), Ok(y)) => format!("{}", x + (y - x) * t),
            _ => y.to_string(),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pid(n: u32) -> ProjectionId {
        ProjectionId::from_raw(n)
    }

    fn fov_track() -> Vec<Keyframe> {
        vec![
            Keyframe::new(pid(0), 10.0, "fov", "70"),
            Keyframe::new(pid(0), 0.0, "fov", "50"),
            Keyframe::new(pid(0), 0.0, "position", "0 0 0"),
            Keyframe::new(pid(0), 4.0, "position", "4 8 -2"),
        ]
    }

    fn value_at(out: &[(ProjectionId, String, String)], attribute: &str) -> String {
        out.iter().find(|(_, a, _)| a == attribute).map(|(_, _, v)| v.clone()).unwrap()
    }

    #[test]
    fn clamps_outside_the_track() {
        let kfs = fov_track();
        assert_eq!(value_at(&evaluate(&kfs, -3.0), "fov"), "50");
        assert_eq!(value_at(&evaluate(&kfs, 25.0), "fov"), "70");
    }

    #[test]
    fn interpolates_between_keyframes() {
        let kfs = fov_track();
        let out = evaluate(&kfs, 5.0);
        assert_eq!(value_at(&out, "fov"), "60");
        assert_eq!(value_at(&evaluate(&kfs, 1.0), "position"), "1 2 -0.5");
    }

    #[test]
    fn evaluation_is_pure() {
        let kfs = fov_track();
        assert_eq!(evaluate(&kfs, 2.5), evaluate(&kfs, 2.5));
    }

    #[test]
    fn non_numeric_values_snap_to_the_later_one() {
        assert_eq!(interpolate("map", "perspective", 0.2), "perspective");
        assert_eq!(interpolate("1 2", "3", 0.5), "3");
    }

    #[test]
    fn ease_shapes_progress() {
        assert_eq!(Ease::parse("ease-in").apply(0.5), 0.25);
        assert_eq!(Ease::Out.apply(0.5), 0.75);
        assert_eq!(Ease::InOut.apply(0.5), 0.5);
        assert_eq!(Ease::Linear.apply(2.0), 1.0);
    }
}
