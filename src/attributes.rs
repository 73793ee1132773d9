// attributes.rs — parsing of declarative attribute strings

use crate::camera::{Bounds, Euler, ProjectorKind};
use crate::operator::ControlsMode;
use glam::Vec3;
use std::collections::BTreeSet;

/// A parsed attribute, ready to be applied to a projection or the stage.
#[derive(Debug, Clone, PartialEq)]
pub enum Attribute {
    Position(Vec3),
    Rotation(Euler),
    Bounds(Bounds),
    /// `None` shows every layer.
    Layers(Option<BTreeSet<String>>),
    Fov(f32),
    Far(f32),
    Opacity(f32),
    Time(f32),
    Screen(bool),
    Focus(bool),
    FirstPerson(bool),
    Controls(ControlsMode),
    ProjectionType(ProjectorKind),
    Src(String),
}

impl Attribute {
    /// `None` for unknown names and unparseable numbers.
    pub fn parse(name: &str, value: &str) -> Option<Self> {
        let attribute = match name {
            "position" => Attribute::Position(parse_vec3(value)),
            "rotation" => Attribute::Rotation(parse_rotation(value)),
            "bounds" => Attribute::Bounds(parse_bounds(value)),
            "layers" => Attribute::Layers(parse_layers(value)),
            "fov" => Attribute::Fov(parse_number(value)?),
            "far" => Attribute::Far(parse_number(value)?),
            "opacity" => Attribute::Opacity(parse_number(value)?),
            "time" => Attribute::Time(parse_number(value)?),
            "screen" => Attribute::Screen(parse_flag(value)),
            "focus" => Attribute::Focus(parse_flag(value)),
            "first-person" => Attribute::FirstPerson(parse_flag(value)),
            "controls" => Attribute::Controls(ControlsMode::parse(value)),
            "projection-type" => Attribute::ProjectionType(ProjectorKind::parse(value)),
            "src" => Attribute::Src(value.trim().to_string()),
            _ => return None,
        };
        Some(attribute)
    }
}

pub fn parse_number(value: &str) -> Option<f32> {
    let n = value.trim().parse::<f32>().ok()?;
    n.is_finite().then_some(n)
}

/// Space-separated numbers; empty or unparseable components read as 0.
pub fn parse_numbers(value: &str) -> Vec<f32> {
    value
        .split_whitespace()
        .map(|v| parse_number(v).unwrap_or(0.0))
        .collect()
}

fn component(values: &[f32], i: usize) -> f32 {
    values.get(i).copied().unwrap_or(0.0)
}

pub fn parse_vec3(value: &str) -> Vec3 {
    let v = parse_numbers(value);
    Vec3::new(component(&v, 0), component(&v, 1), component(&v, 2))
}

/// Degrees in, YXZ radians out.
pub fn parse_rotation(value: &str) -> Euler {
    let v = parse_numbers(value);
    Euler::from_degrees(component(&v, 0), component(&v, 1), component(&v, 2))
}

/// `left right top bottom`.
pub fn parse_bounds(value: &str) -> Bounds {
    let v = parse_numbers(value);
    Bounds::from([component(&v, 0), component(&v, 1), component(&v, 2), component(&v, 3)])
}

/// Single-quoted, double-quoted or bare tokens, so layer names may contain
/// spaces. An empty list means every layer.
pub fn parse_layers(value: &str) -> Option<BTreeSet<String>> {
    let mut names = BTreeSet::new();
    let mut chars = value.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' | '\n' => {
                chars.next();
            }
            '\'' | '"' => {
                chars.next();
                let token: String = chars.by_ref().take_while(|&ch| ch != c).collect();
                if !token.is_empty() {
                    names.insert(token);
                }
            }
            _ => {
                let mut token = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch.is_whitespace() {
                        break;
                    }
                    token.push(ch);
                    chars.next();
                }
                names.insert(token);
            }
        }
    }
    (!names.is_empty()).then_some(names)
}

/// Presence (`""`) or `"true"`.
pub fn parse_flag(value: &str) -> bool {
    matches!(value.trim(), "" | "true")
}

/// Formats a vector the way `parse_vec3` reads it back.
pub fn format_vec3(v: Vec3) -> String {
    format!("{} {} {}", v.x, v.y, v.z)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vectors_default_missing_components() {
        assert_eq!(parse_vec3("1 2"), Vec3::new(1.0, 2.0, 0.0));
        assert_eq!(parse_vec3("  4   x 6 "), Vec3::new(4.0, 0.0, 6.0));
        assert_eq!(parse_bounds("-5 5 5"), Bounds::from([-5.0, 5.0, 5.0, 0.0]));
    }

    #[test]
    fn rotation_is_degrees_in_yxz() {
        let r = parse_rotation("90 -45 0");
        assert_eq!(r.order, crate::camera::EulerOrder::YXZ);
        assert!((r.x - std::f32::consts::FRAC_PI_2).abs() < 1e-6);
        assert!((r.y + std::f32::consts::FRAC_PI_4).abs() < 1e-6);
    }

    #[test]
    fn layers_accept_quoted_names() {
        let layers = parse_layers(r#"ground 'old town' "river bank""#).unwrap();
        let expected: BTreeSet<String> = ["ground", "old town", "river bank"].iter().map(|s| s.to_string()).collect();
        assert_eq!(layers, expected);
        assert_eq!(parse_layers("   "), None);
    }

    #[test]
    fn flags_and_modes() {
        assert!(parse_flag(""));
        assert!(parse_flag("true"));
        assert!(!parse_flag("false"));
        assert_eq!(Attribute::parse("controls", "edit"), Some(Attribute::Controls(ControlsMode::Edit)));
        assert_eq!(Attribute::parse("controls", "no"), Some(Attribute::Controls(ControlsMode::Off)));
        assert_eq!(
            Attribute::parse("projection-type", "cylinder"),
            Some(Attribute::ProjectionType(ProjectorKind::Perspective))
        );
    }

    #[test]
    fn numbers_must_parse() {
        assert_eq!(Attribute::parse("fov", "55.5"), Some(Attribute::Fov(55.5)));
        assert_eq!(Attribute::parse("far", "far away"), None);
        assert_eq!(Attribute::parse("colour", "red"), None);
    }
}
