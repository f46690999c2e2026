//! Field admissibility rules.
//!
//! A typed registry mapping canonical leaf field names to predicates.
//! Unknown fields fall through to [`FieldRule::Unchecked`]: the scene schema
//! is deliberately open, and a patch touching a field this table does not
//! know about is accepted as-is.

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

const SHAPE_TYPES: &[&str] = &["Sphere", "Box", "Cylinder", "Plane", "Cone", "Capsule"];
const CONTENT_TYPES: &[&str] = &["text", "formula", "image"];
const ANCHORS: &[&str] = &["center", "top", "bottom", "left", "right"];
const VECTOR_TYPES: &[&str] = &["velocity", "force", "acceleration", "momentum"];
const SIMULATION_SCALES: &[&str] = &["terrestrial", "solar_system", "galactic"];

/// Admissibility check for one known field kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldRule {
    /// Array of exactly 3 numbers.
    Vector3,
    /// Float in [0, 1].
    UnitInterval,
    /// Float strictly greater than 0.
    Positive,
    /// Float greater than or equal to 0.
    NonNegative,
    /// 6-hex-digit color; recoverable inputs are repaired, not rejected.
    HexColor,
    Boolean,
    Text,
    /// Closed string set.
    Enum(&'static [&'static str]),
    /// Open schema: accepted without inspection.
    Unchecked,
}

/// Look up the rule for a leaf field name.
pub fn rule_for(field: &str) -> FieldRule {
    match field {
        "position" | "velocity" | "rotation" | "angularVelocity" | "gravity" | "dimensions" => {
            FieldRule::Vector3
        }
        "friction" | "restitution" | "opacity" | "smoothness" => FieldRule::UnitInterval,
        "mass" | "radius" | "height" | "distance" => FieldRule::Positive,
        "gravitationalConstant" | "gravitationalMass" | "minDistance" | "softening" => {
            FieldRule::NonNegative
        }
        "color" => FieldRule::HexColor,
        "isStatic" | "hasGround" | "enabled" => FieldRule::Boolean,
        "id" | "name" | "description" => FieldRule::Text,
        "type" => FieldRule::Enum(SHAPE_TYPES),
        "contentType" => FieldRule::Enum(CONTENT_TYPES),
        "anchor" => FieldRule::Enum(ANCHORS),
        "vectorType" => FieldRule::Enum(VECTOR_TYPES),
        "simulationScale" => FieldRule::Enum(SIMULATION_SCALES),
        _ => FieldRule::Unchecked,
    }
}

fn hex_digits_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new("^[0-9a-fA-F]+$").expect("valid regex"))
}

impl FieldRule {
    /// Check `value` against this rule. `Ok` carries the value to store —
    /// usually the input unchanged, but a recoverable color (wrong hex digit
    /// count) comes back repaired. `Err` carries a message written for the
    /// agent to self-correct on.
    pub fn check(&self, field: &str, value: &Value) -> Result<Value, String> {
        match self {
            FieldRule::Vector3 => {
                let ok = value
                    .as_array()
                    .is_some_and(|a| a.len() == 3 && a.iter().all(Value::is_number));
                if ok {
                    Ok(value.clone())
                } else {
                    Err(format!("{field} must be an array of exactly 3 numbers"))
                }
            }
            FieldRule::UnitInterval => match value.as_f64() {
                Some(n) if (0.0..=1.0).contains(&n) => Ok(value.clone()),
                _ => Err(format!("{field} must be a number between 0 and 1")),
            },
            FieldRule::Positive => match value.as_f64() {
                Some(n) if n > 0.0 => Ok(value.clone()),
                _ => Err(format!("{field} must be a positive number")),
            },
            FieldRule::NonNegative => match value.as_f64() {
                Some(n) if n >= 0.0 => Ok(value.clone()),
                _ => Err(format!("{field} must be a non-negative number")),
            },
            FieldRule::HexColor => repair_hex_color(field, value),
            FieldRule::Boolean => {
                if value.is_boolean() {
                    Ok(value.clone())
                } else {
                    Err(format!("{field} must be a boolean"))
                }
            }
            FieldRule::Text => {
                if value.is_string() {
                    Ok(value.clone())
                } else {
                    Err(format!("{field} must be a string"))
                }
            }
            FieldRule::Enum(allowed) => match value.as_str() {
                Some(s) if allowed.contains(&s) => Ok(value.clone()),
                _ => Err(format!(
                    "{field} must be one of [{}]",
                    allowed.join(", ")
                )),
            },
            FieldRule::Unchecked => Ok(value.clone()),
        }
    }
}

/// Forgiving-input policy: a color whose digits are valid hex but whose
/// count is wrong is padded/truncated to 6 digits instead of rejected.
/// Non-hex input still fails.
fn repair_hex_color(field: &str, value: &Value) -> Result<Value, String> {
    let Some(raw) = value.as_str() else {
        return Err(format!("{field} must be a hex color string"));
    };
    let digits = raw.strip_prefix('#').unwrap_or(raw);
    if digits.is_empty() || !hex_digits_regex().is_match(digits) {
        return Err(format!("{field} '{raw}' is not a hex color"));
    }
    let mut repaired: String = digits.chars().take(6).collect();
    while repaired.len() < 6 {
        repaired.push('0');
    }
    Ok(Value::String(format!("#{repaired}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn vectors_require_three_numbers() {
        let rule = rule_for("position");
        assert_eq!(rule, FieldRule::Vector3);
        assert!(rule.check("position", &json!([1, 2, 3])).is_ok());
        assert!(rule.check("position", &json!([1, 2])).is_err());
        assert!(rule.check("position", &json!([1, 2, "z"])).is_err());
        assert!(rule.check("position", &json!("0,0,0")).is_err());
    }

    #[test]
    fn unit_interval_bounds() {
        let rule = rule_for("restitution");
        assert!(rule.check("restitution", &json!(0.0)).is_ok());
        assert!(rule.check("restitution", &json!(1.0)).is_ok());
        assert!(rule.check("restitution", &json!(1.5)).is_err());
        assert!(rule.check("restitution", &json!(-0.1)).is_err());
    }

    #[test]
    fn mass_must_be_strictly_positive() {
        let rule = rule_for("mass");
        assert!(rule.check("mass", &json!(0.001)).is_ok());
        assert!(rule.check("mass", &json!(0)).is_err());
        assert!(rule.check("mass", &json!(-1)).is_err());
    }

    #[test]
    fn valid_color_passes_unchanged_modulo_prefix() {
        let rule = rule_for("color");
        assert_eq!(
            rule.check("color", &json!("#ff8800")).unwrap(),
            json!("#ff8800")
        );
        assert_eq!(
            rule.check("color", &json!("ff8800")).unwrap(),
            json!("#ff8800")
        );
    }

    #[test]
    fn short_color_is_padded() {
        let rule = rule_for("color");
        assert_eq!(rule.check("color", &json!("#abc")).unwrap(), json!("#abc000"));
    }

    #[test]
    fn long_color_is_truncated() {
        let rule = rule_for("color");
        assert_eq!(
            rule.check("color", &json!("#ff8800aa")).unwrap(),
            json!("#ff8800")
        );
    }

    #[test]
    fn non_hex_color_is_rejected() {
        let rule = rule_for("color");
        assert!(rule.check("color", &json!("red")).is_err());
        assert!(rule.check("color", &json!(0xff8800)).is_err());
    }

    #[test]
    fn shape_type_enum_is_closed() {
        let rule = rule_for("type");
        assert!(rule.check("type", &json!("Sphere")).is_ok());
        assert!(rule.check("type", &json!("Dodecahedron")).is_err());
    }

    #[test]
    fn shape_tags_match_the_typed_enum() {
        let tags: Vec<&str> = orrery_core::BodyType::ALL
            .iter()
            .map(|t| t.as_str())
            .collect();
        assert_eq!(tags, SHAPE_TYPES);
    }

    #[test]
    fn unknown_fields_are_unchecked() {
        let rule = rule_for("glowIntensity");
        assert_eq!(rule, FieldRule::Unchecked);
        assert!(rule.check("glowIntensity", &json!({"weird": []})).is_ok());
    }
}
