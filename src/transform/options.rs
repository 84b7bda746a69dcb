//! Typed transform options.
//!
//! Every recognized query parameter has one entry in [`SCHEMA`] that parses,
//! validates and stores it. Parsing is eager: a bad value fails the request
//! before any pixel work. Names absent from the schema are ignored since they
//! belong to other layers (`key`, `sign`, `jwt`, `dest`, `file`, `url`).

use serde::Deserialize;
use serde_json::Value;

use super::{Operation, OutputFormat, TransformError};
use crate::constants::MAX_PIPELINE_STEPS;
use crate::query::QueryPairs;

/// Largest width or height accepted for any target dimension
pub const MAX_DIMENSION: u32 = 16_384;

/// Largest pixel count of any intermediate or output image
pub const MAX_PIXELS: u64 = 8_192 * 8_192;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Gravity {
    #[default]
    Centre,
    North,
    South,
    East,
    West,
    Smart,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Colorspace {
    #[default]
    Srgb,
    BlackAndWhite,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImageOptions {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub area_width: Option<u32>,
    pub area_height: Option<u32>,
    pub top: Option<u32>,
    pub left: Option<u32>,
    pub quality: Option<u8>,
    pub rotate: Option<u16>,
    pub factor: Option<u32>,
    pub sigma: Option<f32>,
    pub min_ampl: Option<f32>,
    pub force: bool,
    pub no_crop: bool,
    pub gravity: Gravity,
    pub colorspace: Colorspace,
    /// Raw `type` value: a format name or `auto`
    pub type_name: Option<String>,
    /// Output encoding after content negotiation; `None` keeps the input format
    pub output: Option<OutputFormat>,
    pub text: Option<String>,
    pub font: Option<String>,
    pub color: Option<[u8; 3]>,
    pub opacity: Option<f32>,
    pub text_width: Option<u32>,
    pub image: Option<String>,
    pub operations: Vec<PipelineStep>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineStep {
    pub operation: Operation,
    pub ignore_failure: bool,
    pub options: ImageOptions,
}

type Apply = fn(&mut ImageOptions, &str) -> Result<(), String>;

pub struct ParamSpec {
    pub name: &'static str,
    apply: Apply,
}

pub const SCHEMA: &[ParamSpec] = &[
    ParamSpec { name: "width", apply: |o, v| set(&mut o.width, dimension(v)?) },
    ParamSpec { name: "height", apply: |o, v| set(&mut o.height, dimension(v)?) },
    ParamSpec { name: "areawidth", apply: |o, v| set(&mut o.area_width, dimension(v)?) },
    ParamSpec { name: "areaheight", apply: |o, v| set(&mut o.area_height, dimension(v)?) },
    ParamSpec { name: "top", apply: |o, v| set(&mut o.top, offset(v)?) },
    ParamSpec { name: "left", apply: |o, v| set(&mut o.left, offset(v)?) },
    ParamSpec { name: "quality", apply: |o, v| set(&mut o.quality, quality(v)?) },
    ParamSpec { name: "rotate", apply: |o, v| set(&mut o.rotate, rotation(v)?) },
    ParamSpec { name: "factor", apply: |o, v| set(&mut o.factor, factor(v)?) },
    ParamSpec { name: "sigma", apply: |o, v| set(&mut o.sigma, non_negative(v)?) },
    ParamSpec { name: "minampl", apply: |o, v| set(&mut o.min_ampl, non_negative(v)?) },
    ParamSpec { name: "force", apply: |o, v| { o.force = boolean(v)?; Ok(()) } },
    ParamSpec { name: "nocrop", apply: |o, v| { o.no_crop = boolean(v)?; Ok(()) } },
    ParamSpec { name: "gravity", apply: |o, v| { o.gravity = gravity(v)?; Ok(()) } },
    ParamSpec { name: "colorspace", apply: |o, v| { o.colorspace = colorspace(v)?; Ok(()) } },
    ParamSpec { name: "type", apply: |o, v| set(&mut o.type_name, v.to_ascii_lowercase()) },
    ParamSpec { name: "text", apply: |o, v| set(&mut o.text, v.to_string()) },
    ParamSpec { name: "font", apply: |o, v| set(&mut o.font, v.to_string()) },
    ParamSpec { name: "color", apply: |o, v| set(&mut o.color, color(v)?) },
    ParamSpec { name: "opacity", apply: |o, v| set(&mut o.opacity, opacity(v)?) },
    ParamSpec { name: "textwidth", apply: |o, v| set(&mut o.text_width, dimension(v)?) },
    ParamSpec { name: "image", apply: |o, v| set(&mut o.image, v.to_string()) },
    ParamSpec { name: "operations", apply: |o, v| { o.operations = pipeline(v)?; Ok(()) } },
];

impl ImageOptions {
    pub fn from_query(query: &QueryPairs) -> Result<Self, TransformError> {
        Self::from_lookup(|name| query.get_non_empty(name).map(str::to_string))
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, TransformError> {
        let mut options = ImageOptions::default();
        for spec in SCHEMA {
            if let Some(value) = lookup(spec.name) {
                (spec.apply)(&mut options, &value).map_err(|reason| {
                    TransformError::InvalidParam {
                        name: spec.name,
                        reason,
                    }
                })?;
            }
        }
        Ok(options)
    }

    /// Output format requested explicitly by name; `auto` yields `None`.
    pub fn explicit_output(&self) -> Result<Option<OutputFormat>, TransformError> {
        match self.type_name.as_deref() {
            None | Some("auto") => Ok(None),
            Some(name) => OutputFormat::from_name(name).map(Some).ok_or_else(|| {
                TransformError::InvalidParam {
                    name: "type",
                    reason: format!("unsupported output format {name:?}"),
                }
            }),
        }
    }
}

fn set<T>(slot: &mut Option<T>, value: T) -> Result<(), String> {
    *slot = Some(value);
    Ok(())
}

fn integer(v: &str) -> Result<u32, String> {
    v.trim()
        .parse::<u32>()
        .map_err(|_| format!("expected a non-negative integer, got {v:?}"))
}

fn dimension(v: &str) -> Result<u32, String> {
    match integer(v)? {
        0 => Err("must be greater than zero".to_string()),
        n if n > MAX_DIMENSION => Err(format!("must not exceed {MAX_DIMENSION}")),
        n => Ok(n),
    }
}

fn offset(v: &str) -> Result<u32, String> {
    match integer(v)? {
        n if n > MAX_DIMENSION => Err(format!("must not exceed {MAX_DIMENSION}")),
        n => Ok(n),
    }
}

fn quality(v: &str) -> Result<u8, String> {
    match integer(v)? {
        n @ 1..=100 => Ok(n as u8),
        _ => Err("must be between 1 and 100".to_string()),
    }
}

fn rotation(v: &str) -> Result<u16, String> {
    match integer(v)? {
        n @ (0 | 90 | 180 | 270) => Ok(n as u16),
        _ => Err("must be one of 0, 90, 180, 270".to_string()),
    }
}

fn factor(v: &str) -> Result<u32, String> {
    match integer(v)? {
        n @ 1..=16 => Ok(n),
        _ => Err("must be between 1 and 16".to_string()),
    }
}

fn float(v: &str) -> Result<f32, String> {
    v.trim()
        .parse::<f32>()
        .ok()
        .filter(|f| f.is_finite())
        .ok_or_else(|| format!("expected a number, got {v:?}"))
}

fn non_negative(v: &str) -> Result<f32, String> {
    match float(v)? {
        f if f < 0.0 => Err("must not be negative".to_string()),
        f => Ok(f),
    }
}

fn opacity(v: &str) -> Result<f32, String> {
    match float(v)? {
        f if (0.0..=1.0).contains(&f) => Ok(f),
        _ => Err("must be between 0 and 1".to_string()),
    }
}

fn boolean(v: &str) -> Result<bool, String> {
    match v.trim().to_ascii_lowercase().as_str() {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        _ => Err(format!("expected a boolean, got {v:?}")),
    }
}

fn gravity(v: &str) -> Result<Gravity, String> {
    match v.trim().to_ascii_lowercase().as_str() {
        "centre" | "center" => Ok(Gravity::Centre),
        "north" => Ok(Gravity::North),
        "south" => Ok(Gravity::South),
        "east" => Ok(Gravity::East),
        "west" => Ok(Gravity::West),
        "smart" => Ok(Gravity::Smart),
        _ => Err(format!("unknown gravity {v:?}")),
    }
}

fn colorspace(v: &str) -> Result<Colorspace, String> {
    match v.trim().to_ascii_lowercase().as_str() {
        "srgb" => Ok(Colorspace::Srgb),
        "bw" => Ok(Colorspace::BlackAndWhite),
        _ => Err(format!("unknown colorspace {v:?}")),
    }
}

fn color(v: &str) -> Result<[u8; 3], String> {
    let parts: Vec<&str> = v.split(',').map(str::trim).collect();
    let &[r, g, b] = parts.as_slice() else {
        return Err("expected r,g,b".to_string());
    };
    let channel = |c: &str| c.parse::<u8>().map_err(|_| format!("invalid color channel {c:?}"));
    Ok([channel(r)?, channel(g)?, channel(b)?])
}

#[derive(Deserialize)]
struct RawStep {
    operation: String,
    #[serde(default, rename = "ignore_failure")]
    ignore_failure: bool,
    #[serde(default)]
    params: serde_json::Map<String, Value>,
}

fn pipeline(v: &str) -> Result<Vec<PipelineStep>, String> {
    let raw: Vec<RawStep> =
        serde_json::from_str(v).map_err(|e| format!("invalid pipeline JSON: {e}"))?;

    if raw.is_empty() {
        return Err("pipeline has no operations".to_string());
    }
    if raw.len() > MAX_PIPELINE_STEPS {
        return Err(format!(
            "pipeline accepts at most {MAX_PIPELINE_STEPS} operations"
        ));
    }

    raw.into_iter()
        .map(|step| {
            let operation = Operation::from_name(&step.operation)
                .filter(|op| !matches!(op, Operation::Pipeline | Operation::Info))
                .ok_or_else(|| format!("unsupported pipeline operation {:?}", step.operation))?;

            let options = ImageOptions::from_lookup(|name| {
                step.params.get(name).and_then(|value| match value {
                    Value::String(s) if !s.is_empty() => Some(s.clone()),
                    Value::Number(n) => Some(n.to_string()),
                    Value::Bool(b) => Some(b.to_string()),
                    _ => None,
                })
            })
            .map_err(|e| format!("{}: {e}", step.operation))?;

            if !options.operations.is_empty() {
                return Err("nested pipelines are not supported".to_string());
            }

            Ok(PipelineStep {
                operation,
                ignore_failure: step.ignore_failure,
                options,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> Result<ImageOptions, TransformError> {
        ImageOptions::from_query(&QueryPairs::parse(Some(raw)))
    }

    #[test]
    fn test_typed_values_are_parsed() {
        let options =
            parse("width=300&height=200&quality=95&force=true&gravity=north&colorspace=bw&type=JPEG")
                .unwrap();
        assert_eq!(options.width, Some(300));
        assert_eq!(options.height, Some(200));
        assert_eq!(options.quality, Some(95));
        assert!(options.force);
        assert_eq!(options.gravity, Gravity::North);
        assert_eq!(options.colorspace, Colorspace::BlackAndWhite);
        assert_eq!(options.type_name.as_deref(), Some("jpeg"));
    }

    #[test]
    fn test_unknown_and_empty_params_are_ignored() {
        let options = parse("key=abc&sign=xyz&dest=photos&width=").unwrap();
        assert_eq!(options, ImageOptions::default());
    }

    #[test]
    fn test_invalid_values_fail_eagerly() {
        for raw in [
            "width=abc",
            "width=0",
            "height=-5",
            "quality=0",
            "quality=101",
            "rotate=45",
            "factor=0",
            "force=maybe",
            "gravity=up",
            "opacity=2",
            "color=1,2",
            "sigma=-1",
        ] {
            assert!(
                matches!(parse(raw), Err(TransformError::InvalidParam { .. })),
                "{raw} should be rejected"
            );
        }
    }

    #[test]
    fn test_color_is_parsed() {
        let options = parse("color=255,200,50").unwrap();
        assert_eq!(options.color, Some([255, 200, 50]));
    }

    #[test]
    fn test_explicit_output() {
        assert_eq!(parse("type=png").unwrap().explicit_output().unwrap(), Some(OutputFormat::Png));
        assert_eq!(parse("type=auto").unwrap().explicit_output().unwrap(), None);
        assert_eq!(parse("").unwrap().explicit_output().unwrap(), None);
        assert!(parse("type=pdf").unwrap().explicit_output().is_err());
    }

    #[test]
    fn test_pipeline_steps_are_typed() {
        let ops = r#"[{"operation":"crop","params":{"width":300,"height":260}},{"operation":"convert","params":{"type":"webp"}}]"#;
        let query = QueryPairs::from_pairs([("operations", ops)]);
        let options = ImageOptions::from_query(&query).unwrap();

        assert_eq!(options.operations.len(), 2);
        assert_eq!(options.operations[0].operation, Operation::Crop);
        assert_eq!(options.operations[0].options.width, Some(300));
        assert_eq!(options.operations[0].options.height, Some(260));
        assert_eq!(options.operations[1].operation, Operation::Convert);
        assert_eq!(options.operations[1].options.type_name.as_deref(), Some("webp"));
    }

    #[test]
    fn test_pipeline_rejects_bad_steps() {
        for ops in [
            "not json",
            "[]",
            r#"[{"operation":"explode"}]"#,
            r#"[{"operation":"pipeline"}]"#,
            r#"[{"operation":"resize","params":{"width":"wide"}}]"#,
        ] {
            let query = QueryPairs::from_pairs([("operations", ops)]);
            assert!(ImageOptions::from_query(&query).is_err(), "{ops} should be rejected");
        }

        let too_many = format!("[{}]", vec![r#"{"operation":"flip"}"#; 11].join(","));
        let query = QueryPairs::from_pairs([("operations", too_many)]);
        assert!(ImageOptions::from_query(&query).is_err());
    }
}
