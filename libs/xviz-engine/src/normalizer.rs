use std::borrow::Cow;
use std::sync::Arc;

use base64::Engine;
use serde_json::{Map, Value};

use xviz_api::{
    Block, DecodeError, ElementKind, Envelope, LegacyShape, ParserConfig, PointCloud,
    PointCloudField, Record,
};

use crate::decoder::json_type;

/// Record shape detected by structural probes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Canonical,
    Legacy(LegacyShape),
}

// ---------------------------------------------------------------------------
// Field-remapping rules: the only place that knows about format drift
// ---------------------------------------------------------------------------

/// Where a shape keeps its time and its four arrays.
struct ShapeRules {
    time: &'static str,
    /// Wire name per canonical field, in `PointCloudField::ALL` order.
    arrays: [(PointCloudField, &'static str); 4],
}

const CANONICAL: ShapeRules = ShapeRules {
    time: "time",
    arrays: [
        (PointCloudField::Ids, "ids"),
        (PointCloudField::Colors, "colors"),
        (PointCloudField::Normals, "normals"),
        (PointCloudField::Positions, "positions"),
    ],
};

const FLAT: ShapeRules = ShapeRules {
    time: "timestamp",
    arrays: [
        (PointCloudField::Ids, "ids"),
        (PointCloudField::Colors, "colors"),
        (PointCloudField::Normals, "normals"),
        (PointCloudField::Positions, "points"),
    ],
};

const PRIMITIVE: ShapeRules = ShapeRules {
    time: "timestamp",
    arrays: [
        (PointCloudField::Ids, "ids"),
        (PointCloudField::Colors, "colors"),
        (PointCloudField::Normals, "normals"),
        (PointCloudField::Positions, "vertices"),
    ],
};

const CANONICAL_CLOUD_KEY: &str = "pointCloud";
const PRIMITIVES_KEY: &str = "primitives";
const POINT_PRIMITIVE_TYPES: [&str; 2] = ["points3d", "point"];

/// Upgrades every element of an envelope to the canonical `Record`.
///
/// Shapes are told apart by the fields they carry; legacy payloads have no
/// version number to look at.
#[derive(Debug, Clone)]
pub struct Normalizer {
    config: Arc<ParserConfig>,
}

impl Normalizer {
    pub fn new(config: Arc<ParserConfig>) -> Self {
        Self { config }
    }

    pub fn normalize(&self, envelope: &Envelope) -> Result<Vec<Record>, DecodeError> {
        envelope
            .elements
            .iter()
            .enumerate()
            .map(|(i, element)| {
                self.normalize_element(element)
                    .map_err(|e| e.with_context(format!("record {i}")))
            })
            .collect()
    }

    /// Detect the shape of one element, honoring the enabled legacy shapes.
    pub fn probe(&self, element: &Value) -> Result<Shape, DecodeError> {
        let obj = element.as_object().ok_or_else(|| {
            DecodeError::unrecognized(format!("record must be an object, got {}", json_type(element)))
        })?;

        let shape = match (obj.contains_key(CANONICAL.time), obj.contains_key(FLAT.time)) {
            (true, false) => Shape::Canonical,
            (false, true) if obj.contains_key(CANONICAL_CLOUD_KEY) => {
                return Err(DecodeError::unrecognized(
                    "legacy timestamp mixed with canonical pointCloud",
                ));
            }
            (false, true) if obj.contains_key(PRIMITIVES_KEY) => Shape::Legacy(LegacyShape::Primitives),
            (false, true) => Shape::Legacy(LegacyShape::Flat),
            (true, true) => {
                return Err(DecodeError::unrecognized("record carries both time and timestamp"));
            }
            (false, false) => {
                return Err(DecodeError::unrecognized("record has neither time nor timestamp"));
            }
        };

        if let Shape::Legacy(legacy) = shape {
            if !self.config.accepts(legacy) {
                return Err(DecodeError::unrecognized(format!(
                    "legacy shape '{}' is disabled",
                    legacy.name()
                )));
            }
        }
        Ok(shape)
    }

    /// Upgrade one element to canonical JSON. Canonical input comes back
    /// borrowed and untouched.
    pub fn upgrade<'a>(&self, element: &'a Value) -> Result<Cow<'a, Value>, DecodeError> {
        let record = self.normalize_element(element)?;
        match self.probe(element)? {
            Shape::Canonical => Ok(Cow::Borrowed(element)),
            Shape::Legacy(_) => Ok(Cow::Owned(record.to_value())),
        }
    }

    pub fn normalize_element(&self, element: &Value) -> Result<Record, DecodeError> {
        let shape = self.probe(element)?;
        // probe() guarantees an object.
        let obj = element.as_object().ok_or_else(|| DecodeError::unrecognized("record must be an object"))?;

        let record = match shape {
            Shape::Canonical => Record {
                time: read_time(obj, &CANONICAL)?,
                point_cloud: canonical_cloud(obj)?,
            },
            Shape::Legacy(LegacyShape::Flat) => Record {
                time: read_time(obj, &FLAT)?,
                point_cloud: flat_cloud(obj)?,
            },
            Shape::Legacy(LegacyShape::Primitives) => Record {
                time: read_time(obj, &PRIMITIVE)?,
                point_cloud: self.primitives_cloud(obj)?,
            },
        };

        if self.config.strict_point_counts {
            if let Some(cloud) = &record.point_cloud {
                check_point_counts(cloud, self.config.color_stride as usize)?;
            }
        }
        Ok(record)
    }

    /// Concatenate every point primitive of the accepted streams, in stream
    /// name order then primitive order.
    fn primitives_cloud(&self, obj: &Map<String, Value>) -> Result<Option<PointCloud>, DecodeError> {
        let streams = obj
            .get(PRIMITIVES_KEY)
            .and_then(Value::as_object)
            .ok_or_else(|| DecodeError::unrecognized("primitives must be an object"))?;

        let mut arrays = ArrayBuffers::default();
        let mut found = false;

        for (stream, primitives) in streams {
            if !self.config.accepts_stream(stream) {
                continue;
            }
            let primitives = primitives.as_array().ok_or_else(|| {
                DecodeError::unrecognized(format!("stream '{stream}': primitives must be an array"))
            })?;
            for (idx, primitive) in primitives.iter().enumerate() {
                let is_point = primitive
                    .get("type")
                    .and_then(Value::as_str)
                    .is_some_and(|t| POINT_PRIMITIVE_TYPES.contains(&t));
                if !is_point {
                    continue;
                }
                let primitive = primitive.as_object().ok_or_else(|| {
                    DecodeError::unrecognized(format!("stream '{stream}' primitive {idx}: not an object"))
                })?;
                arrays
                    .append(primitive, &PRIMITIVE)
                    .map_err(|e| e.with_context(format!("stream '{stream}' primitive {idx}")))?;
                found = true;
            }
        }

        if !found {
            return Ok(None);
        }
        arrays.into_cloud().map(Some)
    }
}

fn read_time(obj: &Map<String, Value>, rules: &ShapeRules) -> Result<f64, DecodeError> {
    obj.get(rules.time).and_then(Value::as_f64).ok_or_else(|| {
        DecodeError::unrecognized(format!("{} must be a number", rules.time))
    })
}

fn canonical_cloud(obj: &Map<String, Value>) -> Result<Option<PointCloud>, DecodeError> {
    let cloud = match obj.get(CANONICAL_CLOUD_KEY) {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Object(cloud)) => cloud,
        Some(other) => {
            return Err(DecodeError::unrecognized(format!(
                "pointCloud must be an object, got {}",
                json_type(other)
            )));
        }
    };

    let mut arrays = ArrayBuffers::default();
    for (field, key) in CANONICAL.arrays {
        let value = cloud
            .get(key)
            .ok_or_else(|| DecodeError::unrecognized(format!("pointCloud is missing {key}")))?;
        arrays.push(field, value).map_err(|e| e.with_context(format!("pointCloud.{key}")))?;
    }
    arrays.into_cloud().map(Some)
}

fn flat_cloud(obj: &Map<String, Value>) -> Result<Option<PointCloud>, DecodeError> {
    if !FLAT.arrays.iter().any(|(_, key)| obj.contains_key(*key)) {
        return Ok(None);
    }
    let mut arrays = ArrayBuffers::default();
    arrays.append(obj, &FLAT)?;
    arrays.into_cloud().map(Some)
}

// ---------------------------------------------------------------------------
// Array parsing: JSON numbers or base64 → little-endian bytes
// ---------------------------------------------------------------------------

/// Raw bytes per canonical field, collected before they become blocks.
#[derive(Default)]
struct ArrayBuffers {
    ids: Vec<u8>,
    colors: Vec<u8>,
    normals: Vec<u8>,
    positions: Vec<u8>,
}

impl ArrayBuffers {
    fn buffer(&mut self, field: PointCloudField) -> &mut Vec<u8> {
        match field {
            PointCloudField::Ids => &mut self.ids,
            PointCloudField::Colors => &mut self.colors,
            PointCloudField::Normals => &mut self.normals,
            PointCloudField::Positions => &mut self.positions,
        }
    }

    fn push(&mut self, field: PointCloudField, value: &Value) -> Result<(), DecodeError> {
        append_array(field.element_kind(), value, self.buffer(field))
    }

    /// Append every array the rules name; absent keys contribute nothing.
    fn append(&mut self, obj: &Map<String, Value>, rules: &ShapeRules) -> Result<(), DecodeError> {
        for (field, key) in rules.arrays {
            if let Some(value) = obj.get(key) {
                self.push(field, value).map_err(|e| e.with_context(key))?;
            }
        }
        Ok(())
    }

    fn into_cloud(self) -> Result<PointCloud, DecodeError> {
        Ok(PointCloud {
            ids: Block::from_bytes(ElementKind::U32, self.ids)?,
            colors: Block::from_bytes(ElementKind::U8, self.colors)?,
            normals: Block::from_bytes(ElementKind::F32, self.normals)?,
            positions: Block::from_bytes(ElementKind::F32, self.positions)?,
        })
    }
}

fn append_array(kind: ElementKind, value: &Value, out: &mut Vec<u8>) -> Result<(), DecodeError> {
    match value {
        Value::String(encoded) => {
            let bytes = base64::engine::general_purpose::STANDARD.decode(encoded)?;
            if bytes.len() % kind.width() != 0 {
                return Err(DecodeError::unrecognized(format!(
                    "{} bytes is not a whole number of {kind} elements",
                    bytes.len()
                )));
            }
            out.extend_from_slice(&bytes);
            Ok(())
        }
        Value::Array(items) => {
            out.reserve(items.len() * kind.width());
            for item in items {
                match item {
                    // One level of nesting: [[x, y, z], ...]
                    Value::Array(inner) => {
                        for v in inner {
                            append_number(kind, v, out)?;
                        }
                    }
                    v => append_number(kind, v, out)?,
                }
            }
            Ok(())
        }
        other => Err(DecodeError::unrecognized(format!(
            "expected a number array or base64 string, got {}",
            json_type(other)
        ))),
    }
}

fn append_number(kind: ElementKind, value: &Value, out: &mut Vec<u8>) -> Result<(), DecodeError> {
    match kind {
        ElementKind::U8 => {
            let v = as_integer(value)
                .filter(|v| *v <= u8::MAX as u64)
                .ok_or_else(|| out_of_range(kind, value))?;
            out.push(v as u8);
        }
        ElementKind::U32 => {
            let v = as_integer(value)
                .filter(|v| *v <= u32::MAX as u64)
                .ok_or_else(|| out_of_range(kind, value))?;
            out.extend_from_slice(&(v as u32).to_le_bytes());
        }
        ElementKind::F32 => {
            let v = value
                .as_f64()
                .map(|v| v as f32)
                .filter(|v| v.is_finite())
                .ok_or_else(|| out_of_range(kind, value))?;
            out.extend_from_slice(&v.to_le_bytes());
        }
    }
    Ok(())
}

/// Non-negative integer, also accepting integral floats such as `255.0`.
fn as_integer(value: &Value) -> Option<u64> {
    value.as_u64().or_else(|| {
        value
            .as_f64()
            .filter(|f| f.fract() == 0.0 && *f >= 0.0 && *f <= u32::MAX as f64)
            .map(|f| f as u64)
    })
}

fn out_of_range(kind: ElementKind, value: &Value) -> DecodeError {
    DecodeError::unrecognized(format!("{value} is not a valid {kind} element"))
}

/// Parallel-array check: with `n = positions / 3`, ids hold `n`, normals
/// `3n` and colors `stride * n` elements. Empty arrays always pass.
fn check_point_counts(cloud: &PointCloud, color_stride: usize) -> Result<(), DecodeError> {
    if cloud.positions.len() % 3 != 0 {
        return Err(DecodeError::unrecognized(format!(
            "positions hold {} values, not whole xyz triples",
            cloud.positions.len()
        )));
    }
    let n = cloud.point_count();
    let expected = [
        (PointCloudField::Ids, n),
        (PointCloudField::Colors, n * color_stride),
        (PointCloudField::Normals, n * 3),
    ];
    for (field, want) in expected {
        let got = cloud.field(field).len();
        if got != 0 && got != want {
            return Err(DecodeError::unrecognized(format!(
                "{field} hold {got} values, {n} points need {want}"
            )));
        }
    }
    Ok(())
}
