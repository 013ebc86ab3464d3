use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Map, Value, json};

use crate::block::{Block, ElementKind};

/// Decoded message: the top-level record collection, still untyped.
///
/// The schema version is never stored. The normalizer infers it per
/// element.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub elements: Vec<Value>,
}

impl Envelope {
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}

/// One of the four parallel arrays of a point cloud.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PointCloudField {
    Ids,
    Colors,
    Normals,
    Positions,
}

impl PointCloudField {
    /// Manifest order.
    pub const ALL: [PointCloudField; 4] = [
        PointCloudField::Ids,
        PointCloudField::Colors,
        PointCloudField::Normals,
        PointCloudField::Positions,
    ];

    /// Canonical wire name.
    pub fn name(self) -> &'static str {
        match self {
            PointCloudField::Ids => "ids",
            PointCloudField::Colors => "colors",
            PointCloudField::Normals => "normals",
            PointCloudField::Positions => "positions",
        }
    }

    pub fn element_kind(self) -> ElementKind {
        match self {
            PointCloudField::Ids => ElementKind::U32,
            PointCloudField::Colors => ElementKind::U8,
            PointCloudField::Normals | PointCloudField::Positions => ElementKind::F32,
        }
    }
}

impl fmt::Display for PointCloudField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Four independently sized binary arrays describing one point sample set.
///
/// Array lengths are not required to agree; strict parsing can enforce it.
#[derive(Debug, Clone, PartialEq)]
pub struct PointCloud {
    pub ids: Block,
    pub colors: Block,
    pub normals: Block,
    pub positions: Block,
}

impl PointCloud {
    pub fn field(&self, field: PointCloudField) -> &Block {
        match field {
            PointCloudField::Ids => &self.ids,
            PointCloudField::Colors => &self.colors,
            PointCloudField::Normals => &self.normals,
            PointCloudField::Positions => &self.positions,
        }
    }

    /// Blocks in manifest order.
    pub fn blocks(&self) -> impl Iterator<Item = (PointCloudField, &Block)> {
        PointCloudField::ALL.into_iter().map(move |f| (f, self.field(f)))
    }

    /// Number of points, derived from `positions` (xyz triples).
    pub fn point_count(&self) -> usize {
        self.positions.len() / 3
    }

    pub fn byte_len(&self) -> usize {
        self.blocks().map(|(_, b)| b.byte_len()).sum()
    }
}

/// One frame of the canonical schema.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Caller-defined unit; monotonicity is not enforced.
    pub time: f64,
    pub point_cloud: Option<PointCloud>,
}

impl Record {
    /// Render in the canonical wire shape. Normalizing the result yields an
    /// identical record.
    pub fn to_value(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("time".into(), json!(self.time));
        if let Some(cloud) = &self.point_cloud {
            let mut pc = Map::new();
            for (field, block) in cloud.blocks() {
                pc.insert(field.name().into(), block_to_value(block));
            }
            obj.insert("pointCloud".into(), Value::Object(pc));
        }
        Value::Object(obj)
    }
}

fn block_to_value(block: &Block) -> Value {
    match block.kind() {
        ElementKind::U8 => Value::Array(block.as_bytes().iter().map(|v| json!(v)).collect()),
        ElementKind::U32 => Value::Array(block.to_u32_vec().into_iter().map(|v| json!(v)).collect()),
        ElementKind::F32 => {
            let values = block.to_f32_vec();
            // JSON numbers cannot carry inf or NaN; keep the raw bytes instead.
            if values.iter().all(|v| v.is_finite()) {
                Value::Array(values.into_iter().map(|v| json!(v as f64)).collect())
            } else {
                Value::String(STANDARD.encode(block.as_bytes()))
            }
        }
    }
}
