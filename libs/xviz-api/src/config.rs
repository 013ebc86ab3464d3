use serde::{Deserialize, Serialize};

/// Text encoding of the inbound payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TextEncoding {
    #[default]
    #[serde(rename = "utf-8", alias = "utf8")]
    Utf8,
    #[serde(rename = "utf-16le", alias = "utf16le")]
    Utf16Le,
    #[serde(rename = "utf-16be", alias = "utf16be")]
    Utf16Be,
}

/// Legacy record shapes the normalizer can upgrade.
///
/// The current (canonical) shape is always accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LegacyShape {
    /// `{timestamp, points, colors?, normals?, ids?}`
    Flat,
    /// `{timestamp, primitives: {stream: [{type: "points3d", vertices, ...}]}}`
    Primitives,
}

impl LegacyShape {
    pub const ALL: [LegacyShape; 2] = [LegacyShape::Flat, LegacyShape::Primitives];

    pub fn name(self) -> &'static str {
        match self {
            LegacyShape::Flat => "flat",
            LegacyShape::Primitives => "primitives",
        }
    }
}

/// Parsing configuration. Built once, then shared read-only by every
/// worker (`Arc<ParserConfig>`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ParserConfig {
    pub encoding: TextEncoding,

    /// Legacy shapes recognized besides the canonical one.
    pub legacy_shapes: Vec<LegacyShape>,

    /// Streams whose point primitives feed the point cloud (`primitives`
    /// shape). Empty means every stream.
    pub point_cloud_streams: Vec<String>,

    /// Color components per point (3 = rgb, 4 = rgba). Used by strict mode.
    pub color_stride: u8,

    /// Enforce that the four point cloud arrays describe the same number of
    /// points. Off by default: lengths are independent.
    pub strict_point_counts: bool,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            encoding: TextEncoding::Utf8,
            legacy_shapes: LegacyShape::ALL.to_vec(),
            point_cloud_streams: Vec::new(),
            color_stride: 4,
            strict_point_counts: false,
        }
    }
}

impl ParserConfig {
    pub fn accepts(&self, shape: LegacyShape) -> bool {
        self.legacy_shapes.contains(&shape)
    }

    pub fn accepts_stream(&self, stream: &str) -> bool {
        self.point_cloud_streams.is_empty() || self.point_cloud_streams.iter().any(|s| s == stream)
    }

    /// Check values serde cannot express. Returns a human readable reason.
    pub fn validate(&self) -> Result<(), String> {
        if !matches!(self.color_stride, 3 | 4) {
            return Err(format!("color_stride must be 3 or 4, got {}", self.color_stride));
        }
        Ok(())
    }
}
