use xviz_engine::config::{ConfigParser, EngineConfig};
use xviz_engine::error::EngineError;

/// Reads engine configuration written in HCL.
pub struct HclParser;

impl ConfigParser for HclParser {
    fn extensions(&self) -> &[&str] {
        &["hcl"]
    }

    fn parse(&self, content: &str) -> Result<EngineConfig, EngineError> {
        hcl::from_str(content).map_err(|e| EngineError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use xviz_api::{LegacyShape, TextEncoding, UiNode};
    use xviz_engine::config::TomlParser;

    use super::*;

    const SAMPLE: &str = r#"
parser {
  encoding      = "utf-16be"
  legacy_shapes = ["primitives"]
  color_stride  = 3
}

pool {
  max_in_flight = 2
}

ui = [
  {
    type     = "panel"
    name     = "Camera"
    children = [
      { type = "video", cameras = ["/vehicle/camera/center_front"] }
    ]
  }
]
"#;

    #[test]
    fn parses_blocks_and_panels() {
        let config = HclParser.parse(SAMPLE).unwrap();
        config.validate().unwrap();
        assert_eq!(config.parser.encoding, TextEncoding::Utf16Be);
        assert_eq!(config.parser.legacy_shapes, vec![LegacyShape::Primitives]);
        assert_eq!(config.parser.color_stride, 3);
        assert_eq!(config.pool.max_in_flight, 2);
        assert_eq!(
            config.ui,
            vec![UiNode::panel("Camera").child(UiNode::video(["/vehicle/camera/center_front"]))]
        );
    }

    #[test]
    fn syntax_errors_are_config_errors() {
        let err = HclParser.parse("parser {").unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[test]
    fn loads_by_extension_next_to_toml() {
        let mut file = tempfile::Builder::new().suffix(".hcl").tempfile().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let config = EngineConfig::load_with(&path, &[&TomlParser, &HclParser]).unwrap();
        assert_eq!(config.pool.max_in_flight, 2);

        let err = EngineConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains("no parser"), "{err}");
    }
}
