use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Container layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layout {
    #[default]
    Vertical,
    Horizontal,
}

/// Declarative UI element. Rendering happens elsewhere; this only
/// describes what a viewer should show next to the decoded records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UiNode {
    Panel {
        name: String,
        #[serde(default)]
        children: Vec<UiNode>,
    },
    Container {
        name: String,
        #[serde(default)]
        layout: Layout,
        #[serde(default)]
        children: Vec<UiNode>,
    },
    Metric {
        title: String,
        streams: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    Video {
        cameras: Vec<String>,
    },
}

impl UiNode {
    pub fn panel(name: impl Into<String>) -> Self {
        UiNode::Panel { name: name.into(), children: Vec::new() }
    }

    pub fn container(name: impl Into<String>, layout: Layout) -> Self {
        UiNode::Container { name: name.into(), layout, children: Vec::new() }
    }

    pub fn metric<S: Into<String>>(
        title: impl Into<String>,
        streams: impl IntoIterator<Item = S>,
    ) -> Self {
        UiNode::Metric {
            title: title.into(),
            streams: streams.into_iter().map(Into::into).collect(),
            description: None,
        }
    }

    pub fn video<S: Into<String>>(cameras: impl IntoIterator<Item = S>) -> Self {
        UiNode::Video { cameras: cameras.into_iter().map(Into::into).collect() }
    }

    /// Set the description of a metric. No-op on other nodes.
    pub fn describe(mut self, text: impl Into<String>) -> Self {
        if let UiNode::Metric { description, .. } = &mut self {
            *description = Some(text.into());
        }
        self
    }

    /// Append a child. Metrics and videos are leaves and ignore it.
    pub fn child(mut self, node: UiNode) -> Self {
        if let UiNode::Panel { children, .. } | UiNode::Container { children, .. } = &mut self {
            children.push(node);
        }
        self
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            UiNode::Panel { name, .. } | UiNode::Container { name, .. } => Some(name),
            UiNode::Metric { .. } | UiNode::Video { .. } => None,
        }
    }
}

/// Collects top-level panels into a `ui_config` object keyed by panel name.
#[derive(Debug, Clone, Default)]
pub struct UiBuilder {
    panels: Vec<UiNode>,
}

impl UiBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a top-level panel. A later panel with the same name replaces the
    /// earlier one. Anything other than a panel is ignored; wrap it in one.
    pub fn child(&mut self, panel: UiNode) -> &mut Self {
        let UiNode::Panel { name, .. } = &panel else {
            return self;
        };
        let existing = self.panels.iter().position(|p| p.name() == Some(name.as_str()));
        match existing {
            Some(idx) => self.panels[idx] = panel,
            None => self.panels.push(panel),
        }
        self
    }

    pub fn panels(&self) -> &[UiNode] {
        &self.panels
    }

    pub fn build(&self) -> Value {
        let mut out = Map::new();
        for panel in &self.panels {
            let name = panel.name().unwrap_or_default().to_string();
            out.insert(name, serde_json::to_value(panel).unwrap_or(Value::Null));
        }
        Value::Object(out)
    }
}

/// Capability: supplies additional metadata for a log.
///
/// Fleet- or vehicle-specific panels plug in here instead of subclassing a
/// reader.
pub trait MetadataProvider: Send + Sync {
    fn extend_ui(&self, ui: &mut UiBuilder);
}

/// Query every provider in order and return `{ "ui_config": ... }`.
pub fn compose_metadata(providers: &[Arc<dyn MetadataProvider>]) -> Value {
    let mut ui = UiBuilder::new();
    for provider in providers {
        provider.extend_ui(&mut ui);
    }
    let mut out = Map::new();
    out.insert("ui_config".into(), ui.build());
    Value::Object(out)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    struct VehicleMetrics;

    impl MetadataProvider for VehicleMetrics {
        fn extend_ui(&self, ui: &mut UiBuilder) {
            ui.child(
                UiNode::panel("Metrics").child(
                    UiNode::container("Metrics Panel", Layout::Vertical).child(
                        UiNode::metric("Velocity", ["/vehicle/velocity"])
                            .describe("The velocity of the vehicle"),
                    ),
                ),
            );
        }
    }

    struct FrontCamera;

    impl MetadataProvider for FrontCamera {
        fn extend_ui(&self, ui: &mut UiBuilder) {
            ui.child(UiNode::panel("Camera").child(UiNode::video(["/vehicle/camera/center_front"])));
        }
    }

    #[test]
    fn composes_panels_from_providers() {
        let providers: Vec<Arc<dyn MetadataProvider>> =
            vec![Arc::new(VehicleMetrics), Arc::new(FrontCamera)];
        let metadata = compose_metadata(&providers);

        assert_eq!(
            metadata["ui_config"]["Metrics"],
            json!({
                "type": "panel",
                "name": "Metrics",
                "children": [{
                    "type": "container",
                    "name": "Metrics Panel",
                    "layout": "vertical",
                    "children": [{
                        "type": "metric",
                        "title": "Velocity",
                        "streams": ["/vehicle/velocity"],
                        "description": "The velocity of the vehicle",
                    }],
                }],
            })
        );
        assert_eq!(
            metadata["ui_config"]["Camera"]["children"][0],
            json!({ "type": "video", "cameras": ["/vehicle/camera/center_front"] })
        );
    }

    #[test]
    fn same_panel_name_replaces() {
        let mut ui = UiBuilder::new();
        ui.child(UiNode::panel("Camera"));
        ui.child(UiNode::panel("Camera").child(UiNode::video(["/cam"])));
        assert_eq!(ui.panels().len(), 1);
    }

    #[test]
    fn leaves_ignore_children() {
        let video = UiNode::video(["/cam"]).child(UiNode::panel("nested"));
        assert_eq!(video, UiNode::video(["/cam"]));
    }

    #[test]
    fn top_level_accepts_only_panels() {
        let mut ui = UiBuilder::new();
        ui.child(UiNode::video(["/cam/front"]));
        ui.child(UiNode::metric("Speed", ["/vehicle/speed"]));
        ui.child(UiNode::container("Loose", Layout::Horizontal));
        ui.child(UiNode::panel("Camera"));
        assert_eq!(ui.panels(), &[UiNode::panel("Camera")]);
        assert_eq!(ui.build().as_object().map(|o| o.len()), Some(1));
    }
}
