//! Component data model and its persisted wire format
//!
//! A component serializes as `{ "id", "type", "props", "children", "order" }`.
//! That shape is shared with the editor client and the persistence layer.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Reserved identifier naming the synthetic page root in mutation payloads.
pub const ROOT_ID: &str = "root";

/// Identifier of a component, unique within its page tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ComponentId(String);

impl ComponentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random identifier.
    pub fn generate() -> Self {
        Self(format!("c-{}", Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this id names the synthetic page root.
    pub fn is_root(&self) -> bool {
        self.0 == ROOT_ID
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ComponentId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ComponentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Type tag of a component.
///
/// The known kinds have dedicated templates in the renderer. Any other tag is
/// preserved as `Other` so content written by a newer editor survives a
/// round trip through this service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ComponentKind {
    Text,
    Heading,
    Image,
    Container,
    Section,
    Columns,
    Form,
    Input,
    Button,
    Link,
    Divider,
    Other(String),
}

impl ComponentKind {
    pub fn as_str(&self) -> &str {
        match self {
            ComponentKind::Text => "text",
            ComponentKind::Heading => "heading",
            ComponentKind::Image => "image",
            ComponentKind::Container => "container",
            ComponentKind::Section => "section",
            ComponentKind::Columns => "columns",
            ComponentKind::Form => "form",
            ComponentKind::Input => "input",
            ComponentKind::Button => "button",
            ComponentKind::Link => "link",
            ComponentKind::Divider => "divider",
            ComponentKind::Other(tag) => tag,
        }
    }
}

impl From<String> for ComponentKind {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "text" => ComponentKind::Text,
            "heading" => ComponentKind::Heading,
            "image" => ComponentKind::Image,
            "container" => ComponentKind::Container,
            "section" => ComponentKind::Section,
            "columns" => ComponentKind::Columns,
            "form" => ComponentKind::Form,
            "input" => ComponentKind::Input,
            "button" => ComponentKind::Button,
            "link" => ComponentKind::Link,
            "divider" => ComponentKind::Divider,
            _ => ComponentKind::Other(tag),
        }
    }
}

impl From<&str> for ComponentKind {
    fn from(tag: &str) -> Self {
        ComponentKind::from(tag.to_string())
    }
}

impl From<ComponentKind> for String {
    fn from(kind: ComponentKind) -> Self {
        match kind {
            ComponentKind::Other(tag) => tag,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A component property value.
///
/// Variant order matters for untagged deserialization: JSON booleans and
/// numbers must be tried before strings, and integers before floats so that
/// `1` stays `1` and large ids keep every digit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropValue {
    Bool(bool),
    Integer(i64),
    Number(f64),
    Text(String),
    List(Vec<PropValue>),
    Map(BTreeMap<String, PropValue>),
}

impl PropValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PropValue::Integer(n) => Some(*n as f64),
            PropValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Integer value, also for floats without a fractional part.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PropValue::Integer(n) => Some(*n),
            PropValue::Number(n) if n.fract() == 0.0 && n.abs() < i64::MAX as f64 => {
                Some(*n as i64)
            }
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, PropValue>> {
        match self {
            PropValue::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Scalar rendering used for text content and attribute values.
    /// Structured values have no scalar form.
    pub fn to_scalar_string(&self) -> Option<String> {
        match self {
            PropValue::Bool(b) => Some(b.to_string()),
            PropValue::Integer(n) => Some(n.to_string()),
            PropValue::Number(n) => Some(n.to_string()),
            PropValue::Text(s) => Some(s.clone()),
            PropValue::List(_) | PropValue::Map(_) => None,
        }
    }
}

impl From<&str> for PropValue {
    fn from(s: &str) -> Self {
        PropValue::Text(s.to_string())
    }
}

impl From<String> for PropValue {
    fn from(s: String) -> Self {
        PropValue::Text(s)
    }
}

impl From<f64> for PropValue {
    fn from(n: f64) -> Self {
        PropValue::Number(n)
    }
}

impl From<i64> for PropValue {
    fn from(n: i64) -> Self {
        PropValue::Integer(n)
    }
}

impl From<bool> for PropValue {
    fn from(b: bool) -> Self {
        PropValue::Bool(b)
    }
}

/// Component properties, ordered by key so serialization and rendering are
/// deterministic.
pub type Props = BTreeMap<String, PropValue>;

/// A partial property update.
///
/// Each key maps to the new value, or to `None` (JSON `null`) to remove the
/// property. Keys absent from the patch are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PropsPatch(pub BTreeMap<String, Option<PropValue>>);

impl PropsPatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `key` to `value`.
    pub fn set(mut self, key: impl Into<String>, value: impl Into<PropValue>) -> Self {
        self.0.insert(key.into(), Some(value.into()));
        self
    }

    /// Remove `key` from the target component.
    pub fn remove(mut self, key: impl Into<String>) -> Self {
        self.0.insert(key.into(), None);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Apply the patch to `props` in place.
    pub fn apply_to(&self, props: &mut Props) {
        for (key, value) in &self.0 {
            match value {
                Some(v) => {
                    props.insert(key.clone(), v.clone());
                }
                None => {
                    props.remove(key);
                }
            }
        }
    }
}

/// A component in its persisted nested form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
    pub id: ComponentId,
    #[serde(rename = "type")]
    pub kind: ComponentKind,
    #[serde(default)]
    pub props: Props,
    #[serde(default)]
    pub children: Vec<Component>,
    #[serde(default)]
    pub order: i64,
}

/// A component submitted for insertion. The id is optional and assigned by
/// the engine when absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewComponent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ComponentId>,
    #[serde(rename = "type")]
    pub kind: ComponentKind,
    #[serde(default)]
    pub props: Props,
    #[serde(default)]
    pub children: Vec<NewComponent>,
}

impl NewComponent {
    pub fn new(kind: impl Into<ComponentKind>) -> Self {
        Self {
            id: None,
            kind: kind.into(),
            props: Props::new(),
            children: Vec::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<ComponentId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_prop(mut self, key: impl Into<String>, value: impl Into<PropValue>) -> Self {
        self.props.insert(key.into(), value.into());
        self
    }

    pub fn with_child(mut self, child: NewComponent) -> Self {
        self.children.push(child);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_component_wire_format() {
        let value = json!({
            "id": "hero",
            "type": "container",
            "props": {"class": "wide", "columns": 2, "visible": true},
            "children": [
                {
                    "id": "title",
                    "type": "heading",
                    "props": {"text": "Hi", "level": 1},
                    "children": [],
                    "order": 0
                }
            ],
            "order": 0
        });

        let component: Component = serde_json::from_value(value.clone()).unwrap();
        assert_eq!(component.kind, ComponentKind::Container);
        assert_eq!(component.props["columns"], PropValue::Integer(2));
        assert_eq!(component.props["visible"], PropValue::Bool(true));
        assert_eq!(component.children[0].id.as_str(), "title");

        let back = serde_json::to_value(&component).unwrap();
        assert_eq!(back["type"], "container");
        assert_eq!(back["children"][0]["props"]["text"], "Hi");
    }

    #[test]
    fn test_numeric_props_keep_their_form() {
        let value = json!({"level": 1, "big": 9007199254740993_i64, "ratio": 1.5, "scale": 2.0});
        let props: Props = serde_json::from_value(value.clone()).unwrap();

        assert_eq!(props["level"], PropValue::Integer(1));
        assert_eq!(props["big"], PropValue::Integer(9_007_199_254_740_993));
        assert_eq!(props["ratio"], PropValue::Number(1.5));
        assert_eq!(props["scale"], PropValue::Number(2.0));
        assert_eq!(serde_json::to_value(&props).unwrap(), value);

        assert_eq!(props["level"].as_f64(), Some(1.0));
        assert_eq!(props["scale"].as_i64(), Some(2));
        assert_eq!(props["ratio"].as_i64(), None);
        assert_eq!(props["big"].to_scalar_string().as_deref(), Some("9007199254740993"));
    }

    #[test]
    fn test_unknown_kind_is_preserved() {
        let component: Component =
            serde_json::from_value(json!({"id": "x", "type": "carousel"})).unwrap();
        assert_eq!(component.kind, ComponentKind::Other("carousel".to_string()));
        assert_eq!(serde_json::to_value(&component).unwrap()["type"], "carousel");
    }

    #[test]
    fn test_patch_null_removes_property() {
        let patch: PropsPatch =
            serde_json::from_value(json!({"text": "new", "color": null})).unwrap();

        let mut props = Props::new();
        props.insert("text".to_string(), "old".into());
        props.insert("color".to_string(), "red".into());
        props.insert("size".to_string(), 3.0.into());

        patch.apply_to(&mut props);
        assert_eq!(props.get("text"), Some(&PropValue::from("new")));
        assert!(!props.contains_key("color"));
        assert_eq!(props.get("size"), Some(&PropValue::Number(3.0)));
    }

    #[test]
    fn test_generated_ids_are_unique() {
        assert_ne!(ComponentId::generate(), ComponentId::generate());
        assert!(ComponentId::new(ROOT_ID).is_root());
    }
}
