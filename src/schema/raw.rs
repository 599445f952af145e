//! The raw schema tree (§6.3): the shape the core receives from its
//! out-of-scope JSON-decoding collaborator. Everything here is a thin,
//! `serde`-deserializable mirror of the input document — no qualification,
//! deduplication, or well-formedness checking happens at this layer; that
//! is [`super::compiler`]'s job.

use std::collections::BTreeMap;

use serde::Deserialize;

/// Top-level schema document: namespace name (possibly empty) → namespace
/// body.
#[derive(Debug, Clone, Deserialize)]
#[serde(transparent)]
pub struct RawSchema(pub BTreeMap<String, RawNamespace>);

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawNamespace {
    #[serde(default, rename = "entityTypes")]
    pub entity_types: BTreeMap<String, RawEntityType>,
    #[serde(default)]
    pub actions: BTreeMap<String, RawAction>,
    #[serde(default, rename = "commonTypes")]
    pub common_types: BTreeMap<String, RawTypeDesc>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawEntityType {
    pub shape: Option<RawTypeDesc>,
    #[serde(default, rename = "memberOfTypes")]
    pub member_of_types: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawAction {
    #[serde(default, rename = "appliesTo")]
    pub applies_to: Option<RawAppliesTo>,
    /// Action-level context override; takes precedence over
    /// `applies_to.context` if both are present (§4.2).
    pub context: Option<RawTypeDesc>,
    #[serde(default, rename = "memberOf")]
    pub member_of: Vec<RawActionRef>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawAppliesTo {
    #[serde(default, rename = "principalTypes")]
    pub principal_types: Vec<String>,
    #[serde(default, rename = "resourceTypes")]
    pub resource_types: Vec<String>,
    pub context: Option<RawTypeDesc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawActionRef {
    #[serde(rename = "type")]
    pub ty: Option<String>,
    pub id: String,
}

/// One attribute entry of a record `shape`/`attributes` map.
#[derive(Debug, Clone, Deserialize)]
pub struct RawAttrDesc {
    #[serde(flatten)]
    pub ty: RawTypeDesc,
    #[serde(default = "default_true")]
    pub required: bool,
}

fn default_true() -> bool {
    true
}

/// A type description. The discriminator field is `type`, naming one of
/// the built-in tags, or an arbitrary string which the compiler resolves
/// later as a common-type alias / entity-type reference (§4.2).
#[derive(Debug, Clone)]
pub enum RawTypeDesc {
    Boolean,
    Long,
    String,
    Entity {
        name: String,
    },
    Set {
        element: Box<RawTypeDesc>,
    },
    Record {
        attributes: BTreeMap<String, RawAttrDesc>,
        additional_attributes: bool,
    },
    Extension {
        name: String,
    },
    /// A bare identifier naming a common-type alias, or (failing that) an
    /// entity type, resolved lazily by the compiler.
    TypeRef(String),
}

impl<'de> Deserialize<'de> for RawTypeDesc {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = serde_json::Value::deserialize(deserializer)?;
        let obj = value.as_object().ok_or_else(|| {
            serde::de::Error::custom("type description must be a JSON object")
        })?;
        let tag = obj
            .get("type")
            .and_then(|v| v.as_str())
            .ok_or_else(|| serde::de::Error::custom("type description missing `type` field"))?;

        let desc = match tag {
            "Boolean" | "Bool" => RawTypeDesc::Boolean,
            "Long" => RawTypeDesc::Long,
            "String" => RawTypeDesc::String,
            "Entity" => {
                let name = obj
                    .get("name")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                RawTypeDesc::Entity { name }
            }
            "Set" => {
                let element = obj
                    .get("element")
                    .cloned()
                    .ok_or_else(|| serde::de::Error::custom("Set type missing `element`"))?;
                let element: RawTypeDesc =
                    serde_json::from_value(element).map_err(serde::de::Error::custom)?;
                RawTypeDesc::Set {
                    element: Box::new(element),
                }
            }
            "Record" => {
                let attributes = obj
                    .get("attributes")
                    .cloned()
                    .unwrap_or(serde_json::Value::Object(Default::default()));
                let attributes: BTreeMap<String, RawAttrDesc> =
                    serde_json::from_value(attributes).map_err(serde::de::Error::custom)?;
                let additional_attributes = obj
                    .get("additionalAttributes")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);
                RawTypeDesc::Record {
                    attributes,
                    additional_attributes,
                }
            }
            "Extension" => {
                let name = obj
                    .get("name")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                RawTypeDesc::Extension { name }
            }
            other => RawTypeDesc::TypeRef(other.to_string()),
        };
        Ok(desc)
    }
}
