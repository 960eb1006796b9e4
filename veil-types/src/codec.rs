//! JSON encoding of the state tree.
//!
//! The in-memory tree is tagged; JSON is not, so the codec uses the legacy
//! client conventions at this boundary only:
//!
//! - an identifier is a string with a `:` prefix (`":cp"`); a plain string
//!   that starts with `:` is written with the prefix doubled (`"::x"`);
//! - map keys and entity field names follow the same rule;
//! - an entity is an object with a `_` metadata object holding `"@id"` and one
//!   array of actor identifiers per concealed field. `_` is reserved.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::node::{Entity, Key, Node};
use crate::path::{Segment, METADATA};
use crate::{ActorId, Id};

const ID_PREFIX: char = ':';
const ENTITY_ID: &str = "@id";

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CodecError {
    #[error("empty identifier")]
    EmptyIdentifier,

    #[error("entity metadata must be an object with an \"@id\" identifier")]
    MissingEntityId,

    #[error("unknown entity metadata key {0:?}")]
    UnknownMetadata(String),

    #[error("visibility of field {0:?} must be a list of actor identifiers")]
    InvalidVisibility(String),

    #[error("entity field name {0:?} is an identifier")]
    FieldIsIdentifier(String),

    #[error("path segment must be a string or a non-negative integer")]
    InvalidSegment,
}

enum Text {
    Id(Id),
    Literal(String),
}

fn decode_text(s: &str) -> Result<Text, CodecError> {
    if s.starts_with("::") {
        Ok(Text::Literal(s[1..].to_string()))
    } else if let Some(id) = s.strip_prefix(ID_PREFIX) {
        if id.is_empty() {
            return Err(CodecError::EmptyIdentifier);
        }
        Ok(Text::Id(Id::new(id)))
    } else {
        Ok(Text::Literal(s.to_string()))
    }
}

fn encode_literal(s: &str) -> String {
    if s.starts_with(ID_PREFIX) {
        format!("{ID_PREFIX}{s}")
    } else {
        s.to_string()
    }
}

pub fn encode_id(id: &Id) -> String {
    format!("{ID_PREFIX}{}", id.as_str())
}

pub fn encode_key(key: &Key) -> String {
    match key {
        Key::Name(name) => encode_literal(name),
        Key::Id(id) => encode_id(id),
    }
}

pub fn decode_key(s: &str) -> Result<Key, CodecError> {
    Ok(match decode_text(s)? {
        Text::Id(id) => Key::Id(id),
        Text::Literal(name) => Key::Name(name),
    })
}

fn decode_field_name(s: &str) -> Result<String, CodecError> {
    match decode_text(s)? {
        Text::Literal(name) => Ok(name),
        Text::Id(_) => Err(CodecError::FieldIsIdentifier(s.to_string())),
    }
}

/// Encode a tree as JSON.
pub fn to_json(node: &Node) -> Value {
    match node {
        Node::Null => Value::Null,
        Node::Bool(b) => Value::Bool(*b),
        Node::Number(n) => Value::Number(n.clone()),
        Node::String(s) => Value::String(encode_literal(s)),
        Node::Id(id) => Value::String(encode_id(id)),
        Node::List(items) => Value::Array(items.iter().map(to_json).collect()),
        Node::Map(entries) => Value::Object(
            entries
                .iter()
                .map(|(k, v)| (encode_key(k), to_json(v)))
                .collect(),
        ),
        Node::Entity(entity) => {
            let mut meta = Map::new();
            meta.insert(ENTITY_ID.to_string(), Value::String(encode_id(&entity.id)));
            for (field, actors) in &entity.visibility {
                let actors = actors
                    .iter()
                    .map(|a| Value::String(encode_id(a.as_id())))
                    .collect();
                meta.insert(encode_literal(field), Value::Array(actors));
            }

            let mut obj = Map::new();
            obj.insert(METADATA.to_string(), Value::Object(meta));
            for (field, value) in &entity.fields {
                obj.insert(encode_literal(field), to_json(value));
            }
            Value::Object(obj)
        }
    }
}

/// Decode a tree from JSON.
pub fn from_json(value: &Value) -> Result<Node, CodecError> {
    Ok(match value {
        Value::Null => Node::Null,
        Value::Bool(b) => Node::Bool(*b),
        Value::Number(n) => Node::Number(n.clone()),
        Value::String(s) => match decode_text(s)? {
            Text::Id(id) => Node::Id(id),
            Text::Literal(s) => Node::String(s),
        },
        Value::Array(items) => Node::List(Arc::new(
            items.iter().map(from_json).collect::<Result<_, _>>()?,
        )),
        Value::Object(obj) => match obj.get(METADATA) {
            Some(meta) => Node::Entity(Arc::new(decode_entity(meta, obj)?)),
            None => {
                let entries = obj
                    .iter()
                    .map(|(k, v)| Ok((decode_key(k)?, from_json(v)?)))
                    .collect::<Result<BTreeMap<_, _>, CodecError>>()?;
                Node::Map(Arc::new(entries))
            }
        },
    })
}

fn decode_entity(meta: &Value, obj: &Map<String, Value>) -> Result<Entity, CodecError> {
    let meta = meta.as_object().ok_or(CodecError::MissingEntityId)?;
    let id = match meta.get(ENTITY_ID).and_then(Value::as_str).map(decode_text) {
        Some(Ok(Text::Id(id))) => id,
        Some(Err(e)) => return Err(e),
        _ => return Err(CodecError::MissingEntityId),
    };

    let mut entity = Entity::new(id);
    for (key, value) in meta {
        if key == ENTITY_ID {
            continue;
        }
        if key.starts_with('@') {
            return Err(CodecError::UnknownMetadata(key.clone()));
        }
        let field = decode_field_name(key)?;
        let actors = decode_visibility(value).ok_or_else(|| CodecError::InvalidVisibility(field.clone()))?;
        entity.visibility.insert(field, actors);
    }

    for (key, value) in obj {
        if key == METADATA {
            continue;
        }
        entity.fields.insert(decode_field_name(key)?, from_json(value)?);
    }
    Ok(entity)
}

fn decode_visibility(value: &Value) -> Option<BTreeSet<ActorId>> {
    value
        .as_array()?
        .iter()
        .map(|item| match decode_text(item.as_str()?) {
            Ok(Text::Id(id)) => Some(ActorId::from(id)),
            _ => None,
        })
        .collect()
}

impl Serialize for Node {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        to_json(self).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Node {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        from_json(&value).map_err(D::Error::custom)
    }
}

impl Serialize for Segment {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Segment::Index(i) => serializer.serialize_u64(*i as u64),
            Segment::Key(key) => serializer.serialize_str(&encode_key(key)),
        }
    }
}

impl<'de> Deserialize<'de> for Segment {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        let segment = match &value {
            Value::String(s) => decode_key(s).map(Segment::Key),
            Value::Number(n) => n
                .as_u64()
                .and_then(|n| usize::try_from(n).ok())
                .map(Segment::Index)
                .ok_or(CodecError::InvalidSegment),
            _ => Err(CodecError::InvalidSegment),
        };
        segment.map_err(D::Error::custom)
    }
}
