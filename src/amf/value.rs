//! AMF0 value model
//!
//! Objects keep their properties in insertion order: peers such as Flash
//! players and some encoders read `_result` and `onStatus` objects
//! positionally, so the encoder must write keys back in the order they
//! were set.

/// Insertion-ordered AMF object properties
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AmfObject {
    properties: Vec<(String, AmfValue)>,
}

impl AmfObject {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a property, replacing an existing value in place
    pub fn insert(&mut self, key: impl Into<String>, value: AmfValue) {
        let key = key.into();
        match self.properties.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => *slot = value,
            None => self.properties.push((key, value)),
        }
    }

    /// Chainable variant of `insert` for building replies
    pub fn with(mut self, key: impl Into<String>, value: AmfValue) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&AmfValue> {
        self.properties
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    pub fn remove(&mut self, key: &str) -> Option<AmfValue> {
        let pos = self.properties.iter().position(|(k, _)| k == key)?;
        Some(self.properties.remove(pos).1)
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AmfValue)> {
        self.properties.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl FromIterator<(String, AmfValue)> for AmfObject {
    fn from_iter<I: IntoIterator<Item = (String, AmfValue)>>(iter: I) -> Self {
        let mut obj = AmfObject::new();
        for (k, v) in iter {
            obj.insert(k, v);
        }
        obj
    }
}

/// AMF0 value
#[derive(Debug, Clone, PartialEq, Default)]
pub enum AmfValue {
    /// 0x00, IEEE 754 double
    Number(f64),
    /// 0x01
    Boolean(bool),
    /// 0x02 or 0x0C (long string)
    String(String),
    /// 0x03, anonymous object
    Object(AmfObject),
    /// 0x05
    #[default]
    Null,
    /// 0x06
    Undefined,
    /// 0x08, associative array (metadata usually arrives as one)
    EcmaArray(AmfObject),
    /// 0x0A, dense array
    StrictArray(Vec<AmfValue>),
    /// 0x0B, milliseconds since epoch (timezone dropped)
    Date(f64),
    /// 0x0F
    Xml(String),
    /// 0x10
    TypedObject { class_name: String, properties: AmfObject },
}

impl AmfValue {
    pub fn string(s: impl Into<String>) -> Self {
        AmfValue::String(s.into())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AmfValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            AmfValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AmfValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Object-like view over Object, EcmaArray and TypedObject
    pub fn as_object(&self) -> Option<&AmfObject> {
        match self {
            AmfValue::Object(o) | AmfValue::EcmaArray(o) => Some(o),
            AmfValue::TypedObject { properties, .. } => Some(properties),
            _ => None,
        }
    }

    pub fn is_null_or_undefined(&self) -> bool {
        matches!(self, AmfValue::Null | AmfValue::Undefined)
    }

    pub fn get(&self, key: &str) -> Option<&AmfValue> {
        self.as_object()?.get(key)
    }

    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.get(key)?.as_str()
    }

    pub fn get_number(&self, key: &str) -> Option<f64> {
        self.get(key)?.as_number()
    }
}

impl From<&str> for AmfValue {
    fn from(s: &str) -> Self {
        AmfValue::String(s.to_string())
    }
}

impl From<String> for AmfValue {
    fn from(s: String) -> Self {
        AmfValue::String(s)
    }
}

impl From<f64> for AmfValue {
    fn from(n: f64) -> Self {
        AmfValue::Number(n)
    }
}

impl From<bool> for AmfValue {
    fn from(b: bool) -> Self {
        AmfValue::Boolean(b)
    }
}

impl From<AmfObject> for AmfValue {
    fn from(o: AmfObject) -> Self {
        AmfValue::Object(o)
    }
}
