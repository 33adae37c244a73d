//! Maps a named key codec to a serializer/deserializer pair and the concrete type it produces.
//!
//! The registry is immutable once built (mirroring the store-manager registries elsewhere in
//! this workspace, which are also assembled once at startup and never mutated again): call
//! [`SerdeRegistry::builder`], register entries, then [`SerdeRegistryBuilder::build`].

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SerdeError {
    #[error("no serde registered under name {0:?}")]
    UnknownSerde(String),
    #[error("a default serde has already been designated")]
    DefaultAlreadySet,
    #[error("a serde named {0:?} is already registered")]
    DuplicateName(String),
    #[error("could not convert key {raw:?} to the {key_type:?} type: {reason}")]
    KeyConversion {
        raw: String,
        key_type: KeyType,
        reason: String,
    },
}

/// The concrete type a [`KeySerde`]'s deserializer produces, exposed so callers (and the host
/// manager's routing) can reason about keys without downcasting trait objects.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum KeyType {
    Str,
    Long,
}

/// A typed key, carried between [`KeySerde::parse`] and [`KeySerde::to_bytes`]. This is the
/// closed set of key shapes the reference registry supports; a deployment with more key types
/// would extend this enum and the `KeySerde` impls that produce/consume it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TypedKey {
    Str(String),
    Long(i64),
}

/// A named key codec: converts a stringified key (as carried over the wire) into a typed key,
/// and serializes a typed key to the bytes used both for partition routing and the remote
/// request body.
pub trait KeySerde: Send + Sync {
    fn name(&self) -> &str;
    fn key_type(&self) -> KeyType;
    fn parse(&self, raw: &str) -> Result<TypedKey, SerdeError>;
    fn to_bytes(&self, key: &TypedKey) -> Vec<u8>;
}

/// The default codec: keys are opaque UTF-8 strings, serialized as their raw bytes.
pub struct StringKeySerde;

impl KeySerde for StringKeySerde {
    fn name(&self) -> &str {
        "string"
    }

    fn key_type(&self) -> KeyType {
        KeyType::Str
    }

    fn parse(&self, raw: &str) -> Result<TypedKey, SerdeError> {
        Ok(TypedKey::Str(raw.to_owned()))
    }

    fn to_bytes(&self, key: &TypedKey) -> Vec<u8> {
        match key {
            TypedKey::Str(s) => s.clone().into_bytes(),
            TypedKey::Long(n) => n.to_string().into_bytes(),
        }
    }
}

/// A codec for `i64` keys, serialized big-endian (the conventional Kafka `LongSerializer`
/// layout), so a non-numeric key fails at `parse` with [`SerdeError::KeyConversion`].
pub struct LongKeySerde;

impl KeySerde for LongKeySerde {
    fn name(&self) -> &str {
        "long"
    }

    fn key_type(&self) -> KeyType {
        KeyType::Long
    }

    fn parse(&self, raw: &str) -> Result<TypedKey, SerdeError> {
        raw.parse::<i64>()
            .map(TypedKey::Long)
            .map_err(|e| SerdeError::KeyConversion {
                raw: raw.to_owned(),
                key_type: KeyType::Long,
                reason: format!("NumberFormatException: {e}"),
            })
    }

    fn to_bytes(&self, key: &TypedKey) -> Vec<u8> {
        match key {
            TypedKey::Long(n) => n.to_be_bytes().to_vec(),
            TypedKey::Str(s) => s.clone().into_bytes(),
        }
    }
}

/// An immutable set of registered codecs plus a designated default.
pub struct SerdeRegistry {
    entries: HashMap<String, Arc<dyn KeySerde>>,
    default_name: String,
}

impl SerdeRegistry {
    pub fn builder() -> SerdeRegistryBuilder {
        SerdeRegistryBuilder::new()
    }

    pub fn default_entry(&self) -> Arc<dyn KeySerde> {
        self.entries
            .get(&self.default_name)
            .cloned()
            .expect("default entry was validated at build time")
    }

    pub fn by_name(&self, name: &str) -> Result<Arc<dyn KeySerde>, SerdeError> {
        self.entries
            .get(name)
            .cloned()
            .ok_or_else(|| SerdeError::UnknownSerde(name.to_owned()))
    }

    /// Resolves the serde to use for a query: the named one if given, else the default.
    pub fn resolve(&self, name: Option<&str>) -> Result<Arc<dyn KeySerde>, SerdeError> {
        match name {
            Some(n) => self.by_name(n),
            None => Ok(self.default_entry()),
        }
    }
}

#[derive(Default)]
pub struct SerdeRegistryBuilder {
    entries: HashMap<String, Arc<dyn KeySerde>>,
    default_name: Option<String>,
}

impl SerdeRegistryBuilder {
    fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, serde: Arc<dyn KeySerde>) -> Result<Self, SerdeError> {
        let name = serde.name().to_owned();
        if self.entries.contains_key(&name) {
            return Err(SerdeError::DuplicateName(name));
        }
        self.entries.insert(name, serde);
        Ok(self)
    }

    pub fn register_default(mut self, serde: Arc<dyn KeySerde>) -> Result<Self, SerdeError> {
        if self.default_name.is_some() {
            return Err(SerdeError::DefaultAlreadySet);
        }
        let name = serde.name().to_owned();
        self = self.register(serde)?;
        self.default_name = Some(name);
        Ok(self)
    }

    pub fn build(self) -> Result<SerdeRegistry, SerdeError> {
        let default_name = self
            .default_name
            .ok_or_else(|| SerdeError::UnknownSerde("<default>".to_owned()))?;
        Ok(SerdeRegistry {
            entries: self.entries,
            default_name,
        })
    }
}

/// A registry pre-populated with [`StringKeySerde`] as the default and [`LongKeySerde`]
/// registered under `"long"`, matching the reference scenarios in the specification.
pub fn default_registry() -> SerdeRegistry {
    SerdeRegistry::builder()
        .register_default(Arc::new(StringKeySerde))
        .expect("string serde registers cleanly")
        .register(Arc::new(LongKeySerde))
        .expect("long serde registers cleanly")
        .build()
        .expect("default registry always has a default entry")
}
