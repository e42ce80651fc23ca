use std::any::TypeId;
use std::sync::Arc;

use lazy_static::lazy_static;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::error::{Error, Result};
use crate::key::ResourceKey;

/// One declared field of a resource or element type.
///
/// Declared once per type in a static table; replaces the attribute
/// reflection of the original tooling. `priority` controls iteration order,
/// ties broken by name.
#[derive(Debug, Clone, Copy)]
pub struct FieldDescriptor {
    pub name: &'static str,
    pub priority: i32,
    pub min_version: Option<u32>,
    pub max_version: Option<u32>,
}

impl FieldDescriptor {
    pub const fn new(name: &'static str, priority: i32) -> Self {
        Self {
            name,
            priority,
            min_version: None,
            max_version: None,
        }
    }

    /// Marks the field as introduced at format version `v`.
    pub const fn since(mut self, v: u32) -> Self {
        self.min_version = Some(v);
        self
    }

    /// Marks the field as retired after format version `v`.
    pub const fn until(mut self, v: u32) -> Self {
        self.max_version = Some(v);
        self
    }
}

/// Version gate: is `field` part of the visible schema at `version`?
///
/// Version 0 means "recommended version mode" and passes everything.
pub fn version_permits(field: &FieldDescriptor, version: u32) -> bool {
    if version == 0 {
        return true;
    }
    field.min_version.map_or(true, |min| version >= min)
        && field.max_version.map_or(true, |max| version <= max)
}

/// Typed value wrapper moved through the reflective get/set interface.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    I32(i32),
    F32(f32),
    Bool(bool),
    Str(String),
    Bytes(Vec<u8>),
    Key(ResourceKey),
    Keys(Vec<ResourceKey>),
}

impl FieldValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            FieldValue::U8(_) => "u8",
            FieldValue::U16(_) => "u16",
            FieldValue::U32(_) => "u32",
            FieldValue::U64(_) => "u64",
            FieldValue::I32(_) => "i32",
            FieldValue::F32(_) => "f32",
            FieldValue::Bool(_) => "bool",
            FieldValue::Str(_) => "string",
            FieldValue::Bytes(_) => "bytes",
            FieldValue::Key(_) => "resource key",
            FieldValue::Keys(_) => "resource key list",
        }
    }

    pub fn as_u8(&self) -> Option<u8> {
        match self {
            FieldValue::U8(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            FieldValue::U32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            FieldValue::U64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Str(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_key(&self) -> Option<ResourceKey> {
        match self {
            FieldValue::Key(v) => Some(*v),
            _ => None,
        }
    }
}

impl std::fmt::Display for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldValue::U8(v) => write!(f, "0x{v:02X}"),
            FieldValue::U16(v) => write!(f, "0x{v:04X}"),
            FieldValue::U32(v) => write!(f, "0x{v:08X}"),
            FieldValue::U64(v) => write!(f, "0x{v:016X}"),
            FieldValue::I32(v) => write!(f, "{v}"),
            FieldValue::F32(v) => write!(f, "{v}"),
            FieldValue::Bool(v) => write!(f, "{v}"),
            FieldValue::Str(v) => write!(f, "{v:?}"),
            FieldValue::Bytes(v) => write!(f, "[{} bytes]", v.len()),
            FieldValue::Key(v) => write!(f, "{v}"),
            FieldValue::Keys(v) => write!(f, "[{} keys]", v.len()),
        }
    }
}

/// Reflective surface over a parsed unit: ordered field names plus get/set by
/// name. This is the only interface external tools (editors, inspectors) are
/// allowed to depend on.
pub trait ApiVersionedFields {
    /// Static field table for this type.
    fn field_table() -> &'static [FieldDescriptor]
    where
        Self: Sized;

    /// API version a caller gets when requesting 0.
    fn recommended_api_version() -> i32
    where
        Self: Sized,
    {
        1
    }

    /// Effective format version used for field gating. 0 disables gating.
    fn version(&self) -> u32 {
        0
    }

    fn get_field(&self, name: &str) -> Result<FieldValue>;

    fn set_field(&mut self, name: &str, value: FieldValue) -> Result<()>;

    /// Nested composite field, for dotted-path traversal.
    fn nested(&self, _name: &str) -> Option<&dyn ApiVersionedFields> {
        None
    }

    fn nested_mut(&mut self, _name: &str) -> Option<&mut dyn ApiVersionedFields> {
        None
    }

    /// Ordered names of the fields visible at this instance's version.
    fn content_fields(&self) -> Vec<&'static str>
    where
        Self: Sized + 'static,
    {
        visible_fields::<Self>(self.version()).to_vec()
    }
}

lazy_static! {
    static ref VISIBLE_CACHE: RwLock<FxHashMap<(TypeId, u32), Arc<[&'static str]>>> =
        RwLock::new(FxHashMap::default());
}

/// Ordered visible-field list for `T` at `version`, cached per (type, version).
pub fn visible_fields<T: ApiVersionedFields + 'static>(version: u32) -> Arc<[&'static str]> {
    let cache_key = (TypeId::of::<T>(), version);
    if let Some(names) = VISIBLE_CACHE.read().get(&cache_key) {
        return names.clone();
    }

    let mut fields: Vec<&FieldDescriptor> = T::field_table()
        .iter()
        .filter(|d| version_permits(d, version))
        .collect();
    fields.sort_by_key(|d| (d.priority, d.name));
    let names: Arc<[&'static str]> = fields.iter().map(|d| d.name).collect();

    VISIBLE_CACHE
        .write()
        .insert(cache_key, names.clone());
    names
}

/// Looks up `name` in `T`'s field table and applies the version gate.
///
/// Used by concrete `get_field`/`set_field` implementations before touching
/// any data.
pub fn check_field<T: ApiVersionedFields>(name: &str, version: u32) -> Result<&'static FieldDescriptor> {
    let desc = T::field_table()
        .iter()
        .find(|d| d.name == name)
        .ok_or_else(|| Error::UnknownField(name.to_string()))?;
    if !version_permits(desc, version) {
        return Err(Error::VersionGated {
            field: desc.name,
            version,
        });
    }
    Ok(desc)
}

/// Resolves a possibly dotted field path ("A.B.C") for reading.
pub fn get_path(root: &dyn ApiVersionedFields, path: &str) -> Result<FieldValue> {
    match path.split_once('.') {
        None => root.get_field(path),
        Some((head, rest)) => {
            let inner = root
                .nested(head)
                .ok_or_else(|| Error::UnknownField(head.to_string()))?;
            get_path(inner, rest)
        }
    }
}

/// Resolves a possibly dotted field path for writing.
pub fn set_path(root: &mut dyn ApiVersionedFields, path: &str, value: FieldValue) -> Result<()> {
    match path.split_once('.') {
        None => root.set_field(path, value),
        Some((head, rest)) => {
            let inner = root
                .nested_mut(head)
                .ok_or_else(|| Error::UnknownField(head.to_string()))?;
            set_path(inner, rest, value)
        }
    }
}
