use std::fmt::{Debug, Display, Formatter};
use std::hash::Hash;
use std::str::FromStr;

use crate::change::{Attach, ChangeHandler};
use crate::cursor::ByteCursor;
use crate::error::{Error, Result};
use crate::fields::{check_field, ApiVersionedFields, FieldDescriptor, FieldValue};

/// The (Type, Group, Instance) identity triple of a resource.
#[derive(
    Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Default, serde::Serialize, serde::Deserialize,
)]
pub struct ResourceKey {
    pub resource_type: u32,
    pub resource_group: u32,
    pub instance: u64,
}

impl ResourceKey {
    pub const fn new(resource_type: u32, resource_group: u32, instance: u64) -> Self {
        Self {
            resource_type,
            resource_group,
            instance,
        }
    }
}

impl Hash for ResourceKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        state.write_u64(self.resource_type as u64 ^ self.resource_group as u64 ^ self.instance)
    }
}

impl Debug for ResourceKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!(
            "ResourceKey(type=0x{:08X}, group=0x{:08X}, instance=0x{:016X})",
            self.resource_type, self.resource_group, self.instance
        ))
    }
}

impl Display for ResourceKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!(
            "0x{:08X}-0x{:08X}-0x{:016X}",
            self.resource_type, self.resource_group, self.instance
        ))
    }
}

impl FromStr for ResourceKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let parse_part = |part: Option<&str>| -> Result<u64> {
            let part = part.ok_or_else(|| {
                Error::InvalidArgument(format!("malformed resource key {s:?}"))
            })?;
            let digits = part.strip_prefix("0x").unwrap_or(part);
            u64::from_str_radix(digits, 16)
                .map_err(|_| Error::InvalidArgument(format!("malformed resource key {s:?}")))
        };

        let mut parts = s.split('-');
        let resource_type = parse_part(parts.next())? as u32;
        let resource_group = parse_part(parts.next())? as u32;
        let instance = parse_part(parts.next())?;
        if parts.next().is_some() {
            return Err(Error::InvalidArgument(format!(
                "malformed resource key {s:?}"
            )));
        }
        Ok(Self::new(resource_type, resource_group, instance))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyField {
    Type,
    Group,
    Instance,
}

/// Serialization order of a key's three fields.
///
/// Only the six permutations of {T, G, I} exist; the order used to parse a
/// block must be the order used to serialize it again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyOrder {
    #[default]
    Tgi,
    Tig,
    Gti,
    Git,
    Itg,
    Igt,
}

impl KeyOrder {
    pub fn fields(&self) -> [KeyField; 3] {
        use KeyField::*;
        match self {
            KeyOrder::Tgi => [Type, Group, Instance],
            KeyOrder::Tig => [Type, Instance, Group],
            KeyOrder::Gti => [Group, Type, Instance],
            KeyOrder::Git => [Group, Instance, Type],
            KeyOrder::Itg => [Instance, Type, Group],
            KeyOrder::Igt => [Instance, Group, Type],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            KeyOrder::Tgi => "TGI",
            KeyOrder::Tig => "TIG",
            KeyOrder::Gti => "GTI",
            KeyOrder::Git => "GIT",
            KeyOrder::Itg => "ITG",
            KeyOrder::Igt => "IGT",
        }
    }
}

impl FromStr for KeyOrder {
    type Err = Error;

    /// Fails on anything that is not a permutation of "TGI", before any
    /// stream I/O happens.
    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "TGI" => KeyOrder::Tgi,
            "TIG" => KeyOrder::Tig,
            "GTI" => KeyOrder::Gti,
            "GIT" => KeyOrder::Git,
            "ITG" => KeyOrder::Itg,
            "IGT" => KeyOrder::Igt,
            _ => return Err(Error::InvalidKeyOrder(s.to_string())),
        })
    }
}

impl Display for KeyOrder {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resource key bound to a serialization order and a change handler.
///
/// This is the form keys take inside parsed resources; free-standing
/// [`ResourceKey`] values are the identity-only view.
#[derive(Clone)]
pub struct TgiBlock {
    key: ResourceKey,
    order: KeyOrder,
    handler: ChangeHandler,
}

impl TgiBlock {
    pub fn new(order: KeyOrder, key: ResourceKey, handler: &ChangeHandler) -> Self {
        Self {
            key,
            order,
            handler: handler.clone(),
        }
    }

    /// Reads the three fields from `cur` in this block's configured order.
    pub fn parse(cur: &mut ByteCursor, order: KeyOrder, handler: &ChangeHandler) -> Result<Self> {
        let mut key = ResourceKey::default();
        for field in order.fields() {
            match field {
                KeyField::Type => key.resource_type = cur.read_u32()?,
                KeyField::Group => key.resource_group = cur.read_u32()?,
                KeyField::Instance => key.instance = cur.read_u64()?,
            }
        }
        Ok(Self::new(order, key, handler))
    }

    /// Writes the three fields in the same order they were parsed in.
    pub fn unparse(&self, cur: &mut ByteCursor) -> Result<()> {
        for field in self.order.fields() {
            match field {
                KeyField::Type => cur.write_u32(self.key.resource_type)?,
                KeyField::Group => cur.write_u32(self.key.resource_group)?,
                KeyField::Instance => cur.write_u64(self.key.instance)?,
            }
        }
        Ok(())
    }

    pub fn key(&self) -> ResourceKey {
        self.key
    }

    pub fn order(&self) -> KeyOrder {
        self.order
    }

    pub fn resource_type(&self) -> u32 {
        self.key.resource_type
    }

    pub fn resource_group(&self) -> u32 {
        self.key.resource_group
    }

    pub fn instance(&self) -> u64 {
        self.key.instance
    }

    pub fn set_resource_type(&mut self, v: u32) {
        if self.key.resource_type != v {
            self.key.resource_type = v;
            self.handler.notify();
        }
    }

    pub fn set_resource_group(&mut self, v: u32) {
        if self.key.resource_group != v {
            self.key.resource_group = v;
            self.handler.notify();
        }
    }

    pub fn set_instance(&mut self, v: u64) {
        if self.key.instance != v {
            self.key.instance = v;
            self.handler.notify();
        }
    }

    pub fn set_key(&mut self, key: ResourceKey) {
        if self.key != key {
            self.key = key;
            self.handler.notify();
        }
    }
}

impl Attach for TgiBlock {
    fn attached(&self, handler: &ChangeHandler) -> Self {
        Self::new(self.order, self.key, handler)
    }
}

impl PartialEq for TgiBlock {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Debug for TgiBlock {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("TgiBlock({}, {})", self.order, self.key))
    }
}

const TGI_FIELDS: &[FieldDescriptor] = &[
    FieldDescriptor::new("ResourceType", 1),
    FieldDescriptor::new("ResourceGroup", 2),
    FieldDescriptor::new("Instance", 3),
];

impl ApiVersionedFields for TgiBlock {
    fn field_table() -> &'static [FieldDescriptor] {
        TGI_FIELDS
    }

    fn get_field(&self, name: &str) -> Result<FieldValue> {
        check_field::<Self>(name, 0)?;
        Ok(match name {
            "ResourceType" => FieldValue::U32(self.key.resource_type),
            "ResourceGroup" => FieldValue::U32(self.key.resource_group),
            "Instance" => FieldValue::U64(self.key.instance),
            _ => unreachable!(),
        })
    }

    fn set_field(&mut self, name: &str, value: FieldValue) -> Result<()> {
        check_field::<Self>(name, 0)?;
        match (name, &value) {
            ("ResourceType", FieldValue::U32(v)) => self.set_resource_type(*v),
            ("ResourceGroup", FieldValue::U32(v)) => self.set_resource_group(*v),
            ("Instance", FieldValue::U64(v)) => self.set_instance(*v),
            _ => {
                return Err(Error::TypeMismatch {
                    field: name.to_string(),
                    expected: if name == "Instance" { "u64" } else { "u32" },
                    found: value.type_name(),
                })
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;
    use std::hash::Hasher;

    const KEY: ResourceKey = ResourceKey::new(0x319e4f1d, 0x00000080, 0x1234_5678_9abc_def0);

    #[test]
    fn all_six_orders_round_trip() {
        for order in ["TGI", "TIG", "GTI", "GIT", "ITG", "IGT"] {
            let order: KeyOrder = order.parse().unwrap();
            let handler = ChangeHandler::detached();

            let mut cur = ByteCursor::empty();
            TgiBlock::new(order, KEY, &handler).unparse(&mut cur).unwrap();
            let first = cur.into_inner();
            assert_eq!(first.len(), 16);

            let mut cur = ByteCursor::new(first.clone());
            let parsed = TgiBlock::parse(&mut cur, order, &handler).unwrap();
            assert_eq!(parsed.key(), KEY);

            let mut cur = ByteCursor::empty();
            parsed.unparse(&mut cur).unwrap();
            assert_eq!(cur.into_inner(), first);
        }
    }

    #[test]
    fn invalid_order_fails_before_io() {
        assert!(matches!(
            "TTI".parse::<KeyOrder>(),
            Err(Error::InvalidKeyOrder(s)) if s == "TTI"
        ));
        assert!("tgi".parse::<KeyOrder>().is_err());
        assert!("TGIX".parse::<KeyOrder>().is_err());
    }

    #[test]
    fn ordering_is_type_group_instance() {
        let a = ResourceKey::new(1, 9, 9);
        let b = ResourceKey::new(2, 0, 0);
        let c = ResourceKey::new(2, 0, 1);
        assert!(a < b && b < c);
    }

    #[test]
    fn hash_is_xor_of_fields() {
        let mut expected = DefaultHasher::new();
        expected.write_u64(KEY.resource_type as u64 ^ KEY.resource_group as u64 ^ KEY.instance);
        let mut actual = DefaultHasher::new();
        KEY.hash(&mut actual);
        assert_eq!(expected.finish(), actual.finish());
    }

    #[test]
    fn display_parse_round_trip() {
        let text = KEY.to_string();
        assert_eq!(text, "0x319E4F1D-0x00000080-0x123456789ABCDEF0");
        assert_eq!(text.parse::<ResourceKey>().unwrap(), KEY);
        assert!("0x1-0x2".parse::<ResourceKey>().is_err());
    }

    #[test]
    fn serde_round_trip() {
        let json = serde_json::to_string(&KEY).unwrap();
        let back: ResourceKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, KEY);
    }

    #[test]
    fn mutation_notifies_handler() {
        let handler = ChangeHandler::detached();
        let mut block = TgiBlock::new(KeyOrder::Tgi, KEY, &handler);
        assert!(!handler.is_dirty());

        // assigning the same value is not a change
        block.set_instance(KEY.instance);
        assert!(!handler.is_dirty());

        block.set_instance(0xfeed);
        assert!(handler.is_dirty());
    }

    #[test]
    fn reflective_access() {
        let handler = ChangeHandler::detached();
        let mut block = TgiBlock::new(KeyOrder::Itg, KEY, &handler);
        assert_eq!(
            block.content_fields(),
            vec!["ResourceType", "ResourceGroup", "Instance"]
        );
        assert_eq!(
            block.get_field("Instance").unwrap(),
            FieldValue::U64(KEY.instance)
        );
        block
            .set_field("ResourceGroup", FieldValue::U32(0x1234))
            .unwrap();
        assert_eq!(block.resource_group(), 0x1234);
        assert!(handler.is_dirty());
    }
}
