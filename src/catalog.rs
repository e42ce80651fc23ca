//! Catalog resource: the worked example for versioned layouts with a
//! backpatched trailing key table.
//!
//! Layout (little-endian):
//! - `version: u32` (0x0C or 0x0D)
//! - `tgi_offset: u32`, `tgi_size: u32` — backpatched; the size covers the
//!   reference list plus the trailing swatch grouping (the +8 fudge)
//! - common block
//! - type-code list (count excludes padding entries)
//! - `extra: u8` — version 0x0D and later only
//! - reference list (ITG order) at `tgi_offset`
//! - `swatch_grouping: u64`

use tracing::debug_span;

use crate::change::{Attach, ChangeHandler};
use crate::cursor::{ByteCursor, StringEncoding};
use crate::error::{Error, Result};
use crate::fields::{check_field, ApiVersionedFields, FieldDescriptor, FieldValue};
use crate::key::{KeyOrder, ResourceKey};
use crate::list::{
    read_offset_size, CountEncoding, DependentList, ListElement, OffsetSizePatch, TgiBlockList,
};
use crate::resource::{Resource, ResourceCore};

pub const CATALOG_VERSION_MIN: u32 = 0x0c;
pub const CATALOG_VERSION_MAX: u32 = 0x0d;

const COMMON_VERSION_MIN: u32 = 0x0a;
const COMMON_VERSION_MAX: u32 = 0x0b;

/// Shared header block every catalog family starts with.
#[derive(Clone)]
pub struct CatalogCommon {
    version: u32,
    name_hash: u32,
    description_hash: u32,
    price: u32,
    name: String,
    /// Present from common version 0x0B.
    product_status: u8,
    handler: ChangeHandler,
}

impl CatalogCommon {
    pub fn new(version: u32, handler: &ChangeHandler) -> Result<Self> {
        if !(COMMON_VERSION_MIN..=COMMON_VERSION_MAX).contains(&version) {
            return Err(Error::InvalidArgument(format!(
                "common block version 0x{version:X} out of range"
            )));
        }
        Ok(Self {
            version,
            name_hash: 0,
            description_hash: 0,
            price: 0,
            name: String::new(),
            product_status: 0,
            handler: handler.clone(),
        })
    }

    pub fn parse(cur: &mut ByteCursor, handler: &ChangeHandler) -> Result<Self> {
        let pos = cur.position();
        let version = cur.read_u32()?;
        if !(COMMON_VERSION_MIN..=COMMON_VERSION_MAX).contains(&version) {
            return Err(Error::UnsupportedVersion {
                version,
                offset: pos,
            });
        }
        let name_hash = cur.read_u32()?;
        let description_hash = cur.read_u32()?;
        let price = cur.read_u32()?;
        let name = cur.read_varint_string(StringEncoding::Utf8)?;
        let product_status = if version >= 0x0b { cur.read_u8()? } else { 0 };
        Ok(Self {
            version,
            name_hash,
            description_hash,
            price,
            name,
            product_status,
            handler: handler.clone(),
        })
    }

    pub fn unparse(&self, cur: &mut ByteCursor) -> Result<()> {
        cur.write_u32(self.version)?;
        cur.write_u32(self.name_hash)?;
        cur.write_u32(self.description_hash)?;
        cur.write_u32(self.price)?;
        cur.write_varint_string(&self.name, StringEncoding::Utf8)?;
        if self.version >= 0x0b {
            cur.write_u8(self.product_status)?;
        }
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn price(&self) -> u32 {
        self.price
    }

    pub fn set_name(&mut self, name: String) {
        if self.name != name {
            self.name = name;
            self.handler.notify();
        }
    }

    pub fn set_name_hash(&mut self, v: u32) {
        if self.name_hash != v {
            self.name_hash = v;
            self.handler.notify();
        }
    }

    pub fn set_description_hash(&mut self, v: u32) {
        if self.description_hash != v {
            self.description_hash = v;
            self.handler.notify();
        }
    }

    pub fn set_price(&mut self, v: u32) {
        if self.price != v {
            self.price = v;
            self.handler.notify();
        }
    }

    pub fn set_product_status(&mut self, v: u8) -> Result<()> {
        if self.version < 0x0b {
            return Err(Error::VersionGated {
                field: "ProductStatus",
                version: self.version,
            });
        }
        if self.product_status != v {
            self.product_status = v;
            self.handler.notify();
        }
        Ok(())
    }
}

impl Attach for CatalogCommon {
    fn attached(&self, handler: &ChangeHandler) -> Self {
        let mut clone = self.clone();
        clone.handler = handler.clone();
        clone
    }
}

impl PartialEq for CatalogCommon {
    fn eq(&self, other: &Self) -> bool {
        self.version == other.version
            && self.name_hash == other.name_hash
            && self.description_hash == other.description_hash
            && self.price == other.price
            && self.name == other.name
            && self.product_status == other.product_status
    }
}

impl std::fmt::Debug for CatalogCommon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogCommon")
            .field("version", &self.version)
            .field("name", &self.name)
            .field("price", &self.price)
            .finish()
    }
}

const COMMON_FIELDS: &[FieldDescriptor] = &[
    FieldDescriptor::new("Version", 1),
    FieldDescriptor::new("NameHash", 2),
    FieldDescriptor::new("DescriptionHash", 3),
    FieldDescriptor::new("Price", 4),
    FieldDescriptor::new("Name", 5),
    FieldDescriptor::new("ProductStatus", 6).since(0x0b),
];

impl ApiVersionedFields for CatalogCommon {
    fn field_table() -> &'static [FieldDescriptor] {
        COMMON_FIELDS
    }

    fn version(&self) -> u32 {
        self.version
    }

    fn get_field(&self, name: &str) -> Result<FieldValue> {
        check_field::<Self>(name, self.version)?;
        Ok(match name {
            "Version" => FieldValue::U32(self.version),
            "NameHash" => FieldValue::U32(self.name_hash),
            "DescriptionHash" => FieldValue::U32(self.description_hash),
            "Price" => FieldValue::U32(self.price),
            "Name" => FieldValue::Str(self.name.clone()),
            "ProductStatus" => FieldValue::U8(self.product_status),
            _ => unreachable!(),
        })
    }

    fn set_field(&mut self, name: &str, value: FieldValue) -> Result<()> {
        check_field::<Self>(name, self.version)?;
        match (name, &value) {
            ("NameHash", FieldValue::U32(v)) => self.set_name_hash(*v),
            ("DescriptionHash", FieldValue::U32(v)) => self.set_description_hash(*v),
            ("Price", FieldValue::U32(v)) => self.set_price(*v),
            ("Name", FieldValue::Str(v)) => self.set_name(v.clone()),
            ("ProductStatus", FieldValue::U8(v)) => self.set_product_status(*v)?,
            _ => {
                return Err(Error::TypeMismatch {
                    field: name.to_string(),
                    expected: "field-appropriate value",
                    found: value.type_name(),
                })
            }
        }
        Ok(())
    }
}

/// Tag-byte discriminated catalog value.
///
/// `Padding` entries are alignment filler: they survive a round trip but are
/// invisible to the written element count.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeCode {
    /// Tag 0x01: 7-bit length-prefixed UTF-8 string.
    Str(String),
    /// Tag 0x02: u32 value.
    U32(u32),
    /// Tag 0xFE: inert alignment padding.
    Padding,
}

impl Attach for TypeCode {
    fn attached(&self, _handler: &ChangeHandler) -> Self {
        self.clone()
    }
}

impl ListElement for TypeCode {
    fn read(cur: &mut ByteCursor, _handler: &ChangeHandler) -> Result<Self> {
        let offset = cur.position();
        match cur.read_u8()? {
            0x01 => Ok(TypeCode::Str(cur.read_varint_string(StringEncoding::Utf8)?)),
            0x02 => Ok(TypeCode::U32(cur.read_u32()?)),
            0xfe => Ok(TypeCode::Padding),
            tag => Err(Error::UnknownTag {
                tag: tag as u32,
                offset,
            }),
        }
    }

    fn write(&self, cur: &mut ByteCursor) -> Result<()> {
        match self {
            TypeCode::Str(s) => {
                cur.write_u8(0x01)?;
                cur.write_varint_string(s, StringEncoding::Utf8)
            }
            TypeCode::U32(v) => {
                cur.write_u8(0x02)?;
                cur.write_u32(*v)
            }
            TypeCode::Padding => cur.write_u8(0xfe),
        }
    }

    fn counts_toward_total(&self) -> bool {
        !matches!(self, TypeCode::Padding)
    }
}

pub struct CatalogResource {
    core: ResourceCore,
    version: u32,
    common: CatalogCommon,
    type_codes: DependentList<TypeCode>,
    /// Version 0x0D and later only.
    extra: Option<u8>,
    references: TgiBlockList,
    swatch_grouping: u64,
}

impl CatalogResource {
    /// Parses a catalog resource from its exact byte range.
    pub fn from_stream(requested_api_version: i32, data: Vec<u8>) -> Result<Self> {
        let _span = debug_span!("CatalogResource::parse", len = data.len()).entered();

        let mut core = ResourceCore::new(requested_api_version);
        let handler = core.handler();
        let mut cur = ByteCursor::new(data);

        let version = cur.read_u32()?;
        if !(CATALOG_VERSION_MIN..=CATALOG_VERSION_MAX).contains(&version) {
            return Err(Error::UnsupportedVersion { version, offset: 0 });
        }

        let header = read_offset_size(&mut cur)?;
        let common = CatalogCommon::parse(&mut cur, &handler)?;
        let type_codes = DependentList::parse(&mut cur, CountEncoding::U32, &handler)?;
        let extra = if version >= 0x0d {
            Some(cur.read_u8()?)
        } else {
            None
        };
        let references = TgiBlockList::parse(
            &mut cur,
            KeyOrder::Itg,
            header.expected_offset,
            header.size,
            8,
            &handler,
        )?;
        let swatch_grouping = cur.read_u64()?;
        cur.expect_eof()?;

        core.store(cur.into_inner());
        Ok(Self {
            core,
            version,
            common,
            type_codes,
            extra,
            references,
            swatch_grouping,
        })
    }

    /// Builder for a resource made from scratch at an explicit format
    /// version. Replaces the per-version constructor overloads of older
    /// tooling.
    pub fn build(version: u32) -> CatalogBuilder {
        CatalogBuilder::new(version)
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn common(&self) -> &CatalogCommon {
        &self.common
    }

    pub fn common_mut(&mut self) -> &mut CatalogCommon {
        &mut self.common
    }

    pub fn type_codes(&self) -> &DependentList<TypeCode> {
        &self.type_codes
    }

    pub fn type_codes_mut(&mut self) -> &mut DependentList<TypeCode> {
        &mut self.type_codes
    }

    pub fn references(&self) -> &TgiBlockList {
        &self.references
    }

    pub fn references_mut(&mut self) -> &mut TgiBlockList {
        &mut self.references
    }

    pub fn swatch_grouping(&self) -> u64 {
        self.swatch_grouping
    }

    pub fn set_swatch_grouping(&mut self, v: u64) {
        if self.swatch_grouping != v {
            self.swatch_grouping = v;
            self.core.mark_dirty();
        }
    }

    pub fn extra(&self) -> Result<u8> {
        self.extra.ok_or(Error::VersionGated {
            field: "Extra",
            version: self.version,
        })
    }

    pub fn set_extra(&mut self, v: u8) -> Result<()> {
        if self.version < 0x0d {
            return Err(Error::VersionGated {
                field: "Extra",
                version: self.version,
            });
        }
        if self.extra != Some(v) {
            self.extra = Some(v);
            self.core.mark_dirty();
        }
        Ok(())
    }
}

impl PartialEq for CatalogResource {
    fn eq(&self, other: &Self) -> bool {
        self.version == other.version
            && self.common == other.common
            && self.type_codes == other.type_codes
            && self.extra == other.extra
            && self.references == other.references
            && self.swatch_grouping == other.swatch_grouping
    }
}

impl std::fmt::Debug for CatalogResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogResource")
            .field("version", &self.version)
            .field("common", &self.common)
            .field("type_codes", &self.type_codes)
            .field("references", &self.references.len())
            .finish()
    }
}

const CATALOG_FIELDS: &[FieldDescriptor] = &[
    FieldDescriptor::new("Version", 1),
    FieldDescriptor::new("CommonBlock", 2),
    FieldDescriptor::new("TypeCodes", 3),
    FieldDescriptor::new("Extra", 4).since(0x0d),
    FieldDescriptor::new("References", 5),
    FieldDescriptor::new("SwatchGrouping", 6),
];

impl ApiVersionedFields for CatalogResource {
    fn field_table() -> &'static [FieldDescriptor] {
        CATALOG_FIELDS
    }

    fn version(&self) -> u32 {
        self.version
    }

    fn get_field(&self, name: &str) -> Result<FieldValue> {
        check_field::<Self>(name, self.version)?;
        Ok(match name {
            "Version" => FieldValue::U32(self.version),
            "Extra" => FieldValue::U8(self.extra.unwrap_or_default()),
            "References" => FieldValue::Keys(self.references.iter().map(|b| b.key()).collect()),
            "SwatchGrouping" => FieldValue::U64(self.swatch_grouping),
            "CommonBlock" | "TypeCodes" => {
                return Err(Error::InvalidArgument(format!(
                    "{name} is a composite field, use a dotted path or the typed accessor"
                )))
            }
            _ => unreachable!(),
        })
    }

    fn set_field(&mut self, name: &str, value: FieldValue) -> Result<()> {
        check_field::<Self>(name, self.version)?;
        match (name, &value) {
            ("Extra", FieldValue::U8(v)) => self.set_extra(*v)?,
            ("SwatchGrouping", FieldValue::U64(v)) => self.set_swatch_grouping(*v),
            ("References", FieldValue::Keys(keys)) => {
                self.references.clear();
                for key in keys {
                    self.references.push_key(*key);
                }
            }
            _ => {
                return Err(Error::TypeMismatch {
                    field: name.to_string(),
                    expected: "field-appropriate value",
                    found: value.type_name(),
                })
            }
        }
        Ok(())
    }

    fn nested(&self, name: &str) -> Option<&dyn ApiVersionedFields> {
        match name {
            "CommonBlock" => Some(&self.common),
            _ => None,
        }
    }

    fn nested_mut(&mut self, name: &str) -> Option<&mut dyn ApiVersionedFields> {
        match name {
            "CommonBlock" => Some(&mut self.common),
            _ => None,
        }
    }
}

impl Resource for CatalogResource {
    fn core(&self) -> &ResourceCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ResourceCore {
        &mut self.core
    }

    fn unparse(&self) -> Result<Vec<u8>> {
        let _span = debug_span!("CatalogResource::unparse").entered();

        let mut cur = ByteCursor::empty();
        cur.write_u32(self.version)?;
        let patch = OffsetSizePatch::reserve(&mut cur)?;
        self.common.unparse(&mut cur)?;
        self.type_codes.unparse(&mut cur)?;
        if self.version >= 0x0d {
            cur.write_u8(self.extra.unwrap_or_default())?;
        }
        let body_start = cur.position();
        self.references.unparse(&mut cur)?;
        patch.commit(&mut cur, body_start, 8)?;
        cur.write_u64(self.swatch_grouping)?;
        Ok(cur.into_inner())
    }
}

pub struct CatalogBuilder {
    version: u32,
    requested_api_version: i32,
    common_version: u32,
    name: String,
    name_hash: u32,
    description_hash: u32,
    price: u32,
    product_status: u8,
    type_codes: Vec<TypeCode>,
    references: Vec<ResourceKey>,
    swatch_grouping: u64,
    extra: Option<u8>,
}

impl CatalogBuilder {
    fn new(version: u32) -> Self {
        Self {
            version,
            requested_api_version: 0,
            common_version: COMMON_VERSION_MAX,
            name: String::new(),
            name_hash: 0,
            description_hash: 0,
            price: 0,
            product_status: 0,
            type_codes: Vec::new(),
            references: Vec::new(),
            swatch_grouping: 0,
            extra: None,
        }
    }

    pub fn requested_api_version(mut self, v: i32) -> Self {
        self.requested_api_version = v;
        self
    }

    pub fn common_version(mut self, v: u32) -> Self {
        self.common_version = v;
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn name_hash(mut self, v: u32) -> Self {
        self.name_hash = v;
        self
    }

    pub fn description_hash(mut self, v: u32) -> Self {
        self.description_hash = v;
        self
    }

    pub fn price(mut self, v: u32) -> Self {
        self.price = v;
        self
    }

    pub fn product_status(mut self, v: u8) -> Self {
        self.product_status = v;
        self
    }

    pub fn type_code(mut self, code: TypeCode) -> Self {
        self.type_codes.push(code);
        self
    }

    pub fn reference(mut self, key: ResourceKey) -> Self {
        self.references.push(key);
        self
    }

    pub fn swatch_grouping(mut self, v: u64) -> Self {
        self.swatch_grouping = v;
        self
    }

    /// Only valid for version 0x0D and later; checked in [`finish`](Self::finish).
    pub fn extra(mut self, v: u8) -> Self {
        self.extra = Some(v);
        self
    }

    pub fn finish(self) -> Result<CatalogResource> {
        if !(CATALOG_VERSION_MIN..=CATALOG_VERSION_MAX).contains(&self.version) {
            return Err(Error::InvalidArgument(format!(
                "catalog version 0x{:X} out of range",
                self.version
            )));
        }
        if self.extra.is_some() && self.version < 0x0d {
            return Err(Error::VersionGated {
                field: "Extra",
                version: self.version,
            });
        }

        let core = ResourceCore::new(self.requested_api_version);
        let handler = core.handler();

        let mut common = CatalogCommon::new(self.common_version, &handler)?;
        common.name = self.name;
        common.name_hash = self.name_hash;
        common.description_hash = self.description_hash;
        common.price = self.price;
        common.product_status = self.product_status;

        let mut type_codes = DependentList::new(CountEncoding::U32, &handler);
        for code in self.type_codes {
            type_codes.push(code);
        }
        let mut references = TgiBlockList::new(KeyOrder::Itg, &handler);
        for key in self.references {
            references.push_key(key);
        }

        let extra = if self.version >= 0x0d {
            Some(self.extra.unwrap_or_default())
        } else {
            None
        };

        Ok(CatalogResource {
            core,
            version: self.version,
            common,
            type_codes,
            extra,
            references,
            swatch_grouping: self.swatch_grouping,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::get_path;

    fn sample(version: u32) -> CatalogResource {
        let mut builder = CatalogResource::build(version)
            .name("counterTall")
            .name_hash(0xaabbccdd)
            .description_hash(0x11223344)
            .price(780)
            .product_status(0x03)
            .type_code(TypeCode::Str("wood".into()))
            .type_code(TypeCode::U32(0x1f))
            .reference(ResourceKey::new(0x0166038c, 0x80, 0xdead_beef_0000_0001))
            .reference(ResourceKey::new(0x0166038c, 0x80, 0xdead_beef_0000_0002))
            .swatch_grouping(0x42);
        if version >= 0x0d {
            builder = builder.extra(0x5a);
        }
        builder.finish().unwrap()
    }

    #[test]
    fn round_trip_both_versions() {
        for version in [0x0c, 0x0d] {
            let mut built = sample(version);
            let bytes = built.as_bytes().unwrap().to_vec();

            let mut parsed = CatalogResource::from_stream(0, bytes.clone()).unwrap();
            assert_eq!(parsed, built);

            // byte-exact re-encoding of library-produced bytes
            parsed.core.mark_dirty();
            assert_eq!(parsed.as_bytes().unwrap(), &bytes[..]);
        }
    }

    #[test]
    fn extra_field_is_version_gated() {
        let mut v0c = sample(0x0c);
        let bytes = v0c.as_bytes().unwrap().to_vec();
        let parsed = CatalogResource::from_stream(0, bytes).unwrap();

        assert!(matches!(
            parsed.get_field("Extra"),
            Err(Error::VersionGated {
                field: "Extra",
                version: 0x0c
            })
        ));
        assert!(!parsed.content_fields().contains(&"Extra"));

        let mut v0d = sample(0x0d);
        let bytes = v0d.as_bytes().unwrap().to_vec();
        let parsed = CatalogResource::from_stream(0, bytes).unwrap();
        assert_eq!(parsed.get_field("Extra").unwrap(), FieldValue::U8(0x5a));
    }

    #[test]
    fn building_with_gated_field_fails_early() {
        let err = CatalogResource::build(0x0c).extra(1).finish();
        assert!(matches!(
            err,
            Err(Error::VersionGated {
                field: "Extra",
                version: 0x0c
            })
        ));
    }

    #[test]
    fn padding_type_codes_round_trip_uncounted() {
        let mut res = sample(0x0c);
        res.type_codes_mut().insert(1, TypeCode::Padding);
        assert_eq!(res.type_codes().len(), 3);
        assert_eq!(res.type_codes().counted_len(), 2);

        let bytes = res.as_bytes().unwrap().to_vec();
        let parsed = CatalogResource::from_stream(0, bytes).unwrap();
        assert_eq!(
            parsed.type_codes().iter().cloned().collect::<Vec<_>>(),
            vec![
                TypeCode::Str("wood".into()),
                TypeCode::Padding,
                TypeCode::U32(0x1f)
            ]
        );
    }

    #[test]
    fn deep_mutation_dirties_and_reencodes() {
        let mut res = sample(0x0c);
        let original = res.as_bytes().unwrap().to_vec();
        assert!(!res.is_dirty());

        res.references_mut()
            .get_mut(1)
            .unwrap()
            .set_instance(0xfeed_f00d_0000_0000);
        assert!(res.is_dirty());

        let edited = res.as_bytes().unwrap().to_vec();
        assert_ne!(edited, original);
        assert_eq!(edited.len(), original.len());
        // exactly the mutated instance field differs
        let differing = edited
            .iter()
            .zip(&original)
            .filter(|(a, b)| a != b)
            .count();
        assert!(differing <= 8 && differing > 0);
    }

    #[test]
    fn dotted_path_reaches_common_block() {
        let res = sample(0x0c);
        assert_eq!(
            get_path(&res, "CommonBlock.Price").unwrap(),
            FieldValue::U32(780)
        );
        assert_eq!(
            get_path(&res, "CommonBlock.Name").unwrap(),
            FieldValue::Str("counterTall".into())
        );
        assert!(get_path(&res, "CommonBlock.Nope").is_err());
    }

    #[test]
    fn truncated_declared_size_fails_parse() {
        let mut res = sample(0x0c);
        let mut bytes = res.as_bytes().unwrap().to_vec();
        // shrink the backpatched size field by one
        let size = u32::from_le_bytes(bytes[8..12].try_into().unwrap());
        bytes[8..12].copy_from_slice(&(size - 1).to_le_bytes());

        assert!(matches!(
            CatalogResource::from_stream(0, bytes),
            Err(Error::SizeMismatch { .. })
        ));
    }

    #[test]
    fn unsupported_version_is_rejected() {
        let mut res = sample(0x0c);
        let mut bytes = res.as_bytes().unwrap().to_vec();
        bytes[0] = 0x0b;
        assert!(matches!(
            CatalogResource::from_stream(0, bytes),
            Err(Error::UnsupportedVersion {
                version: 0x0b,
                offset: 0
            })
        ));
    }
}
