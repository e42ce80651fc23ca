use std::io::SeekFrom;

use tracing::{debug_span, trace};

use crate::change::{Attach, ChangeHandler};
use crate::cursor::ByteCursor;
use crate::error::{Error, Result};
use crate::key::{KeyOrder, ResourceKey, TgiBlock};

/// How a dependent list's element count is persisted.
///
/// `External` lists never write a count themselves; the owner reads it
/// elsewhere in the format and is responsible for persisting it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountEncoding {
    U32,
    U8,
    External,
}

/// An element a [`DependentList`] knows how to read, write and re-parent.
pub trait ListElement: Attach + Clone + PartialEq + std::fmt::Debug {
    fn read(cur: &mut ByteCursor, handler: &ChangeHandler) -> Result<Self>;

    fn write(&self, cur: &mut ByteCursor) -> Result<()>;

    /// Inert padding elements return false: they round-trip through the
    /// stream but are excluded from the written count. Alignment quirk of
    /// some catalog layouts, preserved exactly as observed.
    fn counts_toward_total(&self) -> bool {
        true
    }
}

/// Ordered collection whose stream encoding (count policy) is owned by the
/// list, not by each element. Parse order mirrors write order exactly.
pub struct DependentList<T: ListElement> {
    items: Vec<T>,
    count_encoding: CountEncoding,
    handler: ChangeHandler,
}

impl<T: ListElement> DependentList<T> {
    pub fn new(count_encoding: CountEncoding, handler: &ChangeHandler) -> Self {
        Self {
            items: Vec::new(),
            count_encoding,
            handler: handler.clone(),
        }
    }

    /// Reads an inline count per `count_encoding`, then the elements.
    pub fn parse(
        cur: &mut ByteCursor,
        count_encoding: CountEncoding,
        handler: &ChangeHandler,
    ) -> Result<Self> {
        Self::parse_with(cur, count_encoding, handler, T::read)
    }

    /// Like [`parse`](Self::parse), with an explicit element factory. Used
    /// when element construction needs list-level configuration (a key
    /// order, a discriminator table).
    pub fn parse_with(
        cur: &mut ByteCursor,
        count_encoding: CountEncoding,
        handler: &ChangeHandler,
        factory: impl FnMut(&mut ByteCursor, &ChangeHandler) -> Result<T>,
    ) -> Result<Self> {
        let declared = match count_encoding {
            CountEncoding::U32 => cur.read_u32()?,
            CountEncoding::U8 => cur.read_u8()? as u32,
            CountEncoding::External => {
                return Err(Error::InvalidArgument(
                    "externally counted list must be parsed with parse_counted".to_string(),
                ))
            }
        };
        Self::parse_body(cur, count_encoding, declared, handler, factory)
    }

    /// Parses an externally counted list; `declared` was read elsewhere in
    /// the format by the owner.
    pub fn parse_counted(cur: &mut ByteCursor, declared: u32, handler: &ChangeHandler) -> Result<Self> {
        Self::parse_body(cur, CountEncoding::External, declared, handler, T::read)
    }

    pub fn parse_counted_with(
        cur: &mut ByteCursor,
        declared: u32,
        handler: &ChangeHandler,
        factory: impl FnMut(&mut ByteCursor, &ChangeHandler) -> Result<T>,
    ) -> Result<Self> {
        Self::parse_body(cur, CountEncoding::External, declared, handler, factory)
    }

    fn parse_body(
        cur: &mut ByteCursor,
        count_encoding: CountEncoding,
        declared: u32,
        handler: &ChangeHandler,
        mut factory: impl FnMut(&mut ByteCursor, &ChangeHandler) -> Result<T>,
    ) -> Result<Self> {
        let _span = debug_span!("DependentList::parse", declared).entered();

        let mut items = Vec::with_capacity(declared.min(1024) as usize);
        let mut counted = 0u32;
        while counted < declared {
            let element = factory(cur, handler)?;
            if element.counts_toward_total() {
                counted += 1;
            }
            items.push(element);
        }

        Ok(Self {
            items,
            count_encoding,
            handler: handler.clone(),
        })
    }

    /// Writes the count per this list's encoding, then each element in list
    /// order. The written count excludes padding elements.
    pub fn unparse(&self, cur: &mut ByteCursor) -> Result<()> {
        let count = self.counted_len() as u32;
        match self.count_encoding {
            CountEncoding::U32 => cur.write_u32(count)?,
            CountEncoding::U8 => {
                if count > u8::MAX as u32 {
                    return Err(Error::InvalidArgument(format!(
                        "{count} elements do not fit a u8 count prefix"
                    )));
                }
                cur.write_u8(count as u8)?;
            }
            CountEncoding::External => {}
        }
        for element in &self.items {
            element.write(cur)?;
        }
        Ok(())
    }

    pub fn count_encoding(&self) -> CountEncoding {
        self.count_encoding
    }

    pub fn handler(&self) -> &ChangeHandler {
        &self.handler
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Number of elements that count toward the persisted total.
    pub fn counted_len(&self) -> usize {
        self.items.iter().filter(|e| e.counts_toward_total()).count()
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.items.get(index)
    }

    /// Elements carry their own handler, so mutating one through its setters
    /// still reaches the owner.
    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        self.items.get_mut(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, T> {
        self.items.iter_mut()
    }

    /// Adopts `item`: it is cloned with this list's handler before insertion.
    pub fn push(&mut self, item: T) {
        self.items.push(item.attached(&self.handler));
        self.handler.notify();
    }

    pub fn insert(&mut self, index: usize, item: T) {
        self.items.insert(index, item.attached(&self.handler));
        self.handler.notify();
    }

    pub fn remove(&mut self, index: usize) -> T {
        let removed = self.items.remove(index);
        self.handler.notify();
        removed
    }

    pub fn clear(&mut self) {
        if !self.items.is_empty() {
            self.items.clear();
            self.handler.notify();
        }
    }
}

impl<T: ListElement> PartialEq for DependentList<T> {
    fn eq(&self, other: &Self) -> bool {
        self.items == other.items
    }
}

impl<T: ListElement> Attach for DependentList<T> {
    fn attached(&self, handler: &ChangeHandler) -> Self {
        Self {
            items: self.items.iter().map(|e| e.attached(handler)).collect(),
            count_encoding: self.count_encoding,
            handler: handler.clone(),
        }
    }
}

impl<T: ListElement> std::fmt::Debug for DependentList<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(&self.items).finish()
    }
}

impl<'a, T: ListElement> IntoIterator for &'a DependentList<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

impl ListElement for TgiBlock {
    /// Reads in the default TGI order. Order-configured lists go through the
    /// closure-factory constructors instead.
    fn read(cur: &mut ByteCursor, handler: &ChangeHandler) -> Result<Self> {
        TgiBlock::parse(cur, KeyOrder::default(), handler)
    }

    fn write(&self, cur: &mut ByteCursor) -> Result<()> {
        self.unparse(cur)
    }
}

/// Resource-key list whose count lives elsewhere in the owning format.
///
/// The owner reads the count from its own header and supplies it at parse
/// time; serializing this list writes the keys only.
#[derive(Debug, PartialEq)]
pub struct CountedTgiBlockList {
    list: DependentList<TgiBlock>,
    order: KeyOrder,
}

impl CountedTgiBlockList {
    pub fn new(order: KeyOrder, handler: &ChangeHandler) -> Self {
        Self {
            list: DependentList::new(CountEncoding::External, handler),
            order,
        }
    }

    pub fn parse(
        cur: &mut ByteCursor,
        order: KeyOrder,
        count: u32,
        handler: &ChangeHandler,
    ) -> Result<Self> {
        let list =
            DependentList::parse_counted_with(cur, count, handler, |cur, handler| {
                TgiBlock::parse(cur, order, handler)
            })?;
        Ok(Self { list, order })
    }

    pub fn unparse(&self, cur: &mut ByteCursor) -> Result<()> {
        self.list.unparse(cur)
    }

    pub fn order(&self) -> KeyOrder {
        self.order
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&TgiBlock> {
        self.list.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut TgiBlock> {
        self.list.get_mut(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TgiBlock> {
        self.list.iter()
    }

    pub fn push_key(&mut self, key: ResourceKey) {
        let block = TgiBlock::new(self.order, key, self.list.handler());
        self.list.push(block);
    }

    /// Adopts an existing block, rebinding it to this list's owner.
    pub fn push(&mut self, block: TgiBlock) {
        self.list.push(block);
    }

    pub fn remove(&mut self, index: usize) -> TgiBlock {
        self.list.remove(index)
    }
}

impl Attach for CountedTgiBlockList {
    fn attached(&self, handler: &ChangeHandler) -> Self {
        Self {
            list: self.list.attached(handler),
            order: self.order,
        }
    }
}

/// Size-delimited resource-key list with a backpatched (offset, size) header.
///
/// The owner reserves two u32 slots early in the stream, emits the list body
/// later, then seeks back and fills the slots in. `fudge` accounts for a
/// trailing fixed-size field some formats include in the recorded size.
#[derive(Debug, PartialEq)]
pub struct TgiBlockList {
    list: DependentList<TgiBlock>,
    order: KeyOrder,
}

impl TgiBlockList {
    pub fn new(order: KeyOrder, handler: &ChangeHandler) -> Self {
        Self {
            list: DependentList::new(CountEncoding::U32, handler),
            order,
        }
    }

    /// Parses the list body at the current position.
    ///
    /// In strict mode the cursor must already sit at `expected_offset`, and
    /// the bytes consumed plus `fudge` must equal `declared_size`. Either
    /// mismatch is fatal: silent drift would corrupt every subsequent field
    /// of the parent resource.
    pub fn parse(
        cur: &mut ByteCursor,
        order: KeyOrder,
        expected_offset: u64,
        declared_size: u32,
        fudge: u32,
        handler: &ChangeHandler,
    ) -> Result<Self> {
        let _span = debug_span!("TgiBlockList::parse", expected_offset, declared_size).entered();

        if crate::strict_checking() && cur.position() != expected_offset {
            return Err(Error::OffsetMismatch {
                expected: expected_offset,
                actual: cur.position(),
            });
        }

        let start = cur.position();
        let list = DependentList::parse_with(cur, CountEncoding::U32, handler, |cur, handler| {
            TgiBlock::parse(cur, order, handler)
        })?;

        let actual = cur.position() - start + fudge as u64;
        if crate::strict_checking() && actual != declared_size as u64 {
            return Err(Error::SizeMismatch {
                declared: declared_size as u64,
                actual,
            });
        }

        Ok(Self { list, order })
    }

    pub fn unparse(&self, cur: &mut ByteCursor) -> Result<()> {
        self.list.unparse(cur)
    }

    pub fn order(&self) -> KeyOrder {
        self.order
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&TgiBlock> {
        self.list.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut TgiBlock> {
        self.list.get_mut(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TgiBlock> {
        self.list.iter()
    }

    pub fn push_key(&mut self, key: ResourceKey) {
        let block = TgiBlock::new(self.order, key, self.list.handler());
        self.list.push(block);
    }

    /// Adopts an existing block, rebinding it to this list's owner.
    pub fn push(&mut self, block: TgiBlock) {
        self.list.push(block);
    }

    pub fn remove(&mut self, index: usize) -> TgiBlock {
        self.list.remove(index)
    }

    pub fn clear(&mut self) {
        self.list.clear();
    }
}

impl Attach for TgiBlockList {
    fn attached(&self, handler: &ChangeHandler) -> Self {
        Self {
            list: self.list.attached(handler),
            order: self.order,
        }
    }
}

/// Offset/size pair read from a resource header, resolved against the
/// position of the offset field itself.
#[derive(Debug, Clone, Copy)]
pub struct OffsetSize {
    /// Absolute stream position where the dependent body must begin.
    pub expected_offset: u64,
    pub size: u32,
}

/// Reads an (offset, size) header pair. The offset is recorded relative to
/// the byte immediately after the offset field.
pub fn read_offset_size(cur: &mut ByteCursor) -> Result<OffsetSize> {
    let pos = cur.position();
    let offset = cur.read_u32()?;
    let size = cur.read_u32()?;
    Ok(OffsetSize {
        expected_offset: pos + 4 + offset as u64,
        size,
    })
}

/// Reserved placeholder slots for a backpatched (offset, size) header.
#[must_use = "reserved placeholders must be committed once the body extent is known"]
pub struct OffsetSizePatch {
    at: u64,
}

impl OffsetSizePatch {
    /// Writes two zero u32 slots at the current position and remembers where
    /// they are.
    pub fn reserve(cur: &mut ByteCursor) -> Result<Self> {
        let at = cur.position();
        cur.write_u32(0)?;
        cur.write_u32(0)?;
        Ok(Self { at })
    }

    /// Seeks back and fills the placeholders. `body_start` is where the
    /// dependent body began; the recorded size covers `body_start` up to the
    /// current position plus `fudge`. Restores the cursor afterwards.
    pub fn commit(self, cur: &mut ByteCursor, body_start: u64, fudge: u32) -> Result<()> {
        let end = cur.position();
        let offset = (body_start - (self.at + 4)) as u32;
        let size = (end - body_start) as u32 + fudge;

        cur.seek(SeekFrom::Start(self.at))?;
        cur.write_u32(offset)?;
        cur.write_u32(size)?;
        cur.seek(SeekFrom::Start(end))?;

        trace!(offset, size, "backpatched offset/size header");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Tag-byte discriminated element with an inert padding variant.
    #[derive(Debug, Clone, PartialEq)]
    enum Code {
        Real(u32),
        Padding,
    }

    impl Attach for Code {
        fn attached(&self, _handler: &ChangeHandler) -> Self {
            self.clone()
        }
    }

    impl ListElement for Code {
        fn read(cur: &mut ByteCursor, _handler: &ChangeHandler) -> Result<Self> {
            let offset = cur.position();
            match cur.read_u8()? {
                0x01 => Ok(Code::Real(cur.read_u32()?)),
                0xfe => Ok(Code::Padding),
                tag => Err(Error::UnknownTag {
                    tag: tag as u32,
                    offset,
                }),
            }
        }

        fn write(&self, cur: &mut ByteCursor) -> Result<()> {
            match self {
                Code::Real(v) => {
                    cur.write_u8(0x01)?;
                    cur.write_u32(*v)
                }
                Code::Padding => cur.write_u8(0xfe),
            }
        }

        fn counts_toward_total(&self) -> bool {
            !matches!(self, Code::Padding)
        }
    }

    fn key(i: u64) -> ResourceKey {
        ResourceKey::new(0x1000, 0x80, i)
    }

    #[test]
    fn u32_counted_round_trip() {
        let handler = ChangeHandler::detached();
        let mut list = DependentList::new(CountEncoding::U32, &handler);
        list.push(Code::Real(1));
        list.push(Code::Real(2));

        let mut cur = ByteCursor::empty();
        list.unparse(&mut cur).unwrap();
        let bytes = cur.into_inner();
        assert_eq!(bytes[0..4], [2, 0, 0, 0]);

        let mut cur = ByteCursor::new(bytes.clone());
        let parsed: DependentList<Code> =
            DependentList::parse(&mut cur, CountEncoding::U32, &handler).unwrap();
        assert_eq!(parsed, list);

        let mut cur = ByteCursor::empty();
        parsed.unparse(&mut cur).unwrap();
        assert_eq!(cur.into_inner(), bytes);
    }

    #[test]
    fn padding_excluded_from_written_count() {
        let handler = ChangeHandler::detached();
        let mut list = DependentList::new(CountEncoding::U32, &handler);
        list.push(Code::Real(7));
        list.push(Code::Padding);
        list.push(Code::Real(9));
        assert_eq!(list.len(), 3);
        assert_eq!(list.counted_len(), 2);

        let mut cur = ByteCursor::empty();
        list.unparse(&mut cur).unwrap();
        let bytes = cur.into_inner();
        // count of 2, not 3
        assert_eq!(bytes[0..4], [2, 0, 0, 0]);

        let mut cur = ByteCursor::new(bytes);
        let parsed: DependentList<Code> =
            DependentList::parse(&mut cur, CountEncoding::U32, &handler).unwrap();
        // all three elements, in order
        assert_eq!(
            parsed.iter().cloned().collect::<Vec<_>>(),
            vec![Code::Real(7), Code::Padding, Code::Real(9)]
        );
        cur.expect_eof().unwrap();
    }

    #[test]
    fn u8_count_overflow_is_rejected() {
        let handler = ChangeHandler::detached();
        let mut list = DependentList::new(CountEncoding::U8, &handler);
        for i in 0..300 {
            list.push(Code::Real(i));
        }
        let mut cur = ByteCursor::empty();
        assert!(matches!(
            list.unparse(&mut cur),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn unknown_tag_names_byte_and_offset() {
        let handler = ChangeHandler::detached();
        let mut cur = ByteCursor::empty();
        cur.write_u32(1).unwrap();
        cur.write_u8(0x44).unwrap();
        let mut cur = ByteCursor::new(cur.into_inner());
        match DependentList::<Code>::parse(&mut cur, CountEncoding::U32, &handler) {
            Err(Error::UnknownTag { tag: 0x44, offset: 4 }) => {}
            other => panic!("expected UnknownTag at offset 4, got {other:?}"),
        }
    }

    #[test]
    fn externally_counted_list_writes_no_count() {
        let handler = ChangeHandler::detached();
        let mut list = CountedTgiBlockList::new(KeyOrder::Itg, &handler);
        list.push_key(key(1));
        list.push_key(key(2));
        list.push_key(key(3));

        let mut cur = ByteCursor::empty();
        list.unparse(&mut cur).unwrap();
        let bytes = cur.into_inner();
        assert_eq!(bytes.len(), 3 * 16);

        let mut cur = ByteCursor::new(bytes);
        let parsed = CountedTgiBlockList::parse(&mut cur, KeyOrder::Itg, 3, &handler).unwrap();
        assert_eq!(parsed, list);
    }

    #[test]
    fn size_delimited_list_checks_offset_and_size() {
        let handler = ChangeHandler::detached();
        let mut list = TgiBlockList::new(KeyOrder::Tgi, &handler);
        list.push_key(key(0xaa));
        list.push_key(key(0xbb));

        let mut cur = ByteCursor::empty();
        list.unparse(&mut cur).unwrap();
        let bytes = cur.into_inner();
        let body_size = bytes.len() as u32;

        let mut cur = ByteCursor::new(bytes.clone());
        let parsed =
            TgiBlockList::parse(&mut cur, KeyOrder::Tgi, 0, body_size, 0, &handler).unwrap();
        assert_eq!(parsed, list);

        // declared size short by one byte
        let mut cur = ByteCursor::new(bytes.clone());
        match TgiBlockList::parse(&mut cur, KeyOrder::Tgi, 0, body_size - 1, 0, &handler) {
            Err(Error::SizeMismatch { declared, actual }) => {
                assert_eq!(declared, body_size as u64 - 1);
                assert_eq!(actual, body_size as u64);
            }
            other => panic!("expected SizeMismatch, got {other:?}"),
        }

        // cursor not at the externally computed offset
        let mut cur = ByteCursor::new(bytes);
        assert!(matches!(
            TgiBlockList::parse(&mut cur, KeyOrder::Tgi, 4, body_size, 0, &handler),
            Err(Error::OffsetMismatch {
                expected: 4,
                actual: 0
            })
        ));
    }

    #[test]
    fn fudge_covers_trailing_field() {
        let handler = ChangeHandler::detached();
        let mut list = TgiBlockList::new(KeyOrder::Tgi, &handler);
        list.push_key(key(1));

        let mut cur = ByteCursor::empty();
        list.unparse(&mut cur).unwrap();
        cur.write_u64(0xdead).unwrap();
        let bytes = cur.into_inner();
        // recorded size includes the trailing u64
        let declared = bytes.len() as u32;

        let mut cur = ByteCursor::new(bytes);
        let parsed = TgiBlockList::parse(&mut cur, KeyOrder::Tgi, 0, declared, 8, &handler).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(cur.read_u64().unwrap(), 0xdead);
    }

    #[test]
    fn backpatch_round_trip() {
        let handler = ChangeHandler::detached();
        let mut cur = ByteCursor::empty();
        cur.write_u32(0x0c).unwrap();
        let patch = OffsetSizePatch::reserve(&mut cur).unwrap();
        cur.write_u16(0x1234).unwrap(); // body fields between header and list

        let mut list = TgiBlockList::new(KeyOrder::Tgi, &handler);
        list.push_key(key(5));
        let body_start = cur.position();
        list.unparse(&mut cur).unwrap();
        patch.commit(&mut cur, body_start, 0).unwrap();
        cur.write_u8(0xff).unwrap(); // cursor restored to the end before this

        let mut cur = ByteCursor::new(cur.into_inner());
        assert_eq!(cur.read_u32().unwrap(), 0x0c);
        let header = read_offset_size(&mut cur).unwrap();
        assert_eq!(header.expected_offset, body_start);
        assert_eq!(header.size, 4 + 16);
        assert_eq!(cur.read_u16().unwrap(), 0x1234);
        let parsed = TgiBlockList::parse(
            &mut cur,
            KeyOrder::Tgi,
            header.expected_offset,
            header.size,
            0,
            &handler,
        )
        .unwrap();
        assert_eq!(parsed.get(0).unwrap().instance(), 5);
        assert_eq!(cur.read_u8().unwrap(), 0xff);
    }

    #[test]
    fn push_adopts_element_into_owner_graph() {
        let handler = ChangeHandler::detached();
        let mut list = TgiBlockList::new(KeyOrder::Tgi, &handler);

        let foreign = ChangeHandler::detached();
        let block = TgiBlock::new(KeyOrder::Tgi, key(1), &foreign);
        list.push(block);
        assert!(handler.is_dirty());
        assert!(!foreign.is_dirty());

        // mutating the adopted element reaches the owner, not the donor
        list.get_mut(0).unwrap().set_instance(0x42);
        assert!(!foreign.is_dirty());
    }
}
