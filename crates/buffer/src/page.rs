//! Fixed-layout page header, slotted-page payload, and the CRC32 codec.
//!
//! A page is `page_size` bytes: a 24-byte fixed header, a tuple region
//! growing forward from the end of the header, and a slot directory growing
//! backward from the end of the page. Widened with the fields the spec's
//! page header names (`magic`, `version`, `page_type`, `flags`,
//! `next_page_id`, `checksum`) and a CRC32 checksum covering
//! header-minus-checksum plus the full payload region.

use common::{DbError, DbResult};

pub const MAGIC: u32 = 0x5343_4442; // "SCDB"
pub const VERSION: u16 = 1;
pub const HEADER_LEN: usize = 24;
/// Byte width of one slot-directory entry: `row_id: u64, offset: u16, len: u16`.
pub const SLOT_LEN: usize = 12;

/// Sentinel slot length marking a tombstoned (deleted) slot.
pub const TOMBSTONE: u16 = 0;
/// Sentinel slot length marking a forwarding pointer left behind by an
/// in-place update that couldn't fit its new payload where the old one was.
pub const FORWARD_MARKER: u16 = u16::MAX;
/// Byte length of a forwarding pointer payload: a `PageId` plus a slot.
pub const FORWARD_PAYLOAD_LEN: usize = 8 + 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum PageType {
    Data = 0,
    Index = 1,
    Free = 2,
    Directory = 3,
}

impl PageType {
    fn from_u8(v: u8) -> DbResult<Self> {
        match v {
            0 => Ok(PageType::Data),
            1 => Ok(PageType::Index),
            2 => Ok(PageType::Free),
            3 => Ok(PageType::Directory),
            other => Err(DbError::Corruption(format!("unknown page_type {other}"))),
        }
    }
}

/// Bit flags stored in the page header's `flags` byte.
pub const FLAG_ENCRYPTED: u8 = 0b0000_0001;

#[derive(Clone, Copy, Debug)]
pub struct PageHeader {
    pub magic: u32,
    pub version: u16,
    pub page_type: PageType,
    pub flags: u8,
    /// Number of slot-directory entries, including tombstoned and
    /// forwarded ones — i.e. the directory's physical length, not the
    /// count of currently-live rows. Tombstones are reclaimed lazily by
    /// compaction (`§4.5`), not by shrinking this count eagerly.
    pub entry_count: u16,
    /// Offset of the first free byte in the tuple region, which grows
    /// forward from `HEADER_LEN`. The slot directory grows backward from
    /// the page's tail; the two regions meet in the middle as the page
    /// fills.
    pub free_space_offset: u16,
    pub next_page_id: u64,
    pub checksum: u32,
}

impl PageHeader {
    fn new(page_type: PageType) -> Self {
        PageHeader {
            magic: MAGIC,
            version: VERSION,
            page_type,
            flags: 0,
            entry_count: 0,
            free_space_offset: HEADER_LEN as u16,
            next_page_id: 0,
            checksum: 0,
        }
    }

    fn write_to(&self, buf: &mut [u8]) {
        buf[0..4].copy_from_slice(&self.magic.to_le_bytes());
        buf[4..6].copy_from_slice(&self.version.to_le_bytes());
        buf[6] = self.page_type as u8;
        buf[7] = self.flags;
        buf[8..10].copy_from_slice(&self.entry_count.to_le_bytes());
        buf[10..12].copy_from_slice(&self.free_space_offset.to_le_bytes());
        buf[12..20].copy_from_slice(&self.next_page_id.to_le_bytes());
        buf[20..24].copy_from_slice(&self.checksum.to_le_bytes());
    }

    fn read_from(buf: &[u8]) -> DbResult<Self> {
        let magic = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        let version = u16::from_le_bytes(buf[4..6].try_into().unwrap());
        let page_type = PageType::from_u8(buf[6])?;
        let flags = buf[7];
        let entry_count = u16::from_le_bytes(buf[8..10].try_into().unwrap());
        let free_space_offset = u16::from_le_bytes(buf[10..12].try_into().unwrap());
        let next_page_id = u64::from_le_bytes(buf[12..20].try_into().unwrap());
        let checksum = u32::from_le_bytes(buf[20..24].try_into().unwrap());
        Ok(PageHeader {
            magic,
            version,
            page_type,
            flags,
            entry_count,
            free_space_offset,
            next_page_id,
            checksum,
        })
    }
}

#[derive(Clone, Copy, Debug)]
struct Slot {
    row_id: u64,
    offset: u16,
    len: u16,
}

impl Slot {
    fn write_to(&self, buf: &mut [u8]) {
        buf[0..8].copy_from_slice(&self.row_id.to_le_bytes());
        buf[8..10].copy_from_slice(&self.offset.to_le_bytes());
        buf[10..12].copy_from_slice(&self.len.to_le_bytes());
    }

    fn read_from(buf: &[u8]) -> Self {
        Slot {
            row_id: u64::from_le_bytes(buf[0..8].try_into().unwrap()),
            offset: u16::from_le_bytes(buf[8..10].try_into().unwrap()),
            len: u16::from_le_bytes(buf[10..12].try_into().unwrap()),
        }
    }

    fn is_tombstone(&self) -> bool {
        self.len == TOMBSTONE
    }

    fn is_forward(&self) -> bool {
        self.len == FORWARD_MARKER
    }
}

/// Computes the CRC32 over everything but the checksum field: the first 20
/// header bytes followed by the full payload region.
pub fn checksum(buf: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&buf[0..20]);
    hasher.update(&buf[HEADER_LEN..]);
    hasher.finalize()
}

/// Returns `true` iff `buf` has a recognised magic/version and its stored
/// checksum matches the recomputed one.
pub fn validate(buf: &[u8]) -> DbResult<()> {
    let header = PageHeader::read_from(buf)?;
    if header.magic != MAGIC {
        return Err(DbError::Corruption(format!(
            "bad page magic: {:#x}",
            header.magic
        )));
    }
    if header.version != VERSION {
        return Err(DbError::Corruption(format!(
            "unsupported page version: {}",
            header.version
        )));
    }
    let expected = checksum(buf);
    if expected != header.checksum {
        return Err(DbError::Corruption(format!(
            "checksum mismatch: stored {:#x}, computed {:#x}",
            header.checksum, expected
        )));
    }
    Ok(())
}

/// An in-memory page: fixed-size byte buffer plus the logical id it was
/// last read from or allocated as.
#[derive(Clone, Debug)]
pub struct Page {
    pub id: u64,
    pub data: Vec<u8>,
}

impl Page {
    pub fn new(id: u64, page_type: PageType, page_size: usize) -> Self {
        let mut page = Page {
            id,
            data: vec![0u8; page_size],
        };
        page.write_header(&PageHeader::new(page_type));
        page
    }

    pub fn from_bytes(id: u64, data: Vec<u8>) -> DbResult<Self> {
        validate(&data)?;
        Ok(Page { id, data })
    }

    pub fn header(&self) -> DbResult<PageHeader> {
        PageHeader::read_from(&self.data)
    }

    fn write_header(&mut self, header: &PageHeader) {
        header.write_to(&mut self.data);
    }

    pub fn page_type(&self) -> DbResult<PageType> {
        Ok(self.header()?.page_type)
    }

    pub fn next_page_id(&self) -> DbResult<Option<u64>> {
        let header = self.header()?;
        Ok((header.next_page_id != 0).then_some(header.next_page_id))
    }

    pub fn set_next_page_id(&mut self, next: Option<u64>) -> DbResult<()> {
        let mut header = self.header()?;
        header.next_page_id = next.unwrap_or(0);
        self.write_header(&header);
        Ok(())
    }

    /// Recomputes and stores the checksum over the page's current bytes.
    /// Must be called before the page is handed to the page cache for
    /// encryption and disk I/O.
    pub fn seal_checksum(&mut self) {
        let mut header = self.header().expect("page header always decodable");
        header.checksum = 0;
        header.write_to(&mut self.data);
        let sum = checksum(&self.data);
        header.checksum = sum;
        header.write_to(&mut self.data);
    }

    /// Slot directory entries are laid out backward from the page's tail:
    /// slot 0 occupies the last `SLOT_LEN` bytes, slot 1 the `SLOT_LEN`
    /// bytes before that, and so on.
    fn slot_offset(&self, slot_idx: u16) -> Option<usize> {
        self.data.len().checked_sub((slot_idx as usize + 1) * SLOT_LEN)
    }

    fn read_slot(&self, slot_idx: u16) -> DbResult<Slot> {
        let start = self
            .slot_offset(slot_idx)
            .filter(|&start| start >= HEADER_LEN)
            .ok_or_else(|| DbError::Storage(format!("slot {slot_idx} out of bounds")))?;
        let end = start + SLOT_LEN;
        Ok(Slot::read_from(&self.data[start..end]))
    }

    fn write_slot(&mut self, slot_idx: u16, slot: &Slot) -> DbResult<()> {
        let start = self
            .slot_offset(slot_idx)
            .filter(|&start| start >= HEADER_LEN)
            .ok_or_else(|| DbError::Storage(format!("slot {slot_idx} out of bounds")))?;
        let end = start + SLOT_LEN;
        slot.write_to(&mut self.data[start..end]);
        Ok(())
    }

    pub fn free_space(&self) -> DbResult<usize> {
        let header = self.header()?;
        let dir_start = self.data.len() - header.entry_count as usize * SLOT_LEN;
        let payload_end = usize::from(header.free_space_offset);
        Ok(dir_start.saturating_sub(payload_end))
    }

    pub fn can_fit(&self, payload_len: usize) -> DbResult<bool> {
        Ok(self.free_space()? >= payload_len + SLOT_LEN)
    }

    /// Appends `bytes` as a new tuple, returning the slot index it landed
    /// in. Used both for fresh inserts and for relocating a row during an
    /// update that doesn't fit in its original slot.
    pub fn append_tuple(&mut self, row_id: u64, bytes: &[u8]) -> DbResult<u16> {
        if bytes.len() > u16::MAX as usize {
            return Err(DbError::Storage("row exceeds maximum tuple size".into()));
        }
        let mut header = self.header()?;
        if header.entry_count == u16::MAX {
            return Err(DbError::Storage("slot directory is full".into()));
        }
        if !self.can_fit(bytes.len())? {
            return Err(DbError::Storage("page full".into()));
        }

        let slot_idx = header.entry_count;
        let len = bytes.len() as u16;
        let start = header.free_space_offset;
        let new_free_offset = start + len;
        self.data[start as usize..new_free_offset as usize].copy_from_slice(bytes);

        self.write_slot(
            slot_idx,
            &Slot {
                row_id,
                offset: start,
                len,
            },
        )?;

        header.entry_count += 1;
        header.free_space_offset = new_free_offset;
        self.write_header(&header);
        Ok(slot_idx)
    }

    /// Reads the raw tuple bytes at `slot_idx`. Returns `Ok(None)` for a
    /// tombstoned slot and `Ok(Some(Forward(..)))`-equivalent handling is
    /// the caller's job via [`Page::forward_target`].
    pub fn read_tuple(&self, slot_idx: u16) -> DbResult<Option<&[u8]>> {
        let header = self.header()?;
        if slot_idx >= header.entry_count {
            return Err(DbError::Storage(format!("invalid slot {slot_idx}")));
        }
        let slot = self.read_slot(slot_idx)?;
        if slot.is_tombstone() {
            return Ok(None);
        }
        let start = slot.offset as usize;
        let end = start + slot.len as usize;
        Ok(Some(&self.data[start..end]))
    }

    pub fn is_forward(&self, slot_idx: u16) -> DbResult<bool> {
        Ok(self.read_slot(slot_idx)?.is_forward())
    }

    pub fn forward_target(&self, slot_idx: u16) -> DbResult<(u64, u16)> {
        let slot = self.read_slot(slot_idx)?;
        let start = slot.offset as usize;
        let page_id = u64::from_le_bytes(self.data[start..start + 8].try_into().unwrap());
        let target_slot = u16::from_le_bytes(self.data[start + 8..start + 10].try_into().unwrap());
        Ok((page_id, target_slot))
    }

    /// Overwrites `slot_idx`'s directory entry to point at `target`,
    /// writing the forwarding payload into the page's tuple region.
    pub fn write_forward(&mut self, slot_idx: u16, target_page: u64, target_slot: u16) -> DbResult<()> {
        let mut payload = [0u8; FORWARD_PAYLOAD_LEN];
        payload[0..8].copy_from_slice(&target_page.to_le_bytes());
        payload[8..10].copy_from_slice(&target_slot.to_le_bytes());

        let old_slot = self.read_slot(slot_idx)?;
        if old_slot.len as usize >= FORWARD_PAYLOAD_LEN {
            // Reuse the existing tuple region in place.
            let start = old_slot.offset as usize;
            self.data[start..start + FORWARD_PAYLOAD_LEN].copy_from_slice(&payload);
            self.write_slot(
                slot_idx,
                &Slot {
                    row_id: old_slot.row_id,
                    offset: old_slot.offset,
                    len: FORWARD_MARKER,
                },
            )
        } else {
            if !self.can_fit(FORWARD_PAYLOAD_LEN)? {
                return Err(DbError::Storage(
                    "no room left to write a forwarding pointer".into(),
                ));
            }
            let header = self.header()?;
            let start = header.free_space_offset;
            let new_free_offset = start + FORWARD_PAYLOAD_LEN as u16;
            self.data[start as usize..new_free_offset as usize].copy_from_slice(&payload);
            self.write_slot(
                slot_idx,
                &Slot {
                    row_id: old_slot.row_id,
                    offset: start,
                    len: FORWARD_MARKER,
                },
            )?;
            let mut header = header;
            header.free_space_offset = new_free_offset;
            self.write_header(&header);
            Ok(())
        }
    }

    /// Overwrites `slot_idx`'s bytes in place. Only valid when `bytes.len()`
    /// is exactly the slot's current reserved length.
    pub fn overwrite_tuple(&mut self, slot_idx: u16, bytes: &[u8]) -> DbResult<()> {
        let slot = self.read_slot(slot_idx)?;
        if slot.len as usize != bytes.len() {
            return Err(DbError::Storage(
                "overwrite_tuple requires an identical-length payload".into(),
            ));
        }
        let start = slot.offset as usize;
        self.data[start..start + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    pub fn tombstone(&mut self, slot_idx: u16) -> DbResult<()> {
        let mut slot = self.read_slot(slot_idx)?;
        if slot.is_tombstone() {
            return Err(DbError::NotFound(format!("slot {slot_idx} already deleted")));
        }
        slot.len = TOMBSTONE;
        self.write_slot(slot_idx, &slot)
    }

    pub fn entry_count(&self) -> DbResult<u16> {
        Ok(self.header()?.entry_count)
    }

    /// Largest `row_id` recorded in this page's slot directory, across
    /// live, tombstoned, and forwarded slots alike. Used to seed a fresh
    /// row-id counter when a heap file is reopened.
    pub fn max_row_id(&self) -> DbResult<Option<u64>> {
        let header = self.header()?;
        let mut max = None;
        for i in 0..header.entry_count {
            let slot = self.read_slot(i)?;
            max = Some(max.map_or(slot.row_id, |m: u64| m.max(slot.row_id)));
        }
        Ok(max)
    }
}
