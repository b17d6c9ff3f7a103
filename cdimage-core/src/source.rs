//! Sector sources: the refcounted leaves and combinators that feed a
//! [`crate::Disc`] (§3.1, §4.1.1, §4.1.5).
//!
//! lxdream represents a sector source as a tagged struct with a
//! hand-rolled reference count and a table of function pointers
//! (`read_blocks`/`read_sectors`/`destroy`). Per the redesign notes in
//! §9 this becomes a closed enum dispatched through a shared trait,
//! and the manual ref-count becomes `Rc`'s own strong count — a source
//! is simply dropped (and its resources released) when its last `Rc`
//! goes away, which is the same "destroy only at zero refs" invariant
//! the original hand-rolled.

use std::cell::RefCell;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::rc::{Rc, Weak};

use crate::disc::{Disc, DiscState};
use crate::sector::{self, FieldMask, ReadMode, SectorMode, SectorType};
use crate::{CdError, CdResult, MAX_SECTOR_SIZE};

/// Shared handle to a sector source. Cloning bumps the `Rc` strong
/// count; the source is torn down once the last handle is dropped.
pub type SourceHandle = Rc<SectorSource>;

/// Behavior common to every sector source variant (§4.1.1).
pub trait SectorReader {
    /// The native sector mode of this source.
    fn mode(&self) -> SectorMode;
    /// Block count, or `0` for an unbounded/unknown-size source.
    fn size(&self) -> u32;
    /// Raw native-mode read of `count` contiguous blocks starting at `lba`.
    fn read_blocks(&self, lba: u32, count: u32, buf: &mut [u8]) -> CdResult<()>;
}

/// A refcounted, polymorphic producer of fixed-size blocks (§3.1). The
/// closed set of variants replaces lxdream's tagged struct + function
/// pointer table.
pub enum SectorSource {
    /// Always returns zero-filled blocks.
    Null(NullSource),
    /// Backed by a host file at a byte offset.
    File(FileSource),
    /// Backed by an in-memory buffer.
    Memory(MemorySource),
    /// Addresses a whole [`Disc`] by absolute LBA, spanning its tracks
    /// (lets a consumer such as [`crate::iso9660::IsoReader`] layer
    /// directly over a multi-track disc instead of a single track).
    Disc(DiscSource),
    /// Projects a track-relative LBA range onto the owning disc's own
    /// reads (used when a track has no independent backing, e.g. a
    /// physical MMC drive).
    Track(TrackSource),
}

impl SectorReader for SectorSource {
    fn mode(&self) -> SectorMode {
        match self {
            SectorSource::Null(s) => s.mode(),
            SectorSource::File(s) => s.mode(),
            SectorSource::Memory(s) => s.mode(),
            SectorSource::Disc(s) => s.mode(),
            SectorSource::Track(s) => s.mode(),
        }
    }

    fn size(&self) -> u32 {
        match self {
            SectorSource::Null(s) => s.size(),
            SectorSource::File(s) => s.size(),
            SectorSource::Memory(s) => s.size(),
            SectorSource::Disc(s) => s.size(),
            SectorSource::Track(s) => s.size(),
        }
    }

    fn read_blocks(&self, lba: u32, count: u32, buf: &mut [u8]) -> CdResult<()> {
        check_read(self.size(), lba, count)?;
        match self {
            SectorSource::Null(s) => s.read_blocks(lba, count, buf),
            SectorSource::File(s) => s.read_blocks(lba, count, buf),
            SectorSource::Memory(s) => s.read_blocks(lba, count, buf),
            SectorSource::Disc(s) => s.read_blocks(lba, count, buf),
            SectorSource::Track(s) => s.read_blocks(lba, count, buf),
        }
    }
}

fn check_read(size: u32, lba: u32, count: u32) -> CdResult<()> {
    if size != 0 && (lba >= size || lba.checked_add(count).map_or(true, |end| end > size)) {
        return Err(CdError::BadRead);
    }
    Ok(())
}

impl SectorSource {
    /// Higher-level read honoring an MMC-style read mode (§4.1.1). This
    /// is `default_sector_source_read_sectors` in lxdream, generalized
    /// over the trait instead of a function-pointer slot.
    pub fn read_sectors(&self, lba: u32, count: u32, mode: ReadMode, buf: &mut [u8]) -> CdResult<usize> {
        check_read(self.size(), lba, count)?;
        let native_mode = self.mode();

        match native_mode {
            SectorMode::Cdda => {
                if !matches!(mode.sector_type, SectorType::Any | SectorType::Cdda) {
                    return Err(CdError::BadReadMode);
                }
                if mode.fields.is_empty() {
                    return Ok(0);
                }
                let len = count as usize * MAX_SECTOR_SIZE;
                self.read_blocks(lba, count, &mut buf[..len])?;
                Ok(len)
            }
            m if m.is_raw() => {
                let mut written = 0;
                for i in 0..count {
                    let mut raw = [0u8; MAX_SECTOR_SIZE];
                    self.read_raw_sector(lba + i, &mut raw)?;
                    let actual_mode = sector::identify_sector(m, &raw);
                    if actual_mode == SectorMode::Unknown {
                        return Err(CdError::BadRead);
                    }
                    sector::is_legal_read(actual_mode, mode)?;
                    let extracted = sector::extract_fields(&raw, actual_mode, mode.fields)?;
                    buf[written..written + extracted.len()].copy_from_slice(&extracted);
                    written += extracted.len();
                }
                Ok(written)
            }
            _ => {
                sector::is_legal_read(native_mode, mode)?;
                if mode.fields.is_empty() {
                    Ok(0)
                } else if mode.fields == FieldMask::DATA {
                    let size = native_mode.block_size().unwrap_or(0);
                    let len = count as usize * size;
                    self.read_blocks(lba, count, &mut buf[..len])?;
                    Ok(len)
                } else if mode.fields == FieldMask::RAW {
                    for i in 0..count {
                        let slice = &mut buf[i as usize * MAX_SECTOR_SIZE..(i as usize + 1) * MAX_SECTOR_SIZE];
                        self.read_raw_sector(lba + i, slice.try_into().unwrap())?;
                    }
                    Ok(count as usize * MAX_SECTOR_SIZE)
                } else {
                    let mut written = 0;
                    for i in 0..count {
                        let mut raw = [0u8; MAX_SECTOR_SIZE];
                        self.read_raw_sector(lba + i, &mut raw)?;
                        let extracted = sector::extract_fields(&raw, native_mode, mode.fields)?;
                        buf[written..written + extracted.len()].copy_from_slice(&extracted);
                        written += extracted.len();
                    }
                    Ok(written)
                }
            }
        }
    }

    /// Read (or synthesize) a full raw sector at `lba` (§4.1.4).
    fn read_raw_sector(&self, lba: u32, buf: &mut [u8; MAX_SECTOR_SIZE]) -> CdResult<()> {
        let mode = self.mode();
        match mode {
            SectorMode::RawXA | SectorMode::RawNonXA => self.read_blocks(lba, 1, buf),
            SectorMode::SemirawMode2 => {
                buf[0..12].copy_from_slice(&sector::SYNC_PATTERN);
                sector::build_header(buf, SectorMode::Mode2Formless, lba as i64);
                self.read_blocks(lba, 1, &mut buf[16..])
            }
            SectorMode::Mode1 | SectorMode::Mode2Formless => {
                let size = mode.block_size().unwrap();
                let mut user_data = vec![0u8; size];
                self.read_blocks(lba, 1, &mut user_data)?;
                sector::encode_raw(buf, mode, lba as i64, &user_data)
            }
            SectorMode::Mode2Form1 | SectorMode::Mode2Form2 => {
                let size = mode.block_size().unwrap();
                let mut user_data = vec![0u8; size];
                self.read_blocks(lba, 1, &mut user_data)?;
                sector::encode_raw(buf, mode, lba as i64, &user_data)
            }
            _ => Err(CdError::BadRead),
        }
    }
}

/// Zero-filling sector source (§3.1).
pub struct NullSource {
    mode: SectorMode,
    size: u32,
}

impl NullSource {
    /// Create a new null source of the given mode and block count.
    pub fn new(mode: SectorMode, size: u32) -> SourceHandle {
        Rc::new(SectorSource::Null(NullSource { mode, size }))
    }
}

impl SectorReader for NullSource {
    fn mode(&self) -> SectorMode {
        self.mode
    }
    fn size(&self) -> u32 {
        self.size
    }
    fn read_blocks(&self, _lba: u32, count: u32, buf: &mut [u8]) -> CdResult<()> {
        let size = self.mode.block_size().unwrap_or(0);
        buf[..count as usize * size].fill(0);
        Ok(())
    }
}

/// Host-file-backed sector source at a fixed byte offset (§3.1).
///
/// Shares the underlying `File` with an `Rc<RefCell<File>>` so that a
/// source created via [`FileSource::new_from_source`] holds a strong
/// reference to its parent the same way lxdream's
/// `file_sector_source_new_source` shares the parent's file
/// descriptor.
pub struct FileSource {
    file: Rc<RefCell<File>>,
    mode: SectorMode,
    /// Byte offset of block 0 within the file.
    offset: u32,
    size: u32,
}

impl FileSource {
    /// Open `path` and wrap it as a sector source.
    pub fn open(path: &std::path::Path, mode: SectorMode, offset: u32, size: u32) -> std::io::Result<SourceHandle> {
        let file = File::open(path)?;
        Ok(Self::new(Rc::new(RefCell::new(file)), mode, offset, size))
    }

    /// Wrap an already-open file.
    pub fn new(file: Rc<RefCell<File>>, mode: SectorMode, offset: u32, size: u32) -> SourceHandle {
        Rc::new(SectorSource::File(FileSource { file, mode, offset, size }))
    }

    /// Construct a new source sharing the file descriptor of `parent`,
    /// at a different offset/mode/size. Keeps the parent alive via the
    /// shared `Rc<RefCell<File>>`.
    pub fn new_from_source(parent: &FileSource, mode: SectorMode, offset: u32, size: u32) -> SourceHandle {
        Self::new(parent.file.clone(), mode, offset, size)
    }
}

impl SectorReader for FileSource {
    fn mode(&self) -> SectorMode {
        self.mode
    }
    fn size(&self) -> u32 {
        self.size
    }
    fn read_blocks(&self, lba: u32, count: u32, buf: &mut [u8]) -> CdResult<()> {
        let block_size = self.mode.block_size().ok_or(CdError::BadRead)?;
        let mut file = self.file.borrow_mut();
        let pos = self.offset as u64 + lba as u64 * block_size as u64;
        file.seek(SeekFrom::Start(pos)).map_err(|_| CdError::ReadError)?;
        let want = count as usize * block_size;
        let dst = &mut buf[..want];
        // Last block may be short (0-padded) if the file is truncated.
        let mut read = 0;
        while read < want {
            match file.read(&mut dst[read..]) {
                Ok(0) => break,
                Ok(n) => read += n,
                Err(_) => return Err(CdError::ReadError),
            }
        }
        dst[read..].fill(0);
        Ok(())
    }
}

/// In-memory-buffer-backed sector source (§3.1).
pub struct MemorySource {
    data: Vec<u8>,
    mode: SectorMode,
    size: u32,
}

impl MemorySource {
    /// Wrap `data` as a sector source of `mode`.
    pub fn new(data: Vec<u8>, mode: SectorMode) -> SourceHandle {
        let block_size = mode.block_size().unwrap_or(1).max(1);
        let size = (data.len() / block_size) as u32;
        Rc::new(SectorSource::Memory(MemorySource { data, mode, size }))
    }
}

impl SectorReader for MemorySource {
    fn mode(&self) -> SectorMode {
        self.mode
    }
    fn size(&self) -> u32 {
        self.size
    }
    fn read_blocks(&self, lba: u32, count: u32, buf: &mut [u8]) -> CdResult<()> {
        let block_size = self.mode.block_size().ok_or(CdError::BadRead)?;
        let start = lba as usize * block_size;
        let len = count as usize * block_size;
        buf[..len].copy_from_slice(&self.data[start..start + len]);
        Ok(())
    }
}

/// Whole-disc-backed sector source (§3.1): reads are absolute LBAs
/// dispatched across whichever track covers them, via [`Disc::read_sectors`].
/// Its native "mode" is nominal (the last data track's, or `Mode1` if the
/// disc has none) since [`SectorReader::mode`] only reports a single
/// value — callers that care about per-track mode should go through
/// [`Disc`] directly instead.
pub struct DiscSource {
    disc: Disc,
}

impl DiscSource {
    /// Wrap `disc` as a sector source addressed by absolute LBA.
    pub fn new(disc: Disc) -> SourceHandle {
        Rc::new(SectorSource::Disc(DiscSource { disc }))
    }
}

impl SectorReader for DiscSource {
    fn mode(&self) -> SectorMode {
        self.disc.get_last_data_track().map(|t| t.mode).unwrap_or(SectorMode::Mode1)
    }
    fn size(&self) -> u32 {
        self.disc.leadout_lba()
    }
    fn read_blocks(&self, lba: u32, count: u32, buf: &mut [u8]) -> CdResult<()> {
        let mode = self.mode();
        let block_size = mode.block_size().ok_or(CdError::BadRead)?;
        let want = count as usize * block_size;
        let n = self.disc.read_sectors(lba, count, mode.default_read_mode(), &mut buf[..want])?;
        if n != want {
            return Err(CdError::ReadError);
        }
        Ok(())
    }
}

/// Sector source that forwards reads to its owning disc at a
/// track-relative offset (§3.1, §9). Holds a non-owning [`Weak`] back
/// to the disc rather than a strong reference — see DESIGN.md for why
/// this departs from the naive cyclic-ownership description in §3.1.
pub struct TrackSource {
    disc: Weak<RefCell<DiscState>>,
    base_lba: u32,
    mode: SectorMode,
    size: u32,
}

impl TrackSource {
    /// Create a track-projection source over `disc`, starting at
    /// `base_lba` in the disc's own address space.
    pub fn new(disc: Weak<RefCell<DiscState>>, base_lba: u32, mode: SectorMode, size: u32) -> SourceHandle {
        Rc::new(SectorSource::Track(TrackSource { disc, base_lba, mode, size }))
    }
}

impl SectorReader for TrackSource {
    fn mode(&self) -> SectorMode {
        self.mode
    }
    fn size(&self) -> u32 {
        self.size
    }
    fn read_blocks(&self, lba: u32, count: u32, buf: &mut [u8]) -> CdResult<()> {
        let disc = self.disc.upgrade().ok_or(CdError::NoDisc)?;
        let disc = disc.borrow();
        disc.base_read_blocks(self.base_lba + lba, count, buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_source_reads_zeros() {
        let src = NullSource::new(SectorMode::Mode1, 10);
        let mut buf = [0xFFu8; 2048];
        src.read_blocks(0, 1, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn out_of_range_is_bad_read() {
        let src = NullSource::new(SectorMode::Mode1, 10);
        let mut buf = [0u8; 2048 * 2];
        assert_eq!(src.read_blocks(9, 2, &mut buf), Err(CdError::BadRead));
        assert_eq!(src.read_blocks(10, 1, &mut buf), Err(CdError::BadRead));
    }

    #[test]
    fn memory_source_roundtrips_data_field() {
        let mut data = vec![0u8; 2048 * 4];
        data[2048] = 0x42;
        let src = MemorySource::new(data, SectorMode::Mode1);
        let mut buf = [0u8; 2048];
        src.read_blocks(1, 1, &mut buf).unwrap();
        assert_eq!(buf[0], 0x42);
    }
}
