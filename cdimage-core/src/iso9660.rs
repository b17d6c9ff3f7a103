//! ISO-9660 filesystem reader layered over any Mode-1/Mode-2-Form-1
//! sector source (§4.1.8), grounded on `isoread.c`/`iso_impl.h`.

use std::cell::OnceCell;
use std::fmt::Write as _;

use crate::sector::SectorMode;
use crate::source::SectorReader;
use crate::{CdError, Error, Result, SectorSource, SourceHandle};

const SUPERBLOCK_OFFSET: u32 = 16;
const PRIMARY_DESCRIPTOR: u8 = 1;
const TERMINAL_DESCRIPTOR: u8 = 0xFF;
const MAGIC: &[u8; 5] = b"CD001";
const SECTOR_SIZE: usize = 2048;

/// One entry of a directory listing (§4.1.8). Subdirectories are
/// loaded on first traversal and cached for the reader's lifetime.
pub struct DirEntry {
    /// File (or subdirectory) name, as stored on disc.
    pub name: String,
    /// File size in bytes.
    pub size: u32,
    /// Whether this entry is a subdirectory.
    pub is_dir: bool,
    /// LBA of the first extent, relative to the filesystem's own disc.
    pub start_lba: u32,
    /// Size in bytes of a leading XA record, if present (skipped on read).
    pub xa_size: u32,
    /// Non-zero if the file's extents are interleaved (unsupported, §4.1.8).
    pub interleave_gap: u8,
    /// Interleave unit size, paired with `interleave_gap`.
    pub interleave_size: u8,
    subdir: OnceCell<Dir>,
}

/// An in-memory directory listing (§4.1.8).
pub struct Dir {
    /// Entries, excluding the `.`/`..` self and parent records.
    pub entries: Vec<DirEntry>,
}

impl Dir {
    fn find(&self, component: &str) -> Option<&DirEntry> {
        if component.contains(';') {
            self.entries.iter().find(|e| e.name.eq_ignore_ascii_case(component))
        } else {
            self.entries.iter().find(|e| match e.name.split_once(';') {
                Some((stem, _)) => stem.eq_ignore_ascii_case(component),
                None => e.name.eq_ignore_ascii_case(component),
            })
        }
    }
}

/// A mounted ISO-9660 filesystem.
pub struct IsoReader {
    source: SourceHandle,
    source_offset: u32,
    fs_start: u32,
    volume_label: String,
    root: Dir,
}

impl IsoReader {
    /// Mount the filesystem found at `fs_start` (an LBA relative to the
    /// disc) on `source`, whose own block 0 sits at `source_offset`
    /// (§4.1.8).
    pub fn open(source: SourceHandle, source_offset: u32, fs_start: u32) -> Result<IsoReader> {
        let mut buf = [0u8; SECTOR_SIZE];
        let mut i = 0u32;
        loop {
            read_sector(&source, source_offset, fs_start + SUPERBLOCK_OFFSET + i, &mut buf)?;
            if &buf[1..6] != MAGIC {
                return Err(Error::FileInvalid {
                    path: Default::default(),
                    desc: "ISO9660 filesystem not found".into(),
                });
            }
            let desc_type = buf[0];
            if desc_type == TERMINAL_DESCRIPTOR {
                return Err(Error::FileInvalid { path: Default::default(), desc: "no primary volume descriptor".into() });
            }
            if desc_type == PRIMARY_DESCRIPTOR {
                break;
            }
            i += 1;
        }

        if buf[6] != 1 {
            return Err(Error::FileInvalid { path: Default::default(), desc: "incompatible ISO9660 version".into() });
        }

        let volume_label = String::from_utf8_lossy(&buf[40..72]).trim_end().to_string();

        let root_dirent = &buf[156..190];
        let root_lba = u32::from_le_bytes(root_dirent[2..6].try_into().unwrap());
        let root_size = u32::from_le_bytes(root_dirent[10..14].try_into().unwrap());

        let root = read_dir(&source, source_offset, root_lba, root_size)?;

        Ok(IsoReader { source, source_offset, fs_start, volume_label, root })
    }

    /// The volume label, right-trimmed of padding spaces.
    pub fn volume_label(&self) -> &str {
        &self.volume_label
    }

    /// LBA the filesystem's superblock was found at.
    pub fn fs_start(&self) -> u32 {
        self.fs_start
    }

    /// The root directory listing.
    pub fn root_dir(&self) -> &Dir {
        &self.root
    }

    /// Resolve `pathname` (`/`-separated, case-insensitive, optionally
    /// `;version`-qualified) to a directory entry, loading intervening
    /// subdirectories on first traversal (§4.1.8).
    pub fn get_file(&self, pathname: &str) -> Option<&DirEntry> {
        let mut components = pathname.split('/').filter(|c| !c.is_empty());
        let mut dir: &Dir = &self.root;
        let mut current = components.next()?;
        loop {
            let entry = dir.find(current)?;
            match components.next() {
                None => return Some(entry),
                Some(next) => {
                    if !entry.is_dir {
                        return None;
                    }
                    dir = self.ensure_subdir(entry).ok()?;
                    current = next;
                }
            }
        }
    }

    fn ensure_subdir<'s>(&'s self, entry: &'s DirEntry) -> Result<&'s Dir> {
        if let Some(dir) = entry.subdir.get() {
            return Ok(dir);
        }
        let dir = read_dir(&self.source, self.source_offset, entry.start_lba, entry.size)?;
        let _ = entry.subdir.set(dir);
        Ok(entry.subdir.get().expect("just set"))
    }

    /// Read `byte_count` bytes starting at `offset` within `entry`'s
    /// data, handling unaligned head/tail sectors (§4.1.8). Interleaved
    /// files (`interleave_gap != 0`) are rejected.
    pub fn read_file(&self, entry: &DirEntry, offset: u32, byte_count: u32, buf: &mut [u8]) -> Result<()> {
        if offset.checked_add(byte_count).map_or(true, |end| end > entry.size) {
            return Err(CdError::BadRead.into());
        }
        if entry.interleave_gap != 0 {
            return Err(CdError::BadRead.into());
        }

        let mut lba = entry.start_lba + (offset / SECTOR_SIZE as u32) + entry.xa_size.div_ceil(SECTOR_SIZE as u32);
        let mut written = 0u32;
        let mut remaining = byte_count;
        let mut tmp = [0u8; SECTOR_SIZE];

        let align = offset % SECTOR_SIZE as u32;
        if align != 0 {
            read_sector(&self.source, self.source_offset, lba, &mut tmp)?;
            let len = (SECTOR_SIZE as u32 - align).min(remaining);
            buf[..len as usize].copy_from_slice(&tmp[align as usize..align as usize + len as usize]);
            written += len;
            remaining -= len;
            lba += 1;
        }

        let whole_sectors = remaining / SECTOR_SIZE as u32;
        if whole_sectors > 0 {
            let len = whole_sectors as usize * SECTOR_SIZE;
            read_sectors(&self.source, self.source_offset, lba, whole_sectors, &mut buf[written as usize..written as usize + len])?;
            written += len as u32;
            remaining -= len as u32;
            lba += whole_sectors;
        }

        if remaining > 0 {
            read_sector(&self.source, self.source_offset, lba, &mut tmp)?;
            buf[written as usize..(written + remaining) as usize].copy_from_slice(&tmp[..remaining as usize]);
        }
        Ok(())
    }

    /// Render the root directory listing, lxdream `isofs_reader_print_dir`-style.
    pub fn print_root_dir(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Total {} files", self.root.entries.len());
        for entry in &self.root.entries {
            let _ = writeln!(out, "{:7} {}", entry.size, entry.name);
        }
        out
    }
}

fn read_sector(source: &SectorSource, source_offset: u32, lba: u32, buf: &mut [u8]) -> Result<()> {
    read_sectors(source, source_offset, lba, 1, buf)
}

fn read_sectors(source: &SectorSource, source_offset: u32, lba: u32, count: u32, buf: &mut [u8]) -> Result<()> {
    if lba < source_offset {
        return Err(CdError::BadRead.into());
    }
    let mode = SectorMode::Mode2Form1.default_read_mode();
    source.read_sectors(lba - source_offset, count, mode, buf)?;
    Ok(())
}

fn read_dir(source: &SectorSource, source_offset: u32, lba: u32, size: u32) -> Result<Dir> {
    let sector_count = (size as usize + SECTOR_SIZE - 1) / SECTOR_SIZE;
    let mut raw = vec![0u8; sector_count * SECTOR_SIZE];
    read_sectors(source, source_offset, lba, sector_count as u32, &mut raw)?;

    let mut entries = Vec::new();
    let mut offset = 0usize;
    while offset < size as usize {
        let record_len = raw[offset] as usize;
        if record_len == 0 {
            // Zero-padding to the next sector boundary.
            offset = (offset / SECTOR_SIZE + 1) * SECTOR_SIZE;
            continue;
        }
        if offset + record_len > raw.len() || record_len < 33 {
            break;
        }
        let rec = &raw[offset..offset + record_len];
        let file_id_len = rec[32] as usize;
        if file_id_len == 0 || file_id_len + 33 > record_len {
            break;
        }
        offset += record_len;

        if file_id_len == 1 && (rec[33] == 0 || rec[33] == 1) {
            continue; // self / parent-dir reference
        }

        let name = String::from_utf8_lossy(&rec[33..33 + file_id_len]).into_owned();
        let flags = rec[25];
        entries.push(DirEntry {
            name,
            size: u32::from_le_bytes(rec[10..14].try_into().unwrap()),
            is_dir: flags & 0x02 != 0,
            start_lba: u32::from_le_bytes(rec[2..6].try_into().unwrap()),
            xa_size: 0,
            interleave_gap: rec[27],
            interleave_size: rec[26],
            subdir: OnceCell::new(),
        });
    }

    Ok(Dir { entries })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;

    fn dirent(name: &str, lba: u32, size: u32, is_dir: bool) -> Vec<u8> {
        let mut rec = vec![0u8; 33 + name.len()];
        rec[2..6].copy_from_slice(&lba.to_le_bytes());
        rec[10..14].copy_from_slice(&size.to_le_bytes());
        rec[25] = if is_dir { 0x02 } else { 0 };
        rec[32] = name.len() as u8;
        rec[33..].copy_from_slice(name.as_bytes());
        rec[0] = rec.len() as u8;
        rec
    }

    fn build_image() -> Vec<u8> {
        let mut image = vec![0u8; 2048 * 20];

        let mut root = Vec::new();
        root.extend(dirent("\u{0}", 18, 2048, true)); // self
        root.extend(dirent("\u{1}", 0, 0, true)); // parent
        root.extend(dirent("HELLO.TXT", 19, 11, false));
        image[18 * 2048..18 * 2048 + root.len()].copy_from_slice(&root);

        let pvd_off = 16 * 2048;
        image[pvd_off] = PRIMARY_DESCRIPTOR;
        image[pvd_off + 1..pvd_off + 6].copy_from_slice(MAGIC);
        image[pvd_off + 6] = 1;
        image[pvd_off + 40..pvd_off + 45].copy_from_slice(b"TESTV");
        let root_dirent_off = pvd_off + 156;
        image[root_dirent_off + 2..root_dirent_off + 6].copy_from_slice(&18u32.to_le_bytes());
        image[root_dirent_off + 10..root_dirent_off + 14].copy_from_slice(&2048u32.to_le_bytes());

        image[17 * 2048] = TERMINAL_DESCRIPTOR;
        image[17 * 2048 + 1..17 * 2048 + 6].copy_from_slice(MAGIC);

        image[19 * 2048..19 * 2048 + 11].copy_from_slice(b"hello world");

        image
    }

    #[test]
    fn mounts_and_lists_root() {
        let source = MemorySource::new(build_image(), SectorMode::Mode2Form1);
        let iso = IsoReader::open(source, 0, 0).unwrap();
        assert_eq!(iso.volume_label(), "TESTV");
        assert_eq!(iso.root_dir().entries.len(), 1);
        assert_eq!(iso.root_dir().entries[0].name, "HELLO.TXT");
    }

    #[test]
    fn reads_file_contents() {
        let source = MemorySource::new(build_image(), SectorMode::Mode2Form1);
        let iso = IsoReader::open(source, 0, 0).unwrap();
        let entry = iso.get_file("hello.txt").unwrap();
        let mut buf = [0u8; 11];
        iso.read_file(entry, 0, 11, &mut buf).unwrap();
        assert_eq!(&buf, b"hello world");
    }

    #[test]
    fn mounts_over_a_disc_source() {
        use crate::disc::{Disc, TocData};
        use crate::source::DiscSource;
        use crate::track::{Track, TrackFlags};

        let image = build_image();
        let block_count = (image.len() / 2048) as u32;
        let data_source = MemorySource::new(image, SectorMode::Mode2Form1);
        let track = Track::new(1, 1, 0, TrackFlags::DATA, data_source);
        let toc = TocData { tracks: vec![track], session_count: 1, leadout: block_count, mcn: [0u8; 14], name: None };
        let disc = Disc::from_toc(toc);

        let source = DiscSource::new(disc);
        let iso = IsoReader::open(source, 0, 0).unwrap();
        assert_eq!(iso.volume_label(), "TESTV");
        let entry = iso.get_file("hello.txt").unwrap();
        let mut buf = [0u8; 11];
        iso.read_file(entry, 0, 11, &mut buf).unwrap();
        assert_eq!(&buf, b"hello world");
    }
}
