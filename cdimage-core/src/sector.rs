//! Sector modes, MMC read-mode words, field extraction and the raw
//! sector codec (ECC/EDC synthesis, mode identification).
//!
//! Grounded on lxdream's `drivers/cdrom/sector.c`/`sector.h`: the field
//! position table, the legal-field bitmaps and the raw sector layout
//! are transcribed from there.

use crate::{CdError, CdResult};

/// The closed set of sector modes a [`SectorSource`](crate::SectorSource)
/// can report (§3.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SectorMode {
    /// Mode could not be determined.
    Unknown,
    /// Standard 2352-byte audio (CD-DA) sector.
    Cdda,
    /// Mode 1 data sector (2048 bytes of user data).
    Mode1,
    /// Mode 2 sector with no sub-structure (rare).
    Mode2Formless,
    /// Mode 2 / Form 1 data sector (2048 bytes of user data, with ECC).
    Mode2Form1,
    /// Mode 2 / Form 2 data sector (2324 bytes of user data, no ECC).
    Mode2Form2,
    /// 2336-byte Mode 2 XA sector with subheader, no sync/header/ECC.
    SemirawMode2,
    /// Full 2352-byte raw sector within an XA session.
    RawXA,
    /// Full 2352-byte raw sector within a non-XA session.
    RawNonXA,
}

impl SectorMode {
    /// All sector modes in the same order as lxdream's `sector_mode_t`.
    const ALL: [SectorMode; 9] = [
        SectorMode::Unknown,
        SectorMode::Cdda,
        SectorMode::Mode1,
        SectorMode::Mode2Formless,
        SectorMode::Mode2Form1,
        SectorMode::Mode2Form2,
        SectorMode::SemirawMode2,
        SectorMode::RawXA,
        SectorMode::RawNonXA,
    ];

    fn index(self) -> usize {
        Self::ALL.iter().position(|&m| m == self).unwrap()
    }

    /// Native block size in bytes for this sector mode, or `None` for
    /// [`SectorMode::Unknown`].
    pub fn block_size(self) -> Option<usize> {
        const SIZES: [usize; 9] = [0, 2352, 2048, 2336, 2048, 2324, 2336, 2352, 2352];
        match SIZES[self.index()] {
            0 => None,
            size => Some(size),
        }
    }

    /// Default MMC read-mode word for a native read of this sector mode.
    pub fn default_read_mode(self) -> ReadMode {
        use SectorType::*;
        match self {
            SectorMode::Unknown => ReadMode { sector_type: Any, fields: FieldMask::empty() },
            SectorMode::Cdda => ReadMode { sector_type: Cdda, fields: FieldMask::DATA },
            SectorMode::Mode1 => ReadMode { sector_type: Mode1, fields: FieldMask::DATA },
            SectorMode::Mode2Formless => ReadMode { sector_type: Mode2, fields: FieldMask::DATA },
            SectorMode::Mode2Form1 => ReadMode { sector_type: Mode2Form1, fields: FieldMask::DATA },
            SectorMode::Mode2Form2 => ReadMode { sector_type: Mode2Form1, fields: FieldMask::DATA },
            SectorMode::SemirawMode2 => ReadMode {
                sector_type: Mode2,
                fields: FieldMask::DATA | FieldMask::SUBHEADER | FieldMask::ECC,
            },
            SectorMode::RawXA | SectorMode::RawNonXA => ReadMode { sector_type: Any, fields: FieldMask::RAW },
        }
    }

    /// True for the raw/semiraw modes whose actual per-sector mode has
    /// to be identified by inspecting the sector header (§4.1.2).
    pub fn is_raw(self) -> bool {
        matches!(self, SectorMode::RawXA | SectorMode::RawNonXA | SectorMode::SemirawMode2)
    }

    /// Whether this mode belongs to an XA session (Mode 2 Form 1/2, or
    /// the raw carriers for one).
    pub fn is_xa(self) -> bool {
        matches!(
            self,
            SectorMode::Mode2Form1 | SectorMode::Mode2Form2 | SectorMode::SemirawMode2 | SectorMode::RawXA
        )
    }
}

/// MMC `sector_type` nibble of a read-mode word (§4.1.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectorType {
    /// Matches any sector mode.
    Any,
    /// Only matches [`SectorMode::Cdda`].
    Cdda,
    /// Only matches [`SectorMode::Mode1`] or [`SectorMode::Mode2Form1`].
    Mode1,
    /// Only matches [`SectorMode::Mode2Formless`].
    Mode2,
    /// Only matches [`SectorMode::Mode1`] or [`SectorMode::Mode2Form1`].
    Mode2Form1,
    /// Only matches [`SectorMode::Mode2Form2`].
    Mode2Form2,
}

bitflags::bitflags! {
    /// Which byte ranges of a raw sector a read should return (§4.1.2, §4.1.3).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FieldMask: u8 {
        /// 12-byte sync pattern.
        const SYNC = 0b10000;
        /// 3-byte MSF + 1-byte mode header.
        const HEADER = 0b01000;
        /// 8-byte XA subheader.
        const SUBHEADER = 0b00100;
        /// User data payload.
        const DATA = 0b00010;
        /// Layer-2 EDC/ECC trailer.
        const ECC = 0b00001;
        /// Shorthand for the full raw sector.
        const RAW = Self::SYNC.bits() | Self::HEADER.bits() | Self::SUBHEADER.bits()
            | Self::DATA.bits() | Self::ECC.bits();
    }
}

/// A resolved MMC-style read-mode word (§4.1.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadMode {
    /// Sector-type constraint.
    pub sector_type: SectorType,
    /// Requested field combination.
    pub fields: FieldMask,
}

/// `(sector, header, subheader, data, ecc, end)` byte offsets for a
/// sector mode, transcribed from lxdream's `sector_field_positions`.
const FIELD_POSITIONS: [[u32; 6]; 6] = [
    [0, 0, 0, 0, 0, 0],          // Unknown
    [0, 0, 0, 0, 2352, 2352],    // CDDA
    [0, 12, 16, 16, 2064, 2352], // Mode 1
    [0, 12, 16, 16, 2352, 2352], // Mode 2 formless
    [0, 12, 16, 24, 2072, 2352], // Mode 2 form 1
    [0, 12, 16, 24, 2352, 2352], // Mode 2 form 2
];

fn field_positions(mode: SectorMode) -> Option<[u32; 6]> {
    let idx = match mode {
        SectorMode::Unknown => 0,
        SectorMode::Cdda => 1,
        SectorMode::Mode1 => 2,
        SectorMode::Mode2Formless => 3,
        SectorMode::Mode2Form1 => 4,
        SectorMode::Mode2Form2 => 5,
        _ => return None,
    };
    Some(FIELD_POSITIONS[idx])
}

/// Legal field combinations (indexed by `fields.bits() as usize`) for a
/// non-XA (Mode 1 / Mode 2 formless) read, transcribed from
/// `legal_nonxa_fields`.
const LEGAL_NONXA_FIELDS: [bool; 32] = [
    true, true, true, true, true, false, true, true, true, false, true, true, true, false, true, true, true, false,
    false, false, true, false, true, true, false, false, false, false, true, false, true, true,
];

/// Legal field combinations for an XA (Mode 2 Form 1/2) read,
/// transcribed from `legal_xa_fields`.
const LEGAL_XA_FIELDS: [bool; 32] = [
    true, true, true, true, true, false, false, false, true, false, true, true, true, false, true, true, true, false,
    false, false, true, false, false, false, false, false, false, false, true, false, true, true,
];

/// Check that `(sector_mode, read_mode)` is a legal pairing (§4.1.2).
pub fn is_legal_read(sector_mode: SectorMode, read_mode: ReadMode) -> CdResult<()> {
    use SectorType::*;
    match read_mode.sector_type {
        Any => {}
        Cdda => {
            if sector_mode != SectorMode::Cdda {
                return Err(CdError::BadReadMode);
            }
        }
        Mode1 | Mode2Form1 => {
            if sector_mode != SectorMode::Mode1 && sector_mode != SectorMode::Mode2Form1 {
                return Err(CdError::BadReadMode);
            }
        }
        Mode2Form2 => {
            if sector_mode != SectorMode::Mode2Form2 {
                return Err(CdError::BadReadMode);
            }
        }
        SectorType::Mode2 => {
            if sector_mode != SectorMode::Mode2Formless {
                return Err(CdError::BadReadMode);
            }
        }
    }

    match sector_mode {
        SectorMode::Cdda => Ok(()),
        SectorMode::Mode2Form1 | SectorMode::Mode2Form2 => {
            if LEGAL_XA_FIELDS[read_mode.fields.bits() as usize] {
                Ok(())
            } else {
                Err(CdError::BadField)
            }
        }
        SectorMode::Mode1 | SectorMode::Mode2Formless => {
            if LEGAL_NONXA_FIELDS[read_mode.fields.bits() as usize] {
                Ok(())
            } else {
                Err(CdError::BadField)
            }
        }
        _ => Err(CdError::BadField),
    }
}

/// Extract the contiguous byte range `raw_sector[start..end]` matching
/// `fields` for `mode` (§4.1.3). Fails with [`CdError::BadField`] if the
/// requested fields are not contiguous in the raw sector layout.
pub fn extract_fields(raw_sector: &[u8], mode: SectorMode, fields: FieldMask) -> CdResult<Vec<u8>> {
    let positions = field_positions(mode).ok_or(CdError::BadField)?;

    let mut start: Option<u32> = None;
    let mut end = 0u32;
    for (i, &bit) in [FieldMask::SYNC, FieldMask::HEADER, FieldMask::SUBHEADER, FieldMask::DATA, FieldMask::ECC]
        .iter()
        .enumerate()
    {
        if fields.contains(bit) {
            let pos_start = positions[i];
            match start {
                None => start = Some(pos_start),
                Some(_) if end != pos_start => return Err(CdError::BadField),
                Some(_) => {}
            }
            end = positions[i + 1];
        }
    }

    match start {
        None => Ok(Vec::new()),
        Some(s) => {
            let s = s as usize;
            let e = end as usize;
            raw_sector.get(s..e).map(<[u8]>::to_vec).ok_or(CdError::BadRead)
        }
    }
}

/// 12-byte CD-ROM sync pattern: `00 FF*10 00`.
pub const SYNC_PATTERN: [u8; 12] = [0, 255, 255, 255, 255, 255, 255, 255, 255, 255, 255, 0];

/// Identify the true sector mode of a raw frame by inspecting the mode
/// byte (and, for XA, the subheader) at bytes 12..=15/23 (§4.1.2).
pub fn identify_sector(raw_mode: SectorMode, buf: &[u8]) -> SectorMode {
    if buf.len() < 24 {
        return SectorMode::Unknown;
    }
    let mode_byte = buf[15];
    match raw_mode {
        SectorMode::SemirawMode2 | SectorMode::RawXA => match mode_byte {
            1 => SectorMode::Mode1,
            2 => {
                if buf[18] & 0x20 == 0 {
                    SectorMode::Mode2Form1
                } else {
                    SectorMode::Mode2Form2
                }
            }
            _ => SectorMode::Unknown,
        },
        SectorMode::RawNonXA => match mode_byte {
            1 => SectorMode::Mode1,
            2 => SectorMode::Mode2Formless,
            _ => SectorMode::Unknown,
        },
        other => other,
    }
}

/// Build the 4-byte MSF header (`m, s, f, mode`) for `lba` and write it
/// into `buf[12..16]`.
pub fn build_header(buf: &mut [u8], mode: SectorMode, lba: i64) {
    let total_frames = (lba + crate::MSF_START as i64).max(0) as u32;
    let m = total_frames / crate::FRAMES_PER_MINUTE;
    let s = (total_frames / crate::FRAMES_PER_SECOND) % crate::SECONDS_PER_MINUTE;
    let f = total_frames % crate::FRAMES_PER_SECOND;

    buf[12] = to_bcd(m as u8);
    buf[13] = to_bcd(s as u8);
    buf[14] = to_bcd(f as u8);
    buf[15] = match mode {
        SectorMode::Mode1 => 1,
        SectorMode::Mode2Formless | SectorMode::Mode2Form1 | SectorMode::Mode2Form2 => 2,
        _ => 0,
    };
}

fn to_bcd(v: u8) -> u8 {
    ((v / 10) << 4) | (v % 10)
}

/// Synthesize a raw sector from cooked user data for modes that carry
/// ECC/EDC (Mode 1, Mode 2 Formless, Mode 2 Form 1/2), writing sync,
/// header and the layer-2 EDC/ECC trailer into `buf` (§4.1.4).
///
/// `buf` must be [`crate::MAX_SECTOR_SIZE`] bytes; `user_data` is copied
/// into the data field at the position appropriate for `mode`.
pub fn encode_raw(buf: &mut [u8], mode: SectorMode, lba: i64, user_data: &[u8]) -> CdResult<()> {
    if buf.len() < crate::MAX_SECTOR_SIZE {
        return Err(CdError::BadRead);
    }
    buf[0..12].copy_from_slice(&SYNC_PATTERN);
    build_header(buf, mode, lba);

    match mode {
        SectorMode::Mode1 => {
            buf[16..16 + user_data.len().min(2048)].copy_from_slice(&user_data[..user_data.len().min(2048)]);
            buf[2064..2076].fill(0); // reserved
            crate::ecc::encode_l2_mode1(buf);
        }
        SectorMode::Mode2Formless => {
            buf[16..16 + user_data.len().min(2336)].copy_from_slice(&user_data[..user_data.len().min(2336)]);
        }
        SectorMode::Mode2Form1 => {
            buf[16..20].fill(0);
            buf[20..24].fill(0);
            buf[24..24 + user_data.len().min(2048)].copy_from_slice(&user_data[..user_data.len().min(2048)]);
            crate::ecc::encode_l2_mode2_form1(buf);
        }
        SectorMode::Mode2Form2 => {
            buf[16..20].copy_from_slice(&0x0020_0000u32.to_le_bytes());
            buf[20..24].copy_from_slice(&0x0020_0000u32.to_le_bytes());
            buf[24..24 + user_data.len().min(2324)].copy_from_slice(&user_data[..user_data.len().min(2324)]);
            crate::ecc::encode_edc_mode2_form2(buf);
        }
        _ => return Err(CdError::BadField),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_sizes_match_table() {
        assert_eq!(SectorMode::Cdda.block_size(), Some(2352));
        assert_eq!(SectorMode::Mode1.block_size(), Some(2048));
        assert_eq!(SectorMode::Mode2Form2.block_size(), Some(2324));
        assert_eq!(SectorMode::SemirawMode2.block_size(), Some(2336));
    }

    #[test]
    fn any_matches_everything() {
        let read_mode = ReadMode { sector_type: SectorType::Any, fields: FieldMask::DATA };
        assert!(is_legal_read(SectorMode::Mode1, read_mode).is_ok());
        assert!(is_legal_read(SectorMode::Cdda, read_mode).is_ok());
    }

    #[test]
    fn mismatched_type_is_bad_read_mode() {
        let read_mode = ReadMode { sector_type: SectorType::Cdda, fields: FieldMask::DATA };
        assert_eq!(is_legal_read(SectorMode::Mode1, read_mode), Err(CdError::BadReadMode));
    }

    #[test]
    fn noncontiguous_fields_rejected() {
        // sync + data but not header/subheader: non-contiguous for Mode1
        let fields = FieldMask::SYNC | FieldMask::DATA;
        let raw = vec![0u8; 2352];
        assert_eq!(extract_fields(&raw, SectorMode::Mode1, fields), Err(CdError::BadField));
    }

    #[test]
    fn data_only_extraction_is_contiguous() {
        let mut raw = vec![0u8; 2352];
        raw[16] = 0xAB;
        let data = extract_fields(&raw, SectorMode::Mode1, FieldMask::DATA).unwrap();
        assert_eq!(data.len(), 2048);
        assert_eq!(data[0], 0xAB);
    }

    #[test]
    fn identify_xa_raw_modes() {
        let mut buf = vec![0u8; 24];
        buf[15] = 2;
        buf[18] = 0x00;
        assert_eq!(identify_sector(SectorMode::RawXA, &buf), SectorMode::Mode2Form1);
        buf[18] = 0x20;
        assert_eq!(identify_sector(SectorMode::RawXA, &buf), SectorMode::Mode2Form2);
    }
}
