//! SCSI/MMC packet pass-through to a physical optical drive (§4.1.7).
//!
//! The host-specific half of a packet transport (actually writing a
//! 12-byte CDB to a SCSI generic device and reading back the data
//! phase) is out of scope for this crate — callers implement
//! [`PacketTransport`] against whatever the host OS offers (Linux
//! `sg`, a USB-class driver, ...), mirroring the pass-through split in
//! lxdream's `drivers/cdrom/linux/scsi_if.c`.

use std::cell::RefCell;
use std::rc::Weak;

use log::{debug, warn};

use crate::bcd::bcd_msf_to_lba;
use crate::disc::DiscState;
use crate::sector::SectorMode;
use crate::source::TrackSource;
use crate::track::{Track, TrackFlags};
use crate::{CdError, CdResult, MAX_TRACKS};

/// READ TOC/PMA/ATIP (§4.1.7).
pub const CMD_READ_TOC: u8 = 0x43;
/// READ CD (§4.1.7).
pub const CMD_READ_CD: u8 = 0xBE;
/// PLAY AUDIO(12) (§4.1.7).
pub const CMD_PLAY_AUDIO: u8 = 0xA5;
/// STOP PLAY/SCAN (§4.1.7).
pub const CMD_STOP: u8 = 0x4E;
/// TEST UNIT READY.
pub const CMD_TEST_UNIT_READY: u8 = 0x00;

/// A 12-byte SCSI/MMC command descriptor block.
pub type Cdb = [u8; 12];

/// Sends a 12-byte CDB to a physical drive and retrieves the data
/// phase. Implemented by the host-specific glue that owns the actual
/// device handle; this crate only builds CDBs and parses replies.
pub trait PacketTransport {
    /// Issue `cdb`, reading up to `data.len()` bytes of response into
    /// `data`. Returns the number of bytes actually transferred.
    fn send_packet(&self, cdb: &Cdb, data: &mut [u8]) -> CdResult<usize>;

    /// `TEST UNIT READY` — `Ok(())` if media is present and spun up,
    /// [`CdError::NoDisc`] if the tray is open/empty,
    /// [`CdError::Reset`] if a unit-attention condition (e.g. a disc
    /// swap) hasn't been cleared yet.
    fn test_unit_ready(&self) -> CdResult<()> {
        let cdb = build_cdb6(CMD_TEST_UNIT_READY, 0, 0, 0);
        self.send_packet(&pad_cdb(cdb), &mut []).map(|_| ())
    }

    /// `READ CD` of `count` raw sectors starting at `lba`, returning
    /// full native-mode blocks (used by [`TrackSource`]).
    fn read_blocks_raw(&self, lba: u32, count: u32, buf: &mut [u8]) -> CdResult<()> {
        let cdb = build_read_cd(lba, count, 0xF8 /* all fields */);
        let want = count as usize * crate::MAX_SECTOR_SIZE;
        let got = self.send_packet(&cdb, &mut buf[..want])?;
        if got != want {
            return Err(CdError::ReadError);
        }
        Ok(())
    }

    /// `PLAY AUDIO(12)` covering `[start_lba, start_lba + count)` (§6.1).
    fn play_audio(&self, start_lba: u32, count: u32) -> CdResult<()> {
        let cdb = build_play_audio(start_lba, count);
        self.send_packet(&cdb, &mut []).map(|_| ())
    }

    /// `STOP PLAY/SCAN` (§6.1).
    fn stop(&self) -> CdResult<()> {
        let cdb = build_stop();
        self.send_packet(&cdb, &mut []).map(|_| ())
    }
}

fn build_cdb6(opcode: u8, a: u32, b: u8, control: u8) -> [u8; 6] {
    let a = a.to_be_bytes();
    [opcode, a[1], a[2], a[3], b, control]
}

fn pad_cdb(short: [u8; 6]) -> Cdb {
    let mut cdb = [0u8; 12];
    cdb[..6].copy_from_slice(&short);
    cdb
}

/// Build a `READ CD` (0xBE) CDB for `count` sectors at `lba`, with the
/// given MMC field-mask byte (byte 9 of the CDB).
pub fn build_read_cd(lba: u32, count: u32, field_mask: u8) -> Cdb {
    let lba = lba.to_be_bytes();
    let count = count.to_be_bytes();
    [CMD_READ_CD, 0, lba[0], lba[1], lba[2], lba[3], count[1], count[2], count[3], field_mask, 0, 0]
}

/// Build a `READ TOC` (0x43) CDB requesting the full-TOC format (`format = 2`).
pub fn build_read_toc(alloc_len: u16) -> Cdb {
    let len = alloc_len.to_be_bytes();
    [CMD_READ_TOC, 0x02 /* MSF */, 0, 0, 0, 0, 1, len[0], len[1], 0, 0, 0]
}

/// Build a `PLAY AUDIO(12)` CDB covering `[start_lba, start_lba + count)`.
pub fn build_play_audio(start_lba: u32, count: u32) -> Cdb {
    let start = start_lba.to_be_bytes();
    let count = count.to_be_bytes();
    [CMD_PLAY_AUDIO, 0, start[0], start[1], start[2], start[3], count[0], count[1], count[2], count[3], 0, 0]
}

/// Build a `STOP PLAY/SCAN` CDB.
pub fn build_stop() -> Cdb {
    pad_cdb(build_cdb6(CMD_STOP, 0, 0, 0))
}

/// Point values reserved for the full-TOC pseudo-entries, rather than
/// an actual track (§4.1.7): first-track/disc-type, last-track, and
/// lead-out-start respectively.
const POINT_FIRST_TRACK: u8 = 0xA0;
const POINT_LAST_TRACK: u8 = 0xA1;
const POINT_LEADOUT: u8 = 0xA2;

/// One parsed full-TOC (format 2) descriptor: a fixed 11-byte record of
/// `{session, adr/control, tno, point, min, sec, frame, zero, pmin, psec, pframe}`
/// (§4.1.7). `pmin:psec:pframe` carries the point's MSF address; for a
/// point in `1..=99` that's the track's start, for `0xA2` it's the
/// lead-out start, and for `0xA0` `psec` instead holds a disc-type hint.
struct TocEntry {
    session: u8,
    control: u8,
    point: u8,
    lba: i64,
    psec: u8,
}

fn parse_toc(data: &[u8]) -> CdResult<Vec<TocEntry>> {
    if data.len() < 4 {
        return Err(CdError::ReadError);
    }
    let data_len = u16::from_be_bytes([data[0], data[1]]) as usize;
    let mut entries = Vec::new();
    let mut offset = 4;
    while offset + 11 <= data_len.min(data.len()) {
        let entry = &data[offset..offset + 11];
        let session = entry[0];
        let control = entry[1];
        let point = entry[3];
        let msf = u32::from_be_bytes([0, entry[8], entry[9], entry[10]]);
        entries.push(TocEntry { session, control, point, lba: bcd_msf_to_lba(msf), psec: entry[9] });
        offset += 11;
    }
    Ok(entries)
}

/// A disc-type hint decoded from point `0xA0`'s `psec` byte (Red Book
/// session-format indicator). Only the unambiguous CD-ROM-XA value maps
/// cleanly onto the closed [`DiscType`](crate::disc::DiscType) set;
/// anything else is left to the usual track-flag-based inference.
fn disc_type_hint_from_session_format(psec: u8) -> Option<crate::disc::DiscType> {
    match psec {
        0x20 => Some(crate::disc::DiscType::Xa),
        _ => None,
    }
}

/// A freshly read full TOC: the track list plus the disc-wide fields
/// §4.1.7 says `READ TOC` also yields (lead-out LBA from point `0xA2`,
/// a disc-type hint from point `0xA0`'s session-format byte).
#[derive(Default)]
pub struct Toc {
    /// Parsed tracks, in ascending track-number order.
    pub tracks: Vec<Track>,
    /// LBA of the lead-out area, from point `0xA2`.
    pub leadout: u32,
    /// Disc-type hint from point `0xA0`, if the session-format byte was
    /// unambiguous.
    pub disc_type_hint: Option<crate::disc::DiscType>,
}

/// Read the full TOC from `transport` and build the resulting track
/// list, each track's source wired back to `disc` via
/// [`TrackSource`] (§9), plus the lead-out LBA and disc-type hint
/// carried by points `0xA2`/`0xA0`.
pub fn read_toc(transport: &dyn PacketTransport, disc: &Weak<RefCell<DiscState>>) -> CdResult<Toc> {
    let mut raw = [0u8; 4 + 11 * (MAX_TRACKS as usize + 3)];
    let cdb = build_read_toc(raw.len() as u16);
    let got = transport.send_packet(&cdb, &mut raw)?;
    let entries = parse_toc(&raw[..got])?;
    if entries.is_empty() {
        debug!("mmc: empty TOC, treating as no disc");
        return Err(CdError::NoDisc);
    }

    let mut leadout = 0u32;
    let mut disc_type_hint = None;
    let mut track_points: Vec<(u8, u8, u8, u32)> = Vec::new(); // (session, track_number, control, lba)

    for entry in &entries {
        match entry.point {
            POINT_LEADOUT => leadout = entry.lba.max(0) as u32,
            POINT_FIRST_TRACK => disc_type_hint = disc_type_hint_from_session_format(entry.psec),
            POINT_LAST_TRACK => {}
            point if point >= 1 && point <= MAX_TRACKS => {
                track_points.push((entry.session, point, entry.control, entry.lba.max(0) as u32));
            }
            _ => {} // lead-in/skip/reserved pseudo-points
        }
    }
    track_points.sort_by_key(|&(_, track_number, _, _)| track_number);

    let mut tracks = Vec::with_capacity(track_points.len());
    for (i, &(session, track_number, control, start)) in track_points.iter().enumerate() {
        let end = track_points.get(i + 1).map(|&(_, _, _, lba)| lba).unwrap_or(leadout);
        if end < start {
            warn!("mmc: TOC entry for track {track_number} has end < start, skipping");
            continue;
        }
        let flags = if control & 0x04 != 0 { TrackFlags::DATA } else { TrackFlags::empty() };
        let mode = if flags.contains(TrackFlags::DATA) { SectorMode::RawXA } else { SectorMode::Cdda };
        let source = TrackSource::new(disc.clone(), start, mode, end - start);
        tracks.push(Track::new(track_number, session, start, flags, source));
    }
    Ok(Toc { tracks, leadout, disc_type_hint })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toc_entry(session: u8, control: u8, point: u8, min: u8, sec: u8, frame: u8) -> [u8; 11] {
        [session, control, 0, point, 0, 0, 0, 0, min, sec, frame]
    }

    /// Assemble a `READ TOC` reply buffer from raw entries, with the
    /// 2-byte length header set to the buffer's own total size so the
    /// parser's `data_len.min(data.len())` bound is exactly `data.len()`.
    fn toc_buffer(entries: &[[u8; 11]]) -> Vec<u8> {
        let total = 4 + entries.len() * 11;
        let len = (total as u16).to_be_bytes();
        let mut buf = vec![len[0], len[1], 0, 0];
        for e in entries {
            buf.extend_from_slice(e);
        }
        buf
    }

    #[test]
    fn read_cd_cdb_encodes_lba_and_count() {
        let cdb = build_read_cd(0x0102_0304, 0x0506, 0xF8);
        assert_eq!(cdb[0], CMD_READ_CD);
        assert_eq!(&cdb[2..6], &[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(&cdb[6..9], &[0x00, 0x05, 0x06]);
        assert_eq!(cdb[9], 0xF8);
    }

    #[test]
    fn parse_toc_reads_fixed_11_byte_records() {
        let data = toc_buffer(&[toc_entry(1, 0x04, 1, 0, 2, 0), toc_entry(1, 0x00, POINT_LEADOUT, 0, 4, 0)]);
        let entries = parse_toc(&data).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].point, 1);
        assert_eq!(entries[1].point, POINT_LEADOUT);
    }

    #[test]
    fn read_toc_captures_leadout_and_track_sessions() {
        struct Fake(Vec<u8>);
        impl PacketTransport for Fake {
            fn send_packet(&self, _cdb: &Cdb, data: &mut [u8]) -> CdResult<usize> {
                let n = self.0.len().min(data.len());
                data[..n].copy_from_slice(&self.0[..n]);
                Ok(n)
            }
        }

        let raw = toc_buffer(&[
            toc_entry(1, 0x00, POINT_FIRST_TRACK, 0, 0x00, 0),
            toc_entry(1, 0x04, 1, 0, 2, 0),
            toc_entry(1, 0x00, POINT_LEADOUT, 0, 4, 0),
        ]);

        let transport = Fake(raw);
        let disc = Weak::new();
        let toc = read_toc(&transport, &disc).unwrap();
        assert_eq!(toc.tracks.len(), 1);
        assert_eq!(toc.tracks[0].session, 1);
        assert!(toc.leadout > 0);
    }
}
