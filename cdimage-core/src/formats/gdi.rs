//! NullDC GD-ROM track-list image loader, grounded on
//! `cd_gdi.c`'s `gdi_image_is_valid`/`gdi_image_read_toc` (§4.1.6, §6.2).

use std::fs;
use std::path::Path;

use crate::disc::{Disc, DiscType, TocData};
use crate::sector::SectorMode;
use crate::source::{FileSource, NullSource};
use crate::track::{Track, TrackFlags};
use crate::{Error, Result, GDI_SESSION2_LBA, MAX_TRACKS};

use super::ImageFormat;

/// The GDI loader factory.
pub struct Gdi;
pub const GDI: Gdi = Gdi;

impl ImageFormat for Gdi {
    fn display_name(&self) -> &'static str {
        "NullDC GD-Rom Image"
    }

    fn file_extension(&self) -> &'static str {
        "gdi"
    }

    fn is_valid(&self, path: &Path) -> bool {
        let Ok(text) = fs::read_to_string(path) else { return false };
        first_line_track_count(&text).is_some()
    }

    fn read_toc(&self, path: &Path) -> Result<Disc> {
        let text = fs::read_to_string(path)?;
        let dir = path.parent().unwrap_or_else(|| Path::new("."));

        let mut lines = text.lines();
        let header = lines.next().ok_or_else(|| invalid(path, "empty file"))?;
        let track_count = first_line_track_count(header)
            .ok_or_else(|| invalid(path, "invalid track count"))? as usize;

        let mut tracks = Vec::with_capacity(track_count);
        for i in 0..track_count {
            let line = lines.next().ok_or_else(|| invalid(path, "unexpected end of file"))?;
            tracks.push(parse_track_line(path, dir, i, line)?);
        }

        let leadout = tracks.last().and_then(|t| t.end_lba()).unwrap_or(0);
        let toc = TocData { tracks, session_count: 2, leadout, mcn: [0u8; 14], name: Some(path.to_path_buf()) };
        Ok(Disc::from_toc_as(DiscType::Gdrom, toc))
    }
}

/// Number of whole sectors in `path` at `mode`'s block size, past
/// `offset` bytes. `0` (unknown) if the file can't be stat'd.
fn track_sector_count(path: &Path, offset: u32, mode: SectorMode) -> u32 {
    let block_size = mode.block_size().unwrap_or(1).max(1) as u64;
    let len = fs::metadata(path).map(|m| m.len()).unwrap_or(0);
    (len.saturating_sub(offset as u64) / block_size) as u32
}

fn first_line_track_count(text: &str) -> Option<u32> {
    let n: u32 = text.lines().next()?.trim().parse().ok()?;
    (n > 0 && n <= MAX_TRACKS as u32).then_some(n)
}

fn invalid(path: &Path, desc: &str) -> Error {
    Error::FileInvalid { path: path.to_path_buf(), desc: format!("invalid GDI image - {desc}") }
}

fn parse_track_line(path: &Path, dir: &Path, index: usize, line: &str) -> Result<Track> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 5 {
        return Err(invalid(path, &format!("malformed track {} line", index + 1)));
    }
    let track_no: u8 = fields[0].parse().map_err(|_| invalid(path, "bad track number"))?;
    let start_lba: i64 = fields[1].parse().map_err(|_| invalid(path, "bad start lba"))?;
    let flags_nibble: u8 = fields[2].parse().map_err(|_| invalid(path, "bad flags"))?;
    let size: u32 = fields[3].parse().map_err(|_| invalid(path, "bad sector size"))?;
    let filename = fields[4];
    let offset: u32 = fields.get(5).and_then(|s| s.parse().ok()).unwrap_or(0);

    let flags = TrackFlags::from_bits_truncate(flags_nibble & 0x0F);
    let mode = if flags.contains(TrackFlags::DATA) {
        match size {
            0 | 2048 => SectorMode::Mode2Form1,
            2324 => SectorMode::Mode2Form2,
            2336 => SectorMode::SemirawMode2,
            2352 => SectorMode::RawXA,
            other => return Err(invalid(path, &format!("invalid sector size '{other}' in GDI track {}", index + 1))),
        }
    } else if size == 0 || size == 2352 {
        SectorMode::Cdda
    } else {
        return Err(invalid(path, &format!("invalid sector size '{size}' for audio track {}", index + 1)));
    };

    let source = if filename.eq_ignore_ascii_case("none") {
        NullSource::new(mode, 0)
    } else {
        let track_path = dir.join(filename);
        let size = track_sector_count(&track_path, offset, mode);
        FileSource::open(&track_path, mode, offset, size)
            .map_err(|e| Error::FileNoOpen { path: track_path, source: e })?
    };

    let start_lba = start_lba.max(0) as u32;
    let session = if start_lba >= GDI_SESSION2_LBA { 2 } else { 1 };
    Ok(Track::new(track_no, session, start_lba, flags, source))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_two_track_image() {
        let dir = std::env::temp_dir().join("cdimage-core-gdi-test");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("track01.bin"), vec![0u8; 2048 * 4]).unwrap();
        let gdi_path = dir.join("disc.gdi");
        fs::write(&gdi_path, "1\n1 0 4 2048 track01.bin 0\n").unwrap();

        let disc = GDI.read_toc(&gdi_path).unwrap();
        assert_eq!(disc.track_count(), 1);
        assert_eq!(disc.track_number_at(0), Some(1));

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn rejects_file_without_numeric_header() {
        assert!(first_line_track_count("not a number").is_none());
        assert!(first_line_track_count("0").is_none());
        assert!(first_line_track_count("100").is_none());
    }

    #[test]
    fn session_boundary_is_gdi_session2_lba() {
        assert_eq!(GDI_SESSION2_LBA, 45000);
    }

    #[test]
    fn tracks_past_session2_lba_are_assigned_session_two() {
        let dir = std::env::temp_dir().join("cdimage-core-gdi-session-test");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("track01.bin"), vec![0u8; 2048 * 4]).unwrap();
        fs::write(dir.join("track02.raw"), vec![0u8; 2352 * 2]).unwrap();
        fs::write(dir.join("track03.bin"), vec![0u8; 2048 * 4]).unwrap();
        let gdi_path = dir.join("disc.gdi");
        fs::write(
            &gdi_path,
            "3\n\
             1 0 4 2048 track01.bin 0\n\
             2 600 0 2352 track02.raw 0\n\
             3 45000 4 2048 track03.bin 0\n",
        )
        .unwrap();

        let disc = GDI.read_toc(&gdi_path).unwrap();
        assert_eq!(disc.disc_type(), DiscType::Gdrom);
        assert_eq!(disc.session_count(), 2);
        assert_eq!(disc.get_track(1).map(|t| t.session), Some(1));
        assert_eq!(disc.get_track(2).map(|t| t.session), Some(1));
        assert_eq!(disc.get_track(3).map(|t| t.session), Some(2));

        fs::remove_dir_all(&dir).ok();
    }
}
