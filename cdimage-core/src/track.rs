//! A single track of a [`Disc`](crate::Disc) (§3.1, §4.1.5).

use crate::sector::SectorMode;
use crate::source::{SectorReader, SourceHandle};

bitflags::bitflags! {
    /// Q sub-channel control nibble flags, transcribed from lxdream's
    /// `TRACK_FLAG_*` constants.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TrackFlags: u8 {
        /// Track contains four-channel audio (audio tracks only).
        const FOUR_CHANNEL = 0x08;
        /// Track contains data (as opposed to CD-DA audio).
        const DATA = 0x04;
        /// Digital copy of the track is permitted.
        const COPY_PERMITTED = 0x02;
        /// Track carries pre-emphasis (audio tracks only).
        const PRE_EMPHASIS = 0x01;
    }
}

/// One track: a number, a starting LBA, a flags nibble and the sector
/// source that backs its data (§3.1).
///
/// A GDI/NRG-loaded track owns a source that is independently backed by
/// (a region of) a host file, so no back-reference to the owning
/// [`Disc`](crate::Disc) is needed. A physical-drive track's source is
/// instead a [`crate::source::TrackSource`] that forwards reads to the
/// disc — see that type for the back-reference.
pub struct Track {
    /// 1-based track number.
    pub number: u8,
    /// Session this track belongs to (1-based; multi-session discs only
    /// have more than one, §3.1).
    pub session: u8,
    /// Starting LBA of the track (including its pregap, per §4.1.5).
    pub start_lba: u32,
    /// Q sub-channel control flags.
    pub flags: TrackFlags,
    source: SourceHandle,
}

impl Track {
    /// Build a track from its number, session, starting LBA, flags and
    /// backing source.
    pub fn new(number: u8, session: u8, start_lba: u32, flags: TrackFlags, source: SourceHandle) -> Track {
        Track { number, session, start_lba, flags, source }
    }

    /// The track's native sector mode.
    pub fn mode(&self) -> SectorMode {
        self.source.mode()
    }

    /// Number of sectors/blocks in the track, if known.
    pub fn size(&self) -> u32 {
        self.source.size()
    }

    /// LBA one past the last sector of the track, if the track has a
    /// known size.
    pub fn end_lba(&self) -> Option<u32> {
        let size = self.size();
        (size != 0).then(|| self.start_lba + size)
    }

    /// Whether the track carries CD-DA audio rather than data.
    pub fn is_audio(&self) -> bool {
        !self.flags.contains(TrackFlags::DATA)
    }

    /// The track's backing sector source.
    pub fn source(&self) -> &SourceHandle {
        &self.source
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::NullSource;

    #[test]
    fn end_lba_accounts_for_start_offset() {
        let track = Track::new(1, 1, 150, TrackFlags::DATA, NullSource::new(SectorMode::Mode1, 100));
        assert_eq!(track.end_lba(), Some(250));
    }

    #[test]
    fn audio_track_has_no_data_flag() {
        let track = Track::new(2, 1, 0, TrackFlags::COPY_PERMITTED, NullSource::new(SectorMode::Cdda, 0));
        assert!(track.is_audio());
    }
}
