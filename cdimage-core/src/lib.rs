//! Layered CD-ROM image subsystem.
//!
//! The architecture is inspired by lxdream's `drivers/cdrom` layer: a
//! refcounted graph of `SectorSource`s (null/file/memory/track/disc)
//! feeds a `Disc`, which in turn is populated either by a format
//! loader (GDI, NRG) reading a host file, or by a SCSI/MMC transport
//! talking to a physical drive. An ISO-9660 reader sits on top of any
//! sector source.

#![warn(missing_docs)]

pub mod bcd;
pub mod disc;
mod ecc;
pub mod formats;
pub mod iso9660;
pub mod mmc;
pub mod sector;
pub mod source;
pub mod track;

pub use bcd::{bcd_msf_to_lba, lba_to_bcd_msf};
pub use disc::{Disc, DiscType};
pub use sector::{ReadMode, SectorMode};
pub use source::{SectorSource, SourceHandle};
pub use track::{Track, TrackFlags};

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Frames (sectors) per second of CD-DA playback time.
pub const FRAMES_PER_SECOND: u32 = 75;
/// Seconds per minute, for MSF arithmetic.
pub const SECONDS_PER_MINUTE: u32 = 60;
/// Frames per minute, derived from [`FRAMES_PER_SECOND`] and [`SECONDS_PER_MINUTE`].
pub const FRAMES_PER_MINUTE: u32 = FRAMES_PER_SECOND * SECONDS_PER_MINUTE;
/// MSF numbering starts after the standard 2-second pregap.
pub const MSF_START: u32 = 150;
/// Largest sector size across all supported modes (a raw sector).
pub const MAX_SECTOR_SIZE: usize = 2352;
/// Tracks are numbered 1..=99.
pub const MAX_TRACKS: u8 = 99;
/// LBA at which a GDI track is considered to belong to the second (data) session.
pub const GDI_SESSION2_LBA: u32 = 45000;

/// Sense-key|ASC encoded error taxonomy for disc read operations (§7).
///
/// The numeric values mirror MMC sense data so they can be handed back
/// to a guest that expects a sense-key/ASC pair, exactly as lxdream's
/// `cdrom_error_t` does.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CdError {
    /// No disc is present in the drive.
    #[error("no disc present")]
    NoDisc,
    /// The command itself was not understood.
    #[error("bad command")]
    BadCommand,
    /// The requested field combination is not legal for this sector mode.
    #[error("bad field combination")]
    BadField,
    /// The requested LBA range is out of bounds, or the underlying I/O failed.
    #[error("bad read")]
    BadRead,
    /// The requested sector type does not match the sector's actual mode.
    #[error("bad read mode")]
    BadReadMode,
    /// A read failed due to an uncorrectable I/O error.
    #[error("read error")]
    ReadError,
    /// The drive/unit has been reset; the caller should retry.
    #[error("unit reset")]
    Reset,
}

/// Convenience alias for a `Result<T, CdError>`.
pub type CdResult<T> = std::result::Result<T, CdError>;

/// Generic error taxonomy for everything that is not a disc-read sense
/// code: format loaders, ISO-9660 traversal, and host I/O (§7).
#[derive(Error, Debug)]
pub enum Error {
    /// Out of memory (retained for parity with the generic taxonomy; in
    /// practice surfaces as a Rust allocation failure/abort instead).
    #[error("out of memory")]
    NoMem,
    /// The file exists but its contents are not a valid image of the expected kind.
    #[error("invalid file `{path}`: {desc}")]
    FileInvalid {
        /// Path to the invalid file.
        path: PathBuf,
        /// Human readable description of what was wrong.
        desc: String,
    },
    /// No registered format loader recognised the file.
    #[error("unrecognised image format: `{}`", .0.display())]
    FileUnknown(PathBuf),
    /// The file could not be opened at all.
    #[error("couldn't open `{path}`: {source}")]
    FileNoOpen {
        /// Path that could not be opened.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// Any other host I/O failure encountered while reading an image.
    #[error("I/O error: {0}")]
    FileIoError(#[from] io::Error),
    /// A disc-level sense error surfaced during a loader operation.
    #[error(transparent)]
    Disc(#[from] CdError),
    /// An operation that isn't implemented for this source/format.
    #[error("unhandled: {0}")]
    Unhandled(String),
}

/// Convenience alias for a `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;
