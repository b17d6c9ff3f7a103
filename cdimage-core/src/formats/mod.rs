//! Image-format loaders: GDI, NRG and NullDC-flavoured NRG (§4.1.6).
//!
//! Loaders share the **factory** contract lxdream's `cdrom_disc_factory`
//! describes: a display name, a file extension, a content probe
//! (`is_valid`) and a `read_toc` that populates a [`Disc`] from the
//! open file.

pub mod gdi;
pub mod nrg;

use std::path::Path;

use log::debug;

use crate::disc::Disc;
use crate::{Error, Result};

/// A registered image format (§4.1.6).
pub trait ImageFormat {
    /// Human-readable name, for diagnostics.
    fn display_name(&self) -> &'static str;
    /// Conventional file extension (without the dot).
    fn file_extension(&self) -> &'static str;
    /// Cheap content probe; must not mutate or consume `path`.
    fn is_valid(&self, path: &Path) -> bool;
    /// Parse the full track table out of `path`.
    fn read_toc(&self, path: &Path) -> Result<Disc>;
}

fn formats() -> [&'static dyn ImageFormat; 3] {
    [&gdi::GDI, &nrg::NRG, &nrg::NULLDC_NRG]
}

/// Open `path` as a disc image: try the format matching the file
/// extension first, then fall back to a content probe across every
/// registered format (§4.1.6).
pub fn open(path: &Path) -> Result<Disc> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("").to_ascii_lowercase();

    for format in formats() {
        if format.file_extension().eq_ignore_ascii_case(&ext) && format.is_valid(path) {
            debug!("cdimage: {} matched by extension", format.display_name());
            return format.read_toc(path);
        }
    }
    for format in formats() {
        if format.is_valid(path) {
            debug!("cdimage: {} matched by content probe", format.display_name());
            return format.read_toc(path);
        }
    }
    Err(Error::FileUnknown(path.to_path_buf()))
}
