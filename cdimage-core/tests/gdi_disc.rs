//! End-to-end coverage of the GDI loader feeding into [`Disc`]: a
//! synthetic two-track image (one data track, one CD-DA track) parsed
//! from a temp-directory fixture exactly as a real dump would be,
//! exercised purely through the public API.

use std::fs;

use cdimage_core::formats::gdi::GDI;
use cdimage_core::formats::ImageFormat;
use cdimage_core::{DiscType, SectorMode};

struct Fixture {
    dir: std::path::PathBuf,
}

impl Fixture {
    fn new(name: &str) -> Fixture {
        let dir = std::env::temp_dir().join(format!("cdimage-core-it-{name}"));
        fs::create_dir_all(&dir).unwrap();
        Fixture { dir }
    }
}

impl Drop for Fixture {
    fn drop(&mut self) {
        fs::remove_dir_all(&self.dir).ok();
    }
}

/// One data track (4 sectors) followed by one CD-DA track (2 sectors),
/// laid out back to back the way a real GD-ROM single-density area is.
fn two_track_image(fixture: &Fixture) -> std::path::PathBuf {
    let data_track = vec![0xAAu8; 2048 * 4];
    let audio_track = vec![0x55u8; 2352 * 2];
    fs::write(fixture.dir.join("track01.bin"), &data_track).unwrap();
    fs::write(fixture.dir.join("track02.raw"), &audio_track).unwrap();

    let gdi_path = fixture.dir.join("disc.gdi");
    fs::write(
        &gdi_path,
        "2\n\
         1 0 4 2048 track01.bin 0\n\
         2 4 0 2352 track02.raw 0\n",
    )
    .unwrap();
    gdi_path
}

#[test]
fn loads_multi_track_gdi_and_resolves_toc() {
    let fixture = Fixture::new("toc");
    let gdi_path = two_track_image(&fixture);

    let disc = GDI.read_toc(&gdi_path).unwrap();
    assert_eq!(disc.disc_type(), DiscType::Gdrom);
    assert_eq!(disc.track_count(), 2);

    assert_eq!(disc.track_number_at(0), Some(1));
    assert_eq!(disc.track_number_at(3), Some(1));
    assert_eq!(disc.track_number_at(4), Some(2));
    assert_eq!(disc.track_number_at(5), Some(2));
    assert_eq!(disc.track_number_at(6), None);

    let toc = disc.print_toc();
    assert!(toc.contains(" 1 "));
    assert!(toc.contains(" 2 "));
}

#[test]
fn reads_sectors_from_each_track_in_its_native_mode() {
    let fixture = Fixture::new("read");
    let gdi_path = two_track_image(&fixture);
    let disc = GDI.read_toc(&gdi_path).unwrap();

    let data_mode = SectorMode::Mode2Form1.default_read_mode();
    let mut data_buf = vec![0u8; 2048 * 4];
    let n = disc.read_sectors(0, 4, data_mode, &mut data_buf).unwrap();
    assert_eq!(n, 4);
    assert!(data_buf.iter().all(|&b| b == 0xAA));

    let audio_mode = SectorMode::Cdda.default_read_mode();
    let mut audio_buf = vec![0u8; 2352 * 2];
    let n = disc.read_sectors(4, 2, audio_mode, &mut audio_buf).unwrap();
    assert_eq!(n, 2);
    assert!(audio_buf.iter().all(|&b| b == 0x55));
}

#[test]
fn read_crossing_into_a_track_of_a_different_native_mode_fails() {
    let fixture = Fixture::new("cross");
    let gdi_path = two_track_image(&fixture);
    let disc = GDI.read_toc(&gdi_path).unwrap();

    let data_mode = SectorMode::Mode2Form1.default_read_mode();
    let mut buf = vec![0u8; 2048 * 2];
    let result = disc.read_sectors(3, 2, data_mode, &mut buf);
    assert!(result.is_err());
}

#[test]
fn open_dispatches_by_extension_to_the_gdi_loader() {
    let fixture = Fixture::new("open");
    let gdi_path = two_track_image(&fixture);

    let disc = cdimage_core::formats::open(&gdi_path).unwrap();
    assert_eq!(disc.disc_type(), DiscType::Gdrom);
    assert_eq!(disc.track_count(), 2);
}
