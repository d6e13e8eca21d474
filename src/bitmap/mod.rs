/*
 *  bitmap/mod.rs
 *
 *  deejdsp - displays and SD card over the deej serial link
 *  (c) 2020-26 Stuart Hunter
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU General Public License for more details.
 *
 *  See <http://www.gnu.org/licenses/> to get a copy of the GNU General
 *  Public License.
 *
 */

//! Source image to packed display bitmap.
//!
//! The pipeline is deliberately simple and reproducible: shrink to fit
//! 128x64 with a nearest neighbour filter, place on a black canvas centred
//! horizontally and flush with the top edge, threshold without dithering,
//! then pack into the controller's page layout.

pub mod canvas;

use std::path::Path;

use embedded_graphics::pixelcolor::BinaryColor;
use embedded_graphics::prelude::*;
use image::imageops::{self, FilterType};
use image::{DynamicImage, Rgba};
use log::debug;
use thiserror::Error;

pub use canvas::DisplayImage;

pub const DISPLAY_WIDTH: u32 = 128;
pub const DISPLAY_HEIGHT: u32 = 64;

/// Threshold used when the configuration does not give one
pub const DEFAULT_THRESHOLD: u8 = 200;

#[derive(Debug, Error)]
pub enum ImageError {
    /// No source image was supplied
    #[error("no source image to convert")]
    MissingSource,
    #[error("source image has no pixels ({width}x{height})")]
    Empty { width: u32, height: u32 },
    #[error("image decode failed: {0}")]
    Decode(#[from] image::ImageError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A display image in transfer order: one row per 8-pixel page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedImage {
    rows: Vec<Vec<u8>>,
}

impl PackedImage {
    pub fn from_image(image: &DisplayImage) -> Self {
        Self { rows: image.pack_pages() }
    }

    pub fn rows(&self) -> &[Vec<u8>] {
        &self.rows
    }

    /// Rows concatenated, as written to the card
    pub fn to_bytes(&self) -> Vec<u8> {
        self.rows.concat()
    }

    pub fn len(&self) -> usize {
        self.rows.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn write_to(&self, path: &Path) -> Result<(), ImageError> {
        std::fs::write(path, self.to_bytes())?;
        Ok(())
    }
}

/// Largest size within `max_w` x `max_h` keeping the aspect ratio.
/// Images that already fit are left alone, never enlarged.
pub fn fit_dimensions(width: u32, height: u32, max_w: u32, max_h: u32) -> (u32, u32) {
    if width <= max_w && height <= max_h {
        return (width, height);
    }
    let (w, h) = (width as u64, height as u64);
    let (mw, mh) = (max_w as u64, max_h as u64);
    if w * mh > mw * h {
        (max_w, (h * mw / w).max(1) as u32)
    } else {
        ((w * mh / h).max(1) as u32, max_h)
    }
}

/// Left edge of an image `width` pixels wide centred on the display
pub fn center_offset(width: u32) -> u32 {
    DISPLAY_WIDTH.saturating_sub(width) / 2
}

/// Rec. 601 luma of `pixel` composited over black
pub fn luminance(pixel: &Rgba<u8>) -> u8 {
    let [r, g, b, a] = pixel.0;
    let luma = (299 * r as u32 + 587 * g as u32 + 114 * b as u32 + 500) / 1000;
    (luma * a as u32 / 255) as u8
}

/// At or above the threshold is lit
#[inline]
pub fn binarize(luma: u8, threshold: u8) -> BinaryColor {
    if luma >= threshold { BinaryColor::On } else { BinaryColor::Off }
}

/// Render `source` onto a fresh display image
pub fn render(source: &DynamicImage, threshold: u8) -> Result<DisplayImage, ImageError> {
    let (src_w, src_h) = (source.width(), source.height());
    if src_w == 0 || src_h == 0 {
        return Err(ImageError::Empty { width: src_w, height: src_h });
    }

    let (w, h) = fit_dimensions(src_w, src_h, DISPLAY_WIDTH, DISPLAY_HEIGHT);
    let mut rgba = source.to_rgba8();
    if (w, h) != (src_w, src_h) {
        rgba = imageops::resize(&rgba, w, h, FilterType::Nearest);
    }
    let offset = center_offset(w);
    debug!("image {}x{} -> {}x{} at x={}", src_w, src_h, w, h, offset);

    let mut canvas = DisplayImage::new(DISPLAY_WIDTH, DISPLAY_HEIGHT);
    canvas
        .draw_iter(rgba.enumerate_pixels().map(|(x, y, p)| {
            Pixel(
                Point::new((x + offset) as i32, y as i32),
                binarize(luminance(p), threshold),
            )
        }))
        .unwrap_or_else(|never| match never {});
    Ok(canvas)
}

/// Resize, centre, threshold and pack `source`.
///
/// An absent source is rejected before any work is done.
pub fn convert(source: Option<&DynamicImage>, threshold: u8) -> Result<PackedImage, ImageError> {
    let source = source.ok_or(ImageError::MissingSource)?;
    let canvas = render(source, threshold)?;
    Ok(PackedImage::from_image(&canvas))
}

/// Decode an image file and convert it
pub fn convert_path(path: &Path, threshold: u8) -> Result<PackedImage, ImageError> {
    let source = image::open(path)?;
    convert(Some(&source), threshold)
}
