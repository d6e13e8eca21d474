/*
 *  bitmap/canvas.rs
 *
 *  deejdsp - displays and SD card over the deej serial link
 *  (c) 2020-26 Stuart Hunter
 *
 *  Monochrome display canvas and its page packed encoding
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

use core::convert::Infallible;
use embedded_graphics::geometry::{OriginDimensions, Size};
use embedded_graphics::pixelcolor::BinaryColor;
use embedded_graphics::prelude::*;

/// Rows packed into one byte by the display controller
pub const PAGE_HEIGHT: usize = 8;

/// Post-threshold bitmap, one `BinaryColor` per pixel, row-major.
/// Starts fully black.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayImage {
    buf: Vec<BinaryColor>,
    w: usize,
    h: usize,
}

impl DisplayImage {
    pub fn new(width: u32, height: u32) -> Self {
        let (w, h) = (width as usize, height as usize);
        Self { buf: vec![BinaryColor::Off; w * h], w, h }
    }

    pub fn width(&self) -> usize { self.w }
    pub fn height(&self) -> usize { self.h }

    pub fn as_slice(&self) -> &[BinaryColor] { &self.buf }

    pub fn pixel(&self, x: usize, y: usize) -> Option<BinaryColor> {
        if x < self.w && y < self.h {
            return Some(self.buf[y * self.w + x]);
        }
        None
    }

    pub fn is_on(&self, x: usize, y: usize) -> bool {
        self.pixel(x, y).is_some_and(|c| c.is_on())
    }

    pub fn count_on(&self) -> usize {
        self.buf.iter().filter(|c| c.is_on()).count()
    }

    #[inline]
    fn idx(&self, p: Point) -> Option<usize> {
        if p.x >= 0 && p.y >= 0 {
            let (x, y) = (p.x as usize, p.y as usize);
            if x < self.w && y < self.h {
                return Some(y * self.w + x);
            }
        }
        None
    }

    /// Page packed encoding: one row of `width` bytes per 8 pixel rows,
    /// bit `b` of byte `x` in page `p` is pixel `(x, 8p + b)`, LSB on top.
    pub fn pack_pages(&self) -> Vec<Vec<u8>> {
        let pages = self.h.div_ceil(PAGE_HEIGHT);
        (0..pages)
            .map(|page| {
                (0..self.w)
                    .map(|x| {
                        (0..PAGE_HEIGHT).fold(0u8, |byte, bit| {
                            if self.is_on(x, page * PAGE_HEIGHT + bit) {
                                byte | (1 << bit)
                            } else {
                                byte
                            }
                        })
                    })
                    .collect()
            })
            .collect()
    }
}

impl OriginDimensions for DisplayImage {
    fn size(&self) -> Size {
        Size::new(self.w as u32, self.h as u32)
    }
}

impl DrawTarget for DisplayImage {
    type Color = BinaryColor;
    type Error = Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        for Pixel(p, c) in pixels {
            if let Some(i) = self.idx(p) {
                self.buf[i] = c;
            }
        }
        Ok(())
    }

    fn clear(&mut self, color: Self::Color) -> Result<(), Self::Error> {
        self.buf.fill(color);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_graphics::primitives::{PrimitiveStyle, Rectangle};

    #[test]
    fn test_starts_black() {
        let img = DisplayImage::new(128, 64);
        assert_eq!(img.count_on(), 0);
        assert_eq!(img.pack_pages(), vec![vec![0u8; 128]; 8]);
    }

    #[test]
    fn test_out_of_bounds_pixels_ignored() {
        let mut img = DisplayImage::new(4, 4);
        img.draw_iter([
            Pixel(Point::new(-1, 0), BinaryColor::On),
            Pixel(Point::new(4, 0), BinaryColor::On),
            Pixel(Point::new(1, 1), BinaryColor::On),
        ])
        .unwrap();
        assert_eq!(img.count_on(), 1);
        assert!(img.is_on(1, 1));
    }

    #[test]
    fn test_vertical_bit_order() {
        let mut img = DisplayImage::new(128, 64);
        // column 3: rows 0 and 7 of page 0, row 8 of page 1
        img.draw_iter([
            Pixel(Point::new(3, 0), BinaryColor::On),
            Pixel(Point::new(3, 7), BinaryColor::On),
            Pixel(Point::new(3, 8), BinaryColor::On),
            Pixel(Point::new(127, 63), BinaryColor::On),
        ])
        .unwrap();

        let pages = img.pack_pages();
        assert_eq!(pages.len(), 8);
        assert!(pages.iter().all(|p| p.len() == 128));
        assert_eq!(pages[0][3], 0b1000_0001);
        assert_eq!(pages[1][3], 0b0000_0001);
        assert_eq!(pages[7][127], 0b1000_0000);
        assert_eq!(pages[0][2], 0);
    }

    #[test]
    fn test_primitives_draw() {
        let mut img = DisplayImage::new(16, 8);
        Rectangle::new(Point::new(0, 0), Size::new(16, 8))
            .into_styled(PrimitiveStyle::with_fill(BinaryColor::On))
            .draw(&mut img)
            .unwrap();
        assert_eq!(img.pack_pages(), vec![vec![0xFF; 16]]);
    }
}
