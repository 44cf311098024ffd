//! Image representation and normalisation (§4.8, §3's Image entity). Pixels
//! are greyscale 8-bit, row-major, top-left origin once `standardize` has
//! run. This module deals only with in-memory pixel manipulation — no
//! hardware, no SSMs — in the same spirit as the retrieval pack's `gfx`
//! crate, which keeps framebuffer math architecture-independent and plain.

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImageFlags {
    pub v_flipped: bool,
    pub h_flipped: bool,
    pub colors_inverted: bool,
    pub binarized: bool,
    pub partial: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    pub width: usize,
    pub height: usize,
    pub pixels: Vec<u8>,
    pub flags: ImageFlags,
}

impl Image {
    pub fn new(width: usize, height: usize, pixels: Vec<u8>, flags: ImageFlags) -> Self {
        assert_eq!(
            pixels.len(),
            width * height,
            "pixel buffer length must equal width * height"
        );
        Image {
            width,
            height,
            pixels,
            flags,
        }
    }

    pub fn blank(width: usize, height: usize) -> Self {
        Image::new(width, height, vec![0u8; width * height], ImageFlags::default())
    }

    fn row_mut(&mut self, y: usize) -> &mut [u8] {
        &mut self.pixels[y * self.width..(y + 1) * self.width]
    }

    fn v_flip(&mut self) {
        let h = self.height;
        for i in 0..h / 2 {
            let (lo, hi) = (i, h - 1 - i);
            let w = self.width;
            let (a, b) = self.pixels.split_at_mut(hi * w);
            a[lo * w..(lo + 1) * w].swap_with_slice(&mut b[0..w]);
        }
    }

    fn h_flip(&mut self) {
        for y in 0..self.height {
            self.row_mut(y).reverse();
        }
    }

    fn invert(&mut self) {
        for p in self.pixels.iter_mut() {
            *p = 255 - *p;
        }
    }

    /// Applies v-flip, h-flip and colour inversion in that order, clearing
    /// each flag as it is applied (§4.8). Idempotent: calling it twice in a
    /// row is a no-op the second time because the flags are already clear.
    pub fn standardize(&mut self) {
        if self.flags.v_flipped {
            self.v_flip();
            self.flags.v_flipped = false;
        }
        if self.flags.h_flipped {
            self.h_flip();
            self.flags.h_flipped = false;
        }
        if self.flags.colors_inverted {
            self.invert();
            self.flags.colors_inverted = false;
        }
    }

    /// Magnifies by integer factors `wf`/`hf` using bilinear interpolation.
    /// `wf == hf == 1` returns an identical copy.
    pub fn resize(&self, wf: usize, hf: usize) -> Image {
        assert!(wf >= 1 && hf >= 1, "resize factors must be >= 1");
        let new_w = self.width * wf;
        let new_h = self.height * hf;
        let mut out = vec![0u8; new_w * new_h];

        let sample = |x: f32, y: f32| -> u8 {
            let x0 = x.floor().clamp(0.0, (self.width - 1) as f32) as usize;
            let y0 = y.floor().clamp(0.0, (self.height - 1) as f32) as usize;
            let x1 = (x0 + 1).min(self.width - 1);
            let y1 = (y0 + 1).min(self.height - 1);
            let fx = x - x0 as f32;
            let fy = y - y0 as f32;

            let p = |xx: usize, yy: usize| self.pixels[yy * self.width + xx] as f32;
            let top = p(x0, y0) * (1.0 - fx) + p(x1, y0) * fx;
            let bot = p(x0, y1) * (1.0 - fx) + p(x1, y1) * fx;
            (top * (1.0 - fy) + bot * fy).round().clamp(0.0, 255.0) as u8
        };

        for oy in 0..new_h {
            let sy = oy as f32 / hf as f32;
            for ox in 0..new_w {
                let sx = ox as f32 / wf as f32;
                out[oy * new_w + ox] = sample(sx, sy);
            }
        }

        Image::new(new_w, new_h, out, self.flags)
    }

    /// PGM (`P5`) debug dump, per §6.
    pub fn to_pgm(&self) -> Vec<u8> {
        let mut out = format!("P5\n{} {}\n255\n", self.width, self.height).into_bytes();
        out.extend_from_slice(&self.pixels);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standardize_is_idempotent_and_clears_flags() {
        let mut img = Image::new(
            2,
            2,
            vec![1, 2, 3, 4],
            ImageFlags {
                v_flipped: true,
                h_flipped: true,
                colors_inverted: true,
                binarized: false,
                partial: false,
            },
        );
        img.standardize();
        let once = img.clone();
        img.standardize();
        assert_eq!(img, once);
        assert!(!img.flags.v_flipped);
        assert!(!img.flags.h_flipped);
        assert!(!img.flags.colors_inverted);
    }

    #[test]
    fn v_flip_swaps_rows() {
        let mut img = Image::new(
            2,
            2,
            vec![1, 2, 3, 4],
            ImageFlags {
                v_flipped: true,
                ..Default::default()
            },
        );
        img.standardize();
        assert_eq!(img.pixels, vec![3, 4, 1, 2]);
    }

    #[test]
    fn h_flip_reverses_each_row() {
        let mut img = Image::new(
            2,
            2,
            vec![1, 2, 3, 4],
            ImageFlags {
                h_flipped: true,
                ..Default::default()
            },
        );
        img.standardize();
        assert_eq!(img.pixels, vec![2, 1, 4, 3]);
    }

    #[test]
    fn invert_negates_pixels() {
        let mut img = Image::new(
            1,
            2,
            vec![0, 255],
            ImageFlags {
                colors_inverted: true,
                ..Default::default()
            },
        );
        img.standardize();
        assert_eq!(img.pixels, vec![255, 0]);
    }

    #[test]
    fn resize_identity_factor_preserves_pixels() {
        let img = Image::new(2, 2, vec![10, 20, 30, 40], ImageFlags::default());
        let same = img.resize(1, 1);
        assert_eq!(same.pixels, img.pixels);
        assert_eq!((same.width, same.height), (2, 2));
    }

    #[test]
    fn resize_doubles_dimensions() {
        let img = Image::new(2, 2, vec![10, 20, 30, 40], ImageFlags::default());
        let bigger = img.resize(2, 2);
        assert_eq!((bigger.width, bigger.height), (4, 4));
    }

    #[test]
    fn to_pgm_has_p5_header() {
        let img = Image::new(1, 1, vec![128], ImageFlags::default());
        let pgm = img.to_pgm();
        assert!(pgm.starts_with(b"P5\n1 1\n255\n"));
        assert_eq!(*pgm.last().unwrap(), 128);
    }
}
