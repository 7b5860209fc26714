use super::HostImage;
use crate::pixel::Pixel;

/// Flip `src` into `dst` (same extents). `code == 0` mirrors rows,
/// `code > 0` mirrors columns, `code < 0` mirrors both.
pub fn flip<T: Pixel>(src: &HostImage<T>, dst: &mut HostImage<T>, code: i32) {
    let (w, h) = (src.width, src.height);
    for y in 0..h {
        for x in 0..w {
            let sx = if code != 0 { w - 1 - x } else { x };
            let sy = if code <= 0 { h - 1 - y } else { y };
            for c in 0..src.channels {
                dst.set(x, y, c, src.get(sx, sy, c));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::ImageFormat;
    use crate::image::Size2D;

    #[test]
    fn flip_codes_follow_axis_convention() {
        let src = HostImage::from_fn(ImageFormat::U8, Size2D::new(3, 2), 0, |x, y, _| {
            (10 * y + x) as u8
        });
        let mut dst = src.clone();

        flip(&src, &mut dst, 0);
        assert_eq!(dst.get(0, 0, 0), 10);
        assert_eq!(dst.get(2, 1, 0), 2);

        flip(&src, &mut dst, 1);
        assert_eq!(dst.get(0, 0, 0), 2);
        assert_eq!(dst.get(0, 1, 0), 12);

        flip(&src, &mut dst, -1);
        assert_eq!(dst.get(0, 0, 0), 12);
        assert_eq!(dst.get(2, 1, 0), 0);
    }

    #[test]
    fn double_flip_is_identity() {
        let src = HostImage::from_fn(ImageFormat::RGB8P, Size2D::new(5, 3), 0, |x, y, c| {
            (x * 31 + y * 7 + c) as u8
        });
        for code in [-1, 0, 1] {
            let mut once = src.clone();
            let mut twice = src.clone();
            flip(&src, &mut once, code);
            flip(&once, &mut twice, code);
            assert_eq!(twice, src, "code {code}");
        }
    }
}
