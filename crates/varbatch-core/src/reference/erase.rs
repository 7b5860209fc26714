use super::HostImage;
use crate::ops::erase::EraseRegion;
use crate::pixel::{Pixel, erase_hash};

/// Erase `regions` in place. Regions pointing at missing images, or parts of
/// regions outside their image, are skipped.
pub fn erase<T: Pixel>(images: &mut [HostImage<T>], regions: &[EraseRegion], seed: u32) {
    for (r, region) in regions.iter().enumerate() {
        let Some(img) = usize::try_from(region.image_index)
            .ok()
            .and_then(|i| images.get_mut(i))
        else {
            continue;
        };
        for y in 0..region.height.max(0) {
            for x in 0..region.width.max(0) {
                let ix = region.anchor_x + x;
                let iy = region.anchor_y + y;
                if ix < 0 || iy < 0 || ix >= img.width as i32 || iy >= img.height as i32 {
                    continue;
                }
                for c in 0..img.channels {
                    if region.channel_mask & (1 << c) == 0 {
                        continue;
                    }
                    let v = if region.random {
                        T::from_hash(erase_hash(seed, r as u32, ix as u32, iy as u32, c as u32))
                    } else {
                        T::saturate_trunc(region.values[c])
                    };
                    img.set(ix as usize, iy as usize, c, v);
                }
            }
        }
    }
}
