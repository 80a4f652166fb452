//! Patch Extraction
//!
//! Cuts an image into a grid of non-overlapping square patches and flattens
//! each patch into one row, turning a picture into a token sequence.
//!
//! ```text
//! image [H, W, C]                    patches [(H/P)·(W/P), P·P·C]
//! ┌────┬────┬────┐
//! │ p0 │ p1 │ p2 │                   row 0 = p0 flattened
//! ├────┼────┼────┤        ──►        row 1 = p1 flattened
//! │ p3 │ p4 │ p5 │                   ...
//! └────┴────┴────┘                   row 5 = p5 flattened
//! ```
//!
//! Patches are numbered row-major over the grid, and each patch is flattened
//! in (row, column, channel) order. That ordering is what the position
//! embedding table is indexed by, so it must never change.
//!
//! Extraction is a pure copy: stride equals patch size, no padding.

use crate::tensor::Tensor;

/// Extract patches from one image
///
/// # Arguments
///
/// * `image` - `[height, width, channels]`
/// * `patch_size` - Side length `P` of each square patch
///
/// # Returns
///
/// `[(height/P)·(width/P), P·P·channels]`
///
/// # Panics
///
/// Panics if `image` is not 3-D or `P` does not divide both spatial sizes.
/// Model configs are validated up front, so a built model never hits this.
///
/// # Example
///
/// ```rust
/// use vitrail::{extract_patches, Tensor};
///
/// let image = Tensor::zeros(vec![84, 84, 4]);
/// let patches = extract_patches(&image, 6);
/// assert_eq!(patches.shape, vec![196, 144]);
/// ```
pub fn extract_patches(image: &Tensor, patch_size: usize) -> Tensor {
    assert_eq!(
        image.shape.len(),
        3,
        "Expected an image of shape [height, width, channels], got {:?}",
        image.shape
    );
    let (height, width, channels) = (image.shape[0], image.shape[1], image.shape[2]);
    assert!(
        patch_size > 0 && height % patch_size == 0 && width % patch_size == 0,
        "Image {}x{} is not divisible into {}x{} patches",
        height,
        width,
        patch_size,
        patch_size
    );

    let grid_h = height / patch_size;
    let grid_w = width / patch_size;
    let patch_dim = patch_size * patch_size * channels;
    let row_len = patch_size * channels;

    let mut data = Vec::with_capacity(grid_h * grid_w * patch_dim);
    for py in 0..grid_h {
        for px in 0..grid_w {
            for dy in 0..patch_size {
                let iy = py * patch_size + dy;
                // One patch row is contiguous in HWC layout
                let start = (iy * width + px * patch_size) * channels;
                data.extend_from_slice(&image.data[start..start + row_len]);
            }
        }
    }

    Tensor::new(data, vec![grid_h * grid_w, patch_dim])
}

/// Extract patches from a batch of images
///
/// `[batch, H, W, C] -> [batch, num_patches, P·P·C]`
pub fn extract_patches_batch(images: &Tensor, patch_size: usize) -> Tensor {
    assert_eq!(
        images.shape.len(),
        4,
        "Expected images of shape [batch, height, width, channels], got {:?}",
        images.shape
    );
    let per_image: Vec<Tensor> = (0..images.shape[0])
        .map(|b| extract_patches(&images.index_first(b), patch_size))
        .collect();
    Tensor::stack(&per_image)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_row_major_grid_and_hwc_flattening() {
        // 4x4 single-channel image holding its own pixel index
        let image = Tensor::new((0..16).map(|i| i as f32).collect(), vec![4, 4, 1]);
        let patches = extract_patches(&image, 2);

        assert_eq!(patches.shape, vec![4, 4]);
        assert_eq!(&patches.data[0..4], &[0.0, 1.0, 4.0, 5.0]); // top-left
        assert_eq!(&patches.data[4..8], &[2.0, 3.0, 6.0, 7.0]); // top-right
        assert_eq!(&patches.data[8..12], &[8.0, 9.0, 12.0, 13.0]); // bottom-left
        assert_eq!(&patches.data[12..16], &[10.0, 11.0, 14.0, 15.0]);
    }

    #[test]
    fn test_channels_are_interleaved_per_pixel() {
        // 2x2x2 image: value = 10*pixel + channel
        let data = vec![0.0, 1.0, 10.0, 11.0, 20.0, 21.0, 30.0, 31.0];
        let image = Tensor::new(data.clone(), vec![2, 2, 2]);
        let patches = extract_patches(&image, 2);
        assert_eq!(patches.shape, vec![1, 8]);
        assert_eq!(patches.data, data);
    }

    #[test]
    fn test_reference_geometry() {
        let image = Tensor::zeros(vec![84, 84, 4]);
        let patches = extract_patches(&image, 6);
        assert_eq!(patches.shape, vec![196, 6 * 6 * 4]);
    }

    #[test]
    fn test_batch_extraction() {
        let images = Tensor::zeros(vec![3, 8, 8, 2]);
        let patches = extract_patches_batch(&images, 4);
        assert_eq!(patches.shape, vec![3, 4, 32]);
    }

    #[test]
    #[should_panic(expected = "not divisible")]
    fn test_non_divisible_size_panics() {
        let image = Tensor::zeros(vec![10, 10, 1]);
        let _ = extract_patches(&image, 3);
    }

    proptest! {
        #[test]
        fn prop_patch_count_and_length(
            grid_h in 1usize..5,
            grid_w in 1usize..5,
            p in 1usize..5,
            c in 1usize..4,
        ) {
            let (h, w) = (grid_h * p, grid_w * p);
            let image = Tensor::new((0..h * w * c).map(|i| i as f32).collect(), vec![h, w, c]);
            let patches = extract_patches(&image, p);

            prop_assert_eq!(patches.shape.clone(), vec![grid_h * grid_w, p * p * c]);

            // Extraction is a permutation: every pixel value appears exactly once
            let mut seen = patches.data.clone();
            seen.sort_by(|a, b| a.partial_cmp(b).unwrap());
            prop_assert_eq!(seen, image.data);
        }
    }
}
