use ndarray::ArrayView2;

pub(crate) struct Interpolator;

impl Interpolator {
    /// Dimensions (x, y, z) a volume would have if every voxel edge were as
    /// long as its shortest spacing.
    pub(crate) fn get_isotropic_dimensions(spacing: [f64; 3], dimensions: [usize; 3]) -> [u32; 3] {
        let min_spacing = spacing[0].min(spacing[1]).min(spacing[2]);
        let inv_min_spacing = 1.0 / min_spacing;

        let scale = |i: usize| ((dimensions[i] as f64 * spacing[i] * inv_min_spacing) as u32).max(1);
        [scale(0), scale(1), scale(2)]
    }

    #[inline]
    pub(crate) fn bilinear_interpolate(slice: &ArrayView2<f32>, y: f32, x: f32) -> f32 {
        let (height, width) = slice.dim();

        let y0 = y.floor() as usize;
        let x0 = x.floor() as usize;
        let y1 = (y0 + 1).min(height - 1);
        let x1 = (x0 + 1).min(width - 1);

        let dy = y - y0 as f32;
        let dx = x - x0 as f32;
        let one_minus_dx = 1.0 - dx;
        let one_minus_dy = 1.0 - dy;

        let v00 = slice[[y0, x0]];
        let v01 = slice[[y0, x1]];
        let v10 = slice[[y1, x0]];
        let v11 = slice[[y1, x1]];

        let v0 = v00.mul_add(one_minus_dx, v01 * dx);
        let v1 = v10.mul_add(one_minus_dx, v11 * dx);

        v0.mul_add(one_minus_dy, v1 * dy)
    }
}
