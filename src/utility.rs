use ultraviolet::Mat4;

pub fn aligned_size(value: u64, alignment: u64) -> u64 {
    assert!(alignment.is_power_of_two());
    (value + alignment - 1) & !(alignment - 1)
}

/// Row-major 3x4 matrix, the layout `VkTransformMatrixKHR` expects.
pub fn transform_3x4(matrix: &Mat4) -> [f32; 12] {
    let c = &matrix.cols;
    [
        c[0].x, c[1].x, c[2].x, c[3].x, //
        c[0].y, c[1].y, c[2].y, c[3].y, //
        c[0].z, c[1].z, c[2].z, c[3].z,
    ]
}

pub fn div_ceil(value: u32, divisor: u32) -> u32 {
    (value + divisor - 1) / divisor
}
