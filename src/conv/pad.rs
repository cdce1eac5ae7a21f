use super::ConvShape;

/// Height and width of the source after explicit padding.
pub fn padded_size(shape: &ConvShape) -> (usize, usize) {
    (shape.src_h + shape.pad_y + shape.pad_h, shape.src_w + shape.pad_x + shape.pad_w)
}

/// Copy one NHWC source image into `dst`, surrounded by pixels holding the per-channel
/// zero-point, so the direct kernel can treat every tap as interior.
pub fn pad_image(src: &[u8], shape: &ConvShape, zero: &[u8], dst: &mut [u8]) {
    let c = shape.src_c;
    let (_, pw) = padded_size(shape);
    for pixel in dst.chunks_exact_mut(c) {
        pixel.copy_from_slice(&zero[..c]);
    }
    let row = shape.src_w * c;
    for y in 0..shape.src_h {
        let d = ((y + shape.pad_y) * pw + shape.pad_x) * c;
        dst[d..d + row].copy_from_slice(&src[y * row..(y + 1) * row]);
    }
}
