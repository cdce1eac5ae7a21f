use qconv::{Dst, ElemKind, Src, TensorFormat, TensorU8};

#[test]
fn tensor_get_set() {
    let mut t = TensorU8::new(1, 2, 3, 4, TensorFormat::Nchw);
    t.set(0, 1, 2, 3, 42);
    assert_eq!(t.get(0, 1, 2, 3), 42);
    assert_eq!(t.data[23], 42);

    let mut t = TensorU8::new(1, 2, 3, 4, TensorFormat::Nhwc);
    t.set(0, 1, 2, 3, 42);
    assert_eq!(t.data[(2 * 4 + 3) * 2 + 1], 42);
}

#[test]
fn tensor_fill() {
    let mut t = TensorU8::new(2, 1, 2, 2, TensorFormat::Nhwc);
    t.fill(7);
    assert_eq!(t.get(0, 0, 0, 0), 7);
    assert_eq!(t.get(1, 0, 1, 1), 7);
    assert_eq!(t.memory_bytes(), 8);
}

#[test]
fn format_change_preserves_coordinates() {
    let mut t = TensorU8::new(2, 3, 2, 5, TensorFormat::Nchw);
    for (i, v) in t.data.iter_mut().enumerate() {
        *v = (i * 7 % 251) as u8;
    }
    let nhwc = t.to_format(TensorFormat::Nhwc);
    assert_eq!(nhwc.format, TensorFormat::Nhwc);
    for n in 0..2 {
        for c in 0..3 {
            for h in 0..2 {
                for w in 0..5 {
                    assert_eq!(nhwc.get(n, c, h, w), t.get(n, c, h, w));
                }
            }
        }
    }
    assert_eq!(nhwc.to_format(TensorFormat::Nchw), t);
}

#[test]
fn channel_of_offset() {
    let (c, h, w) = (3, 2, 4);
    for format in [TensorFormat::Nchw, TensorFormat::Nhwc] {
        for ch in 0..c {
            for y in 0..h {
                for x in 0..w {
                    let i = format.offset(c, h, w, ch, y, x);
                    assert_eq!(format.channel_of(c, h * w, i), ch, "{} at {} {} {}", format, ch, y, x);
                }
            }
        }
    }
}

#[test]
fn views_report_kind_and_length() {
    let bytes = [0u8; 6];
    let floats = [0.0f32; 4];
    assert_eq!(Src::U8(&bytes).kind(), ElemKind::U8);
    assert_eq!(Src::F32(&floats).len(), 4);
    assert!(Src::U8(&[]).is_empty());

    let mut out = vec![0.0f32; 10];
    let mut dst = Dst::F32(&mut out);
    assert_eq!(dst.kind(), ElemKind::F32);
    assert_eq!(dst.reborrow().len(), 10);
    let chunks = dst.chunks(4);
    assert_eq!(chunks.iter().map(|c| c.len()).collect::<Vec<_>>(), vec![4, 4, 2]);
}

#[test]
fn dst_slice_writes_through() {
    let mut out = vec![0u8; 8];
    if let Dst::U8(d) = Dst::U8(&mut out).slice(2, 3) {
        d.fill(9);
    }
    assert_eq!(out, vec![0, 0, 9, 9, 9, 0, 0, 0]);
    assert_eq!(ElemKind::F32.size(), 4);
    assert_eq!(format!("{} {}", ElemKind::U8, TensorFormat::Nhwc), "8u Nhwc");
}
