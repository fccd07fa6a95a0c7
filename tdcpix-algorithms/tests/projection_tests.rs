use tdcpix_algorithms::{project_time, project_x, project_xy, project_y};
use tdcpix_core::pixels::{u32_values, write_u32};
use tdcpix_core::{Attribute, HistogramBuffer, HistogramVariant};

/// Cube with `w x h x zs` pixels, offsets (3, 5, 7), filled with a known pattern.
fn cube(w: i64, h: i64, zs: i64) -> HistogramBuffer {
    let mut c = HistogramBuffer::new(HistogramVariant::Cube3D);
    c.set(Attribute::RoiX1, 3).unwrap();
    c.set(Attribute::RoiX2, 3 + w - 1).unwrap();
    c.set(Attribute::RoiY1, 5).unwrap();
    c.set(Attribute::RoiY2, 5 + h - 1).unwrap();
    c.set(Attribute::RoiTOffset, 7).unwrap();
    c.set(Attribute::RoiTSize, zs).unwrap();
    c.accommodate_buffer(true).unwrap();
    {
        let mut px = c.lock_pixels();
        let n = (w * h * zs) as usize;
        for i in 0..n {
            write_u32(&mut px, i, (i as u32 * 7 + 3) % 11);
        }
    }
    c
}

fn sum(h: &HistogramBuffer) -> u64 {
    h.snapshot_u32().unwrap().iter().map(|&v| u64::from(v)).sum()
}

fn cube_value(c: &HistogramBuffer, x: usize, y: usize, t: usize) -> u32 {
    let w = c.width() as usize;
    let h = c.height() as usize;
    let px = c.lock_pixels();
    let v = u32_values(&px).nth((t * h + y) * w + x).unwrap();
    v
}

#[test]
fn test_project_time_conserves_total() {
    let src = cube(4, 3, 5);
    let mut dst = HistogramBuffer::new(HistogramVariant::ImageXY);
    project_time(&src, &mut dst, 0, src.zsize() as i64).unwrap();
    assert_eq!((dst.width(), dst.height()), (4, 3));
    assert_eq!((dst.abscissa_offset(), dst.ordinate_offset()), (3, 5));
    assert_eq!(sum(&dst), sum(&src));
}

#[test]
fn test_project_y_conserves_total() {
    let src = cube(4, 3, 5);
    let mut dst = HistogramBuffer::new(HistogramVariant::ImageXT);
    project_y(&src, &mut dst, 0, 3).unwrap();
    assert_eq!((dst.width(), dst.height()), (4, 5));
    assert_eq!((dst.abscissa_offset(), dst.ordinate_offset()), (3, 7));
    assert_eq!(sum(&dst), sum(&src));
}

#[test]
fn test_project_x_conserves_total() {
    let src = cube(4, 3, 5);
    let mut dst = HistogramBuffer::new(HistogramVariant::ImageYT);
    project_x(&src, &mut dst, 0, 4).unwrap();
    assert_eq!(sum(&dst), sum(&src));
}

#[test]
fn test_project_xy_conserves_total() {
    let src = cube(4, 3, 5);
    let mut dst = HistogramBuffer::new(HistogramVariant::Spectrum1D);
    project_xy(&src, &mut dst, (0, 4), (0, 3)).unwrap();
    assert_eq!(dst.width(), 5);
    assert_eq!(dst.abscissa_offset(), 7);
    assert_eq!(sum(&dst), sum(&src));
}

#[test]
fn test_project_x_swaps_axes() {
    let src = cube(2, 3, 4);
    let mut dst = HistogramBuffer::new(HistogramVariant::ImageYT);
    project_x(&src, &mut dst, 0, 2).unwrap();
    assert_eq!(dst.width(), 3);
    assert_eq!(dst.height(), 4);
    assert_eq!(dst.abscissa_offset(), 5);
    assert_eq!(dst.ordinate_offset(), 7);

    let out = dst.snapshot_u32().unwrap();
    for t in 0..4 {
        for y in 0..3 {
            let expected = cube_value(&src, 0, y, t) + cube_value(&src, 1, y, t);
            assert_eq!(out[t * 3 + y], expected, "mismatch at y={y} t={t}");
        }
    }
}

#[test]
fn test_partial_and_reversed_bounds() {
    let src = cube(4, 3, 5);
    let mut a = HistogramBuffer::new(HistogramVariant::ImageXY);
    let mut b = HistogramBuffer::new(HistogramVariant::ImageXY);
    project_time(&src, &mut a, 1, 3).unwrap();
    project_time(&src, &mut b, 3, 1).unwrap();
    assert_eq!(a.snapshot_u32().unwrap(), b.snapshot_u32().unwrap());

    let expected: u32 = (1..3).map(|t| cube_value(&src, 2, 1, t)).sum();
    assert_eq!(a.snapshot_u32().unwrap()[4 + 2], expected);
}

#[test]
fn test_out_of_range_bounds_clamp() {
    let src = cube(4, 3, 5);
    let mut clipped = HistogramBuffer::new(HistogramVariant::ImageXT);
    let mut full = HistogramBuffer::new(HistogramVariant::ImageXT);
    project_y(&src, &mut clipped, -10, 100).unwrap();
    project_y(&src, &mut full, 0, 3).unwrap();
    assert_eq!(clipped.snapshot_u32().unwrap(), full.snapshot_u32().unwrap());
}

#[test]
fn test_target_is_cleared_before_adding() {
    let src = cube(4, 3, 5);
    let mut dst = HistogramBuffer::new(HistogramVariant::Spectrum1D);
    project_xy(&src, &mut dst, (0, 4), (0, 3)).unwrap();
    let first = dst.snapshot_u32().unwrap();
    project_xy(&src, &mut dst, (0, 4), (0, 3)).unwrap();
    assert_eq!(dst.snapshot_u32().unwrap(), first);
}
