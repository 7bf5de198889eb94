use proptest::prelude::*;
use spargel_core::{Config, DataType, Error, Format, Matrix, Orientation, SparsityControl};
use spargel_kernels::*;

fn ctx() -> Context {
    Context::new(Config::default().with_max_threads(4).with_chunk(1)).unwrap()
}

fn ctx_in(o: Orientation) -> Context {
    Context::new(Config::default().with_max_threads(2).with_default_orientation(o)).unwrap()
}

#[test]
fn two_by_two_grid_of_mixed_layouts() {
    let ctx = ctx();
    // [ A(2x1) B(2x3) ]
    // [ C(1x1) D(1x3) ]
    let a = build_from::<i64>(&ctx, 2, 1, &[1], &[0], &[1], None).unwrap();
    let b = Matrix::from_dense_values::<i64>(2, 3, Orientation::ByCol, &[2, 3, 4, 5, 6, 7]).unwrap();
    let mut c_tile = Matrix::new(DataType::INT64, 1, 1);
    set_element(&ctx, &mut c_tile, 0, 0, 8i64).unwrap();
    let d = build_from::<i32>(&ctx_in(Orientation::ByCol), 1, 3, &[0], &[2], &[9], None).unwrap();

    let mut out = Matrix::new(DataType::INT64, 3, 4);
    concat(&ctx, &mut out, &[&a, &b, &c_tile, &d], 2, 2).unwrap();
    assert_eq!(out.format(), Format::Bitmap);
    assert!(out.is_finalized());
    assert_eq!(out.nvals, 1 + 6 + 1 + 1);

    let got = extract::<i64>(&ctx, &out).unwrap();
    assert_eq!(
        got,
        vec![
            (0, 1, 2),
            (0, 2, 4),
            (0, 3, 6),
            (1, 0, 1),
            (1, 1, 3),
            (1, 2, 5),
            (1, 3, 7),
            (2, 0, 8),
            (2, 3, 9),
        ]
    );
    // inputs are left alone
    assert!(!c_tile.is_finalized());
}

#[test]
fn fully_populated_tiles_give_a_full_destination() {
    let ctx = ctx();
    let left = Matrix::full_iso(2, 2, Orientation::ByRow, 1.0f32).unwrap();
    let right = Matrix::from_dense_values::<f32>(2, 1, Orientation::ByCol, &[2.0, 3.0]).unwrap();
    let mut out = Matrix::with_orientation(DataType::FP64, 2, 3, Orientation::ByCol);
    concat(&ctx, &mut out, &[&left, &right], 1, 2).unwrap();
    assert_eq!(out.format(), Format::Full);
    assert_eq!(out.get::<f64>(1, 1).unwrap(), Some(1.0));
    assert_eq!(out.get::<f64>(0, 2).unwrap(), Some(2.0));
    assert_eq!(out.get::<f64>(1, 2).unwrap(), Some(3.0));
}

#[test]
fn single_tile_is_a_converted_copy() {
    let ctx = ctx();
    let a = build_from::<u16>(&ctx, 3, 2, &[0, 2], &[1, 0], &[4, 5], None).unwrap();
    let mut out = Matrix::with_orientation(DataType::UINT16, 3, 2, Orientation::ByCol);
    concat(&ctx, &mut out, &[&a], 1, 1).unwrap();
    let expected = convert_to(&ctx, &reorient(&ctx, &a, Orientation::ByCol).unwrap(), Format::Bitmap, DataType::UINT16)
        .unwrap();
    assert_eq!(out, expected);
}

#[test]
fn destination_sparsity_control_is_honoured() {
    let ctx = ctx();
    let a = build_from::<i64>(&ctx, 2, 2, &[0], &[0], &[1], None).unwrap();
    let mut out = Matrix::new(DataType::INT64, 2, 2);
    out.sparsity = SparsityControl::only(Format::Sparse);
    concat(&ctx, &mut out, &[&a], 1, 1).unwrap();
    assert_eq!(out.format(), Format::Sparse);
    assert_eq!(out.get::<i64>(0, 0).unwrap(), Some(1));
}

#[test]
fn mismatched_tiles_are_rejected() {
    let ctx = ctx();
    let a = Matrix::new(DataType::INT64, 2, 2);
    let b = Matrix::new(DataType::INT64, 3, 2);
    let mut out = Matrix::new(DataType::INT64, 2, 4);
    let before = out.clone();
    let err = concat(&ctx, &mut out, &[&a, &b], 1, 2).unwrap_err();
    assert_eq!(err, Error::DimensionMismatch { expected: (2, 2), got: (3, 2) });
    assert_eq!(out, before);

    let err = concat(&ctx, &mut out, &[&a, &a], 2, 1).unwrap_err();
    assert_eq!(err, Error::DimensionMismatch { expected: (2, 4), got: (4, 2) });

    let err = concat(&ctx, &mut out, &[&a], 1, 2).unwrap_err();
    assert!(matches!(err, Error::InvalidObject(_)));

    let user = Matrix::new(DataType::user("blob", 3), 2, 2);
    let err = concat(&ctx, &mut out, &[&a, &user], 1, 2).unwrap_err();
    assert!(matches!(err, Error::DomainMismatch { .. }));
    assert_eq!(out, before);
}

#[test]
fn tile_bounds_are_prefix_sums() {
    let a = Matrix::new(DataType::BOOL, 2, 3);
    let b = Matrix::new(DataType::BOOL, 2, 1);
    let c = Matrix::new(DataType::BOOL, 4, 3);
    let d = Matrix::new(DataType::BOOL, 4, 1);
    let bounds = tile_bounds(&[&a, &b, &c, &d], 2, 2).unwrap();
    assert_eq!(bounds.rows, vec![0, 2, 6]);
    assert_eq!(bounds.cols, vec![0, 3, 4]);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn global_entry_equals_local_tile_entry(
        heights in prop::collection::vec(1usize..5, 1..4),
        widths in prop::collection::vec(1usize..5, 1..4),
        seed in prop::collection::vec(prop::option::weighted(0.6, -100i64..100), 256),
        orients in prop::collection::vec(any::<bool>(), 16),
        dest_by_col in any::<bool>(),
    ) {
        let ctx = ctx();
        let (m, n) = (heights.len(), widths.len());
        let mut tiles = Vec::with_capacity(m * n);
        let mut s = 0usize;
        for a in 0..m {
            for b in 0..n {
                let (h, w) = (heights[a], widths[b]);
                let (mut r, mut c, mut v) = (Vec::new(), Vec::new(), Vec::new());
                for t in 0..h * w {
                    if let Some(x) = seed[(s + t) % seed.len()] {
                        r.push(t / w);
                        c.push(t % w);
                        v.push(x);
                    }
                }
                s += h * w;
                let o = if orients[(a * n + b) % orients.len()] { Orientation::ByCol } else { Orientation::ByRow };
                tiles.push(build_from::<i64>(&ctx_in(o), h, w, &r, &c, &v, None).unwrap());
            }
        }
        let refs: Vec<&Matrix> = tiles.iter().collect();
        let (nrows, ncols) = (heights.iter().sum::<usize>(), widths.iter().sum::<usize>());
        let o = if dest_by_col { Orientation::ByCol } else { Orientation::ByRow };
        let mut out = Matrix::with_orientation(DataType::INT64, nrows, ncols, o);
        concat(&ctx, &mut out, &refs, m, n).unwrap();

        let bounds = tile_bounds(&refs, m, n).unwrap();
        for a in 0..m {
            for b in 0..n {
                let tile = refs[a * n + b];
                for r in 0..heights[a] {
                    for c in 0..widths[b] {
                        prop_assert_eq!(
                            out.get::<i64>(bounds.rows[a] + r, bounds.cols[b] + c).unwrap(),
                            tile.get::<i64>(r, c).unwrap()
                        );
                    }
                }
            }
        }
    }
}
