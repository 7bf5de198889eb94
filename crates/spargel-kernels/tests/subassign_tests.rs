use proptest::prelude::*;
use spargel_core::{BinaryOp, Config, DataType, Error, Format, IndexList, Matrix, Orientation};
use spargel_kernels::*;

fn ctx() -> Context {
    // chunk 1 so even tiny inputs are split across several tasks
    Context::new(Config::default().with_max_threads(4).with_chunk(1)).unwrap()
}

fn diag_mask(ctx: &Context, n: usize) -> Matrix {
    let idx: Vec<usize> = (0..n).collect();
    build_from::<bool>(ctx, n, n, &idx, &idx, &vec![true; n], None).unwrap()
}

fn dense_of(ctx: &Context, c: &Matrix) -> Vec<Option<i64>> {
    let (nrows, ncols) = c.shape();
    let mut out = vec![None; nrows * ncols];
    for (r, cl, v) in extract::<i64>(ctx, c).unwrap() {
        out[r * ncols + cl] = Some(v);
    }
    out
}

#[test]
fn diagonal_mask_scalar_seven() {
    let ctx = ctx();
    let mut c = Matrix::new(DataType::INT64, 4, 4);
    let mask = diag_mask(&ctx, 4);
    assign_scalar(&ctx, &mut c, Some(&mask), false, None, &IndexList::All, &IndexList::All, 7i64).unwrap();
    assert!(c.format().is_compressed());
    assert_eq!(c.pending_count(), 4);
    assert!(!c.is_finalized());

    reconcile(&ctx, &mut c).unwrap();
    assert_eq!(c.nvals_finalized().unwrap(), 4);
    for r in 0..4 {
        for cl in 0..4 {
            let want = (r == cl).then_some(7i64);
            assert_eq!(c.get::<i64>(r, cl).unwrap(), want, "({r},{cl})");
        }
    }
    assert!(c.iso);
}

#[test]
fn scalar_overwrites_existing_and_revives_zombies() {
    let ctx = ctx();
    let mut c = build_from::<i64>(&ctx, 3, 3, &[0, 1, 2], &[0, 1, 2], &[1, 2, 3], None).unwrap();
    remove_element(&ctx, &mut c, 1, 1).unwrap();
    assert_eq!(c.zombie_count(), 1);

    assign_scalar(&ctx, &mut c, None, true, None, &IndexList::Range { start: 0, end: 2 }, &IndexList::All, 9i64)
        .unwrap();
    // (1,1) came back from the dead, (0,0) was overwritten in place
    assert_eq!(c.zombie_count(), 0);
    assert_eq!(c.pending_count(), 4);

    reconcile(&ctx, &mut c).unwrap();
    let d = dense_of(&ctx, &c);
    assert_eq!(d[0..3], [Some(9), Some(9), Some(9)]);
    assert_eq!(d[3..6], [Some(9), Some(9), Some(9)]);
    assert_eq!(d[6..9], [None, None, Some(3)]);
}

#[test]
fn matrix_source_without_accum_deletes_missing_entries() {
    let ctx = ctx();
    // C = all ones, 3x3
    let rows: Vec<usize> = (0..9).map(|t| t / 3).collect();
    let cols: Vec<usize> = (0..9).map(|t| t % 3).collect();
    let mut c = build_from::<i64>(&ctx, 3, 3, &rows, &cols, &[1; 9], None).unwrap();
    // A covers C(0..2, 1..3) with only its diagonal
    let a = build_from::<i64>(&ctx, 2, 2, &[0, 1], &[0, 1], &[5, 6], None).unwrap();
    subassign(
        &ctx,
        &mut c,
        None,
        true,
        None,
        &IndexList::Range { start: 0, end: 2 },
        &IndexList::Range { start: 1, end: 3 },
        AssignSource::Matrix(&a),
    )
    .unwrap();
    assert_eq!(c.zombie_count(), 2);

    reconcile(&ctx, &mut c).unwrap();
    assert_eq!(
        dense_of(&ctx, &c),
        vec![Some(1), Some(5), None, Some(1), None, Some(6), Some(1), Some(1), Some(1)]
    );
}

#[test]
fn matrix_source_with_accum_keeps_missing_entries() {
    let ctx = ctx();
    let mut c = build_from::<i64>(&ctx, 2, 2, &[0, 0, 1], &[0, 1, 1], &[1, 2, 3], None).unwrap();
    let a = build_from::<i64>(&ctx, 2, 2, &[0, 1], &[0, 0], &[10, 20], None).unwrap();
    let plus = BinaryOp::plus(DataType::INT64);
    subassign(&ctx, &mut c, None, true, Some(&plus), &IndexList::All, &IndexList::All, AssignSource::Matrix(&a))
        .unwrap();
    reconcile(&ctx, &mut c).unwrap();
    assert_eq!(dense_of(&ctx, &c), vec![Some(11), Some(2), Some(20), Some(3)]);
}

#[test]
fn accumulated_pending_tuples_combine() {
    let ctx = ctx();
    let mut c = Matrix::new(DataType::INT64, 2, 2);
    let plus = BinaryOp::plus(DataType::INT64);
    for _ in 0..3 {
        assign_scalar(&ctx, &mut c, None, true, Some(&plus), &IndexList::All, &IndexList::List(vec![1]), 2i64)
            .unwrap();
    }
    assert_eq!(c.pending_count(), 6);
    reconcile(&ctx, &mut c).unwrap();
    assert_eq!(dense_of(&ctx, &c), vec![None, Some(6), None, Some(6)]);
}

#[test]
fn valued_mask_is_cast_to_bool() {
    let ctx = ctx();
    let mut c = Matrix::new(DataType::INT64, 2, 2);
    // explicit zero in the mask counts as false unless structural
    let mask = build_from::<f64>(&ctx, 2, 2, &[0, 1], &[0, 1], &[0.0, 2.5], None).unwrap();
    assign_scalar(&ctx, &mut c, Some(&mask), false, None, &IndexList::All, &IndexList::All, 4i64).unwrap();
    reconcile(&ctx, &mut c).unwrap();
    assert_eq!(dense_of(&ctx, &c), vec![None, None, None, Some(4)]);

    let mut c2 = Matrix::new(DataType::INT64, 2, 2);
    assign_scalar(&ctx, &mut c2, Some(&mask), true, None, &IndexList::All, &IndexList::All, 4i64).unwrap();
    reconcile(&ctx, &mut c2).unwrap();
    assert_eq!(dense_of(&ctx, &c2), vec![Some(4), None, None, Some(4)]);
}

#[test]
fn index_lists_scatter_into_the_window() {
    let ctx = ctx();
    let mut c = Matrix::with_orientation(DataType::INT64, 4, 5, Orientation::ByCol);
    // A(r, c) goes to C(I[r], J[c]); J is not sorted
    let a = build_from::<i64>(&ctx, 2, 2, &[0, 0, 1, 1], &[0, 1, 0, 1], &[1, 2, 3, 4], None).unwrap();
    subassign(
        &ctx,
        &mut c,
        None,
        true,
        None,
        &IndexList::List(vec![3, 1]),
        &IndexList::List(vec![4, 0]),
        AssignSource::Matrix(&a),
    )
    .unwrap();
    reconcile(&ctx, &mut c).unwrap();
    assert_eq!(c.get::<i64>(3, 4).unwrap(), Some(1));
    assert_eq!(c.get::<i64>(3, 0).unwrap(), Some(2));
    assert_eq!(c.get::<i64>(1, 4).unwrap(), Some(3));
    assert_eq!(c.get::<i64>(1, 0).unwrap(), Some(4));
    assert_eq!(c.nvals_finalized().unwrap(), 4);
}

#[test]
fn bitmap_target_updates_in_place() {
    let ctx = ctx();
    let mut c = build_from::<i64>(&ctx, 3, 3, &[0], &[0], &[1], None).unwrap();
    ensure_format(&ctx, &mut c, Format::Bitmap).unwrap();
    let mask = diag_mask(&ctx, 3);
    assign_scalar(&ctx, &mut c, Some(&mask), true, None, &IndexList::All, &IndexList::All, 5i64).unwrap();
    assert_eq!(c.format(), Format::Bitmap);
    assert_eq!(c.pending_count(), 0);
    assert_eq!(c.nvals, 3);
    assert_eq!(c.get::<i64>(0, 0).unwrap(), Some(5));
    assert_eq!(c.get::<i64>(2, 2).unwrap(), Some(5));
    assert_eq!(c.get::<i64>(0, 1).unwrap(), None);
}

#[test]
fn full_target_with_deletions_becomes_bitmap() {
    let ctx = ctx();
    let mut c = Matrix::from_dense_values::<i64>(2, 2, Orientation::ByRow, &[1, 2, 3, 4]).unwrap();
    let a = build_from::<i64>(&ctx, 1, 2, &[0], &[1], &[7], None).unwrap();
    subassign(
        &ctx,
        &mut c,
        None,
        true,
        None,
        &IndexList::List(vec![1]),
        &IndexList::All,
        AssignSource::Matrix(&a),
    )
    .unwrap();
    assert_eq!(c.format(), Format::Bitmap);
    assert_eq!(c.nvals, 3);
    assert_eq!(dense_of(&ctx, &c), vec![Some(1), Some(2), None, Some(7)]);
}

#[test]
fn full_target_accumulates_in_place() {
    let ctx = ctx();
    let mut c = Matrix::from_dense_values::<f64>(2, 2, Orientation::ByCol, &[1.0, 2.0, 3.0, 4.0]).unwrap();
    let plus = BinaryOp::plus(DataType::FP64);
    assign_scalar(&ctx, &mut c, None, true, Some(&plus), &IndexList::All, &IndexList::All, 1.5f64).unwrap();
    assert_eq!(c.format(), Format::Full);
    // by column: x = [C(0,0), C(1,0), C(0,1), C(1,1)]
    assert_eq!(c.get::<f64>(1, 0).unwrap(), Some(3.5));
    assert_eq!(c.get::<f64>(0, 1).unwrap(), Some(4.5));
}

#[test]
fn scalar_is_cast_to_target_type() {
    let ctx = ctx();
    let mut c = Matrix::new(DataType::INT32, 1, 3);
    assign_scalar(&ctx, &mut c, None, true, None, &IndexList::All, &IndexList::All, 2.9f64).unwrap();
    reconcile(&ctx, &mut c).unwrap();
    assert_eq!(c.get::<i32>(0, 2).unwrap(), Some(2));
}

#[test]
fn bad_arguments_leave_target_untouched() {
    let ctx = ctx();
    let mut c = build_from::<i64>(&ctx, 3, 3, &[0, 2], &[0, 1], &[1, 2], None).unwrap();
    set_element(&ctx, &mut c, 1, 1, 8i64).unwrap();
    let before = c.clone();

    let mask = diag_mask(&ctx, 2);
    let err = assign_scalar(&ctx, &mut c, Some(&mask), true, None, &IndexList::All, &IndexList::All, 1i64)
        .unwrap_err();
    assert_eq!(err, Error::DimensionMismatch { expected: (3, 3), got: (2, 2) });
    assert_eq!(c, before);

    let err = assign_scalar(&ctx, &mut c, None, true, None, &IndexList::List(vec![0, 3]), &IndexList::All, 1i64)
        .unwrap_err();
    assert_eq!(err, Error::IndexOutOfBounds { index: 3, bound: 3 });
    assert_eq!(c, before);

    let err = assign_scalar(&ctx, &mut c, None, true, None, &IndexList::List(vec![1, 1]), &IndexList::All, 1i64)
        .unwrap_err();
    assert!(matches!(err, Error::InvalidIndex(_)));
    assert_eq!(c, before);

    let plus = BinaryOp::plus(DataType::FP64);
    let err = assign_scalar(&ctx, &mut c, None, true, Some(&plus), &IndexList::All, &IndexList::All, 1i64)
        .unwrap_err();
    assert!(matches!(err, Error::DomainMismatch { .. }));
    assert_eq!(c, before);
}

#[test]
fn out_of_memory_is_all_or_nothing() {
    let tight = Context::new(Config::default().with_max_threads(2).with_memory_limit(Some(40_000))).unwrap();
    let mut c = Matrix::new(DataType::INT64, 100, 100);
    let before = c.clone();
    let err = assign_scalar(&tight, &mut c, None, true, None, &IndexList::All, &IndexList::All, 1i64).unwrap_err();
    assert!(matches!(err, Error::OutOfMemory { .. }));
    assert_eq!(c, before);
    assert_eq!(c.pending_count(), 0);
}

/// Reference model of one masked update on a dense grid.
#[allow(clippy::too_many_arguments)]
fn reference(
    c: &mut [Option<i64>],
    ncols: usize,
    rows: &[usize],
    cols: &[usize],
    mask: &[bool],
    source: &[Option<i64>],
    accum: bool,
) {
    for (r, &ci) in rows.iter().enumerate() {
        for (k, &cj) in cols.iter().enumerate() {
            if !mask[r * cols.len() + k] {
                continue;
            }
            let cell = &mut c[ci * ncols + cj];
            match (source[r * cols.len() + k], accum) {
                (Some(v), true) => *cell = Some(cell.map_or(v, |old| old.wrapping_add(v))),
                (Some(v), false) => *cell = Some(v),
                (None, true) => {}
                (None, false) => *cell = None,
            }
        }
    }
}

fn subset(n: usize) -> impl Strategy<Value = Vec<usize>> {
    Just((0..n).collect::<Vec<usize>>())
        .prop_shuffle()
        .prop_flat_map(move |v| (1..=n).prop_map(move |k| v[..k].to_vec()))
}

fn any_format() -> impl Strategy<Value = Format> {
    prop_oneof![
        Just(Format::Sparse),
        Just(Format::Hypersparse),
        Just(Format::Bitmap),
        Just(Format::Full)
    ]
}

fn any_orientation() -> impl Strategy<Value = Orientation> {
    prop_oneof![Just(Orientation::ByRow), Just(Orientation::ByCol)]
}

#[test]
fn huge_hypersparse_target_takes_scattered_updates() {
    let ctx = ctx();
    let n = 1usize << 46;
    let mut c = Matrix::new(DataType::INT64, n, n);
    assign_scalar(&ctx, &mut c, None, true, None, &IndexList::List(vec![3]), &IndexList::List(vec![7]), 5i64).unwrap();
    assign_scalar(
        &ctx,
        &mut c,
        None,
        true,
        None,
        &IndexList::List(vec![n - 1, 3]),
        &IndexList::List(vec![n - 2]),
        6i64,
    )
    .unwrap();
    assert_eq!(c.pending_count(), 3);
    reconcile(&ctx, &mut c).unwrap();
    assert_eq!(c.format(), Format::Hypersparse);
    assert_eq!(c.nvals_finalized().unwrap(), 3);
    assert_eq!(c.get::<i64>(3, 7).unwrap(), Some(5));
    assert_eq!(c.get::<i64>(3, n - 2).unwrap(), Some(6));
    assert_eq!(c.get::<i64>(n - 1, n - 2).unwrap(), Some(6));

    // a whole column of the window needs 2^46 pending slots
    let tight = Context::new(Config::default().with_max_threads(2).with_memory_limit(Some(1 << 20))).unwrap();
    let before = c.clone();
    let err = assign_scalar(&tight, &mut c, None, true, None, &IndexList::All, &IndexList::List(vec![7]), 1i64)
        .unwrap_err();
    assert!(matches!(err, Error::OutOfMemory { .. }));
    assert_eq!(c, before);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn masked_update_matches_dense_model(
        cells in prop::collection::vec(prop::option::weighted(0.5, -50i64..50), 36),
        rows in subset(6),
        cols in subset(6),
        mask_bits in prop::collection::vec(any::<bool>(), 36),
        src_vals in prop::collection::vec(prop::option::weighted(0.7, -50i64..50), 36),
        use_matrix in any::<bool>(),
        accum in any::<bool>(),
        format in any_format(),
        (c_orient, m_orient) in (any_orientation(), any_orientation()),
        scalar in -50i64..50,
        pending_row in 0usize..6,
    ) {
        let ctx = ctx();
        let n = 6usize;
        let (ni, nj) = (rows.len(), cols.len());

        // C in the requested layout and orientation, plus a little deferred work
        let mut expect = cells.clone();
        let (mut tr, mut tc, mut tv) = (Vec::new(), Vec::new(), Vec::new());
        for (t, v) in cells.iter().enumerate() {
            if let Some(v) = v {
                tr.push(t / n);
                tc.push(t % n);
                tv.push(*v);
            }
        }
        let ctx_o = Context::new(Config::default().with_max_threads(4).with_chunk(1).with_default_orientation(c_orient)).unwrap();
        let mut c = build_from::<i64>(&ctx_o, n, n, &tr, &tc, &tv, None).unwrap();
        ensure_format(&ctx, &mut c, format).unwrap();
        if c.format().is_compressed() {
            set_element(&ctx, &mut c, pending_row, 5, 99i64).unwrap();
            expect[pending_row * n + 5] = Some(99);
            if expect[pending_row * n].is_some() {
                remove_element(&ctx, &mut c, pending_row, 0).unwrap();
                expect[pending_row * n] = None;
            }
        }

        // mask over the |I| x |J| window
        let mask_flags: Vec<bool> = mask_bits[..ni * nj].to_vec();
        let (mr, mc): (Vec<usize>, Vec<usize>) = (0..ni * nj).map(|t| (t / nj, t % nj)).unzip();
        let ctx_m = Context::new(Config::default().with_default_orientation(m_orient)).unwrap();
        let mask = build_from::<bool>(&ctx_m, ni, nj, &mr, &mc, &mask_flags, None).unwrap();

        let src: Vec<Option<i64>> = if use_matrix {
            src_vals[..ni * nj].to_vec()
        } else {
            vec![Some(scalar); ni * nj]
        };
        let a = {
            let (mut ar, mut ac, mut av) = (Vec::new(), Vec::new(), Vec::new());
            for (t, v) in src.iter().enumerate() {
                if let Some(v) = v {
                    ar.push(t / nj);
                    ac.push(t % nj);
                    av.push(*v);
                }
            }
            build_from::<i64>(&ctx, ni, nj, &ar, &ac, &av, None).unwrap()
        };
        let plus = BinaryOp::plus(DataType::INT64);
        let accum_op = accum.then_some(&plus);
        let scalar_bytes = scalar.to_ne_bytes();
        let source = if use_matrix {
            AssignSource::Matrix(&a)
        } else {
            AssignSource::Scalar { ty: DataType::INT64, bytes: &scalar_bytes }
        };
        subassign(
            &ctx,
            &mut c,
            Some(&mask),
            false,
            accum_op,
            &IndexList::List(rows.clone()),
            &IndexList::List(cols.clone()),
            source,
        )
        .unwrap();

        reference(&mut expect, n, &rows, &cols, &mask_flags, &src, accum);
        prop_assert_eq!(dense_of(&ctx, &c), expect);
    }
}
