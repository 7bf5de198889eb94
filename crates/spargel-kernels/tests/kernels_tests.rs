use spargel_core::{
    BinaryOp, Complex64, Config, DataType, Error, Format, Matrix, Opcode, Orientation, Scalar,
};
use spargel_kernels::cast::cast_value;
use spargel_kernels::*;

fn ctx() -> Context {
    Context::new(Config::default().with_max_threads(4).with_chunk(1)).unwrap()
}

fn cast_to<D: Scalar, S: Scalar>(v: S) -> D {
    D::read_bytes(&cast_value(&D::TYPE, &S::TYPE, &v.to_bytes()).unwrap())
}

fn dense_cells<T: Scalar>(m: &Matrix) -> Vec<Option<T>> {
    let (nrows, ncols) = m.shape();
    (0..nrows)
        .flat_map(|r| (0..ncols).map(move |c| (r, c)))
        .map(|(r, c)| m.get::<T>(r, c).unwrap())
        .collect()
}

// ---------------------------------------------------------------- cast

#[test]
fn builtin_casts_follow_as_semantics() {
    assert_eq!(cast_to::<i32, f64>(3.9), 3);
    assert_eq!(cast_to::<i32, f64>(-1.5), -1);
    assert_eq!(cast_to::<i32, f64>(f64::NAN), 0);
    assert_eq!(cast_to::<i32, f64>(1e20), i32::MAX);
    assert_eq!(cast_to::<u8, i64>(300), 44);
    assert_eq!(cast_to::<f64, Complex64>(Complex64::new(2.5, 1.0)), 2.5);
    assert_eq!(cast_to::<Complex64, i16>(-4), Complex64::new(-4.0, 0.0));
    assert!(!cast_to::<bool, f64>(0.0));
    assert!(cast_to::<bool, Complex64>(Complex64::new(0.0, 1.0)));
    assert_eq!(cast_to::<u16, bool>(true), 1);
}

#[test]
fn user_types_only_copy_onto_themselves() {
    let blob = DataType::user("blob", 3);
    let err = caster(&blob, &DataType::INT8).unwrap_err();
    assert!(matches!(err, Error::DomainMismatch { .. }));
    assert!(caster(&DataType::FP32, &blob).is_err());
    assert!(cast_factory(DataType::INT8.code, blob.code).is_none());

    let c = caster(&blob, &blob).unwrap();
    assert!(c.is_copy());
    let mut dst = [0u8; 3];
    c.one(&mut dst, &[7, 8, 9]);
    assert_eq!(dst, [7, 8, 9]);
}

#[test]
fn copy_fn_moves_exactly_one_value() {
    for size in [1usize, 2, 3, 4, 8, 12, 16] {
        let src: Vec<u8> = (1..=size as u8).collect();
        let mut dst = vec![0u8; size + 1];
        copy_fn(size)(&mut dst[..size], &src);
        assert_eq!(&dst[..size], &src[..]);
        assert_eq!(dst[size], 0);
    }
}

// ------------------------------------------------------------ registry

#[test]
fn resolved_operators_combine_in_place() {
    let plus = resolve(&BinaryOp::plus(DataType::INT32)).unwrap();
    let mut acc = 40i32.to_bytes();
    plus.apply(&mut acc, &2i32.to_bytes());
    assert_eq!(i32::read_bytes(&acc), 42);

    let min = resolve(&BinaryOp::builtin(Opcode::Min, DataType::FP64)).unwrap();
    let mut acc = 1.5f64.to_bytes();
    min.apply(&mut acc, &(-3.0f64).to_bytes());
    assert_eq!(f64::read_bytes(&acc), -3.0);

    let lor = resolve(&BinaryOp::builtin(Opcode::Lor, DataType::BOOL)).unwrap();
    let mut acc = false.to_bytes();
    lor.apply(&mut acc, &true.to_bytes());
    assert!(bool::read_bytes(&acc));

    let second = resolve(&BinaryOp::second(DataType::UINT16)).unwrap();
    let mut acc = 1u16.to_bytes();
    second.apply(&mut acc, &9u16.to_bytes());
    assert_eq!(u16::read_bytes(&acc), 9);
}

#[test]
fn unsupported_pairs_are_reported() {
    let err = resolve(&BinaryOp::builtin(Opcode::Min, DataType::FC64)).unwrap_err();
    assert_eq!(
        err,
        Error::UnsupportedOperator {
            op: "min".into(),
            ty: "fc64".into()
        }
    );
    assert!(resolve(&BinaryOp::builtin(Opcode::Lor, DataType::INT8)).is_err());
    assert!(resolve(&BinaryOp::builtin(Opcode::Plus, DataType::user("blob", 4))).is_err());
}

#[test]
fn builtin_monoids_carry_identity_and_terminal() {
    let min = builtin_monoid(Opcode::Min, DataType::INT16).unwrap();
    assert_eq!(i16::read_bytes(&min.identity), i16::MAX);
    assert_eq!(min.terminal.as_deref(), Some(&i16::MIN.to_bytes()[..]));

    let times = builtin_monoid(Opcode::Times, DataType::INT32).unwrap();
    assert_eq!(i32::read_bytes(&times.identity), 1);
    assert!(times.is_terminal(&0i32.to_bytes()));

    let ftimes = builtin_monoid(Opcode::Times, DataType::FP64).unwrap();
    assert!(ftimes.terminal.is_none());

    let land = builtin_monoid(Opcode::Land, DataType::BOOL).unwrap();
    assert!(bool::read_bytes(&land.identity));
    assert!(land.is_terminal(&false.to_bytes()));

    assert!(builtin_monoid(Opcode::First, DataType::INT64).is_err());
    assert!(builtin_monoid(Opcode::Max, DataType::FC32).is_err());
}

// -------------------------------------------------------------- reduce

#[test]
fn reduce_plus_over_sparse_entries() {
    let ctx = ctx();
    let a = build_from::<i64>(&ctx, 4, 5, &[0, 1, 3, 3], &[4, 0, 2, 3], &[5, -2, 10, 7], None).unwrap();
    let plus = builtin_monoid(Opcode::Plus, DataType::INT64).unwrap();
    assert_eq!(reduce::<i64>(&ctx, &a, &plus).unwrap(), 20);

    let max = builtin_monoid(Opcode::Max, DataType::INT64).unwrap();
    assert_eq!(reduce::<i64>(&ctx, &a, &max).unwrap(), 10);
}

#[test]
fn reduce_large_fp64_sum() {
    let ctx = ctx();
    let (nrows, ncols) = (200, 150);
    let values: Vec<f64> = (0..nrows * ncols).map(|k| (k % 7) as f64 * 0.5).collect();
    let expected: f64 = values.iter().sum();
    let a = Matrix::from_dense_values::<f64>(nrows, ncols, Orientation::ByRow, &values).unwrap();
    let plus = builtin_monoid(Opcode::Plus, DataType::FP64).unwrap();
    let got = reduce::<f64>(&ctx, &a, &plus).unwrap();
    assert!((got - expected).abs() < 1e-9, "{got} != {expected}");

    // bitmap goes through the generic fold
    let mut s = a.clone();
    ensure_format(&ctx, &mut s, Format::Bitmap).unwrap();
    let got = reduce::<f64>(&ctx, &s, &plus).unwrap();
    assert!((got - expected).abs() < 1e-9);
}

#[test]
fn reduce_stops_at_the_terminal_value() {
    let ctx = ctx();
    let mut values: Vec<i32> = (0..30_000).map(|k| k % 1000).collect();
    values[17_123] = i32::MIN;
    let a = Matrix::from_dense_values::<i32>(300, 100, Orientation::ByCol, &values).unwrap();
    let min = builtin_monoid(Opcode::Min, DataType::INT32).unwrap();
    assert_eq!(reduce::<i32>(&ctx, &a, &min).unwrap(), i32::MIN);
}

#[test]
fn reduce_iso_by_doubling() {
    let ctx = ctx();
    let a = Matrix::full_iso(3, 5, Orientation::ByRow, 2i64).unwrap();
    let plus = builtin_monoid(Opcode::Plus, DataType::INT64).unwrap();
    assert_eq!(reduce::<i64>(&ctx, &a, &plus).unwrap(), 30);
    let times = builtin_monoid(Opcode::Times, DataType::INT64).unwrap();
    assert_eq!(reduce::<i64>(&ctx, &a, &times).unwrap(), 1 << 15);
}

#[test]
fn reduce_skips_zombies_and_sees_pending_tuples() {
    let ctx = ctx();
    let mut a = build_from::<i64>(&ctx, 3, 3, &[0, 1, 2], &[0, 1, 2], &[100, 20, 3], None).unwrap();
    let plus = builtin_monoid(Opcode::Plus, DataType::INT64).unwrap();

    let p = a.locate(0, 0).unwrap().unwrap().0;
    assert!(mark_zombie(&mut a, p));
    assert_eq!(reduce::<i64>(&ctx, &a, &plus).unwrap(), 23);

    append_pending(&mut a, 2, 0, &4000i64.to_bytes()).unwrap();
    assert_eq!(reduce::<i64>(&ctx, &a, &plus).unwrap(), 4023);
    // the scratch reconcile leaves the input as it was
    assert_eq!(a.pending_count(), 1);
    assert_eq!(a.zombie_count(), 1);
}

#[test]
fn reduce_any_empty_and_cast() {
    let ctx = ctx();
    let a = build_from::<i32>(&ctx, 2, 2, &[0, 1], &[1, 0], &[6, 9], None).unwrap();

    let any = builtin_monoid(Opcode::Any, DataType::INT32).unwrap();
    let got = reduce::<i32>(&ctx, &a, &any).unwrap();
    assert!(got == 6 || got == 9);

    let empty = Matrix::new(DataType::INT32, 4, 4);
    let min = builtin_monoid(Opcode::Min, DataType::INT32).unwrap();
    assert_eq!(reduce::<i32>(&ctx, &empty, &min).unwrap(), i32::MAX);

    // int32 values folded as fp64
    let fplus = builtin_monoid(Opcode::Plus, DataType::FP64).unwrap();
    assert_eq!(reduce::<f64>(&ctx, &a, &fplus).unwrap(), 15.0);

    let err = reduce::<f32>(&ctx, &a, &fplus).unwrap_err();
    assert!(matches!(err, Error::DomainMismatch { .. }));
}

// ------------------------------------------------------------- convert

#[test]
fn ensure_format_round_trips_every_layout() {
    let ctx = ctx();
    let a = build_from::<u32>(&ctx, 5, 4, &[0, 0, 2, 4, 4], &[0, 3, 1, 2, 3], &[1, 2, 3, 4, 5], None).unwrap();
    let expected = dense_cells::<u32>(&a);
    let mut m = a.clone();
    for target in [Format::Hypersparse, Format::Bitmap, Format::Sparse, Format::Bitmap, Format::Hypersparse] {
        assert_eq!(ensure_format(&ctx, &mut m, target).unwrap(), target);
        assert_eq!(m.format(), target);
        assert_eq!(dense_cells::<u32>(&m), expected);
    }
    assert_eq!(extract::<u32>(&ctx, &m).unwrap(), extract::<u32>(&ctx, &a).unwrap());
}

#[test]
fn full_is_only_reached_when_every_cell_is_present() {
    let ctx = ctx();
    let mut partial = build_from::<i8>(&ctx, 2, 2, &[0, 1], &[0, 1], &[1, 2], None).unwrap();
    assert_eq!(ensure_format(&ctx, &mut partial, Format::Full).unwrap(), Format::Bitmap);

    let mut complete = build_from::<i8>(&ctx, 2, 2, &[0, 0, 1, 1], &[0, 1, 0, 1], &[1, 2, 3, 4], None).unwrap();
    assert_eq!(ensure_format(&ctx, &mut complete, Format::Full).unwrap(), Format::Full);
    assert_eq!(complete.get::<i8>(1, 0).unwrap(), Some(3));

    assert_eq!(ensure_format(&ctx, &mut complete, Format::Sparse).unwrap(), Format::Sparse);
    assert_eq!(complete.entries_held(), 4);
}

#[test]
fn cast_values_changes_the_element_type() {
    let ctx = ctx();
    let mut a = build_from::<i32>(&ctx, 2, 3, &[0, 1], &[2, 0], &[-7, 5], None).unwrap();
    cast_values(&ctx, &mut a, DataType::FP32).unwrap();
    assert_eq!(a.ty, DataType::FP32);
    assert_eq!(a.get::<f32>(0, 2).unwrap(), Some(-7.0));
    assert_eq!(a.get::<f32>(1, 0).unwrap(), Some(5.0));

    let copy = convert_to(&ctx, &a, Format::Bitmap, DataType::BOOL).unwrap();
    assert_eq!(copy.format(), Format::Bitmap);
    assert_eq!(copy.get::<bool>(0, 2).unwrap(), Some(true));

    assert!(cast_values(&ctx, &mut a, DataType::user("blob", 4)).is_err());
    assert_eq!(a.ty, DataType::FP32);
}

#[test]
fn conform_switches_between_sparse_and_hypersparse() {
    let ctx = ctx();
    let mut lonely = build_from::<i64>(&ctx, 100, 4, &[3], &[1], &[1], None).unwrap();
    ensure_format(&ctx, &mut lonely, Format::Sparse).unwrap();
    conform(&ctx, &mut lonely).unwrap();
    assert_eq!(lonely.format(), Format::Hypersparse);

    let rows: Vec<usize> = (0..100).collect();
    let cols: Vec<usize> = (0..100).map(|r| r % 4).collect();
    let mut crowded = build_from::<i64>(&ctx, 100, 4, &rows, &cols, &vec![1; 100], None).unwrap();
    ensure_format(&ctx, &mut crowded, Format::Hypersparse).unwrap();
    conform(&ctx, &mut crowded).unwrap();
    assert_eq!(crowded.format(), Format::Sparse);
}

// ----------------------------------------------------------- transpose

#[test]
fn reorient_keeps_the_logical_matrix() {
    let ctx = ctx();
    let a = build_from::<i64>(&ctx, 4, 6, &[0, 1, 1, 3, 3], &[5, 0, 4, 2, 3], &[1, 2, 3, 4, 5], None).unwrap();
    let expected = dense_cells::<i64>(&a);
    for target in [Format::Sparse, Format::Hypersparse, Format::Bitmap] {
        let mut src = a.clone();
        ensure_format(&ctx, &mut src, target).unwrap();
        let t = reorient(&ctx, &src, Orientation::ByCol).unwrap();
        assert_eq!(t.orientation, Orientation::ByCol);
        assert_eq!(t.shape(), (4, 6));
        assert_eq!(dense_cells::<i64>(&t), expected);

        let back = reorient(&ctx, &t, Orientation::ByRow).unwrap();
        assert_eq!(dense_cells::<i64>(&back), expected);
    }
}

#[test]
fn reorient_of_a_huge_sparse_matrix_stays_hypersparse() {
    let ctx = ctx();
    let n = 1usize << 46;
    let a = build_from::<i64>(&ctx, 4, n, &[0, 3, 3], &[n - 1, 5, n - 1], &[1, 2, 3], None).unwrap();
    let t = reorient(&ctx, &a, Orientation::ByCol).unwrap();
    assert_eq!(t.format(), Format::Hypersparse);
    assert_eq!(t.nvec(), 2);
    assert_eq!(t.get::<i64>(3, 5).unwrap(), Some(2));
    assert_eq!(t.get::<i64>(0, n - 1).unwrap(), Some(1));
    assert_eq!(extract::<i64>(&ctx, &t).unwrap(), vec![(3, 5, 2), (0, n - 1, 1), (3, n - 1, 3)]);

    let back = reorient(&ctx, &t, Orientation::ByRow).unwrap();
    assert_eq!(extract::<i64>(&ctx, &back).unwrap(), extract::<i64>(&ctx, &a).unwrap());
}

#[test]
fn reorient_dense_and_iso() {
    let ctx = ctx();
    let a = Matrix::from_dense_values::<i16>(2, 3, Orientation::ByRow, &[1, 2, 3, 4, 5, 6]).unwrap();
    let t = reorient(&ctx, &a, Orientation::ByCol).unwrap();
    assert_eq!(t.format(), Format::Full);
    assert_eq!(dense_cells::<i16>(&t), dense_cells::<i16>(&a));

    let iso = Matrix::full_iso(3, 2, Orientation::ByCol, 0.5f32).unwrap();
    let t = reorient(&ctx, &iso, Orientation::ByRow).unwrap();
    assert!(t.iso);
    assert_eq!(t.get::<f32>(2, 1).unwrap(), Some(0.5));
}

#[test]
fn aligned_borrows_when_nothing_to_do() {
    let ctx = ctx();
    let a = build_from::<i64>(&ctx, 3, 3, &[1], &[2], &[8], None).unwrap();
    assert!(matches!(aligned(&ctx, &a, a.orientation).unwrap(), std::borrow::Cow::Borrowed(_)));
    assert!(matches!(aligned(&ctx, &a, a.orientation.flip()).unwrap(), std::borrow::Cow::Owned(_)));
}

// --------------------------------------------------------------- build

#[test]
fn build_combines_duplicates() {
    let ctx = ctx();
    let rows = [1, 0, 1, 1];
    let cols = [2, 0, 2, 2];
    let vals = [1i64, 5, 2, 4];
    let last = build_from::<i64>(&ctx, 2, 3, &rows, &cols, &vals, None).unwrap();
    assert_eq!(last.get::<i64>(1, 2).unwrap(), Some(4));
    assert_eq!(last.nvals_finalized().unwrap(), 2);

    let plus = BinaryOp::plus(DataType::INT64);
    let summed = build_from::<i64>(&ctx, 2, 3, &rows, &cols, &vals, Some(&plus)).unwrap();
    assert_eq!(summed.get::<i64>(1, 2).unwrap(), Some(7));
    assert_eq!(summed.get::<i64>(0, 0).unwrap(), Some(5));
}

#[test]
fn build_rejects_bad_input() {
    let ctx = ctx();
    let err = build_from::<i64>(&ctx, 2, 2, &[0, 1], &[0], &[1, 2], None).unwrap_err();
    assert!(matches!(err, Error::InvalidObject(_)));

    let err = build_from::<i64>(&ctx, 3, 3, &[0, 5], &[0, 1], &[1, 2], None).unwrap_err();
    assert_eq!(err, Error::IndexOutOfBounds { index: 5, bound: 3 });

    let err = build_from::<i64>(&ctx, 3, 3, &[0], &[3], &[1], None).unwrap_err();
    assert_eq!(err, Error::IndexOutOfBounds { index: 3, bound: 3 });

    let wrong = BinaryOp::plus(DataType::INT32);
    let err = build_from::<i64>(&ctx, 3, 3, &[0], &[0], &[1], Some(&wrong)).unwrap_err();
    assert!(matches!(err, Error::DomainMismatch { .. }));
}

#[test]
fn extract_follows_vector_order() {
    let by_col = Context::new(Config::default().with_default_orientation(Orientation::ByCol)).unwrap();
    let a = build_from::<u8>(&by_col, 3, 3, &[2, 0, 1], &[0, 2, 0], &[1, 2, 3], None).unwrap();
    assert_eq!(a.orientation, Orientation::ByCol);
    assert_eq!(extract::<u8>(&by_col, &a).unwrap(), vec![(1, 0, 3), (2, 0, 1), (0, 2, 2)]);

    let t = extract_tuples(&by_col, &a).unwrap();
    assert_eq!(t.len(), 3);
    assert_eq!(t.x, vec![3, 1, 2]);

    let err = extract::<i8>(&by_col, &a).unwrap_err();
    assert!(matches!(err, Error::DomainMismatch { .. }));
}

#[test]
fn context_sizes_work_by_chunk() {
    let ctx = Context::new(Config::default().with_max_threads(3).with_chunk(10)).unwrap();
    assert_eq!(ctx.max_threads(), 3);
    assert_eq!(ctx.nthreads_for(0), 1);
    assert_eq!(ctx.nthreads_for(15), 2);
    assert_eq!(ctx.nthreads_for(1_000), 3);
    assert_eq!(Context::serial().unwrap().max_threads(), 1);
}
