use amari_maxent::{ConstraintMatrix, MarginalCells, ParameterSpace};
use std::collections::HashSet;

macro_rules! check_shape {
    ($($name:ident: $n:expr, $m:expr;)*) => {
        $(
        #[test]
        fn $name() {
            check($n, $m);
        }
        )*
    }
}

check_shape! {
    shape_n1_m2: 1, 2;
    shape_n1_m5: 1, 5;
    shape_n2_m2: 2, 2;
    shape_n2_m3: 2, 3;
    shape_n3_m2: 3, 2;
    shape_n3_m3: 3, 3;
    shape_n4_m2: 4, 2;
    shape_n4_m3: 4, 3;
    shape_n5_m2: 5, 2;
    shape_n3_m4: 3, 4;
}

fn check(n: usize, m: usize) {
    let space = ParameterSpace::complete(n, m).unwrap();
    let a = ConstraintMatrix::build(&space);

    // The orders of a complete matrix partition the non-baseline states.
    assert_eq!(a.rows(), space.dim());
    assert_eq!(a.cols(), space.dim());

    let order_idx = space.order_idx();
    assert_eq!(order_idx.len(), n + 2);
    assert_eq!(order_idx[0], 0);
    assert_eq!(order_idx[n + 1], space.dim() + 1);
    for (k, window) in order_idx.windows(2).take(n).enumerate() {
        assert_eq!(window[1] - window[0], space.order_length()[k]);
    }

    // Every row of order o covers m^(n-o) states, minus the baseline if it could be in there,
    // which it can't because every cell fixes a nonzero symbol.
    for (r, cell) in MarginalCells::new(&space).enumerate() {
        let covered = m.pow((n - cell.order()) as u32);
        assert_eq!(a.row(r).len(), covered);
        assert!(a.row(r).windows(2).all(|w| w[0] < w[1]));
        assert_eq!(a.row(r), cell.columns(&space).as_slice());
    }

    let distinct: HashSet<&[usize]> = (0..a.rows()).map(|r| a.row(r)).collect();
    assert_eq!(distinct.len(), a.rows());

    for k in 1..=n {
        let view = a.view(k).unwrap();
        assert_eq!(view.rows(), order_idx[k]);
        let partial = ConstraintMatrix::build(&space.with_order(k).unwrap());
        assert_eq!(partial.rows(), view.rows());
        for r in 0..view.rows() {
            assert_eq!(partial.row(r), view.row(r));
        }
    }
}

#[test]
fn lower_orders_are_row_prefixes() {
    let space = ParameterSpace::new(4, 3, 2).unwrap();
    let a = ConstraintMatrix::build(&space);
    assert_eq!(a.order(), 2);
    assert!(!a.is_complete());
    assert_eq!(a.rows(), 4 * 2 + 6 * 4);
    assert!(a.view(3).is_err());
}
