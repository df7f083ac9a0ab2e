use printcore_core::{Axis, AxisFlags, Position};
use proptest::prelude::*;

fn coord() -> impl Strategy<Value = f64> {
    -1000.0f64..1000.0
}

proptest! {
    #[test]
    fn lerp_hits_both_ends(x in coord(), y in coord(), z in coord(), x2 in coord(), y2 in coord(), z2 in coord()) {
        let a = Position::new(x, y, z, 0.0);
        let b = Position::new(x2, y2, z2, 5.0);
        prop_assert_eq!(a.lerp(&b, 0.0), a);
        let end = a.lerp(&b, 1.0);
        prop_assert!(end.distance_xyz(&b) < 1e-9);
        prop_assert!((end.e - 5.0).abs() < 1e-12);
    }

    #[test]
    fn distance_is_symmetric(x in coord(), y in coord(), z in coord(), x2 in coord(), y2 in coord(), z2 in coord()) {
        let a = Position::new(x, y, z, 1.0);
        let b = Position::new(x2, y2, z2, -1.0);
        prop_assert!((a.distance_xyz(&b) - b.distance_xyz(&a)).abs() < 1e-9);
        prop_assert!(a.distance_xyz(&a) == 0.0);
    }

    #[test]
    fn axis_indexing_matches_array(values in proptest::array::uniform4(coord())) {
        let p = Position::from_array(values);
        for axis in Axis::ALL {
            prop_assert_eq!(p[axis], values[axis.index()]);
        }
        prop_assert_eq!(p.to_array(), values);
    }

    #[test]
    fn missing_axes_name_the_unset_ones(x: bool, y: bool, z: bool) {
        let mut flags = AxisFlags::default();
        flags.set(Axis::X, x);
        flags.set(Axis::Y, y);
        flags.set(Axis::Z, z);
        let missing = flags.missing_xyz();
        prop_assert_eq!(missing.contains('X'), !x);
        prop_assert_eq!(missing.contains('Y'), !y);
        prop_assert_eq!(missing.contains('Z'), !z);
        prop_assert_eq!(flags.all_xyz(), x && y && z);
    }
}

#[test]
fn test_axis_letters_round_trip() {
    for axis in Axis::ALL {
        assert_eq!(Axis::from_letter(axis.letter()), Some(axis));
        assert_eq!(Axis::from_letter(axis.letter().to_ascii_lowercase()), Some(axis));
    }
    assert_eq!(Axis::from_letter('Q'), None);
}
