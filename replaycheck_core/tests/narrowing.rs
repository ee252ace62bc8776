//! Window narrowing laws.

use proptest::prelude::*;
use replaycheck_core::Window;

fn arb_window() -> impl Strategy<Value = Window> {
    (0u64..1_000_000, 1u64..2_000_000_000)
        .prop_flat_map(|(start, span)| (Just(start), Just(span), 1u64..=span))
        .prop_map(|(start, span, step)| Window::new(start, start + span, step).unwrap())
}

proptest! {
    /// Narrowing around any sampled position strictly shrinks the span,
    /// never widens the stride, and keeps a valid window.
    #[test]
    fn narrowing_is_monotone(window in arb_window(), pick in any::<prop::sample::Index>()) {
        prop_assume!(!window.is_finest());
        let samples = usize::try_from(window.sample_count()).unwrap();
        let position = window.position_of(pick.index(samples));

        let narrowed = window.narrow(position);
        prop_assert!(narrowed.span() < window.span());
        prop_assert!(narrowed.step() <= window.step());
        prop_assert!(narrowed.start() <= narrowed.end());
        prop_assert!(narrowed.step() >= 1);
        prop_assert_eq!(narrowed.end(), position);
        prop_assert!(Window::new(narrowed.start(), narrowed.end(), narrowed.step()).is_ok());
    }

    /// Repeated narrowing reaches single-step resolution in a handful of passes.
    #[test]
    fn narrowing_terminates(window in arb_window(), pick in any::<prop::sample::Index>()) {
        let mut current = window;
        let mut narrowings = 0;
        while !current.is_finest() {
            let samples = usize::try_from(current.sample_count()).unwrap();
            current = current.narrow(current.position_of(pick.index(samples)));
            narrowings += 1;
            prop_assert!(
                narrowings <= 8,
                "no convergence from {} after {} narrowings",
                window,
                narrowings
            );
        }
    }
}

#[test]
fn test_documented_narrowing_sequence() {
    let window = Window::default();
    let narrowed = window.narrow(500_000);
    assert_eq!(narrowed, Window::new(300_000, 500_000, 200).unwrap());

    let finer = narrowed.narrow(412_600);
    assert_eq!(finer, Window::exact(412_200, 412_600).unwrap());
    assert!(finer.is_finest());
}
