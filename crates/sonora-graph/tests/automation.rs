use proptest::prelude::*;
use sonora_graph::{Automator, Property, PropertyValue};

#[test]
fn set_then_ramp() {
    let mut property = Property::float(0.0);
    property.schedule(Automator::set(0.0, 5.0), 0.0).unwrap();
    property.schedule(Automator::linear_ramp(2.0, 10.0), 0.0).unwrap();
    assert_eq!(property.value_at(0.0), 5.0);
    assert_eq!(property.value_at(1.0), 7.5);
    assert_eq!(property.value_at(2.0), 10.0);
    assert_eq!(property.value_at(3.0), 10.0);
}

#[test]
fn envelope_over_two_seconds() {
    let mut property = Property::double(0.0);
    property
        .schedule(Automator::envelope(0.0, 2.0, vec![0.0, 1.0, 0.0]).unwrap(), 0.0)
        .unwrap();
    assert_eq!(property.value_at(0.5), 0.5);
    assert_eq!(property.value_at(1.0), 1.0);
    assert_eq!(property.value_at(1.5), 0.5);
}

#[test]
fn ramp_at_current_time_continues_from_value_in_effect() {
    let mut property = Property::float(3.0);
    property.schedule(Automator::linear_ramp(1.5, 9.0), 1.5).unwrap();
    assert_eq!(property.value_at(1.5), 3.0);
    assert_eq!(property.value_at(2.0), 9.0);
}

#[test]
fn ramp_continues_from_an_earlier_envelope() {
    let mut property = Property::float(0.0);
    property
        .schedule(Automator::envelope(0.0, 1.0, vec![0.0, 4.0]).unwrap(), 0.0)
        .unwrap();
    property.schedule(Automator::linear_ramp(3.0, 0.0), 0.0).unwrap();
    assert_eq!(property.value_at(1.0), 4.0);
    assert_eq!(property.value_at(2.0), 2.0);
}

#[test]
fn cancel_holds_the_value_in_effect() {
    let mut property = Property::float(0.0);
    property.schedule(Automator::set(0.0, 5.0), 0.0).unwrap();
    property.schedule(Automator::linear_ramp(2.0, 10.0), 0.0).unwrap();
    property.cancel_automators(1.0, 0.0).unwrap();
    for t in [1.0, 1.5, 2.0, 10.0] {
        assert_eq!(property.value_at(t), 7.5);
    }
}

#[test]
fn cancel_leaves_a_ramp_in_progress_untouched_before_the_cut() {
    let mut property = Property::float(0.0);
    property.schedule(Automator::set(0.0, 5.0), 0.0).unwrap();
    property.schedule(Automator::linear_ramp(2.0, 10.0), 0.0).unwrap();
    let before = [0.5, 0.99, 1.0].map(|t| property.value_at(t));
    property.cancel_automators(1.0, 0.0).unwrap();
    assert_eq!([0.5, 0.99, 1.0].map(|t| property.value_at(t)), before);
    assert_eq!(property.value_at(0.5), 6.25);
    assert_eq!(property.value_at(1.5), 7.5);
}

#[test]
fn last_of_simultaneous_automators_wins() {
    let mut property = Property::float(0.0);
    property.schedule(Automator::set(1.0, 3.0), 0.0).unwrap();
    property.schedule(Automator::set(1.0, 7.0), 0.0).unwrap();
    assert_eq!(property.value_at(0.5), 0.0);
    assert_eq!(property.value_at(1.0), 7.0);
    assert_eq!(property.value_at(1.5), 7.0);
}

#[test]
fn set_after_cancel_at_the_same_time_takes_over() {
    let mut property = Property::float(0.0);
    property.schedule(Automator::linear_ramp(2.0, 10.0), 0.0).unwrap();
    property.cancel_automators(1.0, 0.0).unwrap();
    property.schedule(Automator::set(1.0, 2.0), 0.0).unwrap();
    assert_eq!(property.value_at(0.5), 2.5);
    assert_eq!(property.value_at(1.0), 2.0);
    assert_eq!(property.value_at(3.0), 2.0);
}

#[test]
fn cancel_truncates_a_running_envelope() {
    let mut property = Property::float(0.0);
    property
        .schedule(Automator::envelope(0.0, 2.0, vec![0.0, 1.0, 0.0]).unwrap(), 0.0)
        .unwrap();
    property.cancel_automators(0.5, 0.0).unwrap();
    assert_eq!(property.value_at(0.25), 0.25);
    assert_eq!(property.value_at(0.5), 0.5);
    assert_eq!(property.value_at(1.0), 0.5);
}

#[test]
fn cancel_without_automation_keeps_the_plain_value() {
    let mut property = Property::float(2.0);
    property.cancel_automators(0.0, 0.0).unwrap();
    assert_eq!(property.automator_count(), 0);
    assert_eq!(property.value(), &PropertyValue::Float(2.0));
}

#[derive(Debug, Clone)]
enum Step {
    Set(f64, f64),
    Ramp(f64, f64),
    Envelope(f64, f64, Vec<f64>),
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        (0.0..10.0f64, -5.0..5.0f64).prop_map(|(t, v)| Step::Set(t, v)),
        (0.0..10.0f64, -5.0..5.0f64).prop_map(|(t, v)| Step::Ramp(t, v)),
        (
            0.0..10.0f64,
            0.1..3.0f64,
            proptest::collection::vec(-5.0..5.0f64, 1..5)
        )
            .prop_map(|(t, d, points)| Step::Envelope(t, d, points)),
    ]
}

fn schedule(property: &mut Property, steps: &[Step]) {
    for step in steps {
        let automator = match step {
            Step::Set(t, v) => Automator::set(*t, *v),
            Step::Ramp(t, v) => Automator::linear_ramp(*t, *v),
            Step::Envelope(t, d, points) => Automator::envelope(*t, *d, points.clone()).unwrap(),
        };
        // Overlaps are rejected; the rest of the queue is unaffected.
        let _ = property.schedule(automator, 0.0);
    }
}

proptest! {
    #[test]
    fn evaluation_is_idempotent(
        steps in proptest::collection::vec(step(), 0..8),
        t in 0.0..15.0f64,
    ) {
        let mut property = Property::double(0.0);
        schedule(&mut property, &steps);
        prop_assert_eq!(property.value_at(t), property.value_at(t));
    }

    #[test]
    fn cancellation_freezes_later_values(
        steps in proptest::collection::vec(step(), 0..8),
        at in 0.0..12.0f64,
        later in proptest::collection::vec(0.0..5.0f64, 1..6),
    ) {
        let mut property = Property::double(0.0);
        schedule(&mut property, &steps);
        let held = property.value_at(at);
        property.cancel_automators(at, 0.0).unwrap();
        for offset in later {
            prop_assert_eq!(property.value_at(at + offset), held);
        }
    }

    #[test]
    fn cancellation_keeps_earlier_values(
        steps in proptest::collection::vec(step(), 0..8),
        at in 0.0..12.0f64,
        fractions in proptest::collection::vec(0.0..1.0f64, 1..6),
    ) {
        let mut property = Property::double(0.0);
        schedule(&mut property, &steps);
        let times = fractions.iter().map(|f| f * at).collect::<Vec<_>>();
        let before = times.iter().map(|t| property.value_at(*t)).collect::<Vec<_>>();
        property.cancel_automators(at, 0.0).unwrap();
        for (t, expected) in times.iter().zip(before) {
            prop_assert!((property.value_at(*t) - expected).abs() < 1e-9);
        }
    }
}
