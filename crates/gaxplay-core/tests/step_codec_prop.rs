use gaxplay_core::{
    Note, Step, StepEffect,
    codec::{decode_steps, encode_steps},
};
use proptest::prelude::*;

fn note() -> impl Strategy<Value = Option<Note>> {
    prop_oneof![
        Just(None),
        Just(Some(Note::Off)),
        (2_u8..0x80).prop_map(|semitone| Some(Note::On(semitone))),
    ]
}

fn effect() -> impl Strategy<Value = Option<StepEffect>> {
    prop_oneof![
        Just(None),
        (any::<u8>(), any::<u8>())
            .prop_filter("code 0 with param 0 is the empty column", |(code, param)| {
                *code != 0 || *param != 0
            })
            .prop_map(|(code, param)| StepEffect::from_bytes(code, param)),
    ]
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        3 => Just(Step::default()),
        2 => (note(), prop::option::of(1_u8..=255), effect()).prop_map(
            |(note, instrument, effect)| Step {
                note,
                instrument,
                effect,
            }
        ),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        .. ProptestConfig::default()
    })]

    #[test]
    fn every_step_form_survives_the_rle_stream(steps in prop::collection::vec(step(), 1..600)) {
        let bytes = encode_steps(&steps).expect("valid steps should encode");
        let (decoded, used) = decode_steps(&bytes, steps.len()).expect("encoded steps should decode");
        prop_assert_eq!(used, bytes.len());
        prop_assert_eq!(decoded, steps);
    }

    #[test]
    fn decoding_arbitrary_bytes_never_panics(
        bytes in prop::collection::vec(any::<u8>(), 0..512),
        step_count in 0_usize..512,
    ) {
        if let Ok((steps, used)) = decode_steps(&bytes, step_count) {
            prop_assert_eq!(steps.len(), step_count);
            prop_assert!(used <= bytes.len());
        }
    }
}
