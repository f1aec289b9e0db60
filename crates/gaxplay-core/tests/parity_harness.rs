use gaxplay_core::{
    AddressMode, decode, encode,
    fixtures::demo_module,
    generate_parity_report,
    parity::{read_parity_report, write_parity_report},
};

#[test]
fn parity_report_is_deterministic() {
    let first = generate_parity_report(&demo_module()).expect("parity generation should work");
    let second = generate_parity_report(&demo_module()).expect("parity generation should work");
    assert_eq!(first, second);

    assert_eq!(first.song_count, 2);
    assert_eq!(first.instrument_count, 4);
    assert_eq!(first.waveform_count, 3);
    assert_eq!(first.step_count, 48);
    assert_eq!(first.module_hash.len(), 64);
}

#[test]
fn parity_report_survives_a_codec_round_trip() {
    let module = demo_module();
    let bytes = encode(&module, 0).expect("demo module should encode");
    let decoded = decode(&bytes, 0, &AddressMode::Packaged).expect("demo module should decode");

    assert_eq!(
        generate_parity_report(&decoded).expect("parity generation should work"),
        generate_parity_report(&module).expect("parity generation should work"),
    );
}

#[test]
fn audio_fingerprint_tracks_the_music() {
    let baseline = generate_parity_report(&demo_module()).expect("parity generation should work");

    let mut louder = demo_module();
    louder.songs[0].data.properties.master_volume = 512;
    let changed = generate_parity_report(&louder).expect("parity generation should work");

    assert_ne!(changed.audio_hash, baseline.audio_hash);
    assert_ne!(changed.module_hash, baseline.module_hash);
}

#[test]
fn parity_report_round_trips_through_json() {
    let temp = tempfile::tempdir().expect("tempdir should be creatable");
    let path = temp.path().join("parity/report.json");
    let report = generate_parity_report(&demo_module()).expect("parity generation should work");

    write_parity_report(&path, &report).expect("report write should succeed");
    let loaded = read_parity_report(&path).expect("report should parse");
    assert_eq!(loaded, report);
}
