use gaxplay_core::{
    AddressMode, decode, encode,
    fixtures::demo_module,
    persistence::{load_module, save_module},
};
use proptest::prelude::*;

fn no_panic_decode(bytes: &[u8], mode: &AddressMode) -> bool {
    std::panic::catch_unwind(|| {
        let _ = decode(bytes, 0, mode);
    })
    .is_ok()
}

fn no_panic_load(path: &std::path::Path) -> bool {
    std::panic::catch_unwind(|| {
        let _ = load_module(path, &AddressMode::Packaged);
    })
    .is_ok()
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        .. ProptestConfig::default()
    })]

    #[test]
    fn random_module_bytes_do_not_panic(raw in prop::collection::vec(any::<u8>(), 0..4096)) {
        prop_assert!(no_panic_decode(&raw, &AddressMode::Packaged));
    }

    #[test]
    fn random_cartridge_offsets_do_not_panic(
        raw in prop::collection::vec(any::<u8>(), 0..4096),
        offsets in prop::collection::vec(0usize..4096, 1..4),
    ) {
        let mode = AddressMode::Cartridge { song_offsets: offsets };
        prop_assert!(no_panic_decode(&raw, &mode));
    }
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        .. ProptestConfig::default()
    })]

    #[test]
    fn truncated_module_files_do_not_panic(prefix_len in 0usize..8192usize) {
        let temp = tempfile::tempdir().expect("tempdir should be creatable");
        let path = temp.path().join("truncated.gax");
        save_module(&path, &demo_module()).expect("saving fixture module should work");

        let mut payload = std::fs::read(&path).expect("reading saved module should work");
        let truncated_len = prefix_len.min(payload.len());
        payload.truncate(truncated_len);
        std::fs::write(&path, payload).expect("writing truncated payload should work");

        prop_assert!(no_panic_load(&path));
    }
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        .. ProptestConfig::default()
    })]

    #[test]
    fn mutated_module_bytes_do_not_panic(index in 0usize..8192usize, delta in any::<u8>()) {
        let mut payload = encode(&demo_module(), 0).expect("fixture module should encode");
        let target = index % payload.len();
        payload[target] ^= delta.max(1);

        prop_assert!(no_panic_decode(&payload, &AddressMode::Packaged));
    }
}
