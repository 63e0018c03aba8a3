#![no_main]
use libfuzzer_sys::fuzz_target;
use rompatch_rs::NarcArchive;

// Malformed archives must fail with an error, never panic. Anything that
// decodes must survive an encode/decode round trip unchanged.
fuzz_target!(|data: &[u8]| {
    let Ok(narc) = NarcArchive::from_bytes(data) else {
        return;
    };

    let decoded = NarcArchive::from_bytes(&narc.to_bytes()).expect("re-encoded archive decodes");
    assert_eq!(decoded, narc);
});
