#![no_main]

use fwsign_core::factory;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Dispatch on magic; any blob must parse or fail cleanly
    if let Ok(artifact) = factory::parse(data) {
        let _ = artifact.validate();

        // Dumping never panics for a parsed artifact
        let _ = factory::render(&artifact, 8);

        if let Ok(bytes) = artifact.to_bytes() {
            let again = factory::parse(&bytes).unwrap();
            assert_eq!(again.kind_name(), artifact.kind_name());
            assert_eq!(again.to_bytes().unwrap(), bytes);
        }
    }

    let _ = factory::objdump_raw(data);
});
