#![no_main]

use fwsign_core::{Layout, SignatureChain, TrustPolicy};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(chain) = SignatureChain::from_bytes(data) {
        // Verification may fail but must not panic
        let _ = chain.verify(&TrustPolicy::default(), Some(&[0u8; 48]));
        let _ = chain.verify(&TrustPolicy::default(), None);

        let bytes = chain.to_bytes().unwrap();
        assert_eq!(bytes.as_slice(), data);
        assert_eq!(SignatureChain::from_bytes(&bytes).unwrap().len(), chain.len());
    }
});
