#![no_main]

use fwsign_core::{Layout, SignatureDescriptor, DESCRIPTOR_SIZE};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.len() < DESCRIPTOR_SIZE {
        let _ = SignatureDescriptor::from_bytes(data);
        return;
    }

    if let Ok(descriptor) = SignatureDescriptor::from_bytes(&data[..DESCRIPTOR_SIZE]) {
        // Parsing succeeds only for a self-consistent descriptor
        descriptor.validate().unwrap();
        assert_eq!(descriptor.stored_crc().unwrap(), descriptor.calculate_crc().unwrap());

        let chains = descriptor.chains().unwrap();
        assert_eq!(chains.len(), descriptor.chain_count().unwrap());

        assert_eq!(descriptor.to_bytes().unwrap(), &data[..DESCRIPTOR_SIZE]);
    }
});
