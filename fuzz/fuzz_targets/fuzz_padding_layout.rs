#![no_main]

use arbitrary::Arbitrary;
use fwsign_core::{Collection, Layout, Leaf, Padding};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct LayoutInput {
    leaf_sizes: Vec<u8>,
    slack: u16,
    fill: u8,
    cap: Option<u16>,
    write_at: u16,
    write: Vec<u8>,
}

fuzz_target!(|input: LayoutInput| {
    let used: usize = input.leaf_sizes.iter().map(|&s| s as usize).sum();
    let max = used + input.slack as usize;

    let mut padding = Padding::new().with_fill(input.fill);
    if let Some(cap) = input.cap {
        padding = padding.with_cap(cap as usize);
    }

    let mut collection = Collection::new("fuzz").with_max_size(max);
    for &size in &input.leaf_sizes {
        collection.push(Leaf::new("leaf", size as usize)).unwrap();
    }
    collection.push(padding).unwrap();

    // Padding either fills to the maximum or the layout is rejected
    if let Ok(size) = collection.size() {
        assert!(size <= max);
        let bytes = collection.to_bytes().unwrap();
        assert_eq!(bytes.len(), size);
        assert!(bytes[used..].iter().all(|&b| b == input.fill));

        // Writes into padding must match the fill
        let offset = input.write_at as usize;
        if collection.write_bytes(offset, &input.write).is_ok() && offset >= used {
            assert!(input.write.iter().all(|&b| b == input.fill));
        }
    }
});
