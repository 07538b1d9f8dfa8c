//! CONTEXT: Tests for MsgHeader bit packing and frame codec
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable
//! TEST_COVERAGE: 3 tests (1 golden vector, 2 property tests)
//!
//! TEST_SCENARIOS:
//!   - golden_word(): fixed header word from the mailbox register layout
//!   - fields_survive_packing(): every in-range field combination round-trips
//!   - arbitrary_frames_never_panic(): decode is total over arbitrary bytes

use proptest::prelude::*;
use sdrv_abi::{decode_frame, encode_frame, proto, MsgHeader, Rproc, MAX_PAYLOAD};

#[test]
fn golden_word() {
    let hdr = MsgHeader::new(proto::RPCALL, Rproc::Saf.id(), false, 0x10, 36, 3).unwrap();
    assert_eq!(hdr.to_bits(), 0x3024_1005);
    assert_eq!(MsgHeader::from_le_bytes([0x05, 0x10, 0x24, 0x30]), hdr);
}

proptest! {
    #[test]
    fn fields_survive_packing(
        protocol in 0u8..16,
        rproc in 0u8..8,
        priority in any::<bool>(),
        addr in any::<u8>(),
        len in 0u16..=(MAX_PAYLOAD as u16),
        osid in 0u8..16,
    ) {
        let hdr = MsgHeader::new(protocol, rproc, priority, addr, len, osid).unwrap();
        let back = MsgHeader::from_bits(hdr.to_bits());
        prop_assert_eq!(back.protocol(), protocol);
        prop_assert_eq!(back.rproc(), rproc);
        prop_assert_eq!(back.priority(), priority);
        prop_assert_eq!(back.addr(), addr);
        prop_assert_eq!(back.len(), len as usize);
        prop_assert_eq!(back.osid(), osid);
    }

    #[test]
    fn arbitrary_frames_never_panic(bytes in proptest::collection::vec(any::<u8>(), 0..64)) {
        if let Ok((hdr, payload)) = decode_frame(&bytes) {
            prop_assert_eq!(hdr.len(), payload.len());
            prop_assert_eq!(encode_frame(&hdr, payload).unwrap(), bytes);
        }
    }
}
