//! Property-based testing for the DNS message parser using proptest

use proptest::prelude::*;

use argos::sensor::buffer::VectorPacketBuffer;
use argos::sensor::protocol::{parse_message, DnsHeader, DnsQuestion, QueryType};

// Strategy for generating valid domain names
fn domain_name_strategy() -> impl Strategy<Value = String> {
    prop::collection::vec("[a-z][a-z0-9-]{0,20}", 1..5).prop_map(|parts| parts.join("."))
}

proptest! {
    /// The parser must reject arbitrary bytes with an error, never a panic.
    #[test]
    fn arbitrary_bytes_never_panic(data in prop::collection::vec(any::<u8>(), 0..600)) {
        let _ = parse_message(&data);
    }

    /// A syntactically valid question survives a write/parse cycle with the
    /// QR bit and the question intact.
    #[test]
    fn question_roundtrip(
        qname in domain_name_strategy(),
        id in any::<u16>(),
        response in any::<bool>(),
        qtype_num in 1u16..60,
    ) {
        let mut buffer = VectorPacketBuffer::new();
        let mut header = DnsHeader::new();
        header.id = id;
        header.response = response;
        header.questions = 1;
        header.write(&mut buffer).unwrap();
        DnsQuestion::new(qname.clone(), QueryType::from_num(qtype_num))
            .write(&mut buffer)
            .unwrap();

        let packet = parse_message(&buffer.buffer).unwrap();
        prop_assert_eq!(response, packet.is_response());
        prop_assert_eq!(id, packet.header.id);
        prop_assert_eq!(1, packet.questions.len());
        prop_assert_eq!(&qname, &packet.questions[0].name);
        prop_assert_eq!(qtype_num, packet.questions[0].qtype.to_num());
    }

    /// Truncating a valid message anywhere must produce an error, not a
    /// partial message.
    #[test]
    fn truncation_rejected(qname in domain_name_strategy(), cut in 0usize..20) {
        let mut buffer = VectorPacketBuffer::new();
        let mut header = DnsHeader::new();
        header.questions = 1;
        header.write(&mut buffer).unwrap();
        DnsQuestion::new(qname, QueryType::A).write(&mut buffer).unwrap();

        let len = buffer.buffer.len();
        if cut < len {
            let truncated = &buffer.buffer[..len - cut - 1];
            prop_assert!(parse_message(truncated).is_err());
        }
    }
}
