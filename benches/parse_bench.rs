use criterion::{black_box, criterion_group, criterion_main, Criterion};

use argos::sensor::buffer::{PacketBuffer, VectorPacketBuffer};
use argos::sensor::decode::{decode, LinkLayer};
use argos::sensor::protocol::{parse_message, DnsHeader, DnsQuestion, QueryType};
use etherparse::PacketBuilder;

fn answer_message() -> Vec<u8> {
    let mut buffer = VectorPacketBuffer::new();
    let mut header = DnsHeader::new();
    header.id = 0xbeef;
    header.response = true;
    header.questions = 1;
    header.answers = 2;
    header.write(&mut buffer).unwrap();
    DnsQuestion::new("www.example.com".to_string(), QueryType::A)
        .write(&mut buffer)
        .unwrap();
    for host in [0x5db8d822u32, 0x5db8d823u32] {
        buffer.write_qname("www.example.com").unwrap();
        buffer.write_u16(1).unwrap();
        buffer.write_u16(1).unwrap();
        buffer.write_u32(300).unwrap();
        buffer.write_u16(4).unwrap();
        buffer.write_u32(host).unwrap();
    }
    buffer.buffer
}

fn bench_parse(c: &mut Criterion) {
    let message = answer_message();
    c.bench_function("parse_answer_message", |b| {
        b.iter(|| parse_message(black_box(&message)).unwrap())
    });
}

fn bench_decode(c: &mut Criterion) {
    let message = answer_message();
    let builder = PacketBuilder::ethernet2([2, 0, 0, 0, 0, 1], [2, 0, 0, 0, 0, 2])
        .ipv4([10, 0, 0, 1], [10, 0, 0, 5], 64)
        .udp(53, 54321);
    let mut frame = Vec::new();
    builder.write(&mut frame, &message).unwrap();

    c.bench_function("decode_udp_frame", |b| {
        b.iter(|| decode(LinkLayer::Ethernet, black_box(&frame)).unwrap())
    });
}

criterion_group!(benches, bench_parse, bench_decode);
criterion_main!(benches);
