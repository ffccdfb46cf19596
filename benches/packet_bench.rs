use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use packet_gateway::balancer::LoadBalancer;
use packet_gateway::core::packet::parse_frame;
use packet_gateway::core::prefix::{UuidPrefix, SessionId};
use packet_gateway::core::serialization::{BodyFormat, FormatBody};
use packet_gateway::gateway::{Relay, TracingObserver};
use packet_gateway::utils::metrics::Metrics;
use packet_gateway::{PacketCodec, PacketFlags, PacketMessage, SessionHandle};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Payload {
    sequence: u64,
    data: Vec<u8>,
}

impl PacketMessage for Payload {
    const TYPE_NAME: &'static str = "bench.Payload";
}

#[allow(clippy::unwrap_used)]
fn bench_packet_encode_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("packet_encode_decode");
    let payload_sizes = [64usize, 512, 4096, 32_768];

    for format in [BodyFormat::Bincode, BodyFormat::MessagePack, BodyFormat::Json] {
        let codec = PacketCodec::new(FormatBody::new(format));
        codec.register::<Payload>().unwrap();

        for &size in &payload_sizes {
            // MessagePack and JSON inflate byte arrays; keep the body under the frame limit
            if format != BodyFormat::Bincode && size > 4096 {
                continue;
            }
            let message = Payload {
                sequence: 1,
                data: vec![0x5A; size],
            };
            let frame = codec.encode(&message, PacketFlags::empty()).unwrap();

            group.throughput(Throughput::Bytes(frame.len() as u64));
            group.bench_function(format!("encode_{}_{size}b", format.name()), |b| {
                b.iter_batched(
                    || message.clone(),
                    |message| codec.encode(&message, PacketFlags::empty()).unwrap(),
                    BatchSize::SmallInput,
                )
            });
            group.bench_function(format!("decode_{}_{size}b", format.name()), |b| {
                b.iter(|| {
                    let decoded = codec.decode::<Payload>(&frame);
                    assert!(decoded.is_ok());
                })
            });
        }
    }

    group.finish();
}

#[allow(clippy::unwrap_used)]
fn bench_relay_routing(c: &mut Criterion) {
    let mut group = c.benchmark_group("relay_routing");
    let codec = PacketCodec::default().with_prefix(Arc::new(UuidPrefix));
    codec.register::<Payload>().unwrap();
    let frame = codec
        .encode(
            &Payload {
                sequence: 7,
                data: vec![1; 1024],
            },
            PacketFlags::empty(),
        )
        .unwrap();

    group.bench_function("parse_header_and_prefix", |b| {
        b.iter(|| parse_frame(&frame, Some(&UuidPrefix)).unwrap())
    });

    let relay = Relay::new(
        Some(Arc::new(UuidPrefix)),
        Arc::new(Metrics::new()),
        Arc::new(TracingObserver),
    );
    let balancer = LoadBalancer::new();
    let mut receivers = Vec::new();
    for id in 1..=4u32 {
        let (handle, rx) = SessionHandle::channel(SessionId::from(id), 1 << 16);
        balancer.add(handle);
        receivers.push(rx);
    }

    group.bench_function("round_robin_forward", |b| {
        b.iter(|| {
            relay
                .relay_from_client(SessionId(99), &balancer, frame.clone())
                .unwrap();
            for rx in &mut receivers {
                while rx.try_recv().is_ok() {}
            }
        })
    });

    group.finish();
}

criterion_group!(benches, bench_packet_encode_decode, bench_relay_routing);
criterion_main!(benches);
