use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

use ts_rtp_output::constants::*;
use ts_rtp_output::network::{DatagramSink, RtpSender};
use ts_rtp_output::output::{MuxedData, TsFifo};
use ts_rtp_output::error::NetworkError;
use ts_rtp_output::protocol::RtpPacket;

struct NullSink;

impl DatagramSink for NullSink {
    fn send(&mut self, datagram: &[u8]) -> Result<usize, NetworkError> {
        Ok(black_box(datagram).len())
    }
}

fn bench_encapsulate(c: &mut Criterion) {
    let payload = vec![0x47u8; MAX_TS_PACKETS_PER_DATAGRAM * TS_PACKET_SIZE];
    let mut sender = RtpSender::with_ssrc(NullSink, 0xdead_beef);
    let mut timestamp = 0i64;

    let mut group = c.benchmark_group("rtp");
    group.throughput(Throughput::Bytes(payload.len() as u64));
    group.bench_function("encapsulate_7x188", |b| {
        b.iter(|| {
            timestamp += 3000;
            sender.send(black_box(&payload), timestamp).unwrap()
        })
    });

    let mut datagram = vec![0u8; RTP_HEADER_SIZE];
    datagram[0] = 0x80;
    datagram[1] = MPEG_TS_PAYLOAD_TYPE;
    datagram.extend_from_slice(&payload);
    group.bench_function("parse_7x188", |b| {
        b.iter(|| RtpPacket::parse(black_box(&datagram)).unwrap().ts_packet_count())
    });
    group.finish();
}

fn bench_fifo(c: &mut Criterion) {
    let packets = 70;
    let data = vec![0x47u8; packets * TS_PACKET_SIZE];
    let clock_refs: Vec<i64> = (0..packets as i64).collect();
    let unit = MuxedData::new(data, clock_refs).unwrap();
    let mut block = Vec::with_capacity(MAX_TS_PACKETS_PER_DATAGRAM * TS_PACKET_SIZE);

    c.bench_function("fifo_push_pop_70", |b| {
        b.iter(|| {
            let mut fifo = TsFifo::new();
            fifo.push_unit(unit.clone()).unwrap();
            while let Some(clock_ref) = fifo.pop_block(MAX_TS_PACKETS_PER_DATAGRAM, &mut block) {
                black_box(clock_ref);
            }
        })
    });
}

criterion_group!(benches, bench_encapsulate, bench_fifo);
criterion_main!(benches);
