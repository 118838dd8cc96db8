use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use mpegts_streamer::codec::{Codec, EncodedPacket, EncoderParameters, PixelFormat, MPEG_TIME_BASE};
use mpegts_streamer::frame::PictureSize;
use mpegts_streamer::stream::OutputAccumulator;
use mpegts_streamer::ts::{crc32_mpeg2, MuxSink, MuxerConfig, TsMuxer};

fn params() -> EncoderParameters {
    EncoderParameters {
        codec: Codec::H264,
        size: PictureSize::new(640, 480),
        pixel_format: PixelFormat::I420,
        time_base: MPEG_TIME_BASE,
        gop_size: 15,
        bitrate: 400_000,
        global_header: false,
    }
}

fn create_access_unit(size: usize, keyframe: bool) -> EncodedPacket {
    let mut data = vec![0, 0, 0, 1, if keyframe { 0x65 } else { 0x41 }];
    data.extend((0..size).map(|i| (i % 251) as u8));
    EncodedPacket {
        data,
        pts: 0,
        dts: 0,
        keyframe,
    }
}

fn benchmark_write_packet(c: &mut Criterion) {
    let mut group = c.benchmark_group("write_packet");

    // Typical H.264 access unit sizes at 400 kbps, delta frames up to an IDR
    for size in [1_000, 5_000, 20_000, 60_000].iter() {
        let mut packet = create_access_unit(*size, false);
        let mut muxer = TsMuxer::new(&params(), MuxerConfig::default()).unwrap();
        let mut output = OutputAccumulator::new(4096);
        muxer.write_header(&mut output).unwrap();

        group.bench_with_input(BenchmarkId::new("au_size", size), size, |b, _| {
            b.iter(|| {
                packet.pts += 6000;
                packet.dts = packet.pts;
                output.reset();
                muxer.write_packet(black_box(&packet), &mut output).unwrap();
            });
        });
    }

    group.finish();
}

fn benchmark_accumulator_append(c: &mut Criterion) {
    let chunk = vec![0x47u8; 4096];

    c.bench_function("accumulator_append_4k", |b| {
        let mut output = OutputAccumulator::new(4096);
        b.iter(|| {
            output.reset();
            for _ in 0..8 {
                output.append(black_box(&chunk)).unwrap();
            }
        });
    });
}

fn benchmark_crc(c: &mut Criterion) {
    let section = vec![0xA5u8; 1024];

    c.bench_function("crc32_mpeg2_1k", |b| {
        b.iter(|| crc32_mpeg2(black_box(&section)));
    });
}

criterion_group!(
    benches,
    benchmark_write_packet,
    benchmark_accumulator_append,
    benchmark_crc
);
criterion_main!(benches);
