//! Benchmark for the advertisement processing pipeline.
//!
//! Runs raw HCI frames through the same steps as the receive loop: frame
//! parsing, decoding with duplicate suppression, and line formatting.

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use mithermometer_listener::{
    AdvertisementFrame, InfluxDbFormatter, LabelTable, MacAddress, OutputFormatter,
    SensorDecoder, TextFormatter,
};

const TEST_MAC: MacAddress = MacAddress([0xA4, 0xC1, 0x38, 0xDD, 0xEE, 0xFF]);

/// pvvx service data AD structure
fn pvvx_service_data(mac: MacAddress, sequence: u8) -> Vec<u8> {
    let mut address = mac.0;
    address.reverse();
    let mut data = vec![0x12, 0x16, 0x1A, 0x18];
    data.extend_from_slice(&address);
    data.extend_from_slice(&2153i16.to_le_bytes()); // 21.53 °C
    data.extend_from_slice(&4520u16.to_le_bytes()); // 45.20 %
    data.extend_from_slice(&2950u16.to_le_bytes()); // 2950 mV
    data.extend_from_slice(&[87, sequence, 0x05]);
    data
}

/// HCI LE advertising report carrying `ad_data`
fn advertising_report(mac: MacAddress, ad_data: &[u8]) -> Vec<u8> {
    let mut frame = vec![0x04, 0x3E, 0x00, 0x02, 0x01, 0x00, 0x00];
    let mut address = mac.0;
    address.reverse();
    frame.extend_from_slice(&address);
    frame.push(ad_data.len() as u8);
    frame.extend_from_slice(ad_data);
    frame.push(0xBA); // -70 dBm
    frame[2] = (frame.len() - 3) as u8;
    frame
}

/// Frames as a thermometer sends them: every counter value three times.
fn thermometer_frames(mac: MacAddress, count: usize) -> Vec<Vec<u8>> {
    (0..count)
        .map(|i| advertising_report(mac, &pvvx_service_data(mac, (i / 3) as u8)))
        .collect()
}

fn process(frames: &[Vec<u8>], formatter: &dyn OutputFormatter) -> Vec<String> {
    let mut decoder = SensorDecoder::new(LabelTable::new());
    let mut lines = Vec::new();
    for raw in frames {
        let Ok(frame) = AdvertisementFrame::parse(raw) else {
            continue;
        };
        let envelope = frame.envelope;
        if let Some(measurement) = decoder.decode(envelope.address, envelope.payload) {
            lines.push(formatter.format(&measurement, envelope.signal_strength));
        }
    }
    lines
}

/// Benchmark frame → measurement → line for one device with re-broadcasts
fn bench_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("pipeline");
    let influxdb = InfluxDbFormatter::new("mithermometer".to_string());
    let text = TextFormatter::new(6).utc();

    for batch_size in [3, 30, 300] {
        let frames = thermometer_frames(TEST_MAC, batch_size);
        group.throughput(Throughput::Elements(batch_size as u64));
        group.bench_with_input(BenchmarkId::new("influxdb", batch_size), &frames, |b, frames| {
            b.iter(|| black_box(process(frames, &influxdb)))
        });
        group.bench_with_input(BenchmarkId::new("text", batch_size), &frames, |b, frames| {
            b.iter(|| black_box(process(frames, &text)))
        });
    }

    group.finish();
}

/// Benchmark a crowded medium: mostly foreign advertisements, several thermometers
fn bench_crowded_medium(c: &mut Criterion) {
    let mut group = c.benchmark_group("crowded_medium");
    let formatter = InfluxDbFormatter::new("mithermometer".to_string());

    let mut frames = Vec::new();
    for i in 0..100u8 {
        let phone = MacAddress([0x5C, 0x1D, 0x2A, 0x00, 0x00, i]);
        frames.push(advertising_report(
            phone,
            &[0x02, 0x01, 0x1A, 0x0A, 0xFF, 0x4C, 0x00, 0x10, 0x05, 0x01, 0x18, 0x2B, 0x3C, 0x4D],
        ));
        if i % 10 == 0 {
            let thermometer = MacAddress([0xA4, 0xC1, 0x38, 0x00, 0x00, i]);
            frames.push(advertising_report(thermometer, &pvvx_service_data(thermometer, i)));
        }
    }

    group.throughput(Throughput::Elements(frames.len() as u64));
    group.bench_function("110_frames_10_devices", |b| {
        b.iter(|| {
            let lines = process(&frames, &formatter);
            debug_assert_eq!(lines.len(), 10);
            black_box(lines)
        })
    });

    group.finish();
}

criterion_group!(benches, bench_pipeline, bench_crowded_medium);
criterion_main!(benches);
