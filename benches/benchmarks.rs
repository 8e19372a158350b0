use bytes::BytesMut;
use chrono::NaiveDate;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use hl7_adt_link::{build_admission, decode, encode, MllpCodec, PatientRecord, Routing};
use tokio_util::codec::{Decoder, Encoder};

fn patient() -> PatientRecord {
    PatientRecord::new(42, "Ivan", "Petrov", NaiveDate::from_ymd_opt(1990, 5, 1).unwrap())
}

fn bench_adt(c: &mut Criterion) {
    let routing = Routing::default();
    let message = build_admission(&patient(), &routing);
    let payload = encode(&message);

    c.bench_function("build_admission", |b| {
        b.iter(|| build_admission(black_box(&patient()), &routing))
    });
    c.bench_function("encode_adt", |b| b.iter(|| encode(black_box(&message))));
    c.bench_function("decode_adt", |b| b.iter(|| decode(black_box(&payload)).unwrap()));
}

fn bench_mllp(c: &mut Criterion) {
    let payload = encode(&build_admission(&patient(), &Routing::default()));

    c.bench_function("mllp_encode", |b| {
        b.iter(|| {
            let mut codec = MllpCodec::new();
            let mut dst = BytesMut::with_capacity(0); //force growth, the allocation is part of real use
            codec.encode(payload.clone(), &mut dst).unwrap();
            dst
        })
    });

    let mut framed = BytesMut::new();
    MllpCodec::new().encode(payload, &mut framed).unwrap();
    c.bench_function("mllp_decode", |b| {
        b.iter(|| {
            let mut codec = MllpCodec::new();
            let mut src = framed.clone();
            codec.decode(&mut src).unwrap()
        })
    });
}

criterion_group!(benches, bench_adt, bench_mllp);
criterion_main!(benches);
