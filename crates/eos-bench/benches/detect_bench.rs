//! Detector benchmarks: RX kernel scaling with band count, detection-heap
//! throughput, and the smoothing filters.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use eos_core::heap::DetectionHeap;
use eos_core::{
    init_default_params, Eos, EosInitParams, MiseDetectionResult, MiseObservation, MiseParams,
    ObsShape, PimsCommonParams, PimsFilter, PimsObservationRef, PimsParams, PimsState,
    PixelDetection,
};

fn handle(mise_max_bands: u32) -> Eos {
    let params = EosInitParams {
        pims_params: init_default_params().pims,
        mise_max_bands,
    };
    Eos::init(&params, None, None).expect("self-allocated arena")
}

fn cube(rows: u32, cols: u32, bands: u32) -> MiseObservation {
    let mut obs = MiseObservation::with_capacity((rows * cols * bands) as usize);
    obs.shape = ObsShape { rows, cols, bands };
    for (i, sample) in obs.data.iter_mut().enumerate() {
        *sample = (i % 251) as u16;
    }
    obs
}

fn bench_rx_bands(c: &mut Criterion) {
    let mut group = c.benchmark_group("rx_detect");
    for &bands in &[8u32, 32, 64] {
        let obs = cube(16, 16, bands);
        let mut eos = handle(bands);
        group.throughput(Throughput::Elements(u64::from(16 * 16 * bands)));
        group.bench_with_input(BenchmarkId::from_parameter(bands), &bands, |b, _| {
            let mut result = MiseDetectionResult::with_capacity(16);
            b.iter(|| {
                eos.mise_detect_anomaly(&MiseParams::default(), &obs, &mut result)
                    .unwrap();
                black_box(result.n_results);
            });
        });
    }
    group.finish();
}

fn bench_heap_push(c: &mut Criterion) {
    let sizes: &[usize] = &[64, 1024, 16384];
    let mut group = c.benchmark_group("heap_push_sort");
    for &n in sizes {
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            let mut backing = vec![PixelDetection::default(); 32];
            b.iter(|| {
                let mut heap = DetectionHeap::new(&mut backing);
                for i in 0..n {
                    heap.push(PixelDetection {
                        row: i as u32,
                        col: 0,
                        score: (i.wrapping_mul(2654435761) % 1000003) as f64,
                    });
                }
                heap.sort();
                black_box(heap.len());
            });
        });
    }
    group.finish();
}

fn bench_filters(c: &mut Criterion) {
    const NUM_BINS: u32 = 100;
    let mut group = c.benchmark_group("pims_filter_step");

    for filter in [PimsFilter::Min, PimsFilter::Mean, PimsFilter::Median] {
        let params = PimsParams {
            common: PimsCommonParams {
                filter,
                max_observations: 16,
                threshold: f32::MAX,
                max_bins: NUM_BINS,
            },
            ..init_default_params().pims
        };
        let counts = vec![7u32 as eos_core::BinCount; NUM_BINS as usize];
        let energies: Vec<f32> = (0..NUM_BINS).map(|b| 0.1 * b as f32).collect();

        group.bench_function(BenchmarkId::from_parameter(format!("{filter:?}")), |b| {
            let mut eos = handle(0);
            let req = eos.pims_state_request(&params).unwrap();
            let mut state = PimsState::for_request(&req);
            eos.pims_init(&params, &mut state).unwrap();
            let mut id = 0u32;
            b.iter(|| {
                id = id.wrapping_add(1);
                let obs = PimsObservationRef {
                    observation_id: id,
                    timestamp: id,
                    bin_counts: &counts,
                    bin_log_energies: &energies,
                    ..PimsObservationRef::default()
                };
                black_box(eos.pims_on_recv(obs, &params, &mut state).unwrap());
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_rx_bands, bench_heap_push, bench_filters);
criterion_main!(benches);
