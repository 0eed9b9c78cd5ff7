mod common;

use sbm_core::RngHandle;
use sbm_state::DynamicSampler;

#[test]
fn draws_follow_the_weights() {
    let mut sampler = DynamicSampler::new();
    sampler.insert((0, 0), 1);
    sampler.insert((1, 0), 3);
    sampler.insert((2, 0), 6);
    assert_eq!(sampler.total(), 10);

    let mut rng = RngHandle::from_seed(13);
    let trials = 30_000;
    let mut counts = [0usize; 3];
    for _ in 0..trials {
        let (edge, _) = sampler.sample(&mut rng).unwrap();
        counts[edge] += 1;
    }
    for (edge, weight) in [(0usize, 1.0), (1, 3.0), (2, 6.0)] {
        let freq = counts[edge] as f64 / trials as f64;
        let p = weight / 10.0;
        assert!((freq - p).abs() < 0.02, "edge {edge}: freq {freq} vs {p}");
    }
}

#[test]
fn removed_slots_never_draw_and_are_recycled() {
    let mut sampler = DynamicSampler::new();
    let a = sampler.insert((0, 0), 5);
    let _b = sampler.insert((1, 0), 5);
    sampler.remove(a);
    assert_eq!(sampler.total(), 5);

    let mut rng = RngHandle::from_seed(14);
    for _ in 0..1000 {
        let (edge, _) = sampler.sample(&mut rng).unwrap();
        assert_eq!(edge, 1);
    }
    let c = sampler.insert((2, 1), 2);
    assert_eq!(c, a, "freed slot must be reused");
    assert_eq!(sampler.total(), 7);
}

#[test]
fn an_empty_sampler_yields_nothing() {
    let mut sampler = DynamicSampler::new();
    let slot = sampler.insert((0, 0), 4);
    sampler.remove(slot);
    let mut rng = RngHandle::from_seed(15);
    assert_eq!(sampler.sample(&mut rng), None);
}

#[test]
fn zero_weight_entries_are_skipped() {
    let mut sampler = DynamicSampler::new();
    sampler.insert((0, 0), 0);
    sampler.insert((1, 0), 2);
    sampler.insert((2, 0), 0);
    let mut rng = RngHandle::from_seed(16);
    for _ in 0..200 {
        let (edge, _) = sampler.sample(&mut rng).unwrap();
        assert_eq!(edge, 1);
    }
}
