use std::collections::HashSet;
use std::sync::Arc;

use futures::future::join_all;
use pretty_assertions::assert_eq;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use dex_route_engine::cache::RouteCache;
use dex_route_engine::config::RouterConfig;
use dex_route_engine::external::ExecutionSimulator;
use dex_route_engine::graph::GraphBuilder;
use dex_route_engine::testing::{builder_with, synthetic_venues, MockSimulator};
use dex_route_engine::types::{Amount, AssetId};
use dex_route_engine::{RouteRequest, RoutingEngine};

const ASSETS: usize = 8;
const SEEDS: u64 = 6;

fn relaxed_config() -> RouterConfig {
    let mut config = RouterConfig::default();
    config.splitter.default_slippage_tolerance = 0.5;
    // The backbone chain alone may need every hop.
    config.search.max_hops = ASSETS - 1;
    config
}

fn engine_on(builder: &Arc<GraphBuilder>, config: &RouterConfig) -> RoutingEngine {
    RoutingEngine::new(
        config.clone(),
        builder.clone(),
        Arc::new(RouteCache::new(config.cache.clone())),
        Arc::new(MockSimulator::new(builder.clone())),
    )
    .unwrap()
}

fn random_request(rng: &mut StdRng) -> (AssetId, AssetId, Amount) {
    let a = rng.gen_range(0..ASSETS);
    let mut b = rng.gen_range(0..ASSETS);
    while b == a {
        b = rng.gen_range(0..ASSETS);
    }
    let amount = rng.gen_range(10_000u128..5_000_000);
    (
        AssetId::new(format!("T{}", a)),
        AssetId::new(format!("T{}", b)),
        amount,
    )
}

#[tokio::test]
async fn routes_are_acyclic_with_exact_allocations() {
    let config = relaxed_config();
    for seed in 0..SEEDS {
        let builder = builder_with(&config, synthetic_venues(seed, ASSETS, 20)).unwrap();
        let engine = engine_on(&builder, &config);
        let mut rng = StdRng::seed_from_u64(seed + 100);

        for _ in 0..10 {
            let (source, dest, amount) = random_request(&mut rng);
            let request = RouteRequest::new(source.clone(), dest.clone(), amount)
                .with_slippage_tolerance(0.5);
            let result = engine
                .find_route(&request)
                .await
                .unwrap_or_else(|e| panic!("seed {} {} -> {}: {}", seed, source, dest, e));

            assert_eq!(result.plan.allocated(), amount);
            for leg in &result.plan.legs {
                let path = &leg.route.path;
                let unique: HashSet<_> = path.assets.iter().collect();
                assert_eq!(unique.len(), path.assets.len(), "path revisits an asset");
                assert_eq!(path.source(), &source);
                assert_eq!(path.dest(), &dest);
                assert!(path.hops() <= config.search.max_hops);
            }
        }
    }
}

#[tokio::test]
async fn identical_requests_give_identical_plans() {
    let config = relaxed_config();
    for seed in 0..SEEDS {
        let builder = builder_with(&config, synthetic_venues(seed, ASSETS, 20)).unwrap();
        let mut rng = StdRng::seed_from_u64(seed + 200);
        let (source, dest, amount) = random_request(&mut rng);
        let request = RouteRequest::new(source, dest, amount).with_slippage_tolerance(0.5);

        // Separate engines do not share a cache.
        let first = engine_on(&builder, &config).find_route(&request).await.unwrap();
        let second = engine_on(&builder, &config).find_route(&request).await.unwrap();
        assert_eq!(first.snapshot_version, second.snapshot_version);
        assert_eq!(first.plan, second.plan);
    }
}

#[tokio::test]
async fn concurrent_requests_agree() {
    let config = relaxed_config();
    let builder = builder_with(&config, synthetic_venues(7, ASSETS, 24)).unwrap();
    let engine = Arc::new(engine_on(&builder, &config));
    let request = RouteRequest::new("T0", "T5", 250_000).with_slippage_tolerance(0.5);

    let handles = (0..8).map(|_| {
        let engine = engine.clone();
        let request = request.clone();
        tokio::spawn(async move { engine.find_route(&request).await })
    });
    let results: Vec<_> = join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();

    for result in &results[1..] {
        assert_eq!(result.plan, results[0].plan);
    }
    assert_eq!(engine.stats().successes, 8);
}

#[tokio::test]
async fn more_alternatives_never_lower_the_best_output() {
    let config = relaxed_config();
    for seed in 0..SEEDS {
        let builder = builder_with(&config, synthetic_venues(seed, ASSETS, 20)).unwrap();
        let engine = engine_on(&builder, &config);
        let mut rng = StdRng::seed_from_u64(seed + 300);
        let (source, dest, amount) = random_request(&mut rng);

        let mut previous_best: Option<Amount> = None;
        for k in 1..=5 {
            let best = engine
                .find_alternatives(&source, &dest, amount, k)
                .await
                .ok()
                .and_then(|routes| routes.first().map(|r| r.expected_output));
            assert!(best >= previous_best, "seed {} k {}: {:?} < {:?}", seed, k, best, previous_best);
            previous_best = best;
        }
        assert!(previous_best.is_some());
    }
}

#[tokio::test]
async fn returned_plans_simulate_successfully() {
    let config = relaxed_config();
    for seed in 0..SEEDS {
        let builder = builder_with(&config, synthetic_venues(seed, ASSETS, 20)).unwrap();
        let engine = engine_on(&builder, &config);
        let simulator = MockSimulator::new(builder.clone());
        let mut rng = StdRng::seed_from_u64(seed + 400);
        let (source, dest, amount) = random_request(&mut rng);

        let routes = engine
            .find_alternatives(&source, &dest, amount, 4)
            .await
            .unwrap();
        let mut succeeded = 0;
        for route in &routes {
            for leg in &route.plan.legs {
                let outcome = simulator
                    .simulate(&leg.route.path, leg.amount_in())
                    .await
                    .unwrap();
                if outcome.success && outcome.output >= leg.min_output {
                    succeeded += 1;
                }
            }
        }
        assert!(succeeded >= 1, "seed {}: no alternative simulated", seed);
    }
}
