use std::sync::Arc;

use dex_route_engine::cache::RouteCache;
use dex_route_engine::config::RouterConfig;
use dex_route_engine::error::{FailureKind, RouteError};
use dex_route_engine::testing::{builder_with, clmm_venue, cp_venue, stable_venue, MockSimulator};
use dex_route_engine::types::{AssetId, VenueId, VenueState};
use dex_route_engine::{RouteRequest, RoutingEngine};

fn engine_for(venues: Vec<VenueState>) -> RoutingEngine {
    let _ = env_logger::builder().is_test(true).try_init();
    let config = RouterConfig::default();
    let builder = builder_with(&config, venues).unwrap();
    let cache = Arc::new(RouteCache::new(config.cache.clone()));
    let simulator = Arc::new(MockSimulator::new(builder.clone()));
    RoutingEngine::new(config, builder, cache, simulator).unwrap()
}

fn assets(ids: &[&str]) -> Vec<AssetId> {
    ids.iter().map(|id| AssetId::new(*id)).collect()
}

#[tokio::test]
async fn scenario_a_two_hop_route_pays_fees_and_impact() {
    let engine = engine_for(vec![
        cp_venue("xy", "X", "Y", 1_000_000_000, 1_000_000_000, 0.003),
        cp_venue("yz", "Y", "Z", 1_000_000, 1_000_000, 0.003),
    ]);
    let request = RouteRequest::new("X", "Z", 1_000).with_slippage_tolerance(0.02);
    let result = engine.find_route(&request).await.unwrap();

    assert!(result.plan.is_single_path());
    let path = &result.plan.legs[0].route.path;
    assert_eq!(path.assets, assets(&["X", "Y", "Z"]));
    assert_eq!(path.venues, vec![VenueId::new("xy"), VenueId::new("yz")]);

    let fee_only = 1_000.0 * 0.997 * 0.997;
    assert!((result.expected_output as f64) < fee_only);
    assert!(result.expected_output > 0);
    assert!(result.price_impact > 0.0);
    assert!(result.simulated_output >= result.min_output);
}

#[tokio::test]
async fn scenario_b_large_order_splits_by_depth() {
    let engine = engine_for(vec![
        cp_venue("deep", "X", "Y", 3_000_000_000, 3_000_000_000, 0.003),
        cp_venue("shallow", "X", "Y", 1_000_000_000, 1_000_000_000, 0.003),
    ]);
    let amount = 400_000_000;
    let request = RouteRequest::new("X", "Y", amount).with_slippage_tolerance(0.3);
    let result = engine.find_route(&request).await.unwrap();

    let allocations = result.allocations();
    assert_eq!(allocations.len(), 2);
    assert_eq!(allocations.iter().map(|(_, a)| *a).sum::<u128>(), amount);
    assert!(result.plan.legs.iter().all(|leg| leg.expected_output() > 0));

    let deep = allocations
        .iter()
        .find(|(path, _)| path.venues == vec![VenueId::new("deep")])
        .map(|(_, a)| *a)
        .unwrap();
    let share = deep as f64 / amount as f64;
    assert!((share - 0.75).abs() < 0.02, "deep share {}", share);

    let single = engine
        .find_route(&request.clone().with_max_splits(1))
        .await
        .unwrap();
    assert!(single.plan.is_single_path());
    assert_eq!(single.plan.legs[0].route.path.venues, vec![VenueId::new("deep")]);
    assert!(single.expected_output < result.expected_output);
}

#[tokio::test]
async fn scenario_c_disconnected_assets_have_no_path() {
    let engine = engine_for(vec![
        cp_venue("xy", "X", "Y", 1_000_000, 1_000_000, 0.003),
        cp_venue("zw", "Z", "W", 1_000_000, 1_000_000, 0.003),
    ]);
    let err = engine
        .find_route(&RouteRequest::new("X", "W", 1_000))
        .await
        .unwrap_err();
    match &err {
        RouteError::NoPathFound {
            source_asset,
            dest_asset,
            ..
        } => {
            assert_eq!(source_asset, &AssetId::new("X"));
            assert_eq!(dest_asset, &AssetId::new("W"));
        }
        other => panic!("expected NoPathFound, got {:?}", other),
    }
    assert_eq!(err.to_failure().kind, FailureKind::NoPathFound);

    let alternatives = engine
        .find_alternatives(&AssetId::new("X"), &AssetId::new("W"), 1_000, 3)
        .await;
    assert!(matches!(alternatives, Err(RouteError::NoPathFound { .. })));
}

#[tokio::test]
async fn hop_limit_is_respected() {
    let engine = engine_for(vec![
        cp_venue("ab", "A", "B", 10_000_000, 10_000_000, 0.003),
        cp_venue("bc", "B", "C", 10_000_000, 10_000_000, 0.003),
        cp_venue("cd", "C", "D", 10_000_000, 10_000_000, 0.003),
    ]);
    let err = engine
        .find_route(&RouteRequest::new("A", "D", 1_000).with_max_hops(2))
        .await
        .unwrap_err();
    assert!(matches!(err, RouteError::NoPathFound { max_hops: 2, .. }));

    let result = engine
        .find_route(&RouteRequest::new("A", "D", 1_000).with_max_hops(3))
        .await
        .unwrap();
    assert_eq!(result.plan.legs[0].route.path.hops(), 3);
}

#[tokio::test]
async fn routes_across_mixed_curves() {
    let engine = engine_for(vec![
        clmm_venue("eth-usdc", "ETH", "USDC", 2.0, 50_000_000.0, 1.0, 4.0, 0.0005),
        stable_venue("usdc-usdt", "USDC", "USDT", 500_000_000, 500_000_000, 200, 0.0004),
    ]);
    let result = engine
        .find_route(&RouteRequest::new("ETH", "USDT", 100_000))
        .await
        .unwrap();
    let path = &result.plan.legs[0].route.path;
    assert_eq!(path.assets, assets(&["ETH", "USDC", "USDT"]));
    // sqrt price 2 means 4 USDC per ETH; the stable hop is near parity.
    let rate = result.expected_output as f64 / 100_000.0;
    assert!(rate > 3.9 && rate < 4.0, "rate {}", rate);
}

#[tokio::test]
async fn insufficient_depth_is_reported_with_context() {
    let engine = engine_for(vec![clmm_venue(
        "thin", "X", "Y", 1.0, 100_000.0, 0.99, 1.01, 0.003,
    )]);
    let err = engine
        .find_route(&RouteRequest::new("X", "Y", 10_000_000).with_slippage_tolerance(0.5))
        .await
        .unwrap_err();
    match err {
        RouteError::InsufficientLiquidity { venue, hop, .. } => {
            assert_eq!(venue, VenueId::new("thin"));
            assert_eq!(hop, 0);
        }
        other => panic!("expected InsufficientLiquidity, got {:?}", other),
    }
}

#[tokio::test]
async fn tight_tolerance_is_slippage_exceeded() {
    let engine = engine_for(vec![cp_venue("xy", "X", "Y", 1_000_000, 1_000_000, 0.003)]);
    let err = engine
        .find_route(&RouteRequest::new("X", "Y", 300_000).with_slippage_tolerance(0.01))
        .await
        .unwrap_err();
    assert!(matches!(err, RouteError::SlippageExceeded { .. }), "{:?}", err);
    assert!(err.is_recoverable());
}
