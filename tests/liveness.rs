//! Registration, heartbeat and eviction across a parent and its children

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use axum::{
    body::Body,
    extract::connect_info::MockConnectInfo,
    http::{Request, StatusCode},
};
use sensor_mesh::api::{self, ApiState};
use sensor_mesh::config::settings::MonitorSettings;
use sensor_mesh::{ChildRegistry, LinkState, ParentLink, Sweeper, TierRole};
use tower::ServiceExt;

mod common;
use common::{FakeMesh, LoopbackParent, aggregator, collector, manager};

fn settings() -> MonitorSettings {
    MonitorSettings {
        heartbeat_interval: Duration::from_secs(10),
        check_interval: Duration::from_secs(10),
        max_live_interval: Duration::from_secs(30),
        ..MonitorSettings::default()
    }
}

#[tokio::test(start_paused = true)]
async fn silent_child_is_evicted_by_forty_seconds() {
    let manager = manager(TierRole::Aggregator, FakeMesh::new());
    assert!(manager.apply(aggregator()).await.unwrap().is_applied());

    let app = api::router(Arc::new(ApiState::new(manager.clone())))
        .layer(MockConnectInfo(SocketAddr::from(([10, 0, 0, 5], 40000))));

    let request = Request::builder()
        .method("POST")
        .uri("/register")
        .body(Body::from(collector(&[]).to_json().unwrap()))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let entries = manager.registry().list();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].descriptor.id, "N1");
    assert_eq!(entries[0].descriptor.address, "10.0.0.5");

    // Sweeps at 10, 20 and 30 see an idle time of at most 30s
    tokio::time::sleep(Duration::from_secs(35)).await;
    assert_eq!(manager.registry().len(), 1);

    tokio::time::sleep(Duration::from_secs(6)).await;
    assert!(manager.registry().is_empty());

    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn heartbeating_child_survives_sweeps() {
    let registry = Arc::new(ChildRegistry::new());
    let parent = LoopbackParent::new(registry.clone());
    let settings = settings();

    let sweeper = Sweeper::start(registry.clone(), &settings, None);
    let link = ParentLink::start(
        parent.clone(),
        Arc::new(collector(&[])),
        settings.heartbeat_interval,
    )
    .unwrap();

    tokio::time::sleep(Duration::from_secs(95)).await;
    assert_eq!(registry.len(), 1);
    assert_eq!(link.state(), LinkState::Registered);
    assert!(parent.heartbeats.load(Ordering::SeqCst) >= 9);

    // Unregister on stop, then nothing left to sweep
    link.stop().await;
    assert!(registry.is_empty());

    sweeper.stop().await;
}

#[tokio::test(start_paused = true)]
async fn stopped_child_is_evicted() {
    let registry = Arc::new(ChildRegistry::new());
    let parent = LoopbackParent::new(registry.clone());
    let settings = settings();

    let sweeper = Sweeper::start(registry.clone(), &settings, None);
    let link = ParentLink::start(
        parent.clone(),
        Arc::new(collector(&[])),
        settings.heartbeat_interval,
    )
    .unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(registry.len(), 1);

    // A crash sends no unregister; re-register behind the link's back to
    // simulate that and let the entry go stale
    link.stop().await;
    registry.register(collector(&[]).descriptor(), Arc::new(collector(&[])));

    tokio::time::sleep(Duration::from_secs(25)).await;
    assert_eq!(registry.len(), 1);

    tokio::time::sleep(Duration::from_secs(21)).await;
    assert!(registry.is_empty());

    sweeper.stop().await;
}

#[tokio::test(start_paused = true)]
async fn child_reregisters_after_parent_forgets_it() {
    let registry = Arc::new(ChildRegistry::new());
    let parent = LoopbackParent::new(registry.clone());

    let link = ParentLink::start(
        parent.clone(),
        Arc::new(collector(&[])),
        Duration::from_secs(10),
    )
    .unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(registry.len(), 1);

    // Parent restarted with an empty registry
    registry.clear();

    // Next heartbeat at t=10 answers unknown and the child registers again
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(registry.len(), 1);
    assert_eq!(link.state(), LinkState::Registered);

    link.stop().await;
}
