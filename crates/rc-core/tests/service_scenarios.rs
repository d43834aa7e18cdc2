//! End-to-end scenarios against the public service API.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use rc_core::{Cache, CacheError, FileTraceLog, Limits, ResolvCacheService, ServiceConfig};

fn service_with(expires: Duration, limits: Limits) -> ResolvCacheService {
    let cache = Arc::new(Cache::new(expires, limits));
    ResolvCacheService::new(cache, ServiceConfig::default())
}

fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

#[tokio::test]
async fn names_per_ip_limit_surfaces_and_earlier_names_survive() {
    let limits = Limits {
        block_size: 16,
        max_blocks_client: 2,
        max_names_node: 2,
    };
    let svc = service_with(Duration::from_secs(60), limits);
    svc.start().unwrap();
    let client = ip("10.0.0.1");
    let resolved = [ip("1.1.1.1")];

    // the node takes the primary name plus max_names_node others
    svc.collect(None, client, "a", &resolved, &[]).await.unwrap();
    svc.collect(None, client, "b", &resolved, &[]).await.unwrap();
    svc.collect(None, client, "c", &resolved, &[]).await.unwrap();
    let err = svc
        .collect(None, client, "d", &resolved, &[])
        .await
        .unwrap_err();
    assert!(matches!(err, CacheError::LimitNamesIP));
    assert!(err.is_limit());

    assert!(svc.check(None, client, resolved[0], "a").await.unwrap().result);
    assert!(svc.check(None, client, resolved[0], "c").await.unwrap().result);
    assert!(!svc.check(None, client, resolved[0], "d").await.unwrap().result);
    svc.shutdown().await;
}

#[tokio::test]
async fn client_query_limit_after_blocks_fill() {
    let limits = Limits {
        block_size: 2,
        max_blocks_client: 1,
        max_names_node: 8,
    };
    let svc = service_with(Duration::from_secs(60), limits);
    svc.start().unwrap();
    let client = ip("10.0.0.1");

    // 2 blocks x 2 nodes fit; the fifth distinct resolved IP fails
    let addrs = ["1.1.1.1", "1.1.1.2", "1.1.1.3", "1.1.1.4", "1.1.1.5"];
    for addr in &addrs[..4] {
        svc.collect(None, client, "a.example", &[ip(addr)], &[])
            .await
            .unwrap();
    }
    let err = svc
        .collect(None, client, "a.example", &[ip(addrs[4])], &[])
        .await
        .unwrap_err();
    assert!(matches!(err, CacheError::LimitClientQueries));

    for addr in &addrs[..4] {
        assert!(svc.check(None, client, ip(addr), "").await.unwrap().result);
    }
    assert!(!svc.check(None, client, ip(addrs[4]), "").await.unwrap().result);
    // other clients are unaffected
    svc.collect(None, ip("10.0.0.2"), "a.example", &[ip(addrs[4])], &[])
        .await
        .unwrap();
    svc.shutdown().await;
}

#[tokio::test]
async fn entries_expire_and_store_trails_the_window() {
    let expires = Duration::from_millis(300);
    let svc = service_with(expires, Limits::default());
    svc.start().unwrap();
    let client = ip("10.0.0.1");
    let resolved = ip("1.1.1.1");

    svc.collect(None, client, "a.example", &[resolved], &[])
        .await
        .unwrap();
    assert!(svc.check(None, client, resolved, "a.example").await.unwrap().result);

    tokio::time::sleep(Duration::from_millis(500)).await;
    svc.cache().clean();
    let resp = svc.check(None, client, resolved, "a.example").await.unwrap();
    assert!(!resp.result);
    assert!(resp.last.is_none());

    // flush aged out of the window, so the horizon trails now by `expires`
    let horizon = Utc::now() - TimeDelta::from_std(expires).unwrap();
    let drift = (resp.store - horizon).abs();
    assert!(drift < TimeDelta::milliseconds(100), "drift={drift}");
    svc.shutdown().await;
}

#[tokio::test]
async fn periodic_clean_reclaims_expired_entries() {
    let cache = Arc::new(Cache::new(Duration::from_millis(100), Limits::default()));
    let svc = ResolvCacheService::new(
        cache,
        ServiceConfig {
            clean_interval: Duration::from_millis(100),
            ..ServiceConfig::default()
        },
    );
    svc.start().unwrap();
    let client = ip("10.0.0.1");
    let resolved = ip("1.1.1.1");
    svc.collect(None, client, "a.example", &[resolved], &[])
        .await
        .unwrap();
    let cleaned_at_start = svc.cache().cleaned();

    tokio::time::sleep(Duration::from_millis(350)).await;
    assert!(svc.cache().cleaned() > cleaned_at_start);
    assert!(!svc.check(None, client, resolved, "a.example").await.unwrap().result);
    svc.shutdown().await;
}

#[tokio::test]
async fn flush_mid_use_keeps_answers_consistent() {
    let svc = Arc::new(service_with(Duration::from_secs(60), Limits::default()));
    svc.start().unwrap();
    let client = ip("10.0.0.1");
    let resolved = ip("1.1.1.1");
    svc.collect(None, client, "a.example", &[resolved], &[])
        .await
        .unwrap();

    let checker = {
        let svc = svc.clone();
        tokio::spawn(async move {
            for _ in 0..200 {
                let resp = svc.check(None, client, resolved, "a.example").await.unwrap();
                // either the old state or the post-flush empty state
                if resp.result {
                    assert!(resp.last.is_some());
                } else {
                    assert!(resp.last.is_none());
                }
            }
        })
    };

    let before = svc.cache().flushed();
    svc.cache().flush();
    let between = svc.cache().flushed();
    assert!(between > before);
    svc.cache().flush();
    assert!(svc.cache().flushed() > between);
    checker.await.unwrap();

    assert!(!svc.check(None, client, resolved, "a.example").await.unwrap().result);
    svc.shutdown().await;
}

#[tokio::test]
async fn periodic_dump_writes_snapshot_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.dump");
    let cache = Arc::new(Cache::new(Duration::from_secs(60), Limits::default()));
    let svc = ResolvCacheService::new(
        cache,
        ServiceConfig {
            clean_interval: Duration::from_secs(60),
            dump_interval: Duration::from_millis(100),
            dump_file: Some(path.clone()),
        },
    );
    svc.start().unwrap();
    for n in 1..=3 {
        svc.collect(
            None,
            ip("10.0.0.1"),
            "a.example",
            &[ip(&format!("1.1.1.{n}"))],
            &[],
        )
        .await
        .unwrap();
        svc.collect(
            None,
            ip("10.0.0.2"),
            "b.example",
            &[ip(&format!("2.2.2.{n}"))],
            &[],
        )
        .await
        .unwrap();
    }
    tokio::time::sleep(Duration::from_millis(300)).await;
    svc.shutdown().await;

    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.starts_with("dump: "));
    assert!(text.contains("- key: 10.0.0.1"));
    assert!(text.contains("- key: 10.0.0.2"));
    assert_eq!(text.matches("    - key: ").count(), 6);
}

#[tokio::test]
async fn trace_records_round_trip_through_the_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("trace.log");
    let trace = Arc::new(FileTraceLog::create(&path).await.unwrap());
    let cache = Arc::new(Cache::new(Duration::from_secs(60), Limits::default()));
    let svc = ResolvCacheService::new(cache, ServiceConfig::default()).with_trace(trace.clone());
    svc.start().unwrap();

    let client = ip("192.168.1.5");
    let peer = "10.9.8.7:4567".parse().ok();
    svc.collect(
        None,
        client,
        "www.example.com",
        &[ip("1.1.1.1"), ip("2.2.2.2")],
        &["alias.example.com".to_string()],
    )
    .await
    .unwrap();
    svc.check(peer, client, ip("1.1.1.1"), "www.example.com")
        .await
        .unwrap();
    svc.check(None, client, ip("9.9.9.9"), "").await.unwrap();

    svc.shutdown().await;
    trace.close().await.unwrap();

    let content = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines.len(), 3);

    let collect: Vec<&str> = lines[0].split(',').collect();
    assert_eq!(collect[1], "collect");
    assert_eq!(collect[2], "");
    assert_eq!(collect[3], "192.168.1.5");
    assert_eq!(collect[4], "www.example.com");
    assert_eq!(&collect[5..], &["1.1.1.1", "2.2.2.2"]);

    let hit: Vec<&str> = lines[1].split(',').collect();
    assert_eq!(hit[1], "check");
    assert_eq!(hit[2], "10.9.8.7:4567");
    assert_eq!(hit[5], "1.1.1.1");
    assert_eq!(hit[6], "true");

    let miss: Vec<&str> = lines[2].split(',').collect();
    assert_eq!(miss[4], "");
    assert_eq!(miss[6], "false");
}
