use super::*;

fn recorder(capacity: usize) -> TrafficRecorder {
    let (tx, _rx) = broadcast::channel(16);
    TrafficRecorder::new(capacity, tx)
}

#[test]
fn records_and_reports_totals() {
    let rec = recorder(10);
    rec.record("GET", "/api/config", 200, 12.5, "127.0.0.1", "curl/8.0", 0, 128);
    rec.record("GET", "/preview", 500, 40.0, "127.0.0.1", "curl/8.0", 0, 0);

    let metrics = rec.metrics(1);
    assert_eq!(metrics.total_requests, 2);
    assert_eq!(metrics.error_rate, 50.0);
    assert_eq!(metrics.active_connections, 1);
    assert_eq!(metrics.bytes_out_total, 128);
}

#[test]
fn recent_is_reverse_chronological_and_clamped() {
    let rec = recorder(5);
    for i in 0..5 {
        rec.record("GET", &format!("/p/{i}"), 200, 1.0, "127.0.0.1", "ua", 0, 0);
    }
    let recent = rec.recent(1000);
    assert_eq!(recent.len(), 5);
    assert_eq!(recent[0].path, "/p/4");
    assert_eq!(recent[4].path, "/p/0");
}

#[test]
fn ring_evicts_oldest_beyond_capacity() {
    let rec = recorder(2);
    rec.record("GET", "/a", 200, 1.0, "c", "ua", 0, 0);
    rec.record("GET", "/b", 200, 1.0, "c", "ua", 0, 0);
    rec.record("GET", "/c", 200, 1.0, "c", "ua", 0, 0);
    let recent = rec.recent(10);
    assert_eq!(recent.len(), 2);
    assert_eq!(recent[0].path, "/c");
    assert_eq!(recent[1].path, "/b");
}

#[test]
fn endpoints_strip_query_string_and_sort_desc_by_count() {
    let rec = recorder(10);
    rec.record("GET", "/api/links?x=1", 200, 1.0, "c", "ua", 0, 0);
    rec.record("GET", "/api/links?x=2", 200, 1.0, "c", "ua", 0, 0);
    rec.record("GET", "/api/traffic", 500, 1.0, "c", "ua", 0, 0);

    let endpoints = rec.endpoints();
    assert_eq!(endpoints[0].path, "/api/links");
    assert_eq!(endpoints[0].count, 2);
    assert_eq!(endpoints[1].errors, 1);
}

#[test]
fn clear_resets_all_state() {
    let rec = recorder(10);
    rec.record("GET", "/a", 200, 1.0, "c", "ua", 0, 0);
    rec.clear();
    assert_eq!(rec.recent(10).len(), 0);
    assert_eq!(rec.metrics(0).total_requests, 0);
    assert!(rec.endpoints().is_empty());
}

#[test]
fn self_exclusion_matches_traffic_paths_only() {
    assert!(is_self_excluded("/api/traffic"));
    assert!(is_self_excluded("/api/traffic/metrics"));
    assert!(is_self_excluded("/ws/traffic"));
    assert!(!is_self_excluded("/api/queue"));
    assert!(!is_self_excluded("/preview/api/traffic"));
}

#[tokio::test]
async fn record_broadcasts_to_subscribers() {
    let (tx, mut rx) = broadcast::channel(16);
    let rec = TrafficRecorder::new(10, tx);
    rec.record("GET", "/x", 200, 1.0, "c", "ua", 0, 0);
    let event = rx.recv().await.expect("recv");
    assert_eq!(event.path, "/x");
}
