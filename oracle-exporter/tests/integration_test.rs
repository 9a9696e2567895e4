//! Integration tests for the Oracle exporter.
//!
//! These tests drive the full flow from scripted database answers through
//! probes and the collector to the HTTP metrics endpoint.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use oracle_exporter::db::memory::MemoryDatabase;
use oracle_exporter::db::{Row, Value};
use oracle_exporter::probes::{
    ACTIVE_USER_SESSION_QUERY, ARCHIVELOG_COMPLETION_QUERY, ARCHIVELOG_STATS_QUERY,
    LIVENESS_QUERY, RESOURCE_LIMIT_QUERY, SESSION_COUNT_QUERY, TABLESPACE_USAGE_QUERY,
};
use oracle_exporter::{ExporterConfig, HttpServer, OracleCollector, SharedCollector};
use tokio::sync::watch;

fn text(s: &str) -> Value {
    Value::from(s)
}

fn num(n: f64) -> Value {
    Value::from(n)
}

/// A database answering every built-in probe.
fn full_database() -> MemoryDatabase {
    MemoryDatabase::new()
        .with_rows(LIVENESS_QUERY, vec![Row::new(vec![text("OPEN")])])
        .with_rows(
            SESSION_COUNT_QUERY,
            vec![
                Row::new(vec![text("user_sessions"), num(25.0)]),
                Row::new(vec![text("background_sessions"), num(60.0)]),
            ],
        )
        .with_rows(ACTIVE_USER_SESSION_QUERY, vec![Row::new(vec![num(4.0)])])
        .with_rows(
            TABLESPACE_USAGE_QUERY,
            vec![
                Row::new(vec![
                    text("SYSTEM"),
                    num(1_048_576_000.0),
                    num(10_485_760.0),
                    num(34_359_721_984.0),
                    num(33_321_992_192.0),
                ]),
                Row::new(vec![
                    text("UNDOTBS1"),
                    num(104_857_600.0),
                    num(94_371_840.0),
                    num(34_359_721_984.0),
                    num(34_349_236_224.0),
                ]),
            ],
        )
        .with_rows(
            ARCHIVELOG_STATS_QUERY,
            vec![
                Row::new(vec![text("1"), text("min_sequence"), num(100.0)]),
                Row::new(vec![text("1"), text("max_sequence"), num(200.0)]),
                Row::new(vec![text("2"), text("min_sequence"), num(90.0)]),
                Row::new(vec![text("2"), text("max_sequence"), num(180.0)]),
            ],
        )
        .with_rows(
            ARCHIVELOG_COMPLETION_QUERY,
            vec![
                Row::new(vec![text("1"), num(350.0)]),
                Row::new(vec![text("2"), num(410.0)]),
            ],
        )
        .with_rows(
            RESOURCE_LIMIT_QUERY,
            vec![
                Row::new(vec![text("processes"), num(75.0), num(120.0), num(300.0)]),
                Row::new(vec![text("sessions"), num(85.0), num(130.0), num(472.0)]),
            ],
        )
}

fn all_probes_config() -> ExporterConfig {
    ExporterConfig::parse(
        r#"{
            collect: { sessions: true, tablespaces: true, archivelog: true, resource_limit: true }
        }"#,
    )
    .unwrap()
}

fn create_collector(db: &MemoryDatabase, config: &ExporterConfig) -> SharedCollector {
    Arc::new(OracleCollector::from_config(config, Arc::new(db.clone())).unwrap())
}

/// Parse Prometheus text format into (series, value) pairs.
fn parse_prometheus(output: &str) -> Vec<(String, f64)> {
    output
        .lines()
        .filter(|l| !l.starts_with('#') && !l.trim().is_empty())
        .filter_map(|l| {
            let (series, value) = l.rsplit_once(' ')?;
            Some((series.to_string(), value.parse().ok()?))
        })
        .collect()
}

fn series_value(output: &str, series: &str) -> Option<f64> {
    parse_prometheus(output)
        .into_iter()
        .find(|(s, _)| s == series)
        .map(|(_, v)| v)
}

#[tokio::test]
async fn test_full_flow_all_probes() {
    let db = full_database();
    let collector = create_collector(&db, &all_probes_config());

    let output = collector.render();

    assert_eq!(series_value(&output, "oracle_up"), Some(1.0));
    assert_eq!(
        series_value(&output, "oracle_sessions_total{session_type=\"background_sessions\"}"),
        Some(60.0)
    );
    assert_eq!(
        series_value(&output, "oracle_sessions_active_user_total"),
        Some(4.0)
    );
    assert_eq!(
        series_value(
            &output,
            "oracle_tablespaces_free_bytes{tablespace_name=\"UNDOTBS1\"}"
        ),
        Some(94_371_840.0)
    );
    assert_eq!(
        series_value(&output, "oracle_archivelog_stats_max_sequence{inst_id=\"2\"}"),
        Some(180.0)
    );
    assert_eq!(
        series_value(
            &output,
            "oracle_archivelog_stats_completion_avg_time_ms{inst_id=\"1\"}"
        ),
        Some(350.0)
    );
    assert_eq!(
        series_value(
            &output,
            "oracle_resource_limit_init_limit{resource_name=\"sessions\"}"
        ),
        Some(472.0)
    );
    for probe in ["sessions", "tablespaces", "archivelog", "resource_limit"] {
        assert_eq!(
            series_value(
                &output,
                &format!("oracle_exporter_scrape_errors_total{{collector=\"{}\"}}", probe)
            ),
            Some(0.0),
            "error counter for {}",
            probe
        );
    }
    assert_eq!(db.open_connections(), 0);
}

#[tokio::test]
async fn test_families_have_help_and_type() {
    let collector = create_collector(&full_database(), &all_probes_config());
    let output = collector.render();

    for line in output.lines().filter(|l| !l.starts_with('#')) {
        let name = line.split(['{', ' ']).next().unwrap();
        assert!(
            output.contains(&format!("# TYPE {} ", name)),
            "missing TYPE for {}",
            name
        );
        assert!(
            output.contains(&format!("# HELP {} ", name)),
            "missing HELP for {}",
            name
        );
    }
}

#[tokio::test]
async fn test_failed_probe_is_isolated() {
    let db = full_database().with_error(
        ARCHIVELOG_STATS_QUERY,
        "ORA-00942: table or view does not exist",
    );
    let collector = create_collector(&db, &all_probes_config());

    let output = collector.render();

    assert_eq!(series_value(&output, "oracle_up"), Some(1.0));
    assert_eq!(
        series_value(&output, "oracle_exporter_last_scrape_error"),
        Some(1.0)
    );
    assert_eq!(
        series_value(
            &output,
            "oracle_exporter_scrape_errors_total{collector=\"archivelog\"}"
        ),
        Some(1.0)
    );
    assert_eq!(
        series_value(
            &output,
            "oracle_exporter_scrape_errors_total{collector=\"tablespaces\"}"
        ),
        Some(0.0)
    );
    // The completion query belongs to the same probe and is not published.
    assert!(!output.contains("oracle_archivelog_stats"));
    assert!(output.contains("oracle_resource_limit_current_utilization"));
}

#[tokio::test]
async fn test_lenient_policy() {
    let db = full_database().with_error(RESOURCE_LIMIT_QUERY, "ORA-01031: insufficient privileges");
    let mut config = all_probes_config();
    config.scrape.fail_on_probe_error = false;
    let collector = create_collector(&db, &config);

    let output = collector.render();
    assert_eq!(
        series_value(&output, "oracle_exporter_last_scrape_error"),
        Some(0.0)
    );
    assert_eq!(
        series_value(
            &output,
            "oracle_exporter_scrape_errors_total{collector=\"resource_limit\"}"
        ),
        Some(1.0)
    );
}

#[tokio::test]
async fn test_custom_probe_from_config() {
    let sql = "SELECT metric_name, value FROM v$sysmetric WHERE group_id = 2";
    let db = full_database().with_rows(
        sql,
        vec![
            Row::new(vec![text("Buffer Cache Hit Ratio"), num(99.5)]),
            Row::new(vec![text("Executions Per Sec"), num(120.0)]),
        ],
    );
    let config = ExporterConfig::parse(
        r#"{
            collect: { sessions: false, tablespaces: false },
            custom_probes: [{
                name: "sysmetric",
                queries: [{
                    sql: "SELECT metric_name, value FROM v$sysmetric WHERE group_id = 2",
                    subsystem: "sysmetric",
                    shape: {
                        type: "name_in_value",
                        metrics: [{ name: "value", help: "Current system metric value." }]
                    }
                }]
            }]
        }"#,
    )
    .unwrap();
    let collector = create_collector(&db, &config);

    let output = collector.render();
    assert_eq!(
        series_value(&output, "oracle_sysmetric_buffer_cache_hit_ratio_value"),
        Some(99.5)
    );
    assert_eq!(
        series_value(&output, "oracle_sysmetric_executions_per_sec_value"),
        Some(120.0)
    );
    assert!(!output.contains("oracle_sessions_total"));
}

#[tokio::test]
async fn test_database_recovers_between_scrapes() {
    let db = full_database();
    let collector = create_collector(&db, &all_probes_config());

    db.set_reachable(false);
    let down = collector.render();
    assert_eq!(series_value(&down, "oracle_up"), Some(0.0));
    assert!(!down.contains("oracle_sessions_total"));

    db.set_reachable(true);
    let up = collector.render();
    assert_eq!(series_value(&up, "oracle_up"), Some(1.0));
    assert_eq!(
        series_value(&up, "oracle_exporter_last_scrape_error"),
        Some(0.0)
    );
    assert_eq!(series_value(&up, "oracle_exporter_scrapes_total"), Some(2.0));
    assert!(up.contains("oracle_sessions_total"));
}

#[tokio::test]
async fn test_http_server_metrics_endpoint() {
    let db = full_database();
    let collector = create_collector(&db, &all_probes_config());

    // Bind on a random port
    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let server = HttpServer::new(collector, addr, "/metrics".to_string())
        .bind()
        .await
        .unwrap();
    let actual_addr = server.local_addr();

    let server_handle = tokio::spawn(async move {
        let _ = server.serve(shutdown_rx).await;
    });

    let client = reqwest::Client::new();
    let response = client
        .get(format!("http://{}/metrics", actual_addr))
        .send()
        .await
        .unwrap();

    assert!(response.status().is_success());
    let body = response.text().await.unwrap();
    assert_eq!(series_value(&body, "oracle_up"), Some(1.0));
    assert!(body.contains("oracle_tablespaces_size_bytes{tablespace_name=\"SYSTEM\"}"));

    let landing = client
        .get(format!("http://{}/", actual_addr))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(landing.contains("/metrics"));

    // Shutdown server
    let _ = shutdown_tx.send(true);
    let _ = tokio::time::timeout(Duration::from_secs(1), server_handle).await;
}

#[tokio::test]
async fn test_bind_failure_is_an_error() {
    let collector = create_collector(&full_database(), &all_probes_config());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let taken = listener.local_addr().unwrap();

    let result = HttpServer::new(collector, taken, "/metrics".to_string())
        .bind()
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_concurrent_scrapes() {
    let db = full_database();
    let collector = create_collector(&db, &all_probes_config());

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let collector = collector.clone();
            tokio::task::spawn_blocking(move || collector.render())
        })
        .collect();

    for handle in handles {
        let output = handle.await.unwrap();
        assert_eq!(series_value(&output, "oracle_up"), Some(1.0));
    }

    assert_eq!(collector.stats().scrapes_total, 8);
    assert_eq!(db.open_connections(), 0);
}
