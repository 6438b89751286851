//! End-to-end pipeline tests through the public API
//!
//! - ingest → gap fill → aggregate on in-memory stores
//! - full `run_once` passes over a temporary capture directory

use arpflow::pipeline::{
    Aggregator, CountMethod, CountSample, CountStore, GapFiller, Ingestor, Observation,
    ObservationStore, Origin, PipelineConfig, PipelineEngine, RetentionManager,
    SqliteCountStore, SqliteObservationStore,
};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use tempfile::tempdir;

const W: i64 = 1800;
const T10_00: i64 = 1_689_933_600; // 2023-07-21 10:00:00 UTC
const T10_30: i64 = T10_00 + W;
const T11_00: i64 = T10_00 + 2 * W;

fn set(addresses: &[&str]) -> BTreeSet<String> {
    addresses.iter().map(|a| a.to_string()).collect()
}

/// Little-endian microsecond pcap, one ARP frame per source address
fn pcap_bytes(sources: &[[u8; 6]]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&0xa1b2_c3d4u32.to_le_bytes());
    out.extend_from_slice(&2u16.to_le_bytes());
    out.extend_from_slice(&4u16.to_le_bytes());
    out.extend_from_slice(&[0u8; 8]);
    out.extend_from_slice(&65535u32.to_le_bytes());
    out.extend_from_slice(&1u32.to_le_bytes());

    for src in sources {
        let mut frame = vec![0xff; 6];
        frame.extend_from_slice(src);
        frame.extend_from_slice(&[0x08, 0x06]);
        frame.extend_from_slice(&[0u8; 28]);

        out.extend_from_slice(&[0u8; 8]);
        out.extend_from_slice(&(frame.len() as u32).to_le_bytes());
        out.extend_from_slice(&(frame.len() as u32).to_le_bytes());
        out.extend_from_slice(&frame);
    }
    out
}

fn config(root: &Path) -> PipelineConfig {
    PipelineConfig {
        capture_dir: root.join("pcap_files"),
        capture_extension: "pcap".to_string(),
        db_path: root.join("mac.db"),
        count_db_path: root.join("count.db"),
        bucket_secs: W,
        forward_buckets: 3,
        max_gap_buckets: 4,
        interpolation_max_gap_secs: 7200,
        aggregation_cutoff_secs: 0,
        retention_horizon_secs: 100 * 3600,
        workers: 4,
        upgrade_synthetic: true,
        gap_fill_enabled: true,
        counting_enabled: true,
        min_capture_year: 2020,
        count_floor_year: 2000,
    }
}

#[tokio::test]
async fn test_scenario_with_forward_extrapolation() {
    let observations = Arc::new(SqliteObservationStore::open_in_memory().unwrap());
    let counts = Arc::new(SqliteCountStore::open_in_memory().unwrap());
    let ingestor = Ingestor::new(observations.clone(), W, 3, true);

    ingestor.ingest(T10_00, &set(&["a", "b"])).await.unwrap();
    ingestor.ingest(T11_00, &set(&["a"])).await.unwrap();
    GapFiller::new(observations.clone(), W, 4).fill_gaps().await.unwrap();

    let rows = observations.observations().await.unwrap();
    assert!(rows.contains(&Observation::new(T10_30, "b", Origin::Synthetic)));
    assert!(rows.contains(&Observation::new(T11_00, "a", Origin::Original)));

    // "b" is carried forward to 11:00 by extrapolation from 10:00
    Aggregator::new(observations.clone(), counts.clone())
        .aggregate(T11_00 + W)
        .await
        .unwrap();
    assert_eq!(
        counts.samples().await.unwrap(),
        vec![
            CountSample::new(T10_00, 2, CountMethod::Original),
            CountSample::new(T10_30, 2, CountMethod::Original),
            CountSample::new(T11_00, 2, CountMethod::Original),
        ]
    );
}

#[tokio::test]
async fn test_scenario_gap_fill_only() {
    let observations = Arc::new(SqliteObservationStore::open_in_memory().unwrap());
    let counts = Arc::new(SqliteCountStore::open_in_memory().unwrap());
    let ingestor = Ingestor::new(observations.clone(), W, 0, true);

    ingestor.ingest(T10_00, &set(&["a", "b"])).await.unwrap();
    ingestor.ingest(T11_00, &set(&["a"])).await.unwrap();
    let filled = GapFiller::new(observations.clone(), W, 4).fill_gaps().await.unwrap();

    // only "a" has a second sighting to bridge to
    assert_eq!(filled, 1);
    assert_eq!(
        observations.observations().await.unwrap(),
        vec![
            Observation::new(T10_00, "a", Origin::Original),
            Observation::new(T10_00, "b", Origin::Original),
            Observation::new(T10_30, "a", Origin::Synthetic),
            Observation::new(T11_00, "a", Origin::Original),
        ]
    );

    Aggregator::new(observations.clone(), counts.clone())
        .aggregate(T11_00 + W)
        .await
        .unwrap();
    assert_eq!(
        counts.samples().await.unwrap(),
        vec![
            CountSample::new(T10_00, 2, CountMethod::Original),
            CountSample::new(T10_30, 1, CountMethod::Original),
            CountSample::new(T11_00, 1, CountMethod::Original),
        ]
    );

    // raw rows go, the summary stays
    let retention = RetentionManager::new(observations.clone(), counts.clone());
    retention.evict(T11_00 + 10 * W, 3 * W).await.unwrap();
    assert!(observations.observations().await.unwrap().is_empty());
    assert_eq!(counts.samples().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_run_once_over_capture_directory() {
    let root = tempdir().unwrap();
    let config = config(root.path());
    let captures = config.capture_dir.clone();
    std::fs::create_dir_all(&captures).unwrap();

    let a = [0x02, 0, 0, 0, 0, 0x0a];
    let b = [0x02, 0, 0, 0, 0, 0x0b];
    let c = [0x02, 0, 0, 0, 0, 0x0c];

    std::fs::write(captures.join("arp_20230721095500.pcap"), pcap_bytes(&[a, b, a])).unwrap();
    std::fs::write(captures.join("arp_20230721110000.pcap"), pcap_bytes(&[a])).unwrap();
    std::fs::write(captures.join("arp_20190101000000.pcap"), pcap_bytes(&[c])).unwrap();
    std::fs::write(captures.join("arp_20230721113000.pcap"), b"not yet complete").unwrap();
    std::fs::write(captures.join("arp_20230721120000.pcap"), pcap_bytes(&[c])).unwrap();

    let engine = PipelineEngine::open(config.clone()).unwrap();
    let report = engine.run_once(T11_00 + W).await;

    assert_eq!(report.ingestion.files_selected, 4);
    assert_eq!(report.ingestion.files_ingested, 2);
    assert_eq!(report.ingestion.files_skipped, 1);
    assert_eq!(report.ingestion.read_failures, 1);
    assert!(report.failed_stages.is_empty());

    // failures and the newest capture stay for the next run
    assert!(captures.join("arp_20190101000000.pcap").exists());
    assert!(captures.join("arp_20230721113000.pcap").exists());
    assert!(captures.join("arp_20230721120000.pcap").exists());
    assert!(!captures.join("arp_20230721095500.pcap").exists());
    assert!(!captures.join("arp_20230721110000.pcap").exists());

    assert_eq!(report.aggregated_buckets, 3);
    drop(engine);

    let counts = SqliteCountStore::open(&config.count_db_path).unwrap();
    assert_eq!(
        counts.samples().await.unwrap(),
        vec![
            CountSample::new(T10_00, 2, CountMethod::Original),
            CountSample::new(T10_30, 2, CountMethod::Original),
            CountSample::new(T11_00, 2, CountMethod::Original),
        ]
    );

    // a later run on the same stores only sees what is left
    let engine = PipelineEngine::open(config).unwrap();
    std::fs::remove_file(captures.join("arp_20230721113000.pcap")).unwrap();
    let second = engine.run_once(T11_00 + W).await;
    assert_eq!(second.ingestion.files_selected, 1);
    assert_eq!(second.ingestion.files_skipped, 1);
    assert_eq!(second.ingestion.original_rows, 0);
}

#[tokio::test]
async fn test_late_retry_does_not_rewrite_evicted_counts() {
    let root = tempdir().unwrap();
    let config = config(root.path());
    let captures = config.capture_dir.clone();
    std::fs::create_dir_all(&captures).unwrap();

    let a = [0x02, 0, 0, 0, 0, 0x0a];
    let b = [0x02, 0, 0, 0, 0, 0x0b];
    let c = [0x02, 0, 0, 0, 0, 0x0c];

    // both land in the 10:30 bucket
    let late = captures.join("arp_20230721102000.pcap");
    std::fs::write(captures.join("arp_20230721101000.pcap"), pcap_bytes(&[a, b, c])).unwrap();
    std::fs::write(&late, b"truncated").unwrap();
    // newest capture is never selected
    std::fs::write(captures.join("arp_20990101000000.pcap"), pcap_bytes(&[a])).unwrap();

    let engine = PipelineEngine::open(config).unwrap();

    let first = engine.run_once(T10_30 + 4 * W).await;
    assert_eq!(first.ingestion.files_ingested, 1);
    assert_eq!(first.ingestion.read_failures, 1);
    assert!(late.exists());

    let expected = vec![
        CountSample::new(T10_30, 3, CountMethod::Original),
        CountSample::new(T11_00, 3, CountMethod::Original),
    ];
    let head = |samples: Vec<CountSample>| samples.into_iter().take(2).collect::<Vec<_>>();

    // raw rows for 10:30 are evicted once the bucket is behind the horizon
    let evicting = engine.run_once(T10_30 + 200 * 3600).await;
    assert_eq!(evicting.ingestion.files_stale, 1);
    assert_eq!(evicting.ingestion.read_failures, 0);
    assert!(evicting.evicted_observations > 0);
    let counts = SqliteCountStore::open(&engine.config().count_db_path).unwrap();
    assert_eq!(head(counts.samples().await.unwrap()), expected);

    // the capture becomes readable but its bucket is gone
    std::fs::write(&late, pcap_bytes(&[a])).unwrap();
    let retry = engine.run_once(T10_30 + 201 * 3600).await;
    assert_eq!(retry.ingestion.files_stale, 1);
    assert_eq!(retry.ingestion.files_ingested, 0);
    assert_eq!(retry.ingestion.original_rows, 0);
    assert!(late.exists());
    assert_eq!(head(counts.samples().await.unwrap()), expected);
}
