use std::collections::HashSet;
use std::sync::Arc;

use serde_json::json;
use xviz_api::{Envelope, ErrorKind, ParserConfig, PointCloudField, Record};
use xviz_engine::{
    DecodePool, EnvelopeDecoder, Normalizer, PoolConfig, WorkerState, decode_off_thread,
    spawn_worker,
};

fn config() -> Arc<ParserConfig> {
    Arc::new(ParserConfig::default())
}

fn normalize_bytes(bytes: &[u8]) -> Vec<Record> {
    let config = config();
    let envelope = EnvelopeDecoder::new(&config).decode(bytes).unwrap();
    Normalizer::new(config).normalize(&envelope).unwrap()
}

#[test]
fn canonical_records_keep_count_and_order() {
    let input = json!([
        { "time": 3.0 },
        { "time": 1.0, "pointCloud": {
            "ids": [7], "colors": [1, 2, 3, 255], "normals": [0, 0, 1], "positions": [1, 2, 3]
        }},
        { "time": 2.0 },
    ]);
    let records = normalize_bytes(input.to_string().as_bytes());

    let times: Vec<f64> = records.iter().map(|r| r.time).collect();
    assert_eq!(times, vec![3.0, 1.0, 2.0]);
    assert!(records[0].point_cloud.is_none());
    assert_eq!(records[1].point_cloud.as_ref().unwrap().point_count(), 1);
}

#[test]
fn normalizing_twice_is_identity() {
    let input = json!([
        { "timestamp": 5.5, "points": [1, 2, 3, 4, 5, 6], "colors": [9, 9, 9, 9, 8, 8, 8, 8] },
        { "time": 6.0 },
    ]);
    let first = normalize_bytes(input.to_string().as_bytes());

    let canonical: Vec<_> = first.iter().map(Record::to_value).collect();
    let normalizer = Normalizer::new(config());
    let second = normalizer
        .normalize(&Envelope { elements: canonical })
        .unwrap();
    assert_eq!(first, second);
}

#[test]
fn legacy_fields_are_remapped() {
    let input = json!([
        { "timestamp": 1.0, "points": [1.5, 2.5, 3.5], "ids": [42] },
        { "timestamp": 2.0, "primitives": {
            "/lidar": [{ "type": "points3d", "vertices": [4, 5, 6], "colors": [10, 20, 30, 40] }]
        }},
    ]);
    let records = normalize_bytes(input.to_string().as_bytes());

    let flat = records[0].point_cloud.as_ref().unwrap();
    assert_eq!(flat.positions.to_f32_vec(), vec![1.5, 2.5, 3.5]);
    assert_eq!(flat.ids.to_u32_vec(), vec![42]);
    assert!(flat.normals.is_empty());

    let prim = records[1].point_cloud.as_ref().unwrap();
    assert_eq!(prim.positions.to_f32_vec(), vec![4.0, 5.0, 6.0]);
    assert_eq!(prim.colors.as_bytes(), &[10, 20, 30, 40]);
}

#[tokio::test]
async fn malformed_bytes_never_deliver_records() {
    let inputs: [&[u8]; 4] = [
        br#"[{"time": 1}, {"time": "#,
        b"[{time: 1}]",
        b"",
        &[0x5b, 0xff, 0x5d],
    ];
    for bytes in inputs {
        let err = decode_off_thread(config(), bytes.to_vec()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedSyntax, "{bytes:?}: {err}");
    }
}

#[tokio::test]
async fn records_without_clouds_move_nothing() {
    let delivery = decode_off_thread(config(), br#"[{"time": 1}, {"time": 2}]"#.to_vec())
        .await
        .unwrap();
    assert_eq!(delivery.records.len(), 2);
    assert!(delivery.manifest.is_empty());
    assert_eq!(delivery.manifest.byte_len(), 0);
}

#[tokio::test]
async fn manifest_lists_each_block_once_in_first_seen_order() {
    let input = json!([
        { "time": 1, "pointCloud": {
            "ids": [1], "colors": [1, 1, 1], "normals": [0, 0, 1], "positions": [0, 0, 0]
        }},
        { "time": 2 },
        { "time": 3, "pointCloud": {
            "ids": [2, 3], "colors": [], "normals": [], "positions": [1, 1, 1, 2, 2, 2]
        }},
    ]);
    let delivery = decode_off_thread(config(), input.to_string().into_bytes())
        .await
        .unwrap();

    let reachable: Vec<_> = delivery
        .records
        .iter()
        .filter_map(|r| r.point_cloud.as_ref())
        .flat_map(|cloud| cloud.blocks().map(|(_, b)| b.id()).collect::<Vec<_>>())
        .collect();
    let listed: Vec<_> = delivery.manifest.ids().collect();
    assert_eq!(listed, reachable);
    assert_eq!(listed.iter().collect::<HashSet<_>>().len(), 8);

    let records: Vec<_> = delivery.manifest.entries().iter().map(|e| e.record).collect();
    assert_eq!(records, vec![0, 0, 0, 0, 2, 2, 2, 2]);
}

#[tokio::test]
async fn single_record_blocks_are_relocated() {
    let payload = json!([{
        "time": 12345,
        "pointCloud": {
            "ids": [1, 2],
            "colors": [255, 0, 0, 255, 0, 255, 0, 255],
            "normals": [0, 0, 1, 0, 1, 0],
            "positions": [1.0, 2.0, 3.0, 4.0, 5.0, 6.0],
        }
    }]);

    let handle = spawn_worker(config());
    assert_eq!(handle.state(), WorkerState::Idle);
    let pending = handle.post(payload.to_string().into_bytes());
    let state = pending.watch_state();
    let delivery = pending.wait().await.unwrap();
    assert_eq!(*state.borrow(), WorkerState::Terminated);

    assert_eq!(delivery.records.len(), 1);
    assert_eq!(delivery.manifest.len(), 4);

    let record = &delivery.records[0];
    assert_eq!(record.time, 12345.0);
    let cloud = record.point_cloud.as_ref().unwrap();

    for (entry, (field, block)) in delivery.manifest.entries().iter().zip(cloud.blocks()) {
        assert_eq!(entry.field, field);
        assert_eq!(entry.id, block.id());
        assert_eq!(entry.byte_len, block.byte_len());
        // The receiver holds the only handle.
        assert_eq!(block.holders(), 1, "{field}");
    }
    assert_eq!(cloud.ids.to_u32_vec(), vec![1, 2]);
    assert_eq!(cloud.colors.len(), 8);
    assert_eq!(cloud.positions.to_f32_vec(), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);

    let mut records = delivery.into_records();
    let cloud = records.remove(0).point_cloud.unwrap();
    let positions = cloud.field(PointCloudField::Positions).clone();
    drop(cloud);
    assert_eq!(positions.into_vec().map(|v| v.len()).ok(), Some(24));
}

#[tokio::test]
async fn unknown_shape_is_reported_not_delivered() {
    let err = decode_off_thread(config(), br#"[{"time": 1}, {"frame": 2}]"#.to_vec())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnrecognizedSchema);
    assert!(err.message.contains("record 1"), "{}", err.message);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn pool_runs_messages_independently() {
    let pool = DecodePool::new(config(), &PoolConfig { max_in_flight: 3 });
    let payloads: Vec<Vec<u8>> = (0..10)
        .map(|i| json!([{ "timestamp": i, "points": [i, i, i] }]).to_string().into_bytes())
        .collect();

    let results = pool.decode_all(payloads).await.unwrap();
    for (i, result) in results.into_iter().enumerate() {
        let delivery = result.unwrap();
        assert_eq!(delivery.records[0].time, i as f64);
        assert_eq!(delivery.manifest.len(), 4);
    }
    assert_eq!(pool.available(), 3);
}
