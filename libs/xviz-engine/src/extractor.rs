use xviz_api::{Record, TransferManifest};

/// Harvest the memory blocks reachable from the records.
///
/// The records come back untouched. The manifest lists every distinct
/// block in first-seen order: ids, colors, normals, positions per record,
/// records in order. A block shared by several fields is listed once with
/// its reference count.
pub fn extract(records: Vec<Record>) -> (Vec<Record>, TransferManifest) {
    let mut manifest = TransferManifest::new();
    for (index, record) in records.iter().enumerate() {
        let Some(cloud) = &record.point_cloud else {
            continue;
        };
        for (field, block) in cloud.blocks() {
            manifest.note(block.id(), block.kind(), block.byte_len(), index, field);
        }
    }
    tracing::trace!(
        records = records.len(),
        blocks = manifest.len(),
        bytes = manifest.byte_len(),
        "extracted transfer manifest"
    );
    (records, manifest)
}
