use logship::error::ErrorKind;
use logship::source::lgp::{LgpLogSource, LgpSourceFactory};
use logship::source::{LogSource, LogSourceFactory};
use logship::test_utils::cluster::{TestCluster, lgp_record};
use logship::types::Checkpoint;

const FIRST_FILE: &str = "20240105000000.lgp";
const SECOND_FILE: &str = "20240106000000.lgp";

fn source_with_tenant() -> (TestCluster, LgpLogSource, logship::types::TenantId) {
    let mut cluster = TestCluster::new();
    let tenant = cluster.add_tenant("Accounting");
    let source = LgpLogSource::new(cluster.log_folder(tenant.id));

    (cluster, source, tenant.id)
}

#[tokio::test]
async fn records_are_read_across_rotated_files_in_order() {
    let (cluster, source, id) = source_with_tenant();
    cluster.append_records(
        id,
        FIRST_FILE,
        &[
            lgp_record("20240105090000", "first"),
            lgp_record("20240105090500", "second with {braces} and \"quotes\""),
        ],
    );
    cluster.append_records(id, SECOND_FILE, &[lgp_record("20240106000100", "third")]);

    let records = source.read(None, 100).await.unwrap();

    assert_eq!(records.len(), 3);
    assert_eq!(records[0].file_name, FIRST_FILE);
    assert!(records[0].payload.starts_with("{20240105090000,"));
    assert!(records[1].payload.contains("{braces} and \"\"quotes\"\""));
    assert_eq!(records[2].file_name, SECOND_FILE);
    assert_eq!(records[2].timestamp.to_string(), "2024-01-06 00:01:00");
    assert!(records[0].checkpoint() < records[1].checkpoint());
    assert!(records[1].checkpoint() < records[2].checkpoint());

    assert_eq!(
        source.oldest_position().await.unwrap(),
        Some(Checkpoint::new(FIRST_FILE, 0))
    );
    assert_eq!(
        source.tail_position().await.unwrap(),
        Some(records[2].checkpoint())
    );
}

#[tokio::test]
async fn reads_resume_after_a_checkpoint_and_honor_the_limit() {
    let (cluster, source, id) = source_with_tenant();
    let records: Vec<String> = (0..5)
        .map(|i| lgp_record(&format!("2024010509000{i}"), &format!("record {i}")))
        .collect();
    cluster.append_records(id, FIRST_FILE, &records);

    let head = source.read(None, 2).await.unwrap();
    assert_eq!(head.len(), 2);

    let rest = source.read(Some(&head[1].checkpoint()), 100).await.unwrap();
    assert_eq!(rest.len(), 3);
    assert!(rest[0].payload.contains("record 2"));

    let tail = source.read(Some(&rest[2].checkpoint()), 100).await.unwrap();
    assert!(tail.is_empty());
}

#[tokio::test]
async fn partial_record_in_the_newest_file_is_withheld_until_complete() {
    let (cluster, source, id) = source_with_tenant();
    cluster.append_records(id, FIRST_FILE, &[lgp_record("20240105090000", "complete")]);
    cluster.append_raw(id, FIRST_FILE, b",\r\n{20240105090100,N,\r\n{1");

    let records = source.read(None, 100).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(
        source.tail_position().await.unwrap(),
        Some(records[0].checkpoint())
    );

    cluster.append_raw(id, FIRST_FILE, b"}}");

    let records = source.read(Some(&records[0].checkpoint()), 100).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].timestamp.to_string(), "2024-01-05 09:01:00");
}

#[tokio::test]
async fn truncated_record_in_a_rotated_file_is_malformed() {
    let (cluster, source, id) = source_with_tenant();
    cluster.append_records(id, FIRST_FILE, &[lgp_record("20240105090000", "complete")]);
    cluster.append_raw(id, FIRST_FILE, b",\r\n{20240105090100,N,{1");
    cluster.append_records(id, SECOND_FILE, &[lgp_record("20240106000100", "next")]);

    let err = source.read(None, 100).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::MalformedLogData);
}

#[tokio::test]
async fn invalid_timestamp_is_malformed() {
    let (cluster, source, id) = source_with_tenant();
    cluster.append_records(id, FIRST_FILE, &[lgp_record("20241305090000", "bad month")]);

    let err = source.read(None, 100).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::MalformedLogData);
}

#[tokio::test]
async fn folder_without_data_files_has_no_positions() {
    let (_cluster, source, _id) = source_with_tenant();

    assert!(source.oldest_position().await.unwrap().is_none());
    assert!(source.tail_position().await.unwrap().is_none());
    assert!(source.read(None, 100).await.unwrap().is_empty());
}

#[tokio::test]
async fn cursor_in_a_removed_file_continues_with_the_next_file() {
    let (cluster, source, id) = source_with_tenant();
    cluster.append_records(
        id,
        FIRST_FILE,
        &[
            lgp_record("20240105090000", "first"),
            lgp_record("20240105090500", "second"),
        ],
    );

    let cursor = Checkpoint::new("20240101000000.lgp", 4096);
    let records = source.read(Some(&cursor), 100).await.unwrap();

    assert_eq!(records.len(), 2);
    assert_eq!(records[0].file_name, FIRST_FILE);
}

#[tokio::test]
async fn missing_folder_is_unavailable() {
    let cluster = TestCluster::new();
    let source = LgpLogSource::new(cluster.path().join("missing"));

    let err = source.read(None, 100).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::SourceUnavailable);
}

#[test]
fn only_legacy_folders_are_supported() {
    let mut cluster = TestCluster::new();
    let legacy = cluster.add_tenant("Accounting");
    let sqlite = cluster.add_sqlite_tenant("Warehouse");

    assert!(LgpSourceFactory.is_supported(&cluster.log_folder(legacy.id)));
    assert!(!LgpSourceFactory.is_supported(&cluster.log_folder(sqlite.id)));
}
