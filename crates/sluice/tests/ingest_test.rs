//! End-to-end ingest over a local intake directory.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use flate2::Compression;
use flate2::write::GzEncoder;
use std::io::Write;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use sluice::config::Config;
use sluice::mapping::RowMapper;
use sluice::pipeline::IngestPipeline;
use sluice::publish::MemoryPublisher;
use sluice::source;
use sluice_core::storage::{BackendRef, LocalBackend};

fn write_gz(dir: &Path, name: &str, text: &str) {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(text.as_bytes()).unwrap();
    std::fs::write(dir.join(name), encoder.finish().unwrap()).unwrap();
}

fn names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}

struct Intake {
    _temp: TempDir,
    input: std::path::PathBuf,
    ready: std::path::PathBuf,
    quarantine: std::path::PathBuf,
    config: Config,
}

fn intake() -> Intake {
    let temp = TempDir::new().unwrap();
    let input = temp.path().join("in");
    let ready = temp.path().join("ready");
    let quarantine = temp.path().join("quarantine");
    std::fs::create_dir(&input).unwrap();
    std::fs::create_dir(&ready).unwrap();

    let yaml = format!(
        r#"
source:
  input_dir: "{}"
  ready_dir: "{}"
  quarantine_dir: "{}"
  wait_interval_secs: 1
  order: lexical
  max_open_failures: 1
"#,
        input.display(),
        ready.display(),
        quarantine.display()
    );
    let config = Config::parse(&yaml).unwrap();

    Intake {
        _temp: temp,
        input,
        ready,
        quarantine,
        config,
    }
}

async fn wait_for(mut done: impl FnMut() -> bool) {
    for _ in 0..100 {
        if done() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("condition not reached within 10s");
}

fn spawn_pipeline(
    intake: &Intake,
    publisher: &MemoryPublisher,
    shutdown: &CancellationToken,
) -> tokio::task::JoinHandle<sluice::IngestStats> {
    let backend: BackendRef = Arc::new(LocalBackend::new());
    let record_source = source::from_config(intake.config.source().unwrap(), backend).unwrap();
    let mapper = RowMapper::new(intake.config.schema.clone()).unwrap();
    let pipeline = IngestPipeline::new(record_source, mapper, publisher.clone());
    tokio::spawn(pipeline.run(shutdown.clone()))
}

#[tokio::test]
async fn test_files_are_published_then_archived() {
    let intake = intake();
    write_gz(&intake.input, "a.csv.gz", "01/02/20-03:04:05,01/02/20-04:05:06,5551234567\n");
    write_gz(&intake.input, "b.csv.gz", ",,1\n,,2\n");

    let publisher = MemoryPublisher::new();
    let shutdown = CancellationToken::new();
    let handle = spawn_pipeline(&intake, &publisher, &shutdown);

    wait_for(|| names(&intake.ready).len() == 2).await;
    shutdown.cancel();
    let stats = handle.await.unwrap();

    assert_eq!(names(&intake.input), Vec::<String>::new());
    assert_eq!(names(&intake.ready), vec!["a.csv.gz", "b.csv.gz"]);
    assert_eq!(stats.rows_read, 3);
    assert_eq!(stats.rows_published, 3);
    assert_eq!(stats.files_finished, 2);

    let mapper = RowMapper::new(intake.config.schema.clone()).unwrap();
    let rows: Vec<Vec<String>> = publisher
        .payloads()
        .iter()
        .map(|p| mapper.decode(p).unwrap())
        .collect();
    assert_eq!(
        rows,
        vec![
            vec!["1577934245", "1577937906", "5551234567"],
            vec!["", "", "1"],
            vec!["", "", "2"],
        ]
    );
}

#[tokio::test]
async fn test_late_arrivals_are_picked_up() {
    let intake = intake();
    let publisher = MemoryPublisher::new();
    let shutdown = CancellationToken::new();
    let handle = spawn_pipeline(&intake, &publisher, &shutdown);

    tokio::time::sleep(Duration::from_millis(300)).await;
    write_gz(&intake.input, "late.csv.gz", ",,7\n");

    wait_for(|| names(&intake.ready) == vec!["late.csv.gz"]).await;
    shutdown.cancel();
    let stats = handle.await.unwrap();

    assert_eq!(stats.rows_published, 1);
    assert_eq!(publisher.len(), 1);
}

#[tokio::test]
async fn test_uncompressed_file_is_quarantined() {
    let intake = intake();
    std::fs::write(intake.input.join("plain.csv"), "1,2,3\n").unwrap();
    write_gz(&intake.input, "z.csv.gz", ",,9\n");

    let publisher = MemoryPublisher::new();
    let shutdown = CancellationToken::new();
    let handle = spawn_pipeline(&intake, &publisher, &shutdown);

    wait_for(|| names(&intake.quarantine) == vec!["plain.csv"] && names(&intake.ready) == vec!["z.csv.gz"]).await;
    shutdown.cancel();
    let stats = handle.await.unwrap();

    assert_eq!(stats.rows_published, 1);
    assert_eq!(names(&intake.input), Vec::<String>::new());
}

#[tokio::test]
async fn test_awkward_file_names_are_delivered() {
    let intake = intake();
    let names_on_disk = ["calls[1].gz", "x%20y.gz", "a b~c.gz", "hits.gz#42"];
    for (i, name) in names_on_disk.iter().enumerate() {
        write_gz(&intake.input, name, &format!(",,{i}\n"));
    }

    let publisher = MemoryPublisher::new();
    let shutdown = CancellationToken::new();
    let handle = spawn_pipeline(&intake, &publisher, &shutdown);

    wait_for(|| names(&intake.ready).len() == names_on_disk.len()).await;
    shutdown.cancel();
    let stats = handle.await.unwrap();

    let mut expected: Vec<String> = names_on_disk.iter().map(|n| n.to_string()).collect();
    expected.sort();
    assert_eq!(names(&intake.ready), expected);
    assert_eq!(names(&intake.input), Vec::<String>::new());
    assert_eq!(names(&intake.quarantine), Vec::<String>::new());
    assert_eq!(stats.rows_published, 4);
}
