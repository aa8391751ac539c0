//! End-to-end tests for explode_and_reencrypt.

mod support;

use pretty_assertions::assert_eq;
use proptest::prelude::*;
use reseal_crypto::DecryptionFactory;
use reseal_pipeline::{
    explode_and_reencrypt, FailureKind, PipelineConfig, PipelineError, RunSummary, Stage,
};
use reseal_sink::{FsEntityStrategy, FsStrategyConfig, MemoryEntityStrategy, SinkEvent};
use std::fs;
use std::path::Path;
use support::*;
use tempfile::TempDir;

fn config(buffer_size: usize) -> PipelineConfig {
    PipelineConfig { buffer_size }
}

fn names(events: &[SinkEvent], pick: fn(&SinkEvent) -> Option<&String>) -> Vec<String> {
    events.iter().filter_map(pick).cloned().collect()
}

fn opened(event: &SinkEvent) -> Option<&String> {
    match event {
        SinkEvent::Open(name) => Some(name),
        _ => None,
    }
}

#[test]
fn reencrypted_entries_decrypt_to_the_originals() {
    let keyring = keyring();
    let big = noise(200 * 1024, 7);
    let archive = zip(&[
        Item::Dir("dir/"),
        Item::Deflated("dir/a.txt", &b"hello"[..]),
        Item::Stored("b.txt", &b"world"[..]),
        Item::Deflated("big.bin", &big),
    ]);

    let mut sink = MemoryEntityStrategy::new();
    let summary = explode_and_reencrypt(
        &archive[..],
        &mut sink,
        &encryption_factory(&keyring),
        &config(4096),
    )
    .unwrap();

    assert_eq!(
        summary,
        RunSummary {
            files: 3,
            directories: 1,
            bytes: 10 + big.len() as u64,
        }
    );
    assert_eq!(open(&keyring, &sink.file("dir/a.txt").unwrap()), b"hello");
    assert_eq!(open(&keyring, &sink.file("b.txt").unwrap()), b"world");
    assert_eq!(open(&keyring, &sink.file("big.bin").unwrap()), big);
    assert_eq!(sink.directories(), vec!["dir".to_string()]);
}

#[test]
fn decrypting_reader_as_source() {
    let keyring = keyring();
    let archive = zip(&[
        Item::Deflated("x/one.txt", &b"one"[..]),
        Item::Deflated("x/two.txt", &noise(5000, 2)),
    ]);
    let incoming = seal(&keyring, &archive);

    let mut reader = DecryptionFactory::new(&keyring)
        .decrypt_and_verify(&incoming[..])
        .unwrap();
    let mut sink = MemoryEntityStrategy::new();
    let summary = explode_and_reencrypt(
        &mut reader,
        &mut sink,
        &encryption_factory(&keyring),
        &PipelineConfig::default(),
    )
    .unwrap();
    let verification = reader.finish().unwrap();

    assert_eq!(summary.files, 2);
    assert_eq!(verification.signer_user_id, "alice");
    assert_eq!(open(&keyring, &sink.file("x/one.txt").unwrap()), b"one");
    assert_eq!(open(&keyring, &sink.file("x/two.txt").unwrap()), noise(5000, 2));
}

#[test]
fn tampered_source_fails_as_decryption_before_any_output() {
    let keyring = keyring();
    let archive = zip(&[Item::Stored("a.txt", &noise(4000, 3))]);
    let mut incoming = seal(&keyring, &archive);
    // Inside the first frame's ciphertext.
    incoming[reseal_crypto::HEADER_LEN + 5 + 10] ^= 0x40;

    let reader = DecryptionFactory::new(&keyring)
        .decrypt_and_verify(&incoming[..])
        .unwrap();
    let mut sink = MemoryEntityStrategy::new();
    let err = explode_and_reencrypt(reader, &mut sink, &RecordingFactory::default(), &config(512))
        .unwrap_err();

    assert_eq!(err.kind(), FailureKind::Decryption);
    assert!(matches!(err, PipelineError::Archive { after: None, .. }));
    assert!(sink.events().is_empty());
}

#[test]
fn bad_source_signature_fails_after_the_last_entry() {
    let keyring = keyring();
    let mut archive = raw_stored(&[("a.txt", &b"hello"[..]), ("b.txt", &b"world"[..])]);
    // A central directory spanning several frames, so the signed trailer is
    // only reached once both entries are done.
    archive.extend_from_slice(b"PK\x01\x02");
    archive.extend_from_slice(&[0u8; 4 * CHUNK]);
    let mut incoming = seal(&keyring, &archive);
    let last = incoming.len() - 1;
    incoming[last] ^= 0x01;

    let mut reader = DecryptionFactory::new(&keyring)
        .decrypt_and_verify(&incoming[..])
        .unwrap();
    let mut sink = MemoryEntityStrategy::new();
    let err = explode_and_reencrypt(
        &mut reader,
        &mut sink,
        &RecordingFactory::default(),
        &config(512),
    )
    .unwrap_err();

    assert_eq!(err.kind(), FailureKind::Signature);
    assert!(
        matches!(err, PipelineError::Archive { after: Some(1), .. }),
        "{err:?}"
    );
    // Entries are released before the trailing signature can be checked.
    assert_eq!(finalized_count(&sink), 2);
    assert!(!reader.is_verified());
}

#[test]
fn interrupted_source_reads_are_retried() {
    let big = noise(20_000, 11);
    let archive = zip(&[
        Item::Dir("d/"),
        Item::Deflated("d/big.bin", &big),
        Item::Stored("after.txt", &b"after"[..]),
    ]);
    let mut source = FlakySource::new(archive);
    source.interrupt_every = Some(3);

    let mut sink = MemoryEntityStrategy::new();
    let summary = explode_and_reencrypt(
        source,
        &mut sink,
        &RecordingFactory::default(),
        &config(256),
    )
    .unwrap();

    assert_eq!(summary.files, 2);
    assert_eq!(sink.file("d/big.bin").unwrap(), big);
    assert_eq!(sink.file("after.txt").unwrap(), b"after");
}

#[test]
fn source_failing_mid_entry_ends_the_run_as_io() {
    let archive = zip(&[
        Item::Deflated("big.bin", &noise(20_000, 12)),
        Item::Stored("after.txt", &b"after"[..]),
    ]);
    let mut source = FlakySource::new(archive);
    source.fail_at = Some(10_000);
    source.interrupt_every = Some(4);

    let mut sink = MemoryEntityStrategy::new();
    let err = explode_and_reencrypt(
        source,
        &mut sink,
        &RecordingFactory::default(),
        &config(256),
    )
    .unwrap_err();

    assert_eq!(err.kind(), FailureKind::Io);
    assert_eq!(err.entry_index(), Some(0));
    assert!(err.to_string().contains("source went away"), "{err}");
    assert_eq!(finalized_count(&sink), 0);
}

#[test]
fn root_directory_entry_is_counted_but_creates_nothing() {
    let archive = raw_stored(&[("./", &b""[..]), ("a.txt", &b"hello"[..])]);
    let temp = TempDir::new().unwrap();
    let mut sink = FsEntityStrategy::new(temp.path(), FsStrategyConfig::default()).unwrap();

    let summary = explode_and_reencrypt(
        &archive[..],
        &mut sink,
        &RecordingFactory::default(),
        &PipelineConfig::default(),
    )
    .unwrap();

    assert_eq!(
        summary,
        RunSummary {
            files: 1,
            directories: 1,
            bytes: 5,
        }
    );
    assert_eq!(listing(temp.path()), vec!["a.txt.rsl".to_string()]);
}

#[test]
fn every_entry_reaches_the_sink_in_archive_order() {
    let bodies: Vec<Vec<u8>> = (0..12).map(|i| noise(100 + i * 37, i as u32)).collect();
    let entry_names: Vec<String> = (0..12).map(|i| format!("d{}/f{i:02}.bin", i % 3)).collect();
    let mut items = Vec::new();
    for (name, body) in entry_names.iter().zip(&bodies) {
        items.push(Item::Deflated(name, body));
    }
    let archive = zip(&items);

    let mut sink = MemoryEntityStrategy::new();
    let factory = RecordingFactory::default();
    let summary = explode_and_reencrypt(&archive[..], &mut sink, &factory, &config(64)).unwrap();

    assert_eq!(summary.entries(), 12);
    assert_eq!(names(&sink.events(), opened), entry_names);
    for (name, body) in entry_names.iter().zip(&bodies) {
        assert_eq!(&sink.file(name).unwrap(), body);
    }
}

#[test]
fn traversal_aborts_and_nothing_escapes_the_root() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("out");
    let archive = raw_stored(&[
        ("ok.txt", &b"fine"[..]),
        ("../../etc/passwd", &b"root:x:0:0"[..]),
        ("later.txt", &b"never"[..]),
    ]);

    let mut sink = FsEntityStrategy::new(&root, FsStrategyConfig::default()).unwrap();
    let err = explode_and_reencrypt(
        &archive[..],
        &mut sink,
        &RecordingFactory::default(),
        &PipelineConfig::default(),
    )
    .unwrap_err();

    assert_eq!(err.kind(), FailureKind::UnsafePath);
    assert_eq!(err.stage(), Some(Stage::OpeningSink));
    assert_eq!(err.entry_index(), Some(1));
    assert_eq!(fs::read(root.join("ok.txt.rsl")).unwrap(), b"fine");
    assert!(!root.join("later.txt.rsl").exists());
    let mut outside: Vec<String> = fs::read_dir(temp.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    outside.sort();
    assert_eq!(outside, vec!["out"]);
}

#[test]
fn absolute_names_are_unsafe() {
    let archive = raw_stored(&[("/etc/passwd", &b"root:x:0:0"[..])]);
    let mut sink = MemoryEntityStrategy::new();
    let err = explode_and_reencrypt(
        &archive[..],
        &mut sink,
        &RecordingFactory::default(),
        &PipelineConfig::default(),
    )
    .unwrap_err();

    assert_eq!(err.kind(), FailureKind::UnsafePath);
    assert!(sink.events().is_empty());
}

#[test]
fn writes_stay_within_the_buffer_for_large_entries() {
    let big = noise(3 * 1024 * 1024, 11);
    let archive = zip(&[Item::Deflated("big.bin", &big)]);

    let factory = RecordingFactory::default();
    let mut sink = MemoryEntityStrategy::new();
    let summary = explode_and_reencrypt(&archive[..], &mut sink, &factory, &config(8192)).unwrap();

    assert_eq!(summary.bytes, big.len() as u64);
    assert!(factory.largest_write() <= 8192, "{}", factory.largest_write());
    assert!(factory.largest_write() > 0);
}

#[test]
fn cipher_frames_bound_sink_writes() {
    let keyring = keyring();
    let big = noise(2 * 1024 * 1024, 5);
    let archive = zip(&[Item::Stored("big.bin", &big)]);

    let mut sink = MemoryEntityStrategy::new();
    explode_and_reencrypt(
        &archive[..],
        &mut sink,
        &encryption_factory(&keyring),
        &PipelineConfig::default(),
    )
    .unwrap();

    assert!(sink.largest_write() <= CHUNK + TAG, "{}", sink.largest_write());
    assert_eq!(open(&keyring, &sink.file("big.bin").unwrap()), big);
}

#[test]
fn truncated_last_entry_is_corrupt_and_never_finalized() {
    let tail = b"TAIL".repeat(1000);
    let mut archive = zip(&[Item::Stored("a.txt", &b"first"[..]), Item::Stored("tail.bin", &tail)]);
    let start = archive
        .windows(8)
        .position(|w| w == b"TAILTAIL")
        .unwrap();
    archive.truncate(start + 100);

    let mut sink = MemoryEntityStrategy::new();
    let err = explode_and_reencrypt(
        &archive[..],
        &mut sink,
        &RecordingFactory::default(),
        &PipelineConfig::default(),
    )
    .unwrap_err();

    assert_eq!(err.kind(), FailureKind::CorruptArchive);
    assert_eq!(err.stage(), Some(Stage::Copying));
    assert_eq!(err.entry_index(), Some(1));
    assert_eq!(
        sink.events(),
        vec![
            SinkEvent::Open("a.txt".into()),
            SinkEvent::Finalize("a.txt".into()),
            SinkEvent::Open("tail.bin".into()),
            SinkEvent::Discard("tail.bin".into()),
        ]
    );
    assert!(sink.file("tail.bin").is_none());
}

#[test]
fn garbage_between_entries_reports_the_last_good_entry() {
    let mut archive = raw_stored(&[("a.txt", &b"first"[..])]);
    archive.extend_from_slice(b"JUNKJUNKJUNKJUNKJUNKJUNKJUNKJUNK");

    let mut sink = MemoryEntityStrategy::new();
    let err = explode_and_reencrypt(
        &archive[..],
        &mut sink,
        &RecordingFactory::default(),
        &PipelineConfig::default(),
    )
    .unwrap_err();

    assert!(matches!(err, PipelineError::Archive { after: Some(0), .. }));
    assert_eq!(err.kind(), FailureKind::CorruptArchive);
    assert_eq!(sink.file("a.txt").unwrap(), b"first");
}

#[test]
fn example_archive_on_the_filesystem() {
    let keyring = keyring();
    let temp = TempDir::new().unwrap();
    let archive = zip(&[
        Item::Dir("dir/"),
        Item::Deflated("dir/a.txt", &b"hello"[..]),
        Item::Deflated("b.txt", &b"world"[..]),
    ]);

    let mut sink = FsEntityStrategy::new(temp.path(), FsStrategyConfig::default()).unwrap();
    let summary = explode_and_reencrypt(
        &archive[..],
        &mut sink,
        &encryption_factory(&keyring),
        &PipelineConfig::default(),
    )
    .unwrap();

    assert_eq!(summary.files, 2);
    assert_eq!(summary.directories, 1);
    let read = |rel: &str| fs::read(temp.path().join(rel)).unwrap();
    assert_eq!(open(&keyring, &read("dir/a.txt.rsl")), b"hello");
    assert_eq!(open(&keyring, &read("b.txt.rsl")), b"world");
    assert_eq!(listing(temp.path()), vec!["b.txt.rsl", "dir", "dir/a.txt.rsl"]);
}

fn listing(root: &Path) -> Vec<String> {
    let mut out = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in fs::read_dir(&dir).unwrap() {
            let path = entry.unwrap().path();
            out.push(
                path.strip_prefix(root)
                    .unwrap()
                    .to_string_lossy()
                    .replace('\\', "/"),
            );
            if path.is_dir() {
                pending.push(path);
            }
        }
    }
    out.sort();
    out
}

#[test]
fn trailer_is_written_before_the_target_is_finalized() {
    let archive = zip(&[
        Item::Stored("a", &b"1"[..]),
        Item::Dir("d/"),
        Item::Stored("d/b", &b"2"[..]),
        Item::Deflated("c", &b"3"[..]),
    ]);

    let mut sink = MemoryEntityStrategy::new();
    let factory = RecordingFactory::observing(&sink);
    explode_and_reencrypt(&archive[..], &mut sink, &factory, &PipelineConfig::default()).unwrap();

    assert_eq!(
        factory.log(),
        vec![
            "open 0",
            "finish 0 (finalized so far: 0)",
            "open 1",
            "finish 1 (finalized so far: 1)",
            "open 2",
            "finish 2 (finalized so far: 2)",
        ]
    );
    assert_eq!(finalized_count(&sink), 3);
}

#[test]
fn failed_trailer_discards_the_target_and_stops() {
    let archive = zip(&[
        Item::Stored("a", &b"1"[..]),
        Item::Stored("b", &b"2"[..]),
        Item::Stored("c", &b"3"[..]),
    ]);

    let mut sink = MemoryEntityStrategy::new();
    let factory = RecordingFactory {
        fail_finish_at: Some(1),
        ..RecordingFactory::default()
    };
    let err = explode_and_reencrypt(&archive[..], &mut sink, &factory, &PipelineConfig::default())
        .unwrap_err();

    assert_eq!(err.stage(), Some(Stage::SealingCipher));
    assert_eq!(err.kind(), FailureKind::Encryption);
    assert_eq!(
        sink.events(),
        vec![
            SinkEvent::Open("a".into()),
            SinkEvent::Finalize("a".into()),
            SinkEvent::Open("b".into()),
            SinkEvent::Discard("b".into()),
        ]
    );
}

#[test]
fn duplicate_names_collide() {
    let archive = raw_stored(&[("dup.txt", &b"1"[..]), ("dup.txt", &b"2"[..])]);
    let mut sink = MemoryEntityStrategy::new();
    let err = explode_and_reencrypt(
        &archive[..],
        &mut sink,
        &RecordingFactory::default(),
        &PipelineConfig::default(),
    )
    .unwrap_err();

    assert_eq!(err.kind(), FailureKind::Sink);
    assert_eq!(err.entry_index(), Some(1));
    assert_eq!(sink.file("dup.txt").unwrap(), b"1");
}

#[test]
fn sink_write_failure_is_io() {
    let archive = zip(&[Item::Stored("a.bin", &noise(10_000, 9))]);
    let mut sink = FullDisk { limit: 4096 };
    let err = explode_and_reencrypt(
        &archive[..],
        &mut sink,
        &RecordingFactory::default(),
        &config(1024),
    )
    .unwrap_err();

    assert_eq!(err.kind(), FailureKind::Io);
    assert_eq!(err.stage(), Some(Stage::Copying));
    assert!(err.to_string().contains("no space left"), "{err}");
}

#[test]
fn zero_buffer_is_rejected() {
    let mut sink = MemoryEntityStrategy::new();
    let err = explode_and_reencrypt(
        &b""[..],
        &mut sink,
        &RecordingFactory::default(),
        &config(0),
    )
    .unwrap_err();

    assert_eq!(err.kind(), FailureKind::Config);
    assert!(sink.events().is_empty());
}

#[test]
fn empty_archive_is_an_empty_run() {
    let archive = zip(&[]);
    let mut sink = MemoryEntityStrategy::new();
    let summary = explode_and_reencrypt(
        &archive[..],
        &mut sink,
        &RecordingFactory::default(),
        &PipelineConfig::default(),
    )
    .unwrap();
    assert_eq!(summary, RunSummary::default());
}

#[test]
fn config_deserializes_with_defaults() {
    let config: PipelineConfig = serde_json::from_str("{}").unwrap();
    assert_eq!(config, PipelineConfig::default());
    assert_eq!(config.buffer_size, 64 * 1024);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn random_archives_survive_the_pipeline(
        bodies in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..3000), 1..8),
        buffer_size in 1usize..5000,
    ) {
        let entry_names: Vec<String> = (0..bodies.len()).map(|i| format!("p/{i}.bin")).collect();
        let items: Vec<Item<'_>> = entry_names
            .iter()
            .zip(&bodies)
            .enumerate()
            .map(|(i, (name, body))| {
                if i % 2 == 0 {
                    Item::Deflated(name, body)
                } else {
                    Item::Stored(name, body)
                }
            })
            .collect();
        let archive = zip(&items);

        let mut sink = MemoryEntityStrategy::new();
        let factory = RecordingFactory::default();
        let summary =
            explode_and_reencrypt(&archive[..], &mut sink, &factory, &config(buffer_size)).unwrap();

        prop_assert_eq!(summary.files, bodies.len());
        prop_assert!(factory.largest_write() <= buffer_size);
        for (name, body) in entry_names.iter().zip(&bodies) {
            prop_assert_eq!(&sink.file(name).unwrap(), body);
        }
    }
}
