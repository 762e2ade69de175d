use std::fs;
use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use anyhow::{Context, anyhow};
use rivulet_config::Settings;
use rivulet_events::{Event, EventStream, PauseReason};
use rivulet_service::{
    CancellationToken, InfoHash, Priority, Service, ServiceError, SpaceProbe, Torrent,
    TorrentState,
};
use rivulet_torrent_core::{Alert, AlertCategory, AlertKind, Engine, TorrentHandle};
use rivulet_torrent_mem::{MemoryEngine, MemoryHandle, build_metainfo};
use tempfile::TempDir;

const MAGNET: &str = "magnet:?xt=urn:btih:c12fe1c06bba254a9dc9f519b335aa7c1367a88a&dn=clip";
const WAIT: Duration = Duration::from_secs(5);

struct FixedSpace(u64);

impl SpaceProbe for FixedSpace {
    fn available_space(&self, _path: &Path) -> io::Result<u64> {
        Ok(self.0)
    }
}

struct Harness {
    dir: TempDir,
    engine: Arc<MemoryEngine>,
    service: Service,
}

impl Harness {
    async fn start() -> anyhow::Result<Self> {
        Self::start_with(|_| {}, u64::MAX).await
    }

    async fn start_with(tweak: impl FnOnce(&mut Settings), space: u64) -> anyhow::Result<Self> {
        let dir = tempfile::tempdir()?;
        let mut settings = settings_in(dir.path());
        tweak(&mut settings);
        let engine = Arc::new(MemoryEngine::new());
        let service = start_service(settings, &engine, space).await?;
        Ok(Self {
            dir,
            engine,
            service,
        })
    }

    fn handle(&self, info_hash: &InfoHash) -> anyhow::Result<Arc<MemoryHandle>> {
        self.engine
            .handle(info_hash)
            .ok_or_else(|| anyhow!("engine lost {info_hash}"))
    }

    fn sidecar(&self, info_hash: &InfoHash, ext: &str) -> PathBuf {
        self.service
            .settings()
            .torrents_path
            .join(format!("{}.{ext}", info_hash.to_hex()))
    }

    /// Adds the single-file "movie.mp4" torrent: 100 bytes in 16-byte pieces.
    async fn add_movie(&self, start: bool) -> anyhow::Result<InfoHash> {
        Ok(self.service.add_torrent_data(&movie()?, start).await?)
    }
}

fn settings_in(dir: &Path) -> Settings {
    let download_path = dir.join("downloads");
    Settings {
        torrents_path: download_path.join("Torrents"),
        download_path,
        ..Settings::default()
    }
}

async fn start_service(
    settings: Settings,
    engine: &Arc<MemoryEngine>,
    space: u64,
) -> anyhow::Result<Service> {
    Ok(Service::builder(settings, Arc::clone(engine) as Arc<dyn Engine>)
        .space_probe(Arc::new(FixedSpace(space)))
        .start()
        .await?)
}

fn movie() -> anyhow::Result<Vec<u8>> {
    Ok(build_metainfo("movie", 16, &[("movie.mp4", 100)])?)
}

fn payload() -> Vec<u8> {
    (0..100).collect()
}

async fn next_matching(
    stream: &mut EventStream,
    wanted: impl Fn(&Event) -> bool,
) -> anyhow::Result<Event> {
    tokio::time::timeout(WAIT, async {
        while let Some(envelope) = stream.next().await {
            if wanted(&envelope.event) {
                return Some(envelope.event);
            }
        }
        None
    })
    .await?
    .ok_or_else(|| anyhow!("event stream closed"))
}

async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}

#[tokio::test]
async fn adding_the_same_torrent_twice_is_rejected() -> anyhow::Result<()> {
    let harness = Harness::start().await?;
    let info_hash = harness.add_movie(true).await?;

    let err = harness
        .service
        .add_torrent_data(&movie()?, true)
        .await
        .err()
        .context("duplicate add succeeded")?;
    assert!(matches!(err, ServiceError::Duplicate { info_hash: dup } if dup == info_hash));
    assert_eq!(harness.service.torrents().await.len(), 1);
    assert!(harness.sidecar(&info_hash, "torrent").exists());
    Ok(())
}

#[tokio::test]
async fn concurrent_adds_admit_exactly_one() -> anyhow::Result<()> {
    let harness = Harness::start().await?;
    let service = Arc::new(harness.service);

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let service = Arc::clone(&service);
        tasks.push(tokio::spawn(
            async move { service.add_magnet(MAGNET, false).await },
        ));
    }
    let mut admitted = 0;
    let mut duplicates = 0;
    for task in tasks {
        match task.await? {
            Ok(_) => admitted += 1,
            Err(ServiceError::Duplicate { .. }) => duplicates += 1,
            Err(err) => return Err(err.into()),
        }
    }
    assert_eq!(admitted, 1);
    assert_eq!(duplicates, 7);
    assert_eq!(service.torrents().await.len(), 1);
    Ok(())
}

#[tokio::test]
async fn malformed_input_is_a_load_error() -> anyhow::Result<()> {
    let harness = Harness::start().await?;
    assert!(matches!(
        harness.service.add_magnet("magnet:?dn=nothing", true).await,
        Err(ServiceError::LoadTorrent { .. })
    ));
    assert!(matches!(
        harness.service.add_torrent_data(b"not bencode", true).await,
        Err(ServiceError::LoadTorrent { .. })
    ));
    assert!(harness.service.torrents().await.is_empty());
    Ok(())
}

#[tokio::test]
async fn torrent_file_is_copied_next_to_the_sidecars() -> anyhow::Result<()> {
    let harness = Harness::start().await?;
    let source = harness.dir.path().join("incoming.torrent");
    fs::write(&source, movie()?)?;

    let info_hash = harness.service.add_torrent_file(&source, true).await?;
    assert_eq!(fs::read(harness.sidecar(&info_hash, "torrent"))?, movie()?);

    let missing = harness.dir.path().join("missing.torrent");
    assert!(matches!(
        harness.service.add_torrent_file(&missing, true).await,
        Err(ServiceError::Io { .. })
    ));
    Ok(())
}

#[tokio::test]
async fn snapshots_serialize_for_the_api_layer() -> anyhow::Result<()> {
    let harness = Harness::start().await?;
    let info_hash = harness.add_movie(false).await?;
    let torrent = harness.service.get_torrent(&info_hash).await?;

    let info = serde_json::to_value(torrent.info())?;
    assert_eq!(info["info_hash"], info_hash.to_hex());
    assert_eq!(info["name"], "movie.mp4");
    assert_eq!(info["size"], 100);

    let file = torrent.file(0)?;
    let status = serde_json::to_value(file.status())?;
    assert_eq!(status["priority"], "dont_download");
    assert_eq!(status["buffering_progress"], 100.0);
    let described = serde_json::to_value(file.info())?;
    assert_eq!(described["path"], "movie.mp4");
    Ok(())
}

#[tokio::test]
async fn torrents_added_without_start_fetch_nothing() -> anyhow::Result<()> {
    let harness = Harness::start().await?;
    let info_hash = harness.add_movie(false).await?;
    let torrent = harness.service.get_torrent(&info_hash).await?;
    let file = torrent.file(0)?;

    assert_eq!(file.priority(), Priority::DontDownload);
    assert!(!file.is_downloading());
    assert!(!torrent.all_files_downloading()?);

    file.start_download(false);
    assert_eq!(file.priority(), Priority::Default);
    assert!(file.is_downloading());
    assert!(torrent.all_files_downloading()?);
    assert!(matches!(
        torrent.file(1),
        Err(ServiceError::InvalidFileId { file: 1, .. })
    ));
    Ok(())
}

#[tokio::test]
async fn buffering_overrides_dont_download() -> anyhow::Result<()> {
    let harness = Harness::start().await?;
    let info_hash = harness.add_movie(true).await?;
    let file = harness.service.get_torrent(&info_hash).await?.file(0)?;

    file.set_priority(Priority::DontDownload);
    assert!(!file.is_downloading());

    file.buffer(16, 16);
    assert!(file.is_downloading());
    assert!(file.is_buffering());

    file.set_priority(Priority::DontDownload);
    assert!(!file.is_buffering());
    Ok(())
}

#[tokio::test]
async fn buffer_progress_counts_partial_pieces_and_completes() -> anyhow::Result<()> {
    let harness = Harness::start().await?;
    let mut events = harness.service.events().subscribe(None);
    let info_hash = harness.add_movie(true).await?;
    let torrent = harness.service.get_torrent(&info_hash).await?;
    let file = torrent.file(0)?;
    let handle = harness.handle(&info_hash)?;

    // Head covers piece 0; the tail (bytes 84..100) covers pieces 5 and 6. 16 + 16 + 4 bytes.
    file.buffer(16, 16);
    let started = next_matching(&mut events, |event| {
        matches!(event, Event::BufferingStarted { .. })
    })
    .await?;
    assert!(matches!(started, Event::BufferingStarted { bytes: 36, .. }));
    assert_eq!(handle.piece_priority(5), Priority::Top);
    assert_eq!(handle.piece_deadline(6), Some(Duration::ZERO));
    assert_eq!(handle.piece_priority(3), Priority::Default);
    assert!(file.buffering_progress().abs() < 1e-9);
    assert_eq!(torrent.state(), TorrentState::Buffering);

    handle.set_partial(0, vec![9]);
    assert!((file.buffering_progress() - 25.0).abs() < 1e-9);

    let data = payload();
    for piece in [0_u32, 5, 6] {
        let start = piece as usize * 16;
        handle.complete_piece(piece, &data[start..(start + 16).min(data.len())])?;
    }
    assert!((file.buffering_progress() - 100.0).abs() < 1e-9);

    next_matching(&mut events, |event| {
        matches!(event, Event::BufferingCompleted { file_index: 0, .. })
    })
    .await?;
    assert!(!file.is_buffering());
    assert_eq!(torrent.state(), TorrentState::Downloading);
    assert_eq!(file.status().state, TorrentState::Downloading);
    Ok(())
}

#[tokio::test]
async fn rate_caps_return_once_buffers_fill() -> anyhow::Result<()> {
    let harness = Harness::start_with(
        |settings| {
            settings.limit_after_buffering = true;
            settings.max_download_rate = 4096;
        },
        u64::MAX,
    )
    .await?;
    assert_eq!(harness.engine.settings().download_rate_limit, 0);

    let info_hash = harness.add_movie(true).await?;
    let file = harness.service.get_torrent(&info_hash).await?.file(0)?;
    file.buffer(16, 0);
    assert_eq!(harness.engine.settings().download_rate_limit, 0);

    harness.handle(&info_hash)?.complete_piece(0, &payload()[..16])?;
    let engine = Arc::clone(&harness.engine);
    assert!(eventually(|| engine.settings().download_rate_limit == 4096).await);
    Ok(())
}

#[tokio::test]
async fn reader_returns_payload_bytes() -> anyhow::Result<()> {
    let harness = Harness::start().await?;
    let info_hash = harness.add_movie(true).await?;
    let file = harness.service.get_torrent(&info_hash).await?.file(0)?;
    let handle = harness.handle(&info_hash)?;
    let data = payload();

    let mut reader = file.new_reader();
    assert_eq!(reader.length(), 100);
    let feeder = {
        let handle = Arc::clone(&handle);
        let data = data.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            handle.complete_all(&data)
        })
    };

    let mut buf = [0_u8; 40];
    let read = reader.read(&mut buf).await?;
    assert_eq!(read, 40);
    assert_eq!(&buf[..], &data[..40]);
    assert_eq!(reader.position(), 40);
    feeder.await??;

    reader.seek(SeekFrom::End(-10))?;
    let read = reader.read(&mut buf).await?;
    assert_eq!(&buf[..read], &data[90..]);
    assert_eq!(reader.read(&mut buf).await?, 0);
    Ok(())
}

#[tokio::test]
async fn seek_outside_the_file_keeps_the_position() -> anyhow::Result<()> {
    let harness = Harness::start().await?;
    let info_hash = harness.add_movie(true).await?;
    let file = harness.service.get_torrent(&info_hash).await?.file(0)?;
    let mut reader = file.new_reader();

    assert_eq!(reader.seek(SeekFrom::Start(48))?, 48);
    assert!(matches!(
        reader.seek(SeekFrom::Start(101)),
        Err(ServiceError::InvalidSeek { offset: 101, length: 100 })
    ));
    assert!(matches!(
        reader.seek(SeekFrom::Current(-49)),
        Err(ServiceError::InvalidSeek { offset: -1, .. })
    ));
    assert_eq!(reader.position(), 48);
    assert_eq!(reader.seek(SeekFrom::End(0))?, 100);
    Ok(())
}

#[tokio::test]
async fn seeking_raises_the_read_ahead_window() -> anyhow::Result<()> {
    let harness = Harness::start().await?;
    let info_hash = harness.add_movie(true).await?;
    let file = harness.service.get_torrent(&info_hash).await?.file(0)?;
    let handle = harness.handle(&info_hash)?;

    // Half the file ahead is three 16-byte pieces.
    let mut reader = file.new_reader_with_read_ahead(0.5);
    reader.seek(SeekFrom::Start(20))?;

    assert_eq!(handle.piece_priority(1), Priority::Top);
    assert_eq!(handle.piece_deadline(1), Some(Duration::ZERO));
    assert_eq!(handle.piece_priority(2), Priority::High);
    assert_eq!(handle.piece_deadline(2), Some(Duration::from_millis(10)));
    assert_eq!(handle.piece_deadline(4), Some(Duration::from_millis(30)));
    assert_eq!(handle.piece_priority(5), Priority::Default);
    assert_eq!(handle.piece_deadline(0), None);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn missing_piece_times_out() -> anyhow::Result<()> {
    let harness = Harness::start_with(|settings| settings.piece_wait_timeout = 2, u64::MAX).await?;
    let info_hash = harness.add_movie(true).await?;
    let file = harness.service.get_torrent(&info_hash).await?.file(0)?;

    let mut reader = file.new_reader();
    let mut buf = [0_u8; 8];
    let err = reader
        .read(&mut buf)
        .await
        .err()
        .context("read without data succeeded")?;
    let ServiceError::Timeout { piece, waited } = &err else {
        return Err(anyhow!("unexpected error {err}"));
    };
    assert_eq!(*piece, 0);
    assert!(*waited >= Duration::from_secs(2));
    assert_eq!(io::Error::from(err).kind(), io::ErrorKind::TimedOut);
    assert_eq!(reader.position(), 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn consumer_signal_and_closer_end_waits() -> anyhow::Result<()> {
    let harness = Harness::start_with(|settings| settings.piece_wait_timeout = 0, u64::MAX).await?;
    let info_hash = harness.add_movie(true).await?;
    let file = harness.service.get_torrent(&info_hash).await?.file(0)?;
    let mut buf = [0_u8; 8];

    let mut reader = file.new_reader();
    let consumer = CancellationToken::new();
    reader.register_cancellation(consumer.clone());
    consumer.cancel();
    assert!(matches!(
        reader.read(&mut buf).await,
        Err(ServiceError::ConsumerDisconnected)
    ));

    let mut reader = file.new_reader();
    let closer = reader.closer();
    let pending = tokio::spawn(async move {
        let mut buf = [0_u8; 8];
        reader.read(&mut buf).await
    });
    tokio::time::sleep(Duration::from_secs(3)).await;
    closer.close();
    assert!(matches!(pending.await?, Err(ServiceError::ReaderClosed)));
    Ok(())
}

#[tokio::test]
async fn removing_a_torrent_fails_blocked_readers() -> anyhow::Result<()> {
    let harness = Harness::start().await?;
    let mut events = harness.service.events().subscribe(None);
    let info_hash = harness.add_movie(true).await?;
    let file = harness.service.get_torrent(&info_hash).await?.file(0)?;

    let mut reader = file.new_reader();
    let pending = tokio::spawn(async move {
        let mut buf = [0_u8; 8];
        reader.read(&mut buf).await
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    harness.service.remove_torrent(&info_hash, true).await?;
    assert!(matches!(
        pending.await?,
        Err(ServiceError::TorrentClosed { info_hash: closed }) if closed == info_hash
    ));
    assert!(!harness.sidecar(&info_hash, "torrent").exists());
    assert!(harness.engine.handle(&info_hash).is_none());
    assert!(matches!(
        harness.service.get_torrent(&info_hash).await,
        Err(ServiceError::NotFound { .. })
    ));
    assert!(matches!(
        harness.service.remove_torrent(&info_hash, false).await,
        Err(ServiceError::NotFound { .. })
    ));
    next_matching(&mut events, |event| {
        matches!(event, Event::TorrentRemoved { deleted_files: true, .. })
    })
    .await?;
    Ok(())
}

#[tokio::test]
async fn magnet_is_replaced_by_a_torrent_file_once_metadata_arrives() -> anyhow::Result<()> {
    let harness = Harness::start().await?;
    let mut events = harness.service.events().subscribe(None);
    let bytes = build_metainfo("clip", 16, &[("clip.mp4", 40)])?;
    let info_hash = harness.engine.parse_metainfo(&bytes)?.info_hash;
    let uri = format!("magnet:?xt=urn:btih:{}&dn=clip", info_hash.to_hex());

    harness.service.add_magnet(&uri, true).await?;
    let torrent = harness.service.get_torrent(&info_hash).await?;
    assert!(harness.sidecar(&info_hash, "magnet").exists());
    assert!(!torrent.has_metadata());
    assert_eq!(torrent.info().name, "clip");
    assert_eq!(torrent.state(), TorrentState::Finding);
    assert!(matches!(torrent.file(0), Err(ServiceError::NoMetadata { .. })));

    harness.handle(&info_hash)?.deliver_metadata(&bytes)?;
    let received = next_matching(&mut events, |event| {
        matches!(event, Event::MetadataReceived { .. })
    })
    .await?;
    assert!(matches!(received, Event::MetadataReceived { files: 1, .. }));

    let magnet = harness.sidecar(&info_hash, "magnet");
    let torrent_file = harness.sidecar(&info_hash, "torrent");
    assert!(eventually(|| torrent_file.exists() && !magnet.exists()).await);
    assert_eq!(torrent.files().len(), 1);
    assert_eq!(torrent.info().size, 40);
    Ok(())
}

#[tokio::test]
async fn insufficient_space_pauses_once() -> anyhow::Result<()> {
    let harness = Harness::start_with(|_| {}, 10).await?;
    let mut events = harness.service.events().subscribe(None);
    let info_hash = harness.add_movie(true).await?;

    let paused = next_matching(&mut events, |event| {
        matches!(event, Event::TorrentPaused { .. })
    })
    .await?;
    assert!(matches!(
        paused,
        Event::TorrentPaused {
            reason: PauseReason::InsufficientSpace,
            ..
        }
    ));
    let torrent = harness.service.get_torrent(&info_hash).await?;
    assert!(torrent.is_paused());
    assert_eq!(torrent.state(), TorrentState::Paused);

    torrent.resume();
    let handle = harness.handle(&info_hash)?;
    handle.set_state(rivulet_torrent_core::NativeState::Finished);
    handle.set_state(rivulet_torrent_core::NativeState::Downloading);
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(!torrent.is_paused());
    while let Some(envelope) = events.try_next() {
        assert!(!matches!(envelope.event, Event::TorrentPaused { .. }));
    }
    Ok(())
}

#[tokio::test]
async fn status_weights_incomplete_torrents() -> anyhow::Result<()> {
    let harness = Harness::start().await?;
    let info_hash = harness.add_movie(true).await?;
    harness.handle(&info_hash)?.complete_piece(0, &payload()[..16])?;
    harness.handle(&info_hash)?.update_counters(|counters| {
        counters.download_rate = 2048;
    });

    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        let status = harness.service.status().await;
        if (status.progress - 16.0).abs() < 1e-9 && status.download_rate == 2048 {
            assert_eq!(status.num_torrents, 1);
            break;
        }
        if tokio::time::Instant::now() > deadline {
            return Err(anyhow!("progress never settled: {status:?}"));
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let status = harness.service.get_torrent(&info_hash).await?.status();
    assert!((status.progress - 16.0).abs() < 1e-9);
    assert_eq!(status.total_wanted_done, 16);
    Ok(())
}

#[tokio::test]
async fn share_ratio_limit_pauses_seeding_torrents() -> anyhow::Result<()> {
    let harness = Harness::start_with(|settings| settings.share_ratio_limit = 200, u64::MAX).await?;
    let mut events = harness.service.events().subscribe(None);
    let info_hash = harness.add_movie(true).await?;
    let handle = harness.handle(&info_hash)?;
    handle.complete_all(&payload())?;
    handle.update_counters(|counters| {
        counters.all_time_download = 100;
        counters.all_time_upload = 250;
    });

    let paused = next_matching(&mut events, |event| {
        matches!(event, Event::TorrentPaused { .. })
    })
    .await?;
    assert!(matches!(
        paused,
        Event::TorrentPaused {
            reason: PauseReason::ShareRatioLimit,
            ..
        }
    ));
    Ok(())
}

#[tokio::test]
async fn session_pause_is_reported() -> anyhow::Result<()> {
    let harness = Harness::start().await?;
    let mut events = harness.service.events().subscribe(None);
    harness.service.pause();
    assert!(harness.service.is_paused());
    assert!(harness.service.status().await.is_paused);
    harness.service.resume();
    assert!(!harness.service.is_paused());

    assert_eq!(events.try_next().map(|e| e.event), Some(Event::SessionPaused));
    assert_eq!(events.try_next().map(|e| e.event), Some(Event::SessionResumed));
    Ok(())
}

#[tokio::test]
async fn restart_restores_persisted_torrents() -> anyhow::Result<()> {
    let harness = Harness::start().await?;
    let movie_hash = harness.add_movie(true).await?;
    let magnet_hash = harness.service.add_magnet(MAGNET, true).await?;

    harness.handle(&movie_hash)?.save_resume_data();
    let fastresume = harness.sidecar(&movie_hash, "fastresume");
    assert!(eventually(|| fastresume.exists()).await);

    let settings = harness.service.settings().clone();
    let corrupt = harness.sidecar(&InfoHash::new([0xee; 20]), "fastresume");
    fs::write(&corrupt, b"garbage")?;
    let orphan = settings
        .download_path
        .join(format!(".{}.parts", "ff".repeat(20)));
    fs::write(&orphan, b"")?;
    let kept_parts = settings
        .download_path
        .join(format!(".{}.parts", movie_hash.to_hex()));
    fs::write(&kept_parts, b"")?;
    harness.service.close().await;

    let engine = Arc::new(MemoryEngine::new());
    let service = start_service(settings, &engine, u64::MAX).await?;
    let mut restored: Vec<InfoHash> = service
        .torrents()
        .await
        .iter()
        .map(|torrent| torrent.info_hash())
        .collect();
    restored.sort_by_key(InfoHash::to_hex);
    let mut expected = vec![movie_hash, magnet_hash];
    expected.sort_by_key(InfoHash::to_hex);
    assert_eq!(restored, expected);

    // The resume blob carries the priorities; the magnet comes back without starting.
    let movie = service.get_torrent(&movie_hash).await?;
    assert_eq!(movie.file(0)?.priority(), Priority::Default);
    assert!(!corrupt.exists());
    assert!(!orphan.exists());
    assert!(kept_parts.exists());
    service.close().await;
    Ok(())
}

#[tokio::test]
async fn restored_torrent_files_come_back_without_starting() -> anyhow::Result<()> {
    let harness = Harness::start().await?;
    let info_hash = harness.add_movie(true).await?;
    let settings = harness.service.settings().clone();
    let junk = harness.sidecar(&InfoHash::new([0xdd; 20]), "torrent");
    fs::write(&junk, b"not a torrent")?;
    harness.service.close().await;

    let engine = Arc::new(MemoryEngine::new());
    let service = start_service(settings, &engine, u64::MAX).await?;
    let torrent = service.get_torrent(&info_hash).await?;
    assert_eq!(torrent.file(0)?.priority(), Priority::DontDownload);
    assert_eq!(service.torrents().await.len(), 1);
    assert!(!junk.exists());
    service.close().await;
    Ok(())
}

#[tokio::test]
async fn close_is_idempotent_and_fails_pending_reads() -> anyhow::Result<()> {
    let harness = Harness::start().await?;
    let info_hash = harness.add_movie(true).await?;
    let file = harness.service.get_torrent(&info_hash).await?.file(0)?;

    let mut reader = file.new_reader();
    let pending = tokio::spawn(async move {
        let mut buf = [0_u8; 8];
        reader.read(&mut buf).await
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    harness.service.close().await;
    harness.service.close().await;
    assert!(matches!(pending.await?, Err(ServiceError::ServiceClosed)));
    assert!(harness.engine.is_shut_down());
    assert!(!harness.engine.settings().enable_dht);

    let mut reader = file.new_reader();
    let mut buf = [0_u8; 8];
    assert!(matches!(
        reader.read(&mut buf).await,
        Err(ServiceError::ServiceClosed)
    ));
    Ok(())
}

#[tokio::test]
async fn resume_data_arriving_after_removal_is_dropped() -> anyhow::Result<()> {
    let harness = Harness::start().await?;
    let mut events = harness.service.events().subscribe(None);
    let removed = harness.add_movie(true).await?;
    let kept = harness
        .service
        .add_torrent_data(&build_metainfo("clip", 16, &[("clip.mp4", 40)])?, true)
        .await?;

    harness.handle(&removed)?.save_resume_data();
    let fastresume = harness.sidecar(&removed, "fastresume");
    assert!(eventually(|| fastresume.exists()).await);
    let late_blob = fs::read(&fastresume)?;

    harness.service.remove_torrent(&removed, false).await?;
    assert!(!fastresume.exists());

    // Resume data requested before the removal lands afterwards, followed by a save for
    // the torrent that stays.
    harness.engine.push_alert(Alert::new(
        AlertCategory::STORAGE,
        AlertKind::ResumeDataReady {
            info_hash: removed,
            payload: late_blob,
        },
        "resume data generated",
    ));
    harness.handle(&kept)?.save_resume_data();
    let kept_hex = kept.to_hex();
    next_matching(&mut events, |event| {
        matches!(event, Event::ResumeDataSaved { info_hash } if *info_hash == kept_hex)
    })
    .await?;
    assert!(!fastresume.exists());

    let settings = harness.service.settings().clone();
    harness.service.close().await;
    let engine = Arc::new(MemoryEngine::new());
    let service = start_service(settings, &engine, u64::MAX).await?;
    assert!(matches!(
        service.get_torrent(&removed).await,
        Err(ServiceError::NotFound { .. })
    ));
    assert_eq!(service.torrents().await.len(), 1);
    service.close().await;
    Ok(())
}

#[tokio::test]
async fn every_file_of_a_large_torrent_stays_idle_without_start() -> anyhow::Result<()> {
    let harness = Harness::start().await?;
    let names: Vec<String> = (0..1005).map(|index| format!("part{index:04}.bin")).collect();
    let files: Vec<(&str, u64)> = names.iter().map(|name| (name.as_str(), 8)).collect();
    let bytes = build_metainfo("pack", 16, &files)?;

    let info_hash = harness.service.add_torrent_data(&bytes, false).await?;
    let torrent = harness.service.get_torrent(&info_hash).await?;
    let downloading: Vec<usize> = torrent
        .files()
        .iter()
        .filter(|file| file.priority() != Priority::DontDownload)
        .map(|file| file.info().id)
        .collect();
    assert_eq!(torrent.files().len(), 1005);
    assert!(downloading.is_empty(), "downloading files: {downloading:?}");
    harness.service.remove_torrent(&info_hash, false).await?;

    // Metadata arriving later for a magnet that was not started.
    let uri = format!("magnet:?xt=urn:btih:{}&dn=pack", info_hash.to_hex());
    harness.service.add_magnet(&uri, false).await?;
    harness.handle(&info_hash)?.deliver_metadata(&bytes)?;
    let torrent = harness.service.get_torrent(&info_hash).await?;
    assert!(eventually(|| torrent.has_metadata()).await);
    assert_eq!(torrent.files().len(), 1005);
    assert!(
        torrent
            .files()
            .iter()
            .all(|file| file.priority() == Priority::DontDownload)
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn resume_persister_saves_only_torrents_that_changed() -> anyhow::Result<()> {
    let harness = Harness::start_with(|settings| settings.session_save = 2, u64::MAX).await?;
    let mut events = harness.service.events().subscribe(None);
    let movie = harness.add_movie(true).await?;
    let magnet = harness.service.add_magnet(MAGNET, true).await?;
    let unchanged = harness
        .service
        .add_torrent_data(&build_metainfo("clip", 16, &[("clip.mp4", 40)])?, true)
        .await?;
    harness.handle(&unchanged)?.set_need_save_resume(false);

    let fastresume = harness.sidecar(&movie, "fastresume");
    assert!(!fastresume.exists());
    let movie_hex = movie.to_hex();
    next_matching(&mut events, |event| {
        matches!(event, Event::ResumeDataSaved { info_hash } if *info_hash == movie_hex)
    })
    .await?;
    assert!(fastresume.exists());

    // A few more periods pass without the other two being saved.
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(!harness.sidecar(&magnet, "fastresume").exists());
    assert!(!harness.sidecar(&unchanged, "fastresume").exists());
    while let Some(envelope) = events.try_next() {
        assert!(!matches!(
            envelope.event,
            Event::ResumeDataSaved { ref info_hash } if *info_hash != movie_hex
        ));
    }
    Ok(())
}

/// Space probe that inspects the torrent's file list while it is consulted.
#[derive(Default)]
struct FileListProbe {
    torrent: OnceLock<Arc<Torrent>>,
    seen_files: AtomicUsize,
}

impl SpaceProbe for FileListProbe {
    fn available_space(&self, _path: &Path) -> io::Result<u64> {
        if let Some(torrent) = self.torrent.get() {
            self.seen_files.store(torrent.files().len(), Ordering::SeqCst);
        }
        Ok(10)
    }
}

#[tokio::test]
async fn space_probe_runs_without_holding_the_torrent() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let engine = Arc::new(MemoryEngine::new());
    let probe = Arc::new(FileListProbe::default());
    let service = Service::builder(settings_in(dir.path()), Arc::clone(&engine) as Arc<dyn Engine>)
        .space_probe(Arc::clone(&probe) as Arc<dyn SpaceProbe>)
        .start()
        .await?;
    let mut events = service.events().subscribe(None);

    let bytes = build_metainfo("clip", 16, &[("clip.mp4", 40)])?;
    let info_hash = engine.parse_metainfo(&bytes)?.info_hash;
    let uri = format!("magnet:?xt=urn:btih:{}&dn=clip", info_hash.to_hex());
    service.add_magnet(&uri, true).await?;
    let torrent = service.get_torrent(&info_hash).await?;
    if probe.torrent.set(Arc::clone(&torrent)).is_err() {
        return Err(anyhow!("probe already bound"));
    }

    engine
        .handle(&info_hash)
        .ok_or_else(|| anyhow!("engine lost {info_hash}"))?
        .deliver_metadata(&bytes)?;
    let paused = next_matching(&mut events, |event| {
        matches!(event, Event::TorrentPaused { .. })
    })
    .await?;
    assert!(matches!(
        paused,
        Event::TorrentPaused {
            reason: PauseReason::InsufficientSpace,
            ..
        }
    ));
    assert_eq!(probe.seen_files.load(Ordering::SeqCst), 1);
    assert!(torrent.is_paused());
    service.close().await;
    Ok(())
}
