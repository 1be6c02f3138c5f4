use super::*;
use crate::recovery::RecoveryError;
use crate::rpc::{
    CheckpointReport, ContainerHeartbeat, ContainerRegistration, CoordinatorProtocol, ErrorReport,
    LogMessage, ResilientChannel, TcpConnector,
};
use tempfile::TempDir;
use tokio::net::TcpListener;

fn open(dir: &TempDir) -> Coordinator {
    Coordinator::open(CoordinatorConfig::new(dir.path())).unwrap()
}

fn registered(container_id: &str) -> JournalEntry {
    JournalEntry::ContainerRegistered {
        container_id: container_id.to_string(),
        host: format!("{container_id}.local"),
        incarnation: 1,
    }
}

fn checkpointed(container_id: &str, operator_id: OperatorId, seq: u32) -> JournalEntry {
    JournalEntry::CheckpointReported {
        container_id: container_id.to_string(),
        operator_id,
        window_id: WindowId::new(1, seq),
    }
}

#[test]
fn test_first_open_starts_incarnation_one() {
    let dir = TempDir::new().unwrap();
    let coordinator = open(&dir);
    assert_eq!(coordinator.incarnation().unwrap(), 1);

    let recovery = dir.path().join("recovery");
    assert!(recovery.join("snapshot").exists());
    assert!(recovery.join("log").exists());
    assert!(!recovery.join("log0").exists());
    assert!(!recovery.join("snapshot0").exists());
}

#[test]
fn test_reopen_replays_journal() {
    let dir = TempDir::new().unwrap();
    {
        let coordinator = open(&dir);
        coordinator.record(registered("c-1")).unwrap();
        coordinator.record(checkpointed("c-1", 1, 4)).unwrap();
    }

    let coordinator = open(&dir);
    let state = coordinator.state().unwrap();
    assert_eq!(state.incarnation, 2);
    assert!(state.containers.contains_key("c-1"));
    assert_eq!(
        state.checkpoints.get(&("c-1".to_string(), 1)),
        Some(&WindowId::new(1, 4))
    );
}

#[test]
fn test_checkpoint_compacts_journal() {
    let dir = TempDir::new().unwrap();
    {
        let coordinator = open(&dir);
        coordinator.record(registered("c-1")).unwrap();
        coordinator.checkpoint().unwrap();
        coordinator.record(registered("c-2")).unwrap();
    }

    let store = FsRecoveryStore::new(dir.path()).unwrap();
    let snapshot: CoordinatorState = store.restore_state().unwrap().unwrap();
    assert_eq!(snapshot.containers.len(), 1);
    let journal: Vec<JournalEntry> = store.read_log().unwrap().read_all().unwrap();
    assert_eq!(journal, vec![registered("c-2")]);

    let coordinator = open(&dir);
    assert_eq!(coordinator.state().unwrap().containers.len(), 2);
}

#[test]
fn test_crash_after_rotation_loses_nothing() {
    let dir = TempDir::new().unwrap();
    {
        let coordinator = open(&dir);
        coordinator.record(registered("c-1")).unwrap();
        coordinator.record(checkpointed("c-1", 2, 7)).unwrap();
    }
    // Rotation completed, snapshot never written.
    drop(FsRecoveryStore::new(dir.path()).unwrap().rotate_log().unwrap());
    assert!(dir.path().join("recovery/log0").exists());

    let coordinator = open(&dir);
    let state = coordinator.state().unwrap();
    assert!(state.containers.contains_key("c-1"));
    assert_eq!(state.committed_window(), Some(WindowId::new(1, 7)));
    assert!(!dir.path().join("recovery/log0").exists());
}

#[test]
fn test_crash_during_snapshot_combines_journals() {
    let dir = TempDir::new().unwrap();
    {
        let coordinator = open(&dir);
        coordinator.record(registered("c-1")).unwrap();
    }
    let store = FsRecoveryStore::new(dir.path()).unwrap();
    let mut log = store.rotate_log().unwrap();
    log.append(&registered("c-2")).unwrap();
    log.close().unwrap();
    fs_rename(&dir, "snapshot", "snapshot0");

    let coordinator = open(&dir);
    let state = coordinator.state().unwrap();
    assert_eq!(
        state.containers.keys().cloned().collect::<Vec<_>>(),
        vec!["c-1".to_string(), "c-2".to_string()]
    );
    assert_eq!(state.incarnation, 2);
}

fn fs_rename(dir: &TempDir, from: &str, to: &str) {
    let recovery = dir.path().join("recovery");
    std::fs::rename(recovery.join(from), recovery.join(to)).unwrap();
}

#[test]
fn test_open_rejects_foreign_snapshot() {
    #[derive(Serialize, Deserialize)]
    struct Foreign {
        value: u8,
    }
    impl Versioned for Foreign {
        const SCHEMA: &'static str = "foreign";
        const VERSION: u32 = 1;
    }

    let dir = TempDir::new().unwrap();
    FsRecoveryStore::new(dir.path())
        .unwrap()
        .save_state(&Foreign { value: 1 })
        .unwrap();

    let err = match Coordinator::open(CoordinatorConfig::new(dir.path())) {
        Ok(_) => panic!("foreign snapshot accepted"),
        Err(err) => err,
    };
    assert!(matches!(
        err.downcast_ref::<RecoveryError>(),
        Some(RecoveryError::SchemaMismatch { .. })
    ));
}

#[test]
fn test_committed_window_is_minimum_and_checkpoints_only_advance() {
    let mut state = CoordinatorState::default();
    assert_eq!(state.committed_window(), None);

    checkpointed("c-1", 1, 9).apply(&mut state);
    checkpointed("c-1", 2, 5).apply(&mut state);
    checkpointed("c-1", 1, 3).apply(&mut state);
    assert_eq!(
        state.checkpoints.get(&("c-1".to_string(), 1)),
        Some(&WindowId::new(1, 9))
    );
    assert_eq!(state.committed_window(), Some(WindowId::new(1, 5)));

    checkpointed("c-1", 2, 12).apply(&mut state);
    assert_eq!(state.committed_window(), Some(WindowId::new(1, 9)));
}

#[test]
fn test_same_operator_in_two_containers_is_tracked_separately() {
    let mut state = CoordinatorState::default();
    checkpointed("c-1", 0, 9).apply(&mut state);
    checkpointed("c-2", 0, 4).apply(&mut state);

    assert_eq!(state.checkpoints.len(), 2);
    assert_eq!(
        state.checkpoints.get(&("c-2".to_string(), 0)),
        Some(&WindowId::new(1, 4))
    );
    // The lagging container holds the committed window back.
    assert_eq!(state.committed_window(), Some(WindowId::new(1, 4)));

    checkpointed("c-2", 0, 11).apply(&mut state);
    assert_eq!(state.committed_window(), Some(WindowId::new(1, 9)));
}

#[test]
fn test_failed_checkpoint_halts_coordinator() {
    let dir = TempDir::new().unwrap();
    let coordinator = open(&dir);
    coordinator.record(registered("c-1")).unwrap();
    let recovery = dir.path().join("recovery");
    std::fs::copy(recovery.join("snapshot"), recovery.join("snapshot0")).unwrap();

    let err = coordinator.checkpoint().unwrap_err();
    assert!(matches!(
        err.downcast_ref::<RecoveryError>(),
        Some(RecoveryError::SnapshotBackupPresent(_))
    ));
    assert!(coordinator.is_halted().unwrap());
    assert!(coordinator.record(registered("c-2")).is_err());
    assert!(coordinator.checkpoint().is_err());
    drop(coordinator);

    let coordinator = open(&dir);
    let state = coordinator.state().unwrap();
    assert_eq!(
        state.containers.keys().cloned().collect::<Vec<_>>(),
        vec!["c-1".to_string()]
    );
    assert!(!coordinator.is_halted().unwrap());
}

#[tokio::test]
async fn test_serve_stops_when_checkpoint_fails() {
    let dir = TempDir::new().unwrap();
    let mut config = CoordinatorConfig::new(dir.path());
    config.checkpoint_interval = Duration::from_millis(50);
    let coordinator = Arc::new(Coordinator::open(config).unwrap());
    coordinator.record(registered("c-1")).unwrap();
    let recovery = dir.path().join("recovery");
    std::fs::copy(recovery.join("snapshot"), recovery.join("snapshot0")).unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(Arc::clone(&coordinator).serve(listener, shutdown_rx));

    let served = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("serve kept running after a failed checkpoint")
        .unwrap();
    let err = served.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<RecoveryError>(),
        Some(RecoveryError::SnapshotBackupPresent(_))
    ));
    assert!(coordinator.record(registered("c-2")).is_err());
    drop(coordinator);

    let reopened = open(&dir);
    assert!(reopened.state().unwrap().containers.contains_key("c-1"));
}

#[test]
fn test_error_report_counts_per_container() {
    let mut state = CoordinatorState::default();
    registered("c-1").apply(&mut state);
    let error = JournalEntry::ErrorReported {
        container_id: "c-1".to_string(),
        operator_id: Some(3),
        message: "boom".to_string(),
    };
    error.apply(&mut state);
    error.apply(&mut state);
    JournalEntry::ErrorReported {
        container_id: "unknown".to_string(),
        operator_id: None,
        message: "lost".to_string(),
    }
    .apply(&mut state);

    assert_eq!(state.containers["c-1"].errors_reported, 2);
    assert_eq!(state.containers.len(), 1);
}

#[tokio::test]
async fn test_protocol_calls_update_state() {
    let dir = TempDir::new().unwrap();
    let coordinator = open(&dir);

    let ack = coordinator
        .register(ContainerRegistration {
            container_id: "c-1".to_string(),
            host: "w1".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(ack.incarnation, 1);

    coordinator
        .report_checkpoint(CheckpointReport {
            container_id: "c-1".to_string(),
            operator_id: 4,
            window_id: WindowId::new(2, 8),
        })
        .await
        .unwrap();
    coordinator
        .report_error(ErrorReport {
            container_id: "c-1".to_string(),
            operator_id: Some(4),
            message: "overflow".to_string(),
        })
        .await
        .unwrap();
    coordinator
        .log(LogMessage {
            container_id: "c-1".to_string(),
            level: LogLevel::Warn,
            message: "slow".to_string(),
        })
        .await
        .unwrap();

    let hb = coordinator
        .heartbeat(ContainerHeartbeat {
            container_id: "c-1".to_string(),
            sent_millis: 1234,
        })
        .await
        .unwrap();
    assert_eq!(hb.committed_window, Some(WindowId::new(2, 8)));
    assert_eq!(hb.incarnation, 1);
    assert_eq!(coordinator.last_heartbeat("c-1").unwrap(), Some(1234));

    let state = coordinator.state().unwrap();
    assert_eq!(state.containers["c-1"].errors_reported, 1);
    assert_eq!(state.containers["c-1"].host, "w1");
}

#[tokio::test]
async fn test_worker_follows_coordinator_restart() {
    let dir = TempDir::new().unwrap();
    let mut config = CoordinatorConfig::new(dir.path());
    config.tunables = ChannelTunables {
        call_timeout: Duration::from_secs(1),
        retry_delay: Duration::from_millis(50),
        retry_timeout: Duration::from_secs(10),
    };

    let start = |config: CoordinatorConfig| async move {
        let coordinator = Arc::new(Coordinator::open(config).unwrap());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(Arc::clone(&coordinator).serve(listener, shutdown_rx));
        (shutdown_tx, handle)
    };

    let (first_shutdown, first) = start(config.clone()).await;
    // The pointer is written before the server starts accepting, so wait for it.
    let store = Arc::new(FsRecoveryStore::new(dir.path()).unwrap());
    wait_for_pointer(&store).await;
    let channel = ResilientChannel::new(TcpConnector, Arc::clone(&store));
    let ack = channel
        .register(ContainerRegistration {
            container_id: "c-1".to_string(),
            host: "w1".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(ack.incarnation, 1);
    let first_address = channel.address().await;

    first_shutdown.send(true).unwrap();
    first.await.unwrap().unwrap();

    let (second_shutdown, second) = start(config).await;
    let hb = channel
        .heartbeat(ContainerHeartbeat {
            container_id: "c-1".to_string(),
            sent_millis: 1,
        })
        .await
        .unwrap();
    assert_eq!(hb.incarnation, 2);
    assert_ne!(channel.address().await, first_address);

    second_shutdown.send(true).unwrap();
    second.await.unwrap().unwrap();

    let state: CoordinatorState = store.restore_state().unwrap().unwrap();
    assert!(state.containers.contains_key("c-1"));
}

async fn wait_for_pointer(store: &FsRecoveryStore) {
    for _ in 0..100 {
        if store.read_pointer().is_ok() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("coordinator never published its address");
}
