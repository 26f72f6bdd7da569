use std::{env, path::PathBuf, sync::Arc};

use teamtimer_lib::{
    bootstrap,
    gateway::{
        memory::{InMemoryTimerServer, RecordingMembershipGateway, RecordingTaskGateway},
        NoopInvalidator,
    },
    Gateways,
};

mod common;
use common::context;

/// Unique data directory inside the system temp dir.
fn temp_data_dir(name: &str) -> PathBuf {
    let mut path = env::temp_dir();
    path.push(format!("teamtimer_{name}_{}", uuid::Uuid::new_v4()));
    path
}

fn gateways(server: Arc<InMemoryTimerServer>) -> Gateways {
    Gateways {
        timer: server,
        membership: Arc::new(RecordingMembershipGateway::new()),
        tasks: Arc::new(RecordingTaskGateway::new()),
        invalidator: Arc::new(NoopInvalidator),
    }
}

#[tokio::test]
async fn bootstrap_creates_data_directory() {
    let dir = temp_data_dir("create");
    let server = Arc::new(InMemoryTimerServer::new());

    let timer = bootstrap(&dir, context(), gateways(server)).unwrap();
    timer.load().await.unwrap();

    assert!(dir.join("teamtimer.sqlite3").exists());
    assert!(timer.is_first_load_done().await);
    assert!(!timer.is_running().await);

    drop(timer);
    std::fs::remove_dir_all(&dir).ok();
}

#[tokio::test]
async fn running_record_survives_a_restart() {
    let dir = temp_data_dir("restart");
    let server = Arc::new(InMemoryTimerServer::new());

    {
        let timer = bootstrap(&dir, context(), gateways(server.clone())).unwrap();
        timer.load().await.unwrap();
        timer.start(Some("T1".into())).await.unwrap();
        assert!(timer.record().await.running);
    }

    server.fail_status(true);
    let timer = bootstrap(&dir, context(), gateways(server)).unwrap();
    assert_eq!(timer.load().await.unwrap(), None);

    let record = timer.record().await;
    assert!(record.running);
    assert!(record.runned_date_time > 0);
    assert_eq!(record.last_task_id.as_deref(), Some("T1"));
    assert!(timer.is_counting());

    drop(timer);
    std::fs::remove_dir_all(&dir).ok();
}
