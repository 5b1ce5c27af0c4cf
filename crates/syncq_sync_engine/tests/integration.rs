//! Integration tests for the sync engine against an in-process hub.

use std::io::Read;
use std::sync::Arc;
use syncq_core::{ManualClock, QueueConfig, QueueStatus, SharedClock};
use syncq_sync_engine::{
    HttpTransport, LeafStores, LoopbackClient, LoopbackServer, MemoryDirectory, SyncConfig,
    SyncEngine, SyncError, SyncState,
};
use syncq_sync_protocol::{SyncDirection, UpdateAction};
use syncq_sync_server::{HubStores, MemoryHubDirectory, ServerConfig, SyncServer, Target};
use syncq_testkit::{
    captured, course_data, enrolment_data, grade_payload, user_data, SAMPLE_COURSE,
    SAMPLE_COURSE_IDNUMBER, SAMPLE_EMAIL, SAMPLE_GRADE_ITEM, SAMPLE_GRADE_ITEM_NAME,
    SAMPLE_USERNAME, SAMPLE_USER_IDNUMBER,
};

/// Routes loopback requests into a hub.
#[derive(Clone)]
struct Hub(Arc<SyncServer>);

impl LoopbackServer for Hub {
    fn handle_post(&self, path: &str, api_key: Option<&str>, body: &[u8]) -> (u16, Vec<u8>) {
        self.0.dispatch(path, api_key, body)
    }

    fn open_artifact(
        &self,
        node_id: &str,
        api_key: &str,
        name: &str,
    ) -> Result<Box<dyn Read + Send>, (u16, Vec<u8>)> {
        match self.0.open_artifact(node_id, api_key, name) {
            Ok(file) => Ok(Box::new(file)),
            Err(e) => Err((e.status_code(), e.to_body().encode().unwrap_or_default())),
        }
    }
}

type LoopbackEngine = SyncEngine<HttpTransport<LoopbackClient<Hub>>>;

struct Setup {
    hub: Arc<SyncServer>,
    hub_clock: Arc<ManualClock>,
    directory: Arc<MemoryDirectory>,
    engine: LoopbackEngine,
}

fn hub(config: ServerConfig) -> (Arc<SyncServer>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(5_000));
    let directory = Arc::new(MemoryHubDirectory::new());
    directory.add_user(SAMPLE_USERNAME, SAMPLE_EMAIL, SAMPLE_USER_IDNUMBER);
    let course = directory.add_course(SAMPLE_COURSE, SAMPLE_COURSE_IDNUMBER);
    directory.add_grade_item(course, SAMPLE_GRADE_ITEM, SAMPLE_GRADE_ITEM_NAME);
    let shared: SharedClock = clock.clone();
    let server = SyncServer::with_stores(
        config.with_registration("provision-me"),
        HubStores::in_memory(shared.clone()),
        directory,
        shared,
    );
    (Arc::new(server), clock)
}

fn leaf(hub: &Arc<SyncServer>, api_key: &str) -> (Arc<MemoryDirectory>, LoopbackEngine) {
    let clock: SharedClock = Arc::new(ManualClock::new(1_000));
    let directory = Arc::new(MemoryDirectory::new());
    let config = SyncConfig::new("http://hub.local/", "leaf-a", api_key).with_batch_size(10);
    let transport = HttpTransport::new(
        config.hub_url.clone(),
        LoopbackClient::new(Hub(Arc::clone(hub))),
    );
    let stores = LeafStores::in_memory(QueueConfig::default(), clock.clone());
    let engine = SyncEngine::new(config, transport, stores, directory.clone(), clock);
    (directory, engine)
}

fn setup_with(config: ServerConfig) -> Setup {
    let (hub, hub_clock) = hub(config);
    let key = hub
        .registry()
        .register("leaf-a", "Leaf A", None, None)
        .unwrap();
    let (directory, engine) = leaf(&hub, &key);
    Setup {
        hub,
        hub_clock,
        directory,
        engine,
    }
}

fn setup() -> Setup {
    setup_with(ServerConfig::default())
}

#[test]
fn grade_upload_is_applied_on_hub() {
    let s = setup();
    let id = s
        .engine
        .queue()
        .enqueue(captured(grade_payload("leaf-a", 17, 82.5, 900)))
        .unwrap()
        .unwrap();

    let report = s.engine.upload().unwrap();
    assert_eq!(report.success, 1);
    assert_eq!(s.engine.queue().get(id).unwrap().status, QueueStatus::Synced);
    assert_eq!(s.engine.state(), SyncState::Synced);

    // The hub mapped the leaf grade and logged the reported pass.
    assert!(s
        .hub
        .mappings()
        .mapper("leaf-a")
        .resolve("grade_grades", 17)
        .is_some());
    let logged = s.hub.sync_log().recent(Some("leaf-a"), 10);
    assert_eq!(logged.len(), 1);
    assert_eq!(logged[0].direction, SyncDirection::Upload);
    assert_eq!(s.engine.sync_log().len(), 1);
}

#[test]
fn older_grade_loses_to_newer_hub_record() {
    let s = setup();
    s.engine
        .queue()
        .enqueue(captured(grade_payload("leaf-a", 17, 82.5, 900)))
        .unwrap();
    s.engine.upload().unwrap();

    // The hub row was written at hub time 5000, after this event.
    let id = s
        .engine
        .queue()
        .enqueue(captured(grade_payload("leaf-a", 17, 40.0, 950)))
        .unwrap()
        .unwrap();
    let report = s.engine.upload().unwrap();
    assert_eq!(report.conflicts, 1);

    let item = s.engine.queue().get(id).unwrap();
    assert_eq!(item.status, QueueStatus::Conflict);
    assert_eq!(item.last_error.as_deref(), Some("Hub grade is newer"));
}

#[test]
fn wrong_api_key_is_authentication_failure() {
    let (hub, _clock) = hub(ServerConfig::default());
    hub.registry()
        .register("leaf-a", "Leaf A", None, None)
        .unwrap();
    let (_directory, engine) = leaf(&hub, "not-the-key");
    engine
        .queue()
        .enqueue(captured(grade_payload("leaf-a", 17, 82.5, 900)))
        .unwrap();

    let err = engine.upload().unwrap_err();
    assert!(matches!(err, SyncError::Authentication(_)), "{err:?}");
    assert!(!err.is_retryable());
    assert_eq!(engine.state(), SyncState::Error);
    assert_eq!(engine.queue().stats().pending, 1);
}

#[test]
fn unregistered_node_registers_then_syncs() {
    let (hub, _clock) = hub(ServerConfig::default());
    let (_directory, unregistered) = leaf(&hub, "");

    assert!(unregistered
        .register("Leaf A", "wrong-secret", None, None)
        .is_err());
    let key = unregistered
        .register("Leaf A", "provision-me", Some("ops@example.org".into()), None)
        .unwrap();

    let (_directory, engine) = leaf(&hub, &key);
    let status = engine.check_status().unwrap();
    assert!(status.is_ok());
    assert!(status.active);
    assert_eq!(status.node_name.as_deref(), Some("Leaf A"));
}

#[test]
fn published_records_reach_leaf_directory() {
    let s = setup();
    let distribution = s.hub.distribution();
    distribution
        .publish_course(Target::Broadcast, UpdateAction::Create, &course_data(500, "ALG"))
        .unwrap();
    distribution
        .publish_user(
            Target::Node("leaf-a".into()),
            UpdateAction::Create,
            &user_data(70, "ana"),
        )
        .unwrap();
    distribution
        .publish_enrolment(
            Target::Node("leaf-a".into()),
            UpdateAction::Create,
            &enrolment_data(70, 500),
        )
        .unwrap();

    let report = s.engine.download().unwrap();
    assert_eq!(report.received, 3);
    assert_eq!(report.applied.success, 3);
    assert_eq!(report.watermark, 4_999);

    let mapper = s.engine.applier().mappings().mapper("leaf-a");
    let course = mapper.resolve_reverse("course", 500).unwrap();
    let user = mapper.resolve_reverse("user", 70).unwrap();
    assert_eq!(s.directory.course(course).unwrap().shortname, "ALG");
    assert_eq!(s.directory.user(user).unwrap().email, "ana@example.org");
    assert!(s.directory.enrolment(user, course).is_some());

    // Delivered updates are not sent again.
    let again = s.engine.download().unwrap();
    assert_eq!(again.received, 0);
}

#[test]
fn enrolment_waits_for_its_user_and_course() {
    let s = setup();
    let distribution = s.hub.distribution();
    distribution
        .publish_enrolment(Target::Broadcast, UpdateAction::Create, &enrolment_data(70, 500))
        .unwrap();

    let first = s.engine.download().unwrap();
    assert_eq!(first.applied.skipped, 1);
    assert_eq!(s.engine.cursor().deferred_count(), 1);

    s.hub_clock.advance(60);
    distribution
        .publish_user(Target::Broadcast, UpdateAction::Create, &user_data(70, "ana"))
        .unwrap();
    distribution
        .publish_course(Target::Broadcast, UpdateAction::Create, &course_data(500, "ALG"))
        .unwrap();
    let second = s.engine.download().unwrap();
    assert_eq!(second.received, 2);
    assert_eq!(second.deferred, 1);

    let third = s.engine.download().unwrap();
    assert_eq!(third.retried, 1);
    assert_eq!(third.applied.success, 1);
    assert_eq!(third.deferred, 0);
    assert_eq!(s.directory.course_count(), 1);
}

#[test]
fn small_download_limit_pages_through_updates() {
    let s = setup_with(ServerConfig::default().with_max_download_batch(2));
    for id in 0..5 {
        s.hub
            .distribution()
            .publish_course(
                Target::Broadcast,
                UpdateAction::Create,
                &course_data(600 + id, &format!("C{id}")),
            )
            .unwrap();
    }
    let (directory, engine) = {
        let key = s
            .hub
            .registry()
            .register("leaf-b", "Leaf B", None, None)
            .unwrap();
        let clock: SharedClock = Arc::new(ManualClock::new(1_000));
        let directory = Arc::new(MemoryDirectory::new());
        let config = SyncConfig::new("http://hub.local", "leaf-b", &key).with_download_limit(2);
        let transport = HttpTransport::new(
            config.hub_url.clone(),
            LoopbackClient::new(Hub(Arc::clone(&s.hub))),
        );
        let stores = LeafStores::in_memory(QueueConfig::default(), clock.clone());
        let engine = SyncEngine::new(config, transport, stores, directory.clone(), clock);
        (directory, engine)
    };

    let report = engine.download().unwrap();
    assert_eq!(report.received, 5);
    assert_eq!(report.rounds, 3);
    assert_eq!(directory.course_count(), 5);
}

#[test]
fn full_cycle_uploads_then_downloads() {
    let s = setup();
    s.engine
        .queue()
        .enqueue(captured(grade_payload("leaf-a", 17, 82.5, 900)))
        .unwrap();
    s.hub
        .distribution()
        .publish_course(Target::Broadcast, UpdateAction::Create, &course_data(500, "ALG"))
        .unwrap();

    let result = s.engine.sync().unwrap();
    assert_eq!(result.upload.success, 1);
    assert_eq!(result.download.applied.success, 1);
    assert_eq!(s.engine.stats().uploads_completed, 1);
    assert_eq!(s.engine.stats().downloads_completed, 1);
    assert_eq!(s.hub.sync_log().recent(Some("leaf-a"), 10).len(), 2);
}

#[test]
fn artifact_streams_into_sink() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("course-500.mbz"), b"backup-bytes").unwrap();
    let s = setup_with(ServerConfig::default().with_artifact_dir(dir.path()));

    let mut sink = Vec::new();
    let written = s.engine.fetch_artifact("course-500.mbz", &mut sink).unwrap();
    assert_eq!(written, 12);
    assert_eq!(sink, b"backup-bytes");

    let err = s.engine.fetch_artifact("missing.mbz", &mut Vec::new()).unwrap_err();
    assert!(matches!(err, SyncError::Protocol { status: Some(404), .. }), "{err:?}");
}
