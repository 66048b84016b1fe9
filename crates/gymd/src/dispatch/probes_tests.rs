//! Tests for the probe table.

use std::fs;

use rstest::{fixture, rstest};
use serde_json::{Value, json};
use tempfile::TempDir;
use url::Url;

use camino::Utf8Path;

use super::*;
use crate::dispatch::export::{MockRecordingExporter, Transcoder};
use crate::simulation::BuiltinEngine;

struct Harness {
    dispatcher: Dispatcher,
    state: SessionState,
    recordings: TempDir,
}

impl Harness {
    fn new(exporter: MockRecordingExporter) -> Self {
        Self::with_exporter(|_| Arc::new(exporter))
    }

    fn with_exporter(exporter: impl FnOnce(&Utf8Path) -> Arc<dyn RecordingExporter>) -> Self {
        let recordings = TempDir::new().expect("temp dir");
        let root = Utf8PathBuf::from_path_buf(recordings.path().to_path_buf()).expect("utf8 path");
        let registry = Arc::new(Registry::new(Arc::new(BuiltinEngine::new())));
        let exporter = exporter(&root);
        Self {
            dispatcher: Dispatcher::new(Arc::clone(&registry), exporter, root),
            state: SessionState::new(registry),
            recordings,
        }
    }

    fn send(&mut self, record: &str) -> DispatchOutcome {
        self.dispatcher.dispatch(record, &mut self.state)
    }

    fn send_json(&mut self, record: Value) -> DispatchOutcome {
        self.send(&record.to_string())
    }

    fn replies(&mut self, record: Value) -> Vec<Value> {
        self.send_json(record)
            .outbound
            .into_iter()
            .map(|outbound| match outbound {
                Outbound::Reply(reply) => serde_json::to_value(reply).expect("json"),
                Outbound::ErrorToken => json!("error"),
            })
            .collect()
    }

    fn create(&mut self, name: &str) -> InstanceId {
        self.send_json(json!({"env": {"name": name}}));
        self.state
            .active_instance()
            .cloned()
            .expect("instance created")
    }

    fn registry(&self) -> &Registry {
        self.dispatcher.registry()
    }
}

#[fixture]
fn harness() -> Harness {
    Harness::new(MockRecordingExporter::new())
}

#[rstest]
#[case(r#"{"env":{"name":"CartPole-v0"},"server":{"compression":"6"}}"#)]
#[case(r#"{"server":{"compression":"6"},"env":{"name":"CartPole-v0"}}"#)]
fn environment_selection_resets_compression_regardless_of_key_order(
    mut harness: Harness,
    #[case] record: &str,
) {
    harness.state.set_compression_level(4);
    let outcome = harness.send(record);

    assert_eq!(harness.state.compression_level(), 0);
    let id = harness.state.active_instance().cloned().expect("instance");
    assert!(harness.registry().contains(&id));
    assert_eq!(
        outcome.outbound,
        vec![Outbound::Reply(Reply::Instance { instance: id })]
    );
}

#[rstest]
fn sampling_without_an_instance_is_acknowledged(mut harness: Harness) {
    let outcome = harness.send_json(json!({"env": {"actionspace": "sample"}}));
    assert_eq!(outcome.outbound, vec![Outbound::Reply(Reply::Ack {})]);
    assert!(outcome.end.is_none());
    assert!(!harness.state.pending_close());
}

#[rstest]
#[case("CartPole-v0")]
#[case("CartPole-v1")]
#[case("NChain-v0")]
#[case("PointMass-v0")]
fn first_rendered_step_after_reset_is_not_done(mut harness: Harness, #[case] name: &str) {
    harness.create(name);
    harness.send_json(json!({"env": {"action": "reset"}}));
    let action = harness.replies(json!({"env": {"actionspace": "sample"}}))[0]["sample"].clone();

    let replies = harness.replies(json!({"step": {"action": action, "render": 1}}));
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0]["done"], json!(false));
}

#[rstest]
fn full_client_lifecycle_ends_with_a_silent_close(mut harness: Harness) {
    let replies = harness.replies(json!({"env": {"name": "CartPole-v0"}}));
    let id = replies[0]["instance"].as_str().expect("instance id").to_owned();
    assert!(id.len() >= 8);

    let replies = harness.replies(json!({"env": {"action": "reset"}}));
    assert_eq!(replies[0]["observation"].as_array().map(Vec::len), Some(4));

    let replies = harness.replies(json!({"step": {"action": 0, "render": 0}}));
    assert_eq!(replies[0]["done"], json!(false));
    assert_eq!(replies[0]["info"], json!({}));

    let outcome = harness.send_json(json!({"env": {"action": "close"}}));
    assert!(outcome.outbound.is_empty());
    assert_eq!(outcome.end, Some(SessionEnd::ClientClose));
    assert!(matches!(
        harness.registry().lookup(&InstanceId::new(id)),
        Err(RegistryError::UnknownInstance { .. })
    ));
}

#[rstest]
fn empty_record_tears_down_every_owned_instance(mut harness: Harness) {
    let first = harness.create("CartPole-v0");
    let second = harness.create("NChain-v0");
    // Selecting the second instance closed the first one.
    assert!(!harness.registry().contains(&first));
    let third = harness
        .registry()
        .create("PointMass-v0")
        .expect("create directly");
    harness.state.activate(third.clone());
    harness.state.activate(second.clone());

    let outcome = harness.send("\r\n");
    assert_eq!(outcome.outbound, vec![Outbound::ErrorToken]);
    assert_eq!(outcome.end, Some(SessionEnd::EmptyRecord));
    assert!(harness.registry().lookup(&second).is_err());
    assert!(harness.registry().lookup(&third).is_err());
}

#[rstest]
fn unparseable_compression_requests_close_after_reply(mut harness: Harness) {
    harness.create("CartPole-v0");
    harness.state.set_compression_level(3);
    let outcome = harness.send_json(json!({"server": {"compression": "fast"}}));

    assert_eq!(outcome.outbound, vec![Outbound::Reply(Reply::Ack {})]);
    assert!(outcome.end.is_none());
    assert!(harness.state.pending_close());
    assert_eq!(harness.state.compression_level(), 0);
}

#[rstest]
fn compression_levels_are_clamped(mut harness: Harness) {
    harness.send_json(json!({"server": {"compression": "12"}}));
    assert_eq!(harness.state.compression_level(), 9);
    assert!(!harness.state.pending_close());
}

#[rstest]
fn space_queries_describe_the_instance(mut harness: Harness) {
    harness.create("PointMass-v0");
    let action = harness.replies(json!({"env": {"action": "actionspace"}}));
    assert_eq!(
        action,
        vec![json!({"info": {"name": "Box", "shape": [1], "low": [-1.0], "high": [1.0]}})]
    );

    let observation = harness.replies(json!({"env": {"action": "observationspace"}}));
    assert_eq!(observation[0]["info"]["high"], json!([1e100, 1e100]));
    assert_eq!(observation[0]["info"]["low"], json!([-1e100, -1e100]));
    let text = observation[0].to_string();
    assert!(!text.contains("Infinity"), "{text}");
    assert!(!text.contains("null"), "{text}");
}

#[rstest]
fn seeding_makes_resets_reproducible(mut harness: Harness) {
    harness.create("CartPole-v0");
    harness.send_json(json!({"env": {"seed": "17"}}));
    let first = harness.replies(json!({"env": {"action": "reset"}}));
    harness.send_json(json!({"env": {"seed": "17"}}));
    let second = harness.replies(json!({"env": {"action": "reset"}}));
    assert_eq!(first, second);
}

#[rstest]
fn invalid_seeds_are_acknowledged(mut harness: Harness) {
    harness.create("NChain-v0");
    let outcome = harness.send_json(json!({"env": {"seed": "minus one"}}));
    assert_eq!(outcome.outbound, vec![Outbound::Reply(Reply::Ack {})]);
    assert!(outcome.end.is_none());
}

#[rstest]
fn unknown_simulations_leave_the_session_open(mut harness: Harness) {
    let outcome = harness.send_json(json!({"env": {"name": "Pong-v99"}}));
    assert_eq!(outcome.outbound, vec![Outbound::Reply(Reply::Ack {})]);
    assert!(outcome.end.is_none());
    assert!(harness.state.active_instance().is_none());
}

#[rstest]
#[case("not json")]
#[case("[1, 2, 3]")]
fn malformed_records_are_acknowledged(mut harness: Harness, #[case] record: &str) {
    let outcome = harness.send(record);
    assert_eq!(outcome.outbound, vec![Outbound::Reply(Reply::Ack {})]);
    assert!(outcome.end.is_none());
}

#[test]
fn export_and_monitor_share_one_record() {
    let mut exporter = MockRecordingExporter::new();
    exporter.expect_export().times(1).returning(|id| {
        Ok(Url::parse(&format!("http://playback.test/{id}/output.webm")).expect("url"))
    });
    let mut harness = Harness::new(exporter);
    let id = harness.create("CartPole-v0");

    let replies = harness.replies(json!({"url": 1, "monitor": {"action": "start"}}));
    assert_eq!(
        replies,
        vec![json!({"url": format!("http://playback.test/{id}/output.webm")})]
    );
    let recording = harness
        .registry()
        .with_instance(&id, |simulation| simulation.is_recording())
        .expect("live instance");
    assert!(recording);
}

#[rstest]
fn monitor_close_writes_the_manifest(mut harness: Harness) {
    let id = harness.create("NChain-v0");
    harness.send_json(json!({"monitor": {"action": "start", "directory": "/ignored"}}));
    harness.send_json(json!({"env": {"action": "reset"}}));
    harness.send_json(json!({"step": {"action": 0}}));
    harness.send_json(json!({"monitor": {"action": "close"}}));

    let directory = harness.recordings.path().join(id.as_str());
    assert!(directory.join("manifest.json").is_file());
    assert!(directory.join("episode-000000.jsonl").is_file());
}

/// Writes a stand-in transcoder that records its arguments next to itself.
#[cfg(unix)]
fn stand_in_transcoder(directory: &Utf8Path) -> Utf8PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let script = directory.join("transcode.sh");
    fs::write(
        &script,
        "#!/bin/sh\nprintf '%s\\n' \"$@\" > \"$(dirname \"$0\")/invocation\"\n",
    )
    .expect("write transcoder");
    fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).expect("chmod transcoder");
    script
}

#[cfg(unix)]
#[test]
fn exported_recordings_made_by_the_daemon_are_transcoded() {
    let tools = TempDir::new().expect("tool dir");
    let tools_path = Utf8PathBuf::from_path_buf(tools.path().to_path_buf()).expect("utf8 path");
    let program = stand_in_transcoder(&tools_path);
    let mut harness = Harness::with_exporter(|root| {
        Arc::new(
            Transcoder::new(program.as_str(), root, "http://playback.test/").expect("transcoder"),
        )
    });
    let id = harness.create("CartPole-v0");

    harness.send_json(json!({"monitor": {"action": "start"}}));
    harness.send_json(json!({"env": {"action": "reset"}}));
    for _ in 0..5 {
        harness.send_json(json!({"step": {"action": 1, "render": 1}}));
    }
    harness.send_json(json!({"monitor": {"action": "close"}}));
    let replies = harness.replies(json!({"url": 1}));

    assert_eq!(
        replies,
        vec![json!({"url": format!("http://playback.test/{id}/output.webm")})]
    );
    let directory = harness.recordings.path().join(id.as_str());
    let invocation = fs::read_to_string(tools.path().join("invocation"))
        .expect("transcoder should have run");
    let arguments: Vec<&str> = invocation.lines().collect();
    assert!(arguments.contains(&directory.join("episode-000000.y4m").to_str().expect("utf8")));
    assert_eq!(
        arguments.last().copied(),
        directory.join("output.webm").to_str()
    );
}

#[rstest]
fn monitor_start_refuses_existing_recordings_without_force(mut harness: Harness) {
    let id = harness.create("CartPole-v0");
    let directory = harness.recordings.path().join(id.as_str());
    fs::create_dir_all(&directory).expect("recording dir");
    fs::write(directory.join("episode-000000.jsonl"), "{}\n").expect("prior episode");

    harness.send_json(json!({"monitor": {"action": "start"}}));
    let recording = harness
        .registry()
        .with_instance(&id, |simulation| simulation.is_recording())
        .expect("live instance");
    assert!(!recording);

    let replies = harness.replies(json!({"env": {"action": "reset"}}));
    assert!(replies[0].get("observation").is_some());

    harness.send_json(json!({"monitor": {"action": "start", "force": 1}}));
    let recording = harness
        .registry()
        .with_instance(&id, |simulation| simulation.is_recording())
        .expect("live instance");
    assert!(recording);
}

#[test]
fn probes_are_evaluated_in_protocol_order() {
    let names: Vec<&str> = PROBES.iter().map(|probe| probe.name).collect();
    assert_eq!(
        names,
        [
            "empty",
            "env.name",
            "server.compression",
            "env.actionspace",
            "env.action",
            "step",
            "env.seed",
            "url",
            "monitor",
        ]
    );
}
