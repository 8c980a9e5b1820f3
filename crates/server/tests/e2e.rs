//! End-to-end exercises over the local socket binding: a real daemon
//! accept loop on one side, the real client stack on the other.

use std::sync::Arc;

use netd_client::{ClientError, ExpectFailure, NetconfClient};
use netd_domain::config::ClientConfig;
use netd_server::backend::MemoryBackend;
use netd_server::serve::accept_loop;
use netd_server::state::ServerState;
use netd_transport::local::LocalListener;
use netd_transport::TransportListener;
use netd_yang::message::{Commit, DefaultOperation, ErrorOption, TestOption};
use netd_yang::tree::DataNode;
use netd_yang::{xml, Datastore, ErrorTag, Filter, Response};

const IF_NS: &str = "urn:ietf:params:xml:ns:yang:ietf-interfaces";
const NI_NS: &str = "urn:ietf:params:xml:ns:yang:ietf-network-instance";

struct Harness {
    _dir: tempfile::TempDir,
    socket: std::path::PathBuf,
    state: Arc<ServerState>,
    backend: Arc<MemoryBackend>,
}

fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("netd.sock");
    let backend = Arc::new(MemoryBackend::new());
    let state = ServerState::for_tests(backend.clone(), dir.path().join("startup.xml"));

    let listener = LocalListener::bind(&socket).unwrap();
    tokio::spawn(accept_loop(
        Box::new(listener) as Box<dyn TransportListener>,
        state.clone(),
        "local",
    ));

    Harness {
        _dir: dir,
        socket,
        state,
        backend,
    }
}

async fn connect(harness: &Harness) -> NetconfClient {
    NetconfClient::connect_local(
        &harness.socket,
        harness.state.registry.clone(),
        &ClientConfig::default(),
        16 * 1024 * 1024,
    )
    .await
    .unwrap()
}

fn interface_config(name: &str, extra: &str) -> DataNode {
    let body = format!(
        r#"<config><interfaces xmlns="{IF_NS}"><interface{extra}><name>{name}</name><enabled>true</enabled></interface></interfaces></config>"#
    );
    xml::parse(body.as_bytes()).unwrap()
}

async fn edit_candidate(client: &NetconfClient, config: DataNode) -> Response {
    client
        .edit_config(
            Datastore::Candidate,
            config,
            DefaultOperation::Merge,
            ErrorOption::StopOnError,
            TestOption::TestThenSet,
        )
        .await
        .unwrap()
}

#[tokio::test]
async fn hello_exchange_upgrades_to_chunked_and_reads_config() {
    let harness = harness();
    let client = connect(&harness).await;

    // The server named the session; both sides advertise 1.1 so the
    // exchange below already rides chunked framing.
    assert!(client.session_id() >= 1);
    assert!(client.is_connected());

    let response = client.get_config(Datastore::Running, None).await.unwrap();
    let Response::Data(data) = response else {
        panic!("expected data");
    };
    assert_eq!(data.name, "data");

    client.close().await.unwrap();
    assert!(!client.is_connected());
}

#[tokio::test]
async fn edit_commit_then_get_config_roundtrip() {
    let harness = harness();
    let client = connect(&harness).await;

    assert_eq!(
        edit_candidate(&client, interface_config("eth0", "")).await,
        Response::Ok
    );
    assert_eq!(
        client.commit(Commit::default()).await.unwrap(),
        Response::Ok
    );
    assert_eq!(harness.backend.applied_count(), 1);

    let Response::Data(data) = client.get_config(Datastore::Running, None).await.unwrap()
    else {
        panic!("expected data");
    };
    let entry = data
        .child("interfaces")
        .unwrap()
        .find_entry("interface", &[("name".into(), "eth0".into())])
        .unwrap();
    assert_eq!(entry.child_value("enabled"), Some("true"));

    client.close().await.unwrap();
}

#[tokio::test]
async fn locked_candidate_denies_other_session_edits() {
    let harness = harness();
    let holder = connect(&harness).await;
    let intruder = connect(&harness).await;

    assert_eq!(holder.lock(Datastore::Candidate).await.unwrap(), Response::Ok);

    let response = edit_candidate(&intruder, interface_config("eth0", "")).await;
    let Response::Errors(errors) = response else {
        panic!("expected lock-denied");
    };
    assert_eq!(errors[0].tag, ErrorTag::LockDenied);
    assert_eq!(
        errors[0].info,
        vec![(
            "session-id".to_string(),
            holder.session_id().to_string()
        )]
    );

    // The lock dies with its session; the intruder can then take it.
    holder.close().await.unwrap();
    loop {
        match intruder.lock(Datastore::Candidate).await.unwrap() {
            Response::Ok => break,
            Response::Errors(_) => tokio::time::sleep(std::time::Duration::from_millis(20)).await,
            other => panic!("unexpected {other:?}"),
        }
    }
    intruder.close().await.unwrap();
}

#[tokio::test]
async fn commit_with_apply_failure_rolls_back_running() {
    let harness = harness();
    let client = connect(&harness).await;

    let vrf = xml::parse(
        format!(
            r#"<config><network-instances xmlns="{NI_NS}"><network-instance><name>blue</name></network-instance></network-instances></config>"#
        )
        .as_bytes(),
    )
    .unwrap();
    assert_eq!(edit_candidate(&client, vrf).await, Response::Ok);

    let pre = harness.state.stores.snapshot(Datastore::Running);
    harness.backend.reject_next("vrf blue not supported");

    let Response::Errors(errors) = client.commit(Commit::default()).await.unwrap() else {
        panic!("expected commit failure");
    };
    assert_eq!(errors[0].tag, ErrorTag::OperationFailed);
    assert!(errors[0]
        .info
        .iter()
        .any(|(k, v)| k == "reason" && v.contains("vrf blue")));

    // Bit-for-bit pre-commit running.
    assert_eq!(harness.state.stores.snapshot(Datastore::Running), pre);
    client.close().await.unwrap();
}

#[tokio::test]
async fn subtree_filter_narrows_get_config() {
    let harness = harness();
    let client = connect(&harness).await;

    edit_candidate(&client, interface_config("eth0", "")).await;
    edit_candidate(&client, interface_config("eth1", "")).await;
    client.commit(Commit::default()).await.unwrap();

    let filter = xml::parse(
        format!(
            r#"<filter type="subtree"><interfaces xmlns="{IF_NS}"><interface><name>eth1</name></interface></interfaces></filter>"#
        )
        .as_bytes(),
    )
    .unwrap();
    let Response::Data(data) = client
        .get_config(Datastore::Running, Some(Filter::Subtree(filter)))
        .await
        .unwrap()
    else {
        panic!("expected data");
    };
    let interfaces = data.child("interfaces").unwrap();
    assert_eq!(interfaces.children_named("interface").count(), 1);
    assert_eq!(
        interfaces.children[0].child_value("name"),
        Some("eth1")
    );
    client.close().await.unwrap();
}

#[tokio::test]
async fn get_merges_yang_library_and_backend_state() {
    use netd_domain::descriptor::{InterfaceDescriptor, OperStatus};

    let harness = harness();
    harness.backend.seed_interfaces(vec![InterfaceDescriptor {
        name: "lo0".into(),
        if_type: "softwareLoopback".into(),
        enabled: true,
        oper_status: OperStatus::Up,
        description: None,
        addresses: Vec::new(),
    }]);
    let client = connect(&harness).await;

    let Response::Data(data) = client.get(None).await.unwrap() else {
        panic!("expected data");
    };
    // Operational overlay for the unconfigured loopback.
    let lo0 = data
        .child("interfaces")
        .unwrap()
        .find_entry("interface", &[("name".into(), "lo0".into())])
        .unwrap();
    assert_eq!(lo0.child_value("oper-status"), Some("up"));
    // The YANG library rides along under get.
    let library = data.child("modules-state").unwrap();
    assert!(library
        .find_entry(
            "module",
            &[
                ("name".into(), "ietf-interfaces".into()),
                ("revision".into(), "2018-02-20".into())
            ]
        )
        .is_some());

    client.close().await.unwrap();
}

#[tokio::test]
async fn create_existing_and_delete_missing_edges() {
    let harness = harness();
    let client = connect(&harness).await;

    edit_candidate(&client, interface_config("eth0", "")).await;

    // create on existing → data-exists
    let Response::Errors(errors) =
        edit_candidate(&client, interface_config("eth0", r#" operation="create""#)).await
    else {
        panic!("expected data-exists");
    };
    assert_eq!(errors[0].tag, ErrorTag::DataExists);

    // delete on absent → data-missing
    let Response::Errors(errors) =
        edit_candidate(&client, interface_config("eth9", r#" operation="delete""#)).await
    else {
        panic!("expected data-missing");
    };
    assert_eq!(errors[0].tag, ErrorTag::DataMissing);

    // remove on absent → ok
    assert_eq!(
        edit_candidate(&client, interface_config("eth9", r#" operation="remove""#)).await,
        Response::Ok
    );

    client.close().await.unwrap();
}

#[tokio::test]
async fn kill_session_forces_peer_out() {
    let harness = harness();
    let admin = connect(&harness).await;
    let victim = connect(&harness).await;

    assert_eq!(
        admin.kill_session(victim.session_id()).await.unwrap(),
        Response::Ok
    );

    // The victim's next round trip fails as its transport dies.
    let result = victim.get_config(Datastore::Running, None).await;
    assert!(matches!(
        result,
        Err(ClientError::Expect(ExpectFailure::SessionLost(_)))
            | Err(ClientError::Expect(ExpectFailure::Timeout { .. }))
            | Err(ClientError::NotConnected)
            | Err(ClientError::Session(_))
    ));

    // Killing yourself is refused.
    let Response::Errors(errors) = admin.kill_session(admin.session_id()).await.unwrap() else {
        panic!("expected error");
    };
    assert_eq!(errors[0].tag, ErrorTag::InvalidValue);

    admin.close().await.unwrap();
}

#[tokio::test]
async fn get_schema_serves_module_source() {
    let harness = harness();
    let client = connect(&harness).await;

    let Response::Data(data) = client
        .get_schema("ietf-interfaces", Some("2018-02-20"))
        .await
        .unwrap()
    else {
        panic!("expected data");
    };
    assert!(data
        .value
        .as_deref()
        .unwrap()
        .contains("module ietf-interfaces"));

    let Response::Errors(errors) = client.get_schema("no-such-module", None).await.unwrap()
    else {
        panic!("expected error");
    };
    assert_eq!(errors[0].tag, ErrorTag::InvalidValue);

    client.close().await.unwrap();
}

#[tokio::test]
async fn validate_and_discard_changes() {
    let harness = harness();
    let client = connect(&harness).await;

    edit_candidate(&client, interface_config("eth0", "")).await;
    assert_eq!(
        client.validate(Datastore::Candidate).await.unwrap(),
        Response::Ok
    );

    assert_eq!(client.discard_changes().await.unwrap(), Response::Ok);
    assert_eq!(
        harness.state.stores.snapshot(Datastore::Candidate),
        harness.state.stores.snapshot(Datastore::Running)
    );

    client.close().await.unwrap();
}
