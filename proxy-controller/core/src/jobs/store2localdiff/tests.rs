use super::*;
use crate::{
    api::{op_item::Op, Node},
    test_util::{channel_sink, init_tracing, mk_endpoint, mk_service, render},
};
use prost::Message;

fn mk_store() -> Arc<Store> {
    let store = Store::shared();
    store.update(|tx| {
        for name in ["node-a", "node-b"] {
            tx.set_node(Node {
                name: name.to_string(),
                ..Default::default()
            });
        }
        tx.set_service(mk_service("ns", "svc"), vec![]);
        let mut named = mk_endpoint("ns", "svc", "svc-x", "pod-1", "10.0.0.1");
        named.node_name = "node-a".to_string();
        let anonymous = mk_endpoint("ns", "svc", "svc-x", "", "10.0.0.2");
        tx.set_endpoints_of_source("ns", "svc-x", vec![named, anonymous]);
        for set in proxystore::Set::ALL {
            tx.set_sync(set);
        }
    });
    store
}

#[tokio::test]
async fn streams_the_node_view() {
    let _tracing = init_tracing();
    let store = mk_store();
    let (sink, mut handle) = channel_sink();
    let cancel = CancellationToken::new();
    let job = tokio::spawn(Job::new(store.clone(), sink).run(cancel.clone()));

    let batch = handle.next_batch("node-a").await;
    assert_eq!(batch.len(), 4, "{batch:?}");
    assert_eq!(batch[0], "reset");
    assert_eq!(batch[1], "set ServicesSet ns/svc");
    assert_eq!(batch[2], "set EndpointsSet ns/svc/pod-1");
    assert!(batch[3].starts_with("set EndpointsSet ns/svc/"));
    let anonymous = batch[3].trim_start_matches("set EndpointsSet ").to_string();

    // Only the named endpoint remains.
    store.update(|tx| {
        let mut named = mk_endpoint("ns", "svc", "svc-x", "pod-1", "10.0.0.1");
        named.node_name = "node-a".to_string();
        tx.set_endpoints_of_source("ns", "svc-x", vec![named]);
    });
    let batch = handle.next_batch("node-a").await;
    assert_eq!(batch, vec![format!("del EndpointsSet {anonymous}")]);

    // Endpoints are removed before their service.
    store.update(|tx| tx.del_service("ns", "svc"));
    let batch = handle.next_batch("node-a").await;
    assert_eq!(
        batch,
        vec!["del EndpointsSet ns/svc/pod-1", "del ServicesSet ns/svc"]
    );

    cancel.cancel();
    let res = job.await.expect("job must not panic");
    assert!(matches!(res, Err(Error::Canceled)));
}

#[tokio::test]
async fn skips_revisions_without_changes() {
    let _tracing = init_tracing();
    let store = mk_store();
    let (sink, mut handle) = channel_sink();
    let job = tokio::spawn(Job::new(store.clone(), sink).run(CancellationToken::new()));
    handle.next_batch("node-a").await;

    handle
        .requests
        .send("node-a".to_string())
        .expect("job must be running");
    // A node's annotations are not part of any service's view.
    store.update(|tx| {
        tx.set_node(Node {
            name: "node-b".to_string(),
            annotations: [("k".to_string(), "v".to_string())].into_iter().collect(),
            ..Default::default()
        })
    });
    tokio::task::yield_now().await;
    assert!(handle.ops.try_recv().is_err());

    store.update(|tx| tx.set_service(mk_service("ns", "svc2"), vec![]));
    let mut batch = vec![];
    while let Some(op) = handle.ops.recv().await {
        let op = render(&op);
        if op == "sync" {
            break;
        }
        batch.push(op);
    }
    assert_eq!(batch, vec!["set ServicesSet ns/svc2"]);

    drop(handle);
    let res = job.await.expect("job must not panic");
    assert!(matches!(res, Err(Error::Closed)));
}

#[tokio::test]
async fn marks_local_endpoints() {
    let _tracing = init_tracing();
    let store = mk_store();
    let (sink, mut handle) = channel_sink();
    let job = tokio::spawn(Job::new(store.clone(), sink).run(CancellationToken::new()));

    handle
        .requests
        .send("node-a".to_string())
        .expect("job must be running");
    let mut local = vec![];
    while let Some(op) = handle.ops.recv().await {
        match op.op {
            Some(Op::Set(value)) if value.r#ref.as_ref().map(|r| r.set()) == Some(Set::EndpointsSet) => {
                let ep = Endpoint::decode(&*value.bytes).expect("endpoint must decode");
                local.push((value.r#ref.unwrap_or_default().path, ep.local));
            }
            Some(Op::Sync(_)) => break,
            _ => {}
        }
    }
    local.sort();
    assert_eq!(local.len(), 2);
    assert_eq!(local[1], ("ns/svc/pod-1".to_string(), true));
    assert!(!local[0].1);

    drop(handle);
    let _ = job.await;
}

#[tokio::test]
async fn merges_dual_stack_pods() {
    let _tracing = init_tracing();
    let store = mk_store();
    store.update(|tx| {
        let mut v6 = mk_endpoint("ns", "svc", "svc-y", "pod-1", "fd00::1");
        v6.node_name = "node-a".to_string();
        tx.set_endpoints_of_source("ns", "svc-y", vec![v6]);
    });

    let (sink, mut handle) = channel_sink();
    let job = tokio::spawn(Job::new(store.clone(), sink).run(CancellationToken::new()));
    handle
        .requests
        .send("node-b".to_string())
        .expect("job must be running");

    let mut pod = None;
    while let Some(op) = handle.ops.recv().await {
        match op.op {
            Some(Op::Set(value)) => {
                let path = value.r#ref.clone().unwrap_or_default().path;
                if path == "ns/svc/pod-1" {
                    assert!(pod.is_none(), "pod must be sent once");
                    pod = Some(Endpoint::decode(&*value.bytes).expect("endpoint must decode"));
                }
            }
            Some(Op::Sync(_)) => break,
            _ => {}
        }
    }
    let ips = pod.and_then(|ep| ep.ips).expect("pod must be sent");
    assert_eq!(ips.v4, vec!["10.0.0.1"]);
    assert_eq!(ips.v6, vec!["fd00::1"]);

    drop(handle);
    let _ = job.await;
}
