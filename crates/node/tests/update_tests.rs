//! Update protocol: upload modes, immutability and side channels.

mod common;

use async_compression::tokio::write::GzipEncoder;
use common::{TestNodes, fasta};
use shoal_core::node::NodeBody;
use shoal_core::{Checksum, NodeId};
use shoal_metadata::NodeQuery;
use shoal_node::{NodeError, UpdateRequest};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;

async fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzipEncoder::new(Vec::new());
    encoder.write_all(data).await.unwrap();
    encoder.shutdown().await.unwrap();
    encoder.into_inner()
}

#[tokio::test]
async fn test_upload_sets_file_checksum_and_size_index() {
    let nodes = TestNodes::new().await;
    let (data, _) = fasta(50);
    let node = nodes.upload("reads.fa", &data).await;

    assert!(node.has_file());
    assert_eq!(node.type_name(), "");
    assert_eq!(node.file.name, "reads.fa");
    assert_eq!(node.file.size, data.len() as u64);
    assert_eq!(
        node.file.sha256(),
        Some(Checksum::compute(&data).to_hex().as_str())
    );
    let size = &node.indexes["size"];
    assert_eq!(size.total_units, 1);
    assert_eq!(size.avg_unit_size, 1024 * 1024);
    assert_eq!(size.format, "dynamic");
    assert!(!node.version.is_empty());
    assert_eq!(node.acl.owner.as_deref(), Some("alice"));

    let stored = nodes.service.get(&node.id).await.unwrap();
    assert_eq!(stored.version, node.version);
    assert_eq!(nodes.download(&stored).await, data);
    let snapshot = nodes.service.storage().read_snapshot(&node.id).await.unwrap();
    assert_eq!(snapshot.version, node.version);
}

#[tokio::test]
async fn test_gzip_upload_is_decoded_and_renamed() {
    let nodes = TestNodes::new().await;
    let (data, _) = fasta(200);
    let request = UpdateRequest::new().file("gzip", nodes.stage("reads.fa.gz", &gzip(&data).await));
    let node = nodes.service.create(None, request).await.unwrap();

    assert_eq!(node.file.name, "reads.fa");
    assert_eq!(node.file.size, data.len() as u64);
    assert_eq!(nodes.download(&node).await, data);
}

#[tokio::test]
async fn test_file_defining_modes_refused_once_file_is_set() {
    let nodes = TestNodes::new().await;
    let (data, _) = fasta(10);
    let other = nodes.upload("other.fa", &data).await;
    let node = nodes.upload("reads.fa", &data).await;
    let before = node.file.clone();

    let requests = vec![
        UpdateRequest::new().file("upload", nodes.stage("again.fa", &data)),
        UpdateRequest::new().param("upload_url", "http://127.0.0.1:9/x.fa"),
        UpdateRequest::new().param("parts", "2"),
        UpdateRequest::new()
            .param("type", "virtual")
            .param("source", other.id.to_string()),
        UpdateRequest::new()
            .param("path", "/data/x.fa")
            .param("action", "keep_file"),
        UpdateRequest::new().param("copy_data", other.id.to_string()),
        UpdateRequest::new()
            .param("parent_node", other.id.to_string())
            .param("parent_index", "record")
            .file("subset_indices", nodes.stage("ids", b"1\n")),
    ];
    for request in requests {
        match nodes.service.update(&node.id, request).await {
            Err(NodeError::FileImmutable(id)) => assert_eq!(id, node.id),
            other => panic!("expected FileImmutable, got {other:?}"),
        }
    }
    assert_eq!(nodes.service.get(&node.id).await.unwrap().file, before);
}

#[tokio::test]
async fn test_incompatible_modes_create_nothing() {
    let nodes = TestNodes::new().await;
    let request = UpdateRequest::new()
        .file("upload", nodes.stage("reads.fa", b">a\nAC\n"))
        .param("parts", "2");
    match nodes.service.create(None, request).await {
        Err(NodeError::InvalidRequest(msg)) => assert_eq!(msg, "upload incompatible with parts"),
        other => panic!("unexpected: {other:?}"),
    }
    let count = nodes
        .service
        .metadata()
        .count_nodes(&NodeQuery::all())
        .await
        .unwrap();
    assert_eq!(count, 0);
}

#[tokio::test]
async fn test_attributes_are_write_once() {
    let nodes = TestNodes::new().await;
    let node = nodes
        .service
        .create(None, UpdateRequest::new())
        .await
        .unwrap();

    let both = UpdateRequest::new()
        .param("attributes_str", "{}")
        .file("attributes", nodes.stage("attr.json", b"{}"));
    assert!(matches!(
        nodes.service.update(&node.id, both).await,
        Err(NodeError::InvalidRequest(_))
    ));

    let set = UpdateRequest::new().file("attributes", nodes.stage("attr.json", br#"{"sample":"s1"}"#));
    let node = nodes.service.update(&node.id, set).await.unwrap();
    assert_eq!(node.attributes, Some(serde_json::json!({"sample": "s1"})));

    let again = UpdateRequest::new().param("attributes_str", r#"{"sample":"s2"}"#);
    assert!(matches!(
        nodes.service.update(&node.id, again).await,
        Err(NodeError::AttributesImmutable(_))
    ));
}

#[tokio::test]
async fn test_metadata_side_channels() {
    let nodes = TestNodes::new().await;
    let node = nodes
        .service
        .create(None, UpdateRequest::new().param("tags", "a,b"))
        .await
        .unwrap();
    let id = node.id;

    let node = nodes
        .service
        .update(
            &id,
            UpdateRequest::new()
                .param("tags", "b,c")
                .param("linkage", "parent")
                .param("ids", "x, y")
                .param("operation", "split")
                .param("priority", "7")
                .param("format", "fasta")
                .param("expiration", "2H"),
        )
        .await
        .unwrap();
    assert_eq!(node.tags, vec!["a", "b", "c"]);
    assert_eq!(node.linkages.len(), 1);
    assert_eq!(node.linkages[0].ids, vec!["x", "y"]);
    assert_eq!(node.linkages[0].operation, "split");
    assert_eq!(node.priority, 7);
    assert_eq!(node.file.format, "fasta");
    assert!(node.expiration.is_some());

    let parent_again = UpdateRequest::new().param("linkage", "parent").param("ids", "z");
    assert!(matches!(
        nodes.service.update(&id, parent_again).await,
        Err(NodeError::ParentLinkageImmutable(_))
    ));
    let derived = UpdateRequest::new().param("linkage", "derived").param("ids", "z");
    assert_eq!(nodes.service.update(&id, derived).await.unwrap().linkages.len(), 2);

    assert!(matches!(
        nodes.service.update(&id, UpdateRequest::new().param("format", "fastq")).await,
        Err(NodeError::FormatImmutable { .. })
    ));
    assert!(matches!(
        nodes.service.update(&id, UpdateRequest::new().param("priority", "high")).await,
        Err(NodeError::InvalidRequest(_))
    ));
    assert!(matches!(
        nodes.service.update(&id, UpdateRequest::new().param("expiration", "2W")).await,
        Err(NodeError::Core(shoal_core::Error::InvalidExpiration(_)))
    ));
    assert!(matches!(
        nodes.service.update(&id, UpdateRequest::new().param("file_name", "x.fa")).await,
        Err(NodeError::InvalidRequest(_))
    ));

    let node = nodes
        .service
        .update(&id, UpdateRequest::new().param("remove_expiration", "true"))
        .await
        .unwrap();
    assert!(node.expiration.is_none());
}

#[tokio::test]
async fn test_revisions_are_capped_newest_first_and_clearable() {
    let nodes = TestNodes::new().await;
    let (data, _) = fasta(5);
    let node = nodes.upload("reads.fa", &data).await;
    let first_version = node.version.clone();
    assert_eq!(node.revisions.len(), 1);

    for request in [
        UpdateRequest::new().param("attributes_str", "{}"),
        UpdateRequest::new().param("format", "fasta"),
        UpdateRequest::new().param("file_name", "renamed.fa"),
    ] {
        nodes.service.update(&node.id, request).await.unwrap();
    }
    // tags are not part of the version, so no new revision is recorded
    let node = nodes
        .service
        .update(&node.id, UpdateRequest::new().param("tags", "t"))
        .await
        .unwrap();

    assert_eq!(node.revisions.len(), 3);
    assert_eq!(node.revisions[0].version, node.version);
    assert!(node.revisions.iter().all(|r| r.version != first_version));
    assert!(node.revisions.iter().all(|r| r.revisions.is_empty()));
    assert_eq!(node.file.name, "renamed.fa");

    let node = nodes
        .service
        .update(&node.id, UpdateRequest::new().param("clear_revisions", "true"))
        .await
        .unwrap();
    assert_eq!(node.revisions.len(), 1);
}

#[tokio::test]
async fn test_file_lock_blocks_uploads_and_downloads() {
    let nodes = TestNodes::new().await;
    let empty = nodes
        .service
        .create(None, UpdateRequest::new().param("file_lock", "true"))
        .await
        .unwrap();
    let upload = UpdateRequest::new().file("upload", nodes.stage("a.fa", b">a\nAC\n"));
    assert!(matches!(
        nodes.service.update(&empty.id, upload).await,
        Err(NodeError::FileLocked(_))
    ));

    let (data, _) = fasta(5);
    let node = nodes.upload("reads.fa", &data).await;
    nodes
        .service
        .update(&node.id, UpdateRequest::new().param("file_lock", "true"))
        .await
        .unwrap();
    assert!(matches!(
        nodes.service.plan_download(&node, None).await,
        Err(NodeError::FileLocked(_))
    ));
    assert!(matches!(
        nodes
            .service
            .update(&node.id, UpdateRequest::new().param("file_lock", "true"))
            .await,
        Err(NodeError::FileLocked(_))
    ));

    nodes
        .service
        .update(&node.id, UpdateRequest::new().param("file_lock", "false"))
        .await
        .unwrap();
    assert_eq!(nodes.download(&node).await, data);
}

#[tokio::test]
async fn test_fixed_parts_assemble_in_order() {
    let nodes = TestNodes::new().await;
    let node = nodes
        .service
        .create(None, UpdateRequest::new().param("parts", "3"))
        .await
        .unwrap();
    assert_eq!(node.type_name(), "parts");
    let id = node.id;

    let part = |n: &str, body: &[u8]| UpdateRequest::new().file(n, nodes.stage("reads.fa", body));
    let node = nodes.service.update(&id, part("2", b">b\nGG\n")).await.unwrap();
    assert!(!node.has_file());
    assert!(matches!(
        nodes.service.update(&id, part("2", b">x\nTT\n")).await,
        Err(NodeError::InvalidRequest(_))
    ));
    assert!(matches!(
        nodes.service.update(&id, part("4", b">x\nTT\n")).await,
        Err(NodeError::InvalidRequest(_))
    ));
    assert!(matches!(
        nodes.service.update(&id, UpdateRequest::new().param("parts", "5")).await,
        Err(NodeError::InvalidRequest(_))
    ));
    nodes.service.update(&id, part("1", b">a\nAA\n")).await.unwrap();
    let node = nodes.service.update(&id, part("3", b">c\nCC\n")).await.unwrap();

    assert!(matches!(node.body, NodeBody::Plain));
    assert!(node.has_file());
    assert_eq!(node.file.name, "reads.fa");
    assert_eq!(nodes.download(&node).await, b">a\nAA\n>b\nGG\n>c\nCC\n");
    let parts_dir = nodes.service.storage().layout().parts_dir(&id);
    assert!(!parts_dir.exists());
}

#[tokio::test]
async fn test_variable_parts_close_with_compression() {
    let nodes = TestNodes::new().await;
    let node = nodes
        .service
        .create(
            None,
            UpdateRequest::new()
                .param("parts", "unknown")
                .param("compression", "gzip"),
        )
        .await
        .unwrap();
    let id = node.id;

    let second = gzip(b">b\nGGGG\n").await;
    let first = gzip(b">a\nAAAA\n").await;
    nodes
        .service
        .update(&id, UpdateRequest::new().file("2", nodes.stage("reads.fa.gz", &second)))
        .await
        .unwrap();
    nodes
        .service
        .update(&id, UpdateRequest::new().file("1", nodes.stage("reads.fa.gz", &first)))
        .await
        .unwrap();
    let node = nodes
        .service
        .update(&id, UpdateRequest::new().param("parts", "close"))
        .await
        .unwrap();

    assert_eq!(node.file.name, "reads.fa");
    assert_eq!(nodes.download(&node).await, b">a\nAAAA\n>b\nGGGG\n");
}

#[tokio::test]
async fn test_closing_fixed_parts_is_refused() {
    let nodes = TestNodes::new().await;
    let node = nodes
        .service
        .create(None, UpdateRequest::new().param("parts", "2"))
        .await
        .unwrap();
    assert!(matches!(
        nodes
            .service
            .update(&node.id, UpdateRequest::new().param("parts", "close"))
            .await,
        Err(NodeError::InvalidRequest(_))
    ));
}

#[tokio::test]
async fn test_virtual_node_concatenates_sources() {
    let nodes = TestNodes::new().await;
    let a = nodes.upload("a.fa", b">a\nAAAA\n").await;
    let b = nodes.upload("b.fa", b">b\nCC\n").await;
    let request = UpdateRequest::new()
        .param("type", "virtual")
        .param("source", format!("{},{}", a.id, b.id));
    let virt = nodes.service.create(None, request).await.unwrap();

    let expected = b">a\nAAAA\n>b\nCC\n";
    assert!(virt.is_virtual());
    assert!(virt.file.is_virtual);
    assert_eq!(virt.file.virtual_parts, vec![a.id, b.id]);
    assert_eq!(virt.file.size, expected.len() as u64);
    assert_eq!(virt.file.sha256(), Some(Checksum::compute(expected).to_hex().as_str()));
    assert_eq!(nodes.download(&virt).await, expected);

    let nested = UpdateRequest::new()
        .param("type", "virtual")
        .param("source", virt.id.to_string());
    assert!(matches!(
        nodes.service.create(None, nested).await,
        Err(NodeError::InvalidRequest(_))
    ));

    match nodes.service.delete(&a.id).await {
        Err(NodeError::NodeReferenced { referenced_by, .. }) => {
            assert_eq!(referenced_by, vec![virt.id.to_string()])
        }
        other => panic!("expected NodeReferenced, got {other:?}"),
    }
    nodes.service.delete(&virt.id).await.unwrap();
    nodes.service.delete(&a.id).await.unwrap();
}

#[tokio::test]
async fn test_copy_shares_bytes_and_survives_source_deletion() {
    let nodes = TestNodes::new().await;
    let (data, _) = fasta(30);
    let source = nodes.upload("reads.fa", &data).await;
    nodes
        .service
        .update(&source.id, UpdateRequest::new().param("attributes_str", r#"{"k":1}"#))
        .await
        .unwrap();

    let copy = |attrs: bool| {
        let mut request = UpdateRequest::new().param("copy_data", source.id.to_string());
        if attrs {
            request = request.param("copy_attributes", "true");
        }
        request
    };
    let first = nodes.service.create(None, copy(true)).await.unwrap();
    let second = nodes.service.create(None, copy(false)).await.unwrap();

    assert_eq!(first.type_name(), "copy");
    assert_eq!(first.attributes, Some(serde_json::json!({"k": 1})));
    assert_eq!(second.attributes, None);
    assert_eq!(first.file.sha256(), source.file.sha256());
    assert!(first.indexes.contains_key("size"));
    let source_data = nodes.service.storage().layout().data_path(&source.id);
    assert_eq!(first.file.path.as_deref(), Some(source_data.as_path()));
    assert_eq!(nodes.download(&first).await, data);

    nodes.service.delete(&source.id).await.unwrap();
    assert!(nodes.service.get(&source.id).await.unwrap_err().is_not_found());

    let first = nodes.service.get(&first.id).await.unwrap();
    let second = nodes.service.get(&second.id).await.unwrap();
    let (heir, other) = if first.file.path.is_none() {
        (first, second)
    } else {
        (second, first)
    };
    assert!(heir.file.path.is_none());
    assert_eq!(nodes.download(&heir).await, data);
    assert_eq!(nodes.download(&other).await, data);
    assert!(other.file.path.is_some());
}

#[tokio::test]
async fn test_copy_of_virtual_node_is_refused() {
    let nodes = TestNodes::new().await;
    let a = nodes.upload("a.fa", b">a\nAC\n").await;
    let virt = nodes
        .service
        .create(
            None,
            UpdateRequest::new()
                .param("type", "virtual")
                .param("source", a.id.to_string()),
        )
        .await
        .unwrap();
    let request = UpdateRequest::new().param("copy_data", virt.id.to_string());
    assert!(matches!(
        nodes.service.create(None, request).await,
        Err(NodeError::InvalidRequest(_))
    ));
}

#[tokio::test]
async fn test_local_path_ingestion() {
    let import = tempfile::tempdir().unwrap();
    let allowed = import.path().to_path_buf();
    let nodes = TestNodes::with_config(|config| config.node.local_paths = vec![allowed]).await;
    let (data, _) = fasta(20);
    let local = import.path().join("reads.fa");
    std::fs::write(&local, &data).unwrap();

    let keep = UpdateRequest::new()
        .param("path", local.display().to_string())
        .param("action", "keep_file");
    let kept = nodes.service.create(None, keep).await.unwrap();
    assert_eq!(kept.file.name, "reads.fa");
    assert_eq!(kept.file.path, Some(local.canonicalize().unwrap()));
    assert_eq!(nodes.download(&kept).await, data);

    let copy = UpdateRequest::new()
        .param("path", local.display().to_string())
        .param("action", "copy_file");
    let copied = nodes.service.create(None, copy).await.unwrap();
    assert!(copied.file.path.is_none());
    assert!(nodes.service.storage().layout().data_path(&copied.id).exists());
    assert!(local.exists());

    let outside = nodes.root().join("outside.fa");
    std::fs::write(&outside, &data).unwrap();
    let escape = UpdateRequest::new()
        .param("path", outside.display().to_string())
        .param("action", "copy_file");
    assert!(matches!(
        nodes.service.create(None, escape).await,
        Err(NodeError::InvalidRequest(_))
    ));

    nodes.service.delete(&kept.id).await.unwrap();
    assert!(local.exists());
}

#[tokio::test]
async fn test_rejected_move_keeps_source_file() {
    let import = tempfile::tempdir().unwrap();
    let allowed = import.path().to_path_buf();
    let nodes = TestNodes::with_config(|config| config.node.local_paths = vec![allowed]).await;
    let (data, _) = fasta(10);
    let local = import.path().join("reads.fa");
    std::fs::write(&local, &data).unwrap();

    let request = UpdateRequest::new()
        .param("path", local.display().to_string())
        .param("action", "move_file")
        .param("attributes_str", "{not json");
    assert!(matches!(
        nodes.service.create(None, request).await,
        Err(NodeError::InvalidRequest(_))
    ));
    assert_eq!(std::fs::read(&local).unwrap(), data);
}

#[tokio::test]
async fn test_rejected_update_leaves_node_unchanged() {
    let nodes = TestNodes::new().await;
    let node = nodes
        .service
        .create(None, UpdateRequest::new())
        .await
        .unwrap();

    let staged = nodes.stage("reads.fa", b">a\nACGT\n");
    let request = UpdateRequest::new()
        .file("upload", staged.clone())
        .param("expiration", "999999999999999D")
        .param("file_lock", "true");
    assert!(matches!(
        nodes.service.update(&node.id, request).await,
        Err(NodeError::Core(shoal_core::Error::InvalidExpiration(_)))
    ));

    let stored = nodes.service.get(&node.id).await.unwrap();
    assert!(!stored.has_file());
    assert!(stored.expiration.is_none());
    assert_eq!(stored.version, node.version);
    assert!(staged.path.exists());
    assert!(!nodes.service.locks().files.is_active(&node.id));
}

#[tokio::test]
async fn test_failed_upload_mode_does_not_take_file_lock() {
    let nodes = TestNodes::new().await;
    let node = nodes
        .service
        .create(None, UpdateRequest::new())
        .await
        .unwrap();
    let request = UpdateRequest::new()
        .param("copy_data", NodeId::new().to_string())
        .param("file_lock", "true");
    assert!(nodes.service.update(&node.id, request).await.is_err());
    assert!(!nodes.service.locks().files.is_active(&node.id));

    nodes
        .service
        .update(&node.id, UpdateRequest::new().param("file_lock", "true"))
        .await
        .unwrap();
    assert!(nodes.service.locks().files.is_active(&node.id));
}

#[tokio::test]
async fn test_path_ingestion_disabled_by_default() {
    let nodes = TestNodes::new().await;
    let request = UpdateRequest::new()
        .param("path", "/etc/hostname")
        .param("action", "keep_file");
    assert!(matches!(
        nodes.service.create(None, request).await,
        Err(NodeError::InvalidRequest(_))
    ));
}

#[tokio::test]
async fn test_concurrent_updates_are_serialized() {
    let nodes = Arc::new(TestNodes::new().await);
    let node = nodes
        .service
        .create(None, UpdateRequest::new())
        .await
        .unwrap();

    let mut tasks = Vec::new();
    for i in 0..10 {
        let nodes = nodes.clone();
        let id = node.id;
        tasks.push(tokio::spawn(async move {
            nodes
                .service
                .update(&id, UpdateRequest::new().param("tags", format!("t{i}")))
                .await
                .unwrap();
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let node = nodes.service.get(&node.id).await.unwrap();
    assert_eq!(node.tags.len(), 10);
}

#[tokio::test]
async fn test_delete_unknown_node() {
    let nodes = TestNodes::new().await;
    let err = nodes.service.delete(&NodeId::new()).await.unwrap_err();
    assert!(err.is_not_found());
}
