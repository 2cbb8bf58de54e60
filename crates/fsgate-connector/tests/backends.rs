//! Network volumes driven through the command protocol, backed by the
//! kernel's in-process fakes.

use fsgate_connector::constants::ICON_NETWORK;
use fsgate_connector::{Gateway, GatewayConfig, Params, Request, Upload};
use fsgate_kernel::vfs::backends::artifact::mock::MockArtifactStore;
use fsgate_kernel::vfs::backends::artifact::{ArtifactDriver, ArtifactOptions};
use fsgate_kernel::vfs::backends::object::{MemoryObjectStore, ObjectDriver};
use fsgate_kernel::vfs::backends::remote::mock::MockService;
use fsgate_kernel::vfs::backends::remote::{RemoteDriver, RemoteOptions};
use fsgate_kernel::vfs::{Driver, Permissions, VolumeMeta};
use serde_json::Value;
use std::sync::Arc;

async fn call(gateway: &Gateway, cmd: &str, pairs: &[(&str, &str)]) -> Value {
    let params: Params = pairs.iter().copied().collect();
    gateway
        .dispatch(Request::new(cmd, params))
        .await
        .json()
        .cloned()
        .unwrap()
}

async fn upload(gateway: &Gateway, dir: &str, name: &str, data: &[u8]) -> Value {
    let request = Request::new("upload", Params::new().with("target", dir))
        .with_uploads(vec![Upload::new(name, data)]);
    gateway.dispatch(request).await.json().cloned().unwrap()
}

fn hash(value: &Value, list: &str) -> String {
    value[list][0]["hash"].as_str().unwrap().to_string()
}

fn network(kind: &str) -> VolumeMeta {
    VolumeMeta::new(kind).with_icon(ICON_NETWORK).network()
}

/// Mount a driver and return its root token.
fn mount(gateway: &Gateway, root: &str, permissions: Permissions, driver: Arc<dyn Driver>, kind: &str) -> String {
    gateway
        .mount(root, permissions, driver, network(kind))
        .unwrap()
        .token()
}

#[tokio::test]
async fn test_object_store_scenario() {
    let gw = Gateway::new(GatewayConfig::default()).await.unwrap();
    let store = Arc::new(MemoryObjectStore::new());
    let driver = ObjectDriver::connect(store.clone(), "inbox/", false).await.unwrap();
    let root = mount(&gw, "/inbox", Permissions::read_write(), Arc::new(driver), "s3");
    assert_eq!(root, "v2_Lw");

    let docs = hash(&call(&gw, "mkdir", &[("target", &root), ("name", "docs")]).await, "added");
    let added = upload(&gw, &docs, "report.txt", b"hello world").await;
    assert_eq!(added["added"][0]["size"], 11);
    assert_eq!(store.object("inbox/docs/report.txt").unwrap(), b"hello world");
    assert_eq!(store.calls("complete_multipart"), 1);
    assert_eq!(store.open_uploads(), 0);

    let listing = call(&gw, "open", &[("target", &docs)]).await;
    let files = listing["files"].as_array().unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0]["name"], "report.txt");
    assert_eq!(files[0]["phash"], docs.as_str());

    let root_info = call(&gw, "info", &[("targets[]", &root)]).await;
    assert_eq!(root_info["files"][0]["dirs"], 1);
    assert!(root_info["files"][0]["netkey"].as_str().unwrap().starts_with("s3-"));
    assert_eq!(root_info["files"][0]["options"]["csscls"], ICON_NETWORK);

    let removed = call(&gw, "rm", &[("targets[]", &docs)]).await;
    assert_eq!(removed["removed"][0], docs.as_str());
    assert!(store.keys().iter().all(|k| !k.starts_with("inbox/docs/")));
}

#[tokio::test]
async fn test_object_store_paste_from_memory() {
    let gw = Gateway::new(GatewayConfig::default()).await.unwrap();
    let store = Arc::new(MemoryObjectStore::new());
    let driver = ObjectDriver::connect(store.clone(), "", false).await.unwrap();
    let root = mount(&gw, "/bucket", Permissions::read_write(), Arc::new(driver), "s3");

    let dir = hash(&call(&gw, "mkdir", &[("target", "v0_Lw"), ("name", "src")]).await, "added");
    upload(&gw, &dir, "a.txt", b"aaa").await;
    upload(&gw, &dir, "b.txt", b"bb").await;

    let pasted = call(&gw, "paste", &[("dst", &root), ("targets[]", &dir), ("cut", "1")]).await;
    assert_eq!(pasted["removed"][0], dir.as_str());
    assert_eq!(store.object("src/a.txt").unwrap(), b"aaa");
    assert_eq!(store.object("src/b.txt").unwrap(), b"bb");

    let size = call(&gw, "size", &[("targets[]", &root)]).await;
    assert_eq!(size["size"], 5);
    assert_eq!(size["fileCnt"], 2);
}

#[tokio::test]
async fn test_copy_onto_object_store_uses_full_parts() {
    let gw = Gateway::new(GatewayConfig::default()).await.unwrap();
    let store = Arc::new(MemoryObjectStore::new());
    let driver = ObjectDriver::connect(store.clone(), "", false).await.unwrap();
    let root = mount(&gw, "/bucket", Permissions::read_write(), Arc::new(driver), "s3");

    let data: Vec<u8> = (0..6 * 1024 * 1024).map(|i| (i % 251) as u8).collect();
    let file = hash(&upload(&gw, "v0_Lw", "big.bin", &data).await, "added");

    let pasted = call(&gw, "paste", &[("dst", &root), ("targets[]", &file)]).await;
    assert_eq!(pasted["added"][0]["size"], data.len());
    // 5 MiB minimum: one full part plus the 1 MiB tail.
    assert_eq!(store.calls("upload_part"), 2);
    assert_eq!(store.calls("complete_multipart"), 1);
    assert_eq!(store.object("big.bin").unwrap(), data);
}

#[tokio::test]
async fn test_netunmount_releases_volume() {
    let gw = Gateway::new(GatewayConfig::default()).await.unwrap();
    let driver = ObjectDriver::connect(Arc::new(MemoryObjectStore::new()), "", false)
        .await
        .unwrap();
    let root = mount(&gw, "/bucket", Permissions::read_write(), Arc::new(driver), "s3");
    assert_eq!(gw.mounts().len(), 3);

    let result = call(&gw, "netmount", &[("protocol", "netunmount"), ("user", &root)]).await;
    assert_eq!(result["removed"][0], root.as_str());
    assert_eq!(gw.mounts().len(), 2);

    let stale = call(&gw, "ls", &[("target", &root)]).await;
    assert_eq!(stale["error"][0], "errInvalidTarget");
}

#[tokio::test]
async fn test_mount_collision_gets_suffix() {
    let gw = Gateway::new(GatewayConfig::default()).await.unwrap();
    for _ in 0..2 {
        let driver = ObjectDriver::connect(Arc::new(MemoryObjectStore::new()), "", false)
            .await
            .unwrap();
        mount(&gw, "/data", Permissions::read_write(), Arc::new(driver), "s3");
    }
    let roots: Vec<String> = gw.mounts().roots().iter().map(|t| t.volume.root.clone()).collect();
    assert_eq!(roots[2..], ["/data".to_string(), "/data-1".to_string()]);
}

#[tokio::test]
async fn test_remote_service_volume() {
    let gw = Gateway::new(GatewayConfig::default()).await.unwrap();
    let service = Arc::new(MockService::new());
    let driver = RemoteDriver::connect(service.clone(), RemoteOptions::default())
        .await
        .unwrap();
    let root = mount(&gw, "/ws:fs", Permissions::read_write(), Arc::new(driver), "hyphafs");

    let dir = hash(&call(&gw, "mkdir", &[("target", &root), ("name", "notes")]).await, "added");
    assert!(service.is_dir("notes"));
    let file = hash(&upload(&gw, &dir, "todo.md", b"- write tests").await, "added");
    assert_eq!(service.file("notes/todo.md").unwrap(), b"- write tests");

    let renamed = call(&gw, "rename", &[("target", &file), ("name", "done.md")]).await;
    assert_eq!(renamed["added"][0]["name"], "done.md");
    assert_eq!(renamed["added"][0]["size"], 13);
    assert!(service.file("notes/todo.md").is_none());

    let removed = call(&gw, "rm", &[("targets[]", &dir)]).await;
    assert_eq!(removed["removed"][0], dir.as_str());
    assert!(!service.is_dir("notes"));
}

#[tokio::test]
async fn test_artifact_volume_writes_commit_once() {
    let gw = Gateway::new(GatewayConfig::default()).await.unwrap();
    let store = Arc::new(MockArtifactStore::new());
    store.add_artifact("ws/data", Some("data"), "generic", None);
    store.add_file("ws/data", "readme.txt", b"read me");

    let options = ArtifactOptions {
        read_only: false,
        ..ArtifactOptions::default()
    };
    let driver = ArtifactDriver::connect(store.clone(), store.clone(), "ws/data", options)
        .await
        .unwrap();
    let root = mount(&gw, "/ws:data", Permissions::read_write(), Arc::new(driver), "hypha_artifacts");

    let listing = call(&gw, "open", &[("target", &root)]).await;
    assert_eq!(listing["files"][0]["name"], "readme.txt");

    let added = upload(&gw, &root, "new.txt", b"fresh").await;
    let file = hash(&added, "added");
    assert_eq!(store.file("ws/data", "new.txt").unwrap(), b"fresh");
    assert_eq!(store.calls("stage"), 1);
    assert_eq!(store.calls("commit"), 1);
    assert!(!store.is_staged("ws/data"));

    let mkdir = call(&gw, "mkdir", &[("target", &root), ("name", "sub")]).await;
    assert_eq!(mkdir["error"][0], "errUnsupported");

    let removed = call(&gw, "rm", &[("targets[]", &file)]).await;
    assert_eq!(removed["removed"][0], file.as_str());
    assert!(store.file("ws/data", "new.txt").is_none());
}

#[tokio::test]
async fn test_read_only_artifact_volume() {
    let gw = Gateway::new(GatewayConfig::default()).await.unwrap();
    let store = Arc::new(MockArtifactStore::new());
    store.add_artifact("public/models", Some("models"), "generic", None);
    store.add_file("public/models", "weights.bin", b"\x00\x01");

    let driver = ArtifactDriver::connect(store.clone(), store.clone(), "public/models", ArtifactOptions::default())
        .await
        .unwrap();
    let root = mount(&gw, "/public:models", Permissions::read_only(), Arc::new(driver), "hypha_artifacts");

    let info = call(&gw, "info", &[("targets[]", &root)]).await;
    assert_eq!(info["files"][0]["write"], 0);
    assert_eq!(info["files"][0]["locked"], 1);

    let result = upload(&gw, &root, "x.txt", b"x").await;
    assert!(result["added"].as_array().unwrap().is_empty());
    assert_eq!(result["warning"][0]["error"][0], "errPerm");
    assert_eq!(store.calls("stage"), 0);

    let listing = call(&gw, "ls", &[("target", &root)]).await;
    assert_eq!(listing["list"][0], "weights.bin");
}
