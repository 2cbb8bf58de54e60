//! Command protocol tests against the stock in-memory gateway.

use fsgate_connector::config::VolumeConfig;
use fsgate_connector::{Gateway, GatewayConfig, Params, Request, Response, Upload};
use serde_json::Value;
use std::io::Cursor;

async fn gateway() -> Gateway {
    Gateway::new(GatewayConfig::default()).await.unwrap()
}

async fn call(gateway: &Gateway, cmd: &str, pairs: &[(&str, &str)]) -> Value {
    let params: Params = pairs.iter().copied().collect();
    match gateway.dispatch(Request::new(cmd, params)).await {
        Response::Json(value) => value,
        Response::File { .. } => panic!("{cmd} returned a file"),
    }
}

async fn upload(gateway: &Gateway, dir: &str, name: &str, data: &[u8]) -> Value {
    let params = Params::new().with("target", dir);
    let request = Request::new("upload", params).with_uploads(vec![Upload::new(name, data)]);
    gateway.dispatch(request).await.json().cloned().unwrap()
}

fn error_kind(value: &Value) -> &str {
    value["error"][0].as_str().unwrap_or("")
}

fn hash(value: &Value, list: &str) -> String {
    value[list][0]["hash"].as_str().unwrap().to_string()
}

fn sample_png(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_fn(width, height, |x, y| image::Rgb([x as u8 * 20, y as u8 * 30, 128]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png).unwrap();
    out.into_inner()
}

async fn upload_chunk(gateway: &Gateway, chunk: &str, range: &str, data: &[u8]) -> Value {
    let params = Params::new()
        .with("target", HOME)
        .with("chunk", chunk)
        .with("range", range);
    let request = Request::new("upload", params).with_uploads(vec![Upload::new("blob", data)]);
    gateway.dispatch(request).await.json().cloned().unwrap()
}

const HOME: &str = "v0_Lw";

#[tokio::test]
async fn test_open_init_lists_volumes() {
    let gw = gateway().await;
    let result = call(&gw, "open", &[("init", "1")]).await;

    assert_eq!(result["api"], "2.1");
    assert_eq!(result["cwd"]["hash"], HOME);
    assert_eq!(result["uplMaxFile"], 1000);
    assert_eq!(result["uplMaxSize"], "102400.0M");
    assert_eq!(result["netDrivers"][0], "s3");
    let hashes: Vec<&str> = result["files"]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["hash"].as_str().unwrap())
        .collect();
    assert!(hashes.contains(&"v0_Lw"));
    assert!(hashes.contains(&"v1_Lw"));
    assert!(result["files"][0]["isroot"] == 1);
}

#[tokio::test]
async fn test_open_requires_target_without_init() {
    let gw = gateway().await;
    let result = call(&gw, "open", &[]).await;
    assert_eq!(error_kind(&result), "errCmdParams");

    let result = call(&gw, "open", &[("target", "v7_Lw")]).await;
    assert_eq!(error_kind(&result), "errInvalidTarget");
    assert_eq!(result["error"][1], "v7_Lw");

    let result = call(&gw, "open", &[("target", "v7_Lw"), ("init", "1")]).await;
    assert_eq!(result["cwd"]["hash"], HOME);
}

#[tokio::test]
async fn test_unknown_and_disabled_commands() {
    let gw = gateway().await;
    assert_eq!(error_kind(&call(&gw, "frobnicate", &[]).await), "errUnknownCmd");

    let mut config = GatewayConfig::default();
    config.disabled.push("rm".into());
    let gw = Gateway::new(config).await.unwrap();
    assert_eq!(error_kind(&call(&gw, "rm", &[("targets[]", HOME)]).await), "errPerm");
}

#[tokio::test]
async fn test_volume_disabled_commands() {
    let mut config = GatewayConfig::default();
    config.volumes[1] = VolumeConfig {
        disabled: vec!["rm".into()],
        ..VolumeConfig::memory("/tmp")
    };
    let gw = Gateway::new(config).await.unwrap();
    let kept = hash(&upload(&gw, "v1_Lw", "keep.txt", b"k").await, "added");
    let gone = hash(&upload(&gw, HOME, "gone.txt", b"g").await, "added");

    assert_eq!(error_kind(&call(&gw, "rm", &[("targets[]", &kept)]).await), "errPerm");
    assert_eq!(call(&gw, "rm", &[("targets[]", &gone)]).await["removed"][0], gone.as_str());

    let roots = call(&gw, "info", &[("targets[]", "v1_Lw"), ("targets[]", HOME)]).await;
    assert!(roots["files"][0]["options"]["disabled"].as_array().unwrap().contains(&"rm".into()));
    assert!(!roots["files"][1]["options"]["disabled"].as_array().unwrap().contains(&"rm".into()));
}

#[tokio::test]
async fn test_mkdir_is_idempotent() {
    let gw = gateway().await;
    let first = call(&gw, "mkdir", &[("target", HOME), ("name", "docs")]).await;
    let second = call(&gw, "mkdir", &[("target", HOME), ("name", "docs")]).await;
    assert_eq!(hash(&first, "added"), hash(&second, "added"));
    assert_eq!(first["added"][0]["mime"], "directory");

    let nested = call(&gw, "mkdir", &[("target", HOME), ("dirs[]", "/a/b/c"), ("dirs[]", "/a/d")]).await;
    assert_eq!(nested["added"].as_array().unwrap().len(), 2);
    let c = nested["hashes"]["/a/b/c"].as_str().unwrap();
    let info = call(&gw, "info", &[("targets[]", c)]).await;
    assert_eq!(info["files"][0]["name"], "c");

    let ls = call(&gw, "ls", &[("target", HOME)]).await;
    let mut names: Vec<&str> = ls["list"].as_array().unwrap().iter().map(|v| v.as_str().unwrap()).collect();
    names.sort();
    assert_eq!(names, vec!["a", "docs"]);
}

#[tokio::test]
async fn test_mkfile_put_get_round_trip() {
    let gw = gateway().await;
    let created = call(&gw, "mkfile", &[("target", HOME), ("name", "note.txt")]).await;
    let file = hash(&created, "added");
    assert_eq!(created["added"][0]["size"], 0);

    let again = call(&gw, "mkfile", &[("target", HOME), ("name", "note.txt")]).await;
    assert_eq!(error_kind(&again), "errExists");

    let put = call(&gw, "put", &[("target", &file), ("content", "hello world")]).await;
    assert_eq!(put["changed"][0]["size"], 11);
    let got = call(&gw, "get", &[("target", &file)]).await;
    assert_eq!(got["content"], "hello world");

    let put = call(
        &gw,
        "put",
        &[("target", &file), ("content", "data:text/plain;base64,aGk="), ("encoding", "scheme")],
    )
    .await;
    assert_eq!(put["changed"][0]["size"], 2);
}

#[tokio::test]
async fn test_rename_and_duplicate() {
    let gw = gateway().await;
    let file = hash(&upload(&gw, HOME, "report.txt", b"abc").await, "added");

    let renamed = call(&gw, "rename", &[("target", &file), ("name", "final.txt")]).await;
    assert_eq!(renamed["removed"][0], file.as_str());
    assert_eq!(renamed["added"][0]["name"], "final.txt");
    let renamed_hash = hash(&renamed, "added");

    let dup = call(&gw, "duplicate", &[("targets[]", &renamed_hash)]).await;
    assert_eq!(dup["added"][0]["name"], "final(copy).txt");
    let dup = call(&gw, "duplicate", &[("targets[]", &renamed_hash)]).await;
    assert_eq!(dup["added"][0]["name"], "final(copy 1).txt");
}

#[tokio::test]
async fn test_rm_is_best_effort() {
    let gw = gateway().await;
    let a = hash(&upload(&gw, HOME, "a.txt", b"a").await, "added");
    let dir = hash(&call(&gw, "mkdir", &[("target", HOME), ("name", "d")]).await, "added");
    upload(&gw, &dir, "inner.txt", b"x").await;
    let missing = {
        let ghost = hash(&upload(&gw, HOME, "ghost.txt", b"g").await, "added");
        call(&gw, "rm", &[("targets[]", &ghost)]).await;
        ghost
    };

    let result = call(
        &gw,
        "rm",
        &[("targets[]", &a), ("targets[]", "v9_Lw"), ("targets[]", &missing), ("targets[]", &dir)],
    )
    .await;
    let removed: Vec<&str> = result["removed"].as_array().unwrap().iter().map(|v| v.as_str().unwrap()).collect();
    assert_eq!(removed, vec![a.as_str(), dir.as_str()]);

    let ls = call(&gw, "ls", &[("target", HOME)]).await;
    assert!(ls["list"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_rm_refuses_volume_root() {
    let gw = gateway().await;
    let result = call(&gw, "rm", &[("targets[]", HOME)]).await;
    assert!(result["removed"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_paste_copy_cut_and_conflicts() {
    let gw = gateway().await;
    let tmp = "v1_Lw";
    let src = hash(&call(&gw, "mkdir", &[("target", HOME), ("name", "proj")]).await, "added");
    upload(&gw, &src, "main.rs", b"fn main() {}").await;

    let copied = call(&gw, "paste", &[("dst", tmp), ("targets[]", &src)]).await;
    assert_eq!(copied["added"][0]["name"], "proj");
    assert!(copied["removed"].as_array().unwrap().is_empty());

    let conflict = call(&gw, "paste", &[("dst", tmp), ("targets[]", &src)]).await;
    assert!(conflict["added"].as_array().unwrap().is_empty());
    assert_eq!(conflict["warning"][0]["error"][0], "errExists");

    let renamed = call(
        &gw,
        "paste",
        &[("dst", tmp), ("targets[]", &src), ("renames[]", "proj"), ("suffix", "~")],
    )
    .await;
    assert_eq!(renamed["added"][0]["name"], "proj~");

    let moved = call(&gw, "paste", &[("dst", tmp), ("targets[]", &src), ("cut", "1"), ("renames[]", "proj"), ("suffix", "-moved")]).await;
    assert_eq!(moved["added"][0]["name"], "proj-moved");
    assert_eq!(moved["removed"][0], src.as_str());

    let home = call(&gw, "ls", &[("target", HOME)]).await;
    assert!(home["list"].as_array().unwrap().is_empty());
    let moved_dir = hash(&moved, "added");
    let inner = call(&gw, "ls", &[("target", &moved_dir)]).await;
    assert_eq!(inner["list"][0], "main.rs");
}

#[tokio::test]
async fn test_chunked_upload_merges() {
    let gw = gateway().await;
    let chunks: [(&[u8], &str); 3] = [(b"hello", "0,5,12"), (b" worl", "5,5,12"), (b"d!", "10,2,12")];

    for (i, (data, range)) in chunks.iter().enumerate() {
        let params = Params::new()
            .with("target", HOME)
            .with("chunk", format!("greeting.txt.{i}_2.part"))
            .with("range", *range);
        let request = Request::new("upload", params).with_uploads(vec![Upload::new("blob", *data)]);
        let result = gw.dispatch(request).await.json().cloned().unwrap();
        if i < 2 {
            assert!(result.get("_chunkmerged").is_none(), "{result}");
        } else {
            assert_eq!(result["_chunkmerged"], "greeting.txt");
            assert_eq!(result["_name"], "greeting.txt");
        }
    }

    let probe = call(&gw, "upload", &[("target", HOME), ("chunk", "greeting.txt")]).await;
    assert_eq!(probe["added"][0]["size"], 12);
    let file = hash(&probe, "added");
    assert_eq!(call(&gw, "get", &[("target", &file)]).await["content"], "hello world!");

    let missing = call(&gw, "upload", &[("target", HOME), ("chunk", "nothing.bin")]).await;
    assert!(missing["added"].as_array().unwrap().is_empty());
    assert!(missing.get("warning").is_some());
}

#[tokio::test]
async fn test_chunks_arriving_out_of_order() {
    let gw = gateway().await;
    let last = upload_chunk(&gw, "pair.txt.1_1.part", "5,5,10", b"world").await;
    assert_eq!(last["_chunkmerged"], "pair.txt");
    upload_chunk(&gw, "pair.txt.0_1.part", "0,5,10", b"hello").await;

    let merged = call(&gw, "upload", &[("target", HOME), ("chunk", "pair.txt")]).await;
    assert_eq!(merged["added"][0]["size"], 10);
    let file = hash(&merged, "added");
    assert_eq!(call(&gw, "get", &[("target", &file)]).await["content"], "helloworld");
}

#[tokio::test]
async fn test_chunk_ranges_are_bounded() {
    let gw = gateway().await;
    let huge = upload_chunk(&gw, "f.txt.1_1.part", "4611686018427387904,2,4611686018427387906", b"xy").await;
    assert_eq!(error_kind(&huge), "errCmdParams");

    let short = upload_chunk(&gw, "f.txt.0_1.part", "0,5,10", b"abc").await;
    assert_eq!(error_kind(&short), "errCmdParams");

    let listing = call(&gw, "ls", &[("target", HOME)]).await;
    assert!(listing["list"].as_array().unwrap().is_empty());

    let mut config = GatewayConfig::default();
    config.upload_max_size = 4;
    let gw = Gateway::new(config).await.unwrap();
    let over = upload_chunk(&gw, "g.txt.0_1.part", "0,3,5", b"abc").await;
    assert_eq!(error_kind(&over), "errCmdParams");
    let whole = upload(&gw, HOME, "big.txt", b"12345").await;
    assert!(whole["added"].as_array().unwrap().is_empty());
    assert_eq!(whole["warning"][0]["error"][0], "errCmdParams");
}

#[tokio::test]
async fn test_upload_paths_per_file() {
    let gw = gateway().await;
    let params = Params::new()
        .with("target", HOME)
        .with("upload_path[]", HOME)
        .with("upload_path[]", "v1_Lw");
    let request = Request::new("upload", params)
        .with_uploads(vec![Upload::new("one.txt", "1"), Upload::new("two.txt", "2")]);
    let result = gw.dispatch(request).await.json().cloned().unwrap();
    assert_eq!(result["added"][0]["volumeid"], "v0_");
    assert_eq!(result["added"][1]["volumeid"], "v1_");
}

#[tokio::test]
async fn test_file_ranges_and_disposition() {
    let gw = gateway().await;
    let file = hash(&upload(&gw, HOME, "data.txt", b"0123456789").await, "added");

    let params = Params::new().with("target", &file).with("download", "1");
    let response = gw.dispatch(Request::new("file", params)).await;
    let Response::File { status, body, .. } = &response else {
        panic!("expected a file");
    };
    assert_eq!(*status, 200);
    assert_eq!(body, b"0123456789");
    assert_eq!(response.header("content-type"), Some("text/plain"));
    assert!(response.header("content-disposition").unwrap().starts_with("attachment"));

    let params = Params::new().with("target", &file);
    let response = gw.dispatch(Request::new("file", params.clone()).with_range("bytes=2-5")).await;
    let Response::File { status, body, .. } = &response else {
        panic!("expected a file");
    };
    assert_eq!(*status, 206);
    assert_eq!(body, b"2345");
    assert_eq!(response.header("Content-Range"), Some("bytes 2-5/10"));
    assert_eq!(response.header("Content-Disposition"), Some("inline"));

    let response = gw.dispatch(Request::new("file", params).with_range("bytes=20-")).await;
    let Response::File { status, .. } = response else {
        panic!("expected a file");
    };
    assert_eq!(status, 416);
}

#[tokio::test]
async fn test_thumbnails_and_image_ops() {
    let gw = gateway().await;
    let image = hash(&upload(&gw, HOME, "photo.png", &sample_png(8, 6)).await, "added");
    let text = hash(&upload(&gw, HOME, "notes.txt", b"not an image").await, "added");
    let broken = hash(&upload(&gw, HOME, "broken.png", b"not a png").await, "added");

    let tmb = call(&gw, "tmb", &[("targets[]", &image), ("targets[]", &text), ("targets[]", &broken)]).await;
    let images = tmb["images"].as_object().unwrap();
    assert_eq!(images.len(), 1);
    assert_eq!(images[&image], format!("{image}.png"));

    let info = call(&gw, "info", &[("targets[]", &image)]).await;
    assert_eq!(info["files"][0]["tmb"], format!("{image}.png"));

    let dim = call(&gw, "dim", &[("target", &image)]).await;
    assert_eq!(dim["dim"], "8x6");

    let resized = call(&gw, "resize", &[("target", &image), ("width", "4"), ("height", "4")]).await;
    assert_eq!(resized["changed"][0]["hash"], image.as_str());
    assert_eq!(call(&gw, "dim", &[("target", &image)]).await["dim"], "4x4");

    call(&gw, "resize", &[("target", &image), ("mode", "crop"), ("width", "2"), ("height", "3")]).await;
    call(&gw, "resize", &[("target", &image), ("mode", "rotate"), ("degree", "90")]).await;
    assert_eq!(call(&gw, "dim", &[("target", &image)]).await["dim"], "3x2");

    let bad = call(&gw, "resize", &[("target", &image), ("mode", "rotate"), ("degree", "45")]).await;
    assert_eq!(error_kind(&bad), "errUnsupported");
}

#[tokio::test]
async fn test_tmb_for_current_directory() {
    let gw = gateway().await;
    let a = hash(&upload(&gw, HOME, "a.png", &sample_png(4, 4)).await, "added");
    let b = hash(&upload(&gw, HOME, "b.png", &sample_png(5, 5)).await, "added");
    let tmb = call(&gw, "tmb", &[("current", HOME)]).await;
    let images = tmb["images"].as_object().unwrap();
    assert!(images.contains_key(&a));
    assert!(images.contains_key(&b));
}

#[tokio::test]
async fn test_archive_and_zipdl() {
    let gw = gateway().await;
    let dir = hash(&call(&gw, "mkdir", &[("target", HOME), ("name", "site")]).await, "added");
    let page = hash(&upload(&gw, &dir, "index.html", b"<html></html>").await, "added");

    let archived = call(&gw, "archive", &[("target", HOME), ("targets[]", &dir), ("type", "application/zip")]).await;
    assert_eq!(archived["added"][0]["name"], "Archive.zip");
    assert!(archived["added"][0]["size"].as_u64().unwrap() > 0);

    let prepared = call(&gw, "zipdl", &[("targets[]", &page)]).await;
    let token = prepared["zipdl"]["file"].as_str().unwrap().to_string();
    assert_eq!(prepared["zipdl"]["name"], "site.zip");
    assert_eq!(prepared["zipdl"]["mime"], "application/zip");

    let params = Params::new()
        .with("download", "1")
        .with("targets[]", HOME)
        .with("targets[]", &token)
        .with("targets[]", "site.zip")
        .with("targets[]", "application/zip");
    let response = gw.dispatch(Request::new("zipdl", params)).await;
    let Response::File { status, body, .. } = &response else {
        panic!("expected a file");
    };
    assert_eq!(*status, 200);
    assert_eq!(&body[..2], b"PK");
    assert!(response.header("Content-Disposition").unwrap().contains("site.zip"));

    let gone = call(&gw, "info", &[("targets[]", &token)]).await;
    assert!(gone["files"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_zipdl_download_refuses_other_files() {
    let gw = gateway().await;
    let file = hash(&upload(&gw, HOME, "keep.txt", b"k").await, "added");
    let params = Params::new()
        .with("download", "1")
        .with("targets[]", HOME)
        .with("targets[]", &file)
        .with("targets[]", "keep.zip");
    let response = gw.dispatch(Request::new("zipdl", params)).await;
    assert_eq!(error_kind(response.json().unwrap()), "errPerm");
    assert_eq!(call(&gw, "get", &[("target", &file)]).await["content"], "k");
}

#[tokio::test]
async fn test_search_and_size() {
    let gw = gateway().await;
    let dir = hash(&call(&gw, "mkdir", &[("target", HOME), ("name", "Reports")]).await, "added");
    upload(&gw, &dir, "q1-report.txt", b"12345").await;
    upload(&gw, &dir, "summary.txt", b"123").await;
    upload(&gw, HOME, "REPORT-final.txt", b"1").await;

    let found = call(&gw, "search", &[("target", HOME), ("q", "report")]).await;
    let mut names: Vec<&str> = found["files"].as_array().unwrap().iter().map(|f| f["name"].as_str().unwrap()).collect();
    names.sort();
    assert_eq!(names, vec!["REPORT-final.txt", "Reports", "q1-report.txt"]);

    assert_eq!(error_kind(&call(&gw, "search", &[("target", HOME)]).await), "errCmdParams");

    let size = call(&gw, "size", &[("targets[]", HOME)]).await;
    assert_eq!(size["size"], 9);
    assert_eq!(size["fileCnt"], 3);
    assert_eq!(size["dirCnt"], 2);
}

#[tokio::test]
async fn test_tree_and_parents() {
    let gw = gateway().await;
    let a = hash(&call(&gw, "mkdir", &[("target", HOME), ("name", "a")]).await, "added");
    call(&gw, "mkdir", &[("target", HOME), ("name", "sibling")]).await;
    let b = hash(&call(&gw, "mkdir", &[("target", &a), ("name", "b")]).await, "added");
    let c = hash(&call(&gw, "mkdir", &[("target", &b), ("name", "c")]).await, "added");
    upload(&gw, &a, "file.txt", b"f").await;

    let tree = call(&gw, "tree", &[("target", &a)]).await;
    assert_eq!(tree["tree"].as_array().unwrap().len(), 1);
    assert_eq!(tree["tree"][0]["hash"], b.as_str());

    let parents = call(&gw, "parents", &[("target", &c)]).await;
    let hashes: Vec<&str> = parents["tree"].as_array().unwrap().iter().map(|f| f["hash"].as_str().unwrap()).collect();
    assert!(hashes.contains(&"v1_Lw"));
    assert!(hashes.contains(&a.as_str()));
    assert!(hashes.contains(&b.as_str()));
    assert!(hashes.contains(&c.as_str()));
    assert_eq!(hashes.len(), 6);
}

#[tokio::test]
async fn test_netmount_errors() {
    let gw = gateway().await;
    let result = call(&gw, "netmount", &[("protocol", "s3"), ("host", "gopher://nowhere")]).await;
    assert_eq!(error_kind(&result), "errCmdParams");
    assert_eq!(gw.mounts().len(), 2);

    let result = call(&gw, "netmount", &[("protocol", "netunmount"), ("user", HOME)]).await;
    assert_eq!(error_kind(&result), "errPerm");
    assert_eq!(gw.mounts().len(), 2);
}
