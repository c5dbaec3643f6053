//! End-to-end file transfer over both reliability strategies.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use tempfile::TempDir;
use tokio::time::timeout;

use udp_arq::transfer::{get_file, put_file, serve, TransferError};
use udp_arq::{Config, Protocol, SimulatorConfig, TimerConfig, Transport};

const WAIT: Duration = Duration::from_secs(60);

/// A fresh directory, removed when the guard drops.
fn scratch() -> TempDir {
    tempfile::tempdir().expect("create temp dir")
}

/// Bind a file server for `proto` on loopback and run it in the background.
async fn file_server(proto: Protocol, config: Config, dir: PathBuf) -> SocketAddr {
    let server = proto.server(config);
    server.bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(async move {
        if let Err(e) = serve(&*server, dir).await {
            panic!("file server stopped: {e}");
        }
    });
    addr
}

async fn connect(proto: Protocol, config: Config, addr: SocketAddr) -> Box<dyn Transport> {
    let client = proto.client(config);
    client.connect(addr).await.unwrap();
    client
}

fn patterned(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 251) as u8).collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn selective_repeat_put_then_get_with_loss() {
    let served = scratch();
    let local = scratch();
    let fast = Config::default().with_timers(TimerConfig::fast());

    let addr = file_server(Protocol::SelectiveRepeat, fast.clone(), served.path().into()).await;
    let client = connect(
        Protocol::SelectiveRepeat,
        fast.with_simulator(SimulatorConfig::lossy(0.1, 11)),
        addr,
    )
    .await;

    let body = patterned(5000);
    let upload = local.path().join("report.bin");
    std::fs::write(&upload, &body).unwrap();

    let sent = timeout(WAIT, put_file(&*client, &upload)).await.unwrap().unwrap();
    assert_eq!(sent, 5000);
    assert!(client.transfer_completed());

    let download = local.path().join("copy.bin");
    let got = timeout(WAIT, get_file(&*client, "report.bin", &download))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(got, 5000);
    assert_eq!(std::fs::read(&download).unwrap(), body);
    assert_eq!(std::fs::read(served.path().join("report.bin")).unwrap(), body);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn missing_file_answers_not_found() {
    let served = scratch();
    let local = scratch();
    let fast = Config::default().with_timers(TimerConfig::fast());
    let addr = file_server(Protocol::SelectiveRepeat, fast.clone(), served.path().into()).await;
    let client = connect(Protocol::SelectiveRepeat, fast, addr).await;

    let dest = local.path().join("nothing");
    let err = timeout(WAIT, get_file(&*client, "nothing", &dest))
        .await
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, TransferError::Remote(404)), "got {err:?}");
    assert!(!dest.exists());

    // The session is still usable afterwards.
    let upload = local.path().join("late.txt");
    std::fs::write(&upload, b"better late").unwrap();
    timeout(WAIT, put_file(&*client, &upload)).await.unwrap().unwrap();
    timeout(WAIT, get_file(&*client, "late.txt", &dest))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(std::fs::read(&dest).unwrap(), b"better late");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stop_and_wait_put_then_get() {
    let served = scratch();
    let local = scratch();
    let fast = Config::default().with_timers(TimerConfig::fast());

    let addr = file_server(Protocol::StopAndWait, fast.clone(), served.path().into()).await;
    let client = connect(Protocol::StopAndWait, fast, addr).await;

    let body = patterned(3 * 2048 + 17);
    let upload = local.path().join("notes.txt");
    std::fs::write(&upload, &body).unwrap();
    timeout(WAIT, put_file(&*client, &upload)).await.unwrap().unwrap();

    let download = local.path().join("notes-copy.txt");
    timeout(WAIT, get_file(&*client, "notes.txt", &download))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(std::fs::read(download).unwrap(), body);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn uploads_cannot_escape_the_served_directory() {
    let tmp = scratch();
    let root = tmp.path().to_path_buf();
    let served = root.join("served");
    std::fs::create_dir_all(&served).unwrap();
    let fast = Config::default().with_timers(TimerConfig::fast());

    let addr = file_server(Protocol::SelectiveRepeat, fast.clone(), served.clone()).await;
    let client = connect(Protocol::SelectiveRepeat, fast, addr).await;

    let upload = root.join("inside.txt");
    std::fs::write(&upload, b"contained").unwrap();
    timeout(WAIT, put_file(&*client, &upload)).await.unwrap().unwrap();

    // Fetching through a path still resolves inside the served directory.
    let dest = root.join("fetched.txt");
    timeout(WAIT, get_file(&*client, "../inside.txt", &dest))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(std::fs::read(dest).unwrap(), b"contained");
    assert!(served.join("inside.txt").exists());

    // Nothing is left behind once the test lets go of its directory.
    drop(tmp);
    assert!(!root.exists());
}
