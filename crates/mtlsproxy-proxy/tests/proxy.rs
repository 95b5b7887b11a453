//! Instance and supervisor lifecycle tests: passthrough, reload diffs,
//! destination revocation, and stop behavior.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep, timeout};

use mtlsproxy_config::{ConfigSource, Profile};
use mtlsproxy_proxy::{Instance, Supervisor};

fn profile(name: &str, listen: &str, proxy: &str) -> Profile {
    Profile {
        name: name.to_string(),
        listen: listen.to_string(),
        proxy: proxy.to_string(),
        ..Profile::default()
    }
}

/// Reserve a local address by binding and immediately releasing it.
async fn free_addr() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);
    addr
}

/// Persistent echo server; copies every connection back to itself.
async fn spawn_echo() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let (mut reader, mut writer) = socket.split();
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
            });
        }
    });
    addr
}

/// Server that reads one chunk, echoes it, and closes the connection.
async fn spawn_reply_once() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let mut buf = [0u8; 256];
                if let Ok(n) = socket.read(&mut buf).await {
                    let _ = socket.write_all(&buf[..n]).await;
                }
            });
        }
    });
    addr
}

/// Server that greets every connection with a one-byte banner and then
/// holds the connection open.
async fn spawn_banner(banner: u8) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                if socket.write_all(&[banner]).await.is_err() {
                    return;
                }
                let mut buf = [0u8; 64];
                while matches!(socket.read(&mut buf).await, Ok(n) if n > 0) {}
            });
        }
    });
    addr
}

/// Connect with retries; the instance opens its listener asynchronously.
async fn connect_retry(addr: &str) -> TcpStream {
    for _ in 0..200 {
        if let Ok(stream) = TcpStream::connect(addr).await {
            return stream;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("could not connect to {addr}");
}

/// Assert the stream gets closed (EOF or reset) within a bounded time.
async fn assert_closed(stream: &mut TcpStream) {
    let mut buf = [0u8; 8];
    match timeout(Duration::from_secs(5), stream.read(&mut buf)).await {
        Ok(Ok(0)) | Ok(Err(_)) => {}
        Ok(Ok(n)) => panic!("expected close, read {n} bytes"),
        Err(_) => panic!("socket not closed within timeout"),
    }
}

#[tokio::test]
async fn plain_passthrough_echoes_and_propagates_eof() {
    let backend = spawn_reply_once().await;
    let listen = free_addr().await;

    let inst = Instance::new(profile("pass", &listen, &backend))
        .await
        .unwrap();

    let mut client = connect_retry(&listen).await;
    client.write_all(b"PING").await.unwrap();

    let mut buf = [0u8; 4];
    client.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"PING");

    // Backend closed after replying; the proxy propagates EOF.
    assert_closed(&mut client).await;

    inst.stop().await;
}

#[tokio::test]
async fn destination_change_revokes_and_redirects() {
    let banner_a = spawn_banner(b'A').await;
    let banner_b = spawn_banner(b'B').await;
    let listen = free_addr().await;

    let inst = Instance::new(profile("swap", &listen, &banner_a))
        .await
        .unwrap();

    let mut first = connect_retry(&listen).await;
    let mut byte = [0u8; 1];
    first.read_exact(&mut byte).await.unwrap();
    assert_eq!(byte[0], b'A');

    inst.adapt_to(profile("swap", &listen, &banner_b))
        .await
        .unwrap();

    // The session bound to the old destination is revoked...
    assert_closed(&mut first).await;

    // ...and every new connection observes the new destination.
    let mut second = connect_retry(&listen).await;
    second.read_exact(&mut byte).await.unwrap();
    assert_eq!(byte[0], b'B');

    inst.stop().await;
}

#[tokio::test]
async fn listener_only_change_keeps_sessions() {
    let echo = spawn_echo().await;
    let listen_one = free_addr().await;
    let listen_two = free_addr().await;

    let inst = Instance::new(profile("move", &listen_one, &echo))
        .await
        .unwrap();

    let mut session = connect_retry(&listen_one).await;
    session.write_all(b"hello").await.unwrap();
    let mut buf = [0u8; 5];
    session.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"hello");

    inst.adapt_to(profile("move", &listen_two, &echo))
        .await
        .unwrap();

    // The in-flight session survives the listener swap.
    session.write_all(b"again").await.unwrap();
    session.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"again");

    // New connections arrive on the new endpoint.
    let mut fresh = connect_retry(&listen_two).await;
    fresh.write_all(b"fresh").await.unwrap();
    fresh.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"fresh");

    inst.stop().await;
}

#[tokio::test]
async fn adapt_after_stop_is_noop() {
    let echo = spawn_echo().await;
    let listen = free_addr().await;

    let inst = Instance::new(profile("late", &listen, &echo)).await.unwrap();
    inst.stop().await;
    inst.stop().await; // idempotent

    let other = free_addr().await;
    inst.adapt_to(profile("late", &other, &echo)).await.unwrap();

    // The no-op adapt did not resurrect a listener.
    sleep(Duration::from_millis(100)).await;
    assert!(TcpStream::connect(&other).await.is_err());
}

#[tokio::test]
async fn stop_closes_sessions_and_listener() {
    let echo = spawn_echo().await;
    let listen = free_addr().await;

    let inst = Instance::new(profile("halt", &listen, &echo)).await.unwrap();

    let mut one = connect_retry(&listen).await;
    let mut two = connect_retry(&listen).await;
    let mut buf = [0u8; 2];
    for client in [&mut one, &mut two] {
        client.write_all(b"ok").await.unwrap();
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ok");
    }

    inst.stop().await;

    assert_closed(&mut one).await;
    assert_closed(&mut two).await;

    // No further accepts after the listener is gone.
    sleep(Duration::from_millis(100)).await;
    assert!(TcpStream::connect(&listen).await.is_err());
}

#[tokio::test]
async fn supervisor_applies_add_remove_modify() {
    let echo = spawn_echo().await;
    let listen_a = free_addr().await;
    let listen_b = free_addr().await;
    let listen_b2 = free_addr().await;
    let listen_c = free_addr().await;

    let mut supervisor = Supervisor::new();
    supervisor
        .apply(vec![
            profile("a", &listen_a, &echo),
            profile("b", &listen_b, &echo),
        ])
        .await;
    assert_eq!(supervisor.len(), 2);
    assert!(supervisor.contains("a") && supervisor.contains("b"));

    // A session on b, open across the reload.
    let mut session = connect_retry(&listen_b).await;
    session.write_all(b"keep").await.unwrap();
    let mut buf = [0u8; 4];
    session.read_exact(&mut buf).await.unwrap();

    // Reload delivers {b', c}: a is removed, b moves its listener, c is new.
    supervisor
        .apply(vec![
            profile("b", &listen_b2, &echo),
            profile("c", &listen_c, &echo),
        ])
        .await;
    assert_eq!(supervisor.len(), 2);
    assert!(!supervisor.contains("a"));
    assert!(supervisor.contains("b") && supervisor.contains("c"));

    // b's change was listener-only, so the open session survives.
    session.write_all(b"keep").await.unwrap();
    session.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"keep");

    // b accepts on its new endpoint, c accepts, a's endpoint is gone.
    let mut fresh = connect_retry(&listen_b2).await;
    fresh.write_all(b"bb").await.unwrap();
    fresh.read_exact(&mut buf[..2]).await.unwrap();
    let _c_conn = connect_retry(&listen_c).await;
    sleep(Duration::from_millis(100)).await;
    assert!(TcpStream::connect(&listen_a).await.is_err());

    supervisor.shutdown().await;
    assert!(supervisor.is_empty());
}

#[tokio::test]
async fn reload_aborts_on_unreadable_credential() {
    let echo = spawn_echo().await;
    let listen_a = free_addr().await;
    let listen_d = free_addr().await;

    let dir = std::env::temp_dir().join(format!("mtlsproxy-reload-{}", std::process::id()));
    std::fs::remove_dir_all(&dir).ok();
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(
        dir.join("d.toml"),
        format!(
            "[d]\nListen = \"{listen_d}\"\nProxy = \"{echo}\"\nListenCertPath = \"/does/not/exist.pem\"\n"
        ),
    )
    .unwrap();

    let running = profile("a", &listen_a, &echo);
    let source = ConfigSource::with_base(dir.to_string_lossy().into_owned(), vec![running.clone()]);

    let mut supervisor = Supervisor::new();
    supervisor.apply(vec![running]).await;
    assert_eq!(supervisor.len(), 1);

    // d's certificate path is unreadable: the whole reload is abandoned.
    supervisor.reload(&source).await;
    assert_eq!(supervisor.len(), 1);
    assert!(supervisor.contains("a"));
    assert!(!supervisor.contains("d"));

    // a stays operational.
    let mut client = connect_retry(&listen_a).await;
    client.write_all(b"up").await.unwrap();
    let mut buf = [0u8; 2];
    client.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"up");

    supervisor.shutdown().await;
    std::fs::remove_dir_all(&dir).ok();
}

#[tokio::test]
async fn adapt_error_keeps_old_configuration() {
    let echo = spawn_echo().await;
    let listen = free_addr().await;

    let inst = Instance::new(profile("sane", &listen, &echo)).await.unwrap();

    // A listen certificate that parses to nothing fails the TLS build.
    let mut broken = profile("sane", &listen, &echo);
    broken.listen_cert_raw = "this is not pem".to_string();
    broken.listen_private_raw = "nor is this".to_string();
    assert!(inst.adapt_to(broken).await.is_err());

    // The previous configuration is still in effect.
    let mut client = connect_retry(&listen).await;
    client.write_all(b"ok").await.unwrap();
    let mut buf = [0u8; 2];
    client.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"ok");

    inst.stop().await;
}
