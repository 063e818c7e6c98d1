use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use fsidd::{
    cache::FsidCache,
    commands,
    retry::{Retrier, RetryPolicy},
    socket::{Client, Response, SeqpacketStream, Server, PACKET_MAX_LENGTH},
    store::MemoryFsidStore,
    FsiddError, FsiddResult,
};
use tempfile::TempDir;
use tokio::{sync::Notify, task::JoinHandle};
use tokio_util::sync::CancellationToken;

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[test_log::test(tokio::test)]
async fn test_protocol_over_memory_store() -> anyhow::Result<()> {
    let store = Arc::new(MemoryFsidStore::new());
    let harness = Harness::with_store(store.clone())?;
    let mut client = harness.client().await?;

    assert_eq!(
        client.request("get_fsidnum /srv/a").await?,
        Response::Ok(String::new())
    );
    assert_eq!(
        client.request("get_or_create_fsidnum /srv/a").await?,
        Response::Ok("1".into())
    );
    assert_eq!(
        client.request("GET_OR_CREATE_FSIDNUM /srv/a").await?,
        Response::Ok("1".into())
    );
    assert_eq!(
        client.request("Get_FsidNum /srv/a").await?,
        Response::Ok("1".into())
    );
    assert_eq!(
        client.request("get_path 1").await?,
        Response::Ok("/srv/a".into())
    );
    assert_eq!(
        client.request("get_path 2").await?,
        Response::Ok(String::new())
    );
    assert_eq!(
        client.request("get_path 0").await?,
        Response::Err("invalid argument".into())
    );
    assert_eq!(
        client.request("get_path abc").await?,
        Response::Err("invalid argument".into())
    );
    assert_eq!(
        client.request("get_fsidnum").await?,
        Response::Err("invalid argument".into())
    );
    assert_eq!(client.request("version").await?, Response::Ok("1".into()));
    assert_eq!(
        client.request("frobnicate /srv/a").await?,
        Response::Err("unknown command \"FROBNICATE\"".into())
    );

    // paths keep everything after the first space
    assert_eq!(client.get_or_create_fsidnum("/srv/with space").await?, 2);
    assert_eq!(
        client.get_path(2).await?,
        Some("/srv/with space".to_string())
    );

    assert_eq!(store.allocations(), 2);
    harness.stop().await
}

#[test_log::test(tokio::test)]
async fn test_oversized_request_keeps_connection_open() -> anyhow::Result<()> {
    let harness = Harness::new()?;
    let mut client = harness.client().await?;

    let request = format!("get_fsidnum /{}", "a".repeat(PACKET_MAX_LENGTH));
    assert_eq!(
        client.request(&request).await?,
        Response::Err("message truncated".into())
    );
    assert_eq!(client.version().await?, "1");

    harness.stop().await
}

#[test_log::test(tokio::test)]
async fn test_concurrent_allocations_agree() -> anyhow::Result<()> {
    let store = Arc::new(MemoryFsidStore::new());
    let harness = Harness::with_store(store.clone())?;

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let socket = harness.socket.clone();
        tasks.push(tokio::spawn(async move {
            let mut client = Client::connect(&socket).await?;
            client.get_or_create_fsidnum("/srv/shared").await
        }));
    }

    for task in tasks {
        assert_eq!(task.await??, 1);
    }
    assert_eq!(store.allocations(), 1);

    harness.stop().await
}

#[test_log::test(tokio::test)]
async fn test_connections_are_independent() -> anyhow::Result<()> {
    let harness = Harness::new()?;
    let mut first = harness.client().await?;
    let mut second = harness.client().await?;

    assert_eq!(first.get_or_create_fsidnum("/srv/a").await?, 1);
    assert_eq!(second.get_fsidnum("/srv/a").await?, Some(1));
    assert_eq!(second.get_or_create_fsidnum("/srv/b").await?, 2);

    drop(first);
    assert_eq!(second.get_path(1).await?, Some("/srv/a".to_string()));

    harness.stop().await
}

#[test_log::test(tokio::test)]
async fn test_shutdown_drains_request_in_progress() -> anyhow::Result<()> {
    let started = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());

    let temp_dir = tempfile::tempdir()?;
    let socket = temp_dir.path().join("fsidd.sock");
    let mut server = Server::bind(&socket)?;
    {
        let started = started.clone();
        let release = release.clone();
        server.handle("slow", move |_, arg: String| {
            let started = started.clone();
            let release = release.clone();
            async move {
                started.notify_one();
                release.notified().await;
                Ok(arg)
            }
        });
    }
    let server = Arc::new(server);
    let serving = tokio::spawn({
        let server = server.clone();
        async move { server.serve().await }
    });

    let mut client = Client::connect(&socket).await?;
    let request = tokio::spawn(async move {
        let response = client.request("slow done").await;
        (client, response)
    });
    started.notified().await;

    let shutdown = tokio::spawn({
        let server = server.clone();
        async move { server.shutdown(Duration::from_secs(10)).await }
    });

    // the socket file goes away as soon as shutdown starts
    while socket.exists() {
        tokio::task::yield_now().await;
    }
    release.notify_one();

    let (mut client, response) = request.await?;
    assert_eq!(response?, Response::Ok("done".into()));

    shutdown.await??;
    assert_eq!(server.connection_count(), 0);
    assert!(matches!(serving.await?, Err(FsiddError::ServerClosed)));

    // the connection was shut down after its last response
    assert!(client.request("slow again").await.is_err());

    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_close_cancels_request_in_progress() -> anyhow::Result<()> {
    let cancelled = Arc::new(AtomicBool::new(false));

    let temp_dir = tempfile::tempdir()?;
    let socket = temp_dir.path().join("fsidd.sock");
    let mut server = Server::bind(&socket)?;
    {
        let cancelled = cancelled.clone();
        server.handle("hang", move |cancel: CancellationToken, _| {
            let cancelled = cancelled.clone();
            async move {
                cancel.cancelled().await;
                cancelled.store(true, Ordering::SeqCst);
                FsiddResult::<String>::Err(FsiddError::Cancelled)
            }
        });
    }
    let server = Arc::new(server);
    let serving = tokio::spawn({
        let server = server.clone();
        async move { server.serve().await }
    });

    let client = SeqpacketStream::connect(&socket).await?;
    client.send(b"hang").await?;
    while server.connection_count() == 0 {
        tokio::task::yield_now().await;
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    tokio::time::timeout(Duration::from_secs(5), server.close()).await??;
    assert!(matches!(serving.await?, Err(FsiddError::ServerClosed)));

    // either the cancellation error made it out or the connection ended first
    let mut buf = [0u8; 64];
    let n = tokio::time::timeout(Duration::from_secs(5), client.recv(&mut buf)).await??;
    if n > 0 {
        assert_eq!(&buf[..n], b"- operation cancelled");
    }

    tokio::time::timeout(Duration::from_secs(5), async {
        while !cancelled.load(Ordering::SeqCst) {
            tokio::task::yield_now().await;
        }
    })
    .await?;

    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_invalid_utf8_paths_are_rejected() -> anyhow::Result<()> {
    let store = Arc::new(MemoryFsidStore::new());
    let harness = Harness::with_store(store.clone())?;
    let stream = SeqpacketStream::connect(&harness.socket).await?;
    let mut buf = [0u8; 64];

    for request in [
        &b"get_or_create_fsidnum /srv/\xff"[..],
        &b"get_or_create_fsidnum /srv/\xfe"[..],
    ] {
        stream.send(request).await?;
        let n = stream.recv(&mut buf).await?;
        assert_eq!(&buf[..n], b"- invalid argument");
    }
    assert_eq!(store.allocations(), 0);

    stream.send(b"get_or_create_fsidnum /srv/a").await?;
    let n = stream.recv(&mut buf).await?;
    assert_eq!(&buf[..n], b"+ 1");

    drop(stream);
    harness.stop().await
}

#[test_log::test(tokio::test)]
async fn test_shutdown_returns_at_deadline() -> anyhow::Result<()> {
    let started = Arc::new(Notify::new());

    let temp_dir = tempfile::tempdir()?;
    let socket = temp_dir.path().join("fsidd.sock");
    let mut server = Server::bind(&socket)?;
    {
        let started = started.clone();
        server.handle("hang", move |cancel: CancellationToken, _| {
            let started = started.clone();
            async move {
                started.notify_one();
                cancel.cancelled().await;
                FsiddResult::<String>::Err(FsiddError::Cancelled)
            }
        });
    }
    let server = Arc::new(server);
    let serving = tokio::spawn({
        let server = server.clone();
        async move { server.serve().await }
    });

    let client = SeqpacketStream::connect(&socket).await?;
    client.send(b"hang").await?;
    started.notified().await;

    tokio::time::timeout(
        Duration::from_secs(5),
        server.shutdown(Duration::from_millis(200)),
    )
    .await??;
    assert_eq!(server.connection_count(), 1);
    assert!(matches!(serving.await?, Err(FsiddError::ServerClosed)));

    server.close().await?;
    tokio::time::timeout(Duration::from_secs(5), async {
        while server.connection_count() > 0 {
            tokio::task::yield_now().await;
        }
    })
    .await?;

    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_close_after_serve_is_dropped() -> anyhow::Result<()> {
    let temp_dir = tempfile::tempdir()?;
    let server = Server::bind(temp_dir.path().join("fsidd.sock"))?;

    tokio::select! {
        result = server.serve() => panic!("serve returned early: {result:?}"),
        _ = tokio::time::sleep(Duration::from_millis(50)) => {}
    }

    tokio::time::timeout(Duration::from_secs(5), server.close()).await??;
    assert!(matches!(server.serve().await, Err(FsiddError::ServerClosed)));

    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_serve_after_close_is_refused() -> anyhow::Result<()> {
    let temp_dir = tempfile::tempdir()?;
    let server = Server::bind(temp_dir.path().join("fsidd.sock"))?;

    server.close().await?;
    assert!(matches!(server.serve().await, Err(FsiddError::ServerClosed)));

    Ok(())
}

#[tokio::test]
#[should_panic(expected = "multiple registrations for VERSION")]
async fn test_duplicate_registration_panics() {
    let temp_dir = tempfile::tempdir().unwrap();
    let mut server = Server::bind(temp_dir.path().join("fsidd.sock")).unwrap();

    server.handle("version", |_, _| async { Ok("1".to_string()) });
    server.handle("VERSION", |_, _| async { Ok("2".to_string()) });
}

#[tokio::test]
#[should_panic(expected = "cmd required")]
async fn test_empty_verb_panics() {
    let temp_dir = tempfile::tempdir().unwrap();
    let mut server = Server::bind(temp_dir.path().join("fsidd.sock")).unwrap();

    server.handle("", |_, _| async { Ok(String::new()) });
}

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A server on a temporary socket, serving the protocol verbs from an in-memory store.
struct Harness {
    server: Arc<Server>,
    serving: JoinHandle<FsiddResult<()>>,
    socket: PathBuf,
    _temp_dir: TempDir,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Harness {
    fn new() -> anyhow::Result<Self> {
        Self::with_store(Arc::new(MemoryFsidStore::new()))
    }

    fn with_store(store: Arc<MemoryFsidStore>) -> anyhow::Result<Self> {
        let temp_dir = tempfile::tempdir()?;
        let socket = temp_dir.path().join("fsidd.sock");

        let cache = FsidCache::new(store, Retrier::new(RetryPolicy::default()), true);
        let mut server = Server::bind(&socket)?;
        commands::register_commands(&mut server, Arc::new(cache));

        let server = Arc::new(server);
        let serving = tokio::spawn({
            let server = server.clone();
            async move { server.serve().await }
        });

        Ok(Self {
            server,
            serving,
            socket,
            _temp_dir: temp_dir,
        })
    }

    async fn client(&self) -> FsiddResult<Client> {
        Client::connect(&self.socket).await
    }

    async fn stop(self) -> anyhow::Result<()> {
        self.server.shutdown(Duration::from_secs(5)).await?;
        self.server.close().await?;
        assert!(matches!(self.serving.await?, Err(FsiddError::ServerClosed)));
        Ok(())
    }
}
