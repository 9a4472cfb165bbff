//! Shared helpers for the routines server integration tests.
//!
//! Servers are started in-process on an ephemeral port so tests can run in
//! parallel without reserving ports.

// Allow dead_code - not every test binary uses every helper
#![allow(dead_code)]

use routines_server::{RoutinesServer, ServerConfig, TaskGroup, TaskRegistry};
use serde_json::Value;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// A server running on a background task for the lifetime of the value.
pub struct TestServer {
    pub base_url: String,
    pub server: RoutinesServer,
    handle: JoinHandle<()>,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub async fn spawn_test_server(registry: TaskRegistry, config: ServerConfig) -> TestServer {
    let server = RoutinesServer::new(config, Arc::new(registry));
    let router = server.router();
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind test listener");
    let addr = listener.local_addr().expect("Failed to read local addr");
    let handle = tokio::spawn(async move {
        axum::serve(listener, router).await.expect("Test server failed");
    });
    TestServer {
        base_url: format!("http://{addr}"),
        server,
        handle,
    }
}

/// A small registry covering plain output, arguments and failure.
pub fn sample_registry() -> TaskRegistry {
    TaskRegistry::builder()
        .group(
            TaskGroup::new("Samples")
                .task("Hello", |stream, _args| {
                    stream.send_line("hello");
                    Ok(())
                })
                .task("Echo", |stream, args: &[Value]| {
                    for arg in args {
                        stream.send_line(arg.clone());
                    }
                    Ok(())
                })
                .task("Broken", |stream, _args| {
                    stream.send_line("before failure");
                    anyhow::bail!("broken on purpose")
                }),
        )
        .group(
            TaskGroup::new("Quiet")
                .settings(
                    routines_server::RoutineSettings::default()
                        .without_start_banner()
                        .without_stop_banner(),
                )
                .task("Plain", |stream, args| {
                    stream.send_line(format!("{} args", args.len()));
                    Ok(())
                }),
        )
        .build()
        .expect("sample registry is valid")
}
