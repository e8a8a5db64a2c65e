//! Integration tests that boot the gateway and drive the framed RPC
//! surface over TCP.
//!
//! Most tests run with no backends configured, which exercises the
//! envelope, dispatch and validation paths without external services.
//! The full CRUD happy path runs only when `SILO_TEST_MYSQL_DSN`
//! points at a reachable MySQL instance.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use silo_proto::code;
use silo_proto::codec::{
    decode_response, encode_request, frame_codec, RpcRequest, RpcResponse, REQUEST_ID_METADATA,
};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use silo_server::config::{Config, DatabaseConfig, ServerConfig};
use silo_server::run_with_shutdown;

struct TestGateway {
    addr: SocketAddr,
    shutdown: CancellationToken,
    task: tokio::task::JoinHandle<Result<()>>,
}

impl TestGateway {
    async fn start(databases: Vec<DatabaseConfig>) -> Result<Self> {
        let config = Config {
            databases,
            server: ServerConfig {
                addr: "127.0.0.1:0".into(),
                ..ServerConfig::default()
            },
            ..Config::default()
        };

        let shutdown = CancellationToken::new();
        let (ready_tx, ready_rx) = oneshot::channel();
        let task = tokio::spawn(run_with_shutdown(config, shutdown.clone(), Some(ready_tx)));
        let addr = ready_rx.await.context("gateway failed to report readiness")?;
        Ok(Self {
            addr,
            shutdown,
            task,
        })
    }

    async fn stop(self) -> Result<()> {
        self.shutdown.cancel();
        self.task.await.context("join gateway task")?
    }
}

struct Client {
    framed: Framed<TcpStream, tokio_util::codec::LengthDelimitedCodec>,
    next_id: u64,
}

impl Client {
    async fn connect(addr: SocketAddr) -> Result<Self> {
        let socket = TcpStream::connect(addr).await.context("connect to gateway")?;
        Ok(Self {
            framed: Framed::new(socket, frame_codec()),
            next_id: 0,
        })
    }

    async fn call(&mut self, method: &str, body: serde_json::Value) -> Result<RpcResponse> {
        self.next_id += 1;
        let request = RpcRequest {
            id: self.next_id,
            method: method.into(),
            metadata: BTreeMap::from([(
                REQUEST_ID_METADATA.to_string(),
                format!("test-{}", self.next_id),
            )]),
            body,
        };
        self.framed
            .send(encode_request(&request)?)
            .await
            .context("send request frame")?;
        let frame = self
            .framed
            .next()
            .await
            .context("connection closed before response")?
            .context("read response frame")?;
        let response = decode_response(&frame)?;
        assert_eq!(response.id, request.id, "response must echo the request id");
        Ok(response)
    }
}

fn error_kind(response: &RpcResponse) -> &str {
    response
        .error
        .as_ref()
        .map(|e| e.kind.as_str())
        .unwrap_or("")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unknown_method_is_rejected() -> Result<()> {
    let gateway = TestGateway::start(vec![]).await?;
    let mut client = Client::connect(gateway.addr).await?;

    let response = client.call("crud.Explode", json!({})).await?;
    assert_eq!(error_kind(&response), code::INVALID_ARGUMENT);

    gateway.stop().await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unknown_database_is_rejected() -> Result<()> {
    let gateway = TestGateway::start(vec![]).await?;
    let mut client = Client::connect(gateway.addr).await?;

    let response = client
        .call("metadata.ListTables", json!({ "db_name": "primary" }))
        .await?;
    assert_eq!(error_kind(&response), code::INVALID_ARGUMENT);
    assert!(
        response.error.as_ref().unwrap().message.contains("unknown database"),
        "message should name the problem"
    );

    gateway.stop().await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn commit_and_rollback_of_unknown_ids_are_asymmetric() -> Result<()> {
    let gateway = TestGateway::start(vec![]).await?;
    let mut client = Client::connect(gateway.addr).await?;

    let commit = client
        .call(
            "crud.CommitTransaction",
            json!({ "transaction_id": "no-such-id" }),
        )
        .await?;
    assert_eq!(error_kind(&commit), code::INVALID_TRANSACTION_ID);

    let rollback = client
        .call(
            "crud.RollbackTransaction",
            json!({ "transaction_id": "no-such-id" }),
        )
        .await?;
    assert!(
        rollback.error.is_none(),
        "rollback of an unknown id succeeds: {:?}",
        rollback.error
    );

    gateway.stop().await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unqualified_update_is_blocked_before_any_backend_work() -> Result<()> {
    let gateway = TestGateway::start(vec![]).await?;
    let mut client = Client::connect(gateway.addr).await?;

    // The where tree is present but resolves to an empty fragment; the
    // engine must refuse before looking at the (unconfigured) backend.
    let response = client
        .call(
            "crud.Update",
            json!({
                "table": { "db_name": "primary", "table_name": "users" },
                "data": { "name": "x" },
                "where_clause": { "nested": { "logical_operator": "AND", "clauses": [] } }
            }),
        )
        .await?;
    assert_eq!(error_kind(&response), code::INVALID_WHERE_CLAUSE);

    gateway.stop().await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn malformed_frames_get_an_error_envelope() -> Result<()> {
    let gateway = TestGateway::start(vec![]).await?;
    let socket = TcpStream::connect(gateway.addr).await?;
    let mut framed = Framed::new(socket, frame_codec());

    framed.send(Bytes::from_static(b"this is not json")).await?;
    let frame = framed
        .next()
        .await
        .context("connection closed before response")??;
    let response = decode_response(&frame)?;
    assert_eq!(error_kind(&response), code::INVALID_ARGUMENT);

    gateway.stop().await
}

/// Full CRUD round trip against a live MySQL backend; skipped unless
/// `SILO_TEST_MYSQL_DSN` is set.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn crud_happy_path_against_mysql() -> Result<()> {
    let Ok(dsn) = std::env::var("SILO_TEST_MYSQL_DSN") else {
        eprintln!("SILO_TEST_MYSQL_DSN not set, skipping");
        return Ok(());
    };

    let gateway = TestGateway::start(vec![DatabaseConfig {
        name: "primary".into(),
        dsn,
    }])
    .await?;
    let mut client = Client::connect(gateway.addr).await?;

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let table = format!("silo_it_{}_{}", std::process::id(), nanos);

    let create = client
        .call(
            "rawsql.ExecRawSQL",
            json!({
                "db": "primary",
                "sql": format!(
                    "CREATE TABLE {table} (id BIGINT PRIMARY KEY, name VARCHAR(64))"
                )
            }),
        )
        .await?;
    assert!(create.error.is_none(), "create table: {:?}", create.error);

    // Transactional insert: begin, insert, commit, then verify the
    // handle is spent.
    let begin = client
        .call("crud.BeginTransaction", json!({ "db_name": "primary" }))
        .await?;
    assert!(begin.error.is_none(), "begin: {:?}", begin.error);
    let tx_id = begin.body["transaction_id"]
        .as_str()
        .context("begin returns a transaction id")?
        .to_string();

    let insert = client
        .call(
            "crud.Insert",
            json!({
                "table": { "db_name": "primary", "table_name": table },
                "rows": [ { "id": 1, "name": "ada" } ],
                "transaction_id": tx_id
            }),
        )
        .await?;
    assert!(insert.error.is_none(), "insert: {:?}", insert.error);
    assert_eq!(insert.body["affected_rows"], json!(1));

    let commit = client
        .call("crud.CommitTransaction", json!({ "transaction_id": tx_id }))
        .await?;
    assert!(commit.error.is_none(), "commit: {:?}", commit.error);

    let recommit = client
        .call("crud.CommitTransaction", json!({ "transaction_id": tx_id }))
        .await?;
    assert_eq!(
        error_kind(&recommit),
        code::INVALID_TRANSACTION_ID,
        "a committed id must not resolve again"
    );

    let query = client
        .call(
            "crud.Query",
            json!({
                "table": { "db_name": "primary", "table_name": table },
                "where_clause": {
                    "condition": {
                        "field": "id",
                        "operator": "EQ",
                        "operand": { "literal": 1 }
                    }
                }
            }),
        )
        .await?;
    assert!(query.error.is_none(), "query: {:?}", query.error);
    assert_eq!(query.body["rows"][0]["name"], json!("ada"));

    let update = client
        .call(
            "crud.Update",
            json!({
                "table": { "db_name": "primary", "table_name": table },
                "data": { "name": "grace" },
                "where_clause": {
                    "condition": {
                        "field": "id",
                        "operator": "EQ",
                        "operand": { "literal": 1 }
                    }
                }
            }),
        )
        .await?;
    assert!(update.error.is_none(), "update: {:?}", update.error);
    assert_eq!(update.body["affected_rows"], json!(1));

    let delete = client
        .call(
            "crud.Delete",
            json!({
                "table": { "db_name": "primary", "table_name": table },
                "where_clause": {
                    "condition": {
                        "field": "id",
                        "operator": "IN",
                        "operand": { "literal": [1] }
                    }
                }
            }),
        )
        .await?;
    assert!(delete.error.is_none(), "delete: {:?}", delete.error);
    assert_eq!(delete.body["affected_rows"], json!(1));

    let describe = client
        .call(
            "metadata.DescribeTable",
            json!({ "table": { "db_name": "primary", "table_name": table } }),
        )
        .await?;
    assert!(describe.error.is_none(), "describe: {:?}", describe.error);
    assert_eq!(describe.body["columns"][0]["name"], json!("id"));

    let drop = client
        .call(
            "rawsql.ExecRawSQL",
            json!({ "db": "primary", "sql": format!("DROP TABLE {table}") }),
        )
        .await?;
    assert!(drop.error.is_none(), "drop table: {:?}", drop.error);

    gateway.stop().await
}
