//! Method dispatch for the three logical services.
//!
//! The service layer is thin: decode the body into the typed request,
//! forward into the repository, encode the result. All behavior lives
//! in the engine.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use silo_engine::{EngineError, EngineResult, Repository, RequestContext};
use silo_proto::{
    BeginTransactionRequest, DeleteRequest, DescribeTableRequest, ExecRawSqlRequest,
    InsertRequest, ListTablesRequest, QueryRequest, TransactionRequest, UpdateRequest,
};

pub struct DataService {
    repo: Arc<dyn Repository>,
}

impl DataService {
    pub fn new(repo: Arc<dyn Repository>) -> Self {
        Self { repo }
    }

    /// Route one envelope to the engine and return the response body.
    pub async fn dispatch(
        &self,
        ctx: &RequestContext,
        method: &str,
        body: serde_json::Value,
    ) -> EngineResult<serde_json::Value> {
        match method {
            "crud.Query" => {
                let req: QueryRequest = parse(body)?;
                encode(self.repo.query(ctx, &req).await?)
            }
            "crud.Insert" => {
                let req: InsertRequest = parse(body)?;
                encode(self.repo.insert(ctx, &req).await?)
            }
            "crud.Update" => {
                let req: UpdateRequest = parse(body)?;
                encode(self.repo.update(ctx, &req).await?)
            }
            "crud.Delete" => {
                let req: DeleteRequest = parse(body)?;
                encode(self.repo.delete(ctx, &req).await?)
            }
            "crud.BeginTransaction" => {
                let req: BeginTransactionRequest = parse(body)?;
                encode(self.repo.begin_transaction(ctx, &req).await?)
            }
            "crud.CommitTransaction" => {
                let req: TransactionRequest = parse(body)?;
                self.repo.commit_transaction(ctx, &req).await?;
                Ok(json!({}))
            }
            "crud.RollbackTransaction" => {
                let req: TransactionRequest = parse(body)?;
                self.repo.rollback_transaction(ctx, &req).await?;
                Ok(json!({}))
            }
            "metadata.ListTables" => {
                let req: ListTablesRequest = parse(body)?;
                encode(self.repo.list_tables(ctx, &req).await?)
            }
            "metadata.DescribeTable" => {
                let req: DescribeTableRequest = parse(body)?;
                encode(self.repo.describe_table(ctx, &req).await?)
            }
            "rawsql.ExecRawSQL" => {
                let req: ExecRawSqlRequest = parse(body)?;
                encode(self.repo.exec_raw_sql(ctx, &req).await?)
            }
            other => Err(EngineError::invalid_argument(format!(
                "unknown method '{other}'"
            ))),
        }
    }
}

fn parse<T: DeserializeOwned>(body: serde_json::Value) -> EngineResult<T> {
    serde_json::from_value(body)
        .map_err(|err| EngineError::invalid_argument(format!("malformed request body: {err}")))
}

fn encode<T: Serialize>(value: T) -> EngineResult<serde_json::Value> {
    serde_json::to_value(value)
        .map_err(|err| EngineError::invalid_argument(format!("failed to encode response: {err}")))
}
