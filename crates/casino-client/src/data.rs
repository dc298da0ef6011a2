//! Opaque `db/op` access to server tables.
//!
//! The server owns table semantics and permissions; the client only forwards
//! `(table, operation, op_id, op_data)` and hands back the result verbatim.

use casino_core::{ClientError, Result};
use serde_json::{Value, json};
use tracing::{debug, instrument, warn};

use crate::correlator::RequestCorrelator;
use crate::protocol::{DatabaseOperationRequest, DbOperation};

/// Page size the server applies when `find_all` is given no limit.
pub const DEFAULT_PAGE_SIZE: u32 = 10;

/// Outcome of a `db/op` call.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DbOpResult {
    /// Operation result, `null` for writes.
    pub result: Value,
    /// Server-side error, `null` on success.
    pub err: Value,
    /// Server execution time in microseconds.
    pub exec_time_us: u64,
}

impl DbOpResult {
    /// Server-side error message, if the operation failed.
    pub fn error(&self) -> Option<String> {
        match &self.err {
            Value::Null => None,
            Value::String(s) if s.is_empty() => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Whether the server reported no error.
    pub fn is_ok(&self) -> bool {
        self.error().is_none()
    }
}

/// Table access over the correlated connection.
#[derive(Clone, Debug)]
pub struct DataClient {
    correlator: RequestCorrelator,
}

impl DataClient {
    /// Route `db/op` calls through `correlator`.
    pub fn new(correlator: RequestCorrelator) -> Self {
        Self { correlator }
    }

    /// Forward one table operation.
    ///
    /// Errors the server reports for the operation itself come back inside
    /// [`DbOpResult`]. A refusal to run it at all, such as on an
    /// unauthenticated connection, fails with [`ClientError::Server`].
    #[instrument(skip(self, op_id, op_data))]
    pub async fn perform(
        &self,
        table: &str,
        operation: DbOperation,
        op_id: Value,
        op_data: Value,
    ) -> Result<DbOpResult> {
        let response = self
            .correlator
            .call(&DatabaseOperationRequest {
                table: table.to_owned(),
                operation,
                op_id,
                op_data,
            })
            .await?;
        if let Some(reason) = response.refusal() {
            warn!(table, reason = %reason, "db/op refused");
            return Err(ClientError::Server(reason));
        }
        debug!(exec_time_us = response.exec_time_us, "db/op done");
        Ok(DbOpResult {
            result: response.result,
            err: response.err,
            exec_time_us: response.exec_time_us,
        })
    }

    /// Fetch row `id`.
    pub async fn find_by_id(&self, table: &str, id: u64) -> Result<DbOpResult> {
        self.perform(table, DbOperation::FindById, json!(id), Value::Null)
            .await
    }

    /// Fetch a page of rows. The server reads the limit from `op_id` and the
    /// offset from `op_data`.
    pub async fn find_all(&self, table: &str, limit: u32, offset: u32) -> Result<DbOpResult> {
        self.perform(table, DbOperation::FindAll, json!(limit), json!(offset))
            .await
    }

    /// Insert `data`.
    pub async fn create(&self, table: &str, data: Value) -> Result<DbOpResult> {
        self.perform(table, DbOperation::Create, Value::Null, data)
            .await
    }

    /// Patch row `id` with `data`.
    pub async fn update(&self, table: &str, id: u64, data: Value) -> Result<DbOpResult> {
        self.perform(table, DbOperation::Update, json!(id), data)
            .await
    }

    /// Remove row `id`.
    pub async fn delete(&self, table: &str, id: u64) -> Result<DbOpResult> {
        self.perform(table, DbOperation::Delete, json!(id), Value::Null)
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use assert_matches::assert_matches;
    use casino_core::WireEnvelope;

    use crate::connection::{ConnectionConfig, ConnectionManager};
    use crate::transport::{MemoryConnector, MemoryPeer};

    async fn connected() -> (DataClient, MemoryPeer) {
        let (connector, mut acceptor) = MemoryConnector::new();
        let connection =
            ConnectionManager::new(ConnectionConfig::new("ws://memory/ws"), Arc::new(connector));
        let data = DataClient::new(RequestCorrelator::new(connection.clone(), None));
        connection.connect();
        connection.wait_connected().await.unwrap();
        let peer = acceptor.accept().await.unwrap();
        (data, peer)
    }

    #[test]
    fn error_message_variants() {
        let ok = DbOpResult::default();
        assert_eq!(ok.error(), None);
        assert!(ok.is_ok());

        let empty = DbOpResult {
            err: json!(""),
            ..DbOpResult::default()
        };
        assert!(empty.is_ok());

        let failed = DbOpResult {
            err: json!("permission denied"),
            ..DbOpResult::default()
        };
        assert_eq!(failed.error().as_deref(), Some("permission denied"));

        let structured = DbOpResult {
            err: json!({"code": 3}),
            ..DbOpResult::default()
        };
        assert_eq!(structured.error().as_deref(), Some(r#"{"code":3}"#));
    }

    #[tokio::test]
    async fn find_by_id_forwards_request() {
        let (data, mut peer) = connected().await;
        let call = tokio::spawn(async move { data.find_by_id("users", 7).await });

        let request = peer.recv().await.unwrap();
        assert_eq!(request.kind, "db/op");
        assert_eq!(
            request.payload,
            json!({"table": "users", "operation": "findByID", "op_id": 7, "op_data": null})
        );
        assert!(peer.reply(
            &request,
            json!({"op": request.payload.clone(), "result": {"ID": 7, "Username": "bob"}, "err": null, "exec_time_us": 31})
        ));

        let result = call.await.unwrap().unwrap();
        assert!(result.is_ok());
        assert_eq!(result.result["Username"], "bob");
        assert_eq!(result.exec_time_us, 31);
    }

    #[tokio::test]
    async fn find_all_puts_limit_in_op_id() {
        let (data, mut peer) = connected().await;
        let call = tokio::spawn(async move { data.find_all("wallets", 25, 50).await });

        let request = peer.recv().await.unwrap();
        assert_eq!(request.payload["operation"], "findAll");
        assert_eq!(request.payload["op_id"], 25);
        assert_eq!(request.payload["op_data"], 50);
        assert!(peer.reply(&request, json!({"result": [], "err": null})));

        assert_eq!(call.await.unwrap().unwrap().result, json!([]));
    }

    #[tokio::test]
    async fn server_error_is_a_result_not_an_error() {
        let (data, mut peer) = connected().await;
        let call = tokio::spawn(async move { data.delete("users", 3).await });

        let request = peer.recv().await.unwrap();
        assert_eq!(request.payload["operation"], "delete");
        assert!(peer.reply(
            &request,
            json!({"result": null, "err": "permission denied: only admins can delete users"})
        ));

        let result = call.await.unwrap().unwrap();
        assert_eq!(
            result.error().as_deref(),
            Some("permission denied: only admins can delete users")
        );
    }

    #[tokio::test]
    async fn unauthorized_refusal_is_an_error() {
        let (data, mut peer) = connected().await;
        let call = tokio::spawn(async move { data.delete("users", 3).await });

        let request = peer.recv().await.unwrap();
        let refusal = WireEnvelope {
            kind: "res".into(),
            payload: json!({
                "success": false,
                "status": "unauthorized",
                "message": "You have to be authorized to interact"
            }),
            nonce: request.nonce,
        };
        assert!(peer.send(&refusal));

        assert_matches!(
            call.await.unwrap(),
            Err(ClientError::Server(reason)) if reason == "unauthorized"
        );
    }

    #[tokio::test]
    async fn update_and_create_carry_data() {
        let (data, mut peer) = connected().await;
        let update = tokio::spawn({
            let data = data.clone();
            async move { data.update("users", 7, json!({"DisplayName": "Robert"})).await }
        });
        let request = peer.recv().await.unwrap();
        assert_eq!(request.payload["op_id"], 7);
        assert_eq!(request.payload["op_data"]["DisplayName"], "Robert");
        assert!(peer.reply(&request, json!({"err": null})));
        assert!(update.await.unwrap().unwrap().is_ok());

        let create = tokio::spawn(async move { data.create("wallets", json!({"UserID": 7})).await });
        let request = peer.recv().await.unwrap();
        assert_eq!(request.payload["operation"], "create");
        assert!(request.payload["op_id"].is_null());
        assert!(peer.reply(&request, json!({"err": null})));
        assert!(create.await.unwrap().unwrap().is_ok());
    }

    #[tokio::test]
    async fn malformed_response_is_unexpected() {
        let (data, mut peer) = connected().await;
        let call = tokio::spawn(async move { data.find_by_id("users", 1).await });
        let request = peer.recv().await.unwrap();
        assert!(peer.reply(&request, json!({"exec_time_us": "slow"})));
        assert_matches!(
            call.await.unwrap(),
            Err(ClientError::UnexpectedResponse { kind, .. }) if kind == "db/op"
        );
    }
}
