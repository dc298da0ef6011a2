//! Typed request/response pairs for each server operation.
//!
//! Each request struct implements [`Call`], binding it to its wire `type`
//! string and the shape of its response payload. Field names follow the
//! server's JSON (camelCase for auth, snake_case for `db/op`).

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A request with a fixed wire type and a typed response.
pub trait Call: Serialize + Send + Sync {
    /// Wire `type` of the request envelope.
    const KIND: &'static str;
    /// Payload of the response envelope.
    type Response: DeserializeOwned + Send;
}

/// Fields shared by every auth response.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponseStatus {
    /// Whether the operation succeeded.
    pub success: bool,
    /// Short machine status.
    pub status: String,
    /// Human-readable detail.
    pub message: String,
}

// ── auth/register ───────────────────────────────────────────────────────────

/// `auth/register`
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    /// Login name.
    pub username: String,
    /// Plain password.
    pub password: String,
    /// Name shown to other players.
    pub display_name: String,
}

/// Response to [`RegisterRequest`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RegisterResponse {
    /// Common status fields.
    #[serde(flatten)]
    pub status: ResponseStatus,
    /// The username is taken.
    pub user_already_exists: bool,
    /// Session token on success.
    pub token: Option<String>,
}

impl Call for RegisterRequest {
    const KIND: &'static str = "auth/register";
    type Response = RegisterResponse;
}

// ── auth/login ──────────────────────────────────────────────────────────────

/// `auth/login`
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LoginRequest {
    /// Login name.
    pub username: String,
    /// Plain password.
    pub password: String,
}

/// Response to [`LoginRequest`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoginResponse {
    /// Common status fields.
    #[serde(flatten)]
    pub status: ResponseStatus,
    /// No user with that name.
    pub user_does_not_exist: bool,
    /// The password did not match.
    pub wrong_password: bool,
    /// Session token on success.
    pub token: Option<String>,
}

impl Call for LoginRequest {
    const KIND: &'static str = "auth/login";
    type Response = LoginResponse;
}

// ── auth/authenticate ───────────────────────────────────────────────────────

/// `auth/authenticate`
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticateRequest {
    /// Token from a previous register/login.
    pub token: String,
    /// Identifies the client flavour to the server.
    pub client_type: String,
}

/// Response to [`AuthenticateRequest`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthenticateResponse {
    /// Common status fields.
    #[serde(flatten)]
    pub status: ResponseStatus,
    /// Authenticated user.
    #[serde(rename = "userID")]
    pub user_id: u64,
    /// Session expiry, Unix milliseconds.
    pub expires_at: i64,
}

impl Call for AuthenticateRequest {
    const KIND: &'static str = "auth/authenticate";
    type Response = AuthenticateResponse;
}

// ── auth/does_user_exist ────────────────────────────────────────────────────

/// `auth/does_user_exist`
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DoesUserExistRequest {
    /// Name to look up.
    pub username: String,
}

/// Response to [`DoesUserExistRequest`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DoesUserExistResponse {
    /// Common status fields.
    #[serde(flatten)]
    pub status: ResponseStatus,
    /// Whether the name is registered.
    pub user_exists: bool,
}

impl Call for DoesUserExistRequest {
    const KIND: &'static str = "auth/does_user_exist";
    type Response = DoesUserExistResponse;
}

// ── db/op ───────────────────────────────────────────────────────────────────

/// Table operation understood by the server's data layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DbOperation {
    /// Insert `op_data`.
    #[serde(rename = "create")]
    Create,
    /// Fetch the row `op_id`.
    #[serde(rename = "findByID")]
    FindById,
    /// Fetch rows; `op_data` may carry `limit`/`offset`.
    #[serde(rename = "findAll")]
    FindAll,
    /// Patch row `op_id` with `op_data`.
    #[serde(rename = "update")]
    Update,
    /// Remove row `op_id`.
    #[serde(rename = "delete")]
    Delete,
}

/// `db/op`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DatabaseOperationRequest {
    /// Target table.
    pub table: String,
    /// What to do.
    pub operation: DbOperation,
    /// Row identifier, when the operation needs one.
    #[serde(default)]
    pub op_id: Value,
    /// Operation data, when the operation needs it.
    #[serde(default)]
    pub op_data: Value,
}

/// Response to [`DatabaseOperationRequest`].
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct DatabaseOperationResponse {
    /// Echo of the request.
    pub op: Option<DatabaseOperationRequest>,
    /// Operation result.
    pub result: Value,
    /// Server-side error, `null` on success.
    pub err: Value,
    /// Server execution time in microseconds.
    pub exec_time_us: u64,
    /// `false` when the server refused the operation outright, for example
    /// on an unauthenticated connection. Absent on a completed operation.
    pub success: Option<bool>,
    /// Status of a refusal, such as `unauthorized`.
    pub status: Option<String>,
    /// Detail of a refusal.
    pub message: Option<String>,
}

impl DatabaseOperationResponse {
    /// Reason the server refused to run the operation, if it did.
    ///
    /// A refusal carries `success: false` instead of `op`/`result`/`err`.
    pub fn refusal(&self) -> Option<String> {
        if self.success != Some(false) {
            return None;
        }
        let reason = [self.status.as_deref(), self.message.as_deref()]
            .into_iter()
            .flatten()
            .find(|s| !s.is_empty())
            .unwrap_or("refused");
        Some(reason.to_owned())
    }
}

impl Call for DatabaseOperationRequest {
    const KIND: &'static str = "db/op";
    type Response = DatabaseOperationResponse;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn register_request_wire_names() {
        let req = RegisterRequest {
            username: "bob".into(),
            password: "pw".into(),
            display_name: "Bob".into(),
        };
        assert_eq!(
            serde_json::to_value(&req).unwrap(),
            json!({"username": "bob", "password": "pw", "displayName": "Bob"})
        );
    }

    #[test]
    fn authenticate_response_reads_user_id() {
        let resp: AuthenticateResponse = serde_json::from_value(json!({
            "success": true,
            "status": "ok",
            "message": "",
            "userID": 7,
            "expiresAt": 1_999_999_999_000_i64
        }))
        .unwrap();
        assert!(resp.status.success);
        assert_eq!(resp.user_id, 7);
        assert_eq!(resp.expires_at, 1_999_999_999_000);
    }

    #[test]
    fn login_response_missing_fields_default() {
        let resp: LoginResponse =
            serde_json::from_value(json!({"success": false, "userDoesNotExist": true})).unwrap();
        assert!(!resp.status.success);
        assert!(resp.user_does_not_exist);
        assert!(!resp.wrong_password);
        assert!(resp.token.is_none());
    }

    #[test]
    fn authenticate_rejects_wrong_types() {
        let result: Result<AuthenticateResponse, _> =
            serde_json::from_value(json!({"success": "yes", "userID": "seven"}));
        assert!(result.is_err());
    }

    #[test]
    fn db_operation_wire_names() {
        assert_eq!(serde_json::to_value(DbOperation::FindById).unwrap(), "findByID");
        assert_eq!(serde_json::to_value(DbOperation::FindAll).unwrap(), "findAll");
        assert_eq!(serde_json::to_value(DbOperation::Create).unwrap(), "create");
    }

    #[test]
    fn db_response_with_echo() {
        let resp: DatabaseOperationResponse = serde_json::from_value(json!({
            "op": {"table": "users", "operation": "findByID", "op_id": 7, "op_data": null},
            "result": {"ID": 7},
            "err": null,
            "exec_time_us": 42
        }))
        .unwrap();
        assert_eq!(resp.op.as_ref().unwrap().operation, DbOperation::FindById);
        assert_eq!(resp.result["ID"], 7);
        assert!(resp.err.is_null());
        assert_eq!(resp.exec_time_us, 42);
        assert_eq!(resp.refusal(), None);
    }

    #[test]
    fn database_refusal_is_detected() {
        let resp: DatabaseOperationResponse = serde_json::from_value(json!({
            "success": false,
            "status": "unauthorized",
            "message": "You have to be authorized to interact"
        }))
        .unwrap();
        assert!(resp.op.is_none());
        assert!(resp.err.is_null());
        assert_eq!(resp.refusal().as_deref(), Some("unauthorized"));

        let bare: DatabaseOperationResponse =
            serde_json::from_value(json!({"success": false})).unwrap();
        assert_eq!(bare.refusal().as_deref(), Some("refused"));

        let completed: DatabaseOperationResponse =
            serde_json::from_value(json!({"success": true, "result": 1})).unwrap();
        assert_eq!(completed.refusal(), None);
    }

    #[test]
    fn kinds() {
        assert_eq!(LoginRequest::KIND, "auth/login");
        assert_eq!(DatabaseOperationRequest::KIND, "db/op");
    }
}
