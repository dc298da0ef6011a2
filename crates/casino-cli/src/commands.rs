//! Subcommand handlers. Each returns the JSON value printed on success.

use anyhow::{Context, Result, bail};
use casino_client::{CasinoClient, DbOpResult};
use serde_json::{Value, json};

use crate::{Command, DbCommand};

pub(crate) async fn run(client: &CasinoClient, command: Command) -> Result<Value> {
    match command {
        Command::Logout => {
            client.auth().logout().context("Failed to clear stored token")?;
            Ok(json!({ "loggedOut": true }))
        }
        Command::Status => {
            connect(client).await?;
            Ok(status(client))
        }
        Command::Login { username, password } => {
            connect(client).await?;
            let outcome = client.auth().login(&username, &password).await?;
            if !outcome.success {
                bail!(
                    "login failed (user not found: {}, wrong password: {})",
                    outcome.user_not_found,
                    outcome.wrong_password
                );
            }
            Ok(status(client))
        }
        Command::Register {
            username,
            password,
            display_name,
        } => {
            connect(client).await?;
            let display_name = display_name.unwrap_or_else(|| username.clone());
            let outcome = client
                .auth()
                .register(&username, &password, &display_name)
                .await?;
            if outcome.user_already_taken {
                bail!("username {username:?} is already taken");
            }
            if !outcome.success {
                bail!("registration failed");
            }
            Ok(status(client))
        }
        Command::Whoami => {
            connect(client).await?;
            if !client.session().is_authenticated {
                bail!("not logged in");
            }
            let profile = client
                .current_user()
                .refresh()
                .await?
                .context("session ended while loading the profile")?;
            Ok(serde_json::to_value(profile)?)
        }
        Command::UserExists { username } => {
            connect(client).await?;
            let exists = client.auth().does_user_exist(&username).await?;
            Ok(json!({ "username": username, "exists": exists }))
        }
        Command::Db { op } => {
            connect(client).await?;
            db(client, op).await
        }
    }
}

async fn connect(client: &CasinoClient) -> Result<()> {
    client
        .connect()
        .await
        .with_context(|| format!("Failed to connect to {}", client.settings().connection.url))
}

fn status(client: &CasinoClient) -> Value {
    let session = client.session();
    json!({
        "url": client.settings().connection.url,
        "state": client.state().to_string(),
        "authenticated": session.is_authenticated,
        "subjectId": session.is_authenticated.then_some(session.subject_id),
        "expiresAt": session.is_authenticated.then(|| session.expires_at.to_rfc3339()),
    })
}

async fn db(client: &CasinoClient, op: DbCommand) -> Result<Value> {
    let data = client.data();
    let result = match op {
        DbCommand::Get { table, id } => data.find_by_id(&table, id).await?,
        DbCommand::List {
            table,
            limit,
            offset,
        } => data.find_all(&table, limit, offset).await?,
        DbCommand::Create { table, data: row } => data.create(&table, parse_object(&row)?).await?,
        DbCommand::Update {
            table,
            id,
            data: fields,
        } => data.update(&table, id, parse_object(&fields)?).await?,
        DbCommand::Delete { table, id } => data.delete(&table, id).await?,
    };
    into_output(result)
}

fn into_output(result: DbOpResult) -> Result<Value> {
    if let Some(err) = result.error() {
        bail!("server rejected the operation: {err}");
    }
    Ok(json!({ "result": result.result, "execTimeUs": result.exec_time_us }))
}

/// Parse a JSON object argument.
fn parse_object(raw: &str) -> Result<Value> {
    let value: Value = serde_json::from_str(raw).context("data must be valid JSON")?;
    if !value.is_object() {
        bail!("data must be a JSON object");
    }
    Ok(value)
}
