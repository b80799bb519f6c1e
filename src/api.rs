//! The v3 HTTP API.
//!
//! JSON over HTTP with Basic authentication: the username is the account
//! name and the password its token. Every response is an envelope of
//! `{"success": true, "result": …}` or
//! `{"success": false, "error": CODE, "message": TEXT}`; the `X-Force-OK`
//! header coerces the HTTP status to 200 for clients whose HTTP stacks
//! cannot read non-2xx bodies.

use crate::account::SharedAccount;
use crate::currency::Currency;
use crate::error::{Error, Result};
use crate::ledger::{self, authenticate, LedgerTransaction};
use crate::payment::pay;
use crate::storage::Backend;
use crate::util::{homogenise_username, COPYRIGHT, REPORT_SECURITY, SOURCE_URL, VERSION};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Deserialize;
use serde_json::{json, Value};
use warp::http::StatusCode;
use warp::hyper::body::Bytes;
use warp::{Filter, Rejection, Reply};

/// Request bodies larger than this are rejected outright.
const MAX_BODY_LENGTH: u64 = 4096;

#[derive(Clone, Debug)]
struct Credentials {
    username: String,
    token: String,
}

fn parse_basic_auth(header: &str) -> Option<Credentials> {
    let (scheme, payload) = header.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = String::from_utf8(BASE64.decode(payload.trim()).ok()?).ok()?;
    let (username, token) = decoded.split_once(':')?;
    Some(Credentials {
        username: username.to_string(),
        token: token.to_string(),
    })
}

fn is_yes(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "yes" | "y" | "1"
    )
}

fn with_backend<B: Backend>(
    backend: B,
) -> impl Filter<Extract = (B,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || backend.clone())
}

fn credentials() -> impl Filter<Extract = (Option<Credentials>,), Error = Rejection> + Clone {
    warp::header::optional::<String>("authorization")
        .map(|header: Option<String>| header.as_deref().and_then(parse_basic_auth))
}

fn force_ok() -> impl Filter<Extract = (bool,), Error = Rejection> + Clone {
    warp::header::optional::<String>("x-force-ok")
        .map(|header: Option<String>| header.as_deref().map(is_yes).unwrap_or(false))
}

fn body() -> impl Filter<Extract = (Option<String>, Bytes), Error = Rejection> + Clone {
    warp::header::optional::<String>("content-type")
        .and(warp::body::content_length_limit(MAX_BODY_LENGTH))
        .and(warp::body::bytes())
}

fn get_or_post() -> impl Filter<Extract = (), Error = Rejection> + Copy {
    warp::get().or(warp::post()).unify()
}

/// Decodes a request body, enforcing the size floor and the JSON
/// content-type rule (absent, `application/json` or `application/*+json`).
fn parse_body<T: serde::de::DeserializeOwned>(
    content_type: Option<&str>,
    body: &Bytes,
) -> Result<T> {
    if let Some(content_type) = content_type {
        let main = content_type.split(';').next().unwrap_or("").trim();
        let json_like = main.is_empty()
            || main == "application/json"
            || (main.starts_with("application/") && main.ends_with("+json"));
        if !json_like {
            return Err(Error::InvalidRequest);
        }
    }
    if body.len() < 3 {
        return Err(Error::InvalidRequest);
    }
    serde_json::from_slice(body).map_err(|_| Error::InvalidRequest)
}

fn respond(result: Result<Value>, force_ok: bool) -> warp::reply::Response {
    let (payload, status) = match result {
        Ok(result) => (json!({"success": true, "result": result}), StatusCode::OK),
        Err(error) => (
            json!({
                "success": false,
                "error": error.code(),
                "message": error.message(),
            }),
            StatusCode::from_u16(error.http_status())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        ),
    };
    let status = if force_ok { StatusCode::OK } else { status };
    warp::reply::with_status(warp::reply::json(&payload), status).into_response()
}

/// Authenticates an endpoint that always requires a login. Any failure
/// reads as a bad login so unauthenticated probes cannot tell accounts
/// apart from errors.
async fn auto_login<B: Backend>(
    backend: &B,
    credentials: Option<Credentials>,
) -> Result<(LedgerTransaction<B>, SharedAccount)> {
    let credentials = credentials.ok_or(Error::InvalidLogin)?;
    authenticate(backend, &credentials.username, &credentials.token, &[])
        .await
        .map_err(|_| Error::InvalidLogin)
}

async fn summary_endpoint<B: Backend>(
    backend: B,
    credentials: Option<Credentials>,
) -> Result<Value> {
    let (mut tx, account) = auto_login(&backend, credentials).await?;
    let summary = account.summary().await;
    tx.commit().await?;
    Ok(serde_json::to_value(summary)?)
}

async fn balance_endpoint<B: Backend>(
    backend: B,
    credentials: Option<Credentials>,
) -> Result<Value> {
    let (mut tx, account) = auto_login(&backend, credentials).await?;
    let balance = account.balance().await;
    tx.commit().await?;
    Ok(serde_json::to_value(balance)?)
}

async fn history_endpoint<B: Backend>(
    backend: B,
    credentials: Option<Credentials>,
) -> Result<Value> {
    let (mut tx, account) = auto_login(&backend, credentials).await?;
    let history = account.history().await;
    tx.commit().await?;
    Ok(serde_json::to_value(history)?)
}

async fn pending_endpoint<B: Backend>(
    backend: B,
    credentials: Option<Credentials>,
) -> Result<Value> {
    let (mut tx, account) = auto_login(&backend, credentials).await?;
    let pending = account.pending().await;
    tx.commit().await?;
    Ok(serde_json::to_value(pending)?)
}

#[derive(Deserialize)]
struct PayRequest {
    #[serde(default)]
    source: String,
    #[serde(default)]
    target: String,
    #[serde(default)]
    target_server: String,
    #[serde(default)]
    amount: Option<Currency>,
    #[serde(default)]
    local_currency: bool,
}

async fn pay_endpoint<B: Backend>(
    backend: B,
    credentials: Option<Credentials>,
    content_type: Option<String>,
    body: Bytes,
) -> Result<Value> {
    let request: PayRequest = parse_body(content_type.as_deref(), &body)?;
    let credentials = credentials.ok_or(Error::InvalidRequest)?;
    let (mut tx, source) = authenticate(
        &backend,
        &credentials.username,
        &credentials.token,
        &[&request.target_server],
    )
    .await?;
    let amount = request.amount.ok_or(Error::InvalidAmount)?;
    let target = tx
        .cached(&request.target_server)
        .ok_or_else(|| Error::ServerNotFound(homogenise_username(&request.target_server)))?;

    match pay(
        &source,
        &request.source,
        &request.target,
        &target,
        amount,
        request.local_currency,
        true,
    )
    .await
    {
        Ok(transaction) => {
            tx.commit().await?;
            Ok(serde_json::to_value(transaction)?)
        }
        Err(error) => {
            tx.abort().await?;
            Err(error)
        }
    }
}

#[derive(Deserialize, Default)]
struct ExchangeRateRequest {
    #[serde(default)]
    source: String,
    #[serde(default)]
    target: String,
    #[serde(default)]
    amount: Option<Currency>,
}

async fn exchange_rates_endpoint<B: Backend>(
    backend: B,
    content_type: Option<String>,
    body: Bytes,
) -> Result<Value> {
    let request: ExchangeRateRequest =
        parse_body(content_type.as_deref(), &body).unwrap_or_default();
    let amount = request.amount.ok_or(Error::InvalidAmount)?;
    let converted =
        ledger::exchange_rate_between(&backend, &request.source, &request.target, amount).await?;
    Ok(serde_json::to_value(converted)?)
}

#[derive(Deserialize, Default)]
struct TransactionList {
    #[serde(default)]
    transactions: Vec<String>,
}

async fn acknowledge_endpoint<B: Backend>(
    backend: B,
    credentials: Option<Credentials>,
    content_type: Option<String>,
    body: Bytes,
) -> Result<Value> {
    let (mut tx, account) = auto_login(&backend, credentials).await?;
    let request: TransactionList =
        parse_body(content_type.as_deref(), &body).unwrap_or_default();
    for id in &request.transactions {
        account.remove_pending(id).await;
    }
    tx.commit().await?;
    Ok(Value::Null)
}

async fn reject_endpoint<B: Backend>(
    backend: B,
    credentials: Option<Credentials>,
    content_type: Option<String>,
    body: Bytes,
) -> Result<Value> {
    let (mut tx, account) = auto_login(&backend, credentials).await?;
    let request: TransactionList =
        parse_body(content_type.as_deref(), &body).unwrap_or_default();

    let mut reverts = Vec::new();
    for id in &request.transactions {
        if let Some(transaction) = account.reject_pending(id).await {
            reverts.push(transaction);
        }
    }
    let rejecter_uid = account.uid().to_string();
    tx.commit().await?;

    // Reversals run on fresh transactions now that this request's holds are
    // released; the client has already been answered, so failures only log.
    for transaction in reverts {
        if let Err(error) = ledger::revert_rejected(&backend, &rejecter_uid, &transaction).await {
            log::warn!(
                "Failed to revert rejected transaction {}: {}",
                transaction.id,
                error
            );
        }
    }
    Ok(Value::Null)
}

async fn get_target_balance_endpoint<B: Backend>(
    backend: B,
    credentials: Option<Credentials>,
) -> Result<Value> {
    let (mut tx, account) = auto_login(&backend, credentials).await?;
    let target_balance = account.target_balance().await;
    tx.commit().await?;
    Ok(serde_json::to_value(target_balance)?)
}

#[derive(Deserialize)]
struct TargetBalanceRequest {
    #[serde(default)]
    target_balance: Option<Currency>,
}

async fn set_target_balance_endpoint<B: Backend>(
    backend: B,
    credentials: Option<Credentials>,
    content_type: Option<String>,
    body: Bytes,
) -> Result<Value> {
    let (mut tx, account) = auto_login(&backend, credentials).await?;
    let request: TargetBalanceRequest = parse_body(content_type.as_deref(), &body)?;
    let target_balance = request.target_balance.ok_or(Error::InvalidAmount)?;
    if !account.set_target_balance(target_balance).await {
        tx.abort().await?;
        return Err(Error::InvalidAmount);
    }
    tx.commit().await?;
    Ok(Value::Null)
}

async fn webhook_url_endpoint<B: Backend>(
    backend: B,
    credentials: Option<Credentials>,
) -> Result<Value> {
    let (mut tx, account) = auto_login(&backend, credentials).await?;
    let webhook_url = account.webhook_url().await;
    tx.commit().await?;
    Ok(serde_json::to_value(webhook_url)?)
}

fn version_payload() -> Result<Value> {
    Ok(json!({
        "version": VERSION,
        "copyright": COPYRIGHT.split('\n').collect::<Vec<_>>(),
        "license": "AGPLv3",
        "source": SOURCE_URL,
    }))
}

async fn handle_rejection(
    rejection: Rejection,
) -> std::result::Result<warp::reply::Response, Rejection> {
    if rejection.find::<warp::reject::PayloadTooLarge>().is_some() {
        return Ok(respond(Err(Error::PayloadTooLarge), false));
    }
    if rejection.is_not_found() {
        return Err(rejection);
    }
    Ok(respond(Err(Error::InvalidRequest), false))
}

/// Builds the full route tree over a backend.
pub fn routes<B: Backend>(
    backend: B,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let summary = warp::path!("v3" / "summary")
        .and(get_or_post())
        .and(with_backend(backend.clone()))
        .and(credentials())
        .and(force_ok())
        .then(|backend: B, credentials, force| async move {
            respond(summary_endpoint(backend, credentials).await, force)
        });

    let balance = warp::path!("v3" / "balance")
        .and(get_or_post())
        .and(with_backend(backend.clone()))
        .and(credentials())
        .and(force_ok())
        .then(|backend: B, credentials, force| async move {
            respond(balance_endpoint(backend, credentials).await, force)
        });

    let history = warp::path!("v3" / "history")
        .and(get_or_post())
        .and(with_backend(backend.clone()))
        .and(credentials())
        .and(force_ok())
        .then(|backend: B, credentials, force| async move {
            respond(history_endpoint(backend, credentials).await, force)
        });

    let pending = warp::path!("v3" / "pending_transactions")
        .and(get_or_post())
        .and(with_backend(backend.clone()))
        .and(credentials())
        .and(force_ok())
        .then(|backend: B, credentials, force| async move {
            respond(pending_endpoint(backend, credentials).await, force)
        });

    let pay = warp::path!("v3" / "pay")
        .and(warp::post())
        .and(with_backend(backend.clone()))
        .and(credentials())
        .and(force_ok())
        .and(body())
        .then(
            |backend: B, credentials, force, content_type, bytes| async move {
                respond(
                    pay_endpoint(backend, credentials, content_type, bytes).await,
                    force,
                )
            },
        );

    let exchange_rates = warp::path!("v3" / "exchange_rates")
        .and(warp::post())
        .and(with_backend(backend.clone()))
        .and(force_ok())
        .and(body())
        .then(|backend: B, force, content_type, bytes| async move {
            respond(
                exchange_rates_endpoint(backend, content_type, bytes).await,
                force,
            )
        });

    let acknowledge = warp::path!("v3" / "acknowledge_transactions")
        .and(warp::post())
        .and(with_backend(backend.clone()))
        .and(credentials())
        .and(force_ok())
        .and(body())
        .then(
            |backend: B, credentials, force, content_type, bytes| async move {
                respond(
                    acknowledge_endpoint(backend, credentials, content_type, bytes).await,
                    force,
                )
            },
        );

    let reject = warp::path!("v3" / "reject_transactions")
        .and(warp::post())
        .and(with_backend(backend.clone()))
        .and(credentials())
        .and(force_ok())
        .and(body())
        .then(
            |backend: B, credentials, force, content_type, bytes| async move {
                respond(
                    reject_endpoint(backend, credentials, content_type, bytes).await,
                    force,
                )
            },
        );

    let get_target_balance = warp::path!("v3" / "target_balance")
        .and(get_or_post())
        .and(with_backend(backend.clone()))
        .and(credentials())
        .and(force_ok())
        .then(|backend: B, credentials, force| async move {
            respond(
                get_target_balance_endpoint(backend, credentials).await,
                force,
            )
        });

    let put_target_balance = warp::path!("v3" / "target_balance")
        .and(warp::put())
        .and(with_backend(backend.clone()))
        .and(credentials())
        .and(force_ok())
        .and(body())
        .then(
            |backend: B, credentials, force, content_type, bytes| async move {
                respond(
                    set_target_balance_endpoint(backend, credentials, content_type, bytes).await,
                    force,
                )
            },
        );

    let set_target_balance = warp::path!("v3" / "set_target_balance")
        .and(warp::post())
        .and(with_backend(backend.clone()))
        .and(credentials())
        .and(force_ok())
        .and(body())
        .then(
            |backend: B, credentials, force, content_type, bytes| async move {
                respond(
                    set_target_balance_endpoint(backend, credentials, content_type, bytes).await,
                    force,
                )
            },
        );

    let webhook_url = warp::path!("v3" / "webhook_url")
        .and(get_or_post())
        .and(with_backend(backend.clone()))
        .and(credentials())
        .and(force_ok())
        .then(|backend: B, credentials, force| async move {
            respond(webhook_url_endpoint(backend, credentials).await, force)
        });

    let version = warp::path!("v3" / "version")
        .and(get_or_post())
        .and(force_ok())
        .then(|force| async move { respond(version_payload(), force) });

    let security_txt = warp::path!(".well-known" / "security.txt")
        .and(warp::get())
        .map(|| {
            format!(
                "# lurkcoin version: {}\n# Source: {}\nContact: {}\n",
                VERSION, SOURCE_URL, REPORT_SECURITY
            )
        });

    summary
        .or(balance)
        .or(history)
        .or(pending)
        .or(pay)
        .or(exchange_rates)
        .or(acknowledge)
        .or(reject)
        .or(put_target_balance)
        .or(get_target_balance)
        .or(set_target_balance)
        .or(webhook_url)
        .or(version)
        .or(security_txt)
        .recover(handle_rejection)
}
