use std::{sync::Arc, time::Duration};

use checkout_common::Secret;
use log::*;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};

use crate::{
    db_types::TokenAmount,
    traits::{BalanceChange, LedgerError, LedgerTransaction, LedgerVerifier},
};

pub const DEFAULT_LEDGER_TIMEOUT: Duration = Duration::from_secs(10);

/// A [`LedgerVerifier`] backed by a JSON-RPC ledger node. Only finalized transactions are ever returned.
#[derive(Clone)]
pub struct RpcLedgerClient {
    // The RPC url frequently embeds an API key, so it is never printed.
    url: Secret<String>,
    timeout: Duration,
    client: Arc<Client>,
}

impl RpcLedgerClient {
    pub fn new(url: Secret<String>, timeout: Duration) -> Result<Self, LedgerError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LedgerError::Unavailable(format!("Could not create the RPC client. {e}")))?;
        Ok(Self { url, timeout, client: Arc::new(client) })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn rpc_call(&self, method: &str, params: Value) -> Result<Value, LedgerError> {
        let payload = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });
        trace!("🔗️ Sending {method} request to the ledger node");
        let response =
            self.client.post(self.url.reveal().as_str()).json(&payload).send().await.map_err(|e| self.map_error(e))?;
        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(LedgerError::Unavailable(format!("The ledger node responded with {status}")));
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(LedgerError::NodeError(format!("{status}: {message}")));
        }
        response.json::<Value>().await.map_err(|e| {
            if e.is_timeout() {
                LedgerError::Timeout(self.timeout.as_millis() as u64)
            } else {
                LedgerError::MalformedResponse(e.to_string())
            }
        })
    }

    fn map_error(&self, e: reqwest::Error) -> LedgerError {
        if e.is_timeout() {
            LedgerError::Timeout(self.timeout.as_millis() as u64)
        } else if e.is_connect() || e.is_request() {
            LedgerError::Unavailable(e.to_string())
        } else {
            LedgerError::NodeError(e.to_string())
        }
    }
}

impl LedgerVerifier for RpcLedgerClient {
    async fn fetch_transaction(&self, signature: &str) -> Result<Option<LedgerTransaction>, LedgerError> {
        let params = json!([
            signature,
            {"encoding": "json", "commitment": "finalized", "maxSupportedTransactionVersion": 0}
        ]);
        let response = self.rpc_call("getTransaction", params).await?;
        let tx = parse_rpc_response(signature, &response)?;
        match &tx {
            Some(tx) => debug!("🔗️ Transaction {signature} found. {} balance changes", tx.balance_changes.len()),
            None => debug!("🔗️ Transaction {signature} is not known to the ledger, or is not finalized yet"),
        }
        Ok(tx)
    }
}

/// Interprets a `getTransaction` JSON-RPC response.
///
/// Balance changes are the difference between the post- and pre-transaction balances, paired with the account keys by
/// position. Addresses loaded from lookup tables follow the static keys, writable ones first. Accounts whose balance
/// did not move are left out.
pub fn parse_rpc_response(signature: &str, response: &Value) -> Result<Option<LedgerTransaction>, LedgerError> {
    if let Some(error) = response.get("error") {
        let message = error.get("message").and_then(Value::as_str).map(String::from).unwrap_or_else(|| error.to_string());
        return Err(LedgerError::NodeError(message));
    }
    let result = match response.get("result") {
        None | Some(Value::Null) => return Ok(None),
        Some(r) => r,
    };
    let meta = result.get("meta").ok_or_else(|| malformed("meta"))?;
    let mut keys = result
        .pointer("/transaction/message/accountKeys")
        .and_then(Value::as_array)
        .ok_or_else(|| malformed("transaction.message.accountKeys"))?
        .iter()
        .map(account_key)
        .collect::<Result<Vec<String>, LedgerError>>()?;
    for group in ["writable", "readonly"] {
        if let Some(loaded) = meta.get("loadedAddresses").and_then(|l| l.get(group)).and_then(Value::as_array) {
            for key in loaded {
                keys.push(account_key(key)?);
            }
        }
    }
    let pre = balances(meta, "preBalances")?;
    let post = balances(meta, "postBalances")?;
    if pre.len() != post.len() || pre.len() > keys.len() {
        return Err(LedgerError::MalformedResponse(format!(
            "{} account keys, {} pre-balances and {} post-balances do not line up",
            keys.len(),
            pre.len(),
            post.len()
        )));
    }
    let balance_changes = keys
        .into_iter()
        .zip(pre.into_iter().zip(post))
        .filter(|(_, (pre, post))| pre != post)
        .map(|(account, (pre, post))| BalanceChange::new(account, TokenAmount::from(post - pre)))
        .collect();
    let error = match meta.get("err") {
        None | Some(Value::Null) => None,
        Some(e) => Some(e.to_string()),
    };
    Ok(Some(LedgerTransaction { signature: signature.to_string(), error, balance_changes }))
}

fn malformed(field: &str) -> LedgerError {
    LedgerError::MalformedResponse(format!("The response has no '{field}' field"))
}

fn account_key(v: &Value) -> Result<String, LedgerError> {
    v.as_str()
        .or_else(|| v.get("pubkey").and_then(Value::as_str))
        .map(String::from)
        .ok_or_else(|| LedgerError::MalformedResponse(format!("'{v}' is not an account key")))
}

fn balances(meta: &Value, field: &str) -> Result<Vec<i64>, LedgerError> {
    meta.get(field)
        .and_then(Value::as_array)
        .ok_or_else(|| malformed(field))?
        .iter()
        .map(|v| {
            v.as_u64()
                .and_then(|b| i64::try_from(b).ok())
                .ok_or_else(|| LedgerError::MalformedResponse(format!("'{v}' is not a valid balance")))
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;

    fn response(err: Value) -> Value {
        json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": {
                "slot": 250_000_000,
                "blockTime": 1_729_000_000,
                "meta": {
                    "err": err,
                    "fee": 5000,
                    "preBalances": [3_000_000_000u64, 1_000_000_000u64, 1],
                    "postBalances": [1_499_995_000u64, 2_500_000_000u64, 1],
                },
                "transaction": {
                    "signatures": ["sig"],
                    "message": {
                        "accountKeys": ["Payer111", "Shop111", "11111111111111111111111111111111"]
                    }
                }
            }
        })
    }

    #[test]
    fn balance_changes_are_post_minus_pre() {
        let tx = parse_rpc_response("sig", &response(Value::Null)).unwrap().unwrap();
        assert_eq!(tx.signature, "sig");
        assert!(tx.error.is_none());
        assert_eq!(tx.balance_changes, vec![
            BalanceChange::new("Payer111", TokenAmount::from(-1_500_005_000)),
            BalanceChange::new("Shop111", TokenAmount::from(1_500_000_000)),
        ]);
    }

    #[test]
    fn execution_errors_are_reported() {
        let tx = parse_rpc_response("sig", &response(json!({"InstructionError": [0, "Custom"]}))).unwrap().unwrap();
        assert!(tx.error.unwrap().contains("InstructionError"));
    }

    #[test]
    fn unknown_transactions_are_none() {
        let r = json!({"jsonrpc": "2.0", "id": 1, "result": null});
        assert!(parse_rpc_response("sig", &r).unwrap().is_none());
    }

    #[test]
    fn rpc_errors_and_garbage() {
        let r = json!({"jsonrpc": "2.0", "id": 1, "error": {"code": -32602, "message": "Invalid param"}});
        assert!(matches!(parse_rpc_response("sig", &r), Err(LedgerError::NodeError(m)) if m == "Invalid param"));
        let r = json!({"jsonrpc": "2.0", "id": 1, "result": {"meta": {}}});
        assert!(matches!(parse_rpc_response("sig", &r), Err(LedgerError::MalformedResponse(_))));
    }

    #[test]
    fn loaded_addresses_extend_the_key_list() {
        let mut r = response(Value::Null);
        r["result"]["transaction"]["message"]["accountKeys"] = json!(["Payer111", "Program111"]);
        r["result"]["meta"]["loadedAddresses"] = json!({"writable": ["Shop111"], "readonly": []});
        r["result"]["meta"]["preBalances"] = json!([3_000_000_000u64, 1, 1_000_000_000u64]);
        r["result"]["meta"]["postBalances"] = json!([1_499_995_000u64, 1, 2_500_000_000u64]);
        let tx = parse_rpc_response("sig", &r).unwrap().unwrap();
        assert_eq!(tx.balance_changes[1], BalanceChange::new("Shop111", TokenAmount::from(1_500_000_000)));
    }
}
