//! HTTP RPC server
//!
//! JSON endpoints over hyper backing the CLI and the transaction
//! generator. Every response is wrapped in `{result}` or `{error}`;
//! failures use HTTP 400.

use crate::codec::tx::tx_hash;
use crate::node::Node;
use crate::types::Hash;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

/// Maximum accepted request body (1 MiB).
const MAX_REQUEST_SIZE: usize = 1_048_576;

/// Bind and serve until the listener fails.
pub async fn serve(node: Arc<Node>, addr: SocketAddr) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "rpc listening");

    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                debug!(%peer, "rpc connection");
                let node = Arc::clone(&node);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);
                    let service = service_fn(move |req| {
                        let node = Arc::clone(&node);
                        async move { handle_request(node, req).await }
                    });
                    if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                        debug!(%peer, "rpc connection error: {}", e);
                    }
                });
            }
            Err(e) => error!("rpc accept failed: {}", e),
        }
    }
}

async fn handle_request(
    node: Arc<Node>,
    req: Request<Incoming>,
) -> std::result::Result<Response<Full<Bytes>>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let query = req.uri().query().unwrap_or("").to_string();

    let body = req.collect().await?.to_bytes();
    if body.len() > MAX_REQUEST_SIZE {
        return Ok(error_response("request body too large"));
    }

    let get = method == Method::GET;
    let post = method == Method::POST;

    let response = match path.as_str() {
        "/getnewaddress" if get || post => Ok(json!({ "address": node.get_new_address() })),
        "/getbalance" if get => Ok(json!({ "balance": node.get_balance() })),
        "/sendtoaddress" if post => send_to_address(&node, &body),
        "/getblockcount" if get => node
            .get_block_count()
            .map(|height| json!({ "height": height }))
            .map_err(|e| e.to_string()),
        "/getblock" if get => get_block(&node, &query),
        "/gettransaction" if get => get_transaction(&node, &query),
        "/listaddresses" if get => Ok(json!({ "addresses": node.list_addresses() })),
        _ => Err(format!("unknown endpoint: {} {}", method, path)),
    };

    Ok(match response {
        Ok(result) => json_response(StatusCode::OK, &json!({ "result": result })),
        Err(message) => error_response(&message),
    })
}

fn send_to_address(node: &Node, body: &[u8]) -> std::result::Result<Value, String> {
    #[derive(serde::Deserialize)]
    struct SendRequest {
        address: String,
        amount: i64,
    }

    let request: SendRequest =
        serde_json::from_slice(body).map_err(|e| format!("invalid request: {}", e))?;

    node.send_to_address(&request.address, request.amount)
        .map(|txid| json!({ "txhash": txid.to_hex() }))
        .map_err(|e| format!("failed to create transaction: {}", e))
}

fn get_block(node: &Node, query: &str) -> std::result::Result<Value, String> {
    let height: u64 = query_param(query, "height")
        .ok_or("missing height parameter")?
        .parse()
        .map_err(|e| format!("invalid height: {}", e))?;

    let (hash, block) = node
        .get_block_by_height(height)
        .map_err(|e| e.to_string())?
        .ok_or_else(|| format!("no block at height {}", height))?;

    let tx_hashes: Vec<String> = block
        .transactions
        .iter()
        .map(|tx| tx_hash(tx).to_hex())
        .collect();

    Ok(json!({
        "hash": hash.to_hex(),
        "height": height,
        "version": block.header.version,
        "prev_hash": block.header.prev.to_hex(),
        "merkle_root": block.header.merkle_root.to_hex(),
        "timestamp": block.header.timestamp,
        "bits": block.header.bits,
        "nonce": block.header.nonce,
        "transactions": tx_hashes,
    }))
}

fn get_transaction(node: &Node, query: &str) -> std::result::Result<Value, String> {
    let txid_hex = query_param(query, "txhash").ok_or("missing txhash parameter")?;
    let txid = Hash::from_hex(&txid_hex).ok_or_else(|| format!("invalid txhash: {}", txid_hex))?;

    let tx = node
        .get_transaction(&txid)
        .map_err(|e| e.to_string())?
        .ok_or("transaction not found")?;

    let inputs: Vec<Value> = tx
        .inputs
        .iter()
        .map(|input| {
            json!({
                "prev_txhash": input.prev.tx_hash.to_hex(),
                "output_index": input.prev.index,
                "script_sig": hex::encode(&input.sig_script),
                "sequence": input.sequence,
            })
        })
        .collect();
    let outputs: Vec<Value> = tx
        .outputs
        .iter()
        .map(|output| {
            json!({
                "value": output.value,
                "script_pubkey": hex::encode(&output.pub_key_script),
            })
        })
        .collect();

    Ok(json!({
        "txhash": txid.to_hex(),
        "version": tx.version,
        "inputs": inputs,
        "outputs": outputs,
        "locktime": tx.lock_time,
    }))
}

fn query_param(query: &str, name: &str) -> Option<String> {
    query.split('&').find_map(|pair| {
        let mut parts = pair.splitn(2, '=');
        if parts.next() == Some(name) {
            parts.next().map(String::from)
        } else {
            None
        }
    })
}

fn json_response(status: StatusCode, body: &Value) -> Response<Full<Bytes>> {
    let serialized = serde_json::to_string(body).unwrap_or_else(|_| "{}".to_string());
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(serialized)))
        .expect("static response")
}

fn error_response(message: &str) -> Response<Full<Bytes>> {
    json_response(StatusCode::BAD_REQUEST, &json!({ "error": message }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_param_parsing() {
        assert_eq!(query_param("height=5", "height").as_deref(), Some("5"));
        assert_eq!(
            query_param("a=1&height=42&b=2", "height").as_deref(),
            Some("42")
        );
        assert_eq!(query_param("heights=5", "height"), None);
        assert_eq!(query_param("", "height"), None);
    }
}
