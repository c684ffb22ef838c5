use crate::{Node, NodeHandle};
use minichain_core::block::Block;
use minichain_core::error::{LedgerError, Result};
use minichain_core::resolver::Resolution;
use minichain_core::transaction::Transaction;
use serde::Serialize;
use serde_json::{Value, json};
use std::net::SocketAddr;
use warp::Filter;
use warp::http::StatusCode;
use warp::reply::{Json, WithStatus, with_status};

/// Status and JSON body of a route, built without touching the socket.
pub type ApiReply = (StatusCode, Value);

const MAX_TX_BODY_BYTES: u64 = 64 * 1024;

fn into_reply((status, body): ApiReply) -> WithStatus<Json> {
    with_status(warp::reply::json(&body), status)
}

fn detail(status: StatusCode, reason: impl std::fmt::Display) -> ApiReply {
    (status, json!({ "detail": reason.to_string() }))
}

fn serialized<T: Serialize>(value: &T) -> ApiReply {
    match serde_json::to_value(value) {
        Ok(v) => (StatusCode::OK, v),
        Err(e) => detail(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

pub fn chain_reply(node: &Node) -> ApiReply {
    serialized(&node.chain())
}

pub fn headers_reply(node: &Node) -> ApiReply {
    serialized(&node.headers())
}

/// `POST /transactions`. Duplicates are acknowledged like fresh submissions.
pub fn submit_reply(node: &Node, body: Value) -> ApiReply {
    let tx: Transaction = match serde_json::from_value(body) {
        Ok(tx) => tx,
        Err(e) => {
            log::warn!("Malformed transaction body: {}", e);
            return detail(StatusCode::BAD_REQUEST, format!("malformed transaction: {}", e));
        }
    };

    match node.submit_transaction(tx) {
        Ok(_) => (StatusCode::OK, json!({ "status": "ok" })),
        Err(e) => {
            log::info!("Rejected transaction: {}", e);
            detail(StatusCode::BAD_REQUEST, e)
        }
    }
}

pub fn mine_reply(result: Result<Block>) -> ApiReply {
    match result {
        Ok(block) => (
            StatusCode::OK,
            json!({
                "index": block.header.index,
                "hash": block.header.hash,
                "transactions": block.transactions,
            }),
        ),
        Err(LedgerError::MiningCancelled) => detail(
            StatusCode::CONFLICT,
            "mining cancelled: chain tip changed during the search",
        ),
        Err(LedgerError::MiningInProgress) => {
            detail(StatusCode::CONFLICT, LedgerError::MiningInProgress)
        }
        Err(e) => {
            log::error!("Mining failed: {}", e);
            detail(StatusCode::INTERNAL_SERVER_ERROR, e)
        }
    }
}

pub fn resolve_reply(resolution: Resolution) -> ApiReply {
    (StatusCode::OK, resolution.to_json())
}

pub fn balance_reply(node: &Node, address: &str) -> ApiReply {
    (
        StatusCode::OK,
        json!({ "address": address, "balance": node.balance(address) }),
    )
}

pub fn balances_reply(node: &Node) -> ApiReply {
    serialized(&node.balances())
}

pub fn mempool_reply(node: &Node) -> ApiReply {
    serialized(&node.mempool())
}

pub fn health_reply(node: &Node) -> ApiReply {
    (
        StatusCode::OK,
        json!({
            "status": "ok",
            "length": node.chain_len(),
            "mining": node.is_mining(),
            "blocks_mined": node.blocks_mined(),
        }),
    )
}

pub fn routes(
    node: NodeHandle,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    let node_filter = warp::any().map(move || node.clone());

    // GET /chain
    let get_chain = warp::path!("chain")
        .and(warp::get())
        .and(node_filter.clone())
        .map(|node: NodeHandle| into_reply(chain_reply(&node)));

    // GET /chain/headers
    let get_headers = warp::path!("chain" / "headers")
        .and(warp::get())
        .and(node_filter.clone())
        .map(|node: NodeHandle| into_reply(headers_reply(&node)));

    // POST /transactions
    let post_tx = warp::path!("transactions")
        .and(warp::post())
        .and(warp::body::content_length_limit(MAX_TX_BODY_BYTES))
        .and(warp::body::json::<Value>())
        .and(node_filter.clone())
        .map(|body: Value, node: NodeHandle| into_reply(submit_reply(&node, body)));

    // POST /mine - CPU bound, kept off the runtime threads
    let post_mine = warp::path!("mine")
        .and(warp::post())
        .and(node_filter.clone())
        .and_then(|node: NodeHandle| async move {
            let reply = match tokio::task::spawn_blocking(move || node.mine()).await {
                Ok(result) => mine_reply(result),
                Err(e) => detail(StatusCode::INTERNAL_SERVER_ERROR, e),
            };
            Ok::<_, warp::Rejection>(into_reply(reply))
        });

    // POST /nodes/resolve - blocking peer I/O
    let post_resolve = warp::path!("nodes" / "resolve")
        .and(warp::post())
        .and(node_filter.clone())
        .and_then(|node: NodeHandle| async move {
            let reply = match tokio::task::spawn_blocking(move || node.resolve_with_http()).await {
                Ok(resolution) => resolve_reply(resolution),
                Err(e) => detail(StatusCode::INTERNAL_SERVER_ERROR, e),
            };
            Ok::<_, warp::Rejection>(into_reply(reply))
        });

    // GET /balance/{address}
    let get_balance = warp::path!("balance" / String)
        .and(warp::get())
        .and(node_filter.clone())
        .map(|address: String, node: NodeHandle| into_reply(balance_reply(&node, &address)));

    // GET /balances
    let get_balances = warp::path!("balances")
        .and(warp::get())
        .and(node_filter.clone())
        .map(|node: NodeHandle| into_reply(balances_reply(&node)));

    // GET /mempool
    let get_mempool = warp::path!("mempool")
        .and(warp::get())
        .and(node_filter.clone())
        .map(|node: NodeHandle| into_reply(mempool_reply(&node)));

    // GET /health
    let health_check = warp::path!("health")
        .and(warp::get())
        .and(node_filter)
        .map(|node: NodeHandle| into_reply(health_reply(&node)));

    get_chain
        .or(get_headers)
        .or(post_tx)
        .or(post_mine)
        .or(post_resolve)
        .or(get_balance)
        .or(get_balances)
        .or(get_mempool)
        .or(health_check)
        .with(warp::log("minichain::http"))
}

pub async fn run_server(node: NodeHandle, addr: SocketAddr) {
    log::info!("HTTP server running at http://{}", addr);
    warp::serve(routes(node)).run(addr).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{faucet, test_node};
    use minichain_core::config::BLOCK_REWARD;

    #[test]
    fn transactions_route_accepts_and_dedups() {
        let node = test_node(&[]);
        let body = serde_json::to_value(faucet("B", 10.0)).unwrap();

        let (status, reply) = submit_reply(&node, body.clone());
        assert_eq!(status, StatusCode::OK);
        assert_eq!(reply, json!({"status": "ok"}));

        let (status, _) = submit_reply(&node, body);
        assert_eq!(status, StatusCode::OK);
        assert_eq!(node.mempool().len(), 1);
    }

    #[test]
    fn transactions_route_maps_errors_to_400() {
        let node = test_node(&[]);

        let (status, reply) = submit_reply(
            &node,
            json!({"sender": "NETWORK", "receiver": "B", "amount": -1.0}),
        );
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(reply["detail"].as_str().unwrap().contains("positive"));

        let (status, reply) = submit_reply(&node, json!({"sender": "NETWORK"}));
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(reply["detail"].as_str().unwrap().starts_with("malformed transaction"));

        let (status, _) = submit_reply(
            &node,
            json!({"sender": "04ab", "receiver": "B", "amount": 1.0, "signature": "00"}),
        );
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(node.mempool().is_empty());
    }

    #[test]
    fn timestamp_is_optional_on_the_wire() {
        let node = test_node(&[]);
        let (status, _) = submit_reply(
            &node,
            json!({"sender": "NETWORK", "receiver": "B", "amount": 2.5, "signature": ""}),
        );
        assert_eq!(status, StatusCode::OK);
        assert_eq!(node.mempool()[0].timestamp, 0);
    }

    #[test]
    fn mine_and_read_back() {
        let node = test_node(&[]);
        submit_reply(&node, serde_json::to_value(faucet("B", 10.0)).unwrap());

        let (status, reply) = mine_reply(node.mine());
        assert_eq!(status, StatusCode::OK);
        assert_eq!(reply["index"], 1);
        assert_eq!(reply["transactions"].as_array().unwrap().len(), 2);

        let (_, chain) = chain_reply(&node);
        assert_eq!(chain.as_array().unwrap().len(), 2);
        assert_eq!(chain[1]["header"]["hash"], reply["hash"]);

        let (_, headers) = headers_reply(&node);
        assert_eq!(headers[1]["previous_hash"], chain[0]["header"]["hash"]);
        assert!(headers[1].get("merkle_root").is_none());

        let (_, balance) = balance_reply(&node, "B");
        assert_eq!(balance, json!({"address": "B", "balance": 10.0}));
        let (_, balances) = balances_reply(&node);
        assert_eq!(balances["miner"], BLOCK_REWARD);

        let (_, pending) = mempool_reply(&node);
        assert_eq!(pending, json!([]));

        let (_, health) = health_reply(&node);
        assert_eq!(health["length"], 2);
    }

    #[test]
    fn cancelled_mining_is_a_conflict() {
        let (status, reply) = mine_reply(Err(LedgerError::MiningCancelled));
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(reply["detail"].is_string());

        let (status, reply) = mine_reply(Err(LedgerError::MiningInProgress));
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(reply["detail"], "a mining round is already running");
    }

    #[test]
    fn resolve_reply_shapes() {
        assert_eq!(
            resolve_reply(Resolution::Replaced { new_length: 3 }).1,
            json!({"replaced": true, "new_length": 3})
        );
        assert_eq!(
            resolve_reply(Resolution::Unchanged { length: 2 }).1,
            json!({"replaced": false, "length": 2})
        );
    }
}
