// src/transport/server.rs - TCP Session Server
//! TCP listener and per-connection session handling
//!
//! One task per accepted connection reads request lines and writes reply
//! lines. A session must LOGIN before submitting, cancelling, or querying
//! VWAP status, and every such command must carry the logged-in client id.
//! Disconnecting tears down the session only; live orders stay on the books.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::{
    net::SocketAddr,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    constants::REJECTED_ORDER_ID,
    core::{order::OrderKind, types::ClientId},
    engine::MatchingEngine,
    transport::line::{self, OrderTypeToken, ParseError, Reply, Request},
    ServerConfig, VenueError,
};

/// Registry entry for a live connection
#[derive(Debug, Clone)]
struct SessionInfo {
    client_id: Option<ClientId>,
    addr: SocketAddr,
    connected_at: DateTime<Utc>,
}

/// Per-connection session state
struct Session {
    id: Uuid,
    client_id: Option<ClientId>,
}

/// TCP front end for the matching engine
pub struct TradingServer {
    engine: MatchingEngine,
    config: ServerConfig,
    sessions: Arc<DashMap<Uuid, SessionInfo>>,
}

impl TradingServer {
    /// Create a server serving `engine` with the given listener settings
    pub fn new(engine: MatchingEngine, config: ServerConfig) -> Self {
        Self {
            engine,
            config,
            sessions: Arc::new(DashMap::new()),
        }
    }

    /// Bind the configured address and serve until the task is cancelled
    pub async fn run(self) -> Result<()> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind {}", addr))?;
        info!(%addr, "trading server listening");
        self.serve(listener).await
    }

    /// Serve connections from an already-bound listener
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        let max_duration = self.engine.config().max_vwap_duration_minutes;
        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(err) => {
                    error!(error = %err, "accept failed");
                    continue;
                }
            };

            if self.sessions.len() >= self.config.max_connections {
                warn!(%peer, "connection limit reached; refusing client");
                drop(stream);
                continue;
            }

            let engine = self.engine.clone();
            let sessions = Arc::clone(&self.sessions);
            tokio::spawn(async move {
                handle_connection(engine, sessions, stream, peer, max_duration).await;
            });
        }
    }

    /// Number of live sessions
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

async fn handle_connection(
    engine: MatchingEngine,
    sessions: Arc<DashMap<Uuid, SessionInfo>>,
    stream: TcpStream,
    peer: SocketAddr,
    max_duration: u64,
) {
    let session_id = Uuid::new_v4();
    sessions.insert(
        session_id,
        SessionInfo {
            client_id: None,
            addr: peer,
            connected_at: Utc::now(),
        },
    );
    info!(%session_id, %peer, "client connected");

    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();
    let mut session = Session {
        id: session_id,
        client_id: None,
    };

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) => {
                debug!(%session_id, error = %err, "read failed");
                break;
            }
        };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let reply = handle_line(&engine, &mut session, trimmed, max_duration);
        if let Some(mut info) = sessions.get_mut(&session_id) {
            info.client_id = session.client_id.clone();
        }
        if let Err(err) = writer.write_all(reply.to_line().as_bytes()).await {
            debug!(%session_id, error = %err, "write failed");
            break;
        }
    }

    if let Some((_, info)) = sessions.remove(&session_id) {
        info!(
            %session_id,
            peer = %info.addr,
            client_id = ?info.client_id,
            connected_at = %info.connected_at,
            "client disconnected; live orders remain on the books"
        );
    }
}

/// Parse one request line and dispatch it against the engine
fn handle_line(
    engine: &MatchingEngine,
    session: &mut Session,
    line: &str,
    max_duration: u64,
) -> Reply {
    match line::parse(line) {
        Err(ParseError::UnknownCommand) => Reply::UnknownCommand,
        Err(ParseError::Malformed(reason)) => Reply::Error(reason),
        Ok(request) => dispatch(engine, session, request, max_duration),
    }
}

fn dispatch(
    engine: &MatchingEngine,
    session: &mut Session,
    request: Request,
    max_duration: u64,
) -> Reply {
    match request {
        Request::Login { client_id } => {
            if client_id.is_empty() {
                return Reply::LoginFailed("MISSING_CLIENT_ID".to_string());
            }
            if session.client_id.is_some() {
                return Reply::LoginFailed("ALREADY_LOGGED_IN".to_string());
            }
            info!(session_id = %session.id, client_id, "client logged in");
            session.client_id = Some(client_id.clone());
            Reply::LoginSuccess(client_id)
        }
        Request::Logout => {
            if session.client_id.take().is_none() {
                return Reply::LogoutFailed("NOT_LOGGED_IN".to_string());
            }
            info!(session_id = %session.id, "client logged out");
            Reply::LogoutSuccess
        }
        Request::Order {
            symbol,
            order_type,
            side,
            price,
            quantity,
            client_id,
        } => {
            if let Some(denied) = authorize(session, &client_id) {
                return denied;
            }
            let kind = match order_type {
                OrderTypeToken::Market => OrderKind::Market,
                OrderTypeToken::Limit => OrderKind::Limit { price },
                OrderTypeToken::StopLoss => OrderKind::StopLoss { stop_price: price },
                OrderTypeToken::StopLimit => OrderKind::StopLimit {
                    stop_price: price,
                    limit_price: price,
                },
                OrderTypeToken::TrailingStop => OrderKind::trailing_stop(side, price),
            };
            match engine.submit_order(&symbol, kind, side, quantity, &client_id) {
                Ok(order_id) => Reply::OrderId(order_id),
                Err(_) => Reply::OrderId(REJECTED_ORDER_ID),
            }
        }
        Request::StopLimitOrder {
            symbol,
            side,
            stop_price,
            limit_price,
            quantity,
            client_id,
        } => {
            if let Some(denied) = authorize(session, &client_id) {
                return denied;
            }
            match engine.submit_stop_limit_order(
                &symbol,
                side,
                stop_price,
                limit_price,
                quantity,
                &client_id,
            ) {
                Ok(order_id) => Reply::OrderId(order_id),
                Err(_) => Reply::OrderId(REJECTED_ORDER_ID),
            }
        }
        Request::TrailingStopOrder {
            symbol,
            side,
            trailing_amount,
            quantity,
            client_id,
        } => {
            if let Some(denied) = authorize(session, &client_id) {
                return denied;
            }
            match engine.submit_trailing_stop_order(
                &symbol,
                side,
                trailing_amount,
                quantity,
                &client_id,
            ) {
                Ok(order_id) => Reply::OrderId(order_id),
                Err(_) => Reply::OrderId(REJECTED_ORDER_ID),
            }
        }
        Request::VwapOrder {
            symbol,
            side,
            target_vwap,
            quantity,
            duration_minutes,
            client_id,
        } => {
            if let Some(denied) = authorize(session, &client_id) {
                return denied;
            }
            if duration_minutes == 0 || duration_minutes > max_duration {
                return Reply::VwapOrderFailed("INVALID_DURATION".to_string());
            }
            let start_time = Instant::now();
            let end_time = start_time + Duration::from_secs(duration_minutes * 60);
            match engine.submit_vwap_order(
                &symbol,
                side,
                target_vwap,
                quantity,
                start_time,
                end_time,
                &client_id,
            ) {
                Ok(order_id) => Reply::VwapOrderId(order_id),
                Err(err) => Reply::VwapOrderFailed(failure_reason(err)),
            }
        }
        Request::VwapStatus { symbol, client_id } => {
            if let Some(denied) = authorize(session, &client_id) {
                return denied;
            }
            Reply::VwapStatus(engine.active_vwap_orders(&symbol, &client_id))
        }
        Request::Cancel {
            order_id,
            client_id,
        } => {
            if let Some(denied) = authorize(session, &client_id) {
                return denied;
            }
            if engine.cancel_order(order_id, &client_id) {
                Reply::Cancelled
            } else {
                Reply::CancelFailed
            }
        }
        Request::Book { symbol } => match engine.book_snapshot(&symbol) {
            Some(snapshot) => Reply::Book(snapshot),
            None => Reply::BookNotFound,
        },
    }
}

/// Reject commands from sessions that are not logged in as `client_id`
fn authorize(session: &Session, client_id: &str) -> Option<Reply> {
    match &session.client_id {
        None => Some(Reply::Error("Not logged in".to_string())),
        Some(bound) if bound != client_id => {
            Some(Reply::Error("Client ID mismatch".to_string()))
        }
        _ => None,
    }
}

fn failure_reason(err: VenueError) -> String {
    match err {
        VenueError::Validation(reason) => reason,
        other => other.to_string(),
    }
}
