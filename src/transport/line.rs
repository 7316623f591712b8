// src/transport/line.rs - Wire Protocol
//! Request parsing and reply rendering for the line protocol
//!
//! Each request is one line of whitespace-separated tokens; each reply is one
//! line terminated by `\n`. Prices render with two decimals.
//!
//! | Command              | Tokens                                              |
//! |----------------------|-----------------------------------------------------|
//! | `LOGIN`              | `client_id`                                         |
//! | `LOGOUT`             | (none)                                              |
//! | `ORDER`              | `symbol type side price qty client_id`              |
//! | `STOP_LIMIT_ORDER`   | `symbol side stop_price limit_price qty client_id`  |
//! | `TRAILING_STOP_ORDER`| `symbol side trailing_amount qty client_id`         |
//! | `VWAP_ORDER`         | `symbol side target_vwap qty duration_min client_id`|
//! | `VWAP_STATUS`        | `symbol client_id`                                  |
//! | `CANCEL`             | `order_id client_id`                                |
//! | `BOOK`               | `symbol`                                            |

use std::fmt::{self, Display};
use std::str::FromStr;

use crate::core::{
    order::OrderSide,
    types::{BookSnapshot, OrderId, Price, Quantity, VwapOrderSnapshot},
};

/// Order type token accepted by the ORDER command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderTypeToken {
    /// Immediate execution at best prices
    Market,
    /// Resting limit order
    Limit,
    /// Stop that converts to a market order
    StopLoss,
    /// Stop that converts to a limit order
    StopLimit,
    /// Stop that trails the market
    TrailingStop,
}

impl FromStr for OrderTypeToken {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MARKET" => Ok(Self::Market),
            "LIMIT" => Ok(Self::Limit),
            "STOP_LOSS" => Ok(Self::StopLoss),
            "STOP_LIMIT" => Ok(Self::StopLimit),
            "TRAILING_STOP" => Ok(Self::TrailingStop),
            _ => Err(ParseError::Malformed(format!("Invalid order type: {}", s))),
        }
    }
}

/// A parsed client request
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    /// Bind this session to a client id
    Login {
        /// Requested client id; empty when the token was missing
        client_id: String,
    },
    /// Clear the session binding
    Logout,
    /// Submit a market, limit, or single-level conditional order
    Order {
        symbol: String,
        order_type: OrderTypeToken,
        side: OrderSide,
        price: Price,
        quantity: Quantity,
        client_id: String,
    },
    /// Submit a stop-limit order
    StopLimitOrder {
        symbol: String,
        side: OrderSide,
        stop_price: Price,
        limit_price: Price,
        quantity: Quantity,
        client_id: String,
    },
    /// Submit a trailing stop order
    TrailingStopOrder {
        symbol: String,
        side: OrderSide,
        trailing_amount: Price,
        quantity: Quantity,
        client_id: String,
    },
    /// Submit a VWAP parent order
    VwapOrder {
        symbol: String,
        side: OrderSide,
        target_vwap: Price,
        quantity: Quantity,
        duration_minutes: u64,
        client_id: String,
    },
    /// List the caller's active VWAP parents on a symbol
    VwapStatus { symbol: String, client_id: String },
    /// Cancel an order by id
    Cancel { order_id: OrderId, client_id: String },
    /// Top-of-book query
    Book { symbol: String },
}

/// Parse failure
#[derive(Debug, Clone, PartialEq)]
pub enum ParseError {
    /// First token is not a known command
    UnknownCommand,
    /// Known command with missing or invalid arguments
    Malformed(String),
}

/// Parse one request line
pub fn parse(line: &str) -> Result<Request, ParseError> {
    let mut tokens = line.split_whitespace();
    let command = tokens.next().ok_or(ParseError::UnknownCommand)?;

    match command {
        "LOGIN" => Ok(Request::Login {
            client_id: tokens.next().unwrap_or_default().to_string(),
        }),
        "LOGOUT" => Ok(Request::Logout),
        "ORDER" => {
            let symbol = next_token(&mut tokens, "symbol")?;
            let order_type: OrderTypeToken = next_token(&mut tokens, "type")?.parse()?;
            let side = parse_side(&mut tokens)?;
            let price = parse_number(&mut tokens, "price")?;
            let quantity = parse_number(&mut tokens, "quantity")?;
            let client_id = next_token(&mut tokens, "client ID")?;
            Ok(Request::Order {
                symbol,
                order_type,
                side,
                price,
                quantity,
                client_id,
            })
        }
        "STOP_LIMIT_ORDER" => {
            let symbol = next_token(&mut tokens, "symbol")?;
            let side = parse_side(&mut tokens)?;
            let stop_price = parse_number(&mut tokens, "stop price")?;
            let limit_price = parse_number(&mut tokens, "limit price")?;
            let quantity = parse_number(&mut tokens, "quantity")?;
            let client_id = next_token(&mut tokens, "client ID")?;
            Ok(Request::StopLimitOrder {
                symbol,
                side,
                stop_price,
                limit_price,
                quantity,
                client_id,
            })
        }
        "TRAILING_STOP_ORDER" => {
            let symbol = next_token(&mut tokens, "symbol")?;
            let side = parse_side(&mut tokens)?;
            let trailing_amount = parse_number(&mut tokens, "trailing amount")?;
            let quantity = parse_number(&mut tokens, "quantity")?;
            let client_id = next_token(&mut tokens, "client ID")?;
            Ok(Request::TrailingStopOrder {
                symbol,
                side,
                trailing_amount,
                quantity,
                client_id,
            })
        }
        "VWAP_ORDER" => {
            let symbol = next_token(&mut tokens, "symbol")?;
            let side = parse_side(&mut tokens)?;
            let target_vwap = parse_number(&mut tokens, "target VWAP")?;
            let quantity = parse_number(&mut tokens, "quantity")?;
            let duration_minutes = next_token(&mut tokens, "duration")?
                .parse::<u64>()
                .map_err(|_| ParseError::Malformed("Invalid duration".to_string()))?;
            let client_id = next_token(&mut tokens, "client ID")?;
            Ok(Request::VwapOrder {
                symbol,
                side,
                target_vwap,
                quantity,
                duration_minutes,
                client_id,
            })
        }
        "VWAP_STATUS" => {
            let symbol = next_token(&mut tokens, "symbol")?;
            let client_id = next_token(&mut tokens, "client ID")?;
            Ok(Request::VwapStatus { symbol, client_id })
        }
        "CANCEL" => {
            let order_id = next_token(&mut tokens, "order ID")?
                .parse::<OrderId>()
                .map_err(|_| ParseError::Malformed("Invalid order ID".to_string()))?;
            let client_id = next_token(&mut tokens, "client ID")?;
            Ok(Request::Cancel {
                order_id,
                client_id,
            })
        }
        "BOOK" => Ok(Request::Book {
            symbol: next_token(&mut tokens, "symbol")?,
        }),
        _ => Err(ParseError::UnknownCommand),
    }
}

fn next_token<'a>(
    tokens: &mut impl Iterator<Item = &'a str>,
    what: &str,
) -> Result<String, ParseError> {
    tokens
        .next()
        .map(str::to_string)
        .ok_or_else(|| ParseError::Malformed(format!("Missing {}", what)))
}

fn parse_side<'a>(tokens: &mut impl Iterator<Item = &'a str>) -> Result<OrderSide, ParseError> {
    let token = next_token(tokens, "side")?;
    token
        .parse::<OrderSide>()
        .map_err(|_| ParseError::Malformed(format!("Invalid order side: {}", token)))
}

fn parse_number<'a>(
    tokens: &mut impl Iterator<Item = &'a str>,
    what: &str,
) -> Result<f64, ParseError> {
    let token = next_token(tokens, what)?;
    token
        .parse::<f64>()
        .map_err(|_| ParseError::Malformed(format!("Invalid {}: {}", what, token)))
}

/// A reply line, rendered by `Display` without the trailing newline
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    LoginSuccess(String),
    LoginFailed(String),
    LogoutSuccess,
    LogoutFailed(String),
    /// Assigned order id; 0 reports a rejected submission
    OrderId(OrderId),
    VwapOrderId(OrderId),
    VwapOrderFailed(String),
    /// Active VWAP parents; empty means none
    VwapStatus(Vec<VwapOrderSnapshot>),
    Cancelled,
    CancelFailed,
    Book(BookSnapshot),
    BookNotFound,
    Error(String),
    UnknownCommand,
}

impl Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LoginSuccess(client_id) => write!(f, "LOGIN_SUCCESS:{}", client_id),
            Self::LoginFailed(reason) => write!(f, "LOGIN_FAILED:{}", reason),
            Self::LogoutSuccess => write!(f, "LOGOUT_SUCCESS"),
            Self::LogoutFailed(reason) => write!(f, "LOGOUT_FAILED:{}", reason),
            Self::OrderId(order_id) => write!(f, "ORDER_ID:{}", order_id),
            Self::VwapOrderId(order_id) => write!(f, "VWAP_ORDER_ID:{}", order_id),
            Self::VwapOrderFailed(reason) => write!(f, "VWAP_ORDER_FAILED:{}", reason),
            Self::VwapStatus(orders) if orders.is_empty() => {
                write!(f, "VWAP_STATUS:NO_ACTIVE_VWAP_ORDERS")
            }
            Self::VwapStatus(orders) => {
                write!(f, "VWAP_STATUS:")?;
                for (index, order) in orders.iter().enumerate() {
                    if index > 0 {
                        write!(f, "|")?;
                    }
                    write!(
                        f,
                        "ID:{} SIDE:{} TARGET:{:.2} PROGRESS:{:.2}/{:.2} STATUS:{}",
                        order.id,
                        order.side,
                        order.target_vwap,
                        order.filled_quantity,
                        order.quantity,
                        order.status.wire_code()
                    )?;
                }
                Ok(())
            }
            Self::Cancelled => write!(f, "CANCELLED"),
            Self::CancelFailed => write!(f, "CANCEL_FAILED"),
            Self::Book(snapshot) => write!(
                f,
                "BID:{:.2} ASK:{:.2} LAST:{:.2}",
                snapshot.best_bid, snapshot.best_ask, snapshot.last_price
            ),
            Self::BookNotFound => write!(f, "BOOK_NOT_FOUND"),
            Self::Error(reason) => write!(f, "ERROR:{}", reason),
            Self::UnknownCommand => write!(f, "UNKNOWN_COMMAND"),
        }
    }
}

impl Reply {
    /// The reply as a wire line including the terminator
    pub fn to_line(&self) -> String {
        format!("{}\n", self)
    }
}
