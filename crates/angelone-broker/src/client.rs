use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Asia::Kolkata;
use reqwest::{header, Client};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::RwLock;

use agent_core::{AgentError, Bar, Broker, Exchange, Holding, OrderRequest, QuoteTick};

use crate::models::*;
use crate::totp::generate_totp;

const DEFAULT_BASE_URL: &str = "https://apiconnect.angelone.in";

/// Error codes the API returns once the 8-hour session has lapsed.
const SESSION_EXPIRED_CODES: &[&str] = &["AG8001", "AG8002", "AB8050", "AB8051"];

#[derive(Debug, Clone)]
pub struct Credentials {
    pub client_id: String,
    pub pin: String,
    pub api_key: String,
    pub totp_seed: String,
}

impl Credentials {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            client_id: std::env::var("ANGELONE_CLIENT_ID")
                .map_err(|_| anyhow!("ANGELONE_CLIENT_ID not set"))?,
            pin: std::env::var("ANGELONE_PIN").map_err(|_| anyhow!("ANGELONE_PIN not set"))?,
            api_key: std::env::var("ANGELONE_API_KEY")
                .map_err(|_| anyhow!("ANGELONE_API_KEY not set"))?,
            totp_seed: std::env::var("ANGELONE_TOTP_SEED")
                .map_err(|_| anyhow!("ANGELONE_TOTP_SEED not set"))?,
        })
    }
}

pub struct AngelOneClient {
    client: Client,
    base_url: String,
    credentials: Credentials,
    session: RwLock<Option<SessionData>>,
}

impl AngelOneClient {
    pub fn new(credentials: Credentials) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(15)).build()?;
        Ok(Self {
            client,
            base_url: std::env::var("ANGELONE_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_BASE_URL.to_string()),
            credentials,
            session: RwLock::new(None),
        })
    }

    /// Log in with client id, PIN and a fresh TOTP. Returns session tokens and
    /// caches them for subsequent calls; sessions expire after 8 hours.
    pub async fn login(&self) -> Result<()> {
        let totp = generate_totp(
            &self.credentials.totp_seed,
            Utc::now().timestamp().max(0) as u64,
        )?;
        let body = LoginRequest {
            clientcode: self.credentials.client_id.clone(),
            password: self.credentials.pin.clone(),
            totp,
        };

        let url = format!(
            "{}/rest/auth/angelbroking/user/v1/loginByPassword",
            self.base_url
        );
        let response = self
            .client
            .post(&url)
            .headers(self.common_headers(None))
            .json(&body)
            .send()
            .await
            .context("broker login request failed")?;

        let envelope: ApiEnvelope<SessionData> =
            response.json().await.context("broker login response")?;
        if !envelope.status {
            return Err(anyhow!(
                "broker login rejected: {} ({})",
                envelope.message,
                envelope.errorcode
            ));
        }
        let session = envelope
            .data
            .ok_or_else(|| anyhow!("broker login returned no session data"))?;

        *self.session.write().await = Some(session);
        tracing::info!("Broker session established");
        Ok(())
    }

    fn common_headers(&self, jwt: Option<&str>) -> header::HeaderMap {
        let mut headers = header::HeaderMap::new();
        headers.insert(header::ACCEPT, header::HeaderValue::from_static("application/json"));
        headers.insert("X-UserType", header::HeaderValue::from_static("USER"));
        headers.insert("X-SourceID", header::HeaderValue::from_static("WEB"));
        headers.insert(
            "X-ClientLocalIP",
            header::HeaderValue::from_static("127.0.0.1"),
        );
        headers.insert(
            "X-ClientPublicIP",
            header::HeaderValue::from_static("127.0.0.1"),
        );
        headers.insert(
            "X-MACAddress",
            header::HeaderValue::from_static("00:00:00:00:00:00"),
        );
        if let Ok(value) = header::HeaderValue::from_str(&self.credentials.api_key) {
            headers.insert("X-PrivateKey", value);
        }
        if let Some(jwt) = jwt {
            if let Ok(value) = header::HeaderValue::from_str(&format!("Bearer {jwt}")) {
                headers.insert(header::AUTHORIZATION, value);
            }
        }
        headers
    }

    async fn current_jwt(&self) -> Result<String> {
        if self.session.read().await.is_none() {
            self.login().await?;
        }
        self.session
            .read()
            .await
            .as_ref()
            .map(|s| s.jwt_token.clone())
            .ok_or_else(|| anyhow!("no broker session"))
    }

    /// Authenticated POST with one inline re-login retry on session expiry.
    async fn post_authed<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        match self.post_once(path, body).await {
            Err(e) if is_session_expired(&e) => {
                tracing::warn!("Broker session expired, re-logging in");
                self.login().await?;
                self.post_once(path, body).await
            }
            other => other,
        }
    }

    /// Authenticated GET with the same re-login retry.
    async fn get_authed<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        match self.get_once(path).await {
            Err(e) if is_session_expired(&e) => {
                tracing::warn!("Broker session expired, re-logging in");
                self.login().await?;
                self.get_once(path).await
            }
            other => other,
        }
    }

    async fn get_once<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let jwt = self.current_jwt().await?;
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .headers(self.common_headers(Some(&jwt)))
            .send()
            .await
            .with_context(|| format!("broker call {path}"))?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(AgentError::SessionExpired.into());
        }

        let envelope: ApiEnvelope<T> = response
            .json()
            .await
            .with_context(|| format!("broker response for {path}"))?;
        if !envelope.status {
            if SESSION_EXPIRED_CODES.contains(&envelope.errorcode.as_str()) {
                return Err(AgentError::SessionExpired.into());
            }
            return Err(anyhow!(
                "broker error on {path}: {} ({})",
                envelope.message,
                envelope.errorcode
            ));
        }
        envelope
            .data
            .ok_or_else(|| anyhow!("broker returned empty data for {path}"))
    }

    async fn post_once<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let jwt = self.current_jwt().await?;
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .headers(self.common_headers(Some(&jwt)))
            .json(body)
            .send()
            .await
            .with_context(|| format!("broker call {path}"))?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(AgentError::SessionExpired.into());
        }

        let envelope: ApiEnvelope<T> = response
            .json()
            .await
            .with_context(|| format!("broker response for {path}"))?;
        if !envelope.status {
            if SESSION_EXPIRED_CODES.contains(&envelope.errorcode.as_str()) {
                return Err(AgentError::SessionExpired.into());
            }
            return Err(anyhow!(
                "broker error on {path}: {} ({})",
                envelope.message,
                envelope.errorcode
            ));
        }
        envelope
            .data
            .ok_or_else(|| anyhow!("broker returned empty data for {path}"))
    }

    fn trading_symbol(exchange: Exchange, symbol: &str) -> String {
        match exchange {
            Exchange::Nse => format!("{symbol}-EQ"),
            Exchange::Bse => symbol.to_string(),
        }
    }
}

fn is_session_expired(error: &anyhow::Error) -> bool {
    matches!(
        error.downcast_ref::<AgentError>(),
        Some(AgentError::SessionExpired)
    )
}

#[async_trait]
impl Broker for AngelOneClient {
    async fn quotes(&self, exchange: Exchange, tokens: &[String]) -> Result<Vec<QuoteTick>> {
        if tokens.is_empty() {
            return Ok(Vec::new());
        }
        if tokens.len() > 250 {
            return Err(anyhow!("quote batch limited to 250 tokens, got {}", tokens.len()));
        }

        let body = QuoteRequest {
            mode: "FULL",
            exchange_tokens: serde_json::json!({ exchange.as_str(): tokens }),
        };
        let data: QuoteData = self
            .post_authed("/rest/secure/angelbroking/market/v1/quote/", &body)
            .await?;

        if !data.unfetched.is_empty() {
            tracing::debug!("{} tokens unfetched in quote batch", data.unfetched.len());
        }

        Ok(data
            .fetched
            .into_iter()
            .map(|q| QuoteTick {
                token: q.symbol_token,
                last_price: q.ltp,
                traded_value: q.total_traded_value,
            })
            .collect())
    }

    async fn daily_history(
        &self,
        exchange: Exchange,
        token: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Bar>> {
        let body = CandleRequest {
            exchange: exchange.as_str().to_string(),
            symboltoken: token.to_string(),
            interval: "ONE_DAY",
            fromdate: from.with_timezone(&Kolkata).format("%Y-%m-%d %H:%M").to_string(),
            todate: to.with_timezone(&Kolkata).format("%Y-%m-%d %H:%M").to_string(),
        };

        let rows: Vec<Vec<serde_json::Value>> = self
            .post_authed("/rest/secure/angelbroking/historical/v1/getCandleData", &body)
            .await?;

        let mut bars = Vec::with_capacity(rows.len());
        for row in rows {
            if row.len() < 6 {
                continue;
            }
            let timestamp = row[0]
                .as_str()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&Utc));
            let Some(timestamp) = timestamp else { continue };
            bars.push(Bar {
                timestamp,
                open: row[1].as_f64().unwrap_or(0.0),
                high: row[2].as_f64().unwrap_or(0.0),
                low: row[3].as_f64().unwrap_or(0.0),
                close: row[4].as_f64().unwrap_or(0.0),
                volume: row[5].as_f64().unwrap_or(0.0),
            });
        }
        bars.sort_by_key(|b| b.timestamp);
        Ok(bars)
    }

    async fn ltp(&self, exchange: Exchange, symbol: &str, token: &str) -> Result<f64> {
        let body = LtpRequest {
            exchange: exchange.as_str().to_string(),
            tradingsymbol: Self::trading_symbol(exchange, symbol),
            symboltoken: token.to_string(),
        };
        let data: LtpData = self
            .post_authed("/rest/secure/angelbroking/order/v1/getLtpData", &body)
            .await?;
        Ok(data.ltp)
    }

    async fn place_order(&self, order: &OrderRequest) -> Result<String> {
        let body = PlaceOrderRequest {
            variety: "NORMAL",
            tradingsymbol: Self::trading_symbol(order.exchange, &order.symbol),
            symboltoken: order.token.clone(),
            transactiontype: order.side.as_str().to_string(),
            exchange: order.exchange.as_str().to_string(),
            ordertype: order.order_type.as_str().to_string(),
            producttype: order.product.as_str().to_string(),
            duration: "DAY",
            price: format!("{:.2}", order.price),
            quantity: order.quantity.to_string(),
        };

        tracing::info!(
            "Placing {} {} x{} @ {:.2} on {}",
            order.side,
            order.symbol,
            order.quantity,
            order.price,
            order.exchange
        );

        let data: PlaceOrderData = self
            .post_authed("/rest/secure/angelbroking/order/v1/placeOrder", &body)
            .await?;
        tracing::info!("Order accepted: {}", data.order_id);
        Ok(data.order_id)
    }

    async fn funds(&self) -> Result<f64> {
        let data: RmsData = self
            .get_authed("/rest/secure/angelbroking/user/v1/getRMS")
            .await?;
        data.available_cash
            .parse::<f64>()
            .with_context(|| format!("unparseable available cash {:?}", data.available_cash))
    }

    async fn holdings(&self) -> Result<Vec<Holding>> {
        let rows: Vec<HoldingRow> = self
            .get_authed("/rest/secure/angelbroking/portfolio/v1/getHolding")
            .await?;
        Ok(rows
            .into_iter()
            .map(|h| Holding {
                symbol: h.trading_symbol,
                quantity: h.quantity,
                ltp: h.ltp,
            })
            .collect())
    }
}
