use serde::{Deserialize, Serialize};

/// Standard SmartAPI response envelope.
#[derive(Debug, Deserialize)]
pub struct ApiEnvelope<T> {
    pub status: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub errorcode: String,
    pub data: Option<T>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionData {
    #[serde(rename = "jwtToken")]
    pub jwt_token: String,
    #[serde(rename = "refreshToken")]
    pub refresh_token: String,
    #[serde(rename = "feedToken")]
    pub feed_token: String,
}

#[derive(Debug, Serialize)]
pub struct LoginRequest {
    pub clientcode: String,
    pub password: String,
    pub totp: String,
}

#[derive(Debug, Serialize)]
pub struct QuoteRequest {
    pub mode: &'static str,
    #[serde(rename = "exchangeTokens")]
    pub exchange_tokens: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct QuoteData {
    #[serde(default)]
    pub fetched: Vec<FullQuote>,
    #[serde(default)]
    pub unfetched: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct FullQuote {
    #[serde(rename = "symbolToken")]
    pub symbol_token: String,
    #[serde(default)]
    pub ltp: f64,
    /// Total traded value for the day.
    #[serde(rename = "totTradedValue", default, alias = "tradeValue")]
    pub total_traded_value: f64,
}

#[derive(Debug, Serialize)]
pub struct CandleRequest {
    pub exchange: String,
    pub symboltoken: String,
    pub interval: &'static str,
    pub fromdate: String,
    pub todate: String,
}

#[derive(Debug, Serialize)]
pub struct PlaceOrderRequest {
    pub variety: &'static str,
    pub tradingsymbol: String,
    pub symboltoken: String,
    pub transactiontype: String,
    pub exchange: String,
    pub ordertype: String,
    pub producttype: String,
    pub duration: &'static str,
    pub price: String,
    pub quantity: String,
}

#[derive(Debug, Deserialize)]
pub struct PlaceOrderData {
    #[serde(rename = "orderid")]
    pub order_id: String,
}

#[derive(Debug, Deserialize)]
pub struct LtpData {
    pub ltp: f64,
}

#[derive(Debug, Serialize)]
pub struct LtpRequest {
    pub exchange: String,
    pub tradingsymbol: String,
    pub symboltoken: String,
}

#[derive(Debug, Deserialize)]
pub struct RmsData {
    #[serde(rename = "availablecash", default)]
    pub available_cash: String,
}

#[derive(Debug, Deserialize)]
pub struct HoldingRow {
    #[serde(rename = "tradingsymbol")]
    pub trading_symbol: String,
    #[serde(default)]
    pub quantity: i64,
    #[serde(default)]
    pub ltp: f64,
}
