//! Third-party payment gateway client.
//!
//! The gateway exposes two JSON endpoints authenticated with the merchant's
//! app secret:
//!
//! - `POST /v1/trade/page-pay` creates a payment and returns the URL the buyer
//!   is redirected to.
//! - `POST /v1/trade/query` reports the state of a payment by our order number.
//!
//! Every response carries a `code`: `10000` for success, `40004` while the
//! gateway is still processing, anything else is a business failure.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::instrument;
use url::Url;

use daily_fresh_core::{OrderNumber, Price};

use crate::config::PaymentConfig;

/// Gateway response code for a successful call.
pub const CODE_SUCCESS: &str = "10000";

/// Gateway response code while a trade is still being processed.
pub const CODE_PROCESSING: &str = "40004";

/// Trade status once the buyer has paid.
pub const TRADE_SUCCESS: &str = "TRADE_SUCCESS";

/// Trade status while the buyer has not paid yet.
pub const WAIT_BUYER_PAY: &str = "WAIT_BUYER_PAY";

/// Errors that can occur when talking to the payment gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The gateway answered with a non-success HTTP status.
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// The gateway refused to create the payment.
    #[error("payment rejected: {code} - {message}")]
    Rejected { code: String, message: String },

    /// Failed to parse a response or build a request.
    #[error("Parse error: {0}")]
    Parse(String),
}

/// Payment to create for an order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentRequest {
    pub order_id: OrderNumber,
    /// Amount payable, shipping included.
    pub amount: Price,
    /// Title shown on the gateway's checkout page.
    pub subject: String,
}

/// A created payment.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PaymentIntent {
    /// Where to send the buyer.
    pub pay_url: String,
}

/// Result of a trade status query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TradeQuery {
    pub code: String,
    #[serde(default)]
    pub msg: Option<String>,
    #[serde(default)]
    pub trade_status: Option<String>,
    #[serde(default)]
    pub trade_no: Option<String>,
}

/// Operations the payment flow needs from a gateway.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Create a payment and return the buyer's redirect URL.
    async fn create_payment(&self, request: &PaymentRequest)
    -> Result<PaymentIntent, GatewayError>;

    /// Query the state of the payment for `order_id`.
    async fn query_payment(&self, order_id: &OrderNumber) -> Result<TradeQuery, GatewayError>;
}

#[derive(Serialize)]
struct PagePayBody<'a> {
    app_id: &'a str,
    out_trade_no: &'a str,
    total_amount: String,
    subject: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    return_url: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    notify_url: Option<&'a str>,
}

#[derive(Deserialize)]
struct PagePayResponse {
    code: String,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    pay_url: Option<String>,
}

#[derive(Serialize)]
struct QueryBody<'a> {
    app_id: &'a str,
    out_trade_no: &'a str,
}

/// HTTP client for the payment gateway.
#[derive(Clone)]
pub struct HttpPaymentGateway {
    client: reqwest::Client,
    base_url: Url,
    app_id: String,
    return_url: Option<Url>,
    notify_url: Option<Url>,
}

impl HttpPaymentGateway {
    /// Create a new gateway client.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client fails to build or the secret is not a
    /// valid header value.
    pub fn new(config: &PaymentConfig) -> Result<Self, GatewayError> {
        let mut headers = HeaderMap::new();

        let auth_value = format!("Bearer {}", config.app_secret.expose_secret());
        let mut auth = HeaderValue::from_str(&auth_value)
            .map_err(|e| GatewayError::Parse(format!("Invalid app secret format: {e}")))?;
        auth.set_sensitive(true);
        headers.insert("Authorization", auth);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: config.gateway_url.clone(),
            app_id: config.app_id.clone(),
            return_url: config.return_url.clone(),
            notify_url: config.notify_url.clone(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, GatewayError> {
        self.base_url
            .join(path)
            .map_err(|e| GatewayError::Parse(format!("Invalid gateway URL: {e}")))
    }

    async fn post<B: Serialize + Sync, R: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R, GatewayError> {
        let url = self.endpoint(path)?;
        let response = self.client.post(url).json(body).send().await?;
        let status = response.status();

        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(GatewayError::Api {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json()
            .await
            .map_err(|e| GatewayError::Parse(e.to_string()))
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    #[instrument(skip(self, request), fields(order_id = %request.order_id))]
    async fn create_payment(
        &self,
        request: &PaymentRequest,
    ) -> Result<PaymentIntent, GatewayError> {
        let body = PagePayBody {
            app_id: &self.app_id,
            out_trade_no: request.order_id.as_str(),
            total_amount: request.amount.to_string(),
            subject: &request.subject,
            return_url: self.return_url.as_ref().map(Url::as_str),
            notify_url: self.notify_url.as_ref().map(Url::as_str),
        };

        let response: PagePayResponse = self.post("v1/trade/page-pay", &body).await?;
        match response.pay_url {
            Some(pay_url) if response.code == CODE_SUCCESS => Ok(PaymentIntent { pay_url }),
            _ => Err(GatewayError::Rejected {
                code: response.code,
                message: response.msg.unwrap_or_default(),
            }),
        }
    }

    #[instrument(skip(self), fields(order_id = %order_id))]
    async fn query_payment(&self, order_id: &OrderNumber) -> Result<TradeQuery, GatewayError> {
        let body = QueryBody {
            app_id: &self.app_id,
            out_trade_no: order_id.as_str(),
        };
        self.post("v1/trade/query", &body).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_trade_query_tolerates_missing_fields() {
        let q: TradeQuery = serde_json::from_str(r#"{"code":"40004","msg":"processing"}"#).unwrap();
        assert_eq!(q.code, CODE_PROCESSING);
        assert!(q.trade_status.is_none());
        assert!(q.trade_no.is_none());
    }

    #[test]
    fn test_page_pay_body_formats_amount() {
        let body = PagePayBody {
            app_id: "app",
            out_trade_no: "202601011200001",
            total_amount: Price::from_cents(4050).to_string(),
            subject: "order",
            return_url: None,
            notify_url: None,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["total_amount"], "40.50");
        assert!(json.get("return_url").is_none());
    }
}
