//! HTTP Settlement Gateway
//!
//! JSON-over-HTTP client for the game platform. Every call is logged
//! (method, redacted request, status, raw body) before the body is interpreted.

use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info};

use super::error::GatewayError;
use super::{BuyDiamondReceipt, SUCCESS_CODE, SettlementGateway, SettlementRef};
use crate::config::SettlementConfig;
use crate::core_types::DiamondAmount;
use crate::models::GameCredentials;

/// Game platform client over HTTP
pub struct HttpSettlementGateway {
    client: reqwest::Client,
    base_url: String,
}

/// Common response envelope
#[derive(Deserialize, Debug)]
struct ApiEnvelope<D> {
    code: i64,
    #[serde(default, alias = "msg")]
    message: Option<String>,
    data: Option<D>,
}

/// The platform sends numbers both as JSON numbers and as strings
#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum LooseInt {
    Int(i64),
    Text(String),
}

impl LooseInt {
    fn parse(&self, field: &str) -> Result<i64, GatewayError> {
        match self {
            LooseInt::Int(v) => Ok(*v),
            LooseInt::Text(s) => s.trim().parse().map_err(|_| {
                GatewayError::MalformedResponse(format!("{} is not an integer: {:?}", field, s))
            }),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    login_name: &'a str,
    password: &'a str,
}

#[derive(Deserialize, Debug)]
struct QueryData {
    diamond: LooseInt,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GiftRequest<'a> {
    login_name1: &'a str,
    password1: &'a str,
    login_name2: &'a str,
    password2: &'a str,
    gift_diamond: DiamondAmount,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct GiftData {
    diamond_record_id: LooseInt,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BuyRequest<'a> {
    login_name: &'a str,
    password: &'a str,
    good_id: i64,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct BuyData {
    order_no: String,
    pay_price: Decimal,
}

impl HttpSettlementGateway {
    /// Create a gateway client with a bounded per-request timeout
    pub fn new(config: &SettlementConfig) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| {
                GatewayError::Unavailable(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    /// POST a JSON request and decode the envelope.
    ///
    /// Logs before interpreting anything so failed attempts are audited too.
    async fn call<Req, D>(
        &self,
        method: &'static str,
        path: &str,
        request: &Req,
    ) -> Result<ApiEnvelope<D>, GatewayError>
    where
        Req: Serialize,
        D: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        let logged_request = redacted(request);

        let response = match self.client.post(&url).json(request).send().await {
            Ok(r) => r,
            Err(e) => {
                error!(
                    target: "settlement",
                    method,
                    request = %logged_request,
                    error = %e,
                    "Gateway call failed"
                );
                return Err(GatewayError::Unavailable(format!("{} failed: {}", method, e)));
            }
        };

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            error!(target: "settlement", method, request = %logged_request, error = %e, "Failed to read gateway body");
            GatewayError::Unavailable(format!("{}: failed to read body: {}", method, e))
        })?;

        info!(
            target: "settlement",
            method,
            request = %logged_request,
            status = status.as_u16(),
            response = %body,
            "Gateway call"
        );

        if !status.is_success() {
            return Err(GatewayError::Unavailable(format!(
                "{} returned HTTP {}",
                method, status
            )));
        }

        serde_json::from_str(&body)
            .map_err(|e| GatewayError::MalformedResponse(format!("{}: {}", method, e)))
    }
}

/// Serialize a request for logging with every password field masked
fn redacted<T: Serialize>(request: &T) -> Value {
    let mut value = serde_json::to_value(request).unwrap_or(Value::Null);
    if let Value::Object(map) = &mut value {
        for (key, v) in map.iter_mut() {
            if key.to_ascii_lowercase().contains("password") {
                *v = Value::String("***".to_string());
            }
        }
    }
    value
}

fn message_of<D>(envelope: &ApiEnvelope<D>) -> String {
    envelope.message.clone().unwrap_or_default()
}

#[async_trait]
impl SettlementGateway for HttpSettlementGateway {
    async fn query_diamond_balance(
        &self,
        account: &GameCredentials,
    ) -> Result<DiamondAmount, GatewayError> {
        let request = QueryRequest {
            login_name: &account.login_name,
            password: &account.password,
        };
        let envelope: ApiEnvelope<QueryData> =
            self.call("queryDiamond", "/diamond/query", &request).await?;

        if envelope.code != SUCCESS_CODE {
            return Err(GatewayError::AccountInvalid {
                code: envelope.code,
                message: message_of(&envelope),
            });
        }

        let data = envelope
            .data
            .ok_or_else(|| GatewayError::MalformedResponse("queryDiamond: no data".into()))?;
        let diamond = data.diamond.parse("diamond")?;
        if diamond < 0 {
            return Err(GatewayError::MalformedResponse(format!(
                "queryDiamond: negative balance {}",
                diamond
            )));
        }
        Ok(diamond)
    }

    async fn transfer_diamonds(
        &self,
        from: &GameCredentials,
        to: &GameCredentials,
        amount: DiamondAmount,
    ) -> Result<SettlementRef, GatewayError> {
        let request = GiftRequest {
            login_name1: &from.login_name,
            password1: &from.password,
            login_name2: &to.login_name,
            password2: &to.password,
            gift_diamond: amount,
        };
        let envelope: ApiEnvelope<GiftData> = self
            .call("giftDiamond", "/diamond/giftDiamond", &request)
            .await?;

        if envelope.code != SUCCESS_CODE {
            return Err(GatewayError::SettlementRejected {
                code: envelope.code,
                message: message_of(&envelope),
            });
        }

        let data = envelope
            .data
            .ok_or_else(|| GatewayError::MalformedResponse("giftDiamond: no data".into()))?;
        let record_id = data.diamond_record_id.parse("diamondRecordId")?;
        Ok(record_id.to_string())
    }

    async fn buy_diamond(
        &self,
        account: &GameCredentials,
        good_id: i64,
    ) -> Result<BuyDiamondReceipt, GatewayError> {
        let request = BuyRequest {
            login_name: &account.login_name,
            password: &account.password,
            good_id,
        };
        let envelope: ApiEnvelope<BuyData> = self
            .call("buyDiamond", "/diamond/buyDiamond", &request)
            .await?;

        if envelope.code != SUCCESS_CODE {
            return Err(GatewayError::SettlementRejected {
                code: envelope.code,
                message: message_of(&envelope),
            });
        }

        let data = envelope
            .data
            .ok_or_else(|| GatewayError::MalformedResponse("buyDiamond: no data".into()))?;
        Ok(BuyDiamondReceipt {
            order_no: data.order_no,
            pay_price: data.pay_price,
        })
    }
}
